//! The textual bytecode assembler: line-oriented source in, relocatable
//! object out.
//!
//! Each line is one of: an instruction (`<opcode> <operand?>`), a relative
//! label (`<label>:`), an absolute label (`<name> = <literal>`), or
//! blank/comment. `;` starts a comment. Jump and call targets may be label
//! names (emitted as links) or numeric code offsets.

use std::fmt;

use crate::bytecode::{Opcode, PushPopInfo, Register};
use crate::object::{Label, Link, Object, NAME_MAX};

#[derive(Debug, PartialEq)]
pub enum AsmError {
    UnknownInstruction {
        line_number: u32,
        line: String,
        token: String,
    },
    UnexpectedSymbol {
        line_number: u32,
        symbol: char,
    },
    UnexpectedToken {
        line_number: u32,
        expected: &'static str,
        got: String,
    },
    MissingOperand {
        line_number: u32,
        mnemonic: String,
    },
    ImmediateOutOfRange {
        line_number: u32,
        value: u64,
    },
    TooLongName {
        line_number: u32,
        name: String,
    },
}

impl AsmError {
    pub fn line_number(&self) -> u32 {
        match self {
            AsmError::UnknownInstruction { line_number, .. }
            | AsmError::UnexpectedSymbol { line_number, .. }
            | AsmError::UnexpectedToken { line_number, .. }
            | AsmError::MissingOperand { line_number, .. }
            | AsmError::ImmediateOutOfRange { line_number, .. }
            | AsmError::TooLongName { line_number, .. } => *line_number,
        }
    }
}

impl fmt::Display for AsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsmError::UnknownInstruction {
                line_number,
                line,
                token,
            } => write!(
                f,
                "unknown instruction '{}' at line {}: {}",
                token, line_number, line
            ),
            AsmError::UnexpectedSymbol {
                line_number,
                symbol,
            } => write!(f, "unexpected symbol '{}' at line {}", symbol, line_number),
            AsmError::UnexpectedToken {
                line_number,
                expected,
                got,
            } => write!(
                f,
                "unexpected token at line {} (expected {}, got {})",
                line_number, expected, got
            ),
            AsmError::MissingOperand {
                line_number,
                mnemonic,
            } => write!(
                f,
                "missing operand for '{}' at line {}",
                mnemonic, line_number
            ),
            AsmError::ImmediateOutOfRange { line_number, value } => write!(
                f,
                "immediate {} at line {} does not fit in 32 bits",
                value, line_number
            ),
            AsmError::TooLongName { line_number, name } => {
                write!(f, "too long name '{}' at line {}", name, line_number)
            }
        }
    }
}

impl std::error::Error for AsmError {}

/// Assemble textual bytecode into a relocatable object.
pub fn assemble(source: &str, source_name: &str) -> Result<Object, AsmError> {
    let mut assembler = Assembler {
        code: Vec::new(),
        labels: Vec::new(),
        links: Vec::new(),
        source_name: source_name.to_string(),
    };

    for (index, line) in source.lines().enumerate() {
        let line_number = index as u32 + 1;
        assembler.assemble_line(line, line_number)?;
    }

    Ok(Object {
        source_name: assembler.source_name,
        code: assembler.code,
        labels: assembler.labels,
        links: assembler.links,
    })
}

struct Assembler {
    code: Vec<u8>,
    labels: Vec<Label>,
    links: Vec<Link>,
    source_name: String,
}

#[derive(Clone, Debug, PartialEq)]
enum AsmToken {
    Ident(String),
    Int(u64),
    Float(f64),
    LBracket,
    RBracket,
    Plus,
    Colon,
    Eq,
}

impl AsmToken {
    fn describe(&self) -> String {
        match self {
            AsmToken::Ident(name) => format!("identifier '{}'", name),
            AsmToken::Int(value) => format!("integer {}", value),
            AsmToken::Float(value) => format!("floating literal {}", value),
            AsmToken::LBracket => "'['".to_string(),
            AsmToken::RBracket => "']'".to_string(),
            AsmToken::Plus => "'+'".to_string(),
            AsmToken::Colon => "':'".to_string(),
            AsmToken::Eq => "'='".to_string(),
        }
    }
}

impl Assembler {
    fn assemble_line(&mut self, line: &str, line_number: u32) -> Result<(), AsmError> {
        let tokens = tokenize_line(line, line_number)?;
        if tokens.is_empty() {
            return Ok(());
        }

        let mut cursor = TokenCursor {
            tokens: &tokens,
            pos: 0,
            line_number,
        };

        let first = cursor.next().cloned();
        let Some(AsmToken::Ident(name)) = first.clone() else {
            return Err(AsmError::UnexpectedToken {
                line_number,
                expected: "instruction, label or constant",
                got: first
                    .map(|t| t.describe())
                    .unwrap_or_else(|| "end of line".to_string()),
            });
        };

        // `<label>:` — a relative label at the current code offset
        if cursor.peek() == Some(&AsmToken::Colon) {
            cursor.next();
            cursor.expect_end()?;
            self.add_label(
                Label {
                    source_line: line_number,
                    value: self.code.len() as u32,
                    is_relative: true,
                    name,
                },
                line_number,
            )?;
            return Ok(());
        }

        // `<name> = <literal>` — an absolute label (named constant)
        if cursor.peek() == Some(&AsmToken::Eq) {
            cursor.next();
            let value = cursor.expect_number()?;
            cursor.expect_end()?;
            self.add_label(
                Label {
                    source_line: line_number,
                    value,
                    is_relative: false,
                    name,
                },
                line_number,
            )?;
            return Ok(());
        }

        // otherwise an instruction
        let Some(opcode) = Opcode::from_mnemonic(&name) else {
            return Err(AsmError::UnknownInstruction {
                line_number,
                line: line.trim().to_string(),
                token: name,
            });
        };

        match opcode {
            Opcode::Syscall => {
                self.code.push(opcode as u8);
                let index = cursor.expect_number()?;
                self.code.extend_from_slice(&index.to_le_bytes());
            }

            Opcode::Push | Opcode::Pop => {
                self.code.push(opcode as u8);
                self.assemble_push_pop_operand(&mut cursor)?;
            }

            _ if opcode.takes_code_offset() => {
                self.code.push(opcode as u8);
                match cursor.next().cloned() {
                    Some(AsmToken::Ident(target)) => {
                        self.add_link(target, line_number)?;
                    }
                    Some(AsmToken::Int(offset)) => {
                        let offset = check_u32(offset, line_number)?;
                        self.code.extend_from_slice(&offset.to_le_bytes());
                    }
                    other => {
                        return Err(AsmError::UnexpectedToken {
                            line_number,
                            expected: "label name or code offset",
                            got: other.map(|t| t.describe()).unwrap_or_else(|| "end of line".to_string()),
                        })
                    }
                }
            }

            _ => self.code.push(opcode as u8),
        }

        cursor.expect_end()
    }

    /// `push`/`pop` operand: `<reg>`, `[<reg>]`, `<reg>+<imm>`,
    /// `[<reg>+<imm>]`, `<imm>`, or `[<imm>]`. A bare identifier in the
    /// immediate position refers to a label and becomes a link.
    fn assemble_push_pop_operand(&mut self, cursor: &mut TokenCursor) -> Result<(), AsmError> {
        let line_number = cursor.line_number;
        let memory_access = if cursor.peek() == Some(&AsmToken::LBracket) {
            cursor.next();
            true
        } else {
            false
        };

        let mut register = Register::Cz;
        let mut imm: Option<Imm> = None;

        match cursor.next().cloned() {
            Some(AsmToken::Ident(name)) => match Register::from_name(&name) {
                Some(reg) => {
                    register = reg;
                    if cursor.peek() == Some(&AsmToken::Plus) {
                        cursor.next();
                        imm = Some(cursor.expect_imm()?);
                    }
                }
                None => imm = Some(Imm::Symbol(name)),
            },
            Some(AsmToken::Int(value)) => {
                imm = Some(Imm::Value(check_u32(value, line_number)?));
            }
            Some(AsmToken::Float(value)) => {
                imm = Some(Imm::Value((value as f32).to_bits()));
            }
            other => {
                return Err(AsmError::UnexpectedToken {
                    line_number,
                    expected: "register or immediate",
                    got: other.map(|t| t.describe()).unwrap_or_else(|| "end of line".to_string()),
                })
            }
        }

        if memory_access {
            match cursor.next() {
                Some(AsmToken::RBracket) => {}
                other => {
                    return Err(AsmError::UnexpectedToken {
                        line_number,
                        expected: "']'",
                        got: other.map(|t| t.describe()).unwrap_or_else(|| "end of line".to_string()),
                    })
                }
            }
        }

        let info = PushPopInfo {
            register: register as u8,
            memory_access,
            use_imm: imm.is_some(),
        };
        self.code.push(info.to_byte());

        match imm {
            None => {}
            Some(Imm::Value(value)) => self.code.extend_from_slice(&value.to_le_bytes()),
            Some(Imm::Symbol(name)) => self.add_link(name, line_number)?,
        }

        Ok(())
    }

    fn add_label(&mut self, label: Label, line_number: u32) -> Result<(), AsmError> {
        check_name(&label.name, line_number)?;
        self.labels.push(label);
        Ok(())
    }

    fn add_link(&mut self, name: String, line_number: u32) -> Result<(), AsmError> {
        check_name(&name, line_number)?;
        self.links.push(Link {
            source_line: line_number,
            code_offset: self.code.len() as u32,
            name,
        });
        self.code.extend_from_slice(&[0xFF; 4]);
        Ok(())
    }
}

/// An immediate operand: a literal value or a symbol to be linked.
enum Imm {
    Value(u32),
    Symbol(String),
}

struct TokenCursor<'a> {
    tokens: &'a [AsmToken],
    pos: usize,
    line_number: u32,
}

impl TokenCursor<'_> {
    fn peek(&self) -> Option<&AsmToken> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&AsmToken> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect_number(&mut self) -> Result<u32, AsmError> {
        let line_number = self.line_number;
        match self.next().cloned() {
            Some(AsmToken::Int(value)) => check_u32(value, line_number),
            Some(AsmToken::Float(value)) => Ok((value as f32).to_bits()),
            other => Err(AsmError::UnexpectedToken {
                line_number,
                expected: "numeric literal",
                got: other.map(|t| t.describe()).unwrap_or_else(|| "end of line".to_string()),
            }),
        }
    }

    fn expect_imm(&mut self) -> Result<Imm, AsmError> {
        let line_number = self.line_number;
        match self.next().cloned() {
            Some(AsmToken::Int(value)) => Ok(Imm::Value(check_u32(value, line_number)?)),
            Some(AsmToken::Float(value)) => Ok(Imm::Value((value as f32).to_bits())),
            Some(AsmToken::Ident(name)) => Ok(Imm::Symbol(name)),
            other => Err(AsmError::UnexpectedToken {
                line_number,
                expected: "immediate",
                got: other.map(|t| t.describe()).unwrap_or_else(|| "end of line".to_string()),
            }),
        }
    }

    fn expect_end(&mut self) -> Result<(), AsmError> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(AsmError::UnexpectedToken {
                line_number: self.line_number,
                expected: "end of line",
                got: token.describe(),
            }),
        }
    }
}

fn check_u32(value: u64, line_number: u32) -> Result<u32, AsmError> {
    u32::try_from(value).map_err(|_| AsmError::ImmediateOutOfRange { line_number, value })
}

fn check_name(name: &str, line_number: u32) -> Result<(), AsmError> {
    if name.len() > NAME_MAX {
        return Err(AsmError::TooLongName {
            line_number,
            name: name.to_string(),
        });
    }
    Ok(())
}

fn tokenize_line(line: &str, line_number: u32) -> Result<Vec<AsmToken>, AsmError> {
    let bytes = line.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let ch = bytes[pos];

        if ch.is_ascii_whitespace() {
            pos += 1;
            continue;
        }
        if ch == b';' {
            break;
        }

        match ch {
            b'[' => {
                tokens.push(AsmToken::LBracket);
                pos += 1;
            }
            b']' => {
                tokens.push(AsmToken::RBracket);
                pos += 1;
            }
            b'+' => {
                tokens.push(AsmToken::Plus);
                pos += 1;
            }
            b':' => {
                tokens.push(AsmToken::Colon);
                pos += 1;
            }
            b'=' => {
                tokens.push(AsmToken::Eq);
                pos += 1;
            }
            b'0'..=b'9' => {
                let start = pos;
                if bytes[pos..].starts_with(b"0x") {
                    pos += 2;
                    while pos < bytes.len() && bytes[pos].is_ascii_hexdigit() {
                        pos += 1;
                    }
                    let text = &line[start + 2..pos];
                    let value = u64::from_str_radix(text, 16).unwrap_or(u64::MAX);
                    tokens.push(AsmToken::Int(value));
                } else {
                    let mut is_float = false;
                    while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                        pos += 1;
                    }
                    if pos < bytes.len()
                        && bytes[pos] == b'.'
                        && pos + 1 < bytes.len()
                        && bytes[pos + 1].is_ascii_digit()
                    {
                        is_float = true;
                        pos += 1;
                        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                            pos += 1;
                        }
                    }
                    let text = &line[start..pos];
                    if is_float {
                        tokens.push(AsmToken::Float(text.parse().unwrap_or(0.0)));
                    } else {
                        tokens.push(AsmToken::Int(text.parse().unwrap_or(u64::MAX)));
                    }
                }
            }
            _ if ch.is_ascii_alphabetic() || ch == b'_' => {
                let start = pos;
                while pos < bytes.len()
                    && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_')
                {
                    pos += 1;
                }
                tokens.push(AsmToken::Ident(line[start..pos].to_string()));
            }
            _ => {
                return Err(AsmError::UnexpectedSymbol {
                    line_number,
                    symbol: ch as char,
                })
            }
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_instructions() {
        let object = assemble("halt\nret\nadd\nmgs\n", "t.cfasm").unwrap();
        assert_eq!(
            object.code,
            vec![
                Opcode::Halt as u8,
                Opcode::Ret as u8,
                Opcode::Add as u8,
                Opcode::Mgs as u8,
            ]
        );
        assert!(object.labels.is_empty());
        assert!(object.links.is_empty());
    }

    #[test]
    fn test_comments_and_blank_lines() {
        let object = assemble("; leading comment\n\nhalt ; trailing\n", "t.cfasm").unwrap();
        assert_eq!(object.code, vec![Opcode::Halt as u8]);
    }

    #[test]
    fn test_relative_label() {
        let object = assemble("halt\nstart:\nret\n", "t.cfasm").unwrap();
        assert_eq!(object.labels.len(), 1);
        let label = &object.labels[0];
        assert_eq!(label.name, "start");
        assert_eq!(label.value, 1);
        assert!(label.is_relative);
        assert_eq!(label.source_line, 2);
    }

    #[test]
    fn test_absolute_label() {
        let object = assemble("VRAM = 0x1000\n", "t.cfasm").unwrap();
        let label = &object.labels[0];
        assert_eq!(label.name, "VRAM");
        assert_eq!(label.value, 0x1000);
        assert!(!label.is_relative);
    }

    #[test]
    fn test_jump_to_label_emits_link() {
        let object = assemble("jmp start\nstart:\nhalt\n", "t.cfasm").unwrap();
        assert_eq!(object.code[0], Opcode::Jmp as u8);
        assert_eq!(&object.code[1..5], &[0xFF; 4]);
        assert_eq!(object.links.len(), 1);
        assert_eq!(object.links[0].name, "start");
        assert_eq!(object.links[0].code_offset, 1);
        assert_eq!(object.links[0].source_line, 1);
    }

    #[test]
    fn test_jump_to_numeric_offset() {
        let object = assemble("jmp 0x0000000C\n", "t.cfasm").unwrap();
        assert_eq!(object.code[0], Opcode::Jmp as u8);
        assert_eq!(&object.code[1..5], &0x0Cu32.to_le_bytes());
        assert!(object.links.is_empty());
    }

    #[test]
    fn test_syscall_index() {
        let object = assemble("syscall 1\n", "t.cfasm").unwrap();
        assert_eq!(object.code[0], Opcode::Syscall as u8);
        assert_eq!(&object.code[1..5], &1u32.to_le_bytes());
    }

    #[test]
    fn test_push_pop_operand_forms() {
        let object = assemble(
            "push ax\npush [bx]\npush cx + 4\npush [dx + 8]\npush 15\npush [16]\npop ex\n",
            "t.cfasm",
        )
        .unwrap();

        let mut expected = Vec::new();
        let push = Opcode::Push as u8;
        expected.extend_from_slice(&[push, PushPopInfo::register(Register::Ax).to_byte()]);
        expected.extend_from_slice(&[push, PushPopInfo::memory(Register::Bx).to_byte()]);
        expected.extend_from_slice(&[push, PushPopInfo::register_imm(Register::Cx).to_byte()]);
        expected.extend_from_slice(&4u32.to_le_bytes());
        expected.extend_from_slice(&[push, PushPopInfo::memory_imm(Register::Dx).to_byte()]);
        expected.extend_from_slice(&8u32.to_le_bytes());
        expected.extend_from_slice(&[push, PushPopInfo::register_imm(Register::Cz).to_byte()]);
        expected.extend_from_slice(&15u32.to_le_bytes());
        expected.extend_from_slice(&[push, PushPopInfo::memory_imm(Register::Cz).to_byte()]);
        expected.extend_from_slice(&16u32.to_le_bytes());
        expected.extend_from_slice(&[
            Opcode::Pop as u8,
            PushPopInfo::register(Register::Ex).to_byte(),
        ]);

        assert_eq!(object.code, expected);
    }

    #[test]
    fn test_push_float_immediate() {
        let object = assemble("push 1.5\n", "t.cfasm").unwrap();
        assert_eq!(&object.code[2..6], &1.5f32.to_bits().to_le_bytes());
    }

    #[test]
    fn test_push_symbol_links_constant() {
        let object = assemble("VRAM = 0x1000\npush VRAM\n", "t.cfasm").unwrap();
        assert_eq!(object.links.len(), 1);
        assert_eq!(object.links[0].name, "VRAM");
        assert_eq!(object.links[0].code_offset, 2);
    }

    #[test]
    fn test_error_unknown_instruction_carries_line_and_token() {
        let err = assemble("halt\nmeow 3\n", "t.cfasm").unwrap_err();
        match err {
            AsmError::UnknownInstruction {
                line_number,
                ref line,
                ref token,
            } => {
                assert_eq!(line_number, 2);
                assert_eq!(line, "meow 3");
                assert_eq!(token, "meow");
            }
            other => panic!("expected unknown instruction, got {:?}", other),
        }
    }

    #[test]
    fn test_error_unexpected_symbol() {
        let err = assemble("push @\n", "t.cfasm").unwrap_err();
        assert!(matches!(
            err,
            AsmError::UnexpectedSymbol {
                line_number: 1,
                symbol: '@'
            }
        ));
    }

    #[test]
    fn test_error_missing_bracket() {
        let err = assemble("push [ax\n", "t.cfasm").unwrap_err();
        assert!(matches!(err, AsmError::UnexpectedToken { .. }));
    }

    #[test]
    fn test_error_trailing_tokens() {
        let err = assemble("halt 3\n", "t.cfasm").unwrap_err();
        assert!(matches!(
            err,
            AsmError::UnexpectedToken {
                expected: "end of line",
                ..
            }
        ));
    }

    #[test]
    fn test_error_immediate_out_of_range() {
        let err = assemble("push 4294967296\n", "t.cfasm").unwrap_err();
        assert!(matches!(err, AsmError::ImmediateOutOfRange { .. }));
    }

    #[test]
    fn test_error_too_long_name() {
        let source = format!("{}:\n", "x".repeat(NAME_MAX + 1));
        let err = assemble(&source, "t.cfasm").unwrap_err();
        assert!(matches!(err, AsmError::TooLongName { .. }));
    }
}
