//! The disassembler: decodes an executable's code image back into
//! assembler text. Jump and call targets are rendered as hex code offsets,
//! so the output assembles back into an equivalent object without labels.

use std::fmt;

use crate::bytecode::{Opcode, PushPopInfo, Register};

#[derive(Debug, PartialEq, Eq)]
pub enum DisasmError {
    UnexpectedCodeEnd { offset: usize },
    UnknownOpcode { offset: usize, opcode: u8 },
}

impl fmt::Display for DisasmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisasmError::UnexpectedCodeEnd { offset } => {
                write!(f, "unexpected end of code at offset {:#x}", offset)
            }
            DisasmError::UnknownOpcode { offset, opcode } => {
                write!(f, "unknown opcode {:#04x} at offset {:#x}", opcode, offset)
            }
        }
    }
}

impl std::error::Error for DisasmError {}

/// Decode a code image into one instruction per line.
pub fn disassemble(code: &[u8]) -> Result<String, DisasmError> {
    let mut output = String::new();
    let mut reader = CodeReader { code, pos: 0 };

    while !reader.at_end() {
        let offset = reader.pos;
        let byte = reader.read_u8()?;
        let opcode = Opcode::from_u8(byte).ok_or(DisasmError::UnknownOpcode {
            offset,
            opcode: byte,
        })?;

        match opcode {
            Opcode::Syscall => {
                let index = reader.read_u32()?;
                output.push_str(&format!("syscall {}\n", index));
            }

            Opcode::Push | Opcode::Pop => {
                let info = PushPopInfo::from_byte(reader.read_u8()?);
                let imm = if info.use_imm { reader.read_u32()? } else { 0 };
                output.push_str(&format!(
                    "{} {}\n",
                    opcode.mnemonic(),
                    format_operand(info, imm)
                ));
            }

            _ if opcode.takes_code_offset() => {
                let target = reader.read_u32()?;
                output.push_str(&format!("{} 0x{:08X}\n", opcode.mnemonic(), target));
            }

            _ => {
                output.push_str(opcode.mnemonic());
                output.push('\n');
            }
        }
    }

    Ok(output)
}

fn format_operand(info: PushPopInfo, imm: u32) -> String {
    let register = Register::from_index(info.register)
        .map(|r| r.name())
        .unwrap_or("cz");

    match (info.memory_access, info.use_imm) {
        (true, true) => format!("[{} + 0x{:08X}]", register, imm),
        (true, false) => format!("[{}]", register),
        (false, true) => format!("{} + 0x{:08X}", register, imm),
        (false, false) => register.to_string(),
    }
}

struct CodeReader<'a> {
    code: &'a [u8],
    pos: usize,
}

impl CodeReader<'_> {
    fn at_end(&self) -> bool {
        self.pos >= self.code.len()
    }

    fn read_u8(&mut self) -> Result<u8, DisasmError> {
        let byte = *self
            .code
            .get(self.pos)
            .ok_or(DisasmError::UnexpectedCodeEnd { offset: self.pos })?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_u32(&mut self) -> Result<u32, DisasmError> {
        if self.pos + 4 > self.code.len() {
            return Err(DisasmError::UnexpectedCodeEnd { offset: self.pos });
        }
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.code[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(u32::from_le_bytes(bytes))
    }
}
