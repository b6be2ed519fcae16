use crate::diagnostic::Diagnostic;
use crate::lexeme::Lexeme;
use crate::span::{Span, Spanned};

/// A source comment, dropped before parsing.
#[derive(Clone, Debug)]
pub struct Comment {
    pub text: String, // includes the "//" prefix
    pub span: Span,
}

pub struct Lexer<'src> {
    source: &'src [u8],
    file_id: u16,
    pos: usize,
    comments: Vec<Comment>,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str, file_id: u16) -> Self {
        Self {
            source: source.as_bytes(),
            file_id,
            pos: 0,
            comments: Vec::new(),
        }
    }

    /// Tokenize the whole source. Stops at the first character that begins
    /// no legal token.
    pub fn tokenize(mut self) -> Result<(Vec<Spanned<Lexeme>>, Vec<Comment>), Diagnostic> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token()?;
            let is_eof = tok.node == Lexeme::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        Ok((tokens, self.comments))
    }

    fn next_token(&mut self) -> Result<Spanned<Lexeme>, Diagnostic> {
        self.skip_whitespace_and_comments();

        if self.pos >= self.source.len() {
            return Ok(self.make_token(Lexeme::Eof, self.pos, self.pos));
        }

        let start = self.pos;
        let ch = self.source[self.pos];

        if is_ident_start(ch) {
            return Ok(self.scan_ident_or_keyword());
        }

        if ch.is_ascii_digit() {
            return Ok(self.scan_number());
        }

        match self.scan_symbol(start) {
            Some(tok) => Ok(tok),
            None => Err(Diagnostic::error(
                format!("unexpected symbol '{}' (offset {})", ch as char, start),
                Span::point(self.file_id, start as u32),
            )),
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while self.pos < self.source.len() && self.source[self.pos].is_ascii_whitespace() {
                self.pos += 1;
            }

            // Collect line comments
            if self.pos + 1 < self.source.len()
                && self.source[self.pos] == b'/'
                && self.source[self.pos + 1] == b'/'
            {
                let start = self.pos;
                while self.pos < self.source.len() && self.source[self.pos] != b'\n' {
                    self.pos += 1;
                }
                let text = std::str::from_utf8(&self.source[start..self.pos])
                    .unwrap()
                    .to_string();
                self.comments.push(Comment {
                    text,
                    span: Span::new(self.file_id, start as u32, self.pos as u32),
                });
                continue;
            }

            break;
        }
    }

    fn scan_ident_or_keyword(&mut self) -> Spanned<Lexeme> {
        let start = self.pos;
        while self.pos < self.source.len() && is_ident_continue(self.source[self.pos]) {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.source[start..self.pos]).unwrap();
        let token = Lexeme::from_keyword(text).unwrap_or_else(|| Lexeme::Ident(text.to_string()));
        self.make_token(token, start, self.pos)
    }

    /// Scan a numeric literal: decimal with optional fraction/exponent,
    /// or `0x`/`0o`/`0b` prefixed integer. A fractional or exponent part
    /// makes the literal floating.
    fn scan_number(&mut self) -> Spanned<Lexeme> {
        let start = self.pos;

        let base: u64 = if self.starts_with(b"0x") {
            16
        } else if self.starts_with(b"0o") {
            8
        } else if self.starts_with(b"0b") {
            2
        } else {
            10
        };
        if base != 10 {
            self.pos += 2;
        }

        let mut integer: u64 = 0;
        while self.pos < self.source.len() && self.source[self.pos].is_ascii_hexdigit() {
            let digit = hex_digit_value(self.source[self.pos]);
            if digit >= base {
                break;
            }
            integer = integer.wrapping_mul(base).wrapping_add(digit);
            self.pos += 1;
        }

        let mut is_float = false;
        if base == 10 {
            // fraction: '.' digit+
            if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.pos += 1;
                while self.pos < self.source.len() && self.source[self.pos].is_ascii_digit() {
                    self.pos += 1;
                }
            }

            // exponent: 'e' [+-]? digit+
            if self.peek() == Some(b'e') {
                let after_sign = match self.peek_at(1) {
                    Some(b'+') | Some(b'-') => 2,
                    _ => 1,
                };
                if self.peek_at(after_sign).is_some_and(|c| c.is_ascii_digit()) {
                    is_float = true;
                    self.pos += after_sign;
                    while self.pos < self.source.len() && self.source[self.pos].is_ascii_digit() {
                        self.pos += 1;
                    }
                }
            }
        }

        let token = if is_float {
            let text = std::str::from_utf8(&self.source[start..self.pos]).unwrap();
            Lexeme::Floating(text.parse().unwrap_or(0.0))
        } else {
            Lexeme::Integer(integer)
        };
        self.make_token(token, start, self.pos)
    }

    fn scan_symbol(&mut self, start: usize) -> Option<Spanned<Lexeme>> {
        let ch = self.source[self.pos];
        self.pos += 1;

        let eq_follows = self.peek() == Some(b'=');

        let token = match ch {
            b'<' if eq_follows => self.two_char(Lexeme::LtEq),
            b'>' if eq_follows => self.two_char(Lexeme::GtEq),
            b'=' if eq_follows => self.two_char(Lexeme::EqEq),
            b'!' if eq_follows => self.two_char(Lexeme::NotEq),
            b'+' if eq_follows => self.two_char(Lexeme::PlusEq),
            b'-' if eq_follows => self.two_char(Lexeme::MinusEq),
            b'*' if eq_follows => self.two_char(Lexeme::StarEq),
            b'/' if eq_follows => self.two_char(Lexeme::SlashEq),

            b'<' => Lexeme::Lt,
            b'>' => Lexeme::Gt,
            b':' => Lexeme::Colon,
            b';' => Lexeme::Semicolon,
            b',' => Lexeme::Comma,
            b'=' => Lexeme::Eq,
            b'+' => Lexeme::Plus,
            b'-' => Lexeme::Minus,
            b'*' => Lexeme::Star,
            b'/' => Lexeme::Slash,
            b'{' => Lexeme::LBrace,
            b'}' => Lexeme::RBrace,
            b'(' => Lexeme::LParen,
            b')' => Lexeme::RParen,
            b'[' => Lexeme::LBracket,
            b']' => Lexeme::RBracket,

            _ => {
                self.pos = start;
                return None;
            }
        };

        Some(self.make_token(token, start, self.pos))
    }

    fn two_char(&mut self, token: Lexeme) -> Lexeme {
        self.pos += 1;
        token
    }

    fn starts_with(&self, prefix: &[u8]) -> bool {
        self.source[self.pos..].starts_with(prefix)
    }

    fn peek(&self) -> Option<u8> {
        self.source.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.source.get(self.pos + offset).copied()
    }

    fn make_token(&self, token: Lexeme, start: usize, end: usize) -> Spanned<Lexeme> {
        Spanned::new(token, Span::new(self.file_id, start as u32, end as u32))
    }
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

fn is_ident_continue(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_'
}

fn hex_digit_value(ch: u8) -> u64 {
    match ch {
        b'0'..=b'9' => (ch - b'0') as u64,
        b'a'..=b'f' => (ch - b'a' + 10) as u64,
        b'A'..=b'F' => (ch - b'A' + 10) as u64,
        _ => u64::MAX,
    }
}
