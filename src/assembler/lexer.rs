use crate::assembler::source::{Line, SourceError, SourcePos};

use self::token::Token;

pub mod token;

/// LineReader tokenizes one source line, byte by byte.
///
/// Supports a one-token pushback buffer (`unget`) so callers can peek one
/// token ahead while deciding between statement forms.
#[derive(Debug)]
pub struct LineReader<'a> {
    line: &'a Line,
    bytes: &'a [u8],
    offset: usize,
    pushback: Option<Token>,
}

impl<'a> LineReader<'a> {
    pub fn new(line: &'a Line) -> Self {
        Self {
            line,
            bytes: line.text.as_bytes(),
            offset: 0,
            pushback: None,
        }
    }

    pub fn line(&self) -> &Line {
        self.line
    }

    fn get(&mut self) -> Option<u8> {
        if self.offset == self.bytes.len() {
            None
        } else {
            let c = self.bytes[self.offset];
            self.offset += 1;
            Some(c)
        }
    }

    fn back(&mut self) {
        self.offset -= 1;
    }

    fn pos_at(&self, column: usize) -> SourcePos {
        SourcePos::new(self.line.file, self.line.number, column)
    }

    /// Pushes a token back; the next `next_token` call returns it again.
    pub fn unget(&mut self, token: Token) {
        self.pushback = Some(token);
    }

    pub fn next_token(&mut self) -> Result<Token, SourceError> {
        if let Some(token) = self.pushback.take() {
            return Ok(token);
        }

        let mut c = self.get();
        while matches!(c, Some(b) if b.is_ascii_whitespace()) {
            c = self.get();
        }

        let Some(c) = c else {
            return Ok(Token::end(self.pos_at(self.offset)));
        };
        let pos = self.pos_at(self.offset - 1);

        if c == b';' {
            // The rest of the line is comment.
            self.offset = self.bytes.len();
            return Ok(Token::end(pos));
        }

        if c.is_ascii_alphabetic() || c == b'_' || c == b'\'' {
            let start = self.offset - 1;
            while let Some(c) = self.get() {
                if c.is_ascii_alphanumeric() || c == b'_' || c == b'$' || c == b'\'' {
                    continue;
                }
                self.back();
                break;
            }
            let text = &self.line.text[start..self.offset];
            return Ok(Token::identifier(pos, text));
        }

        if c.is_ascii_digit() {
            let mut value = (c - b'0') as u64;
            while let Some(c) = self.get() {
                if !c.is_ascii_digit() {
                    self.back();
                    break;
                }
                value = value * 10 + (c - b'0') as u64;
                if value > u32::MAX as u64 {
                    return Err(SourceError::new(pos, "Number out of range"));
                }
            }
            return Ok(Token::number(pos, value as i64));
        }

        if c == b'$' {
            let mut value: u64 = 0;
            let mut digits = 0;
            while let Some(c) = self.get() {
                let digit = match c {
                    b'0'..=b'9' => c - b'0',
                    b'a'..=b'f' => c - b'a' + 10,
                    b'A'..=b'F' => c - b'A' + 10,
                    _ => {
                        self.back();
                        break;
                    }
                };
                value = (value << 4) + digit as u64;
                digits += 1;
            }
            if digits < 1 {
                return Err(SourceError::new(pos, "Expected a hexadecimal number"));
            }
            if digits > 8 {
                return Err(SourceError::new(pos, "Number out of range"));
            }
            return Ok(Token::number(pos, value as i64));
        }

        if c == b'%' {
            let mut value: u64 = 0;
            let mut digits = 0;
            while let Some(c) = self.get() {
                let digit = match c {
                    b'0' => 0,
                    b'1' => 1,
                    _ => {
                        self.back();
                        break;
                    }
                };
                value = (value << 1) + digit;
                digits += 1;
            }
            if digits < 1 {
                return Err(SourceError::new(pos, "Expected a binary number"));
            }
            if digits > 32 {
                return Err(SourceError::new(pos, "Number out of range"));
            }
            return Ok(Token::number(pos, value as i64));
        }

        if c == b'"' {
            // No escapes; an unterminated literal runs to the end of the line.
            let start = self.offset;
            while let Some(c) = self.get() {
                if c == b'"' {
                    let text = &self.line.text[start..self.offset - 1];
                    return Ok(Token::literal(pos, text));
                }
            }
            let text = &self.line.text[start..];
            return Ok(Token::literal(pos, text));
        }

        Ok(Token::punctuator(pos, c as char))
    }

    /// Consumes the next token, which must be the given punctuator.
    pub fn expect_punctuator(&mut self, c: char) -> Result<(), SourceError> {
        let token = self.next_token()?;
        if token.is_punctuator(c) {
            Ok(())
        } else {
            Err(SourceError::new(token.pos, format!("Expected '{}'", c)))
        }
    }

    /// Consumes the next token iff it is the given punctuator.
    pub fn optional_punctuator(&mut self, c: char) -> Result<bool, SourceError> {
        let token = self.next_token()?;
        if token.is_punctuator(c) {
            Ok(true)
        } else {
            self.unget(token);
            Ok(false)
        }
    }
}
