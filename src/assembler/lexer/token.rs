use std::fmt;

use crate::assembler::source::SourcePos;

/// TokenKind defines the classes of tokens found on a source line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenKind {
    /// End of the statement stream: `;` or the physical end of the line
    #[default]
    End,
    /// Mnemonic, directive name, label or symbol reference
    Identifier,
    /// Decimal, `$` hexadecimal or `%` binary integer
    Number,
    /// `"…"` string literal (no escapes)
    Literal,
    /// Any other single non-space character
    Punctuator,
}

/// A lexical unit of one source line.
///
/// The kind determines which payload is meaningful: `text` for identifiers
/// and literals, `number` for numbers, `punctuator` for punctuators.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub number: i64,
    pub punctuator: char,
    pub pos: SourcePos,
}

impl Token {
    pub fn end(pos: SourcePos) -> Self {
        Self {
            kind: TokenKind::End,
            pos,
            ..Self::default()
        }
    }

    pub fn identifier(pos: SourcePos, text: &str) -> Self {
        Self {
            kind: TokenKind::Identifier,
            text: text.to_owned(),
            pos,
            ..Self::default()
        }
    }

    pub fn number(pos: SourcePos, number: i64) -> Self {
        Self {
            kind: TokenKind::Number,
            number,
            pos,
            ..Self::default()
        }
    }

    pub fn literal(pos: SourcePos, text: &str) -> Self {
        Self {
            kind: TokenKind::Literal,
            text: text.to_owned(),
            pos,
            ..Self::default()
        }
    }

    pub fn punctuator(pos: SourcePos, punctuator: char) -> Self {
        Self {
            kind: TokenKind::Punctuator,
            punctuator,
            pos,
            ..Self::default()
        }
    }

    pub fn is_punctuator(&self, c: char) -> bool {
        self.kind == TokenKind::Punctuator && self.punctuator == c
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::End => write!(f, "END"),
            TokenKind::Identifier => write!(f, "IDENTIFIER: {}", self.text),
            TokenKind::Number => write!(f, "NUMBER: {}", self.number),
            TokenKind::Literal => write!(f, "LITERAL: \"{}\"", self.text),
            TokenKind::Punctuator => write!(f, "PUNCTUATOR: {}", self.punctuator),
        }
    }
}
