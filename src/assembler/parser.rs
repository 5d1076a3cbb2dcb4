use std::str::FromStr;

use crate::assembler::ast::{
    BinaryOp, ByteSelector, ExprNode, Expression, Label, Statement, StatementKind, StringEncoding,
};
use crate::assembler::charset;
use crate::assembler::instruction::{instruction_named, AddrMode, IndexRegister, Instruction};
use crate::assembler::lexer::token::{Token, TokenKind};
use crate::assembler::lexer::LineReader;
use crate::assembler::message::MessageList;
use crate::assembler::source::{
    IncludeError, Line, SourceError, SourcePos, SourceStream, SystemError,
};

/// Directive names of the PowerAssembler dialect.
///
/// The legacy tail is accepted for compatibility but assembles to nothing
/// beyond a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::EnumString)]
#[strum(serialize_all = "lowercase")]
enum DirectiveKind {
    Inc,
    Org,
    Buf,
    Off,
    Ofe,
    Obj,
    Byte,
    Word,
    Asc,
    Scr,
    If,
    Ifdef,
    Else,
    Ife,
    End,
    // Legacy PowerAssembler directives with no effect here.
    Dvi,
    Dvo,
    Burst,
    Mem,
    Dis,
    Out,
    Bas,
    Link,
    Loop,
    File,
    Lst,
    Top,
    Sst,
    Psu,
    Fas,
}

const LEGACY_DIRECTIVES: [DirectiveKind; 15] = [
    DirectiveKind::Dvi,
    DirectiveKind::Dvo,
    DirectiveKind::Burst,
    DirectiveKind::Mem,
    DirectiveKind::Dis,
    DirectiveKind::Out,
    DirectiveKind::Bas,
    DirectiveKind::Link,
    DirectiveKind::Loop,
    DirectiveKind::File,
    DirectiveKind::Lst,
    DirectiveKind::Top,
    DirectiveKind::Sst,
    DirectiveKind::Psu,
    DirectiveKind::Fas,
];

/// Turns source lines into the statement list.
///
/// Each line yields one or more statements separated by `:`. A parse error
/// abandons the rest of the line and resynchronizes at the next one; the
/// error lands in the message list.
#[derive(Debug)]
pub struct Parser<'a> {
    source: &'a mut SourceStream,
    statements: &'a mut Vec<Statement>,
    messages: &'a mut MessageList,
}

impl<'a> Parser<'a> {
    pub fn new(
        source: &'a mut SourceStream,
        statements: &'a mut Vec<Statement>,
        messages: &'a mut MessageList,
    ) -> Self {
        Self {
            source,
            statements,
            messages,
        }
    }

    /// Parses every pending line of the source stream.
    #[tracing::instrument]
    pub fn parse(&mut self) -> Result<(), SystemError> {
        while let Some(line) = self.source.next_line()? {
            self.parse_line(&line);
        }
        Ok(())
    }

    fn parse_line(&mut self, line: &Line) {
        let mut reader = LineReader::new(line);
        loop {
            match self.parse_statement(&mut reader) {
                Ok(statement) => self.statements.push(statement),
                Err(err) => {
                    self.messages.source_error(err);
                    return;
                }
            }
            match reader.next_token() {
                Ok(token) if token.kind == TokenKind::End => return,
                Ok(token) if token.is_punctuator(':') => continue,
                Ok(token) => {
                    self.messages.error(token.pos, "Expected end of statement");
                    return;
                }
                Err(err) => {
                    self.messages.source_error(err);
                    return;
                }
            }
        }
    }

    fn parse_statement(&mut self, reader: &mut LineReader) -> Result<Statement, SourceError> {
        let token = reader.next_token()?;
        let pos = token.pos;
        match token.kind {
            TokenKind::End => Ok(Statement::new(pos, Label::None, StatementKind::Empty)),
            TokenKind::Identifier => {
                if let Some(ins) = instruction_named(&token.text) {
                    return self.parse_operation(reader, pos, Label::None, ins);
                }
                let name = token.text;
                let next = reader.next_token()?;
                if next.is_punctuator('=') {
                    let expr = self.parse_expression(reader)?;
                    return Ok(Statement::new(
                        pos,
                        Label::None,
                        StatementKind::SymbolDefinition { name, expr },
                    ));
                }
                self.statement_after_label(reader, pos, Label::Symbolic(name), next)
            }
            TokenKind::Punctuator => match token.punctuator {
                '.' => self.parse_directive(reader, pos, Label::None),
                '*' => {
                    reader.expect_punctuator('=')?;
                    let expr = self.parse_expression(reader)?;
                    Ok(Statement::new(
                        pos,
                        Label::None,
                        StatementKind::ProgramCounterAssignment { expr },
                    ))
                }
                '+' => self.parse_labeled(reader, pos, Label::TemporaryForward),
                '-' => self.parse_labeled(reader, pos, Label::TemporaryBackward),
                '/' => self.parse_labeled(reader, pos, Label::Temporary),
                c => Err(SourceError::new(
                    pos,
                    format!("Unexpected character ('{}')", c),
                )),
            },
            _ => Err(SourceError::new(pos, "Expected a statement")),
        }
    }

    fn parse_labeled(
        &mut self,
        reader: &mut LineReader,
        pos: SourcePos,
        label: Label,
    ) -> Result<Statement, SourceError> {
        let next = reader.next_token()?;
        self.statement_after_label(reader, pos, label, next)
    }

    /// Parses whatever follows a label on the same statement.
    fn statement_after_label(
        &mut self,
        reader: &mut LineReader,
        pos: SourcePos,
        label: Label,
        token: Token,
    ) -> Result<Statement, SourceError> {
        match token.kind {
            TokenKind::End => Ok(Statement::new(pos, label, StatementKind::Empty)),
            TokenKind::Identifier => match instruction_named(&token.text) {
                Some(ins) => self.parse_operation(reader, pos, label, ins),
                None => Err(SourceError::new(
                    token.pos,
                    format!("Invalid instruction ('{}')", token.text),
                )),
            },
            TokenKind::Punctuator if token.punctuator == '.' => {
                self.parse_directive(reader, pos, label)
            }
            TokenKind::Punctuator if token.punctuator == ':' => {
                reader.unget(token);
                Ok(Statement::new(pos, label, StatementKind::Empty))
            }
            _ => Err(SourceError::new(
                token.pos,
                "Expected instruction or directive",
            )),
        }
    }

    fn parse_operation(
        &mut self,
        reader: &mut LineReader,
        pos: SourcePos,
        label: Label,
        ins: &'static Instruction,
    ) -> Result<Statement, SourceError> {
        if ins.is_relative() {
            let expr = self.parse_expression(reader)?;
            return Ok(Statement::new(pos, label, StatementKind::Branch { ins, expr }));
        }
        let token = reader.next_token()?;
        match token.kind {
            TokenKind::End => self.bare_operation(pos, label, ins),
            // A bare character literal is an immediate operand.
            TokenKind::Literal => {
                reader.unget(token);
                self.parse_immediate(reader, pos, label, ins)
            }
            TokenKind::Punctuator => match token.punctuator {
                ':' => {
                    reader.unget(token);
                    self.bare_operation(pos, label, ins)
                }
                '#' => self.parse_immediate(reader, pos, label, ins),
                '<' | '>' | '@' => {
                    reader.unget(token);
                    self.parse_immediate(reader, pos, label, ins)
                }
                '(' => self.parse_indirect(reader, pos, label, ins),
                '!' => self.parse_direct(reader, pos, label, ins, true),
                '+' | '-' | '*' => {
                    reader.unget(token);
                    self.parse_direct(reader, pos, label, ins, false)
                }
                c => Err(SourceError::new(
                    token.pos,
                    format!("Unexpected character ('{}')", c),
                )),
            },
            _ => {
                reader.unget(token);
                self.parse_direct(reader, pos, label, ins, false)
            }
        }
    }

    fn bare_operation(
        &self,
        pos: SourcePos,
        label: Label,
        ins: &'static Instruction,
    ) -> Result<Statement, SourceError> {
        if ins.supports(AddrMode::Implied) {
            Ok(Statement::new(pos, label, StatementKind::Implied { ins }))
        } else if ins.supports(AddrMode::Accumulator) {
            Ok(Statement::new(pos, label, StatementKind::Accumulator { ins }))
        } else {
            Err(SourceError::new(
                pos,
                format!("Instruction '{}' requires an operand", ins.name()),
            ))
        }
    }

    fn parse_immediate(
        &mut self,
        reader: &mut LineReader,
        pos: SourcePos,
        label: Label,
        ins: &'static Instruction,
    ) -> Result<Statement, SourceError> {
        let selector = self.optional_byte_selector(reader)?;
        if !ins.supports(AddrMode::Immediate) {
            return Err(SourceError::new(
                pos,
                format!(
                    "Immediate mode is not supported by instruction '{}'",
                    ins.name()
                ),
            ));
        }
        let expr = self.parse_expression(reader)?;
        Ok(Statement::new(
            pos,
            label,
            StatementKind::Immediate {
                ins,
                selector,
                expr,
            },
        ))
    }

    fn parse_direct(
        &mut self,
        reader: &mut LineReader,
        pos: SourcePos,
        label: Label,
        ins: &'static Instruction,
        force_absolute: bool,
    ) -> Result<Statement, SourceError> {
        let expr = self.parse_expression(reader)?;
        let index = self.optional_index(reader)?;
        Ok(Statement::new(
            pos,
            label,
            StatementKind::Direct {
                ins,
                index,
                force_absolute,
                expr,
            },
        ))
    }

    fn parse_indirect(
        &mut self,
        reader: &mut LineReader,
        pos: SourcePos,
        label: Label,
        ins: &'static Instruction,
    ) -> Result<Statement, SourceError> {
        let expr = self.parse_expression(reader)?;

        if reader.optional_punctuator(',')? {
            // (a,X)
            let token = reader.next_token()?;
            if !(token.kind == TokenKind::Identifier && token.text.eq_ignore_ascii_case("x")) {
                return Err(SourceError::new(token.pos, "Expected 'x'"));
            }
            let token = reader.next_token()?;
            if !token.is_punctuator(')') {
                return Err(SourceError::new(token.pos, "Missing ')'"));
            }
            return Ok(Statement::new(
                pos,
                label,
                StatementKind::Indirect {
                    ins,
                    index: IndexRegister::X,
                    expr,
                },
            ));
        }

        let token = reader.next_token()?;
        if !token.is_punctuator(')') {
            return Err(SourceError::new(token.pos, "Missing ')'"));
        }

        if reader.optional_punctuator(',')? {
            // (a),Y
            let token = reader.next_token()?;
            if token.kind == TokenKind::Identifier && token.text.eq_ignore_ascii_case("y") {
                return Ok(Statement::new(
                    pos,
                    label,
                    StatementKind::Indirect {
                        ins,
                        index: IndexRegister::Y,
                        expr,
                    },
                ));
            }
            return Err(SourceError::new(token.pos, "Expected 'y'"));
        }

        Ok(Statement::new(
            pos,
            label,
            StatementKind::Indirect {
                ins,
                index: IndexRegister::None,
                expr,
            },
        ))
    }

    fn parse_directive(
        &mut self,
        reader: &mut LineReader,
        pos: SourcePos,
        label: Label,
    ) -> Result<Statement, SourceError> {
        let token = reader.next_token()?;
        if token.kind != TokenKind::Identifier {
            return Err(SourceError::new(token.pos, "Expected a directive name"));
        }
        let kind = DirectiveKind::from_str(&token.text.to_ascii_lowercase()).map_err(|_| {
            SourceError::new(token.pos, format!("Unknown directive '{}'", token.text))
        })?;

        if LEGACY_DIRECTIVES.contains(&kind) {
            self.messages.warning(pos, "Ignored unsupported statement");
            self.skip_statement(reader)?;
            return Ok(Statement::new(pos, label, StatementKind::Empty));
        }

        let kind = match kind {
            DirectiveKind::Inc => {
                let name = self.quoted(reader, "Expected a quoted filename")?;
                if let Err(err) = self.source.include_relative(&name, reader.line().file) {
                    return Err(match err {
                        IncludeError::Duplicate(path) => SourceError::fatal(
                            token.pos,
                            format!("File '{}' is already included", path),
                        ),
                        IncludeError::System(err) => SourceError::new(token.pos, err.to_string()),
                    });
                }
                StatementKind::Empty
            }
            DirectiveKind::Org => StatementKind::Origin {
                expr: self.parse_expression(reader)?,
            },
            DirectiveKind::Buf => StatementKind::Buffer {
                expr: self.parse_expression(reader)?,
            },
            DirectiveKind::Off => StatementKind::OffsetBegin {
                expr: self.parse_expression(reader)?,
            },
            DirectiveKind::Ofe => StatementKind::OffsetEnd,
            DirectiveKind::Obj => {
                let filename = self.quoted(reader, "Expected a quoted filename")?;
                if !is_safe_filename(&filename) {
                    return Err(SourceError::new(token.pos, "Unsafe object filename"));
                }
                StatementKind::ObjectFile { filename }
            }
            DirectiveKind::Byte => {
                let selector = self.optional_byte_selector(reader)?;
                StatementKind::Byte {
                    selector,
                    exprs: self.expression_list(reader)?,
                }
            }
            DirectiveKind::Word => StatementKind::Word {
                exprs: self.expression_list(reader)?,
            },
            DirectiveKind::Asc => StatementKind::Text {
                encoding: StringEncoding::Petscii,
                text: self.quoted(reader, "Expected a quoted string")?,
            },
            DirectiveKind::Scr => StatementKind::Text {
                encoding: StringEncoding::Screen,
                text: self.quoted(reader, "Expected a quoted string")?,
            },
            DirectiveKind::If => StatementKind::If {
                expr: self.parse_expression(reader)?,
            },
            DirectiveKind::Ifdef => {
                let token = reader.next_token()?;
                if token.kind != TokenKind::Identifier {
                    return Err(SourceError::new(token.pos, "Expected a symbol name"));
                }
                StatementKind::Ifdef { name: token.text }
            }
            DirectiveKind::Else => StatementKind::Else,
            DirectiveKind::Ife => StatementKind::Endif,
            DirectiveKind::End => StatementKind::End,
            _ => unreachable!("legacy directives are handled above"),
        };
        Ok(Statement::new(pos, label, kind))
    }

    /// Consumes the rest of the current statement without interpreting it.
    fn skip_statement(&mut self, reader: &mut LineReader) -> Result<(), SourceError> {
        loop {
            let token = reader.next_token()?;
            match token.kind {
                TokenKind::End => return Ok(()),
                TokenKind::Punctuator if token.punctuator == ':' => {
                    reader.unget(token);
                    return Ok(());
                }
                _ => {}
            }
        }
    }

    fn quoted(&mut self, reader: &mut LineReader, expected: &str) -> Result<String, SourceError> {
        let token = reader.next_token()?;
        if token.kind != TokenKind::Literal {
            return Err(SourceError::new(token.pos, expected));
        }
        Ok(token.text)
    }

    fn optional_byte_selector(
        &mut self,
        reader: &mut LineReader,
    ) -> Result<ByteSelector, SourceError> {
        let token = reader.next_token()?;
        if token.kind == TokenKind::Punctuator {
            match token.punctuator {
                '<' => return Ok(ByteSelector::Low),
                '>' => return Ok(ByteSelector::High),
                _ => {}
            }
        }
        reader.unget(token);
        Ok(ByteSelector::Unspecified)
    }

    fn optional_index(&mut self, reader: &mut LineReader) -> Result<IndexRegister, SourceError> {
        if !reader.optional_punctuator(',')? {
            return Ok(IndexRegister::None);
        }
        let token = reader.next_token()?;
        if token.kind == TokenKind::Identifier {
            if token.text.eq_ignore_ascii_case("x") {
                return Ok(IndexRegister::X);
            }
            if token.text.eq_ignore_ascii_case("y") {
                return Ok(IndexRegister::Y);
            }
        }
        Err(SourceError::new(token.pos, "Expected 'x' or 'y'"))
    }

    /// Parses a comma-separated list of expressions (`.byte`/`.word` operands).
    fn expression_list(&mut self, reader: &mut LineReader) -> Result<Vec<Expression>, SourceError> {
        let mut exprs = vec![self.parse_expression(reader)?];
        while reader.optional_punctuator(',')? {
            exprs.push(self.parse_expression(reader)?);
        }
        Ok(exprs)
    }

    /// Expressions are strictly left-to-right; there is no precedence.
    fn parse_expression(&mut self, reader: &mut LineReader) -> Result<Expression, SourceError> {
        let first = reader.next_token()?;
        let pos = first.pos;
        reader.unget(first);

        let mut root = self.parse_operand(reader)?;
        loop {
            let token = reader.next_token()?;
            let op = if token.kind == TokenKind::Punctuator {
                BinaryOp::from_punctuator(token.punctuator)
            } else {
                None
            };
            match op {
                Some(op) => {
                    let rhs = self.parse_operand(reader)?;
                    root = ExprNode::Binary {
                        op,
                        lhs: Box::new(root),
                        rhs: Box::new(rhs),
                    };
                }
                None => {
                    reader.unget(token);
                    break;
                }
            }
        }
        Ok(Expression::new(pos, root))
    }

    fn parse_operand(&mut self, reader: &mut LineReader) -> Result<ExprNode, SourceError> {
        let token = reader.next_token()?;
        match token.kind {
            TokenKind::Number => Ok(ExprNode::Constant(token.number)),
            TokenKind::Identifier => Ok(ExprNode::Symbol(token.text)),
            TokenKind::Literal => {
                let c = single_char(&token)?;
                Ok(ExprNode::Constant(charset::petscii(c) as i64))
            }
            TokenKind::Punctuator => match token.punctuator {
                '*' => Ok(ExprNode::ProgramCounter),
                '@' => {
                    let token = reader.next_token()?;
                    let c = screen_char(&token)?;
                    Ok(ExprNode::Constant(charset::screen_code(c) as i64))
                }
                '+' => {
                    let count = self.temporary_count(reader, '+')?;
                    Ok(ExprNode::TemporarySymbol(count))
                }
                '-' => {
                    let count = self.temporary_count(reader, '-')?;
                    Ok(ExprNode::TemporarySymbol(-count))
                }
                c => Err(SourceError::new(
                    token.pos,
                    format!("Unexpected character ('{}')", c),
                )),
            },
            TokenKind::End => Err(SourceError::new(token.pos, "Expected a valid operand")),
        }
    }

    /// Counts the `+`s or `-`s of a temporary reference, up to three.
    fn temporary_count(&mut self, reader: &mut LineReader, c: char) -> Result<i32, SourceError> {
        let mut count = 1;
        while count < 3 && reader.optional_punctuator(c)? {
            count += 1;
        }
        Ok(count)
    }
}

fn single_char(token: &Token) -> Result<u8, SourceError> {
    let bytes = token.text.as_bytes();
    if bytes.len() != 1 {
        return Err(SourceError::new(
            token.pos,
            "Expected a single character literal",
        ));
    }
    Ok(bytes[0])
}

/// The character operand of `@`: a quoted literal, or a single-quoted
/// identifier since `'` is an identifier character in this dialect.
fn screen_char(token: &Token) -> Result<u8, SourceError> {
    match token.kind {
        TokenKind::Literal => single_char(token),
        TokenKind::Identifier if token.text.starts_with('\'') && token.text.len() >= 2 => {
            Ok(token.text.as_bytes()[1])
        }
        _ => Err(SourceError::new(
            token.pos,
            "Expected a single character literal",
        )),
    }
}

/// Object filenames are restricted to a safe character set.
fn is_safe_filename(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, b'_' | b'-' | b' ' | b'.'))
}
