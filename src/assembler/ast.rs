use std::fmt::Write;

use crate::assembler::buffer::CodeRange;
use crate::assembler::instruction::{IndexRegister, Instruction};
use crate::assembler::source::{SourceError, SourcePos, SourceStream};
use crate::assembler::symbols::SymbolTable;

/// Picks one byte out of a 16-bit expression value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteSelector {
    /// No prefix: the whole value must fit in one byte
    #[default]
    Unspecified,
    /// `<` prefix: low byte
    Low,
    /// `>` prefix: high byte
    High,
}

/// Applies a byte selector; `None` when an unselected value is too wide.
pub fn select(selector: ByteSelector, value: u16) -> Option<u8> {
    match selector {
        ByteSelector::Low => Some((value & 0xff) as u8),
        ByteSelector::High => Some((value >> 8) as u8),
        ByteSelector::Unspecified => {
            if value <= 0xff {
                Some(value as u8)
            } else {
                None
            }
        }
    }
}

/// Target encoding of a string directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringEncoding {
    /// `.asc`
    Petscii,
    /// `.scr`
    Screen,
}

impl StringEncoding {
    fn tag(&self) -> &'static str {
        match self {
            StringEncoding::Petscii => "PETSCII",
            StringEncoding::Screen => "Screen",
        }
    }
}

/// The label attached to a statement, if any.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Label {
    #[default]
    None,
    /// A named label defined at the statement's program counter
    Symbolic(String),
    /// `/`: anonymous, reachable from both directions
    Temporary,
    /// `+`: anonymous, reachable from forward references only
    TemporaryForward,
    /// `-`: anonymous, reachable from backward references only
    TemporaryBackward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl BinaryOp {
    pub fn from_punctuator(c: char) -> Option<Self> {
        match c {
            '+' => Some(BinaryOp::Add),
            '-' => Some(BinaryOp::Subtract),
            '*' => Some(BinaryOp::Multiply),
            '/' => Some(BinaryOp::Divide),
            _ => None,
        }
    }

    pub fn symbol(&self) -> char {
        match self {
            BinaryOp::Add => '+',
            BinaryOp::Subtract => '-',
            BinaryOp::Multiply => '*',
            BinaryOp::Divide => '/',
        }
    }

    fn apply(&self, a: i64, b: i64) -> i64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Subtract => a - b,
            BinaryOp::Multiply => a * b,
            BinaryOp::Divide => a / b,
        }
    }
}

/// One node of an expression tree.
///
/// Evaluation rewrites resolved subtrees into `Constant` nodes in place, so
/// a subtree folds at most once and stays folded across passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprNode {
    Constant(i64),
    Symbol(String),
    /// A `±N` temporary label reference; positive deltas search forward
    TemporarySymbol(i32),
    ProgramCounter,
    Binary {
        op: BinaryOp,
        lhs: Box<ExprNode>,
        rhs: Box<ExprNode>,
    },
}

/// Everything an expression needs to resolve its leaves.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub pc: u16,
    pub symbols: &'a SymbolTable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    pub pos: SourcePos,
    root: ExprNode,
}

impl Expression {
    pub fn new(pos: SourcePos, root: ExprNode) -> Self {
        Self { pos, root }
    }

    pub fn constant(pos: SourcePos, value: i64) -> Self {
        Self::new(pos, ExprNode::Constant(value))
    }

    /// Strict evaluation: unresolved references are errors.
    pub fn eval(&mut self, context: &EvalContext) -> Result<u16, SourceError> {
        let value = fold(&mut self.root, context, true, self.pos)?
            .expect("strict folding resolves or errors");
        check_value(self.pos, value)
    }

    /// Partial evaluation: `Ok(None)` when the tree still contains
    /// unresolved symbols; any other failure is still an error.
    pub fn try_eval(&mut self, context: &EvalContext) -> Result<Option<u16>, SourceError> {
        match fold(&mut self.root, context, false, self.pos)? {
            Some(value) => Ok(Some(check_value(self.pos, value)?)),
            None => Ok(None),
        }
    }

    pub fn dump_into(&self, out: &mut String, level: usize) {
        dump_node(&self.root, out, level);
    }
}

fn check_value(pos: SourcePos, value: i64) -> Result<u16, SourceError> {
    if !(0..=0xffff).contains(&value) {
        return Err(SourceError::new(
            pos,
            format!(
                "Invalid expression result ({}); expected a number between 0 and 65535",
                value
            ),
        ));
    }
    Ok(value as u16)
}

fn fold(
    node: &mut ExprNode,
    context: &EvalContext,
    strict: bool,
    pos: SourcePos,
) -> Result<Option<i64>, SourceError> {
    match node {
        ExprNode::Constant(value) => Ok(Some(*value)),
        ExprNode::Symbol(name) => match context.symbols.get(name) {
            Some(address) => {
                *node = ExprNode::Constant(address as i64);
                Ok(Some(address as i64))
            }
            None if strict => Err(SourceError::new(
                pos,
                format!("Undefined symbol '{}'", name),
            )),
            None => Ok(None),
        },
        ExprNode::TemporarySymbol(delta) => match context.symbols.temporary(context.pc, *delta) {
            Some(address) => {
                *node = ExprNode::Constant(address as i64);
                Ok(Some(address as i64))
            }
            None if strict => Err(SourceError::new(
                pos,
                "No applicable temporary branch symbol",
            )),
            None => Ok(None),
        },
        ExprNode::ProgramCounter => {
            let value = context.pc as i64;
            *node = ExprNode::Constant(value);
            Ok(Some(value))
        }
        ExprNode::Binary { op, lhs, rhs } => {
            let a = fold(lhs, context, strict, pos)?;
            let b = fold(rhs, context, strict, pos)?;
            match (a, b) {
                (Some(a), Some(b)) => {
                    if *op == BinaryOp::Divide && b == 0 {
                        return Err(SourceError::new(pos, "Division by zero"));
                    }
                    let value = op.apply(a, b);
                    *node = ExprNode::Constant(value);
                    Ok(Some(value))
                }
                _ => Ok(None),
            }
        }
    }
}

fn dump_node(node: &ExprNode, out: &mut String, level: usize) {
    let indent = " ".repeat(level);
    match node {
        ExprNode::Constant(value) => {
            let _ = writeln!(out, "{}Constant: {}", indent, value);
        }
        ExprNode::Symbol(name) => {
            let _ = writeln!(out, "{}Symbol: {}", indent, name);
        }
        ExprNode::TemporarySymbol(delta) => {
            let _ = writeln!(out, "{}Temporary Symbol: {:+}", indent, delta);
        }
        ExprNode::ProgramCounter => {
            let _ = writeln!(out, "{}Program Counter", indent);
        }
        ExprNode::Binary { op, lhs, rhs } => {
            let _ = writeln!(out, "{}Operator: {}", indent, op.symbol());
            dump_node(lhs, out, level + 2);
            dump_node(rhs, out, level + 2);
        }
    }
}

/// One parsed statement; the unit both passes walk.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub pos: SourcePos,
    pub label: Label,
    pub kind: StatementKind,
    /// Program counter, assigned by the definition pass
    pub pc: u16,
    /// Set when conditional assembly or `.end` disabled this statement
    pub skipped: bool,
    /// Bytes emitted for this statement, recorded by the emission pass
    pub range: Option<CodeRange>,
}

impl Statement {
    pub fn new(pos: SourcePos, label: Label, kind: StatementKind) -> Self {
        Self {
            pos,
            label,
            kind,
            pc: 0,
            skipped: false,
            range: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    Empty,
    /// `name = expr`
    SymbolDefinition {
        name: String,
        expr: Expression,
    },
    /// `* = expr`
    ProgramCounterAssignment {
        expr: Expression,
    },
    Implied {
        ins: &'static Instruction,
    },
    Accumulator {
        ins: &'static Instruction,
    },
    /// `ins #expr` with an optional byte selector
    Immediate {
        ins: &'static Instruction,
        selector: ByteSelector,
        expr: Expression,
    },
    /// `ins expr[,X|,Y]`; `!` forces the absolute encoding
    Direct {
        ins: &'static Instruction,
        index: IndexRegister,
        force_absolute: bool,
        expr: Expression,
    },
    /// `ins (expr)`, `ins (expr,X)` or `ins (expr),Y`
    Indirect {
        ins: &'static Instruction,
        index: IndexRegister,
        expr: Expression,
    },
    Branch {
        ins: &'static Instruction,
        expr: Expression,
    },
    /// `.org expr`
    Origin {
        expr: Expression,
    },
    /// `.buf expr`
    Buffer {
        expr: Expression,
    },
    /// `.off expr`
    OffsetBegin {
        expr: Expression,
    },
    /// `.ofe`
    OffsetEnd,
    /// `.obj "name"`
    ObjectFile {
        filename: String,
    },
    /// `.byte e, e, …`
    Byte {
        selector: ByteSelector,
        exprs: Vec<Expression>,
    },
    /// `.word e, e, …`
    Word {
        exprs: Vec<Expression>,
    },
    /// `.asc "…"` / `.scr "…"`
    Text {
        encoding: StringEncoding,
        text: String,
    },
    /// `.if expr`
    If {
        expr: Expression,
    },
    /// `.ifdef name`
    Ifdef {
        name: String,
    },
    /// `.else`
    Else,
    /// `.ife`
    Endif,
    /// `.end`
    End,
}

impl StatementKind {
    /// True for the conditional-assembly machinery, which is processed
    /// even inside a skipped region.
    pub fn is_conditional(&self) -> bool {
        matches!(
            self,
            StatementKind::If { .. }
                | StatementKind::Ifdef { .. }
                | StatementKind::Else
                | StatementKind::Endif
        )
    }
}

const DUMP_HEADER_WIDTH: usize = 24;

impl Statement {
    /// Renders the statement for the statement-list dump.
    pub fn dump(&self, stream: &SourceStream) -> String {
        let mut out = String::new();
        let header = format!(
            "{}:{}:{}",
            stream.short_filename(self.pos.file),
            self.pos.line,
            self.pos.column + 1
        );
        let _ = write!(out, "[{:<width$}] ", header, width = DUMP_HEADER_WIDTH);
        match &self.label {
            Label::None => {}
            Label::Symbolic(name) => {
                let _ = write!(out, "({}) ", name);
            }
            Label::Temporary => out.push_str("(/) "),
            Label::TemporaryForward => out.push_str("(+) "),
            Label::TemporaryBackward => out.push_str("(-) "),
        }
        match &self.kind {
            StatementKind::Empty => out.push_str("Empty Statement\n"),
            StatementKind::SymbolDefinition { name, expr } => {
                let _ = writeln!(out, "Define: {}", name);
                expr.dump_into(&mut out, 2);
            }
            StatementKind::ProgramCounterAssignment { expr } => {
                out.push_str("Set Program Counter:\n");
                expr.dump_into(&mut out, 2);
            }
            StatementKind::Implied { ins } => {
                let _ = writeln!(out, "Implied Mode Instruction: {}", ins.name());
            }
            StatementKind::Accumulator { ins } => {
                let _ = writeln!(out, "Accumulator Mode Instruction: {}", ins.name());
            }
            StatementKind::Immediate {
                ins,
                selector,
                expr,
            } => {
                let tag = match selector {
                    ByteSelector::Unspecified => "",
                    ByteSelector::Low => " [LSB]",
                    ByteSelector::High => " [MSB]",
                };
                let _ = writeln!(out, "Immediate Mode Instruction: {}{}", ins.name(), tag);
                expr.dump_into(&mut out, 2);
            }
            StatementKind::Direct {
                ins,
                index,
                force_absolute,
                expr,
            } => {
                let _ = write!(out, "Direct Mode Instruction: {}", ins.name());
                match index {
                    IndexRegister::None => {}
                    IndexRegister::X => out.push_str(" [,X]"),
                    IndexRegister::Y => out.push_str(" [,Y]"),
                }
                if *force_absolute {
                    out.push_str(" [Force Absolute]");
                }
                out.push('\n');
                expr.dump_into(&mut out, 2);
            }
            StatementKind::Indirect { ins, index, expr } => {
                let _ = write!(out, "Indirect Mode Instruction: {}", ins.name());
                match index {
                    IndexRegister::None => {}
                    IndexRegister::X => out.push_str(" [,X]"),
                    IndexRegister::Y => out.push_str(" [,Y]"),
                }
                out.push('\n');
                expr.dump_into(&mut out, 2);
            }
            StatementKind::Branch { ins, expr } => {
                let _ = writeln!(out, "Branch Instruction: {}", ins.name());
                expr.dump_into(&mut out, 2);
            }
            StatementKind::Origin { expr } => {
                out.push_str("Origin Directive\n");
                expr.dump_into(&mut out, 2);
            }
            StatementKind::Buffer { expr } => {
                out.push_str("Buffer Directive\n");
                expr.dump_into(&mut out, 2);
            }
            StatementKind::OffsetBegin { expr } => {
                out.push_str("Offset Begin Directive\n");
                expr.dump_into(&mut out, 2);
            }
            StatementKind::OffsetEnd => out.push_str("Offset End Directive\n"),
            StatementKind::ObjectFile { filename } => {
                let _ = writeln!(out, "Object File Directive: \"{}\"", filename);
            }
            StatementKind::Byte { selector, exprs } => {
                let tag = match selector {
                    ByteSelector::Unspecified => "",
                    ByteSelector::Low => " [LSB]",
                    ByteSelector::High => " [MSB]",
                };
                let _ = writeln!(out, "{} byte(s){}:", exprs.len(), tag);
                for expr in exprs {
                    expr.dump_into(&mut out, 2);
                }
            }
            StatementKind::Word { exprs } => {
                let _ = writeln!(out, "{} word(s):", exprs.len());
                for expr in exprs {
                    expr.dump_into(&mut out, 2);
                }
            }
            StatementKind::Text { encoding, text } => {
                let _ = writeln!(out, "{} byte string [{}]: \"{}\"", text.len(), encoding.tag(), text);
            }
            StatementKind::If { expr } => {
                out.push_str("If Directive:\n");
                expr.dump_into(&mut out, 2);
            }
            StatementKind::Ifdef { name } => {
                let _ = writeln!(out, "Ifdef Directive: {}", name);
            }
            StatementKind::Else => out.push_str("Else Directive\n"),
            StatementKind::Endif => out.push_str("Endif Directive\n"),
            StatementKind::End => out.push_str("End Directive\n"),
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    fn pos() -> SourcePos {
        SourcePos::new(0, 1, 0)
    }

    fn eval_ctx(symbols: &SymbolTable) -> EvalContext {
        EvalContext { pc: 0x1000, symbols }
    }

    #[test]
    fn test_constant_eval() {
        let symbols = SymbolTable::new();
        let mut expr = Expression::constant(pos(), 0xd020);
        assert_eq!(expr.eval(&eval_ctx(&symbols)).unwrap(), 0xd020);
    }

    #[test]
    fn test_left_to_right_no_precedence() {
        // 2 + 3 * 4 folds as (2 + 3) * 4 = 20, not 14.
        let symbols = SymbolTable::new();
        let mut expr = Expression::new(
            pos(),
            ExprNode::Binary {
                op: BinaryOp::Multiply,
                lhs: Box::new(ExprNode::Binary {
                    op: BinaryOp::Add,
                    lhs: Box::new(ExprNode::Constant(2)),
                    rhs: Box::new(ExprNode::Constant(3)),
                }),
                rhs: Box::new(ExprNode::Constant(4)),
            },
        );
        assert_eq!(expr.eval(&eval_ctx(&symbols)).unwrap(), 20);
    }

    #[test]
    fn test_program_counter_operand() {
        let symbols = SymbolTable::new();
        let mut expr = Expression::new(
            pos(),
            ExprNode::Binary {
                op: BinaryOp::Add,
                lhs: Box::new(ExprNode::ProgramCounter),
                rhs: Box::new(ExprNode::Constant(2)),
            },
        );
        assert_eq!(expr.eval(&eval_ctx(&symbols)).unwrap(), 0x1002);
    }

    #[test]
    fn test_symbol_resolution_memoizes() {
        let mut symbols = SymbolTable::new();
        symbols.define("border", 0xd020).unwrap();
        let mut expr = Expression::new(pos(), ExprNode::Symbol("border".to_owned()));
        assert_eq!(expr.eval(&eval_ctx(&symbols)).unwrap(), 0xd020);

        // Once folded, the value sticks even against an empty table.
        let empty = SymbolTable::new();
        assert_eq!(expr.eval(&eval_ctx(&empty)).unwrap(), 0xd020);
    }

    #[test]
    fn test_unresolved_symbol() {
        let symbols = SymbolTable::new();
        let mut expr = Expression::new(pos(), ExprNode::Symbol("later".to_owned()));
        assert_eq!(expr.try_eval(&eval_ctx(&symbols)).unwrap(), None);
        let err = expr.eval(&eval_ctx(&symbols)).unwrap_err();
        assert_eq!(err.message, "Undefined symbol 'later'");
    }

    #[test]
    fn test_partial_fold_then_resolve() {
        let mut symbols = SymbolTable::new();
        let mut expr = Expression::new(
            pos(),
            ExprNode::Binary {
                op: BinaryOp::Add,
                lhs: Box::new(ExprNode::Symbol("base".to_owned())),
                rhs: Box::new(ExprNode::Constant(1)),
            },
        );
        assert_eq!(expr.try_eval(&eval_ctx(&symbols)).unwrap(), None);
        symbols.define("base", 0x0400).unwrap();
        assert_eq!(expr.eval(&eval_ctx(&symbols)).unwrap(), 0x0401);
    }

    #[test]
    fn test_division_by_zero() {
        let symbols = SymbolTable::new();
        let mut expr = Expression::new(
            pos(),
            ExprNode::Binary {
                op: BinaryOp::Divide,
                lhs: Box::new(ExprNode::Constant(8)),
                rhs: Box::new(ExprNode::Constant(0)),
            },
        );
        let err = expr.eval(&eval_ctx(&symbols)).unwrap_err();
        assert_eq!(err.message, "Division by zero");
    }

    #[test]
    fn test_range_check() {
        let symbols = SymbolTable::new();
        let mut expr = Expression::constant(pos(), 0x10000);
        assert!(expr.eval(&eval_ctx(&symbols)).is_err());

        let mut expr = Expression::new(
            pos(),
            ExprNode::Binary {
                op: BinaryOp::Subtract,
                lhs: Box::new(ExprNode::Constant(0)),
                rhs: Box::new(ExprNode::Constant(1)),
            },
        );
        assert!(expr.eval(&eval_ctx(&symbols)).is_err());
    }

    #[test]
    fn test_select() {
        assert_eq!(select(ByteSelector::Low, 0x1234), Some(0x34));
        assert_eq!(select(ByteSelector::High, 0x1234), Some(0x12));
        assert_eq!(select(ByteSelector::Unspecified, 0x34), Some(0x34));
        assert_eq!(select(ByteSelector::Unspecified, 0x1234), None);
    }
}
