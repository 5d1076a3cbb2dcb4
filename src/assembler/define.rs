use crate::assembler::ast::{EvalContext, Label, Statement, StatementKind};
use crate::assembler::instruction::Instruction;
use crate::assembler::source::{SourceError, SourcePos};
use crate::assembler::symbols::{SymbolTable, TemporaryKind};
use crate::assembler::Context;

pub(crate) fn invalid_mode(pos: SourcePos, ins: &Instruction) -> SourceError {
    SourceError::new(
        pos,
        format!("Invalid addressing mode for instruction '{}'", ins.name()),
    )
}

/// The first pass: lays down program counters, sizes every operation and
/// populates the symbol table.
///
/// Direct operands are sized with partial evaluation; an unresolved forward
/// reference cannot prove it fits in zero page, so the statement is latched
/// to the absolute encoding and stays there for the emission pass.
#[tracing::instrument]
pub fn define(context: &mut Context) {
    let Context {
        statements,
        symbols,
        messages,
        ..
    } = context;

    let mut pass = DefinitionPass::new();
    for statement in statements.iter_mut() {
        statement.pc = pass.pc as u16;
        if pass.ended {
            statement.skipped = true;
            continue;
        }
        if pass.skipping() && !statement.kind.is_conditional() {
            statement.skipped = true;
            continue;
        }
        if let Err(err) = pass.visit(statement, symbols) {
            statement.skipped = true;
            let fatal = err.fatal;
            messages.source_error(err);
            if fatal {
                return;
            }
        }
    }
    for (pos, _) in &pass.conditionals {
        messages.error(*pos, "Missing matching '.ife'");
    }
    for (pos, _) in &pass.offsets {
        messages.error(*pos, "Missing matching '.ofe'");
    }
}

#[derive(Debug)]
struct DefinitionPass {
    /// Tracked one bit wider than an address so overflow is detectable
    pc: u32,
    offsets: Vec<(SourcePos, u32)>,
    conditionals: Vec<(SourcePos, bool)>,
    ended: bool,
}

impl DefinitionPass {
    fn new() -> Self {
        Self {
            pc: 0,
            offsets: Vec::new(),
            conditionals: Vec::new(),
            ended: false,
        }
    }

    /// True while inside a conditional block whose condition failed.
    fn skipping(&self) -> bool {
        self.conditionals.iter().any(|(_, taken)| !taken)
    }

    fn address(&self) -> u16 {
        self.pc as u16
    }

    fn advance(&mut self, pos: SourcePos, size: usize) -> Result<(), SourceError> {
        self.pc += size as u32;
        if self.pc > 0x10000 {
            return Err(SourceError::fatal(
                pos,
                "Address overflow; program exceeds $ffff",
            ));
        }
        Ok(())
    }

    fn visit(
        &mut self,
        statement: &mut Statement,
        symbols: &mut SymbolTable,
    ) -> Result<(), SourceError> {
        let pos = statement.pos;
        let address = self.address();

        // Conditional machinery runs even inside a skipped region.
        match &mut statement.kind {
            StatementKind::If { expr } => {
                let taken = if self.skipping() {
                    false
                } else {
                    expr.eval(&EvalContext {
                        pc: address,
                        symbols,
                    })? != 0
                };
                self.conditionals.push((pos, taken));
                return Ok(());
            }
            StatementKind::Ifdef { name } => {
                let taken = !self.skipping() && symbols.contains(name);
                self.conditionals.push((pos, taken));
                return Ok(());
            }
            StatementKind::Else => {
                return match self.conditionals.last_mut() {
                    Some(top) => {
                        top.1 = !top.1;
                        Ok(())
                    }
                    None => Err(SourceError::new(pos, "No matching '.if'")),
                };
            }
            StatementKind::Endif => {
                return match self.conditionals.pop() {
                    Some(_) => Ok(()),
                    None => Err(SourceError::new(pos, "No matching '.if'")),
                };
            }
            _ => {}
        }

        match &statement.label {
            Label::None => {}
            Label::Symbolic(name) => symbols
                .define(name, address)
                .map_err(|err| SourceError::new(pos, err.to_string()))?,
            Label::Temporary => symbols.define_temporary(TemporaryKind::Any, address),
            Label::TemporaryForward => symbols.define_temporary(TemporaryKind::Forward, address),
            Label::TemporaryBackward => symbols.define_temporary(TemporaryKind::Backward, address),
        }

        match &mut statement.kind {
            StatementKind::Empty
            | StatementKind::ObjectFile { .. }
            | StatementKind::If { .. }
            | StatementKind::Ifdef { .. }
            | StatementKind::Else
            | StatementKind::Endif => {}
            // Branches are two bytes whether or not the target is known yet.
            StatementKind::Branch { .. } => return self.advance(pos, 2),
            StatementKind::SymbolDefinition { name, expr } => {
                let value = expr.eval(&EvalContext {
                    pc: address,
                    symbols,
                })?;
                symbols
                    .define(name, value)
                    .map_err(|err| SourceError::new(pos, err.to_string()))?;
            }
            StatementKind::ProgramCounterAssignment { expr } | StatementKind::Origin { expr } => {
                let addr = expr.eval(&EvalContext {
                    pc: address,
                    symbols,
                })?;
                self.pc = addr as u32;
            }
            StatementKind::OffsetBegin { expr } => {
                let addr = expr.eval(&EvalContext {
                    pc: address,
                    symbols,
                })?;
                self.offsets.push((pos, self.pc));
                self.pc = addr as u32;
            }
            StatementKind::OffsetEnd => match self.offsets.pop() {
                Some((_, pc)) => self.pc = pc,
                None => return Err(SourceError::new(pos, "No matching '.off'")),
            },
            StatementKind::Buffer { expr } => {
                let count = expr.eval(&EvalContext {
                    pc: address,
                    symbols,
                })?;
                return self.advance(pos, count as usize);
            }
            StatementKind::Direct {
                ins,
                index,
                force_absolute,
                expr,
            } => {
                let resolved = expr.try_eval(&EvalContext {
                    pc: address,
                    symbols,
                })?;
                let size = match resolved {
                    Some(addr) => ins.encode_direct(None, addr, *index, *force_absolute),
                    None => {
                        // Unresolved forward reference: latch absolute mode.
                        *force_absolute = true;
                        ins.encode_direct(None, 0x0100, *index, true)
                    }
                }
                .ok_or_else(|| invalid_mode(pos, ins))?;
                return self.advance(pos, size);
            }
            StatementKind::Indirect { ins, index, .. } => {
                let size = ins
                    .encode_indirect(None, 0, *index)
                    .ok_or_else(|| invalid_mode(pos, ins))?;
                return self.advance(pos, size);
            }
            StatementKind::Implied { ins } => {
                let size = ins
                    .encode_implied(None)
                    .ok_or_else(|| invalid_mode(pos, ins))?;
                return self.advance(pos, size);
            }
            StatementKind::Accumulator { ins } => {
                let size = ins
                    .encode_accumulator(None)
                    .ok_or_else(|| invalid_mode(pos, ins))?;
                return self.advance(pos, size);
            }
            StatementKind::Immediate { ins, .. } => {
                let size = ins
                    .encode_immediate(None, 0)
                    .ok_or_else(|| invalid_mode(pos, ins))?;
                return self.advance(pos, size);
            }
            StatementKind::Byte { exprs, .. } => return self.advance(pos, exprs.len()),
            StatementKind::Word { exprs } => return self.advance(pos, exprs.len() * 2),
            StatementKind::Text { text, .. } => return self.advance(pos, text.len()),
            StatementKind::End => self.ended = true,
        }
        Ok(())
    }
}
