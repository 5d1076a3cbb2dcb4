use crate::assembler::ast::{select, EvalContext, Statement, StatementKind};
use crate::assembler::buffer::{CodeBuffer, CodeRange, CodeWriter};
use crate::assembler::charset;
use crate::assembler::define::invalid_mode;
use crate::assembler::instruction::IndexRegister;
use crate::assembler::source::SourceError;
use crate::assembler::symbols::SymbolTable;
use crate::assembler::Context;

/// The second pass: evaluates every expression strictly and writes bytes.
///
/// Each statement restores the program counter recorded by the definition
/// pass, so output does not depend on emission order side effects. The
/// byte range each statement produced is recorded for the listing.
#[tracing::instrument]
pub fn emit(context: &mut Context) {
    let Context {
        statements,
        symbols,
        messages,
        buffers,
        ..
    } = context;

    let mut pass = EmissionPass {
        writer: CodeWriter::new(),
    };
    for statement in statements.iter_mut() {
        let start = pass.writer.offset();
        if !statement.skipped {
            if let Err(err) = pass.visit(statement, symbols, buffers) {
                let fatal = err.fatal;
                messages.source_error(err);
                if fatal {
                    break;
                }
            }
        }
        // An `.obj` rotation resets the offset, which empties the range.
        let end = pass.writer.offset();
        statement.range = Some(CodeRange {
            buffer: pass.writer.index(),
            start: start.min(end),
            end,
        });
    }
    buffers.push(pass.writer.detach());
}

#[derive(Debug)]
struct EmissionPass {
    writer: CodeWriter,
}

impl EmissionPass {
    /// Latches the buffer origin when its first byte is about to land.
    fn will_emit(&mut self, pc: u16) {
        if self.writer.buffer().is_empty() {
            self.writer.buffer_mut().set_origin(pc);
        }
    }

    fn visit(
        &mut self,
        statement: &mut Statement,
        symbols: &SymbolTable,
        buffers: &mut Vec<CodeBuffer>,
    ) -> Result<(), SourceError> {
        let pos = statement.pos;
        let pc = statement.pc;
        let context = EvalContext { pc, symbols };

        match &mut statement.kind {
            StatementKind::Empty
            | StatementKind::SymbolDefinition { .. }
            | StatementKind::Origin { .. }
            | StatementKind::OffsetBegin { .. }
            | StatementKind::OffsetEnd
            | StatementKind::If { .. }
            | StatementKind::Ifdef { .. }
            | StatementKind::Else
            | StatementKind::Endif
            | StatementKind::End => {}
            StatementKind::ProgramCounterAssignment { expr } => {
                let addr = expr.eval(&context)?;
                if !self.writer.buffer().is_empty() {
                    if addr < pc {
                        return Err(SourceError::new(
                            pos,
                            format!(
                                "Invalid program counter assignment (address ${:04x} < pc ${:04x})",
                                addr, pc
                            ),
                        ));
                    }
                    self.writer.fill((addr - pc) as usize);
                }
                // With an empty buffer only the origin moves, when the
                // first byte arrives.
            }
            StatementKind::Implied { ins } => {
                self.will_emit(pc);
                ins.encode_implied(Some(&mut self.writer))
                    .ok_or_else(|| invalid_mode(pos, ins))?;
            }
            StatementKind::Accumulator { ins } => {
                self.will_emit(pc);
                ins.encode_accumulator(Some(&mut self.writer))
                    .ok_or_else(|| invalid_mode(pos, ins))?;
            }
            StatementKind::Immediate {
                ins,
                selector,
                expr,
            } => {
                self.will_emit(pc);
                let value = expr.eval(&context)?;
                let byte = select(*selector, value).ok_or_else(|| {
                    SourceError::new(
                        expr.pos,
                        format!("Expected a value between 0 and 255; got {}", value),
                    )
                })?;
                ins.encode_immediate(Some(&mut self.writer), byte)
                    .ok_or_else(|| invalid_mode(pos, ins))?;
            }
            StatementKind::Direct {
                ins,
                index,
                force_absolute,
                expr,
            } => {
                self.will_emit(pc);
                let addr = expr.eval(&context)?;
                ins.encode_direct(Some(&mut self.writer), addr, *index, *force_absolute)
                    .ok_or_else(|| invalid_mode(pos, ins))?;
            }
            StatementKind::Indirect { ins, index, expr } => {
                self.will_emit(pc);
                let addr = expr.eval(&context)?;
                if *index != IndexRegister::None && addr > 0xff {
                    return Err(SourceError::new(
                        expr.pos,
                        format!("Expected a value between 0 and 255; got {}", addr),
                    ));
                }
                ins.encode_indirect(Some(&mut self.writer), addr, *index)
                    .ok_or_else(|| invalid_mode(pos, ins))?;
            }
            StatementKind::Branch { ins, expr } => {
                self.will_emit(pc);
                let to = expr.eval(&context)?;
                ins.encode_relative(Some(&mut self.writer), pc, to)
                    .ok_or_else(|| SourceError::new(pos, "Branch out of range"))?;
            }
            StatementKind::Buffer { expr } => {
                self.will_emit(pc);
                let count = expr.eval(&context)?;
                self.writer.fill(count as usize);
            }
            StatementKind::ObjectFile { filename } => {
                if !self.writer.buffer().is_empty() {
                    let done = self.writer.rotate();
                    buffers.push(done);
                }
                self.writer.buffer_mut().set_filename(filename);
            }
            StatementKind::Byte { selector, exprs } => {
                self.will_emit(pc);
                for expr in exprs.iter_mut() {
                    let value = expr.eval(&context)?;
                    let byte = select(*selector, value).ok_or_else(|| {
                        SourceError::new(
                            expr.pos,
                            format!("Expected a value between 0 and 255; got {}", value),
                        )
                    })?;
                    self.writer.byte(byte);
                }
            }
            StatementKind::Word { exprs } => {
                self.will_emit(pc);
                for expr in exprs.iter_mut() {
                    let value = expr.eval(&context)?;
                    self.writer.word(value);
                }
            }
            StatementKind::Text { encoding, text } => {
                self.will_emit(pc);
                for byte in charset::encode(*encoding, text) {
                    self.writer.byte(byte);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::assembler::define::define;
    use crate::assembler::Context;

    use pretty_assertions::assert_eq;

    fn assemble(text: &str) -> Context {
        let mut context = Context::new();
        context.source.include_text("test.asm", text);
        context.parse().unwrap();
        define(&mut context);
        if !context.messages.has_fatal_error() {
            emit(&mut context);
        }
        context
    }

    fn bytes(context: &Context) -> &[u8] {
        context.buffers[0].bytes()
    }

    #[test]
    fn test_basic_program() {
        let context = assemble("*=$c000\nlda #$01\nrts");
        assert_eq!(context.messages.count(), 0);
        assert_eq!(context.buffers[0].origin(), 0xc000);
        assert_eq!(bytes(&context), &[0xa9, 0x01, 0x60]);
    }

    #[test]
    fn test_symbols_resolve() {
        let context = assemble("*=$1000\nfoo = $d020\nlda foo\nsta foo+1");
        assert_eq!(context.messages.count(), 0);
        assert_eq!(bytes(&context), &[0xad, 0x20, 0xd0, 0x8d, 0x21, 0xd0]);
    }

    #[test]
    fn test_zero_page_selection() {
        let context = assemble("*=$4000\nlda $12");
        assert_eq!(bytes(&context), &[0xa5, 0x12]);

        let context = assemble("*=$4000\nlda !$12");
        assert_eq!(bytes(&context), &[0xad, 0x12, 0x00]);
    }

    #[test]
    fn test_backward_branch() {
        let context = assemble("*=$2000\n- lda #0\nbne -");
        assert_eq!(context.messages.count(), 0);
        assert_eq!(bytes(&context), &[0xa9, 0x00, 0xd0, 0xfc]);
    }

    #[test]
    fn test_forward_branch() {
        let context = assemble("*=$3000\nbeq +\nlda #1\n+ rts");
        assert_eq!(context.messages.count(), 0);
        assert_eq!(bytes(&context), &[0xf0, 0x02, 0xa9, 0x01, 0x60]);
    }

    #[test]
    fn test_branch_out_of_range() {
        let context = assemble("*=$2000\nbne $2100");
        assert_eq!(context.messages.error_count(), 1);
        assert_eq!(context.messages.sorted()[0].summary, "Branch out of range");
    }

    #[test]
    fn test_byte_and_word_directives() {
        let context = assemble("*=$3000\n.byte <$1234, >$1234, $ff\n.word $1234");
        assert_eq!(bytes(&context), &[0x34, 0x12, 0xff, 0x34, 0x12]);
    }

    #[test]
    fn test_byte_range_check() {
        let context = assemble("*=$3000\n.byte $100");
        assert_eq!(context.messages.error_count(), 1);
        assert_eq!(
            context.messages.sorted()[0].summary,
            "Expected a value between 0 and 255; got 256"
        );
    }

    #[test]
    fn test_forward_reference_emits_absolute() {
        let context = assemble("*=$5000\njmp forward\nforward rts");
        assert_eq!(context.messages.count(), 0);
        assert_eq!(bytes(&context), &[0x4c, 0x03, 0x50, 0x60]);
    }

    #[test]
    fn test_conditional_emission() {
        let context = assemble("*=$1000\n.if 0\nlda #1\n.else\nlda #2\n.ife");
        assert_eq!(bytes(&context), &[0xa9, 0x02]);

        let context = assemble("*=$1000\n.if 1\nlda #1\n.else\nlda #2\n.ife");
        assert_eq!(bytes(&context), &[0xa9, 0x01]);
    }

    #[test]
    fn test_program_counter_fill() {
        let context = assemble("*=$c000\nlda #1\n*=$c010\nrts");
        assert_eq!(context.messages.count(), 0);
        assert_eq!(context.buffers[0].len(), 0x11);
        assert_eq!(context.buffers[0].bytes()[0], 0xa9);
        assert_eq!(context.buffers[0].bytes()[2], 0x00);
        assert_eq!(context.buffers[0].bytes()[0x10], 0x60);
    }

    #[test]
    fn test_backward_program_counter_is_error() {
        let context = assemble("*=$c000\nlda #1\n*=$b000\nrts");
        assert_eq!(context.messages.error_count(), 1);
        assert_eq!(
            context.messages.sorted()[0].summary,
            "Invalid program counter assignment (address $b000 < pc $c002)"
        );
    }

    #[test]
    fn test_undefined_symbol_at_emission() {
        let context = assemble("*=$1000\nlda nowhere");
        assert_eq!(context.messages.error_count(), 1);
        assert_eq!(
            context.messages.sorted()[0].summary,
            "Undefined symbol 'nowhere'"
        );
    }

    #[test]
    fn test_object_file_buffers() {
        let context = assemble(
            "*=$0801\n.obj \"first.prg\"\nlda #1\n*=$c000\n.obj \"second.prg\"\nrts",
        );
        assert_eq!(context.messages.count(), 0);
        assert_eq!(context.buffers.len(), 2);
        assert_eq!(context.buffers[0].filename(), "first.prg");
        assert_eq!(context.buffers[0].origin(), 0x0801);
        assert_eq!(context.buffers[0].bytes(), &[0xa9, 0x01]);
        assert_eq!(context.buffers[1].filename(), "second.prg");
        assert_eq!(context.buffers[1].origin(), 0xc000);
        assert_eq!(context.buffers[1].bytes(), &[0x60]);
    }

    #[test]
    fn test_string_emission() {
        let context = assemble("*=$1000\n.asc \"hi\"\n.scr \"hi\"");
        assert_eq!(bytes(&context), &[0x48, 0x49, 0x08, 0x09]);
    }

    #[test]
    fn test_buffer_directive_fill() {
        let context = assemble("*=$1000\nlda #1\n.buf 3\nrts");
        assert_eq!(bytes(&context), &[0xa9, 0x01, 0x00, 0x00, 0x00, 0x60]);
    }

    #[test]
    fn test_offset_scope_emission() {
        // The snippet assembles for $0400 but is stored inline.
        let context = assemble("*=$1000\nlda #1\n.off $0400\ntarget rts\n.ofe\njmp target");
        assert_eq!(context.messages.count(), 0);
        assert_eq!(bytes(&context), &[0xa9, 0x01, 0x60, 0x4c, 0x00, 0x04]);
    }

    #[test]
    fn test_ranges_recorded() {
        let context = assemble("*=$c000\nlda #$01\nrts");
        let range = context.statements[1].range.unwrap();
        assert_eq!((range.start, range.end), (0, 2));
        let range = context.statements[2].range.unwrap();
        assert_eq!((range.start, range.end), (2, 3));
    }

    #[test]
    fn test_indirect_operand_range() {
        let context = assemble("*=$1000\nlda ($1234),y");
        assert_eq!(context.messages.error_count(), 1);
        assert_eq!(
            context.messages.sorted()[0].summary,
            "Expected a value between 0 and 255; got 4660"
        );
    }

    #[test]
    fn test_immediate_selector_bytes() {
        let context = assemble("*=$1000\nlda #<$1234\nldx #>$1234");
        assert_eq!(bytes(&context), &[0xa9, 0x34, 0xa2, 0x12]);
    }
}
