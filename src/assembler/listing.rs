use std::fmt::Write;

use crate::assembler::Context;

/// Renders the assembly listing: one line per three-byte slice of each
/// statement, with the program counter, buffer offset and source text.
///
/// The filename column is padded to the widest name so the columns line up
/// across included files.
#[tracing::instrument]
pub fn listing(context: &Context) -> String {
    let width = context.source.widest_short_filename();
    let mut out = String::new();
    for statement in &context.statements {
        let Some(range) = statement.range else {
            continue;
        };
        if range.is_empty() {
            continue;
        }
        let buffer = &context.buffers[range.buffer];
        let data = &buffer.bytes()[range.start..range.end];
        let name = context.source.short_filename(statement.pos.file);
        let text = context
            .source
            .line_text(statement.pos.file, statement.pos.line)
            .unwrap_or("");

        for (slice, chunk) in data.chunks(3).enumerate() {
            let hex = chunk
                .iter()
                .map(|byte| format!("{:02x}", byte))
                .collect::<Vec<_>>()
                .join(" ");
            let source = if slice == 0 { text } else { "" };
            let mut line = String::new();
            let _ = write!(
                line,
                "{:<width$}:{:<5} [+{:04x}] {:04x}: {:<8}    {}",
                name,
                statement.pos.line,
                range.start + slice * 3,
                statement.pc.wrapping_add((slice * 3) as u16),
                hex,
                source,
            );
            out.push_str(line.trim_end());
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::assembler::assemble_source;

    use pretty_assertions::assert_eq;

    #[test]
    fn test_listing_lines() {
        let context = assemble_source("*=$c000\nlda #$01\nsta $d020,x\nrts").unwrap();
        let expected = "\
<memory>:2     [+0000] c000: a9 01       lda #$01
<memory>:3     [+0002] c002: 9d 20 d0    sta $d020,x
<memory>:4     [+0005] c005: 60          rts
";
        assert_eq!(listing(&context), expected);
    }

    #[test]
    fn test_listing_continuation() {
        let context = assemble_source("*=$c000\n.byte 1, 2, 3, 4").unwrap();
        let expected = "\
<memory>:2     [+0000] c000: 01 02 03    .byte 1, 2, 3, 4
<memory>:2     [+0003] c003: 04
";
        assert_eq!(listing(&context), expected);
    }
}
