use std::fs;
use std::path::PathBuf;

use c64asm::assembler::{assemble, assemble_source, define, emit, AssemblyArgs, Context};

fn assemble_bytes(input: &str) -> (u16, Vec<u8>) {
    let context = assemble_source(input).unwrap();
    assert_eq!(
        context.messages.error_count(),
        0,
        "unexpected diagnostics:\n{}",
        context.messages.render(&context.source)
    );
    (
        context.buffers[0].origin(),
        context.buffers[0].bytes().to_vec(),
    )
}

fn first_error(input: &str) -> String {
    let context = assemble_source(input).unwrap();
    assert!(context.messages.error_count() > 0, "expected an error");
    context.messages.sorted()[0].summary.clone()
}

#[test]
fn test_basic_program() {
    let (origin, bytes) = assemble_bytes("*=$c000\nlda #$01\nrts");
    assert_eq!(origin, 0xc000);
    assert_eq!(bytes, vec![0xa9, 0x01, 0x60]);
}

#[test]
fn test_symbol_arithmetic() {
    let (_, bytes) = assemble_bytes("*=$1000\nfoo = $d020\nlda foo\nsta foo+1");
    assert_eq!(bytes, vec![0xad, 0x20, 0xd0, 0x8d, 0x21, 0xd0]);
}

#[test]
fn test_backward_temporary_branch() {
    let (_, bytes) = assemble_bytes("*=$2000\n- lda #0\nbne -");
    assert_eq!(bytes, vec![0xa9, 0x00, 0xd0, 0xfc]);
}

#[test]
fn test_byte_selectors_and_word() {
    let (_, bytes) = assemble_bytes("*=$3000\n.byte <$1234, >$1234, $ff\n.word $1234");
    assert_eq!(bytes, vec![0x34, 0x12, 0xff, 0x34, 0x12]);
}

#[test]
fn test_zero_page_versus_forced_absolute() {
    let (_, bytes) = assemble_bytes("*=$4000\nlda $12");
    assert_eq!(bytes, vec![0xa5, 0x12]);

    let (_, bytes) = assemble_bytes("*=$4000\nlda !$12");
    assert_eq!(bytes, vec![0xad, 0x12, 0x00]);
}

#[test]
fn test_conditional_assembly() {
    let (_, bytes) = assemble_bytes("*=$1000\n.if 0\nlda #1\n.else\nlda #2\n.ife");
    assert_eq!(bytes, vec![0xa9, 0x02]);
}

#[test]
fn test_forward_reference_forces_absolute() {
    let (origin, bytes) = assemble_bytes("*=$5000\njmp forward\nforward rts");
    assert_eq!(origin, 0x5000);
    assert_eq!(bytes, vec![0x4c, 0x03, 0x50, 0x60]);
}

#[test]
fn test_determinism() {
    let input = "*=$0801\nstart ldx #$00\n- inx\ncpx #$10\nbne -\njmp start";
    let first = assemble_bytes(input);
    let second = assemble_bytes(input);
    assert_eq!(first, second);
}

#[test]
fn test_loop_with_labels() {
    // A forward branch across a backward branch, all through named labels.
    let (_, bytes) = assemble_bytes(
        "*=$0810\n\
         ldx #$08\n\
         loop lda #$01\n\
         sta $0200,x\n\
         dex\n\
         bne loop\n\
         rts",
    );
    assert_eq!(
        bytes,
        vec![0xa2, 0x08, 0xa9, 0x01, 0x9d, 0x00, 0x02, 0xca, 0xd0, 0xf8, 0x60]
    );
}

#[test]
fn test_statement_chaining_on_one_line() {
    let (_, bytes) = assemble_bytes("*=$1000\nlda #1 : sta $d020 : rts");
    assert_eq!(bytes, vec![0xa9, 0x01, 0x8d, 0x20, 0xd0, 0x60]);
}

#[test]
fn test_immediate_forms() {
    let (_, bytes) = assemble_bytes("*=$1000\ntarget = $1234\nlda #<target\nldx #>target\nldy <target");
    assert_eq!(bytes, vec![0xa9, 0x34, 0xa2, 0x12, 0xa0, 0x34]);
}

#[test]
fn test_indirect_modes() {
    let (_, bytes) = assemble_bytes("*=$1000\njmp ($fffc)\nlda ($c8),y\neor ($c8,x)");
    assert_eq!(bytes, vec![0x6c, 0xfc, 0xff, 0xb1, 0xc8, 0x41, 0xc8]);
}

#[test]
fn test_program_counter_expression() {
    // jmp * loops forever at its own address.
    let (_, bytes) = assemble_bytes("*=$2000\njmp *");
    assert_eq!(bytes, vec![0x4c, 0x00, 0x20]);
}

#[test]
fn test_temporary_label_directions() {
    let (_, bytes) = assemble_bytes(
        "*=$1000\n\
         beq ++\n\
         / lda #1\n\
         bne -\n\
         + rts",
    );
    // ++ from $1000 counts the `/` at $1002 and the `+` at $1006.
    assert_eq!(bytes, vec![0xf0, 0x04, 0xa9, 0x01, 0xd0, 0xfc, 0x60]);
}

#[test]
fn test_string_directives() {
    let (_, bytes) = assemble_bytes("*=$1000\n.asc \"AB\"\n.scr \"ab\"");
    assert_eq!(bytes, vec![0xc1, 0xc2, 0x01, 0x02]);
}

#[test]
fn test_screen_code_operand() {
    let (_, bytes) = assemble_bytes("*=$1000\nlda #@\"a\"\n.byte @\"b\"");
    assert_eq!(bytes, vec![0xa9, 0x01, 0x02]);
}

#[test]
fn test_character_literal_operand() {
    let (_, bytes) = assemble_bytes("*=$1000\nlda #\"a\"");
    assert_eq!(bytes, vec![0xa9, 0x41]);
}

#[test]
fn test_origin_directive_moves_without_fill() {
    // .org changes addresses but emits nothing; output stays contiguous.
    let (origin, bytes) = assemble_bytes("*=$1000\nlda #1\n.org $2000\nhere rts\njmp here");
    assert_eq!(origin, 0x1000);
    assert_eq!(bytes, vec![0xa9, 0x01, 0x60, 0x4c, 0x00, 0x20]);
}

#[test]
fn test_program_counter_fill() {
    let (_, bytes) = assemble_bytes("*=$c000\nlda #1\n*=$c008\nrts");
    assert_eq!(
        bytes,
        vec![0xa9, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x60]
    );
}

#[test]
fn test_buffer_directive() {
    let (_, bytes) = assemble_bytes("*=$1000\nlda #1\n.buf 2\nrts");
    assert_eq!(bytes, vec![0xa9, 0x01, 0x00, 0x00, 0x60]);
}

#[test]
fn test_offset_scope() {
    let context = assemble_source(
        "*=$1000\nlda #1\n.off $0400\nsnippet rts\n.ofe\njmp snippet",
    )
    .unwrap();
    assert_eq!(context.messages.count(), 0);
    // The snippet's label resolves in the offset address space while its
    // bytes stay inline in the buffer.
    assert_eq!(context.symbols.get("snippet"), Some(0x0400));
    assert_eq!(
        context.buffers[0].bytes(),
        &[0xa9, 0x01, 0x60, 0x4c, 0x00, 0x04]
    );
}

#[test]
fn test_object_file_directive() {
    let context = assemble_source(
        "*=$0801\n.obj \"main.prg\"\nlda #1\nrts\n*=$c000\n.obj \"extra.prg\"\n.byte $aa",
    )
    .unwrap();
    assert_eq!(context.messages.count(), 0);
    assert_eq!(context.buffers.len(), 2);
    assert_eq!(context.buffers[0].filename(), "main.prg");
    assert_eq!(context.buffers[0].origin(), 0x0801);
    assert_eq!(context.buffers[0].bytes(), &[0xa9, 0x01, 0x60]);
    assert_eq!(context.buffers[1].filename(), "extra.prg");
    assert_eq!(context.buffers[1].origin(), 0xc000);
    assert_eq!(context.buffers[1].bytes(), &[0xaa]);
}

#[test]
fn test_end_directive() {
    let (_, bytes) = assemble_bytes("*=$1000\nlda #1\n.end\nlda #2");
    assert_eq!(bytes, vec![0xa9, 0x01]);
}

#[test]
fn test_ignored_legacy_directive() {
    let context = assemble_source("*=$1000\n.mem\nrts").unwrap();
    assert_eq!(context.messages.error_count(), 0);
    assert_eq!(context.messages.warning_count(), 1);
    assert_eq!(context.buffers[0].bytes(), &[0x60]);
}

#[test]
fn test_error_duplicate_symbol() {
    assert_eq!(
        first_error("twice = 1\ntwice = 2"),
        "Symbol 'twice' already exists"
    );
}

#[test]
fn test_error_undefined_symbol() {
    assert_eq!(
        first_error("*=$1000\nlda nowhere"),
        "Undefined symbol 'nowhere'"
    );
}

#[test]
fn test_error_branch_out_of_range() {
    assert_eq!(first_error("*=$2000\nbne $2100"), "Branch out of range");
}

#[test]
fn test_error_division_by_zero() {
    assert_eq!(first_error("*=$1000\nlda #8/0"), "Division by zero");
}

#[test]
fn test_error_unknown_mnemonic() {
    assert_eq!(first_error("xyz #1"), "Expected instruction or directive");
}

#[test]
fn test_error_missing_temporary() {
    assert_eq!(
        first_error("*=$1000\nbne -"),
        "No applicable temporary branch symbol"
    );
}

#[test]
fn test_fatal_overflow_skips_emission() {
    let context = assemble_source("*=$ffff\nlda #1\nlda #2").unwrap();
    assert!(context.messages.has_fatal_error());
    // The emission pass never ran, so no buffer was flushed.
    assert!(context.buffers.is_empty());
}

#[test]
fn test_expressions_are_left_to_right() {
    // 2+3*4 is (2+3)*4 in this dialect.
    let (_, bytes) = assemble_bytes("*=$1000\nlda #2+3*4");
    assert_eq!(bytes, vec![0xa9, 20]);
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("c64asm-{}-{}", name, std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn test_include_files() {
    let dir = scratch_dir("include");
    fs::write(
        dir.join("main.asm"),
        "*=$1000\n.inc \"defs.asm\"\nlda border\nrts\n",
    )
    .unwrap();
    fs::write(dir.join("defs.asm"), "border = $d020\n").unwrap();

    let mut context = Context::new();
    context.source.include_file(&dir.join("main.asm")).unwrap();
    context.parse().unwrap();
    define::define(&mut context);
    emit::emit(&mut context);
    assert_eq!(context.messages.count(), 0);
    assert_eq!(context.buffers[0].bytes(), &[0xad, 0x20, 0xd0, 0x60]);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_duplicate_include_rejected() {
    let dir = scratch_dir("dup-include");
    fs::write(
        dir.join("main.asm"),
        ".inc \"lib.asm\"\n.inc \"lib.asm\"\nrts\n",
    )
    .unwrap();
    fs::write(dir.join("lib.asm"), "zero = 0\n").unwrap();

    let mut context = Context::new();
    context.source.include_file(&dir.join("main.asm")).unwrap();
    context.parse().unwrap();
    assert!(context.messages.has_fatal_error());

    fs::remove_dir_all(&dir).ok();
}

fn assembly_args(files: Vec<PathBuf>, dir: &PathBuf) -> AssemblyArgs {
    AssemblyArgs {
        files,
        listing: false,
        output: None,
        output_dir: Some(dir.clone()),
        defines: Vec::new(),
        symbols: false,
        raw: false,
        dump_ast: false,
    }
}

#[test]
fn test_output_file_format() {
    let dir = scratch_dir("output");
    let source = dir.join("main.asm");
    fs::write(&source, "*=$c000\nlda #$01\nrts\n").unwrap();

    let mut args = assembly_args(vec![source], &dir);
    args.output = Some("out.prg".to_owned());
    let errors = assemble(&args).unwrap();
    assert_eq!(errors, 0);

    // Two-byte little-endian load address, then the payload.
    let data = fs::read(dir.join("out.prg")).unwrap();
    assert_eq!(data, vec![0x00, 0xc0, 0xa9, 0x01, 0x60]);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_raw_output_and_defines() {
    let dir = scratch_dir("raw");
    let source = dir.join("main.asm");
    fs::write(&source, ".if debug\nlda #1\n.else\nlda #2\n.ife\n").unwrap();

    let mut args = assembly_args(vec![source], &dir);
    args.output = Some("raw.bin".to_owned());
    args.raw = true;
    args.defines = vec!["debug=1".to_owned()];
    let errors = assemble(&args).unwrap();
    assert_eq!(errors, 0);

    let data = fs::read(dir.join("raw.bin")).unwrap();
    assert_eq!(data, vec![0xa9, 0x01]);

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_errors_suppress_output() {
    let dir = scratch_dir("errors");
    let source = dir.join("main.asm");
    fs::write(&source, "*=$1000\nlda nowhere\n").unwrap();

    let mut args = assembly_args(vec![source], &dir);
    args.output = Some("never.prg".to_owned());
    let errors = assemble(&args).unwrap();
    assert_eq!(errors, 1);
    assert!(!dir.join("never.prg").exists());

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_symbol_dump_order() {
    let context = assemble_source("zeta = 1\nalpha = 2\nmid = 3").unwrap();
    let names: Vec<String> = context
        .symbols
        .dump()
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(names, vec!["zeta", "alpha", "mid"]);
}
