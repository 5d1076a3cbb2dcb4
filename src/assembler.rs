use std::fs;
use std::path::PathBuf;

use clap::Args;
use thiserror::Error;

use self::ast::Statement;
use self::buffer::CodeBuffer;
use self::message::MessageList;
use self::parser::Parser;
use self::source::{IncludeError, SourceStream, SystemError};
use self::symbols::SymbolTable;

/// Statement and expression trees.
pub mod ast;

/// Code buffers and the byte writer.
pub mod buffer;

/// PETSCII and screen-code translation.
pub mod charset;

/// The definition pass: addresses, sizes and symbols.
pub mod define;

/// The emission pass: strict evaluation and byte generation.
pub mod emit;

/// The 6502 instruction table and addressing-mode encoders.
pub mod instruction;

/// Tokenizes one source line at a time.
///
/// `LDA #$10` becomes an identifier, a `#` punctuator and the number 16,
/// followed by an `End` token.
pub mod lexer;

/// Listing output.
pub mod listing;

/// Severity-tagged diagnostics.
pub mod message;

/// Parses token streams into statements.
pub mod parser;

/// Source files, include stack and positions.
pub mod source;

/// Named symbols and anonymous temporaries.
pub mod symbols;

#[derive(Debug, Error)]
pub enum AssemblerError {
    #[error(transparent)]
    Include(#[from] IncludeError),
    #[error(transparent)]
    System(#[from] SystemError),
    #[error("Invalid symbol definition '{0}'")]
    InvalidDefine(String),
}

/// The strictly-owned aggregate every pipeline stage works on.
#[derive(Debug, Default)]
pub struct Context {
    pub source: SourceStream,
    pub statements: Vec<Statement>,
    pub symbols: SymbolTable,
    pub messages: MessageList,
    pub buffers: Vec<CodeBuffer>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses every pending line of the source stream into statements.
    pub fn parse(&mut self) -> Result<(), SystemError> {
        Parser::new(&mut self.source, &mut self.statements, &mut self.messages).parse()
    }
}

#[derive(Args, Debug)]
pub struct AssemblyArgs {
    #[clap(required = true)]
    #[clap(help = "Source files to assemble")]
    pub files: Vec<PathBuf>,
    #[clap(short = 'l', long = "listing")]
    #[clap(help = "Write a listing to standard output")]
    pub listing: bool,
    #[clap(short = 'o', long = "output", value_name = "FILE")]
    #[clap(help = "Output filename for code without an .obj directive")]
    pub output: Option<String>,
    #[clap(short = 'O', long = "output-dir", value_name = "DIR")]
    #[clap(help = "Directory prefix for output files")]
    pub output_dir: Option<PathBuf>,
    #[clap(short = 'D', long = "define", value_name = "NAME[=VALUE]")]
    #[clap(help = "Predefine a symbol; the value defaults to 0")]
    pub defines: Vec<String>,
    #[clap(short = 's', long = "symbols")]
    #[clap(help = "Dump the symbol table to standard output")]
    pub symbols: bool,
    #[clap(short = 'r', long = "raw")]
    #[clap(help = "Omit the two-byte load address from output files")]
    pub raw: bool,
    #[clap(short = 'A', long = "dump-ast")]
    #[clap(help = "Dump the statement list to standard output and exit")]
    pub dump_ast: bool,
}

/// Runs the whole pipeline for the given arguments and returns the number
/// of error diagnostics.
///
/// Output files are only written when that number is zero.
#[tracing::instrument]
pub fn assemble(args: &AssemblyArgs) -> Result<usize, AssemblerError> {
    let mut context = Context::new();

    for definition in &args.defines {
        let (name, value) = parse_define(definition)?;
        context
            .symbols
            .define(&name, value)
            .map_err(|_| AssemblerError::InvalidDefine(definition.clone()))?;
    }

    for file in &args.files {
        context.source.include_file(file)?;
        context.parse()?;
    }

    if args.dump_ast {
        for statement in &context.statements {
            print!("{}", statement.dump(&context.source));
        }
        if context.messages.count() > 0 {
            eprint!("{}", context.messages.render(&context.source));
        }
        return Ok(context.messages.error_count());
    }

    define::define(&mut context);
    if !context.messages.has_fatal_error() {
        emit::emit(&mut context);
    }

    if context.messages.count() > 0 {
        eprint!("{}", context.messages.render(&context.source));
    }

    let errors = context.messages.error_count();
    if errors == 0 {
        write_output(&context, args)?;
        if args.listing {
            print!("{}", listing::listing(&context));
        }
        if args.symbols {
            for (name, address) in context.symbols.dump() {
                println!("{} = ${:04x}", name, address);
            }
        }
    }
    Ok(errors)
}

/// Utility for assembling a single in-memory source, used by tests.
pub fn assemble_source(input: &str) -> Result<Context, AssemblerError> {
    let mut context = Context::new();
    context.source.include_text("<memory>", input);
    context.parse()?;
    define::define(&mut context);
    if !context.messages.has_fatal_error() {
        emit::emit(&mut context);
    }
    Ok(context)
}

/// Writes each non-empty buffer: a two-byte little-endian load address,
/// then the payload. `-r` drops the address.
fn write_output(context: &Context, args: &AssemblyArgs) -> Result<(), AssemblerError> {
    for buffer in &context.buffers {
        if buffer.is_empty() {
            continue;
        }
        let name = if buffer.filename().is_empty() {
            args.output
                .clone()
                .unwrap_or_else(|| default_output_name(args))
        } else {
            buffer.filename().to_owned()
        };
        let path = match &args.output_dir {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        };
        let mut data = Vec::with_capacity(buffer.len() + 2);
        if !args.raw {
            data.extend_from_slice(&buffer.origin().to_le_bytes());
        }
        data.extend_from_slice(buffer.bytes());
        fs::write(&path, data).map_err(|source| SystemError {
            path: path.display().to_string(),
            source,
        })?;
    }
    Ok(())
}

fn default_output_name(args: &AssemblyArgs) -> String {
    args.files
        .first()
        .and_then(|file| file.file_stem())
        .map(|stem| format!("{}.prg", stem.to_string_lossy()))
        .unwrap_or_else(|| "a.prg".to_owned())
}

/// Parses a `-D name[=value]` definition; the value may be decimal,
/// `0x` hexadecimal or `$` hexadecimal and defaults to 0.
fn parse_define(definition: &str) -> Result<(String, u16), AssemblerError> {
    let invalid = || AssemblerError::InvalidDefine(definition.to_owned());
    let (name, value) = match definition.split_once('=') {
        Some((name, value)) => {
            let value = if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
                u16::from_str_radix(hex, 16).map_err(|_| invalid())?
            } else if let Some(hex) = value.strip_prefix('$') {
                u16::from_str_radix(hex, 16).map_err(|_| invalid())?
            } else {
                value.parse::<u16>().map_err(|_| invalid())?
            };
            (name, value)
        }
        None => (definition, 0),
    };
    if name.is_empty() {
        return Err(invalid());
    }
    Ok((name.to_owned(), value))
}
