use anyhow::Result;
use clap::Parser;
use tracing_chrome::{ChromeLayerBuilder, FlushGuard};
use tracing_subscriber::prelude::*;

use c64asm::assembler::{assemble, AssemblyArgs};

#[derive(Parser)]
#[command(version)]
#[command(about = "A two-pass 6502 assembler for the PowerAssembler dialect")]
struct Cli {
    #[clap(long)]
    #[clap(help = "Enable chrome tracing")]
    #[clap(long_help = "Enable chrome tracing which on program exit will generate
a json file to be opened with a chrome tracing compatible
viewer.")]
    trace: bool,
    #[command(flatten)]
    args: AssemblyArgs,
}

/// Make sure to hold the guard until exit, otherwise the trace is cut off.
pub fn trace() -> FlushGuard {
    let (chrome_layer, guard) = ChromeLayerBuilder::new().build();
    tracing_subscriber::registry().with(chrome_layer).init();

    guard
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _trace_guard = if cli.trace { Some(trace()) } else { None };

    let errors = assemble(&cli.args)?;
    if errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}
