//! nanocc CLI (§6).

use clap::Parser as ClapParser;
use nanocc::CompileOptions;
use std::path::PathBuf;
use std::process;

#[derive(ClapParser)]
#[command(name = "nanocc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Compiler for a pragmatic subset of C, targeting x86-64 System V", long_about = None)]
struct Cli {
    /// Input source file
    source: PathBuf,

    /// Output executable path (defaults to the input's file stem)
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Keep the intermediate `.s` file after linking
    #[arg(long)]
    keep_asm: bool,

    /// Stop after emitting assembly; don't assemble or link
    #[arg(long)]
    emit_asm_only: bool,
}

fn main() {
    let cli = Cli::parse();
    let output = cli
        .output
        .unwrap_or_else(|| nanocc::default_output_path(&cli.source));
    let options = CompileOptions {
        emit_asm_only: cli.emit_asm_only,
        keep_asm: cli.keep_asm,
    };

    match nanocc::compile_file(&cli.source, &output, &options) {
        Ok(()) => {
            if cli.emit_asm_only {
                println!("Compiled {} -> {}", cli.source.display(), output.with_extension("s").display());
            } else {
                println!("Compiled {} -> {}", cli.source.display(), output.display());
            }
        }
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
