//! Skiff CLI - compiles a source file and prints its disassembly.
//!
//! This is a thin driver over `skiff-lang`: it exists so compiled output
//! can be inspected without a VM attached.

use owo_colors::OwoColorize;
use std::process::ExitCode;

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let Some(path) = args.next() else {
        eprintln!("usage: skiff <file>");
        return ExitCode::FAILURE;
    };

    let source = match std::fs::read_to_string(&path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("{} {}: {}", "error:".red().bold(), path, err);
            return ExitCode::FAILURE;
        }
    };

    match skiff_lang::compile(&source, &path) {
        Ok(proto) => {
            print!("{}", proto.disassemble());
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{} {}", "error:".red().bold(), err);
            ExitCode::FAILURE
        }
    }
}
