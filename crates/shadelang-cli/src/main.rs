//! slc — compile .sl shaders from the command line.
//!
//! Compiles each file given on the command line, reports every
//! diagnostic, and prints a bytecode disassembly for shaders that
//! compile. `-q` suppresses the listing and just reports pass/fail.
//!
//!     cargo run -p shadelang-cli -- shaders/matte.sl

use std::process::ExitCode;

use shadelang::SymbolTable;
use shadelang::compile::compile_file;

fn main() -> ExitCode {
    env_logger::init();

    let mut quiet = false;
    let mut paths = Vec::new();
    for argument in std::env::args().skip(1) {
        match argument.as_str() {
            "-q" | "--quiet" => quiet = true,
            "-h" | "--help" => {
                println!("usage: slc [-q] <shader.sl>...");
                return ExitCode::SUCCESS;
            }
            _ => paths.push(argument),
        }
    }
    if paths.is_empty() {
        eprintln!("usage: slc [-q] <shader.sl>...");
        return ExitCode::FAILURE;
    }

    let table = SymbolTable::new();
    let mut failures = 0usize;
    for path in &paths {
        match compile_file(path, &table) {
            Ok(shader) => {
                if quiet {
                    println!("{path}: ok");
                } else {
                    print!("{}", shader.disassemble());
                }
            }
            Err(errors) => {
                failures += 1;
                eprintln!("{path}:");
                for error in &errors.errors {
                    eprintln!("  {error}");
                }
            }
        }
    }

    if failures > 0 {
        log::error!("{failures} of {} shaders failed to compile", paths.len());
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
