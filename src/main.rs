//! Assemble and execute a stackvm program.
//!
//! # Usage
//! ```text
//! stackvm <source-file> [OPTIONS]
//! ```
//!
//! # Arguments
//! - `source-file`: textual program to assemble and run
//!
//! # Options
//! - `--trace`: log every executed instruction to stderr

use std::env;
use std::fs;
use std::process;

use stackvm::assembler::Parser;
use stackvm::log;
use stackvm::vm::VM;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    let input_path = &args[1];
    let mut trace = false;

    for arg in &args[2..] {
        match arg.as_str() {
            "--trace" => trace = true,
            other => {
                eprintln!("Unexpected argument: {}\n", other);
                print_usage(&args[0]);
                process::exit(1);
            }
        }
    }

    log::init(if trace { log::Level::Debug } else { log::Level::Warn });

    let source = match fs::read_to_string(input_path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Failed to read {}: {}", input_path, err);
            process::exit(1);
        }
    };

    let mut parser = Parser::new(source);
    let reader = match parser.parse() {
        Ok(reader) => reader,
        Err(err) => {
            let position = parser.position();
            let fallback = err.to_string();
            let message = parser.err_message().unwrap_or(&fallback);
            eprintln!(
                "ERROR Ln {}, Col {}: {}\n\t{}",
                position.line + 1,
                position.column + 1,
                message,
                parser.current_line()
            );
            process::exit(1);
        }
    };

    let source_map = parser.take_source_map();
    let mut vm = VM::new(reader);
    if let Err(err) = vm.execute() {
        match source_map.find(vm.last_instruction()) {
            Some(span) => eprintln!(
                "Runtime Error in Ln {}, Col {}: {}\n\t{}",
                span.start.line + 1,
                span.start.column + 1,
                err,
                parser.source_span(span.start, span.end)
            ),
            None => eprintln!("Runtime Error: {}", err),
        }
        process::exit(1);
    }
}

const USAGE: &str = "\
stackvm - stack-based bytecode virtual machine

USAGE:
    {program} <source-file> [OPTIONS]

ARGS:
    <source-file>    Textual program to assemble and run

OPTIONS:
    --trace          Log every executed instruction to stderr
    -h, --help       Print this help message
";

fn print_usage(program: &str) {
    eprintln!("{}", USAGE.replace("{program}", program));
}
