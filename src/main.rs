//! Shift register minimizer CLI
//!
//! Usage:
//!   minshreg program.ir
//!   minshreg program.ir -o minimized.ir --report
//!   cat program.ir | minshreg --json -vv
//!   minshreg program.ir --verify

use clap::Parser as ClapParser;
use colored::Colorize;
use log::{debug, info};
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use shreg_minimize::{check_equivalence, minimize_shift_registers, parse, CompileError, Minimized, Stmt};

#[derive(ClapParser, Debug)]
#[command(name = "minshreg")]
#[command(author = "FPGA Team")]
#[command(version = "0.1.0")]
#[command(about = "Minimizes the shift registers of a systolic loop nest")]
struct Args {
    /// Input program (stdin when omitted)
    #[arg(value_name = "FILE")]
    input: Option<PathBuf>,

    /// Write the minimized program here instead of stdout
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Print the allocation report as JSON
    #[arg(short = 'j', long = "json")]
    json_output: bool,

    /// Print a human-readable allocation summary
    #[arg(long = "report")]
    report: bool,

    /// Run the input and the output and compare what they emit
    #[arg(long = "verify")]
    verify: bool,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn fail(what: &str, err: impl std::fmt::Display) -> ! {
    eprintln!("{}: {}", what.red(), err);
    std::process::exit(1);
}

fn main() {
    let args = Args::parse();

    let log_level = match args.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let source = match &args.input {
        Some(path) => fs::read_to_string(path).unwrap_or_else(|e| {
            fail("Error", format!("Failed to read file '{}': {}", path.display(), e))
        }),
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .unwrap_or_else(|e| fail("Error", format!("Failed to read stdin: {}", e)));
            buffer
        }
    };
    debug!("Read {} bytes of input", source.len());

    let program = parse(&source).unwrap_or_else(|e| fail("Parse error", e));
    let result = minimize_shift_registers(&program).unwrap_or_else(|e| {
        let what = if e.is_user_error() { "Minimization error" } else { "Internal error" };
        fail(what, e)
    });
    info!("Minimized {} shift register(s)", result.allocations.len());

    if args.verify {
        verify(&program, &result.stmt);
    }

    let report = result.report(&program);
    if args.json_output {
        match report.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => fail("Error", format!("Failed to serialize to JSON: {}", e)),
        }
    } else if args.report {
        print_report(&result, &report.to_string());
    }

    let text = result.stmt.to_string();
    match &args.output {
        Some(path) => fs::write(path, text).unwrap_or_else(|e| {
            fail("Error", format!("Failed to write '{}': {}", path.display(), e))
        }),
        None if !args.json_output => print!("{}", text),
        None => {}
    }
}

fn verify(before: &Stmt, after: &Stmt) {
    match check_equivalence(before, after) {
        Ok(()) => eprintln!("{}", "Verified: minimized program emits the same values".green()),
        Err(e @ CompileError::Mismatch { .. }) => fail("Verification failed", e),
        Err(e) => fail("Evaluation error", e),
    }
}

fn print_report(result: &Minimized, summary: &str) {
    println!("{}", "Shift Register Minimization".bold().green());
    println!("{}", "=".repeat(50));
    if result.allocations.is_empty() {
        println!("(no shift registers with dependences)");
    } else {
        print!("{}", summary);
    }
    println!();
}
