//! LaTeX to Futhark Compiler CLI
//!
//! Usage:
//!   latex2futhark "\frac{d}{dx} x^3"
//!   latex2futhark -f formula.tex -n energy -o energy.fut
//!   latex2futhark "\sum_{n=1}^{10} \frac{1}{n^2}" --json

use clap::{ArgAction, Parser as ClapParser};
use colored::Colorize;
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::fs;
use std::io::{self, Read};
use std::process;

use latex_to_futhark::{
    compile, normalize, parse, CompileOptions, FutharkProgram, Parser, Program,
};

#[derive(ClapParser, Debug)]
#[command(name = "latex2futhark")]
#[command(version)]
#[command(about = "Compiles LaTeX math formulas to Futhark programs")]
struct Args {
    /// LaTeX formula to compile (e.g., "x^2 + 1")
    #[arg(value_name = "EXPR")]
    expression: Option<String>,

    /// Read the formula from a file
    #[arg(short = 'f', long = "file")]
    input_file: Option<String>,

    /// Print the canonical AST and parse tree instead of compiling
    #[arg(long = "ast")]
    print_ast: bool,

    /// Name of the generated function
    #[arg(short = 'n', long = "name")]
    function_name: Option<String>,

    /// Write the program to a file instead of stdout
    #[arg(short = 'o', long = "output")]
    output_file: Option<String>,

    /// Compile options as a JSON file
    #[arg(short = 'c', long = "config")]
    config_file: Option<String>,

    /// Output as JSON
    #[arg(short = 'j', long = "json")]
    json_output: bool,

    /// Fail on constructs without a lowering rule
    #[arg(long = "strict")]
    strict: bool,

    /// Skip the normalization pass
    #[arg(long = "raw")]
    raw: bool,

    /// Verbose output (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

/// Colored stderr logger
struct CliLogger;

impl Log for CliLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let level = match record.level() {
            Level::Error => "error".red(),
            Level::Warn => "warn".yellow(),
            Level::Info => "info".green(),
            Level::Debug => "debug".cyan(),
            Level::Trace => "trace".dimmed(),
        };
        eprintln!("[{}] {}", level, record.args());
    }

    fn flush(&self) {}
}

static LOGGER: CliLogger = CliLogger;

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("{}: {}", "Error".red(), message);
    process::exit(1);
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    // Get the formula from argument, file, or stdin
    let source = if let Some(expr) = args.expression {
        expr
    } else if let Some(file) = &args.input_file {
        fs::read_to_string(file)
            .unwrap_or_else(|e| fail(format!("Failed to read file '{}': {}", file, e)))
    } else {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .unwrap_or_else(|e| fail(format!("Failed to read stdin: {}", e)));
        buffer
    };

    let source = if args.raw {
        source
    } else {
        normalize(&source)
    };

    // Options: config file first, then flags on top
    let mut options = match &args.config_file {
        Some(file) => {
            let json = fs::read_to_string(file)
                .unwrap_or_else(|e| fail(format!("Failed to read config '{}': {}", file, e)));
            CompileOptions::from_json(&json).unwrap_or_else(|e| fail(e))
        }
        None => CompileOptions::default(),
    };
    if let Some(name) = args.function_name {
        options.function_name = name;
    }
    if args.strict {
        options.strict = true;
    }

    if args.print_ast {
        print_ast(&source);
        return;
    }

    let program = compile(&source, &options).unwrap_or_else(|e| fail(e));

    if args.verbose > 0 {
        print_summary(&program);
    }

    let text = if args.json_output {
        program
            .to_json()
            .unwrap_or_else(|e| fail(format!("Failed to serialize to JSON: {}", e)))
    } else {
        program.to_string()
    };

    match &args.output_file {
        Some(file) => fs::write(file, text)
            .unwrap_or_else(|e| fail(format!("Failed to write '{}': {}", file, e))),
        None => print!("{}", text),
    }
}

fn print_ast(source: &str) {
    let program: Program = parse(source).unwrap_or_else(|e| fail(e));
    println!("{}", "Canonical LaTeX".bold().green());
    println!("{}", "=".repeat(50));
    println!("{}", program);
    println!();

    let tree = Parser::new(source)
        .and_then(|mut parser| parser.parse_program())
        .unwrap_or_else(|e| fail(e));
    println!("{}", "Parse Tree".bold().yellow());
    println!("{}", "-".repeat(50));
    println!("{:#?}", tree);
    println!();

    println!("{}", "AST".bold().yellow());
    println!("{}", "-".repeat(50));
    for statement in &program.statements {
        println!("{:#?}", statement);
    }
}

/// Summary on stderr, keeping stdout for the program
fn print_summary(program: &FutharkProgram) {
    eprintln!("{}", "Compilation Results".bold().green());
    eprintln!("{}", "=".repeat(50));
    eprintln!("{}: {}", "Function".cyan(), program.function_name);
    eprintln!("{}: {:?}", "Parameters".cyan(), program.parameters);
    eprintln!("{}: {:?}", "Return type".cyan(), program.return_type);
    if !program.routines.is_empty() {
        eprintln!("{}: {:?}", "Routines".cyan(), program.routines);
    }

    if program.diagnostics.is_empty() {
        eprintln!("{}: none", "Diagnostics".cyan());
    } else {
        eprintln!("{}", "Diagnostics".bold().yellow());
        for diagnostic in &program.diagnostics {
            eprintln!("  {}", diagnostic.to_string().yellow());
        }
    }
    eprintln!();
}
