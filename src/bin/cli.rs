// CLI binary: exits on unrecoverable errors.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ti_advance::builtins::BUILTINS;
use ti_advance::lexer::lex;
use ti_advance::options::Options;
use ti_advance::{compile_source, Compiled};

// ── CLI argument parsing ─────────────────────────────────────────

#[derive(Parser)]
#[command(name = "tiadv", about = "Compile TI-Advance source to TI-Basic", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON options file; flags override its fields
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output raw JSON instead of formatted text
    #[arg(long, global = true)]
    json: bool,

    /// Log pipeline stages (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a source file ("-" reads stdin)
    Compile {
        file: String,
        /// Write the program here instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Emulate `%` for calculators without `remainder(`
        #[arg(long)]
        legacy: bool,
        /// Keep constant expressions as written
        #[arg(long)]
        no_simplify: bool,
        /// Emit "unknown_expr" for unparseable expressions
        #[arg(long)]
        dump_unknown: bool,
        /// Program re-entered by user function calls
        #[arg(long)]
        program: Option<String>,
    },
    /// Print the token stream of a source file
    Tokens {
        file: String,
        /// Keep whitespace tokens
        #[arg(long)]
        preserve: bool,
    },
    /// List the builtin functions
    Builtins,
    /// Print the JSON schema of the options file
    Schema,
}

// ── Setup ────────────────────────────────────────────────────────

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn load_options(config: Option<&Path>) -> Options {
    match config {
        Some(path) => Options::load(path).unwrap_or_else(|e| {
            eprintln!("Error: failed to load {}: {e}", path.display());
            process::exit(1);
        }),
        None => Options::default(),
    }
}

fn read_source(file: &str) -> String {
    let result = if file == "-" {
        let mut source = String::new();
        io::stdin().read_to_string(&mut source).map(|_| source)
    } else {
        fs::read_to_string(file)
    };
    result.unwrap_or_else(|e| {
        eprintln!("Error: failed to read {file}: {e}");
        process::exit(1);
    })
}

// ── Output formatting ────────────────────────────────────────────

fn print_json<T: serde::Serialize>(value: &T) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

fn emit_compiled(compiled: &Compiled, output: Option<&Path>, raw_json: bool) {
    if raw_json {
        print_json(compiled);
        return;
    }
    for diagnostic in &compiled.diagnostics {
        eprintln!("{diagnostic}");
    }
    match output {
        Some(path) => {
            if let Err(e) = fs::write(path, format!("{}\n", compiled.code)) {
                eprintln!("Error: failed to write {}: {e}", path.display());
                process::exit(1);
            }
        }
        None => println!("{}", compiled.code),
    }
}

// ── Main ─────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let mut options = load_options(cli.config.as_deref());

    match cli.command {
        Commands::Compile {
            file,
            output,
            legacy,
            no_simplify,
            dump_unknown,
            program,
        } => {
            options.modern &= !legacy;
            options.simplify &= !no_simplify;
            options.dump_unknown |= dump_unknown;
            if let Some(program) = program {
                options.program_name = program;
            }

            let source = read_source(&file);
            match compile_source(&source, &options) {
                Ok(compiled) => emit_compiled(&compiled, output.as_deref(), cli.json),
                Err(e) => {
                    eprintln!("Error: {}", e.report());
                    process::exit(1);
                }
            }
        }
        Commands::Tokens { file, preserve } => {
            options.lex.preserve |= preserve;
            let tokens = lex(&read_source(&file), &options.lex);
            if cli.json {
                print_json(&tokens);
            } else {
                for token in &tokens {
                    println!("{:<10} {:?} (line {})", token.tag.name(), token.text, token.line);
                }
            }
        }
        Commands::Builtins => {
            if cli.json {
                let rows: Vec<_> = BUILTINS
                    .iter()
                    .map(|b| {
                        serde_json::json!({
                            "name": b.name,
                            "target": b.target,
                            "arity": b.arity.describe(),
                            "category": b.category,
                            "description": b.description,
                        })
                    })
                    .collect();
                print_json(&rows);
            } else {
                for b in BUILTINS {
                    let target = if b.expand.is_some() { "(expansion)" } else { b.target };
                    println!(
                        "{:<14} {:<16} {:<10} {:<12} {}",
                        b.name,
                        target,
                        b.category,
                        b.arity.describe(),
                        b.description
                    );
                }
            }
        }
        Commands::Schema => print_json(&Options::schema()),
    }
}
