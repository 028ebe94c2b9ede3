mod commands;
mod input;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use log::LevelFilter;
use std::process;

use commands::time_value::{IrrArgs, NpvArgs, PmtArgs, XirrArgs};
use commands::underwrite::{UnderwriteArgs, ValidateArgs};

/// Deterministic commercial real-estate acquisition underwriting
#[derive(Parser)]
#[command(
    name = "cre",
    version,
    about = "Deterministic commercial real-estate acquisition underwriting",
    long_about = "Underwrites a commercial real-estate acquisition from a JSON or YAML deal \
                  document: lease projection, operating statement, debt, exit and returns, \
                  with optional partnership splits and scenario sweeps."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full underwriting pipeline on a deal document
    Underwrite(UnderwriteArgs),
    /// Check a deal document without computing it
    Validate(ValidateArgs),
    /// Internal rate of return for evenly spaced cash flows
    Irr(IrrArgs),
    /// Internal rate of return for dated cash flows
    Xirr(XirrArgs),
    /// Net present value of evenly spaced cash flows
    Npv(NpvArgs),
    /// Level annuity payment
    Pmt(PmtArgs),
    /// Print version information
    Version,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Csv,
    Minimal,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    // RUST_LOG still wins when set
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result: Result<serde_json::Value, Box<dyn std::error::Error>> = match cli.command {
        Commands::Underwrite(args) => commands::underwrite::run_underwrite(args),
        Commands::Validate(args) => commands::underwrite::run_validate(args),
        Commands::Irr(args) => commands::time_value::run_irr(args),
        Commands::Xirr(args) => commands::time_value::run_xirr(args),
        Commands::Npv(args) => commands::time_value::run_npv(args),
        Commands::Pmt(args) => commands::time_value::run_pmt(args),
        Commands::Version => {
            println!("cre {}", env!("CARGO_PKG_VERSION"));
            return;
        }
    };

    match result {
        Ok(value) => {
            output::format_output(&cli.output, &value);
            process::exit(0);
        }
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            process::exit(1);
        }
    }
}
