//! Kestrel command-line tool
//!
//! Diagnostics over bytecode units: disassembly, control flow, inferred
//! states, escape graphs and profiled runs through the JIT engine.
//!
//! Logging goes to stderr and is filtered by `KESTREL_LOG` (falling back to
//! `RUST_LOG`), e.g. `KESTREL_LOG=kestrel_engine=debug`.

mod commands;
mod config;
mod output;

use clap::{Parser, Subcommand};
use commands::KindArg;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kestrel")]
#[command(about = "Kestrel bytecode analysis and JIT toolchain", long_about = None)]
#[command(version)]
struct Cli {
    /// JIT configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// When to use colors
    #[arg(long, global = true, value_parser = ["auto", "always", "never"])]
    color: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the instructions of a unit
    Disasm {
        /// Unit file (JSON or binary)
        file: PathBuf,
    },

    /// Print the control-flow graph of a unit
    Cfg {
        /// Unit file (JSON or binary)
        file: PathBuf,
    },

    /// Print the inferred state before every instruction
    Analyze {
        /// Unit file (JSON or binary)
        file: PathBuf,
        /// Argument kinds, comma separated (`any` for unknown)
        #[arg(long, value_delimiter = ',', value_parser = commands::parse_kind)]
        kinds: Vec<KindArg>,
    },

    /// Render the instruction graph as Graphviz DOT
    Graph {
        /// Unit file (JSON or binary)
        file: PathBuf,
        /// Argument kinds, comma separated (`any` for unknown)
        #[arg(long, value_delimiter = ',', value_parser = commands::parse_kind)]
        kinds: Vec<KindArg>,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run a unit through the JIT engine
    Run {
        /// Unit file (JSON or binary)
        file: PathBuf,
        /// Arguments, as JSON literals
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
        /// Number of times to run the unit
        #[arg(short = 'n', long, default_value_t = 1)]
        repeat: usize,
        /// Print the backend IR of the final record
        #[arg(long)]
        ir: bool,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write a unit in its binary encoding
    Encode {
        /// Unit file (JSON or binary)
        file: PathBuf,
        /// Output path
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("KESTREL_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let choice = output::resolve_color_choice(cli.color.as_deref());
    let mut out = output::StyledOutput::new(choice);
    let config = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Disasm { file } => commands::disasm::execute(&file, &mut out),
        Commands::Cfg { file } => commands::cfg::execute(&file, &mut out),
        Commands::Analyze { file, kinds } => {
            commands::analyze::execute(&file, &kinds, &config, &mut out)
        }
        Commands::Graph {
            file,
            kinds,
            output,
        } => commands::graph::execute(&file, &kinds, output.as_deref(), &config, &mut out),
        Commands::Run {
            file,
            args,
            repeat,
            ir,
            json,
        } => {
            let args = commands::run::RunArgs {
                args,
                repeat,
                show_ir: ir,
                json,
            };
            commands::run::execute(&file, args, config, &mut out)
        }
        Commands::Encode { file, output } => commands::encode::execute(&file, &output, &mut out),
    }
}
