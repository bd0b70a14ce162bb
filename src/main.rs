use clap::{Parser, Subcommand};

mod cli;

use cli::check::{cmd_check, CheckArgs};
use cli::dispatch::{cmd_dispatch, DispatchArgs};
use cli::generate::{cmd_generate, GenArgs};

#[derive(Parser)]
#[command(
    name = "xpuwrap",
    version,
    about = "XPU wrapper code generator and fused-op dispatch"
)]
struct Cli {
    /// Log generation steps to stderr (overridden by RUST_LOG / XPUWRAP_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate the Python wrapper module for a .wir program
    Gen(GenArgs),
    /// Parse and validate a .wir program without generating code
    Check(CheckArgs),
    /// Resolve a fused-op kernel for a device family
    Dispatch(DispatchArgs),
}

fn main() {
    let cli = Cli::parse();
    xpuwrap::logging::init(cli.verbose);

    match cli.command {
        Command::Gen(args) => cmd_generate(args),
        Command::Check(args) => cmd_check(args),
        Command::Dispatch(args) => cmd_dispatch(args),
    }
}
