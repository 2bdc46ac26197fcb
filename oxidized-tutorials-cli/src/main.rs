use clap::{Parser, Subcommand};
use snafu::Whatever;
use tracing_subscriber::EnvFilter;

mod config;
mod corpus;
mod lm;
mod names;

/// Train and use the character-level name generator and the transformer
/// language model.
#[derive(Debug, Parser)]
#[command(name = "oxidized-tutorials", version, about)]
struct Cli {
    /// Run on the first CUDA device if available.
    #[arg(long, global = true)]
    cuda: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Character-level name generator.
    #[command(subcommand)]
    Names(names::NamesCommand),

    /// Transformer language model.
    #[command(subcommand)]
    Lm(lm::LmCommand),
}

#[snafu::report]
fn main() -> Result<(), Whatever> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let device = oxidized_tutorials::util::device::select_device(cli.cuda);

    match cli.command {
        Command::Names(command) => command.run(&device),
        Command::Lm(command) => command.run(&device),
    }
}
