mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::replay::Confirm;

#[derive(Parser)]
#[command(
    name = "queuebyte",
    version,
    about = "Bounded, transactional queue consumer"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a consumer configuration and print its record layout
    Check {
        /// Path to consumer YAML file
        consumer: PathBuf,
    },
    /// Replay JSON-lines messages through a consumer against an in-memory broker
    Replay {
        /// Path to consumer YAML file
        consumer: PathBuf,
        /// JSON-lines file, one message per line
        #[arg(long)]
        messages: PathBuf,
        /// Downstream decision applied to every record in active-confirmation mode
        #[arg(long, value_enum, default_value_t = Confirm::Ack)]
        confirm: Confirm,
        /// Abandon the batch instead of committing it
        #[arg(long)]
        fail_batch: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Check { consumer } => commands::check::execute(&consumer),
        Commands::Replay {
            consumer,
            messages,
            confirm,
            fail_batch,
        } => commands::replay::execute(&consumer, &messages, confirm, fail_batch).await,
    }
}
