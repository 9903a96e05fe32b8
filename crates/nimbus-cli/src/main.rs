//! Nimbus CLI - single entrypoint for the platform server.

mod commands;

use clap::{Parser, Subcommand};
use commands::{DoctorCommand, ServeCommand};

#[derive(Parser)]
#[command(author, version, about = "Self-hosted serverless platform", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "NIMBUS_LOG_LEVEL", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve(ServeCommand),
    /// Check database and container-engine connectivity
    Doctor(DoctorCommand),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // If RUST_LOG is set, use it directly; otherwise default every
    // workspace crate to the requested level and keep dependencies quiet.
    let filter = if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .expect("Invalid RUST_LOG environment variable")
    } else {
        let level = &cli.log_level;
        tracing_subscriber::EnvFilter::new(format!(
            "nimbus_cli={level},\
             nimbus_core={level},\
             nimbus_database={level},\
             nimbus_runtime={level},\
             nimbus_codegen={level},\
             nimbus_functions={level},\
             nimbus_auth={level},\
             tower_http=warn,\
             sqlx=warn,\
             sea_orm=warn"
        ))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .init();

    match cli.command {
        Commands::Serve(command) => command.execute(),
        Commands::Doctor(command) => command.execute(),
    }
}
