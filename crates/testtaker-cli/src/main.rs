//! testtaker CLI — take a timed exam attempt from the terminal.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "testtaker", version, about = "Timed exam attempt client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start or resume an attempt against the configured backend
    Take {
        /// Test to take
        #[arg(long)]
        test_id: String,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Take a test offline from a TOML fixture
    Demo {
        /// Path to the fixture file
        #[arg(long)]
        fixture: PathBuf,

        /// Countdown tick length in milliseconds
        #[arg(long, default_value = "1000")]
        tick_ms: u64,

        /// Questions per page
        #[arg(long, default_value = "1")]
        page_size: u32,
    },

    /// Show recorded attempts, or the server-side status of one
    Status {
        /// Test to query; lists every recorded attempt when omitted
        #[arg(long)]
        test_id: Option<String>,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Forget the recorded attempt for a test
    Forget {
        #[arg(long)]
        test_id: String,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Create starter config and sample fixture
    Init,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("testtaker=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Take { test_id, config } => commands::take::execute(test_id, config).await,
        Commands::Demo {
            fixture,
            tick_ms,
            page_size,
        } => commands::demo::execute(fixture, tick_ms, page_size).await,
        Commands::Status { test_id, config } => commands::status::execute(test_id, config).await,
        Commands::Forget { test_id, config } => commands::forget::execute(test_id, config),
        Commands::Init => commands::init::execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
    // A pending stdin read would otherwise keep the runtime from shutting down.
    process::exit(0);
}
