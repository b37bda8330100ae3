//! graphdump - streaming property-graph export
//!
//! Exports every node and relationship of a graph database into one JSON
//! Lines file, with a manifest on the first line.
//!
//! # Usage
//!
//! ```bash
//! graphdump http://localhost:7474 -d neo4j -u neo4j -p secret -o ./exports
//! ```

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use graphdump::cli::CliInterface;
use graphdump::error::Result;
use graphdump::{ExportCoordinator, HttpGraphSource};

/// Application entry point
#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

/// Main application logic
///
/// 1. Parse command-line arguments and load configuration
/// 2. Initialize logging
/// 3. Handle subcommands or run the export
///
/// # Returns
/// * `Result<()>` - Success or error
async fn run() -> Result<()> {
    let cli = CliInterface::new()?;
    initialize_logging(&cli);

    if cli.handle_subcommand()? {
        return Ok(());
    }

    let config = cli.config().clone();
    let source = Arc::new(HttpGraphSource::new(&config.connection)?);
    info!(
        "Connecting to {} (database '{}')",
        cli.sanitized_endpoint(),
        config.connection.database
    );

    let cancel_token = CancellationToken::new();
    let ctrl_c_token = cancel_token.clone();
    let ctrl_c_handle = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, stopping export");
                ctrl_c_token.cancel();
            }
            Err(err) => eprintln!("Failed to listen for Ctrl+C: {}", err),
        }
    });

    let result = ExportCoordinator::new(source, config)
        .with_cancellation(cancel_token)
        .execute()
        .await;
    ctrl_c_handle.abort();

    let summary = result?;
    println!("{}", summary.path.display());
    if summary.error_count > 0 {
        eprintln!(
            "Export finished with {} errors and {} warnings, see the end of the file",
            summary.error_count, summary.warning_count
        );
    }
    Ok(())
}

/// Initialize logging system based on verbosity level
///
/// `RUST_LOG` takes precedence over the configured level. Logs go to stderr;
/// stdout only carries the path of the finished export.
///
/// # Arguments
/// * `cli` - CLI interface with the effective configuration
fn initialize_logging(cli: &CliInterface) {
    let level = cli.config().logging.level.to_tracing_level();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if cli.config().logging.timestamps {
        subscriber.init();
    } else {
        subscriber.without_time().init();
    }
}
