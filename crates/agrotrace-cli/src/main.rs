use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use agrotrace_ingest::{Ingestor, RefreshConfig};
use agrotrace_store::MemoryStore;

#[derive(Debug, Parser)]
#[command(name = "agrotrace-cli")]
#[command(about = "Agrotrace compliance monitor command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP API server.
    Serve,
    /// One-shot compliance check of a single property identifier.
    Check {
        identifier: String,
        #[arg(long, default_value = "cli")]
        workspace: String,
    },
    /// One-shot producer-level check of a supplier tax id.
    Supplier {
        tax_id: String,
        #[arg(long, default_value = "cli")]
        workspace: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            agrotrace_web::serve_from_env().await?;
        }
        Commands::Check {
            identifier,
            workspace,
        } => {
            let config = RefreshConfig::from_env();
            let store = Arc::new(MemoryStore::new());
            let ingestor = Ingestor::new(&config, store)?;
            ingestor
                .register_property(&identifier, &workspace, None)
                .await?;
            let summary = ingestor.refresh_property(&identifier).await?;
            println!(
                "check complete: identifier={} esg={} eudr_refreshed={} cultures={} polygon={} alerts={}",
                summary.identifier,
                summary.esg_status.as_upstream(),
                summary.eudr_refreshed,
                summary.cultures_refreshed,
                summary.polygon_fetched,
                summary.alerts_emitted
            );
        }
        Commands::Supplier { tax_id, workspace } => {
            let config = RefreshConfig::from_env();
            let store = Arc::new(MemoryStore::new());
            let ingestor = Ingestor::new(&config, store)?;
            ingestor
                .register_supplier(&tax_id, &workspace, None)
                .await?;
            let summary = ingestor.refresh_supplier(&tax_id).await?;
            println!(
                "supplier check complete: tax_id={} status={} alerts={}",
                summary.tax_id,
                summary.status.as_upstream(),
                summary.alerts_emitted
            );
        }
    }

    Ok(())
}
