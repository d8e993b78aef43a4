use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt};

mod generator;
mod lifecycle;
mod server;
mod session;
mod settings;
mod storage;

use generator::RagGenerator;
use lifecycle::LifecycleManager;
use settings::Settings;
use storage::SqliteDocumentStore;

#[derive(Debug, Parser)]
#[command(name = "sophia_gateway")]
#[command(about = "Retrieval-augmented chat gateway with two-tier session persistence", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Start {
        #[arg(long, default_value = "127.0.0.1:8000")]
        listen: String,
        /// Overrides DATABASE_URL / the default data-dir database.
        #[arg(long)]
        database_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Start { listen, database_url } => {
            let addr: SocketAddr = listen.parse()?;
            let settings = Settings::from_env();

            let pool = storage::connect(database_url.or(settings.database_url)).await?;
            let active = SqliteDocumentStore::initialize(&pool, &settings.active_store).await?;
            let archive = SqliteDocumentStore::initialize(&pool, &settings.archive_store).await?;
            let lifecycle = LifecycleManager::new(
                Arc::new(active),
                Arc::new(archive),
                Arc::new(RagGenerator::new(settings.generator)),
            );

            let metrics = PrometheusBuilder::new().install_recorder()?;
            let state = server::AppState {
                lifecycle: Arc::new(lifecycle),
                metrics: Some(metrics),
            };
            server::serve(addr, state).await?;
        }
    }
    Ok(())
}
