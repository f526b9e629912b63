//! Engram Server Entry Point
//!
//! Opens the episode store once and serves it in one of two modes:
//! - stdio (default): Model Context Protocol for AI clients
//! - http: REST API
//!
//! The `delete` subcommand removes a single episode and exits.

use anyhow::Context;
use clap::Parser;
use engram_store::{CachingEmbedder, EpisodeStore, HttpEmbedder};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use engram_server::memory::reclaim;
use engram_server::{Command, Config, MemoryService, Mode};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Logs go to stderr; stdout carries JSON-RPC in stdio mode
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Opening episode store at {:?}", config.db_path);
    let store = Arc::new(
        EpisodeStore::open(&config.db_path)
            .with_context(|| format!("failed to open store at {}", config.db_path.display()))?,
    );

    let embedder = HttpEmbedder::new(config.embedding());
    tracing::info!(
        endpoint = embedder.endpoint(),
        model = %config.embedding_model,
        "Embedding gateway configured"
    );
    let service = MemoryService::new(
        store.clone(),
        Arc::new(CachingEmbedder::new(embedder)),
        config.embed_timeout(),
    );

    // The service holds a store handle; it must be gone before close
    let outcome = run(&config, service).await;

    // Timed-out requests may still hold the store on the blocking pool
    match reclaim(store, SHUTDOWN_GRACE).await {
        Some(store) => {
            store.close().context("failed to close store")?;
            tracing::info!("Store closed");
        }
        None => tracing::warn!("Store still in use at shutdown, releasing without flush"),
    }

    outcome
}

async fn run(config: &Config, service: MemoryService) -> anyhow::Result<()> {
    match &config.command {
        Some(Command::Delete { id }) => {
            service.delete_episode(id).await?;
            println!("Deleted episode {id}");
            Ok(())
        }
        None => match config.mode {
            Mode::Stdio => engram_server::mcp::McpServer::new(service)
                .run()
                .await
                .context("MCP server failed"),
            Mode::Http => engram_server::http::serve(service, config.port)
                .await
                .context("HTTP server failed"),
        },
    }
}
