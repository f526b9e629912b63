//! Command-line and environment configuration

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use engram_store::EmbeddingConfig;

/// Transport the server speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// MCP over newline-delimited stdio
    Stdio,
    /// REST API over HTTP
    Http,
}

#[derive(Debug, Parser)]
#[command(name = "engram")]
#[command(about = "Episodic memory store for AI agents, served over MCP or HTTP")]
#[command(version)]
pub struct Config {
    /// Transport to serve
    #[arg(long, env = "ENGRAM_MODE", value_enum, default_value_t = Mode::Stdio)]
    pub mode: Mode,

    /// HTTP listen port
    #[arg(long, env = "ENGRAM_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Database directory
    #[arg(long, env = "ENGRAM_DB_PATH", default_value = "./engram.db")]
    pub db_path: PathBuf,

    /// Base URL of the OpenAI-compatible embedding service
    #[arg(long, env = "OLLAMA_URL", default_value = "http://localhost:11434")]
    pub embedding_url: String,

    /// Embedding model name
    #[arg(long, env = "EMBEDDING_MODEL", default_value = "nomic-embed-text")]
    pub embedding_model: String,

    /// Per-request embedding timeout
    #[arg(long, default_value_t = 5)]
    pub embed_timeout_secs: u64,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
pub enum Command {
    /// Permanently delete one episode and exit
    Delete {
        /// Episode id
        id: String,
    },
}

impl Config {
    pub fn embedding(&self) -> EmbeddingConfig {
        EmbeddingConfig {
            base_url: self.embedding_url.clone(),
            model: self.embedding_model.clone(),
        }
    }

    pub fn embed_timeout(&self) -> Duration {
        Duration::from_secs(self.embed_timeout_secs)
    }
}
