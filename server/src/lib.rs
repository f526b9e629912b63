//! Engram Server Library
//!
//! Front ends for the episode store: an MCP server over stdio for AI
//! clients and a REST API over HTTP. Both delegate to [`MemoryService`].

pub mod config;
pub mod error;
pub mod handlers;
pub mod http;
pub mod mcp;
pub mod memory;

pub use config::{Command, Config, Mode};
pub use error::{ServerError, ServerResult};
pub use memory::MemoryService;
