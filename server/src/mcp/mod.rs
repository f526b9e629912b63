//! MCP (Model Context Protocol) Server Module
//!
//! Exposes the memory tools to AI clients over stdio using JSON-RPC 2.0.
//!
//! ## Usage
//!
//! ```bash
//! engram --mode stdio --db-path ~/.engram/engram.db
//! ```

pub mod protocol;
pub mod server;
pub mod tools;
pub mod transport;

pub use protocol::*;
pub use server::McpServer;
