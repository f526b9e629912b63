//! Request types shared by the MCP and HTTP adapters.

pub mod memory;

pub use memory::*;
