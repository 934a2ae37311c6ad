//! # Conexus Server
//!
//! The protocol front end: a JSON-RPC 2.0 dispatcher over line-framed
//! stdio and HTTP, rate limiting, the dynamic tool registry, and the core
//! MCP tool handlers wired to the retrieval and caching engine.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod index;
pub mod metrics;
pub mod rate_limit;
pub mod state;
pub mod tool_registry;
pub mod tools;

pub use config::Config;
pub use error::{Result, ServerError};
pub use state::AppState;
