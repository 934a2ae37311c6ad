//! # Conexus Analyzer
//!
//! Static heuristics behind `context.explain`: symbol extraction, a call
//! graph over the analysed scope, and pattern/side-effect/concurrency
//! findings, every one of them backed by a `raw_evidence` entry pointing
//! at a file and line range. Also hosts the permission-checked tool
//! executor (read, glob, list, grep) the analyser and grep handler share.

mod analyzer;
mod error;
mod executor;
mod types;

pub use analyzer::Analyzer;
pub use error::{AnalyzerError, Result};
pub use executor::{GrepMatch, Workspace};
pub use types::{
    AgentOutputV1, CallGraphEdge, CallGraphNode, Evidence, Finding, Symbol, SymbolKind,
    AGENT_OUTPUT_VERSION,
};
