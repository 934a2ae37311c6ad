//! The core MCP tool surface plus the generic provider-suite handler.

mod connectors;
mod explain;
mod grep;
mod index_control;
mod related;
mod search;

use crate::error::{Result, ServerError};
use crate::state::AppState;
use crate::tool_registry::ToolKind;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Route one `tools/call` to its handler. Unknown tools and malformed
/// arguments are validation errors (`-32602`), never internal ones.
pub async fn call(
    state: &Arc<AppState>,
    name: &str,
    args: Value,
    cancel: &CancellationToken,
) -> Result<Value> {
    let Some(kind) = state.tools.kind(name) else {
        return Err(ServerError::Validation(format!("unknown tool: {name}")));
    };
    state.metrics.tool_calls_total.with_label_values(&[name]).inc();

    let outcome = match kind {
        ToolKind::Core => match name {
            "context.search" => search::run(state, args, cancel).await,
            "context.grep" => grep::run(state, args).await,
            "context.explain" => explain::run(state, args).await,
            "context.get_related_info" => related::run(state, args).await,
            "context.index_control" => index_control::run(state, args).await,
            "context.connector_management" => connectors::run(state, args).await,
            other => Err(ServerError::Internal(format!(
                "core tool '{other}' has no handler"
            ))),
        },
        ToolKind::Provider { source_type } => {
            related::provider_search(state, &source_type, args).await
        }
    };

    if outcome.is_err() {
        state.metrics.tool_errors_total.with_label_values(&[name]).inc();
    }
    outcome
}

pub(crate) fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T> {
    serde_json::from_value(args)
        .map_err(|err| ServerError::Validation(format!("invalid arguments: {err}")))
}
