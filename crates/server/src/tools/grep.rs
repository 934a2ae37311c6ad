use super::parse_args;
use crate::error::Result;
use crate::state::AppState;
use conexus_store::VectorBackend;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct GrepArgs {
    pattern: String,
    include: Option<String>,
}

/// `context.grep`: regex match across indexed paths. Not cached; the
/// matched files can change under the index without a connector event.
pub async fn run(state: &Arc<AppState>, args: Value) -> Result<Value> {
    let args: GrepArgs = parse_args(args)?;

    let indexed: HashSet<String> = state
        .backend
        .list_indexed_files()
        .await
        .map_err(crate::error::ServerError::from)?
        .into_iter()
        .collect();

    let workspace = state.workspace.clone();
    let pattern = args.pattern.clone();
    let include = args.include.clone();
    let mut matches = tokio::task::spawn_blocking(move || {
        workspace.grep(&pattern, include.as_deref())
    })
    .await
    .map_err(|err| crate::error::ServerError::Internal(format!("grep task failed: {err}")))??;

    // Matches are scoped to what the index can also return, so grep and
    // search agree on the visible corpus. An empty index means nothing has
    // been ingested yet; fall through to the raw workspace in that case.
    if !indexed.is_empty() {
        matches.retain(|m| indexed.contains(&m.path));
    }

    Ok(json!({
        "matches": matches
            .iter()
            .map(|m| json!({ "path": m.path, "line": m.line, "text": m.text }))
            .collect::<Vec<Value>>(),
    }))
}
