use super::parse_args;
use crate::error::{Result, ServerError};
use crate::state::AppState;
use conexus_cache::{content_hash, result_key, ResultMetadata};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct ExplainArgs {
    #[serde(default)]
    target: String,
}

/// `context.explain`: static analysis of a file or symbol, cached by the
/// content hash of what was analysed so edits invalidate stale outputs.
pub async fn run(state: &Arc<AppState>, args: Value) -> Result<Value> {
    let args: ExplainArgs = parse_args(args)?;

    // Hash the analysed material when the target is a readable file,
    // otherwise the target itself.
    let source_hash = match state.workspace.read_file(&args.target) {
        Ok(content) => content_hash(&content),
        Err(_) => content_hash(&args.target),
    };

    let request = json!({ "target": args.target, "hash": source_hash });
    let cache_key = result_key("explain", &request, &[]);
    if let Some(cached) = state.results.get(&cache_key) {
        log::debug!("explain cache hit for '{}'", args.target);
        return Ok(cached);
    }

    let analyzer = Arc::clone(&state.analyzer);
    let target = args.target.clone();
    let output = tokio::task::spawn_blocking(move || analyzer.explain(&target))
        .await
        .map_err(|err| ServerError::Internal(format!("explain task failed: {err}")))??;

    let response = serde_json::to_value(&output)
        .map_err(|err| ServerError::Internal(format!("serialise explain output: {err}")))?;
    state.results.set(
        &cache_key,
        response.clone(),
        ResultMetadata {
            agent: "explain".to_string(),
            request,
            content_hash: source_hash,
            tags: vec!["explain".to_string()],
        },
    );
    Ok(response)
}
