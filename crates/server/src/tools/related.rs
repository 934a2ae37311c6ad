use super::parse_args;
use crate::error::{Result, ServerError};
use crate::state::AppState;
use conexus_protocol::round_score;
use conexus_store::{Filters, SearchOptions, SearchResult, VectorBackend};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

const RELATED_POOL: usize = 24;
const PROVIDER_DEFAULT_TOP_K: usize = 10;
const PROVIDER_MAX_TOP_K: usize = 50;
const SNIPPET_MAX_CHARS: usize = 200;

#[derive(Debug, Deserialize)]
struct RelatedArgs {
    target: String,
}

/// `context.get_related_info`: linked documents for a file or ticket,
/// harvested from connector indices and grouped by source type.
pub async fn run(state: &Arc<AppState>, args: Value) -> Result<Value> {
    let args: RelatedArgs = parse_args(args)?;
    if args.target.trim().is_empty() {
        return Err(ServerError::Validation("target must not be empty".to_string()));
    }

    let opts = SearchOptions::new(RELATED_POOL);
    let hits = state
        .backend
        .search_bm25(&args.target, &opts)
        .await
        .map_err(ServerError::from)?;

    let mut pull_requests = Vec::new();
    let mut issues = Vec::new();
    let mut commits = Vec::new();
    let mut related_files = Vec::new();

    for hit in &hits {
        if hit.document.path() == Some(args.target.as_str()) {
            continue; // the target itself is not "related"
        }
        let row = row(hit);
        match hit
            .document
            .metadata
            .get("source_type")
            .and_then(Value::as_str)
        {
            Some("pull_request") => pull_requests.push(row),
            Some("issue") => issues.push(row),
            Some("commit") => commits.push(row),
            _ => related_files.push(row),
        }
    }

    Ok(json!({
        "target": args.target,
        "pull_requests": pull_requests,
        "issues": issues,
        "commits": commits,
        "related_files": related_files,
    }))
}

#[derive(Debug, Deserialize)]
struct ProviderArgs {
    query: String,
    top_k: Option<usize>,
}

/// Handler behind every per-connector suite tool: sparse search over the
/// connector's slice of the index (`source_type` filter).
pub async fn provider_search(
    state: &Arc<AppState>,
    source_type: &str,
    args: Value,
) -> Result<Value> {
    let args: ProviderArgs = parse_args(args)?;
    let top_k = args.top_k.unwrap_or(PROVIDER_DEFAULT_TOP_K);
    if top_k == 0 || top_k > PROVIDER_MAX_TOP_K {
        return Err(ServerError::Validation(format!(
            "top_k must be in 1..={PROVIDER_MAX_TOP_K}, got {top_k}"
        )));
    }

    let mut filters = Filters::new();
    filters.insert("source_type".to_string(), json!(source_type));
    let opts = SearchOptions::new(top_k).with_filters(filters);

    let hits = state
        .backend
        .search_bm25(&args.query, &opts)
        .await
        .map_err(ServerError::from)?;

    Ok(json!({
        "source_type": source_type,
        "total": hits.len(),
        "results": hits.iter().map(row).collect::<Vec<Value>>(),
    }))
}

fn row(hit: &SearchResult) -> Value {
    let mut snippet = hit.document.content.clone();
    if snippet.len() > SNIPPET_MAX_CHARS {
        let cut = snippet
            .char_indices()
            .take_while(|(idx, _)| *idx < SNIPPET_MAX_CHARS)
            .last()
            .map(|(idx, c)| idx + c.len_utf8())
            .unwrap_or(SNIPPET_MAX_CHARS);
        snippet.truncate(cut);
    }
    json!({
        "id": hit.document.id,
        "score": round_score(hit.score),
        "snippet": snippet,
        "path": hit.document.path(),
        "metadata": hit.document.metadata,
    })
}
