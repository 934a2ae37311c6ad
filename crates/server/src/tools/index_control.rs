use super::parse_args;
use crate::error::{Result, ServerError};
use crate::state::AppState;
use conexus_store::{Document, Embedder, VectorBackend};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct IndexArgs {
    action: String,
    paths: Option<Vec<String>>,
}

/// `context.index_control`: `status | start | stop | force_reindex |
/// reindex_paths`. Re-embedding runs happen on a background task driving
/// the adapter; the indexing worker proper stays external.
pub async fn run(state: &Arc<AppState>, args: Value) -> Result<Value> {
    let args: IndexArgs = parse_args(args)?;

    match args.action.as_str() {
        "status" => {}
        "stop" => {
            let stopped = state.index.request_stop();
            log::info!("index stop requested (active run: {stopped})");
        }
        "start" => {
            let files = indexed_files(state).await?;
            spawn_reindex(state, "indexing", files);
        }
        "force_reindex" => {
            let files = indexed_files(state).await?;
            spawn_reindex(state, "force-reindex", files);
        }
        "reindex_paths" => {
            let paths = args
                .paths
                .filter(|p| !p.is_empty())
                .ok_or_else(|| {
                    ServerError::Validation("reindex_paths requires a non-empty 'paths' array".to_string())
                })?;
            spawn_reindex(state, "reindex-paths", paths);
        }
        other => {
            return Err(ServerError::Validation(format!(
                "unknown index action: {other}"
            )));
        }
    }

    let status = state.index.snapshot();
    let documents = state.backend.count().await.map_err(ServerError::from)?;
    state.metrics.indexed_documents.set(documents as i64);
    Ok(json!({ "status": status, "documents": documents }))
}

async fn indexed_files(state: &Arc<AppState>) -> Result<Vec<String>> {
    state
        .backend
        .list_indexed_files()
        .await
        .map_err(ServerError::from)
}

/// Re-embed every chunk of the given files. A no-op when a run is already
/// active; `status` reflects the live run either way.
fn spawn_reindex(state: &Arc<AppState>, phase: &str, files: Vec<String>) {
    let Some(token) = state.index.try_begin(phase, files.len()) else {
        log::info!("reindex requested while another run is active; ignoring");
        return;
    };

    let state = Arc::clone(state);
    tokio::spawn(async move {
        let mut failure: Option<String> = None;
        'outer: for (done, path) in files.iter().enumerate() {
            if token.is_cancelled() {
                log::info!("reindex cancelled after {done} files");
                break;
            }
            let chunks = match state.backend.file_chunks(path).await {
                Ok(chunks) => chunks,
                Err(err) => {
                    failure = Some(err.to_string());
                    break;
                }
            };
            for chunk in chunks {
                let vector = match state.embedder.embed(&chunk.content).await {
                    Ok(vector) => vector,
                    Err(err) => {
                        failure = Some(err.to_string());
                        break 'outer;
                    }
                };
                let mut doc = Document::new(chunk.id.clone(), chunk.content.clone(), vector);
                doc.metadata = chunk.metadata.clone();
                doc.created_at = chunk.created_at;
                if let Err(err) = state.backend.upsert(doc).await {
                    failure = Some(err.to_string());
                    break 'outer;
                }
            }
            state.index.progress(done + 1);
        }
        let failed = failure.is_some();
        state.index.finish(failure);
        if !failed {
            log::info!("reindex run finished ({} files)", files.len());
        }
    });
}
