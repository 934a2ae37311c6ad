use super::parse_args;
use crate::error::{Result, ServerError};
use crate::state::AppState;
use conexus_cache::{generate_key, result_key, Metadata, ResultMetadata};
use conexus_protocol::round_score;
use conexus_search::{Classification, FusionConfig, HybridMode, Query, SearchResult, WorkContext};
use conexus_store::Filters;
use serde::Deserialize;
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DEFAULT_TOP_K: usize = 10;
const MAX_TOP_K: usize = 100;
const SNIPPET_MAX_CHARS: usize = 240;
const MAX_RETRIES: usize = 2;
/// Small multiplicative boost for results touching the caller's active or
/// recently edited files.
const WORK_CONTEXT_BOOST: f32 = 1.05;

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    top_k: Option<usize>,
    #[serde(default)]
    filters: Filters,
    hybrid_mode: Option<HybridMode>,
    work_context: Option<WorkContext>,
    profile_id: Option<String>,
    session_id: Option<String>,
}

pub async fn run(
    state: &Arc<AppState>,
    args: Value,
    cancel: &CancellationToken,
) -> Result<Value> {
    let request_echo = args.clone();
    let args: SearchArgs = parse_args(args)?;
    if let Some(top_k) = args.top_k {
        if top_k == 0 || top_k > MAX_TOP_K {
            return Err(ServerError::Validation(format!(
                "top_k must be in 1..={MAX_TOP_K}, got {top_k}"
            )));
        }
    }
    let work_context = args.work_context.clone().unwrap_or_default();

    // Profile resolution: explicit > classified > general.
    let classification = match &args.profile_id {
        Some(id) => {
            if state.profiles.get(id).is_none() {
                return Err(ServerError::Validation(format!("unknown profile: {id}")));
            }
            Classification {
                profile_id: id.clone(),
                confidence: 1.0,
                reasoning: "explicit profile".to_string(),
                alternatives: Vec::new(),
            }
        }
        None => state.classifier.classify(&args.query, &work_context),
    };
    let profile = state
        .profiles
        .get(&classification.profile_id)
        .ok_or_else(|| ServerError::Internal("classified profile vanished".to_string()))?;

    let requested = args.top_k.unwrap_or(DEFAULT_TOP_K);
    let budget_cap = profile.context_window.max_results(profile.chunking.chunk_size);
    let effective_top_k = requested.min(budget_cap).max(1);

    let connector_ids = state.connectors.active_ids();
    let cache_key = generate_key(&args.query, &args.filters, &connector_ids);
    let lookup = state.federation.get(&cache_key);
    if let Some(response) = lookup.response {
        state.metrics.cache_hits_total.inc();
        log::debug!("federation cache hit for '{}'", args.query);
        return Ok(response);
    }
    state.metrics.cache_misses_total.inc();

    let query = Query {
        text: args.query.clone(),
        filters: args.filters.clone(),
        limit: effective_top_k,
        threshold: 0.0,
        hybrid_mode: args.hybrid_mode.unwrap_or_default(),
    };
    let fusion = FusionConfig {
        rrf_k: 60.0,
        weighted_alpha: sparse_share(profile.weights.sparse, profile.weights.dense),
    };
    let timeout = Duration::from_millis(profile.timeout_ms);

    let mode_label = format!("{:?}", query.hybrid_mode).to_lowercase();
    let timer = state
        .metrics
        .search_latency_seconds
        .with_label_values(&[mode_label.as_str()])
        .start_timer();

    // Searches are idempotent: retry bounded with exponential backoff on
    // retryable dependency failures.
    let mut attempt = 0;
    let mut results = loop {
        match state
            .pipeline
            .run_with(&query, cancel, Some(timeout), Some(fusion))
            .await
        {
            Ok(results) => break results,
            Err(err) if err.is_retryable() && attempt < MAX_RETRIES => {
                attempt += 1;
                log::warn!("search attempt {attempt} failed ({err}); retrying");
                tokio::time::sleep(Duration::from_millis(50 << attempt)).await;
            }
            Err(err) => {
                timer.observe_duration();
                return Err(err.into());
            }
        }
    };
    timer.observe_duration();

    bias_toward_work_context(&mut results, &work_context);

    let rows: Vec<Value> = results.iter().map(result_row).collect();
    let response = json!({
        "query": args.query,
        "profile": {
            "profile_id": classification.profile_id,
            "confidence": round_score(classification.confidence),
            "reasoning": classification.reasoning,
        },
        "total": rows.len(),
        "results": rows,
    });

    let mut metadata = Metadata::new();
    metadata.insert("agent".to_string(), classification.profile_id.clone());
    metadata.insert("tag".to_string(), "search".to_string());
    state
        .federation
        .set(&cache_key, response.clone(), metadata, &state.connectors.fingerprint());

    let rkey = result_key(&classification.profile_id, &request_echo, &[]);
    state.results.set(
        &rkey,
        response.clone(),
        ResultMetadata {
            agent: classification.profile_id.clone(),
            request: request_echo,
            content_hash: String::new(),
            tags: vec!["search".to_string()],
        },
    );

    if let Some(session_id) = &args.session_id {
        let entry = conexus_cache::HistoryEntry {
            timestamp: now_ms(),
            user_request: args.query.clone(),
            agent: classification.profile_id.clone(),
            response: format!("{} results", results.len()),
            escalations: Vec::new(),
            duration_ms: 0,
        };
        if let Err(err) = state.sessions.add_history_entry(session_id, entry) {
            log::debug!("history append skipped: {err}");
        }
    }

    Ok(response)
}

fn sparse_share(sparse: f32, dense: f32) -> f32 {
    let total = sparse + dense;
    if total > 0.0 {
        sparse / total
    } else {
        0.3
    }
}

fn bias_toward_work_context(results: &mut [SearchResult], work_context: &WorkContext) {
    if work_context.is_empty() {
        return;
    }
    for result in results.iter_mut() {
        let Some(path) = result.document.path() else {
            continue;
        };
        let active = work_context.active_file.as_deref() == Some(path);
        let recent = work_context.recent_files.iter().any(|f| f == path);
        if active || recent {
            result.score *= WORK_CONTEXT_BOOST;
        }
    }
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.document.id.cmp(&b.document.id))
    });
}

fn result_row(result: &SearchResult) -> Value {
    let mut snippet = result.document.content.clone();
    if snippet.len() > SNIPPET_MAX_CHARS {
        let cut = snippet
            .char_indices()
            .take_while(|(idx, _)| *idx < SNIPPET_MAX_CHARS)
            .last()
            .map(|(idx, c)| idx + c.len_utf8())
            .unwrap_or(SNIPPET_MAX_CHARS);
        snippet.truncate(cut);
    }

    let mut row = json!({
        "id": result.document.id,
        "score": round_score(result.score),
        "snippet": snippet,
        "path": result.document.path(),
        "metadata": result.document.metadata,
    });
    if let Some(sparse) = result.sparse_score {
        row["sparse_score"] = json!(round_score(sparse));
    }
    if let Some(dense) = result.dense_score {
        row["dense_score"] = json!(round_score(dense));
    }
    if let Some(from) = result.reranked_from {
        row["reranked_from"] = json!(from);
    }
    row
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
