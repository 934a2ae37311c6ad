use crate::config::Config;
use crate::index::IndexState;
use crate::metrics::Metrics;
use crate::rate_limit::RateLimiter;
use crate::tool_registry::ToolRegistry;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use conexus_analyzer::{Analyzer, Workspace};
use conexus_cache::{FederationCache, FederationConfig, PersistentStore, ResultCache, ResultCacheConfig, SessionManager};
use conexus_registry::{
    ConnectorRegistry, OAuthFlow, OAuthProvider, OAuthToken, TokenExchanger,
};
use conexus_search::{
    Classifier, FusionConfig, LexicalReranker, PipelineConfig, ProfileManager, SearchPipeline,
};
use conexus_store::{Embedder, HashEmbedder, MemoryBackend, VectorBackend};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Placeholder used when OAuth providers are configured but no token
/// exchanger has been injected; the flow fails with a dependency error
/// instead of silently minting nothing.
struct UnwiredExchanger;

#[async_trait]
impl TokenExchanger for UnwiredExchanger {
    async fn exchange(
        &self,
        _provider: &OAuthProvider,
        _code: &str,
    ) -> std::result::Result<OAuthToken, String> {
        Err("no token exchanger configured".to_string())
    }
}

/// Everything a request handler can reach. Mutable state lives behind
/// per-component locks; no handler holds one across an await.
pub struct AppState {
    pub config: Config,
    pub embedder: Arc<dyn Embedder>,
    pub backend: Arc<dyn VectorBackend>,
    pub pipeline: SearchPipeline,
    pub profiles: Arc<ProfileManager>,
    pub classifier: Classifier,
    pub federation: Arc<FederationCache>,
    pub results: Arc<ResultCache>,
    pub sessions: Arc<SessionManager>,
    pub connectors: Arc<ConnectorRegistry>,
    pub tools: Arc<ToolRegistry>,
    pub limiter: RateLimiter,
    pub metrics: Metrics,
    pub index: Arc<IndexState>,
    pub oauth: Option<Arc<OAuthFlow>>,
    pub persist: Option<Arc<PersistentStore>>,
    pub workspace: Workspace,
    pub analyzer: Arc<Analyzer>,
    pub shutdown: CancellationToken,
    oauth_tokens: Arc<Mutex<HashMap<String, String>>>,
}

impl AppState {
    /// Build with the in-process reference components: hash embedder and
    /// memory backend sized from the configured dimension.
    pub fn from_config(config: Config) -> Result<Arc<Self>> {
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(config.dimensions));
        let backend: Arc<dyn VectorBackend> = Arc::new(MemoryBackend::new(config.dimensions));
        Self::with_components(config, embedder, backend, None)
    }

    pub fn with_components(
        config: Config,
        embedder: Arc<dyn Embedder>,
        backend: Arc<dyn VectorBackend>,
        exchanger: Option<Arc<dyn TokenExchanger>>,
    ) -> Result<Arc<Self>> {
        // Global invariant: the store's dimension must equal the
        // embedder's. A mismatch is a startup failure, not a warning.
        if backend.expected_dimension() != embedder.dimensions() {
            bail!(
                "embedding dimension mismatch: backend expects {}, embedder produces {}",
                backend.expected_dimension(),
                embedder.dimensions()
            );
        }

        let profiles = Arc::new(ProfileManager::new());
        let classifier =
            Classifier::new(Arc::clone(&profiles)).with_threshold(config.classifier_threshold);

        let pipeline = SearchPipeline::new(
            Arc::clone(&embedder),
            Arc::clone(&backend),
            Some(Arc::new(LexicalReranker::default())),
            PipelineConfig {
                fusion: FusionConfig::default(),
                max_concurrency: config.pipeline.max_concurrency,
                default_timeout: Duration::from_secs(config.pipeline.timeout_secs),
            },
        );

        let federation = Arc::new(FederationCache::new(FederationConfig {
            max_entries: config.federation_cache.max_entries,
            ttl: Duration::from_secs(config.federation_cache.ttl_secs),
        }));
        let results = Arc::new(ResultCache::new(ResultCacheConfig {
            max_entries: config.result_cache.max_entries,
            ttl: Duration::from_secs(config.result_cache.ttl_secs),
        }));
        let sessions = Arc::new(SessionManager::new());

        let connectors = Arc::new(ConnectorRegistry::new());
        for connector in &config.connectors {
            connectors
                .add(connector.clone())
                .with_context(|| format!("seed connector '{}'", connector.id))?;
        }

        let tools = Arc::new(ToolRegistry::new());
        tools.recompute(&connectors.active_types());

        let persist = match &config.state_dir {
            Some(dir) => Some(Arc::new(
                PersistentStore::new(dir.clone())
                    .with_context(|| format!("open state dir {}", dir.display()))?,
            )),
            None => None,
        };
        if let Some(store) = &persist {
            match store.load_sessions() {
                Ok(restored) if !restored.is_empty() => {
                    log::info!("restored {} persisted sessions", restored.len());
                    sessions.restore(restored);
                }
                Ok(_) => {}
                Err(err) => log::warn!("session restore failed: {err}"),
            }
            match store.load_cache() {
                Ok(entries) if !entries.is_empty() => {
                    log::info!("restored {} federation cache entries", entries.len());
                    federation.restore(entries);
                }
                Ok(_) => {}
                Err(err) => log::warn!("cache restore failed: {err}"),
            }
        }

        let oauth_tokens: Arc<Mutex<HashMap<String, String>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let oauth = if config.oauth.is_empty() {
            None
        } else {
            let providers: Vec<OAuthProvider> = config
                .oauth
                .iter()
                .map(|p| OAuthProvider {
                    name: p.name.clone(),
                    authorize_url: p.authorize_url.clone(),
                    token_url: p.token_url.clone(),
                    client_id: p.client_id.clone(),
                    client_secret: p.client_secret.clone(),
                    redirect_uri: p.redirect_uri.clone(),
                    scopes: p.scopes.clone(),
                })
                .collect();
            let exchanger = exchanger.unwrap_or_else(|| Arc::new(UnwiredExchanger));
            let token_sink = Arc::clone(&oauth_tokens);
            let flow = OAuthFlow::new(
                providers,
                exchanger,
                Box::new(move |provider, token| {
                    // Token values are secrets; store them, never log them.
                    if let Ok(mut tokens) = token_sink.lock() {
                        tokens.insert(provider.to_string(), token.access_token.clone());
                    }
                }),
                Box::new(|provider, error| {
                    log::warn!("oauth error for provider {provider}: {error}");
                }),
            );
            Some(Arc::new(flow))
        };

        let workspace = Workspace::new(&config.workspace_root).with_context(|| {
            format!("open workspace root {}", config.workspace_root.display())
        })?;
        let analyzer = Arc::new(Analyzer::new(workspace.clone()));

        let limiter = RateLimiter::new(&config.rate_limit);
        let metrics = Metrics::new().context("register metrics")?;

        Ok(Arc::new(Self {
            config,
            embedder,
            backend,
            pipeline,
            profiles,
            classifier,
            federation,
            results,
            sessions,
            connectors,
            tools,
            limiter,
            metrics,
            index: Arc::new(IndexState::new()),
            oauth,
            persist,
            workspace,
            analyzer,
            shutdown: CancellationToken::new(),
            oauth_tokens,
        }))
    }

    /// Background plumbing: the connector-change fan-out and periodic
    /// session cleanup. Call once after construction, inside the runtime.
    pub fn start_background(self: &Arc<Self>) {
        let state = Arc::clone(self);
        let mut events = state.connectors.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = state.shutdown.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(change) => {
                            let purged =
                                state.federation.invalidate_by_fingerprint(&change.fingerprint);
                            state.tools.recompute(&state.connectors.active_types());
                            log::debug!(
                                "connector change {:?} ({:?}): purged {purged} cache entries",
                                change.kind,
                                change.connector_ids
                            );
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            log::warn!("connector event stream lagged by {skipped}");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        let state = Arc::clone(self);
        tokio::spawn(async move {
            let max_inactivity = Duration::from_secs(state.config.session_max_inactivity_secs);
            let mut tick = tokio::time::interval(Duration::from_secs(60));
            loop {
                tokio::select! {
                    () = state.shutdown.cancelled() => break,
                    _ = tick.tick() => {
                        state.sessions.cleanup_inactive(max_inactivity);
                        state.metrics.active_sessions.set(state.sessions.active_count() as i64);
                    }
                }
            }
        });
    }

    /// Access token previously exchanged for a provider, if any.
    #[must_use]
    pub fn oauth_token(&self, provider: &str) -> Option<String> {
        self.oauth_tokens
            .lock()
            .ok()
            .and_then(|tokens| tokens.get(provider).cloned())
    }

    /// Dump sessions and federation cache entries to the state directory.
    pub fn persist_now(&self) -> Result<()> {
        let Some(store) = &self.persist else {
            return Ok(());
        };
        for session in self.sessions.snapshot() {
            store.save_session(&session)?;
        }
        store.save_cache(&self.federation.snapshot())?;
        log::info!("state persisted to {}", store.base_dir().display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conexus_registry::{ConnectorConfig, ConnectorType};
    use serde_json::json;

    fn base_config() -> Config {
        let mut config = Config::default();
        config.dimensions = 64;
        config.workspace_root = std::env::temp_dir();
        config
    }

    #[tokio::test]
    async fn dimension_mismatch_fails_startup() {
        let config = base_config();
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(64));
        let backend: Arc<dyn VectorBackend> = Arc::new(MemoryBackend::new(128));
        let err = match AppState::with_components(config, embedder, backend, None) {
            Err(e) => e,
            Ok(_) => panic!("expected dimension mismatch error"),
        };
        assert!(err.to_string().contains("dimension mismatch"));
    }

    #[tokio::test]
    async fn connector_mutation_fans_out_to_tools_and_cache() {
        let state = AppState::from_config(base_config()).unwrap();
        state.start_background();

        state.federation.set("stale", json!({"r": 1}), Default::default(), "old-fp");
        state
            .connectors
            .add(ConnectorConfig {
                id: "github".into(),
                name: "GitHub".into(),
                kind: ConnectorType::CodeHost,
                config: json!({"org": "acme"}),
            })
            .unwrap();

        // The pump runs on a background task; give it a moment.
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(state.tools.contains("code_host.search_pull_requests"));
        assert!(!state.federation.get("stale").found);
        state.shutdown.cancel();
    }

    #[tokio::test]
    async fn persistence_round_trips_through_state_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = base_config();
        config.state_dir = Some(dir.path().join("state"));

        let state = AppState::from_config(config.clone()).unwrap();
        let session = state.sessions.create("u1");
        state.federation.set("k", json!({"cached": true}), Default::default(), "fp");
        state.persist_now().unwrap();
        drop(state);

        let reloaded = AppState::from_config(config).unwrap();
        assert!(reloaded.sessions.get(&session.id).is_some());
        assert!(reloaded.federation.get("k").found);
    }
}
