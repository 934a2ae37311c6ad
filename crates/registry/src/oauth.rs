use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

/// One-time state tokens live this long.
const STATE_TTL: Duration = Duration::from_secs(600);

#[derive(Error, Debug)]
pub enum OAuthError {
    #[error("unknown OAuth provider: {0}")]
    UnknownProvider(String),

    #[error("invalid or expired state token")]
    InvalidState,

    #[error("invalid authorize URL for provider {0}")]
    BadAuthorizeUrl(String),

    #[error("token exchange failed: {0}")]
    Exchange(String),
}

#[derive(Debug, Clone)]
pub struct OAuthProvider {
    pub name: String,
    pub authorize_url: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Exchanges an authorisation code for a token at the provider. The HTTP
/// client lives outside this crate.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    async fn exchange(
        &self,
        provider: &OAuthProvider,
        code: &str,
    ) -> std::result::Result<OAuthToken, String>;
}

struct StateEntry {
    provider: String,
    created_at: Instant,
}

/// Per-authorisation state tokens: minted once, validated at most once,
/// expired after ten minutes. Expired entries are swept on every mint.
pub struct StateStore {
    states: Mutex<HashMap<String, StateEntry>>,
    ttl: Duration,
}

impl StateStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            ttl: STATE_TTL,
        }
    }

    #[cfg(test)]
    fn with_ttl(ttl: Duration) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn mint(&self, provider: &str) -> String {
        let token = random_token();
        let mut states = self.lock();
        let ttl = self.ttl;
        states.retain(|_, entry| entry.created_at.elapsed() <= ttl);
        states.insert(
            token.clone(),
            StateEntry {
                provider: provider.to_string(),
                created_at: Instant::now(),
            },
        );
        token
    }

    /// One-time consumption: the token is removed whether or not it is
    /// accepted, so a replay can never succeed.
    pub fn consume(&self, provider: &str, token: &str) -> bool {
        let mut states = self.lock();
        let Some(entry) = states.remove(token) else {
            return false;
        };
        entry.provider == provider && entry.created_at.elapsed() <= self.ttl
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, StateEntry>> {
        self.states
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

type TokenCallback = Box<dyn Fn(&str, &OAuthToken) + Send + Sync>;
type ErrorCallback = Box<dyn Fn(&str, &str) + Send + Sync>;

/// OAuth authorisation-code flow for connector providers. The HTTP layer
/// routes `/oauth/<provider>/authorize` and `/oauth/<provider>/callback`
/// here; on success the exchanged token is handed to the registered
/// callback (which typically stores it with the connector registry).
pub struct OAuthFlow {
    providers: HashMap<String, OAuthProvider>,
    states: StateStore,
    exchanger: Arc<dyn TokenExchanger>,
    on_token: TokenCallback,
    on_error: ErrorCallback,
}

impl OAuthFlow {
    pub fn new(
        providers: Vec<OAuthProvider>,
        exchanger: Arc<dyn TokenExchanger>,
        on_token: TokenCallback,
        on_error: ErrorCallback,
    ) -> Self {
        Self {
            providers: providers
                .into_iter()
                .map(|p| (p.name.clone(), p))
                .collect(),
            states: StateStore::new(),
            exchanger,
            on_token,
            on_error,
        }
    }

    #[must_use]
    pub fn has_provider(&self, provider: &str) -> bool {
        self.providers.contains_key(provider)
    }

    #[must_use]
    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Build the provider redirect for `/oauth/<provider>/authorize`.
    pub fn authorize_redirect(&self, provider: &str) -> Result<String, OAuthError> {
        let config = self
            .providers
            .get(provider)
            .ok_or_else(|| OAuthError::UnknownProvider(provider.to_string()))?;
        let state = self.states.mint(provider);

        let mut target = Url::parse(&config.authorize_url)
            .map_err(|_| OAuthError::BadAuthorizeUrl(provider.to_string()))?;
        target
            .query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &config.client_id)
            .append_pair("redirect_uri", &config.redirect_uri)
            .append_pair("state", &state)
            .append_pair("scope", &config.scopes.join(" "));
        Ok(target.into())
    }

    /// Handle `/oauth/<provider>/callback?code=&state=`. Returns the token
    /// on success; the error callback has already fired on failure.
    pub async fn handle_callback(
        &self,
        provider: &str,
        code: &str,
        state: &str,
    ) -> Result<OAuthToken, OAuthError> {
        let result = self.complete(provider, code, state).await;
        match &result {
            Ok(token) => {
                log::info!("oauth exchange succeeded for provider {provider}");
                (self.on_token)(provider, token);
            }
            Err(err) => {
                log::warn!("oauth exchange failed for provider {provider}: {err}");
                (self.on_error)(provider, &err.to_string());
            }
        }
        result
    }

    async fn complete(
        &self,
        provider: &str,
        code: &str,
        state: &str,
    ) -> Result<OAuthToken, OAuthError> {
        let config = self
            .providers
            .get(provider)
            .ok_or_else(|| OAuthError::UnknownProvider(provider.to_string()))?;
        if !self.states.consume(provider, state) {
            return Err(OAuthError::InvalidState);
        }
        self.exchanger
            .exchange(config, code)
            .await
            .map_err(OAuthError::Exchange)
    }
}

fn random_token() -> String {
    let mut bytes = [0u8; 16];
    if getrandom::getrandom(&mut bytes).is_err() {
        // Extremely unlikely; fall back to a time-derived token rather
        // than aborting the flow.
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        bytes[..4].copy_from_slice(&nanos.to_le_bytes());
    }
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
