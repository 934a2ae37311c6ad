use anyhow::{anyhow, Context, Result};
use conexus_registry::ConnectorConfig;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Environment prefix for overrides; see [`Config::apply_env_overrides`].
const ENV_PREFIX: &str = "CONEXUS_";

static ENV_VAR_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub max_entries: usize,
    pub ttl_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_entries: 1024,
            ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    pub enabled: bool,
    pub requests_per_minute: u32,
    pub burst: u32,
    pub trusted_proxies: Vec<String>,
    pub skip_paths: Vec<String>,
    pub skip_ips: Vec<String>,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: 120,
            burst: 30,
            trusted_proxies: Vec::new(),
            skip_paths: vec!["/health".to_string(), "/metrics".to_string()],
            skip_ips: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub max_concurrency: usize,
    pub timeout_secs: u64,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthProviderSection {
    pub name: String,
    pub authorize_url: String,
    pub token_url: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP listener; `None` means stdio-only operation.
    pub http_addr: Option<String>,
    /// Embedding dimension the vector backend must agree with.
    pub dimensions: usize,
    /// Base directory for persisted sessions and cache dumps.
    pub state_dir: Option<PathBuf>,
    /// Root the tool executor confines file operations to.
    pub workspace_root: PathBuf,
    pub classifier_threshold: f32,
    pub federation_cache: CacheSection,
    pub result_cache: CacheSection,
    pub session_max_inactivity_secs: u64,
    pub rate_limit: RateLimitSection,
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub connectors: Vec<ConnectorConfig>,
    #[serde(default)]
    pub oauth: Vec<OAuthProviderSection>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_addr: None,
            dimensions: 384,
            state_dir: None,
            workspace_root: PathBuf::from("."),
            classifier_threshold: 0.7,
            federation_cache: CacheSection::default(),
            result_cache: CacheSection {
                max_entries: 512,
                ttl_secs: 600,
            },
            session_max_inactivity_secs: 3600,
            rate_limit: RateLimitSection::default(),
            pipeline: PipelineSection::default(),
            connectors: Vec::new(),
            oauth: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration: defaults, then the config file (explicit path,
    /// `CONEXUS_CONFIG`, or the first of `config.json`/`config.yaml`/
    /// `config.yml` in the working directory), then `CONEXUS_*` overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match resolve_config_path(explicit) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let mut value: Value = if matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml" | "yml")
        ) {
            serde_yaml::from_str(&raw)
                .with_context(|| format!("parse YAML config {}", path.display()))?
        } else {
            serde_json::from_str(&raw)
                .with_context(|| format!("parse JSON config {}", path.display()))?
        };
        substitute_env(&mut value);
        let config: Self = serde_json::from_value(value)
            .with_context(|| format!("invalid config shape in {}", path.display()))?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(addr) = env_string("HTTP_ADDR") {
            self.http_addr = Some(addr);
        }
        if let Some(dims) = env_string("DIMENSIONS") {
            self.dimensions = dims
                .parse()
                .map_err(|_| anyhow!("{ENV_PREFIX}DIMENSIONS must be an integer, got '{dims}'"))?;
        }
        if let Some(dir) = env_string("STATE_DIR") {
            self.state_dir = Some(PathBuf::from(dir));
        }
        if let Some(root) = env_string("WORKSPACE_ROOT") {
            self.workspace_root = PathBuf::from(root);
        }
        if let Some(threshold) = env_string("CLASSIFIER_THRESHOLD") {
            self.classifier_threshold = threshold.parse().map_err(|_| {
                anyhow!("{ENV_PREFIX}CLASSIFIER_THRESHOLD must be a float, got '{threshold}'")
            })?;
        }
        if let Some(rpm) = env_string("RATE_LIMIT_RPM") {
            self.rate_limit.requests_per_minute = rpm
                .parse()
                .map_err(|_| anyhow!("{ENV_PREFIX}RATE_LIMIT_RPM must be an integer"))?;
        }
        if let Some(enabled) = env_string("RATE_LIMIT_ENABLED") {
            self.rate_limit.enabled = matches!(enabled.as_str(), "1" | "true" | "yes");
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.dimensions == 0 {
            return Err(anyhow!("dimensions must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.classifier_threshold) {
            return Err(anyhow!("classifier_threshold must be within [0, 1]"));
        }
        Ok(())
    }
}

fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = env_string("CONFIG") {
        return Some(PathBuf::from(path));
    }
    ["config.json", "config.yaml", "config.yml"]
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

fn env_string(suffix: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{suffix}"))
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Replace `${VAR}` references in every string value. Unset variables are
/// left as-is so misconfigurations are visible rather than silently empty.
fn substitute_env(value: &mut Value) {
    match value {
        Value::String(s) => {
            if ENV_VAR_REF.is_match(s) {
                let replaced = ENV_VAR_REF.replace_all(s, |caps: &regex::Captures<'_>| {
                    match std::env::var(&caps[1]) {
                        Ok(v) => v,
                        Err(_) => {
                            log::warn!("config references unset variable ${{{}}}", &caps[1]);
                            caps[0].to_string()
                        }
                    }
                });
                *s = replaced.into_owned();
            }
        }
        Value::Array(items) => {
            for item in items {
                substitute_env(item);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                substitute_env(item);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.dimensions, 384);
        assert!(config.rate_limit.enabled);
        assert!(config.rate_limit.skip_paths.contains(&"/health".to_string()));
    }

    #[test]
    fn json_config_parses_connectors() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "dimensions": 128,
                "http_addr": "127.0.0.1:8080",
                "connectors": [
                    {"id": "github", "name": "GitHub", "type": "code-host", "config": {"org": "acme"}}
                ]
            }"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.dimensions, 128);
        assert_eq!(config.connectors.len(), 1);
        assert_eq!(config.connectors[0].id, "github");
    }

    #[test]
    fn yaml_config_parses() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "dimensions: 64\nrate_limit:\n  requests_per_minute: 10\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.dimensions, 64);
        assert_eq!(config.rate_limit.requests_per_minute, 10);
    }

    #[test]
    fn env_substitution_applies_to_string_values() {
        std::env::set_var("CONEXUS_TEST_ORG", "acme-corp");
        let mut value = serde_json::json!({
            "connectors": [{"config": {"org": "${CONEXUS_TEST_ORG}", "left": "${UNSET_VAR_XYZ}"}}]
        });
        substitute_env(&mut value);
        assert_eq!(value["connectors"][0]["config"]["org"], "acme-corp");
        assert_eq!(value["connectors"][0]["config"]["left"], "${UNSET_VAR_XYZ}");
        std::env::remove_var("CONEXUS_TEST_ORG");
    }

    #[test]
    fn invalid_dimensions_are_rejected() {
        let mut config = Config::default();
        config.dimensions = 0;
        assert!(config.validate().is_err());
    }
}
