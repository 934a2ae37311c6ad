use crate::connector::{
    ConnectorConfig, ConnectorStatus, ConnectorSummary, ConnectorTester, NoopTester,
};
use crate::error::{RegistryError, Result};
use conexus_cache::connector_fingerprint;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Updated,
    Removed,
}

/// The single event type that traverses the fan-out: connector change →
/// fingerprint recomputation → cache invalidation → tool registry
/// recompute → `tools/list_changed`.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectorChange {
    pub kind: ChangeKind,
    pub connector_ids: Vec<String>,
    pub fingerprint: String,
}

struct Entry {
    config: ConnectorConfig,
    status: ConnectorStatus,
}

/// The active connector set. Every mutation recomputes the configuration
/// fingerprint and broadcasts one [`ConnectorChange`] to subscribers.
pub struct ConnectorRegistry {
    connectors: RwLock<BTreeMap<String, Entry>>,
    events: broadcast::Sender<ConnectorChange>,
    tester: Arc<dyn ConnectorTester>,
}

impl ConnectorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::with_tester(Arc::new(NoopTester))
    }

    #[must_use]
    pub fn with_tester(tester: Arc<dyn ConnectorTester>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            connectors: RwLock::new(BTreeMap::new()),
            events,
            tester,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectorChange> {
        self.events.subscribe()
    }

    pub fn add(&self, config: ConnectorConfig) -> Result<()> {
        validate(&config)?;
        let id = config.id.clone();
        {
            let mut connectors = self.write();
            if connectors.contains_key(&id) {
                return Err(RegistryError::DuplicateConnector(id));
            }
            connectors.insert(
                id.clone(),
                Entry {
                    config,
                    status: ConnectorStatus::Active,
                },
            );
        }
        log::info!("connector added: {id}");
        self.broadcast(ChangeKind::Added, vec![id]);
        Ok(())
    }

    pub fn update(&self, config: ConnectorConfig) -> Result<()> {
        validate(&config)?;
        let id = config.id.clone();
        {
            let mut connectors = self.write();
            let entry = connectors
                .get_mut(&id)
                .ok_or_else(|| RegistryError::ConnectorNotFound(id.clone()))?;
            entry.config = config;
        }
        log::info!("connector updated: {id}");
        self.broadcast(ChangeKind::Updated, vec![id]);
        Ok(())
    }

    pub fn remove(&self, id: &str) -> Result<()> {
        {
            let mut connectors = self.write();
            if connectors.remove(id).is_none() {
                return Err(RegistryError::ConnectorNotFound(id.to_string()));
            }
        }
        log::info!("connector removed: {id}");
        self.broadcast(ChangeKind::Removed, vec![id.to_string()]);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<ConnectorConfig> {
        self.read().get(id).map(|entry| entry.config.clone())
    }

    #[must_use]
    pub fn list(&self) -> Vec<ConnectorSummary> {
        self.read()
            .values()
            .map(|entry| ConnectorSummary {
                id: entry.config.id.clone(),
                name: entry.config.name.clone(),
                kind: entry.config.kind,
                status: entry.status,
            })
            .collect()
    }

    #[must_use]
    pub fn active_ids(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    #[must_use]
    pub fn active_types(&self) -> Vec<crate::connector::ConnectorType> {
        let mut kinds: Vec<_> = self.read().values().map(|entry| entry.config.kind).collect();
        kinds.sort_by_key(crate::connector::ConnectorType::as_str);
        kinds.dedup();
        kinds
    }

    /// Probe the external system behind a connector; the underlying error
    /// is surfaced verbatim. Failures flip the stored status so `list`
    /// reflects reality.
    pub async fn test(&self, id: &str) -> Result<()> {
        let config = self
            .get(id)
            .ok_or_else(|| RegistryError::ConnectorNotFound(id.to_string()))?;
        let outcome = self.tester.test(&config).await;
        {
            let mut connectors = self.write();
            if let Some(entry) = connectors.get_mut(id) {
                entry.status = if outcome.is_ok() {
                    ConnectorStatus::Active
                } else {
                    ConnectorStatus::Error
                };
            }
        }
        outcome.map_err(RegistryError::TestFailed)
    }

    /// Fingerprint of the current connector set; changes on any add,
    /// remove, or config edit.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let pairs: Vec<(String, serde_json::Value)> = self
            .read()
            .values()
            .map(|entry| (entry.config.id.clone(), entry.config.config.clone()))
            .collect();
        connector_fingerprint(&pairs)
    }

    fn broadcast(&self, kind: ChangeKind, connector_ids: Vec<String>) {
        let change = ConnectorChange {
            kind,
            connector_ids,
            fingerprint: self.fingerprint(),
        };
        // No receivers is fine (e.g. during startup).
        let _ = self.events.send(change);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Entry>> {
        self.connectors
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Entry>> {
        self.connectors
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn validate(config: &ConnectorConfig) -> Result<()> {
    if config.id.is_empty()
        || !config
            .id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(RegistryError::InvalidConnector(format!(
            "id '{}' must be non-empty [A-Za-z0-9_-]",
            config.id
        )));
    }
    if config.name.is_empty() {
        return Err(RegistryError::InvalidConnector(
            "name must not be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::ConnectorType;
    use async_trait::async_trait;
    use serde_json::json;

    fn connector(id: &str, kind: ConnectorType) -> ConnectorConfig {
        ConnectorConfig {
            id: id.to_string(),
            name: format!("{id} connector"),
            kind,
            config: json!({"org": "acme"}),
        }
    }

    #[test]
    fn add_update_remove_bump_fingerprint_and_notify() {
        let registry = ConnectorRegistry::new();
        let mut events = registry.subscribe();

        let empty_fp = registry.fingerprint();
        registry.add(connector("github", ConnectorType::CodeHost)).unwrap();
        let after_add = registry.fingerprint();
        assert_ne!(empty_fp, after_add);

        let change = events.try_recv().unwrap();
        assert_eq!(change.kind, ChangeKind::Added);
        assert_eq!(change.connector_ids, vec!["github".to_string()]);
        assert_eq!(change.fingerprint, after_add);

        let mut updated = connector("github", ConnectorType::CodeHost);
        updated.config = json!({"org": "other"});
        registry.update(updated).unwrap();
        let after_update = registry.fingerprint();
        assert_ne!(after_add, after_update);
        assert_eq!(events.try_recv().unwrap().kind, ChangeKind::Updated);

        registry.remove("github").unwrap();
        assert_eq!(registry.fingerprint(), empty_fp);
        assert_eq!(events.try_recv().unwrap().kind, ChangeKind::Removed);
    }

    #[test]
    fn duplicate_and_missing_ids_error() {
        let registry = ConnectorRegistry::new();
        registry.add(connector("jira", ConnectorType::Ticket)).unwrap();
        assert!(matches!(
            registry.add(connector("jira", ConnectorType::Ticket)),
            Err(RegistryError::DuplicateConnector(_))
        ));
        assert!(matches!(
            registry.remove("missing"),
            Err(RegistryError::ConnectorNotFound(_))
        ));
        assert!(matches!(
            registry.update(connector("missing", ConnectorType::Chat)),
            Err(RegistryError::ConnectorNotFound(_))
        ));
    }

    #[test]
    fn invalid_ids_are_rejected() {
        let registry = ConnectorRegistry::new();
        let mut bad = connector("ok", ConnectorType::Chat);
        bad.id = "../evil".to_string();
        assert!(matches!(
            registry.add(bad),
            Err(RegistryError::InvalidConnector(_))
        ));
    }

    #[test]
    fn active_types_deduplicate() {
        let registry = ConnectorRegistry::new();
        registry.add(connector("gh1", ConnectorType::CodeHost)).unwrap();
        registry.add(connector("gh2", ConnectorType::CodeHost)).unwrap();
        registry.add(connector("slack", ConnectorType::Chat)).unwrap();
        assert_eq!(
            registry.active_types(),
            vec![ConnectorType::Chat, ConnectorType::CodeHost]
        );
    }

    struct FailingTester;

    #[async_trait]
    impl ConnectorTester for FailingTester {
        async fn test(&self, _config: &ConnectorConfig) -> std::result::Result<(), String> {
            Err("connection refused".to_string())
        }
    }

    #[tokio::test]
    async fn test_surfaces_underlying_error_and_flips_status() {
        let registry = ConnectorRegistry::with_tester(Arc::new(FailingTester));
        registry.add(connector("gitlab", ConnectorType::CodeHost)).unwrap();

        let err = registry.test("gitlab").await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));

        let listed = registry.list();
        assert_eq!(listed[0].status, ConnectorStatus::Error);
    }
}
