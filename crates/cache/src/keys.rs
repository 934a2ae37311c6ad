use conexus_store::Filters;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Federation cache key: `SHA-256(query ‖ canonical(filters) ‖
/// sorted(connector_ids))`, hex-encoded.
///
/// Filters serialise with lexicographically sorted keys (`BTreeMap` plus
/// serde_json's ordered maps), and the connector list is sorted before
/// hashing, so the key is independent of iteration order.
#[must_use]
pub fn generate_key(query: &str, filters: &Filters, connector_ids: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical_json(&serde_json::to_value(filters).unwrap_or(Value::Null)));
    hasher.update([0u8]);
    let mut ids: Vec<&String> = connector_ids.iter().collect();
    ids.sort();
    for id in ids {
        hasher.update(id.as_bytes());
        hasher.update([0u8]);
    }
    hex(&hasher.finalize())
}

/// Result cache key: `SHA-256(agent_id ‖ request ‖ permissions)`.
#[must_use]
pub fn result_key(agent_id: &str, request: &Value, permissions: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(agent_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical_json(request));
    hasher.update([0u8]);
    for permission in permissions {
        hasher.update(permission.as_bytes());
        hasher.update([0u8]);
    }
    hex(&hasher.finalize())
}

/// Fingerprint of the active connector set: `SHA-256` over the connectors
/// sorted by ID, each contributing `id ‖ canonical(config)`. Any add,
/// remove, or config edit yields a new fingerprint.
#[must_use]
pub fn connector_fingerprint(connectors: &[(String, Value)]) -> String {
    let mut sorted: Vec<&(String, Value)> = connectors.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    for (id, config) in sorted {
        hasher.update(id.as_bytes());
        hasher.update([0u8]);
        hasher.update(canonical_json(config));
        hasher.update([0u8]);
    }
    hex(&hasher.finalize())
}

/// Content hash used for content-change invalidation of cached outputs.
#[must_use]
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex(&hasher.finalize())
}

fn canonical_json(value: &Value) -> Vec<u8> {
    // serde_json object maps are key-sorted (preserve_order is off), so
    // plain serialisation is already canonical.
    serde_json::to_vec(value).unwrap_or_default()
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
