use super::parse_args;
use crate::error::{Result, ServerError};
use crate::state::AppState;
use conexus_registry::ConnectorConfig;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct ConnectorArgs {
    action: String,
    id: Option<String>,
    connector: Option<ConnectorConfig>,
}

/// `context.connector_management`: `list | add | remove | update | test`.
/// Mutations invalidate the federation cache synchronously via the new
/// fingerprint; the background fan-out then recomputes the tool registry
/// (also done inline here so single-threaded callers observe the change
/// immediately).
pub async fn run(state: &Arc<AppState>, args: Value) -> Result<Value> {
    let args: ConnectorArgs = parse_args(args)?;

    match args.action.as_str() {
        "list" => Ok(json!({ "connectors": state.connectors.list() })),
        "add" => {
            let connector = required_connector(args.connector)?;
            let id = connector.id.clone();
            state.connectors.add(connector)?;
            let fingerprint = after_mutation(state);
            Ok(json!({ "success": true, "id": id, "fingerprint": fingerprint }))
        }
        "update" => {
            let connector = required_connector(args.connector)?;
            let id = connector.id.clone();
            state.connectors.update(connector)?;
            let fingerprint = after_mutation(state);
            Ok(json!({ "success": true, "id": id, "fingerprint": fingerprint }))
        }
        "remove" => {
            let id = required_id(args.id)?;
            state.connectors.remove(&id)?;
            let fingerprint = after_mutation(state);
            Ok(json!({ "success": true, "id": id, "fingerprint": fingerprint }))
        }
        "test" => {
            let id = required_id(args.id)?;
            // Test failures surface the underlying connector error verbatim.
            state.connectors.test(&id).await?;
            Ok(json!({ "success": true, "id": id }))
        }
        other => Err(ServerError::Validation(format!(
            "unknown connector action: {other}"
        ))),
    }
}

fn required_connector(connector: Option<ConnectorConfig>) -> Result<ConnectorConfig> {
    connector.ok_or_else(|| {
        ServerError::Validation("this action requires a 'connector' object".to_string())
    })
}

fn required_id(id: Option<String>) -> Result<String> {
    id.filter(|id| !id.is_empty())
        .ok_or_else(|| ServerError::Validation("this action requires an 'id'".to_string()))
}

fn after_mutation(state: &Arc<AppState>) -> String {
    let fingerprint = state.connectors.fingerprint();
    let purged = state.federation.invalidate_by_fingerprint(&fingerprint);
    state.tools.recompute(&state.connectors.active_types());
    log::debug!("connector mutation purged {purged} federation entries");
    fingerprint
}
