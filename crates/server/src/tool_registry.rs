use crate::error::{Result, ServerError};
use conexus_protocol::{validate_tool_name, ToolDescriptor};
use conexus_registry::ConnectorType;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::RwLock;
use tokio::sync::broadcast;

/// Where a tool's implementation lives: a core handler, or the generic
/// connector-index search parameterised by a `source_type` filter.
#[derive(Debug, Clone)]
pub enum ToolKind {
    Core,
    Provider { source_type: String },
}

#[derive(Clone)]
struct RegisteredTool {
    descriptor: ToolDescriptor,
    kind: ToolKind,
}

/// Union of the fixed core tools and per-connector suites. Recomputed on
/// every connector change; `tools/list_changed` subscribers are notified
/// whenever the advertised list shifts.
pub struct ToolRegistry {
    tools: RwLock<BTreeMap<String, RegisteredTool>>,
    changed: broadcast::Sender<()>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        let (changed, _) = broadcast::channel(16);
        let registry = Self {
            tools: RwLock::new(BTreeMap::new()),
            changed,
        };
        {
            let mut tools = registry.write();
            for tool in core_tools() {
                tools.insert(
                    tool.name.clone(),
                    RegisteredTool {
                        descriptor: tool,
                        kind: ToolKind::Core,
                    },
                );
            }
        }
        registry
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<()> {
        self.changed.subscribe()
    }

    /// Register one tool, enforcing the dotted naming rule.
    pub fn register(&self, descriptor: ToolDescriptor, kind: ToolKind) -> Result<()> {
        validate_tool_name(&descriptor.name)
            .map_err(|err| ServerError::Validation(err.to_string()))?;
        self.write().insert(
            descriptor.name.clone(),
            RegisteredTool { descriptor, kind },
        );
        Ok(())
    }

    /// Recompute the advertised set from the active connector types.
    /// Broadcasts a change notification when the list actually shifts.
    pub fn recompute(&self, active_types: &[ConnectorType]) {
        let mut next: BTreeMap<String, RegisteredTool> = BTreeMap::new();
        for tool in core_tools() {
            next.insert(
                tool.name.clone(),
                RegisteredTool {
                    descriptor: tool,
                    kind: ToolKind::Core,
                },
            );
        }
        for kind in active_types {
            for (descriptor, source_type) in provider_suite(*kind) {
                next.insert(
                    descriptor.name.clone(),
                    RegisteredTool {
                        descriptor,
                        kind: ToolKind::Provider { source_type },
                    },
                );
            }
        }

        let changed = {
            let mut tools = self.write();
            let before: Vec<&String> = tools.keys().collect();
            let after: Vec<&String> = next.keys().collect();
            let shifted = before != after;
            if shifted {
                *tools = next;
            }
            shifted
        };
        if changed {
            log::info!("tool registry recomputed; notifying tools/list_changed");
            let _ = self.changed.send(());
        }
    }

    #[must_use]
    pub fn list(&self) -> Vec<ToolDescriptor> {
        self.read()
            .values()
            .map(|tool| tool.descriptor.clone())
            .collect()
    }

    #[must_use]
    pub fn kind(&self, name: &str) -> Option<ToolKind> {
        self.read().get(name).map(|tool| tool.kind.clone())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, RegisteredTool>> {
        self.tools
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, RegisteredTool>> {
        self.tools
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn string_prop(description: &str) -> serde_json::Value {
    json!({ "type": "string", "description": description })
}

fn core_tools() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::new(
            "context.search",
            "Hybrid search over indexed code, docs, and connector data",
            json!({
                "type": "object",
                "properties": {
                    "query": string_prop("Natural language or keyword query"),
                    "top_k": { "type": "integer", "minimum": 1, "maximum": 100 },
                    "filters": { "type": "object" },
                    "hybrid_mode": { "type": "string", "enum": ["sparse", "dense", "rrf", "weighted"] },
                    "work_context": { "type": "object" },
                    "profile_id": string_prop("Agent profile override"),
                    "session_id": string_prop("Conversation session to record into")
                },
                "required": ["query"]
            }),
        ),
        ToolDescriptor::new(
            "context.grep",
            "Regex match across indexed file paths",
            json!({
                "type": "object",
                "properties": {
                    "pattern": string_prop("Regular expression"),
                    "include": string_prop("Glob restricting matched paths")
                },
                "required": ["pattern"]
            }),
        ),
        ToolDescriptor::new(
            "context.explain",
            "Static analysis of a file or symbol with cited evidence",
            json!({
                "type": "object",
                "properties": {
                    "target": string_prop("File path or symbol name")
                },
                "required": ["target"]
            }),
        ),
        ToolDescriptor::new(
            "context.get_related_info",
            "Linked PRs, issues, commits, and files for a file or ticket",
            json!({
                "type": "object",
                "properties": {
                    "target": string_prop("File path or ticket ID")
                },
                "required": ["target"]
            }),
        ),
        ToolDescriptor::new(
            "context.index_control",
            "Inspect and drive the indexing lifecycle",
            json!({
                "type": "object",
                "properties": {
                    "action": { "type": "string", "enum": ["status", "start", "stop", "force_reindex", "reindex_paths"] },
                    "paths": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["action"]
            }),
        ),
        ToolDescriptor::new(
            "context.connector_management",
            "List, add, remove, update, or test data connectors",
            json!({
                "type": "object",
                "properties": {
                    "action": { "type": "string", "enum": ["list", "add", "remove", "update", "test"] },
                    "id": string_prop("Connector ID for remove/test"),
                    "connector": { "type": "object" }
                },
                "required": ["action"]
            }),
        ),
    ]
}

fn provider_search_schema(noun: &str) -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "query": string_prop(&format!("Query over indexed {noun}")),
            "top_k": { "type": "integer", "minimum": 1, "maximum": 50 }
        },
        "required": ["query"]
    })
}

fn provider_suite(kind: ConnectorType) -> Vec<(ToolDescriptor, String)> {
    match kind {
        ConnectorType::CodeHost => vec![
            (
                ToolDescriptor::new(
                    "code_host.search_pull_requests",
                    "Search indexed pull requests",
                    provider_search_schema("pull requests"),
                ),
                "pull_request".to_string(),
            ),
            (
                ToolDescriptor::new(
                    "code_host.search_commits",
                    "Search indexed commits",
                    provider_search_schema("commits"),
                ),
                "commit".to_string(),
            ),
        ],
        ConnectorType::Chat => vec![(
            ToolDescriptor::new(
                "chat.search_messages",
                "Search indexed chat messages",
                provider_search_schema("chat messages"),
            ),
            "message".to_string(),
        )],
        ConnectorType::Ticket => vec![(
            ToolDescriptor::new(
                "ticket.search_issues",
                "Search indexed tickets and issues",
                provider_search_schema("issues"),
            ),
            "issue".to_string(),
        )],
        ConnectorType::Docs => vec![(
            ToolDescriptor::new(
                "docs.search_pages",
                "Search indexed documentation pages",
                provider_search_schema("documentation pages"),
            ),
            "page".to_string(),
        )],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_tools_are_always_advertised() {
        let registry = ToolRegistry::new();
        let names: Vec<String> = registry.list().into_iter().map(|t| t.name).collect();
        for expected in [
            "context.search",
            "context.grep",
            "context.explain",
            "context.get_related_info",
            "context.index_control",
            "context.connector_management",
        ] {
            assert!(names.contains(&expected.to_string()), "{expected}");
        }
    }

    #[test]
    fn undotted_names_are_rejected() {
        let registry = ToolRegistry::new();
        let err = registry
            .register(
                ToolDescriptor::new("plainname", "bad", json!({})),
                ToolKind::Core,
            )
            .unwrap_err();
        assert!(matches!(err, ServerError::Validation(_)));
    }

    #[test]
    fn recompute_adds_and_removes_provider_suites() {
        let registry = ToolRegistry::new();
        let mut changes = registry.subscribe_changes();

        registry.recompute(&[ConnectorType::CodeHost]);
        assert!(registry.contains("code_host.search_pull_requests"));
        assert!(changes.try_recv().is_ok());

        registry.recompute(&[ConnectorType::Ticket]);
        assert!(!registry.contains("code_host.search_pull_requests"));
        assert!(registry.contains("ticket.search_issues"));
        assert!(changes.try_recv().is_ok());

        // No shift, no notification.
        registry.recompute(&[ConnectorType::Ticket]);
        assert!(changes.try_recv().is_err());
    }

    #[test]
    fn provider_tools_carry_their_source_type() {
        let registry = ToolRegistry::new();
        registry.recompute(&[ConnectorType::Chat]);
        match registry.kind("chat.search_messages") {
            Some(ToolKind::Provider { source_type }) => assert_eq!(source_type, "message"),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn all_advertised_names_are_dotted() {
        let registry = ToolRegistry::new();
        registry.recompute(&[
            ConnectorType::CodeHost,
            ConnectorType::Chat,
            ConnectorType::Ticket,
            ConnectorType::Docs,
        ]);
        for tool in registry.list() {
            validate_tool_name(&tool.name).unwrap();
        }
    }
}
