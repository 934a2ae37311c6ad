use serde::Serialize;

pub const AGENT_OUTPUT_VERSION: &str = "AGENT_OUTPUT_V1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Method,
    Struct,
    Enum,
    Trait,
    Class,
    Module,
    Constant,
}

/// A named definition located in the analysed scope.
#[derive(Debug, Clone, Serialize)]
pub struct Symbol {
    pub name: String,
    pub file: String,
    pub line_start: usize,
    pub line_end: usize,
    pub kind: SymbolKind,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallGraphNode {
    pub symbol: String,
    pub file: String,
    pub line: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallGraphEdge {
    pub from: String,
    pub to: String,
    pub relationship: String,
}

/// One analyser claim, tied to the evidence entry that backs it.
#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub description: String,
    pub evidence: usize,
}

/// Source citation: file plus 1-based inclusive line range.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Evidence {
    pub file: String,
    pub line_start: usize,
    pub line_end: usize,
    pub excerpt: String,
}

/// Structured output of `context.explain`. Every claim in the finding
/// lists resolves through its `evidence` index into `raw_evidence`; empty
/// inputs produce an empty but valid value.
#[derive(Debug, Clone, Serialize)]
pub struct AgentOutputV1 {
    pub version: &'static str,
    pub component_name: String,
    pub scope_description: String,
    pub overview: String,
    pub entry_points: Vec<Finding>,
    pub call_graph_nodes: Vec<CallGraphNode>,
    pub call_graph_edges: Vec<CallGraphEdge>,
    pub data_flow: Vec<Finding>,
    pub state_management: Vec<Finding>,
    pub side_effects: Vec<Finding>,
    pub error_handling: Vec<Finding>,
    pub patterns: Vec<Finding>,
    pub concurrency: Vec<Finding>,
    pub limitations: Vec<String>,
    pub raw_evidence: Vec<Evidence>,
}

impl AgentOutputV1 {
    #[must_use]
    pub fn empty(component_name: impl Into<String>) -> Self {
        Self {
            version: AGENT_OUTPUT_VERSION,
            component_name: component_name.into(),
            scope_description: String::new(),
            overview: String::new(),
            entry_points: Vec::new(),
            call_graph_nodes: Vec::new(),
            call_graph_edges: Vec::new(),
            data_flow: Vec::new(),
            state_management: Vec::new(),
            side_effects: Vec::new(),
            error_handling: Vec::new(),
            patterns: Vec::new(),
            concurrency: Vec::new(),
            limitations: Vec::new(),
            raw_evidence: Vec::new(),
        }
    }
}
