use crate::error::Result;
use crate::executor::Workspace;
use crate::types::{
    AgentOutputV1, CallGraphEdge, CallGraphNode, Evidence, Finding, Symbol, SymbolKind,
    AGENT_OUTPUT_VERSION,
};
use once_cell::sync::Lazy;
use petgraph::graph::{DiGraph, NodeIndex};
use regex::Regex;
use std::collections::{HashMap, HashSet};

const MAX_FINDINGS_PER_CATEGORY: usize = 32;
const MAX_SYMBOL_FILES: usize = 5;
const EXCERPT_MAX_CHARS: usize = 120;

static RUST_FN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?(?:const\s+)?(?:unsafe\s+)?fn\s+(\w+)")
        .unwrap()
});
static RUST_TYPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?(struct|enum|trait)\s+(\w+)").unwrap()
});
static PY_DEF: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*def\s+(\w+)").unwrap());
static PY_CLASS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*class\s+(\w+)").unwrap());
static JS_FN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:export\s+)?(?:async\s+)?function\s+(\w+)").unwrap());
static JS_CLASS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(?:export\s+)?class\s+(\w+)").unwrap());

struct Rule {
    regex: Regex,
    description: &'static str,
}

fn rules(table: &[(&str, &'static str)]) -> Vec<Rule> {
    table
        .iter()
        .filter_map(|(pattern, description)| {
            Regex::new(pattern).ok().map(|regex| Rule {
                regex,
                description,
            })
        })
        .collect()
}

static SIDE_EFFECT_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    rules(&[
        (r"(std|tokio)::fs::|File::(open|create)|read_to_string|write_all", "performs file I/O"),
        (r"TcpStream|TcpListener|reqwest::|hyper::|http://|https://", "performs network I/O"),
        (r"println!|eprintln!|log::(info|warn|error|debug|trace)", "writes to logs or stdout"),
        (r"env::var|std::env|os\.environ|process\.env", "reads the process environment"),
        (r"Command::new|subprocess|child_process", "spawns external processes"),
    ])
});

static STATE_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    rules(&[
        (r"\bstatic\s+[A-Z_]+|lazy_static!|Lazy::new", "holds global state"),
        (r"Mutex<|RwLock<|\.lock\(\)|\.read\(\)\s*$|\.write\(\)\s*$", "guards shared state with locks"),
        (r"Atomic(Usize|U64|I64|Bool)|fetch_add|fetch_sub", "updates atomic counters"),
        (r"self\.\w+\s*=[^=]", "mutates receiver state"),
        (r"HashMap<|BTreeMap<|\.insert\(", "maintains keyed in-memory state"),
    ])
});

static ERROR_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    rules(&[
        (r"-> .*Result<", "returns Result for fallible operations"),
        (r"\)\?|\.await\?|\?;", "propagates errors with the ? operator"),
        (r"\.unwrap\(\)|\.expect\(", "panics on unexpected values"),
        (r"match .*\bErr\b|if let Err", "branches on error values"),
        (r"\bexcept\b|\bcatch\b|\.catch\(", "catches exceptions"),
        (r"map_err|ok_or|ok_or_else|anyhow!|bail!", "converts between error types"),
    ])
});

static CONCURRENCY_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    rules(&[
        (r"tokio::spawn|thread::spawn|spawn_blocking", "spawns concurrent tasks"),
        (r"\basync fn\b", "exposes async operations"),
        (r"mpsc::|broadcast::|oneshot::|channel\(", "communicates over channels"),
        (r"\.await\b", "suspends at await points"),
        (r"Semaphore|Notify|Barrier", "coordinates tasks with sync primitives"),
    ])
});

static PATTERN_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    rules(&[
        (r"fn new\(", "constructor pattern"),
        (r"fn build\(|Builder\b", "builder pattern"),
        (r"subscribe|notify_waiters|listeners", "observer pattern"),
        (r"impl Iterator|fn next\(", "iterator pattern"),
        (r"once_cell|lazy_static|OnceLock", "lazily initialised singleton"),
        (r"#\[async_trait\]|dyn\s+\w+", "trait-object seam for pluggable implementations"),
    ])
});

static DATA_FLOW_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    rules(&[
        (r"serde_json::(to|from)_|\.to_json\(|JSON\.(parse|stringify)", "serialises or parses JSON"),
        (r"\.collect\(\)|\.map\(|\.filter\(", "transforms collections functionally"),
        (r"read_to_string|read_dir|load\(", "ingests external data"),
        (r"\.push\(|\.extend\(", "accumulates results incrementally"),
        (r"return\s+\w+|Ok\(", "produces a structured return value"),
    ])
});

static ENTRY_POINT_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    rules(&[
        (r"fn main\(|#\[tokio::main\]|__main__", "process entry point"),
        (r"^\s*pub\s+(?:async\s+)?fn\s+\w+", "public API surface"),
        (r"fn (handle|serve|run|dispatch|execute)_?\w*", "request handling entry"),
    ])
});

struct Collector {
    evidence: Vec<Evidence>,
    seen: HashSet<(String, String)>,
}

impl Collector {
    fn new() -> Self {
        Self {
            evidence: Vec::new(),
            seen: HashSet::new(),
        }
    }

    fn claim(
        &mut self,
        bucket: &mut Vec<Finding>,
        description: String,
        file: &str,
        line: usize,
        excerpt: &str,
    ) {
        if bucket.len() >= MAX_FINDINGS_PER_CATEGORY {
            return;
        }
        if !self.seen.insert((description.clone(), file.to_string())) {
            return;
        }
        let mut excerpt = excerpt.trim().to_string();
        if excerpt.len() > EXCERPT_MAX_CHARS {
            excerpt.truncate(EXCERPT_MAX_CHARS);
        }
        self.evidence.push(Evidence {
            file: file.to_string(),
            line_start: line,
            line_end: line,
            excerpt,
        });
        bucket.push(Finding {
            description,
            evidence: self.evidence.len() - 1,
        });
    }
}

/// Regex-heuristic analyser producing [`AgentOutputV1`].
pub struct Analyzer {
    workspace: Workspace,
}

impl Analyzer {
    #[must_use]
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }

    /// Explain a file path or a symbol name. Empty input yields an empty
    /// but valid output.
    pub fn explain(&self, target: &str) -> Result<AgentOutputV1> {
        let target = target.trim();
        if target.is_empty() {
            let mut output = AgentOutputV1::empty("");
            output.scope_description = "empty input".to_string();
            return Ok(output);
        }

        let (files, scope) = match self.workspace.resolve(target) {
            Ok(path) if path.is_file() => {
                (vec![target.to_string()], format!("file {target}"))
            }
            _ => {
                let files = self.files_defining_symbol(target)?;
                if files.is_empty() {
                    let mut output = AgentOutputV1::empty(target);
                    output.scope_description = format!("symbol '{target}' (no definition found)");
                    output
                        .limitations
                        .push(format!("no definition of '{target}' in the workspace"));
                    return Ok(output);
                }
                let scope = format!("symbol '{}' across {} file(s)", target, files.len());
                (files, scope)
            }
        };

        self.analyze_files(target, &files, scope)
    }

    fn files_defining_symbol(&self, symbol: &str) -> Result<Vec<String>> {
        let escaped = regex::escape(symbol);
        let pattern = format!(r"(?:fn|struct|enum|trait|class|def|function)\s+{escaped}\b");
        let matches = self.workspace.grep(&pattern, None)?;
        let mut files: Vec<String> = Vec::new();
        for hit in matches {
            if !files.contains(&hit.path) {
                files.push(hit.path);
            }
            if files.len() >= MAX_SYMBOL_FILES {
                break;
            }
        }
        Ok(files)
    }

    fn analyze_files(
        &self,
        component: &str,
        files: &[String],
        scope: String,
    ) -> Result<AgentOutputV1> {
        let mut output = AgentOutputV1::empty(component);
        output.scope_description = scope;

        let mut collector = Collector::new();
        let mut symbols: Vec<Symbol> = Vec::new();
        let mut contents: HashMap<String, String> = HashMap::new();

        for file in files {
            let content = self.workspace.read_file(file)?;
            symbols.extend(extract_symbols(file, &content));
            contents.insert(file.clone(), content);
        }

        let (nodes, edges) = build_call_graph(&symbols, &contents);
        output.call_graph_nodes = nodes;
        output.call_graph_edges = edges;

        for file in files {
            let Some(content) = contents.get(file) else {
                continue;
            };
            for (idx, line) in content.lines().enumerate() {
                let lineno = idx + 1;
                apply_rules(&ENTRY_POINT_RULES, &mut collector, &mut output.entry_points, file, lineno, line);
                apply_rules(&DATA_FLOW_RULES, &mut collector, &mut output.data_flow, file, lineno, line);
                apply_rules(&STATE_RULES, &mut collector, &mut output.state_management, file, lineno, line);
                apply_rules(&SIDE_EFFECT_RULES, &mut collector, &mut output.side_effects, file, lineno, line);
                apply_rules(&ERROR_RULES, &mut collector, &mut output.error_handling, file, lineno, line);
                apply_rules(&PATTERN_RULES, &mut collector, &mut output.patterns, file, lineno, line);
                apply_rules(&CONCURRENCY_RULES, &mut collector, &mut output.concurrency, file, lineno, line);
            }
        }

        output.overview = format!(
            "{} symbol(s), {} call edge(s) across {} file(s)",
            symbols.len(),
            output.call_graph_edges.len(),
            files.len()
        );
        output.limitations.push(
            "regex-heuristic analysis: dynamic dispatch and macro-generated code are not resolved"
                .to_string(),
        );
        output.raw_evidence = collector.evidence;
        debug_assert_eq!(output.version, AGENT_OUTPUT_VERSION);
        Ok(output)
    }
}

fn apply_rules(
    rules: &[Rule],
    collector: &mut Collector,
    bucket: &mut Vec<Finding>,
    file: &str,
    lineno: usize,
    line: &str,
) {
    for rule in rules {
        if rule.regex.is_match(line) {
            collector.claim(bucket, rule.description.to_string(), file, lineno, line);
        }
    }
}

fn extract_symbols(file: &str, content: &str) -> Vec<Symbol> {
    let mut found: Vec<(String, usize, SymbolKind)> = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let lineno = idx + 1;
        if let Some(caps) = RUST_FN.captures(line) {
            found.push((caps[1].to_string(), lineno, SymbolKind::Function));
        } else if let Some(caps) = RUST_TYPE.captures(line) {
            let kind = match &caps[1] {
                "struct" => SymbolKind::Struct,
                "enum" => SymbolKind::Enum,
                _ => SymbolKind::Trait,
            };
            found.push((caps[2].to_string(), lineno, kind));
        } else if let Some(caps) = PY_DEF.captures(line) {
            found.push((caps[1].to_string(), lineno, SymbolKind::Function));
        } else if let Some(caps) = PY_CLASS.captures(line) {
            found.push((caps[1].to_string(), lineno, SymbolKind::Class));
        } else if let Some(caps) = JS_FN.captures(line) {
            found.push((caps[1].to_string(), lineno, SymbolKind::Function));
        } else if let Some(caps) = JS_CLASS.captures(line) {
            found.push((caps[1].to_string(), lineno, SymbolKind::Class));
        }
    }

    let total_lines = content.lines().count();
    let mut symbols = Vec::with_capacity(found.len());
    for (idx, (name, line_start, kind)) in found.iter().enumerate() {
        // Approximate scope: a definition runs until the next one starts.
        let line_end = found
            .get(idx + 1)
            .map(|(_, next_start, _)| next_start.saturating_sub(1))
            .unwrap_or(total_lines)
            .max(*line_start);
        symbols.push(Symbol {
            name: name.clone(),
            file: file.to_string(),
            line_start: *line_start,
            line_end,
            kind: *kind,
        });
    }
    symbols
}

fn build_call_graph(
    symbols: &[Symbol],
    contents: &HashMap<String, String>,
) -> (Vec<CallGraphNode>, Vec<CallGraphEdge>) {
    let mut graph: DiGraph<CallGraphNode, ()> = DiGraph::new();
    let mut by_name: HashMap<&str, NodeIndex> = HashMap::new();

    for symbol in symbols {
        let idx = graph.add_node(CallGraphNode {
            symbol: symbol.name.clone(),
            file: symbol.file.clone(),
            line: symbol.line_start,
        });
        by_name.entry(symbol.name.as_str()).or_insert(idx);
    }

    let callables: Vec<&Symbol> = symbols
        .iter()
        .filter(|s| matches!(s.kind, SymbolKind::Function | SymbolKind::Method))
        .collect();

    for caller in &callables {
        let Some(content) = contents.get(&caller.file) else {
            continue;
        };
        let body: Vec<&str> = content
            .lines()
            .skip(caller.line_start) // skip the definition line itself
            .take(caller.line_end.saturating_sub(caller.line_start))
            .collect();
        let body = body.join("\n");

        for callee in &callables {
            if callee.name == caller.name {
                continue;
            }
            let call =
                Regex::new(&format!(r"\b{}\s*\(", regex::escape(&callee.name)));
            let Ok(call) = call else {
                continue;
            };
            if call.is_match(&body) {
                if let (Some(from), Some(to)) = (
                    by_name.get(caller.name.as_str()),
                    by_name.get(callee.name.as_str()),
                ) {
                    graph.add_edge(*from, *to, ());
                }
            }
        }
    }

    let nodes: Vec<CallGraphNode> = graph.node_weights().cloned().collect();
    let mut edges: Vec<CallGraphEdge> = graph
        .edge_indices()
        .filter_map(|edge| {
            let (from, to) = graph.edge_endpoints(edge)?;
            Some(CallGraphEdge {
                from: graph[from].symbol.clone(),
                to: graph[to].symbol.clone(),
                relationship: "calls".to_string(),
            })
        })
        .collect();
    edges.sort_by(|a, b| a.from.cmp(&b.from).then_with(|| a.to.cmp(&b.to)));
    edges.dedup_by(|a, b| a.from == b.from && a.to == b.to);
    (nodes, edges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn analyzer_with(source: &str) -> (TempDir, Analyzer) {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/worker.rs"), source).unwrap();
        let workspace = Workspace::new(dir.path()).unwrap();
        (dir, Analyzer::new(workspace))
    }

    const SAMPLE: &str = r#"use std::sync::Mutex;

pub fn run_job(input: &str) -> Result<String, std::io::Error> {
    let parsed = parse_input(input)?;
    store_result(&parsed);
    log::info!("job done");
    Ok(parsed)
}

fn parse_input(raw: &str) -> Result<String, std::io::Error> {
    let cleaned: String = raw.lines().map(|l| l.trim()).collect();
    Ok(cleaned)
}

fn store_result(value: &str) {
    static RESULTS: Mutex<Vec<String>> = Mutex::new(Vec::new());
    RESULTS.lock().unwrap().push(value.to_string());
}
"#;

    #[test]
    fn empty_input_is_valid_and_empty() {
        let (_dir, analyzer) = analyzer_with(SAMPLE);
        let output = analyzer.explain("").unwrap();
        assert_eq!(output.version, AGENT_OUTPUT_VERSION);
        assert!(output.raw_evidence.is_empty());
        assert!(output.entry_points.is_empty());
    }

    #[test]
    fn file_analysis_builds_call_graph() {
        let (_dir, analyzer) = analyzer_with(SAMPLE);
        let output = analyzer.explain("src/worker.rs").unwrap();

        assert_eq!(output.call_graph_nodes.len(), 3);
        let edges: Vec<(String, String)> = output
            .call_graph_edges
            .iter()
            .map(|e| (e.from.clone(), e.to.clone()))
            .collect();
        assert!(edges.contains(&("run_job".to_string(), "parse_input".to_string())));
        assert!(edges.contains(&("run_job".to_string(), "store_result".to_string())));
        assert!(!edges.contains(&("parse_input".to_string(), "run_job".to_string())));
    }

    #[test]
    fn every_claim_resolves_to_evidence() {
        let (_dir, analyzer) = analyzer_with(SAMPLE);
        let output = analyzer.explain("src/worker.rs").unwrap();

        let all = output
            .entry_points
            .iter()
            .chain(&output.data_flow)
            .chain(&output.state_management)
            .chain(&output.side_effects)
            .chain(&output.error_handling)
            .chain(&output.patterns)
            .chain(&output.concurrency);
        let mut count = 0;
        for finding in all {
            count += 1;
            let evidence = &output.raw_evidence[finding.evidence];
            assert_eq!(evidence.file, "src/worker.rs");
            assert!(evidence.line_start >= 1);
            assert!(evidence.line_end >= evidence.line_start);
            assert!(!evidence.excerpt.is_empty());
        }
        assert!(count > 0);
        assert!(output.raw_evidence.len() >= count);
    }

    #[test]
    fn detects_state_errors_and_side_effects() {
        let (_dir, analyzer) = analyzer_with(SAMPLE);
        let output = analyzer.explain("src/worker.rs").unwrap();

        let descriptions = |findings: &[Finding]| -> Vec<String> {
            findings.iter().map(|f| f.description.clone()).collect()
        };
        assert!(descriptions(&output.state_management)
            .iter()
            .any(|d| d.contains("locks") || d.contains("global state")));
        assert!(descriptions(&output.error_handling)
            .iter()
            .any(|d| d.contains("Result")));
        assert!(descriptions(&output.side_effects)
            .iter()
            .any(|d| d.contains("logs")));
    }

    #[test]
    fn symbol_target_finds_defining_file() {
        let (_dir, analyzer) = analyzer_with(SAMPLE);
        let output = analyzer.explain("parse_input").unwrap();
        assert!(output.scope_description.contains("symbol 'parse_input'"));
        assert!(!output.call_graph_nodes.is_empty());
    }

    #[test]
    fn unknown_symbol_yields_empty_output_with_limitation() {
        let (_dir, analyzer) = analyzer_with(SAMPLE);
        let output = analyzer.explain("does_not_exist").unwrap();
        assert!(output.call_graph_nodes.is_empty());
        assert!(output
            .limitations
            .iter()
            .any(|l| l.contains("does_not_exist")));
    }
}
