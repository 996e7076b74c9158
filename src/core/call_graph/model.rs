// src/core/call_graph/model.rs - call graph data model
use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::core::languages::LeafKind;

/// How a call site's target was classified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    ResolvedProject,
    IgnoredBuiltin,
    IgnoredStdlib,
    IgnoredThirdParty,
    Unresolved,
    Ambiguous,
}

impl ResolutionStatus {
    /// Short label used for synthesized external participants
    pub fn label(self) -> &'static str {
        match self {
            ResolutionStatus::ResolvedProject => "project",
            ResolutionStatus::IgnoredBuiltin => "builtin",
            ResolutionStatus::IgnoredStdlib => "stdlib",
            ResolutionStatus::IgnoredThirdParty => "third_party",
            ResolutionStatus::Unresolved => "unresolved",
            ResolutionStatus::Ambiguous => "ambiguous",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Function,
    Method,
    Class,
    External,
    Builtin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallType {
    Direct,      // foo()
    Method,      // obj.foo(), self.foo(), ptr->foo()
    Static,      // Foo::bar(), ns::bar()
    Constructor, // Foo(), new Foo()
    BranchCall,  // any call made from inside a branch
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    Full,
    Lazy,
}

impl std::str::FromStr for ExtractionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(ExtractionMode::Full),
            "lazy" => Ok(ExtractionMode::Lazy),
            other => Err(format!("unknown extraction mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    IfElse,
    MatchCase,
    TryExcept,
    Ternary,
}

impl DecisionType {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionType::IfElse => "if_else",
            DecisionType::MatchCase => "match_case",
            DecisionType::TryExcept => "try_except",
            DecisionType::Ternary => "ternary",
        }
    }
}

/// A function, method or class reached from the entry point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallNode {
    pub id: String,
    pub name: String,
    pub qualified_name: String,
    pub file_path: Option<String>,
    pub line: Option<usize>,
    pub column: Option<usize>,
    pub kind: NodeKind,
    pub class_name: Option<String>,
    pub is_entry_point: bool,
    pub depth: usize,
    pub docstring: Option<String>,
    pub resolution_status: ResolutionStatus,
    pub complexity: Option<u32>,
    pub loc: Option<u32>,
    pub branch_id: Option<String>,
    pub decision_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallEdge {
    /// Calling node, or the decision node for calls inside a branch
    pub source_id: String,
    pub target_id: String,
    pub call_site_line: usize,
    pub call_type: CallType,
    pub arguments: Option<String>,
    pub branch_id: Option<String>,
    pub decision_id: Option<String>,
}

impl CallEdge {
    /// Identity used to keep edge insertion idempotent
    pub fn key(&self) -> String {
        format!(
            "{}->{}@{}#{}",
            self.source_id,
            self.target_id,
            self.call_site_line,
            self.branch_id.as_deref().unwrap_or("")
        )
    }
}

/// One arm of a decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchInfo {
    pub branch_id: String,
    pub label: String,
    pub condition: Option<String>,
    pub is_expanded: bool,
    pub call_count: usize,
    pub start_line: usize,
    pub end_line: usize,
}

/// A control-flow branch point inside a function body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionNode {
    pub id: String,
    pub decision_type: DecisionType,
    pub condition: String,
    /// Function whose body contains the decision
    pub call_id: String,
    pub file_path: String,
    pub line: usize,
    pub column: usize,
    pub depth: usize,
    pub branches: Vec<BranchInfo>,
}

impl DecisionNode {
    pub fn make_id(file: &str, line: usize, decision_type: DecisionType) -> String {
        format!("decision:{}:{}:{}", file, line, decision_type.as_str())
    }

    pub fn branch_id(decision_id: &str, index: usize) -> String {
        format!("{}:branch:{}", decision_id, index)
    }

    pub fn branch(&self, branch_id: &str) -> Option<&BranchInfo> {
        self.branches.iter().find(|b| b.branch_id == branch_id)
    }
}

/// A return statement inside an expanded branch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnNode {
    pub id: String,
    pub value: Option<String>,
    pub line: usize,
    /// Function that returns
    pub parent_call_id: String,
    pub branch_id: String,
    pub decision_id: String,
}

/// break/continue/pass/raise/assignment inside an expanded branch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementNode {
    pub id: String,
    pub statement_type: LeafKind,
    pub text: String,
    pub line: usize,
    pub parent_call_id: String,
    pub branch_id: String,
    pub decision_id: String,
}

/// A classified non-project call inside an expanded branch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalCallNode {
    pub id: String,
    pub name: String,
    pub expression: String,
    pub resolution_status: ResolutionStatus,
    pub module_hint: Option<String>,
    pub line: usize,
    pub parent_call_id: String,
    pub branch_id: String,
    pub decision_id: String,
}

/// A call whose target was not materialized as a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IgnoredCall {
    pub expression: String,
    pub status: ResolutionStatus,
    pub call_site_line: usize,
    pub module_hint: Option<String>,
    pub caller_id: String,
    pub branch_id: Option<String>,
    pub decision_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// A call back into a function already on the current path
    Cycle { path: Vec<String> },
    /// An imported file could not be read or parsed
    CrossFileReadFailure { path: String, message: String },
    /// A requested branch id matched nothing in the current parse
    BranchNotFound { branch_id: String },
}

/// Call-flow graph rooted at one entry point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallGraph {
    pub entry_point: String,
    pub nodes: IndexMap<String, CallNode>,
    pub edges: Vec<CallEdge>,
    pub decision_nodes: IndexMap<String, DecisionNode>,
    pub return_nodes: IndexMap<String, ReturnNode>,
    pub statement_nodes: IndexMap<String, StatementNode>,
    pub external_nodes: IndexMap<String, ExternalCallNode>,
    pub max_depth: usize,
    pub max_depth_reached: bool,
    pub unresolved_calls: Vec<String>,
    pub ignored_calls: Vec<IgnoredCall>,
    pub extraction_mode: ExtractionMode,
    pub unexpanded_branches: Vec<String>,
    pub diagnostics: Vec<Diagnostic>,
}

impl CallGraph {
    pub fn new(entry_point: impl Into<String>, max_depth: usize, extraction_mode: ExtractionMode) -> Self {
        Self {
            entry_point: entry_point.into(),
            nodes: IndexMap::new(),
            edges: Vec::new(),
            decision_nodes: IndexMap::new(),
            return_nodes: IndexMap::new(),
            statement_nodes: IndexMap::new(),
            external_nodes: IndexMap::new(),
            max_depth,
            max_depth_reached: false,
            unresolved_calls: Vec::new(),
            ignored_calls: Vec::new(),
            extraction_mode,
            unexpanded_branches: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Insert a node unless one with the same id exists; returns whether it was new
    pub fn add_node(&mut self, node: CallNode) -> bool {
        if self.nodes.contains_key(&node.id) {
            return false;
        }
        self.nodes.insert(node.id.clone(), node);
        true
    }

    /// Append an edge unless an identical one is already present
    pub fn add_edge(&mut self, edge: CallEdge) -> bool {
        let key = edge.key();
        if self.edges.iter().any(|e| e.key() == key) {
            return false;
        }
        self.edges.push(edge);
        true
    }

    pub fn add_decision(&mut self, decision: DecisionNode) -> bool {
        if self.decision_nodes.contains_key(&decision.id) {
            return false;
        }
        self.decision_nodes.insert(decision.id.clone(), decision);
        true
    }

    pub fn entry_node(&self) -> Option<&CallNode> {
        self.nodes.get(&self.entry_point)
    }

    /// Edges leaving `source_id`, ordered by call-site line
    pub fn outgoing(&self, source_id: &str) -> Vec<&CallEdge> {
        let mut edges: Vec<&CallEdge> = self.edges.iter().filter(|e| e.source_id == source_id).collect();
        edges.sort_by_key(|e| e.call_site_line);
        edges
    }

    pub fn incoming(&self, target_id: &str) -> Vec<&CallEdge> {
        self.edges.iter().filter(|e| e.target_id == target_id).collect()
    }

    /// Decisions owned by a function, ordered by line
    pub fn decisions_of(&self, call_id: &str) -> Vec<&DecisionNode> {
        let mut decisions: Vec<&DecisionNode> = self
            .decision_nodes
            .values()
            .filter(|d| d.call_id == call_id)
            .collect();
        decisions.sort_by_key(|d| d.line);
        decisions
    }

    /// Find the decision that owns `branch_id`
    pub fn decision_for_branch(&self, branch_id: &str) -> Option<&DecisionNode> {
        self.decision_nodes.values().find(|d| d.branch(branch_id).is_some())
    }

    pub fn has_cycles(&self) -> bool {
        self.diagnostics.iter().any(|d| matches!(d, Diagnostic::Cycle { .. }))
    }

    /// Everything in `self` that is absent from `baseline`.
    ///
    /// Used to report only what a branch expansion added.
    pub fn difference(&self, baseline: &CallGraph) -> CallGraph {
        let mut partial = CallGraph::new(self.entry_point.clone(), self.max_depth, self.extraction_mode);

        for (id, node) in &self.nodes {
            if !baseline.nodes.contains_key(id) {
                partial.nodes.insert(id.clone(), node.clone());
            }
        }

        let baseline_edges: HashSet<String> = baseline.edges.iter().map(CallEdge::key).collect();
        partial.edges = self
            .edges
            .iter()
            .filter(|e| !baseline_edges.contains(&e.key()))
            .cloned()
            .collect();

        for (id, decision) in &self.decision_nodes {
            match baseline.decision_nodes.get(id) {
                Some(previous) if previous == decision => {}
                _ => {
                    partial.decision_nodes.insert(id.clone(), decision.clone());
                }
            }
        }
        for (id, node) in &self.return_nodes {
            if !baseline.return_nodes.contains_key(id) {
                partial.return_nodes.insert(id.clone(), node.clone());
            }
        }
        for (id, node) in &self.statement_nodes {
            if !baseline.statement_nodes.contains_key(id) {
                partial.statement_nodes.insert(id.clone(), node.clone());
            }
        }
        for (id, node) in &self.external_nodes {
            if !baseline.external_nodes.contains_key(id) {
                partial.external_nodes.insert(id.clone(), node.clone());
            }
        }

        partial.ignored_calls = self
            .ignored_calls
            .iter()
            .filter(|c| !baseline.ignored_calls.contains(c))
            .cloned()
            .collect();
        let mut remaining = baseline.unresolved_calls.clone();
        for expression in &self.unresolved_calls {
            match remaining.iter().position(|e| e == expression) {
                Some(index) => {
                    remaining.swap_remove(index);
                }
                None => partial.unresolved_calls.push(expression.clone()),
            }
        }
        partial.unexpanded_branches = self
            .unexpanded_branches
            .iter()
            .filter(|b| !baseline.unexpanded_branches.contains(b))
            .cloned()
            .collect();
        partial.diagnostics = self
            .diagnostics
            .iter()
            .filter(|d| !baseline.diagnostics.contains(d))
            .cloned()
            .collect();
        partial.max_depth_reached = self.max_depth_reached && !baseline.max_depth_reached;

        partial
    }
}
