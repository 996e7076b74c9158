// src/core/call_graph/builder.rs - depth-first call graph construction
use std::collections::HashSet;
use std::rc::Rc;

use tracing::{debug, trace};
use tree_sitter::Node;

use super::model::{
    BranchInfo, CallEdge, CallGraph, CallNode, CallType, DecisionNode, DecisionType, Diagnostic, ExternalCallNode,
    ExtractionMode, NodeKind, ResolutionStatus, ReturnNode, StatementNode,
};
use super::resolution::{Resolution, Resolver};
use crate::core::languages::{
    BranchBlock, CallSite, CallerContext, Definition, DefinitionKind, GrammarRules, LanguageExtractor, LeafKind,
};
use crate::core::metrics::measure;
use crate::core::parser::{ParsedUnit, Session};
use crate::core::tree_utils::{named_children, start_column, start_line, walk_tree};

/// Options for one graph construction
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub max_depth: usize,
    pub mode: ExtractionMode,
    /// Branch ids whose arms are walked in addition to the lazy baseline
    pub expand_branches: HashSet<String>,
}

/// The decision and branch a call is being made from
struct BranchScope {
    decision_id: String,
    branch_id: String,
}

/// Calls and decisions selected from one function body
struct ScanPlan<'t> {
    calls: Vec<Node<'t>>,
    decisions: Vec<(Node<'t>, DecisionType)>,
}

impl ScanPlan<'_> {
    fn new() -> Self {
        Self { calls: Vec::new(), decisions: Vec::new() }
    }
}

pub struct GraphBuilder<'s, 'r> {
    session: &'s mut Session<'r>,
    graph: CallGraph,
    expand_branches: HashSet<String>,
    call_stack: Vec<String>,
    /// Non-project call sites already recorded: (caller, line, column)
    seen_sites: HashSet<(String, usize, usize)>,
}

impl<'s, 'r> GraphBuilder<'s, 'r> {
    pub fn new(session: &'s mut Session<'r>, entry: &CallerContext, options: BuildOptions) -> Self {
        Self {
            session,
            graph: CallGraph::new(entry.node_id.clone(), options.max_depth, options.mode),
            expand_branches: options.expand_branches,
            call_stack: Vec::new(),
            seen_sites: HashSet::new(),
        }
    }

    /// Walk everything reachable from `entry` and return the finished graph
    pub fn build(mut self, entry: &CallerContext) -> CallGraph {
        let node = self.make_node(entry, 0, None);
        self.graph.add_node(CallNode { is_entry_point: true, ..node });

        self.call_stack.push(entry.node_id.clone());
        self.process_function(entry, 0);
        self.call_stack.pop();

        debug!(
            "Built {:?} graph for {}: {} nodes, {} edges, {} decisions",
            self.graph.extraction_mode,
            entry.node_id,
            self.graph.nodes.len(),
            self.graph.edges.len(),
            self.graph.decision_nodes.len()
        );
        self.graph
    }

    fn process_function(&mut self, ctx: &CallerContext, depth: usize) {
        if ctx.definition.kind == DefinitionKind::Class {
            return;
        }

        let unit = Rc::clone(&ctx.unit);
        let extractor = unit.language.extractor();
        let rules = extractor.rules();
        let Some(function) = unit.node_for(&ctx.definition) else {
            debug!("Definition {} no longer found in {}", ctx.definition.name, unit.relative_path);
            return;
        };
        let Some(body) = extractor.function_body(function) else {
            return;
        };

        // Expression-bodied functions count as a single statement
        let statements = if rules.is_block(body.kind()) { named_children(body) } else { vec![body] };

        let plan = match self.graph.extraction_mode {
            ExtractionMode::Full => ScanPlan {
                calls: collect_calls(&statements, rules),
                decisions: Vec::new(),
            },
            ExtractionMode::Lazy => {
                let mut plan = ScanPlan::new();
                lazy_scan(&statements, rules, &mut plan);
                plan
            }
        };

        if depth >= self.graph.max_depth {
            if !plan.calls.is_empty() || !plan.decisions.is_empty() {
                trace!("Depth limit reached at {}", ctx.node_id);
                self.graph.max_depth_reached = true;
            }
            return;
        }

        for call_node in plan.calls {
            if let Some(call) = extractor.parse_call(call_node, &unit.source) {
                self.handle_call(ctx, &call, depth, None);
            }
        }
        for (decision, decision_type) in plan.decisions {
            self.register_decision(ctx, decision, decision_type, depth);
        }
    }

    fn register_decision(&mut self, ctx: &CallerContext, node: Node, decision_type: DecisionType, depth: usize) {
        let unit = Rc::clone(&ctx.unit);
        let extractor = unit.language.extractor();
        let rules = extractor.rules();

        let decision_id = DecisionNode::make_id(&unit.relative_path, start_line(node), decision_type);
        if self.graph.decision_nodes.contains_key(&decision_id) {
            return;
        }

        let arms = extractor.decision_branches(node, &unit.source);
        let branches: Vec<BranchInfo> = arms
            .iter()
            .enumerate()
            .map(|(index, arm)| {
                let branch_id = DecisionNode::branch_id(&decision_id, index);
                BranchInfo {
                    is_expanded: self.expand_branches.contains(&branch_id),
                    branch_id,
                    label: arm.label.clone(),
                    condition: arm.condition.clone(),
                    call_count: collect_calls(&arm.statements, rules)
                        .into_iter()
                        .filter(|c| extractor.parse_call(*c, &unit.source).is_some())
                        .count(),
                    start_line: arm.start_line,
                    end_line: arm.end_line,
                }
            })
            .collect();

        self.graph.add_decision(DecisionNode {
            id: decision_id.clone(),
            decision_type,
            condition: extractor.decision_condition(node, &unit.source),
            call_id: ctx.node_id.clone(),
            file_path: unit.relative_path.clone(),
            line: start_line(node),
            column: start_column(node),
            depth,
            branches: branches.clone(),
        });

        for (info, arm) in branches.iter().zip(&arms) {
            if info.is_expanded {
                let scope = BranchScope {
                    decision_id: decision_id.clone(),
                    branch_id: info.branch_id.clone(),
                };
                self.expand_branch(ctx, arm, &scope, depth);
            } else if !self.graph.unexpanded_branches.contains(&info.branch_id) {
                self.graph.unexpanded_branches.push(info.branch_id.clone());
            }
        }
    }

    /// Walk one arm: leaf statements become nodes, calls get edges from the decision
    fn expand_branch(&mut self, ctx: &CallerContext, arm: &BranchBlock, scope: &BranchScope, depth: usize) {
        let unit = Rc::clone(&ctx.unit);
        let extractor = unit.language.extractor();

        for statement in &arm.statements {
            let Some(leaf) = extractor.leaf_statement(*statement, &unit.source) else {
                continue;
            };
            let line = start_line(*statement);
            let column = start_column(*statement);
            if leaf.kind == LeafKind::Return {
                let id = format!("{}:return:{}:{}", scope.branch_id, line, column);
                self.graph.return_nodes.entry(id.clone()).or_insert(ReturnNode {
                    id,
                    value: leaf.value,
                    line,
                    parent_call_id: ctx.node_id.clone(),
                    branch_id: scope.branch_id.clone(),
                    decision_id: scope.decision_id.clone(),
                });
            } else {
                let id = format!("{}:stmt:{}:{}", scope.branch_id, line, column);
                self.graph.statement_nodes.entry(id.clone()).or_insert(StatementNode {
                    id,
                    statement_type: leaf.kind,
                    text: leaf.text,
                    line,
                    parent_call_id: ctx.node_id.clone(),
                    branch_id: scope.branch_id.clone(),
                    decision_id: scope.decision_id.clone(),
                });
            }
        }

        for call_node in collect_calls(&arm.statements, extractor.rules()) {
            if let Some(call) = extractor.parse_call(call_node, &unit.source) {
                self.handle_call(ctx, &call, depth, Some(scope));
            }
        }
    }

    fn handle_call(&mut self, ctx: &CallerContext, call: &CallSite, depth: usize, scope: Option<&BranchScope>) {
        let resolution = Resolver::new(ctx).resolve(call, self.session, &mut self.graph.diagnostics);

        let target = match resolution {
            Resolution::Project(target) => target,
            Resolution::External { status, module_hint } => {
                self.record_external(ctx, call, status, module_hint, scope);
                return;
            }
            Resolution::Unresolved => {
                self.record_external(ctx, call, ResolutionStatus::Unresolved, None, scope);
                return;
            }
        };

        let target_id = target.unit.symbol_id(&target.definition, &self.session.project_root);
        let callee = CallerContext {
            unit: target.unit,
            definition: target.definition,
            node_id: target_id.clone(),
        };

        match self.graph.nodes.get_mut(&target_id) {
            Some(existing) => existing.depth = existing.depth.min(depth + 1),
            None => {
                let node = self.make_node(&callee, depth + 1, scope);
                self.graph.add_node(node);
            }
        }

        self.graph.add_edge(CallEdge {
            source_id: scope.map_or_else(|| ctx.node_id.clone(), |s| s.decision_id.clone()),
            target_id: target_id.clone(),
            call_site_line: call.line,
            call_type: if scope.is_some() { CallType::BranchCall } else { call.call_type },
            arguments: call.arguments.clone(),
            branch_id: scope.map(|s| s.branch_id.clone()),
            decision_id: scope.map(|s| s.decision_id.clone()),
        });

        if let Some(position) = self.call_stack.iter().position(|id| *id == target_id) {
            let mut path = self.call_stack[position..].to_vec();
            path.push(target_id);
            debug!("Cycle: {}", path.join(" -> "));
            let diagnostic = Diagnostic::Cycle { path };
            if !self.graph.diagnostics.contains(&diagnostic) {
                self.graph.diagnostics.push(diagnostic);
            }
            return;
        }

        self.call_stack.push(target_id);
        self.process_function(&callee, depth + 1);
        self.call_stack.pop();
    }

    fn record_external(
        &mut self,
        ctx: &CallerContext,
        call: &CallSite,
        status: ResolutionStatus,
        module_hint: Option<String>,
        scope: Option<&BranchScope>,
    ) {
        if !self.seen_sites.insert((ctx.node_id.clone(), call.line, call.column)) {
            return;
        }
        trace!("{} at line {} -> {:?}", call.expression, call.line, status);

        if status == ResolutionStatus::Unresolved {
            self.graph.unresolved_calls.push(call.expression.clone());
        } else {
            self.graph.ignored_calls.push(super::model::IgnoredCall {
                expression: call.expression.clone(),
                status,
                call_site_line: call.line,
                module_hint: module_hint.clone(),
                caller_id: ctx.node_id.clone(),
                branch_id: scope.map(|s| s.branch_id.clone()),
                decision_id: scope.map(|s| s.decision_id.clone()),
            });
        }

        if let Some(scope) = scope {
            let id = format!("{}:external:{}:{}", scope.branch_id, call.line, call.column);
            self.graph.external_nodes.entry(id.clone()).or_insert(ExternalCallNode {
                id,
                name: call.name.clone(),
                expression: call.expression.clone(),
                resolution_status: status,
                module_hint,
                line: call.line,
                parent_call_id: ctx.node_id.clone(),
                branch_id: scope.branch_id.clone(),
                decision_id: scope.decision_id.clone(),
            });
        }
    }

    fn make_node(&self, ctx: &CallerContext, depth: usize, scope: Option<&BranchScope>) -> CallNode {
        let unit = &ctx.unit;
        let extractor = unit.language.extractor();
        let definition = &ctx.definition;
        let metrics = unit
            .node_for(definition)
            .map(|node| measure(node, &unit.source, &extractor.rules().complexity));

        CallNode {
            id: ctx.node_id.clone(),
            name: definition.name.clone(),
            qualified_name: extractor.qualified_name(definition, unit),
            file_path: Some(unit.relative_path.clone()),
            line: Some(definition.line),
            column: Some(definition.column),
            kind: match definition.kind {
                DefinitionKind::Function => NodeKind::Function,
                DefinitionKind::Method => NodeKind::Method,
                DefinitionKind::Class => NodeKind::Class,
            },
            class_name: definition.class_name.clone(),
            is_entry_point: false,
            depth,
            docstring: definition.docstring.clone(),
            resolution_status: ResolutionStatus::ResolvedProject,
            complexity: metrics.map(|m| m.complexity),
            loc: metrics.map(|m| m.loc),
            branch_id: scope.map(|s| s.branch_id.clone()),
            decision_id: scope.map(|s| s.decision_id.clone()),
        }
    }
}

/// Number of call sites in a definition's own body
pub fn count_call_sites(unit: &ParsedUnit, definition: &Definition) -> usize {
    let extractor = unit.language.extractor();
    let Some(body) = unit.node_for(definition).and_then(|f| extractor.function_body(f)) else {
        return 0;
    };
    collect_calls(&[body], extractor.rules())
        .into_iter()
        .filter(|c| extractor.parse_call(*c, &unit.source).is_some())
        .count()
}

/// Call nodes under `roots` in source order, skipping nested definitions
fn collect_calls<'t>(roots: &[Node<'t>], rules: &GrammarRules) -> Vec<Node<'t>> {
    let mut calls = Vec::new();
    for root in roots {
        walk_tree(*root, |node| {
            if rules.nested_scope_kinds.contains(&node.kind()) {
                return false;
            }
            if rules.call_kinds.contains(&node.kind()) {
                calls.push(node);
            }
            true
        });
    }
    calls
}

fn first_ternary<'t>(statement: Node<'t>, rules: &GrammarRules) -> Option<Node<'t>> {
    let mut found = None;
    walk_tree(statement, |node| {
        if found.is_some() || rules.nested_scope_kinds.contains(&node.kind()) {
            return false;
        }
        if rules.ternary_kinds.contains(&node.kind()) {
            found = Some(node);
            return false;
        }
        true
    });
    found
}

/// Lazy selection over a statement list.
///
/// Calls before the first decision are kept and every decision is
/// registered. A loop is never a decision itself: its header calls count as
/// linear code, and its body is searched for decisions; when none is found
/// the whole loop is linear.
fn lazy_scan<'t>(statements: &[Node<'t>], rules: &GrammarRules, plan: &mut ScanPlan<'t>) {
    for statement in statements {
        let statement = *statement;
        let kind = statement.kind();
        let linear = plan.decisions.is_empty();

        if let Some(decision_type) = rules.decision_type(kind) {
            plan.decisions.push((statement, decision_type));
            continue;
        }

        if rules.is_loop(kind) {
            let body = statement.child_by_field_name("body");
            let header: Vec<Node> = named_children(statement)
                .into_iter()
                .filter(|c| Some(c.id()) != body.map(|b| b.id()) && c.kind() != "else_clause")
                .collect();
            if linear {
                plan.calls.extend(collect_calls(&header, rules));
            }

            let Some(body) = body else { continue };
            let body_statements = if rules.is_block(body.kind()) { named_children(body) } else { vec![body] };
            let mut inner = ScanPlan::new();
            lazy_scan(&body_statements, rules, &mut inner);

            if !inner.decisions.is_empty() {
                if linear {
                    plan.calls.extend(inner.calls);
                }
                plan.decisions.extend(inner.decisions);
            } else if linear {
                plan.calls.extend(collect_calls(&body_statements, rules));
            }
            continue;
        }

        if let Some(ternary) = first_ternary(statement, rules) {
            if linear {
                let mut outside = Vec::new();
                walk_tree(statement, |node| {
                    if node.id() == ternary.id() || rules.nested_scope_kinds.contains(&node.kind()) {
                        return false;
                    }
                    if rules.call_kinds.contains(&node.kind()) {
                        outside.push(node);
                    }
                    true
                });
                plan.calls.extend(outside);
            }
            plan.decisions.push((ternary, DecisionType::Ternary));
            continue;
        }

        if linear {
            plan.calls.extend(collect_calls(&[statement], rules));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::ParserRegistry;
    use assert_fs::prelude::*;
    use assert_fs::TempDir;
    use std::path::Path;

    const ORDERS: &str = r#"def validate(order):
    return order

def process(order):
    pass

def reject(order):
    pass

def process_order(order):
    validate(order)
    if order.ok:
        process(order)
        return True
    else:
        reject(order)
"#;

    fn build(dir: &TempDir, file: &str, function: &str, mode: ExtractionMode, max_depth: usize, expand: &[String]) -> CallGraph {
        let registry = ParserRegistry::with_all_languages();
        let mut session = Session::new(&registry, dir.path(), 1 << 20);
        let unit = session.load(dir.child(file).path()).unwrap();
        let definition = unit.callables().find(|d| d.name == function).unwrap().clone();
        let entry = CallerContext {
            node_id: unit.symbol_id(&definition, &session.project_root),
            unit,
            definition,
        };
        let options = BuildOptions {
            max_depth,
            mode,
            expand_branches: expand.iter().cloned().collect(),
        };
        GraphBuilder::new(&mut session, &entry, options).build(&entry)
    }

    fn names(graph: &CallGraph) -> Vec<&str> {
        graph.nodes.values().map(|n| n.name.as_str()).collect()
    }

    fn write(dir: &TempDir, file: &str, source: &str) {
        dir.child(file).write_str(source).unwrap();
    }

    #[test]
    fn test_lazy_mode_stops_at_first_decision() {
        let temp = TempDir::new().unwrap();
        write(&temp, "orders.py", ORDERS);

        let graph = build(&temp, "orders.py", "process_order", ExtractionMode::Lazy, 5, &[]);
        assert_eq!(names(&graph), vec!["process_order", "validate"]);
        assert_eq!(graph.decision_nodes.len(), 1);

        let decision = graph.decision_nodes.values().next().unwrap();
        assert_eq!(decision.id, "decision:orders.py:12:if_else");
        assert_eq!(decision.condition, "order.ok");
        assert_eq!(decision.branches.len(), 2);
        assert_eq!(decision.branches[0].label, "if");
        assert_eq!(decision.branches[0].call_count, 1);
        assert!(!decision.branches[0].is_expanded);
        assert_eq!(
            graph.unexpanded_branches,
            vec!["decision:orders.py:12:if_else:branch:0", "decision:orders.py:12:if_else:branch:1"]
        );
    }

    #[test]
    fn test_expanding_a_branch_adds_its_calls_and_leaves() {
        let temp = TempDir::new().unwrap();
        write(&temp, "orders.py", ORDERS);

        let branch = "decision:orders.py:12:if_else:branch:0".to_string();
        let graph = build(&temp, "orders.py", "process_order", ExtractionMode::Lazy, 5, &[branch.clone()]);

        assert_eq!(names(&graph), vec!["process_order", "validate", "process"]);
        let process = graph.nodes.values().find(|n| n.name == "process").unwrap();
        assert_eq!(process.branch_id.as_deref(), Some(branch.as_str()));

        let branch_edge = graph.edges.iter().find(|e| e.branch_id.is_some()).unwrap();
        assert_eq!(branch_edge.source_id, "decision:orders.py:12:if_else");
        assert_eq!(branch_edge.call_type, CallType::BranchCall);

        let ret = graph.return_nodes.values().next().unwrap();
        assert_eq!(ret.value.as_deref(), Some("True"));
        assert_eq!(ret.line, 14);

        assert!(graph.decision_nodes.values().next().unwrap().branches[0].is_expanded);
        assert_eq!(graph.unexpanded_branches, vec!["decision:orders.py:12:if_else:branch:1"]);
    }

    #[test]
    fn test_full_mode_is_a_superset_of_lazy() {
        let temp = TempDir::new().unwrap();
        write(&temp, "orders.py", ORDERS);

        let full = build(&temp, "orders.py", "process_order", ExtractionMode::Full, 5, &[]);
        let lazy = build(&temp, "orders.py", "process_order", ExtractionMode::Lazy, 5, &[]);

        assert!(full.decision_nodes.is_empty());
        assert_eq!(names(&full), vec!["process_order", "validate", "process", "reject"]);
        for id in lazy.nodes.keys() {
            assert!(full.nodes.contains_key(id));
        }
    }

    #[test]
    fn test_loops_are_not_decisions() {
        let temp = TempDir::new().unwrap();
        write(
            &temp,
            "loops.py",
            r#"def fetch():
    return []

def handle(x):
    pass

def skip(x):
    pass

def tail():
    pass

def plain():
    for x in fetch():
        handle(x)
    tail()

def guarded():
    for x in fetch():
        handle(x)
        if x:
            skip(x)
    tail()
"#,
        );

        let plain = build(&temp, "loops.py", "plain", ExtractionMode::Lazy, 5, &[]);
        assert_eq!(names(&plain), vec!["plain", "fetch", "handle", "tail"]);
        assert!(plain.decision_nodes.is_empty());

        let guarded = build(&temp, "loops.py", "guarded", ExtractionMode::Lazy, 5, &[]);
        assert_eq!(names(&guarded), vec!["guarded", "fetch", "handle"]);
        assert_eq!(guarded.decision_nodes.len(), 1);
    }

    #[test]
    fn test_cycles_are_reported_and_not_followed() {
        let temp = TempDir::new().unwrap();
        write(&temp, "cycle.py", "def a():\n    b()\n\ndef b():\n    a()\n");

        let graph = build(&temp, "cycle.py", "a", ExtractionMode::Full, 10, &[]);
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.edges.len(), 2);
        assert!(graph.has_cycles());
        let Diagnostic::Cycle { path } = &graph.diagnostics[0] else {
            panic!("expected a cycle diagnostic");
        };
        assert_eq!(path.len(), 3);
        assert_eq!(path[0], path[2]);
        assert!(!graph.max_depth_reached);
    }

    #[test]
    fn test_diamond_dependencies_are_deduplicated() {
        let temp = TempDir::new().unwrap();
        write(
            &temp,
            "diamond.py",
            "def d():\n    print('x')\n\ndef b():\n    d()\n\ndef c():\n    d()\n\ndef a():\n    b()\n    c()\n",
        );

        let graph = build(&temp, "diamond.py", "a", ExtractionMode::Full, 10, &[]);
        assert_eq!(names(&graph), vec!["a", "b", "d", "c"]);
        assert_eq!(graph.edges.len(), 4);
        assert_eq!(graph.ignored_calls.len(), 1);
        assert!(!graph.has_cycles());
        assert_eq!(graph.nodes.values().find(|n| n.name == "d").unwrap().depth, 2);
    }

    #[test]
    fn test_depth_limit() {
        let temp = TempDir::new().unwrap();
        write(&temp, "chain.py", "def c():\n    pass\n\ndef b():\n    c()\n\ndef a():\n    b()\n");

        let shallow = build(&temp, "chain.py", "a", ExtractionMode::Full, 1, &[]);
        assert_eq!(names(&shallow), vec!["a", "b"]);
        assert!(shallow.max_depth_reached);

        let deep = build(&temp, "chain.py", "a", ExtractionMode::Full, 5, &[]);
        assert_eq!(names(&deep), vec!["a", "b", "c"]);
        assert!(!deep.max_depth_reached);

        let zero = build(&temp, "chain.py", "a", ExtractionMode::Full, 0, &[]);
        assert_eq!(names(&zero), vec!["a"]);
        assert!(zero.max_depth_reached);
    }

    #[test]
    fn test_cross_file_calls_and_read_failures() {
        let temp = TempDir::new().unwrap();
        write(&temp, "repo.py", "class Repo:\n    def save(self, item):\n        pass\n");
        write(
            &temp,
            "service.py",
            "from repo import Repo\nfrom .gone import vanish\nimport json\n\ndef run(item):\n    r = Repo()\n    r.save(item)\n    json.dumps(item)\n    vanish()\n",
        );

        let graph = build(&temp, "service.py", "run", ExtractionMode::Full, 5, &[]);
        let files: Vec<&str> = graph.nodes.values().filter_map(|n| n.file_path.as_deref()).collect();
        assert_eq!(files, vec!["service.py", "repo.py", "repo.py"]);
        assert_eq!(graph.ignored_calls.len(), 1);
        assert_eq!(graph.ignored_calls[0].status, ResolutionStatus::IgnoredStdlib);
        assert_eq!(graph.ignored_calls[0].module_hint.as_deref(), Some("json"));
        assert_eq!(graph.unresolved_calls, vec!["vanish"]);
        assert!(graph
            .diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::CrossFileReadFailure { .. })));
    }

    #[test]
    fn test_every_call_site_is_accounted_for_once() {
        let temp = TempDir::new().unwrap();
        write(
            &temp,
            "mix.py",
            "def helper():\n    pass\n\ndef main(items):\n    helper()\n    print(len(items))\n    mystery()\n    helper()\n",
        );

        let graph = build(&temp, "mix.py", "main", ExtractionMode::Full, 5, &[]);
        let resolved_edges = graph.edges.len();
        let total = resolved_edges + graph.ignored_calls.len() + graph.unresolved_calls.len();
        assert_eq!(total, 5);
        assert_eq!(graph.unresolved_calls, vec!["mystery"]);
    }

    #[test]
    fn test_branch_externals_and_statements() {
        let temp = TempDir::new().unwrap();
        write(
            &temp,
            "guard.py",
            "def main(x):\n    if x:\n        print(x)\n        y = 1\n        unknown()\n    else:\n        raise ValueError(x)\n",
        );

        let graph = build(
            &temp,
            "guard.py",
            "main",
            ExtractionMode::Lazy,
            5,
            &["decision:guard.py:2:if_else:branch:0".to_string(), "decision:guard.py:2:if_else:branch:1".to_string()],
        );

        let statuses: Vec<ResolutionStatus> = graph.external_nodes.values().map(|n| n.resolution_status).collect();
        assert_eq!(
            statuses,
            vec![ResolutionStatus::IgnoredBuiltin, ResolutionStatus::Unresolved, ResolutionStatus::IgnoredBuiltin]
        );
        let kinds: Vec<LeafKind> = graph.statement_nodes.values().map(|s| s.statement_type).collect();
        assert_eq!(kinds, vec![LeafKind::Assignment, LeafKind::Raise]);
        assert!(graph.unexpanded_branches.is_empty());
    }

    #[test]
    fn test_typescript_arrow_entry() {
        let temp = TempDir::new().unwrap();
        write(
            &temp,
            "app.ts",
            "function save(x: number) { return x; }\nexport const run = (x: number) => save(x);\n",
        );

        let graph = build(&temp, "app.ts", "run", ExtractionMode::Full, 5, &[]);
        assert_eq!(names(&graph), vec!["run", "save"]);
        assert!(Path::new(graph.nodes[0].file_path.as_deref().unwrap()).ends_with("app.ts"));
    }

    #[test]
    fn test_lazy_ternary_is_a_decision() {
        let temp = TempDir::new().unwrap();
        write(
            &temp,
            "pick.py",
            r#"def fast():
    pass

def slow():
    pass

def prepare():
    pass

def pick(ready):
    prepare()
    return fast() if ready else slow()
"#,
        );

        let graph = build(&temp, "pick.py", "pick", ExtractionMode::Lazy, 5, &[]);
        assert_eq!(names(&graph), vec!["pick", "prepare"]);

        let decision = graph.decision_nodes.values().next().unwrap();
        assert_eq!(decision.id, "decision:pick.py:12:ternary");
        assert_eq!(decision.decision_type, DecisionType::Ternary);
        let arms: Vec<(&str, Option<&str>, usize)> = decision
            .branches
            .iter()
            .map(|b| (b.label.as_str(), b.condition.as_deref(), b.call_count))
            .collect();
        assert_eq!(arms, vec![("true", Some("ready"), 1), ("false", Some("not ready"), 1)]);
        assert_eq!(graph.unexpanded_branches.len(), 2);

        let false_arm = "decision:pick.py:12:ternary:branch:1".to_string();
        let expanded = build(&temp, "pick.py", "pick", ExtractionMode::Lazy, 5, &[false_arm.clone()]);
        assert_eq!(names(&expanded), vec!["pick", "prepare", "slow"]);

        let branch_edge = expanded.edges.iter().find(|e| e.branch_id.is_some()).unwrap();
        assert_eq!(branch_edge.source_id, "decision:pick.py:12:ternary");
        assert_eq!(branch_edge.branch_id.as_deref(), Some(false_arm.as_str()));
        assert_eq!(branch_edge.call_type, CallType::BranchCall);
        assert_eq!(expanded.unexpanded_branches, vec!["decision:pick.py:12:ternary:branch:0"]);
    }
}
