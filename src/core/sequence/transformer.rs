// src/core/sequence/transformer.rs - call graph to sequence diagram
use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use tracing::debug;

use super::model::{
    ActivationBox, CombinedFragment, FragmentOperand, FragmentType, Lifeline, Message, MessageType, ParticipantKind,
    SequenceDiagram,
};
use crate::core::call_graph::{
    CallEdge, CallGraph, CallNode, CallType, DecisionNode, DecisionType, ExternalCallNode, NodeKind, ReturnNode,
};
use crate::core::languages::module_name;

/// Convert a finished graph into a sequence diagram
pub fn transform(graph: &CallGraph) -> SequenceDiagram {
    SequenceTransformer::new(graph).run()
}

enum Event<'g> {
    Call(&'g CallEdge),
    Decision(&'g DecisionNode),
    Return(&'g ReturnNode),
    External(&'g ExternalCallNode),
}

impl Event<'_> {
    fn line(&self) -> usize {
        match self {
            Event::Call(edge) => edge.call_site_line,
            Event::Decision(decision) => decision.line,
            Event::Return(ret) => ret.line,
            Event::External(external) => external.line,
        }
    }
}

struct Span {
    start: usize,
    end: usize,
    lifelines: Vec<String>,
}

struct SequenceTransformer<'g> {
    graph: &'g CallGraph,
    lifelines: IndexMap<String, Lifeline>,
    messages: Vec<Message>,
    emitted: HashSet<String>,
    /// Nodes on the current traversal path
    path: Vec<String>,
    /// Open (decision id, operand index) pairs, innermost last
    fragments: Vec<(String, usize)>,
    parents: HashMap<String, Option<(String, usize)>>,
    spans: HashMap<String, Span>,
}

impl<'g> SequenceTransformer<'g> {
    fn new(graph: &'g CallGraph) -> Self {
        Self {
            graph,
            lifelines: IndexMap::new(),
            messages: Vec::new(),
            emitted: HashSet::new(),
            path: Vec::new(),
            fragments: Vec::new(),
            parents: HashMap::new(),
            spans: HashMap::new(),
        }
    }

    fn run(mut self) -> SequenceDiagram {
        let graph = self.graph;
        let title = graph
            .entry_node()
            .map(|n| n.qualified_name.clone())
            .unwrap_or_else(|| graph.entry_point.clone());

        if let Some(entry) = graph.entry_node() {
            self.lifeline_for(entry);
            self.visit_node(entry);
        }

        let activations = self.activations();
        let fragments = self.fragments();
        debug!(
            "Sequence for {}: {} lifelines, {} messages, {} fragments",
            graph.entry_point,
            self.lifelines.len(),
            self.messages.len(),
            fragments.len()
        );

        SequenceDiagram {
            title,
            entry_point: graph.entry_point.clone(),
            lifelines: self.lifelines.into_values().collect(),
            messages: self.messages,
            activations,
            fragments,
        }
    }

    fn visit_node(&mut self, node: &'g CallNode) {
        let graph = self.graph;
        self.path.push(node.id.clone());

        let mut events: Vec<Event<'g>> = graph
            .outgoing(&node.id)
            .into_iter()
            .filter(|e| e.branch_id.is_none())
            .map(Event::Call)
            .chain(graph.decisions_of(&node.id).into_iter().map(Event::Decision))
            .collect();
        events.sort_by_key(Event::line);

        for event in events {
            match event {
                Event::Call(edge) => self.emit_call(node, edge),
                Event::Decision(decision) => self.visit_decision(node, decision),
                Event::Return(_) | Event::External(_) => {}
            }
        }

        self.path.pop();
    }

    fn visit_decision(&mut self, owner: &'g CallNode, decision: &'g DecisionNode) {
        let graph = self.graph;
        let parent = self.fragments.last().cloned();
        self.parents.entry(decision.id.clone()).or_insert(parent);
        let first = self.messages.len();

        for (index, branch) in decision.branches.iter().enumerate() {
            let mut events: Vec<Event<'g>> = graph
                .outgoing(&decision.id)
                .into_iter()
                .filter(|e| e.branch_id.as_deref() == Some(branch.branch_id.as_str()))
                .map(Event::Call)
                .chain(
                    graph
                        .return_nodes
                        .values()
                        .filter(|r| r.branch_id == branch.branch_id)
                        .map(Event::Return),
                )
                .chain(
                    graph
                        .external_nodes
                        .values()
                        .filter(|x| x.branch_id == branch.branch_id)
                        .map(Event::External),
                )
                .collect();
            events.sort_by_key(Event::line);

            self.fragments.push((decision.id.clone(), index));
            for event in events {
                match event {
                    Event::Call(edge) => self.emit_call(owner, edge),
                    Event::Return(ret) => self.emit_return(owner, ret),
                    Event::External(external) => self.emit_external(owner, external),
                    Event::Decision(_) => {}
                }
            }
            self.fragments.pop();
        }

        // A function reached over several paths revisits its decisions; the
        // messages were emitted on the first visit, so later visits only widen
        let emitted = &self.messages[first..];
        if let (Some(head), Some(tail)) = (emitted.first(), emitted.last()) {
            let (start, end) = (head.sequence_number, tail.sequence_number);
            let mut touched: Vec<String> = Vec::new();
            for message in emitted {
                for id in [&message.from_lifeline, &message.to_lifeline] {
                    if !touched.contains(id) {
                        touched.push(id.clone());
                    }
                }
            }

            let span = self.spans.entry(decision.id.clone()).or_insert(Span {
                start,
                end,
                lifelines: Vec::new(),
            });
            if span.start == 0 {
                span.start = start;
                span.lifelines.clear();
            }
            span.start = span.start.min(start);
            span.end = span.end.max(end);
            for id in touched {
                if !span.lifelines.contains(&id) {
                    span.lifelines.push(id);
                }
            }
            let order = &self.lifelines;
            span.lifelines.sort_by_key(|id| order.get_index_of(id));
        } else if !self.spans.contains_key(&decision.id) {
            let owner_lifeline = self.lifeline_for(owner);
            self.spans.insert(
                decision.id.clone(),
                Span {
                    start: 0,
                    end: 0,
                    lifelines: vec![owner_lifeline],
                },
            );
        }
    }

    fn emit_call(&mut self, caller: &'g CallNode, edge: &'g CallEdge) {
        if !self.emitted.insert(edge.key()) {
            return;
        }
        let graph = self.graph;
        let Some(target) = graph.nodes.get(&edge.target_id) else {
            return;
        };

        let from = self.lifeline_for(caller);
        let to = self.lifeline_for(target);
        let message_type = if edge.call_type == CallType::Constructor || target.kind == NodeKind::Class {
            MessageType::Create
        } else if from == to {
            MessageType::SelfCall
        } else {
            MessageType::Sync
        };
        let label = format!("{}{}", target.name, edge.arguments.as_deref().unwrap_or("()"));
        self.push_message(from, to, label, message_type, Some(edge.call_site_line));

        if !self.path.contains(&target.id) {
            self.visit_node(target);
        }
    }

    /// Return travels from the returning function back to whoever called it
    fn emit_return(&mut self, owner: &'g CallNode, ret: &'g ReturnNode) {
        if !self.emitted.insert(ret.id.clone()) {
            return;
        }
        let graph = self.graph;
        let from = self.lifeline_for(owner);
        let caller = graph.incoming(&ret.parent_call_id).into_iter().next().and_then(|edge| {
            let source = graph
                .decision_nodes
                .get(&edge.source_id)
                .map_or(edge.source_id.as_str(), |d| d.call_id.as_str());
            graph.nodes.get(source)
        });
        let to = match caller {
            Some(caller) => self.lifeline_for(caller),
            None => from.clone(),
        };
        let label = ret.value.clone().unwrap_or_else(|| "return".to_string());
        self.push_message(from, to, label, MessageType::Return, Some(ret.line));
    }

    fn emit_external(&mut self, owner: &'g CallNode, external: &'g ExternalCallNode) {
        if !self.emitted.insert(external.id.clone()) {
            return;
        }
        let from = self.lifeline_for(owner);
        let name = external
            .module_hint
            .clone()
            .unwrap_or_else(|| external.resolution_status.label().to_string());
        let to = self.ensure_lifeline(format!("external:{}", name), name.clone(), name, ParticipantKind::External, false);
        self.push_message(from, to, format!("{}()", external.expression), MessageType::Sync, Some(external.line));
    }

    fn push_message(&mut self, from: String, to: String, label: String, message_type: MessageType, line: Option<usize>) {
        let sequence_number = self.messages.len() + 1;
        let (fragment_id, operand_index) = match self.fragments.last() {
            Some((id, index)) => (Some(id.clone()), Some(*index)),
            None => (None, None),
        };
        self.messages.push(Message {
            id: format!("msg_{}", sequence_number),
            sequence_number,
            from_lifeline: from,
            to_lifeline: to,
            label,
            message_type,
            fragment_id,
            operand_index,
            source_line: line,
        });
    }

    /// Lifeline of the participant owning `node`: its class, or its module
    fn lifeline_for(&mut self, node: &CallNode) -> String {
        let file = node.file_path.as_deref().unwrap_or("");
        match (&node.class_name, node.kind) {
            (Some(class_name), _) => {
                let qualified = node
                    .qualified_name
                    .strip_suffix(node.name.as_str())
                    .map(|q| q.trim_end_matches(|c| c == '.' || c == ':').to_string())
                    .filter(|q| !q.is_empty())
                    .unwrap_or_else(|| class_name.clone());
                self.ensure_lifeline(
                    format!("class:{}:{}", file, class_name),
                    class_name.clone(),
                    qualified,
                    ParticipantKind::Class,
                    node.is_entry_point,
                )
            }
            (None, NodeKind::Class) => self.ensure_lifeline(
                format!("class:{}:{}", file, node.name),
                node.name.clone(),
                node.qualified_name.clone(),
                ParticipantKind::Class,
                node.is_entry_point,
            ),
            _ => self.ensure_lifeline(
                format!("module:{}", file),
                module_name(file),
                file.to_string(),
                ParticipantKind::Module,
                node.is_entry_point,
            ),
        }
    }

    fn ensure_lifeline(&mut self, id: String, name: String, qualified_name: String, kind: ParticipantKind, is_entry: bool) -> String {
        let order = self.lifelines.len();
        let lifeline = self.lifelines.entry(id.clone()).or_insert(Lifeline {
            id: id.clone(),
            name,
            qualified_name,
            participant_kind: kind,
            order,
            is_entry,
        });
        lifeline.is_entry |= is_entry;
        id
    }

    /// A root box on the entry lifeline, then one box per invocation closed
    /// by the next return sent from the receiving lifeline
    fn activations(&self) -> Vec<ActivationBox> {
        let mut boxes = Vec::new();
        let last = self.messages.last().map_or(0, |m| m.sequence_number);

        if let Some(entry) = self.lifelines.values().find(|l| l.is_entry) {
            boxes.push(ActivationBox {
                lifeline_id: entry.id.clone(),
                start_sequence: 0,
                end_sequence: last,
                nesting_level: 0,
            });
        }

        for message in self.messages.iter().filter(|m| m.is_invocation()) {
            let start = message.sequence_number;
            let end = self
                .messages
                .iter()
                .find(|r| {
                    r.sequence_number > start
                        && r.message_type == MessageType::Return
                        && r.from_lifeline == message.to_lifeline
                })
                .map_or(start + 1, |r| r.sequence_number);
            let nesting_level = boxes
                .iter()
                .filter(|b: &&ActivationBox| {
                    b.lifeline_id == message.to_lifeline && b.start_sequence <= start && b.end_sequence >= start
                })
                .count();
            boxes.push(ActivationBox {
                lifeline_id: message.to_lifeline.clone(),
                start_sequence: start,
                end_sequence: end,
                nesting_level,
            });
        }
        boxes
    }

    fn fragments(&self) -> Vec<CombinedFragment> {
        self.graph
            .decision_nodes
            .values()
            .map(|decision| {
                let operands = decision
                    .branches
                    .iter()
                    .enumerate()
                    .map(|(index, branch)| FragmentOperand {
                        branch_id: branch.branch_id.clone(),
                        guard: branch.condition.clone().unwrap_or_else(|| branch.label.clone()),
                        message_ids: self
                            .messages
                            .iter()
                            .filter(|m| m.fragment_id.as_deref() == Some(decision.id.as_str()) && m.operand_index == Some(index))
                            .map(|m| m.id.clone())
                            .collect(),
                    })
                    .collect();
                let span = self.spans.get(&decision.id).filter(|s| s.start > 0);
                let parent = self.parents.get(&decision.id).cloned().flatten();

                CombinedFragment {
                    id: decision.id.clone(),
                    fragment_type: fragment_type(decision),
                    operands,
                    covered_lifelines: self
                        .spans
                        .get(&decision.id)
                        .map(|s| s.lifelines.clone())
                        .unwrap_or_default(),
                    start_sequence: span.map(|s| s.start),
                    end_sequence: span.map(|s| s.end),
                    parent_id: parent.as_ref().map(|(id, _)| id.clone()),
                    parent_operand: parent.map(|(_, operand)| operand),
                }
            })
            .collect()
    }
}

fn fragment_type(decision: &DecisionNode) -> FragmentType {
    match decision.decision_type {
        DecisionType::IfElse if decision.branches.len() > 1 => FragmentType::Alt,
        DecisionType::IfElse => FragmentType::Opt,
        DecisionType::TryExcept => FragmentType::Try,
        DecisionType::MatchCase | DecisionType::Ternary => FragmentType::Alt,
    }
}
