// src/core/sequence/render.rs - Mermaid output
use std::collections::HashMap;

use serde::Serialize;
use tera::{Context, Tera};

use super::model::{ActivationBox, CombinedFragment, FragmentType, MessageType, SequenceDiagram};
use crate::error::Result;

const MERMAID_TEMPLATE: &str = r#"sequenceDiagram
    title {{ title }}
{%- for p in participants %}
    participant {{ p.alias }} as {{ p.label }}
{%- endfor %}
{%- for step in steps %}
{{ step.indent }}{% if step.kind == "message" %}{{ step.from }}{{ step.arrow }}{{ step.to }}: {{ step.label }}{% elif step.kind == "end" %}end{% elif step.kind == "activate" or step.kind == "deactivate" %}{{ step.kind }} {{ step.from }}{% else %}{{ step.keyword }} {{ step.label }}{% endif %}
{%- endfor %}
"#;

#[derive(Serialize)]
struct Participant {
    alias: String,
    label: String,
}

#[derive(Serialize, Default)]
struct Step {
    kind: &'static str,
    indent: String,
    from: String,
    to: String,
    arrow: &'static str,
    keyword: &'static str,
    label: String,
}

fn arrow(message_type: MessageType) -> &'static str {
    match message_type {
        MessageType::Sync | MessageType::SelfCall | MessageType::Create => "->>",
        MessageType::Async => "-)",
        MessageType::Return => "-->>",
        MessageType::Destroy => "-x",
    }
}

/// Opening and divider keywords of a fragment type
fn keywords(fragment_type: FragmentType) -> (&'static str, &'static str) {
    match fragment_type {
        FragmentType::Alt => ("alt", "else"),
        FragmentType::Opt => ("opt", "else"),
        FragmentType::Loop => ("loop", "else"),
        FragmentType::Par => ("par", "and"),
        FragmentType::Try => ("critical", "option"),
        FragmentType::Break => ("break", "else"),
    }
}

/// Mermaid treats `;` and `#` specially inside message text
fn sanitize(text: &str) -> String {
    text.replace(';', ",").replace('#', "").replace('\n', " ")
}

struct StepWriter<'d> {
    fragments: HashMap<&'d str, &'d CombinedFragment>,
    steps: Vec<Step>,
    /// Open (fragment id, operand) pairs, outermost first
    open: Vec<(&'d str, usize)>,
}

impl<'d> StepWriter<'d> {
    fn indent(&self) -> String {
        " ".repeat(4 * (self.open.len() + 1))
    }

    fn guard(&self, fragment_id: &str, operand: usize) -> String {
        self.fragments
            .get(fragment_id)
            .copied()
            .and_then(|f| f.operands.get(operand))
            .map(|o| sanitize(&o.guard))
            .unwrap_or_default()
    }

    fn fragment_type(&self, fragment_id: &str) -> FragmentType {
        self.fragments
            .get(fragment_id)
            .map_or(FragmentType::Alt, |f| f.fragment_type)
    }

    /// Fragment nesting of a message, outermost first
    fn chain(&self, fragment_id: Option<&'d str>, operand: Option<usize>) -> Vec<(&'d str, usize)> {
        let mut chain = Vec::new();
        let mut current = fragment_id.zip(operand);
        while let Some((id, index)) = current {
            if chain.iter().any(|(seen, _)| *seen == id) {
                break;
            }
            chain.push((id, index));
            current = self
                .fragments
                .get(id)
                .copied()
                .and_then(|f| f.parent_id.as_deref().zip(f.parent_operand));
        }
        chain.reverse();
        chain
    }

    fn divider(&mut self, fragment_id: &'d str, operand: usize) {
        let (_, divider) = keywords(self.fragment_type(fragment_id));
        let indent = self.indent();
        let label = self.guard(fragment_id, operand);
        self.steps.push(Step { kind: "divider", indent, keyword: divider, label, ..Step::default() });
    }

    fn close_one(&mut self) {
        self.open.pop();
        let indent = self.indent();
        self.steps.push(Step { kind: "end", indent, ..Step::default() });
    }

    /// Close, switch and open fragments so the next message lands in `chain`
    fn enter(&mut self, chain: &[(&'d str, usize)]) {
        let common = self.open.iter().zip(chain).take_while(|(a, b)| a == b).count();
        let switch = common < self.open.len() && common < chain.len() && self.open[common].0 == chain[common].0;
        let keep = if switch { common + 1 } else { common };
        while self.open.len() > keep {
            self.close_one();
        }

        let mut next = common;
        if switch {
            let (id, from) = self.open[common];
            for operand in from + 1..=chain[common].1 {
                self.open.truncate(common);
                self.divider(id, operand);
                self.open.push((id, operand));
            }
            next += 1;
        }

        for &(id, operand) in &chain[next..] {
            let (opening, _) = keywords(self.fragment_type(id));
            let indent = self.indent();
            let label = self.guard(id, 0);
            self.steps.push(Step { kind: "open", indent, keyword: opening, label, ..Step::default() });
            self.open.push((id, 0));
            for skipped in 1..=operand {
                self.open.pop();
                self.divider(id, skipped);
                self.open.push((id, skipped));
            }
        }
    }

    fn activation(&mut self, kind: &'static str, alias: &str) {
        let indent = self.indent();
        self.steps.push(Step { kind, indent, from: alias.to_string(), ..Step::default() });
    }
}

/// Render a diagram as Mermaid `sequenceDiagram` text
pub fn render_mermaid(diagram: &SequenceDiagram) -> Result<String> {
    let aliases: HashMap<&str, String> = diagram
        .lifelines
        .iter()
        .map(|l| (l.id.as_str(), format!("P{}", l.order)))
        .collect();
    let alias = |id: &str| aliases.get(id).cloned().unwrap_or_else(|| sanitize(id));

    let participants: Vec<Participant> = diagram
        .lifelines
        .iter()
        .map(|l| Participant {
            alias: alias(&l.id),
            label: sanitize(&l.name),
        })
        .collect();

    let (root, boxes): (Vec<&ActivationBox>, Vec<&ActivationBox>) = diagram
        .activations
        .iter()
        .partition(|b| b.start_sequence == 0);
    let last = diagram.messages.last().map_or(0, |m| m.sequence_number);

    let mut writer = StepWriter {
        fragments: diagram.fragments.iter().map(|f| (f.id.as_str(), f)).collect(),
        steps: Vec::new(),
        open: Vec::new(),
    };

    for b in &root {
        writer.activation("activate", &alias(&b.lifeline_id));
    }

    for message in &diagram.messages {
        let chain = writer.chain(message.fragment_id.as_deref(), message.operand_index);
        writer.enter(&chain);

        let indent = writer.indent();
        writer.steps.push(Step {
            kind: "message",
            indent,
            from: alias(&message.from_lifeline),
            to: alias(&message.to_lifeline),
            arrow: arrow(message.message_type),
            label: sanitize(&message.label),
            ..Step::default()
        });

        for b in boxes.iter().filter(|b| b.end_sequence == message.sequence_number) {
            writer.activation("deactivate", &alias(&b.lifeline_id));
        }
        for b in boxes.iter().filter(|b| b.start_sequence == message.sequence_number) {
            writer.activation("activate", &alias(&b.lifeline_id));
        }
    }

    writer.enter(&[]);
    for b in boxes.iter().filter(|b| b.end_sequence > last) {
        writer.activation("deactivate", &alias(&b.lifeline_id));
    }
    for b in &root {
        writer.activation("deactivate", &alias(&b.lifeline_id));
    }

    let mut context = Context::new();
    context.insert("title", &sanitize(&diagram.title));
    context.insert("participants", &participants);
    context.insert("steps", &writer.steps);

    let mut tera = Tera::default();
    tera.add_raw_template("sequence.mmd", MERMAID_TEMPLATE)?;
    Ok(tera.render("sequence.mmd", &context)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sequence::model::{FragmentOperand, Lifeline, Message, ParticipantKind};

    fn lifeline(id: &str, name: &str, order: usize) -> Lifeline {
        Lifeline {
            id: id.to_string(),
            name: name.to_string(),
            qualified_name: name.to_string(),
            participant_kind: ParticipantKind::Class,
            order,
            is_entry: order == 0,
        }
    }

    fn message(n: usize, from: &str, to: &str, label: &str, message_type: MessageType, fragment: Option<(&str, usize)>) -> Message {
        Message {
            id: format!("msg_{}", n),
            sequence_number: n,
            from_lifeline: from.to_string(),
            to_lifeline: to.to_string(),
            label: label.to_string(),
            message_type,
            fragment_id: fragment.map(|(id, _)| id.to_string()),
            operand_index: fragment.map(|(_, index)| index),
            source_line: None,
        }
    }

    fn diagram() -> SequenceDiagram {
        SequenceDiagram {
            title: "app.main".to_string(),
            entry_point: "main".to_string(),
            lifelines: vec![lifeline("a", "App", 0), lifeline("b", "Repo", 1)],
            messages: vec![
                message(1, "a", "b", "load()", MessageType::Sync, None),
                message(2, "b", "a", "rows", MessageType::Return, None),
                message(3, "a", "b", "save(x; y)", MessageType::Sync, Some(("d", 0))),
                message(4, "a", "a", "log()", MessageType::SelfCall, Some(("d", 1))),
            ],
            activations: vec![
                ActivationBox { lifeline_id: "a".into(), start_sequence: 0, end_sequence: 4, nesting_level: 0 },
                ActivationBox { lifeline_id: "b".into(), start_sequence: 1, end_sequence: 2, nesting_level: 0 },
                ActivationBox { lifeline_id: "b".into(), start_sequence: 3, end_sequence: 4, nesting_level: 0 },
                ActivationBox { lifeline_id: "a".into(), start_sequence: 4, end_sequence: 5, nesting_level: 1 },
            ],
            fragments: vec![CombinedFragment {
                id: "d".to_string(),
                fragment_type: FragmentType::Alt,
                operands: vec![
                    FragmentOperand { branch_id: "d:branch:0".into(), guard: "ok".into(), message_ids: vec!["msg_3".into()] },
                    FragmentOperand { branch_id: "d:branch:1".into(), guard: "else".into(), message_ids: vec!["msg_4".into()] },
                ],
                covered_lifelines: vec!["a".into(), "b".into()],
                start_sequence: Some(3),
                end_sequence: Some(4),
                parent_id: None,
                parent_operand: None,
            }],
        }
    }

    #[test]
    fn test_render_mermaid() {
        let text = render_mermaid(&diagram()).unwrap();
        let lines: Vec<&str> = text.lines().map(str::trim_end).collect();
        assert_eq!(
            lines,
            vec![
                "sequenceDiagram",
                "    title app.main",
                "    participant P0 as App",
                "    participant P1 as Repo",
                "    activate P0",
                "    P0->>P1: load()",
                "    activate P1",
                "    P1-->>P0: rows",
                "    deactivate P1",
                "    alt ok",
                "        P0->>P1: save(x, y)",
                "        activate P1",
                "    else else",
                "        P0->>P0: log()",
                "        deactivate P1",
                "        activate P0",
                "    end",
                "    deactivate P0",
                "    deactivate P0",
            ]
        );
    }

    #[test]
    fn test_skipped_operands_still_get_dividers() {
        let mut diagram = diagram();
        diagram.messages.truncate(2);
        diagram.messages.push(message(3, "a", "a", "log()", MessageType::SelfCall, Some(("d", 1))));
        diagram.activations.truncate(2);

        let text = render_mermaid(&diagram).unwrap();
        assert!(text.contains("    alt ok\n    else else\n        P0->>P0: log()\n    end"));
    }
}
