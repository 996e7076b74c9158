// src/core/sequence/model.rs - sequence diagram data model
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantKind {
    Class,
    Module,
    External,
}

/// A vertical participant column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lifeline {
    pub id: String,
    pub name: String,
    pub qualified_name: String,
    pub participant_kind: ParticipantKind,
    /// Horizontal position, from 0
    pub order: usize,
    pub is_entry: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Sync,
    Async,
    Return,
    Create,
    Destroy,
    #[serde(rename = "self")]
    SelfCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sequence_number: usize,
    pub from_lifeline: String,
    pub to_lifeline: String,
    pub label: String,
    pub message_type: MessageType,
    /// Innermost fragment the message was emitted in
    pub fragment_id: Option<String>,
    /// Operand of that fragment
    pub operand_index: Option<usize>,
    pub source_line: Option<usize>,
}

impl Message {
    /// Messages that start work on the receiving lifeline
    pub fn is_invocation(&self) -> bool {
        matches!(self.message_type, MessageType::Sync | MessageType::SelfCall | MessageType::Create)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationBox {
    pub lifeline_id: String,
    pub start_sequence: usize,
    pub end_sequence: usize,
    pub nesting_level: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentType {
    Alt,
    Opt,
    Loop,
    Par,
    Try,
    Break,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentOperand {
    pub branch_id: String,
    pub guard: String,
    pub message_ids: Vec<String>,
}

/// A box grouping the messages of one decision, one operand per branch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedFragment {
    /// Same as the decision id
    pub id: String,
    pub fragment_type: FragmentType,
    pub operands: Vec<FragmentOperand>,
    pub covered_lifelines: Vec<String>,
    /// `None` while no branch of the decision has been expanded
    pub start_sequence: Option<usize>,
    pub end_sequence: Option<usize>,
    /// Enclosing fragment, when the decision sits inside another branch
    pub parent_id: Option<String>,
    pub parent_operand: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceDiagram {
    pub title: String,
    pub entry_point: String,
    pub lifelines: Vec<Lifeline>,
    pub messages: Vec<Message>,
    pub activations: Vec<ActivationBox>,
    pub fragments: Vec<CombinedFragment>,
}

impl SequenceDiagram {
    pub fn lifeline(&self, id: &str) -> Option<&Lifeline> {
        self.lifelines.iter().find(|l| l.id == id)
    }

    pub fn fragment(&self, id: &str) -> Option<&CombinedFragment> {
        self.fragments.iter().find(|f| f.id == id)
    }
}
