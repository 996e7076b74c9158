// src/core/sequence/mod.rs
//! Sequence diagrams derived from a finished call graph

mod model;
mod render;
mod transformer;

pub use model::{
    ActivationBox, CombinedFragment, FragmentOperand, FragmentType, Lifeline, Message, MessageType, ParticipantKind,
    SequenceDiagram,
};
pub use render::render_mermaid;
pub use transformer::transform;
