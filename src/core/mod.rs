// src/core/mod.rs
mod engine;
mod parser;
mod metrics;
mod symbol_id;
mod tree_utils;
mod type_resolver;

// Call-flow graph construction
mod call_graph;

// Language-specific front-ends
mod languages;

// Sequence diagrams
mod sequence;

pub use call_graph::{
    CallEdge, CallGraph, CallNode, CallType, DecisionNode, DecisionType, Diagnostic, ExtractionMode, NodeKind,
    ResolutionStatus,
};
pub use languages::DefinitionKind;
pub use sequence::{render_mermaid, SequenceDiagram};

// Export the main engine
pub use engine::{CallFlowEngine, EntryPoint, ExtractOptions};
