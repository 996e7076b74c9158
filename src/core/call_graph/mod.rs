// src/core/call_graph/mod.rs
//! Call-flow graph construction
//!
//! The builder walks function bodies depth-first from an entry point. Each
//! call site goes through the resolver, which either finds a project
//! definition (possibly in another file) or classifies the call as external.

mod builder;
mod model;
mod resolution;

pub use builder::{count_call_sites, BuildOptions, GraphBuilder};
pub use model::{
    BranchInfo, CallEdge, CallGraph, CallNode, CallType, DecisionNode, DecisionType, Diagnostic, ExternalCallNode,
    ExtractionMode, IgnoredCall, NodeKind, ResolutionStatus, ReturnNode, StatementNode,
};
pub use resolution::{Resolution, ResolvedTarget, Resolver};
