//! Workflow Definition Module
//!
//! Provides the types for declaring a workflow: typed command templates,
//! task descriptors with their ports and directives, and the builder that
//! assembles everything into an immutable graph.
//!
//! # Structure
//!
//! - [`template`]: Typed command templates (literals + placeholders)
//! - [`descriptor`]: Task descriptors, ports and directives
//! - [`builder`]: WorkflowBuilder and the immutable WorkflowGraph

pub mod builder;
pub mod descriptor;
pub mod template;

pub use builder::{ChannelRef, TaskNode, WorkflowBuilder, WorkflowGraph};
pub use descriptor::{
    InputPort, InputShape, JoinMode, OutputArity, OutputPort, PublishMode, PublishSpec,
    TaskDescriptor,
};
pub use template::{CommandTemplate, Segment};
