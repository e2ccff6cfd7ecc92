//! Workflow Execution Module
//!
//! Provides the machinery that turns a built workflow graph into
//! completed task instances.
//!
//! # Architecture
//!
//! - [`engine`]: The event loop orchestrating a whole run
//! - [`joiner`]: Correlation of input items into complete instance inputs
//! - [`scheduler`]: Bounded-concurrency dispatch queue
//! - [`instance`]: Fingerprints and per-instance state
//! - [`sandbox`]: Isolated per-instance execution directories

pub mod engine;
pub mod instance;
pub mod joiner;
pub mod sandbox;
pub mod scheduler;

pub use engine::{Engine, InstanceReport, RunConfig, RunResult};
pub use instance::{Fingerprint, TaskInstance};
pub use sandbox::{LocalBackend, SandboxBackend, TaskOutputs};
pub use scheduler::{InstanceState, Scheduler};
