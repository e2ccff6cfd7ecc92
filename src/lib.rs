//! FlowRunner - Dataflow Workflow Execution Engine
//!
//! A library for declaring pipelines as dataflow graphs and executing
//! their shell commands in isolated, cached sandboxes. Tasks are wired
//! together with typed channels; every distinct input set becomes one
//! task instance, run with bounded parallelism and resumable across
//! invocations.
//!
//! # Architecture
//!
//! The library is organized into five main modules:
//!
//! - [`channel`]: Ordered item streams, operators and pairing sources
//! - [`workflow`]: Task descriptors, command templates and the graph builder
//! - [`execution`]: Joining, scheduling and sandboxed instance execution
//! - [`cache`]: Fingerprint-keyed store backing `resume`
//! - [`monitoring`]: Resource usage tracking and execution timeline
//!
//! # Example
//!
//! ```rust,no_run
//! use flowrunner::channel::Item;
//! use flowrunner::execution::{Engine, RunConfig};
//! use flowrunner::workflow::{InputShape, OutputPort, TaskDescriptor, WorkflowBuilder};
//!
//! fn main() -> flowrunner::Result<()> {
//!     let mut builder = WorkflowBuilder::new();
//!     let numbers = builder.source(vec![Item::Int(3), Item::Int(5), Item::Int(7)]);
//!
//!     let double = TaskDescriptor::new("double", "echo $((2 * {n})) > out.txt")?
//!         .with_input("n", InputShape::Value)
//!         .with_output(OutputPort::single("out", "out.txt"));
//!     builder.add_task(double, &[numbers])?;
//!
//!     let result = Engine::new(builder.build()?)
//!         .with_config(RunConfig {
//!             max_parallel: 4,
//!             ..RunConfig::default()
//!         })
//!         .run()?;
//!     assert!(result.success);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod channel;
pub mod error;
pub mod execution;
pub mod monitoring;
pub mod workflow;

// Re-export commonly used types
pub use channel::Item;
pub use error::{EngineError, Result};
pub use execution::{Engine, RunConfig, RunResult};
pub use workflow::{TaskDescriptor, WorkflowBuilder};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "FlowRunner";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_version() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_app_name() {
        assert_eq!(APP_NAME, "FlowRunner");
    }

    #[test]
    fn test_module_exports_descriptor() {
        let descriptor = TaskDescriptor::new("test", "echo hello").unwrap();
        assert_eq!(descriptor.name, "test");
        assert!(descriptor.inputs.is_empty());
    }

    #[test]
    fn test_module_exports_builder() {
        let mut builder = WorkflowBuilder::new();
        let _src = builder.source(vec![Item::Int(1)]);
        assert!(builder.build().unwrap().task_count() == 0);
    }

    #[test]
    fn test_version_format() {
        let parts: Vec<&str> = VERSION.split('.').collect();
        assert!(parts.len() >= 2, "Version should have at least major.minor");
        for part in parts {
            assert!(part.parse::<u32>().is_ok(), "Version components should be numeric");
        }
    }
}
