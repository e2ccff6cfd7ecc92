//! Workflow Construction
//!
//! A [`WorkflowBuilder`] is threaded explicitly through construction calls,
//! collecting sources, operators and task descriptors into one immutable
//! [`WorkflowGraph`] before execution begins. There is no global mutable
//! workflow context.
//!
//! The graph is a DAG by construction: a task can only be wired to channels
//! that already exist when it is added. `build()` validates the wiring and
//! fails with a configuration error before anything runs.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{debug, info};

use crate::channel::{operators, pair_files, Channel, Item, Multiplicity};
use crate::error::{EngineError, Result};
use crate::workflow::descriptor::TaskDescriptor;

/// Opaque handle to a channel inside a builder/graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelRef(pub(crate) usize);

/// What produces a channel's items.
#[derive(Debug, Clone)]
pub(crate) enum Producer {
    /// A static source, filled and closed at build time.
    Source,
    /// An operator thread fed by another channel.
    Operator { upstream: usize },
    /// A task's output port, fed by the engine at run time.
    TaskOutput { task: usize },
}

/// One task and its wiring inside the graph.
pub struct TaskNode {
    /// The immutable descriptor.
    pub descriptor: Arc<TaskDescriptor>,
    /// Input channel indices, one per input port.
    pub(crate) inputs: Vec<usize>,
    /// Output channel indices, one per output port.
    pub(crate) outputs: Vec<usize>,
    /// Direct upstream task indices, used for starvation analysis.
    pub(crate) upstream: Vec<usize>,
}

/// Accumulates sources, operators and tasks into a workflow graph.
pub struct WorkflowBuilder {
    channels: Vec<Channel>,
    producers: Vec<Producer>,
    consumers: Vec<usize>,
    tasks: Vec<(TaskDescriptor, Vec<ChannelRef>)>,
    task_outputs: Vec<Vec<usize>>,
    handles: Vec<JoinHandle<()>>,
    warnings: Vec<String>,
}

impl WorkflowBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self {
            channels: Vec::new(),
            producers: Vec::new(),
            consumers: Vec::new(),
            tasks: Vec::new(),
            task_outputs: Vec::new(),
            handles: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Adds a static source channel carrying `items`, already closed.
    pub fn source(&mut self, items: Vec<Item>) -> ChannelRef {
        let ch = Channel::new(Multiplicity::Broadcast);
        for item in items {
            ch.emit(item);
        }
        ch.close();
        self.push_channel(ch, Producer::Source)
    }

    /// Adds a paired-file source: files group by shared key and emit as
    /// `Tuple[key, member...]`, one per complete key, in sorted key order.
    ///
    /// Malformed groups fail here; incomplete keys become run warnings.
    pub fn source_file_pairs(&mut self, paths: &[PathBuf], arity: usize) -> Result<ChannelRef> {
        let outcome = pair_files(paths, arity)?;
        self.warnings.extend(outcome.orphans.iter().cloned());
        Ok(self.source(outcome.into_items()))
    }

    /// Wires a map operator onto `upstream`.
    pub fn map<F>(&mut self, upstream: ChannelRef, f: F) -> Result<ChannelRef>
    where
        F: Fn(Item) -> Item + Send + 'static,
    {
        self.consumers[upstream.0] += 1;
        let (ch, handle) = operators::map(&self.channels[upstream.0], f)?;
        self.handles.push(handle);
        Ok(self.push_channel(ch, Producer::Operator { upstream: upstream.0 }))
    }

    /// Wires a collect barrier onto `upstream`.
    pub fn collect(&mut self, upstream: ChannelRef) -> Result<ChannelRef> {
        self.consumers[upstream.0] += 1;
        let (ch, handle) = operators::collect(&self.channels[upstream.0])?;
        self.handles.push(handle);
        Ok(self.push_channel(ch, Producer::Operator { upstream: upstream.0 }))
    }

    /// Wires a flatten operator onto `upstream`.
    pub fn flatten(&mut self, upstream: ChannelRef) -> Result<ChannelRef> {
        self.consumers[upstream.0] += 1;
        let (ch, handle) = operators::flatten(&self.channels[upstream.0])?;
        self.handles.push(handle);
        Ok(self.push_channel(ch, Producer::Operator { upstream: upstream.0 }))
    }

    /// Switches a not-yet-consumed channel to exclusive (single-consumer,
    /// destructive) multiplicity.
    pub fn mark_exclusive(&mut self, ch: ChannelRef) -> Result<()> {
        if self.consumers[ch.0] > 0 {
            return Err(EngineError::Configuration(
                "cannot mark a channel exclusive after wiring consumers to it".to_string(),
            ));
        }
        self.channels[ch.0].set_exclusive()
    }

    /// Adds a task wired to the given input channels and returns a channel
    /// handle per declared output port.
    pub fn add_task(
        &mut self,
        descriptor: TaskDescriptor,
        inputs: &[ChannelRef],
    ) -> Result<Vec<ChannelRef>> {
        let task_index = self.tasks.len();
        for input in inputs {
            self.consumers[input.0] += 1;
        }

        let mut output_refs = Vec::with_capacity(descriptor.outputs.len());
        let mut output_indices = Vec::with_capacity(descriptor.outputs.len());
        for _ in &descriptor.outputs {
            let ch = Channel::new(Multiplicity::Broadcast);
            let r = self.push_channel(ch, Producer::TaskOutput { task: task_index });
            output_indices.push(r.0);
            output_refs.push(r);
        }

        debug!(
            "Added task '{}' with {} input(s), {} output port(s)",
            descriptor.name,
            inputs.len(),
            output_refs.len()
        );
        self.tasks.push((descriptor, inputs.to_vec()));
        self.task_outputs.push(output_indices);
        Ok(output_refs)
    }

    /// Validates the wiring and produces the immutable graph.
    pub fn build(self) -> Result<WorkflowGraph> {
        let mut names: HashSet<&str> = HashSet::new();
        for (descriptor, inputs) in &self.tasks {
            if !names.insert(descriptor.name.as_str()) {
                return Err(EngineError::Configuration(format!(
                    "duplicate task name '{}'",
                    descriptor.name
                )));
            }

            if inputs.len() != descriptor.inputs.len() {
                return Err(EngineError::Configuration(format!(
                    "task '{}' declares {} input port(s) but is wired to {} channel(s)",
                    descriptor.name,
                    descriptor.inputs.len(),
                    inputs.len()
                )));
            }

            for name in descriptor.template.placeholders() {
                if !descriptor.covers_placeholder(name) {
                    return Err(EngineError::Configuration(format!(
                        "task '{}': placeholder '{{{}}}' is not covered by any input port",
                        descriptor.name, name
                    )));
                }
            }
            if let Some(tag) = &descriptor.tag {
                for name in tag.placeholders() {
                    if !descriptor.covers_placeholder(name) {
                        return Err(EngineError::Configuration(format!(
                            "task '{}': tag placeholder '{{{}}}' is not covered by any input port",
                            descriptor.name, name
                        )));
                    }
                }
            }

            for port in &descriptor.outputs {
                glob::Pattern::new(&port.pattern).map_err(|e| {
                    EngineError::Configuration(format!(
                        "task '{}': invalid output pattern '{}' on port '{}': {}",
                        descriptor.name, port.pattern, port.name, e
                    ))
                })?;
            }
        }

        // A consumer count above one on an exclusive channel means two
        // tasks (or a task and an operator) were wired to it.
        for (i, ch) in self.channels.iter().enumerate() {
            if ch.multiplicity() == Multiplicity::Exclusive && self.consumers[i] > 1 {
                return Err(EngineError::Configuration(format!(
                    "exclusive channel has {} consumers wired to it",
                    self.consumers[i]
                )));
            }
        }

        // Direct task-level upstream adjacency, tracing each input channel
        // through operator chains back to a producing task (if any).
        let mut nodes = Vec::with_capacity(self.tasks.len());
        for (task_index, (descriptor, inputs)) in self.tasks.into_iter().enumerate() {
            let mut upstream = Vec::new();
            for input in &inputs {
                if let Some(producer) = trace_producer_task(&self.producers, input.0) {
                    if !upstream.contains(&producer) {
                        upstream.push(producer);
                    }
                }
            }
            nodes.push(TaskNode {
                descriptor: Arc::new(descriptor),
                inputs: inputs.iter().map(|r| r.0).collect(),
                outputs: self.task_outputs[task_index].clone(),
                upstream,
            });
        }

        info!(
            "Workflow graph built: {} task(s), {} channel(s)",
            nodes.len(),
            self.channels.len()
        );

        Ok(WorkflowGraph {
            channels: self.channels,
            tasks: nodes,
            handles: self.handles,
            warnings: self.warnings,
        })
    }

    fn push_channel(&mut self, ch: Channel, producer: Producer) -> ChannelRef {
        self.channels.push(ch);
        self.producers.push(producer);
        self.consumers.push(0);
        ChannelRef(self.channels.len() - 1)
    }
}

impl Default for WorkflowBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Follows operator chains from a channel back to the task that feeds it.
fn trace_producer_task(producers: &[Producer], mut channel: usize) -> Option<usize> {
    loop {
        match &producers[channel] {
            Producer::Source => return None,
            Producer::Operator { upstream } => channel = *upstream,
            Producer::TaskOutput { task } => return Some(*task),
        }
    }
}

/// An immutable, validated workflow ready for execution.
pub struct WorkflowGraph {
    pub(crate) channels: Vec<Channel>,
    pub(crate) tasks: Vec<TaskNode>,
    pub(crate) handles: Vec<JoinHandle<()>>,
    pub(crate) warnings: Vec<String>,
}

impl std::fmt::Debug for WorkflowGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowGraph")
            .field("channels", &self.channels.len())
            .field("tasks", &self.tasks.len())
            .field("warnings", &self.warnings)
            .finish()
    }
}

impl WorkflowGraph {
    /// Number of tasks in the graph.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Build-time warnings (incomplete pairing keys).
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Looks up a task node by name.
    pub fn task(&self, name: &str) -> Option<&TaskNode> {
        self.tasks.iter().find(|n| n.descriptor.name == name)
    }
}
