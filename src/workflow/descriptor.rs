//! Task Descriptors
//!
//! A [`TaskDescriptor`] is the immutable definition of one schedulable unit
//! of work: typed input ports, a command template, declared output patterns
//! and directives (publish target, retry policy, concurrency label). One
//! descriptor spawns many task instances, one per input tuple.
//!
//! # Example
//!
//! ```
//! use flowrunner::workflow::{InputShape, OutputPort, TaskDescriptor};
//!
//! let trim = TaskDescriptor::new("trim", "trimmomatic {reads_1} {reads_2} trimmed_*.fastq")
//!     .unwrap()
//!     .with_input("reads", InputShape::Tuple)
//!     .with_output(OutputPort::multi("trimmed", "trimmed_*.fastq"))
//!     .with_retries(2)
//!     .with_label("cpu_heavy");
//! assert_eq!(trim.name, "trim");
//! ```

use std::collections::HashMap;
use std::path::PathBuf;

use crate::channel::Item;
use crate::error::{EngineError, Result};
use crate::workflow::template::CommandTemplate;

/// The shape an input port accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputShape {
    /// A single scalar: string, integer or file.
    Value,
    /// A correlated record with a leading join key.
    Tuple,
    /// A list whose elements are all scalars. Nested input is a shape
    /// error; apply the `flatten` operator upstream instead.
    FlatList,
    /// A list that may contain nested lists or tuples.
    NestedList,
}

/// A declared input port.
#[derive(Debug, Clone)]
pub struct InputPort {
    /// Placeholder name bound to this port's item.
    pub name: String,
    /// Accepted item shape.
    pub shape: InputShape,
}

impl InputPort {
    /// Checks that an arriving item matches this port's declared shape.
    pub fn accepts(&self, item: &Item) -> Result<()> {
        let ok = match self.shape {
            InputShape::Value => {
                matches!(item, Item::Str(_) | Item::Int(_) | Item::File(_))
            }
            InputShape::Tuple => matches!(item, Item::Tuple(_)),
            InputShape::FlatList => matches!(item, Item::List(_)) && !item.is_nested(),
            InputShape::NestedList => matches!(item, Item::List(_)),
        };

        if ok {
            return Ok(());
        }

        let hint = if self.shape == InputShape::FlatList && item.is_nested() {
            "; apply the flatten operator upstream or declare the port as NestedList"
        } else {
            ""
        };
        Err(EngineError::Configuration(format!(
            "input port '{}' expects {:?} but received a {}{}",
            self.name,
            self.shape,
            item.type_name(),
            hint
        )))
    }
}

/// How many files an output port yields per instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputArity {
    /// Exactly one file: the port emits a `File` item. More than one match
    /// is a logic error.
    Single,
    /// Zero or more files: the port emits a sorted `List` of files.
    Multiple,
}

/// A declared output port with its glob pattern.
#[derive(Debug, Clone)]
pub struct OutputPort {
    /// Port name, used for cache manifests and downstream wiring.
    pub name: String,
    /// Glob pattern matched against the sandbox directory.
    pub pattern: String,
    /// Single-file or multi-file port.
    pub arity: OutputArity,
    /// Optional ports may match zero files after a clean exit.
    pub optional: bool,
    /// Keyed ports wrap their payload in a tuple carrying the instance's
    /// join key, so downstream key-based joins stay correlated.
    pub keyed: bool,
}

impl OutputPort {
    /// A mandatory single-file port.
    pub fn single(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
            arity: OutputArity::Single,
            optional: false,
            keyed: false,
        }
    }

    /// A mandatory multi-file port.
    pub fn multi(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
            arity: OutputArity::Multiple,
            optional: false,
            keyed: false,
        }
    }

    /// Marks the port optional (zero matches allowed).
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Marks the port keyed (payload wrapped with the instance join key).
    pub fn keyed(mut self) -> Self {
        self.keyed = true;
        self
    }
}

/// Where and how instance outputs are materialized for the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishMode {
    /// Copy the file, leaving the sandbox copy in place.
    Copy,
    /// Symlink into the publish directory (copies on non-unix).
    Link,
    /// Move the file out of the sandbox. Undermines cache replay; the
    /// store self-heals such entries to a miss.
    Move,
}

/// Publish directive for a descriptor.
#[derive(Debug, Clone)]
pub struct PublishSpec {
    /// User-facing destination directory.
    pub dir: PathBuf,
    /// Materialization mode.
    pub mode: PublishMode,
}

/// How a multi-input descriptor correlates items across its ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinMode {
    /// The nth item of each channel pairs with the nth of the others.
    Positional,
    /// Items pair by join key (a tuple's leading identifier).
    ByKey,
}

/// Immutable definition of one schedulable unit of work.
#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    /// Unique name within the workflow.
    pub name: String,
    /// Declared input ports, in binding order.
    pub inputs: Vec<InputPort>,
    /// Declared output ports.
    pub outputs: Vec<OutputPort>,
    /// Parsed command template.
    pub template: CommandTemplate,
    /// Optional publish directive.
    pub publish: Option<PublishSpec>,
    /// Concurrency label for per-label ceilings.
    pub label: Option<String>,
    /// How many times a failed instance is re-dispatched.
    pub retries: u32,
    /// Whether missing-output logic errors are also retried.
    pub retry_logic_errors: bool,
    /// Optional tag template, rendered per instance for reporting.
    pub tag: Option<CommandTemplate>,
    /// CPU hint exported to the sandboxed command.
    pub cpus: usize,
    /// Input correlation mode for multi-input descriptors.
    pub join: JoinMode,
}

impl TaskDescriptor {
    /// Creates a descriptor with the given name and command template.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Result<Self> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(EngineError::Configuration(
                "task name must not be empty".to_string(),
            ));
        }
        Ok(Self {
            name,
            inputs: Vec::new(),
            outputs: Vec::new(),
            template: CommandTemplate::parse(command)?,
            publish: None,
            label: None,
            retries: 0,
            retry_logic_errors: false,
            tag: None,
            cpus: 1,
            join: JoinMode::Positional,
        })
    }

    /// Declares an input port.
    pub fn with_input(mut self, name: impl Into<String>, shape: InputShape) -> Self {
        self.inputs.push(InputPort {
            name: name.into(),
            shape,
        });
        self
    }

    /// Declares an output port.
    pub fn with_output(mut self, port: OutputPort) -> Self {
        self.outputs.push(port);
        self
    }

    /// Sets the publish directive.
    pub fn publish_to(mut self, dir: impl Into<PathBuf>, mode: PublishMode) -> Self {
        self.publish = Some(PublishSpec {
            dir: dir.into(),
            mode,
        });
        self
    }

    /// Sets the concurrency label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Sets the retry count for execution errors.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Extends the retry directive to missing-output logic errors.
    pub fn retry_logic_errors(mut self) -> Self {
        self.retry_logic_errors = true;
        self
    }

    /// Sets a tag template rendered against the instance's bindings.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Result<Self> {
        self.tag = Some(CommandTemplate::parse(tag)?);
        Ok(self)
    }

    /// Sets the CPU hint.
    pub fn with_cpus(mut self, cpus: usize) -> Self {
        self.cpus = cpus;
        self
    }

    /// Switches input correlation to key-based joining.
    pub fn join_by_key(mut self) -> Self {
        self.join = JoinMode::ByKey;
        self
    }

    /// Builds the placeholder bindings for one bound input tuple.
    ///
    /// Each port binds its name to the item's rendered text. Tuple ports
    /// additionally bind `<port>_key` to the join key and `<port>_1`,
    /// `<port>_2`, ... to the payload members.
    pub fn bind_inputs(&self, inputs: &[Item]) -> HashMap<String, String> {
        let mut bindings = HashMap::new();
        for (port, item) in self.inputs.iter().zip(inputs) {
            bindings.insert(port.name.clone(), item.shell_word());
            if let Item::Tuple(members) = item {
                if let Some(key) = members.first() {
                    bindings.insert(format!("{}_key", port.name), key.shell_word());
                }
                for (i, member) in members.iter().skip(1).enumerate() {
                    bindings.insert(format!("{}_{}", port.name, i + 1), member.shell_word());
                }
            }
        }
        bindings
    }

    /// Checks whether a placeholder name is covered by the declared ports.
    pub fn covers_placeholder(&self, name: &str) -> bool {
        for port in &self.inputs {
            if port.name == name {
                return true;
            }
            if port.shape == InputShape::Tuple {
                if name == format!("{}_key", port.name) {
                    return true;
                }
                if let Some(rest) = name.strip_prefix(&format!("{}_", port.name)) {
                    if !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()) {
                        return true;
                    }
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_builder_chain() {
        let desc = TaskDescriptor::new("qc", "fastqc {reads} -o .")
            .unwrap()
            .with_input("reads", InputShape::Value)
            .with_output(OutputPort::multi("report", "*_fastqc.html"))
            .publish_to("results/qc", PublishMode::Copy)
            .with_label("light")
            .with_retries(1)
            .with_cpus(2);

        assert_eq!(desc.name, "qc");
        assert_eq!(desc.inputs.len(), 1);
        assert_eq!(desc.outputs.len(), 1);
        assert_eq!(desc.retries, 1);
        assert_eq!(desc.cpus, 2);
        assert_eq!(desc.label.as_deref(), Some("light"));
        assert!(desc.publish.is_some());
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(TaskDescriptor::new("  ", "echo hi").is_err());
    }

    #[test]
    fn test_input_shape_value_accepts_scalars() {
        let port = InputPort {
            name: "n".to_string(),
            shape: InputShape::Value,
        };
        assert!(port.accepts(&Item::Int(3)).is_ok());
        assert!(port.accepts(&Item::file("/x")).is_ok());
        assert!(port.accepts(&Item::List(vec![])).is_err());
    }

    #[test]
    fn test_flat_list_rejects_nested_with_flatten_hint() {
        let port = InputPort {
            name: "files".to_string(),
            shape: InputShape::FlatList,
        };
        let nested = Item::List(vec![Item::List(vec![Item::Int(1)])]);
        let err = port.accepts(&nested).unwrap_err();
        assert!(err.to_string().contains("flatten"));

        let flat = Item::List(vec![Item::Int(1), Item::Int(2)]);
        assert!(port.accepts(&flat).is_ok());
    }

    #[test]
    fn test_nested_list_accepts_either() {
        let port = InputPort {
            name: "files".to_string(),
            shape: InputShape::NestedList,
        };
        assert!(port.accepts(&Item::List(vec![Item::List(vec![])])).is_ok());
        assert!(port.accepts(&Item::List(vec![Item::Int(1)])).is_ok());
        assert!(port.accepts(&Item::Int(1)).is_err());
    }

    #[test]
    fn test_bind_inputs_tuple_fields() {
        let desc = TaskDescriptor::new("trim", "trim {reads_1} {reads_2}")
            .unwrap()
            .with_input("reads", InputShape::Tuple);

        let tuple = Item::Tuple(vec![
            Item::str("sample"),
            Item::file("/d/sample_R1.fq"),
            Item::file("/d/sample_R2.fq"),
        ]);
        let bindings = desc.bind_inputs(&[tuple]);

        assert_eq!(bindings["reads"], "sample_R1.fq sample_R2.fq");
        assert_eq!(bindings["reads_key"], "sample");
        assert_eq!(bindings["reads_1"], "sample_R1.fq");
        assert_eq!(bindings["reads_2"], "sample_R2.fq");
    }

    #[test]
    fn test_covers_placeholder() {
        let desc = TaskDescriptor::new("t", "x")
            .unwrap()
            .with_input("reads", InputShape::Tuple)
            .with_input("genome", InputShape::Value);

        assert!(desc.covers_placeholder("reads"));
        assert!(desc.covers_placeholder("reads_key"));
        assert!(desc.covers_placeholder("reads_2"));
        assert!(desc.covers_placeholder("genome"));
        // Value ports bind only their own name.
        assert!(!desc.covers_placeholder("genome_1"));
        assert!(!desc.covers_placeholder("missing"));
    }

    #[test]
    fn test_output_port_flags() {
        let port = OutputPort::single("bam", "*.bam").optional().keyed();
        assert_eq!(port.arity, OutputArity::Single);
        assert!(port.optional);
        assert!(port.keyed);
    }

    #[test]
    fn test_tag_template() {
        let desc = TaskDescriptor::new("align", "bwa {reads}")
            .unwrap()
            .with_input("reads", InputShape::Tuple)
            .with_tag("align {reads_key}")
            .unwrap();
        assert!(desc.tag.is_some());
    }
}
