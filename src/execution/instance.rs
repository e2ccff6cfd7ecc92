//! Task Instances and Fingerprints
//!
//! A [`TaskInstance`] is one concrete execution of a descriptor against a
//! bound input tuple. Its [`Fingerprint`] is a BLAKE3 hash over the
//! descriptor identity, the command template source and every bound input:
//! file inputs contribute their absolute path, size and modification time,
//! so a changed input naturally produces a new fingerprint and no explicit
//! cache invalidation ever happens.

use std::fs;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

use crate::channel::Item;
use crate::execution::scheduler::InstanceState;
use crate::workflow::TaskDescriptor;

/// Deterministic identity of a task instance, used as the cache key and
/// as the work-directory name.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Computes the fingerprint for one bound input tuple.
    pub fn compute(descriptor: &TaskDescriptor, inputs: &[Item]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(descriptor.name.as_bytes());
        hasher.update(&[0]);
        hasher.update(descriptor.template.source().as_bytes());
        hasher.update(&[0]);
        for item in inputs {
            feed_item(&mut hasher, item);
        }
        Fingerprint(hasher.finalize().into())
    }

    /// 64-character lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(64);
        for byte in &self.0 {
            out.push_str(&format!("{:02x}", byte));
        }
        out
    }

    /// Work-directory key: first two hex chars, then the remainder, so
    /// directories shard instead of piling up in one flat listing.
    pub fn dir_key(&self) -> (String, String) {
        let hex = self.to_hex();
        (hex[..2].to_string(), hex[2..].to_string())
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

/// Streams one item into the hasher with type prefixes and delimiters so
/// distinct structures never collide byte-wise.
fn feed_item(hasher: &mut blake3::Hasher, item: &Item) {
    match item {
        Item::Str(s) => {
            hasher.update(b"s:");
            hasher.update(s.as_bytes());
        }
        Item::Int(n) => {
            hasher.update(b"i:");
            hasher.update(&n.to_le_bytes());
        }
        Item::File(path) => {
            hasher.update(b"f:");
            hasher.update(path.to_string_lossy().as_bytes());
            if let Ok(meta) = fs::metadata(path) {
                hasher.update(&meta.len().to_le_bytes());
                if let Ok(mtime) = meta.modified() {
                    let nanos = mtime
                        .duration_since(UNIX_EPOCH)
                        .map(|d| d.as_nanos())
                        .unwrap_or(0);
                    hasher.update(&nanos.to_le_bytes());
                }
            }
        }
        Item::List(items) => {
            hasher.update(b"[");
            for inner in items {
                feed_item(hasher, inner);
                hasher.update(b",");
            }
            hasher.update(b"]");
        }
        Item::Tuple(items) => {
            hasher.update(b"(");
            for inner in items {
                feed_item(hasher, inner);
                hasher.update(b",");
            }
            hasher.update(b")");
        }
    }
}

/// One concrete execution of a descriptor.
#[derive(Debug)]
pub struct TaskInstance {
    /// Monotonic id within the run.
    pub id: u64,
    /// Index of the owning task in the graph.
    pub task_index: usize,
    /// Owning task's name.
    pub task_name: String,
    /// Bound input values, one per port.
    pub inputs: Vec<Item>,
    /// Deterministic identity.
    pub fingerprint: Fingerprint,
    /// Current lifecycle state.
    pub state: InstanceState,
    /// How many dispatches have happened (retries increment this).
    pub attempts: u32,
    /// Rendered tag, if the descriptor declares one.
    pub tag: Option<String>,
    /// Fingerprint-keyed sandbox directory.
    pub work_dir: PathBuf,
    /// True when the result was replayed from the cache.
    pub cached: bool,
    /// Tail of captured stderr for failed instances.
    pub stderr_tail: Option<String>,
}

impl TaskInstance {
    /// Join key for keyed output ports, taken from the first keyable input.
    pub fn join_key(&self) -> Option<String> {
        self.inputs.iter().find_map(Item::join_key)
    }

    /// Display name used in logs and the timeline.
    pub fn display_name(&self) -> String {
        match &self.tag {
            Some(tag) => format!("{} ({})", self.task_name, tag),
            None => format!("{}#{}", self.task_name, self.id),
        }
    }
}
