//! Input Correlation
//!
//! The [`Joiner`] buffers items arriving on a task's input ports and emits
//! a complete input tuple whenever every port has a correlated item:
//! positionally (nth item of each port pairs with nth of the others) or by
//! join key (a tuple's leading identifier).
//!
//! When every port has closed, whatever is left in the buffers never
//! completed a join. Those partial joins are discarded and reported as
//! orphan warnings, never silently completed with missing data.

use std::collections::{BTreeMap, VecDeque};

use log::warn;

use crate::channel::Item;
use crate::error::{EngineError, Result};
use crate::workflow::JoinMode;

/// Correlates items across one task's input ports.
pub struct Joiner {
    task: String,
    mode: JoinMode,
    port_names: Vec<String>,
    /// Positional buffers, one queue per port.
    positional: Vec<VecDeque<Item>>,
    /// Key-based buffers: key -> one queue per port. BTreeMap keeps orphan
    /// reporting deterministic.
    keyed: BTreeMap<String, Vec<VecDeque<Item>>>,
    closed: Vec<bool>,
}

impl Joiner {
    /// Creates a joiner for a task with the given input port names.
    pub fn new(task: impl Into<String>, mode: JoinMode, port_names: Vec<String>) -> Self {
        let ports = port_names.len();
        Self {
            task: task.into(),
            mode,
            port_names,
            positional: (0..ports).map(|_| VecDeque::new()).collect(),
            keyed: BTreeMap::new(),
            closed: vec![false; ports],
        }
    }

    /// Number of input ports.
    pub fn ports(&self) -> usize {
        self.port_names.len()
    }

    /// Feeds one item into a port. Returns every input tuple completed by
    /// this arrival (zero or more).
    pub fn offer(&mut self, port: usize, item: Item) -> Result<Vec<Vec<Item>>> {
        match self.mode {
            JoinMode::Positional => {
                self.positional[port].push_back(item);
                Ok(self.drain_positional())
            }
            JoinMode::ByKey => {
                let key = item.join_key().ok_or_else(|| {
                    EngineError::Configuration(format!(
                        "task '{}': item on port '{}' has no derivable join key ({})",
                        self.task, self.port_names[port], item.type_name()
                    ))
                })?;
                let ports = self.ports();
                let buffers = self
                    .keyed
                    .entry(key)
                    .or_insert_with(|| (0..ports).map(|_| VecDeque::new()).collect());
                buffers[port].push_back(item);

                let mut completed = Vec::new();
                while buffers.iter().all(|q| !q.is_empty()) {
                    completed.push(buffers.iter_mut().filter_map(|q| q.pop_front()).collect());
                }
                Ok(completed)
            }
        }
    }

    /// Marks a port as closed (its channel reached end-of-stream).
    pub fn close(&mut self, port: usize) {
        self.closed[port] = true;
    }

    /// True once every port has closed.
    pub fn all_closed(&self) -> bool {
        self.closed.iter().all(|c| *c)
    }

    /// Reports the partial joins left behind after all ports closed.
    pub fn orphans(&self) -> Vec<String> {
        let mut messages = Vec::new();

        match self.mode {
            JoinMode::Positional => {
                for (port, buffer) in self.positional.iter().enumerate() {
                    if !buffer.is_empty() {
                        let message = format!(
                            "task '{}': port '{}' closed with {} unmatched item(s)",
                            self.task,
                            self.port_names[port],
                            buffer.len()
                        );
                        warn!("{}", message);
                        messages.push(message);
                    }
                }
            }
            JoinMode::ByKey => {
                for (key, buffers) in &self.keyed {
                    let present = buffers.iter().filter(|q| !q.is_empty()).count();
                    if present > 0 {
                        let message = format!(
                            "task '{}': key '{}' incomplete at close ({} of {} ports)",
                            self.task,
                            key,
                            present,
                            buffers.len()
                        );
                        warn!("{}", message);
                        messages.push(message);
                    }
                }
            }
        }

        messages
    }

    fn drain_positional(&mut self) -> Vec<Vec<Item>> {
        let mut completed = Vec::new();
        while self.positional.iter().all(|q| !q.is_empty()) {
            completed.push(
                self.positional
                    .iter_mut()
                    .filter_map(|q| q.pop_front())
                    .collect(),
            );
        }
        completed
    }
}
