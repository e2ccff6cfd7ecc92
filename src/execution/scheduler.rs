//! Instance Scheduling
//!
//! Tracks instance lifecycle states and manages the ready queue with slot
//! accounting: a global concurrency ceiling plus optional per-label
//! ceilings. The scheduler itself holds no threads; the engine's
//! coordinating loop asks it what to dispatch next.

use std::collections::{HashMap, VecDeque};

use log::debug;

/// Lifecycle state of a task instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Created, inputs bound, not yet queued.
    Pending,
    /// Queued for dispatch.
    Ready,
    /// A worker is executing the sandbox.
    Running,
    /// Terminal: completed successfully (fresh or cache-replayed).
    Succeeded,
    /// Terminal: retries exhausted or non-retryable failure.
    Failed,
    /// Terminal: drained from the queue by a run-level stop.
    Cancelled,
}

impl InstanceState {
    /// True for states no transition leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstanceState::Succeeded | InstanceState::Failed | InstanceState::Cancelled
        )
    }
}

/// FIFO ready queue with global and per-label concurrency ceilings.
pub struct Scheduler {
    queue: VecDeque<(u64, Option<String>)>,
    running: usize,
    max_parallel: usize,
    label_limits: HashMap<String, usize>,
    label_running: HashMap<String, usize>,
}

impl Scheduler {
    /// Creates a scheduler with the given ceilings. `max_parallel` of zero
    /// is treated as one.
    pub fn new(max_parallel: usize, label_limits: HashMap<String, usize>) -> Self {
        Self {
            queue: VecDeque::new(),
            running: 0,
            max_parallel: max_parallel.max(1),
            label_limits,
            label_running: HashMap::new(),
        }
    }

    /// Enqueues an instance for dispatch.
    pub fn enqueue(&mut self, id: u64, label: Option<String>) {
        self.queue.push_back((id, label));
    }

    /// Picks the next dispatchable instance, if a slot is free.
    ///
    /// FIFO within a label; an instance whose label is at its ceiling is
    /// skipped over without blocking unlabeled work behind it.
    pub fn next_dispatch(&mut self) -> Option<u64> {
        if self.running >= self.max_parallel {
            return None;
        }
        let pos = self
            .queue
            .iter()
            .position(|(_, label)| self.label_has_capacity(label.as_deref()))?;
        let (id, label) = self.queue.remove(pos)?;

        self.running += 1;
        if let Some(label) = label {
            *self.label_running.entry(label).or_insert(0) += 1;
        }
        debug!(
            "Dispatching instance {} ({} of {} slots in use)",
            id, self.running, self.max_parallel
        );
        Some(id)
    }

    /// Releases the slots held by a finished instance.
    pub fn finish(&mut self, label: Option<&str>) {
        self.running = self.running.saturating_sub(1);
        if let Some(label) = label {
            if let Some(count) = self.label_running.get_mut(label) {
                *count = count.saturating_sub(1);
            }
        }
    }

    /// Empties the ready queue, returning the drained instance ids.
    pub fn drain(&mut self) -> Vec<u64> {
        self.queue.drain(..).map(|(id, _)| id).collect()
    }

    /// True when nothing is queued or running.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.running == 0
    }

    /// Number of instances currently dispatched.
    pub fn running(&self) -> usize {
        self.running
    }

    /// Number of instances waiting in the queue.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    fn label_has_capacity(&self, label: Option<&str>) -> bool {
        let Some(label) = label else { return true };
        let Some(limit) = self.label_limits.get(label) else {
            return true;
        };
        self.label_running.get(label).copied().unwrap_or(0) < *limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(s: &str) -> Option<String> {
        Some(s.to_string())
    }

    #[test]
    fn test_fifo_order() {
        let mut sched = Scheduler::new(4, HashMap::new());
        sched.enqueue(1, None);
        sched.enqueue(2, None);
        sched.enqueue(3, None);

        assert_eq!(sched.next_dispatch(), Some(1));
        assert_eq!(sched.next_dispatch(), Some(2));
        assert_eq!(sched.next_dispatch(), Some(3));
        assert_eq!(sched.next_dispatch(), None);
    }

    #[test]
    fn test_global_ceiling() {
        let mut sched = Scheduler::new(2, HashMap::new());
        for id in 1..=5 {
            sched.enqueue(id, None);
        }

        assert!(sched.next_dispatch().is_some());
        assert!(sched.next_dispatch().is_some());
        // Ceiling reached.
        assert_eq!(sched.next_dispatch(), None);
        assert_eq!(sched.running(), 2);
        assert_eq!(sched.queued(), 3);

        sched.finish(None);
        assert_eq!(sched.next_dispatch(), Some(3));
    }

    #[test]
    fn test_label_ceiling_skips_without_blocking() {
        let mut limits = HashMap::new();
        limits.insert("heavy".to_string(), 1);
        let mut sched = Scheduler::new(4, limits);

        sched.enqueue(1, label("heavy"));
        sched.enqueue(2, label("heavy"));
        sched.enqueue(3, None);

        assert_eq!(sched.next_dispatch(), Some(1));
        // Instance 2 is skipped (label at ceiling); 3 dispatches instead.
        assert_eq!(sched.next_dispatch(), Some(3));
        assert_eq!(sched.next_dispatch(), None);

        sched.finish(Some("heavy"));
        assert_eq!(sched.next_dispatch(), Some(2));
    }

    #[test]
    fn test_unknown_label_uses_global_only() {
        let mut sched = Scheduler::new(2, HashMap::new());
        sched.enqueue(1, label("anything"));
        assert_eq!(sched.next_dispatch(), Some(1));
    }

    #[test]
    fn test_drain_empties_queue() {
        let mut sched = Scheduler::new(1, HashMap::new());
        sched.enqueue(1, None);
        sched.enqueue(2, None);
        assert_eq!(sched.next_dispatch(), Some(1));

        let drained = sched.drain();
        assert_eq!(drained, vec![2]);
        assert!(sched.queued() == 0);
        assert!(!sched.is_idle()); // instance 1 still running

        sched.finish(None);
        assert!(sched.is_idle());
    }

    #[test]
    fn test_zero_ceiling_treated_as_one() {
        let mut sched = Scheduler::new(0, HashMap::new());
        sched.enqueue(1, None);
        assert_eq!(sched.next_dispatch(), Some(1));
        assert_eq!(sched.next_dispatch(), None);
    }

    #[test]
    fn test_instance_state_terminal() {
        assert!(InstanceState::Succeeded.is_terminal());
        assert!(InstanceState::Failed.is_terminal());
        assert!(InstanceState::Cancelled.is_terminal());
        assert!(!InstanceState::Running.is_terminal());
        assert!(!InstanceState::Ready.is_terminal());
        assert!(!InstanceState::Pending.is_terminal());
    }
}
