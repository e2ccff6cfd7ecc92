//! Execution Timeline
//!
//! Records instance lifecycle events during a run for generating
//! timing reports and Gantt charts.

use std::collections::HashMap;
use std::time::Instant;

/// Type of timeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Instance created from a complete input set
    Submitted,
    /// Instance dispatched to a worker
    Started,
    /// Instance re-dispatched after a failed attempt
    Retried,
    /// Instance completed successfully
    Completed,
    /// Instance failed permanently
    Failed,
    /// Instance replayed from the cache without running
    CacheHit,
}

/// A single event in the execution timeline.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    /// Display name of the instance
    pub instance: String,
    /// Type of event
    pub event_type: EventType,
    /// When the event occurred
    pub timestamp: Instant,
}

/// Tracks the execution timeline of a run.
///
/// Records when each instance starts, completes, or fails, enabling
/// generation of Gantt charts and timing reports.
#[derive(Debug, Clone)]
pub struct ExecutionTimeline {
    events: Vec<TimelineEvent>,
    start_time: Instant,
}

impl ExecutionTimeline {
    /// Creates a new timeline starting now.
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            start_time: Instant::now(),
        }
    }

    /// Records an event for an instance.
    pub fn add_event(&mut self, instance: String, event_type: EventType) {
        self.events.push(TimelineEvent {
            instance,
            event_type,
            timestamp: Instant::now(),
        });
    }

    /// Returns all recorded events.
    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    /// Returns the total elapsed time since timeline creation.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// Generates an ASCII Gantt chart representation.
    ///
    /// Each instance is shown as a bar indicating when it ran relative
    /// to the total execution time. Cache hits have no running span and
    /// do not get a bar.
    pub fn gantt_chart(&self) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");

        let total_time = Instant::now().duration_since(self.start_time).as_millis();
        if total_time == 0 {
            return output;
        }

        // Scale to 50 characters width
        let scale = 50.0 / total_time as f64;

        let mut spans: HashMap<String, (u128, u128)> = HashMap::new();
        for event in &self.events {
            let elapsed = event.timestamp.duration_since(self.start_time).as_millis();
            match event.event_type {
                EventType::Started => {
                    spans.entry(event.instance.clone()).or_insert((elapsed, 0)).0 = elapsed;
                }
                EventType::Completed | EventType::Failed => {
                    if let Some(span) = spans.get_mut(&event.instance) {
                        span.1 = elapsed;
                    }
                }
                EventType::Submitted | EventType::Retried | EventType::CacheHit => {}
            }
        }

        let mut sorted: Vec<_> = spans.into_iter().collect();
        sorted.sort_by_key(|(_, (start, _))| *start);

        for (instance, (start, end)) in sorted {
            if end > start {
                let start_pos = (start as f64 * scale) as usize;
                let width = ((end - start) as f64 * scale).max(1.0) as usize;

                let mut bar = " ".repeat(start_pos);
                bar.push_str(&"#".repeat(width));

                output.push_str(&format!(
                    "{:20} |{}| ({} ms)\n",
                    truncate(&instance, 20),
                    bar,
                    end - start
                ));
            }
        }

        output.push_str(&format!("\nTotal: {} ms\n", total_time));
        output
    }

    /// Returns running durations per instance in milliseconds, measured
    /// from first dispatch to terminal event.
    pub fn durations(&self) -> HashMap<String, u128> {
        let mut starts: HashMap<String, u128> = HashMap::new();
        let mut durations: HashMap<String, u128> = HashMap::new();

        for event in &self.events {
            let elapsed = event.timestamp.duration_since(self.start_time).as_millis();
            match event.event_type {
                EventType::Started => {
                    starts.insert(event.instance.clone(), elapsed);
                }
                EventType::Completed | EventType::Failed => {
                    if let Some(start) = starts.get(&event.instance) {
                        durations.insert(event.instance.clone(), elapsed - start);
                    }
                }
                EventType::Submitted | EventType::Retried | EventType::CacheHit => {}
            }
        }

        durations
    }
}

impl Default for ExecutionTimeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Truncates a string to a maximum length.
fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        format!("{}...", &s[..max_len - 3])
    }
}
