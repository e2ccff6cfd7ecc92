//! Run Monitoring Module
//!
//! Provides utilities for tracking resource usage and the instance
//! execution timeline during workflow runs.
//!
//! # Components
//!
//! - [`ResourceMonitor`]: CPU and memory usage tracking
//! - [`ExecutionTimeline`]: Instance lifecycle timing for Gantt charts

pub mod resource;
pub mod timeline;

pub use resource::{ResourceMonitor, ResourceSample, ResourceSummary};
pub use timeline::{EventType, ExecutionTimeline, TimelineEvent};
