//! Run Monitoring Module
//!
//! Records when jobs start and finish so a run can end with a timing
//! report.
//!
//! # Components
//!
//! - [`ExecutionTimeline`]: Job start/end timing, per-rule summary and Gantt chart

pub mod timeline;

pub use timeline::{EventType, ExecutionTimeline, RuleTiming, TimelineEvent};
