//! Execution Timeline
//!
//! Tracks job start/end times for the end-of-run timing report and an
//! ASCII Gantt chart.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

/// Type of timeline event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventType {
    /// Job started executing
    Started,
    /// Job completed successfully
    Completed,
    /// Job failed or was terminated
    Failed,
}

/// A single event in the execution timeline.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    /// Display name of the job
    pub job: String,
    /// Rule the job belongs to
    pub rule: String,
    pub event_type: EventType,
    pub timestamp: Instant,
}

/// Accumulated timing for all jobs of one rule.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleTiming {
    pub jobs: usize,
    pub failed: usize,
    pub total: Duration,
    pub longest: Duration,
}

/// Tracks the execution timeline of a run.
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

    /// Records an event for a job.
    pub fn add_event(
        &mut self,
        job: impl Into<String>,
        rule: impl Into<String>,
        event_type: EventType,
    ) {
        self.events.push(TimelineEvent {
            job: job.into(),
            rule: rule.into(),
            event_type,
            timestamp: Instant::now(),
        });
    }

    /// Returns the total elapsed time since timeline creation.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// (start, end, rule, failed) per finished job, keyed by job name.
    fn spans(&self) -> HashMap<&str, (Duration, Duration, &str, bool)> {
        let mut starts: HashMap<&str, Duration> = HashMap::new();
        let mut spans = HashMap::new();

        for event in &self.events {
            let at = event.timestamp.duration_since(self.start_time);
            match event.event_type {
                EventType::Started => {
                    starts.insert(event.job.as_str(), at);
                }
                EventType::Completed | EventType::Failed => {
                    if let Some(&start) = starts.get(event.job.as_str()) {
                        let failed = event.event_type == EventType::Failed;
                        spans.insert(event.job.as_str(), (start, at, event.rule.as_str(), failed));
                    }
                }
            }
        }
        spans
    }

    /// Sums finished job durations per rule.
    pub fn rule_summary(&self) -> BTreeMap<String, RuleTiming> {
        let mut summary: BTreeMap<String, RuleTiming> = BTreeMap::new();
        for (_, (start, end, rule, failed)) in self.spans() {
            let duration = end - start;
            let timing = summary.entry(rule.to_string()).or_insert(RuleTiming {
                jobs: 0,
                failed: 0,
                total: Duration::ZERO,
                longest: Duration::ZERO,
            });
            timing.jobs += 1;
            timing.failed += usize::from(failed);
            timing.total += duration;
            timing.longest = timing.longest.max(duration);
        }
        summary
    }

    /// Generates an ASCII Gantt chart representation.
    ///
    /// Each job is shown as a bar indicating when it ran relative to the
    /// total execution time.
    pub fn gantt_chart(&self) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");

        let total_time = self.elapsed().as_millis();
        if total_time == 0 {
            return output;
        }

        // Scale to 50 characters width
        let scale = 50.0 / total_time as f64;

        let mut sorted: Vec<_> = self.spans().into_iter().collect();
        sorted.sort_by_key(|(job, (start, _, _, _))| (*start, job.to_string()));

        for (job, (start, end, _, _)) in sorted {
            let start_ms = start.as_millis();
            let duration_ms = (end - start).as_millis();

            let start_pos = (start_ms as f64 * scale) as usize;
            let width = (duration_ms as f64 * scale).max(1.0) as usize;

            let mut bar = " ".repeat(start_pos);
            bar.push_str(&"#".repeat(width));

            output.push_str(&format!(
                "{:20} |{}| ({} ms)\n",
                truncate(job, 20),
                bar,
                duration_ms
            ));
        }

        output.push_str(&format!("\nTotal: {} ms\n", total_time));
        output
    }
}

impl Default for ExecutionTimeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Pads or truncates a string to exactly `max_len` characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_timeline_creation() {
        let timeline = ExecutionTimeline::new();
        assert!(timeline.events.is_empty());
    }

    #[test]
    fn test_single_job_duration() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("trim[id=s1]", "trim", EventType::Started);
        thread::sleep(Duration::from_millis(50));
        timeline.add_event("trim[id=s1]", "trim", EventType::Completed);

        let summary = timeline.rule_summary();
        assert!(summary["trim"].longest >= Duration::from_millis(50));
        assert_eq!(summary["trim"].failed, 0);
    }

    #[test]
    fn test_unfinished_jobs_not_summarized() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("trim[id=s1]", "trim", EventType::Started);
        assert!(timeline.rule_summary().is_empty());
    }

    #[test]
    fn test_rule_summary() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("trim[id=s1]", "trim", EventType::Started);
        timeline.add_event("trim[id=s2]", "trim", EventType::Started);
        thread::sleep(Duration::from_millis(20));
        timeline.add_event("trim[id=s1]", "trim", EventType::Completed);
        timeline.add_event("trim[id=s2]", "trim", EventType::Failed);
        timeline.add_event("aggregate", "aggregate", EventType::Started);
        timeline.add_event("aggregate", "aggregate", EventType::Completed);

        let summary = timeline.rule_summary();
        assert_eq!(summary.len(), 2);

        let trim = &summary["trim"];
        assert_eq!(trim.jobs, 2);
        assert_eq!(trim.failed, 1);
        assert!(trim.longest >= Duration::from_millis(20));
        assert!(trim.total >= trim.longest);
    }

    #[test]
    fn test_gantt_chart_generation() {
        let mut timeline = ExecutionTimeline::new();

        timeline.add_event("step1", "a", EventType::Started);
        thread::sleep(Duration::from_millis(50));
        timeline.add_event("step1", "a", EventType::Completed);

        timeline.add_event("step2", "b", EventType::Started);
        thread::sleep(Duration::from_millis(50));
        timeline.add_event("step2", "b", EventType::Completed);

        let chart = timeline.gantt_chart();
        assert!(chart.contains("step1"));
        assert!(chart.contains("step2"));
        assert!(chart.contains("Total:"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abc", 5), "abc  ");
        assert_eq!(truncate("primer_mismatch[id=sample_01]", 10), "primer_...");
    }
}
