use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;

/// Scheduler operational metrics, reported by the bench driver.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    /// Total tasks executed by name.
    pub tasks_executed: HashMap<String, u64>,
    /// Average task duration by task name.
    pub avg_task_duration: HashMap<String, Duration>,
    /// Most task records live at once.
    pub peak_live_tasks: usize,
    /// Most arena bytes in use at once.
    pub peak_arena_bytes: usize,
    /// `wait` calls that returned success.
    pub operations_completed: u64,
    /// `wait` calls that returned the first task failure.
    pub operations_aborted: u64,
    /// Wall time of the most recent `wait`.
    pub last_wait: Duration,
}

impl SchedulerMetrics {
    /// Record a task execution.
    pub fn record_execution(&mut self, task_name: &str, duration: Duration) {
        *self.tasks_executed.entry(task_name.to_string()).or_default() += 1;

        let count = self.tasks_executed[task_name];
        let prev_avg = self
            .avg_task_duration
            .get(task_name)
            .copied()
            .unwrap_or_default();

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let new_avg = if count == 1 {
            duration
        } else {
            let prev_nanos = prev_avg.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };

        self.avg_task_duration
            .insert(task_name.to_string(), new_avg);
    }

    /// Fold per-task counts and averages recorded by one worker.
    pub fn merge(&mut self, other: &SchedulerMetrics) {
        for (name, &theirs) in &other.tasks_executed {
            let ours = self.tasks_executed.get(name).copied().unwrap_or(0);
            let total = ours + theirs;
            if total == 0 {
                continue;
            }
            let our_avg = self.avg_task_duration.get(name).copied().unwrap_or_default();
            let their_avg = other.avg_task_duration.get(name).copied().unwrap_or_default();
            let avg_nanos = (our_avg.as_nanos() as f64 * ours as f64
                + their_avg.as_nanos() as f64 * theirs as f64)
                / total as f64;

            self.tasks_executed.insert(name.clone(), total);
            self.avg_task_duration
                .insert(name.clone(), Duration::from_nanos(avg_nanos as u64));
        }
    }

    /// Tasks executed across all kinds.
    pub fn total_tasks(&self) -> u64 {
        self.tasks_executed.values().sum()
    }

    /// JSON snapshot for structured log lines.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
