/*
[INPUT]:  Task display names supplied by automation tasks
[OUTPUT]: Task identity and its config namespace
[POS]:    Data layer - map key for every per-task structure
[UPDATE]: When task identity gains new attributes
*/

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

/// Identity of an automation task that can take breaks.
///
/// Two tasks are the same task iff their display names are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Task {
    name: Arc<str>,
}

impl Task {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Config namespace: lower-cased name with spaces removed
    pub fn sanitized_name(&self) -> String {
        self.name.to_lowercase().replace(' ', "")
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl From<&str> for Task {
    fn from(name: &str) -> Self {
        Task::new(name)
    }
}

/// One scheduled suspension of a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakWindow {
    pub task: Task,
    pub ends_at: DateTime<Utc>,
}

impl BreakWindow {
    pub fn has_elapsed(&self, now: DateTime<Utc>) -> bool {
        now >= self.ends_at
    }
}

/// Per-task break statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BreakStats {
    pub started_at: Option<DateTime<Utc>>,
    pub break_count: u32,
}
