/*
[INPUT]:  Task registration/lifecycle calls, per-task config bounds, wall clock
[OUTPUT]: Enablement map, planned breaks, active break windows, published snapshots and events
[POS]:    Scheduling layer - in-memory break bookkeeping shared with the automation FSM
[UPDATE]: When adding break operations or changing validation rules
[UPDATE]: 2026-10-15 Add planned breaks and per-task break statistics
*/

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::{ConfigStore, keys};
use crate::events::{
    ActiveBreaks, ActiveTasks, BreakScheduled, Enablement, EventHub, LogoutRequested,
};
use crate::interval::RandomInterval;
use crate::task::{BreakStats, BreakWindow, Task};

const SECONDS_PER_MINUTE: i64 = 60;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BreakError {
    #[error("task is not registered: {0}")]
    Unregistered(Task),

    #[error("{key} is not numeric: {value:?}")]
    NotNumeric { key: String, value: Option<String> },

    #[error("{from_key} ({from}) is greater than {to_key} ({to})")]
    InvertedBounds {
        from_key: String,
        from: i64,
        to_key: String,
        to: i64,
    },

    #[error("{key} ({minutes} minutes) is too far in the future")]
    OutOfRange { key: String, minutes: i64 },
}

/// How a task's break is taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakPolicy {
    /// Full logout/login cycle
    Logout,
    /// Stay logged in; only keep the idle timers from expiring
    IdleOnly,
}

#[derive(Debug, Clone, Default)]
struct TaskEntry {
    breaks_enabled: bool,
    planned: Option<DateTime<Utc>>,
    stats: BreakStats,
}

/// Per-task break bookkeeping.
///
/// Every mutation that changes a snapshot publishes it on the [`EventHub`].
pub struct BreakRegistry {
    tasks: HashMap<Task, TaskEntry>,
    active_tasks: ActiveTasks,
    active_breaks: ActiveBreaks,
    config: Arc<dyn ConfigStore>,
    clock: Arc<dyn Clock>,
    hub: EventHub,
}

impl std::fmt::Debug for BreakRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakRegistry")
            .field("tasks", &self.tasks.len())
            .field("active_tasks", &self.active_tasks)
            .field("active_breaks", &self.active_breaks)
            .finish_non_exhaustive()
    }
}

impl BreakRegistry {
    pub fn new(config: Arc<dyn ConfigStore>, clock: Arc<dyn Clock>, hub: EventHub) -> Self {
        Self {
            tasks: HashMap::new(),
            active_tasks: ActiveTasks::new(),
            active_breaks: ActiveBreaks::new(),
            config,
            clock,
            hub,
        }
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // Registration

    /// Register a task, or update whether it takes idle-only breaks
    pub fn register_task(&mut self, task: Task, breaks_enabled: bool) {
        self.tasks.entry(task.clone()).or_default().breaks_enabled = breaks_enabled;
        debug!(task = %task, breaks_enabled, "task registered");
        self.publish_enablement();
    }

    /// Forget a task and everything scheduled for it
    pub fn unregister_task(&mut self, task: &Task) {
        if self.tasks.remove(task).is_none() {
            return;
        }
        self.active_tasks.remove(task);
        self.active_breaks.remove(task);
        debug!(task = %task, "task unregistered");
        self.publish_enablement();
        self.publish_active_tasks();
        self.publish_active_breaks();
    }

    pub fn is_registered(&self, task: &Task) -> bool {
        self.tasks.contains_key(task)
    }

    pub fn is_enabled_for(&self, task: &Task) -> bool {
        self.tasks.get(task).is_some_and(|entry| entry.breaks_enabled)
    }

    /// Whether the task's config asks for a logout on every break
    pub fn wants_logout(&self, task: &Task) -> bool {
        self.config.get_bool(&keys::logout(&task.sanitized_name()))
    }

    /// Escalation policy from enablement and the task's logout setting
    pub fn policy_for(&self, task: &Task) -> BreakPolicy {
        if !self.is_enabled_for(task) || self.wants_logout(task) {
            BreakPolicy::Logout
        } else {
            BreakPolicy::IdleOnly
        }
    }

    /// Pre-flight check of a task's break bounds.
    ///
    /// Registered tasks with breaks disabled always pass.
    pub fn validate_break_config(&self, task: &Task) -> Result<(), BreakError> {
        let entry = self
            .tasks
            .get(task)
            .ok_or_else(|| BreakError::Unregistered(task.clone()))?;
        if !entry.breaks_enabled {
            return Ok(());
        }
        self.threshold_interval(task)?;
        self.break_interval(task)?;
        Ok(())
    }

    pub fn is_valid_break_config(&self, task: &Task) -> bool {
        self.validate_break_config(task).is_ok()
    }

    // Task lifecycle

    /// Mark a task as running and reset its statistics
    pub fn start_task(&mut self, task: &Task) -> Result<(), BreakError> {
        let now = self.clock.now();
        let entry = self
            .tasks
            .get_mut(task)
            .ok_or_else(|| BreakError::Unregistered(task.clone()))?;
        entry.stats = BreakStats {
            started_at: Some(now),
            break_count: 0,
        };
        entry.planned = None;
        self.active_tasks.insert(task.clone());
        info!(task = %task, "task started");
        self.publish_active_tasks();
        Ok(())
    }

    /// Mark a task as stopped and drop its planned and active breaks
    pub fn stop_task(&mut self, task: &Task) {
        if let Some(entry) = self.tasks.get_mut(task) {
            entry.planned = None;
            entry.stats.started_at = None;
        }
        let was_active = self.active_tasks.remove(task);
        self.stop_break(task);
        if was_active {
            info!(task = %task, "task stopped");
            self.publish_active_tasks();
        }
    }

    pub fn is_active_task(&self, task: &Task) -> bool {
        self.active_tasks.contains(task)
    }

    pub fn active_tasks(&self) -> &ActiveTasks {
        &self.active_tasks
    }

    pub fn break_stats(&self, task: &Task) -> Option<BreakStats> {
        self.tasks.get(task).map(|entry| entry.stats)
    }

    // Planned breaks

    /// Draw the time of the task's next break from its thresholds
    pub fn plan_break(&mut self, task: &Task) -> Result<DateTime<Utc>, BreakError> {
        let at = self.draw_deadline(self.threshold_interval(task)?)?;
        let entry = self
            .tasks
            .get_mut(task)
            .ok_or_else(|| BreakError::Unregistered(task.clone()))?;
        entry.planned = Some(at);
        debug!(task = %task, planned = %at, "break planned");
        Ok(at)
    }

    pub fn planned_break(&self, task: &Task) -> Option<DateTime<Utc>> {
        self.tasks.get(task).and_then(|entry| entry.planned)
    }

    pub fn remove_planned_break(&mut self, task: &Task) {
        if let Some(entry) = self.tasks.get_mut(task) {
            entry.planned = None;
        }
    }

    /// Whether the task's planned break time has come
    pub fn should_break(&self, task: &Task) -> bool {
        self.planned_break(task)
            .is_some_and(|planned| self.now() >= planned)
    }

    // Active breaks

    /// Schedule a break ending after a delay drawn from the task's thresholds
    pub fn request_break(&mut self, task: &Task) -> Result<BreakWindow, BreakError> {
        let interval = self.threshold_interval(task)?;
        let window = BreakWindow {
            task: task.clone(),
            ends_at: self.draw_deadline(interval)?,
        };
        Ok(self.activate(window))
    }

    /// Begin a break whose length is drawn from the task's break bounds
    pub fn start_break(&mut self, task: &Task) -> Result<BreakWindow, BreakError> {
        let interval = self.break_interval(task)?;
        let ends_at = self.draw_deadline(interval)?;
        let entry = self
            .tasks
            .get_mut(task)
            .ok_or_else(|| BreakError::Unregistered(task.clone()))?;
        entry.planned = None;
        entry.stats.break_count += 1;
        Ok(self.activate(BreakWindow {
            task: task.clone(),
            ends_at,
        }))
    }

    fn activate(&mut self, window: BreakWindow) -> BreakWindow {
        let replaced = self
            .active_breaks
            .insert(window.task.clone(), window.clone())
            .is_some();
        info!(
            task = %window.task,
            ends_at = %window.ends_at,
            replaced,
            "break scheduled"
        );
        self.publish_active_breaks();
        self.hub.publish_break_scheduled(BreakScheduled {
            task: window.task.clone(),
            ends_at: window.ends_at,
        });
        window
    }

    /// Remove a task's break window; no-op without one
    pub fn stop_break(&mut self, task: &Task) -> Option<BreakWindow> {
        let removed = self.active_breaks.remove(task)?;
        info!(task = %task, "break stopped");
        self.publish_active_breaks();
        Some(removed)
    }

    /// Remove every break window
    pub fn stop_all_breaks(&mut self) -> usize {
        let count = self.active_breaks.len();
        if count > 0 {
            self.active_breaks.clear();
            info!(count, "all breaks stopped");
            self.publish_active_breaks();
        }
        count
    }

    pub fn active_breaks(&self) -> &ActiveBreaks {
        &self.active_breaks
    }

    pub fn has_active_breaks(&self) -> bool {
        !self.active_breaks.is_empty()
    }

    pub fn is_on_break(&self, task: &Task) -> bool {
        self.active_breaks.contains_key(task)
    }

    /// True when every window has elapsed at `now` (vacuously true when empty)
    pub fn all_breaks_finished(&self, now: DateTime<Utc>) -> bool {
        self.active_breaks
            .values()
            .all(|window| window.has_elapsed(now))
    }

    /// Ask the automation to log out immediately
    pub fn logout_now(&self, task: Option<Task>) {
        info!(task = ?task.as_ref().map(Task::name), "logout requested");
        self.hub.publish_logout_requested(LogoutRequested { task });
    }

    fn threshold_interval(&self, task: &Task) -> Result<RandomInterval, BreakError> {
        let namespace = task.sanitized_name();
        self.minutes_interval(
            &keys::threshold_from(&namespace),
            &keys::threshold_to(&namespace),
        )
    }

    fn break_interval(&self, task: &Task) -> Result<RandomInterval, BreakError> {
        let namespace = task.sanitized_name();
        self.minutes_interval(&keys::break_from(&namespace), &keys::break_to(&namespace))
    }

    /// Read a `[from, to]` minute pair and convert to seconds
    fn minutes_interval(&self, from_key: &str, to_key: &str) -> Result<RandomInterval, BreakError> {
        let from = self.read_minutes(from_key)?;
        let to = self.read_minutes(to_key)?;
        let from_seconds = self.bound_seconds(from_key, from)?;
        let to_seconds = self.bound_seconds(to_key, to)?;
        RandomInterval::new(from_seconds, to_seconds).ok_or_else(|| {
            BreakError::InvertedBounds {
                from_key: from_key.to_string(),
                from,
                to_key: to_key.to_string(),
                to,
            }
        })
    }

    fn read_minutes(&self, key: &str) -> Result<i64, BreakError> {
        let value = self.config.get(key);
        value
            .as_deref()
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .filter(|minutes| *minutes >= 0)
            .ok_or_else(|| {
                warn!(key, value = ?value, "break bound is not a number of minutes");
                BreakError::NotNumeric {
                    key: key.to_string(),
                    value,
                }
            })
    }

    /// Minutes as seconds, refusing bounds whose deadline `now` cannot represent
    fn bound_seconds(&self, key: &str, minutes: i64) -> Result<i64, BreakError> {
        minutes
            .checked_mul(SECONDS_PER_MINUTE)
            .filter(|seconds| self.deadline_after(*seconds).is_some())
            .ok_or_else(|| {
                warn!(key, minutes, "break bound out of range");
                BreakError::OutOfRange {
                    key: key.to_string(),
                    minutes,
                }
            })
    }

    fn deadline_after(&self, seconds: i64) -> Option<DateTime<Utc>> {
        Duration::try_seconds(seconds).and_then(|delay| self.now().checked_add_signed(delay))
    }

    fn draw_deadline(&self, interval: RandomInterval) -> Result<DateTime<Utc>, BreakError> {
        let seconds = interval.sample();
        self.deadline_after(seconds)
            .ok_or_else(|| BreakError::OutOfRange {
                key: "break delay".to_string(),
                minutes: seconds / SECONDS_PER_MINUTE,
            })
    }

    fn publish_active_breaks(&self) {
        self.hub.publish_active_breaks(self.active_breaks.clone());
    }

    fn publish_active_tasks(&self) {
        self.hub.publish_active_tasks(self.active_tasks.clone());
    }

    fn publish_enablement(&self) {
        let enablement: Enablement = self
            .tasks
            .iter()
            .map(|(task, entry)| (task.clone(), entry.breaks_enabled))
            .collect();
        self.hub.publish_enablement(enablement);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::MemoryConfig;
    use rstest::rstest;

    struct Fixture {
        registry: BreakRegistry,
        clock: Arc<ManualClock>,
        config: Arc<MemoryConfig>,
    }

    fn fixture(pairs: &[(&str, &str)]) -> Fixture {
        let config = Arc::new(MemoryConfig::from_pairs(pairs.iter().copied()));
        let clock = Arc::new(ManualClock::default());
        let registry = BreakRegistry::new(config.clone(), clock.clone(), EventHub::new());
        Fixture {
            registry,
            clock,
            config,
        }
    }

    fn miner() -> Task {
        Task::new("Power Miner")
    }

    const ONE_MINUTE: &[(&str, &str)] = &[
        ("powerminer-thresholdfrom", "1"),
        ("powerminer-thresholdto", "1"),
        ("powerminer-breakfrom", "2"),
        ("powerminer-breakto", "2"),
        ("powerminer-logout", "true"),
    ];

    #[test]
    fn request_break_uses_thresholds_in_minutes() {
        let mut fx = fixture(ONE_MINUTE);
        fx.registry.register_task(miner(), true);

        let now = fx.clock.now();
        let window = fx.registry.request_break(&miner()).unwrap();

        assert_eq!(window.ends_at, now + Duration::seconds(60));
        assert_eq!(fx.registry.active_breaks().len(), 1);
    }

    #[test]
    fn request_then_stop_leaves_nothing_active() {
        let mut fx = fixture(ONE_MINUTE);
        fx.registry.register_task(miner(), true);

        fx.registry.request_break(&miner()).unwrap();
        assert!(fx.registry.stop_break(&miner()).is_some());
        assert!(fx.registry.active_breaks().is_empty());
        assert!(fx.registry.stop_break(&miner()).is_none());
    }

    #[test]
    fn second_request_overwrites_window() {
        let mut fx = fixture(ONE_MINUTE);
        fx.registry.register_task(miner(), true);

        let first = fx.registry.request_break(&miner()).unwrap();
        fx.clock.advance(Duration::seconds(30));
        let second = fx.registry.request_break(&miner()).unwrap();

        assert_eq!(fx.registry.active_breaks().len(), 1);
        assert_eq!(second.ends_at - first.ends_at, Duration::seconds(30));
        assert_eq!(fx.registry.active_breaks()[&miner()], second);
    }

    #[tokio::test]
    async fn request_break_publishes_scheduled_event() {
        let mut fx = fixture(ONE_MINUTE);
        fx.registry.register_task(miner(), true);
        let mut events = fx.registry.hub().subscribe_break_scheduled();
        let snapshots = fx.registry.hub().subscribe_active_breaks();

        let window = fx.registry.request_break(&miner()).unwrap();

        let event = events.recv().await;
        assert_eq!(event.map(|e| e.ends_at), Some(window.ends_at));
        assert!(snapshots.borrow().contains_key(&miner()));
    }

    #[rstest]
    #[case("abc", "1", "powerminer-thresholdfrom")]
    #[case("1", "", "powerminer-thresholdto")]
    #[case("-1", "2", "powerminer-thresholdfrom")]
    fn non_numeric_thresholds_are_rejected(
        #[case] from: &str,
        #[case] to: &str,
        #[case] bad_key: &str,
    ) {
        let mut fx = fixture(&[
            ("powerminer-thresholdfrom", from),
            ("powerminer-thresholdto", to),
        ]);
        fx.registry.register_task(miner(), true);

        let err = fx.registry.request_break(&miner()).unwrap_err();
        assert!(matches!(err, BreakError::NotNumeric { ref key, .. } if key == bad_key));
        assert!(fx.registry.active_breaks().is_empty());
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let mut fx = fixture(&[
            ("powerminer-thresholdfrom", "5"),
            ("powerminer-thresholdto", "4"),
        ]);
        fx.registry.register_task(miner(), true);

        let err = fx.registry.request_break(&miner()).unwrap_err();
        assert!(matches!(err, BreakError::InvertedBounds { from: 5, to: 4, .. }));
    }

    #[rstest]
    #[case("200000000000000000")]
    #[case("1000000000000")]
    fn huge_thresholds_are_refused(#[case] minutes: &str) {
        let mut fx = fixture(&[
            ("powerminer-thresholdfrom", "1"),
            ("powerminer-thresholdto", minutes),
            ("powerminer-breakfrom", "1"),
            ("powerminer-breakto", "1"),
        ]);
        fx.registry.register_task(miner(), true);

        assert!(!fx.registry.is_valid_break_config(&miner()));
        let err = fx.registry.request_break(&miner()).unwrap_err();
        assert!(
            matches!(err, BreakError::OutOfRange { ref key, .. } if key == "powerminer-thresholdto")
        );
        assert!(fx.registry.plan_break(&miner()).is_err());
        assert!(fx.registry.active_breaks().is_empty());
    }

    #[test]
    fn huge_break_length_is_refused() {
        let mut fx = fixture(&[
            ("powerminer-thresholdfrom", "1"),
            ("powerminer-thresholdto", "1"),
            ("powerminer-breakfrom", "1000000000000"),
            ("powerminer-breakto", "1000000000000"),
        ]);
        fx.registry.register_task(miner(), true);

        assert!(!fx.registry.is_valid_break_config(&miner()));
        assert!(matches!(
            fx.registry.start_break(&miner()),
            Err(BreakError::OutOfRange { .. })
        ));
        assert_eq!(fx.registry.break_stats(&miner()).unwrap().break_count, 0);
    }

    #[test]
    fn validity_rules() {
        let mut fx = fixture(ONE_MINUTE);
        assert!(!fx.registry.is_valid_break_config(&miner()));

        fx.registry.register_task(miner(), true);
        assert!(fx.registry.is_valid_break_config(&miner()));

        fx.config.set("powerminer-breakto", "1");
        assert!(!fx.registry.is_valid_break_config(&miner()));

        fx.registry.register_task(miner(), false);
        assert!(fx.registry.is_valid_break_config(&miner()));
    }

    #[rstest]
    #[case(true, "false", BreakPolicy::IdleOnly)]
    #[case(true, "true", BreakPolicy::Logout)]
    #[case(false, "false", BreakPolicy::Logout)]
    fn policy_combines_enablement_and_logout(
        #[case] enabled: bool,
        #[case] logout: &str,
        #[case] expected: BreakPolicy,
    ) {
        let mut fx = fixture(&[("powerminer-logout", logout)]);
        fx.registry.register_task(miner(), enabled);
        assert_eq!(fx.registry.policy_for(&miner()), expected);
    }

    #[test]
    fn planned_break_comes_due() {
        let mut fx = fixture(ONE_MINUTE);
        fx.registry.register_task(miner(), true);

        let planned = fx.registry.plan_break(&miner()).unwrap();
        assert_eq!(fx.registry.planned_break(&miner()), Some(planned));
        assert!(!fx.registry.should_break(&miner()));

        fx.clock.advance(Duration::seconds(60));
        assert!(fx.registry.should_break(&miner()));

        fx.registry.remove_planned_break(&miner());
        assert!(!fx.registry.should_break(&miner()));
    }

    #[test]
    fn start_break_counts_and_clears_plan() {
        let mut fx = fixture(ONE_MINUTE);
        fx.registry.register_task(miner(), true);
        fx.registry.start_task(&miner()).unwrap();
        fx.registry.plan_break(&miner()).unwrap();

        let now = fx.clock.now();
        let window = fx.registry.start_break(&miner()).unwrap();

        assert_eq!(window.ends_at, now + Duration::seconds(120));
        assert_eq!(fx.registry.planned_break(&miner()), None);
        let stats = fx.registry.break_stats(&miner()).unwrap();
        assert_eq!(stats.break_count, 1);
        assert_eq!(stats.started_at, Some(now));
    }

    #[test]
    fn stop_task_drops_breaks_and_membership() {
        let mut fx = fixture(ONE_MINUTE);
        fx.registry.register_task(miner(), true);
        fx.registry.start_task(&miner()).unwrap();
        fx.registry.start_break(&miner()).unwrap();

        fx.registry.stop_task(&miner());

        assert!(!fx.registry.is_active_task(&miner()));
        assert!(!fx.registry.is_on_break(&miner()));
        assert!(fx.registry.hub().active_tasks().is_empty());
    }

    #[test]
    fn start_task_requires_registration() {
        let mut fx = fixture(ONE_MINUTE);
        assert_eq!(
            fx.registry.start_task(&miner()),
            Err(BreakError::Unregistered(miner()))
        );
    }

    #[test]
    fn unregister_forgets_everything() {
        let mut fx = fixture(ONE_MINUTE);
        fx.registry.register_task(miner(), true);
        fx.registry.start_task(&miner()).unwrap();
        fx.registry.request_break(&miner()).unwrap();

        fx.registry.unregister_task(&miner());

        assert!(!fx.registry.is_registered(&miner()));
        assert!(fx.registry.active_breaks().is_empty());
        assert!(fx.registry.hub().enablement().is_empty());
    }

    #[test]
    fn all_breaks_finished_waits_for_latest_window() {
        let mut fx = fixture(&[
            ("a-thresholdfrom", "1"),
            ("a-thresholdto", "1"),
            ("b-thresholdfrom", "3"),
            ("b-thresholdto", "3"),
        ]);
        let (a, b) = (Task::new("a"), Task::new("b"));
        fx.registry.register_task(a.clone(), true);
        fx.registry.register_task(b.clone(), true);
        fx.registry.request_break(&a).unwrap();
        fx.registry.request_break(&b).unwrap();

        let start = fx.clock.now();
        assert!(!fx.registry.all_breaks_finished(start + Duration::seconds(60)));
        assert!(fx.registry.all_breaks_finished(start + Duration::seconds(180)));

        assert_eq!(fx.registry.stop_all_breaks(), 2);
        assert!(!fx.registry.has_active_breaks());
    }
}
