/*
[INPUT]:  Registry mutations, forced-logout requests, wall-clock heartbeat timer
[OUTPUT]: Current-value streams (`watch`) and one-shot event streams (`broadcast`)
[POS]:    Distribution layer - publish/subscribe hub between registry, automation and observers
[UPDATE]: When adding streams or changing replay/cancellation semantics
*/

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::task::{BreakWindow, Task};

const EVENT_CAPACITY: usize = 256;

pub type ActiveBreaks = BTreeMap<Task, BreakWindow>;
pub type ActiveTasks = BTreeSet<Task>;
pub type Enablement = BTreeMap<Task, bool>;

/// A break window was stored for a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakScheduled {
    pub task: Task,
    pub ends_at: DateTime<Utc>,
}

/// Something demands an immediate logout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogoutRequested {
    /// Requesting task, if any
    pub task: Option<Task>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub at: DateTime<Utc>,
}

#[derive(Debug)]
struct HubInner {
    active_breaks: watch::Sender<ActiveBreaks>,
    active_tasks: watch::Sender<ActiveTasks>,
    enablement: watch::Sender<Enablement>,
    break_scheduled: broadcast::Sender<BreakScheduled>,
    logout_requested: broadcast::Sender<LogoutRequested>,
    heartbeat: broadcast::Sender<Heartbeat>,
}

/// Publish/subscribe hub for break handler events.
///
/// `watch` streams always hold the latest snapshot and replay it to new
/// subscribers; `broadcast` streams only deliver events published after
/// subscribing.
#[derive(Debug, Clone)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

impl EventHub {
    pub fn new() -> Self {
        let (active_breaks, _) = watch::channel(ActiveBreaks::new());
        let (active_tasks, _) = watch::channel(ActiveTasks::new());
        let (enablement, _) = watch::channel(Enablement::new());
        let (break_scheduled, _) = broadcast::channel(EVENT_CAPACITY);
        let (logout_requested, _) = broadcast::channel(EVENT_CAPACITY);
        let (heartbeat, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            inner: Arc::new(HubInner {
                active_breaks,
                active_tasks,
                enablement,
                break_scheduled,
                logout_requested,
                heartbeat,
            }),
        }
    }

    // Current-value streams

    pub fn subscribe_active_breaks(&self) -> watch::Receiver<ActiveBreaks> {
        self.inner.active_breaks.subscribe()
    }

    pub fn subscribe_active_tasks(&self) -> watch::Receiver<ActiveTasks> {
        self.inner.active_tasks.subscribe()
    }

    pub fn subscribe_enablement(&self) -> watch::Receiver<Enablement> {
        self.inner.enablement.subscribe()
    }

    pub fn active_breaks(&self) -> ActiveBreaks {
        self.inner.active_breaks.borrow().clone()
    }

    pub fn active_tasks(&self) -> ActiveTasks {
        self.inner.active_tasks.borrow().clone()
    }

    pub fn enablement(&self) -> Enablement {
        self.inner.enablement.borrow().clone()
    }

    pub(crate) fn publish_active_breaks(&self, breaks: ActiveBreaks) {
        self.inner.active_breaks.send_if_modified(|current| {
            if *current == breaks {
                return false;
            }
            *current = breaks;
            true
        });
    }

    pub(crate) fn publish_active_tasks(&self, tasks: ActiveTasks) {
        self.inner.active_tasks.send_if_modified(|current| {
            if *current == tasks {
                return false;
            }
            *current = tasks;
            true
        });
    }

    pub(crate) fn publish_enablement(&self, enablement: Enablement) {
        self.inner.enablement.send_if_modified(|current| {
            if *current == enablement {
                return false;
            }
            *current = enablement;
            true
        });
    }

    // One-shot event streams

    pub fn subscribe_break_scheduled(&self) -> Subscription<BreakScheduled> {
        Subscription::new(self.inner.break_scheduled.subscribe())
    }

    pub fn subscribe_logout_requested(&self) -> Subscription<LogoutRequested> {
        Subscription::new(self.inner.logout_requested.subscribe())
    }

    pub fn subscribe_heartbeat(&self) -> Subscription<Heartbeat> {
        Subscription::new(self.inner.heartbeat.subscribe())
    }

    pub(crate) fn publish_break_scheduled(&self, event: BreakScheduled) {
        if self.inner.break_scheduled.send(event).is_err() {
            debug!("break scheduled with no subscribers");
        }
    }

    pub(crate) fn publish_logout_requested(&self, event: LogoutRequested) {
        if self.inner.logout_requested.send(event).is_err() {
            debug!("logout requested with no subscribers");
        }
    }

    /// Emit a heartbeat every `period` until `shutdown` fires
    pub fn spawn_heartbeat(
        &self,
        period: Duration,
        clock: Arc<dyn Clock>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let heartbeat = self.inner.heartbeat.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        // Lagging or absent subscribers are not our concern.
                        let _ = heartbeat.send(Heartbeat { at: clock.now() });
                    }
                }
            }
            debug!("heartbeat stopped");
        })
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle on a one-shot event stream.
///
/// Cancelling drops the underlying receiver; it is safe to cancel any number
/// of times.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: Option<broadcast::Receiver<T>>,
}

impl<T: Clone> Subscription<T> {
    fn new(rx: broadcast::Receiver<T>) -> Self {
        Self { rx: Some(rx) }
    }

    /// Next event, or `None` once cancelled or the hub is gone
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            let rx = self.rx.as_mut()?;
            match rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscriber lagged; events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }

    pub fn cancel(&mut self) {
        self.rx = None;
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    #[tokio::test]
    async fn watch_streams_replay_latest_value() {
        let hub = EventHub::new();
        let task = Task::new("miner");
        hub.publish_active_tasks(ActiveTasks::from([task.clone()]));

        let rx = hub.subscribe_active_tasks();
        assert!(rx.borrow().contains(&task));
    }

    #[tokio::test]
    async fn unchanged_snapshot_does_not_notify() {
        let hub = EventHub::new();
        let mut rx = hub.subscribe_enablement();
        let _ = rx.borrow_and_update();

        hub.publish_enablement(Enablement::new());
        assert!(!rx.has_changed().unwrap());

        hub.publish_enablement(Enablement::from([(Task::new("a"), true)]));
        assert!(rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let hub = EventHub::new();
        let mut sub = hub.subscribe_break_scheduled();
        sub.cancel();
        sub.cancel();

        hub.publish_break_scheduled(BreakScheduled {
            task: Task::new("a"),
            ends_at: Utc::now(),
        });
        assert!(sub.is_cancelled());
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn one_shot_streams_do_not_replay() {
        let hub = EventHub::new();
        hub.publish_logout_requested(LogoutRequested { task: None });

        let mut sub = hub.subscribe_logout_requested();
        hub.publish_logout_requested(LogoutRequested {
            task: Some(Task::new("b")),
        });

        let event = sub.recv().await.unwrap();
        assert_eq!(event.task, Some(Task::new("b")));
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_fires_every_period() {
        let hub = EventHub::new();
        let mut sub = hub.subscribe_heartbeat();
        let shutdown = CancellationToken::new();
        let handle = hub.spawn_heartbeat(
            Duration::from_secs(1),
            Arc::new(SystemClock),
            shutdown.clone(),
        );

        for _ in 0..3 {
            let beat = tokio::time::timeout(Duration::from_secs(2), sub.recv()).await;
            assert!(matches!(beat, Ok(Some(_))));
        }

        shutdown.cancel();
        handle.await.unwrap();
    }
}
