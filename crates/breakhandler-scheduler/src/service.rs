/*
[INPUT]:  Host events, task intents via BreakHandle, hub subscriptions, one-second heartbeat
[OUTPUT]: Single dispatch loop driving registry + automation FSM, graceful shutdown
[POS]:    Execution layer - owns all mutable break state on one tokio task
[UPDATE]: When adding intents/queries or changing shutdown ordering
[UPDATE]: 2026-10-15 Re-login dispatch moved onto the heartbeat
[UPDATE]: 2026-10-16 Tag each service run with a run id span
*/

use std::sync::{Arc, Once};
use std::time::Duration;

use anyhow::{Result as AnyResult, anyhow};
use breakhandler_adapter::{GameState, Host, HostEvent, InputDispatcher, Key};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::automation::{AutomationSettings, FsmState, IdleAutomation, TickContext};
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigChanged, ConfigStore};
use crate::events::{
    ActiveBreaks, ActiveTasks, BreakScheduled, Enablement, EventHub, Heartbeat, LogoutRequested,
    Subscription,
};
use crate::registry::{BreakError, BreakRegistry};
use crate::session::SessionSelector;
use crate::task::{BreakStats, BreakWindow, Task};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
const HEARTBEAT_PERIOD: Duration = Duration::from_secs(1);
const LOGIN_ENTER_PRESSES: usize = 3;

static PANIC_HOOK_ONCE: Once = Once::new();

fn ensure_panic_hook_installed() {
    PANIC_HOOK_ONCE.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            tracing::error!("panic in break service: {info}");
            previous(info);
        }));
    });
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("break service is not running")]
    Stopped,

    #[error(transparent)]
    Break(#[from] BreakError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceSettings {
    pub heartbeat: Duration,
    pub automation: AutomationSettings,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            heartbeat: HEARTBEAT_PERIOD,
            automation: AutomationSettings::default(),
        }
    }
}

type Reply<T> = oneshot::Sender<T>;

#[derive(Debug)]
enum Command {
    RegisterTask { task: Task, breaks_enabled: bool },
    UnregisterTask(Task),
    StartTask { task: Task, reply: Reply<Result<(), BreakError>> },
    StopTask(Task),
    RequestBreak { task: Task, reply: Reply<Result<BreakWindow, BreakError>> },
    StartBreak { task: Task, reply: Reply<Result<BreakWindow, BreakError>> },
    PlanBreak { task: Task, reply: Reply<Result<DateTime<Utc>, BreakError>> },
    RemovePlannedBreak(Task),
    StopBreak(Task),
    LogoutNow(Option<Task>),
    StopAll,
    IsEnabled { task: Task, reply: Reply<bool> },
    ValidateBreakConfig { task: Task, reply: Reply<Result<(), BreakError>> },
    ShouldBreak { task: Task, reply: Reply<bool> },
    PlannedBreak { task: Task, reply: Reply<Option<DateTime<Utc>>> },
    BreakStats { task: Task, reply: Reply<Option<BreakStats>> },
    AutomationState { reply: Reply<FsmState> },
}

/// Builder for the break handler's dispatch loop
pub struct BreakService {
    host: Arc<dyn Host>,
    config: Arc<dyn ConfigStore>,
    clock: Arc<dyn Clock>,
    selector: SessionSelector,
    settings: ServiceSettings,
}

impl BreakService {
    pub fn new(host: Arc<dyn Host>, config: Arc<dyn ConfigStore>, selector: SessionSelector) -> Self {
        Self {
            host,
            config,
            clock: Arc::new(SystemClock),
            selector,
            settings: ServiceSettings::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_settings(mut self, settings: ServiceSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Start the dispatch loop, consuming host callbacks from `host_events`.
    pub fn spawn(self, host_events: mpsc::UnboundedReceiver<HostEvent>) -> (BreakHandle, ServiceRunner) {
        ensure_panic_hook_installed();

        let run_id = Uuid::new_v4();
        let shutdown = CancellationToken::new();
        let hub = EventHub::new();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        // Subscribe before anything can publish.
        let break_scheduled = hub.subscribe_break_scheduled();
        let logout_requested = hub.subscribe_logout_requested();
        let heartbeat = hub.subscribe_heartbeat();

        let span = info_span!("break_service", run_id = %run_id);
        let (input, heartbeat_handle) = {
            let _entered = span.enter();
            let input = InputDispatcher::spawn(self.host.clone());
            let heartbeat_handle = hub.spawn_heartbeat(
                self.settings.heartbeat,
                self.clock.clone(),
                shutdown.child_token(),
            );
            (input, heartbeat_handle)
        };

        let driver = ServiceDriver {
            registry: BreakRegistry::new(self.config.clone(), self.clock.clone(), hub.clone()),
            fsm: IdleAutomation::new(self.settings.automation),
            selector: self.selector,
            host: self.host,
            input,
            cmd_rx,
            host_events,
            break_scheduled,
            logout_requested,
            heartbeat,
            heartbeat_handle: Some(heartbeat_handle),
            shutdown: shutdown.clone(),
        };
        let handle = tokio::spawn(driver.run().instrument(span));

        (
            BreakHandle {
                cmd_tx,
                hub,
                config: self.config,
            },
            ServiceRunner {
                run_id,
                shutdown,
                handle: Some(handle),
            },
        )
    }
}

/// Owns the running service's lifetime
#[derive(Debug)]
pub struct ServiceRunner {
    run_id: Uuid,
    shutdown: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ServiceRunner {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Request graceful shutdown and wait for the dispatch loop to exit.
    ///
    /// Guarantees a bounded shutdown time (30s) and aborts the loop on timeout.
    pub async fn shutdown_and_wait(&mut self) -> AnyResult<()> {
        self.shutdown.cancel();
        let Some(mut handle) = self.handle.take() else {
            return Ok(());
        };

        tokio::select! {
            res = &mut handle => match res {
                Ok(()) => Ok(()),
                Err(join_err) if join_err.is_panic() => {
                    Err(anyhow!("break service panicked: {join_err}"))
                }
                Err(join_err) => Err(anyhow!("break service join error: {join_err}")),
            },
            _ = tokio::time::sleep(SHUTDOWN_TIMEOUT) => {
                handle.abort();
                Err(anyhow!("break service shutdown timed out after {SHUTDOWN_TIMEOUT:?}"))
            }
        }
    }
}

impl Drop for ServiceRunner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Cloneable front door to a running [`BreakService`].
///
/// Mutations are enqueued as intents; queries round-trip through the
/// dispatch loop so they observe a consistent state.
#[derive(Clone)]
pub struct BreakHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    hub: EventHub,
    config: Arc<dyn ConfigStore>,
}

impl std::fmt::Debug for BreakHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakHandle")
            .field("closed", &self.cmd_tx.is_closed())
            .finish_non_exhaustive()
    }
}

impl BreakHandle {
    fn send(&self, cmd: Command) -> Result<(), ServiceError> {
        self.cmd_tx.send(cmd).map_err(|_| ServiceError::Stopped)
    }

    async fn ask<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply))?;
        rx.await.map_err(|_| ServiceError::Stopped)
    }

    // Intents

    pub fn register_task(&self, task: Task, breaks_enabled: bool) -> Result<(), ServiceError> {
        self.send(Command::RegisterTask {
            task,
            breaks_enabled,
        })
    }

    pub fn unregister_task(&self, task: Task) -> Result<(), ServiceError> {
        self.send(Command::UnregisterTask(task))
    }

    pub fn stop_task(&self, task: Task) -> Result<(), ServiceError> {
        self.send(Command::StopTask(task))
    }

    pub fn stop_break(&self, task: Task) -> Result<(), ServiceError> {
        self.send(Command::StopBreak(task))
    }

    pub fn remove_planned_break(&self, task: Task) -> Result<(), ServiceError> {
        self.send(Command::RemovePlannedBreak(task))
    }

    /// Log out right away, whatever the automation is doing
    pub fn logout_now(&self, task: Option<Task>) -> Result<(), ServiceError> {
        self.send(Command::LogoutNow(task))
    }

    /// Clear every break and return the automation to `Idle`
    pub fn stop_all(&self) -> Result<(), ServiceError> {
        self.send(Command::StopAll)
    }

    // Requests

    pub async fn start_task(&self, task: Task) -> Result<(), ServiceError> {
        Ok(self.ask(|reply| Command::StartTask { task, reply }).await??)
    }

    pub async fn request_break(&self, task: Task) -> Result<BreakWindow, ServiceError> {
        Ok(self.ask(|reply| Command::RequestBreak { task, reply }).await??)
    }

    pub async fn start_break(&self, task: Task) -> Result<BreakWindow, ServiceError> {
        Ok(self.ask(|reply| Command::StartBreak { task, reply }).await??)
    }

    pub async fn plan_break(&self, task: Task) -> Result<DateTime<Utc>, ServiceError> {
        Ok(self.ask(|reply| Command::PlanBreak { task, reply }).await??)
    }

    pub async fn is_enabled_for(&self, task: Task) -> Result<bool, ServiceError> {
        self.ask(|reply| Command::IsEnabled { task, reply }).await
    }

    pub async fn validate_break_config(&self, task: Task) -> Result<(), ServiceError> {
        Ok(self
            .ask(|reply| Command::ValidateBreakConfig { task, reply })
            .await??)
    }

    pub async fn is_valid_break_config(&self, task: Task) -> Result<bool, ServiceError> {
        match self.validate_break_config(task).await {
            Ok(()) => Ok(true),
            Err(ServiceError::Break(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub async fn should_break(&self, task: Task) -> Result<bool, ServiceError> {
        self.ask(|reply| Command::ShouldBreak { task, reply }).await
    }

    pub async fn planned_break(&self, task: Task) -> Result<Option<DateTime<Utc>>, ServiceError> {
        self.ask(|reply| Command::PlannedBreak { task, reply }).await
    }

    pub async fn break_stats(&self, task: Task) -> Result<Option<BreakStats>, ServiceError> {
        self.ask(|reply| Command::BreakStats { task, reply }).await
    }

    pub async fn automation_state(&self) -> Result<FsmState, ServiceError> {
        self.ask(|reply| Command::AutomationState { reply }).await
    }

    // Observation

    pub fn active_breaks(&self) -> ActiveBreaks {
        self.hub.active_breaks()
    }

    pub fn subscribe_active_breaks(&self) -> watch::Receiver<ActiveBreaks> {
        self.hub.subscribe_active_breaks()
    }

    pub fn subscribe_active_tasks(&self) -> watch::Receiver<ActiveTasks> {
        self.hub.subscribe_active_tasks()
    }

    pub fn subscribe_enablement(&self) -> watch::Receiver<Enablement> {
        self.hub.subscribe_enablement()
    }

    pub fn subscribe_break_scheduled(&self) -> Subscription<BreakScheduled> {
        self.hub.subscribe_break_scheduled()
    }

    pub fn subscribe_config_changed(&self) -> broadcast::Receiver<ConfigChanged> {
        self.config.subscribe()
    }

    // Config

    pub fn config(&self) -> &Arc<dyn ConfigStore> {
        &self.config
    }

    pub fn set_config(&self, key: &str, value: &str) {
        self.config.set(key, value);
    }
}

struct ServiceDriver {
    registry: BreakRegistry,
    fsm: IdleAutomation,
    selector: SessionSelector,
    host: Arc<dyn Host>,
    input: InputDispatcher,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    host_events: mpsc::UnboundedReceiver<HostEvent>,
    break_scheduled: Subscription<BreakScheduled>,
    logout_requested: Subscription<LogoutRequested>,
    heartbeat: Subscription<Heartbeat>,
    heartbeat_handle: Option<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl ServiceDriver {
    async fn run(mut self) {
        info!("break service started");

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                Some(event) = self.host_events.recv() => self.on_host_event(event),
                Some(cmd) = self.cmd_rx.recv() => self.on_command(cmd),
                Some(event) = self.break_scheduled.recv() => {
                    let policy = self.registry.policy_for(&event.task);
                    self.fsm.on_break_activated(&event.task, policy);
                }
                Some(event) = self.logout_requested.recv() => {
                    debug!(task = ?event.task.as_ref().map(Task::name), "forcing logout");
                    self.fsm.on_logout_requested();
                }
                Some(beat) = self.heartbeat.recv() => self.on_heartbeat(beat.at),
            }
        }

        self.teardown().await;
    }

    fn on_host_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::Tick => {
                let mut ctx = TickContext {
                    host: self.host.as_ref(),
                    input: &self.input,
                    registry: &mut self.registry,
                };
                self.fsm.on_tick(&mut ctx);
            }
            HostEvent::GameStateChanged(state) => {
                debug!(game_state = ?state, "game state changed");
                self.fsm.on_game_state_changed(state);
            }
            HostEvent::MenuOptionClicked { entry, reply } => {
                let resolution = self.fsm.resolve_menu(self.host.as_ref(), entry);
                debug!(?resolution, "menu option resolved");
                if reply.send(resolution).is_err() {
                    debug!("host stopped waiting for menu resolution");
                }
            }
        }
    }

    fn on_command(&mut self, cmd: Command) {
        // A dropped reply receiver only means the caller stopped waiting.
        match cmd {
            Command::RegisterTask {
                task,
                breaks_enabled,
            } => self.registry.register_task(task, breaks_enabled),
            Command::UnregisterTask(task) => self.registry.unregister_task(&task),
            Command::StartTask { task, reply } => {
                let _ = reply.send(self.registry.start_task(&task));
            }
            Command::StopTask(task) => self.registry.stop_task(&task),
            Command::RequestBreak { task, reply } => {
                let _ = reply.send(self.registry.request_break(&task));
            }
            Command::StartBreak { task, reply } => {
                let _ = reply.send(self.registry.start_break(&task));
            }
            Command::PlanBreak { task, reply } => {
                let _ = reply.send(self.registry.plan_break(&task));
            }
            Command::RemovePlannedBreak(task) => self.registry.remove_planned_break(&task),
            Command::StopBreak(task) => {
                self.registry.stop_break(&task);
            }
            Command::LogoutNow(task) => self.registry.logout_now(task),
            Command::StopAll => {
                self.registry.stop_all_breaks();
                self.fsm.reset();
            }
            Command::IsEnabled { task, reply } => {
                let _ = reply.send(self.registry.is_enabled_for(&task));
            }
            Command::ValidateBreakConfig { task, reply } => {
                let _ = reply.send(self.registry.validate_break_config(&task));
            }
            Command::ShouldBreak { task, reply } => {
                let _ = reply.send(self.registry.should_break(&task));
            }
            Command::PlannedBreak { task, reply } => {
                let _ = reply.send(self.registry.planned_break(&task));
            }
            Command::BreakStats { task, reply } => {
                let _ = reply.send(self.registry.break_stats(&task));
            }
            Command::AutomationState { reply } => {
                let _ = reply.send(self.fsm.state());
            }
        }
    }

    /// Once every break has elapsed and the host sits on the login screen,
    /// fill in credentials and press Enter.
    fn on_heartbeat(&mut self, now: DateTime<Utc>) {
        if !self.registry.has_active_breaks() || self.host.game_state() != GameState::LoginScreen {
            return;
        }
        if !self.registry.all_breaks_finished(now) {
            return;
        }

        let credentials = self.selector.resolve();
        let Some((username, password)) = credentials.as_pair() else {
            debug!(?credentials, "credentials incomplete; login skipped");
            return;
        };
        if let Err(err) = self.host.set_credentials(username, password) {
            warn!(error = %err, "host refused credentials");
            return;
        }
        for _ in 0..LOGIN_ENTER_PRESSES {
            if let Err(err) = self.input.send_key(Key::Enter) {
                warn!(error = %err, "failed to queue login keystroke");
                return;
            }
        }
        info!(username, "login dispatched");
    }

    async fn teardown(mut self) {
        self.break_scheduled.cancel();
        self.logout_requested.cancel();
        self.heartbeat.cancel();
        self.cmd_rx.close();
        self.host_events.close();

        self.input.shutdown_and_wait().await;

        if let Some(handle) = self.heartbeat_handle.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "heartbeat task did not exit cleanly");
            }
        }
        info!("break service stopped");
    }
}
