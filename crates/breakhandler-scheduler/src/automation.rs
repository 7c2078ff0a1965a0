/*
[INPUT]:  Host ticks, game state changes, break activations, logout requests, menu resolution requests
[OUTPUT]: Synthetic input, host script calls, idle timer resets, break completion in the registry
[POS]:    Automation layer - tick-synchronized logout/login state machine
[UPDATE]: When the host UI flow changes or new automation steps are added
[UPDATE]: 2026-10-15 Warn when one step waits on the host for too long
*/

use breakhandler_adapter::types::widgets::{
    CLICK_ANCHOR, CLICK_TO_PLAY_BUTTON, CLICK_TO_PLAY_LABEL, CLICK_TO_PLAY_TEXT, INVENTORY_TAB,
    LOGIN_CLICK_TO_PLAY_SCREEN, LOGOUT_BUTTONS, LOGOUT_TAB, SWITCH_TAB_SCRIPT,
};
use breakhandler_adapter::{GameState, Host, HostError, InputDispatcher, Key, MenuEntry, MenuResolution};
use tracing::{debug, error, info, warn};

use crate::config::{
    AutomationConfig, default_idle_high_water, default_settle_ticks_from, default_settle_ticks_to,
    default_stall_warn_ticks,
};
use crate::interval::RandomInterval;
use crate::registry::{BreakPolicy, BreakRegistry};
use crate::task::Task;

/// Automation step the FSM is waiting in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsmState {
    Idle,
    LoginScreen,
    Logout,
    LogoutTab,
    LogoutButton,
    Inventory,
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutomationSettings {
    /// Idle ticks above which mouse/keyboard idle timers are reset
    pub idle_high_water: u32,
    /// Ticks to wait after clicking logout before escalating again
    pub settle_ticks: RandomInterval,
    /// Ticks in one non-idle step between stall warnings; 0 disables
    pub stall_warn_ticks: u32,
}

impl Default for AutomationSettings {
    fn default() -> Self {
        Self {
            idle_high_water: default_idle_high_water(),
            settle_ticks: settle_interval(default_settle_ticks_from(), default_settle_ticks_to()),
            stall_warn_ticks: default_stall_warn_ticks(),
        }
    }
}

impl From<&AutomationConfig> for AutomationSettings {
    fn from(config: &AutomationConfig) -> Self {
        Self {
            idle_high_water: config.idle_high_water,
            settle_ticks: settle_interval(config.settle_ticks_from, config.settle_ticks_to),
            stall_warn_ticks: config.stall_warn_ticks,
        }
    }
}

/// Settle tick bounds; inverted bounds collapse to `from`
pub fn settle_interval(from: u32, to: u32) -> RandomInterval {
    RandomInterval::new(from.into(), to.into()).unwrap_or(RandomInterval::fixed(from.into()))
}

/// Everything one tick may touch
pub struct TickContext<'a> {
    pub host: &'a dyn Host,
    pub input: &'a InputDispatcher,
    pub registry: &'a mut BreakRegistry,
}

/// Logout/login state machine driven by host ticks.
///
/// Each step waits for the UI element produced by the previous step to show
/// up on a later tick; a missing element means "not yet", never an error.
#[derive(Debug)]
pub struct IdleAutomation {
    state: FsmState,
    pending_logout: bool,
    delay: u32,
    settings: AutomationSettings,
    ticks_in_state: u32,
}

impl IdleAutomation {
    pub fn new(settings: AutomationSettings) -> Self {
        Self {
            state: FsmState::Idle,
            pending_logout: false,
            delay: 0,
            settings,
            ticks_in_state: 0,
        }
    }

    pub fn state(&self) -> FsmState {
        self.state
    }

    pub fn pending_logout(&self) -> bool {
        self.pending_logout
    }

    pub fn delay(&self) -> u32 {
        self.delay
    }

    /// Return to `Idle` and forget any pending logout
    pub fn reset(&mut self) {
        self.pending_logout = false;
        self.delay = 0;
        self.transition(FsmState::Idle);
    }

    /// Host reported a new game state
    pub fn on_game_state_changed(&mut self, game_state: GameState) {
        if game_state == GameState::LoginScreen {
            self.transition(FsmState::LoginScreen);
        }
    }

    /// A break was scheduled for `task`
    pub fn on_break_activated(&mut self, task: &Task, policy: BreakPolicy) {
        if policy == BreakPolicy::Logout {
            info!(task = %task, "break requires logout");
            self.on_logout_requested();
        } else {
            debug!(task = %task, "idle-only break activated");
        }
    }

    /// Force the logout sequence from whatever step we are in
    pub fn on_logout_requested(&mut self) {
        self.pending_logout = true;
        self.transition(FsmState::Logout);
    }

    /// Advance one tick. Faults are logged and leave the FSM in `Idle`.
    pub fn on_tick(&mut self, ctx: &mut TickContext<'_>) {
        let before = self.state;
        if let Err(err) = self.step(ctx) {
            if err.is_shutdown() {
                debug!(state = ?before, "input queue closed during tick");
            } else if err.is_retryable() {
                warn!(state = ?before, error = %err, "automation step failed; retrying from idle");
            } else {
                error!(state = ?before, error = %err, "automation step failed; resetting");
            }
            self.transition(FsmState::Idle);
        }

        if self.delay > 0 {
            self.delay -= 1;
        }
        self.observe_stall(before);
    }

    fn step(&mut self, ctx: &mut TickContext<'_>) -> Result<(), HostError> {
        let has_breaks = ctx.registry.has_active_breaks();

        match self.state {
            FsmState::Idle if self.pending_logout && self.delay == 0 => {
                self.transition(FsmState::Logout);
            }
            FsmState::LoginScreen if has_breaks => {
                self.pending_logout = false;
                let label_matches = ctx
                    .host
                    .widget(CLICK_TO_PLAY_TEXT)
                    .is_some_and(|widget| widget.text == CLICK_TO_PLAY_LABEL);
                if label_matches {
                    ctx.input.click(CLICK_ANCHOR)?;
                } else if !ctx.host.has_widget(LOGIN_CLICK_TO_PLAY_SCREEN) {
                    self.transition(FsmState::Inventory);
                }
            }
            FsmState::LoginScreen => {
                // Back in game with nothing to resume.
                self.pending_logout = false;
                self.transition(FsmState::Idle);
            }
            FsmState::Logout => {
                ctx.input.send_key(Key::Escape)?;
                self.transition(FsmState::LogoutTab);
            }
            FsmState::LogoutTab => {
                ctx.host.run_script(SWITCH_TAB_SCRIPT, &[LOGOUT_TAB])?;
                if ctx.host.first_widget(&LOGOUT_BUTTONS).is_some() {
                    self.transition(FsmState::LogoutButton);
                }
            }
            FsmState::LogoutButton => {
                ctx.input.click(CLICK_ANCHOR)?;
                self.delay = self.settle_ticks();
            }
            FsmState::Inventory => {
                ctx.host.run_script(SWITCH_TAB_SCRIPT, &[INVENTORY_TAB])?;
                self.transition(FsmState::Resume);
            }
            FsmState::Resume => {
                let tasks: Vec<Task> = ctx.registry.active_breaks().keys().cloned().collect();
                for task in &tasks {
                    ctx.registry.stop_break(task);
                }
                info!(resumed = tasks.len(), "breaks finished; tasks resumed");
                self.transition(FsmState::Idle);
            }
            FsmState::Idle if has_breaks => self.guard_idle_break(ctx),
            FsmState::Idle => {}
        }
        Ok(())
    }

    /// Keep an idle-only break from tripping the host's idle disconnect, and
    /// head back to the inventory once every window has elapsed.
    fn guard_idle_break(&mut self, ctx: &mut TickContext<'_>) {
        let registry = &*ctx.registry;
        let any_idle_only = registry
            .active_breaks()
            .keys()
            .any(|task| registry.policy_for(task) == BreakPolicy::IdleOnly);
        if !any_idle_only {
            return;
        }

        let high_water = self.settings.idle_high_water;
        if ctx.host.keyboard_idle_ticks() > high_water {
            ctx.host.set_keyboard_idle_ticks(0);
            debug!("keyboard idle timer reset");
        }
        if ctx.host.mouse_idle_ticks() > high_water {
            ctx.host.set_mouse_idle_ticks(0);
            debug!("mouse idle timer reset");
        }

        if registry.all_breaks_finished(registry.now()) {
            self.transition(FsmState::Inventory);
        }
    }

    /// Answer the host's question of what a synthetic click means
    pub fn resolve_menu(&mut self, host: &dyn Host, mut entry: MenuEntry) -> MenuResolution {
        match self.state {
            FsmState::LoginScreen => {
                if !host.has_widget(CLICK_TO_PLAY_BUTTON) {
                    return MenuResolution::Unhandled;
                }
                entry.rebind("Play", CLICK_TO_PLAY_BUTTON);
                self.transition(FsmState::Inventory);
                MenuResolution::Answered(entry)
            }
            FsmState::LogoutButton => {
                let resolution = match host.first_widget(&LOGOUT_BUTTONS) {
                    Some(button) => {
                        entry.rebind("Logout", button.id);
                        MenuResolution::Answered(entry)
                    }
                    None => {
                        warn!("logout button vanished; click suppressed");
                        MenuResolution::Suppressed
                    }
                };
                self.transition(FsmState::Idle);
                resolution
            }
            _ => MenuResolution::Unhandled,
        }
    }

    fn settle_ticks(&self) -> u32 {
        u32::try_from(self.settings.settle_ticks.sample()).unwrap_or(0)
    }

    fn transition(&mut self, next: FsmState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "automation transition");
            self.state = next;
            self.ticks_in_state = 0;
        }
    }

    fn observe_stall(&mut self, before: FsmState) {
        if self.state != before || self.state == FsmState::Idle {
            return;
        }
        self.ticks_in_state = self.ticks_in_state.saturating_add(1);
        let every = self.settings.stall_warn_ticks;
        if every > 0 && self.ticks_in_state % every == 0 {
            warn!(
                state = ?self.state,
                ticks = self.ticks_in_state,
                "automation waiting on host"
            );
        }
    }
}

impl Default for IdleAutomation {
    fn default() -> Self {
        Self::new(AutomationSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use breakhandler_adapter::types::widgets::{LOGOUT_BUTTON, LOGOUT_DOOR_BUTTON};
    use breakhandler_adapter::{InputJob, MenuAction, SimulatedHost, Widget};
    use chrono::Duration;
    use tokio::sync::mpsc;

    use super::*;
    use crate::clock::ManualClock;
    use crate::config::MemoryConfig;
    use crate::events::EventHub;

    struct Harness {
        fsm: IdleAutomation,
        host: SimulatedHost,
        input: InputDispatcher,
        jobs: mpsc::UnboundedReceiver<InputJob>,
        registry: BreakRegistry,
        clock: Arc<ManualClock>,
    }

    impl Harness {
        fn new(pairs: &[(&str, &str)]) -> Self {
            let clock = Arc::new(ManualClock::default());
            let config = Arc::new(MemoryConfig::from_pairs(pairs.iter().copied()));
            let registry = BreakRegistry::new(config, clock.clone(), EventHub::new());
            let (input, jobs) = InputDispatcher::detached();
            Self {
                fsm: IdleAutomation::default(),
                host: SimulatedHost::logged_in(),
                input,
                jobs,
                registry,
                clock,
            }
        }

        fn tick(&mut self) {
            let mut ctx = TickContext {
                host: &self.host,
                input: &self.input,
                registry: &mut self.registry,
            };
            self.fsm.on_tick(&mut ctx);
        }

        fn jobs(&mut self) -> Vec<InputJob> {
            let mut jobs = Vec::new();
            while let Ok(job) = self.jobs.try_recv() {
                jobs.push(job);
            }
            jobs
        }
    }

    const TASKS: &[(&str, &str)] = &[
        ("a-thresholdfrom", "1"),
        ("a-thresholdto", "1"),
        ("a-logout", "false"),
        ("b-thresholdfrom", "1"),
        ("b-thresholdto", "1"),
        ("b-logout", "true"),
    ];

    #[test]
    fn forced_logout_walks_to_logout_button() {
        let mut h = Harness::new(&[]);
        h.fsm.on_logout_requested();
        assert_eq!(h.fsm.state(), FsmState::Logout);

        h.tick();
        assert_eq!(h.fsm.state(), FsmState::LogoutTab);
        assert_eq!(h.jobs(), vec![InputJob::Key(Key::Escape)]);

        h.tick();
        assert_eq!(h.fsm.state(), FsmState::LogoutButton);
        assert!(h.host.has_widget(LOGOUT_BUTTON));

        h.tick();
        assert_eq!(h.fsm.state(), FsmState::LogoutButton);
        assert_eq!(h.jobs(), vec![InputJob::Click(CLICK_ANCHOR)]);
        assert!((19..=24).contains(&h.fsm.delay()));
    }

    #[test]
    fn script_failure_resets_and_retries() {
        let mut h = Harness::new(&[]);
        h.host.set_game_state(GameState::ConnectionLost);
        h.fsm.on_logout_requested();
        h.tick();

        // Scripts fail outside the game; the step is retried from Idle.
        h.tick();
        assert_eq!(h.fsm.state(), FsmState::Idle);
        assert!(h.fsm.pending_logout());

        h.host.set_game_state(GameState::LoggedIn);
        h.tick();
        assert_eq!(h.fsm.state(), FsmState::Logout);
    }

    #[test]
    fn logout_menu_binds_to_whichever_button_exists() {
        let mut h = Harness::new(&[]);
        h.host.put_widget(Widget::new(LOGOUT_DOOR_BUTTON));
        h.fsm.on_logout_requested();
        h.tick();
        h.tick();
        assert_eq!(h.fsm.state(), FsmState::LogoutButton);
        h.host.remove_widget(LOGOUT_BUTTON);

        let resolution = h.fsm.resolve_menu(&h.host, MenuEntry::default());

        let MenuResolution::Answered(entry) = resolution else {
            panic!("expected an answered menu, got {resolution:?}");
        };
        assert_eq!(entry.option, "Logout");
        assert_eq!(entry.action, MenuAction::CcOp);
        assert_eq!(entry.widget(), LOGOUT_DOOR_BUTTON);
        assert_eq!(h.fsm.state(), FsmState::Idle);
    }

    #[test]
    fn missing_logout_button_suppresses_input() {
        let mut h = Harness::new(&[]);
        h.fsm.on_logout_requested();
        h.tick();
        h.tick();
        h.host.remove_widget(LOGOUT_BUTTON);

        let resolution = h.fsm.resolve_menu(&h.host, MenuEntry::default());

        assert_eq!(resolution, MenuResolution::Suppressed);
        assert_eq!(h.fsm.state(), FsmState::Idle);
    }

    #[test]
    fn settle_delay_holds_back_a_new_escalation() {
        let mut h = Harness::new(&[]);
        h.fsm.on_logout_requested();
        h.tick();
        h.tick();
        h.tick();
        h.fsm.resolve_menu(&h.host, MenuEntry::default());
        assert_eq!(h.fsm.state(), FsmState::Idle);
        assert!(h.fsm.pending_logout());

        while h.fsm.delay() > 0 {
            h.tick();
            assert_eq!(h.fsm.state(), FsmState::Idle);
        }
        h.tick();
        assert_eq!(h.fsm.state(), FsmState::Logout);
    }

    #[test]
    fn login_screen_clicks_play_then_resumes() {
        let mut h = Harness::new(TASKS);
        h.registry.register_task(Task::new("b"), true);
        h.registry.request_break(&Task::new("b")).unwrap();
        h.fsm.on_logout_requested();
        h.fsm.on_game_state_changed(GameState::LoginScreen);
        h.host
            .put_widget(Widget::with_text(CLICK_TO_PLAY_TEXT, CLICK_TO_PLAY_LABEL));
        h.host.put_widget(Widget::new(CLICK_TO_PLAY_BUTTON));
        h.host.put_widget(Widget::new(LOGIN_CLICK_TO_PLAY_SCREEN));

        h.tick();
        assert!(!h.fsm.pending_logout());
        assert_eq!(h.jobs(), vec![InputJob::Click(CLICK_ANCHOR)]);

        let resolution = h.fsm.resolve_menu(&h.host, MenuEntry::default());
        assert!(matches!(resolution, MenuResolution::Answered(ref e) if e.option == "Play"));
        assert_eq!(h.fsm.state(), FsmState::Inventory);

        h.tick();
        assert_eq!(h.fsm.state(), FsmState::Resume);
        h.tick();
        assert_eq!(h.fsm.state(), FsmState::Idle);
        assert!(!h.registry.has_active_breaks());
    }

    #[test]
    fn login_screen_without_play_screen_goes_to_inventory() {
        let mut h = Harness::new(TASKS);
        h.registry.register_task(Task::new("b"), true);
        h.registry.request_break(&Task::new("b")).unwrap();
        h.fsm.on_game_state_changed(GameState::LoginScreen);

        h.tick();
        assert_eq!(h.fsm.state(), FsmState::Inventory);
    }

    #[test]
    fn idle_guard_runs_while_any_break_is_idle_only() {
        let mut h = Harness::new(TASKS);
        for name in ["a", "b"] {
            h.registry.register_task(Task::new(name), true);
            h.registry.request_break(&Task::new(name)).unwrap();
        }

        for _ in 0..3 {
            h.host.set_mouse_idle_ticks(15_000);
            h.host.set_keyboard_idle_ticks(14_950);
            h.tick();
            assert_eq!(h.host.mouse_idle_ticks(), 0);
            assert_eq!(h.host.keyboard_idle_ticks(), 0);
        }

        h.host.set_mouse_idle_ticks(14_900);
        h.tick();
        assert_eq!(h.host.mouse_idle_ticks(), 14_900);
        assert_eq!(h.fsm.state(), FsmState::Idle);

        h.clock.advance(Duration::seconds(60));
        h.tick();
        assert_eq!(h.fsm.state(), FsmState::Inventory);
    }

    #[test]
    fn logout_only_breaks_skip_the_idle_guard() {
        let mut h = Harness::new(TASKS);
        h.registry.register_task(Task::new("b"), true);
        h.registry.request_break(&Task::new("b")).unwrap();
        h.host.set_mouse_idle_ticks(15_000);

        h.tick();

        assert_eq!(h.host.mouse_idle_ticks(), 15_000);
    }

    #[test]
    fn break_activation_escalates_per_policy() {
        let mut fsm = IdleAutomation::default();
        fsm.on_break_activated(&Task::new("a"), BreakPolicy::IdleOnly);
        assert_eq!(fsm.state(), FsmState::Idle);

        fsm.on_break_activated(&Task::new("b"), BreakPolicy::Logout);
        assert_eq!(fsm.state(), FsmState::Logout);
        assert!(fsm.pending_logout());
    }

    #[test]
    fn every_state_returns_to_idle() {
        let states = [
            FsmState::LoginScreen,
            FsmState::Logout,
            FsmState::LogoutTab,
            FsmState::LogoutButton,
            FsmState::Inventory,
            FsmState::Resume,
        ];
        for start in states {
            let mut h = Harness::new(TASKS);
            h.registry.register_task(Task::new("a"), true);
            h.registry.request_break(&Task::new("a")).unwrap();
            h.clock.advance(Duration::seconds(60));
            h.fsm.state = start;

            let mut reached = false;
            for _ in 0..10 {
                if h.fsm.state() == FsmState::LogoutButton {
                    h.tick();
                    h.fsm.resolve_menu(&h.host, MenuEntry::default());
                    // Logged out: the host comes back with no breaks to resume.
                    h.fsm.pending_logout = false;
                }
                h.tick();
                if h.fsm.state() == FsmState::Idle {
                    reached = true;
                    break;
                }
            }
            assert!(reached, "{start:?} never reached Idle");
        }
    }

    #[test]
    fn reset_clears_everything() {
        let mut fsm = IdleAutomation::default();
        fsm.on_logout_requested();
        fsm.reset();
        assert_eq!(fsm.state(), FsmState::Idle);
        assert!(!fsm.pending_logout());
        assert_eq!(fsm.delay(), 0);
    }

    #[test]
    fn menu_outside_known_steps_is_not_ours() {
        let mut fsm = IdleAutomation::default();
        let host = SimulatedHost::logged_in();
        assert_eq!(
            fsm.resolve_menu(&host, MenuEntry::default()),
            MenuResolution::Unhandled
        );
    }
}
