/*
[INPUT]:  Host capability calls from the scheduler, explicit tick advancement from a driver
[OUTPUT]: In-memory host that models login/logout screens, idle timers and menu resolution
[POS]:    Simulation layer - stand-in host for tests and the demo binary
[UPDATE]: When the scheduler depends on new host behavior worth modeling
[UPDATE]: 2026-10-16 Cap recorded script/input history
*/

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::error::{HostError, Result};
use crate::host::Host;
use crate::types::widgets::{
    CLICK_TO_PLAY_BUTTON, CLICK_TO_PLAY_LABEL, CLICK_TO_PLAY_TEXT, INVENTORY_TAB,
    LOGIN_CLICK_TO_PLAY_SCREEN, LOGOUT_BUTTON, LOGOUT_BUTTONS, LOGOUT_TAB, SWITCH_TAB_SCRIPT,
};
use crate::types::{
    GameState, HostEvent, InputEvent, Key, KeyEventKind, MenuEntry, MenuResolution,
    MouseEventKind, Widget, WidgetId,
};

/// Idle ticks after which the simulated host logs an idle session out
pub const AUTO_LOGOUT_IDLE_TICKS: u32 = 15_000;

/// Client idle ticks that accrue per game tick
pub const IDLE_TICKS_PER_TICK: u32 = 30;

/// Most recent script calls and input events kept for inspection
pub const HISTORY_LIMIT: usize = 512;

/// A script invocation recorded by the simulator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptCall {
    pub script_id: i32,
    pub args: Vec<i32>,
}

#[derive(Debug)]
struct SimState {
    game_state: GameState,
    widgets: BTreeMap<WidgetId, Widget>,
    mouse_idle_ticks: u32,
    keyboard_idle_ticks: u32,
    username: Option<String>,
    password: Option<String>,
    scripts: VecDeque<ScriptCall>,
    inputs: VecDeque<InputEvent>,
    key_presses: HashMap<Key, usize>,
    clicks: usize,
    pending_menus: Vec<oneshot::Receiver<MenuResolution>>,
    ticks: u64,
    logins: u32,
    logouts: u32,
    idle_disconnects: u32,
}

impl SimState {
    fn new(game_state: GameState) -> Self {
        Self {
            game_state,
            widgets: BTreeMap::new(),
            mouse_idle_ticks: 0,
            keyboard_idle_ticks: 0,
            username: None,
            password: None,
            scripts: VecDeque::new(),
            inputs: VecDeque::new(),
            key_presses: HashMap::new(),
            clicks: 0,
            pending_menus: Vec::new(),
            ticks: 0,
            logins: 0,
            logouts: 0,
            idle_disconnects: 0,
        }
    }

    fn put_widget(&mut self, widget: Widget) {
        self.widgets.insert(widget.id, widget);
    }

    fn record_script(&mut self, call: ScriptCall) {
        push_bounded(&mut self.scripts, call);
    }

    fn record_input(&mut self, event: &InputEvent) {
        match event {
            InputEvent::Mouse {
                kind: MouseEventKind::Clicked,
                ..
            } => self.clicks += 1,
            InputEvent::Key {
                kind: KeyEventKind::Released,
                key,
                ..
            } => *self.key_presses.entry(*key).or_default() += 1,
            _ => {}
        }
        push_bounded(&mut self.inputs, event.clone());
    }

    fn remove_group(&mut self, group: u16) {
        self.widgets.retain(|id, _| id.group != group);
    }

    fn enter_login_screen(&mut self) {
        self.game_state = GameState::LoginScreen;
        self.widgets.clear();
        self.mouse_idle_ticks = 0;
        self.keyboard_idle_ticks = 0;
    }
}

struct Inner {
    state: Mutex<SimState>,
    events: Mutex<Option<mpsc::UnboundedSender<HostEvent>>>,
}

/// In-memory [`Host`] implementation.
///
/// Cloning yields another handle to the same simulated session.
#[derive(Clone)]
pub struct SimulatedHost {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SimulatedHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("SimulatedHost")
            .field("game_state", &state.game_state)
            .field("ticks", &state.ticks)
            .finish_non_exhaustive()
    }
}

impl Default for SimulatedHost {
    fn default() -> Self {
        Self::logged_in()
    }
}

impl SimulatedHost {
    /// A session that is already in-game
    pub fn logged_in() -> Self {
        Self::with_state(GameState::LoggedIn)
    }

    /// A session sitting on the login screen
    pub fn at_login_screen() -> Self {
        Self::with_state(GameState::LoginScreen)
    }

    fn with_state(game_state: GameState) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SimState::new(game_state)),
                events: Mutex::new(None),
            }),
        }
    }

    /// Route host callbacks to `events`, replacing any earlier listener
    pub fn attach(&self, events: mpsc::UnboundedSender<HostEvent>) {
        *lock(&self.inner.events) = Some(events);
    }

    pub fn detach(&self) {
        *lock(&self.inner.events) = None;
    }

    /// Advance the simulation by one game tick.
    ///
    /// Applies answered menu resolutions, accrues idle time, and performs the
    /// host's own idle disconnect. [`HostEvent::Tick`] is only emitted while
    /// in game, as a real client stops ticking on the login screen.
    pub fn advance_tick(&self) {
        self.resolve_pending_menus();

        let (disconnected, in_game) = {
            let mut state = self.state();
            state.ticks += 1;
            if !state.game_state.is_logged_in() {
                (false, false)
            } else {
                state.mouse_idle_ticks = state.mouse_idle_ticks.saturating_add(IDLE_TICKS_PER_TICK);
                state.keyboard_idle_ticks =
                    state.keyboard_idle_ticks.saturating_add(IDLE_TICKS_PER_TICK);
                let idle = state.mouse_idle_ticks.min(state.keyboard_idle_ticks);
                if idle > AUTO_LOGOUT_IDLE_TICKS {
                    state.enter_login_screen();
                    state.idle_disconnects += 1;
                    (true, false)
                } else {
                    (false, true)
                }
            }
        };

        if disconnected {
            info!("simulated host disconnected an idle session");
            self.emit(HostEvent::GameStateChanged(GameState::LoginScreen));
        }
        if in_game {
            self.emit(HostEvent::Tick);
        }
    }

    /// Apply every menu resolution the scheduler has answered so far
    pub fn resolve_pending_menus(&self) {
        let mut ready = Vec::new();
        {
            let mut state = self.state();
            let pending = std::mem::take(&mut state.pending_menus);
            for mut rx in pending {
                match rx.try_recv() {
                    Ok(resolution) => ready.push(resolution),
                    Err(oneshot::error::TryRecvError::Empty) => state.pending_menus.push(rx),
                    Err(oneshot::error::TryRecvError::Closed) => {
                        debug!("menu resolution dropped without answer");
                    }
                }
            }
        }
        for resolution in ready {
            self.apply_menu_resolution(resolution);
        }
    }

    fn apply_menu_resolution(&self, resolution: MenuResolution) {
        let entry = match resolution {
            MenuResolution::Answered(entry) => entry,
            MenuResolution::Suppressed | MenuResolution::Unhandled => return,
        };

        let mut state = self.state();
        let widget = entry.widget();
        match entry.option.as_str() {
            "Logout" if LOGOUT_BUTTONS.contains(&widget) && state.widgets.contains_key(&widget) => {
                state.enter_login_screen();
                state.logouts += 1;
                drop(state);
                info!("simulated host logged out");
                self.emit(HostEvent::GameStateChanged(GameState::LoginScreen));
            }
            "Play" if widget == CLICK_TO_PLAY_BUTTON => {
                state.remove_group(CLICK_TO_PLAY_BUTTON.group);
                debug!("simulated host dismissed the click-to-play screen");
            }
            other => debug!(option = other, %widget, "menu entry had no effect"),
        }
    }

    fn emit(&self, event: HostEvent) {
        if let Some(tx) = lock(&self.inner.events).as_ref() {
            if tx.send(event).is_err() {
                debug!("host event listener is gone");
            }
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        lock(&self.inner.state)
    }

    fn on_click(&self) {
        let has_menu_target = {
            let state = self.state();
            state.game_state.is_logged_in()
                && (LOGOUT_BUTTONS.iter().any(|id| state.widgets.contains_key(id))
                    || state.widgets.contains_key(&CLICK_TO_PLAY_BUTTON))
        };
        if !has_menu_target {
            return;
        }

        let (event, rx) = HostEvent::menu_option_clicked(MenuEntry::default());
        self.state().pending_menus.push(rx);
        self.emit(event);
    }

    fn on_enter(&self) {
        let logged_in = {
            let mut state = self.state();
            if state.game_state != GameState::LoginScreen
                || state.username.as_deref().map_or(true, str::is_empty)
            {
                return;
            }
            state.game_state = GameState::LoggedIn;
            state.logins += 1;
            state.mouse_idle_ticks = 0;
            state.keyboard_idle_ticks = 0;
            state.put_widget(Widget::new(LOGIN_CLICK_TO_PLAY_SCREEN));
            state.put_widget(Widget::new(CLICK_TO_PLAY_BUTTON));
            state.put_widget(Widget::with_text(CLICK_TO_PLAY_TEXT, CLICK_TO_PLAY_LABEL));
            state.username.clone()
        };
        info!(username = ?logged_in, "simulated host logged in");
        self.emit(HostEvent::GameStateChanged(GameState::LoggedIn));
    }

    // Inspection helpers

    pub fn put_widget(&self, widget: Widget) {
        self.state().put_widget(widget);
    }

    pub fn remove_widget(&self, id: WidgetId) {
        self.state().widgets.remove(&id);
    }

    pub fn ticks(&self) -> u64 {
        self.state().ticks
    }

    pub fn logins(&self) -> u32 {
        self.state().logins
    }

    pub fn logouts(&self) -> u32 {
        self.state().logouts
    }

    pub fn idle_disconnects(&self) -> u32 {
        self.state().idle_disconnects
    }

    /// Up to [`HISTORY_LIMIT`] most recent script calls, oldest first
    pub fn scripts(&self) -> Vec<ScriptCall> {
        self.state().scripts.iter().cloned().collect()
    }

    /// Up to [`HISTORY_LIMIT`] most recent input events, oldest first
    pub fn inputs(&self) -> Vec<InputEvent> {
        self.state().inputs.iter().cloned().collect()
    }

    pub fn credentials(&self) -> (Option<String>, Option<String>) {
        let state = self.state();
        (state.username.clone(), state.password.clone())
    }

    /// Number of completed key presses for `key`
    pub fn key_presses(&self, key: Key) -> usize {
        self.state().key_presses.get(&key).copied().unwrap_or(0)
    }

    pub fn clicks(&self) -> usize {
        self.state().clicks
    }
}

impl Host for SimulatedHost {
    fn widget(&self, id: WidgetId) -> Option<Widget> {
        self.state().widgets.get(&id).cloned()
    }

    fn game_state(&self) -> GameState {
        self.state().game_state
    }

    fn set_game_state(&self, game_state: GameState) {
        self.state().game_state = game_state;
    }

    fn mouse_idle_ticks(&self) -> u32 {
        self.state().mouse_idle_ticks
    }

    fn set_mouse_idle_ticks(&self, ticks: u32) {
        self.state().mouse_idle_ticks = ticks;
    }

    fn keyboard_idle_ticks(&self) -> u32 {
        self.state().keyboard_idle_ticks
    }

    fn set_keyboard_idle_ticks(&self, ticks: u32) {
        self.state().keyboard_idle_ticks = ticks;
    }

    fn run_script(&self, script_id: i32, args: &[i32]) -> Result<()> {
        let mut state = self.state();
        if !state.game_state.is_logged_in() {
            return Err(HostError::Script {
                script_id,
                message: format!("not in game ({:?})", state.game_state),
            });
        }
        state.record_script(ScriptCall {
            script_id,
            args: args.to_vec(),
        });

        if script_id == SWITCH_TAB_SCRIPT {
            match args.first() {
                Some(&LOGOUT_TAB) => state.put_widget(Widget::new(LOGOUT_BUTTON)),
                Some(&INVENTORY_TAB) => {
                    for id in LOGOUT_BUTTONS {
                        state.widgets.remove(&id);
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn dispatch_input(&self, event: InputEvent) -> Result<()> {
        self.state().record_input(&event);

        match event {
            InputEvent::Mouse {
                kind: MouseEventKind::Clicked,
                ..
            } => self.on_click(),
            InputEvent::Key {
                kind: KeyEventKind::Released,
                key: Key::Enter,
                ..
            } => self.on_enter(),
            _ => {}
        }
        Ok(())
    }

    fn set_credentials(&self, username: &str, password: &str) -> Result<()> {
        let mut state = self.state();
        state.username = Some(username.to_string());
        state.password = Some(password.to_string());
        Ok(())
    }
}

fn push_bounded<T>(log: &mut VecDeque<T>, item: T) {
    if log.len() == HISTORY_LIMIT {
        log.pop_front();
    }
    log.push_back(item);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
