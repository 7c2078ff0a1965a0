/*
[INPUT]:  Host callbacks (tick, game state change, menu option click)
[OUTPUT]: HostEvent values delivered to the scheduler's dispatch loop
[POS]:    Data layer - host-to-scheduler notifications
[UPDATE]: When the host grows new callbacks the scheduler must observe
*/

use std::fmt;

use tokio::sync::oneshot;

use super::enums::GameState;
use super::models::{MenuEntry, MenuResolution};

/// Notifications the host pushes into the scheduler
pub enum HostEvent {
    /// One simulation step elapsed
    Tick,
    /// The session moved to a new game state
    GameStateChanged(GameState),
    /// A click is about to be resolved into a menu action; the scheduler may
    /// answer, suppress, or ignore it through `reply`
    MenuOptionClicked {
        entry: MenuEntry,
        reply: oneshot::Sender<MenuResolution>,
    },
}

impl HostEvent {
    /// Build a menu resolution request and the receiver for its answer
    pub fn menu_option_clicked(entry: MenuEntry) -> (Self, oneshot::Receiver<MenuResolution>) {
        let (reply, rx) = oneshot::channel();
        (HostEvent::MenuOptionClicked { entry, reply }, rx)
    }
}

impl fmt::Debug for HostEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostEvent::Tick => write!(f, "Tick"),
            HostEvent::GameStateChanged(state) => {
                f.debug_tuple("GameStateChanged").field(state).finish()
            }
            HostEvent::MenuOptionClicked { entry, .. } => f
                .debug_struct("MenuOptionClicked")
                .field("entry", entry)
                .finish_non_exhaustive(),
        }
    }
}
