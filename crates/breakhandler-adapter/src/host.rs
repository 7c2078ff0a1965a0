/*
[INPUT]:  A running host client (real or simulated)
[OUTPUT]: Narrow capability trait the scheduler drives the session through
[POS]:    Port layer - the only way the scheduler touches the environment
[UPDATE]: When the scheduler needs a new host capability
*/

use crate::error::Result;
use crate::types::{GameState, InputEvent, Widget, WidgetId};

/// Capability surface of the host environment.
///
/// Reads are infallible snapshots for the current tick; a missing widget is
/// `None`, never an error. Writes that can be refused by the host return
/// [`Result`].
pub trait Host: Send + Sync {
    /// Look up a widget by address
    fn widget(&self, id: WidgetId) -> Option<Widget>;

    fn game_state(&self) -> GameState;

    fn set_game_state(&self, state: GameState);

    fn mouse_idle_ticks(&self) -> u32;

    fn set_mouse_idle_ticks(&self, ticks: u32);

    fn keyboard_idle_ticks(&self) -> u32;

    fn set_keyboard_idle_ticks(&self, ticks: u32);

    /// Run a host script by id
    fn run_script(&self, script_id: i32, args: &[i32]) -> Result<()>;

    /// Deliver one synthetic input event to the host canvas
    fn dispatch_input(&self, event: InputEvent) -> Result<()>;

    /// Fill the login form fields
    fn set_credentials(&self, username: &str, password: &str) -> Result<()>;

    fn has_widget(&self, id: WidgetId) -> bool {
        self.widget(id).is_some()
    }

    /// First of `ids` that currently exists
    fn first_widget(&self, ids: &[WidgetId]) -> Option<Widget> {
        ids.iter().find_map(|id| self.widget(*id))
    }
}
