/*
[INPUT]:  Host client enumerations (game state, keys, input event kinds, menu actions)
[OUTPUT]: Typed Rust enums with serialization support
[POS]:    Data layer - type definitions for host communication
[UPDATE]: When the host exposes new states or input kinds
*/

use serde::{Deserialize, Serialize};

/// Coarse session state reported by the host client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameState {
    Unknown,
    Starting,
    LoginScreen,
    LoginScreenAuthenticator,
    Loading,
    LoggingIn,
    LoggedIn,
    ConnectionLost,
    Hopping,
}

impl GameState {
    /// Whether the session is in-game (widgets and scripts are available)
    pub fn is_logged_in(self) -> bool {
        matches!(self, GameState::LoggedIn | GameState::Loading)
    }
}

/// Keys the break handler ever needs to synthesize
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Key {
    Enter,
    Escape,
}

impl Key {
    /// Virtual key code understood by the host canvas
    pub fn code(self) -> i32 {
        match self {
            Key::Enter => 10,
            Key::Escape => 27,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseEventKind {
    Entered,
    Exited,
    Moved,
    Pressed,
    Released,
    Clicked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyEventKind {
    Pressed,
    Released,
}

/// Menu action opcode attached to a resolved click
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MenuAction {
    /// Component operation on a widget
    CcOp,
    /// Anything the host reported that we do not model
    Other,
}
