/*
[INPUT]:  Host client object shapes (widgets, screen points, input events, menu entries)
[OUTPUT]: Plain data structs exchanged across the host boundary
[POS]:    Data layer - type definitions for host communication
[UPDATE]: When the capability surface grows new payloads
*/

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{Key, KeyEventKind, MenuAction, MouseEventKind};

/// Widget address as (interface group, child index)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WidgetId {
    pub group: u16,
    pub child: u16,
}

impl WidgetId {
    pub const fn new(group: u16, child: u16) -> Self {
        Self { group, child }
    }

    /// Packed identifier the host uses in menu entries (`group << 16 | child`)
    pub fn packed(self) -> i32 {
        ((self.group as i32) << 16) | self.child as i32
    }

    pub fn from_packed(packed: i32) -> Self {
        Self {
            group: ((packed >> 16) & 0xffff) as u16,
            child: (packed & 0xffff) as u16,
        }
    }
}

impl fmt::Display for WidgetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group, self.child)
    }
}

/// Snapshot of a widget as seen on one tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Widget {
    pub id: WidgetId,
    #[serde(default)]
    pub text: String,
}

impl Widget {
    pub fn new(id: WidgetId) -> Self {
        Self {
            id,
            text: String::new(),
        }
    }

    pub fn with_text(id: WidgetId, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0, y: 0 };

    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// A single synthetic input event delivered to the host canvas
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "device", rename_all = "lowercase")]
pub enum InputEvent {
    Mouse {
        kind: MouseEventKind,
        point: Point,
        at: DateTime<Utc>,
    },
    Key {
        kind: KeyEventKind,
        key: Key,
        at: DateTime<Utc>,
    },
}

impl InputEvent {
    pub fn mouse(kind: MouseEventKind, point: Point) -> Self {
        InputEvent::Mouse {
            kind,
            point,
            at: Utc::now(),
        }
    }

    pub fn key(kind: KeyEventKind, key: Key) -> Self {
        InputEvent::Key {
            kind,
            key,
            at: Utc::now(),
        }
    }
}

/// Menu entry the host asks us to resolve after a synthetic click
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuEntry {
    pub option: String,
    pub target: String,
    pub identifier: i32,
    pub action: MenuAction,
    pub param0: i32,
    /// Packed widget id the action is bound to
    pub param1: i32,
}

impl MenuEntry {
    /// Bind this entry to a widget operation, overwriting whatever the host filled in
    pub fn rebind(&mut self, option: &str, widget: WidgetId) {
        self.option = option.to_string();
        self.target = String::new();
        self.identifier = 1;
        self.action = MenuAction::CcOp;
        self.param0 = -1;
        self.param1 = widget.packed();
    }

    pub fn widget(&self) -> WidgetId {
        WidgetId::from_packed(self.param1)
    }
}

impl Default for MenuEntry {
    fn default() -> Self {
        Self {
            option: "Cancel".to_string(),
            target: String::new(),
            identifier: 0,
            action: MenuAction::Other,
            param0: -1,
            param1: -1,
        }
    }
}

/// Answer to a menu resolution request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuResolution {
    /// Replace the host's entry with this one
    Answered(MenuEntry),
    /// Swallow the pending input entirely
    Suppressed,
    /// Not ours; let the host proceed untouched
    Unhandled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widget_id_packs_group_and_child() {
        let id = WidgetId::new(182, 8);
        assert_eq!(id.packed(), (182 << 16) | 8);
        assert_eq!(WidgetId::from_packed(id.packed()), id);
    }

    #[test]
    fn menu_entry_rebind_points_at_widget() {
        let mut entry = MenuEntry::default();
        entry.rebind("Logout", WidgetId::new(69, 23));

        assert_eq!(entry.option, "Logout");
        assert_eq!(entry.identifier, 1);
        assert_eq!(entry.action, MenuAction::CcOp);
        assert_eq!(entry.param0, -1);
        assert_eq!(entry.widget(), WidgetId::new(69, 23));
    }

    #[test]
    fn input_event_serializes_with_device_tag() {
        let event = InputEvent::key(KeyEventKind::Pressed, Key::Escape);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["device"], "key");
        assert_eq!(json["key"], "escape");
    }
}
