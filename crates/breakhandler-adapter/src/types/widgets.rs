/*
[INPUT]:  Host interface layout knowledge (widget groups, script ids)
[OUTPUT]: Named constants for the UI milestones the logout/login flow depends on
[POS]:    Data layer - well-known host addresses
[UPDATE]: When the host client moves interfaces or renumbers scripts
*/

use super::models::{Point, WidgetId};

/// Root of the "click here to play" screen shown right after login
pub const LOGIN_CLICK_TO_PLAY_SCREEN: WidgetId = WidgetId::new(378, 0);

/// The play button on the click-to-play screen
pub const CLICK_TO_PLAY_BUTTON: WidgetId = WidgetId::new(378, 78);

/// Label inside the play button
pub const CLICK_TO_PLAY_TEXT: WidgetId = WidgetId::new(378, 87);

/// Expected label of [`CLICK_TO_PLAY_TEXT`]
pub const CLICK_TO_PLAY_LABEL: &str = "CLICK HERE TO PLAY";

/// Logout button in the fixed logout tab
pub const LOGOUT_BUTTON: WidgetId = WidgetId::new(182, 8);

/// Logout button on the world switcher ("door") layout
pub const LOGOUT_DOOR_BUTTON: WidgetId = WidgetId::new(69, 23);

/// Both places a logout button may live, in lookup order
pub const LOGOUT_BUTTONS: [WidgetId; 2] = [LOGOUT_BUTTON, LOGOUT_DOOR_BUTTON];

/// Script that switches the side panel tab
pub const SWITCH_TAB_SCRIPT: i32 = 915;

/// Argument to [`SWITCH_TAB_SCRIPT`] selecting the logout tab
pub const LOGOUT_TAB: i32 = 10;

/// Argument to [`SWITCH_TAB_SCRIPT`] selecting the inventory tab
pub const INVENTORY_TAB: i32 = 3;

/// Where synthetic clicks land; the menu resolution rebinds them to a widget
pub const CLICK_ANCHOR: Point = Point::ORIGIN;
