/*
[INPUT]:  Host client data shapes and interface layout
[OUTPUT]: Typed Rust structs/enums shared by host and scheduler
[POS]:    Data layer - type definitions for host communication
[UPDATE]: When host types are added or renamed
*/

pub mod enums;
pub mod events;
pub mod models;
pub mod widgets;

pub use enums::*;
pub use events::*;
pub use models::*;
