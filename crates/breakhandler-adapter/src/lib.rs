/*
[INPUT]:  Crate modules and public type definitions
[OUTPUT]: Public host adapter crate surface
[POS]:    Crate root - module wiring
[UPDATE]: When public modules or exports change
*/

pub mod error;
pub mod host;
pub mod input;
pub mod sim;
pub mod types;

pub use error::{HostError, Result};
pub use host::Host;
pub use input::{InputDispatcher, InputJob};
pub use sim::{ScriptCall, SimulatedHost};

// Re-export all types
pub use types::*;
