/*
[INPUT]:  Public API exports for breakhandler-scheduler crate
[OUTPUT]: Module declarations and public re-exports
[POS]:    Crate root - library entry point
[UPDATE]: When adding new modules or public exports
*/

pub mod automation;
pub mod clock;
pub mod config;
pub mod events;
pub mod interval;
pub mod registry;
pub mod service;
pub mod session;
pub mod task;

// Re-export main types for convenience
pub use automation::{AutomationSettings, FsmState, IdleAutomation};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BreakHandlerConfig, ConfigStore, MemoryConfig};
pub use events::EventHub;
pub use registry::{BreakError, BreakPolicy, BreakRegistry};
pub use service::{BreakHandle, BreakService, ServiceError, ServiceRunner, ServiceSettings};
pub use session::{CredentialBlob, Credentials, SessionSelector};
pub use task::{BreakStats, BreakWindow, Task};
