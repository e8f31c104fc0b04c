// Orchestrator Module
//
// Time control shared by every component that waits, polls or rate limits.

/// Clock abstractions for deterministic time control in tests
pub mod clock;

pub use clock::{Clock, PausedClock, SystemClock};
