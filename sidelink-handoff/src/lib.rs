//! Sidelink Handoff — decision channel and scheduler driver.
//!
//! Connects the pure algorithms of `sidelink-core` to an external policy.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`errors`] | `HandoffError` |
//! | [`channel`] | Channel naming, exclusive claims, phase machine, `DecisionChannel` |
//! | [`transport`] | `PolicyTransport` with loopback and Unix socket implementations |
//! | [`sideband`] | Legacy text files, written atomically |
//! | [`scheduler`] | `SidelinkScheduler`, one call per scheduling opportunity |

pub mod channel;
pub mod errors;
pub mod scheduler;
pub mod sideband;
pub mod transport;

pub use channel::{ChannelName, DecisionChannel, Phase};
pub use errors::HandoffError;
pub use scheduler::{SchedulerStats, SidelinkScheduler};
pub use sideband::SidebandDir;
pub use transport::{LoopbackTransport, PolicyTransport, UnixSocketTransport};
