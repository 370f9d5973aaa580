//! Refresh scheduling for forumcache.
//!
//! One [`RefreshScheduler`] per resource kind decides when to fetch, with
//! jittered backoff and foreground/background awareness. The
//! [`PruneScheduler`] runs cache pruning shortly after each foreground.

pub mod backoff;
pub mod fetch;
pub mod lifecycle;
pub mod prune_timer;
pub mod scheduler;

pub use backoff::{TimerReason, compute_delay};
pub use fetch::{Fetcher, RefreshGate, SnapshotSink, StaticGate};
pub use lifecycle::{Lifecycle, LifecycleBus};
pub use prune_timer::{PruneScheduler, PruneStatus, PruneTarget};
pub use scheduler::{Phase, RefreshScheduler, SchedulerContext, SchedulerStatus};
