//! Core types and shared functionality for forumcache.
//!
//! This crate provides:
//! - Typed forum snapshots and the tree flattening used to walk them
//! - Per-resource refresh tracking
//! - The SQLite cache: upserts, liveness pinning, pruning, read queries
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod resource;
pub mod snapshot;
pub mod tracker;
pub mod tree;

pub use cache::{CacheDb, CachePruner, PruneReport};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use resource::{BackoffPolicy, ResourceKind};
pub use snapshot::Snapshot;
pub use tracker::{KeyValueStore, MemoryKeyValueStore, RefreshTracker};
