//! SQLite-backed object store for cached forum content.
//!
//! Access goes through tokio-rusqlite, so every statement runs on the
//! connection's background thread. It supports:
//!
//! - Transactional workspaces with diff-and-set updates
//! - Identity-based upserts that repair duplicate records
//! - Pre-commit hooks (`last_modified` stamping)
//! - Liveness pinning and age-based pruning
//! - Automatic schema migrations

pub mod connection;
pub mod forums;
pub mod kv;
pub mod liveness;
pub mod migrations;
pub mod prune;
pub mod queries;
pub mod schema;
pub mod stamp;
pub mod upsert;
pub mod workspace;

pub use crate::Error;

pub use connection::CacheDb;
pub use liveness::{LiveHandle, LiveRegistry};
pub use prune::{CachePruner, DEFAULT_RETENTION_DAYS, KindCounts, PruneReport};
pub use queries::{CachedAnnouncement, CachedForum, CachedMessage, CachedThread, CachedUser};
pub use schema::{EntityKind, EntityRef};
pub use stamp::{HookRegistry, LastModifiedStamper, PreCommitHook};
pub use upsert::UpsertReport;
pub use workspace::{Identity, Record, Workspace};
