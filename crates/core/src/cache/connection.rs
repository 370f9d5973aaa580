//! Database connection management with pragma configuration.
//!
//! This module handles opening the SQLite database, applying required pragmas
//! (WAL mode so readers never wait on the writer), running migrations, and
//! registering the store's pre-commit hooks.
//!
//! All mutation goes through [`CacheDb::perform`], which runs on the
//! connection's single background thread. That thread is the one writer.

use std::path::Path;
use std::sync::Arc;

use tokio_rusqlite::Connection;
use tokio_rusqlite::params;

use super::liveness::{LiveHandle, LiveRegistry};
use super::migrations;
use super::schema::{EntityKind, EntityRef};
use super::stamp::{HookRegistry, LastModifiedStamper, PreCommitHook};
use super::workspace::Workspace;
use crate::Error;
use crate::clock::Clock;

const PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA synchronous=NORMAL;
     PRAGMA temp_store=MEMORY;
     PRAGMA foreign_keys=ON;";

/// Cache database handle.
///
/// Wraps a tokio-rusqlite Connection that runs database operations
/// on a background thread. Clones share the connection, hooks, and
/// liveness registry.
#[derive(Clone)]
pub struct CacheDb {
    pub(crate) conn: Connection,
    hooks: Arc<HookRegistry>,
    live: LiveRegistry,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CacheDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheDb").field("hooks", &self.hooks).field("live", &self.live.live_count()).finish()
    }
}

impl CacheDb {
    /// Open a database at the specified path.
    ///
    /// Creates the file if it doesn't exist, applies performance pragmas,
    /// and runs any pending migrations.
    pub async fn open(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self, Error> {
        let conn = Connection::open(path).await.map_err(|e| Error::Database(e.into()))?;
        Self::init(conn, clock).await
    }

    /// Open an in-memory database for testing.
    pub async fn open_in_memory(clock: Arc<dyn Clock>) -> Result<Self, Error> {
        let conn = Connection::open_in_memory().await.map_err(|e| Error::Database(e.into()))?;
        Self::init(conn, clock).await
    }

    async fn init(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self, Error> {
        conn.call(|conn| {
            conn.execute_batch(PRAGMAS)?;
            Ok(())
        })
        .await
        .map_err(Error::Database)?;

        migrations::run(&conn).await?;

        let mut hooks = HookRegistry::default();
        hooks.register(Arc::new(LastModifiedStamper::new(clock.clone())));

        Ok(Self { conn, hooks: Arc::new(hooks), live: LiveRegistry::default(), clock })
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn live(&self) -> &LiveRegistry {
        &self.live
    }

    /// Run `hook` before every commit made through this handle.
    ///
    /// Handles cloned earlier keep the hooks they had.
    pub fn register_hook(&mut self, hook: Arc<dyn PreCommitHook>) {
        Arc::make_mut(&mut self.hooks).register(hook);
    }

    /// Run `f` inside one transaction and commit.
    ///
    /// If `f` fails the transaction rolls back. A failed commit is reported
    /// as [`Error::CommitFailed`] tagged with `operation`.
    pub async fn perform<F, R>(&self, operation: &'static str, f: F) -> Result<R, Error>
    where
        F: FnOnce(&mut Workspace<'_>) -> Result<R, Error> + Send + 'static,
        R: Send + 'static,
    {
        let hooks = self.hooks.clone();
        let clock = self.clock.clone();
        self.conn
            .call(move |conn| -> Result<R, Error> {
                let mut ws = Workspace::begin(conn, clock)?;
                let out = f(&mut ws)?;
                ws.commit(&hooks, operation)?;
                Ok(out)
            })
            .await
            .map_err(Error::from)
    }

    /// Run `f` while the liveness registry is frozen.
    ///
    /// The registry stays frozen through commit, so no record can become
    /// pinned between `f`'s liveness checks and its deletes. The freeze is a
    /// blocking mutex held on the database thread: a concurrent [`pin`] or
    /// [`LiveHandle`] drop blocks its executor thread until the commit ends,
    /// so `f` should do no more than select, filter and delete.
    ///
    /// [`pin`]: CacheDb::pin
    pub(crate) async fn perform_frozen<F, R>(&self, operation: &'static str, f: F) -> Result<R, Error>
    where
        F: FnOnce(&mut Workspace<'_>, &super::liveness::LiveSet<'_>) -> Result<R, Error> + Send + 'static,
        R: Send + 'static,
    {
        let hooks = self.hooks.clone();
        let clock = self.clock.clone();
        let live = self.live.clone();
        self.conn
            .call(move |conn| -> Result<R, Error> {
                let frozen = live.freeze();
                let mut ws = Workspace::begin(conn, clock)?;
                let out = f(&mut ws, &frozen)?;
                ws.commit(&hooks, operation)?;
                drop(frozen);
                Ok(out)
            })
            .await
            .map_err(Error::from)
    }

    /// Pin a record so the pruner leaves it alone while the handle lives.
    ///
    /// Returns `None` if the record no longer exists.
    pub async fn pin(&self, entity: EntityRef) -> Result<Option<LiveHandle>, Error> {
        let handle = self.live.register(entity);
        let sql = format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1)", entity.kind.table());
        let exists: bool = self
            .conn
            .call(move |conn| -> Result<bool, Error> {
                let exists = conn.query_row(&sql, params![entity.id], |row| row.get(0))?;
                Ok(exists)
            })
            .await
            .map_err(Error::from)?;
        Ok(exists.then_some(handle))
    }

    /// Delete every cached record and refresh record, e.g. on logout.
    pub async fn reset(&self) -> Result<(), Error> {
        self.conn
            .call(|conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM forum_moderators", [])?;
                for kind in EntityKind::ALL {
                    tx.execute(&format!("DELETE FROM {}", kind.table()), [])?;
                }
                tx.execute("DELETE FROM key_values", [])?;
                tx.commit().map_err(|source| Error::CommitFailed { operation: "reset", source })
            })
            .await
            .map_err(Error::from)?;
        tracing::info!("cache reset");
        Ok(())
    }
}
