//! Pre-commit hooks.
//!
//! Hooks are registered once when the store opens and run inside every
//! transaction just before it commits, with the set of records the
//! transaction inserted or changed.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::Transaction;

use super::schema::EntityRef;
use crate::clock::{Clock, encode_timestamp};

/// Runs against the pending write set before a transaction commits.
pub trait PreCommitHook: Send + Sync {
    fn will_commit(&self, tx: &Transaction<'_>, touched: &BTreeSet<EntityRef>) -> tokio_rusqlite::rusqlite::Result<()>;
}

/// Stamps `last_modified` on every touched record of a stampable kind.
#[derive(Debug, Clone)]
pub struct LastModifiedStamper {
    clock: Arc<dyn Clock>,
}

impl LastModifiedStamper {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl PreCommitHook for LastModifiedStamper {
    fn will_commit(&self, tx: &Transaction<'_>, touched: &BTreeSet<EntityRef>) -> tokio_rusqlite::rusqlite::Result<()> {
        let now = encode_timestamp(self.clock.now());
        for entity in touched.iter().filter(|e| e.kind.is_stampable()) {
            let sql = format!("UPDATE {} SET last_modified = ?1 WHERE id = ?2", entity.kind.table());
            tx.prepare_cached(&sql)?.execute(params![now, entity.id])?;
        }
        Ok(())
    }
}

/// The hooks a store runs, in registration order.
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: Vec<Arc<dyn PreCommitHook>>,
}

impl HookRegistry {
    pub fn register(&mut self, hook: Arc<dyn PreCommitHook>) {
        self.hooks.push(hook);
    }

    pub(crate) fn run(&self, tx: &Transaction<'_>, touched: &BTreeSet<EntityRef>) -> tokio_rusqlite::rusqlite::Result<()> {
        for hook in &self.hooks {
            hook.will_commit(tx, touched)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry").field("hooks", &self.hooks.len()).finish()
    }
}
