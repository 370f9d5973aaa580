//! Transactional workspace over the cache tables.
//!
//! A [`Workspace`] wraps one SQLite transaction. Every insert or changed
//! update is recorded in a touched set; at commit the store's pre-commit
//! hooks see that set (this is how `last_modified` gets stamped) and then the
//! transaction commits. Dropping a workspace without committing rolls back.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_rusqlite::rusqlite::types::Value;
use tokio_rusqlite::rusqlite::{self, Connection, Transaction, params, params_from_iter};

use super::schema::{EntityKind, EntityRef, ToMany};
use super::stamp::HookRegistry;
use crate::Error;
use crate::clock::{Clock, encode_timestamp};

/// Natural keys of a snapshot. Empty values are dropped on construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    kind: EntityKind,
    keys: Vec<(&'static str, String)>,
}

impl Identity {
    pub fn new(kind: EntityKind) -> Self {
        Self { kind, keys: Vec::new() }
    }

    /// Add a natural key. Blank values are ignored.
    pub fn with(mut self, column: &'static str, value: impl AsRef<str>) -> Self {
        debug_assert!(self.kind.natural_keys().contains(&column), "{column} is not a natural key of {}", self.kind);
        let value = value.as_ref().trim();
        if !value.is_empty() {
            self.keys.push((column, value.to_string()));
        }
        self
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// True when no natural key is present; such records are never merged.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[(&'static str, String)] {
        &self.keys
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(", self.kind)?;
        for (i, (column, value)) in self.keys.iter().enumerate() {
            if i > 0 {
                f.write_str(" or ")?;
            }
            write!(f, "{column}={value:?}")?;
        }
        f.write_str(")")
    }
}

/// Current column values of one persisted record.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    entity: EntityRef,
    values: HashMap<&'static str, Value>,
}

impl Record {
    pub fn entity(&self) -> EntityRef {
        self.entity
    }

    pub fn id(&self) -> i64 {
        self.entity.id
    }

    pub fn value(&self, column: &str) -> &Value {
        self.values.get(column).unwrap_or(&Value::Null)
    }

    pub fn text(&self, column: &str) -> Option<&str> {
        match self.value(column) {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn integer(&self, column: &str) -> Option<i64> {
        match self.value(column) {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn flag(&self, column: &str) -> bool {
        self.integer(column).is_some_and(|i| i != 0)
    }

    fn from_row(kind: EntityKind, row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let id: i64 = row.get(0)?;
        let mut values = HashMap::with_capacity(kind.columns().len());
        for (i, column) in kind.columns().iter().enumerate() {
            values.insert(*column, row.get::<_, Value>(i + 1)?);
        }
        Ok(Self { entity: EntityRef::new(kind, id), values })
    }
}

pub fn text(value: impl Into<String>) -> Value {
    Value::Text(value.into())
}

pub fn opt_text(value: Option<impl Into<String>>) -> Value {
    value.map_or(Value::Null, |v| Value::Text(v.into()))
}

pub fn integer(value: i64) -> Value {
    Value::Integer(value)
}

pub fn flag(value: bool) -> Value {
    Value::Integer(i64::from(value))
}

pub fn timestamp(value: DateTime<Utc>) -> Value {
    Value::Text(encode_timestamp(value))
}

pub fn reference(entity: Option<EntityRef>) -> Value {
    entity.map_or(Value::Null, |e| Value::Integer(e.id))
}

/// A column assignment.
pub type Assignment = (&'static str, Value);

fn select_sql(kind: EntityKind, filter: &str) -> String {
    format!("SELECT id, {} FROM {} WHERE {filter} ORDER BY id", kind.columns().join(", "), kind.table())
}

/// One transaction against the cache.
pub struct Workspace<'conn> {
    tx: Transaction<'conn>,
    touched: BTreeSet<EntityRef>,
    clock: Arc<dyn Clock>,
    now: DateTime<Utc>,
}

impl<'conn> Workspace<'conn> {
    pub(crate) fn begin(conn: &'conn mut Connection, clock: Arc<dyn Clock>) -> Result<Self, Error> {
        let tx = conn.transaction()?;
        let now = clock.now();
        Ok(Self { tx, touched: BTreeSet::new(), clock, now })
    }

    /// The time the workspace was opened.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub(crate) fn transaction(&self) -> &Transaction<'conn> {
        &self.tx
    }

    /// Records touched so far.
    pub fn touched(&self) -> &BTreeSet<EntityRef> {
        &self.touched
    }

    /// Mark a record as modified so pre-commit hooks see it.
    pub fn touch(&mut self, entity: EntityRef) {
        self.touched.insert(entity);
    }

    /// Records matching any of the identity's keys, lowest row id first.
    pub fn find(&self, identity: &Identity) -> Result<Vec<Record>, Error> {
        if identity.is_empty() {
            return Ok(Vec::new());
        }
        let kind = identity.kind();
        let filter = identity
            .keys()
            .iter()
            .enumerate()
            .map(|(i, (column, _))| format!("{column} = ?{}", i + 1))
            .collect::<Vec<_>>()
            .join(" OR ");
        let mut stmt = self.tx.prepare_cached(&select_sql(kind, &filter))?;
        let rows = stmt.query_map(params_from_iter(identity.keys().iter().map(|(_, v)| v)), |row| {
            Record::from_row(kind, row)
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Records of `kind` matching a raw SQL filter, lowest row id first.
    pub fn select<P: rusqlite::Params>(&self, kind: EntityKind, filter: &str, params: P) -> Result<Vec<Record>, Error> {
        let mut stmt = self.tx.prepare_cached(&select_sql(kind, filter))?;
        let rows = stmt.query_map(params, |row| Record::from_row(kind, row))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get(&self, entity: EntityRef) -> Result<Option<Record>, Error> {
        Ok(self.select(entity.kind, "id = ?1", params![entity.id])?.into_iter().next())
    }

    /// Insert a new record with the given values.
    pub fn insert(&mut self, kind: EntityKind, values: &[Assignment]) -> Result<Record, Error> {
        let stamp = timestamp(self.now);
        let mut columns: Vec<&'static str> = values.iter().map(|(c, _)| *c).collect();
        let mut params: Vec<&Value> = values.iter().map(|(_, v)| v).collect();
        if kind.is_stampable() && !columns.contains(&"last_modified") {
            columns.push("last_modified");
            params.push(&stamp);
        }
        let placeholders = (1..=columns.len()).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ");
        let sql = if columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", kind.table())
        } else {
            format!("INSERT INTO {} ({}) VALUES ({placeholders})", kind.table(), columns.join(", "))
        };
        self.tx.prepare_cached(&sql)?.execute(params_from_iter(params))?;
        let entity = EntityRef::new(kind, self.tx.last_insert_rowid());
        self.touch(entity);
        self.get(entity)?.ok_or_else(|| Error::UnknownEntity(entity.to_string()))
    }

    /// Write the assignments that differ from the record's current values.
    ///
    /// Returns the columns that changed. Nothing is written, and the record is
    /// not touched, when every value already matches.
    pub fn update(&mut self, record: &mut Record, values: &[Assignment]) -> Result<Vec<&'static str>, Error> {
        let changed: Vec<&Assignment> = values.iter().filter(|(column, value)| record.value(column) != value).collect();
        if changed.is_empty() {
            return Ok(Vec::new());
        }
        let sets = changed.iter().enumerate().map(|(i, (c, _))| format!("{c} = ?{}", i + 1)).collect::<Vec<_>>();
        let sql = format!("UPDATE {} SET {} WHERE id = ?{}", record.entity.kind.table(), sets.join(", "), sets.len() + 1);
        let id = Value::Integer(record.id());
        let params = changed.iter().map(|(_, v)| v).chain(std::iter::once(&id));
        self.tx.prepare_cached(&sql)?.execute(params_from_iter(params))?;

        let mut columns = Vec::with_capacity(changed.len());
        for (column, value) in changed {
            record.values.insert(*column, value.clone());
            columns.push(*column);
        }
        self.touch(record.entity);
        Ok(columns)
    }

    /// Insert or merge-update a record by identity.
    ///
    /// With no natural key the record is always inserted. With several
    /// matches the lowest row id survives, the others donate their
    /// to-many relationships to it and are deleted.
    pub fn upsert(&mut self, identity: &Identity, values: &[Assignment]) -> Result<Record, Error> {
        let kind = identity.kind();
        let mut assignments: Vec<Assignment> = identity.keys().iter().map(|(c, v)| (*c, text(v.as_str()))).collect();
        assignments.extend(values.iter().cloned());

        if identity.is_empty() {
            return self.insert(kind, &assignments);
        }

        let mut matches = self.find(identity)?.into_iter();
        let Some(mut survivor) = matches.next() else {
            return self.insert(kind, &assignments);
        };
        let donors: Vec<EntityRef> = matches.map(|r| r.entity()).collect();
        if !donors.is_empty() {
            tracing::debug!(
                identity = %identity,
                survivor = %survivor.entity(),
                donors = donors.len(),
                "merging duplicate records"
            );
            self.merge_into(survivor.entity(), &donors)?;
        }
        self.update(&mut survivor, &assignments)?;
        Ok(survivor)
    }

    /// Union the to-many relationships of `donors` into `survivor`, then
    /// delete the donors.
    ///
    /// A self-referencing relationship (forum to child forums) never makes
    /// the survivor its own member.
    pub fn merge_into(&mut self, survivor: EntityRef, donors: &[EntityRef]) -> Result<(), Error> {
        for donor in donors {
            debug_assert_eq!(donor.kind, survivor.kind);
            for relation in survivor.kind.to_many() {
                match *relation {
                    ToMany::ForeignKey { member, column } => {
                        let moved: Vec<i64> = {
                            let sql = format!("SELECT id FROM {} WHERE {column} = ?1", member.table());
                            let mut stmt = self.tx.prepare_cached(&sql)?;
                            let ids = stmt.query_map(params![donor.id], |row| row.get(0))?;
                            ids.collect::<Result<Vec<i64>, _>>()?
                        };
                        let sql = format!("UPDATE {} SET {column} = ?1 WHERE id = ?2", member.table());
                        for id in moved.into_iter().filter(|&id| EntityRef::new(member, id) != survivor) {
                            self.tx.prepare_cached(&sql)?.execute(params![survivor.id, id])?;
                            self.touch(EntityRef::new(member, id));
                        }
                    }
                    ToMany::JoinTable { table, owner_column, member_column } => {
                        let sql = format!(
                            "INSERT OR IGNORE INTO {table} ({owner_column}, {member_column})
                             SELECT ?1, {member_column} FROM {table} WHERE {owner_column} = ?2"
                        );
                        self.tx.prepare_cached(&sql)?.execute(params![survivor.id, donor.id])?;
                    }
                }
            }
            self.delete(*donor)?;
        }
        self.touch(survivor);
        Ok(())
    }

    /// Replace the members of a join-table relationship.
    pub fn set_join_members(
        &mut self, table: &'static str, owner_column: &'static str, member_column: &'static str, owner: EntityRef,
        members: &BTreeSet<i64>,
    ) -> Result<bool, Error> {
        let current: BTreeSet<i64> = {
            let sql = format!("SELECT {member_column} FROM {table} WHERE {owner_column} = ?1");
            let mut stmt = self.tx.prepare_cached(&sql)?;
            let ids = stmt.query_map(params![owner.id], |row| row.get(0))?;
            ids.collect::<Result<_, _>>()?
        };
        if &current == members {
            return Ok(false);
        }
        let remove = format!("DELETE FROM {table} WHERE {owner_column} = ?1 AND {member_column} = ?2");
        for gone in current.difference(members) {
            self.tx.prepare_cached(&remove)?.execute(params![owner.id, gone])?;
        }
        let add = format!("INSERT OR IGNORE INTO {table} ({owner_column}, {member_column}) VALUES (?1, ?2)");
        for new in members.difference(&current) {
            self.tx.prepare_cached(&add)?.execute(params![owner.id, new])?;
        }
        self.touch(owner);
        Ok(true)
    }

    /// Row ids of `kind` whose `last_modified` is before `cutoff`.
    pub fn expired(&self, kind: EntityKind, cutoff: DateTime<Utc>) -> Result<Vec<EntityRef>, Error> {
        debug_assert!(kind.is_stampable());
        let sql = format!("SELECT id FROM {} WHERE last_modified < ?1 ORDER BY id", kind.table());
        let mut stmt = self.tx.prepare_cached(&sql)?;
        let ids = stmt.query_map(params![encode_timestamp(cutoff)], |row| row.get(0))?;
        let ids: Vec<i64> = ids.collect::<Result<_, _>>()?;
        Ok(ids.into_iter().map(|id| EntityRef::new(kind, id)).collect())
    }

    pub fn delete(&mut self, entity: EntityRef) -> Result<(), Error> {
        let sql = format!("DELETE FROM {} WHERE id = ?1", entity.kind.table());
        self.tx.prepare_cached(&sql)?.execute(params![entity.id])?;
        self.touched.remove(&entity);
        Ok(())
    }

    /// Run the pre-commit hooks and commit.
    pub(crate) fn commit(self, hooks: &HookRegistry, operation: &'static str) -> Result<(), Error> {
        let Workspace { tx, touched, .. } = self;
        hooks.run(&tx, &touched).map_err(|source| Error::CommitFailed { operation, source })?;
        tx.commit().map_err(|source| Error::CommitFailed { operation, source })
    }
}
