//! Tracking of records currently held by live callers.
//!
//! A view that displays a cached record pins it for as long as it is on
//! screen. The pruner consults the registry and never deletes a pinned
//! record, however old its `last_modified` is.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::schema::EntityRef;

/// Reference counts of pinned records. Clones share the same registry.
#[derive(Debug, Clone, Default)]
pub struct LiveRegistry {
    pins: Arc<Mutex<HashMap<EntityRef, usize>>>,
}

impl LiveRegistry {
    /// Pin `entity` until the returned handle is dropped.
    pub(crate) fn register(&self, entity: EntityRef) -> LiveHandle {
        *self.lock().entry(entity).or_insert(0) += 1;
        LiveHandle { registry: self.clone(), entity }
    }

    /// Whether any handle for `entity` is alive.
    pub fn is_live(&self, entity: &EntityRef) -> bool {
        self.lock().contains_key(entity)
    }

    pub fn live_count(&self) -> usize {
        self.lock().len()
    }

    /// Freeze the registry. No record can be pinned or released until the guard drops.
    pub(crate) fn freeze(&self) -> LiveSet<'_> {
        LiveSet { pins: self.lock() }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EntityRef, usize>> {
        self.pins.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A frozen view of the registry.
pub(crate) struct LiveSet<'a> {
    pins: MutexGuard<'a, HashMap<EntityRef, usize>>,
}

impl LiveSet<'_> {
    pub(crate) fn contains(&self, entity: &EntityRef) -> bool {
        self.pins.contains_key(entity)
    }
}

/// Keeps a record alive while held.
#[derive(Debug)]
pub struct LiveHandle {
    registry: LiveRegistry,
    entity: EntityRef,
}

impl LiveHandle {
    pub fn entity(&self) -> EntityRef {
        self.entity
    }
}

impl Clone for LiveHandle {
    fn clone(&self) -> Self {
        self.registry.register(self.entity)
    }
}

impl Drop for LiveHandle {
    fn drop(&mut self) {
        let mut pins = self.registry.lock();
        if let Some(count) = pins.get_mut(&self.entity) {
            *count -= 1;
            if *count == 0 {
                pins.remove(&self.entity);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::schema::EntityKind;

    #[test]
    fn test_pin_and_release() {
        let registry = LiveRegistry::default();
        let user = EntityRef::new(EntityKind::User, 1);

        let first = registry.register(user);
        let second = first.clone();
        assert!(registry.is_live(&user));

        drop(first);
        assert!(registry.is_live(&user));

        drop(second);
        assert!(!registry.is_live(&user));
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn test_freeze_reports_pins() {
        let registry = LiveRegistry::default();
        let thread = EntityRef::new(EntityKind::Thread, 7);
        let _handle = registry.register(thread);

        let frozen = registry.freeze();
        assert!(frozen.contains(&thread));
        assert!(!frozen.contains(&EntityRef::new(EntityKind::Thread, 8)));
    }
}
