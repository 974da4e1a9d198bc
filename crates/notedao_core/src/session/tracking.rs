//! Identity map and pending write queue of one session.
//!
//! # Invariants
//! - A key has at most one pending write of each kind.
//! - An insert keeps the values it was staged with; later state for the same
//!   key goes to an update queued behind it.
//! - Inserts and deletes never coexist for one key.
//! - A key marked `removed` always has a pending delete.
//! - An insert that is removed before flush leaves no trace.
//! - Writes drain as inserts, then updates, then deletes. Each phase keeps
//!   staging order.

use crate::model::entity::{EntityId, EntitySchema, Record};
use rusqlite::types::Value;
use std::collections::HashMap;

/// Identity of one tracked row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityKey {
    pub table: &'static str,
    pub id: EntityId,
}

impl EntityKey {
    pub fn new(schema: &EntitySchema, id: EntityId) -> Self {
        Self {
            table: schema.table,
            id,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum PendingWrite {
    Insert {
        schema: &'static EntitySchema,
        id: EntityId,
        values: Vec<Value>,
    },
    Update {
        schema: &'static EntitySchema,
        id: EntityId,
        values: Vec<Value>,
    },
    Delete {
        schema: &'static EntitySchema,
        id: EntityId,
    },
}

impl PendingWrite {
    fn key(&self) -> EntityKey {
        match self {
            Self::Insert { schema, id, .. }
            | Self::Update { schema, id, .. }
            | Self::Delete { schema, id } => EntityKey::new(schema, *id),
        }
    }

    fn phase(&self) -> u8 {
        match self {
            Self::Insert { .. } => 0,
            Self::Update { .. } => 1,
            Self::Delete { .. } => 2,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Tracked {
    pub snapshot: Record,
    pub removed: bool,
}

#[derive(Debug, Default)]
pub(crate) struct UnitState {
    tracked: HashMap<EntityKey, Tracked>,
    pending: Vec<PendingWrite>,
    next_ids: HashMap<&'static str, EntityId>,
}

impl UnitState {
    pub fn tracked(&self, key: EntityKey) -> Option<&Tracked> {
        self.tracked.get(&key)
    }

    /// Tracked and not scheduled for removal.
    pub fn is_managed(&self, key: EntityKey) -> bool {
        self.tracked
            .get(&key)
            .is_some_and(|tracked| !tracked.removed)
    }

    pub fn track(&mut self, key: EntityKey, snapshot: Record) {
        self.tracked.insert(
            key,
            Tracked {
                snapshot,
                removed: false,
            },
        );
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Stages a new row. Re-adding a row whose delete is still pending
    /// turns that delete into an update.
    pub fn stage_insert(&mut self, schema: &'static EntitySchema, id: EntityId, values: Vec<Value>) {
        let key = EntityKey::new(schema, id);
        if self.has_pending_delete(key) {
            self.stage_update(schema, id, values);
            return;
        }
        self.track(key, Record::from_entity(schema, id, values.clone()));
        self.pending.push(PendingWrite::Insert { schema, id, values });
    }

    /// Stages new state for a row that exists, or is about to.
    pub fn stage_update(&mut self, schema: &'static EntitySchema, id: EntityId, values: Vec<Value>) {
        let key = EntityKey::new(schema, id);
        self.track(key, Record::from_entity(schema, id, values.clone()));
        self.pending
            .retain(|write| !(write.key() == key && matches!(write, PendingWrite::Delete { .. })));

        let mut unchanged_insert = false;
        for write in self.pending.iter_mut().filter(|write| write.key() == key) {
            match write {
                PendingWrite::Update { values: staged, .. } => {
                    *staged = values;
                    return;
                }
                PendingWrite::Insert { values: staged, .. } => {
                    unchanged_insert = *staged == values;
                }
                PendingWrite::Delete { .. } => {}
            }
        }
        if !unchanged_insert {
            self.pending.push(PendingWrite::Update { schema, id, values });
        }
    }

    pub fn stage_delete(&mut self, schema: &'static EntitySchema, id: EntityId) {
        let key = EntityKey::new(schema, id);
        let staged_insert = self
            .pending
            .iter()
            .any(|write| write.key() == key && matches!(write, PendingWrite::Insert { .. }));
        self.pending.retain(|write| write.key() != key);
        if staged_insert {
            self.tracked.remove(&key);
            return;
        }

        self.pending.push(PendingWrite::Delete { schema, id });
        if let Some(tracked) = self.tracked.get_mut(&key) {
            tracked.removed = true;
        } else {
            self.tracked.insert(
                key,
                Tracked {
                    snapshot: Record::new(Vec::new(), Vec::new()),
                    removed: true,
                },
            );
        }
    }

    /// Drops every pending write for `key`.
    pub fn discard_pending(&mut self, key: EntityKey) {
        self.pending.retain(|write| write.key() != key);
    }

    /// Drains the queue in flush order.
    pub fn take_pending(&mut self) -> Vec<PendingWrite> {
        let mut writes = std::mem::take(&mut self.pending);
        writes.sort_by_key(PendingWrite::phase);
        writes
    }

    /// Called after a successful flush: removed rows are gone for good.
    pub fn forget_removed(&mut self) {
        self.tracked.retain(|_, tracked| !tracked.removed);
    }

    /// Hands out the next identity for `table`, if the allocator is seeded.
    pub fn next_id(&mut self, table: &'static str) -> Option<EntityId> {
        let next = self.next_ids.get_mut(table)?;
        let id = *next;
        *next += 1;
        Some(id)
    }

    /// Seeds the allocator above `max_persisted` and any staged insert.
    pub fn seed_ids(&mut self, table: &'static str, max_persisted: EntityId) -> EntityId {
        let staged_max = self
            .pending
            .iter()
            .filter_map(|write| match write {
                PendingWrite::Insert { schema, id, .. } if schema.table == table => Some(*id),
                _ => None,
            })
            .max()
            .unwrap_or(0);
        let id = max_persisted.max(staged_max) + 1;
        self.next_ids.insert(table, id + 1);
        id
    }

    /// Keeps the allocator clear of a caller-assigned identity.
    pub fn reserve_id(&mut self, table: &'static str, id: EntityId) {
        if let Some(next) = self.next_ids.get_mut(table) {
            *next = (*next).max(id + 1);
        }
    }

    pub fn clear(&mut self) {
        self.tracked.clear();
        self.pending.clear();
        self.next_ids.clear();
    }

    fn has_pending_delete(&self, key: EntityKey) -> bool {
        self.pending
            .iter()
            .any(|write| write.key() == key && matches!(write, PendingWrite::Delete { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::{EntityKey, PendingWrite, UnitState};
    use crate::model::note::NOTE_SCHEMA;
    use rusqlite::types::Value;

    fn values(content: &str) -> Vec<Value> {
        vec![
            Value::Null,
            Value::Text(content.to_string()),
            Value::Null,
            Value::Null,
        ]
    }

    fn content(write: &PendingWrite) -> Option<&Value> {
        match write {
            PendingWrite::Insert { values, .. } | PendingWrite::Update { values, .. } => {
                values.get(1)
            }
            PendingWrite::Delete { .. } => None,
        }
    }

    #[test]
    fn update_of_staged_insert_queues_behind_it() {
        let mut unit = UnitState::default();
        unit.stage_insert(&NOTE_SCHEMA, 1, values("draft"));
        unit.stage_update(&NOTE_SCHEMA, 1, values("edited"));
        unit.stage_update(&NOTE_SCHEMA, 1, values("final"));

        let pending = unit.take_pending();
        assert!(matches!(
            pending.as_slice(),
            [PendingWrite::Insert { id: 1, .. }, PendingWrite::Update { id: 1, .. }]
        ));
        assert_eq!(content(&pending[0]), Some(&Value::Text("draft".to_string())));
        assert_eq!(content(&pending[1]), Some(&Value::Text("final".to_string())));
    }

    #[test]
    fn unchanged_resave_of_staged_insert_adds_nothing() {
        let mut unit = UnitState::default();
        unit.stage_insert(&NOTE_SCHEMA, 1, values("draft"));
        unit.stage_update(&NOTE_SCHEMA, 1, values("draft"));

        assert_eq!(unit.pending_len(), 1);
    }

    #[test]
    fn queue_drains_inserts_then_updates_then_deletes() {
        let mut unit = UnitState::default();
        unit.stage_update(&NOTE_SCHEMA, 3, values("detached"));
        unit.stage_delete(&NOTE_SCHEMA, 2);
        unit.stage_insert(&NOTE_SCHEMA, 5, values("new"));
        unit.stage_update(&NOTE_SCHEMA, 3, values("edited"));
        unit.stage_delete(&NOTE_SCHEMA, 1);

        let pending = unit.take_pending();
        assert!(matches!(
            pending.as_slice(),
            [
                PendingWrite::Insert { id: 5, .. },
                PendingWrite::Update { id: 3, .. },
                PendingWrite::Delete { id: 2, .. },
                PendingWrite::Delete { id: 1, .. },
            ]
        ));
        assert_eq!(content(&pending[1]), Some(&Value::Text("edited".to_string())));
    }

    #[test]
    fn reinsert_of_removed_row_becomes_update() {
        let mut unit = UnitState::default();
        unit.stage_delete(&NOTE_SCHEMA, 6);
        unit.stage_insert(&NOTE_SCHEMA, 6, values("back"));

        let key = EntityKey::new(&NOTE_SCHEMA, 6);
        assert!(unit.is_managed(key));
        let pending = unit.take_pending();
        assert!(matches!(pending.as_slice(), [PendingWrite::Update { id: 6, .. }]));
    }

    #[test]
    fn delete_of_staged_insert_cancels_it_and_its_update() {
        let mut unit = UnitState::default();
        unit.stage_insert(&NOTE_SCHEMA, 1, values("draft"));
        unit.stage_update(&NOTE_SCHEMA, 1, values("edited"));
        unit.stage_delete(&NOTE_SCHEMA, 1);

        assert_eq!(unit.pending_len(), 0);
        assert!(unit.tracked(EntityKey::new(&NOTE_SCHEMA, 1)).is_none());
    }

    #[test]
    fn delete_supersedes_update_and_marks_removed() {
        let mut unit = UnitState::default();
        unit.stage_update(&NOTE_SCHEMA, 4, values("edit"));
        unit.stage_delete(&NOTE_SCHEMA, 4);

        let key = EntityKey::new(&NOTE_SCHEMA, 4);
        assert!(!unit.is_managed(key));
        assert!(unit.tracked(key).unwrap().removed);
        let pending = unit.take_pending();
        assert!(matches!(pending.as_slice(), [PendingWrite::Delete { id: 4, .. }]));
    }

    #[test]
    fn seeding_skips_staged_explicit_ids() {
        let mut unit = UnitState::default();
        unit.stage_insert(&NOTE_SCHEMA, 10, values("imported"));
        assert_eq!(unit.seed_ids("note", 3), 11);
        assert_eq!(unit.next_id("note"), Some(12));
        unit.reserve_id("note", 20);
        assert_eq!(unit.next_id("note"), Some(21));
    }
}
