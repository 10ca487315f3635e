//! Incremental world-model deltas.

use super::{EntityId, EntityKind, PropertyKey, PropertyValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A delta to apply to a world model.
///
/// Order-irrelevant mapping from (entity, attribute) to a new value, where
/// `None` marks the attribute as undefined again. Each touched entity's kind
/// is recorded so a receiver can create entities it has never seen.
///
/// Applying a change-set is idempotent, and per attribute the last write
/// wins; change-sets touching disjoint attributes commute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(into = "Vec<ChangeEntry>", from = "Vec<ChangeEntry>")]
pub struct ChangeSet {
    changes: HashMap<EntityId, EntityChanges>,
}

#[derive(Debug, Clone, PartialEq)]
struct EntityChanges {
    kind: EntityKind,
    values: HashMap<PropertyKey, Option<PropertyValue>>,
}

/// Wire shape: one (entity, attribute, value) assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub entity: EntityId,
    pub kind: EntityKind,
    pub key: PropertyKey,
    pub value: Option<PropertyValue>,
}

impl ChangeSet {
    /// Creates an empty change-set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new value for an attribute.
    pub fn add_change(
        &mut self,
        entity: EntityId,
        kind: EntityKind,
        key: PropertyKey,
        value: PropertyValue,
    ) {
        self.entry(entity, kind).values.insert(key, Some(value));
    }

    /// Records that an attribute has become undefined.
    pub fn add_undefine(&mut self, entity: EntityId, kind: EntityKind, key: PropertyKey) {
        self.entry(entity, kind).values.insert(key, None);
    }

    fn entry(&mut self, entity: EntityId, kind: EntityKind) -> &mut EntityChanges {
        self.changes.entry(entity).or_insert_with(|| EntityChanges {
            kind,
            values: HashMap::new(),
        })
    }

    /// Folds another change-set into this one, last write winning.
    pub fn merge(&mut self, other: &ChangeSet) {
        for (entity, changes) in &other.changes {
            let entry = self.entry(*entity, changes.kind);
            for (key, value) in &changes.values {
                entry.values.insert(*key, value.clone());
            }
        }
    }

    /// Entities touched by this change-set.
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.changes.keys().copied()
    }

    /// The recorded kind of a touched entity.
    pub fn kind_of(&self, entity: EntityId) -> Option<EntityKind> {
        self.changes.get(&entity).map(|c| c.kind)
    }

    /// The changed attributes of one entity.
    pub fn changes_for(
        &self,
        entity: EntityId,
    ) -> impl Iterator<Item = (PropertyKey, Option<&PropertyValue>)> + '_ {
        self.changes
            .get(&entity)
            .into_iter()
            .flat_map(|c| c.values.iter().map(|(k, v)| (*k, v.as_ref())))
    }

    /// Total number of attribute assignments.
    pub fn len(&self) -> usize {
        self.changes.values().map(|c| c.values.len()).sum()
    }

    /// True if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

impl From<ChangeSet> for Vec<ChangeEntry> {
    fn from(set: ChangeSet) -> Self {
        let mut entries: Vec<ChangeEntry> = set
            .changes
            .into_iter()
            .flat_map(|(entity, changes)| {
                let kind = changes.kind;
                changes.values.into_iter().map(move |(key, value)| ChangeEntry {
                    entity,
                    kind,
                    key,
                    value,
                })
            })
            .collect();
        // Stable wire order keeps frames reproducible across runs.
        entries.sort_by_key(|e| (e.entity, e.key as u8));
        entries
    }
}

impl From<Vec<ChangeEntry>> for ChangeSet {
    fn from(entries: Vec<ChangeEntry>) -> Self {
        let mut set = ChangeSet::new();
        for entry in entries {
            set.entry(entry.entity, entry.kind)
                .values
                .insert(entry.key, entry.value);
        }
        set
    }
}
