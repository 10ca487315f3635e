//! The in-memory entity store for one process.

use super::{ChangeSet, Entity, EntityId, EntityKind};
use std::collections::HashMap;
use tracing::warn;

/// The full entity collection held by one process.
///
/// After a successful handshake this is a copy of the kernel's canonical
/// model; from then on it diverges only by merging the change-sets it
/// receives, so all processes converge if deltas are delivered in tick order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorldModel {
    entities: HashMap<EntityId, Entity>,
}

impl WorldModel {
    /// Creates an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the entire entity collection (GIS bootstrap).
    pub fn replace_all(&mut self, entities: Vec<Entity>) {
        self.entities.clear();
        for entity in entities {
            self.entities.insert(entity.id(), entity);
        }
    }

    /// Adds or replaces a single entity.
    pub fn add_entity(&mut self, entity: Entity) {
        self.entities.insert(entity.id(), entity);
    }

    /// Merges a change-set into the store.
    ///
    /// Entities the store has never seen are created with the kind recorded
    /// in the change-set; a kind clash keeps the stored entity and logs.
    pub fn merge(&mut self, changes: &ChangeSet) {
        for id in changes.entities() {
            let kind = match changes.kind_of(id) {
                Some(kind) => kind,
                None => continue,
            };
            let entity = self
                .entities
                .entry(id)
                .or_insert_with(|| Entity::new(id, kind));
            if entity.kind() != kind {
                warn!(
                    "Ignoring changes for {}: stored kind {:?} does not match {:?}",
                    id,
                    entity.kind(),
                    kind
                );
                continue;
            }
            for (key, value) in changes.changes_for(id) {
                match value {
                    Some(value) => entity.set_property(key, value.clone()),
                    None => entity.undefine(key),
                }
            }
        }
    }

    /// Looks an entity up by id.
    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Mutable lookup by id.
    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    /// All entities, in no particular order.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// All entities of one kind.
    pub fn entities_of_kind(&self, kind: EntityKind) -> impl Iterator<Item = &Entity> {
        self.entities.values().filter(move |e| e.kind() == kind)
    }

    /// Entity ids in ascending order, for deterministic iteration.
    pub fn sorted_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.entities.keys().copied().collect();
        ids.sort();
        ids
    }

    /// A snapshot of every entity, for handshake replies.
    pub fn snapshot(&self) -> Vec<Entity> {
        self.entities.values().cloned().collect()
    }

    /// Number of entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// True if the model holds no entities.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
