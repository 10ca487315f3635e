//! The shared world model: entities, sparse properties, and change-sets.
//!
//! Entities are owned exclusively by the [`WorldModel`] of the process that
//! holds them; remote peers only ever observe them through [`ChangeSet`]s.
//! Every attribute is individually undefined until a value is computed for
//! it, which is distinct from holding a zero value.

mod changeset;
mod model;

pub use changeset::{ChangeEntry, ChangeSet};
pub use model::WorldModel;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unique identity of a world-model entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u32);

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The closed set of entity kinds this core synchronizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Road,
    Building,
    Refuge,
    Blockade,
    Civilian,
    FireBrigade,
    PoliceForce,
    AmbulanceTeam,
}

impl EntityKind {
    /// True for walkable regions (roads, buildings, refuges).
    pub fn is_area(self) -> bool {
        matches!(self, Self::Road | Self::Building | Self::Refuge)
    }

    /// True for mobile humans.
    pub fn is_human(self) -> bool {
        matches!(
            self,
            Self::Civilian | Self::FireBrigade | Self::PoliceForce | Self::AmbulanceTeam
        )
    }

    /// True for the rescue services (everything human except civilians).
    pub fn is_rescue_agent(self) -> bool {
        matches!(self, Self::FireBrigade | Self::PoliceForce | Self::AmbulanceTeam)
    }
}

/// The closed set of synchronized attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKey {
    X,
    Y,
    Position,
    PositionHistory,
    TravelDistance,
    Hp,
    Buriedness,
    Apexes,
    Neighbours,
}

/// A property value, tagged by shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    Int(i32),
    IntList(Vec<i32>),
    EntityRef(EntityId),
    EntityRefList(Vec<EntityId>),
}

impl PropertyValue {
    /// Returns the integer payload, if this is an `Int`.
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the integer-list payload, if this is an `IntList`.
    pub fn as_int_list(&self) -> Option<&[i32]> {
        match self {
            Self::IntList(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the entity reference, if this is an `EntityRef`.
    pub fn as_entity_ref(&self) -> Option<EntityId> {
        match self {
            Self::EntityRef(id) => Some(*id),
            _ => None,
        }
    }

    /// Returns the entity-reference list, if this is an `EntityRefList`.
    pub fn as_entity_ref_list(&self) -> Option<&[EntityId]> {
        match self {
            Self::EntityRefList(v) => Some(v),
            _ => None,
        }
    }
}

/// One uniquely identified object in the simulated world.
///
/// Attributes live in a sparse map; an absent key means "no meaningful value
/// has been computed yet".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    id: EntityId,
    kind: EntityKind,
    properties: HashMap<PropertyKey, PropertyValue>,
}

impl Entity {
    /// Creates an entity with no defined attributes.
    pub fn new(id: EntityId, kind: EntityKind) -> Self {
        Self {
            id,
            kind,
            properties: HashMap::new(),
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Returns a raw property value.
    pub fn property(&self, key: PropertyKey) -> Option<&PropertyValue> {
        self.properties.get(&key)
    }

    /// Sets a property value.
    pub fn set_property(&mut self, key: PropertyKey, value: PropertyValue) {
        self.properties.insert(key, value);
    }

    /// Marks a property as undefined again.
    pub fn undefine(&mut self, key: PropertyKey) {
        self.properties.remove(&key);
    }

    /// True if the property currently holds a value.
    pub fn is_defined(&self, key: PropertyKey) -> bool {
        self.properties.contains_key(&key)
    }

    // Typed accessors for the attributes this core works with.

    pub fn x(&self) -> Option<i32> {
        self.property(PropertyKey::X)?.as_int()
    }

    pub fn y(&self) -> Option<i32> {
        self.property(PropertyKey::Y)?.as_int()
    }

    pub fn set_x(&mut self, x: i32) {
        self.set_property(PropertyKey::X, PropertyValue::Int(x));
    }

    pub fn set_y(&mut self, y: i32) {
        self.set_property(PropertyKey::Y, PropertyValue::Int(y));
    }

    /// The entity (area or carrier) this entity is located in.
    pub fn position(&self) -> Option<EntityId> {
        self.property(PropertyKey::Position)?.as_entity_ref()
    }

    pub fn set_position(&mut self, position: EntityId) {
        self.set_property(PropertyKey::Position, PropertyValue::EntityRef(position));
    }

    pub fn hp(&self) -> Option<i32> {
        self.property(PropertyKey::Hp)?.as_int()
    }

    pub fn set_hp(&mut self, hp: i32) {
        self.set_property(PropertyKey::Hp, PropertyValue::Int(hp));
    }

    pub fn buriedness(&self) -> Option<i32> {
        self.property(PropertyKey::Buriedness)?.as_int()
    }

    pub fn set_buriedness(&mut self, buriedness: i32) {
        self.set_property(PropertyKey::Buriedness, PropertyValue::Int(buriedness));
    }

    /// Flattened (x, y) pairs traversed during the last tick.
    pub fn position_history(&self) -> Option<&[i32]> {
        self.property(PropertyKey::PositionHistory)?.as_int_list()
    }

    pub fn set_position_history(&mut self, history: Vec<i32>) {
        self.set_property(PropertyKey::PositionHistory, PropertyValue::IntList(history));
    }

    pub fn travel_distance(&self) -> Option<i32> {
        self.property(PropertyKey::TravelDistance)?.as_int()
    }

    pub fn set_travel_distance(&mut self, distance: i32) {
        self.set_property(PropertyKey::TravelDistance, PropertyValue::Int(distance));
    }

    /// Flattened (x, y) polygon apexes of an area or blockade.
    pub fn apexes(&self) -> Option<&[i32]> {
        self.property(PropertyKey::Apexes)?.as_int_list()
    }

    pub fn set_apexes(&mut self, apexes: Vec<i32>) {
        self.set_property(PropertyKey::Apexes, PropertyValue::IntList(apexes));
    }

    /// Ids of the areas reachable from this area.
    pub fn neighbours(&self) -> Option<&[EntityId]> {
        self.property(PropertyKey::Neighbours)?.as_entity_ref_list()
    }

    pub fn set_neighbours(&mut self, neighbours: Vec<EntityId>) {
        self.set_property(PropertyKey::Neighbours, PropertyValue::EntityRefList(neighbours));
    }
}
