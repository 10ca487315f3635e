//! Walkable regions.

use super::{apex_points, entity_point};
use nalgebra::Point2;
use rescue_core::worldmodel::{Entity, EntityId};

/// Geometric shadow of a road, building or refuge entity.
#[derive(Debug, Clone)]
pub struct TrafficArea {
    id: EntityId,
    center: Point2<f64>,
    apexes: Vec<Point2<f64>>,
    neighbours: Vec<EntityId>,
    blockades: Vec<EntityId>,
}

impl TrafficArea {
    /// Mirrors an area entity; `None` if its geometry is undefined.
    pub fn from_entity(entity: &Entity) -> Option<Self> {
        let center = entity_point(entity)?;
        let apexes = apex_points(entity.apexes()?);
        Some(Self {
            id: entity.id(),
            center,
            apexes,
            neighbours: entity.neighbours().map(<[EntityId]>::to_vec).unwrap_or_default(),
            blockades: Vec::new(),
        })
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn center(&self) -> Point2<f64> {
        self.center
    }

    pub fn neighbours(&self) -> &[EntityId] {
        &self.neighbours
    }

    pub fn add_blockade(&mut self, blockade: EntityId) {
        self.blockades.push(blockade);
    }

    pub fn blockades(&self) -> &[EntityId] {
        &self.blockades
    }

    /// Even-odd point-in-polygon test against the apex ring.
    pub fn contains(&self, point: &Point2<f64>) -> bool {
        let n = self.apexes.len();
        if n < 3 {
            return false;
        }
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let a = &self.apexes[i];
            let b = &self.apexes[j];
            if (a.y > point.y) != (b.y > point.y) {
                let slope_x = (b.x - a.x) * (point.y - a.y) / (b.y - a.y) + a.x;
                if point.x < slope_x {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }
}
