//! Obstructions inside areas.

use super::{apex_points, entity_point};
use nalgebra::Point2;
use rescue_core::worldmodel::{Entity, EntityId};

/// Geometric shadow of a blockade entity, approximated for avoidance as a
/// disc around its center.
#[derive(Debug, Clone)]
pub struct TrafficBlockade {
    id: EntityId,
    center: Point2<f64>,
    radius: f64,
}

impl TrafficBlockade {
    /// Mirrors a blockade entity; `None` if its geometry is undefined.
    pub fn from_entity(entity: &Entity) -> Option<Self> {
        let center = entity_point(entity)?;
        let apexes = apex_points(entity.apexes()?);
        let radius = apexes
            .iter()
            .map(|apex| (apex - center).norm())
            .fold(0.0, f64::max);
        Some(Self {
            id: entity.id(),
            center,
            radius,
        })
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn center(&self) -> Point2<f64> {
        self.center
    }

    /// Largest center-to-apex distance.
    pub fn radius(&self) -> f64 {
        self.radius
    }
}
