//! Geometric shadow objects mirroring world-model entities.

mod agent;
mod area;
mod blockade;

pub use agent::TrafficAgent;
pub use area::TrafficArea;
pub use blockade::TrafficBlockade;

use nalgebra::Point2;
use rescue_core::worldmodel::Entity;

/// Reads an entity's (x, y) as a point, if both are defined.
pub(crate) fn entity_point(entity: &Entity) -> Option<Point2<f64>> {
    Some(Point2::new(entity.x()? as f64, entity.y()? as f64))
}

/// Unflattens an apex list into polygon vertices.
pub(crate) fn apex_points(apexes: &[i32]) -> Vec<Point2<f64>> {
    apexes
        .chunks_exact(2)
        .map(|pair| Point2::new(pair[0] as f64, pair[1] as f64))
        .collect()
}
