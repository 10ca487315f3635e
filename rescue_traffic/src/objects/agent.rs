//! Mobile entities and their local movement planner.

use nalgebra::{Point2, Vector2};
use rescue_core::worldmodel::EntityId;
use std::collections::VecDeque;

/// Geometric shadow of a human entity.
///
/// Movement follows the two-pass sub-step contract: [`TrafficAgent::plan`]
/// only reads the pre-step world and stores a desired velocity;
/// [`TrafficAgent::step`] applies it. The engine runs each pass over all
/// active agents before starting the next, so movement is independent of
/// agent iteration order.
#[derive(Debug, Clone)]
pub struct TrafficAgent {
    id: EntityId,
    radius: f64,
    velocity_limit: f64,
    position: Point2<f64>,
    destination: VecDeque<Point2<f64>>,
    planned_velocity: Vector2<f64>,
    history: Vec<Point2<f64>>,
    travel_distance: f64,
}

impl TrafficAgent {
    pub fn new(id: EntityId, radius: f64, velocity_limit: f64, position: Point2<f64>) -> Self {
        Self {
            id,
            radius,
            velocity_limit,
            position,
            destination: VecDeque::new(),
            planned_velocity: Vector2::zeros(),
            history: Vec::new(),
            travel_distance: 0.0,
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn velocity_limit(&self) -> f64 {
        self.velocity_limit
    }

    pub fn position(&self) -> Point2<f64> {
        self.position
    }

    /// Teleports the agent (command handling, never movement).
    pub fn set_location(&mut self, x: f64, y: f64) {
        self.position = Point2::new(x, y);
        self.planned_velocity = Vector2::zeros();
    }

    /// Replaces the waypoint queue.
    pub fn set_destination(&mut self, waypoints: Vec<Point2<f64>>) {
        self.destination = waypoints.into();
    }

    pub fn clear_destination(&mut self) {
        self.destination.clear();
        self.planned_velocity = Vector2::zeros();
    }

    pub fn destination(&self) -> &VecDeque<Point2<f64>> {
        &self.destination
    }

    /// Points traversed since the tick started.
    pub fn position_history(&self) -> &[Point2<f64>] {
        &self.history
    }

    /// Resets per-tick movement bookkeeping, seeding the history with the
    /// current position.
    pub fn begin_tick(&mut self) {
        self.history.clear();
        self.history.push(self.position);
        self.travel_distance = 0.0;
    }

    /// Distance covered since the tick started.
    pub fn travel_distance(&self) -> f64 {
        self.travel_distance
    }

    /// First pass: compute the sub-step velocity from the waypoint queue
    /// and nearby obstructions. Reads only pre-step positions.
    pub fn plan(
        &mut self,
        others: &[(EntityId, Point2<f64>, f64)],
        obstacles: &[(Point2<f64>, f64)],
    ) {
        self.planned_velocity = Vector2::zeros();
        let Some(target) = self.destination.front().copied() else {
            return;
        };
        let to_target = target - self.position;
        let distance = to_target.norm();
        if distance <= f64::EPSILON {
            // Standing on the waypoint; step() consumes it.
            return;
        }
        let heading = to_target / distance;
        let mut velocity = heading * self.velocity_limit;

        for (other_id, other_position, other_radius) in others {
            if *other_id == self.id {
                continue;
            }
            velocity += self.avoidance(heading, *other_position, self.radius + other_radius);
        }
        for (center, radius) in obstacles {
            velocity += self.avoidance(heading, *center, self.radius + radius);
        }

        let speed = velocity.norm();
        if speed > self.velocity_limit {
            velocity *= self.velocity_limit / speed;
        }
        self.planned_velocity = velocity;
    }

    /// Sidestep contribution of one obstruction: steer perpendicular to the
    /// heading, away from the obstruction, scaled by overlap depth. Pure
    /// backward repulsion would stall an agent against anything sitting on
    /// its path; steering laterally walks around it.
    fn avoidance(&self, heading: Vector2<f64>, from: Point2<f64>, min_gap: f64) -> Vector2<f64> {
        let away = self.position - from;
        let gap = away.norm();
        if gap <= f64::EPSILON || gap >= min_gap {
            return Vector2::zeros();
        }
        if away.dot(&heading) > 0.0 {
            // Already past it.
            return Vector2::zeros();
        }
        let weight = self.velocity_limit * (1.0 - gap / min_gap);
        let lateral = away - heading * away.dot(&heading);
        let lateral_norm = lateral.norm();
        if lateral_norm > 1e-6 {
            lateral * (weight / lateral_norm)
        } else {
            // Dead ahead: dodge to a fixed side.
            Vector2::new(-heading.y, heading.x) * weight
        }
    }

    /// Second pass: apply the planned velocity for one sub-step, consuming
    /// the head waypoint when it is reached.
    pub fn step(&mut self, dt_ms: f64) {
        const ARRIVAL_TOLERANCE: f64 = 1.0;

        let Some(target) = self.destination.front().copied() else {
            return;
        };
        let movement = self.planned_velocity * dt_ms;
        let step_length = movement.norm();
        let to_target = (target - self.position).norm();
        if to_target <= step_length || to_target <= ARRIVAL_TOLERANCE {
            // Arrived: snap to the waypoint instead of overshooting.
            self.position = target;
            self.travel_distance += to_target;
            self.destination.pop_front();
            self.history.push(self.position);
            return;
        }
        if step_length <= f64::EPSILON {
            return;
        }
        self.position += movement;
        self.travel_distance += step_length;
    }
}
