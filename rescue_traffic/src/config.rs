//! Engine tuning constants.

/// Tuning knobs for the traffic engine.
///
/// Distances are in map millimetres, velocities in millimetres per
/// millisecond, matching the world-model coordinate space.
#[derive(Debug, Clone)]
pub struct TrafficConfig {
    /// Duration of one sub-step of continuous motion.
    pub step_time_ms: f64,

    /// Wall-clock span one simulation tick represents, in seconds.
    pub tick_seconds: f64,

    /// Body radius of rescue-service agents.
    pub rescue_agent_radius: f64,

    /// Body radius of civilians.
    pub civilian_radius: f64,

    /// Velocity-limit distribution for rescue-service agents.
    pub rescue_agent_velocity_mean: f64,
    pub rescue_agent_velocity_sd: f64,

    /// Velocity-limit distribution for civilians.
    pub civilian_velocity_mean: f64,
    pub civilian_velocity_sd: f64,

    /// Seed for the velocity generator; a fixed seed makes runs
    /// reproducible.
    pub seed: u64,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            step_time_ms: 100.0,
            tick_seconds: 60.0,
            rescue_agent_radius: 500.0,
            civilian_radius: 200.0,
            rescue_agent_velocity_mean: 0.7,
            rescue_agent_velocity_sd: 0.1,
            civilian_velocity_mean: 0.2,
            civilian_velocity_sd: 0.002,
            seed: 42,
        }
    }
}

impl TrafficConfig {
    /// Number of sub-steps covering one tick.
    pub fn substeps(&self) -> u32 {
        ((1000.0 / self.step_time_ms) * self.tick_seconds) as u32
    }
}
