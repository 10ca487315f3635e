//! The traffic tick engine: command validation, fixed-step movement, delta
//! collection.

use crate::config::TrafficConfig;
use crate::objects::{TrafficAgent, TrafficArea, TrafficBlockade};
use nalgebra::Point2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use rescue_core::components::SimulatorLogic;
use rescue_core::config::Config;
use rescue_core::messages::AgentCommand;
use rescue_core::worldmodel::{
    ChangeSet, EntityId, EntityKind, PropertyKey, PropertyValue, WorldModel,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Velocity-limit source for one role. Falls back to the mean when the
/// configured deviation is unusable.
struct VelocityGenerator {
    distribution: Option<Normal<f64>>,
    mean: f64,
}

impl VelocityGenerator {
    fn new(mean: f64, sd: f64) -> Self {
        Self {
            distribution: Normal::new(mean, sd).ok(),
            mean,
        }
    }

    fn next(&self, rng: &mut ChaCha8Rng) -> f64 {
        match &self.distribution {
            Some(distribution) => distribution.sample(rng).max(0.0),
            None => self.mean,
        }
    }
}

/// The area-model traffic simulator.
///
/// Tick pipeline: clear destinations, validate and apply the command batch,
/// run the fixed-step sub-simulation, collect the movement delta. Agents
/// that are dead, carried, or the issuer of a load/unload sit the rest of
/// the tick out (the ignore set).
pub struct TrafficSimulator {
    config: TrafficConfig,
    rng: ChaCha8Rng,
    areas: BTreeMap<EntityId, TrafficArea>,
    blockades: BTreeMap<EntityId, TrafficBlockade>,
    agents: BTreeMap<EntityId, TrafficAgent>,
    ignore: BTreeSet<EntityId>,
}

impl TrafficSimulator {
    pub fn new(config: TrafficConfig) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Self {
            config,
            rng,
            areas: BTreeMap::new(),
            blockades: BTreeMap::new(),
            agents: BTreeMap::new(),
            ignore: BTreeSet::new(),
        }
    }

    /// Shadow agent lookup, for assertions in tests.
    pub fn agent(&self, id: EntityId) -> Option<&TrafficAgent> {
        self.agents.get(&id)
    }

    fn convert_model(&mut self, model: &WorldModel) {
        self.areas.clear();
        self.blockades.clear();
        self.agents.clear();

        for id in model.sorted_ids() {
            let Some(entity) = model.entity(id) else {
                continue;
            };
            if !entity.kind().is_area() {
                continue;
            }
            match TrafficArea::from_entity(entity) {
                Some(area) => {
                    self.areas.insert(id, area);
                }
                None => warn!("Skipping area {}: geometry undefined", id),
            }
        }

        let rescue = VelocityGenerator::new(
            self.config.rescue_agent_velocity_mean,
            self.config.rescue_agent_velocity_sd,
        );
        let civilian = VelocityGenerator::new(
            self.config.civilian_velocity_mean,
            self.config.civilian_velocity_sd,
        );
        for id in model.sorted_ids() {
            let Some(entity) = model.entity(id) else {
                continue;
            };
            if !entity.kind().is_human() {
                continue;
            }
            let (radius, velocity_limit) = if entity.kind() == EntityKind::Civilian {
                (self.config.civilian_radius, civilian.next(&mut self.rng))
            } else {
                (self.config.rescue_agent_radius, rescue.next(&mut self.rng))
            };
            let (Some(x), Some(y)) = (entity.x(), entity.y()) else {
                warn!("Skipping human {}: location undefined", id);
                continue;
            };
            self.agents.insert(
                id,
                TrafficAgent::new(
                    id,
                    radius,
                    velocity_limit,
                    Point2::new(x as f64, y as f64),
                ),
            );
        }

        for id in model.sorted_ids() {
            let Some(entity) = model.entity(id) else {
                continue;
            };
            if entity.kind() != EntityKind::Blockade {
                continue;
            }
            match TrafficBlockade::from_entity(entity) {
                Some(blockade) => {
                    if let Some(area) = entity.position().and_then(|p| self.areas.get_mut(&p)) {
                        area.add_blockade(id);
                    }
                    self.blockades.insert(id, blockade);
                }
                None => warn!("Skipping blockade {}: geometry undefined", id),
            }
        }
    }

    fn handle_move(
        &mut self,
        model: &WorldModel,
        agent_id: EntityId,
        path: &[EntityId],
        destination: Option<(i32, i32)>,
    ) {
        let Some(human) = model.entity(agent_id) else {
            warn!(
                "Rejecting move command from agent {}: agent does not exist",
                agent_id
            );
            return;
        };
        if !human.kind().is_human() {
            warn!(
                "Rejecting move command from agent {}: agent type is {:?}",
                agent_id,
                human.kind()
            );
            return;
        }
        if !self.agents.contains_key(&agent_id) {
            warn!(
                "Rejecting move command from agent {}: agent is not tracked",
                agent_id
            );
            return;
        }

        // Build the waypoint list, skipping a leading waypoint equal to the
        // agent's current location.
        let current = human.position();
        let mut waypoints = Vec::new();
        let mut first = true;
        for next in path {
            if first && Some(*next) == current {
                first = false;
                continue;
            }
            first = false;
            match model.entity(*next) {
                Some(entity) if entity.kind().is_area() => {
                    let (Some(x), Some(y)) = (entity.x(), entity.y()) else {
                        warn!("Rejecting move: area {} has no location", next);
                        return;
                    };
                    waypoints.push(Point2::new(x as f64, y as f64));
                }
                other => {
                    warn!(
                        "Rejecting move: entity {} is not an area: {:?}",
                        next,
                        other.map(|e| e.kind())
                    );
                    return;
                }
            }
        }
        if let Some((x, y)) = destination {
            waypoints.push(Point2::new(x as f64, y as f64));
        }

        debug!("Agent {} path set: {} waypoints", agent_id, waypoints.len());
        if let Some(agent) = self.agents.get_mut(&agent_id) {
            agent.set_destination(waypoints);
        }
    }

    fn handle_load(
        &mut self,
        model: &mut WorldModel,
        agent_id: EntityId,
        target_id: EntityId,
        changes: &mut ChangeSet,
    ) {
        let Some(agent) = model.entity(agent_id) else {
            warn!(
                "Rejecting load command from agent {}: agent does not exist",
                agent_id
            );
            return;
        };
        if agent.kind() != EntityKind::AmbulanceTeam {
            warn!(
                "Rejecting load command from agent {}: agent type is {:?}",
                agent_id,
                agent.kind()
            );
            return;
        }
        let Some(target) = model.entity(target_id) else {
            warn!(
                "Rejecting load command from agent {}: target does not exist {}",
                agent_id, target_id
            );
            return;
        };
        if target.kind() != EntityKind::Civilian {
            warn!(
                "Rejecting load command from agent {}: target {} is of type {:?}",
                agent_id,
                target_id,
                target.kind()
            );
            return;
        }
        if matches!(agent.hp(), Some(hp) if hp <= 0) {
            warn!("Rejecting load command from agent {}: agent is dead", agent_id);
            return;
        }
        if matches!(agent.buriedness(), Some(b) if b > 0) {
            warn!("Rejecting load command from agent {}: agent is buried", agent_id);
            return;
        }
        if matches!(target.buriedness(), Some(b) if b > 0) {
            warn!(
                "Rejecting load command from agent {}: target {} is buried",
                agent_id, target_id
            );
            return;
        }
        let colocated = matches!(
            (target.position(), agent.position()),
            (Some(target_position), Some(agent_position)) if target_position == agent_position
        );
        if !colocated {
            warn!(
                "Rejecting load command from agent {}: target is non-adjacent {}",
                agent_id, target_id
            );
            return;
        }
        if agent_id == target_id {
            warn!(
                "Rejecting load command from agent {}: tried to load self",
                agent_id
            );
            return;
        }
        // One stretcher per ambulance.
        for carried in model.entities_of_kind(EntityKind::Civilian) {
            if carried.position() == Some(agent_id) {
                warn!(
                    "Rejecting load command from agent {}: agent already has civilian {} loaded",
                    agent_id,
                    carried.id()
                );
                return;
            }
        }

        // All checks passed: the civilian's position becomes the ambulance
        // itself and its coordinates are no longer meaningful.
        let Some(target) = model.entity_mut(target_id) else {
            return;
        };
        target.set_position(agent_id);
        target.undefine(PropertyKey::X);
        target.undefine(PropertyKey::Y);
        changes.add_change(
            target_id,
            EntityKind::Civilian,
            PropertyKey::Position,
            PropertyValue::EntityRef(agent_id),
        );
        changes.add_undefine(target_id, EntityKind::Civilian, PropertyKey::X);
        changes.add_undefine(target_id, EntityKind::Civilian, PropertyKey::Y);
        if let Some(shadow) = self.agents.get_mut(&target_id) {
            shadow.clear_destination();
        }
        debug!("Agent {} loaded {}", agent_id, target_id);
    }

    fn handle_unload(
        &mut self,
        model: &mut WorldModel,
        agent_id: EntityId,
        changes: &mut ChangeSet,
    ) {
        let Some(agent) = model.entity(agent_id) else {
            warn!(
                "Rejecting unload command from agent {}: agent does not exist",
                agent_id
            );
            return;
        };
        if agent.kind() != EntityKind::AmbulanceTeam {
            warn!(
                "Rejecting unload command from agent {}: agent type is {:?}",
                agent_id,
                agent.kind()
            );
            return;
        }
        let (Some(agent_position), Some(agent_x), Some(agent_y)) =
            (agent.position(), agent.x(), agent.y())
        else {
            warn!(
                "Rejecting unload command from agent {}: could not locate agent",
                agent_id
            );
            return;
        };
        if matches!(agent.hp(), Some(hp) if hp <= 0) {
            warn!("Rejecting unload command from agent {}: agent is dead", agent_id);
            return;
        }
        if matches!(agent.buriedness(), Some(b) if b > 0) {
            warn!("Rejecting unload command from agent {}: agent is buried", agent_id);
            return;
        }

        // Whichever civilian is riding in this ambulance, lowest id first
        // for a deterministic pick.
        let mut carried = None;
        for id in model.sorted_ids() {
            let Some(entity) = model.entity(id) else {
                continue;
            };
            if entity.kind() == EntityKind::Civilian && entity.position() == Some(agent_id) {
                carried = Some(id);
                break;
            }
        }
        let Some(target_id) = carried else {
            warn!(
                "Rejecting unload command from agent {}: agent is not carrying any civilians",
                agent_id
            );
            return;
        };

        let Some(target) = model.entity_mut(target_id) else {
            return;
        };
        target.set_position(agent_position);
        target.set_x(agent_x);
        target.set_y(agent_y);
        changes.add_change(
            target_id,
            EntityKind::Civilian,
            PropertyKey::Position,
            PropertyValue::EntityRef(agent_position),
        );
        changes.add_change(
            target_id,
            EntityKind::Civilian,
            PropertyKey::X,
            PropertyValue::Int(agent_x),
        );
        changes.add_change(
            target_id,
            EntityKind::Civilian,
            PropertyKey::Y,
            PropertyValue::Int(agent_y),
        );
        if let Some(shadow) = self.agents.get_mut(&target_id) {
            shadow.set_location(agent_x as f64, agent_y as f64);
            shadow.clear_destination();
        }
        debug!("Agent {} unloaded {}", agent_id, target_id);
    }

    /// Runs the fixed-step sub-simulation over all agents that may move.
    fn run_substeps(&mut self, model: &WorldModel) {
        for agent in self.agents.values_mut() {
            agent.begin_tick();
        }
        let active: Vec<EntityId> = self
            .agents
            .keys()
            .filter(|id| {
                if self.ignore.contains(id) {
                    return false;
                }
                let Some(entity) = model.entity(**id) else {
                    return false;
                };
                matches!(entity.hp(), Some(hp) if hp > 0)
            })
            .copied()
            .collect();

        let substeps = self.config.substeps();
        debug!("Running {} sub-steps for {} agents", substeps, active.len());
        let obstacles: Vec<(Point2<f64>, f64)> = self
            .blockades
            .values()
            .map(|blockade| (blockade.center(), blockade.radius()))
            .collect();
        for _ in 0..substeps {
            // Plan pass: everyone decides against pre-step positions.
            let snapshot: Vec<(EntityId, Point2<f64>, f64)> = active
                .iter()
                .filter_map(|id| {
                    self.agents
                        .get(id)
                        .map(|agent| (*id, agent.position(), agent.radius()))
                })
                .collect();
            for id in &active {
                if let Some(agent) = self.agents.get_mut(id) {
                    agent.plan(&snapshot, &obstacles);
                }
            }
            // Step pass: everyone moves at once.
            for id in &active {
                if let Some(agent) = self.agents.get_mut(id) {
                    agent.step(self.config.step_time_ms);
                }
            }
        }
    }

    /// Maps a point back to the enclosing area, trying the previous area
    /// first, then its neighbours, then everywhere.
    fn locate_area(&self, previous: Option<EntityId>, point: &Point2<f64>) -> Option<EntityId> {
        if let Some(previous) = previous {
            if let Some(area) = self.areas.get(&previous) {
                if area.contains(point) {
                    return Some(previous);
                }
                for neighbour in area.neighbours() {
                    if let Some(next) = self.areas.get(neighbour) {
                        if next.contains(point) {
                            return Some(*neighbour);
                        }
                    }
                }
            }
        }
        self.areas
            .values()
            .find(|area| area.contains(point))
            .map(TrafficArea::id)
    }

    /// Emits the tick's movement delta and applies it to the local model.
    fn collect_changes(&mut self, model: &mut WorldModel, changes: &mut ChangeSet) {
        let ids: Vec<EntityId> = self.agents.keys().copied().collect();
        for id in ids {
            let Some(kind) = model.entity(id).map(|entity| entity.kind()) else {
                continue;
            };
            if self.ignore.contains(&id) {
                // Position was set by command handling, not by movement;
                // only the movement bookkeeping is cleared.
                if let Some(human) = model.entity_mut(id) {
                    human.undefine(PropertyKey::PositionHistory);
                    human.set_travel_distance(0);
                }
                changes.add_undefine(id, kind, PropertyKey::PositionHistory);
                changes.add_change(id, kind, PropertyKey::TravelDistance, PropertyValue::Int(0));
                continue;
            }

            let Some(agent) = self.agents.get(&id) else {
                continue;
            };
            let position = agent.position();
            let history: Vec<i32> = agent
                .position_history()
                .iter()
                .flat_map(|point| [point.x as i32, point.y as i32])
                .collect();
            let travel_distance = agent.travel_distance() as i32;
            let previous_area = model.entity(id).and_then(|human| human.position());
            let located = self.locate_area(previous_area, &position);

            let Some(human) = model.entity_mut(id) else {
                continue;
            };
            if let Some(area) = located {
                human.set_position(area);
                changes.add_change(id, kind, PropertyKey::Position, PropertyValue::EntityRef(area));
            }
            human.set_x(position.x as i32);
            human.set_y(position.y as i32);
            human.set_position_history(history.clone());
            human.set_travel_distance(travel_distance);
            changes.add_change(id, kind, PropertyKey::X, PropertyValue::Int(position.x as i32));
            changes.add_change(id, kind, PropertyKey::Y, PropertyValue::Int(position.y as i32));
            changes.add_change(
                id,
                kind,
                PropertyKey::PositionHistory,
                PropertyValue::IntList(history),
            );
            changes.add_change(
                id,
                kind,
                PropertyKey::TravelDistance,
                PropertyValue::Int(travel_distance),
            );
        }
    }
}

impl SimulatorLogic for TrafficSimulator {
    fn name(&self) -> &str {
        "traffic"
    }

    fn post_connect(&mut self, model: &WorldModel, _config: &Config) {
        self.convert_model(model);
        self.ignore.clear();
        info!(
            "Traffic simulator tracking {} areas, {} agents, {} blockades",
            self.areas.len(),
            self.agents.len(),
            self.blockades.len()
        );
    }

    fn process_commands(
        &mut self,
        model: &mut WorldModel,
        tick: u64,
        commands: &[AgentCommand],
        changes: &mut ChangeSet,
    ) {
        debug!("Tick {}: processing {} commands", tick, commands.len());
        // Destinations never carry over between ticks.
        for agent in self.agents.values_mut() {
            agent.clear_destination();
        }
        self.ignore.clear();

        for command in commands {
            match command {
                AgentCommand::Move {
                    agent,
                    path,
                    destination,
                } => {
                    // Movers keep moving; they are not ignored.
                    self.handle_move(model, *agent, path, *destination);
                }
                AgentCommand::Load { agent, target } => {
                    self.handle_load(model, *agent, *target, changes);
                    self.ignore.insert(*agent);
                }
                AgentCommand::Unload { agent } => {
                    self.handle_unload(model, *agent, changes);
                    self.ignore.insert(*agent);
                }
            }
        }

        // Dead humans, and humans riding in an ambulance, sit the tick out.
        for id in model.sorted_ids() {
            let Some(entity) = model.entity(id) else {
                continue;
            };
            if !entity.kind().is_human() {
                continue;
            }
            if matches!(entity.hp(), Some(hp) if hp <= 0) {
                self.ignore.insert(id);
            }
            if let Some(position) = entity.position() {
                if matches!(
                    model.entity(position),
                    Some(carrier) if carrier.kind() == EntityKind::AmbulanceTeam
                ) {
                    self.ignore.insert(id);
                }
            }
        }

        self.run_substeps(model);
        self.collect_changes(model, changes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rescue_core::worldmodel::Entity;

    const ROAD_A: EntityId = EntityId(1);
    const ROAD_B: EntityId = EntityId(2);
    const AMBULANCE: EntityId = EntityId(10);
    const FIRE_BRIGADE: EntityId = EntityId(11);
    const CIVILIAN: EntityId = EntityId(20);
    const CIVILIAN_2: EntityId = EntityId(21);

    fn road(id: EntityId, cx: i32, cy: i32, half: i32, neighbours: Vec<EntityId>) -> Entity {
        let mut entity = Entity::new(id, EntityKind::Road);
        entity.set_x(cx);
        entity.set_y(cy);
        entity.set_apexes(vec![
            cx - half,
            cy - half,
            cx + half,
            cy - half,
            cx + half,
            cy + half,
            cx - half,
            cy + half,
        ]);
        entity.set_neighbours(neighbours);
        entity
    }

    fn human(id: EntityId, kind: EntityKind, area: EntityId, x: i32, y: i32) -> Entity {
        let mut entity = Entity::new(id, kind);
        entity.set_position(area);
        entity.set_x(x);
        entity.set_y(y);
        entity.set_hp(100);
        entity
    }

    /// Two adjacent 20m road squares; an ambulance, a fire brigade and two
    /// civilians all standing on road A.
    fn test_world() -> WorldModel {
        let mut model = WorldModel::new();
        model.add_entity(road(ROAD_A, 0, 0, 10_000, vec![ROAD_B]));
        model.add_entity(road(ROAD_B, 20_000, 0, 10_000, vec![ROAD_A]));
        model.add_entity(human(AMBULANCE, EntityKind::AmbulanceTeam, ROAD_A, 0, 0));
        model.add_entity(human(FIRE_BRIGADE, EntityKind::FireBrigade, ROAD_A, -500, 500));
        model.add_entity(human(CIVILIAN, EntityKind::Civilian, ROAD_A, 2_000, 2_000));
        model.add_entity(human(CIVILIAN_2, EntityKind::Civilian, ROAD_A, 4_000, -2_000));
        model
    }

    /// Fixed velocity limits (zero deviation) keep the movement assertions
    /// independent of the draw.
    fn test_config() -> TrafficConfig {
        TrafficConfig {
            rescue_agent_velocity_sd: 0.0,
            civilian_velocity_sd: 0.0,
            ..TrafficConfig::default()
        }
    }

    fn connected_simulator(model: &WorldModel) -> TrafficSimulator {
        let mut simulator = TrafficSimulator::new(test_config());
        simulator.post_connect(model, &Config::new());
        simulator
    }

    fn run_tick(
        simulator: &mut TrafficSimulator,
        model: &mut WorldModel,
        commands: Vec<AgentCommand>,
    ) -> ChangeSet {
        let mut changes = ChangeSet::new();
        simulator.process_commands(model, 1, &commands, &mut changes);
        changes
    }

    #[test]
    fn test_load_moves_civilian_into_ambulance() {
        let mut model = test_world();
        let mut simulator = connected_simulator(&model);
        let changes = run_tick(
            &mut simulator,
            &mut model,
            vec![AgentCommand::Load {
                agent: AMBULANCE,
                target: CIVILIAN,
            }],
        );

        let carried = model.entity(CIVILIAN).unwrap();
        assert_eq!(carried.position(), Some(AMBULANCE));
        assert_eq!(carried.x(), None);
        assert_eq!(carried.y(), None);
        // The load is visible in the tick's change-set.
        assert!(changes
            .changes_for(CIVILIAN)
            .any(|(key, value)| key == PropertyKey::Position
                && value == Some(&PropertyValue::EntityRef(AMBULANCE))));
    }

    #[test]
    fn test_unload_places_civilian_at_ambulance() {
        let mut model = test_world();
        let mut simulator = connected_simulator(&model);
        run_tick(
            &mut simulator,
            &mut model,
            vec![AgentCommand::Load {
                agent: AMBULANCE,
                target: CIVILIAN,
            }],
        );
        // Give the ambulance a new spot before putting the casualty down.
        {
            let ambulance = model.entity_mut(AMBULANCE).unwrap();
            ambulance.set_position(ROAD_B);
            ambulance.set_x(20_000);
            ambulance.set_y(0);
        }
        run_tick(
            &mut simulator,
            &mut model,
            vec![AgentCommand::Unload { agent: AMBULANCE }],
        );

        let unloaded = model.entity(CIVILIAN).unwrap();
        assert_eq!(unloaded.position(), Some(ROAD_B));
        assert_eq!(unloaded.x(), Some(20_000));
        assert_eq!(unloaded.y(), Some(0));
    }

    #[test]
    fn test_load_rejections_leave_state_untouched() {
        let mut model = test_world();
        // Park the second civilian on the other road so a non-adjacent
        // load can be attempted.
        {
            let civilian = model.entity_mut(CIVILIAN_2).unwrap();
            civilian.set_position(ROAD_B);
            civilian.set_x(20_000);
            civilian.set_y(0);
        }
        let mut simulator = connected_simulator(&model);

        let rejected = [
            // Not an ambulance.
            AgentCommand::Load {
                agent: FIRE_BRIGADE,
                target: CIVILIAN,
            },
            // Target is not a civilian.
            AgentCommand::Load {
                agent: AMBULANCE,
                target: FIRE_BRIGADE,
            },
            // Target elsewhere.
            AgentCommand::Load {
                agent: AMBULANCE,
                target: CIVILIAN_2,
            },
            // No such target.
            AgentCommand::Load {
                agent: AMBULANCE,
                target: EntityId(999),
            },
        ];
        for command in rejected {
            run_tick(&mut simulator, &mut model, vec![command]);
            assert_eq!(
                model.entity(CIVILIAN).unwrap().position(),
                Some(ROAD_A),
                "civilian must stay on the road"
            );
            assert_eq!(model.entity(CIVILIAN_2).unwrap().position(), Some(ROAD_B));
        }
    }

    #[test]
    fn test_dead_ambulance_cannot_load() {
        let mut model = test_world();
        model.entity_mut(AMBULANCE).unwrap().set_hp(0);
        let mut simulator = connected_simulator(&model);
        run_tick(
            &mut simulator,
            &mut model,
            vec![AgentCommand::Load {
                agent: AMBULANCE,
                target: CIVILIAN,
            }],
        );
        assert_eq!(model.entity(CIVILIAN).unwrap().position(), Some(ROAD_A));
    }

    #[test]
    fn test_second_load_is_rejected() {
        let mut model = test_world();
        let mut simulator = connected_simulator(&model);
        run_tick(
            &mut simulator,
            &mut model,
            vec![AgentCommand::Load {
                agent: AMBULANCE,
                target: CIVILIAN,
            }],
        );
        run_tick(
            &mut simulator,
            &mut model,
            vec![AgentCommand::Load {
                agent: AMBULANCE,
                target: CIVILIAN_2,
            }],
        );
        // The stretcher is single-occupancy.
        assert_eq!(model.entity(CIVILIAN).unwrap().position(), Some(AMBULANCE));
        assert_eq!(model.entity(CIVILIAN_2).unwrap().position(), Some(ROAD_A));
    }

    #[test]
    fn test_buried_target_cannot_be_loaded() {
        let mut model = test_world();
        model.entity_mut(CIVILIAN).unwrap().set_buriedness(30);
        let mut simulator = connected_simulator(&model);
        run_tick(
            &mut simulator,
            &mut model,
            vec![AgentCommand::Load {
                agent: AMBULANCE,
                target: CIVILIAN,
            }],
        );
        assert_eq!(model.entity(CIVILIAN).unwrap().position(), Some(ROAD_A));
    }

    #[test]
    fn test_move_reaches_neighbouring_area() {
        let mut model = test_world();
        let mut simulator = connected_simulator(&model);
        let changes = run_tick(
            &mut simulator,
            &mut model,
            vec![AgentCommand::Move {
                agent: FIRE_BRIGADE,
                path: vec![ROAD_A, ROAD_B],
                destination: None,
            }],
        );

        // 20m at >= 0.4mm/ms over a 60s tick: comfortably there.
        let mover = model.entity(FIRE_BRIGADE).unwrap();
        assert_eq!(mover.position(), Some(ROAD_B));
        assert_relative_eq!(mover.x().unwrap() as f64, 20_000.0, epsilon = 1.0);
        assert!(mover.travel_distance().unwrap() > 19_000);
        assert!(changes
            .changes_for(FIRE_BRIGADE)
            .any(|(key, _)| key == PropertyKey::PositionHistory));
    }

    #[test]
    fn test_leading_current_area_waypoint_is_skipped() {
        let model = test_world();
        let mut with_skip = connected_simulator(&model);
        let mut without = connected_simulator(&model);

        let mut model_a = model.clone();
        let mut model_b = model;
        run_tick(
            &mut with_skip,
            &mut model_a,
            vec![AgentCommand::Move {
                agent: FIRE_BRIGADE,
                path: vec![ROAD_A, ROAD_B],
                destination: None,
            }],
        );
        run_tick(
            &mut without,
            &mut model_b,
            vec![AgentCommand::Move {
                agent: FIRE_BRIGADE,
                path: vec![ROAD_B],
                destination: None,
            }],
        );

        // The leading waypoint equal to the current area contributes
        // nothing: both paths produce identical motion.
        assert_eq!(
            model_a.entity(FIRE_BRIGADE).unwrap().travel_distance(),
            model_b.entity(FIRE_BRIGADE).unwrap().travel_distance()
        );
    }

    #[test]
    fn test_move_to_exact_destination_point() {
        let mut model = test_world();
        let mut simulator = connected_simulator(&model);
        run_tick(
            &mut simulator,
            &mut model,
            vec![AgentCommand::Move {
                agent: FIRE_BRIGADE,
                path: vec![ROAD_A],
                destination: Some((5_000, -5_000)),
            }],
        );

        let mover = model.entity(FIRE_BRIGADE).unwrap();
        assert_relative_eq!(mover.x().unwrap() as f64, 5_000.0, epsilon = 1.0);
        assert_relative_eq!(mover.y().unwrap() as f64, -5_000.0, epsilon = 1.0);
        assert_eq!(mover.position(), Some(ROAD_A));
    }

    #[test]
    fn test_move_through_non_area_is_rejected() {
        let mut model = test_world();
        let mut simulator = connected_simulator(&model);
        run_tick(
            &mut simulator,
            &mut model,
            vec![AgentCommand::Move {
                agent: FIRE_BRIGADE,
                path: vec![CIVILIAN_2],
                destination: None,
            }],
        );
        // Rejected outright: the agent stays put.
        assert_eq!(model.entity(FIRE_BRIGADE).unwrap().travel_distance(), Some(0));
        assert_eq!(model.entity(FIRE_BRIGADE).unwrap().x(), Some(-500));
    }

    #[test]
    fn test_movement_is_deterministic_under_fixed_seed() {
        let commands = vec![
            AgentCommand::Move {
                agent: FIRE_BRIGADE,
                path: vec![ROAD_A, ROAD_B],
                destination: None,
            },
            AgentCommand::Move {
                agent: CIVILIAN,
                path: vec![ROAD_A, ROAD_B],
                destination: Some((15_000, 2_000)),
            },
        ];

        // Full default config: the seeded velocity draw is part of what
        // must reproduce.
        let mut results = Vec::new();
        for _ in 0..2 {
            let mut model = test_world();
            let mut simulator = TrafficSimulator::new(TrafficConfig::default());
            simulator.post_connect(&model, &Config::new());
            let changes = run_tick(&mut simulator, &mut model, commands.clone());
            results.push((changes, model));
        }

        let (changes_a, model_a) = &results[0];
        let (changes_b, model_b) = &results[1];
        assert_eq!(changes_a, changes_b);
        assert_eq!(model_a, model_b);
    }

    #[test]
    fn test_different_seeds_draw_different_velocities() {
        let model = test_world();
        let mut fast = TrafficSimulator::new(TrafficConfig {
            seed: 1,
            ..TrafficConfig::default()
        });
        let mut slow = TrafficSimulator::new(TrafficConfig {
            seed: 2,
            ..TrafficConfig::default()
        });
        fast.post_connect(&model, &Config::new());
        slow.post_connect(&model, &Config::new());
        assert_ne!(
            fast.agent(FIRE_BRIGADE).unwrap().velocity_limit(),
            slow.agent(FIRE_BRIGADE).unwrap().velocity_limit()
        );
    }

    #[test]
    fn test_dead_agent_is_ignored() {
        let mut model = test_world();
        model.entity_mut(FIRE_BRIGADE).unwrap().set_hp(0);
        let mut simulator = connected_simulator(&model);
        let changes = run_tick(
            &mut simulator,
            &mut model,
            vec![AgentCommand::Move {
                agent: FIRE_BRIGADE,
                path: vec![ROAD_A, ROAD_B],
                destination: None,
            }],
        );

        // Only the clearing of movement bookkeeping, never a position.
        let keys: Vec<PropertyKey> = changes.changes_for(FIRE_BRIGADE).map(|(key, _)| key).collect();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&PropertyKey::PositionHistory));
        assert!(keys.contains(&PropertyKey::TravelDistance));
        assert_eq!(model.entity(FIRE_BRIGADE).unwrap().x(), Some(-500));
        assert_eq!(model.entity(FIRE_BRIGADE).unwrap().position_history(), None);
        assert_eq!(model.entity(FIRE_BRIGADE).unwrap().travel_distance(), Some(0));
    }

    #[test]
    fn test_carried_civilian_is_ignored() {
        let mut model = test_world();
        let mut simulator = connected_simulator(&model);
        run_tick(
            &mut simulator,
            &mut model,
            vec![AgentCommand::Load {
                agent: AMBULANCE,
                target: CIVILIAN,
            }],
        );

        // Next tick the carried civilian tries to walk off on its own.
        let changes = run_tick(
            &mut simulator,
            &mut model,
            vec![AgentCommand::Move {
                agent: CIVILIAN,
                path: vec![ROAD_A, ROAD_B],
                destination: None,
            }],
        );

        let keys: Vec<PropertyKey> = changes.changes_for(CIVILIAN).map(|(key, _)| key).collect();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&PropertyKey::PositionHistory));
        assert!(keys.contains(&PropertyKey::TravelDistance));
        // Still riding in the ambulance.
        assert_eq!(model.entity(CIVILIAN).unwrap().position(), Some(AMBULANCE));
    }

    #[test]
    fn test_load_issuer_does_not_move_this_tick() {
        let mut model = test_world();
        let mut simulator = connected_simulator(&model);
        let changes = run_tick(
            &mut simulator,
            &mut model,
            vec![
                AgentCommand::Load {
                    agent: AMBULANCE,
                    target: CIVILIAN,
                },
                AgentCommand::Move {
                    agent: AMBULANCE,
                    path: vec![ROAD_A, ROAD_B],
                    destination: None,
                },
            ],
        );

        // The load succeeded, and the issuing ambulance was benched for the
        // rest of the tick regardless of its move order.
        assert_eq!(model.entity(CIVILIAN).unwrap().position(), Some(AMBULANCE));
        let keys: Vec<PropertyKey> = changes.changes_for(AMBULANCE).map(|(key, _)| key).collect();
        assert_eq!(keys.len(), 2);
        assert_eq!(model.entity(AMBULANCE).unwrap().x(), Some(0));
    }
}
