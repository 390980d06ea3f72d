//! World state and authoritative tick loop

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use glam::DVec3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::SimulationClock;
use crate::replay::{ReplayRecorder, TerrainParameters};
use crate::util::time::{snapshot_interval_ticks, tick_duration, SIMULATION_TPS, SNAPSHOT_TPS};
use crate::ws::protocol::{ActorId, ReplayFrame, WorldDiff};

use super::physics::{ActorClass, Orientation, PhysicalLimits, PhysicsSystem, VehicleState};
use super::snapshot::DiffBuilder;
use super::Actor;

/// Radius of the spawn area in metres
pub const ARENA_RADIUS_M: f64 = 1_500.0;

/// Commands accepted by the tick loop
#[derive(Debug, Clone)]
pub enum WorldCommand {
    Spawn {
        id: ActorId,
        class: ActorClass,
        state: VehicleState,
    },
    Despawn {
        id: ActorId,
    },
    SetMotion {
        id: ActorId,
        velocity: DVec3,
        angular_velocity: DVec3,
    },
}

/// Tick loop configuration
#[derive(Debug, Clone)]
pub struct WorldSettings {
    pub simulation_tps: u32,
    pub snapshot_tps: u32,
    pub match_seed: u64,
    /// Number of drifting actors spawned at start
    pub actor_count: usize,
    pub actor_class: ActorClass,
    /// Record the match under this directory when set
    pub replay_dir: Option<PathBuf>,
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            simulation_tps: SIMULATION_TPS,
            snapshot_tps: SNAPSHOT_TPS,
            match_seed: 0,
            actor_count: 0,
            actor_class: ActorClass::Skiff,
            replay_dir: None,
        }
    }
}

/// Handle to the running world
#[derive(Clone)]
pub struct WorldHandle {
    pub id: Uuid,
    pub command_tx: mpsc::Sender<WorldCommand>,
    pub diff_tx: broadcast::Sender<WorldDiff>,
}

impl WorldHandle {
    /// Subscribe to world diffs
    pub fn subscribe(&self) -> broadcast::Receiver<WorldDiff> {
        self.diff_tx.subscribe()
    }
}

/// The authoritative world
pub struct GameWorld {
    id: Uuid,
    settings: WorldSettings,
    tick: u64,
    step: Duration,
    actors: HashMap<ActorId, Actor>,
    clock: Arc<SimulationClock>,
    rng: ChaCha8Rng,
    command_rx: mpsc::Receiver<WorldCommand>,
    diff_tx: broadcast::Sender<WorldDiff>,
    diff_builder: DiffBuilder,
    recorder: Option<ReplayRecorder>,
}

impl GameWorld {
    /// Create a new world
    pub fn new(settings: WorldSettings, clock: Arc<SimulationClock>) -> (Self, WorldHandle) {
        let id = Uuid::new_v4();
        let (command_tx, command_rx) = mpsc::channel(256);
        let (diff_tx, _) = broadcast::channel(64);

        let handle = WorldHandle {
            id,
            command_tx,
            diff_tx: diff_tx.clone(),
        };

        let diff_interval = snapshot_interval_ticks(settings.simulation_tps, settings.snapshot_tps);
        let world = Self {
            id,
            step: tick_duration(settings.simulation_tps),
            rng: ChaCha8Rng::seed_from_u64(settings.match_seed),
            tick: 0,
            actors: HashMap::new(),
            clock,
            command_rx,
            diff_tx,
            diff_builder: DiffBuilder::new(diff_interval),
            recorder: None,
            settings,
        };

        (world, handle)
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn actors(&self) -> &HashMap<ActorId, Actor> {
        &self.actors
    }

    /// Spawn the configured number of drifting actors from the match seed
    pub fn spawn_drifters(&mut self) {
        let class = self.settings.actor_class;
        let limits = PhysicalLimits::for_class(class);
        for _ in 0..self.settings.actor_count {
            let angle = self.rng.gen_range(0.0..std::f64::consts::TAU);
            let distance = self.rng.gen_range(0.0..ARENA_RADIUS_M * 0.8);
            let heading = self.rng.gen_range(-180.0..180.0);
            let speed = self.rng.gen_range(0.2..1.0) * limits.max_speed_mps;
            let turn = self.rng.gen_range(-0.25..0.25) * limits.max_angular_speed_deg;

            let state = VehicleState {
                position: DVec3::new(angle.cos() * distance, 0.0, angle.sin() * distance),
                velocity: DVec3::new(
                    f64::to_radians(heading).sin() * speed,
                    0.0,
                    f64::to_radians(heading).cos() * speed,
                ),
                orientation: Orientation::new(heading, 0.0, 0.0),
                angular_velocity: DVec3::new(0.0, turn, 0.0),
            };
            let id = Uuid::from_u128(self.rng.gen());
            self.actors.insert(id, Actor { id, class, state });
        }
    }

    /// Open the replay bundle if a replay directory is configured
    pub fn start_recording(&mut self) {
        let Some(root) = self.settings.replay_dir.clone() else {
            return;
        };
        let mut terrain = TerrainParameters::new();
        terrain.insert("arena_radius_m".to_string(), ARENA_RADIUS_M);
        terrain.insert("actor_count".to_string(), self.settings.actor_count as f64);

        match ReplayRecorder::start(
            &root,
            &self.id.to_string(),
            &self.settings.match_seed.to_string(),
            terrain,
            Utc::now(),
        ) {
            Ok(recorder) => self.recorder = Some(recorder),
            Err(e) => error!(world_id = %self.id, error = %e, "Failed to start replay recording"),
        }
    }

    /// Run the authoritative tick loop until `shutdown` resolves
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        self.spawn_drifters();
        self.start_recording();
        info!(
            world_id = %self.id,
            actors = self.actors.len(),
            tps = self.settings.simulation_tps,
            "World started"
        );

        let mut tick_interval = interval(self.step);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tick_interval.tick() => {
                    if let Some(diff) = self.step() {
                        // No subscribers is not an error
                        let _ = self.diff_tx.send(diff);
                    }
                }
            }
        }

        if let Some(recorder) = self.recorder.take() {
            if let Err(e) = recorder.finish() {
                error!(world_id = %self.id, error = %e, "Failed to finish replay recording");
            }
        }
        info!(world_id = %self.id, tick = self.tick, "World stopped");
    }

    /// Advance one tick; returns a diff when one is due.
    ///
    /// Due diffs go out even without changes while actors are live, so
    /// clients keep anchoring parked actors and refreshing the roster.
    pub fn step(&mut self) -> Option<WorldDiff> {
        self.process_commands();

        self.tick += 1;
        self.clock.advance(self.step);

        let dt = self.step.as_secs_f64();
        for actor in self.actors.values_mut() {
            let limits = PhysicalLimits::for_class(actor.class);
            PhysicsSystem::integrate(Some(&mut actor.state), dt, &limits);
        }

        self.record_frame();

        if !self.diff_builder.should_send() {
            return None;
        }
        let diff = self
            .diff_builder
            .build(self.tick, self.clock.simulated_ms(), &self.actors);
        (diff.has_changes() || !diff.roster.is_empty()).then_some(diff)
    }

    /// Drain pending commands
    fn process_commands(&mut self) {
        while let Ok(command) = self.command_rx.try_recv() {
            match command {
                WorldCommand::Spawn { id, class, state } => {
                    debug!(world_id = %self.id, actor_id = %id, ?class, "Actor spawned");
                    self.actors.insert(id, Actor { id, class, state });
                    self.diff_builder.force_next();
                }
                WorldCommand::Despawn { id } => {
                    if self.actors.remove(&id).is_some() {
                        debug!(world_id = %self.id, actor_id = %id, "Actor despawned");
                        self.diff_builder.force_next();
                    }
                }
                WorldCommand::SetMotion {
                    id,
                    velocity,
                    angular_velocity,
                } => match self.actors.get_mut(&id) {
                    Some(actor) => {
                        actor.state.velocity = velocity;
                        actor.state.angular_velocity = angular_velocity;
                    }
                    None => warn!(world_id = %self.id, actor_id = %id, "Motion for unknown actor"),
                },
            }
        }
    }

    fn record_frame(&mut self) {
        let Some(recorder) = self.recorder.as_mut() else {
            return;
        };
        if !recorder.frame_due(self.step) {
            return;
        }

        let mut actors: Vec<_> = self.actors.values().map(Actor::snapshot).collect();
        actors.sort_unstable_by_key(|snapshot| snapshot.id);
        let frame = ReplayFrame {
            tick: self.tick,
            simulated_ms: self.clock.simulated_ms(),
            actors,
        };

        if let Err(e) = recorder.record(&frame) {
            error!(world_id = %self.id, error = %e, "Replay recording failed, disabling recorder");
            self.recorder = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::DEFAULT_DRIFT_WARN_THRESHOLD_MS;
    use crate::replay::{catalog, ReplayLoader};

    fn world(settings: WorldSettings) -> (GameWorld, WorldHandle, Arc<SimulationClock>) {
        let clock = Arc::new(SimulationClock::starting_at(0, DEFAULT_DRIFT_WARN_THRESHOLD_MS));
        let (world, handle) = GameWorld::new(settings, clock.clone());
        (world, handle, clock)
    }

    #[test]
    fn test_step_integrates_and_advances_clock() {
        let (mut world, handle, clock) = world(WorldSettings {
            simulation_tps: 20,
            snapshot_tps: 20,
            ..Default::default()
        });
        let id = Uuid::new_v4();
        handle
            .command_tx
            .try_send(WorldCommand::Spawn {
                id,
                class: ActorClass::Skiff,
                state: VehicleState {
                    velocity: DVec3::new(10.0, 0.0, 0.0),
                    ..Default::default()
                },
            })
            .unwrap();

        let diff = world.step().expect("spawn must produce a diff");
        assert_eq!(diff.tick, 1);
        assert_eq!(diff.roster, vec![id]);
        assert_eq!(clock.simulated_elapsed_ms(), 50);
        assert!((world.actors()[&id].state.position.x - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_motion_is_clamped_by_class() {
        let (mut world, handle, _) = world(WorldSettings::default());
        let id = Uuid::new_v4();
        handle
            .command_tx
            .try_send(WorldCommand::Spawn {
                id,
                class: ActorClass::Hauler,
                state: VehicleState::default(),
            })
            .unwrap();
        handle
            .command_tx
            .try_send(WorldCommand::SetMotion {
                id,
                velocity: DVec3::new(1_000.0, 0.0, 0.0),
                angular_velocity: DVec3::ZERO,
            })
            .unwrap();

        world.step();
        let limits = PhysicalLimits::for_class(ActorClass::Hauler);
        assert!((world.actors()[&id].state.velocity.length() - limits.max_speed_mps).abs() < 1e-9);
    }

    #[test]
    fn test_despawn_is_reported() {
        let (mut world, handle, _) = world(WorldSettings::default());
        let id = Uuid::new_v4();
        handle
            .command_tx
            .try_send(WorldCommand::Spawn {
                id,
                class: ActorClass::Skiff,
                state: VehicleState::default(),
            })
            .unwrap();
        world.step();

        handle.command_tx.try_send(WorldCommand::Despawn { id }).unwrap();
        let diff = world.step().expect("despawn must produce a diff");
        assert_eq!(diff.removed, vec![id]);
        assert!(diff.roster.is_empty());
    }

    #[test]
    fn test_parked_actor_keeps_roster_diffs_flowing() {
        let (mut world, handle, _) = world(WorldSettings {
            simulation_tps: 20,
            snapshot_tps: 20,
            ..Default::default()
        });
        let id = Uuid::new_v4();
        handle
            .command_tx
            .try_send(WorldCommand::Spawn {
                id,
                class: ActorClass::Skiff,
                state: VehicleState::default(),
            })
            .unwrap();
        world.step();

        let parked = world.step().expect("live roster must still produce a diff");
        assert!(parked.updated.is_empty());
        assert_eq!(parked.roster, vec![id]);

        handle.command_tx.try_send(WorldCommand::Despawn { id }).unwrap();
        world.step();
        assert!(world.step().is_none());
    }

    #[test]
    fn test_seeded_spawn_is_deterministic() {
        let settings = WorldSettings {
            match_seed: 7,
            actor_count: 5,
            ..Default::default()
        };
        let (mut a, _, _) = world(settings.clone());
        let (mut b, _, _) = world(settings);
        a.spawn_drifters();
        b.spawn_drifters();

        for _ in 0..10 {
            a.step();
            b.step();
        }
        assert_eq!(a.actors(), b.actors());
        assert_eq!(a.actors().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_broadcasts_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let (world, handle, _) = world(WorldSettings {
            match_seed: 3,
            actor_count: 2,
            replay_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        });
        let mut diffs = handle.subscribe();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(world.run(async move {
            let _ = stop_rx.await;
        }));

        let first = diffs.recv().await.unwrap();
        assert_eq!(first.roster.len(), 2);
        assert_eq!(first.updated.len(), 2);

        tokio::time::sleep(Duration::from_millis(500)).await;
        let _ = stop_tx.send(());
        task.await.unwrap();

        let entries = catalog::list(dir.path()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].header.match_seed, "3");
        let loader = ReplayLoader::load_entry(&entries[0]).unwrap();
        assert!(loader.len() >= 2);
        assert_eq!(loader.frames()[0].actors.len(), 2);
    }
}
