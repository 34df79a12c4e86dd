//! Wave scheduler - timed, weighted-random enemy spawning
//!
//! The loop is an explicit phase machine with one resumption timestamp.
//! `tick` runs every phase step whose time has come, so a long frame catches
//! up on several spawns at once. Stopping is a phase change; nothing pending
//! survives it.

use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::{EnemyTypeDescriptor, GameConfig};
use crate::util::time::SimTime;
use crate::ws::protocol::{EntityId, GameEvent, StateChange, WaveSnapshot};

use super::enemy::EnemyController;
use super::physics::PhysicsSystem;
use super::registry::EntityRegistry;
use super::snapshot::ChangeLog;

/// Upper bound on phase steps in one tick (guards zero-delay configs)
const MAX_STEPS_PER_TICK: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WavePhase {
    Idle,
    /// Next step starts a new wave
    Announcing,
    /// Spawning with `remaining` enemies left
    Spawning { remaining: u32 },
    /// Waiting for the live set to clear
    Waiting,
    /// Delay before the next wave (also the delay before the first)
    Pausing,
}

/// Replicated wave counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaveState {
    pub current_wave: u32,
    pub enemies_alive: u32,
    pub in_progress: bool,
}

impl WaveState {
    pub fn snapshot(&self) -> WaveSnapshot {
        WaveSnapshot {
            current_wave: self.current_wave,
            enemies_alive: self.enemies_alive,
            in_progress: self.in_progress,
        }
    }
}

/// Weighted view over the enemy type table
pub struct EnemyTypeTable<'a> {
    types: &'a [EnemyTypeDescriptor],
}

impl<'a> EnemyTypeTable<'a> {
    pub fn new(types: &'a [EnemyTypeDescriptor]) -> Self {
        Self { types }
    }

    pub fn total_weight(&self) -> u64 {
        self.types.iter().map(|t| u64::from(t.spawn_weight)).sum()
    }

    /// First type whose cumulative weight exceeds `r`. None when `r` is out of range.
    pub fn pick(&self, r: u64) -> Option<&'a EnemyTypeDescriptor> {
        let mut cumulative = 0u64;
        for descriptor in self.types {
            cumulative += u64::from(descriptor.spawn_weight);
            if r < cumulative {
                return Some(descriptor);
            }
        }
        None
    }

    /// Draw `r` uniformly in `[0, total_weight)` and pick
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&'a EnemyTypeDescriptor> {
        let total = self.total_weight();
        if total == 0 {
            return None;
        }
        self.pick(rng.gen_range(0..total))
    }
}

/// Everything a scheduler step may touch
pub struct SpawnContext<'a, R: Rng + ?Sized> {
    pub registry: &'a mut EntityRegistry,
    pub rules: &'a GameConfig,
    pub rng: &'a mut R,
    pub log: &'a mut ChangeLog,
}

#[derive(Debug)]
pub struct WaveScheduler {
    phase: WavePhase,
    resume_at: SimTime,
    state: WaveState,
    /// Enemies spawned by this scheduler; pruned against the registry on each poll
    live: Vec<EntityId>,
}

impl Default for WaveScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl WaveScheduler {
    pub fn new() -> Self {
        Self {
            phase: WavePhase::Idle,
            resume_at: 0.0,
            state: WaveState::default(),
            live: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> WavePhase {
        self.phase
    }

    pub fn state(&self) -> WaveState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.phase != WavePhase::Idle
    }

    /// Enemy count for 1-indexed wave `wave`
    pub fn enemies_for_wave(rules: &GameConfig, wave: u32) -> u32 {
        let count = rules.base_enemies_per_wave as f32 + wave.saturating_sub(1) as f32 * rules.enemy_increase_per_wave;
        count.round().max(0.0) as u32
    }

    /// Begin the wave loop after the first-wave delay. No-op when already running.
    pub fn start(&mut self, now: SimTime, rules: &GameConfig) -> bool {
        if self.is_running() {
            debug!("Wave scheduler already running");
            return false;
        }
        self.phase = WavePhase::Pausing;
        self.resume_at = now + rules.first_wave_delay;
        true
    }

    /// Abandon the loop and any pending spawns. Safe from any phase.
    pub fn stop(&mut self) {
        if self.is_running() {
            debug!(wave = self.state.current_wave, phase = ?self.phase, "Wave scheduler stopped");
        }
        self.phase = WavePhase::Idle;
    }

    /// Zero the counters and forget the live set. Spawned enemies are not despawned.
    pub fn reset(&mut self, log: &mut ChangeLog) {
        self.stop();
        self.set_wave(log, 0);
        self.set_alive(log, 0);
        self.set_in_progress(log, false);
        self.live.clear();
    }

    /// Run every step whose resumption time has been reached
    pub fn tick<R: Rng + ?Sized>(&mut self, now: SimTime, ctx: &mut SpawnContext<'_, R>) {
        if !ctx.registry.is_server() {
            return;
        }
        let mut steps = 0;
        while self.is_running() && now >= self.resume_at {
            if steps == MAX_STEPS_PER_TICK {
                warn!(wave = self.state.current_wave, "Wave scheduler step limit reached in one tick");
                break;
            }
            steps += 1;
            self.step(ctx);
        }
    }

    fn step<R: Rng + ?Sized>(&mut self, ctx: &mut SpawnContext<'_, R>) {
        match self.phase {
            WavePhase::Idle => {}

            WavePhase::Announcing => {
                let wave = self.state.current_wave + 1;
                self.set_wave(ctx.log, wave);
                self.set_in_progress(ctx.log, true);
                let enemies = Self::enemies_for_wave(ctx.rules, wave);
                info!(wave, enemies, "Wave started");
                ctx.log.emit(GameEvent::WaveStarted { wave, enemies });
                self.phase = WavePhase::Spawning { remaining: enemies };
            }

            WavePhase::Spawning { remaining: 0 } => {
                self.phase = WavePhase::Waiting;
            }

            WavePhase::Spawning { remaining } => {
                self.spawn_one(ctx);
                self.phase = WavePhase::Spawning {
                    remaining: remaining - 1,
                };
                self.resume_at += ctx.rules.time_between_spawns;
            }

            WavePhase::Waiting => {
                let registry = &*ctx.registry;
                self.live.retain(|id| registry.contains_enemy(*id));
                self.set_alive(ctx.log, self.live.len() as u32);

                if self.live.is_empty() {
                    let wave = self.state.current_wave;
                    self.set_in_progress(ctx.log, false);
                    info!(wave, "Wave completed");
                    ctx.log.emit(GameEvent::WaveCompleted { wave });
                    self.phase = WavePhase::Pausing;
                    self.resume_at += ctx.rules.time_between_waves;
                } else {
                    self.resume_at += ctx.rules.clearance_poll_interval;
                }
            }

            WavePhase::Pausing => {
                self.phase = WavePhase::Announcing;
            }
        }
    }

    fn spawn_one<R: Rng + ?Sized>(&mut self, ctx: &mut SpawnContext<'_, R>) {
        let rules = ctx.rules;
        if rules.spawn_points.is_empty() {
            warn!(wave = self.state.current_wave, "No spawn points configured, spawn skipped");
            return;
        }
        let Some(descriptor) = EnemyTypeTable::new(&rules.enemy_types).choose(&mut *ctx.rng) else {
            warn!(wave = self.state.current_wave, "Enemy type table is empty, spawn skipped");
            return;
        };

        let anchor = rules.spawn_points[ctx.rng.gen_range(0..rules.spawn_points.len())];
        let position = anchor + PhysicsSystem::random_point_in_disk(&mut *ctx.rng, rules.spawn_radius);
        let id = EnemyController::spawn(ctx.registry, descriptor, position, self.resume_at);

        debug!(enemy_id = %id, type_name = %descriptor.name, wave = self.state.current_wave, "Enemy spawned");
        ctx.log.emit(GameEvent::EnemySpawned {
            enemy_id: id,
            type_name: descriptor.name.clone(),
            prefab_ref: descriptor.prefab_ref.clone(),
            position,
        });

        self.live.push(id);
        self.set_alive(ctx.log, self.state.enemies_alive + 1);
    }

    fn set_wave(&mut self, log: &mut ChangeLog, value: u32) {
        let old = self.state.current_wave;
        self.state.current_wave = value;
        log.record(StateChange::CurrentWave { old, new: value });
    }

    fn set_alive(&mut self, log: &mut ChangeLog, value: u32) {
        let old = self.state.enemies_alive;
        self.state.enemies_alive = value;
        log.record(StateChange::EnemiesAlive { old, new: value });
    }

    fn set_in_progress(&mut self, log: &mut ChangeLog, value: bool) {
        let old = self.state.in_progress;
        self.state.in_progress = value;
        log.record(StateChange::WaveInProgress { old, new: value });
    }
}
