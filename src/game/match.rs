//! Match session state machine and authoritative tick loop

use glam::Vec2;
use parking_lot::RwLock;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::mem;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::GameConfig;
use crate::store::{submit_in_background, HighscoreEntry, HighscoreStore};
use crate::util::time::{tick_delta, SimClock, SimTime, SIMULATION_TPS, SNAPSHOT_TPS};
use crate::ws::protocol::{ClientMsg, GameEvent, MatchSnapshot, MatchState, ServerMsg, StateChange};

use super::combat::{self, Contact, EnemyHit};
use super::enemy::EnemyController;
use super::physics::{CollisionEvent, OverlapDetector};
use super::player::{self, DamageOutcome};
use super::registry::{Authority, EntityRegistry, PlayerRecord, ProjectileOwner};
use super::snapshot::{ChangeLog, MatchSummary, SnapshotBuilder};
use super::wave::{SpawnContext, WaveScheduler};
use super::SessionInput;

/// Registered, connected and ready players needed to leave the lobby
pub const MIN_PLAYERS_TO_START: usize = 2;

const TEAM_NAME_SEPARATOR: &str = " & ";
const DEFAULT_TEAM_NAME: &str = "Unnamed Team";

/// Side effects the session asks its host to perform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    SubmitScore {
        team_name: String,
        score: u64,
        kills: u32,
        waves_reached: u32,
        survival_secs: u64,
    },
}

/// Everything produced by one tick
#[derive(Debug, Default)]
pub struct TickOutput {
    pub tick: u64,
    pub changes: Vec<StateChange>,
    pub events: Vec<GameEvent>,
    pub commands: Vec<SessionCommand>,
    /// A full snapshot should go out now (match state transition, roster change)
    pub force_snapshot: bool,
}

/// One game session: lobby, match lifecycle, scheduler and every live entity
pub struct MatchSession {
    rules: Arc<GameConfig>,
    state: MatchState,
    clock: SimClock,
    registry: EntityRegistry,
    waves: WaveScheduler,
    overlaps: OverlapDetector,
    rng: ChaCha8Rng,
    log: ChangeLog,
    total_score: u64,
    kills: u32,
    /// Simulation time the current match entered `Playing`
    started_at: SimTime,
    commands: Vec<SessionCommand>,
    force_snapshot: bool,
}

impl MatchSession {
    pub fn new(rules: Arc<GameConfig>, authority: Authority) -> Self {
        let rng = match rules.rng_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            rules,
            state: MatchState::WaitingForPlayers,
            clock: SimClock::new(),
            registry: EntityRegistry::new(authority),
            waves: WaveScheduler::new(),
            overlaps: OverlapDetector::new(),
            rng,
            log: ChangeLog::new(),
            total_score: 0,
            kills: 0,
            started_at: 0.0,
            commands: Vec::new(),
            force_snapshot: true,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> MatchState {
        self.state
    }

    #[cfg(test)]
    pub fn total_score(&self) -> u64 {
        self.total_score
    }

    #[cfg(test)]
    pub fn kills(&self) -> u32 {
        self.kills
    }

    #[cfg(test)]
    pub fn wave_state(&self) -> super::wave::WaveState {
        self.waves.state()
    }

    #[cfg(test)]
    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    // ------------------------------------------------------------------
    // Lobby
    // ------------------------------------------------------------------

    /// Give a connection a lobby slot. Returns the existing slot for a known
    /// connection and none when full or outside the lobby.
    pub fn register_player(&mut self, connection: Uuid) -> Option<usize> {
        if !self.registry.is_server() {
            return None;
        }
        if let Some(index) = self.registry.player_by_connection(connection) {
            return Some(index);
        }
        if self.state != MatchState::WaitingForPlayers {
            debug!(connection_id = %connection, state = ?self.state, "Registration outside the lobby, observing only");
            return None;
        }

        let free_slot = self.registry.players().iter().position(|p| !p.is_connected());
        let index = match free_slot {
            Some(index) => {
                self.reclaim_slot(index, connection);
                index
            }
            None => {
                let index = self.registry.player_count();
                let origin = player::spawn_point_for(&self.rules, index, Vec2::ZERO);
                self.registry.insert_player(connection, origin, self.rules.max_health)?
            }
        };

        self.log.record(StateChange::PlayerConnected {
            index,
            old: false,
            new: true,
        });
        self.force_snapshot = true;
        info!(connection_id = %connection, player_index = index, "Player registered");

        self.check_and_start_game();
        Some(index)
    }

    /// Hand a disconnected lobby slot to a new connection with a fresh record
    fn reclaim_slot(&mut self, index: usize, connection: Uuid) {
        let entity = self.registry.allocate_id();
        let origin = player::spawn_point_for(&self.rules, index, Vec2::ZERO);
        let max_health = self.rules.max_health;
        let Some(slot) = self.registry.player_mut(index) else {
            return;
        };
        let previous = mem::replace(slot, PlayerRecord::new(index, entity, connection, origin, max_health));

        self.log.record(StateChange::PlayerName {
            index,
            old: previous.name,
            new: String::new(),
        });
        self.log.record(StateChange::PlayerReady {
            index,
            old: previous.ready,
            new: false,
        });
        self.log.record(StateChange::PlayerHealth {
            index,
            old: previous.health,
            new: max_health,
        });
    }

    /// Detach a connection. Mid-match the player counts as dead; once nobody
    /// is connected the session returns to an empty lobby.
    pub fn unregister_player(&mut self, connection: Uuid) {
        let Some(index) = self.registry.player_by_connection(connection) else {
            debug!(connection_id = %connection, "Unregister for unknown connection ignored");
            return;
        };
        if let Some(player) = self.registry.player_mut(index) {
            player.connection = None;
            player.move_input = Vec2::ZERO;
            player.fire_requested = false;
        }
        self.log.record(StateChange::PlayerConnected {
            index,
            old: true,
            new: false,
        });
        self.force_snapshot = true;
        info!(connection_id = %connection, player_index = index, "Player disconnected");

        match self.state {
            MatchState::WaitingForPlayers => {
                if let Some(player) = self.registry.player_mut(index) {
                    let old = player.ready;
                    player.ready = false;
                    self.log.record(StateChange::PlayerReady { index, old, new: false });
                }
            }
            MatchState::Playing => self.kill_disconnected(index),
            MatchState::Finished => {}
        }

        if self.registry.players().iter().all(|p| !p.is_connected()) {
            self.reset_empty_session();
        }
    }

    fn kill_disconnected(&mut self, index: usize) {
        let Some(player) = self.registry.player_mut(index) else {
            return;
        };
        if !player.is_alive() {
            return;
        }
        let old = player.health;
        player.health = 0;
        player.active = false;
        self.log.record(StateChange::PlayerHealth { index, old, new: 0 });
        self.log.emit(GameEvent::PlayerDied { index });
        self.on_player_death(index);
    }

    fn reset_empty_session(&mut self) {
        info!("All players disconnected, session reset");
        self.waves.reset(&mut self.log);
        self.clear_arena();
        self.registry.clear_players();
        self.set_state(MatchState::WaitingForPlayers);
        self.force_snapshot = true;
    }

    /// Set a display name. Lobby only; a set name never changes.
    pub fn set_player_name(&mut self, index: usize, name: &str) -> bool {
        if self.state != MatchState::WaitingForPlayers {
            return false;
        }
        player::set_name(&mut self.registry, &mut self.log, index, name)
    }

    /// Flip a player's ready flag, then try to start. Lobby only.
    pub fn toggle_ready(&mut self, index: usize) -> bool {
        if self.state != MatchState::WaitingForPlayers {
            debug!(player_index = index, state = ?self.state, "Ready toggle outside the lobby ignored");
            return false;
        }
        let Some(ready) = player::toggle_ready(&mut self.registry, &mut self.log, index) else {
            debug!(player_index = index, "Ready toggle for unknown player ignored");
            return false;
        };
        debug!(player_index = index, ready, "Ready toggled");
        self.check_and_start_game();
        true
    }

    /// Start the match when enough players are registered and all are ready
    pub fn check_and_start_game(&mut self) -> bool {
        if !self.registry.is_server() || self.state != MatchState::WaitingForPlayers {
            return false;
        }
        let players = self.registry.players();
        if players.len() < MIN_PLAYERS_TO_START || !players.iter().all(|p| p.ready && p.is_connected()) {
            return false;
        }
        self.start_match();
        true
    }

    // ------------------------------------------------------------------
    // Match lifecycle
    // ------------------------------------------------------------------

    fn start_match(&mut self) {
        let now = self.clock.now();
        self.started_at = now;
        self.set_state(MatchState::Playing);
        self.set_score(0);
        self.set_kills(0);
        self.clear_arena();

        for index in 0..self.registry.player_count() {
            player::respawn(&mut self.registry, &self.rules, &mut self.log, index);
            if let Some(p) = self.registry.player_mut(index) {
                p.kills = 0;
            }
        }

        self.waves.reset(&mut self.log);
        self.waves.start(now, &self.rules);
        self.log.emit(GameEvent::MatchStarted);
        info!(players = self.registry.player_count(), "Match started");
    }

    fn end_match(&mut self) {
        self.waves.stop();
        self.clear_arena();
        let waves_reached = self.waves.state().current_wave;
        let survival_secs = (self.clock.now() - self.started_at).max(0.0).floor() as u64;
        self.set_state(MatchState::Finished);

        self.log.emit(GameEvent::MatchEnded {
            total_score: self.total_score,
            kills: self.kills,
            waves_reached,
        });
        info!(
            score = self.total_score,
            kills = self.kills,
            wave = waves_reached,
            survival_secs,
            "Match finished"
        );

        self.commands.push(SessionCommand::SubmitScore {
            team_name: self.team_name(),
            score: self.total_score,
            kills: self.kills,
            waves_reached,
            survival_secs,
        });
    }

    /// Leave the results screen. Finished only.
    pub fn request_return_to_lobby(&mut self) -> bool {
        if !self.registry.is_server() || self.state != MatchState::Finished {
            return false;
        }
        self.return_to_lobby();
        true
    }

    /// Reset and immediately start again when every slot is still connected,
    /// otherwise stay in the lobby. Finished only.
    pub fn request_restart(&mut self) -> bool {
        if !self.registry.is_server() || self.state != MatchState::Finished {
            return false;
        }
        self.return_to_lobby();

        let connected = self.registry.players().iter().filter(|p| p.is_connected()).count();
        if connected >= MIN_PLAYERS_TO_START && connected == self.registry.player_count() {
            self.start_match();
        } else {
            info!(connected, "Restart requested without a full lobby, waiting for players");
        }
        true
    }

    fn return_to_lobby(&mut self) {
        self.waves.reset(&mut self.log);
        self.clear_arena();
        player::reset_ready(&mut self.registry, &mut self.log);
        self.set_state(MatchState::WaitingForPlayers);
    }

    /// Credit a kill. No-op unless playing.
    pub fn on_enemy_killed(&mut self, score_value: u32, killer: Option<usize>) {
        if self.state != MatchState::Playing {
            debug!(score_value, "Kill outside a running match ignored");
            return;
        }
        self.set_score(self.total_score + u64::from(score_value));
        self.set_kills(self.kills + 1);
        if let Some(p) = killer.and_then(|index| self.registry.player_mut(index)) {
            p.kills += 1;
        }
    }

    fn on_player_death(&mut self, index: usize) {
        EnemyController::on_player_died(&mut self.registry, index);
        if self.state == MatchState::Playing && self.registry.all_players_dead() {
            self.end_match();
        }
    }

    /// Team name for the leaderboard: player names joined with " & "
    pub fn team_name(&self) -> String {
        let names: Vec<&str> = self
            .registry
            .players()
            .iter()
            .map(|p| p.name.as_str())
            .filter(|name| !name.is_empty())
            .collect();
        if names.is_empty() {
            DEFAULT_TEAM_NAME.to_string()
        } else {
            names.join(TEAM_NAME_SEPARATOR)
        }
    }

    fn clear_arena(&mut self) {
        let (enemies, projectiles) = self.registry.despawn_hostiles();
        self.registry.clear_projectiles();
        self.overlaps.clear();
        if enemies > 0 || projectiles > 0 {
            debug!(enemies, projectiles, "Arena cleared");
        }
    }

    fn set_state(&mut self, new: MatchState) {
        let old = self.state;
        self.state = new;
        self.log.record(StateChange::MatchState { old, new });
        if old != new {
            self.force_snapshot = true;
            info!(from = ?old, to = ?new, "Match state changed");
        }
    }

    fn set_score(&mut self, new: u64) {
        let old = self.total_score;
        self.total_score = new;
        self.log.record(StateChange::TotalScore { old, new });
    }

    fn set_kills(&mut self, new: u32) {
        let old = self.kills;
        self.kills = new;
        self.log.record(StateChange::Kills { old, new });
    }

    // ------------------------------------------------------------------
    // Requests and collisions
    // ------------------------------------------------------------------

    /// Apply one untrusted client request. Unmapped connections are dropped.
    pub fn apply_request(&mut self, connection: Uuid, msg: ClientMsg) {
        if !self.registry.is_server() {
            return;
        }
        let Some(index) = self.registry.player_by_connection(connection) else {
            debug!(connection_id = %connection, "Request from unmapped connection dropped");
            return;
        };
        let playing = self.state == MatchState::Playing;

        match msg {
            ClientMsg::Move { direction } if playing => player::apply_move(&mut self.registry, index, direction),
            ClientMsg::Aim { direction } if playing => player::apply_aim(&mut self.registry, index, direction),
            ClientMsg::Shoot if playing => {
                if let Some(p) = self.registry.player_mut(index).filter(|p| p.active) {
                    p.fire_requested = true;
                }
            }
            ClientMsg::Move { .. } | ClientMsg::Aim { .. } | ClientMsg::Shoot => {
                debug!(player_index = index, "Gameplay input outside a running match dropped");
            }
            ClientMsg::ToggleReady { name } => {
                if !name.trim().is_empty() {
                    self.set_player_name(index, &name);
                }
                self.toggle_ready(index);
            }
            ClientMsg::RequestRestart => {
                self.request_restart();
            }
            ClientMsg::RequestReturnToLobby => {
                self.request_return_to_lobby();
            }
            // Answered by the transport
            ClientMsg::Ping { .. } => {}
        }
    }

    /// Apply one overlap-begin event
    pub fn handle_collision(&mut self, event: CollisionEvent) {
        if !self.registry.is_server() {
            return;
        }
        let contact = combat::classify(&event, &self.registry);
        let playing = self.state == MatchState::Playing;
        let now = self.clock.now();

        match contact {
            Contact::ProjectileOutOfPlay { projectile } => {
                self.registry.remove_projectile(projectile);
            }
            _ if !playing => {}
            Contact::ProjectileHitEnemy { projectile, enemy } => {
                let Some(shot) = self.registry.remove_projectile(projectile) else {
                    return;
                };
                let killer = match shot.owner {
                    ProjectileOwner::Player(index) => Some(index),
                    ProjectileOwner::Enemy(_) => None,
                };
                match combat::damage_enemy(&mut self.registry, enemy, shot.damage) {
                    EnemyHit::Killed(dead) => {
                        debug!(enemy_id = %dead.id, killer = ?killer, "Enemy killed");
                        self.log.emit(GameEvent::EnemyKilled {
                            enemy_id: dead.id,
                            killer,
                            score_value: dead.score_value,
                        });
                        self.on_enemy_killed(dead.score_value, killer);
                    }
                    EnemyHit::Wounded { remaining } => {
                        debug!(enemy_id = %enemy, remaining, "Enemy hit");
                    }
                    EnemyHit::Missing => {}
                }
            }
            Contact::EnemyTouchedPlayer { enemy, player } => {
                debug!(enemy_id = %enemy, player_index = player, "Enemy contact");
                self.damage_player(player, self.rules.contact_damage, now);
            }
            Contact::ProjectileHitPlayer { projectile, player } => {
                // The projectile is spent even if the player is invincible
                let Some(shot) = self.registry.remove_projectile(projectile) else {
                    return;
                };
                self.damage_player(player, shot.damage, now);
            }
            Contact::Ignored => {
                debug!(subject = %event.subject, other = %event.other, tag = ?event.other_tag, "Collision ignored");
            }
        }
    }

    fn damage_player(&mut self, index: usize, amount: i32, now: SimTime) {
        let outcome = player::take_damage(&mut self.registry, &self.rules, &mut self.log, now, index, amount);
        if outcome == DamageOutcome::Died {
            self.on_player_death(index);
        }
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    /// Advance the session by `dt` seconds and drain everything it produced
    pub fn tick(&mut self, dt: f64) -> TickOutput {
        let now = self.clock.advance(dt);
        if self.registry.is_server() && self.state == MatchState::Playing {
            self.simulate(now, dt);
        }

        let (changes, events) = self.log.drain();
        TickOutput {
            tick: self.clock.tick(),
            changes,
            events,
            commands: mem::take(&mut self.commands),
            force_snapshot: mem::replace(&mut self.force_snapshot, false),
        }
    }

    fn simulate(&mut self, now: SimTime, dt: f64) {
        player::move_players(&mut self.registry, &self.rules, dt);
        for index in 0..self.registry.player_count() {
            if self.registry.player(index).is_some_and(|p| p.fire_requested) {
                player::try_fire(&mut self.registry, &self.rules, &mut self.log, now, index);
            }
        }

        EnemyController::tick(&mut self.registry, &mut self.log, now, dt);
        combat::advance_projectiles(&mut self.registry, dt);
        combat::expire_projectiles(&mut self.registry, now);

        let collisions = self.overlaps.detect(&self.registry, &self.rules);
        for event in collisions {
            if self.state != MatchState::Playing {
                return;
            }
            self.handle_collision(event);
        }

        player::update_invincibility(&mut self.registry, &mut self.log, now);

        let mut ctx = SpawnContext {
            registry: &mut self.registry,
            rules: self.rules.as_ref(),
            rng: &mut self.rng,
            log: &mut self.log,
        };
        self.waves.tick(now, &mut ctx);
    }

    /// Full replicated view of the session
    pub fn snapshot(&self) -> MatchSnapshot {
        let summary = MatchSummary {
            state: self.state,
            wave: self.waves.state().snapshot(),
            total_score: self.total_score,
            kills: self.kills,
        };
        SnapshotBuilder::capture(summary, &self.registry, self.rules.max_health, self.clock.now())
    }

    #[cfg(test)]
    pub(crate) fn registry_mut(&mut self) -> &mut EntityRegistry {
        &mut self.registry
    }
}

/// Handle to the running match task
#[derive(Clone)]
pub struct MatchHandle {
    pub id: Uuid,
    pub input_tx: mpsc::Sender<SessionInput>,
    pub broadcast_tx: broadcast::Sender<ServerMsg>,
    published: Arc<RwLock<Arc<MatchSnapshot>>>,
}

impl MatchHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<ServerMsg> {
        self.broadcast_tx.subscribe()
    }

    /// Latest snapshot published at a tick boundary
    pub fn latest_snapshot(&self) -> Arc<MatchSnapshot> {
        self.published.read().clone()
    }

    /// Register a connection. Outer none when the match task is gone.
    pub async fn connect(&self, connection: Uuid) -> Option<Option<usize>> {
        let (reply, rx) = oneshot::channel();
        self.input_tx
            .send(SessionInput::Connect { connection, reply })
            .await
            .ok()?;
        rx.await.ok()
    }
}

/// The authoritative match task: single writer of its session
pub struct GameMatch {
    id: Uuid,
    session: MatchSession,
    input_rx: mpsc::Receiver<SessionInput>,
    broadcast_tx: broadcast::Sender<ServerMsg>,
    snapshot_builder: SnapshotBuilder,
    published: Arc<RwLock<Arc<MatchSnapshot>>>,
    highscores: Arc<dyn HighscoreStore>,
}

impl GameMatch {
    pub fn new(rules: Arc<GameConfig>, highscores: Arc<dyn HighscoreStore>) -> (Self, MatchHandle) {
        let id = Uuid::new_v4();
        let (input_tx, input_rx) = mpsc::channel(256);
        let (broadcast_tx, _) = broadcast::channel(64);

        let session = MatchSession::new(rules, Authority::Server);
        let published = Arc::new(RwLock::new(Arc::new(session.snapshot())));

        let handle = MatchHandle {
            id,
            input_tx,
            broadcast_tx: broadcast_tx.clone(),
            published: published.clone(),
        };

        let snapshot_interval = SIMULATION_TPS / SNAPSHOT_TPS;
        let game_match = Self {
            id,
            session,
            input_rx,
            broadcast_tx,
            snapshot_builder: SnapshotBuilder::new(snapshot_interval),
            published,
            highscores,
        };

        (game_match, handle)
    }

    /// Run the fixed-rate tick loop until every input sender is dropped
    pub async fn run(mut self) {
        info!(match_id = %self.id, "Match session running");

        let tick_duration = Duration::from_micros(1_000_000 / SIMULATION_TPS as u64);
        let mut tick_interval = interval(tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tick_interval.tick().await;

            if !self.process_inputs() {
                break;
            }

            let output = self.session.tick(tick_delta());
            self.dispatch(output);
        }

        info!(match_id = %self.id, "Match session stopped");
    }

    /// Drain the input queue. Returns false once the queue is closed.
    fn process_inputs(&mut self) -> bool {
        loop {
            match self.input_rx.try_recv() {
                Ok(input) => self.apply_input(input),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn apply_input(&mut self, input: SessionInput) {
        match input {
            SessionInput::Connect { connection, reply } => {
                let index = self.session.register_player(connection);
                let _ = reply.send(index);
            }
            SessionInput::Disconnect { connection } => self.session.unregister_player(connection),
            SessionInput::Client { connection, msg } => self.session.apply_request(connection, msg),
        }
    }

    fn dispatch(&mut self, output: TickOutput) {
        for command in output.commands {
            match command {
                SessionCommand::SubmitScore {
                    team_name,
                    score,
                    kills,
                    waves_reached,
                    survival_secs,
                } => {
                    let entry = HighscoreEntry::new(team_name, score).with_stats(kills, waves_reached, survival_secs);
                    submit_in_background(self.highscores.clone(), entry);
                }
            }
        }

        if !output.changes.is_empty() || !output.events.is_empty() {
            let _ = self.broadcast_tx.send(ServerMsg::Delta {
                tick: output.tick,
                changes: output.changes,
                events: output.events,
            });
        }

        if output.force_snapshot {
            self.snapshot_builder.force_next();
        }
        if self.snapshot_builder.should_send() {
            let state = self.session.snapshot();
            *self.published.write() = Arc::new(state.clone());
            let _ = self.broadcast_tx.send(self.snapshot_builder.build(output.tick, state));
        }
    }
}
