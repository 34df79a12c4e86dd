//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Server-side handle of a live entity (player body, enemy or projectile)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Match lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchState {
    #[default]
    WaitingForPlayers,
    Playing,
    Finished,
}

/// Which side a projectile belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Faction {
    Player,
    Enemy,
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Held movement direction, applied every tick until replaced
    Move {
        direction: Vec2,
    },

    /// Aim direction (world space, need not be normalized)
    Aim {
        direction: Vec2,
    },

    /// Fire one shot along the current aim, subject to cooldown
    Shoot,

    /// Toggle lobby ready state. Sets the name the first time it is non-empty.
    ToggleReady {
        #[serde(default)]
        name: String,
    },

    /// Restart a finished match with the same players
    RequestRestart,

    /// Leave the results screen and go back to the lobby
    RequestReturnToLobby,

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        connection_id: Uuid,
        /// Lobby slot, none when both slots are taken (spectator)
        player_index: Option<usize>,
        server_time: u64,
    },

    /// Full authoritative state (periodic, and on every match state change)
    Snapshot {
        tick: u64,
        state: MatchSnapshot,
    },

    /// Field deltas and events applied during one tick
    Delta {
        tick: u64,
        changes: Vec<StateChange>,
        events: Vec<GameEvent>,
    },

    /// Error message
    Error {
        code: String,
        message: String,
    },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

/// One `(field, old, new)` delta of replicated state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", rename_all = "snake_case")]
pub enum StateChange {
    MatchState { old: MatchState, new: MatchState },
    CurrentWave { old: u32, new: u32 },
    EnemiesAlive { old: u32, new: u32 },
    WaveInProgress { old: bool, new: bool },
    TotalScore { old: u64, new: u64 },
    Kills { old: u32, new: u32 },
    PlayerHealth { index: usize, old: i32, new: i32 },
    PlayerInvincible { index: usize, old: bool, new: bool },
    PlayerReady { index: usize, old: bool, new: bool },
    PlayerName { index: usize, old: String, new: String },
    PlayerConnected { index: usize, old: bool, new: bool },
}

impl StateChange {
    /// True when the delta carries no actual change
    pub fn is_noop(&self) -> bool {
        match self {
            StateChange::MatchState { old, new } => old == new,
            StateChange::CurrentWave { old, new } | StateChange::EnemiesAlive { old, new } => old == new,
            StateChange::WaveInProgress { old, new }
            | StateChange::PlayerInvincible { old, new, .. }
            | StateChange::PlayerReady { old, new, .. }
            | StateChange::PlayerConnected { old, new, .. } => old == new,
            StateChange::TotalScore { old, new } => old == new,
            StateChange::Kills { old, new } => old == new,
            StateChange::PlayerHealth { old, new, .. } => old == new,
            StateChange::PlayerName { old, new, .. } => old == new,
        }
    }
}

/// Discrete gameplay events (announcements, spawns, kills)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum GameEvent {
    MatchStarted,

    MatchEnded {
        total_score: u64,
        kills: u32,
        waves_reached: u32,
    },

    WaveStarted {
        wave: u32,
        enemies: u32,
    },

    WaveCompleted {
        wave: u32,
    },

    EnemySpawned {
        enemy_id: EntityId,
        type_name: String,
        prefab_ref: String,
        position: Vec2,
    },

    EnemyKilled {
        enemy_id: EntityId,
        killer: Option<usize>,
        score_value: u32,
    },

    ProjectileFired {
        projectile_id: EntityId,
        faction: Faction,
        position: Vec2,
        velocity: Vec2,
    },

    PlayerHit {
        index: usize,
        damage: i32,
        health: i32,
    },

    PlayerDied {
        index: usize,
    },

    PlayerRespawned {
        index: usize,
        position: Vec2,
    },
}

/// Full replicated state of a match session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchSnapshot {
    pub state: MatchState,
    pub wave: WaveSnapshot,
    pub total_score: u64,
    pub kills: u32,
    pub players: Vec<PlayerSnapshot>,
    pub enemies: Vec<EnemySnapshot>,
    pub projectiles: Vec<ProjectileSnapshot>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveSnapshot {
    pub current_wave: u32,
    pub enemies_alive: u32,
    pub in_progress: bool,
}

/// Player state in a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub index: usize,
    pub entity_id: EntityId,
    pub name: String,
    pub ready: bool,
    pub connected: bool,
    pub health: i32,
    pub max_health: i32,
    pub alive: bool,
    pub invincible: bool,
    pub position: Vec2,
    /// Heading in radians
    pub heading: f32,
    pub kills: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnemySnapshot {
    pub id: EntityId,
    pub type_name: String,
    pub health: i32,
    pub position: Vec2,
    pub heading: f32,
    pub target: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectileSnapshot {
    pub id: EntityId,
    pub faction: Faction,
    pub position: Vec2,
    pub velocity: Vec2,
}
