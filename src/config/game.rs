//! Game rules: wave pacing, health, enemy table and arena layout

use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::ConfigError;

/// Behavior stats shared by every enemy of one type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnemyBehavior {
    pub health: i32,
    pub move_speed: f32,
    /// Shots per second
    pub fire_rate: f32,
    pub projectile_speed: f32,
    pub projectile_damage: i32,
    pub projectile_lifetime: f64,
    /// Face the current target every tick
    pub track_target: bool,
    /// Walk toward the current target
    pub move_toward_target: bool,
    pub stop_distance: f32,
    /// Distance ahead of the body where projectiles spawn. Body center when unset.
    pub fire_point_offset: Option<f32>,
    /// Seconds between periodic nearest-player scans
    pub retarget_interval: f64,
}

impl Default for EnemyBehavior {
    fn default() -> Self {
        Self {
            health: 3,
            move_speed: 2.0,
            fire_rate: 2.0,
            projectile_speed: 5.0,
            projectile_damage: 1,
            projectile_lifetime: 5.0,
            track_target: true,
            move_toward_target: false,
            stop_distance: 5.0,
            fire_point_offset: None,
            retarget_interval: 2.0,
        }
    }
}

/// Spawnable enemy type with weight and score value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnemyTypeDescriptor {
    /// Client-side asset the observers instantiate for this type
    pub prefab_ref: String,
    pub name: String,
    pub spawn_weight: u32,
    pub score_value: u32,
    #[serde(default)]
    pub behavior: EnemyBehavior,
}

impl EnemyTypeDescriptor {
    pub fn new(name: &str, spawn_weight: u32, score_value: u32) -> Self {
        Self {
            prefab_ref: format!("enemies/{name}"),
            name: name.to_string(),
            spawn_weight,
            score_value,
            behavior: EnemyBehavior::default(),
        }
    }
}

/// Axis-aligned play area
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayBounds {
    pub min: Vec2,
    pub max: Vec2,
}

impl PlayBounds {
    pub fn contains(&self, point: Vec2) -> bool {
        point.x >= self.min.x && point.x <= self.max.x && point.y >= self.min.y && point.y <= self.max.y
    }

    pub fn clamp(&self, point: Vec2) -> Vec2 {
        point.clamp(self.min, self.max)
    }
}

impl Default for PlayBounds {
    fn default() -> Self {
        Self {
            min: Vec2::new(-16.0, -16.0),
            max: Vec2::new(16.0, 16.0),
        }
    }
}

/// Rules for one match session. Loaded once, immutable while a match runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    // Players
    pub max_health: i32,
    pub invincibility_duration: f64,
    pub contact_damage: i32,
    pub player_spawn_points: Vec<Vec2>,
    pub player_move_speed: f32,
    pub player_fire_cooldown: f64,
    pub player_projectile_speed: f32,
    pub player_projectile_damage: i32,
    pub player_projectile_lifetime: f64,

    // Waves
    pub base_enemies_per_wave: u32,
    pub enemy_increase_per_wave: f32,
    pub time_between_waves: f64,
    pub time_between_spawns: f64,
    pub first_wave_delay: f64,
    pub clearance_poll_interval: f64,
    pub enemy_types: Vec<EnemyTypeDescriptor>,
    pub spawn_points: Vec<Vec2>,
    pub spawn_radius: f32,

    // Arena
    pub play_bounds: PlayBounds,
    pub player_radius: f32,
    pub enemy_radius: f32,
    pub projectile_radius: f32,

    /// Fixed seed for spawn randomness. Random per session when unset.
    pub rng_seed: Option<u64>,
}

impl Default for GameConfig {
    fn default() -> Self {
        let chaser = EnemyTypeDescriptor {
            behavior: EnemyBehavior {
                move_toward_target: true,
                fire_rate: 1.0,
                ..EnemyBehavior::default()
            },
            ..EnemyTypeDescriptor::new("chaser", 1, 20)
        };
        let heavy = EnemyTypeDescriptor {
            behavior: EnemyBehavior {
                health: 6,
                fire_rate: 0.5,
                projectile_damage: 2,
                ..EnemyBehavior::default()
            },
            ..EnemyTypeDescriptor::new("heavy", 1, 30)
        };

        Self {
            max_health: 100,
            invincibility_duration: 1.0,
            contact_damage: 10,
            player_spawn_points: vec![Vec2::new(-3.0, 0.0), Vec2::new(3.0, 0.0)],
            player_move_speed: 5.0,
            player_fire_cooldown: 0.5,
            player_projectile_speed: 10.0,
            player_projectile_damage: 1,
            player_projectile_lifetime: 5.0,

            base_enemies_per_wave: 5,
            enemy_increase_per_wave: 2.0,
            time_between_waves: 10.0,
            time_between_spawns: 0.5,
            first_wave_delay: 2.0,
            clearance_poll_interval: 0.5,
            enemy_types: vec![EnemyTypeDescriptor::new("grunt", 2, 10), chaser, heavy],
            spawn_points: vec![
                Vec2::new(-12.0, 12.0),
                Vec2::new(12.0, 12.0),
                Vec2::new(-12.0, -12.0),
                Vec2::new(12.0, -12.0),
            ],
            spawn_radius: 2.0,

            play_bounds: PlayBounds::default(),
            player_radius: 0.5,
            enemy_radius: 0.5,
            projectile_radius: 0.1,

            rng_seed: None,
        }
    }
}

impl GameConfig {
    /// Read rules from a JSON file; missing fields keep their defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Startup validation. A match must not begin with a config that cannot spawn.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enemy_types.is_empty() {
            return Err(ConfigError::NoEnemyTypes);
        }
        if let Some(zero) = self.enemy_types.iter().find(|t| t.spawn_weight == 0) {
            return Err(ConfigError::ZeroSpawnWeight(zero.name.clone()));
        }
        if self.spawn_points.is_empty() {
            return Err(ConfigError::NoSpawnPoints);
        }
        if self.max_health <= 0 {
            return Err(ConfigError::Invalid {
                field: "max_health",
                reason: "must be positive",
            });
        }
        if self.invincibility_duration < 0.0 {
            return Err(ConfigError::Invalid {
                field: "invincibility_duration",
                reason: "must not be negative",
            });
        }
        if self.clearance_poll_interval <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "clearance_poll_interval",
                reason: "must be positive",
            });
        }
        if self.time_between_spawns < 0.0 || self.time_between_waves < 0.0 || self.first_wave_delay < 0.0 {
            return Err(ConfigError::Invalid {
                field: "wave timing",
                reason: "delays must not be negative",
            });
        }
        if self.enemy_types.iter().any(|t| t.behavior.health <= 0) {
            return Err(ConfigError::Invalid {
                field: "enemy_types.behavior.health",
                reason: "must be positive",
            });
        }
        if self.play_bounds.min.x >= self.play_bounds.max.x || self.play_bounds.min.y >= self.play_bounds.max.y {
            return Err(ConfigError::Invalid {
                field: "play_bounds",
                reason: "min must be below max",
            });
        }
        Ok(())
    }
}
