//! Entity registry - indexed collections of live server-side handles
//!
//! Players are kept in a dense `Vec` indexed by lobby slot. Enemies and
//! projectiles live in ordered maps keyed by [`EntityId`], so iteration order
//! is creation order and every lookup is by handle rather than by scanning.

use glam::Vec2;
use std::collections::BTreeMap;
use std::f32::consts::FRAC_PI_2;
use uuid::Uuid;

use crate::config::EnemyBehavior;
use crate::util::time::SimTime;
use crate::ws::protocol::{EntityId, Faction};

/// Number of lobby slots
pub const MAX_PLAYERS: usize = 2;

/// Whether this process may mutate canonical state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    Server,
    /// Read-only replica; the server binary never builds one
    #[cfg(test)]
    Observer,
}

impl Authority {
    pub fn is_server(self) -> bool {
        self == Authority::Server
    }
}

/// Player state in a match (authoritative)
#[derive(Debug, Clone)]
pub struct PlayerRecord {
    pub index: usize,
    pub entity: EntityId,
    /// Authenticated connection, none once disconnected
    pub connection: Option<Uuid>,
    pub name: String,
    pub ready: bool,
    pub health: i32,
    pub invincible_until: SimTime,
    /// Last replicated invincibility flag, used to emit expiry deltas
    pub invincible_flag: bool,

    // Movement and aim
    pub position: Vec2,
    pub heading: f32,
    pub spawn_origin: Vec2,
    pub move_input: Vec2,
    pub aim: Vec2,
    /// Movement, shooting and collision enabled
    pub active: bool,

    // Shooting
    pub fire_requested: bool,
    pub next_fire_time: SimTime,

    pub kills: u32,
}

impl PlayerRecord {
    pub fn new(index: usize, entity: EntityId, connection: Uuid, spawn_origin: Vec2, max_health: i32) -> Self {
        Self {
            index,
            entity,
            connection: Some(connection),
            name: String::new(),
            ready: false,
            health: max_health,
            invincible_until: 0.0,
            invincible_flag: false,
            position: spawn_origin,
            heading: FRAC_PI_2,
            spawn_origin,
            move_input: Vec2::ZERO,
            aim: Vec2::Y,
            active: true,
            fire_requested: false,
            next_fire_time: 0.0,
            kills: 0,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.health > 0
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn is_invincible(&self, now: SimTime) -> bool {
        now < self.invincible_until
    }
}

/// Enemy state (authoritative)
#[derive(Debug, Clone)]
pub struct EnemyRecord {
    pub id: EntityId,
    pub type_name: String,
    pub health: i32,
    pub score_value: u32,
    /// Weak reference by player index; re-validated before every use
    pub target: Option<usize>,
    pub next_fire_time: SimTime,
    pub next_retarget_time: SimTime,
    pub position: Vec2,
    pub heading: f32,
    pub behavior: EnemyBehavior,
}

/// Who fired a projectile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectileOwner {
    Player(usize),
    Enemy(EntityId),
}

/// Active projectile in the game
#[derive(Debug, Clone)]
pub struct ProjectileRecord {
    pub id: EntityId,
    pub owner: ProjectileOwner,
    pub faction: Faction,
    pub damage: i32,
    /// Spawn time plus lifetime
    pub expires_at: SimTime,
    pub position: Vec2,
    pub velocity: Vec2,
}

/// What a handle currently refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Player(usize),
    Enemy,
    Projectile(Faction),
}

/// Canonical set of live entities for one match session
#[derive(Debug)]
pub struct EntityRegistry {
    authority: Authority,
    next_id: u64,
    players: Vec<PlayerRecord>,
    enemies: BTreeMap<EntityId, EnemyRecord>,
    projectiles: BTreeMap<EntityId, ProjectileRecord>,
}

impl EntityRegistry {
    pub fn new(authority: Authority) -> Self {
        Self {
            authority,
            // 0 is reserved for static colliders (walls, play-area edge)
            next_id: 1,
            players: Vec::with_capacity(MAX_PLAYERS),
            enemies: BTreeMap::new(),
            projectiles: BTreeMap::new(),
        }
    }

    pub fn is_server(&self) -> bool {
        self.authority.is_server()
    }

    /// Allocate a fresh handle. Handles are never reused within a session.
    pub fn allocate_id(&mut self) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Resolve a handle to its kind, none if it no longer exists
    pub fn kind_of(&self, id: EntityId) -> Option<EntityKind> {
        if let Some(player) = self.players.iter().find(|p| p.entity == id) {
            return Some(EntityKind::Player(player.index));
        }
        if self.enemies.contains_key(&id) {
            return Some(EntityKind::Enemy);
        }
        self.projectiles.get(&id).map(|p| EntityKind::Projectile(p.faction))
    }

    // ------------------------------------------------------------------
    // Players
    // ------------------------------------------------------------------

    /// Append a player in the next dense slot. Returns none when full.
    pub fn insert_player(&mut self, connection: Uuid, spawn_origin: Vec2, max_health: i32) -> Option<usize> {
        if self.players.len() >= MAX_PLAYERS {
            return None;
        }
        let index = self.players.len();
        let entity = self.allocate_id();
        self.players
            .push(PlayerRecord::new(index, entity, connection, spawn_origin, max_health));
        Some(index)
    }

    /// Drop every player record (session reset once nobody is connected)
    pub fn clear_players(&mut self) {
        self.players.clear();
    }

    pub fn player(&self, index: usize) -> Option<&PlayerRecord> {
        self.players.get(index)
    }

    pub fn player_mut(&mut self, index: usize) -> Option<&mut PlayerRecord> {
        self.players.get_mut(index)
    }

    pub fn players(&self) -> &[PlayerRecord] {
        &self.players
    }

    pub fn players_mut(&mut self) -> impl Iterator<Item = &mut PlayerRecord> {
        self.players.iter_mut()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn player_by_connection(&self, connection: Uuid) -> Option<usize> {
        self.players
            .iter()
            .find(|p| p.connection == Some(connection))
            .map(|p| p.index)
    }

    /// True when at least one player is registered and none is alive
    pub fn all_players_dead(&self) -> bool {
        !self.players.is_empty() && self.players.iter().all(|p| !p.is_alive())
    }

    // ------------------------------------------------------------------
    // Enemies
    // ------------------------------------------------------------------

    pub fn insert_enemy(&mut self, enemy: EnemyRecord) -> EntityId {
        let id = enemy.id;
        self.enemies.insert(id, enemy);
        id
    }

    pub fn remove_enemy(&mut self, id: EntityId) -> Option<EnemyRecord> {
        self.enemies.remove(&id)
    }

    pub fn enemy(&self, id: EntityId) -> Option<&EnemyRecord> {
        self.enemies.get(&id)
    }

    pub fn enemy_mut(&mut self, id: EntityId) -> Option<&mut EnemyRecord> {
        self.enemies.get_mut(&id)
    }

    pub fn contains_enemy(&self, id: EntityId) -> bool {
        self.enemies.contains_key(&id)
    }

    pub fn enemies(&self) -> impl Iterator<Item = &EnemyRecord> {
        self.enemies.values()
    }

    pub fn enemy_ids(&self) -> Vec<EntityId> {
        self.enemies.keys().copied().collect()
    }

    #[cfg(test)]
    pub fn enemy_count(&self) -> usize {
        self.enemies.len()
    }

    // ------------------------------------------------------------------
    // Projectiles
    // ------------------------------------------------------------------

    pub fn insert_projectile(&mut self, projectile: ProjectileRecord) -> EntityId {
        let id = projectile.id;
        self.projectiles.insert(id, projectile);
        id
    }

    pub fn remove_projectile(&mut self, id: EntityId) -> Option<ProjectileRecord> {
        self.projectiles.remove(&id)
    }

    pub fn projectile(&self, id: EntityId) -> Option<&ProjectileRecord> {
        self.projectiles.get(&id)
    }

    pub fn projectiles(&self) -> impl Iterator<Item = &ProjectileRecord> {
        self.projectiles.values()
    }

    pub fn projectiles_mut(&mut self) -> impl Iterator<Item = &mut ProjectileRecord> {
        self.projectiles.values_mut()
    }

    #[cfg(test)]
    pub fn projectile_count(&self, faction: Faction) -> usize {
        self.projectiles.values().filter(|p| p.faction == faction).count()
    }

    // ------------------------------------------------------------------
    // Bulk cleanup
    // ------------------------------------------------------------------

    /// Despawn every enemy and every enemy-owned projectile.
    /// Returns (enemies removed, projectiles removed).
    pub fn despawn_hostiles(&mut self) -> (usize, usize) {
        let enemies = self.enemies.len();
        self.enemies.clear();
        let before = self.projectiles.len();
        self.projectiles.retain(|_, p| p.faction != Faction::Enemy);
        (enemies, before - self.projectiles.len())
    }

    pub fn clear_projectiles(&mut self) {
        self.projectiles.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enemy(registry: &mut EntityRegistry) -> EnemyRecord {
        EnemyRecord {
            id: registry.allocate_id(),
            type_name: "grunt".to_string(),
            health: 3,
            score_value: 10,
            target: None,
            next_fire_time: 0.0,
            next_retarget_time: 0.0,
            position: Vec2::ZERO,
            heading: 0.0,
            behavior: EnemyBehavior::default(),
        }
    }

    fn projectile(registry: &mut EntityRegistry, faction: Faction) -> ProjectileRecord {
        ProjectileRecord {
            id: registry.allocate_id(),
            owner: ProjectileOwner::Player(0),
            faction,
            damage: 1,
            expires_at: 5.0,
            position: Vec2::ZERO,
            velocity: Vec2::X,
        }
    }

    #[test]
    fn test_player_indices_are_dense_and_capped() {
        let mut registry = EntityRegistry::new(Authority::Server);
        assert_eq!(registry.insert_player(Uuid::new_v4(), Vec2::ZERO, 100), Some(0));
        assert_eq!(registry.insert_player(Uuid::new_v4(), Vec2::ZERO, 100), Some(1));
        assert_eq!(registry.insert_player(Uuid::new_v4(), Vec2::ZERO, 100), None);
        assert_eq!(registry.player_count(), 2);
    }

    #[test]
    fn test_ids_are_unique_across_kinds() {
        let mut registry = EntityRegistry::new(Authority::Server);
        registry.insert_player(Uuid::new_v4(), Vec2::ZERO, 100);
        let e = enemy(&mut registry);
        let enemy_id = registry.insert_enemy(e);
        let p = projectile(&mut registry, Faction::Player);
        let projectile_id = registry.insert_projectile(p);

        let player_entity = registry.player(0).map(|p| p.entity);
        assert_ne!(player_entity, Some(enemy_id));
        assert_ne!(enemy_id, projectile_id);
        assert_eq!(registry.kind_of(enemy_id), Some(EntityKind::Enemy));
        assert_eq!(
            registry.kind_of(projectile_id),
            Some(EntityKind::Projectile(Faction::Player))
        );
        assert_eq!(registry.kind_of(EntityId(999)), None);
    }

    #[test]
    fn test_despawn_hostiles_keeps_player_projectiles() {
        let mut registry = EntityRegistry::new(Authority::Server);
        for _ in 0..3 {
            let e = enemy(&mut registry);
            registry.insert_enemy(e);
        }
        let p = projectile(&mut registry, Faction::Enemy);
        registry.insert_projectile(p);
        let p = projectile(&mut registry, Faction::Player);
        registry.insert_projectile(p);

        assert_eq!(registry.despawn_hostiles(), (3, 1));
        assert_eq!(registry.enemy_count(), 0);
        assert_eq!(registry.projectile_count(Faction::Enemy), 0);
        assert_eq!(registry.projectile_count(Faction::Player), 1);
    }

    #[test]
    fn test_all_players_dead_requires_players() {
        let mut registry = EntityRegistry::new(Authority::Server);
        assert!(!registry.all_players_dead());
        registry.insert_player(Uuid::new_v4(), Vec2::ZERO, 100);
        assert!(!registry.all_players_dead());
        if let Some(p) = registry.player_mut(0) {
            p.health = 0;
        }
        assert!(registry.all_players_dead());
    }
}
