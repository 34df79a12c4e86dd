//! Player lifecycle: health, invincibility, death, respawn, lobby state and intents
//!
//! Every operation silently ignores calls without server authority, for unknown
//! indices, or in the wrong life state. Death side effects that involve other
//! components (enemy retargeting, the all-dead check) are left to the caller,
//! which sees [`DamageOutcome::Died`].

use glam::Vec2;
use tracing::{debug, info};

use crate::config::GameConfig;
use crate::util::time::SimTime;
use crate::ws::protocol::{Faction, GameEvent, StateChange};

use super::combat::{self, ProjectileSpec};
use super::physics::PhysicsSystem;
use super::registry::{EntityRegistry, PlayerRecord, ProjectileOwner, ProjectileRecord};
use super::snapshot::ChangeLog;

/// Coarse life state of a player
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifeState {
    Alive,
    Invincible,
    Dead,
}

impl LifeState {
    pub fn of(player: &PlayerRecord, now: SimTime) -> Self {
        if !player.is_alive() {
            LifeState::Dead
        } else if player.is_invincible(now) {
            LifeState::Invincible
        } else {
            LifeState::Alive
        }
    }
}

/// Result of a damage request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DamageOutcome {
    /// Not server, unknown index, invincible, or already dead
    Ignored,
    Hurt { health: i32 },
    Died,
}

pub fn take_damage(
    registry: &mut EntityRegistry,
    rules: &GameConfig,
    log: &mut ChangeLog,
    now: SimTime,
    index: usize,
    amount: i32,
) -> DamageOutcome {
    if !registry.is_server() {
        debug!(player_index = index, "Damage rejected without authority");
        return DamageOutcome::Ignored;
    }
    let Some(player) = registry.player_mut(index) else {
        return DamageOutcome::Ignored;
    };
    match LifeState::of(player, now) {
        LifeState::Dead | LifeState::Invincible => return DamageOutcome::Ignored,
        LifeState::Alive => {}
    }

    let old = player.health;
    let (health, dead) = combat::apply_damage(old, amount);
    player.health = health.min(rules.max_health);
    log.record(StateChange::PlayerHealth {
        index,
        old,
        new: player.health,
    });
    log.emit(GameEvent::PlayerHit {
        index,
        damage: old - player.health,
        health: player.health,
    });

    if dead {
        player.active = false;
        player.move_input = Vec2::ZERO;
        player.fire_requested = false;
        info!(player_index = index, "Player died");
        log.emit(GameEvent::PlayerDied { index });
        return DamageOutcome::Died;
    }

    player.invincible_until = now + rules.invincibility_duration;
    if rules.invincibility_duration > 0.0 {
        set_invincible_flag(player, log, true);
    }
    DamageOutcome::Hurt { health: player.health }
}

/// Heal a living player, clamped to max health. Returns true if applied.
#[cfg(test)]
pub fn heal(registry: &mut EntityRegistry, rules: &GameConfig, log: &mut ChangeLog, index: usize, amount: i32) -> bool {
    if !registry.is_server() {
        return false;
    }
    let Some(player) = registry.player_mut(index) else {
        return false;
    };
    if !player.is_alive() {
        return false;
    }
    let old = player.health;
    player.health = combat::apply_heal(old, amount, rules.max_health);
    log.record(StateChange::PlayerHealth {
        index,
        old,
        new: player.health,
    });
    true
}

/// Spawn position for a lobby slot. Falls back to the player's original origin.
pub fn spawn_point_for(rules: &GameConfig, index: usize, origin: Vec2) -> Vec2 {
    if rules.player_spawn_points.is_empty() {
        return origin;
    }
    let slot = index.min(rules.player_spawn_points.len() - 1);
    rules.player_spawn_points[slot]
}

/// Restore full health at the spawn point and re-enable the player
pub fn respawn(registry: &mut EntityRegistry, rules: &GameConfig, log: &mut ChangeLog, index: usize) -> bool {
    if !registry.is_server() {
        return false;
    }
    let Some(player) = registry.player_mut(index) else {
        return false;
    };

    let old = player.health;
    player.health = rules.max_health;
    log.record(StateChange::PlayerHealth {
        index,
        old,
        new: player.health,
    });

    player.invincible_until = 0.0;
    set_invincible_flag(player, log, false);

    player.position = spawn_point_for(rules, index, player.spawn_origin);
    player.move_input = Vec2::ZERO;
    player.fire_requested = false;
    player.next_fire_time = 0.0;
    player.active = true;

    log.emit(GameEvent::PlayerRespawned {
        index,
        position: player.position,
    });
    true
}

/// Clear replicated invincibility flags whose window has passed
pub fn update_invincibility(registry: &mut EntityRegistry, log: &mut ChangeLog, now: SimTime) {
    for player in registry.players_mut() {
        if player.invincible_flag && !player.is_invincible(now) {
            set_invincible_flag(player, log, false);
        }
    }
}

fn set_invincible_flag(player: &mut PlayerRecord, log: &mut ChangeLog, value: bool) {
    let old = player.invincible_flag;
    player.invincible_flag = value;
    log.record(StateChange::PlayerInvincible {
        index: player.index,
        old,
        new: value,
    });
}

/// Flip the lobby ready flag. Returns the new value.
pub fn toggle_ready(registry: &mut EntityRegistry, log: &mut ChangeLog, index: usize) -> Option<bool> {
    if !registry.is_server() {
        return None;
    }
    let player = registry.player_mut(index)?;
    let old = player.ready;
    player.ready = !old;
    log.record(StateChange::PlayerReady {
        index,
        old,
        new: player.ready,
    });
    Some(player.ready)
}

/// Clear every ready flag (return to lobby)
pub fn reset_ready(registry: &mut EntityRegistry, log: &mut ChangeLog) {
    for player in registry.players_mut() {
        let old = player.ready;
        player.ready = false;
        log.record(StateChange::PlayerReady {
            index: player.index,
            old,
            new: false,
        });
    }
}

/// Set the display name once. Empty names are rejected and a set name never changes.
pub fn set_name(registry: &mut EntityRegistry, log: &mut ChangeLog, index: usize, name: &str) -> bool {
    if !registry.is_server() {
        return false;
    }
    let name = name.trim();
    let Some(player) = registry.player_mut(index) else {
        return false;
    };
    if name.is_empty() || !player.name.is_empty() {
        return false;
    }
    player.name = name.to_string();
    log.record(StateChange::PlayerName {
        index,
        old: String::new(),
        new: player.name.clone(),
    });
    true
}

/// Replace the held movement direction
pub fn apply_move(registry: &mut EntityRegistry, index: usize, direction: Vec2) {
    if let Some(player) = registry.player_mut(index) {
        player.move_input = if direction.is_finite() { direction } else { Vec2::ZERO };
    }
}

/// Replace the aim direction. Vectors without a finite unit direction are ignored.
pub fn apply_aim(registry: &mut EntityRegistry, index: usize, direction: Vec2) {
    let Some(player) = registry.player_mut(index) else {
        return;
    };
    let Some(aim) = direction.try_normalize() else {
        return;
    };
    player.aim = aim;
    player.heading = PhysicsSystem::heading_to(Vec2::ZERO, aim);
}

/// Move every active player by its held input
pub fn move_players(registry: &mut EntityRegistry, rules: &GameConfig, dt: f64) {
    for player in registry.players_mut() {
        if !player.active || !player.is_alive() {
            continue;
        }
        player.position = PhysicsSystem::step_player(
            player.position,
            player.move_input,
            rules.player_move_speed,
            dt as f32,
            &rules.play_bounds,
        );
    }
}

/// Fire along the aim if the cooldown allows. The cooldown restarts from this shot.
pub fn try_fire(
    registry: &mut EntityRegistry,
    rules: &GameConfig,
    log: &mut ChangeLog,
    now: SimTime,
    index: usize,
) -> Option<ProjectileRecord> {
    let player = registry.player_mut(index)?;
    player.fire_requested = false;
    if !player.active || !player.is_alive() || now < player.next_fire_time {
        return None;
    }
    player.next_fire_time = now + rules.player_fire_cooldown;
    let (origin, aim) = (player.position, player.aim);

    let spec = ProjectileSpec {
        damage: rules.player_projectile_damage,
        speed: rules.player_projectile_speed,
        lifetime: rules.player_projectile_lifetime,
    };
    let projectile = combat::spawn_projectile(
        registry,
        ProjectileOwner::Player(index),
        Faction::Player,
        origin,
        aim,
        &spec,
        now,
    )?;
    log.emit(GameEvent::ProjectileFired {
        projectile_id: projectile.id,
        faction: Faction::Player,
        position: projectile.position,
        velocity: projectile.velocity,
    });
    Some(projectile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::registry::Authority;
    use assert_approx_eq::assert_approx_eq;
    use uuid::Uuid;

    fn setup() -> (EntityRegistry, GameConfig, ChangeLog) {
        let mut registry = EntityRegistry::new(Authority::Server);
        registry.insert_player(Uuid::new_v4(), Vec2::ZERO, 100);
        registry.insert_player(Uuid::new_v4(), Vec2::ZERO, 100);
        (registry, GameConfig::default(), ChangeLog::new())
    }

    fn health(registry: &EntityRegistry, index: usize) -> i32 {
        registry.player(index).map(|p| p.health).unwrap_or(-1)
    }

    #[test]
    fn test_health_stays_in_range() {
        let (mut registry, rules, mut log) = setup();
        let mut now = 0.0;
        for amount in [30, -5, 0, 45, 1000, 7] {
            take_damage(&mut registry, &rules, &mut log, now, 0, amount);
            let h = health(&registry, 0);
            assert!((0..=rules.max_health).contains(&h));
            now += 2.0;
        }
        assert_eq!(health(&registry, 0), 0);
    }

    #[test]
    fn test_hit_inside_invincibility_window_is_ignored() {
        let (mut registry, rules, mut log) = setup();
        assert_eq!(
            take_damage(&mut registry, &rules, &mut log, 10.0, 0, 10),
            DamageOutcome::Hurt { health: 90 }
        );
        assert_eq!(
            take_damage(&mut registry, &rules, &mut log, 10.5, 0, 10),
            DamageOutcome::Ignored
        );
        assert_eq!(health(&registry, 0), 90);
        assert_eq!(
            take_damage(&mut registry, &rules, &mut log, 11.0, 0, 10),
            DamageOutcome::Hurt { health: 80 }
        );
    }

    #[test]
    fn test_death_disables_player() {
        let (mut registry, rules, mut log) = setup();
        apply_move(&mut registry, 0, Vec2::X);
        assert_eq!(
            take_damage(&mut registry, &rules, &mut log, 0.0, 0, 150),
            DamageOutcome::Died
        );
        let player = registry.player(0).expect("player exists");
        assert!(!player.active);
        assert_eq!(player.move_input, Vec2::ZERO);
        assert_eq!(
            take_damage(&mut registry, &rules, &mut log, 5.0, 0, 1),
            DamageOutcome::Ignored
        );
        assert!(log.events().contains(&GameEvent::PlayerDied { index: 0 }));
    }

    #[test]
    fn test_observer_and_unknown_index_are_ignored() {
        let mut observer = EntityRegistry::new(Authority::Observer);
        observer.insert_player(Uuid::new_v4(), Vec2::ZERO, 100);
        let rules = GameConfig::default();
        let mut log = ChangeLog::new();
        assert_eq!(
            take_damage(&mut observer, &rules, &mut log, 0.0, 0, 10),
            DamageOutcome::Ignored
        );
        assert_eq!(health(&observer, 0), 100);

        let (mut registry, rules, mut log) = setup();
        assert_eq!(
            take_damage(&mut registry, &rules, &mut log, 0.0, 5, 10),
            DamageOutcome::Ignored
        );
        assert_eq!(toggle_ready(&mut registry, &mut log, 5), None);
    }

    #[test]
    fn test_heal_clamps_and_skips_dead() {
        let (mut registry, rules, mut log) = setup();
        take_damage(&mut registry, &rules, &mut log, 0.0, 0, 20);
        assert!(heal(&mut registry, &rules, &mut log, 0, 500));
        assert_eq!(health(&registry, 0), 100);

        take_damage(&mut registry, &rules, &mut log, 5.0, 1, 100);
        assert!(!heal(&mut registry, &rules, &mut log, 1, 10));
        assert_eq!(health(&registry, 1), 0);
    }

    #[test]
    fn test_respawn_restores_player_at_spawn_point() {
        let (mut registry, rules, mut log) = setup();
        take_damage(&mut registry, &rules, &mut log, 0.0, 1, 100);
        assert!(respawn(&mut registry, &rules, &mut log, 1));
        let player = registry.player(1).expect("player exists");
        assert_eq!(player.health, 100);
        assert!(player.active);
        assert!(!player.is_invincible(0.0));
        assert_eq!(player.position, rules.player_spawn_points[1]);
    }

    #[test]
    fn test_spawn_point_fallbacks() {
        let mut rules = GameConfig::default();
        rules.player_spawn_points = vec![Vec2::new(1.0, 1.0)];
        assert_eq!(spawn_point_for(&rules, 1, Vec2::ZERO), Vec2::new(1.0, 1.0));
        rules.player_spawn_points.clear();
        assert_eq!(spawn_point_for(&rules, 0, Vec2::new(7.0, 7.0)), Vec2::new(7.0, 7.0));
    }

    #[test]
    fn test_invincibility_flag_expires() {
        let (mut registry, rules, mut log) = setup();
        take_damage(&mut registry, &rules, &mut log, 0.0, 0, 10);
        assert!(registry.player(0).map(|p| p.invincible_flag).unwrap_or(false));
        log.drain();

        update_invincibility(&mut registry, &mut log, 0.5);
        assert!(log.changes().is_empty());
        update_invincibility(&mut registry, &mut log, 1.0);
        assert_eq!(
            log.changes(),
            &[StateChange::PlayerInvincible {
                index: 0,
                old: true,
                new: false
            }]
        );
    }

    #[test]
    fn test_toggle_ready_twice_restores_state() {
        let (mut registry, _, mut log) = setup();
        assert_eq!(toggle_ready(&mut registry, &mut log, 0), Some(true));
        assert_eq!(toggle_ready(&mut registry, &mut log, 0), Some(false));
        assert!(!registry.player(0).map(|p| p.ready).unwrap_or(true));
    }

    #[test]
    fn test_name_is_set_once() {
        let (mut registry, _, mut log) = setup();
        assert!(!set_name(&mut registry, &mut log, 0, "   "));
        assert!(set_name(&mut registry, &mut log, 0, " Ada "));
        assert!(!set_name(&mut registry, &mut log, 0, "Grace"));
        assert_eq!(registry.player(0).map(|p| p.name.as_str()), Some("Ada"));
    }

    #[test]
    fn test_fire_respects_cooldown_from_last_shot() {
        let (mut registry, rules, mut log) = setup();
        apply_aim(&mut registry, 0, Vec2::new(0.0, 3.0));
        let shot = try_fire(&mut registry, &rules, &mut log, 1.0, 0).expect("first shot");
        assert_eq!(shot.velocity, Vec2::new(0.0, rules.player_projectile_speed));
        assert!(try_fire(&mut registry, &rules, &mut log, 1.2, 0).is_none());
        assert!(try_fire(&mut registry, &rules, &mut log, 1.5, 0).is_some());
        assert_eq!(registry.projectile_count(Faction::Player), 2);
    }

    #[test]
    fn test_move_players_skips_dead() {
        let (mut registry, rules, mut log) = setup();
        apply_move(&mut registry, 0, Vec2::X);
        apply_move(&mut registry, 1, Vec2::X);
        take_damage(&mut registry, &rules, &mut log, 0.0, 1, 100);
        apply_move(&mut registry, 1, Vec2::X);

        move_players(&mut registry, &rules, 1.0);
        assert_eq!(registry.player(0).map(|p| p.position), Some(Vec2::new(5.0, 0.0)));
        assert_eq!(registry.player(1).map(|p| p.position), Some(Vec2::ZERO));
    }

    #[test]
    fn test_default_heading_points_along_aim() {
        let (registry, _, _) = setup();
        let player = registry.player(0).expect("player exists");
        let facing = PhysicsSystem::heading_vector(player.heading);
        assert_approx_eq!(facing.x, player.aim.x, 1e-6);
        assert_approx_eq!(facing.y, player.aim.y, 1e-6);
    }

    #[test]
    fn test_aim_without_unit_direction_is_ignored() {
        let (mut registry, rules, mut log) = setup();
        apply_aim(&mut registry, 0, Vec2::X);
        for bad in [Vec2::new(1e38, 1e38), Vec2::ZERO, Vec2::new(f32::NAN, 1.0)] {
            apply_aim(&mut registry, 0, bad);
            assert_eq!(registry.player(0).map(|p| p.aim), Some(Vec2::X));
        }
        assert!(try_fire(&mut registry, &rules, &mut log, 1.0, 0).is_some());
    }
}
