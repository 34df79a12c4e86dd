//! Combat resolver - damage, projectiles, collision outcomes

use glam::Vec2;
use tracing::debug;

use crate::util::time::SimTime;
use crate::ws::protocol::{EntityId, Faction};

use super::physics::{ColliderTag, CollisionEvent};
use super::registry::{EnemyRecord, EntityKind, EntityRegistry, ProjectileOwner, ProjectileRecord};

/// Launch parameters for a projectile
#[derive(Debug, Clone, Copy)]
pub struct ProjectileSpec {
    pub damage: i32,
    pub speed: f32,
    /// Seconds before the projectile expires
    pub lifetime: f64,
}

/// Apply damage to health, returns (new_health, is_dead)
pub fn apply_damage(current_health: i32, damage: i32) -> (i32, bool) {
    let new_health = current_health.saturating_sub(damage.max(0)).max(0);
    (new_health, new_health <= 0)
}

/// Apply healing, capped at `max_health`
#[cfg(test)]
pub fn apply_heal(current_health: i32, amount: i32, max_health: i32) -> i32 {
    current_health.saturating_add(amount.max(0)).clamp(0, max_health)
}

/// Result of damaging an enemy
#[derive(Debug)]
pub enum EnemyHit {
    /// Handle already gone, or not the server
    Missing,
    Wounded { remaining: i32 },
    /// Health reached zero; the record has been removed from the registry
    Killed(EnemyRecord),
}

/// Apply damage to an enemy. Dead enemies are removed immediately.
pub fn damage_enemy(registry: &mut EntityRegistry, id: EntityId, damage: i32) -> EnemyHit {
    if !registry.is_server() {
        return EnemyHit::Missing;
    }
    let Some(enemy) = registry.enemy_mut(id) else {
        debug!(enemy_id = %id, "Damage against despawned enemy ignored");
        return EnemyHit::Missing;
    };

    let (remaining, killed) = apply_damage(enemy.health, damage);
    enemy.health = remaining;
    if !killed {
        return EnemyHit::Wounded { remaining };
    }

    match registry.remove_enemy(id) {
        Some(record) => EnemyHit::Killed(record),
        None => EnemyHit::Missing,
    }
}

/// Spawn a projectile travelling along `direction`. Returns none for a zero direction.
pub fn spawn_projectile(
    registry: &mut EntityRegistry,
    owner: ProjectileOwner,
    faction: Faction,
    origin: Vec2,
    direction: Vec2,
    spec: &ProjectileSpec,
    now: SimTime,
) -> Option<ProjectileRecord> {
    let direction = direction.normalize_or_zero();
    if direction == Vec2::ZERO {
        return None;
    }
    let projectile = ProjectileRecord {
        id: registry.allocate_id(),
        owner,
        faction,
        damage: spec.damage,
        expires_at: now + spec.lifetime,
        position: origin,
        velocity: direction * spec.speed,
    };
    registry.insert_projectile(projectile.clone());
    Some(projectile)
}

/// Move every projectile by its velocity
pub fn advance_projectiles(registry: &mut EntityRegistry, dt: f64) {
    let dt = dt as f32;
    for projectile in registry.projectiles_mut() {
        projectile.position += projectile.velocity * dt;
    }
}

/// Remove projectiles whose lifetime ran out. Returns the removed handles.
pub fn expire_projectiles(registry: &mut EntityRegistry, now: SimTime) -> Vec<EntityId> {
    let expired: Vec<EntityId> = registry
        .projectiles()
        .filter(|p| now >= p.expires_at)
        .map(|p| p.id)
        .collect();
    for id in &expired {
        registry.remove_projectile(*id);
    }
    expired
}

/// Gameplay meaning of one collision-outcome event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contact {
    ProjectileHitEnemy { projectile: EntityId, enemy: EntityId },
    EnemyTouchedPlayer { enemy: EntityId, player: usize },
    ProjectileHitPlayer { projectile: EntityId, player: usize },
    ProjectileOutOfPlay { projectile: EntityId },
    Ignored,
}

/// Classify an overlap-begin event against the current registry.
/// Either side may be the subject; handles that no longer exist, or whose
/// faction does not match the reported tag, yield [`Contact::Ignored`].
pub fn classify(event: &CollisionEvent, registry: &EntityRegistry) -> Contact {
    let Some(subject) = registry.kind_of(event.subject) else {
        return Contact::Ignored;
    };

    if matches!(event.other_tag, ColliderTag::Wall | ColliderTag::LeftPlayArea) {
        return match subject {
            EntityKind::Projectile(_) => Contact::ProjectileOutOfPlay {
                projectile: event.subject,
            },
            _ => Contact::Ignored,
        };
    }

    let other = registry.kind_of(event.other);
    match (subject, event.other_tag, other) {
        (EntityKind::Enemy, ColliderTag::PlayerProjectile, Some(EntityKind::Projectile(Faction::Player))) => {
            Contact::ProjectileHitEnemy {
                projectile: event.other,
                enemy: event.subject,
            }
        }
        (EntityKind::Projectile(Faction::Player), ColliderTag::Enemy, Some(EntityKind::Enemy)) => {
            Contact::ProjectileHitEnemy {
                projectile: event.subject,
                enemy: event.other,
            }
        }
        (EntityKind::Enemy, ColliderTag::Player, Some(EntityKind::Player(player))) => Contact::EnemyTouchedPlayer {
            enemy: event.subject,
            player,
        },
        (EntityKind::Player(player), ColliderTag::Enemy, Some(EntityKind::Enemy)) => Contact::EnemyTouchedPlayer {
            enemy: event.other,
            player,
        },
        (EntityKind::Player(player), ColliderTag::EnemyProjectile, Some(EntityKind::Projectile(Faction::Enemy))) => {
            Contact::ProjectileHitPlayer {
                projectile: event.other,
                player,
            }
        }
        (EntityKind::Projectile(Faction::Enemy), ColliderTag::Player, Some(EntityKind::Player(player))) => {
            Contact::ProjectileHitPlayer {
                projectile: event.subject,
                player,
            }
        }
        _ => Contact::Ignored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnemyBehavior;
    use crate::game::registry::Authority;
    use uuid::Uuid;

    fn spawn_enemy(registry: &mut EntityRegistry, health: i32) -> EntityId {
        let id = registry.allocate_id();
        registry.insert_enemy(EnemyRecord {
            id,
            type_name: "grunt".to_string(),
            health,
            score_value: 10,
            target: None,
            next_fire_time: 0.0,
            next_retarget_time: 0.0,
            position: Vec2::ZERO,
            heading: 0.0,
            behavior: EnemyBehavior::default(),
        })
    }

    fn spec() -> ProjectileSpec {
        ProjectileSpec {
            damage: 1,
            speed: 10.0,
            lifetime: 5.0,
        }
    }

    #[test]
    fn test_apply_damage_clamps_at_zero() {
        assert_eq!(apply_damage(5, 3), (2, false));
        assert_eq!(apply_damage(5, 10), (0, true));
        assert_eq!(apply_damage(5, -4), (5, false));
        assert_eq!(apply_damage(i32::MIN + 1, i32::MAX), (0, true));
    }

    #[test]
    fn test_apply_heal_clamps_at_max() {
        assert_eq!(apply_heal(90, 5, 100), 95);
        assert_eq!(apply_heal(90, 50, 100), 100);
        assert_eq!(apply_heal(90, -50, 100), 90);
    }

    #[test]
    fn test_enemy_dies_after_three_hits() {
        let mut registry = EntityRegistry::new(Authority::Server);
        let id = spawn_enemy(&mut registry, 3);

        assert!(matches!(damage_enemy(&mut registry, id, 1), EnemyHit::Wounded { remaining: 2 }));
        assert!(matches!(damage_enemy(&mut registry, id, 1), EnemyHit::Wounded { remaining: 1 }));
        match damage_enemy(&mut registry, id, 1) {
            EnemyHit::Killed(record) => assert_eq!(record.score_value, 10),
            other => panic!("expected kill, got {other:?}"),
        }
        assert!(!registry.contains_enemy(id));
        assert!(matches!(damage_enemy(&mut registry, id, 1), EnemyHit::Missing));
    }

    #[test]
    fn test_observer_cannot_damage() {
        let mut registry = EntityRegistry::new(Authority::Observer);
        let id = spawn_enemy(&mut registry, 3);
        assert!(matches!(damage_enemy(&mut registry, id, 1), EnemyHit::Missing));
        assert_eq!(registry.enemy(id).map(|e| e.health), Some(3));
    }

    #[test]
    fn test_projectile_moves_and_expires() {
        let mut registry = EntityRegistry::new(Authority::Server);
        let projectile = spawn_projectile(
            &mut registry,
            ProjectileOwner::Player(0),
            Faction::Player,
            Vec2::ZERO,
            Vec2::new(0.0, 2.0),
            &spec(),
            1.0,
        )
        .expect("non-zero direction spawns");
        assert_eq!(projectile.expires_at, 6.0);
        assert_eq!(projectile.velocity, Vec2::new(0.0, 10.0));

        advance_projectiles(&mut registry, 0.5);
        assert_eq!(registry.projectile(projectile.id).map(|p| p.position), Some(Vec2::new(0.0, 5.0)));

        assert!(expire_projectiles(&mut registry, 5.9).is_empty());
        assert_eq!(expire_projectiles(&mut registry, 6.0), vec![projectile.id]);
    }

    #[test]
    fn test_zero_direction_does_not_spawn() {
        let mut registry = EntityRegistry::new(Authority::Server);
        let spawned = spawn_projectile(
            &mut registry,
            ProjectileOwner::Player(0),
            Faction::Player,
            Vec2::ZERO,
            Vec2::ZERO,
            &spec(),
            0.0,
        );
        assert!(spawned.is_none());
        assert_eq!(registry.projectile_count(Faction::Player), 0);
    }

    #[test]
    fn test_classify_is_symmetric() {
        let mut registry = EntityRegistry::new(Authority::Server);
        registry.insert_player(Uuid::new_v4(), Vec2::ZERO, 100);
        let player_entity = registry.player(0).map(|p| p.entity).expect("player exists");
        let enemy = spawn_enemy(&mut registry, 3);
        let bullet = spawn_projectile(
            &mut registry,
            ProjectileOwner::Player(0),
            Faction::Player,
            Vec2::ZERO,
            Vec2::X,
            &spec(),
            0.0,
        )
        .map(|p| p.id)
        .expect("spawned");

        let from_enemy = CollisionEvent::new(enemy, bullet, ColliderTag::PlayerProjectile);
        let from_bullet = CollisionEvent::new(bullet, enemy, ColliderTag::Enemy);
        let expected = Contact::ProjectileHitEnemy {
            projectile: bullet,
            enemy,
        };
        assert_eq!(classify(&from_enemy, &registry), expected);
        assert_eq!(classify(&from_bullet, &registry), expected);

        let touch = CollisionEvent::new(player_entity, enemy, ColliderTag::Enemy);
        assert_eq!(
            classify(&touch, &registry),
            Contact::EnemyTouchedPlayer { enemy, player: 0 }
        );
    }

    #[test]
    fn test_classify_rejects_mismatched_or_stale_handles() {
        let mut registry = EntityRegistry::new(Authority::Server);
        let enemy = spawn_enemy(&mut registry, 3);
        let enemy_bullet = spawn_projectile(
            &mut registry,
            ProjectileOwner::Enemy(enemy),
            Faction::Enemy,
            Vec2::ZERO,
            Vec2::X,
            &spec(),
            0.0,
        )
        .map(|p| p.id)
        .expect("spawned");

        // Tag claims a player projectile but the handle is an enemy projectile
        let lying = CollisionEvent::new(enemy, enemy_bullet, ColliderTag::PlayerProjectile);
        assert_eq!(classify(&lying, &registry), Contact::Ignored);

        let stale = CollisionEvent::new(EntityId(4242), enemy, ColliderTag::Enemy);
        assert_eq!(classify(&stale, &registry), Contact::Ignored);

        let edge = CollisionEvent::new(enemy_bullet, EntityId(0), ColliderTag::LeftPlayArea);
        assert_eq!(
            classify(&edge, &registry),
            Contact::ProjectileOutOfPlay {
                projectile: enemy_bullet
            }
        );
    }
}
