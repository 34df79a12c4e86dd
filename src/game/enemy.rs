//! Enemy AI controller - targeting, movement, aiming and firing

use glam::Vec2;
use tracing::debug;

use crate::config::EnemyTypeDescriptor;
use crate::util::time::SimTime;
use crate::ws::protocol::{EntityId, Faction, GameEvent};

use super::combat::{self, ProjectileSpec};
use super::physics::PhysicsSystem;
use super::registry::{EnemyRecord, EntityRegistry, ProjectileOwner};
use super::snapshot::ChangeLog;

pub struct EnemyController;

impl EnemyController {
    /// Instantiate an enemy of `descriptor` at `position` and pick its first target
    pub fn spawn(
        registry: &mut EntityRegistry,
        descriptor: &EnemyTypeDescriptor,
        position: Vec2,
        now: SimTime,
    ) -> EntityId {
        let id = registry.allocate_id();
        let behavior = descriptor.behavior.clone();
        registry.insert_enemy(EnemyRecord {
            id,
            type_name: descriptor.name.clone(),
            health: behavior.health,
            score_value: descriptor.score_value,
            target: None,
            next_fire_time: now,
            next_retarget_time: now + behavior.retarget_interval,
            position,
            heading: 0.0,
            behavior,
        });
        Self::retarget(registry, id);
        id
    }

    /// Nearest alive player to `position`; the first found wins ties
    pub fn nearest_alive_player(registry: &EntityRegistry, position: Vec2) -> Option<usize> {
        let mut best: Option<(usize, f32)> = None;
        for player in registry.players() {
            if !player.active || !player.is_alive() {
                continue;
            }
            let distance = position.distance_squared(player.position);
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((player.index, distance));
            }
        }
        best.map(|(index, _)| index)
    }

    /// Re-evaluate the target of one enemy. Missing enemies are ignored.
    pub fn retarget(registry: &mut EntityRegistry, id: EntityId) -> Option<usize> {
        let position = registry.enemy(id)?.position;
        let target = Self::nearest_alive_player(registry, position);
        if let Some(enemy) = registry.enemy_mut(id) {
            enemy.target = target;
        }
        target
    }

    /// Enemies targeting the dead player pick a new target right away
    pub fn on_player_died(registry: &mut EntityRegistry, index: usize) {
        let affected: Vec<EntityId> = registry
            .enemies()
            .filter(|e| e.target == Some(index))
            .map(|e| e.id)
            .collect();
        for id in affected {
            let target = Self::retarget(registry, id);
            debug!(enemy_id = %id, dead = index, new_target = ?target, "Enemy retargeted");
        }
    }

    /// Run one AI step for every enemy
    pub fn tick(registry: &mut EntityRegistry, log: &mut ChangeLog, now: SimTime, dt: f64) {
        if !registry.is_server() {
            return;
        }
        for id in registry.enemy_ids() {
            Self::step(registry, log, id, now, dt);
        }
    }

    fn step(registry: &mut EntityRegistry, log: &mut ChangeLog, id: EntityId, now: SimTime, dt: f64) {
        let Some(enemy) = registry.enemy(id) else {
            return;
        };

        if now >= enemy.next_retarget_time {
            let interval = enemy.behavior.retarget_interval;
            Self::retarget(registry, id);
            if let Some(enemy) = registry.enemy_mut(id) {
                enemy.next_retarget_time = now + interval;
            }
        }

        // Target is a weak reference: validate before use
        let target_position = {
            let Some(enemy) = registry.enemy(id) else {
                return;
            };
            enemy
                .target
                .and_then(|index| registry.player(index))
                .filter(|p| p.active && p.is_alive())
                .map(|p| p.position)
        };

        let Some(enemy) = registry.enemy_mut(id) else {
            return;
        };
        let Some(target_position) = target_position else {
            enemy.target = None;
            return;
        };

        let behavior = &enemy.behavior;
        if behavior.move_toward_target && enemy.position.distance(target_position) > behavior.stop_distance {
            enemy.position =
                PhysicsSystem::move_towards(enemy.position, target_position, behavior.move_speed * dt as f32);
        }

        if behavior.track_target {
            enemy.heading = PhysicsSystem::heading_to(enemy.position, target_position);
        }

        if behavior.fire_rate <= 0.0 || now < enemy.next_fire_time {
            return;
        }
        enemy.next_fire_time = now + 1.0 / f64::from(behavior.fire_rate);

        let origin = match behavior.fire_point_offset {
            Some(offset) => enemy.position + PhysicsSystem::heading_vector(enemy.heading) * offset,
            None => enemy.position,
        };
        let spec = ProjectileSpec {
            damage: behavior.projectile_damage,
            speed: behavior.projectile_speed,
            lifetime: behavior.projectile_lifetime,
        };

        if let Some(projectile) = combat::spawn_projectile(
            registry,
            ProjectileOwner::Enemy(id),
            Faction::Enemy,
            origin,
            target_position - origin,
            &spec,
            now,
        ) {
            log.emit(GameEvent::ProjectileFired {
                projectile_id: projectile.id,
                faction: Faction::Enemy,
                position: projectile.position,
                velocity: projectile.velocity,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnemyBehavior;
    use crate::game::registry::Authority;
    use assert_approx_eq::assert_approx_eq;
    use uuid::Uuid;

    fn registry_with_players(positions: &[Vec2]) -> EntityRegistry {
        let mut registry = EntityRegistry::new(Authority::Server);
        for position in positions {
            registry.insert_player(Uuid::new_v4(), *position, 100);
        }
        registry
    }

    fn descriptor(behavior: EnemyBehavior) -> EnemyTypeDescriptor {
        EnemyTypeDescriptor {
            behavior,
            ..EnemyTypeDescriptor::new("grunt", 1, 10)
        }
    }

    fn kill(registry: &mut EntityRegistry, index: usize) {
        if let Some(p) = registry.player_mut(index) {
            p.health = 0;
            p.active = false;
        }
    }

    #[test]
    fn test_spawn_targets_nearest_player() {
        let mut registry = registry_with_players(&[Vec2::new(10.0, 0.0), Vec2::new(2.0, 0.0)]);
        let id = EnemyController::spawn(&mut registry, &descriptor(EnemyBehavior::default()), Vec2::ZERO, 0.0);
        assert_eq!(registry.enemy(id).and_then(|e| e.target), Some(1));
    }

    #[test]
    fn test_tie_goes_to_first_player() {
        let registry = registry_with_players(&[Vec2::new(-3.0, 0.0), Vec2::new(3.0, 0.0)]);
        assert_eq!(EnemyController::nearest_alive_player(&registry, Vec2::ZERO), Some(0));
    }

    #[test]
    fn test_player_death_forces_retarget() {
        let mut registry = registry_with_players(&[Vec2::new(1.0, 0.0), Vec2::new(8.0, 0.0)]);
        let id = EnemyController::spawn(&mut registry, &descriptor(EnemyBehavior::default()), Vec2::ZERO, 0.0);
        assert_eq!(registry.enemy(id).and_then(|e| e.target), Some(0));

        kill(&mut registry, 0);
        EnemyController::on_player_died(&mut registry, 0);
        assert_eq!(registry.enemy(id).and_then(|e| e.target), Some(1));

        kill(&mut registry, 1);
        EnemyController::on_player_died(&mut registry, 1);
        assert_eq!(registry.enemy(id).and_then(|e| e.target), None);
    }

    #[test]
    fn test_no_target_holds_position_and_fire() {
        let mut registry = registry_with_players(&[Vec2::new(10.0, 0.0)]);
        kill(&mut registry, 0);
        let behavior = EnemyBehavior {
            move_toward_target: true,
            ..EnemyBehavior::default()
        };
        let id = EnemyController::spawn(&mut registry, &descriptor(behavior), Vec2::ZERO, 0.0);
        let mut log = ChangeLog::new();

        EnemyController::tick(&mut registry, &mut log, 0.0, 0.5);
        assert_eq!(registry.enemy(id).map(|e| e.position), Some(Vec2::ZERO));
        assert_eq!(registry.projectile_count(Faction::Enemy), 0);
        assert!(log.is_empty());
    }

    #[test]
    fn test_moves_until_stop_distance() {
        let mut registry = registry_with_players(&[Vec2::new(10.0, 0.0)]);
        let behavior = EnemyBehavior {
            move_toward_target: true,
            fire_rate: 0.0,
            ..EnemyBehavior::default()
        };
        let id = EnemyController::spawn(&mut registry, &descriptor(behavior), Vec2::ZERO, 0.0);
        let mut log = ChangeLog::new();

        EnemyController::tick(&mut registry, &mut log, 0.0, 1.0);
        let x = registry.enemy(id).map(|e| e.position.x).unwrap_or_default();
        assert_approx_eq!(x, 2.0);

        for _ in 0..10 {
            EnemyController::tick(&mut registry, &mut log, 0.0, 1.0);
        }
        // 2, 4, 6: the first position within stop distance
        let x = registry.enemy(id).map(|e| e.position.x).unwrap_or_default();
        assert!(x >= 5.0 && x <= 6.0, "stopped at {x}");
        assert_approx_eq!(
            registry.enemy(id).map(|e| e.heading).unwrap_or(1.0),
            0.0
        );
    }

    #[test]
    fn test_fire_cooldown_never_banks_shots() {
        let mut registry = registry_with_players(&[Vec2::new(0.0, 10.0)]);
        EnemyController::spawn(&mut registry, &descriptor(EnemyBehavior::default()), Vec2::ZERO, 0.0);
        let mut log = ChangeLog::new();

        EnemyController::tick(&mut registry, &mut log, 0.0, 0.0);
        assert_eq!(registry.projectile_count(Faction::Enemy), 1);
        EnemyController::tick(&mut registry, &mut log, 0.25, 0.0);
        assert_eq!(registry.projectile_count(Faction::Enemy), 1);

        // A long stall fires once, then waits a full cooldown from that shot
        EnemyController::tick(&mut registry, &mut log, 3.0, 0.0);
        assert_eq!(registry.projectile_count(Faction::Enemy), 2);
        EnemyController::tick(&mut registry, &mut log, 3.25, 0.0);
        assert_eq!(registry.projectile_count(Faction::Enemy), 2);
        EnemyController::tick(&mut registry, &mut log, 3.5, 0.0);
        assert_eq!(registry.projectile_count(Faction::Enemy), 3);

        let aimed = registry
            .projectiles()
            .all(|p| p.velocity.x.abs() < 1e-5 && p.velocity.y > 0.0);
        assert!(aimed);
    }
}
