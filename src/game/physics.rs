//! Arena physics: movement helpers and the overlap-begin collision feed

use glam::Vec2;
use rand::Rng;
use std::collections::HashSet;

use crate::config::{GameConfig, PlayBounds};
use crate::ws::protocol::{EntityId, Faction};

use super::registry::{EntityKind, EntityRegistry};

/// Handle used as `other` for static colliders
pub const STATIC_COLLIDER: EntityId = EntityId(0);

/// Tag of the `other` collider in a collision-outcome event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColliderTag {
    Player,
    Enemy,
    PlayerProjectile,
    EnemyProjectile,
    Wall,
    LeftPlayArea,
}

impl ColliderTag {
    /// Tag a live entity presents to the other side of an overlap
    pub fn of(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Player(_) => ColliderTag::Player,
            EntityKind::Enemy => ColliderTag::Enemy,
            EntityKind::Projectile(Faction::Player) => ColliderTag::PlayerProjectile,
            EntityKind::Projectile(Faction::Enemy) => ColliderTag::EnemyProjectile,
        }
    }

    /// Static collider a projectile crosses when it leaves the bounds.
    /// Enemy fire stops at the arena walls, player fire at the edge of play.
    pub fn boundary_for(faction: Faction) -> Self {
        match faction {
            Faction::Player => ColliderTag::LeftPlayArea,
            Faction::Enemy => ColliderTag::Wall,
        }
    }
}

/// One overlap-begin notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollisionEvent {
    pub subject: EntityId,
    pub other: EntityId,
    pub other_tag: ColliderTag,
}

impl CollisionEvent {
    pub fn new(subject: EntityId, other: EntityId, other_tag: ColliderTag) -> Self {
        Self {
            subject,
            other,
            other_tag,
        }
    }
}

/// Stateless movement and geometry helpers
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Step `from` toward `to` by at most `max_step`, never overshooting
    pub fn move_towards(from: Vec2, to: Vec2, max_step: f32) -> Vec2 {
        let offset = to - from;
        let distance = offset.length();
        if distance <= max_step || distance <= f32::EPSILON {
            return to;
        }
        from + offset / distance * max_step
    }

    /// Heading in radians from `from` toward `to`
    pub fn heading_to(from: Vec2, to: Vec2) -> f32 {
        let offset = to - from;
        offset.y.atan2(offset.x)
    }

    /// Unit vector for a heading in radians
    pub fn heading_vector(heading: f32) -> Vec2 {
        Vec2::new(heading.cos(), heading.sin())
    }

    /// Uniform point inside a disk of `radius` centered at the origin
    pub fn random_point_in_disk<R: Rng + ?Sized>(rng: &mut R, radius: f32) -> Vec2 {
        if radius <= 0.0 {
            return Vec2::ZERO;
        }
        let angle = rng.gen_range(0.0..std::f32::consts::TAU);
        let distance = radius * rng.gen::<f32>().sqrt();
        Vec2::new(angle.cos(), angle.sin()) * distance
    }

    /// Circle-circle overlap test
    pub fn circles_overlap(a: Vec2, radius_a: f32, b: Vec2, radius_b: f32) -> bool {
        let combined = radius_a + radius_b;
        a.distance_squared(b) <= combined * combined
    }

    /// Advance a player by its held input; input longer than unit length is clamped
    pub fn step_player(position: Vec2, input: Vec2, speed: f32, dt: f32, bounds: &PlayBounds) -> Vec2 {
        let direction = input.clamp_length_max(1.0);
        bounds.clamp(position + direction * speed * dt)
    }
}

/// Produces overlap-begin events from the registry each tick.
/// Pairs overlapping on the previous pass are not reported again.
#[derive(Debug, Default)]
pub struct OverlapDetector {
    active: HashSet<(EntityId, EntityId)>,
}

impl OverlapDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget all tracked pairs (match reset)
    pub fn clear(&mut self) {
        self.active.clear();
    }

    pub fn detect(&mut self, registry: &EntityRegistry, rules: &GameConfig) -> Vec<CollisionEvent> {
        let mut current = HashSet::new();
        let mut events = Vec::new();

        let players: Vec<_> = registry
            .players()
            .iter()
            .filter(|p| p.active && p.is_alive())
            .collect();

        for enemy in registry.enemies() {
            for player in &players {
                if PhysicsSystem::circles_overlap(enemy.position, rules.enemy_radius, player.position, rules.player_radius) {
                    let pair = (enemy.id, player.entity);
                    if !self.active.contains(&pair) {
                        events.push(CollisionEvent::new(
                            enemy.id,
                            player.entity,
                            ColliderTag::of(EntityKind::Player(player.index)),
                        ));
                    }
                    current.insert(pair);
                }
            }
        }

        for projectile in registry.projectiles() {
            if !rules.play_bounds.contains(projectile.position) {
                let pair = (projectile.id, STATIC_COLLIDER);
                if !self.active.contains(&pair) {
                    events.push(CollisionEvent::new(
                        projectile.id,
                        STATIC_COLLIDER,
                        ColliderTag::boundary_for(projectile.faction),
                    ));
                }
                current.insert(pair);
                continue;
            }

            match projectile.faction {
                Faction::Player => {
                    for enemy in registry.enemies() {
                        if PhysicsSystem::circles_overlap(
                            projectile.position,
                            rules.projectile_radius,
                            enemy.position,
                            rules.enemy_radius,
                        ) {
                            let pair = (enemy.id, projectile.id);
                            if !self.active.contains(&pair) {
                                events.push(CollisionEvent::new(
                                    enemy.id,
                                    projectile.id,
                                    ColliderTag::of(EntityKind::Projectile(projectile.faction)),
                                ));
                            }
                            current.insert(pair);
                        }
                    }
                }
                Faction::Enemy => {
                    for player in &players {
                        if PhysicsSystem::circles_overlap(
                            projectile.position,
                            rules.projectile_radius,
                            player.position,
                            rules.player_radius,
                        ) {
                            let pair = (player.entity, projectile.id);
                            if !self.active.contains(&pair) {
                                events.push(CollisionEvent::new(
                                    player.entity,
                                    projectile.id,
                                    ColliderTag::of(EntityKind::Projectile(projectile.faction)),
                                ));
                            }
                            current.insert(pair);
                        }
                    }
                }
            }
        }

        self.active = current;
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnemyBehavior;
    use crate::game::registry::{Authority, EnemyRecord, ProjectileOwner, ProjectileRecord};
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use uuid::Uuid;

    fn enemy_at(registry: &mut EntityRegistry, position: Vec2) -> EntityId {
        let id = registry.allocate_id();
        registry.insert_enemy(EnemyRecord {
            id,
            type_name: "grunt".to_string(),
            health: 3,
            score_value: 10,
            target: None,
            next_fire_time: 0.0,
            next_retarget_time: 0.0,
            position,
            heading: 0.0,
            behavior: EnemyBehavior::default(),
        })
    }

    fn projectile_at(registry: &mut EntityRegistry, faction: Faction, position: Vec2) -> EntityId {
        let id = registry.allocate_id();
        registry.insert_projectile(ProjectileRecord {
            id,
            owner: ProjectileOwner::Player(0),
            faction,
            damage: 1,
            expires_at: 5.0,
            position,
            velocity: Vec2::ZERO,
        })
    }

    #[test]
    fn test_move_towards_never_overshoots() {
        let target = Vec2::new(1.0, 0.0);
        assert_eq!(PhysicsSystem::move_towards(Vec2::ZERO, target, 5.0), target);
        let step = PhysicsSystem::move_towards(Vec2::ZERO, Vec2::new(10.0, 0.0), 2.0);
        assert_approx_eq!(step.x, 2.0);
        assert_approx_eq!(step.y, 0.0);
    }

    #[test]
    fn test_heading_to() {
        assert_approx_eq!(PhysicsSystem::heading_to(Vec2::ZERO, Vec2::Y), std::f32::consts::FRAC_PI_2);
        assert_approx_eq!(PhysicsSystem::heading_to(Vec2::ZERO, -Vec2::X), std::f32::consts::PI);
    }

    #[test]
    fn test_disk_points_stay_inside_radius() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..1000 {
            let p = PhysicsSystem::random_point_in_disk(&mut rng, 2.0);
            assert!(p.length() <= 2.0 + 1e-5);
        }
        assert_eq!(PhysicsSystem::random_point_in_disk(&mut rng, 0.0), Vec2::ZERO);
    }

    #[test]
    fn test_step_player_clamps_input_and_bounds() {
        let bounds = PlayBounds::default();
        let moved = PhysicsSystem::step_player(Vec2::ZERO, Vec2::new(3.0, 4.0), 5.0, 1.0, &bounds);
        assert_approx_eq!(moved.length(), 5.0, 1e-4);

        let edge = PhysicsSystem::step_player(Vec2::new(15.9, 0.0), Vec2::X, 5.0, 1.0, &bounds);
        assert_eq!(edge, Vec2::new(16.0, 0.0));
    }

    #[test]
    fn test_overlap_reports_begin_only_once() {
        let rules = GameConfig::default();
        let mut registry = EntityRegistry::new(Authority::Server);
        let enemy = enemy_at(&mut registry, Vec2::new(5.0, 5.0));
        let bullet = projectile_at(&mut registry, Faction::Player, Vec2::new(5.2, 5.0));

        let mut detector = OverlapDetector::new();
        let first = detector.detect(&registry, &rules);
        assert_eq!(first, vec![CollisionEvent::new(enemy, bullet, ColliderTag::PlayerProjectile)]);
        assert!(detector.detect(&registry, &rules).is_empty());
    }

    #[test]
    fn test_overlap_player_contacts_and_edges() {
        let rules = GameConfig::default();
        let mut registry = EntityRegistry::new(Authority::Server);
        registry.insert_player(Uuid::new_v4(), Vec2::ZERO, 100);
        let player = registry.player(0).map(|p| p.entity).expect("player exists");
        let enemy = enemy_at(&mut registry, Vec2::new(0.5, 0.0));
        let hostile = projectile_at(&mut registry, Faction::Enemy, Vec2::new(-0.3, 0.0));
        let stray = projectile_at(&mut registry, Faction::Player, Vec2::new(20.0, 0.0));
        let wild = projectile_at(&mut registry, Faction::Enemy, Vec2::new(0.0, -20.0));

        let events = OverlapDetector::new().detect(&registry, &rules);
        assert!(events.contains(&CollisionEvent::new(enemy, player, ColliderTag::Player)));
        assert!(events.contains(&CollisionEvent::new(player, hostile, ColliderTag::EnemyProjectile)));
        assert!(events.contains(&CollisionEvent::new(stray, STATIC_COLLIDER, ColliderTag::LeftPlayArea)));
        assert!(events.contains(&CollisionEvent::new(wild, STATIC_COLLIDER, ColliderTag::Wall)));
        assert_eq!(events.len(), 4);
    }

    #[test]
    fn test_inactive_players_do_not_collide() {
        let rules = GameConfig::default();
        let mut registry = EntityRegistry::new(Authority::Server);
        registry.insert_player(Uuid::new_v4(), Vec2::ZERO, 100);
        if let Some(p) = registry.player_mut(0) {
            p.active = false;
        }
        enemy_at(&mut registry, Vec2::ZERO);
        assert!(OverlapDetector::new().detect(&registry, &rules).is_empty());
    }

    #[test]
    fn test_tags_follow_entity_kind() {
        assert_eq!(ColliderTag::of(EntityKind::Player(1)), ColliderTag::Player);
        assert_eq!(ColliderTag::of(EntityKind::Enemy), ColliderTag::Enemy);
        assert_eq!(
            ColliderTag::of(EntityKind::Projectile(Faction::Enemy)),
            ColliderTag::EnemyProjectile
        );
    }
}
