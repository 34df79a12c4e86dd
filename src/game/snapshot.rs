//! Replication: per-tick change log and full snapshot building

use std::mem;

use crate::ws::protocol::{
    EnemySnapshot, GameEvent, MatchSnapshot, MatchState, PlayerSnapshot, ProjectileSnapshot, ServerMsg,
    StateChange, WaveSnapshot,
};

use super::registry::EntityRegistry;
use crate::util::time::SimTime;

/// Field deltas and events recorded during a tick, drained by the broadcast layer
#[derive(Debug, Default)]
pub struct ChangeLog {
    changes: Vec<StateChange>,
    events: Vec<GameEvent>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a field delta. Deltas where old equals new are dropped.
    pub fn record(&mut self, change: StateChange) {
        if !change.is_noop() {
            self.changes.push(change);
        }
    }

    pub fn emit(&mut self, event: GameEvent) {
        self.events.push(event);
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.events.is_empty()
    }

    #[cfg(test)]
    pub fn changes(&self) -> &[StateChange] {
        &self.changes
    }

    #[cfg(test)]
    pub fn events(&self) -> &[GameEvent] {
        &self.events
    }

    /// Take everything recorded so far, leaving the log empty
    pub fn drain(&mut self) -> (Vec<StateChange>, Vec<GameEvent>) {
        (mem::take(&mut self.changes), mem::take(&mut self.events))
    }
}

/// Scalar match fields included in a snapshot
#[derive(Debug, Clone, Copy)]
pub struct MatchSummary {
    pub state: MatchState,
    pub wave: WaveSnapshot,
    pub total_score: u64,
    pub kills: u32,
}

/// Builds full snapshots for network transmission
pub struct SnapshotBuilder {
    /// Tick counter since last snapshot
    ticks_since_snapshot: u32,
    /// Snapshot interval in ticks
    snapshot_interval: u32,
}

impl SnapshotBuilder {
    pub fn new(snapshot_interval: u32) -> Self {
        Self {
            ticks_since_snapshot: 0,
            snapshot_interval: snapshot_interval.max(1),
        }
    }

    /// Check if it's time to send a snapshot
    pub fn should_send(&mut self) -> bool {
        self.ticks_since_snapshot += 1;
        if self.ticks_since_snapshot >= self.snapshot_interval {
            self.ticks_since_snapshot = 0;
            true
        } else {
            false
        }
    }

    /// Force snapshot on next check (match state transitions)
    pub fn force_next(&mut self) {
        self.ticks_since_snapshot = self.snapshot_interval;
    }

    /// Capture the replicated view of a session
    pub fn capture(summary: MatchSummary, registry: &EntityRegistry, max_health: i32, now: SimTime) -> MatchSnapshot {
        let players = registry
            .players()
            .iter()
            .map(|p| PlayerSnapshot {
                index: p.index,
                entity_id: p.entity,
                name: p.name.clone(),
                ready: p.ready,
                connected: p.is_connected(),
                health: p.health,
                max_health,
                alive: p.is_alive(),
                invincible: p.is_invincible(now),
                position: p.position,
                heading: p.heading,
                kills: p.kills,
            })
            .collect();

        let enemies = registry
            .enemies()
            .map(|e| EnemySnapshot {
                id: e.id,
                type_name: e.type_name.clone(),
                health: e.health,
                position: e.position,
                heading: e.heading,
                target: e.target,
            })
            .collect();

        let projectiles = registry
            .projectiles()
            .map(|p| ProjectileSnapshot {
                id: p.id,
                faction: p.faction,
                position: p.position,
                velocity: p.velocity,
            })
            .collect();

        MatchSnapshot {
            state: summary.state,
            wave: summary.wave,
            total_score: summary.total_score,
            kills: summary.kills,
            players,
            enemies,
            projectiles,
        }
    }

    /// Wrap a captured snapshot into a wire message
    pub fn build(&self, tick: u64, state: MatchSnapshot) -> ServerMsg {
        ServerMsg::Snapshot { tick, state }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::registry::Authority;
    use glam::Vec2;
    use uuid::Uuid;

    #[test]
    fn test_change_log_skips_noops_and_drains() {
        let mut log = ChangeLog::new();
        log.record(StateChange::Kills { old: 1, new: 1 });
        log.record(StateChange::Kills { old: 1, new: 2 });
        log.emit(GameEvent::MatchStarted);

        let (changes, events) = log.drain();
        assert_eq!(changes, vec![StateChange::Kills { old: 1, new: 2 }]);
        assert_eq!(events, vec![GameEvent::MatchStarted]);
        assert!(log.is_empty());
    }

    #[test]
    fn test_snapshot_interval_and_force() {
        let mut builder = SnapshotBuilder::new(3);
        assert!(!builder.should_send());
        assert!(!builder.should_send());
        assert!(builder.should_send());

        builder.force_next();
        assert!(builder.should_send());
        assert!(!builder.should_send());
    }

    #[test]
    fn test_capture_reflects_players() {
        let mut registry = EntityRegistry::new(Authority::Server);
        registry.insert_player(Uuid::new_v4(), Vec2::new(1.0, 2.0), 100);
        if let Some(p) = registry.player_mut(0) {
            p.name = "Ada".to_string();
            p.invincible_until = 3.0;
        }

        let summary = MatchSummary {
            state: MatchState::Playing,
            wave: WaveSnapshot {
                current_wave: 2,
                enemies_alive: 0,
                in_progress: true,
            },
            total_score: 40,
            kills: 3,
        };
        let snapshot = SnapshotBuilder::capture(summary, &registry, 100, 1.0);
        assert_eq!(snapshot.players.len(), 1);
        assert_eq!(snapshot.players[0].name, "Ada");
        assert!(snapshot.players[0].invincible);
        assert_eq!(snapshot.players[0].position, Vec2::new(1.0, 2.0));
        assert_eq!(snapshot.wave.current_wave, 2);

        match SnapshotBuilder::new(3).build(9, snapshot) {
            ServerMsg::Snapshot { tick, state } => {
                assert_eq!(tick, 9);
                assert_eq!(state.total_score, 40);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
