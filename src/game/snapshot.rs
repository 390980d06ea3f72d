//! World diff building

use std::collections::HashMap;

use crate::game::physics::VehicleState;
use crate::ws::protocol::{ActorId, ActorSnapshot, WorldDiff};

use super::Actor;

/// Builds world diffs for network transmission
pub struct DiffBuilder {
    /// Tick counter since last diff
    ticks_since_diff: u32,
    /// Diff interval in ticks
    diff_interval: u32,
    /// State each actor had in the last broadcast diff
    last_sent: HashMap<ActorId, VehicleState>,
}

impl DiffBuilder {
    pub fn new(diff_interval: u32) -> Self {
        Self {
            ticks_since_diff: 0,
            diff_interval: diff_interval.max(1),
            last_sent: HashMap::new(),
        }
    }

    /// Check if it's time to send a diff
    pub fn should_send(&mut self) -> bool {
        self.ticks_since_diff += 1;
        if self.ticks_since_diff >= self.diff_interval {
            self.ticks_since_diff = 0;
            true
        } else {
            false
        }
    }

    /// Force a diff on next check
    pub fn force_next(&mut self) {
        self.ticks_since_diff = self.diff_interval;
    }

    /// Build a diff against the last broadcast state.
    ///
    /// Actors that are new or whose state differs go into `updated`; actors
    /// that were broadcast before but are gone go into `removed`.
    pub fn build(
        &mut self,
        tick: u64,
        simulated_ms: i64,
        actors: &HashMap<ActorId, Actor>,
    ) -> WorldDiff {
        let mut roster: Vec<ActorId> = actors.keys().copied().collect();
        roster.sort_unstable();

        let mut updated: Vec<ActorSnapshot> = actors
            .values()
            .filter(|actor| self.last_sent.get(&actor.id) != Some(&actor.state))
            .map(Actor::snapshot)
            .collect();
        updated.sort_unstable_by_key(|snapshot| snapshot.id);

        let mut removed: Vec<ActorId> = self
            .last_sent
            .keys()
            .filter(|id| !actors.contains_key(id))
            .copied()
            .collect();
        removed.sort_unstable();

        for id in &removed {
            self.last_sent.remove(id);
        }
        for snapshot in &updated {
            self.last_sent.insert(snapshot.id, snapshot.state);
        }

        WorldDiff {
            tick,
            simulated_ms,
            roster,
            updated,
            removed,
        }
    }
}
