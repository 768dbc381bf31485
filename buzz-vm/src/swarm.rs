//! Swarm membership bookkeeping.
//!
//! Each robot keeps the set of swarms it belongs to, plus a registry of
//! what it knows about its neighbors' memberships. Registry entries age
//! every round and are evicted once stale, so a robot that falls silent
//! stops counting as kin.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

/// Rounds a registry entry survives without being refreshed.
pub const DEFAULT_MAX_AGE: u8 = 10;

/// The swarms this robot currently belongs to.
#[derive(Debug, Default, Clone)]
pub struct SwarmMembers {
    ids: BTreeSet<u16>,
}

impl SwarmMembers {
    /// Create an empty membership set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Join a swarm; returns `true` when membership changed.
    pub fn join(&mut self, id: u16) -> bool {
        self.ids.insert(id)
    }

    /// Leave a swarm; returns `true` when membership changed.
    pub fn leave(&mut self, id: u16) -> bool {
        self.ids.remove(&id)
    }

    /// Whether the robot is in the swarm.
    pub fn contains(&self, id: u16) -> bool {
        self.ids.contains(&id)
    }

    /// Number of joined swarms.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// `true` when no swarm is joined.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Iterate joined ids in order.
    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.ids.iter().copied()
    }
}

#[derive(Debug, Clone)]
struct NeighborEntry {
    swarms: BTreeSet<u16>,
    age: u8,
}

/// What this robot knows about its neighbors' swarm memberships.
#[derive(Debug, Clone)]
pub struct SwarmRegistry {
    max_age: u8,
    robots: BTreeMap<u16, NeighborEntry>,
}

impl Default for SwarmRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_AGE)
    }
}

impl SwarmRegistry {
    /// Create a registry evicting entries older than `max_age` rounds.
    pub fn new(max_age: u8) -> Self {
        Self {
            max_age,
            robots: BTreeMap::new(),
        }
    }

    /// Replace everything known about a robot with a full list.
    pub fn update_list(&mut self, robot: u16, swarms: impl IntoIterator<Item = u16>) {
        self.robots.insert(
            robot,
            NeighborEntry {
                swarms: swarms.into_iter().collect(),
                age: 0,
            },
        );
    }

    /// Record that a robot joined a swarm, refreshing its entry.
    pub fn update_join(&mut self, robot: u16, swarm: u16) {
        let entry = self.robots.entry(robot).or_insert_with(|| NeighborEntry {
            swarms: BTreeSet::new(),
            age: 0,
        });
        entry.swarms.insert(swarm);
        entry.age = 0;
    }

    /// Record that a robot left a swarm, refreshing its entry.
    pub fn update_leave(&mut self, robot: u16, swarm: u16) {
        let entry = self.robots.entry(robot).or_insert_with(|| NeighborEntry {
            swarms: BTreeSet::new(),
            age: 0,
        });
        entry.swarms.remove(&swarm);
        entry.age = 0;
    }

    /// Whether a robot is known to be in a swarm.
    pub fn is_member(&self, robot: u16, swarm: u16) -> bool {
        self.robots
            .get(&robot)
            .is_some_and(|e| e.swarms.contains(&swarm))
    }

    /// Whether anything is known about a robot at all.
    pub fn knows(&self, robot: u16) -> bool {
        self.robots.contains_key(&robot)
    }

    /// Number of tracked robots.
    pub fn len(&self) -> usize {
        self.robots.len()
    }

    /// `true` when no robot is tracked.
    pub fn is_empty(&self) -> bool {
        self.robots.is_empty()
    }

    /// Age every entry one round and evict the stale ones.
    pub fn tick(&mut self) {
        let before = self.robots.len();
        let max_age = self.max_age;
        self.robots.retain(|_, e| {
            e.age = e.age.saturating_add(1);
            e.age <= max_age
        });
        if self.robots.len() < before {
            debug!(evicted = before - self.robots.len(), "stale neighbors evicted");
        }
    }

    /// Drop a robot outright.
    pub fn forget(&mut self, robot: u16) {
        self.robots.remove(&robot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_set_round_trips() {
        let mut m = SwarmMembers::new();
        assert!(m.join(3));
        assert!(!m.join(3));
        assert!(m.contains(3));
        assert!(m.leave(3));
        assert!(!m.contains(3));
        assert!(!m.leave(3));
    }

    #[test]
    fn registry_tracks_joins_and_leaves() {
        let mut r = SwarmRegistry::default();
        r.update_join(7, 1);
        r.update_join(7, 2);
        r.update_leave(7, 1);
        assert!(r.is_member(7, 2));
        assert!(!r.is_member(7, 1));
        r.update_list(7, [4]);
        assert!(r.is_member(7, 4));
        assert!(!r.is_member(7, 2));
    }

    #[test]
    fn stale_entries_are_evicted() {
        let mut r = SwarmRegistry::new(2);
        r.update_join(7, 1);
        r.tick();
        r.tick();
        assert!(r.is_member(7, 1));
        r.tick();
        assert!(!r.knows(7));
    }

    #[test]
    fn refresh_resets_the_age() {
        let mut r = SwarmRegistry::new(2);
        r.update_join(7, 1);
        r.tick();
        r.tick();
        r.update_join(7, 1);
        r.tick();
        r.tick();
        assert!(r.knows(7));
    }
}
