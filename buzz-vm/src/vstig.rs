//! Virtual stigmergy: a replicated key-value store with last-writer-wins
//! semantics under the `(timestamp, robot)` Lamport total order.
//!
//! The structure itself only decides; queueing the resulting PUT/QUERY
//! traffic is the VM's job, so every protocol entry point returns an
//! outcome the caller acts on.

use std::collections::BTreeMap;

use tracing::trace;

use crate::strings::StrId;
use crate::value::Handle;

/// One replicated entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VstigEntry {
    /// Stored value.
    pub value: Handle,
    /// Lamport timestamp of the write.
    pub timestamp: u32,
    /// Robot that produced the write.
    pub robot: u16,
}

impl VstigEntry {
    /// The Lamport ordering tuple.
    pub const fn stamp(&self) -> (u32, u16) {
        (self.timestamp, self.robot)
    }
}

/// Decision taken on an incoming PUT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// Strictly newer: the entry replaced ours and must be re-broadcast.
    Accepted,
    /// Not newer: dropped in silence.
    Stale,
    /// The same owner regressed its timestamp; fatal to the program.
    Violation,
}

/// Decision taken on an incoming QUERY.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOutcome {
    /// Our entry is strictly newer: answer with a PUT of it.
    ReplyPut(VstigEntry),
    /// Our entry is strictly older: re-broadcast it as a QUERY to solicit
    /// the newer data.
    ReplyQuery(VstigEntry),
    /// We had nothing under the key; the query's entry was adopted.
    Stored,
    /// Same stamp on both sides: nothing to do.
    Silence,
}

/// One virtual stigmergy structure.
#[derive(Debug, Default, Clone)]
pub struct Vstig {
    entries: BTreeMap<StrId, VstigEntry>,
}

impl Vstig {
    /// Create an empty structure.
    pub fn new() -> Self {
        Self::default()
    }

    /// The entry under a key.
    pub fn get(&self, key: StrId) -> Option<&VstigEntry> {
        self.entries.get(&key)
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when no entry is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (StrId, &VstigEntry)> {
        self.entries.iter().map(|(k, e)| (*k, e))
    }

    /// A local write: the timestamp moves one past the highest seen for the
    /// key and the entry is owned by `robot`. Returns the stored entry for
    /// propagation.
    pub fn store(&mut self, key: StrId, value: Handle, robot: u16) -> VstigEntry {
        let timestamp = self.entries.get(&key).map_or(1, |e| e.timestamp + 1);
        let entry = VstigEntry {
            value,
            timestamp,
            robot,
        };
        self.entries.insert(key, entry);
        trace!(key, timestamp, robot, "vstig store");
        entry
    }

    /// Apply an incoming PUT for `key`.
    pub fn apply_put(&mut self, key: StrId, incoming: VstigEntry) -> PutOutcome {
        match self.entries.get(&key) {
            None => {
                self.entries.insert(key, incoming);
                PutOutcome::Accepted
            }
            Some(local) if incoming.stamp() > local.stamp() => {
                self.entries.insert(key, incoming);
                PutOutcome::Accepted
            }
            Some(local)
                if incoming.robot == local.robot && incoming.timestamp < local.timestamp =>
            {
                PutOutcome::Violation
            }
            Some(_) => PutOutcome::Stale,
        }
    }

    /// Apply an incoming QUERY for `key` carrying the sender's entry.
    pub fn apply_query(&mut self, key: StrId, incoming: VstigEntry) -> QueryOutcome {
        match self.entries.get(&key) {
            None => {
                self.entries.insert(key, incoming);
                QueryOutcome::Stored
            }
            Some(local) if local.stamp() > incoming.stamp() => QueryOutcome::ReplyPut(*local),
            Some(local) if local.stamp() < incoming.stamp() => QueryOutcome::ReplyQuery(*local),
            Some(_) => QueryOutcome::Silence,
        }
    }
}
