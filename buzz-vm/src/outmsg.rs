//! Outgoing message queue.
//!
//! One FIFO per wire kind, drained in a fixed priority round. Appends
//! deduplicate aggressively so the queue never carries traffic that a later
//! append made pointless: a single SWARM_LIST subsumes all join/leave
//! messages, join/leave pairs for the same swarm annihilate, and a vstig
//! write replaces any queued write for the same `(vstig, key)` with a
//! strictly older timestamp.
//!
//! Values are snapshotted into wire form at append time; [`first`] only
//! frames bytes, so peeking is side-effect free and [`next`] is cheap.
//!
//! [`first`]: OutMsgQueue::first
//! [`next`]: OutMsgQueue::next

use std::collections::{BTreeMap, VecDeque};

use tracing::trace;

use crate::msg::{Message, WireEntry, WireValue};
use crate::strings::StrId;

#[derive(Debug, Clone)]
struct BroadcastMsg {
    topic: StrId,
    value: WireValue,
}

#[derive(Debug, Clone)]
struct VstigMsg {
    vstig: u16,
    key: StrId,
    entry: WireEntry,
}

/// Which vstig queue an indexed message sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VstigKind {
    Put,
    Query,
}

/// The per-robot outgoing queue.
#[derive(Debug, Clone)]
pub struct OutMsgQueue {
    robot: u16,
    broadcast: VecDeque<BroadcastMsg>,
    swarm_list: Option<Vec<u16>>,
    swarm_join: VecDeque<u16>,
    swarm_leave: VecDeque<u16>,
    vstig_put: VecDeque<VstigMsg>,
    vstig_query: VecDeque<VstigMsg>,
    vstig_index: BTreeMap<(u16, StrId), (VstigKind, u32)>,
}

impl OutMsgQueue {
    /// Create the queue for one robot.
    pub fn new(robot: u16) -> Self {
        Self {
            robot,
            broadcast: VecDeque::new(),
            swarm_list: None,
            swarm_join: VecDeque::new(),
            swarm_leave: VecDeque::new(),
            vstig_put: VecDeque::new(),
            vstig_query: VecDeque::new(),
            vstig_index: BTreeMap::new(),
        }
    }

    /// Total number of queued messages.
    pub fn len(&self) -> usize {
        self.broadcast.len()
            + usize::from(self.swarm_list.is_some())
            + self.swarm_join.len()
            + self.swarm_leave.len()
            + self.vstig_put.len()
            + self.vstig_query.len()
    }

    /// `true` when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue a topic broadcast.
    pub fn append_broadcast(&mut self, topic: StrId, value: WireValue) {
        self.broadcast.push_back(BroadcastMsg { topic, value });
    }

    /// Queue the full membership list, subsuming every queued join/leave.
    pub fn append_swarm_list(&mut self, ids: impl IntoIterator<Item = u16>) {
        self.swarm_join.clear();
        self.swarm_leave.clear();
        self.swarm_list = Some(ids.into_iter().collect());
    }

    /// Queue a swarm join.
    ///
    /// With a list queued the join edits the list in place. Otherwise it
    /// annihilates a pending leave for the same swarm, and deduplicates
    /// against pending joins.
    pub fn append_swarm_join(&mut self, swarm: u16) {
        if let Some(list) = &mut self.swarm_list {
            if !list.contains(&swarm) {
                list.push(swarm);
            }
            return;
        }
        if let Some(at) = self.swarm_leave.iter().position(|&id| id == swarm) {
            self.swarm_leave.remove(at);
            return;
        }
        if !self.swarm_join.contains(&swarm) {
            self.swarm_join.push_back(swarm);
        }
    }

    /// Queue a swarm leave; the mirror image of [`append_swarm_join`].
    ///
    /// [`append_swarm_join`]: OutMsgQueue::append_swarm_join
    pub fn append_swarm_leave(&mut self, swarm: u16) {
        if let Some(list) = &mut self.swarm_list {
            list.retain(|&id| id != swarm);
            return;
        }
        if let Some(at) = self.swarm_join.iter().position(|&id| id == swarm) {
            self.swarm_join.remove(at);
            return;
        }
        if !self.swarm_leave.contains(&swarm) {
            self.swarm_leave.push_back(swarm);
        }
    }

    /// Queue a vstig PUT for `(vstig, key)`.
    pub fn append_vstig_put(&mut self, vstig: u16, key: StrId, entry: WireEntry) {
        self.append_vstig(VstigKind::Put, vstig, key, entry);
    }

    /// Queue a vstig QUERY for `(vstig, key)`.
    pub fn append_vstig_query(&mut self, vstig: u16, key: StrId, entry: WireEntry) {
        self.append_vstig(VstigKind::Query, vstig, key, entry);
    }

    fn append_vstig(&mut self, kind: VstigKind, vstig: u16, key: StrId, entry: WireEntry) {
        if let Some(&(queued_kind, queued_ts)) = self.vstig_index.get(&(vstig, key)) {
            // Equal or newer queued traffic wins over the new write.
            if queued_ts >= entry.timestamp {
                trace!(vstig, key, queued_ts, "vstig append superseded by queued message");
                return;
            }
            let queue = match queued_kind {
                VstigKind::Put => &mut self.vstig_put,
                VstigKind::Query => &mut self.vstig_query,
            };
            if let Some(at) = queue
                .iter()
                .position(|m| m.vstig == vstig && m.key == key)
            {
                queue.remove(at);
            }
        }
        self.vstig_index.insert((vstig, key), (kind, entry.timestamp));
        let queue = match kind {
            VstigKind::Put => &mut self.vstig_put,
            VstigKind::Query => &mut self.vstig_query,
        };
        queue.push_back(VstigMsg { vstig, key, entry });
    }

    /// The next message in priority order, without dequeuing it.
    fn head(&self) -> Option<Message> {
        if let Some(m) = self.broadcast.front() {
            return Some(Message::Broadcast {
                robot: self.robot,
                topic: m.topic,
                value: m.value,
            });
        }
        if let Some(list) = &self.swarm_list {
            return Some(Message::SwarmList {
                robot: self.robot,
                swarms: list.clone(),
            });
        }
        if let Some(m) = self.vstig_put.front() {
            return Some(Message::VstigPut {
                vstig: m.vstig,
                key: m.key,
                entry: m.entry,
            });
        }
        if let Some(m) = self.vstig_query.front() {
            return Some(Message::VstigQuery {
                vstig: m.vstig,
                key: m.key,
                entry: m.entry,
            });
        }
        if let Some(&swarm) = self.swarm_join.front() {
            return Some(Message::SwarmJoin {
                robot: self.robot,
                swarm,
            });
        }
        if let Some(&swarm) = self.swarm_leave.front() {
            return Some(Message::SwarmLeave {
                robot: self.robot,
                swarm,
            });
        }
        None
    }

    /// Serialize the next message without removing it.
    pub fn first(&self) -> Option<Vec<u8>> {
        self.head().map(|m| m.encode())
    }

    /// Remove the message [`first`] returned, clearing its index entries.
    ///
    /// [`first`]: OutMsgQueue::first
    pub fn next(&mut self) {
        if self.broadcast.pop_front().is_some() {
            return;
        }
        if self.swarm_list.take().is_some() {
            return;
        }
        if let Some(m) = self.vstig_put.pop_front() {
            self.vstig_index.remove(&(m.vstig, m.key));
            return;
        }
        if let Some(m) = self.vstig_query.pop_front() {
            self.vstig_index.remove(&(m.vstig, m.key));
            return;
        }
        if self.swarm_join.pop_front().is_some() {
            return;
        }
        self.swarm_leave.pop_front();
    }

    /// Drain the whole queue as framed payloads, in send order.
    pub fn drain(&mut self) -> Vec<Vec<u8>> {
        let mut out = Vec::with_capacity(self.len());
        while let Some(payload) = self.first() {
            out.push(payload);
            self.next();
        }
        out
    }

    /// Every string id referenced by queued traffic; the heap GC marks
    /// these so interned strings outlive their queued messages.
    pub fn live_strings(&self) -> impl Iterator<Item = StrId> + '_ {
        let value_sid = |v: &WireValue| match v {
            WireValue::Str(sid) => Some(*sid),
            _ => None,
        };
        self.broadcast
            .iter()
            .flat_map(move |m| [Some(m.topic), value_sid(&m.value)])
            .chain(
                self.vstig_put
                    .iter()
                    .chain(self.vstig_query.iter())
                    .flat_map(move |m| [Some(m.key), value_sid(&m.entry.value)]),
            )
            .flatten()
    }
}
