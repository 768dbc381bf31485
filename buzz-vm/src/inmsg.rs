//! Incoming message queue.
//!
//! Arrivals queue in priority order keyed on the kind byte at payload
//! offset 0: higher kinds pass lower ones, equal kinds stay in arrival
//! order. The queue is bounded; overflow drops the lowest-priority tail.

use std::collections::VecDeque;

use tracing::trace;

/// Maximum number of queued arrivals.
pub const MAX_QUEUE: usize = 100;

/// One queued arrival: the sending robot and its raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InMsg {
    /// Neighbor that sent the payload.
    pub from: u16,
    /// Raw framed payload, kind byte first.
    pub payload: Vec<u8>,
}

impl InMsg {
    fn kind(&self) -> u8 {
        self.payload.first().copied().unwrap_or(0)
    }
}

/// The per-robot incoming queue.
#[derive(Debug, Default, Clone)]
pub struct InMsgQueue {
    msgs: VecDeque<InMsg>,
}

impl InMsgQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued arrivals.
    pub fn len(&self) -> usize {
        self.msgs.len()
    }

    /// `true` when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.msgs.is_empty()
    }

    /// Queue an arrival in priority position, evicting the tail on
    /// overflow.
    pub fn append(&mut self, from: u16, payload: Vec<u8>) {
        let msg = InMsg { from, payload };
        let kind = msg.kind();
        // Insert after every message of equal or higher kind.
        let pos = self
            .msgs
            .iter()
            .position(|m| m.kind() < kind)
            .unwrap_or(self.msgs.len());
        self.msgs.insert(pos, msg);
        while self.msgs.len() > MAX_QUEUE {
            let dropped = self.msgs.pop_back();
            trace!(kind = dropped.map(|m| m.kind()), "incoming queue overflow");
        }
    }

    /// Remove and return the highest-priority arrival.
    pub fn extract(&mut self) -> Option<InMsg> {
        self.msgs.pop_front()
    }

    /// Iterate queued payloads front to back; the heap GC walks these.
    pub fn iter(&self) -> impl Iterator<Item = &InMsg> {
        self.msgs.iter()
    }
}
