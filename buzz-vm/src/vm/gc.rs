//! Garbage collection entry point.

use tracing::debug;

use super::Vm;
use crate::msg::Message;
use crate::value::Handle;

impl Vm {
    /// Collect unreachable heap values and interned strings.
    ///
    /// Roots are the global table, every operand stack and local-symbol
    /// table, the listener table, virtual-stigmergy entries and queued
    /// traffic. Safe between steps; never run from inside a native.
    pub fn gc(&mut self) {
        self.strings.gc_clear();
        let mut roots: Vec<Handle> = vec![self.globals, self.nil];
        roots.extend(self.stacks.iter().flatten().copied());
        roots.extend(self.lsyms.iter().flatten().copied());
        roots.extend(self.listeners.values().copied());
        roots.extend(
            self.vstigs
                .values()
                .flat_map(|vs| vs.iter().map(|(_, e)| e.value)),
        );
        // Listener topics and queued traffic keep their strings alive even
        // when no heap value references them anymore.
        for &topic in self.listeners.keys() {
            self.strings.gc_mark(topic);
        }
        for (key, _) in self.vstigs.values().flat_map(|vs| vs.iter()) {
            self.strings.gc_mark(key);
        }
        let out_sids: Vec<_> = self.outmsgs.live_strings().collect();
        for sid in out_sids {
            self.strings.gc_mark(sid);
        }
        let in_sids: Vec<_> = self
            .inmsgs
            .iter()
            .filter_map(|m| Message::decode(&m.payload).ok())
            .flat_map(|m| message_sids(&m))
            .collect();
        for sid in in_sids {
            self.strings.gc_mark(sid);
        }
        self.heap.collect(roots, &mut self.strings);
        self.strings.gc_prune();
        debug!(
            live = self.heap.live(),
            strings = self.strings.len(),
            "gc finished"
        );
    }
}

fn message_sids(msg: &Message) -> Vec<crate::strings::StrId> {
    use crate::msg::WireValue;
    let value_sid = |v: &WireValue| match v {
        WireValue::Str(sid) => Some(*sid),
        _ => None,
    };
    match msg {
        Message::Broadcast { topic, value, .. } => {
            [Some(*topic), value_sid(value)].into_iter().flatten().collect()
        }
        Message::VstigPut { key, entry, .. } | Message::VstigQuery { key, entry, .. } => {
            [Some(*key), value_sid(&entry.value)].into_iter().flatten().collect()
        }
        _ => Vec::new(),
    }
}
