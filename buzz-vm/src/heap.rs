//! The value heap.
//!
//! A slot arena with stable handles and an explicit mark-and-sweep pass.
//! Compound values reference their children by handle, so marking walks a
//! work list and a seen set instead of recursing, which keeps cyclic tables
//! and closures safe. Live string ids are reported to the interner so its
//! own sweep can follow.

use std::collections::BTreeMap;

use tracing::debug;

use crate::strings::StringManager;
use crate::value::{Closure, Handle, TableKey, Value};

#[derive(Debug, Clone)]
enum Slot {
    Live(Value),
    Free,
}

/// Arena owning every value a VM can reach.
#[derive(Debug, Default, Clone)]
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl Heap {
    /// Create an empty heap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live values.
    pub fn live(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Allocate a value, reusing a freed slot when one is available.
    pub fn alloc(&mut self, value: Value) -> Handle {
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx as usize] = Slot::Live(value);
                Handle(idx)
            }
            None => {
                self.slots.push(Slot::Live(value));
                Handle(self.slots.len() as u32 - 1)
            }
        }
    }

    /// The value behind a handle, when the slot is live.
    pub fn get(&self, h: Handle) -> Option<&Value> {
        match self.slots.get(h.index()) {
            Some(Slot::Live(v)) => Some(v),
            _ => None,
        }
    }

    /// Mutable access to the value behind a handle.
    pub fn get_mut(&mut self, h: Handle) -> Option<&mut Value> {
        match self.slots.get_mut(h.index()) {
            Some(Slot::Live(v)) => Some(v),
            _ => None,
        }
    }

    /// Deep-copy a value: tables and closures are cloned structurally,
    /// scalars bitwise. Shared substructure stays shared within one clone,
    /// and cycles clone into isomorphic cycles.
    pub fn deep_clone(&mut self, h: Handle) -> Handle {
        let mut copies: BTreeMap<Handle, Handle> = BTreeMap::new();
        self.clone_rec(h, &mut copies)
    }

    fn clone_rec(&mut self, h: Handle, copies: &mut BTreeMap<Handle, Handle>) -> Handle {
        if let Some(&copy) = copies.get(&h) {
            return copy;
        }
        let Some(value) = self.get(h).cloned() else {
            return h;
        };
        match value {
            Value::Table(entries) => {
                let copy = self.alloc(Value::Table(BTreeMap::new()));
                copies.insert(h, copy);
                let mut cloned = BTreeMap::new();
                for (key, child) in entries {
                    let key = match key {
                        TableKey::Obj(child_key) => {
                            TableKey::Obj(self.clone_rec(child_key, copies))
                        }
                        scalar => scalar,
                    };
                    cloned.insert(key, self.clone_rec(child, copies));
                }
                if let Some(Value::Table(t)) = self.get_mut(copy) {
                    *t = cloned;
                }
                copy
            }
            Value::Closure(c) => {
                let copy = self.alloc(Value::Nil);
                copies.insert(h, copy);
                let self_obj = c.self_obj.map(|s| self.clone_rec(s, copies));
                let upvalues = c
                    .upvalues
                    .iter()
                    .map(|&u| self.clone_rec(u, copies))
                    .collect();
                if let Some(slot) = self.get_mut(copy) {
                    *slot = Value::Closure(Closure {
                        kind: c.kind,
                        self_obj,
                        upvalues,
                    });
                }
                copy
            }
            scalar => {
                let copy = self.alloc(scalar);
                copies.insert(h, copy);
                copy
            }
        }
    }

    /// Mark-and-sweep collection from the given roots.
    ///
    /// Every live string id is reported through [`StringManager::gc_mark`],
    /// so run this between the interner's `gc_clear` and `gc_prune`.
    pub fn collect(
        &mut self,
        roots: impl IntoIterator<Item = Handle>,
        strings: &mut StringManager,
    ) {
        let mut marked = vec![false; self.slots.len()];
        let mut work: Vec<Handle> = roots.into_iter().collect();
        while let Some(h) = work.pop() {
            let Some(flag) = marked.get_mut(h.index()) else {
                continue;
            };
            if *flag {
                continue;
            }
            *flag = true;
            let Some(value) = self.get(h) else {
                continue;
            };
            match value {
                Value::Str(sid) => strings.gc_mark(*sid),
                Value::Table(entries) => {
                    for (key, child) in entries {
                        match key {
                            TableKey::Str(sid) => strings.gc_mark(*sid),
                            TableKey::Obj(k) => work.push(*k),
                            _ => {}
                        }
                        work.push(*child);
                    }
                }
                Value::Closure(c) => {
                    work.extend(c.self_obj);
                    work.extend(c.upvalues.iter().copied());
                }
                Value::Meta(m) => work.push(*m),
                Value::Nil | Value::Int(_) | Value::Float(_) | Value::UserData(_) => {}
            }
        }
        let before = self.live();
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if matches!(slot, Slot::Live(_)) && !marked[idx] {
                *slot = Slot::Free;
                self.free.push(idx as u32);
            }
        }
        debug!(live = self.live(), swept = before - self.live(), "heap collected");
    }
}
