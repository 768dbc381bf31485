//! Interned string management.
//!
//! Every string a program touches is registered here once and referred to by
//! a 16-bit id afterwards. Ids are allocated from a wrapping counter that
//! skips the reserved id 0 and any id still in use. Collection is explicit
//! and three-phase: [`StringManager::gc_clear`] seeds the candidate set with
//! every unprotected id, reachable values call [`StringManager::gc_mark`],
//! and [`StringManager::gc_prune`] drops whatever is left.

use std::collections::{BTreeMap, BTreeSet};

/// Interned string id. Id 0 is reserved and never allocated.
pub type StrId = u16;

#[derive(Debug, Clone)]
struct StrData {
    str: String,
    protect: bool,
}

/// The string interner of one VM.
#[derive(Debug, Default, Clone)]
pub struct StringManager {
    str2id: BTreeMap<String, StrId>,
    id2str: BTreeMap<StrId, StrData>,
    next_sid: StrId,
    gc_candidates: BTreeSet<StrId>,
}

impl StringManager {
    /// Create an empty interner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of interned strings.
    pub fn len(&self) -> usize {
        self.id2str.len()
    }

    /// `true` when nothing is interned.
    pub fn is_empty(&self) -> bool {
        self.id2str.is_empty()
    }

    /// Intern a string, returning its id.
    ///
    /// Registering an existing string returns its current id; doing so with
    /// `protect` set promotes the entry to protected.
    pub fn register(&mut self, s: &str, protect: bool) -> StrId {
        if let Some(&id) = self.str2id.get(s) {
            if protect {
                self.id2str
                    .get_mut(&id)
                    .expect("mirrored maps")
                    .protect = true;
            }
            return id;
        }
        let id = self.alloc_sid();
        self.str2id.insert(s.to_string(), id);
        self.id2str.insert(
            id,
            StrData {
                str: s.to_string(),
                protect,
            },
        );
        id
    }

    fn alloc_sid(&mut self) -> StrId {
        loop {
            let id = self.next_sid;
            self.next_sid = self.next_sid.wrapping_add(1);
            if id != 0 && !self.id2str.contains_key(&id) {
                return id;
            }
        }
    }

    /// The string behind an id.
    pub fn get(&self, sid: StrId) -> Option<&str> {
        self.id2str.get(&sid).map(|d| d.str.as_str())
    }

    /// The id of an already-interned string.
    pub fn lookup(&self, s: &str) -> Option<StrId> {
        self.str2id.get(s).copied()
    }

    /// Whether the id is currently protected.
    pub fn is_protected(&self, sid: StrId) -> bool {
        self.id2str.get(&sid).is_some_and(|d| d.protect)
    }

    /// GC phase 1: every unprotected id becomes a collection candidate.
    pub fn gc_clear(&mut self) {
        self.gc_candidates = self
            .id2str
            .iter()
            .filter(|(_, d)| !d.protect)
            .map(|(&id, _)| id)
            .collect();
    }

    /// GC phase 2: a reachable id is withdrawn from the candidate set.
    pub fn gc_mark(&mut self, sid: StrId) {
        self.gc_candidates.remove(&sid);
    }

    /// GC phase 3: drop every id still in the candidate set from both maps.
    pub fn gc_prune(&mut self) {
        for sid in std::mem::take(&mut self.gc_candidates) {
            if let Some(data) = self.id2str.remove(&sid) {
                self.str2id.remove(&data.str);
            }
        }
    }
}
