//! Exposed constructors for the [`Vm`].

use std::collections::BTreeMap;
use std::path::Path;

use buzz_asm::BytecodeBlob;
use tracing::debug;

use super::{Vm, DEFAULT_FRAME_LIMIT};
use crate::error::VmError;
use crate::heap::Heap;
use crate::inmsg::InMsgQueue;
use crate::outmsg::OutMsgQueue;
use crate::state::VmState;
use crate::strings::StringManager;
use crate::swarm::{SwarmMembers, SwarmRegistry};
use crate::value::Value;

impl Vm {
    /// Create a VM for `robot` around a loaded blob.
    ///
    /// Every blob string is interned protected, in table order, so the ids
    /// that `pushs` immediates resolve to are identical on every robot
    /// running the same program.
    pub fn new(bcode: BytecodeBlob, robot: u16) -> Self {
        let mut strings = StringManager::new();
        let bcode_sids = bcode
            .strings()
            .iter()
            .map(|s| strings.register(s, true))
            .collect();
        let mut heap = Heap::new();
        let globals = heap.alloc(Value::Table(BTreeMap::new()));
        let nil = heap.alloc(Value::Nil);
        let pc = bcode.code_start();
        debug!(robot, strings = bcode.strings().len(), pc, "vm loaded");
        Self {
            bcode,
            bcode_sids,
            pc,
            state: VmState::Ready,
            error: None,
            stacks: vec![Vec::new()],
            lsyms: vec![Vec::new()],
            frames: Vec::new(),
            globals,
            nil,
            heap,
            strings,
            natives: Vec::new(),
            robot,
            swarm_stack: Vec::new(),
            swarmmembers: SwarmMembers::new(),
            swarms: SwarmRegistry::default(),
            vstigs: BTreeMap::new(),
            outmsgs: OutMsgQueue::new(robot),
            inmsgs: InMsgQueue::new(),
            listeners: BTreeMap::new(),
            strict: false,
            frame_limit: DEFAULT_FRAME_LIMIT,
        }
    }

    /// Load a `.bo` file and build a VM around it.
    pub fn from_file(path: impl AsRef<Path>, robot: u16) -> Result<Self, VmError> {
        Ok(Self::new(BytecodeBlob::from_file(path)?, robot))
    }

    /// Error on global loads of unknown symbols instead of yielding nil.
    pub fn with_strict_globals(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Override the activation-frame depth limit.
    pub fn with_frame_limit(mut self, limit: usize) -> Self {
        self.frame_limit = limit;
        self
    }
}
