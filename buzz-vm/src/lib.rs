//! Runtime for the Buzz swarm-robotics language.
//!
//! A [`Vm`] executes one robot's bytecode program: a stack machine over
//! heap-allocated tagged values, with an interned string table, explicit
//! mark-and-sweep collection, and the swarm layer on top: broadcast
//! messaging, swarm membership, and virtual stigmergy (replicated
//! key-value stores ordered by Lamport `(timestamp, robot)` stamps).
//!
//! The intended host loop per control round:
//!
//! ```no_run
//! # use buzz_vm::prelude::*;
//! # fn transport_send(_: Vec<u8>) {}
//! # fn transport_recv() -> Vec<(u16, Vec<u8>)> { Vec::new() }
//! let mut vm = Vm::from_file("program.bo", 7).unwrap();
//! buzz_vm::natives::install_stdlib(&mut vm).unwrap();
//! vm.execute();
//! loop {
//!     for payload in vm.out_msgs().drain() {
//!         transport_send(payload);
//!     }
//!     for (from, payload) in transport_recv() {
//!         vm.in_msgs().append(from, payload);
//!     }
//!     vm.process_in_msgs();
//!     vm.swarm_tick();
//!     vm.gc();
//!     if !vm.state().is_ready() {
//!         break;
//!     }
//! }
//! ```

#![warn(missing_docs)]

mod error;
mod heap;
mod inmsg;
mod outmsg;
mod state;
mod strings;
mod swarm;
mod value;
mod vm;

pub mod msg;
pub mod natives;
pub mod vstig;

pub use error::{ErrorKind, VmError};
pub use heap::Heap;
pub use inmsg::{InMsg, InMsgQueue, MAX_QUEUE};
pub use outmsg::OutMsgQueue;
pub use state::{ErrorRecord, VmState};
pub use strings::{StrId, StringManager};
pub use swarm::{SwarmMembers, SwarmRegistry, DEFAULT_MAX_AGE};
pub use value::{Closure, ClosureKind, Handle, TableKey, TypeTag, Value};
pub use vm::{Frame, NativeFn, Vm, DEFAULT_FRAME_LIMIT};

/// Common imports for embedding hosts.
pub mod prelude {
    pub use crate::error::{ErrorKind, VmError};
    pub use crate::msg::{Message, WireEntry, WireValue};
    pub use crate::natives::install_stdlib;
    pub use crate::state::VmState;
    pub use crate::value::{Handle, TableKey, TypeTag, Value};
    pub use crate::vm::{NativeFn, Vm};
    pub use buzz_asm::{assemble, BytecodeBlob, Opcode};
}
