//! Jumps, calls and returns.

use tracing::trace;

use super::{Frame, Vm};
use crate::error::ErrorKind;
use crate::value::{Closure, ClosureKind, TypeTag, Value};

impl Vm {
    /// Redirect the program counter to an absolute offset.
    pub(crate) fn jump(&mut self, target: u32) -> Result<(), ErrorKind> {
        let target = target as usize;
        if target >= self.bcode.len() {
            return Err(ErrorKind::PcOutOfRange);
        }
        self.pc = target;
        Ok(())
    }

    /// `callc`/`calls`: pop `arg_n … arg_1` then the closure, open a frame
    /// and transfer control.
    ///
    /// The new frame gets a fresh operand stack and a local-symbol table of
    /// `[self-or-nil, arg_1 … arg_n, upvalue…]`. Native closures run to
    /// completion here; one that returns without issuing a return is
    /// treated as `ret0`.
    pub(crate) fn call_closure(&mut self, argc: usize, swarm_scoped: bool) -> Result<(), ErrorKind> {
        let mut args = Vec::with_capacity(argc);
        for _ in 0..argc {
            args.push(self.pop()?);
        }
        args.reverse();
        let (_, closure) = self.pop_obj()?;
        let closure = match closure {
            Value::Closure(c) => c.clone(),
            v => return Err(ErrorKind::type_mismatch(TypeTag::Closure, v.tag())),
        };
        self.open_frame(&closure, args, swarm_scoped)?;
        match closure.kind {
            ClosureKind::Bytecode(off) => {
                if (off as usize) < self.bcode.code_start() || (off as usize) >= self.bcode.len() {
                    return Err(ErrorKind::NoSuchClosure);
                }
                trace!(off, argc, swarm_scoped, "bytecode call");
                self.pc = off as usize;
                Ok(())
            }
            ClosureKind::Native(id) => {
                let f = *self
                    .natives
                    .get(id as usize)
                    .ok_or(ErrorKind::NoSuchClosure)?;
                trace!(id, argc, swarm_scoped, "native call");
                let depth = self.frames.len();
                f(self)?;
                if self.frames.len() == depth {
                    self.do_ret0()?;
                }
                Ok(())
            }
        }
    }

    fn open_frame(
        &mut self,
        closure: &Closure,
        args: Vec<crate::value::Handle>,
        swarm_scoped: bool,
    ) -> Result<(), ErrorKind> {
        if self.frames.len() >= self.frame_limit {
            return Err(ErrorKind::StackOverflow);
        }
        let mut locals = Vec::with_capacity(1 + args.len() + closure.upvalues.len());
        locals.push(closure.self_obj.unwrap_or(self.nil));
        locals.extend(args);
        locals.extend(closure.upvalues.iter().copied());
        self.frames.push(Frame {
            return_pc: self.pc,
            swarm_scoped,
        });
        self.lsyms.push(locals);
        self.stacks.push(Vec::new());
        Ok(())
    }

    /// Return with no value: the callee stack is discarded wholesale, which
    /// is what enforces the native 0-return contract.
    pub(crate) fn do_ret0(&mut self) -> Result<(), ErrorKind> {
        let frame = self.frames.pop().ok_or(ErrorKind::StackUnderflow)?;
        self.stacks.pop();
        self.lsyms.pop();
        if frame.swarm_scoped {
            self.swarm_stack.pop();
        }
        self.pc = frame.return_pc;
        Ok(())
    }

    /// Return with exactly the callee's top of stack.
    pub(crate) fn do_ret1(&mut self) -> Result<(), ErrorKind> {
        let ret = self.pop()?;
        self.do_ret0()?;
        self.push(ret);
        Ok(())
    }

    /// Call a closure from host context and run it to completion.
    ///
    /// The current stack must hold `arg_n … arg_1, closure` exactly as for
    /// `callc`. Bytecode closures are stepped until their frame returns.
    pub(crate) fn call_closure_sync(&mut self, argc: usize) -> Result<(), ErrorKind> {
        self.call_closure_sync_scoped(argc, false)
    }

    /// [`call_closure_sync`](Vm::call_closure_sync) with control over the
    /// swarm-context flag of the opened frame.
    pub(crate) fn call_closure_sync_scoped(
        &mut self,
        argc: usize,
        swarm_scoped: bool,
    ) -> Result<(), ErrorKind> {
        let depth = self.frames.len();
        self.call_closure(argc, swarm_scoped)?;
        while self.frames.len() > depth && self.state.is_ready() {
            self.exec_one()?;
        }
        Ok(())
    }
}
