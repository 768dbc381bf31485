//! The fetch-decode-execute loop.

use buzz_asm::{AsmError, Instr, InstrArg, Opcode};
use tracing::{debug, trace};

use super::Vm;
use crate::error::ErrorKind;
use crate::state::{ErrorRecord, VmState};
use crate::value::{Closure, ClosureKind, Handle, TableKey, Value};

impl Vm {
    /// Execute exactly one instruction and return the resulting state.
    ///
    /// A no-op unless the state is `Ready`; once `Done` or `Error` is
    /// reached no transition leaves it.
    pub fn step(&mut self) -> VmState {
        if !self.state.is_ready() {
            return self.state;
        }
        debug_assert_eq!(self.lsyms.len(), self.frames.len() + 1);
        debug_assert_eq!(self.stacks.len(), self.frames.len() + 1);
        let at = self.pc;
        if let Err(kind) = self.exec_one() {
            self.die(kind, at);
        }
        self.state
    }

    /// Run until the program leaves `Ready`.
    pub fn execute(&mut self) -> VmState {
        while self.state.is_ready() {
            self.step();
        }
        self.state
    }

    /// Record a fatal instruction failure.
    pub(crate) fn die(&mut self, kind: ErrorKind, pc: usize) {
        debug!(%kind, pc, "program died");
        self.state = VmState::Error;
        self.error = Some(ErrorRecord { kind, pc });
    }

    fn fetch(&self) -> Result<Instr, ErrorKind> {
        if self.pc >= self.bcode.len() {
            return Err(ErrorKind::PcOutOfRange);
        }
        self.bcode.fetch(self.pc).map_err(|e| match e {
            AsmError::UnknownOpcode(_) => ErrorKind::UnknownOpcode,
            _ => ErrorKind::PcOutOfRange,
        })
    }

    /// Decode and run the instruction under `pc`.
    pub(crate) fn exec_one(&mut self) -> Result<(), ErrorKind> {
        let instr = self.fetch()?;
        trace!(pc = self.pc, %instr, depth = self.frames.len(), "exec");
        self.pc += instr.len();
        let int_arg = || match instr.arg {
            Some(InstrArg::Int(i)) => i,
            _ => 0,
        };
        match instr.op {
            Opcode::Nop => {}
            Opcode::Done => {
                debug!(pc = self.pc, "program done");
                self.state = VmState::Done;
            }
            Opcode::Jump => self.exec_jump(instr, JumpCond::Always)?,
            Opcode::Jumpz => self.exec_jump(instr, JumpCond::IfFalsy)?,
            Opcode::Jumpnz => self.exec_jump(instr, JumpCond::IfTruthy)?,
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::Pow => self.exec_arith(instr.op)?,
            Opcode::Land | Opcode::Lor | Opcode::Lnot => self.exec_logic(instr.op)?,
            Opcode::Band | Opcode::Bor | Opcode::Bnot | Opcode::Lshift | Opcode::Rshift => {
                self.exec_bitwise(instr.op)?
            }
            Opcode::Unm => self.exec_unm()?,
            Opcode::Eq | Opcode::Neq | Opcode::Gt | Opcode::Gte | Opcode::Lt | Opcode::Lte => {
                self.exec_compare(instr.op)?
            }
            Opcode::Dup => {
                let top = self.peek(1)?;
                self.push(top);
            }
            Opcode::Pop => {
                self.pop()?;
            }
            Opcode::Pushnil => self.push(self.nil),
            Opcode::Pushi => {
                self.push_value(Value::Int(int_arg()));
            }
            Opcode::Pushf => {
                let x = match instr.arg {
                    Some(InstrArg::Float(x)) => x,
                    _ => 0.0,
                };
                self.push_value(Value::Float(x));
            }
            Opcode::Pushs => {
                let idx = Self::index_arg(int_arg())?;
                let sid = *self.bcode_sids.get(idx).ok_or(ErrorKind::TypeError)?;
                self.push_value(Value::Str(sid));
            }
            Opcode::Pushcn => {
                let id = Self::index_arg(int_arg())?;
                self.push_value(Value::Closure(Closure::bare(ClosureKind::Native(id as u32))));
            }
            Opcode::Pushcc => {
                let off = self.closure_offset(int_arg())?;
                self.push_value(Value::Closure(Closure::bare(ClosureKind::Bytecode(off))));
            }
            Opcode::Pushl => {
                let off = self.closure_offset(int_arg())?;
                let upvalues = self.lsyms.last().cloned().unwrap_or_default();
                self.push_value(Value::Closure(Closure {
                    kind: ClosureKind::Bytecode(off),
                    self_obj: None,
                    upvalues,
                }));
            }
            Opcode::Lload => {
                let idx = Self::index_arg(int_arg())?;
                let local = self.lsyms.last().and_then(|l| l.get(idx).copied());
                self.push(local.unwrap_or(self.nil));
            }
            Opcode::Lstore => {
                let idx = Self::index_arg(int_arg())?;
                let value = self.pop()?;
                let nil = self.nil;
                let locals = self.current_locals();
                if locals.len() <= idx {
                    locals.resize(idx + 1, nil);
                }
                locals[idx] = value;
            }
            Opcode::Lremove => {
                let idx = Self::index_arg(int_arg())?;
                let locals = self.current_locals();
                if idx < locals.len() {
                    locals.remove(idx);
                }
            }
            Opcode::Gload => {
                let sid = self.pop_str()?;
                match self.table_get(self.globals, &TableKey::Str(sid))? {
                    Some(h) => self.push(h),
                    None if self.strict => return Err(ErrorKind::NoSuchSymbol),
                    None => self.push(self.nil),
                }
            }
            Opcode::Gstore => {
                let value = self.pop()?;
                let sid = self.pop_str()?;
                self.table_set(self.globals, TableKey::Str(sid), value)?;
            }
            Opcode::Pusht => {
                self.push_value(Value::Table(Default::default()));
            }
            Opcode::Tput => {
                let value = self.pop()?;
                let key = self.pop()?;
                let table = self.pop_table()?;
                let key = self.key_of(key)?;
                self.table_set(table, key, value)?;
            }
            Opcode::Tget => {
                let key = self.pop()?;
                let table = self.pop_table()?;
                let key = self.key_of(key)?;
                match self.table_get(table, &key)? {
                    Some(h) => self.push_method(h, table),
                    None => self.push(self.nil),
                }
            }
            Opcode::Callc => {
                let argc = Self::index_arg(int_arg())?;
                self.call_closure(argc, false)?;
            }
            Opcode::Calls => {
                let argc = Self::index_arg(int_arg())?;
                self.call_closure(argc, true)?;
            }
            Opcode::Ret0 => self.do_ret0()?,
            Opcode::Ret1 => self.do_ret1()?,
        }
        Ok(())
    }

    /// Validate a closure-target immediate against the blob bounds.
    fn closure_offset(&self, arg: i32) -> Result<u32, ErrorKind> {
        let off = u32::try_from(arg).map_err(|_| ErrorKind::NoSuchClosure)?;
        if (off as usize) >= self.bcode.len() {
            return Err(ErrorKind::NoSuchClosure);
        }
        Ok(off)
    }

    /// Push a value fetched from a table; closures capture the holding
    /// table as their `self` on the way out.
    fn push_method(&mut self, value: Handle, table: Handle) {
        match self.heap.get(value) {
            Some(Value::Closure(c)) if c.self_obj != Some(table) => {
                let bound = Value::Closure(Closure {
                    self_obj: Some(table),
                    ..c.clone()
                });
                self.push_value(bound);
            }
            _ => self.push(value),
        }
    }

    fn exec_jump(&mut self, instr: Instr, cond: JumpCond) -> Result<(), ErrorKind> {
        let target = match instr.arg {
            Some(InstrArg::Offset(o)) => o,
            _ => return Err(ErrorKind::PcOutOfRange),
        };
        let taken = match cond {
            JumpCond::Always => true,
            JumpCond::IfFalsy => {
                let (_, v) = self.pop_obj()?;
                !v.is_truthy()
            }
            JumpCond::IfTruthy => {
                let (_, v) = self.pop_obj()?;
                v.is_truthy()
            }
        };
        if taken {
            self.jump(target)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum JumpCond {
    Always,
    IfFalsy,
    IfTruthy,
}
