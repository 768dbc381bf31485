//! The native registration API: what a host embeds to talk to programs.

use std::collections::BTreeMap;

use tracing::debug;

use super::Vm;
use crate::error::{ErrorKind, VmError};
use crate::strings::StrId;
use crate::value::{Closure, ClosureKind, Handle, TableKey, TypeTag, Value};

/// A host function installable as a native closure.
///
/// Natives receive their arguments through the fresh call stack and the
/// local-symbol table (`local 0` is `self`), and finish with
/// [`Vm::ret0`]/[`Vm::ret1`].
pub type NativeFn = fn(&mut Vm) -> Result<(), ErrorKind>;

impl Vm {
    /// Intern a string, optionally protected from collection.
    pub fn register_string(&mut self, s: &str, protect: bool) -> StrId {
        self.strings.register(s, protect)
    }

    /// Register a host function, returning the id `pushcn` refers to.
    pub fn function_register(&mut self, f: NativeFn) -> u32 {
        self.natives.push(f);
        let cid = self.natives.len() as u32 - 1;
        debug!(cid, "native function registered");
        cid
    }

    /// Call the global closure named `name` with `argc` arguments already
    /// on the stack, and run it to completion.
    pub fn function_call(&mut self, name: &str, argc: usize) -> Result<(), VmError> {
        if !self.state.is_ready() {
            return Err(VmError::NotReady(self.state));
        }
        let at = self.pc;
        if let Err(kind) = self.function_call_inner(name, argc) {
            self.die(kind, at);
            return Err(VmError::Runtime { kind, pc: at });
        }
        Ok(())
    }

    fn function_call_inner(&mut self, name: &str, argc: usize) -> Result<(), ErrorKind> {
        let sid = self.strings.register(name, false);
        let closure = self
            .table_get(self.globals, &TableKey::Str(sid))?
            .ok_or(ErrorKind::NoSuchFunction)?;
        if !matches!(self.obj(closure)?, Value::Closure(_)) {
            return Err(ErrorKind::NoSuchFunction);
        }
        // Slide the closure beneath the already-pushed arguments.
        let stack = self.current_stack();
        let at = stack.len() - argc.min(stack.len());
        stack.insert(at, closure);
        self.call_closure_sync(argc)
    }

    /// Push nil.
    pub fn push_nil(&mut self) {
        self.push(self.nil);
    }

    /// Push an integer.
    pub fn push_int(&mut self, i: i32) -> Handle {
        self.push_value(Value::Int(i))
    }

    /// Push a float.
    pub fn push_float(&mut self, x: f32) -> Handle {
        self.push_value(Value::Float(x))
    }

    /// Intern and push a string.
    pub fn push_string(&mut self, s: &str) -> Handle {
        let sid = self.strings.register(s, false);
        self.push_value(Value::Str(sid))
    }

    /// Push an already-interned string id.
    pub fn push_sid(&mut self, sid: StrId) -> Handle {
        self.push_value(Value::Str(sid))
    }

    /// Push a new empty table.
    pub fn push_table(&mut self) -> Handle {
        self.push_value(Value::Table(BTreeMap::new()))
    }

    /// Push a native closure for a registered function id.
    pub fn push_native_closure(&mut self, cid: u32) -> Handle {
        self.push_value(Value::Closure(Closure::bare(ClosureKind::Native(cid))))
    }

    /// Push an opaque host pointer.
    pub fn push_userdata(&mut self, data: u64) -> Handle {
        self.push_value(Value::UserData(data))
    }

    /// Push an existing heap value.
    pub fn push_handle(&mut self, h: Handle) {
        self.push(h);
    }

    /// The handle at 1-based depth `n` from the stack top.
    pub fn stack_at(&self, n: usize) -> Result<Handle, ErrorKind> {
        self.peek(n)
    }

    /// The value at 1-based depth `n` from the stack top.
    pub fn value_at(&self, n: usize) -> Result<&Value, ErrorKind> {
        let h = self.peek(n)?;
        self.obj(h)
    }

    /// The local-symbol table entry at `idx` of the current frame.
    pub fn local_at(&self, idx: usize) -> Option<Handle> {
        self.lsyms.last().and_then(|l| l.get(idx).copied())
    }

    /// Number of locals in the current frame, implicit `self` included.
    pub fn local_count(&self) -> usize {
        self.lsyms.last().map_or(0, Vec::len)
    }

    /// Return from the current native call with no value.
    pub fn ret0(&mut self) -> Result<(), ErrorKind> {
        self.do_ret0()
    }

    /// Return from the current native call with the value on the stack top.
    pub fn ret1(&mut self) -> Result<(), ErrorKind> {
        self.do_ret1()
    }

    /// Bind a global by name to the value on the stack top.
    pub fn set_global(&mut self, name: &str) -> Result<(), ErrorKind> {
        let sid = self.strings.register(name, true);
        let value = self.pop()?;
        self.table_set(self.globals, TableKey::Str(sid), value)
    }

    /// Read a global by name.
    pub fn get_global(&mut self, name: &str) -> Result<Option<Handle>, ErrorKind> {
        let sid = self.strings.register(name, false);
        self.table_get(self.globals, &TableKey::Str(sid))
    }

    /// Pop the stack top.
    pub fn pop_handle(&mut self) -> Result<Handle, ErrorKind> {
        self.pop()
    }

    /// Pop a value that must be numeric, promoted to float.
    pub fn pop_number(&mut self) -> Result<f32, ErrorKind> {
        let (_, v) = self.pop_obj()?;
        match v {
            Value::Int(i) => Ok(*i as f32),
            Value::Float(x) => Ok(*x),
            v => Err(ErrorKind::type_mismatch(TypeTag::Float, v.tag())),
        }
    }

    /// Pop a value that must be a closure, returning its handle.
    pub fn pop_closure(&mut self) -> Result<Handle, ErrorKind> {
        match self.pop_obj()? {
            (h, Value::Closure(_)) => Ok(h),
            (_, v) => Err(ErrorKind::type_mismatch(TypeTag::Closure, v.tag())),
        }
    }
}
