//! Stack and heap plumbing shared by the instruction implementations.

use super::Vm;
use crate::error::ErrorKind;
use crate::msg::WireValue;
use crate::strings::StrId;
use crate::value::{Handle, TableKey, TypeTag, Value};

impl Vm {
    pub(crate) fn current_stack(&mut self) -> &mut Vec<Handle> {
        self.stacks.last_mut().expect("one stack per call level")
    }

    pub(crate) fn current_locals(&mut self) -> &mut Vec<Handle> {
        self.lsyms.last_mut().expect("one symbol table per call level")
    }

    /// Push an existing value.
    pub(crate) fn push(&mut self, h: Handle) {
        self.current_stack().push(h);
    }

    /// Allocate a value and push it.
    pub(crate) fn push_value(&mut self, v: Value) -> Handle {
        let h = self.heap.alloc(v);
        self.push(h);
        h
    }

    /// Allocate a value without pushing it.
    pub fn alloc_value(&mut self, v: Value) -> Handle {
        self.heap.alloc(v)
    }

    /// Pop the stack top.
    pub(crate) fn pop(&mut self) -> Result<Handle, ErrorKind> {
        self.current_stack().pop().ok_or(ErrorKind::StackUnderflow)
    }

    /// The value at 1-based depth `n` from the top of the current stack.
    pub(crate) fn peek(&self, n: usize) -> Result<Handle, ErrorKind> {
        let stack = self.stacks.last().expect("one stack per call level");
        if n == 0 || n > stack.len() {
            return Err(ErrorKind::StackUnderflow);
        }
        Ok(stack[stack.len() - n])
    }

    /// Resolve a handle; dangling handles are host misuse and surface as a
    /// type mismatch rather than a panic.
    pub fn value(&self, h: Handle) -> Result<&Value, ErrorKind> {
        self.heap.get(h).ok_or(ErrorKind::TypeError)
    }

    pub(crate) fn obj(&self, h: Handle) -> Result<&Value, ErrorKind> {
        self.value(h)
    }

    /// Pop and resolve in one step, returning both handle and a clone of
    /// the value tag-relevant content where cheap. Callers that need the
    /// full value clone it themselves.
    pub(crate) fn pop_obj(&mut self) -> Result<(Handle, &Value), ErrorKind> {
        let h = self.pop()?;
        Ok((h, self.heap.get(h).ok_or(ErrorKind::TypeError)?))
    }

    /// Pop a value that must be an interned string.
    pub fn pop_str(&mut self) -> Result<StrId, ErrorKind> {
        match self.pop_obj()? {
            (_, Value::Str(sid)) => Ok(*sid),
            (_, v) => Err(ErrorKind::type_mismatch(TypeTag::Str, v.tag())),
        }
    }

    /// Pop a value that must be an integer.
    pub fn pop_int(&mut self) -> Result<i32, ErrorKind> {
        match self.pop_obj()? {
            (_, Value::Int(i)) => Ok(*i),
            (_, v) => Err(ErrorKind::type_mismatch(TypeTag::Int, v.tag())),
        }
    }

    /// Pop a value that must be a table, returning its handle.
    pub fn pop_table(&mut self) -> Result<Handle, ErrorKind> {
        match self.pop_obj()? {
            (h, Value::Table(_)) => Ok(h),
            (_, v) => Err(ErrorKind::type_mismatch(TypeTag::Table, v.tag())),
        }
    }

    /// Convert a non-negative instruction immediate into an index.
    pub(crate) fn index_arg(arg: i32) -> Result<usize, ErrorKind> {
        usize::try_from(arg).map_err(|_| ErrorKind::TypeError)
    }

    /// Read a table slot.
    pub fn table_get(&self, table: Handle, key: &TableKey) -> Result<Option<Handle>, ErrorKind> {
        match self.obj(table)? {
            Value::Table(entries) => Ok(entries.get(key).copied()),
            v => Err(ErrorKind::type_mismatch(TypeTag::Table, v.tag())),
        }
    }

    /// Write a table slot; a nil value removes the key.
    pub fn table_set(
        &mut self,
        table: Handle,
        key: TableKey,
        value: Handle,
    ) -> Result<(), ErrorKind> {
        let is_nil = matches!(self.obj(value)?, Value::Nil);
        match self.heap.get_mut(table) {
            Some(Value::Table(entries)) => {
                if is_nil {
                    entries.remove(&key);
                } else {
                    entries.insert(key, value);
                }
                Ok(())
            }
            Some(v) => Err(ErrorKind::type_mismatch(TypeTag::Table, v.tag())),
            None => Err(ErrorKind::TypeError),
        }
    }

    /// Project the stack value behind `h` into table-key form.
    pub(crate) fn key_of(&self, h: Handle) -> Result<TableKey, ErrorKind> {
        Ok(TableKey::from_value(self.obj(h)?, h))
    }

    /// Snapshot a heap value into wire form; compound values do not travel.
    pub(crate) fn wire_of(&self, h: Handle) -> Result<WireValue, ErrorKind> {
        match self.obj(h)? {
            Value::Nil => Ok(WireValue::Nil),
            Value::Int(i) => Ok(WireValue::Int(*i)),
            Value::Float(x) => Ok(WireValue::Float(*x)),
            Value::Str(sid) => Ok(WireValue::Str(*sid)),
            v => Err(ErrorKind::type_mismatch(TypeTag::Int, v.tag())),
        }
    }

    /// Materialize a wire value into the heap.
    pub(crate) fn value_of_wire(&mut self, w: WireValue) -> Handle {
        match w {
            WireValue::Nil => self.nil,
            WireValue::Int(i) => self.heap.alloc(Value::Int(i)),
            WireValue::Float(x) => self.heap.alloc(Value::Float(x)),
            WireValue::Str(sid) => self.heap.alloc(Value::Str(sid)),
        }
    }
}
