//! The standard swarm libraries, installed as native closures.
//!
//! `install_stdlib` binds three global tables the way the original runtime
//! installs its libraries: `swarm` (membership and scoped execution),
//! `neighbors` (the per-robot neighbor table with kin/nonkin filters and
//! broadcast listeners) and `stigmergy` (virtual stigmergy structures).
//! Method closures capture their holding table as `self` when fetched, so
//! instance state travels through table fields.

use crate::error::ErrorKind;
use crate::value::{Closure, ClosureKind, Handle, TableKey, TypeTag, Value};
use crate::vm::{NativeFn, Vm};

/// Install the `swarm`, `neighbors` and `stigmergy` globals plus the `id`
/// constant.
pub fn install_stdlib(vm: &mut Vm) -> Result<(), ErrorKind> {
    let robot = i32::from(vm.robot());
    vm.push_int(robot);
    vm.set_global("id")?;
    install_swarm(vm)?;
    neighbors_reset(vm)?;
    install_stigmergy(vm)?;
    Ok(())
}

/// Register a native and store it under `name` in `table`.
fn insert_native(vm: &mut Vm, table: Handle, name: &str, f: NativeFn) -> Result<(), ErrorKind> {
    let cid = vm.function_register(f);
    let sid = vm.register_string(name, true);
    let closure = vm.alloc_value(Value::Closure(Closure::bare(ClosureKind::Native(cid))));
    vm.table_set(table, TableKey::Str(sid), closure)
}

/// Read an integer field of the `self` table of the running native.
fn self_int_field(vm: &Vm, name: &str) -> Result<i32, ErrorKind> {
    let this = vm.local_at(0).ok_or(ErrorKind::StackUnderflow)?;
    let sid = vm.strings().lookup(name).ok_or(ErrorKind::NoSuchSymbol)?;
    let field = vm
        .table_get(this, &TableKey::Str(sid))?
        .ok_or(ErrorKind::NoSuchSymbol)?;
    match vm.value(field)? {
        Value::Int(i) => Ok(*i),
        v => Err(ErrorKind::type_mismatch(TypeTag::Int, v.tag())),
    }
}

fn arg(vm: &Vm, n: usize) -> Result<Handle, ErrorKind> {
    vm.local_at(n).ok_or(ErrorKind::StackUnderflow)
}

/* ---------------------------------------------------------------- swarm */

fn install_swarm(vm: &mut Vm) -> Result<(), ErrorKind> {
    let table = vm.alloc_value(Value::Table(Default::default()));
    insert_native(vm, table, "create", swarm_create)?;
    insert_native(vm, table, "id", swarm_context_id)?;
    vm.push_handle(table);
    vm.set_global("swarm")
}

/// `swarm.create(id)`: a handle table bound to one swarm id.
fn swarm_create(vm: &mut Vm) -> Result<(), ErrorKind> {
    let id = {
        let h = arg(vm, 1)?;
        match vm.value(h)? {
            Value::Int(i) => *i,
            v => return Err(ErrorKind::type_mismatch(TypeTag::Int, v.tag())),
        }
    };
    let table = vm.alloc_value(Value::Table(Default::default()));
    let id_sid = vm.register_string("id", true);
    let id_val = vm.alloc_value(Value::Int(id));
    vm.table_set(table, TableKey::Str(id_sid), id_val)?;
    insert_native(vm, table, "join", swarm_join)?;
    insert_native(vm, table, "leave", swarm_leave)?;
    insert_native(vm, table, "in", swarm_in)?;
    insert_native(vm, table, "exec", swarm_exec)?;
    vm.push_handle(table);
    vm.ret1()
}

fn swarm_id_of_self(vm: &Vm) -> Result<u16, ErrorKind> {
    let id = self_int_field(vm, "id")?;
    u16::try_from(id).map_err(|_| ErrorKind::TypeError)
}

fn swarm_join(vm: &mut Vm) -> Result<(), ErrorKind> {
    let id = swarm_id_of_self(vm)?;
    vm.swarm_join(id);
    vm.ret0()
}

fn swarm_leave(vm: &mut Vm) -> Result<(), ErrorKind> {
    let id = swarm_id_of_self(vm)?;
    vm.swarm_leave(id);
    vm.ret0()
}

fn swarm_in(vm: &mut Vm) -> Result<(), ErrorKind> {
    let id = swarm_id_of_self(vm)?;
    let member = vm.swarm_members().contains(id);
    vm.push_int(member as i32);
    vm.ret1()
}

/// `s.exec(closure)`: run the closure in the swarm's context, membership
/// permitting.
fn swarm_exec(vm: &mut Vm) -> Result<(), ErrorKind> {
    let id = swarm_id_of_self(vm)?;
    let closure = arg(vm, 1)?;
    if vm.swarm_members().contains(id) {
        vm.swarm_enter(id);
        vm.push_handle(closure);
        vm.call_closure_sync_scoped(0, true)?;
    }
    vm.ret0()
}

/// `swarm.id()`: the innermost active swarm context.
fn swarm_context_id(vm: &mut Vm) -> Result<(), ErrorKind> {
    match vm.swarm_context() {
        Some(id) => {
            vm.push_int(i32::from(id));
        }
        None => vm.push_nil(),
    }
    vm.ret1()
}

/* ------------------------------------------------------------ neighbors */

/// Rebuild the `neighbors` global with an empty data table.
pub fn neighbors_reset(vm: &mut Vm) -> Result<(), ErrorKind> {
    let table = vm.alloc_value(Value::Table(Default::default()));
    insert_native(vm, table, "kin", neighbors_kin)?;
    insert_native(vm, table, "nonkin", neighbors_nonkin)?;
    insert_native(vm, table, "count", neighbors_count)?;
    insert_native(vm, table, "get", neighbors_get)?;
    insert_native(vm, table, "listen", neighbors_listen)?;
    insert_native(vm, table, "ignore", neighbors_ignore)?;
    insert_native(vm, table, "broadcast", neighbors_broadcast)?;
    insert_native(vm, table, "map", neighbors_map)?;
    insert_native(vm, table, "filter", neighbors_filter_by)?;
    insert_native(vm, table, "foreach", neighbors_foreach)?;
    insert_native(vm, table, "reduce", neighbors_reduce)?;
    vm.push_handle(table);
    vm.set_global("neighbors")
}

fn data_sid(vm: &mut Vm) -> TableKey {
    TableKey::Str(vm.register_string("data", true))
}

fn self_data(vm: &mut Vm) -> Result<Option<Handle>, ErrorKind> {
    let this = vm.local_at(0).ok_or(ErrorKind::StackUnderflow)?;
    let key = data_sid(vm);
    vm.table_get(this, &key)
}

/// Filter `self`'s data by membership of the context swarm. Every
/// non-`data` field of `self` (the method closures) is carried over, so the
/// result supports chained filtering.
fn neighbors_filter(vm: &mut Vm, keep_members: bool) -> Result<(), ErrorKind> {
    let this = vm.local_at(0).ok_or(ErrorKind::StackUnderflow)?;
    let swarm = vm.swarm_context();
    let data_key = data_sid(vm);
    let result = vm.alloc_value(Value::Table(Default::default()));
    let entries: Vec<(TableKey, Handle)> = match vm.value(this)? {
        Value::Table(t) => t.iter().map(|(k, v)| (*k, *v)).collect(),
        v => return Err(ErrorKind::type_mismatch(TypeTag::Table, v.tag())),
    };
    for (key, value) in entries {
        if key != data_key {
            vm.table_set(result, key, value)?;
        }
    }
    let data = self_data(vm)?;
    let filtered = vm.alloc_value(Value::Table(Default::default()));
    if let Some(data) = data {
        let rows: Vec<(TableKey, Handle)> = match vm.value(data)? {
            Value::Table(t) => t.iter().map(|(k, v)| (*k, *v)).collect(),
            v => return Err(ErrorKind::type_mismatch(TypeTag::Table, v.tag())),
        };
        for (key, value) in rows {
            let rid = match key.as_number() {
                Some(n) => n as u16,
                None => continue,
            };
            // No active swarm context keeps everything, as if the filter
            // had no swarm to test against.
            let keep = match swarm {
                None => true,
                Some(s) => vm.swarm_registry().is_member(rid, s) == keep_members,
            };
            if keep {
                vm.table_set(filtered, key, value)?;
            }
        }
    }
    vm.table_set(result, data_key, filtered)?;
    vm.push_handle(result);
    vm.ret1()
}

fn neighbors_kin(vm: &mut Vm) -> Result<(), ErrorKind> {
    neighbors_filter(vm, true)
}

fn neighbors_nonkin(vm: &mut Vm) -> Result<(), ErrorKind> {
    neighbors_filter(vm, false)
}

fn neighbors_count(vm: &mut Vm) -> Result<(), ErrorKind> {
    let count = match self_data(vm)? {
        Some(data) => match vm.value(data)? {
            Value::Table(t) => t.len() as i32,
            v => return Err(ErrorKind::type_mismatch(TypeTag::Table, v.tag())),
        },
        None => 0,
    };
    vm.push_int(count);
    vm.ret1()
}

/// `neighbors.get(rid)`: the data row of one neighbor, or nil.
fn neighbors_get(vm: &mut Vm) -> Result<(), ErrorKind> {
    let rid = arg(vm, 1)?;
    let key = {
        let v = vm.value(rid)?;
        TableKey::from_value(v, rid)
    };
    let row = match self_data(vm)? {
        Some(data) => vm.table_get(data, &key)?,
        None => None,
    };
    match row {
        Some(h) => vm.push_handle(h),
        None => vm.push_nil(),
    }
    vm.ret1()
}

/// `neighbors.listen(topic, closure)`: subscribe to a broadcast topic.
fn neighbors_listen(vm: &mut Vm) -> Result<(), ErrorKind> {
    let topic = arg(vm, 1)?;
    let closure = arg(vm, 2)?;
    let sid = match vm.value(topic)? {
        Value::Str(sid) => *sid,
        v => return Err(ErrorKind::type_mismatch(TypeTag::Str, v.tag())),
    };
    if !matches!(vm.value(closure)?, Value::Closure(_)) {
        return Err(ErrorKind::TypeError);
    }
    vm.listen(sid, closure);
    vm.ret0()
}

fn neighbors_ignore(vm: &mut Vm) -> Result<(), ErrorKind> {
    let topic = arg(vm, 1)?;
    let sid = match vm.value(topic)? {
        Value::Str(sid) => *sid,
        v => return Err(ErrorKind::type_mismatch(TypeTag::Str, v.tag())),
    };
    vm.ignore(sid);
    vm.ret0()
}

/// `neighbors.broadcast(topic, value)`: queue a topic broadcast.
fn neighbors_broadcast(vm: &mut Vm) -> Result<(), ErrorKind> {
    let topic = arg(vm, 1)?;
    let value = arg(vm, 2)?;
    let sid = match vm.value(topic)? {
        Value::Str(sid) => *sid,
        v => return Err(ErrorKind::type_mismatch(TypeTag::Str, v.tag())),
    };
    vm.broadcast(sid, value)?;
    vm.ret0()
}

/// The data rows of `self`, as `(robot-id key, row)` pairs.
fn data_rows(vm: &mut Vm) -> Result<Vec<(TableKey, Handle)>, ErrorKind> {
    let Some(data) = self_data(vm)? else {
        return Ok(Vec::new());
    };
    match vm.value(data)? {
        Value::Table(t) => Ok(t.iter().map(|(k, v)| (*k, *v)).collect()),
        v => Err(ErrorKind::type_mismatch(TypeTag::Table, v.tag())),
    }
}

fn key_as_value(vm: &mut Vm, key: TableKey) -> Handle {
    match key.to_scalar() {
        Ok(v) => vm.alloc_value(v),
        Err(h) => h,
    }
}

/// `neighbors.map(function(rid, data))`: a table of per-neighbor results.
fn neighbors_map(vm: &mut Vm) -> Result<(), ErrorKind> {
    let closure = arg(vm, 1)?;
    let result = vm.alloc_value(Value::Table(Default::default()));
    for (key, row) in data_rows(vm)? {
        vm.push_handle(closure);
        let rid = key_as_value(vm, key);
        vm.push_handle(rid);
        vm.push_handle(row);
        vm.call_closure_sync(2)?;
        let mapped = vm.pop_handle()?;
        vm.table_set(result, key, mapped)?;
    }
    vm.push_handle(result);
    vm.ret1()
}

/// `neighbors.filter(function(rid, data))`: the sub-table of neighbors the
/// predicate keeps.
fn neighbors_filter_by(vm: &mut Vm) -> Result<(), ErrorKind> {
    let closure = arg(vm, 1)?;
    let this = vm.local_at(0).ok_or(ErrorKind::StackUnderflow)?;
    let data_key = data_sid(vm);
    let result = vm.alloc_value(Value::Table(Default::default()));
    let fields: Vec<(TableKey, Handle)> = match vm.value(this)? {
        Value::Table(t) => t.iter().map(|(k, v)| (*k, *v)).collect(),
        v => return Err(ErrorKind::type_mismatch(TypeTag::Table, v.tag())),
    };
    for (key, value) in fields {
        if key != data_key {
            vm.table_set(result, key, value)?;
        }
    }
    let filtered = vm.alloc_value(Value::Table(Default::default()));
    for (key, row) in data_rows(vm)? {
        vm.push_handle(closure);
        let rid = key_as_value(vm, key);
        vm.push_handle(rid);
        vm.push_handle(row);
        vm.call_closure_sync(2)?;
        let verdict = vm.pop_handle()?;
        if vm.value(verdict)?.is_truthy() {
            vm.table_set(filtered, key, row)?;
        }
    }
    vm.table_set(result, data_key, filtered)?;
    vm.push_handle(result);
    vm.ret1()
}

/// `neighbors.foreach(function(rid, data))`: side effects only.
fn neighbors_foreach(vm: &mut Vm) -> Result<(), ErrorKind> {
    let closure = arg(vm, 1)?;
    for (key, row) in data_rows(vm)? {
        vm.push_handle(closure);
        let rid = key_as_value(vm, key);
        vm.push_handle(rid);
        vm.push_handle(row);
        vm.call_closure_sync(2)?;
    }
    vm.ret0()
}

/// `neighbors.reduce(function(rid, data, accum), initial)`: fold the data
/// rows in robot-id order.
fn neighbors_reduce(vm: &mut Vm) -> Result<(), ErrorKind> {
    let closure = arg(vm, 1)?;
    let mut accum = arg(vm, 2)?;
    for (key, row) in data_rows(vm)? {
        vm.push_handle(closure);
        let rid = key_as_value(vm, key);
        vm.push_handle(rid);
        vm.push_handle(row);
        vm.push_handle(accum);
        vm.call_closure_sync(3)?;
        accum = vm.pop_handle()?;
    }
    vm.push_handle(accum);
    vm.ret1()
}

/* ------------------------------------------------------------ stigmergy */

fn install_stigmergy(vm: &mut Vm) -> Result<(), ErrorKind> {
    let table = vm.alloc_value(Value::Table(Default::default()));
    insert_native(vm, table, "create", stigmergy_create)?;
    vm.push_handle(table);
    vm.set_global("stigmergy")
}

/// `stigmergy.create(id)`: a handle table bound to one vstig id.
fn stigmergy_create(vm: &mut Vm) -> Result<(), ErrorKind> {
    let id = {
        let h = arg(vm, 1)?;
        match vm.value(h)? {
            Value::Int(i) => *i,
            v => return Err(ErrorKind::type_mismatch(TypeTag::Int, v.tag())),
        }
    };
    let table = vm.alloc_value(Value::Table(Default::default()));
    let id_sid = vm.register_string("id", true);
    let id_val = vm.alloc_value(Value::Int(id));
    vm.table_set(table, TableKey::Str(id_sid), id_val)?;
    insert_native(vm, table, "put", stigmergy_put)?;
    insert_native(vm, table, "get", stigmergy_get)?;
    insert_native(vm, table, "size", stigmergy_size)?;
    vm.push_handle(table);
    vm.ret1()
}

fn stigmergy_id_of_self(vm: &Vm) -> Result<u16, ErrorKind> {
    let id = self_int_field(vm, "id")?;
    u16::try_from(id).map_err(|_| ErrorKind::TypeError)
}

/// `vs.put(key, value)`: keys are strings, values wire-encodable scalars.
fn stigmergy_put(vm: &mut Vm) -> Result<(), ErrorKind> {
    let id = stigmergy_id_of_self(vm)?;
    let key = arg(vm, 1)?;
    let value = arg(vm, 2)?;
    let sid = match vm.value(key)? {
        Value::Str(sid) => *sid,
        v => return Err(ErrorKind::type_mismatch(TypeTag::Str, v.tag())),
    };
    vm.vstig_store(id, sid, value)?;
    vm.ret0()
}

fn stigmergy_get(vm: &mut Vm) -> Result<(), ErrorKind> {
    let id = stigmergy_id_of_self(vm)?;
    let key = arg(vm, 1)?;
    let sid = match vm.value(key)? {
        Value::Str(sid) => *sid,
        v => return Err(ErrorKind::type_mismatch(TypeTag::Str, v.tag())),
    };
    match vm.vstig_fetch(id, sid)? {
        Some(h) => vm.push_handle(h),
        None => vm.push_nil(),
    }
    vm.ret1()
}

fn stigmergy_size(vm: &mut Vm) -> Result<(), ErrorKind> {
    let id = stigmergy_id_of_self(vm)?;
    let size = vm.vstig(id).map_or(0, |vs| vs.len()) as i32;
    vm.push_int(size);
    vm.ret1()
}

/* ------------------------------------------------------- host-side entry */

impl Vm {
    /// Record a sensed neighbor in the `neighbors.data` table, keyed by
    /// robot id, with its spherical position relative to this robot.
    pub fn neighbors_add(
        &mut self,
        robot: u16,
        distance: f32,
        azimuth: f32,
        elevation: f32,
    ) -> Result<(), ErrorKind> {
        let neighbors = self
            .get_global("neighbors")?
            .ok_or(ErrorKind::NoSuchSymbol)?;
        let data_key = TableKey::Str(self.register_string("data", true));
        let data = match self.table_get(neighbors, &data_key)? {
            Some(h) => h,
            None => {
                let h = self.alloc_value(Value::Table(Default::default()));
                self.table_set(neighbors, data_key, h)?;
                h
            }
        };
        let entry = self.alloc_value(Value::Table(Default::default()));
        for (name, v) in [
            ("distance", distance),
            ("azimuth", azimuth),
            ("elevation", elevation),
        ] {
            let sid = self.register_string(name, true);
            let value = self.alloc_value(Value::Float(v));
            self.table_set(entry, TableKey::Str(sid), value)?;
        }
        self.table_set(data, TableKey::Int(i32::from(robot)), entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buzz_asm::BytecodeBlob;

    fn vm() -> Vm {
        // String count 0, no code: enough to host natives.
        let blob = BytecodeBlob::from_bytes(vec![0, 0]).unwrap();
        let mut vm = Vm::new(blob, 7);
        install_stdlib(&mut vm).unwrap();
        vm
    }

    #[test]
    fn id_global_is_the_robot() {
        let mut vm = vm();
        let id = vm.get_global("id").unwrap().unwrap();
        assert_eq!(vm.value(id).unwrap(), &Value::Int(7));
    }

    #[test]
    fn swarm_create_join_and_in() {
        let mut vm = vm();
        // s = swarm.create(3); s.join(); s.in()
        let swarm = vm.get_global("swarm").unwrap().unwrap();
        let create_sid = vm.strings().lookup("create").unwrap();
        let create = vm.table_get(swarm, &TableKey::Str(create_sid)).unwrap().unwrap();
        vm.push_handle(create);
        vm.push_int(3);
        vm.call_closure_sync(1).unwrap();
        let s = vm.pop_table().unwrap();

        let join_sid = vm.strings().lookup("join").unwrap();
        let join = vm.table_get(s, &TableKey::Str(join_sid)).unwrap().unwrap();
        // Bind self by hand, as tget would.
        let bound = match vm.value(join).unwrap() {
            Value::Closure(c) => Value::Closure(Closure {
                self_obj: Some(s),
                ..c.clone()
            }),
            other => panic!("expected closure, got {other:?}"),
        };
        let bound = vm.alloc_value(bound);
        vm.push_handle(bound);
        vm.call_closure_sync(0).unwrap();

        assert!(vm.swarm_members().contains(3));
        assert!(!vm.out_msgs().is_empty());
    }

    #[test]
    fn neighbors_add_populates_data() {
        let mut vm = vm();
        vm.neighbors_add(4, 1.5, 0.2, -0.1).unwrap();
        let neighbors = vm.get_global("neighbors").unwrap().unwrap();
        let data_sid = vm.strings().lookup("data").unwrap();
        let data = vm
            .table_get(neighbors, &TableKey::Str(data_sid))
            .unwrap()
            .unwrap();
        let row = vm.table_get(data, &TableKey::Int(4)).unwrap().unwrap();
        let dist_sid = vm.strings().lookup("distance").unwrap();
        let dist = vm.table_get(row, &TableKey::Str(dist_sid)).unwrap().unwrap();
        assert_eq!(vm.value(dist).unwrap(), &Value::Float(1.5));
    }

    #[test]
    fn stigmergy_roundtrip_through_natives() {
        let mut vm = vm();
        let stig = vm.get_global("stigmergy").unwrap().unwrap();
        let create_sid = vm.strings().lookup("create").unwrap();
        let create = vm.table_get(stig, &TableKey::Str(create_sid)).unwrap().unwrap();
        vm.push_handle(create);
        vm.push_int(1);
        vm.call_closure_sync(1).unwrap();
        let vs = vm.pop_table().unwrap();

        let put_sid = vm.strings().lookup("put").unwrap();
        let put = vm.table_get(vs, &TableKey::Str(put_sid)).unwrap().unwrap();
        let bound = match vm.value(put).unwrap() {
            Value::Closure(c) => Value::Closure(Closure {
                self_obj: Some(vs),
                ..c.clone()
            }),
            other => panic!("expected closure, got {other:?}"),
        };
        let bound = vm.alloc_value(bound);
        vm.push_handle(bound);
        vm.push_string("k");
        vm.push_int(42);
        vm.call_closure_sync(2).unwrap();

        let key = vm.strings().lookup("k").unwrap();
        let entry = *vm.vstig(1).unwrap().get(key).unwrap();
        assert_eq!(vm.value(entry.value).unwrap(), &Value::Int(42));
        assert_eq!((entry.timestamp, entry.robot), (1, 7));
    }
}
