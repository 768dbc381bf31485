//! End-to-end execution tests over assembled programs.

use buzz_asm::assemble;
use buzz_vm::prelude::*;
use buzz_vm::ErrorRecord;

fn load(src: &str) -> Vm {
    let (blob, _) = assemble(src, "test.basm").expect("assembly failed");
    Vm::new(blob, 1)
}

fn run(src: &str) -> Vm {
    let mut vm = load(src);
    vm.execute();
    vm
}

fn top_value(vm: &Vm) -> Value {
    let h = vm.stack_at(1).expect("empty stack");
    vm.value(h).expect("dangling handle").clone()
}

fn error_kind(vm: &Vm) -> ErrorKind {
    let ErrorRecord { kind, .. } = vm.error().expect("no error recorded");
    kind
}

#[test]
fn arithmetic_program_reaches_done_with_42() {
    let vm = run("!0\npushi 41\npushi 1\nadd\ndone\n");
    assert_eq!(vm.state(), VmState::Done);
    assert_eq!(top_value(&vm), Value::Int(42));
}

#[test]
fn counted_loop_reaches_done() {
    let vm = run(
        "!0\n\
         pushi 5\n\
         lstore 0\n\
         @loop\n\
         lload 0\n\
         pushi 1\n\
         sub\n\
         lstore 0\n\
         lload 0\n\
         jumpnz loop\n\
         done\n",
    );
    assert_eq!(vm.state(), VmState::Done);
    assert_eq!(vm.stack_height(), 0);
}

#[test]
fn mixed_arithmetic_promotes_to_float() {
    let vm = run("!0\npushi 3\npushf 0.5\nmul\ndone\n");
    assert_eq!(top_value(&vm), Value::Float(1.5));
}

#[test]
fn pow_always_promotes() {
    let vm = run("!0\npushi 2\npushi 10\npow\ndone\n");
    assert_eq!(top_value(&vm), Value::Float(1024.0));
}

#[test]
fn modulo_takes_the_dividend_sign() {
    let vm = run("!0\npushi -7\npushi 3\nmod\ndone\n");
    assert_eq!(top_value(&vm), Value::Int(-1));
}

#[test]
fn integer_division_by_zero_is_fatal() {
    let vm = run("!0\npushi 1\npushi 0\ndiv\ndone\n");
    assert_eq!(vm.state(), VmState::Error);
    assert_eq!(error_kind(&vm), ErrorKind::DivByZero);
}

#[test]
fn float_division_by_zero_follows_ieee() {
    let vm = run("!0\npushf 1.0\npushi 0\ndiv\ndone\n");
    assert_eq!(vm.state(), VmState::Done);
    assert_eq!(top_value(&vm), Value::Float(f32::INFINITY));
}

#[test]
fn comparisons_promote_across_tags() {
    let vm = run("!0\npushi 2\npushf 2.0\neq\ndone\n");
    assert_eq!(top_value(&vm), Value::Int(1));
    let vm = run("!0\npushi 3\npushf 2.5\ngt\ndone\n");
    assert_eq!(top_value(&vm), Value::Int(1));
}

#[test]
fn ordering_nil_is_a_type_error() {
    let vm = run("!0\npushnil\npushi 1\nlt\ndone\n");
    assert_eq!(vm.state(), VmState::Error);
    assert_eq!(error_kind(&vm), ErrorKind::TypeError);
}

#[test]
fn pop_on_empty_stack_underflows() {
    let vm = run("!0\npop\ndone\n");
    assert_eq!(error_kind(&vm), ErrorKind::StackUnderflow);
    assert_eq!(vm.error().unwrap().pc, vm.bcode().code_start());
}

#[test]
fn unknown_opcode_is_fatal() {
    let blob = BytecodeBlob::from_bytes(vec![0, 0, 0xee]).unwrap();
    let mut vm = Vm::new(blob, 1);
    vm.execute();
    assert_eq!(vm.state(), VmState::Error);
    assert_eq!(error_kind(&vm), ErrorKind::UnknownOpcode);
}

#[test]
fn jump_outside_the_blob_is_fatal() {
    let mut bytes = vec![0u8, 0, Opcode::Jump as u8];
    bytes.extend_from_slice(&500u32.to_le_bytes());
    let blob = BytecodeBlob::from_bytes(bytes).unwrap();
    let mut vm = Vm::new(blob, 1);
    vm.execute();
    assert_eq!(error_kind(&vm), ErrorKind::PcOutOfRange);
}

#[test]
fn running_off_the_end_is_fatal() {
    let blob = BytecodeBlob::from_bytes(vec![0, 0, Opcode::Nop as u8]).unwrap();
    let mut vm = Vm::new(blob, 1);
    vm.execute();
    assert_eq!(error_kind(&vm), ErrorKind::PcOutOfRange);
}

#[test]
fn done_and_error_states_are_terminal() {
    let mut vm = run("!0\ndone\n");
    assert_eq!(vm.step(), VmState::Done);
    assert_eq!(vm.step(), VmState::Done);
    let mut vm = run("!0\npop\n");
    assert_eq!(vm.step(), VmState::Error);
}

#[test]
fn bytecode_closure_call_and_return() {
    let vm = run(
        "!0\n\
         pushcc body\n\
         pushi 6\n\
         pushi 7\n\
         callc 2\n\
         done\n\
         @body\n\
         lload 1\n\
         lload 2\n\
         mul\n\
         ret1\n",
    );
    assert_eq!(vm.state(), VmState::Done);
    assert_eq!(top_value(&vm), Value::Int(42));
    assert_eq!(vm.call_depth(), 0);
}

#[test]
fn lambda_captures_locals_as_upvalues() {
    let vm = run(
        "!0\n\
         pushi 99\n\
         lstore 0\n\
         pushl body\n\
         callc 0\n\
         done\n\
         @body\n\
         lload 1\n\
         ret1\n",
    );
    assert_eq!(top_value(&vm), Value::Int(99));
}

#[test]
fn ret0_discards_the_callee_stack() {
    let vm = run(
        "!0\n\
         pushcc body\n\
         callc 0\n\
         done\n\
         @body\n\
         pushi 1\n\
         pushi 2\n\
         pushi 3\n\
         ret0\n",
    );
    assert_eq!(vm.state(), VmState::Done);
    assert_eq!(vm.stack_height(), 0);
}

#[test]
fn calling_a_non_closure_is_a_type_error() {
    let vm = run("!0\npushi 3\ncallc 0\ndone\n");
    assert_eq!(error_kind(&vm), ErrorKind::TypeError);
}

#[test]
fn unregistered_native_is_no_such_closure() {
    let vm = run("!0\npushcn 9\ncallc 0\ndone\n");
    assert_eq!(error_kind(&vm), ErrorKind::NoSuchClosure);
}

#[test]
fn runaway_recursion_overflows_the_frame_stack() {
    let (blob, _) = assemble(
        "!0\npushcc body\ncallc 0\ndone\n@body\npushcc body\ncallc 0\nret0\n",
        "test.basm",
    )
    .unwrap();
    let mut vm = Vm::new(blob, 1).with_frame_limit(16);
    vm.execute();
    assert_eq!(error_kind(&vm), ErrorKind::StackOverflow);
}

#[test]
fn native_closure_returns_one_value() {
    fn double(vm: &mut Vm) -> Result<(), ErrorKind> {
        let arg = vm.local_at(1).ok_or(ErrorKind::StackUnderflow)?;
        let doubled = match vm.value(arg)? {
            Value::Int(i) => i * 2,
            _ => return Err(ErrorKind::TypeError),
        };
        vm.push_int(doubled);
        vm.ret1()
    }
    let mut vm = load("!0\npushcn 0\npushi 5\ncallc 1\ndone\n");
    assert_eq!(vm.function_register(double), 0);
    vm.execute();
    assert_eq!(vm.state(), VmState::Done);
    assert_eq!(top_value(&vm), Value::Int(10));
}

#[test]
fn native_without_explicit_return_acts_as_ret0() {
    fn noop(_vm: &mut Vm) -> Result<(), ErrorKind> {
        Ok(())
    }
    let mut vm = load("!0\npushcn 0\ncallc 0\ndone\n");
    vm.function_register(noop);
    vm.execute();
    assert_eq!(vm.state(), VmState::Done);
    assert_eq!(vm.stack_height(), 0);
    assert_eq!(vm.call_depth(), 0);
}

#[test]
fn table_put_and_get() {
    let vm = run(
        "!1\n\
         'key\n\
         pusht\n\
         lstore 0\n\
         lload 0\n\
         pushs 0\n\
         pushi 17\n\
         tput\n\
         lload 0\n\
         pushs 0\n\
         tget\n\
         done\n",
    );
    assert_eq!(top_value(&vm), Value::Int(17));
}

#[test]
fn numeric_table_keys_unify() {
    let vm = run(
        "!0\n\
         pusht\n\
         lstore 0\n\
         lload 0\n\
         pushi 1\n\
         pushi 10\n\
         tput\n\
         lload 0\n\
         pushf 1.0\n\
         tget\n\
         done\n",
    );
    assert_eq!(top_value(&vm), Value::Int(10));
}

#[test]
fn missing_table_key_yields_nil() {
    let vm = run("!1\n'k\npusht\npushs 0\ntget\ndone\n");
    assert_eq!(top_value(&vm), Value::Nil);
}

#[test]
fn globals_default_to_nil_when_lenient() {
    let vm = run("!1\n'x\npushs 0\ngload\ndone\n");
    assert_eq!(vm.state(), VmState::Done);
    assert_eq!(top_value(&vm), Value::Nil);
}

#[test]
fn strict_globals_raise_no_such_symbol() {
    let (blob, _) = assemble("!1\n'x\npushs 0\ngload\ndone\n", "test.basm").unwrap();
    let mut vm = Vm::new(blob, 1).with_strict_globals();
    vm.execute();
    assert_eq!(error_kind(&vm), ErrorKind::NoSuchSymbol);
}

#[test]
fn global_store_then_load() {
    let vm = run(
        "!1\n\
         'x\n\
         pushs 0\n\
         pushi 23\n\
         gstore\n\
         pushs 0\n\
         gload\n\
         done\n",
    );
    assert_eq!(top_value(&vm), Value::Int(23));
}

#[test]
fn gc_keeps_reachable_values_only() {
    let mut vm = run(
        "!1\n\
         'x\n\
         pushs 0\n\
         pushi 1\n\
         gstore\n\
         pushi 2\n\
         pushi 3\n\
         pop\n\
         pop\n\
         pushi 4\n\
         done\n",
    );
    let live_before = vm.heap().live();
    vm.gc();
    assert!(vm.heap().live() < live_before);
    // The global and the surviving stack value are untouched.
    assert_eq!(top_value(&vm), Value::Int(4));
    let x = vm.get_global("x").unwrap().unwrap();
    assert_eq!(vm.value(x).unwrap(), &Value::Int(1));
}

#[test]
fn gc_collects_unprotected_dynamic_strings() {
    let mut vm = run("!0\ndone\n");
    let kept = vm.register_string("kept", true);
    let lost = vm.register_string("lost", false);
    vm.gc();
    assert_eq!(vm.strings().get(kept), Some("kept"));
    assert_eq!(vm.strings().get(lost), None);
}

#[test]
fn vms_with_the_same_inputs_converge_to_the_same_state() {
    let src = "!1\n\
               'x\n\
               pushs 0\n\
               pushi 7\n\
               gstore\n\
               pushs 0\n\
               gload\n\
               pushi 35\n\
               add\n\
               done\n";
    let arrivals: Vec<(u16, Vec<u8>)> = vec![
        (
            9,
            Message::VstigPut {
                vstig: 1,
                key: 1,
                entry: WireEntry {
                    value: WireValue::Int(5),
                    timestamp: 3,
                    robot: 9,
                },
            }
            .encode(),
        ),
        (9, Message::SwarmJoin { robot: 9, swarm: 2 }.encode()),
    ];
    let run_one = || {
        let (blob, _) = assemble(src, "test.basm").unwrap();
        let mut vm = Vm::new(blob, 1);
        for (from, payload) in &arrivals {
            vm.in_msgs().append(*from, payload.clone());
        }
        vm.process_in_msgs();
        vm.execute();
        let out = vm.out_msgs().drain();
        (
            vm.state(),
            vm.pc(),
            top_value(&vm),
            vm.vstig(1).unwrap().get(1).unwrap().stamp(),
            vm.swarm_registry().is_member(9, 2),
            out,
        )
    };
    assert_eq!(run_one(), run_one());
}
