//! Virtual-stigmergy replication across a small swarm of VMs.

use buzz_asm::assemble;
use buzz_vm::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

fn load(robot: u16) -> Vm {
    let (blob, _) = assemble("!1\n'k\ndone\n", "test.basm").expect("assembly failed");
    Vm::new(blob, robot)
}

fn key(vm: &Vm) -> u16 {
    vm.strings().lookup("k").expect("blob string")
}

/// One gossip round: everyone's queued traffic reaches everyone else.
fn gossip_round(vms: &mut [Vm]) -> usize {
    let mut deliveries = 0;
    let payloads: Vec<(u16, Vec<Vec<u8>>)> = vms
        .iter_mut()
        .map(|vm| (vm.robot(), vm.out_msgs().drain()))
        .collect();
    for vm in vms.iter_mut() {
        for (sender, msgs) in &payloads {
            if *sender == vm.robot() {
                continue;
            }
            for payload in msgs {
                vm.in_msgs().append(*sender, payload.clone());
                deliveries += 1;
            }
        }
        vm.process_in_msgs();
    }
    deliveries
}

fn stamp(vm: &Vm, vstig: u16) -> Option<(u32, u16)> {
    vm.vstig(vstig)
        .and_then(|vs| vs.get(key(vm)))
        .map(|e| e.stamp())
}

fn stored_int(vm: &Vm, vstig: u16) -> Option<i32> {
    let entry = vm.vstig(vstig)?.get(key(vm))?;
    match vm.value(entry.value).ok()? {
        Value::Int(i) => Some(*i),
        _ => None,
    }
}

#[test]
fn replicas_converge_to_the_greatest_stamp() {
    let mut vms = [load(1), load(2), load(3)];
    for vm in &mut vms {
        let k = key(vm);
        let value = vm.alloc_value(Value::Int(i32::from(vm.robot()) * 100));
        vm.vstig_store(1, k, value).unwrap();
    }
    // Every robot wrote at timestamp 1; the greatest (ts, robot) tuple is
    // robot 3's write.
    while gossip_round(&mut vms) > 0 {}
    for vm in &vms {
        assert_eq!(stamp(vm, 1), Some((1, 3)));
        assert_eq!(stored_int(vm, 1), Some(300));
        assert_eq!(vm.state(), VmState::Ready);
    }
}

#[test]
fn convergence_is_independent_of_delivery_order() {
    let mut rng = StdRng::seed_from_u64(2322);
    for _ in 0..5 {
        let mut vms = [load(1), load(2), load(3), load(4)];
        for vm in &mut vms {
            let k = key(vm);
            let value = vm.alloc_value(Value::Int(i32::from(vm.robot())));
            vm.vstig_store(1, k, value).unwrap();
        }
        loop {
            let mut deliveries: Vec<(u16, usize, Vec<u8>)> = Vec::new();
            for sender in 0..vms.len() {
                let from = vms[sender].robot();
                for payload in vms[sender].out_msgs().drain() {
                    for receiver in 0..vms.len() {
                        if receiver != sender {
                            deliveries.push((from, receiver, payload.clone()));
                        }
                    }
                }
            }
            if deliveries.is_empty() {
                break;
            }
            deliveries.shuffle(&mut rng);
            for (from, receiver, payload) in deliveries {
                vms[receiver].in_msgs().append(from, payload);
                vms[receiver].process_in_msgs();
            }
        }
        for vm in &vms {
            assert_eq!(stamp(vm, 1), Some((1, 4)));
            assert_eq!(stored_int(vm, 1), Some(4));
        }
    }
}

#[test]
fn a_newer_write_overrides_after_propagation() {
    let mut vms = [load(1), load(2), load(3)];
    let k = key(&vms[0]);
    let v = vms[0].alloc_value(Value::Int(7));
    vms[0].vstig_store(1, k, v).unwrap();
    while gossip_round(&mut vms) > 0 {}

    // Robot 2 now writes on top of the replicated entry.
    let v = vms[1].alloc_value(Value::Int(9));
    vms[1].vstig_store(1, k, v).unwrap();
    while gossip_round(&mut vms) > 0 {}

    for vm in &vms {
        assert_eq!(stamp(vm, 1), Some((2, 2)));
        assert_eq!(stored_int(vm, 1), Some(9));
    }
}

#[test]
fn queries_refresh_a_stale_replica() {
    let mut writer = load(1);
    let mut reader = load(2);
    let k = key(&writer);
    let v = writer.alloc_value(Value::Int(55));
    writer.vstig_store(1, k, v).unwrap();
    // The PUT is lost; the reader only ever sends a QUERY.
    writer.out_msgs().drain();

    let k2 = key(&reader);
    assert_eq!(reader.vstig_fetch(1, k2).unwrap(), None);
    for payload in reader.out_msgs().drain() {
        writer.in_msgs().append(2, payload);
    }
    writer.process_in_msgs();
    // The writer's entry is strictly newer, so it answers with a PUT.
    let mut put_seen = false;
    for payload in writer.out_msgs().drain() {
        if let Ok(Message::VstigPut { .. }) = Message::decode(&payload) {
            put_seen = true;
        }
        reader.in_msgs().append(1, payload);
    }
    assert!(put_seen);
    reader.process_in_msgs();
    assert_eq!(stored_int(&reader, 1), Some(55));
}

#[test]
fn timestamp_regression_by_the_same_owner_is_fatal() {
    let mut vm = load(1);
    let k = key(&vm);
    vm.in_msgs().append(
        9,
        Message::VstigPut {
            vstig: 1,
            key: k,
            entry: WireEntry {
                value: WireValue::Int(1),
                timestamp: 5,
                robot: 9,
            },
        }
        .encode(),
    );
    vm.process_in_msgs();
    assert_eq!(vm.state(), VmState::Ready);
    vm.in_msgs().append(
        9,
        Message::VstigPut {
            vstig: 1,
            key: k,
            entry: WireEntry {
                value: WireValue::Int(2),
                timestamp: 3,
                robot: 9,
            },
        }
        .encode(),
    );
    vm.process_in_msgs();
    assert_eq!(vm.state(), VmState::Error);
    assert_eq!(vm.error().unwrap().kind, ErrorKind::VstigViolation);
}

#[test]
fn accepted_puts_are_rebroadcast_once() {
    let mut vm = load(2);
    let k = key(&vm);
    let put = Message::VstigPut {
        vstig: 1,
        key: k,
        entry: WireEntry {
            value: WireValue::Int(4),
            timestamp: 2,
            robot: 5,
        },
    };
    vm.in_msgs().append(5, put.encode());
    vm.process_in_msgs();
    let out: Vec<Message> = vm
        .out_msgs()
        .drain()
        .iter()
        .map(|p| Message::decode(p).unwrap())
        .collect();
    assert_eq!(out, [put]);

    // The same arrival again is stale and stays silent.
    let put = Message::VstigPut {
        vstig: 1,
        key: k,
        entry: WireEntry {
            value: WireValue::Int(4),
            timestamp: 2,
            robot: 5,
        },
    };
    vm.in_msgs().append(5, put.encode());
    vm.process_in_msgs();
    assert!(vm.out_msgs().is_empty());
}
