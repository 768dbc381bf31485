//! Swarm-side operations: queueing outgoing traffic and pumping arrivals.

use tracing::{debug, trace};

use super::Vm;
use crate::error::ErrorKind;
use crate::msg::{Message, WireEntry};
use crate::strings::StrId;
use crate::value::Handle;
use crate::vstig::{PutOutcome, QueryOutcome, Vstig, VstigEntry};

impl Vm {
    /// Join a swarm: update the local set and queue the announcement.
    pub fn swarm_join(&mut self, id: u16) {
        if self.swarmmembers.join(id) {
            self.outmsgs.append_swarm_join(id);
        }
    }

    /// Leave a swarm: update the local set and queue the announcement.
    pub fn swarm_leave(&mut self, id: u16) {
        if self.swarmmembers.leave(id) {
            self.outmsgs.append_swarm_leave(id);
        }
    }

    /// Queue a full membership list announcement.
    pub fn swarm_announce(&mut self) {
        let ids: Vec<u16> = self.swarmmembers.iter().collect();
        self.outmsgs.append_swarm_list(ids);
    }

    /// Enter a swarm context; the matching scoped return pops it.
    pub fn swarm_enter(&mut self, id: u16) {
        self.swarm_stack.push(id);
    }

    /// Age neighbor knowledge one round.
    pub fn swarm_tick(&mut self) {
        self.swarms.tick();
    }

    /// Queue a topic broadcast of a heap value.
    pub fn broadcast(&mut self, topic: StrId, value: Handle) -> Result<(), ErrorKind> {
        let value = self.wire_of(value)?;
        self.outmsgs.append_broadcast(topic, value);
        Ok(())
    }

    /// Subscribe a closure to a broadcast topic.
    pub fn listen(&mut self, topic: StrId, closure: Handle) {
        self.listeners.insert(topic, closure);
    }

    /// Drop the subscription on a topic.
    pub fn ignore(&mut self, topic: StrId) {
        self.listeners.remove(&topic);
    }

    /// Write into a virtual stigmergy and queue the PUT.
    pub fn vstig_store(&mut self, id: u16, key: StrId, value: Handle) -> Result<(), ErrorKind> {
        let wire = self.wire_of(value)?;
        let robot = self.robot;
        let entry = self
            .vstigs
            .entry(id)
            .or_insert_with(Vstig::new)
            .store(key, value, robot);
        self.outmsgs.append_vstig_put(
            id,
            key,
            WireEntry {
                value: wire,
                timestamp: entry.timestamp,
                robot: entry.robot,
            },
        );
        Ok(())
    }

    /// Read from a virtual stigmergy, queueing a freshness QUERY for the
    /// key as a side effect.
    pub fn vstig_fetch(&mut self, id: u16, key: StrId) -> Result<Option<Handle>, ErrorKind> {
        let local = self.vstigs.get(&id).and_then(|vs| vs.get(key)).copied();
        let entry = match local {
            Some(e) => WireEntry {
                value: self.wire_of(e.value)?,
                timestamp: e.timestamp,
                robot: e.robot,
            },
            None => WireEntry {
                value: crate::msg::WireValue::Nil,
                timestamp: 0,
                robot: self.robot,
            },
        };
        self.outmsgs.append_vstig_query(id, key, entry);
        Ok(local.map(|e| e.value))
    }

    /// Drain the incoming queue, dispatching every arrival.
    ///
    /// Malformed payloads are dropped. A stigmergy monotonicity violation
    /// kills the program, per the error taxonomy.
    pub fn process_in_msgs(&mut self) {
        while let Some(msg) = self.inmsgs.extract() {
            let decoded = match Message::decode(&msg.payload) {
                Ok(m) => m,
                Err(e) => {
                    debug!(from = msg.from, %e, "dropped malformed payload");
                    continue;
                }
            };
            let at = self.pc;
            if let Err(kind) = self.dispatch_msg(decoded) {
                self.die(kind, at);
                return;
            }
            if !self.state.is_ready() {
                return;
            }
        }
    }

    fn dispatch_msg(&mut self, msg: Message) -> Result<(), ErrorKind> {
        trace!(kind = msg.kind(), "processing arrival");
        match msg {
            Message::Broadcast { robot, topic, value } => {
                let Some(&closure) = self.listeners.get(&topic) else {
                    return Ok(());
                };
                // Listener signature: (topic, value, robot id).
                self.push(closure);
                self.push_sid(topic);
                let value = self.value_of_wire(value);
                self.push(value);
                self.push_int(i32::from(robot));
                self.call_closure_sync(3)
            }
            Message::SwarmList { robot, swarms } => {
                self.swarms.update_list(robot, swarms);
                Ok(())
            }
            Message::SwarmJoin { robot, swarm } => {
                self.swarms.update_join(robot, swarm);
                Ok(())
            }
            Message::SwarmLeave { robot, swarm } => {
                self.swarms.update_leave(robot, swarm);
                Ok(())
            }
            Message::VstigPut { vstig, key, entry } => {
                let value = self.value_of_wire(entry.value);
                let outcome = self.vstigs.entry(vstig).or_insert_with(Vstig::new).apply_put(
                    key,
                    VstigEntry {
                        value,
                        timestamp: entry.timestamp,
                        robot: entry.robot,
                    },
                );
                match outcome {
                    PutOutcome::Accepted => {
                        self.outmsgs.append_vstig_put(vstig, key, entry);
                        Ok(())
                    }
                    PutOutcome::Stale => Ok(()),
                    PutOutcome::Violation => Err(ErrorKind::VstigViolation),
                }
            }
            Message::VstigQuery { vstig, key, entry } => {
                let value = self.value_of_wire(entry.value);
                let outcome = self
                    .vstigs
                    .entry(vstig)
                    .or_insert_with(Vstig::new)
                    .apply_query(
                        key,
                        VstigEntry {
                            value,
                            timestamp: entry.timestamp,
                            robot: entry.robot,
                        },
                    );
                match outcome {
                    QueryOutcome::ReplyPut(local) => {
                        let wire = WireEntry {
                            value: self.wire_of(local.value)?,
                            timestamp: local.timestamp,
                            robot: local.robot,
                        };
                        self.outmsgs.append_vstig_put(vstig, key, wire);
                        Ok(())
                    }
                    QueryOutcome::ReplyQuery(local) => {
                        let wire = WireEntry {
                            value: self.wire_of(local.value)?,
                            timestamp: local.timestamp,
                            robot: local.robot,
                        };
                        self.outmsgs.append_vstig_query(vstig, key, wire);
                        Ok(())
                    }
                    QueryOutcome::Stored | QueryOutcome::Silence => Ok(()),
                }
            }
        }
    }
}
