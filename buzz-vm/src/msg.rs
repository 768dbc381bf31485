//! Wire codec and message framing.
//!
//! Everything that leaves a robot is a flat byte payload: a `u8` kind
//! followed by kind-specific fields, all integers little-endian. Floats
//! travel as a portable mantissa/exponent pair instead of raw IEEE bits;
//! the mantissa maps the normalized fraction onto the full `i32` range with
//! a `+1` escape so that zero stays distinguishable.

use thiserror::Error;

use crate::strings::StrId;

/// Maximum encoded mantissa magnitude.
const MAX_MANTISSA: f64 = 2_147_483_646.0;

/// Payload decode failures. Malformed arrivals are dropped, not fatal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MsgError {
    /// The payload ended before the field being read.
    #[error("truncated payload")]
    Truncated,
    /// The kind byte does not name a message kind.
    #[error("unknown message kind {0}")]
    BadKind(u8),
    /// The value tag is not wire-encodable.
    #[error("unknown value tag {0}")]
    BadTag(u8),
}

/// Byte-buffer writer half of the codec.
pub mod write {
    use super::MAX_MANTISSA;

    /// Append a `u8`.
    pub fn u8(buf: &mut Vec<u8>, v: u8) {
        buf.push(v);
    }

    /// Append a little-endian `u16`.
    pub fn u16(buf: &mut Vec<u8>, v: u16) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Append a little-endian `u32`.
    pub fn u32(buf: &mut Vec<u8>, v: u32) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Append a little-endian `i32`.
    pub fn i32(buf: &mut Vec<u8>, v: i32) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Append a float as its mantissa/exponent pair.
    pub fn f32(buf: &mut Vec<u8>, v: f32) {
        let (mant, exp) = split_f32(v);
        i32(buf, mant);
        i32(buf, exp);
    }

    /// Append a length-prefixed UTF-8 string.
    pub fn str(buf: &mut Vec<u8>, v: &str) {
        u32(buf, v.len() as u32);
        buf.extend_from_slice(v.as_bytes());
    }

    /// Split a float into `(mantissa, exponent)`.
    ///
    /// `x = nf * 2^exp` with `|nf|` in `[0.5, 1)`; the fraction is mapped
    /// onto the `i32` range and offset by one so a zero mantissa always
    /// means a zero float. Non-finite values take the two reserved
    /// saturated encodings.
    pub(super) fn split_f32(x: f32) -> (i32, i32) {
        if x == 0.0 {
            return (0, 0);
        }
        if x.is_nan() {
            return (i32::MAX, i32::MIN);
        }
        if x.is_infinite() {
            return (if x > 0.0 { i32::MAX } else { -i32::MAX }, i32::MAX);
        }
        let (nf, exp) = frexp(x);
        let frac = (nf.abs() as f64) - 0.5;
        let mut mant = (frac * 2.0 * MAX_MANTISSA) as i32 + 1;
        if x < 0.0 {
            mant = -mant;
        }
        (mant, exp)
    }

    /// `x = nf * 2^exp`, `|nf|` in `[0.5, 1)`; `(0, 0)` for zero.
    fn frexp(x: f32) -> (f32, i32) {
        let bits = x.to_bits();
        let raw_exp = ((bits >> 23) & 0xff) as i32;
        if raw_exp == 0 {
            // Subnormal: renormalize first.
            let (nf, e) = frexp(x * (1u64 << 32) as f32 * (1u64 << 32) as f32);
            return (nf, e - 64);
        }
        let nf = f32::from_bits((bits & 0x807f_ffff) | (126 << 23));
        (nf, raw_exp - 126)
    }
}

/// Byte-buffer reader half of the codec. Every reader returns the decoded
/// field and the position right past it.
pub mod read {
    use super::{MsgError, MAX_MANTISSA};

    /// Read a `u8`.
    pub fn u8(buf: &[u8], pos: usize) -> Result<(u8, usize), MsgError> {
        buf.get(pos).map(|&b| (b, pos + 1)).ok_or(MsgError::Truncated)
    }

    /// Read a little-endian `u16`.
    pub fn u16(buf: &[u8], pos: usize) -> Result<(u16, usize), MsgError> {
        let b = buf.get(pos..pos + 2).ok_or(MsgError::Truncated)?;
        Ok((u16::from_le_bytes([b[0], b[1]]), pos + 2))
    }

    /// Read a little-endian `u32`.
    pub fn u32(buf: &[u8], pos: usize) -> Result<(u32, usize), MsgError> {
        let b = buf.get(pos..pos + 4).ok_or(MsgError::Truncated)?;
        Ok((u32::from_le_bytes([b[0], b[1], b[2], b[3]]), pos + 4))
    }

    /// Read a little-endian `i32`.
    pub fn i32(buf: &[u8], pos: usize) -> Result<(i32, usize), MsgError> {
        u32(buf, pos).map(|(v, p)| (v as i32, p))
    }

    /// Read a mantissa/exponent float.
    pub fn f32(buf: &[u8], pos: usize) -> Result<(f32, usize), MsgError> {
        let (mant, pos) = i32(buf, pos)?;
        let (exp, pos) = i32(buf, pos)?;
        Ok((join_f32(mant, exp), pos))
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn str(buf: &[u8], pos: usize) -> Result<(String, usize), MsgError> {
        let (len, pos) = u32(buf, pos)?;
        let bytes = buf.get(pos..pos + len as usize).ok_or(MsgError::Truncated)?;
        Ok((String::from_utf8_lossy(bytes).into_owned(), pos + len as usize))
    }

    pub(super) fn join_f32(mant: i32, exp: i32) -> f32 {
        if mant == 0 {
            return 0.0;
        }
        if mant == i32::MAX && exp == i32::MIN {
            return f32::NAN;
        }
        if exp == i32::MAX {
            return if mant > 0 { f32::INFINITY } else { f32::NEG_INFINITY };
        }
        let frac = (mant.unsigned_abs() as f64 - 1.0) / (2.0 * MAX_MANTISSA) + 0.5;
        let x = (frac * (exp as f64).exp2()) as f32;
        if mant < 0 {
            -x
        } else {
            x
        }
    }
}

/// A value in wire form. Only the four scalar tags travel between robots.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WireValue {
    /// Nil.
    Nil,
    /// Integer payload.
    Int(i32),
    /// Float payload.
    Float(f32),
    /// Interned string id; ids are only meaningful swarm-wide because the
    /// compiler pre-registers every script string in the same order.
    Str(StrId),
}

impl WireValue {
    const TAG_NIL: u8 = 0;
    const TAG_INT: u8 = 1;
    const TAG_FLOAT: u8 = 2;
    const TAG_STR: u8 = 3;

    /// Append the tagged encoding.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            WireValue::Nil => write::u8(buf, Self::TAG_NIL),
            WireValue::Int(i) => {
                write::u8(buf, Self::TAG_INT);
                write::i32(buf, *i);
            }
            WireValue::Float(x) => {
                write::u8(buf, Self::TAG_FLOAT);
                write::f32(buf, *x);
            }
            WireValue::Str(sid) => {
                write::u8(buf, Self::TAG_STR);
                write::u16(buf, *sid);
            }
        }
    }

    /// Decode a tagged value.
    pub fn decode(buf: &[u8], pos: usize) -> Result<(Self, usize), MsgError> {
        let (tag, pos) = read::u8(buf, pos)?;
        match tag {
            Self::TAG_NIL => Ok((WireValue::Nil, pos)),
            Self::TAG_INT => read::i32(buf, pos).map(|(i, p)| (WireValue::Int(i), p)),
            Self::TAG_FLOAT => read::f32(buf, pos).map(|(x, p)| (WireValue::Float(x), p)),
            Self::TAG_STR => read::u16(buf, pos).map(|(s, p)| (WireValue::Str(s), p)),
            other => Err(MsgError::BadTag(other)),
        }
    }
}

/// A virtual-stigmergy record in wire form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WireEntry {
    /// Carried value.
    pub value: WireValue,
    /// Lamport timestamp.
    pub timestamp: u32,
    /// Robot that produced the write.
    pub robot: u16,
}

/// One framed swarm message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Topic broadcast to the neighborhood.
    Broadcast {
        /// Sending robot.
        robot: u16,
        /// Topic string id.
        topic: StrId,
        /// Carried value.
        value: WireValue,
    },
    /// Full swarm-membership list of the sender.
    SwarmList {
        /// Sending robot.
        robot: u16,
        /// Every swarm the sender belongs to.
        swarms: Vec<u16>,
    },
    /// The sender joined a swarm.
    SwarmJoin {
        /// Sending robot.
        robot: u16,
        /// Swarm joined.
        swarm: u16,
    },
    /// The sender left a swarm.
    SwarmLeave {
        /// Sending robot.
        robot: u16,
        /// Swarm left.
        swarm: u16,
    },
    /// Virtual-stigmergy write propagation.
    VstigPut {
        /// Stigmergy structure id.
        vstig: u16,
        /// Entry key.
        key: StrId,
        /// Entry payload.
        entry: WireEntry,
    },
    /// Virtual-stigmergy freshness probe.
    VstigQuery {
        /// Stigmergy structure id.
        vstig: u16,
        /// Entry key.
        key: StrId,
        /// Entry payload known to the sender.
        entry: WireEntry,
    },
}

/// Message kind ordinals; the byte at payload offset 0.
pub mod kind {
    /// Topic broadcast.
    pub const BROADCAST: u8 = 0;
    /// Membership list.
    pub const SWARM_LIST: u8 = 1;
    /// Swarm join.
    pub const SWARM_JOIN: u8 = 2;
    /// Swarm leave.
    pub const SWARM_LEAVE: u8 = 3;
    /// Stigmergy write.
    pub const VSTIG_PUT: u8 = 4;
    /// Stigmergy probe.
    pub const VSTIG_QUERY: u8 = 5;
}

impl Message {
    /// The kind byte this message is framed under.
    pub const fn kind(&self) -> u8 {
        match self {
            Message::Broadcast { .. } => kind::BROADCAST,
            Message::SwarmList { .. } => kind::SWARM_LIST,
            Message::SwarmJoin { .. } => kind::SWARM_JOIN,
            Message::SwarmLeave { .. } => kind::SWARM_LEAVE,
            Message::VstigPut { .. } => kind::VSTIG_PUT,
            Message::VstigQuery { .. } => kind::VSTIG_QUERY,
        }
    }

    /// Serialize to a flat payload, kind byte first.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16);
        write::u8(&mut buf, self.kind());
        match self {
            Message::Broadcast { robot, topic, value } => {
                write::u16(&mut buf, *robot);
                write::u16(&mut buf, *topic);
                value.encode(&mut buf);
            }
            Message::SwarmList { robot, swarms } => {
                write::u16(&mut buf, *robot);
                write::u16(&mut buf, swarms.len() as u16);
                for id in swarms {
                    write::u16(&mut buf, *id);
                }
            }
            Message::SwarmJoin { robot, swarm } | Message::SwarmLeave { robot, swarm } => {
                write::u16(&mut buf, *robot);
                write::u16(&mut buf, *swarm);
            }
            Message::VstigPut { vstig, key, entry } | Message::VstigQuery { vstig, key, entry } => {
                write::u16(&mut buf, *vstig);
                write::u16(&mut buf, *key);
                entry.value.encode(&mut buf);
                write::u32(&mut buf, entry.timestamp);
                write::u16(&mut buf, entry.robot);
            }
        }
        buf
    }

    /// Decode a payload.
    pub fn decode(buf: &[u8]) -> Result<Self, MsgError> {
        let (k, pos) = read::u8(buf, 0)?;
        match k {
            kind::BROADCAST => {
                let (robot, pos) = read::u16(buf, pos)?;
                let (topic, pos) = read::u16(buf, pos)?;
                let (value, _) = WireValue::decode(buf, pos)?;
                Ok(Message::Broadcast { robot, topic, value })
            }
            kind::SWARM_LIST => {
                let (robot, pos) = read::u16(buf, pos)?;
                let (n, mut pos) = read::u16(buf, pos)?;
                let mut swarms = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    let (id, next) = read::u16(buf, pos)?;
                    swarms.push(id);
                    pos = next;
                }
                Ok(Message::SwarmList { robot, swarms })
            }
            kind::SWARM_JOIN | kind::SWARM_LEAVE => {
                let (robot, pos) = read::u16(buf, pos)?;
                let (swarm, _) = read::u16(buf, pos)?;
                Ok(if k == kind::SWARM_JOIN {
                    Message::SwarmJoin { robot, swarm }
                } else {
                    Message::SwarmLeave { robot, swarm }
                })
            }
            kind::VSTIG_PUT | kind::VSTIG_QUERY => {
                let (vstig, pos) = read::u16(buf, pos)?;
                let (key, pos) = read::u16(buf, pos)?;
                let (value, pos) = WireValue::decode(buf, pos)?;
                let (timestamp, pos) = read::u32(buf, pos)?;
                let (robot, _) = read::u16(buf, pos)?;
                let entry = WireEntry { value, timestamp, robot };
                Ok(if k == kind::VSTIG_PUT {
                    Message::VstigPut { vstig, key, entry }
                } else {
                    Message::VstigQuery { vstig, key, entry }
                })
            }
            other => Err(MsgError::BadKind(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn float_split_is_exact_on_edge_values() {
        for x in [
            0.0f32,
            -0.0,
            1.0,
            -1.5,
            0.1,
            3.14159,
            f32::MIN_POSITIVE,
            f32::MAX,
            1.0e-40, // subnormal
            f32::INFINITY,
            f32::NEG_INFINITY,
        ] {
            let (mant, exp) = write::split_f32(x);
            let back = read::join_f32(mant, exp);
            assert_eq!(back.to_bits(), (x + 0.0).to_bits(), "{x}");
        }
        let (mant, exp) = write::split_f32(f32::NAN);
        assert!(read::join_f32(mant, exp).is_nan());
    }

    #[quickcheck]
    fn float_round_trip(x: f32) -> bool {
        let (mant, exp) = write::split_f32(x);
        let back = read::join_f32(mant, exp);
        if x.is_nan() {
            back.is_nan()
        } else {
            // -0.0 legitimately decodes to +0.0, as in the original codec.
            back == x
        }
    }

    #[test]
    fn broadcast_round_trip() {
        let m = Message::Broadcast {
            robot: 7,
            topic: 3,
            value: WireValue::Float(-2.5),
        };
        let buf = m.encode();
        assert_eq!(buf[0], kind::BROADCAST);
        assert_eq!(Message::decode(&buf), Ok(m));
    }

    #[test]
    fn swarm_messages_round_trip() {
        for m in [
            Message::SwarmList { robot: 1, swarms: vec![4, 9, 2] },
            Message::SwarmJoin { robot: 1, swarm: 4 },
            Message::SwarmLeave { robot: 1, swarm: 4 },
        ] {
            assert_eq!(Message::decode(&m.encode()), Ok(m));
        }
    }

    #[test]
    fn vstig_round_trip() {
        let m = Message::VstigPut {
            vstig: 2,
            key: 11,
            entry: WireEntry {
                value: WireValue::Int(-5),
                timestamp: 42,
                robot: 3,
            },
        };
        assert_eq!(Message::decode(&m.encode()), Ok(m));
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        assert_eq!(Message::decode(&[]), Err(MsgError::Truncated));
        assert_eq!(Message::decode(&[9]), Err(MsgError::BadKind(9)));
        assert_eq!(Message::decode(&[kind::BROADCAST, 1]), Err(MsgError::Truncated));
        let bad_tag = [kind::BROADCAST, 0, 0, 0, 0, 250];
        assert_eq!(Message::decode(&bad_tag), Err(MsgError::BadTag(250)));
    }
}
