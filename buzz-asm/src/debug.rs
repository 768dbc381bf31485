//! The `.bdbg` debug-info sidecar.
//!
//! A sidecar maps bytecode offsets back to source positions. On disk it is a
//! plain record stream, all integers little-endian:
//!
//! ```text
//! u32 offset, u64 line, u64 col, u16 len, len bytes of source file name
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use crate::AsmError;

/// A source position attached to a bytecode offset.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SourceLoc {
    /// 1-based source line.
    pub line: u64,
    /// 1-based source column.
    pub col: u64,
    /// Source file name.
    pub file: String,
}

/// Offset → source position map for one bytecode blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DebugInfo {
    entries: BTreeMap<u32, SourceLoc>,
}

impl DebugInfo {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the source position of the given bytecode offset.
    pub fn set(&mut self, offset: u32, line: u64, col: u64, file: impl Into<String>) {
        self.entries.insert(
            offset,
            SourceLoc {
                line,
                col,
                file: file.into(),
            },
        );
    }

    /// The source position of an offset, if one was recorded.
    pub fn get(&self, offset: u32) -> Option<&SourceLoc> {
        self.entries.get(&offset)
    }

    /// Number of recorded positions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when no position was recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in offset order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &SourceLoc)> {
        self.entries.iter().map(|(off, loc)| (*off, loc))
    }

    /// Decode a sidecar from its raw bytes.
    ///
    /// A trailing partial record is ignored, matching the writer's
    /// record-at-a-time framing.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut dbg = Self::new();
        let mut at = 0usize;
        loop {
            let Some(header) = bytes.get(at..at + 22) else {
                break;
            };
            let offset = u32::from_le_bytes(header[0..4].try_into().expect("sized slice"));
            let line = u64::from_le_bytes(header[4..12].try_into().expect("sized slice"));
            let col = u64::from_le_bytes(header[12..20].try_into().expect("sized slice"));
            let len = u16::from_le_bytes(header[20..22].try_into().expect("sized slice")) as usize;
            let Some(name) = bytes.get(at + 22..at + 22 + len) else {
                break;
            };
            dbg.set(offset, line, col, String::from_utf8_lossy(name).into_owned());
            at += 22 + len;
        }
        dbg
    }

    /// Encode the sidecar to its on-disk form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.entries.len() * 32);
        for (off, loc) in &self.entries {
            bytes.extend_from_slice(&off.to_le_bytes());
            bytes.extend_from_slice(&loc.line.to_le_bytes());
            bytes.extend_from_slice(&loc.col.to_le_bytes());
            bytes.extend_from_slice(&(loc.file.len() as u16).to_le_bytes());
            bytes.extend_from_slice(loc.file.as_bytes());
        }
        bytes
    }

    /// Load a sidecar; a missing file yields an empty map, since debug info
    /// is optional.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AsmError> {
        match fs::read(path) {
            Ok(bytes) => Ok(Self::from_bytes(&bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the sidecar to a `.bdbg` file.
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), AsmError> {
        Ok(fs::write(path, self.to_bytes())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_round_trip() {
        let mut dbg = DebugInfo::new();
        dbg.set(0, 1, 1, "main.bzz");
        dbg.set(17, 4, 12, "lib.bzz");
        let decoded = DebugInfo::from_bytes(&dbg.to_bytes());
        assert_eq!(decoded, dbg);
        assert_eq!(decoded.get(17).unwrap().col, 12);
    }

    #[test]
    fn ignores_trailing_partial_record() {
        let mut dbg = DebugInfo::new();
        dbg.set(3, 2, 9, "a.bzz");
        let mut bytes = dbg.to_bytes();
        bytes.extend_from_slice(&[0xab, 0xcd]);
        assert_eq!(DebugInfo::from_bytes(&bytes), dbg);
    }

    #[test]
    fn missing_file_is_empty() {
        let dbg = DebugInfo::from_file("/nonexistent/path.bdbg").unwrap();
        assert!(dbg.is_empty());
    }
}
