//! VFAT long file names.
//!
//! A long name is stored as a run of fragments ahead of the 8.3 entry it
//! belongs to, each carrying 13 UTF-16 code units and a sequence number
//! giving its position in the name.

use super::directory::DirEntryRaw;

/// Longest long name kept, in bytes. Anything past it is dropped.
pub const MAX_LONG_NAME: usize = 255;

/// Code units per fragment.
const CHARS_PER_FRAGMENT: usize = 13;

/// Offsets of the three runs of code units within a fragment.
const CHAR_RUNS: [(usize, usize); 3] = [(1, 5), (14, 6), (28, 2)];

const SEQUENCE_MASK: u8 = 0x3F;

/// A long name assembled out of order from its fragments.
///
/// Characters are placed by position, so a missing first fragment leaves the
/// name empty.
#[derive(Clone)]
pub struct LongNameBuffer {
    buffer: [u8; MAX_LONG_NAME],
}

impl Default for LongNameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LongNameBuffer {
    pub const fn new() -> Self {
        Self {
            buffer: [0u8; MAX_LONG_NAME],
        }
    }

    pub fn clear(&mut self) {
        self.buffer = [0u8; MAX_LONG_NAME];
    }

    /// Copy one fragment into place. Sequence number 0 is not a valid
    /// position and is ignored.
    pub fn add_fragment(&mut self, raw: &DirEntryRaw) {
        let sequence = raw.ord() & SEQUENCE_MASK;
        if sequence == 0 {
            return;
        }
        let mut pos = (usize::from(sequence) - 1) * CHARS_PER_FRAGMENT;

        for &(offset, count) in CHAR_RUNS.iter() {
            for unit in raw.data()[offset..offset + count * 2].chunks_exact(2) {
                let unit = u16::from_le_bytes([unit[0], unit[1]]);
                if unit == 0x0000 || unit == 0xFFFF {
                    return;
                }
                if let Some(slot) = self.buffer.get_mut(pos) {
                    *slot = if unit < 0x80 { unit as u8 } else { b'?' };
                }
                pos += 1;
            }
        }
    }

    /// The name up to the first unfilled position.
    pub fn as_str(&self) -> &str {
        let len = self
            .buffer
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(MAX_LONG_NAME);
        // Only ASCII and '?' are ever stored.
        core::str::from_utf8(&self.buffer[..len]).unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.buffer[0] == 0
    }
}

impl core::fmt::Debug for LongNameBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("LongNameBuffer").field(&self.as_str()).finish()
    }
}
