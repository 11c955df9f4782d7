//! sdmmc-inspect - Hex dumps
//!
//! Renders raw bytes the way `hexdump -C` does, for looking at sectors
//! nothing else in this crate understands.

use core::fmt::{self, Write};

/// A [`Display`](core::fmt::Display) adapter: 16 bytes per row, each row
/// prefixed with the absolute offset of its first byte and followed by the
/// printable characters.
#[derive(Debug, Clone, Copy)]
pub struct HexDump<'a> {
    data: &'a [u8],
    base_offset: u64,
}

impl<'a> HexDump<'a> {
    pub const BYTES_PER_ROW: usize = 16;

    /// `base_offset` is the byte address of `data[0]`, e.g. LBA * 512.
    pub fn new(data: &'a [u8], base_offset: u64) -> Self {
        Self { data, base_offset }
    }

    fn is_printable(b: u8) -> bool {
        (0x20..=0x7E).contains(&b)
    }
}

impl<'a> fmt::Display for HexDump<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (row, chunk) in self.data.chunks(Self::BYTES_PER_ROW).enumerate() {
            let offset = self.base_offset + (row * Self::BYTES_PER_ROW) as u64;
            write!(f, "{:08X}:", offset)?;
            for b in chunk {
                write!(f, " {:02X}", b)?;
            }
            for _ in chunk.len()..Self::BYTES_PER_ROW {
                f.write_str("   ")?;
            }
            f.write_str(" |")?;
            for &b in chunk {
                f.write_char(if Self::is_printable(b) { b as char } else { '.' })?;
            }
            f.write_str("|\n")?;
        }
        Ok(())
    }
}
