use core::fmt::Write;

use crate::Block;

#[cfg(feature = "lfn")]
use super::lfn::LongNameBuffer;
use super::timestamp::FatTimestamp;

#[cfg(feature = "log")]
use log::trace;

#[cfg(feature = "defmt-log")]
use defmt::trace;

bitflags::bitflags! {
    pub struct Attributes: u8 {
        const READ_ONLY = (1 << 0);
        const HIDDEN = (1 << 1);
        const SYSTEM = (1 << 2);
        const VOLUME_ID = (1 << 3);
        const DIRECTORY = (1 << 4);
        const ARCHIVE = (1 << 5);
    }
}

impl Attributes {
    pub fn is_dir(&self) -> bool {
        self.contains(Self::DIRECTORY)
    }

    pub fn is_read_only(&self) -> bool {
        self.contains(Self::READ_ONLY)
    }
}

#[cfg(feature = "defmt-log")]
impl defmt::Format for Attributes {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "Attributes({=u8:#x})", self.bits())
    }
}

/// An 8.3 name as shown: `NAME.EXT`, or `NAME` when there is no extension.
pub type ShortName = heapless::String<12>;

/// A long name of up to 255 characters.
pub type LongName = heapless::String<255>;

/// The 11 name bytes of a short entry.
#[derive(Debug, Clone, Copy)]
pub struct ShortNameRaw {
    main_name: [u8; 8],
    extension: [u8; 3],
}

impl ShortNameRaw {
    pub fn new(name: &[u8; 11]) -> Self {
        let mut main_name = [0u8; 8];
        let mut extension = [0u8; 3];
        main_name.copy_from_slice(&name[0..8]);
        extension.copy_from_slice(&name[8..11]);
        Self {
            main_name,
            extension,
        }
    }

    fn trimmed(name: &[u8]) -> &[u8] {
        let mut name = name;
        while let Some((&b' ', rest)) = name.split_last() {
            name = rest;
        }
        name
    }

    pub fn main_name(&self) -> &[u8; 8] {
        &self.main_name
    }

    pub fn extension(&self) -> &[u8; 3] {
        &self.extension
    }

    /// Render as `NAME.EXT`. Bytes outside ASCII become '?'.
    pub fn to_short_name(&self) -> ShortName {
        let mut out = ShortName::new();
        let push_bytes = |out: &mut ShortName, bytes: &[u8]| {
            for &b in bytes {
                let c = if b.is_ascii() { b as char } else { '?' };
                // 8 + 1 + 3 always fits.
                let _ = out.push(c);
            }
        };

        push_bytes(&mut out, Self::trimmed(&self.main_name));
        if self.extension[0] != b' ' {
            if !out.is_empty() {
                let _ = out.push('.');
            }
            push_bytes(&mut out, Self::trimmed(&self.extension));
        }
        out
    }
}

/// A view of one 32 byte directory slot.
#[derive(Debug)]
pub struct DirEntryRaw<'a> {
    data: &'a [u8],
}

impl<'a> DirEntryRaw<'a> {
    pub const LEN: usize = 32;
    /// First name byte of the slot ending the directory.
    pub const END_MARKER: u8 = 0x00;
    /// First name byte of a deleted entry.
    pub const DELETED_MARKER: u8 = 0xE5;
    const LONG_NAME_ATTR: u8 = 0x0F;

    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub(crate) fn data(&self) -> &[u8] {
        self.data
    }

    pub fn name(&self) -> ShortNameRaw {
        let mut name = [0u8; 11];
        name.copy_from_slice(&self.data()[0..11]);
        ShortNameRaw::new(&name)
    }

    pub fn attributes(&self) -> Attributes {
        Attributes::from_bits_truncate(self.attr())
    }

    pub fn is_end(&self) -> bool {
        self.ord() == Self::END_MARKER
    }

    pub fn is_deleted(&self) -> bool {
        self.ord() == Self::DELETED_MARKER
    }

    /// A VFAT long name fragment has exactly read-only, hidden, system and
    /// volume label set, nothing else.
    pub fn is_long_name(&self) -> bool {
        self.attr() == Self::LONG_NAME_ATTR
    }

    // Also the sequence number of a long name fragment.
    define_field!(ord, u8, 0);
    define_field!(attr, u8, 11);
    define_field!(crt_time_tenth, u8, 13);
    define_field!(crt_time, u16, 14);
    define_field!(crt_date, u16, 16);
    define_field!(lst_acc_date, u16, 18);
    define_field!(fst_clus_hi, u16, 20);
    define_field!(wrt_time, u16, 22);
    define_field!(wrt_date, u16, 24);
    define_field!(fst_clus_lo, u16, 26);
    define_field!(file_size, u32, 28);
}

/// One row of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    short_name: ShortName,
    long_name: Option<LongName>,
    attributes: Attributes,
    file_size: u32,
    modified: FatTimestamp,
}

impl DirEntry {
    const NO_NAME: &'static str = "<no name>";

    pub fn new(raw: &DirEntryRaw, long_name: Option<&str>) -> Self {
        let long_name = long_name.filter(|n| !n.is_empty()).and_then(|n| {
            let mut out = LongName::new();
            out.push_str(n).ok().map(|_| out)
        });

        Self {
            short_name: raw.name().to_short_name(),
            long_name,
            attributes: raw.attributes(),
            file_size: raw.file_size(),
            modified: FatTimestamp::from_fat(raw.wrt_date(), raw.wrt_time()),
        }
    }

    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    pub fn long_name(&self) -> Option<&str> {
        self.long_name.as_deref()
    }

    /// The long name if there is one, else the short name.
    pub fn display_name(&self) -> &str {
        match self.long_name() {
            Some(name) => name,
            None if !self.short_name.is_empty() => &self.short_name,
            None => Self::NO_NAME,
        }
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn is_dir(&self) -> bool {
        self.attributes.is_dir()
    }

    pub fn file_size(&self) -> u32 {
        self.file_size
    }

    pub fn modified(&self) -> FatTimestamp {
        self.modified
    }
}

impl core::fmt::Display for DirEntry {
    /// One `ls -l` style line, without a trailing newline.
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let dir = self.is_dir();
        let write = !self.attributes.is_read_only();
        f.write_char(if dir { 'd' } else { '-' })?;
        for _ in 0..3 {
            f.write_char('r')?;
            f.write_char(if write { 'w' } else { '-' })?;
            f.write_char(if dir { 'x' } else { '-' })?;
        }
        write!(f, " {:2}", 1)?;
        if dir {
            write!(f, " {:>10}", "<DIR>")?;
        } else {
            write!(f, " {:>10}", self.file_size)?;
        }
        write!(f, " {} {}", self.modified, self.display_name())?;
        if let Some(long_name) = self.long_name() {
            if long_name != self.short_name.as_str() {
                write!(f, " [{}]", self.short_name)?;
            }
        }
        Ok(())
    }
}

/// The entries of one directory sector, in on-disk order.
///
/// Long name fragments are folded into the entry which follows them and are
/// not returned themselves. Iteration stops at the end marker.
pub struct DirIter<'a> {
    sector: &'a Block,
    next_slot: usize,
    done: bool,
    #[cfg(feature = "lfn")]
    long_name: LongNameBuffer,
}

impl<'a> DirIter<'a> {
    pub const ENTRIES_PER_SECTOR: usize = Block::LEN / DirEntryRaw::LEN;

    pub fn new(sector: &'a Block) -> Self {
        Self {
            sector,
            next_slot: 0,
            done: false,
            #[cfg(feature = "lfn")]
            long_name: LongNameBuffer::new(),
        }
    }

    /// Slots consumed so far, including skipped ones.
    pub fn slots_read(&self) -> usize {
        self.next_slot
    }

    #[cfg(feature = "lfn")]
    fn take_entry(&mut self, raw: &DirEntryRaw) -> DirEntry {
        let entry = DirEntry::new(raw, Some(self.long_name.as_str()));
        self.long_name.clear();
        entry
    }

    #[cfg(not(feature = "lfn"))]
    fn take_entry(&mut self, raw: &DirEntryRaw) -> DirEntry {
        DirEntry::new(raw, None)
    }
}

impl<'a> core::fmt::Debug for DirIter<'a> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DirIter")
            .field("next_slot", &self.next_slot)
            .field("done", &self.done)
            .finish()
    }
}

impl<'a> Iterator for DirIter<'a> {
    type Item = DirEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let sector: &'a Block = self.sector;
        while !self.done && self.next_slot < Self::ENTRIES_PER_SECTOR {
            let start = self.next_slot * DirEntryRaw::LEN;
            self.next_slot += 1;
            let raw = DirEntryRaw::new(&sector[start..start + DirEntryRaw::LEN]);

            if raw.is_end() {
                self.done = true;
                break;
            }
            if raw.is_deleted() {
                continue;
            }
            if raw.is_long_name() {
                trace!("long name fragment {:#x}", raw.ord());
                #[cfg(feature = "lfn")]
                self.long_name.add_fragment(&raw);
                continue;
            }
            return Some(self.take_entry(&raw));
        }
        None
    }
}

/// Totals printed under a listing.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct ListingSummary {
    pub entries: u32,
    /// Sum of file sizes. Directories count as zero.
    pub total_bytes: u64,
}

/// Write one line per entry, each prefixed with `indent`, then the totals.
pub fn write_listing<W, I>(
    w: &mut W,
    indent: &str,
    entries: I,
) -> Result<ListingSummary, core::fmt::Error>
where
    W: Write,
    I: IntoIterator<Item = DirEntry>,
{
    let mut summary = ListingSummary::default();
    for entry in entries {
        writeln!(w, "{}{}", indent, entry)?;
        summary.entries += 1;
        if !entry.is_dir() {
            summary.total_bytes += u64::from(entry.file_size());
        }
    }
    writeln!(w, "{}total {}", indent, summary.total_bytes / 1024)?;
    writeln!(w, "{}{} files and directories", indent, summary.entries)?;
    Ok(summary)
}
