//! sdmmc-inspect - GUID Partition Table
//!
//! Decodes the GPT header in block 1 and the first sector of its partition
//! entry array.

use crate::{
    mbr::PartitionType,
    partition::{PartitionEntry, PartitionName, PartitionTable, TableKind, PARTITION_NAME_LEN},
    Block, BlockCount, BlockDevice, BlockIdx,
};
use core::{convert::TryFrom, fmt::Debug};

#[cfg(feature = "log")]
use log::{debug, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, warn};

#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug)]
pub enum Error<BlockDeviceError>
where
    BlockDeviceError: Debug,
{
    DeviceError(BlockDeviceError),
    /// The header does not start with "EFI PART".
    InvalidSignature,
    /// Entries must be between 128 and 512 bytes long.
    InvalidEntrySize(u32),
    /// The entry array starts beyond what a 32-bit LBA can address.
    EntryArrayOutOfRange(u64),
}

impl<BDE> From<BDE> for Error<BDE>
where
    BDE: Debug,
{
    fn from(e: BDE) -> Self {
        Self::DeviceError(e)
    }
}

/// The GPT header, as stored in block 1.
#[derive(Clone)]
pub struct GptHeader {
    block: Block,
}

impl GptHeader {
    pub const LBA: BlockIdx = BlockIdx(1);
    pub const MIN_ENTRY_SIZE: u32 = 128;
    const SIGNATURE: &'static [u8; 8] = b"EFI PART";

    fn data(&self) -> &[u8] {
        &self.block.contents
    }

    /// Wrap a block, if it carries the GPT signature.
    pub fn from_block(block: Block) -> Option<Self> {
        if &block[0..8] == Self::SIGNATURE {
            Some(GptHeader { block })
        } else {
            None
        }
    }

    define_field!(revision, u32, 8);
    define_field!(header_size, u32, 12);
    define_field!(current_lba, u64, 24);
    define_field!(backup_lba, u64, 32);
    define_field!(first_usable_lba, u64, 40);
    define_field!(last_usable_lba, u64, 48);
    define_field!(entry_array_lba, u64, 72);
    define_field!(num_entries, u32, 80);
    define_field!(entry_size, u32, 84);

    /// How many entries fit in one sector of the entry array.
    pub fn entries_per_sector(&self) -> u32 {
        match self.entry_size() {
            0 => 0,
            size => Block::LEN_U32 / size,
        }
    }

    /// How many entries a single-sector read can check.
    pub fn entries_to_check(&self) -> u32 {
        self.num_entries().min(self.entries_per_sector())
    }

    /// Sectors occupied by the whole entry array.
    pub fn entry_array_sectors(&self) -> u64 {
        let bytes = u64::from(self.num_entries()) * u64::from(self.entry_size());
        (bytes + u64::from(Block::LEN_U32) - 1) / u64::from(Block::LEN_U32)
    }
}

impl core::fmt::Debug for GptHeader {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GptHeader")
            .field("revision", &self.revision())
            .field("entry_array_lba", &self.entry_array_lba())
            .field("num_entries", &self.num_entries())
            .field("entry_size", &self.entry_size())
            .finish()
    }
}

/// A view of one entry in the partition entry array.
pub struct GptEntryRaw<'a> {
    data: &'a [u8],
}

impl<'a> GptEntryRaw<'a> {
    const NAME_IDX: usize = 56;

    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn data(&self) -> &[u8] {
        self.data
    }

    define_field!(first_lba, u64, 32);
    define_field!(last_lba, u64, 40);
    define_field!(attributes, u64, 48);

    pub fn type_guid(&self) -> &[u8] {
        &self.data[0..16]
    }

    pub fn unique_guid(&self) -> &[u8] {
        &self.data[16..32]
    }

    /// Unused entries have an all-zero type GUID.
    pub fn is_used(&self) -> bool {
        self.type_guid().iter().any(|&b| b != 0)
    }

    /// The UTF-16 name, up to the first null. Characters outside ASCII are
    /// replaced by '?'. `None` when the name is empty.
    pub fn name(&self) -> Option<PartitionName> {
        let mut name = PartitionName::new();
        let raw = &self.data[Self::NAME_IDX..];
        for unit in raw.chunks_exact(2).take(PARTITION_NAME_LEN) {
            let unit = u16::from_le_bytes([unit[0], unit[1]]);
            if unit == 0 {
                break;
            }
            let c = if unit < 0x80 { unit as u8 as char } else { '?' };
            if name.push(c).is_err() {
                break;
            }
        }
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }

    /// Start and length as 32-bit values, if the entry is well formed and
    /// addressable.
    pub fn extent(&self) -> Option<(BlockIdx, BlockCount)> {
        let first = self.first_lba();
        let last = self.last_lba();
        if last < first {
            return None;
        }
        let start = u32::try_from(first).ok()?;
        let count = u32::try_from(last - first + 1).ok()?;
        Some((BlockIdx(start), BlockCount(count)))
    }
}

/// A validated header plus the first sector of its entry array.
#[derive(Clone)]
pub struct Gpt {
    header: GptHeader,
    entries: Block,
}

impl Gpt {
    /// Read the header and the first sector of the entry array.
    pub fn read<BD>(block_device: &mut BD) -> Result<Self, Error<BD::Error>>
    where
        BD: BlockDevice,
    {
        let block = block_device.read_block(GptHeader::LBA, "read_gpt_header")?;
        let header = GptHeader::from_block(block).ok_or(Error::InvalidSignature)?;
        debug!(
            "GPT header: {} entries of {} bytes at {}",
            header.num_entries(),
            header.entry_size(),
            header.entry_array_lba()
        );

        let entry_size = header.entry_size();
        if entry_size < GptHeader::MIN_ENTRY_SIZE || entry_size > Block::LEN_U32 {
            return Err(Error::InvalidEntrySize(entry_size));
        }

        let array_lba = header.entry_array_lba();
        let array_lba =
            u32::try_from(array_lba).map_err(|_| Error::EntryArrayOutOfRange(array_lba))?;
        let entries = block_device.read_block(BlockIdx(array_lba), "read_gpt_entries")?;

        Ok(Gpt { header, entries })
    }

    pub fn header(&self) -> &GptHeader {
        &self.header
    }

    /// The entries held in the sector which was read. Unused slots included.
    pub fn raw_entries(&self) -> impl Iterator<Item = GptEntryRaw<'_>> {
        let size = self.header.entry_size() as usize;
        let count = self.header.entries_to_check() as usize;
        self.entries
            .chunks_exact(size.max(GptHeader::MIN_ENTRY_SIZE as usize))
            .take(count)
            .map(GptEntryRaw::new)
    }

    /// The used entries, each with its filesystem detected.
    pub fn partitions<BD>(&self, block_device: &mut BD) -> PartitionTable
    where
        BD: BlockDevice,
    {
        let device_blocks = block_device.num_blocks().ok();
        let mut table = PartitionTable::new(TableKind::Gpt);

        if self.header.num_entries() > self.header.entries_per_sector() {
            warn!(
                "GPT has {} entries over {} sectors, only the first sector is read",
                self.header.num_entries(),
                self.header.entry_array_sectors()
            );
            table.set_truncated();
        }

        for (idx, raw) in self.raw_entries().enumerate() {
            if !raw.is_used() {
                continue;
            }
            let (lba_start, block_count) = match raw.extent() {
                Some(extent) => extent,
                None => {
                    warn!(
                        "skipping GPT entry {}: LBAs {} to {} are not usable",
                        idx,
                        raw.first_lba(),
                        raw.last_lba()
                    );
                    continue;
                }
            };
            debug!(
                "GPT entry {}: {} blocks at {}",
                idx, block_count.0, lba_start.0
            );
            table.push(PartitionEntry::new(
                block_device,
                device_blocks,
                PartitionType::GptProtective,
                lba_start,
                block_count,
                false,
                raw.name(),
            ));
        }

        table
    }
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
