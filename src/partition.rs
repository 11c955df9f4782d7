//! sdmmc-inspect - Partition tables
//!
//! The normalized view of a card's partitions, whichever table they came
//! from, and the scan which decides which table to decode.

use crate::{
    filesystem::FilesystemKind,
    gpt::{self, Gpt},
    mbr::{Mbr, PartitionType},
    Block, BlockCount, BlockDevice, BlockIdx,
};

#[cfg(feature = "log")]
use log::{debug, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, warn};

/// The most partitions reported from one scan. Any further partitions are
/// left out and the table is marked as truncated.
pub const MAX_PARTITIONS: usize = 8;

/// Longest GPT partition name, in characters.
pub const PARTITION_NAME_LEN: usize = 36;

pub type PartitionName = heapless::String<PARTITION_NAME_LEN>;

/// One partition, normalized from either an MBR or a GPT entry.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionEntry {
    /// The MBR type byte, or [`PartitionType::GptProtective`] for GPT entries.
    pub ty: PartitionType,
    pub lba_start: BlockIdx,
    pub block_count: BlockCount,
    pub bootable: bool,
    /// GPT partition name. MBR entries have none.
    pub name: Option<PartitionName>,
    pub filesystem: FilesystemKind,
    /// The partition claims blocks past the end of the device.
    pub exceeds_device: bool,
}

impl PartitionEntry {
    /// Build an entry, detecting the filesystem at its first block and
    /// checking it against the size of the device.
    pub(crate) fn new<BD>(
        block_device: &mut BD,
        device_blocks: Option<BlockCount>,
        ty: PartitionType,
        lba_start: BlockIdx,
        block_count: BlockCount,
        bootable: bool,
        name: Option<PartitionName>,
    ) -> Self
    where
        BD: BlockDevice,
    {
        let exceeds_device = match (lba_start.checked_add(block_count), device_blocks) {
            (None, _) => true,
            (Some(end), Some(device_blocks)) => end.0 > device_blocks.0,
            (Some(_), None) => false,
        };
        if exceeds_device {
            warn!(
                "partition at {} with {} blocks runs past the end of the device",
                lba_start.0, block_count.0
            );
        }

        let filesystem = FilesystemKind::detect(block_device, lba_start);

        PartitionEntry {
            ty,
            lba_start,
            block_count,
            bootable,
            name,
            filesystem,
            exceeds_device,
        }
    }

    /// Partition size in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.block_count.bytes()
    }
}

/// Which partition table a [`PartitionTable`] was decoded from.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TableKind {
    Mbr,
    Gpt,
    /// No valid table was found: the card is treated as tableless.
    None,
}

impl TableKind {
    pub fn name(&self) -> &'static str {
        match self {
            TableKind::Mbr => "MBR",
            TableKind::Gpt => "GPT",
            TableKind::None => "None",
        }
    }
}

/// The partitions found on a card, in table order.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionTable {
    kind: TableKind,
    entries: heapless::Vec<PartitionEntry, MAX_PARTITIONS>,
    truncated: bool,
}

impl PartitionTable {
    pub fn new(kind: TableKind) -> Self {
        PartitionTable {
            kind,
            entries: heapless::Vec::new(),
            truncated: false,
        }
    }

    /// Look at the card's first sectors and decode whichever table is there:
    /// GPT behind a protective MBR, otherwise a plain MBR, otherwise nothing.
    ///
    /// A missing or corrupt table is not an error; only failing reads are.
    pub fn scan<BD>(block_device: &mut BD) -> Result<Self, BD::Error>
    where
        BD: BlockDevice,
    {
        let lba0 = block_device.read_block(Mbr::LBA, "partition_scan")?;
        Self::scan_with(block_device, lba0)
    }

    /// As [`PartitionTable::scan`], with LBA 0 already read by the caller.
    pub fn scan_with<BD>(block_device: &mut BD, lba0: Block) -> Result<Self, BD::Error>
    where
        BD: BlockDevice,
    {
        let analysis = DiskAnalysis::from_block(&lba0);
        debug!("disk analysis: {:?}", analysis);

        match analysis.table_kind() {
            TableKind::Gpt => match Gpt::read(block_device) {
                Ok(gpt) => Ok(gpt.partitions(block_device)),
                Err(gpt::Error::DeviceError(e)) => Err(e),
                Err(_) => {
                    warn!("protective MBR present but the GPT header is unusable");
                    Ok(Self::new(TableKind::None))
                }
            },
            TableKind::Mbr => match Mbr::from_block(lba0) {
                Some(mbr) => Ok(mbr.partitions(block_device)),
                None => {
                    warn!("MBR unusable");
                    Ok(Self::new(TableKind::None))
                }
            },
            TableKind::None => Ok(Self::new(TableKind::None)),
        }
    }

    /// Add an entry, or mark the table truncated if it is already full.
    pub(crate) fn push(&mut self, entry: PartitionEntry) {
        if self.entries.push(entry).is_err() {
            warn!("more than {} partitions, ignoring the rest", MAX_PARTITIONS);
            self.truncated = true;
        }
    }

    pub(crate) fn set_truncated(&mut self) {
        self.truncated = true;
    }

    pub fn kind(&self) -> TableKind {
        self.kind
    }

    pub fn entries(&self) -> &[PartitionEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.is_full()
    }

    /// Some partitions may exist which are not in this table: either there
    /// were more than [`MAX_PARTITIONS`], or the GPT entry array continues
    /// past the one sector which was read.
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn iter(&self) -> core::slice::Iter<'_, PartitionEntry> {
        self.entries.iter()
    }
}

impl<'a> IntoIterator for &'a PartitionTable {
    type Item = &'a PartitionEntry;
    type IntoIter = core::slice::Iter<'a, PartitionEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// A quick look at block 0: is there an MBR, and does it protect a GPT?
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct DiskAnalysis {
    pub has_mbr: bool,
    pub has_gpt: bool,
}

impl DiskAnalysis {
    pub fn probe<BD>(block_device: &mut BD) -> Result<Self, BD::Error>
    where
        BD: BlockDevice,
    {
        let block = block_device.read_block(Mbr::LBA, "disk_analysis")?;
        Ok(Self::from_block(&block))
    }

    pub fn from_block(block: &Block) -> Self {
        match Mbr::from_block(block.clone()) {
            Some(mbr) => DiskAnalysis {
                has_mbr: true,
                has_gpt: mbr.is_gpt_protective(),
            },
            None => DiskAnalysis::default(),
        }
    }

    /// The table a scan should decode.
    pub fn table_kind(&self) -> TableKind {
        if self.has_gpt {
            TableKind::Gpt
        } else if self.has_mbr {
            TableKind::Mbr
        } else {
            TableKind::None
        }
    }
}
