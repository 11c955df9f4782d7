//! sdmmc-inspect - Master Boot Record
//!
//! Decodes the classic four-slot partition table in block 0.

use crate::{
    partition::{PartitionEntry, PartitionTable, TableKind},
    Block, BlockCount, BlockDevice, BlockIdx,
};
use core::fmt::Debug;

#[cfg(feature = "log")]
use log::debug;

#[cfg(feature = "defmt-log")]
use defmt::debug;

#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug)]
pub enum Error<BlockDeviceError>
where
    BlockDeviceError: Debug,
{
    DeviceError(BlockDeviceError),
    /// Bytes 510 and 511 are not 0x55 0xAA.
    InvalidSignature,
}

impl<BDE> From<BDE> for Error<BDE>
where
    BDE: Debug,
{
    fn from(e: BDE) -> Self {
        Self::DeviceError(e)
    }
}

/// One of the four primary partition slots.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PartitionNumber {
    One,
    Two,
    Three,
    Four,
}

impl PartitionNumber {
    pub const ALL: [PartitionNumber; 4] = [Self::One, Self::Two, Self::Three, Self::Four];

    pub fn from_number(number: usize) -> Option<Self> {
        let partition = match number {
            1 => Self::One,
            2 => Self::Two,
            3 => Self::Three,
            4 => Self::Four,
            _ => return None,
        };
        Some(partition)
    }

    /// Zero-based slot index.
    pub fn index(&self) -> usize {
        match self {
            Self::One => 0,
            Self::Two => 1,
            Self::Three => 2,
            Self::Four => 3,
        }
    }

    pub fn number(&self) -> usize {
        self.index() + 1
    }
}

#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PartitionType {
    Fat12,
    Fat16Small,
    Fat16,
    Fat32ChsLba,
    Fat32Lba,
    Fat16Lba,
    Linux,
    /// A single partition covering the disk, telling MBR-only tools to keep
    /// away. The real table is the GPT behind it.
    GptProtective,
    Unknown(u8),
}

impl PartitionType {
    const FAT12: u8 = 0x01;
    /// FAT16 with fewer than 65536 sectors.
    const FAT16_SMALL: u8 = 0x04;
    /// Marker for a FAT16 partition. Seen on a card formatted with the official
    /// SD-Card formatter.
    const FAT16: u8 = 0x06;
    /// Marker for a FAT32 partition. What Macosx disk utility (and also SD-Card formatter?)
    /// use.
    const FAT32_CHS_LBA: u8 = 0x0B;
    /// Marker for a FAT32 partition. Sometimes also use for FAT16 formatted
    /// partitions.
    const FAT32_LBA: u8 = 0x0C;
    /// Marker for a FAT16 partition with LBA. Seen on a Raspberry Pi SD card.
    const FAT16_LBA: u8 = 0x0E;
    const LINUX: u8 = 0x83;
    const GPT_PROTECTIVE: u8 = 0xEE;

    pub fn from_u8(value: u8) -> Self {
        match value {
            Self::FAT12 => Self::Fat12,
            Self::FAT16_SMALL => Self::Fat16Small,
            Self::FAT16 => Self::Fat16,
            Self::FAT32_CHS_LBA => Self::Fat32ChsLba,
            Self::FAT32_LBA => Self::Fat32Lba,
            Self::FAT16_LBA => Self::Fat16Lba,
            Self::LINUX => Self::Linux,
            Self::GPT_PROTECTIVE => Self::GptProtective,
            _ => Self::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Fat12 => Self::FAT12,
            Self::Fat16Small => Self::FAT16_SMALL,
            Self::Fat16 => Self::FAT16,
            Self::Fat32ChsLba => Self::FAT32_CHS_LBA,
            Self::Fat32Lba => Self::FAT32_LBA,
            Self::Fat16Lba => Self::FAT16_LBA,
            Self::Linux => Self::LINUX,
            Self::GptProtective => Self::GPT_PROTECTIVE,
            Self::Unknown(value) => *value,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Fat12 => "FAT12",
            Self::Fat16Small => "FAT16 <32MB",
            Self::Fat16 => "FAT16",
            Self::Fat32ChsLba => "FAT32",
            Self::Fat32Lba => "FAT32 LBA",
            Self::Fat16Lba => "FAT16 LBA",
            Self::Linux => "Linux",
            Self::GptProtective => "GPT Protective MBR",
            Self::Unknown(_) => "Unknown",
        }
    }
}

/// A view of one 16 byte partition slot.
pub struct MbrEntryRaw<'a> {
    data: &'a [u8],
}

impl<'a> MbrEntryRaw<'a> {
    pub const LEN: usize = 16;
    const BOOTABLE: u8 = 0x80;

    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn data(&self) -> &[u8] {
        self.data
    }

    define_field!(status, u8, 0);
    define_field!(partition_type, u8, 4);
    define_field!(lba_start, u32, 8);
    define_field!(num_blocks, u32, 12);

    pub fn is_bootable(&self) -> bool {
        self.status() == Self::BOOTABLE
    }

    /// A slot is in use when it has a type, a start and a size.
    pub fn is_used(&self) -> bool {
        self.partition_type() != 0 && self.lba_start() != 0 && self.num_blocks() != 0
    }
}

/// A validated block 0.
#[derive(Clone)]
pub struct Mbr {
    block: Block,
}

impl Mbr {
    pub const LBA: BlockIdx = BlockIdx(0);
    const FOOTER_START: usize = 510;
    const FOOTER_VALUE: [u8; 2] = [0x55, 0xAA];
    const PARTITION1_START: usize = 446;

    /// Read block 0 and check its signature.
    pub fn read<BD>(block_device: &mut BD) -> Result<Self, Error<BD::Error>>
    where
        BD: BlockDevice,
    {
        let block = block_device.read_block(Self::LBA, "read_mbr")?;
        Self::from_block(block).ok_or(Error::InvalidSignature)
    }

    /// Wrap a block, if it carries the MBR signature.
    pub fn from_block(block: Block) -> Option<Self> {
        if block[Self::FOOTER_START..Self::FOOTER_START + 2] == Self::FOOTER_VALUE {
            Some(Mbr { block })
        } else {
            None
        }
    }

    pub fn entry(&self, number: PartitionNumber) -> MbrEntryRaw<'_> {
        let start = Self::PARTITION1_START + number.index() * MbrEntryRaw::LEN;
        MbrEntryRaw::new(&self.block[start..start + MbrEntryRaw::LEN])
    }

    /// Does any slot hold a GPT protective partition?
    pub fn is_gpt_protective(&self) -> bool {
        PartitionNumber::ALL.iter().any(|&number| {
            PartitionType::from_u8(self.entry(number).partition_type())
                == PartitionType::GptProtective
        })
    }

    /// The used slots, in slot order, each with its filesystem detected.
    pub fn partitions<BD>(&self, block_device: &mut BD) -> PartitionTable
    where
        BD: BlockDevice,
    {
        let device_blocks = block_device.num_blocks().ok();
        let mut table = PartitionTable::new(TableKind::Mbr);

        for &number in PartitionNumber::ALL.iter() {
            let raw = self.entry(number);
            if !raw.is_used() {
                continue;
            }
            let ty = PartitionType::from_u8(raw.partition_type());
            debug!(
                "MBR slot {}: type {:#x} at {} for {} blocks",
                number.number(),
                raw.partition_type(),
                raw.lba_start(),
                raw.num_blocks()
            );
            table.push(PartitionEntry::new(
                block_device,
                device_blocks,
                ty,
                BlockIdx(raw.lba_start()),
                BlockCount(raw.num_blocks()),
                raw.is_bootable(),
                None,
            ));
        }

        table
    }
}

impl core::fmt::Debug for Mbr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut list = f.debug_list();
        for &number in PartitionNumber::ALL.iter() {
            let raw = self.entry(number);
            list.entry(&(raw.partition_type(), raw.lba_start(), raw.num_blocks()));
        }
        list.finish()
    }
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
