//! sdmmc-inspect - Filesystem detection
//!
//! Classifies the contents of a partition by looking for the signature bytes
//! each filesystem leaves in its first sector.

use crate::{Block, BlockDevice, BlockIdx};

#[cfg(feature = "log")]
use log::{debug, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, warn};

/// What we found in a partition's boot sector.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FilesystemKind {
    Fat12,
    Fat16,
    Fat32,
    ExFat,
    /// ext2, ext3 or ext4. They share a magic number.
    Ext,
    Unknown,
    /// The boot sector could not be read.
    ReadError,
}

impl FilesystemKind {
    const BOOT_SIGNATURE_IDX: usize = 510;
    const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];
    const FAT16_TYPE_IDX: usize = 54;
    const FAT32_TYPE_IDX: usize = 82;
    const FAT12_LABEL: &'static [u8; 8] = b"FAT12   ";
    const FAT16_LABEL: &'static [u8; 8] = b"FAT16   ";
    const FAT32_LABEL: &'static [u8; 8] = b"FAT32   ";
    const EXFAT_NAME_IDX: usize = 3;
    const EXFAT_NAME: &'static [u8; 8] = b"EXFAT   ";
    // The ext superblock starts 1024 bytes in; this is where its magic lands
    // when read as a 512-byte sector.
    const EXT_MAGIC_IDX: usize = 56;
    const EXT_MAGIC: [u8; 2] = [0x53, 0xEF];

    /// Classify a boot sector.
    pub fn classify(block: &Block) -> FilesystemKind {
        let signed = field(block, Self::BOOT_SIGNATURE_IDX, 2) == Self::BOOT_SIGNATURE;
        let fat16_field = field(block, Self::FAT16_TYPE_IDX, 8);
        let is_fat12 = fat16_field == Self::FAT12_LABEL;
        let is_fat16 = fat16_field == Self::FAT16_LABEL;
        let is_fat32 = field(block, Self::FAT32_TYPE_IDX, 8) == Self::FAT32_LABEL;

        if signed && (is_fat12 || is_fat16 || is_fat32) {
            if is_fat32 {
                FilesystemKind::Fat32
            } else if is_fat16 {
                FilesystemKind::Fat16
            } else {
                FilesystemKind::Fat12
            }
        } else if field(block, Self::EXFAT_NAME_IDX, 8) == Self::EXFAT_NAME {
            FilesystemKind::ExFat
        } else if field(block, Self::EXT_MAGIC_IDX, 2) == Self::EXT_MAGIC {
            FilesystemKind::Ext
        } else {
            FilesystemKind::Unknown
        }
    }

    /// Read the sector at `start` and classify it. Never fails: a read error
    /// becomes [`FilesystemKind::ReadError`].
    pub fn detect<BD>(block_device: &mut BD, start: BlockIdx) -> FilesystemKind
    where
        BD: BlockDevice,
    {
        match block_device.read_block(start, "detect_filesystem") {
            Ok(block) => {
                let kind = Self::classify(&block);
                debug!("filesystem at {}: {}", start.0, kind.label());
                kind
            }
            Err(_) => {
                warn!("could not read boot sector at {}", start.0);
                FilesystemKind::ReadError
            }
        }
    }

    pub fn is_fat(&self) -> bool {
        matches!(
            self,
            FilesystemKind::Fat12 | FilesystemKind::Fat16 | FilesystemKind::Fat32
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            FilesystemKind::Fat12 => "FAT12",
            FilesystemKind::Fat16 => "FAT16",
            FilesystemKind::Fat32 => "FAT32",
            FilesystemKind::ExFat => "exFAT",
            FilesystemKind::Ext => "ext2/3/4",
            FilesystemKind::Unknown => "Unknown",
            FilesystemKind::ReadError => "Read Error",
        }
    }
}

fn field(block: &Block, idx: usize, len: usize) -> &[u8] {
    &block[idx..idx + len]
}

impl core::fmt::Display for FilesystemKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.pad(self.label())
    }
}
