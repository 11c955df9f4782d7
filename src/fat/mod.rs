//! sdmmc-inspect - FAT volumes
//!
//! Reads a FAT12/16/32 boot sector, derives where the FATs and the root
//! directory live, and lists directory sectors.

use core::fmt::Debug;

use crate::{filesystem::FilesystemKind, Block, BlockDevice, BlockIdx};

pub use self::{
    boot_param_block::{BootParameterBlock, FatGeometry, GeometryOverflow},
    directory::{
        write_listing, Attributes, DirEntry, DirEntryRaw, DirIter, ListingSummary, ShortName,
        ShortNameRaw,
    },
    timestamp::FatTimestamp,
};

#[cfg(feature = "lfn")]
pub use self::lfn::{LongNameBuffer, MAX_LONG_NAME};

pub mod boot_param_block;
pub mod directory;
#[cfg(feature = "lfn")]
pub mod lfn;
pub mod timestamp;

#[cfg(test)]
mod test;

#[cfg(feature = "log")]
use log::debug;

#[cfg(feature = "defmt-log")]
use defmt::debug;

#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug)]
pub enum FatError<E>
where
    E: Debug,
{
    DeviceError(E),
    /// The boot sector does not describe a FAT volume.
    NotFat(FilesystemKind),
    GeometryOverflow,
}

impl<E> From<GeometryOverflow> for FatError<E>
where
    E: Debug,
{
    fn from(_: GeometryOverflow) -> Self {
        Self::GeometryOverflow
    }
}

/// An opened FAT volume on a block device.
pub struct FatVolume<BD>
where
    BD: BlockDevice,
{
    block_device: BD,
    kind: FilesystemKind,
    geometry: FatGeometry,
}

impl<BD> core::fmt::Debug for FatVolume<BD>
where
    BD: BlockDevice,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FatVolume")
            .field("kind", &self.kind)
            .field("geometry", &self.geometry)
            .finish()
    }
}

impl<BD> FatVolume<BD>
where
    BD: BlockDevice,
{
    /// Read the boot sector at `partition_start` and derive the layout.
    pub fn open(
        mut block_device: BD,
        partition_start: BlockIdx,
    ) -> Result<Self, FatError<BD::Error>> {
        let boot_sector = block_device
            .read_block(partition_start, "fat_boot_sector")
            .map_err(FatError::DeviceError)?;

        let kind = FilesystemKind::classify(&boot_sector);
        if !kind.is_fat() {
            return Err(FatError::NotFat(kind));
        }

        let geometry = FatGeometry::new(&boot_sector, partition_start)?;
        debug!(
            "{} volume at {}: FAT at {}, root directory at {}",
            kind.label(),
            partition_start.0,
            geometry.fat_start.0,
            geometry.root_dir_start.0
        );

        Ok(Self {
            block_device,
            kind,
            geometry,
        })
    }

    pub fn release(self) -> BD {
        self.block_device
    }

    pub fn kind(&self) -> FilesystemKind {
        self.kind
    }

    pub fn geometry(&self) -> &FatGeometry {
        &self.geometry
    }

    /// Read one sector of directory entries. Directories spanning several
    /// sectors need one call per sector.
    pub fn read_directory(
        &mut self,
        lba: BlockIdx,
    ) -> Result<DirectorySector, FatError<BD::Error>> {
        let block = self
            .block_device
            .read_block(lba, "fat_directory")
            .map_err(FatError::DeviceError)?;
        Ok(DirectorySector { lba, block })
    }

    /// The first sector of the root directory.
    pub fn root_directory(&mut self) -> Result<DirectorySector, FatError<BD::Error>> {
        let lba = self.geometry.root_dir_start;
        self.read_directory(lba)
    }
}

/// One sector's worth of directory entries.
#[derive(Debug, Clone)]
pub struct DirectorySector {
    lba: BlockIdx,
    block: Block,
}

impl DirectorySector {
    pub fn new(lba: BlockIdx, block: Block) -> Self {
        Self { lba, block }
    }

    pub fn lba(&self) -> BlockIdx {
        self.lba
    }

    pub fn block(&self) -> &Block {
        &self.block
    }

    pub fn iter(&self) -> DirIter<'_> {
        DirIter::new(&self.block)
    }

    /// `ls -l` style listing with totals.
    pub fn write_listing<W>(
        &self,
        w: &mut W,
        indent: &str,
    ) -> Result<ListingSummary, core::fmt::Error>
    where
        W: core::fmt::Write,
    {
        write_listing(w, indent, self.iter())
    }
}

impl<'a> IntoIterator for &'a DirectorySector {
    type Item = DirEntry;
    type IntoIter = DirIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
