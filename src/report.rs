//! sdmmc-inspect - Card reports
//!
//! Puts the decoders together: partition table, filesystems and root
//! directory listings, written as text to any [`core::fmt::Write`] sink.

use core::fmt::{self, Debug, Write};

use crate::{
    fat::{FatError, FatGeometry, FatVolume},
    filesystem::FilesystemKind,
    mbr::Mbr,
    partition::{DiskAnalysis, PartitionEntry, PartitionTable, TableKind},
    sdmmc::CardInfo,
    BlockCount, BlockDevice,
};

#[cfg(feature = "log")]
use log::{debug, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, warn};

#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug)]
pub enum ReportError<E>
where
    E: Debug,
{
    /// Reading the card failed before the partition table was known.
    DeviceError(E),
    /// The sink refused the text.
    Format,
}

impl<E> From<fmt::Error> for ReportError<E>
where
    E: Debug,
{
    fn from(_: fmt::Error) -> Self {
        Self::Format
    }
}

/// A byte count shown in mebibytes with one decimal, e.g. `512.0 MB`.
/// Width and alignment apply to the number.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Megabytes(pub u64);

impl Megabytes {
    const MIB: u64 = 1024 * 1024;

    pub fn from_blocks(count: BlockCount) -> Self {
        Megabytes(count.bytes())
    }
}

impl fmt::Display for Megabytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tenths = (self.0.saturating_mul(10) + Self::MIB / 2) / Self::MIB;
        let mut number: heapless::String<24> = heapless::String::new();
        write!(number, "{}.{}", tenths / 10, tenths % 10)?;
        f.pad(&number)?;
        f.write_str(" MB")
    }
}

const TABLE_RULE: &str = "+-----+-------------+------------+-----------+";
const NAME_WIDTH: usize = 11;

/// The name shown in the summary table: the GPT name cut to fit, or
/// `Partition n`.
fn summary_name(entry: &PartitionEntry, number: usize) -> heapless::String<NAME_WIDTH> {
    let mut name = heapless::String::new();
    match &entry.name {
        Some(gpt_name) => {
            for c in gpt_name.chars() {
                if name.push(c).is_err() {
                    break;
                }
            }
        }
        None => {
            // "Partition 8" is the longest this produces.
            let _ = write!(name, "Partition {}", number);
        }
    }
    name
}

/// Write what the card itself reported during bring-up.
pub fn write_card_info<W>(w: &mut W, card_info: &CardInfo) -> fmt::Result
where
    W: Write,
{
    writeln!(w, "SD Card Information:")?;
    writeln!(w, "Type: {}", card_info.card_type.name())?;
    writeln!(
        w,
        "Capacity: {} ({} blocks)",
        Megabytes::from_blocks(card_info.blocks),
        card_info.blocks.0
    )?;
    writeln!(w, "Block size: {} bytes", card_info.block_size)
}

/// Write the `+-----+` table of partitions.
pub fn write_partition_summary<W>(w: &mut W, table: &PartitionTable) -> fmt::Result
where
    W: Write,
{
    writeln!(w, "{}", TABLE_RULE)?;
    writeln!(w, "| #   | Name        | Type       | Size      |")?;
    writeln!(w, "{}", TABLE_RULE)?;
    for (idx, entry) in table.iter().enumerate() {
        writeln!(
            w,
            "| {:<3} | {:<11} | {:<10} | {:>6} |",
            idx + 1,
            summary_name(entry, idx + 1).as_str(),
            entry.filesystem,
            Megabytes::from_blocks(entry.block_count)
        )?;
    }
    writeln!(w, "{}", TABLE_RULE)?;
    if table.truncated() {
        writeln!(w, "(more partitions exist than are shown)")?;
    }
    Ok(())
}

/// Write the boot sector fields and where they put the FAT and root
/// directory.
pub fn write_geometry<W>(w: &mut W, geometry: &FatGeometry) -> fmt::Result
where
    W: Write,
{
    writeln!(w, "  Bytes per sector: {}", geometry.bytes_per_sector)?;
    writeln!(w, "  Sectors per cluster: {}", geometry.sectors_per_cluster)?;
    writeln!(w, "  Reserved sectors: {}", geometry.reserved_sectors)?;
    writeln!(w, "  Number of FATs: {}", geometry.fat_copies)?;
    writeln!(w, "  Root entries: {}", geometry.root_entries)?;
    writeln!(w, "  Sectors per FAT: {}", geometry.sectors_per_fat)?;
    writeln!(w, "  FAT starts at LBA: {}", geometry.fat_start.0)?;
    writeln!(w, "  Root directory at LBA: {}", geometry.root_dir_start.0)
}

/// Describe one partition and, for FAT, list its root directory.
///
/// Read errors inside the partition are written into the report rather
/// than returned, so one bad partition does not hide the others.
pub fn write_partition_contents<BD, W>(
    block_device: &mut BD,
    w: &mut W,
    number: usize,
    entry: &PartitionEntry,
) -> fmt::Result
where
    BD: BlockDevice,
    W: Write,
{
    writeln!(
        w,
        "--- PARTITION {}: {} ({}) ---",
        number,
        entry.filesystem,
        Megabytes::from_blocks(entry.block_count)
    )?;
    if entry.exceeds_device {
        writeln!(w, "  Warning: partition extends past the end of the card")?;
    }

    match entry.filesystem {
        FilesystemKind::Fat12 | FilesystemKind::Fat16 | FilesystemKind::Fat32 => {}
        FilesystemKind::ExFat => {
            return writeln!(w, "exFAT partition - contents listing not implemented yet");
        }
        FilesystemKind::Ext => {
            return writeln!(
                w,
                "Linux ext filesystem - contents listing not implemented yet"
            );
        }
        FilesystemKind::ReadError => {
            return writeln!(w, "Could not read boot sector for partition {}", number);
        }
        FilesystemKind::Unknown => {
            return writeln!(w, "Unknown filesystem type - cannot list contents");
        }
    }

    let mut volume = match FatVolume::open(&mut *block_device, entry.lba_start) {
        Ok(volume) => volume,
        Err(FatError::DeviceError(_)) => {
            warn!("boot sector of partition {} became unreadable", number);
            return writeln!(w, "Could not read boot sector for partition {}", number);
        }
        Err(FatError::NotFat(kind)) => {
            return writeln!(w, "Boot sector no longer looks like FAT ({})", kind);
        }
        Err(FatError::GeometryOverflow) => {
            return writeln!(w, "FAT layout does not fit a 32-bit LBA");
        }
    };

    write_geometry(w, volume.geometry())?;
    match volume.root_directory() {
        Ok(root) => {
            writeln!(w)?;
            writeln!(w, "  === Directory listing for / ===")?;
            root.write_listing(w, "  ")?;
        }
        Err(_) => {
            writeln!(
                w,
                "  Error reading directory sector {}",
                volume.geometry().root_dir_start.0
            )?;
        }
    }
    Ok(())
}

/// Write a report of everything on the card: which tables are present, a
/// summary of the partitions, then the contents of each.
pub fn write_card_report<BD, W>(
    block_device: &mut BD,
    w: &mut W,
) -> Result<(), ReportError<BD::Error>>
where
    BD: BlockDevice,
    W: Write,
{
    let blocks = block_device.num_blocks().map_err(ReportError::DeviceError)?;
    let lba0 = block_device
        .read_block(Mbr::LBA, "card_report")
        .map_err(ReportError::DeviceError)?;
    let analysis = DiskAnalysis::from_block(&lba0);
    let table =
        PartitionTable::scan_with(block_device, lba0).map_err(ReportError::DeviceError)?;
    debug!(
        "report: {} table with {} partitions",
        table.kind().name(),
        table.len()
    );

    writeln!(w, "=== CURRENT SD CARD CONTENT ===")?;
    writeln!(
        w,
        "Card: {} ({} blocks)",
        Megabytes::from_blocks(blocks),
        blocks.0
    )?;
    writeln!(
        w,
        "MBR: {}, GPT: {}",
        if analysis.has_mbr { "yes" } else { "no" },
        if analysis.has_gpt { "yes" } else { "no" }
    )?;
    writeln!(w, "Partition table: {}", table.kind().name())?;

    if table.is_empty() {
        if table.kind() != TableKind::None {
            writeln!(w, "Partition table is empty.")?;
        }
        writeln!(w, "No partitions found.")?;
        return Ok(());
    }

    writeln!(w)?;
    write_partition_summary(w, &table)?;

    writeln!(w)?;
    writeln!(w, "=== ALL PARTITION CONTENTS ===")?;
    for (idx, entry) in table.iter().enumerate() {
        writeln!(w)?;
        write_partition_contents(block_device, w, idx + 1, entry)?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        mbr::PartitionType,
        sdmmc::{CardInfo, CardType},
        BlockIdx,
    };

    #[test]
    fn megabytes() {
        assert_eq!(format!("{}", Megabytes(512 * 1024 * 1024)), "512.0 MB");
        assert_eq!(format!("{}", Megabytes(1536 * 1024)), "1.5 MB");
        assert_eq!(format!("{:>6}", Megabytes(1024 * 1024)), "   1.0 MB");
        assert_eq!(format!("{}", Megabytes(0)), "0.0 MB");
        assert_eq!(
            format!("{}", Megabytes::from_blocks(BlockCount(2048))),
            "1.0 MB"
        );
    }

    #[test]
    fn card_info_lines() {
        let info = CardInfo {
            card_type: CardType::SDHC,
            blocks: BlockCount(1024 * 1024),
            block_size: 512,
        };
        let mut out = String::new();
        write_card_info(&mut out, &info).unwrap();
        assert_eq!(
            out,
            "SD Card Information:\nType: SDHC\nCapacity: 512.0 MB (1048576 blocks)\nBlock size: 512 bytes\n"
        );
    }

    fn name(s: &str) -> crate::partition::PartitionName {
        let mut name = crate::partition::PartitionName::new();
        name.push_str(s).unwrap();
        name
    }

    #[test]
    fn summary_rows() {
        let mut table = PartitionTable::new(TableKind::Gpt);
        table.push(PartitionEntry {
            ty: PartitionType::GptProtective,
            lba_start: BlockIdx(2048),
            block_count: BlockCount(204_800),
            bootable: false,
            name: Some(name("EFI system partition")),
            filesystem: FilesystemKind::Fat32,
            exceeds_device: false,
        });
        table.push(PartitionEntry {
            ty: PartitionType::GptProtective,
            lba_start: BlockIdx(206_848),
            block_count: BlockCount(20),
            bootable: false,
            name: None,
            filesystem: FilesystemKind::Ext,
            exceeds_device: false,
        });

        let mut out = String::new();
        write_partition_summary(&mut out, &table).unwrap();
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines[3], "| 1   | EFI system  | FAT32      |  100.0 MB |");
        assert_eq!(lines[4], "| 2   | Partition 2 | ext2/3/4   |    0.0 MB |");
        assert_eq!(lines[5], TABLE_RULE);
        for line in &lines {
            assert_eq!(line.len(), TABLE_RULE.len(), "{:?}", line);
        }
    }
}
