use crate::{Block, BlockIdx};

/// The start of a FAT volume's boot sector.
pub struct BootParameterBlock<'a> {
    block: &'a Block,
}

impl<'a> BootParameterBlock<'a> {
    pub fn new(block: &'a Block) -> Self {
        Self { block }
    }

    pub fn data(&self) -> &[u8] {
        &self.block.contents
    }

    // FAT12/FAT16/FAT32
    define_field!(bytes_per_block, u16, 11);
    define_field!(blocks_per_cluster, u8, 13);
    define_field!(reserved_block_count, u16, 14);
    define_field!(num_fats, u8, 16);
    define_field!(root_entries_count, u16, 17);
    define_field!(total_blocks16, u16, 19);
    define_field!(media, u8, 21);
    define_field!(fat_size16, u16, 22);
    define_field!(total_blocks32, u32, 32);

    // FAT32 only
    define_field!(fat_size32, u32, 36);
    define_field!(first_root_dir_cluster, u32, 44);

    /// FAT32 has no 16-bit FAT size.
    pub fn is_fat32(&self) -> bool {
        self.fat_size16() == 0
    }

    pub fn fat_size(&self) -> u32 {
        if self.is_fat32() {
            self.fat_size32()
        } else {
            u32::from(self.fat_size16())
        }
    }
}

/// The derived layout would not fit a 32-bit LBA.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct GeometryOverflow;

/// Where the pieces of a FAT volume live, in absolute LBAs.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FatGeometry {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub fat_copies: u8,
    /// Always 0 on FAT32, where the root directory is a cluster chain.
    pub root_entries: u16,
    pub sectors_per_fat: u32,
    pub is_fat32: bool,
    pub fat_start: BlockIdx,
    /// First sector of the root directory. On FAT32 this is the start of the
    /// data region.
    pub root_dir_start: BlockIdx,
}

impl FatGeometry {
    /// Derive the layout of the volume whose boot sector is `block`, found at
    /// `partition_start`.
    pub fn new(block: &Block, partition_start: BlockIdx) -> Result<Self, GeometryOverflow> {
        let bpb = BootParameterBlock::new(block);

        let reserved_sectors = bpb.reserved_block_count();
        let fat_copies = bpb.num_fats();
        let sectors_per_fat = bpb.fat_size();

        let fat_start = partition_start
            .0
            .checked_add(u32::from(reserved_sectors))
            .ok_or(GeometryOverflow)?;
        let fats_len = u32::from(fat_copies)
            .checked_mul(sectors_per_fat)
            .ok_or(GeometryOverflow)?;
        let root_dir_start = fat_start.checked_add(fats_len).ok_or(GeometryOverflow)?;

        Ok(FatGeometry {
            bytes_per_sector: bpb.bytes_per_block(),
            sectors_per_cluster: bpb.blocks_per_cluster(),
            reserved_sectors,
            fat_copies,
            root_entries: bpb.root_entries_count(),
            sectors_per_fat,
            is_fat32: bpb.is_fat32(),
            fat_start: BlockIdx(fat_start),
            root_dir_start: BlockIdx(root_dir_start),
        })
    }

    /// Sectors taken by a FAT12/16 root directory.
    pub fn root_dir_sectors(&self) -> u32 {
        (u32::from(self.root_entries) * 32 + (Block::LEN_U32 - 1)) / Block::LEN_U32
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use hex_literal::hex;

    fn fat32_boot_sector() -> Block {
        let mut block = Block::new();
        // jmp, OEM name, then the BPB from offset 11.
        block[0..11].copy_from_slice(b"\xEB\x58\x90MSWIN4.1");
        block[11..36].copy_from_slice(&hex!(
            "00 02 08 20 00 02 00 00 00 00 F8 00 00 3F 00 FF 00 00 08 00 00 00 F0 7F 00"
        ));
        block[36..40].copy_from_slice(&8192u32.to_le_bytes());
        block[44..48].copy_from_slice(&2u32.to_le_bytes());
        block[82..90].copy_from_slice(b"FAT32   ");
        block[510] = 0x55;
        block[511] = 0xAA;
        block
    }

    #[test]
    fn fat32_layout() {
        let block = fat32_boot_sector();
        let bpb = BootParameterBlock::new(&block);
        assert!(bpb.is_fat32());
        assert_eq!(bpb.first_root_dir_cluster(), 2);
        assert_eq!(bpb.media(), 0xF8);

        let geometry = FatGeometry::new(&block, BlockIdx(2048)).unwrap();
        assert_eq!(geometry.bytes_per_sector, 512);
        assert_eq!(geometry.sectors_per_cluster, 8);
        assert_eq!(geometry.reserved_sectors, 32);
        assert_eq!(geometry.fat_copies, 2);
        assert_eq!(geometry.root_entries, 0);
        assert_eq!(geometry.sectors_per_fat, 8192);
        assert!(geometry.is_fat32);
        assert_eq!(geometry.fat_start, BlockIdx(2080));
        assert_eq!(geometry.root_dir_start, BlockIdx(18464));
        assert_eq!(geometry.root_dir_sectors(), 0);
    }

    #[test]
    fn fat16_layout() {
        let mut block = Block::new();
        block[11..24].copy_from_slice(&hex!("00 02 04 04 00 02 00 02 00 00 F8 F0 00"));
        let geometry = FatGeometry::new(&block, BlockIdx(63)).unwrap();
        assert!(!geometry.is_fat32);
        assert_eq!(geometry.sectors_per_fat, 240);
        assert_eq!(geometry.root_entries, 512);
        assert_eq!(geometry.fat_start, BlockIdx(67));
        assert_eq!(geometry.root_dir_start, BlockIdx(67 + 480));
        assert_eq!(geometry.root_dir_sectors(), 32);
    }

    #[test]
    fn layout_past_32_bits() {
        let mut block = fat32_boot_sector();
        block[36..40].copy_from_slice(&u32::MAX.to_le_bytes());
        assert_eq!(
            FatGeometry::new(&block, BlockIdx(0)),
            Err(GeometryOverflow)
        );

        let block = fat32_boot_sector();
        assert_eq!(
            FatGeometry::new(&block, BlockIdx(u32::MAX - 4)),
            Err(GeometryOverflow)
        );
    }
}
