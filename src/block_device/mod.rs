//! sdmmc-inspect - Block Device support
//!
//! Generic code for handling block devices. Every parsing layer in this
//! crate talks to the card only through [`BlockDevice`].

mod block;
pub use block::*;

/// Represents a block device - a device which can read and write blocks (or
/// sectors). Only supports devices which are <= 2 TiB in size.
pub trait BlockDevice {
    /// The errors that the `BlockDevice` can return. Must be debug formattable.
    type Error: core::fmt::Debug;
    /// Read one or more blocks, starting at the given block index.
    fn read(
        &mut self,
        blocks: &mut [Block],
        start_block_idx: BlockIdx,
        reason: &str,
    ) -> Result<(), Self::Error>;
    /// Write one or more blocks, starting at the given block index.
    ///
    /// Devices without write support return an error and must not perform a
    /// partial write.
    fn write(&mut self, blocks: &[Block], start_block_idx: BlockIdx) -> Result<(), Self::Error>;
    /// Determine how many blocks this device can hold.
    fn num_blocks(&mut self) -> Result<BlockCount, Self::Error>;

    /// Read exactly one block.
    fn read_block(&mut self, block_idx: BlockIdx, reason: &str) -> Result<Block, Self::Error> {
        let mut blocks = [Block::new()];
        self.read(&mut blocks, block_idx, reason)?;
        let [block] = blocks;
        Ok(block)
    }
}

impl<T> BlockDevice for &mut T
where
    T: BlockDevice,
{
    type Error = T::Error;

    fn read(
        &mut self,
        blocks: &mut [Block],
        start_block_idx: BlockIdx,
        reason: &str,
    ) -> Result<(), Self::Error> {
        (*self).read(blocks, start_block_idx, reason)
    }

    fn write(&mut self, blocks: &[Block], start_block_idx: BlockIdx) -> Result<(), Self::Error> {
        (*self).write(blocks, start_block_idx)
    }

    fn num_blocks(&mut self) -> Result<BlockCount, Self::Error> {
        (*self).num_blocks()
    }
}

/// Errors from a [`MemoryBlockDevice`].
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// The requested block lies past the end of the backing memory.
    OutOfRange(BlockIdx),
}

/// A block device backed by a slice of memory, for example a disk image.
/// A trailing partial block is ignored.
#[derive(Debug)]
pub struct MemoryBlockDevice<'a> {
    memory: &'a mut [u8],
}

impl<'a> MemoryBlockDevice<'a> {
    pub fn new(memory: &'a mut [u8]) -> Self {
        Self { memory }
    }

    fn block_range(&self, block_idx: usize) -> Result<core::ops::Range<usize>, MemoryError> {
        let start = block_idx * Block::LEN;
        let end = start + Block::LEN;
        if end > self.memory.len() {
            Err(MemoryError::OutOfRange(BlockIdx(block_idx as u32)))
        } else {
            Ok(start..end)
        }
    }
}

impl<'a> BlockDevice for MemoryBlockDevice<'a> {
    type Error = MemoryError;

    fn read(
        &mut self,
        blocks: &mut [Block],
        start_block_idx: BlockIdx,
        _reason: &str,
    ) -> Result<(), Self::Error> {
        for (idx, block) in blocks.iter_mut().enumerate() {
            let range = self.block_range(start_block_idx.0 as usize + idx)?;
            block.contents.copy_from_slice(&self.memory[range]);
        }
        Ok(())
    }

    fn write(&mut self, blocks: &[Block], start_block_idx: BlockIdx) -> Result<(), Self::Error> {
        // Range-check everything first so a failing write changes nothing.
        for idx in 0..blocks.len() {
            self.block_range(start_block_idx.0 as usize + idx)?;
        }
        for (idx, block) in blocks.iter().enumerate() {
            let range = self.block_range(start_block_idx.0 as usize + idx)?;
            self.memory[range].copy_from_slice(&block.contents);
        }
        Ok(())
    }

    fn num_blocks(&mut self) -> Result<BlockCount, Self::Error> {
        Ok(BlockCount((self.memory.len() / Block::LEN) as u32))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn memory_device_reads_back_writes() {
        let mut memory = [0u8; 4 * Block::LEN];
        let mut bd = MemoryBlockDevice::new(&mut memory);
        let mut block = Block::new();
        block[0] = 0xAB;
        block[511] = 0xCD;
        bd.write(&[block.clone()], BlockIdx(2)).unwrap();
        assert_eq!(bd.read_block(BlockIdx(2), "test").unwrap(), block);
        assert_eq!(bd.num_blocks().unwrap(), BlockCount(4));
    }

    #[test]
    fn memory_device_rejects_reads_past_the_end() {
        let mut memory = [0u8; 2 * Block::LEN + 100];
        let mut bd = MemoryBlockDevice::new(&mut memory);
        assert_eq!(bd.num_blocks().unwrap(), BlockCount(2));
        assert_eq!(
            bd.read_block(BlockIdx(2), "test"),
            Err(MemoryError::OutOfRange(BlockIdx(2)))
        );
        let blocks = [Block::new(), Block::new()];
        assert_eq!(
            bd.write(&blocks, BlockIdx(1)),
            Err(MemoryError::OutOfRange(BlockIdx(2)))
        );
    }
}
