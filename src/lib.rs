//! # sdmmc-inspect
//!
//! > Look inside an SD card from an embedded Rust device
//!
//! This crate brings up an SD card over SPI and reports what is on it: the
//! MBR or GPT partition table, the filesystem in each partition, and for FAT
//! volumes the boot sector layout and a listing of the root directory. It is
//! `#![no_std]`, does not use `alloc`, and only ever reads from the card.
//!
//! ## Using the crate
//!
//! Every decoder works on anything implementing [`BlockDevice`], which reads
//! 512-byte blocks. [`SdMmcSpi`] provides one for SD and SDHC cards over SPI,
//! and [`MemoryBlockDevice`] provides one over a disk image in memory.
//!
//! ```rust,ignore
//! use core::fmt::Write;
//!
//! // Configure the SPI bus at sdmmc_inspect::sdmmc::INIT_CLOCK_HZ first.
//! let sdmmc = sdmmc_inspect::SdMmcSpi::new(spi, cs, delay);
//! match sdmmc.acquire() {
//!     Ok(mut card) => {
//!         sdmmc_inspect::report::write_card_info(&mut uart, card.card_info()).unwrap();
//!         if let Err(e) = sdmmc_inspect::report::write_card_report(&mut card, &mut uart) {
//!             writeln!(uart, "Report failed: {:?}", e).unwrap();
//!         }
//!     }
//!     Err((e, _sdmmc)) => writeln!(uart, "Init failed: {:?}", e).unwrap(),
//! }
//! ```
//!
//! ## Features
//!
//! * `lfn` (default): rebuild VFAT long file names in directory listings.
//!   Without it only 8.3 names are shown.
//! * `defmt-log`: By turning off the default features and enabling the `defmt-log` feature you can
//! configure this crate to log messages over defmt instead.
//!
//! Make sure that either the `log` feature or the `defmt-log` feature is enabled.

#![cfg_attr(not(test), no_std)]

// ****************************************************************************
//
// Imports
//
// ****************************************************************************

#[macro_use]
mod structure;

pub mod block_device;
pub mod fat;
pub mod filesystem;
pub mod gpt;
pub mod hexdump;
pub mod mbr;
pub mod partition;
pub mod report;
pub mod sdmmc;
pub mod sdmmc_proto;


pub use crate::block_device::{
    Block, BlockCount, BlockDevice, BlockIdx, MemoryBlockDevice, MemoryError,
};
pub use crate::filesystem::FilesystemKind;
pub use crate::hexdump::HexDump;
pub use crate::partition::{DiskAnalysis, PartitionEntry, PartitionTable, TableKind};
pub use crate::sdmmc::{
    AcquireOpts, CardInfo, CardType, Error as SdMmcError, RetryPolicy, SdMmcSpi,
};

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
