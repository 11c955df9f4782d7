//! sdmmc-inspect - SDMMC Protocol
//!
//! Implements the SD/MMC SPI-mode protocol on some generic SPI interface:
//! the power-up handshake and single block reads. Writes are not supported.
//!
//! This is currently optimised for readability and debugability, not
//! performance.

mod busy;
use busy::{OpCond, SdMmcSpiBusy};

use core::fmt::Debug;

use crate::sdmmc_proto::*;
use crate::{Block, BlockCount, BlockDevice, BlockIdx};

use embedded_hal::blocking::delay::DelayUs;
use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::OutputPin;
#[cfg(feature = "log")]
use log::{debug, trace, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, trace, warn};

/// The SPI clock the card must be brought up at. Configure the bus at this
/// rate (anything up to 400 kHz works) before calling `acquire`; it can be
/// raised afterwards through [`SdMmcSpi::spi_mut`].
pub const INIT_CLOCK_HZ: u32 = 100_000;

/// The block count reported until the CSD register is decoded.
pub const PLACEHOLDER_BLOCK_COUNT: BlockCount = BlockCount(1024 * 1024);

/// Dummy bytes clocked out with CS deasserted at power-up (80 clocks).
const POWER_UP_DUMMY_BYTES: usize = 10;

/// CMD8 response of a card which does not know the command: SD v1 or MMC.
const R1_V1_CARD: u8 = R1_ILLEGAL_COMMAND | R1_IDLE_STATE;

/// Represents an SD Card interface.
/// Built from an SPI peripheral, a Chip Select pin and a delay source. We
/// need Chip Select to be separate so we can clock out some bytes without
/// Chip Select asserted (which puts the card into SPI mode).
///
/// The `State` parameter is either [`NotInit`] or [`Initialized`]; only an
/// initialized interface can read blocks.
pub struct SdMmcSpi<SPI, CS, DELAY, State>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
    DELAY: DelayUs<u32>,
{
    spi: SPI,
    cs: CS,
    delay: DELAY,
    options: AcquireOpts,
    state: State,
}

/// The possible errors `SdMmcSpi` can generate.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// We got an error from the SPI peripheral
    Transport,
    /// Couldn't set a GPIO pin
    GpioError,
    /// We didn't get a response when waiting for the card to not be busy
    TimeoutWaitNotBusy,
    /// The card never reached the ready state. Start again from scratch.
    InitFailed(InitFailure),
    /// A single block read did not complete.
    ReadFailed(ReadFailure),
    /// This operation is not supported by this driver.
    NotImplemented,
}

/// Why the power-up handshake failed.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InitFailure {
    /// CMD0 did not put the card into the idle state.
    Cmd0Rejected(u8),
    /// The CMD8 echo did not match the requested voltage and check pattern.
    VoltageMismatch(u32),
    /// An SD v2 card stayed idle through both ACMD41 phases.
    Acmd41Timeout,
    /// An SD v1 card stayed idle through every ACMD41 attempt.
    Acmd41TimeoutV1,
    /// The card rejected the CMD55 application command prefix.
    AppCommandRejected(u8),
    /// CMD8 gave a response we don't know how to handle.
    UnsupportedCard(u8),
    /// CMD58 (read OCR) failed.
    Ocr(u8),
}

/// Why a block read failed.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReadFailure {
    /// CMD17 was not accepted.
    CommandRejected(u8),
    /// The data start token never arrived.
    DataTimeout,
    /// We got a CRC mismatch (card gave us, we calculated)
    CrcMismatch { card: u16, computed: u16 },
    /// The block lies past the end of the card.
    OutOfRange(BlockIdx),
}

impl From<InitFailure> for Error {
    fn from(reason: InitFailure) -> Self {
        Error::InitFailed(reason)
    }
}

impl From<ReadFailure> for Error {
    fn from(reason: ReadFailure) -> Self {
        Error::ReadFailed(reason)
    }
}

/// The state of an SdMmcSpi if it is not initialized
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub struct NotInit;

/// The state of an SdMmcSpi if it is initialized
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub struct Initialized {
    card_info: CardInfo,
}

/// The different types of card we support.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CardType {
    /// SD v1 or MMC. Byte addressed.
    SD1,
    /// SD v2 standard capacity. Byte addressed.
    SD2,
    /// SD v2 high or extended capacity (SDHC/SDXC). Block addressed.
    SDHC,
}

impl CardType {
    /// Turn a block index into the address CMD17 expects for this card.
    pub fn block_address(&self, block_idx: BlockIdx) -> Option<u32> {
        match self {
            CardType::SD1 | CardType::SD2 => block_idx.0.checked_mul(Block::LEN_U32),
            CardType::SDHC => Some(block_idx.0),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CardType::SD1 => "SD1",
            CardType::SD2 => "SD2",
            CardType::SDHC => "SDHC",
        }
    }
}

/// What we learned about the card while bringing it up.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CardInfo {
    pub card_type: CardType,
    /// Until the CSD register is decoded this is the
    /// `assumed_block_count` from [`AcquireOpts`], not the real capacity.
    pub blocks: BlockCount,
    pub block_size: u16,
}

/// How often and how patiently to poll the card.
///
/// All counts are upper bounds: every wait in the driver gives up once its
/// count is used.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Bytes to clock while waiting for an R1 response.
    pub response_polls: u32,
    /// Bytes to clock while waiting for the card to release MISO.
    pub busy_polls: u32,
    /// CMD55 + ACMD41 attempts per phase on SD v2 cards.
    pub acmd41_attempts: u32,
    /// CMD55 + ACMD41 attempts on SD v1 cards.
    pub acmd41_v1_attempts: u32,
    /// Bytes to clock while waiting for the data start token.
    pub data_token_polls: u32,
    /// How many times a failing block read is tried in total.
    pub read_attempts: u32,
    pub power_up_delay_us: u32,
    pub settle_delay_us: u32,
    /// Pause between CMD55 and ACMD41.
    pub app_command_gap_us: u32,
    /// Pause between ACMD41 attempts.
    pub attempt_delay_us: u32,
}

impl RetryPolicy {
    /// The default counts with every delay set to zero.
    pub const fn immediate() -> Self {
        RetryPolicy {
            power_up_delay_us: 0,
            settle_delay_us: 0,
            app_command_gap_us: 0,
            attempt_delay_us: 0,
            ..Self::DEFAULT
        }
    }

    const DEFAULT: RetryPolicy = RetryPolicy {
        response_polls: 10,
        busy_polls: 32_000,
        acmd41_attempts: 100,
        acmd41_v1_attempts: 1000,
        data_token_polls: 1000,
        read_attempts: 1,
        power_up_delay_us: 10_000,
        settle_delay_us: 1_000,
        app_command_gap_us: 1_000,
        attempt_delay_us: 10_000,
    };
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Options for acquiring the card.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AcquireOpts {
    pub retry: RetryPolicy,
    /// CRC checking is off on the card by default, but it still sends a CRC
    /// with every data block. Set this to compare it against our own.
    pub verify_read_crc: bool,
    /// Reported as the card's size, and used to range-check reads.
    pub assumed_block_count: BlockCount,
}

impl Default for AcquireOpts {
    fn default() -> Self {
        AcquireOpts {
            retry: RetryPolicy::default(),
            verify_read_crc: false,
            assumed_block_count: PLACEHOLDER_BLOCK_COUNT,
        }
    }
}

impl<SPI, CS, DELAY> SdMmcSpi<SPI, CS, DELAY, NotInit>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
    DELAY: DelayUs<u32>,
{
    /// Create a new SD/MMC controller using a raw SPI interface.
    pub fn new(spi: SPI, cs: CS, delay: DELAY) -> Self {
        SdMmcSpi {
            spi,
            cs,
            delay,
            options: AcquireOpts::default(),
            state: NotInit,
        }
    }

    /// Give back the hardware.
    pub fn free(self) -> (SPI, CS, DELAY) {
        (self.spi, self.cs, self.delay)
    }

    /// Initializes the card into a known state
    pub fn acquire(self) -> Result<SdMmcSpi<SPI, CS, DELAY, Initialized>, (Error, Self)> {
        self.acquire_with_opts(Default::default())
    }

    fn discard_byte(&mut self) -> Result<u8, Error> {
        self.spi
            .transfer(&mut [IDLE_BYTE])
            .map(|b| b[0])
            .map_err(|_e| Error::Transport)
    }

    /// Initializes the card into a known state
    pub fn acquire_with_opts(
        mut self,
        options: AcquireOpts,
    ) -> Result<SdMmcSpi<SPI, CS, DELAY, Initialized>, (Error, Self)> {
        debug!("acquiring card with opts: {:?}", options);
        self.options = options;
        let result = self.bring_up();
        // One more clock with CS deasserted lets the card release MISO.
        let _ = self.discard_byte();

        match result {
            Ok(card_type) => {
                let card_info = CardInfo {
                    card_type,
                    blocks: self.options.assumed_block_count,
                    block_size: Block::LEN as u16,
                };
                debug!("card ready: {:?}", card_info);
                Ok(SdMmcSpi {
                    spi: self.spi,
                    cs: self.cs,
                    delay: self.delay,
                    options: self.options,
                    state: Initialized { card_info },
                })
            }
            Err(e) => {
                warn!("card initialization failed: {:?}", e);
                Err((e, self))
            }
        }
    }

    fn bring_up(&mut self) -> Result<CardType, Error> {
        let policy = self.options.retry;
        trace!("Reset card..");

        self.cs.set_high().map_err(|_| Error::GpioError)?;
        self.delay.delay_us(policy.power_up_delay_us);

        // Supply minimum of 74 clock cycles without CS asserted.
        for _ in 0..POWER_UP_DUMMY_BYTES {
            self.discard_byte()?;
        }
        self.delay.delay_us(policy.settle_delay_us);

        let mut busy = SdMmcSpiBusy::new(&mut self.spi, &mut self.cs, &mut self.delay, policy)?;

        // Enter SPI mode
        let response = busy.card_command(CMD0, 0)?;
        if response != R1_IDLE_STATE {
            return Err(InitFailure::Cmd0Rejected(response).into());
        }

        // Check card version
        let response = busy.card_command(CMD8, CMD8_ARG)?;
        let card_type = match response {
            R1_IDLE_STATE => {
                let r7 = R7 {
                    data: busy.receive_array()?,
                };
                if !r7.matches_request() {
                    return Err(InitFailure::VoltageMismatch(r7.echo()).into());
                }
                debug!("SD v2 card, CMD8 echo {:#x}", r7.echo());

                // Some cards only come up without HCS, so try that first.
                match busy.wait_op_cond(0, policy.acmd41_attempts)? {
                    OpCond::Ready => {}
                    phase1 => {
                        debug!("ACMD41 without HCS: {:?}, retrying with HCS", phase1);
                        match busy.wait_op_cond(ACMD41_HCS, policy.acmd41_attempts)? {
                            OpCond::Ready => {}
                            OpCond::Exhausted => return Err(InitFailure::Acmd41Timeout.into()),
                            OpCond::Aborted(r) => {
                                return Err(InitFailure::AppCommandRejected(r).into())
                            }
                        }
                    }
                }

                let response = busy.card_command(CMD58, 0)?;
                if response != R1_READY_STATE {
                    return Err(InitFailure::Ocr(response).into());
                }
                let ocr = Ocr {
                    data: busy.receive_array()?,
                };
                debug!("OCR: {:?}", ocr);
                if ocr.card_capacity_status() {
                    CardType::SDHC
                } else {
                    CardType::SD2
                }
            }
            R1_V1_CARD => {
                debug!("SD v1 or MMC card");
                match busy.wait_op_cond(0, policy.acmd41_v1_attempts)? {
                    OpCond::Ready => CardType::SD1,
                    OpCond::Exhausted => return Err(InitFailure::Acmd41TimeoutV1.into()),
                    OpCond::Aborted(r) => return Err(InitFailure::AppCommandRejected(r).into()),
                }
            }
            other => return Err(InitFailure::UnsupportedCard(other).into()),
        };

        debug!("Card version: {:?}", card_type);
        Ok(card_type)
    }
}

impl<SPI, CS, DELAY> SdMmcSpi<SPI, CS, DELAY, Initialized>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
    DELAY: DelayUs<u32>,
{
    /// Mark the card as unused.
    /// This should be kept infallible, because Drop is unable to fail.
    /// See https://github.com/rust-lang/rfcs/issues/814
    pub fn deinit(self) -> SdMmcSpi<SPI, CS, DELAY, NotInit> {
        SdMmcSpi {
            spi: self.spi,
            cs: self.cs,
            delay: self.delay,
            options: self.options,
            state: NotInit,
        }
    }

    pub fn card_info(&self) -> &CardInfo {
        &self.state.card_info
    }

    pub fn card_type(&self) -> CardType {
        self.state.card_info.card_type
    }

    /// Access the SPI bus, e.g. to raise its clock after initialization.
    pub fn spi_mut(&mut self) -> &mut SPI {
        &mut self.spi
    }

    /// Run a command with chip select asserted.
    ///
    /// Chip select is always deasserted, even if an error occured in `f`
    fn with_chip_select<F, R>(&mut self, f: F) -> Result<R, Error>
    where
        F: FnOnce(&mut SdMmcSpiBusy<'_, SPI, CS, DELAY>) -> Result<R, Error>,
    {
        let mut busy = SdMmcSpiBusy::new(
            &mut self.spi,
            &mut self.cs,
            &mut self.delay,
            self.options.retry,
        )?;
        f(&mut busy)
    }

    /// Read one block into `block`, retrying per the
    /// [`RetryPolicy::read_attempts`].
    pub fn read_block_into(&mut self, block: &mut Block, block_idx: BlockIdx) -> Result<(), Error> {
        let card_info = self.state.card_info;
        if block_idx.0 >= card_info.blocks.0 {
            return Err(ReadFailure::OutOfRange(block_idx).into());
        }
        let address = card_info
            .card_type
            .block_address(block_idx)
            .ok_or(ReadFailure::OutOfRange(block_idx))?;
        let verify_crc = self.options.verify_read_crc;
        let attempts = self.options.retry.read_attempts.max(1);

        trace!(
            "reading block {} at address {:#x} ({})",
            block_idx.0,
            address,
            card_info.card_type.name()
        );

        let mut attempt = 1;
        loop {
            match self.with_chip_select(|s| s.read_single(address, &mut block.contents, verify_crc))
            {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts => {
                    warn!(
                        "read of block {} failed on attempt {}: {:?}",
                        block_idx.0, attempt, e
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl<SPI, CS, DELAY> BlockDevice for SdMmcSpi<SPI, CS, DELAY, Initialized>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
    DELAY: DelayUs<u32>,
{
    type Error = Error;

    /// Read one or more blocks, starting at the given block index. Each block
    /// is fetched with its own single block read.
    fn read(
        &mut self,
        blocks: &mut [Block],
        start_block_idx: BlockIdx,
        reason: &str,
    ) -> Result<(), Self::Error> {
        debug!("read {} block(s) at {}: {}", blocks.len(), start_block_idx.0, reason);
        for (offset, block) in blocks.iter_mut().enumerate() {
            let block_idx = start_block_idx
                .checked_add(BlockCount(offset as u32))
                .ok_or(ReadFailure::OutOfRange(start_block_idx))?;
            self.read_block_into(block, block_idx)?;
        }
        Ok(())
    }

    /// Writing is not supported. Nothing is sent to the card.
    fn write(&mut self, blocks: &[Block], start_block_idx: BlockIdx) -> Result<(), Self::Error> {
        warn!(
            "refusing to write {} block(s) at {}",
            blocks.len(),
            start_block_idx.0
        );
        Err(Error::NotImplemented)
    }

    /// Determine how many blocks this device can hold.
    fn num_blocks(&mut self) -> Result<BlockCount, Self::Error> {
        Ok(self.state.card_info.blocks)
    }
}

impl<SPI, CS, DELAY, State> Debug for SdMmcSpi<SPI, CS, DELAY, State>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
    DELAY: DelayUs<u32>,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SdMmcSpi")
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn byte_addressed_cards_scale_the_block_index() {
        assert_eq!(CardType::SD1.block_address(BlockIdx(3)), Some(1536));
        assert_eq!(CardType::SD2.block_address(BlockIdx(3)), Some(1536));
        assert_eq!(CardType::SDHC.block_address(BlockIdx(3)), Some(3));
        assert_eq!(CardType::SD2.block_address(BlockIdx(0x0080_0000)), None);
    }

    #[test]
    fn immediate_policy_keeps_the_counts() {
        let immediate = RetryPolicy::immediate();
        let default = RetryPolicy::default();
        assert_eq!(immediate.acmd41_attempts, default.acmd41_attempts);
        assert_eq!(immediate.data_token_polls, default.data_token_polls);
        assert_eq!(immediate.attempt_delay_us, 0);
        assert_eq!(default.attempt_delay_us, 10_000);
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
