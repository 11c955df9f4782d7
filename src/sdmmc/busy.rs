use embedded_hal::{
    blocking::{delay::DelayUs, spi::Transfer},
    digital::v2::OutputPin,
};

use crate::sdmmc_proto::*;

use super::{Error, ReadFailure, RetryPolicy};

#[cfg(feature = "log")]
use log::{debug, trace, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, trace, warn};

/// How an ACMD41 polling loop ended.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCond {
    /// The card left the idle state.
    Ready,
    /// Every attempt was used up with the card still idle.
    Exhausted,
    /// CMD55 answered with something other than ready or idle.
    Aborted(u8),
}

/// A struct used to ensure that communication only occurs
/// when CS is low.
///
/// This struct is responsible for ensuring that all SPI, CRC, and
/// other communication-layer functionalities are performed correctly.
/// Dropping it deasserts chip select, so every exit path releases the card.
pub struct SdMmcSpiBusy<'a, SPI, CS, DELAY>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
    DELAY: DelayUs<u32>,
{
    spi: &'a mut SPI,
    cs: &'a mut CS,
    delay: &'a mut DELAY,
    policy: RetryPolicy,
}

impl<'a, SPI, CS, DELAY> Drop for SdMmcSpiBusy<'a, SPI, CS, DELAY>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
    DELAY: DelayUs<u32>,
{
    fn drop(&mut self) {
        self.cs_high().ok();
    }
}

impl<'a, SPI, CS, DELAY> SdMmcSpiBusy<'a, SPI, CS, DELAY>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
    DELAY: DelayUs<u32>,
{
    pub fn new(
        spi: &'a mut SPI,
        cs: &'a mut CS,
        delay: &'a mut DELAY,
        policy: RetryPolicy,
    ) -> Result<Self, Error> {
        let mut me = Self {
            spi,
            cs,
            delay,
            policy,
        };
        me.cs_low()?;
        Ok(me)
    }

    fn cs_high(&mut self) -> Result<(), Error> {
        self.cs.set_high().map_err(|_| Error::GpioError)
    }

    fn cs_low(&mut self) -> Result<(), Error> {
        self.cs.set_low().map_err(|_| Error::GpioError)
    }

    /// Send one byte and receive one byte.
    fn transfer(&mut self, out: u8) -> Result<u8, Error> {
        self.spi
            .transfer(&mut [out])
            .map(|b| b[0])
            .map_err(|_e| Error::Transport)
    }

    /// Receive a byte from the SD card by clocking in an 0xFF byte.
    pub fn receive(&mut self) -> Result<u8, Error> {
        self.transfer(IDLE_BYTE)
    }

    /// Receive a fixed number of bytes, e.g. the payload of an R3 or R7.
    pub fn receive_array<const N: usize>(&mut self) -> Result<[u8; N], Error> {
        let mut out = [0u8; N];
        for b in out.iter_mut() {
            *b = self.receive()?;
        }
        Ok(out)
    }

    /// Send a byte from the SD card.
    pub fn send(&mut self, out: u8) -> Result<(), Error> {
        let _ = self.transfer(out)?;
        Ok(())
    }

    /// Spin until the card returns 0xFF, or we spin too many times and
    /// timeout.
    pub fn wait_not_busy(&mut self) -> Result<(), Error> {
        for _ in 0..self.policy.busy_polls {
            if self.receive()? == IDLE_BYTE {
                return Ok(());
            }
        }
        Err(Error::TimeoutWaitNotBusy)
    }

    /// Perform a command and return its R1 byte.
    ///
    /// If the card never drives a byte with the top bit clear, the last byte
    /// clocked in (normally 0xFF) is returned and the caller decides what
    /// that means.
    pub fn card_command(&mut self, command: u8, arg: u32) -> Result<u8, Error> {
        self.wait_not_busy()?;
        let crc = match command {
            CMD0 => CMD0_CRC,
            CMD8 => CMD8_CRC,
            _ => CRC_PLACEHOLDER,
        };
        let buf = [
            CMD_TOKEN | command,
            (arg >> 24) as u8,
            (arg >> 16) as u8,
            (arg >> 8) as u8,
            arg as u8,
            crc,
        ];

        for b in buf.iter() {
            self.send(*b)?;
        }

        let mut result = IDLE_BYTE;
        for _ in 0..self.policy.response_polls {
            result = self.receive()?;
            if (result & R1_START_MASK) == 0 {
                trace!("CMD{} arg {:#x} -> {:#x}", command, arg, result);
                return Ok(result);
            }
        }

        trace!("CMD{} arg {:#x} got no response", command, arg);
        Ok(result)
    }

    /// Repeat CMD55 + ACMD41 until the card reports ready.
    pub fn wait_op_cond(&mut self, arg: u32, attempts: u32) -> Result<OpCond, Error> {
        for attempt in 1..=attempts {
            let app_response = self.card_command(CMD55, 0)?;
            self.delay.delay_us(self.policy.app_command_gap_us);
            let response = self.card_command(ACMD41, arg)?;

            if response == R1_READY_STATE {
                debug!("ACMD41 arg {:#x} ready after {} attempts", arg, attempt);
                return Ok(OpCond::Ready);
            }

            if app_response != R1_READY_STATE && app_response != R1_IDLE_STATE {
                warn!("CMD55 failed with {:#x}, giving up on ACMD41", app_response);
                return Ok(OpCond::Aborted(app_response));
            }

            if attempt % 10 == 0 {
                trace!(
                    "attempt {}: CMD55={:#x}, ACMD41={:#x}",
                    attempt,
                    app_response,
                    response
                );
            }

            self.delay.delay_us(self.policy.attempt_delay_us);
        }
        Ok(OpCond::Exhausted)
    }

    /// Read one data block with CMD17 from the given card address.
    pub fn read_single(
        &mut self,
        address: u32,
        buffer: &mut [u8],
        verify_crc: bool,
    ) -> Result<(), Error> {
        let response = self.card_command(CMD17, address)?;
        if response != R1_READY_STATE {
            return Err(ReadFailure::CommandRejected(response).into());
        }
        self.read_data(buffer, verify_crc)
    }

    /// Read an arbitrary number of bytes from the card. Always fills the
    /// given buffer, so make sure it's the right size.
    ///
    /// The two CRC bytes trailing the data are always clocked in, but only
    /// compared when `verify_crc` is set.
    pub fn read_data(&mut self, buffer: &mut [u8], verify_crc: bool) -> Result<(), Error> {
        let mut token = IDLE_BYTE;
        for _ in 0..self.policy.data_token_polls {
            token = self.receive()?;
            if token == DATA_START_BLOCK {
                break;
            }
        }
        if token != DATA_START_BLOCK {
            return Err(ReadFailure::DataTimeout.into());
        }

        for b in buffer.iter_mut() {
            *b = self.receive()?;
        }

        let crc_bytes: [u8; 2] = self.receive_array()?;
        if verify_crc {
            let card = u16::from_be_bytes(crc_bytes);
            let computed = crc16(buffer);
            if card != computed {
                return Err(ReadFailure::CrcMismatch { card, computed }.into());
            }
        }

        Ok(())
    }
}
