//! sdmmc-inspect - Constants from the SD Specifications
//!
//! Based on SdFat, under the following terms:
//!
//! > Copyright (c) 2011-2018 Bill Greiman
//! > This file is part of the SdFat library for SD memory cards.
//! >
//! > MIT License
//! >
//! > Permission is hereby granted, free of charge, to any person obtaining a
//! > copy of this software and associated documentation files (the "Software"),
//! > to deal in the Software without restriction, including without limitation
//! > the rights to use, copy, modify, merge, publish, distribute, sublicense,
//! > and/or sell copies of the Software, and to permit persons to whom the
//! > Software is furnished to do so, subject to the following conditions:
//! >
//! > The above copyright notice and this permission notice shall be included
//! > in all copies or substantial portions of the Software.
//! >
//! > THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
//! > OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
//! > FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
//! > AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
//! > LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
//! > FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
//! > DEALINGS IN THE SOFTWARE.

//==============================================================================

// SD Card Commands

/// GO_IDLE_STATE - init card in spi mode if CS low
pub const CMD0: u8 = 0x00;
/// SEND_IF_COND - verify SD Memory Card interface operating condition.*/
pub const CMD8: u8 = 0x08;
/// READ_SINGLE_BLOCK - read a single data block from the card
pub const CMD17: u8 = 0x11;
/// APP_CMD - escape for application specific command
pub const CMD55: u8 = 0x37;
/// READ_OCR - read the OCR register of a card
pub const CMD58: u8 = 0x3A;
/// SD_SEND_OP_COMD - Sends host capacity support information and activates
/// the card's initialization process
pub const ACMD41: u8 = 0x29;

/// Start bit and transmission bit of every command token.
pub const CMD_TOKEN: u8 = 0x40;

/// Valid CRC for CMD0 with a zero argument.
pub const CMD0_CRC: u8 = 0x95;
/// Valid CRC for CMD8 with the argument [`CMD8_ARG`].
pub const CMD8_CRC: u8 = 0x87;
/// Placeholder CRC for every other command. The card ignores it while CRC
/// checking is off, which is the power-on default in SPI mode.
pub const CRC_PLACEHOLDER: u8 = 0x01;

/// CMD8 argument: 2.7-3.6V supply plus the 0xAA check pattern.
pub const CMD8_ARG: u32 = 0x1AA;
/// Bits of the R7 echo which must match [`CMD8_ARG`].
pub const CMD8_ECHO_MASK: u32 = 0xFFF;

/// ACMD41 argument bit announcing host support for high capacity cards.
pub const ACMD41_HCS: u32 = 0x4000_0000;

//==============================================================================

/// status for card in the ready state
pub const R1_READY_STATE: u8 = 0x00;

/// status for card in the idle state
pub const R1_IDLE_STATE: u8 = 0x01;

/// status bit for illegal command
pub const R1_ILLEGAL_COMMAND: u8 = 0x04;

/// R1 responses always have the top bit clear
pub const R1_START_MASK: u8 = 0x80;

/// start data token for read or write single block*/
pub const DATA_START_BLOCK: u8 = 0xFE;

/// What the card drives on MISO when it has nothing to say.
pub const IDLE_BYTE: u8 = 0xFF;

//==============================================================================

/// The R7 payload returned after CMD8.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct R7 {
    /// The four bytes following the R1 byte, in the order received.
    pub data: [u8; 4],
}

impl R7 {
    fn data(&self) -> &[u8] {
        &self.data
    }

    define_field!(voltage_accepted, u8, 2, 0, 4);
    define_field!(check_pattern, u8, 3);

    /// The payload as one big-endian word.
    pub fn echo(&self) -> u32 {
        u32::from_be_bytes(self.data)
    }

    /// Did the card echo back our voltage range and check pattern?
    pub fn matches_request(&self) -> bool {
        self.echo() & CMD8_ECHO_MASK == CMD8_ARG
    }
}

/// The Operating Conditions Register, as returned by CMD58.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Ocr {
    /// The four bytes of the register, most significant first.
    pub data: [u8; 4],
}

impl Ocr {
    fn data(&self) -> &[u8] {
        &self.data
    }

    define_field!(power_up_complete, bool, 0, 7);
    // Bit 30: set for SDHC/SDXC, which use block addressing.
    define_field!(card_capacity_status, bool, 0, 6);
}

/// Perform the X25 CRC calculation, as used for data blocks.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = 0u16;
    for &byte in data {
        crc = ((crc >> 8) & 0xFF) | (crc << 8);
        crc ^= u16::from(byte);
        crc ^= (crc & 0xFF) >> 4;
        crc ^= crc << 12;
        crc ^= (crc & 0xFF) << 5;
    }
    crc
}

#[cfg(test)]
mod test {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_crc16() {
        // An actual CSD read from an SD card
        const DATA: [u8; 16] = hex!("00 26 00 32 5F 5A 83 AE FE FB CF FF 92 80 40 DF");
        assert_eq!(crc16(&DATA), 0x9fc5);
    }

    #[test]
    fn r7_echo() {
        let r7 = R7 {
            data: hex!("00 00 01 AA"),
        };
        assert_eq!(r7.voltage_accepted(), 1);
        assert_eq!(r7.check_pattern(), 0xAA);
        assert!(r7.matches_request());

        // Reserved high bits are not compared.
        let r7 = R7 {
            data: hex!("20 00 01 AA"),
        };
        assert!(r7.matches_request());

        let r7 = R7 {
            data: hex!("00 00 02 AA"),
        };
        assert!(!r7.matches_request());
    }

    #[test]
    fn ocr_capacity_bit() {
        let sdhc = Ocr {
            data: hex!("C0 FF 80 00"),
        };
        assert!(sdhc.power_up_complete());
        assert!(sdhc.card_capacity_status());

        let sdsc = Ocr {
            data: hex!("80 FF 80 00"),
        };
        assert!(sdsc.power_up_complete());
        assert!(!sdsc.card_capacity_status());
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
