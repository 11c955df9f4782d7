//! sdmmc-inspect - Useful macros for parsing SD/MMC and on-disk structures.
//!
//! Every structure using these macros must provide a `data(&self) -> &[u8]`
//! method. Multi-byte fields are little-endian, as found on disk.

macro_rules! access_field {
    ($self:expr, $offset:expr, $start_bit:expr, 1) => {
        ($self.data()[$offset] & (1 << $start_bit)) != 0
    };
    ($self:expr, $offset:expr, $start:expr, $num_bits:expr) => {
        ($self.data()[$offset] >> $start) & (((1u16 << $num_bits) - 1) as u8)
    };
}

macro_rules! define_field {
    ($name:ident, bool, $offset:expr, $bit:expr) => {
        doc_comment::doc_comment! {
            concat!("Get the value of the ", stringify!($name), " flag"),
            pub fn $name(&self) -> bool {
                access_field!(self, $offset, $bit, 1)
            }
        }
    };

    ($name:ident, u8, $offset:expr, $start_bit:expr, $num_bits:expr) => {
        doc_comment::doc_comment! {
            concat!("Get the value of the ", stringify!($name), " bit field"),
            pub fn $name(&self) -> u8 {
                access_field!(self, $offset, $start_bit, $num_bits)
            }
        }
    };

    ($name:ident, u8, $offset:expr) => {
        doc_comment::doc_comment! {
            concat!("Get the value of the ", stringify!($name), " field"),
            pub fn $name(&self) -> u8 {
                self.data()[$offset]
            }
        }
    };

    ($name:ident, u16, $offset:expr) => {
        doc_comment::doc_comment! {
            concat!("Get the value of the ", stringify!($name), " field"),
            pub fn $name(&self) -> u16 {
                let d = self.data();
                u16::from_le_bytes([d[$offset], d[$offset + 1]])
            }
        }
    };

    ($name:ident, u32, $offset:expr) => {
        doc_comment::doc_comment! {
            concat!("Get the value of the ", stringify!($name), " field"),
            pub fn $name(&self) -> u32 {
                let d = self.data();
                u32::from_le_bytes([d[$offset], d[$offset + 1], d[$offset + 2], d[$offset + 3]])
            }
        }
    };

    ($name:ident, u64, $offset:expr) => {
        doc_comment::doc_comment! {
            concat!("Get the value of the ", stringify!($name), " field"),
            pub fn $name(&self) -> u64 {
                let d = self.data();
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&d[$offset..$offset + 8]);
                u64::from_le_bytes(bytes)
            }
        }
    };
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
