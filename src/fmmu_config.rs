//! FMMU (fieldbus memory management unit) configuration: the mapping of one
//! slave-local physical byte range into the master's global logical address
//! space.

use crate::request::Direction;
use core::fmt;
use packed_struct::prelude::*;

/// One FMMU mapping owned by a domain.
///
/// Until [`Domain::finish`](crate::Domain::finish) runs, the logical start
/// address is relative to the owning domain; `finish` rebases it onto the
/// domain's logical base address.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FmmuConfig {
    /// Identifier of the slave configuration this mapping belongs to.
    pub slave_config: usize,

    /// Mapping direction: `Input` carries slave process data to the master,
    /// `Output` carries master process data to the slave.
    pub dir: Direction,

    /// Slave-local physical start address.
    pub physical_start: u16,

    /// Mapped size in bytes.
    pub data_size: usize,

    /// Start address in the logical address space.
    pub logical_start_address: u32,
}

impl FmmuConfig {
    /// A new mapping. The logical start address is assigned when the config
    /// is added to a domain.
    pub fn new(slave_config: usize, dir: Direction, physical_start: u16, data_size: usize) -> Self {
        Self {
            slave_config,
            dir,
            physical_start,
            data_size,
            logical_start_address: 0,
        }
    }

    /// Logical byte range covered by this mapping. Absolute once the owning
    /// domain is finished.
    pub fn logical_range(&self) -> core::ops::Range<u32> {
        self.logical_start_address..self.logical_start_address + self.data_size as u32
    }

    /// The register entity the slave configuration layer writes to the
    /// slave's FMMU bank for this mapping.
    pub fn register_image(&self) -> FmmuRegister {
        FmmuRegister {
            logical_start_address: self.logical_start_address,
            length_bytes: self.data_size as u16,
            logical_start_bit: 0,
            logical_end_bit: 7,
            physical_start_address: self.physical_start,
            physical_start_bit: 0,
            read_enable: self.dir == Direction::Input,
            write_enable: self.dir == Direction::Output,
            enable: true,
        }
    }
}

/// ETG1000.4 Table 56 – Fieldbus memory management unit (FMMU) entity.
#[derive(Default, Copy, Clone, PackedStruct, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "16")]
pub struct FmmuRegister {
    /// Start address in octets in the logical memory area of the memory
    /// translation.
    #[packed_field(bytes = "0..=3")]
    pub logical_start_address: u32,

    /// Mapped length in octets.
    #[packed_field(bytes = "4..=5")]
    pub length_bytes: u16,

    #[packed_field(bytes = "6", size_bits = "3")]
    pub logical_start_bit: u8,

    #[packed_field(bytes = "7", size_bits = "3")]
    pub logical_end_bit: u8,

    /// Slave-local physical start address.
    #[packed_field(bytes = "8..=9")]
    pub physical_start_address: u16,

    #[packed_field(bytes = "10", size_bits = "3")]
    pub physical_start_bit: u8,

    // 11th byte, last bit
    #[packed_field(bits = "95")]
    pub read_enable: bool,

    // 11th byte, penultimate bit
    #[packed_field(bits = "94")]
    pub write_enable: bool,

    // 12th byte, last bit
    #[packed_field(bits = "103")]
    pub enable: bool,
    // Trailing reserved bytes are encoded in the `size_bytes` attribute.
}

impl fmt::Debug for FmmuRegister {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FmmuRegister")
            .field(
                "logical_start_address",
                &format_args!("{:#010x}", self.logical_start_address),
            )
            .field("length_bytes", &self.length_bytes)
            .field(
                "physical_start_address",
                &format_args!("{:#06x}", self.physical_start_address),
            )
            .field("read_enable", &self.read_enable)
            .field("write_enable", &self.write_enable)
            .field("enable", &self.enable)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_image_for_input() {
        let config = FmmuConfig::new(0, Direction::Input, 0x1400, 4);

        let image = config.register_image();

        assert!(image.read_enable);
        assert!(!image.write_enable);
        assert!(image.enable);
        assert_eq!(image.length_bytes, 4);
    }

    #[test]
    fn register_pack() {
        let image = FmmuRegister {
            logical_start_address: 0x0001_0000,
            length_bytes: 1,
            logical_start_bit: 0,
            logical_end_bit: 7,
            physical_start_address: 0x1000,
            physical_start_bit: 0,
            read_enable: true,
            write_enable: false,
            enable: true,
        };

        let raw = image.pack().unwrap();

        assert_eq!(
            raw,
            [
                // Logical start address
                0x00, 0x00, 0x01, 0x00, //
                // Length
                0x01, 0x00, //
                // Logical start bit
                0x00, //
                // Logical end bit
                0x07, //
                // Physical start address
                0x00, 0x10, //
                // Physical start bit
                0x00, //
                // Read/write enable
                0x01, //
                // FMMU enable
                0x01, //
                // Padding
                0x00, 0x00, 0x00,
            ]
        );
    }

    #[test]
    fn logical_range() {
        let mut config = FmmuConfig::new(3, Direction::Output, 0x1100, 8);

        config.logical_start_address = 0x100;

        assert_eq!(config.logical_range(), 0x100..0x108);
    }
}
