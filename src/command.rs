//! Raw EtherCAT commands, e.g. `LRW`, `FPRD`, etc.

const NOP: u8 = 0x00;
const FPRD: u8 = 0x04;
const FPWR: u8 = 0x05;
const LRD: u8 = 0x0A;
const LWR: u8 = 0x0B;
const LRW: u8 = 0x0C;

/// Read commands.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reads {
    /// Configured station address read.
    Fprd {
        /// Configured station address.
        address: u16,
        /// Physical register.
        register: u16,
    },
    /// Logical read.
    Lrd {
        /// Logical address.
        address: u32,
    },
}

/// Write commands.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Writes {
    /// Configured station address write.
    Fpwr {
        /// Configured station address.
        address: u16,
        /// Physical register.
        register: u16,
    },
    /// Logical write.
    Lwr {
        /// Logical address.
        address: u32,
    },
    /// Logical read/write.
    Lrw {
        /// Logical address.
        address: u32,
    },
}

/// PDU command.
///
/// The variants used by this crate are the station-addressed register
/// accesses (`FPRD`/`FPWR`) emitted by the per-slave request state machine,
/// and the logical commands (`LRD`/`LWR`/`LRW`) carrying domain process
/// data.
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// No operation.
    #[default]
    Nop,

    /// Read commands.
    Read(Reads),

    /// Write commands.
    Write(Writes),
}

impl Command {
    /// Configured station address read (FPRD).
    pub fn fprd(address: u16, register: u16) -> Self {
        Self::Read(Reads::Fprd { address, register })
    }

    /// Configured station address write (FPWR).
    pub fn fpwr(address: u16, register: u16) -> Self {
        Self::Write(Writes::Fpwr { address, register })
    }

    /// Logical read (LRD), carrying input process data.
    pub fn lrd(address: u32) -> Self {
        Self::Read(Reads::Lrd { address })
    }

    /// Logical write (LWR), carrying output process data.
    pub fn lwr(address: u32) -> Self {
        Self::Write(Writes::Lwr { address })
    }

    /// Logical read/write (LRW), carrying process data in both directions.
    pub fn lrw(address: u32) -> Self {
        Self::Write(Writes::Lrw { address })
    }

    /// Get just the command code for a command.
    pub(crate) const fn code(&self) -> u8 {
        match self {
            Self::Nop => NOP,

            Self::Read(read) => match read {
                Reads::Fprd { .. } => FPRD,
                Reads::Lrd { .. } => LRD,
            },

            Self::Write(write) => match write {
                Writes::Fpwr { .. } => FPWR,
                Writes::Lwr { .. } => LWR,
                Writes::Lrw { .. } => LRW,
            },
        }
    }

    /// The 4 raw address bytes following the command code on the wire.
    ///
    /// Station-addressed commands pack two little-endian `u16`s (station,
    /// register); logical commands pack one little-endian `u32`.
    pub(crate) fn address_raw(&self) -> [u8; 4] {
        match *self {
            Command::Nop => [0u8; 4],

            Command::Read(Reads::Fprd { address, register })
            | Command::Write(Writes::Fpwr { address, register }) => {
                let [a0, a1] = address.to_le_bytes();
                let [r0, r1] = register.to_le_bytes();

                [a0, a1, r0, r1]
            }

            Command::Read(Reads::Lrd { address })
            | Command::Write(Writes::Lwr { address })
            | Command::Write(Writes::Lrw { address }) => address.to_le_bytes(),
        }
    }

    /// The logical address of an `LRD`/`LWR`/`LRW` command.
    pub(crate) fn logical_address(&self) -> Option<u32> {
        match *self {
            Command::Read(Reads::Lrd { address })
            | Command::Write(Writes::Lwr { address })
            | Command::Write(Writes::Lrw { address }) => Some(address),
            _ => None,
        }
    }
}

impl core::fmt::Display for Command {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Command::Nop => write!(f, "NOP"),

            Command::Read(read) => match read {
                Reads::Fprd { address, register } => {
                    write!(f, "FPRD(addr {:#06x}, reg {:#06x})", address, register)
                }
                Reads::Lrd { address } => write!(f, "LRD(addr {:#010x})", address),
            },

            Command::Write(write) => match write {
                Writes::Fpwr { address, register } => {
                    write!(f, "FPWR(addr {:#06x}, reg {:#06x})", address, register)
                }
                Writes::Lwr { address } => write!(f, "LWR(addr {:#010x})", address),
                Writes::Lrw { address } => write!(f, "LRW(addr {:#010x})", address),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_codes() {
        assert_eq!(Command::Nop.code(), 0x00);
        assert_eq!(Command::fprd(0x1001, 0x0130).code(), 0x04);
        assert_eq!(Command::fpwr(0x1001, 0x0120).code(), 0x05);
        assert_eq!(Command::lrd(0).code(), 0x0a);
        assert_eq!(Command::lwr(0).code(), 0x0b);
        assert_eq!(Command::lrw(0).code(), 0x0c);
    }

    #[test]
    fn station_address_raw() {
        let command = Command::fprd(0x1001, 0x0130);

        assert_eq!(command.address_raw(), [0x01, 0x10, 0x30, 0x01]);
    }

    #[test]
    fn logical_address_raw() {
        let command = Command::lrw(0x0001_0080);

        assert_eq!(command.address_raw(), [0x80, 0x00, 0x01, 0x00]);
        assert_eq!(command.logical_address(), Some(0x0001_0080));
    }
}
