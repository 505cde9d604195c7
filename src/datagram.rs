//! A single EtherCAT datagram: command, payload and round-trip state.

use crate::command::Command;
use packed_struct::prelude::*;

/// Number of physical links the master drives: the main device and the
/// redundant backup device.
pub const NUM_DEVICES: usize = 2;

/// Which physical link a datagram travels on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DeviceIndex {
    /// The main link.
    #[default]
    Main = 0,
    /// The backup link, used for cable redundancy.
    Backup = 1,
}

impl DeviceIndex {
    /// All devices, in queue order.
    pub const ALL: [DeviceIndex; NUM_DEVICES] = [DeviceIndex::Main, DeviceIndex::Backup];

    /// Array index for per-device storage.
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Maximum payload of a single datagram: the Ethernet data length less the
/// EtherCAT frame header, the datagram header and the working counter.
pub const MAX_DATA_SIZE: usize = 1500 - 2 - DatagramHeader::LEN - 2;

const LEN_MASK: u16 = 0b0000_0111_1111_1111;

/// Round-trip state of a datagram.
///
/// The core only ever initialises a datagram and marks it queued; `Sent`,
/// `Received` and `TimedOut` are driven by the frame driver.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DatagramState {
    /// Initialised, not yet handed to the driver.
    #[default]
    Init,
    /// Queued for transmission.
    Queued,
    /// On the wire, reply outstanding.
    Sent,
    /// Reply received.
    Received,
    /// The driver gave up waiting for a reply.
    TimedOut,
}

impl core::fmt::Display for DatagramState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            DatagramState::Init => "unsent",
            DatagramState::Queued => "queued",
            DatagramState::Sent => "sent, reply outstanding",
            DatagramState::Received => "received",
            DatagramState::TimedOut => "timed out",
        };

        f.write_str(s)
    }
}

/// The 10 byte datagram header: command code, frame index, raw address,
/// length flags and IRQ. Defined in ETG1000.4 Table 13.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DatagramHeader {
    /// Raw command code.
    pub command_code: u8,
    /// EtherCAT frame index.
    pub index: u8,
    /// Raw command address: 2x `u16` or 1x `u32` depending on the command.
    pub address: [u8; 4],
    /// Payload length in bytes, 11 bits.
    pub length: u16,
    /// Frame has circulated once.
    pub circulated: bool,
    /// Another datagram follows in the same frame.
    pub more_follows: bool,
    /// IRQ field.
    pub irq: u16,
}

impl DatagramHeader {
    /// Packed header length in bytes.
    pub const LEN: usize = 10;
}

impl PackedStruct for DatagramHeader {
    type ByteArray = [u8; 10];

    fn pack(&self) -> packed_struct::PackingResult<Self::ByteArray> {
        let mut buf = [0u8; 10];

        buf[0] = self.command_code;
        buf[1] = self.index;
        buf[2..6].copy_from_slice(&self.address);

        let flags = (self.length & LEN_MASK)
            | ((self.circulated as u16) << 14)
            | ((self.more_follows as u16) << 15);

        buf[6..8].copy_from_slice(&flags.to_le_bytes());
        buf[8..10].copy_from_slice(&self.irq.to_le_bytes());

        Ok(buf)
    }

    fn unpack(src: &Self::ByteArray) -> packed_struct::PackingResult<Self> {
        let flags = u16::from_le_bytes([src[6], src[7]]);

        Ok(Self {
            command_code: src[0],
            index: src[1],
            address: [src[2], src[3], src[4], src[5]],
            length: flags & LEN_MASK,
            circulated: (flags >> 14) & 0x01 == 0x01,
            more_follows: (flags >> 15) & 0x01 == 0x01,
            irq: u16::from_le_bytes([src[8], src[9]]),
        })
    }
}

/// A single network request/reply unit.
///
/// A datagram is owned either by a slave's request state machine (one per
/// slave, reused for every acyclic request) or by a domain's datagram pair
/// (one per link). The payload buffer is reconfigured in place as commands
/// change.
#[derive(Debug, Default, Clone)]
pub struct Datagram {
    command: Command,
    data: Vec<u8>,
    state: DatagramState,
    working_counter: u16,
    device_index: DeviceIndex,
}

impl Datagram {
    /// An empty `NOP` datagram.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure as a configured-station-address read (FPRD).
    ///
    /// The payload is zeroed so a lost reply cannot leak a previous
    /// request's bytes.
    pub fn fprd(&mut self, address: u16, register: u16, size: usize) {
        debug_assert!(size <= MAX_DATA_SIZE);

        self.command = Command::fprd(address, register);
        self.data.clear();
        self.data.resize(size, 0);
        self.reset_round_trip();
    }

    /// Configure as a configured-station-address write (FPWR), with a
    /// zeroed payload. The caller fills it through [`Datagram::data_mut`].
    pub fn fpwr(&mut self, address: u16, register: u16, size: usize) {
        debug_assert!(size <= MAX_DATA_SIZE);

        self.command = Command::fpwr(address, register);
        self.data.clear();
        self.data.resize(size, 0);
        self.reset_round_trip();
    }

    /// Configure as a logical command with the given payload size.
    pub fn logical(&mut self, command: Command, size: usize) {
        debug_assert!(command.logical_address().is_some());
        debug_assert!(size <= MAX_DATA_SIZE);

        self.command = command;
        self.data.clear();
        self.data.resize(size, 0);
        self.reset_round_trip();
    }

    fn reset_round_trip(&mut self) {
        self.state = DatagramState::Init;
        self.working_counter = 0;
    }

    /// The configured command.
    pub fn command(&self) -> Command {
        self.command
    }

    /// Current round-trip state.
    pub fn state(&self) -> DatagramState {
        self.state
    }

    /// Working counter of the last received reply.
    pub fn working_counter(&self) -> u16 {
        self.working_counter
    }

    /// The link this datagram is queued on.
    pub fn device_index(&self) -> DeviceIndex {
        self.device_index
    }

    /// Assign the link this datagram is queued on.
    pub fn set_device_index(&mut self, device_index: DeviceIndex) {
        self.device_index = device_index;
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Payload view.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable payload view.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub(crate) fn set_queued(&mut self) {
        self.state = DatagramState::Queued;
    }

    pub(crate) fn set_sent(&mut self) {
        self.state = DatagramState::Sent;
    }

    /// Record a reply delivered by the driver.
    ///
    /// Short replies only overwrite their own prefix of the payload; the
    /// datagram length on the wire is authoritative.
    pub(crate) fn set_received(&mut self, payload: &[u8], working_counter: u16) {
        let len = payload.len().min(self.data.len());

        self.data[..len].copy_from_slice(&payload[..len]);
        self.working_counter = working_counter;
        self.state = DatagramState::Received;
    }

    pub(crate) fn set_timed_out(&mut self) {
        self.state = DatagramState::TimedOut;
    }

    /// Serialise header, payload and working counter placeholder for
    /// transmission, appending to `out`.
    pub fn write_wire(&self, index: u8, out: &mut Vec<u8>) {
        let header = DatagramHeader {
            command_code: self.command.code(),
            index,
            address: self.command.address_raw(),
            length: self.data.len() as u16,
            circulated: false,
            more_follows: false,
            irq: 0,
        };

        // Packing a fully in-range header cannot fail.
        out.extend_from_slice(&header.pack().unwrap_or([0u8; 10]));
        out.extend_from_slice(&self.data);
        out.extend_from_slice(&0u16.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_pack() {
        let header = DatagramHeader {
            command_code: 0x04,
            index: 0x12,
            address: [0x00, 0x10, 0x00, 0x09],
            length: 16,
            circulated: false,
            more_follows: false,
            irq: 0,
        };

        assert_eq!(
            header.pack().unwrap(),
            [0x04, 0x12, 0x00, 0x10, 0x00, 0x09, 0x10, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn header_round_trip() {
        let header = DatagramHeader {
            command_code: 0x0c,
            index: 0x01,
            address: [0x00, 0x00, 0x01, 0x00],
            length: 0x110,
            circulated: false,
            more_follows: true,
            irq: 0,
        };

        let packed = header.pack().unwrap();

        assert_eq!(packed[6..8], [0x10, 0x81]);
        assert_eq!(DatagramHeader::unpack(&packed).unwrap(), header);
    }

    #[test]
    fn fprd_zeroes_payload() {
        let mut datagram = Datagram::new();

        datagram.fpwr(0x1001, 0x0130, 2);
        datagram.data_mut().copy_from_slice(&[0xaa, 0xbb]);

        datagram.fprd(0x1001, 0x0130, 2);

        assert_eq!(datagram.data(), &[0x00, 0x00]);
        assert_eq!(datagram.state(), DatagramState::Init);
    }

    #[test]
    fn receive_updates_state_and_wc() {
        let mut datagram = Datagram::new();

        datagram.fprd(0x1001, 0x0130, 2);
        datagram.set_queued();
        datagram.set_sent();
        datagram.set_received(&[0x08, 0x00], 1);

        assert_eq!(datagram.state(), DatagramState::Received);
        assert_eq!(datagram.working_counter(), 1);
        assert_eq!(datagram.data(), &[0x08, 0x00]);
    }

    #[test]
    fn wire_serialisation() {
        let mut datagram = Datagram::new();

        datagram.fpwr(0x1001, 0x0120, 2);
        datagram.data_mut().copy_from_slice(&[0x04, 0x00]);

        let mut out = Vec::new();

        datagram.write_wire(0x07, &mut out);

        assert_eq!(
            out,
            vec![
                // Header
                0x05, 0x07, 0x01, 0x10, 0x20, 0x01, 0x02, 0x00, 0x00, 0x00,
                // Payload
                0x04, 0x00,
                // Working counter placeholder
                0x00, 0x00
            ]
        );
    }

    #[test]
    fn max_data_size() {
        assert_eq!(MAX_DATA_SIZE, 1486);
    }
}
