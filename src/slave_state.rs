use crate::fmt;
use num_enum::TryFromPrimitive;
use packed_struct::prelude::*;

/// AL (application layer) state for a single slave device.
///
/// Read from register `0x0130`. Defined in ETG1000.6 6.4.1, ETG1000.6
/// Table 9.
#[derive(
    Debug,
    Default,
    Copy,
    Clone,
    PartialEq,
    Eq,
    num_enum::TryFromPrimitive,
    num_enum::IntoPrimitive,
)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum AlState {
    /// No state recorded/read/known.
    #[default]
    None = 0x00,
    /// EtherCAT `INIT` state.
    Init = 0x01,
    /// EtherCAT `PRE-OP` state.
    PreOp = 0x02,
    /// EtherCAT `BOOT` state.
    Bootstrap = 0x03,
    /// EtherCAT `SAFE-OP` state.
    SafeOp = 0x04,
    /// EtherCAT `OP` state.
    Op = 0x08,
    /// State is unknown.
    Unknown = 0xff,
}

impl core::fmt::Display for AlState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            AlState::None => "None",
            AlState::Init => "Init",
            AlState::PreOp => "Pre-Operational",
            AlState::Bootstrap => "Bootstrap",
            AlState::SafeOp => "Safe-Operational",
            AlState::Op => "Operational",
            AlState::Unknown => "Unknown",
        };

        f.write_str(s)
    }
}

/// The AL status byte of one slave: state in the low nibble, error
/// acknowledge flag in bit 4.
///
/// The error acknowledge flag latches when a state transition was refused
/// and stays set until the master acknowledges it; while set, the slave
/// refuses mailbox and register traffic, so the request state machine aborts
/// anything dispatched at it.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SlaveStatus {
    /// Current application layer state.
    pub state: AlState,
    /// Error acknowledge flag.
    pub error_ack: bool,
}

impl PackedStruct for SlaveStatus {
    type ByteArray = [u8; 1];

    fn pack(&self) -> packed_struct::PackingResult<Self::ByteArray> {
        let byte = (u8::from(self.state) & 0x0f) | ((self.error_ack as u8) << 4);

        Ok([byte])
    }

    fn unpack(src: &Self::ByteArray) -> packed_struct::PackingResult<Self> {
        let byte = src[0];

        fmt::trace!("AL status raw byte {:#010b}", byte);

        let state = AlState::try_from_primitive(byte & 0x0f).unwrap_or(AlState::Unknown);
        let error_ack = (byte & (1 << 4)) > 0;

        Ok(Self { state, error_ack })
    }
}

impl SlaveStatus {
    /// Status with the given AL state and no error flag.
    pub fn new(state: AlState) -> Self {
        Self {
            state,
            error_ack: false,
        }
    }

    /// Whether the slave is reachable for acyclic mailbox traffic.
    ///
    /// A slave in `INIT` has no mailbox sync managers configured yet, so SDO
    /// and SoE requests dispatched at it are aborted.
    pub fn mailbox_capable(&self) -> bool {
        self.state != AlState::Init
    }
}

impl core::fmt::Display for SlaveStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.error_ack {
            write!(f, "{} (error flag set)", self.state)
        } else {
            self.state.fmt(f)
        }
    }
}
