//! An EtherCAT master core: cyclic process data exchange with cable
//! redundancy, and per-slave servicing of acyclic SDO, register, FoE and
//! SoE requests.
//!
//! This crate contains the cycle-driven heart of a master. It deliberately
//! stops at two seams:
//!
//! - **Towards the network**: [`Master::drain_tx`] hands serialised
//!   datagrams to a frame driver, which later delivers replies through
//!   [`Master::receive`] (or gives up with [`Master::timeout`]). Raw
//!   Ethernet I/O lives outside this crate.
//! - **Towards the mailbox protocols**: the CoE/FoE/SoE exchanges are
//!   driven through the [`Transfer`](transfer::Transfer) capability; their
//!   wire formats live outside this crate.
//!
//! # Cyclic operation
//!
//! Once per cycle, in this order:
//!
//! 1. [`Master::tick`] advances every slave's request state machine; each
//!    machine emits at most one datagram per cycle.
//! 2. [`Master::domain_queue`] exports each domain's outputs and queues its
//!    datagram pairs on the main and backup links.
//! 3. The driver sends ([`Master::drain_tx`]) and receives
//!    ([`Master::receive`]).
//! 4. Next cycle, [`Master::domain_process`] imports inputs with byte-range
//!    redundancy fallback, and the request state machines consume their
//!    replies.
//!
//! Nothing in the core blocks and nothing is timer driven; a request is
//! only ever advanced by ticks. Submitting contexts block on the request's
//! completion handle (e.g. [`SdoRequest::wait`]) until the core drives it
//! to a terminal state.

mod fmt;

pub mod command;
pub mod datagram;
pub mod datagram_pair;
pub mod domain;
pub mod error;
pub mod fmmu_config;
mod fsm_slave;
pub mod master;
pub mod request;
pub mod slave;
pub mod slave_config;
pub mod slave_state;
pub mod transfer;

pub use command::Command;
pub use datagram::{Datagram, DatagramState, DeviceIndex, MAX_DATA_SIZE, NUM_DEVICES};
pub use datagram_pair::DatagramPair;
pub use domain::{Domain, DomainState, WcState};
pub use error::Error;
pub use fmmu_config::FmmuConfig;
pub use fsm_slave::FsmState;
pub use master::{DatagramHandle, Master, PdoEntryRegistration, TxDatagram};
pub use request::{
    Direction, FoeRequest, RegRequest, RequestState, SdoRequest, SoeRequest,
};
pub use slave::{Slave, SlaveIdentity};
pub use slave_config::{PdoEntryDesc, SlaveConfig};
pub use slave_state::{AlState, SlaveStatus};
pub use transfer::{Transfer, Transfers};
