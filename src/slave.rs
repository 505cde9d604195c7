//! A detected slave device: bus identity, AL status and the per-class
//! queues of pending acyclic requests.

use crate::{
    datagram::DeviceIndex,
    fmt,
    fsm_slave::SlaveFsm,
    request::{FoeRequest, RegRequest, SdoRequest, SoeRequest},
    slave_config::SlaveConfig,
    slave_state::SlaveStatus,
    transfer::Transfers,
};
use std::{
    collections::VecDeque,
    sync::{Arc, Weak},
};

/// Identity and bus position of one slave.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SlaveIdentity {
    /// Configured station address.
    pub station_address: u16,
    /// The link the slave is reached through.
    pub device_index: DeviceIndex,
    /// Vendor ID from the SII.
    pub vendor_id: u32,
    /// Product code from the SII.
    pub product_code: u32,
}

/// One slave on the ring.
///
/// External producers enqueue requests through the master; the embedded
/// request state machine services them one at a time, one datagram per
/// cycle.
#[derive(Debug)]
pub struct Slave {
    pub(crate) identity: SlaveIdentity,
    pub(crate) current_status: SlaveStatus,
    pub(crate) config: Weak<SlaveConfig>,
    pub(crate) sdo_requests: VecDeque<Arc<SdoRequest>>,
    pub(crate) reg_requests: VecDeque<Arc<RegRequest>>,
    pub(crate) foe_requests: VecDeque<Arc<FoeRequest>>,
    pub(crate) soe_requests: VecDeque<Arc<SoeRequest>>,
    pub(crate) fsm: SlaveFsm,
}

impl Slave {
    /// A new slave with the given identity, serviced by the given mailbox
    /// transfer engines.
    pub fn new(identity: SlaveIdentity, transfers: Transfers) -> Self {
        fmt::debug!("Slave {:#06x}: init FSM", identity.station_address);

        Self {
            identity,
            current_status: SlaveStatus::default(),
            config: Weak::new(),
            sdo_requests: VecDeque::new(),
            reg_requests: VecDeque::new(),
            foe_requests: VecDeque::new(),
            soe_requests: VecDeque::new(),
            fsm: SlaveFsm::new(transfers),
        }
    }

    /// The slave's identity.
    pub fn identity(&self) -> SlaveIdentity {
        self.identity
    }

    /// Configured station address.
    pub fn station_address(&self) -> u16 {
        self.identity.station_address
    }

    /// Last known AL status.
    pub fn status(&self) -> SlaveStatus {
        self.current_status
    }

    /// Record the AL status read back from the slave.
    pub fn set_status(&mut self, status: SlaveStatus) {
        if status != self.current_status {
            fmt::debug!(
                "Slave {:#06x}: AL status now {}",
                self.identity.station_address,
                status
            );
        }

        self.current_status = status;
    }

    /// The attached configuration, while it is still alive.
    pub fn config(&self) -> Option<Arc<SlaveConfig>> {
        self.config.upgrade()
    }

    /// Attach an application configuration to this slave.
    ///
    /// The slave only holds a weak reference; dropping the configuration on
    /// the master side detaches it implicitly.
    pub fn attach_config(&mut self, config: &Arc<SlaveConfig>) {
        self.config = Arc::downgrade(config);
    }

    /// Mark the slave ready for acyclic requests. Only meaningful while the
    /// request state machine is idle.
    pub fn ready(&mut self) {
        self.fsm.ready(self.identity.station_address);
    }
}
