//! The master: owner of slaves, slave configurations and domains, and the
//! seam towards the frame driver.
//!
//! The master itself holds no locks; `&mut self` serialises all access. A
//! multi-threaded application wraps the master in its own `Arc<Mutex<_>>`
//! and blocks on the per-request completion handles outside that lock.

use crate::{
    datagram::{Datagram, DatagramState, DeviceIndex, NUM_DEVICES},
    domain::Domain,
    error::Error,
    fmt,
    request::{FoeRequest, RegRequest, SdoRequest, SoeRequest},
    slave::{Slave, SlaveIdentity},
    slave_config::SlaveConfig,
    transfer::Transfers,
};
use std::{collections::VecDeque, sync::Arc};

/// Stable reference to a datagram owned by the master: either a slave's
/// request state machine datagram or one link's datagram of a domain pair.
///
/// The driver carries handles between [`Master::drain_tx`] and
/// [`Master::receive`]/[`Master::timeout`] instead of holding pointers into
/// master-owned storage.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DatagramHandle {
    /// The shared acyclic datagram of one slave.
    Slave {
        /// Slave index.
        slave: usize,
    },
    /// One link's datagram of a domain's datagram pair.
    Domain {
        /// Domain index.
        domain: usize,
        /// Pair position within the domain.
        pair: usize,
        /// Which link's copy.
        device: DeviceIndex,
    },
}

/// Per-link transmit queues of datagram handles, in queue order.
#[derive(Debug, Default)]
pub(crate) struct TxQueues {
    queues: [VecDeque<DatagramHandle>; NUM_DEVICES],
}

impl TxQueues {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Mark the datagram queued and enqueue its handle on the link the
    /// datagram is assigned to.
    pub(crate) fn queue(&mut self, handle: DatagramHandle, datagram: &mut Datagram) {
        datagram.set_queued();
        self.queues[datagram.device_index().index()].push_back(handle);
    }

    pub(crate) fn drain(&mut self, device: DeviceIndex) -> Vec<DatagramHandle> {
        self.queues[device.index()].drain(..).collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self, device: DeviceIndex) -> usize {
        self.queues[device.index()].len()
    }
}

/// A serialised datagram ready for transmission, as handed to the frame
/// driver by [`Master::drain_tx`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxDatagram {
    /// Handle to pass back with the reply.
    pub handle: DatagramHandle,
    /// Wire bytes: datagram header, payload and working counter
    /// placeholder.
    pub bytes: Vec<u8>,
}

/// One PDO entry registration for
/// [`Master::reg_pdo_entry_list`]: slave identification plus the entry to
/// locate.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PdoEntryRegistration {
    /// Configured alias of the slave.
    pub alias: u16,
    /// Ring position of the slave.
    pub position: u16,
    /// Expected vendor ID.
    pub vendor_id: u32,
    /// Expected product code.
    pub product_code: u32,
    /// PDO entry index. An entry with index `0` terminates the list.
    pub index: u16,
    /// PDO entry subindex.
    pub subindex: u8,
}

/// The EtherCAT master core: slaves with their request state machines,
/// application slave configurations, process data domains and the per-link
/// transmit queues.
#[derive(Debug)]
pub struct Master {
    slaves: Vec<Slave>,
    slave_configs: Vec<Arc<SlaveConfig>>,
    domains: Vec<Domain>,
    tx: TxQueues,
    frame_index: u8,
}

impl Master {
    /// An empty master.
    pub fn new() -> Self {
        Self {
            slaves: Vec::new(),
            slave_configs: Vec::new(),
            domains: Vec::new(),
            tx: TxQueues::new(),
            frame_index: 0,
        }
    }

    /// Register a detected slave. Returns its index.
    pub fn add_slave(&mut self, identity: SlaveIdentity, transfers: Transfers) -> usize {
        self.slaves.push(Slave::new(identity, transfers));

        self.slaves.len() - 1
    }

    /// A slave by index.
    pub fn slave(&self, index: usize) -> Result<&Slave, Error> {
        self.slaves.get(index).ok_or(Error::SlaveNotFound(index))
    }

    /// A slave by index, mutably.
    pub fn slave_mut(&mut self, index: usize) -> Result<&mut Slave, Error> {
        self.slaves
            .get_mut(index)
            .ok_or(Error::SlaveNotFound(index))
    }

    /// Iterate over all slaves.
    pub fn slaves(&self) -> impl Iterator<Item = &Slave> {
        self.slaves.iter()
    }

    /// Mark a slave's request state machine ready for requests, once the
    /// slave is known reachable.
    pub fn slave_ready(&mut self, index: usize) -> Result<(), Error> {
        self.slave_mut(index)?.ready();

        Ok(())
    }

    /// Create an application slave configuration.
    pub fn add_slave_config(
        &mut self,
        alias: u16,
        position: u16,
        vendor_id: u32,
        product_code: u32,
    ) -> Arc<SlaveConfig> {
        let config = Arc::new(SlaveConfig::new(
            self.slave_configs.len(),
            alias,
            position,
            vendor_id,
            product_code,
        ));

        self.slave_configs.push(config.clone());

        config
    }

    /// A slave configuration by its identifier.
    pub fn slave_config(&self, id: usize) -> Option<&Arc<SlaveConfig>> {
        self.slave_configs.iter().find(|config| config.id() == id)
    }

    /// Tear down a slave configuration.
    ///
    /// Once every other clone of the configuration's `Arc` is dropped, its
    /// persistent register slots die with it and any slave state machine
    /// holding one observes a dead reference.
    pub fn remove_slave_config(&mut self, id: usize) {
        self.slave_configs.retain(|config| config.id() != id);
    }

    /// Attach a configuration to a slave.
    pub fn attach_config(&mut self, slave: usize, config_id: usize) -> Result<(), Error> {
        let config = self
            .slave_config(config_id)
            .cloned()
            .ok_or(Error::SlaveConfigNotFound)?;

        self.slave_mut(slave)?.attach_config(&config);

        Ok(())
    }

    /// Create a process data domain. Returns its index.
    pub fn create_domain(&mut self) -> usize {
        let index = self.domains.len();

        self.domains.push(Domain::new(index));

        index
    }

    /// A domain by index.
    pub fn domain(&self, index: usize) -> Result<&Domain, Error> {
        self.domains.get(index).ok_or(Error::DomainNotFound(index))
    }

    /// A domain by index, mutably.
    pub fn domain_mut(&mut self, index: usize) -> Result<&mut Domain, Error> {
        self.domains
            .get_mut(index)
            .ok_or(Error::DomainNotFound(index))
    }

    /// Bulk-register PDO entries with a domain.
    ///
    /// Entries are processed in order until the slice ends or an entry with
    /// `index == 0` terminates the list. Returns the byte offset of each
    /// processed entry within the domain image.
    pub fn reg_pdo_entry_list(
        &mut self,
        domain: usize,
        registrations: &[PdoEntryRegistration],
    ) -> Result<Vec<usize>, Error> {
        let mut offsets = Vec::new();

        for registration in registrations.iter().take_while(|reg| reg.index != 0) {
            let config = self
                .slave_configs
                .iter()
                .find(|config| {
                    config.matches(
                        registration.alias,
                        registration.position,
                        registration.vendor_id,
                        registration.product_code,
                    )
                })
                .cloned()
                .ok_or(Error::SlaveConfigNotFound)?;

            let domain = self
                .domains
                .get_mut(domain)
                .ok_or(Error::DomainNotFound(domain))?;

            offsets.push(domain.reg_pdo_entry(
                &config,
                registration.index,
                registration.subindex,
            )?);
        }

        Ok(offsets)
    }

    /// Submit an SDO request to a slave's queue. The caller keeps a clone of
    /// the `Arc` and blocks on [`SdoRequest::wait`].
    pub fn submit_sdo_request(
        &mut self,
        slave: usize,
        request: Arc<SdoRequest>,
    ) -> Result<(), Error> {
        self.slave_mut(slave)?.sdo_requests.push_back(request);

        Ok(())
    }

    /// Submit a one-shot register request to a slave's queue.
    pub fn submit_reg_request(
        &mut self,
        slave: usize,
        request: Arc<RegRequest>,
    ) -> Result<(), Error> {
        self.slave_mut(slave)?.reg_requests.push_back(request);

        Ok(())
    }

    /// Submit an FoE request to a slave's queue.
    pub fn submit_foe_request(
        &mut self,
        slave: usize,
        request: Arc<FoeRequest>,
    ) -> Result<(), Error> {
        self.slave_mut(slave)?.foe_requests.push_back(request);

        Ok(())
    }

    /// Submit an SoE request to a slave's queue.
    pub fn submit_soe_request(
        &mut self,
        slave: usize,
        request: Arc<SoeRequest>,
    ) -> Result<(), Error> {
        self.slave_mut(slave)?.soe_requests.push_back(request);

        Ok(())
    }

    /// Advance every slave's request state machine by one cycle. Each
    /// machine queues at most one datagram.
    pub fn tick(&mut self) {
        let Self { slaves, tx, .. } = self;

        for (index, slave) in slaves.iter_mut().enumerate() {
            slave.tick_requests(DatagramHandle::Slave { slave: index }, tx);
        }
    }

    /// Export a domain's outputs and queue its datagram pairs on both
    /// links. Call once per cycle per domain.
    pub fn domain_queue(&mut self, index: usize) -> Result<(), Error> {
        let Self { domains, tx, .. } = self;

        let domain = domains.get_mut(index).ok_or(Error::DomainNotFound(index))?;

        domain.queue(tx);

        Ok(())
    }

    /// Import a domain's inputs and update its health counters. Call once
    /// per cycle per domain, after the driver delivered replies.
    pub fn domain_process(&mut self, index: usize) -> Result<(), Error> {
        self.domain_mut(index)?.process();

        Ok(())
    }

    /// Hand all queued datagrams of one link to the driver, serialised and
    /// marked sent.
    pub fn drain_tx(&mut self, device: DeviceIndex) -> Vec<TxDatagram> {
        let handles = self.tx.drain(device);

        let mut out = Vec::with_capacity(handles.len());

        for handle in handles {
            let index = self.frame_index;

            self.frame_index = self.frame_index.wrapping_add(1);

            let Some(datagram) = self.datagram_mut(handle) else {
                fmt::error!("Stale datagram handle {:?} in TX queue", handle);
                continue;
            };

            datagram.set_sent();

            let mut bytes = Vec::with_capacity(datagram.len() + 12);

            datagram.write_wire(index, &mut bytes);

            out.push(TxDatagram { handle, bytes });
        }

        out
    }

    /// Deliver the reply for a previously drained datagram.
    pub fn receive(&mut self, handle: DatagramHandle, payload: &[u8], working_counter: u16) {
        let Some(datagram) = self.datagram_mut(handle) else {
            fmt::error!("Reply for stale datagram handle {:?}", handle);
            return;
        };

        if datagram.state() != DatagramState::Sent {
            fmt::warn!(
                "Unexpected reply for datagram in state {}",
                datagram.state()
            );
            return;
        }

        datagram.set_received(payload, working_counter);
    }

    /// Give up on the reply for a previously drained datagram.
    pub fn timeout(&mut self, handle: DatagramHandle) {
        let Some(datagram) = self.datagram_mut(handle) else {
            fmt::error!("Timeout for stale datagram handle {:?}", handle);
            return;
        };

        datagram.set_timed_out();
    }

    fn datagram_mut(&mut self, handle: DatagramHandle) -> Option<&mut Datagram> {
        match handle {
            DatagramHandle::Slave { slave } => self
                .slaves
                .get_mut(slave)
                .map(|slave| slave.fsm.datagram_mut()),
            DatagramHandle::Domain {
                domain,
                pair,
                device,
            } => self
                .domains
                .get_mut(domain)
                .and_then(|domain| domain.pair_datagram_mut(pair, device)),
        }
    }
}

impl Default for Master {
    fn default() -> Self {
        Self::new()
    }
}
