//! Application-side configuration of one expected slave: its bus identity,
//! its PDO mapping and its persistent register request slots.

use crate::{
    error::Error,
    fmt,
    request::{Direction, RegRequest, RequestState},
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One mapped PDO entry of a slave configuration.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PdoEntryDesc {
    /// Mapping direction.
    pub dir: Direction,
    /// Object index.
    pub index: u16,
    /// Object subindex.
    pub subindex: u8,
    /// Entry size in bits.
    pub bit_len: u16,
}

#[derive(Debug)]
struct Mapping {
    entries: Vec<PdoEntryDesc>,
    /// Physical start of the process data area, per direction
    /// (`[input, output]`).
    physical_start: [u16; 2],
}

/// Configuration for one slave the application expects on the bus.
///
/// Shared between the master (owner), the attached [`Slave`](crate::Slave)
/// and submitting contexts. Dropping the master's `Arc` tears the
/// configuration down; the request state machine observes that through dead
/// `Weak` references and abandons any in-flight config-owned request without
/// touching it.
#[derive(Debug)]
pub struct SlaveConfig {
    id: usize,
    alias: u16,
    position: u16,
    vendor_id: u32,
    product_code: u32,
    mapping: Mutex<Mapping>,
    reg_requests: Mutex<Vec<Arc<RegRequest>>>,
}

impl SlaveConfig {
    pub(crate) fn new(
        id: usize,
        alias: u16,
        position: u16,
        vendor_id: u32,
        product_code: u32,
    ) -> Self {
        Self {
            id,
            alias,
            position,
            vendor_id,
            product_code,
            mapping: Mutex::new(Mapping {
                entries: Vec::new(),
                // Common defaults for the SM2 (output) and SM3 (input)
                // process data areas.
                physical_start: [0x1400, 0x1100],
            }),
            reg_requests: Mutex::new(Vec::new()),
        }
    }

    /// Stable identifier of this configuration within its master.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Configured alias address.
    pub fn alias(&self) -> u16 {
        self.alias
    }

    /// Ring position (relative to the alias, absolute if the alias is 0).
    pub fn position(&self) -> u16 {
        self.position
    }

    /// Expected vendor ID.
    pub fn vendor_id(&self) -> u32 {
        self.vendor_id
    }

    /// Expected product code.
    pub fn product_code(&self) -> u32 {
        self.product_code
    }

    /// Whether this configuration matches the given identification.
    pub fn matches(&self, alias: u16, position: u16, vendor_id: u32, product_code: u32) -> bool {
        self.alias == alias
            && self.position == position
            && self.vendor_id == vendor_id
            && self.product_code == product_code
    }

    fn lock_mapping(&self) -> MutexGuard<'_, Mapping> {
        self.mapping.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_reg_requests(&self) -> MutexGuard<'_, Vec<Arc<RegRequest>>> {
        self.reg_requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Override the physical start address of the process data area in the
    /// given direction.
    pub fn set_physical_start(&self, dir: Direction, address: u16) {
        self.lock_mapping().physical_start[dir.index()] = address;
    }

    /// Physical start address of the process data area in the given
    /// direction.
    pub fn physical_start(&self, dir: Direction) -> u16 {
        self.lock_mapping().physical_start[dir.index()]
    }

    /// Append a PDO entry to the mapping. Entries are laid out in
    /// declaration order, byte aligned per direction, and registered with a
    /// domain through
    /// [`Master::reg_pdo_entry_list`](crate::Master::reg_pdo_entry_list).
    pub fn push_pdo_entry(&self, entry: PdoEntryDesc) {
        fmt::debug!(
            "Config {}: mapping PDO entry {:#06x}:{:02}, {} bit(s)",
            self.id,
            entry.index,
            entry.subindex,
            entry.bit_len
        );

        self.lock_mapping().entries.push(entry);
    }

    /// Total mapped image size of one direction, in bytes.
    pub fn image_size(&self, dir: Direction) -> usize {
        self.lock_mapping()
            .entries
            .iter()
            .filter(|entry| entry.dir == dir)
            .map(|entry| usize::from(entry.bit_len).div_ceil(8))
            .sum()
    }

    /// Locate a PDO entry in the mapping: its direction and byte offset
    /// within that direction's image.
    ///
    /// The mapping is byte aligned: each entry starts on the byte following
    /// its predecessor's last occupied bit.
    pub fn entry_offset(&self, index: u16, subindex: u8) -> Result<(Direction, usize), Error> {
        let mapping = self.lock_mapping();

        let mut bit_offset = [0usize; 2];

        for entry in mapping.entries.iter() {
            let offset = &mut bit_offset[entry.dir.index()];

            if entry.index == index && entry.subindex == subindex {
                return Ok((entry.dir, *offset / 8));
            }

            *offset += usize::from(entry.bit_len).div_ceil(8) * 8;
        }

        Err(Error::PdoEntryNotFound { index, subindex })
    }

    /// Create a persistent register request slot owned by this
    /// configuration.
    ///
    /// Unlike one-shot register requests submitted through the master, a
    /// slot stays registered after it completes: the producer inspects the
    /// outcome in place and re-arms it with [`RegRequest::requeue`].
    pub fn reg_request_slot(&self, request: RegRequest) -> Arc<RegRequest> {
        let request = Arc::new(request);

        self.lock_reg_requests().push(request.clone());

        request
    }

    /// First queued config-owned register request, if any. The request stays
    /// in its slot; the state machine only flags it busy.
    pub(crate) fn queued_reg_request(&self) -> Option<Arc<RegRequest>> {
        self.lock_reg_requests()
            .iter()
            .find(|request| request.state() == RequestState::Queued)
            .cloned()
    }
}
