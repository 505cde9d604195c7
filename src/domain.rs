//! The process data domain engine.
//!
//! A domain packs the FMMU mappings of many slave configurations into one
//! contiguous logical address range, splits that range across one or more
//! [`DatagramPair`]s, and exchanges it once per cycle:
//! [`queue`](Domain::queue) exports outputs onto both links,
//! [`process`](Domain::process) imports inputs with byte-range redundancy
//! fallback and tracks the working counter health signal.

use crate::{
    datagram::{DeviceIndex, MAX_DATA_SIZE},
    datagram_pair::{DatagramPair, UsedConfigs},
    error::Error,
    fmmu_config::FmmuConfig,
    fmt,
    master::{DatagramHandle, TxQueues},
    request::Direction,
    slave_config::SlaveConfig,
};
use smallvec::SmallVec;
use std::time::{Duration, Instant};

/// Classification of a domain's observed working counter.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WcState {
    /// No slave processed any datagram of the domain.
    Zero,
    /// Some but not all expected exchanges happened.
    Incomplete,
    /// The observed working counter matches the expected one.
    Complete,
}

/// Snapshot of a domain's health, as returned by [`Domain::state`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DomainState {
    /// Working counter observed in the last cycle.
    pub working_counter: u16,
    /// Classification against the expected working counter.
    pub wc_state: WcState,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum DataOrigin {
    Internal,
    External,
}

/// One process data domain.
///
/// Built up by adding FMMU configurations, frozen by
/// [`finish`](Domain::finish), then exchanged once per cycle. Created
/// through [`Master::create_domain`](crate::Master::create_domain).
#[derive(Debug)]
pub struct Domain {
    index: usize,
    fmmu_configs: Vec<FmmuConfig>,
    data: Vec<u8>,
    data_origin: DataOrigin,
    data_size: usize,
    logical_base_address: u32,
    datagram_pairs: SmallVec<[DatagramPair; 2]>,
    working_counter: u16,
    expected_working_counter: u16,
    working_counter_changes: u32,
    last_notify: Option<Instant>,
    finished: bool,
}

impl Domain {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            fmmu_configs: Vec::new(),
            data: Vec::new(),
            data_origin: DataOrigin::Internal,
            data_size: 0,
            logical_base_address: 0,
            datagram_pairs: SmallVec::new(),
            working_counter: 0,
            expected_working_counter: 0,
            working_counter_changes: 0,
            last_notify: None,
            finished: false,
        }
    }

    /// Domain number within its master.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Size of the process data image in bytes.
    pub fn size(&self) -> usize {
        self.data_size
    }

    /// Current view of the process data image.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.data_size.min(self.data.len())]
    }

    /// Mutable view of the process data image, for writing outputs.
    pub fn data_mut(&mut self) -> &mut [u8] {
        let len = self.data_size.min(self.data.len());

        &mut self.data[..len]
    }

    /// Logical base address assigned at [`finish`](Domain::finish).
    pub fn logical_base_address(&self) -> u32 {
        self.logical_base_address
    }

    /// Expected working counter, the sum over all datagram pairs.
    pub fn expected_working_counter(&self) -> u16 {
        self.expected_working_counter
    }

    /// The domain's datagram pairs, in logical address order. Empty until
    /// the domain is finished.
    pub fn datagram_pairs(&self) -> &[DatagramPair] {
        &self.datagram_pairs
    }

    /// Number of FMMU configurations in this domain.
    pub fn fmmu_count(&self) -> usize {
        self.fmmu_configs.len()
    }

    /// An FMMU configuration by its position in insertion order.
    pub fn find_fmmu(&self, pos: usize) -> Option<&FmmuConfig> {
        self.fmmu_configs.get(pos)
    }

    /// Substitute the domain's internally allocated image with
    /// application-supplied memory.
    ///
    /// The buffer length is validated against the mapped size when the
    /// domain is finished.
    pub fn external_memory(&mut self, memory: Vec<u8>) -> Result<(), Error> {
        if self.finished {
            return Err(Error::DomainFinished);
        }

        fmt::debug!(
            "Domain {}: using {} byte(s) of external memory",
            self.index,
            memory.len()
        );

        self.data = memory;
        self.data_origin = DataOrigin::External;

        Ok(())
    }

    /// Append an FMMU configuration, extending the mapped image.
    ///
    /// Returns the domain-relative logical offset assigned to the mapping.
    /// Fails once the domain is finished.
    pub fn add_fmmu_config(&mut self, mut fmmu: FmmuConfig) -> Result<u32, Error> {
        if self.finished {
            return Err(Error::DomainFinished);
        }

        let offset = self.data_size as u32;

        fmmu.logical_start_address = offset;
        self.data_size += fmmu.data_size;

        fmt::debug!(
            "Domain {}: added {} byte(s), total {}",
            self.index,
            fmmu.data_size,
            self.data_size
        );

        self.fmmu_configs.push(fmmu);

        Ok(offset)
    }

    /// Register one PDO entry of a slave configuration with this domain,
    /// returning the entry's byte offset within the domain image.
    ///
    /// The first entry registered per direction adds an FMMU configuration
    /// covering the configuration's whole image in that direction.
    pub fn reg_pdo_entry(
        &mut self,
        config: &SlaveConfig,
        index: u16,
        subindex: u8,
    ) -> Result<usize, Error> {
        if self.finished {
            return Err(Error::DomainFinished);
        }

        let (dir, entry_offset) = config.entry_offset(index, subindex)?;

        let existing = self
            .fmmu_configs
            .iter()
            .find(|fmmu| fmmu.slave_config == config.id() && fmmu.dir == dir);

        let base = match existing {
            Some(fmmu) => {
                if entry_offset >= fmmu.data_size {
                    return Err(Error::PdoEntryOutOfRange);
                }

                fmmu.logical_start_address
            }
            None => self.add_fmmu_config(FmmuConfig::new(
                config.id(),
                dir,
                config.physical_start(dir),
                config.image_size(dir),
            ))?,
        };

        Ok(base as usize + entry_offset)
    }

    fn shall_count(&self, current: usize, first: usize) -> bool {
        let fmmu = &self.fmmu_configs[current];

        !self.fmmu_configs[first..current]
            .iter()
            .any(|earlier| earlier.slave_config == fmmu.slave_config && earlier.dir == fmmu.dir)
    }

    fn add_datagram_pair(&mut self, offset: usize, size: usize, used: UsedConfigs) {
        let pair = DatagramPair::new(
            self.logical_base_address + offset as u32,
            offset..offset + size,
            used,
        );

        self.expected_working_counter += pair.expected_working_counter();

        fmt::debug!(
            "Domain {}: adding datagram pair with expected working counter {}",
            self.index,
            pair.expected_working_counter()
        );

        self.datagram_pairs.push(pair);
    }

    /// Freeze the FMMU layout: rebase every mapping onto `base_address`,
    /// allocate the image and lay the datagram pairs over it.
    ///
    /// Walks the mappings in insertion order, starting a new datagram pair
    /// whenever the current one would exceed [`MAX_DATA_SIZE`]. Each pair's
    /// command type and expected working counter follow from the number of
    /// distinct slave configurations contributing to it per direction.
    pub fn finish(&mut self, base_address: u32) -> Result<(), Error> {
        if self.finished {
            return Err(Error::DomainFinished);
        }

        if let Some(fmmu) = self
            .fmmu_configs
            .iter()
            .find(|fmmu| fmmu.data_size > MAX_DATA_SIZE)
        {
            return Err(Error::DataTooLong {
                requested: fmmu.data_size,
                max: MAX_DATA_SIZE,
            });
        }

        match self.data_origin {
            DataOrigin::Internal => {
                self.data.clear();
                self.data.resize(self.data_size, 0);
            }
            DataOrigin::External => {
                if self.data.len() < self.data_size {
                    return Err(Error::ExternalMemoryTooSmall {
                        provided: self.data.len(),
                        required: self.data_size,
                    });
                }
            }
        }

        self.logical_base_address = base_address;

        let mut datagram_offset = 0;
        let mut datagram_size = 0;
        let mut used = UsedConfigs::default();
        let mut first_fmmu = 0;

        for i in 0..self.fmmu_configs.len() {
            self.fmmu_configs[i].logical_start_address += base_address;

            // The current mapping does not fit any more: seal the pair and
            // start a new one with this mapping.
            if datagram_size + self.fmmu_configs[i].data_size > MAX_DATA_SIZE {
                self.add_datagram_pair(datagram_offset, datagram_size, used);

                datagram_offset += datagram_size;
                datagram_size = 0;
                used = UsedConfigs::default();
                first_fmmu = i;
            }

            // A slave config contributing several mappings of one direction
            // to the same datagram is counted once.
            if self.shall_count(i, first_fmmu) {
                match self.fmmu_configs[i].dir {
                    Direction::Input => used.input += 1,
                    Direction::Output => used.output += 1,
                }
            }

            datagram_size += self.fmmu_configs[i].data_size;
        }

        if datagram_size > 0 {
            self.add_datagram_pair(datagram_offset, datagram_size, used);
        }

        self.finished = true;

        fmt::info!(
            "Domain {}: logical address {:#010x}, {} byte(s), expected working counter {}",
            self.index,
            self.logical_base_address,
            self.data_size,
            self.expected_working_counter
        );

        for pair in self.datagram_pairs.iter() {
            fmt::debug!(
                "  Datagram: logical offset {:#010x}, {} byte(s), {}",
                pair.logical_address(),
                pair.range().len(),
                pair.datagram(DeviceIndex::Main).command()
            );
        }

        Ok(())
    }

    /// Export outputs: snapshot the image into every pair's send buffer and
    /// both link payloads, then queue all datagrams, pairs in logical
    /// address order.
    ///
    /// Call once per cycle, before handing frames to the driver.
    pub(crate) fn queue(&mut self, tx: &mut TxQueues) {
        let Self {
            index,
            data,
            datagram_pairs,
            ..
        } = self;

        for (pair_index, pair) in datagram_pairs.iter_mut().enumerate() {
            pair.prepare(&data[pair.range()]);

            for device in DeviceIndex::ALL {
                tx.queue(
                    DatagramHandle::Domain {
                        domain: *index,
                        pair: pair_index,
                        device,
                    },
                    pair.datagram_mut(device),
                );
            }
        }
    }

    /// Import inputs and update the working counter health signal.
    ///
    /// Call once per cycle, after the driver delivered replies.
    pub fn process(&mut self) {
        self.process_at(Instant::now());
    }

    pub(crate) fn process_at(&mut self, now: Instant) {
        let Self {
            data,
            fmmu_configs,
            datagram_pairs,
            ..
        } = self;

        let pair_wcs: SmallVec<[u16; 2]> = datagram_pairs
            .iter()
            .map(DatagramPair::process)
            .collect();

        let working_counter_sum: u16 = pair_wcs.iter().sum();

        for fmmu in fmmu_configs
            .iter()
            .filter(|fmmu| fmmu.dir == Direction::Input)
        {
            let fmmu_range = fmmu.logical_range();

            let located = datagram_pairs.iter().enumerate().find(|(_, pair)| {
                let pair_end = pair.logical_address() + pair.range().len() as u32;

                fmmu_range.start >= pair.logical_address() && fmmu_range.end <= pair_end
            });

            let Some((pair_index, pair)) = located else {
                continue;
            };

            let offset = (fmmu.logical_start_address - pair.logical_address()) as usize;
            let len = fmmu.data_size;
            let image_start = pair.range().start + offset;

            if pair.data_changed(DeviceIndex::Main, offset, len) {
                // Input arrived on the main link.
                let received = &pair.datagram(DeviceIndex::Main).data()[offset..offset + len];

                data[image_start..image_start + len].copy_from_slice(received);
            } else if pair.data_changed(DeviceIndex::Backup, offset, len)
                || pair_wcs[pair_index] == pair.expected_working_counter()
            {
                // Input arrived via the backup link, or nothing moved but
                // the working counter is complete, which makes the backup
                // reply authoritative.
                let received = &pair.datagram(DeviceIndex::Backup).data()[offset..offset + len];

                data[image_start..image_start + len].copy_from_slice(received);
            }
        }

        if working_counter_sum != self.working_counter {
            self.working_counter_changes += 1;
            self.working_counter = working_counter_sum;
        }

        self.notify(now);
    }

    /// Emit at most one working counter report per second, summarising
    /// either the single transition or the number of changes in the window.
    fn notify(&mut self, now: Instant) {
        if self.working_counter_changes == 0 {
            return;
        }

        let due = self
            .last_notify
            .map_or(true, |at| now.duration_since(at) > Duration::from_secs(1));

        if !due {
            return;
        }

        self.last_notify = Some(now);

        if self.working_counter_changes == 1 {
            fmt::info!(
                "Domain {}: working counter changed to {}/{}",
                self.index,
                self.working_counter,
                self.expected_working_counter
            );
        } else {
            fmt::info!(
                "Domain {}: {} working counter changes - now {}/{}",
                self.index,
                self.working_counter_changes,
                self.working_counter,
                self.expected_working_counter
            );
        }

        self.working_counter_changes = 0;
    }

    /// Number of working counter reports still pending. Zero right after a
    /// report was emitted.
    pub fn working_counter_changes(&self) -> u32 {
        self.working_counter_changes
    }

    /// Health snapshot: the observed working counter and its classification
    /// against the expected value.
    pub fn state(&self) -> DomainState {
        let wc_state = if self.working_counter == 0 {
            WcState::Zero
        } else if self.working_counter == self.expected_working_counter {
            WcState::Complete
        } else {
            WcState::Incomplete
        };

        DomainState {
            working_counter: self.working_counter,
            wc_state,
        }
    }

    pub(crate) fn pair_datagram_mut(
        &mut self,
        pair: usize,
        device: DeviceIndex,
    ) -> Option<&mut crate::datagram::Datagram> {
        self.datagram_pairs
            .get_mut(pair)
            .map(|pair| pair.datagram_mut(device))
    }
}
