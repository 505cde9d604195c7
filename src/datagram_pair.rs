//! A pair of datagrams carrying the same logical range on the main and
//! backup links.

use crate::{
    command::Command,
    datagram::{Datagram, DatagramState, DeviceIndex, NUM_DEVICES},
};
use core::ops::Range;

/// Number of distinct slave configurations contributing to a datagram, per
/// direction. Determines the datagram's command type and its expected
/// working counter.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub(crate) struct UsedConfigs {
    /// Distinct configs contributing input mappings.
    pub input: usize,
    /// Distinct configs contributing output mappings.
    pub output: usize,
}

/// Two datagrams addressing the same logical range over the redundant main
/// and backup links, plus a snapshot of the bytes that were sent.
///
/// Each slave that handles its part of the range increments the working
/// counter of whichever copy reached it, so the pair's observed working
/// counter is the sum over both links.
#[derive(Debug)]
pub struct DatagramPair {
    datagrams: [Datagram; NUM_DEVICES],
    send_buffer: Vec<u8>,
    logical_address: u32,
    range: Range<usize>,
    expected_working_counter: u16,
}

impl DatagramPair {
    pub(crate) fn new(logical_address: u32, range: Range<usize>, used: UsedConfigs) -> Self {
        // A read increments the working counter by 1, a write by 1, a
        // read-write by 3 (1 for the read + 2 for the write).
        let (command, expected_working_counter) = if used.output > 0 && used.input > 0 {
            (
                Command::lrw(logical_address),
                (2 * used.output + used.input) as u16,
            )
        } else if used.output > 0 {
            (Command::lwr(logical_address), used.output as u16)
        } else {
            (Command::lrd(logical_address), used.input as u16)
        };

        let size = range.len();

        let mut datagrams = [Datagram::new(), Datagram::new()];

        for device in DeviceIndex::ALL {
            let datagram = &mut datagrams[device.index()];

            datagram.logical(command, size);
            datagram.set_device_index(device);
        }

        Self {
            datagrams,
            send_buffer: vec![0; size],
            logical_address,
            range,
            expected_working_counter,
        }
    }

    /// Logical address of the first byte of the pair's range.
    pub fn logical_address(&self) -> u32 {
        self.logical_address
    }

    /// Byte range into the owning domain's process data image.
    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    /// Expected working counter contribution of this pair.
    pub fn expected_working_counter(&self) -> u16 {
        self.expected_working_counter
    }

    /// The datagram travelling on the given link.
    pub fn datagram(&self, device: DeviceIndex) -> &Datagram {
        &self.datagrams[device.index()]
    }

    pub(crate) fn datagram_mut(&mut self, device: DeviceIndex) -> &mut Datagram {
        &mut self.datagrams[device.index()]
    }

    /// The bytes snapshotted at queue time, before transmission.
    pub fn send_buffer(&self) -> &[u8] {
        &self.send_buffer
    }

    /// Snapshot the application image slice into the send buffer and both
    /// outgoing payloads.
    pub(crate) fn prepare(&mut self, image: &[u8]) {
        self.send_buffer.copy_from_slice(image);
        self.datagrams[DeviceIndex::Main.index()]
            .data_mut()
            .copy_from_slice(image);
        self.datagrams[DeviceIndex::Backup.index()]
            .data_mut()
            .copy_from_slice(image);
    }

    /// Observed working counter of the last cycle: the sum over both links,
    /// counting a lost datagram as zero.
    pub(crate) fn process(&self) -> u16 {
        self.datagrams
            .iter()
            .filter(|datagram| datagram.state() == DatagramState::Received)
            .map(Datagram::working_counter)
            .sum()
    }

    /// Whether the bytes at `offset..offset + len` received on `device`
    /// differ from what was sent.
    pub(crate) fn data_changed(&self, device: DeviceIndex, offset: usize, len: usize) -> bool {
        let received = &self.datagrams[device.index()].data()[offset..offset + len];
        let sent = &self.send_buffer[offset..offset + len];

        received != sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_type_from_directions() {
        let both = DatagramPair::new(0, 0..10, UsedConfigs { input: 1, output: 1 });
        let out_only = DatagramPair::new(0, 0..10, UsedConfigs { input: 0, output: 2 });
        let in_only = DatagramPair::new(0, 0..10, UsedConfigs { input: 3, output: 0 });

        assert_eq!(both.datagram(DeviceIndex::Main).command(), Command::lrw(0));
        assert_eq!(both.expected_working_counter(), 3);

        assert_eq!(
            out_only.datagram(DeviceIndex::Main).command(),
            Command::lwr(0)
        );
        assert_eq!(out_only.expected_working_counter(), 2);

        assert_eq!(
            in_only.datagram(DeviceIndex::Main).command(),
            Command::lrd(0)
        );
        assert_eq!(in_only.expected_working_counter(), 3);
    }

    #[test]
    fn process_counts_received_links_only() {
        let mut pair = DatagramPair::new(0, 0..4, UsedConfigs { input: 1, output: 0 });

        pair.datagram_mut(DeviceIndex::Main).set_queued();
        pair.datagram_mut(DeviceIndex::Main).set_sent();
        pair.datagram_mut(DeviceIndex::Main)
            .set_received(&[1, 2, 3, 4], 1);

        pair.datagram_mut(DeviceIndex::Backup).set_queued();
        pair.datagram_mut(DeviceIndex::Backup).set_sent();
        pair.datagram_mut(DeviceIndex::Backup).set_timed_out();

        assert_eq!(pair.process(), 1);
    }

    #[test]
    fn detects_changed_bytes_per_link() {
        let mut pair = DatagramPair::new(0, 0..4, UsedConfigs { input: 1, output: 0 });

        pair.prepare(&[0, 0, 0, 0]);

        pair.datagram_mut(DeviceIndex::Main)
            .set_received(&[0, 0, 0, 0], 0);
        pair.datagram_mut(DeviceIndex::Backup)
            .set_received(&[5, 6, 0, 0], 1);

        assert!(!pair.data_changed(DeviceIndex::Main, 0, 4));
        assert!(pair.data_changed(DeviceIndex::Backup, 0, 2));
        assert!(!pair.data_changed(DeviceIndex::Backup, 2, 2));
    }
}
