//! Shared helpers for the cyclic scenario tests: scripted mailbox engines
//! and a driver loop that round-trips every queued datagram.

use etherloom::{
    transfer::Transfer, Datagram, DeviceIndex, Master, SlaveIdentity, Transfers,
};
use std::sync::Arc;

/// A scripted mailbox engine.
///
/// Emits `steps` non-terminal exchanges (one datagram each), then reports
/// completion with the configured verdict. Repeated `exec` calls after the
/// terminal step keep reporting completion, like the real engines do.
pub struct ScriptedTransfer {
    steps_left: usize,
    succeed: bool,
    slave: Option<SlaveIdentity>,
}

impl ScriptedTransfer {
    pub fn new(steps: usize, succeed: bool) -> Self {
        Self {
            steps_left: steps,
            succeed,
            slave: None,
        }
    }
}

impl<R: Send + Sync> Transfer<R> for ScriptedTransfer {
    fn transfer(&mut self, slave: SlaveIdentity, _request: Arc<R>) {
        self.slave = Some(slave);
    }

    fn exec(&mut self, datagram: &mut Datagram) -> bool {
        if self.steps_left == 0 {
            return false;
        }

        self.steps_left -= 1;

        // A plausible next step: poll the slave's mailbox sync manager.
        if let Some(slave) = self.slave {
            datagram.fprd(slave.station_address, 0x080d, 1);
        }

        true
    }

    fn success(&self) -> bool {
        self.succeed
    }
}

pub fn identity(station_address: u16) -> SlaveIdentity {
    SlaveIdentity {
        station_address,
        device_index: DeviceIndex::Main,
        vendor_id: 0x0000_0002,
        product_code: 0x0444_9999,
    }
}

/// Engines that finish after `steps` exchanges each, successfully.
pub fn scripted_transfers(steps: usize) -> Transfers {
    Transfers {
        coe: Box::new(ScriptedTransfer::new(steps, true)),
        foe: Box::new(ScriptedTransfer::new(steps, true)),
        soe: Box::new(ScriptedTransfer::new(steps, true)),
    }
}

/// Run one full master cycle: tick the request state machines, then
/// round-trip every queued datagram on both links, echoing the payload back
/// with the given working counter.
///
/// Returns the number of datagrams that went over the wire.
pub fn cycle(master: &mut Master, working_counter: u16) -> usize {
    master.tick();

    let mut count = 0;

    for device in DeviceIndex::ALL {
        for frame in master.drain_tx(device) {
            let payload = frame.bytes[10..frame.bytes.len() - 2].to_vec();

            master.receive(frame.handle, &payload, working_counter);

            count += 1;
        }
    }

    count
}
