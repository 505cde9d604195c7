//! The per-slave request state machine.
//!
//! Each slave owns one instance, multiplexing its four classes of pending
//! acyclic requests (SDO, register, FoE, SoE) onto a single shared datagram.
//! The machine is strictly cycle driven: [`Master::tick`](crate::Master::tick)
//! advances it once per cycle, and it emits at most one datagram per
//! invocation. All progress is gated on the round trip of the previous
//! cycle's datagram: while that datagram is still queued or on the wire,
//! the tick returns without advancing.

use crate::{
    datagram::{Datagram, DatagramState},
    fmt,
    master::{DatagramHandle, TxQueues},
    request::{Direction, FoeRequest, RegRequest, RequestState, SdoRequest, SoeRequest},
    slave::{Slave, SlaveIdentity},
    slave_config::SlaveConfig,
    slave_state::SlaveStatus,
    transfer::Transfers,
};
use std::{
    collections::VecDeque,
    sync::{Arc, Weak},
};

/// Observable state of a slave's request state machine.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FsmState {
    /// Not accepting requests. Entered at startup and by some abort paths;
    /// left through [`Slave::ready`].
    #[default]
    Idle,
    /// Waiting for a pending request to service.
    Ready,
    /// An SDO transfer is in flight on the CoE engine.
    SdoRequest,
    /// A register access datagram is in flight.
    RegRequest,
    /// A file transfer is in flight on the FoE engine.
    FoeRequest,
    /// A drive parameter transfer is in flight on the SoE engine.
    SoeRequest,
}

/// Register requests reach the machine from two sources with different
/// ownership rules: config-owned slots are only ever flagged busy in place
/// (the producer keeps inspecting them), while externally submitted requests
/// are dequeued and owned by the machine until they terminate.
#[derive(Debug)]
enum RegRequestRef {
    /// Persistent slot owned by the slave configuration. Held weakly so
    /// that tearing the configuration down mid-flight is observed as a dead
    /// reference.
    Internal(Weak<RegRequest>),
    /// One-shot request dequeued from the slave's queue.
    External(Arc<RegRequest>),
}

impl RegRequestRef {
    fn resolve(&self) -> Option<Arc<RegRequest>> {
        match self {
            RegRequestRef::Internal(slot) => slot.upgrade(),
            RegRequestRef::External(request) => Some(request.clone()),
        }
    }
}

pub(crate) struct FsmContext<'a> {
    pub identity: SlaveIdentity,
    pub status: SlaveStatus,
    pub config: &'a Weak<SlaveConfig>,
    pub sdo_requests: &'a mut VecDeque<Arc<SdoRequest>>,
    pub reg_requests: &'a mut VecDeque<Arc<RegRequest>>,
    pub foe_requests: &'a mut VecDeque<Arc<FoeRequest>>,
    pub soe_requests: &'a mut VecDeque<Arc<SoeRequest>>,
    pub handle: DatagramHandle,
    pub tx: &'a mut TxQueues,
}

/// The request state machine of one slave.
#[derive(Debug)]
pub(crate) struct SlaveFsm {
    state: FsmState,
    datagram: Datagram,
    transfers: Transfers,
    sdo_request: Option<Arc<SdoRequest>>,
    reg_request: Option<RegRequestRef>,
    foe_request: Option<Arc<FoeRequest>>,
    soe_request: Option<Arc<SoeRequest>>,
}

impl Slave {
    pub(crate) fn tick_requests(&mut self, handle: DatagramHandle, tx: &mut TxQueues) {
        let Self {
            identity,
            current_status,
            config,
            sdo_requests,
            reg_requests,
            foe_requests,
            soe_requests,
            fsm,
        } = self;

        fsm.tick(FsmContext {
            identity: *identity,
            status: *current_status,
            config,
            sdo_requests,
            reg_requests,
            foe_requests,
            soe_requests,
            handle,
            tx,
        });
    }

    /// Observable state of this slave's request state machine.
    pub fn fsm_state(&self) -> FsmState {
        self.fsm.state()
    }
}

impl SlaveFsm {
    pub(crate) fn new(transfers: Transfers) -> Self {
        Self {
            state: FsmState::Idle,
            datagram: Datagram::new(),
            transfers,
            sdo_request: None,
            reg_request: None,
            foe_request: None,
            soe_request: None,
        }
    }

    pub(crate) fn state(&self) -> FsmState {
        self.state
    }

    pub(crate) fn datagram(&self) -> &Datagram {
        &self.datagram
    }

    pub(crate) fn datagram_mut(&mut self) -> &mut Datagram {
        &mut self.datagram
    }

    /// `Idle` -> `Ready`, once the slave is known reachable. The only
    /// externally driven edge.
    pub(crate) fn ready(&mut self, station_address: u16) {
        if self.state == FsmState::Idle {
            fmt::debug!("Slave {:#06x}: ready for requests", station_address);

            self.state = FsmState::Ready;
        }
    }

    /// Advance by one cycle.
    ///
    /// If the shared datagram has not completed its round trip yet, the
    /// machine does not move.
    pub(crate) fn tick(&mut self, mut ctx: FsmContext<'_>) {
        if matches!(
            self.datagram.state(),
            DatagramState::Queued | DatagramState::Sent
        ) {
            return;
        }

        match self.state {
            FsmState::Idle => {}
            FsmState::Ready => self.state_ready(&mut ctx),
            FsmState::SdoRequest => self.state_sdo_request(&mut ctx),
            FsmState::RegRequest => self.state_reg_request(&mut ctx),
            FsmState::FoeRequest => self.state_foe_request(&mut ctx),
            FsmState::SoeRequest => self.state_soe_request(&mut ctx),
        }
    }

    /// Fixed service rotation: the first class with a processable request
    /// wins the cycle.
    fn state_ready(&mut self, ctx: &mut FsmContext<'_>) {
        if self.process_sdo(ctx) {
            return;
        }

        if self.process_reg(ctx) {
            return;
        }

        if self.process_foe(ctx) {
            return;
        }

        self.process_soe(ctx);
    }

    fn process_sdo(&mut self, ctx: &mut FsmContext<'_>) -> bool {
        let Some(request) = ctx.sdo_requests.pop_front() else {
            return false;
        };

        if ctx.status.error_ack {
            fmt::warn!(
                "Slave {:#06x}: aborting SDO request, slave has error flag set",
                ctx.identity.station_address
            );

            request.complete(RequestState::Failure);
            self.state = FsmState::Idle;

            return false;
        }

        if !ctx.status.mailbox_capable() {
            fmt::warn!(
                "Slave {:#06x}: aborting SDO request, slave is in INIT",
                ctx.identity.station_address
            );

            request.complete(RequestState::Failure);
            self.state = FsmState::Idle;

            return false;
        }

        request.set_busy();

        fmt::debug!(
            "Slave {:#06x}: processing SDO request",
            ctx.identity.station_address
        );

        self.sdo_request = Some(request.clone());
        self.state = FsmState::SdoRequest;

        self.transfers.coe.transfer(ctx.identity, request);
        self.transfers.coe.exec(&mut self.datagram);
        self.datagram.set_device_index(ctx.identity.device_index);
        ctx.tx.queue(ctx.handle, &mut self.datagram);

        true
    }

    fn state_sdo_request(&mut self, ctx: &mut FsmContext<'_>) {
        let Some(request) = self.sdo_request.clone() else {
            self.state = FsmState::Ready;
            return;
        };

        if self.transfers.coe.exec(&mut self.datagram) {
            ctx.tx.queue(ctx.handle, &mut self.datagram);
            return;
        }

        if !self.transfers.coe.success() {
            fmt::error!(
                "Slave {:#06x}: failed to process SDO request",
                ctx.identity.station_address
            );

            request.complete(RequestState::Failure);
            self.sdo_request = None;
            self.state = FsmState::Ready;

            return;
        }

        fmt::debug!(
            "Slave {:#06x}: finished SDO request",
            ctx.identity.station_address
        );

        request.complete(RequestState::Success);
        self.sdo_request = None;
        self.state = FsmState::Ready;
    }

    fn process_reg(&mut self, ctx: &mut FsmContext<'_>) -> bool {
        self.reg_request = None;

        // Config-owned slots take precedence over externally submitted
        // requests. They stay in their slot; only the state flag moves.
        if let Some(config) = ctx.config.upgrade() {
            if let Some(slot) = config.queued_reg_request() {
                self.reg_request = Some(RegRequestRef::Internal(Arc::downgrade(&slot)));
            }
        }

        if self.reg_request.is_none() {
            if let Some(request) = ctx.reg_requests.pop_front() {
                self.reg_request = Some(RegRequestRef::External(request));
            }
        }

        let Some(request) = self.reg_request.as_ref().and_then(RegRequestRef::resolve) else {
            return false;
        };

        if ctx.status.error_ack {
            fmt::warn!(
                "Slave {:#06x}: aborting register request, slave has error flag set",
                ctx.identity.station_address
            );

            request.complete(RequestState::Failure);
            self.reg_request = None;
            self.state = FsmState::Ready;

            return true;
        }

        fmt::debug!(
            "Slave {:#06x}: processing register request",
            ctx.identity.station_address
        );

        request.set_busy();

        match request.direction() {
            Direction::Input => {
                self.datagram.fprd(
                    ctx.identity.station_address,
                    request.address(),
                    request.transfer_size(),
                );
            }
            Direction::Output => {
                self.datagram.fpwr(
                    ctx.identity.station_address,
                    request.address(),
                    request.transfer_size(),
                );
                self.datagram.data_mut().copy_from_slice(&request.data());
            }
        }

        self.datagram.set_device_index(ctx.identity.device_index);
        ctx.tx.queue(ctx.handle, &mut self.datagram);
        self.state = FsmState::RegRequest;

        true
    }

    fn state_reg_request(&mut self, ctx: &mut FsmContext<'_>) {
        let Some(request) = self.reg_request.take().and_then(|r| r.resolve()) else {
            // The configuration was torn down in the meantime and the slot
            // went with it.
            self.state = FsmState::Ready;
            return;
        };

        if self.datagram.state() != DatagramState::Received {
            fmt::error!(
                "Slave {:#06x}: failed to receive register request datagram: {}",
                ctx.identity.station_address,
                self.datagram.state()
            );

            request.complete(RequestState::Failure);
            self.state = FsmState::Ready;

            return;
        }

        // Both FPRD and FPWR to a single station increment the working
        // counter by exactly one.
        if self.datagram.working_counter() == 1 {
            if request.direction() == Direction::Input {
                request.complete_read(self.datagram.data());
            } else {
                request.complete(RequestState::Success);
            }

            fmt::debug!(
                "Slave {:#06x}: register request successful",
                ctx.identity.station_address
            );
        } else {
            request.complete(RequestState::Failure);

            fmt::error!(
                "Slave {:#06x}: register request failed (working counter is {})",
                ctx.identity.station_address,
                self.datagram.working_counter()
            );
        }

        self.state = FsmState::Ready;
    }

    fn process_foe(&mut self, ctx: &mut FsmContext<'_>) -> bool {
        let Some(request) = ctx.foe_requests.pop_front() else {
            return false;
        };

        if ctx.status.error_ack {
            fmt::warn!(
                "Slave {:#06x}: aborting FoE request, slave has error flag set",
                ctx.identity.station_address
            );

            request.complete(RequestState::Failure);

            return false;
        }

        request.set_busy();

        fmt::debug!(
            "Slave {:#06x}: processing FoE request",
            ctx.identity.station_address
        );

        self.foe_request = Some(request.clone());
        self.state = FsmState::FoeRequest;

        self.transfers.foe.transfer(ctx.identity, request);
        self.transfers.foe.exec(&mut self.datagram);
        self.datagram.set_device_index(ctx.identity.device_index);
        ctx.tx.queue(ctx.handle, &mut self.datagram);

        true
    }

    fn state_foe_request(&mut self, ctx: &mut FsmContext<'_>) {
        let Some(request) = self.foe_request.clone() else {
            self.state = FsmState::Ready;
            return;
        };

        if self.transfers.foe.exec(&mut self.datagram) {
            ctx.tx.queue(ctx.handle, &mut self.datagram);
            return;
        }

        if !self.transfers.foe.success() {
            fmt::error!(
                "Slave {:#06x}: failed to handle FoE request",
                ctx.identity.station_address
            );

            request.complete(RequestState::Failure);
            self.foe_request = None;
            self.state = FsmState::Ready;

            return;
        }

        fmt::debug!(
            "Slave {:#06x}: successfully transferred {} byte(s) of FoE data",
            ctx.identity.station_address,
            request.data().len()
        );

        request.complete(RequestState::Success);
        self.foe_request = None;
        self.state = FsmState::Ready;
    }

    fn process_soe(&mut self, ctx: &mut FsmContext<'_>) -> bool {
        let Some(request) = ctx.soe_requests.pop_front() else {
            return false;
        };

        if ctx.status.error_ack {
            fmt::warn!(
                "Slave {:#06x}: aborting SoE request, slave has error flag set",
                ctx.identity.station_address
            );

            request.complete(RequestState::Failure);
            self.state = FsmState::Idle;

            return false;
        }

        if !ctx.status.mailbox_capable() {
            fmt::warn!(
                "Slave {:#06x}: aborting SoE request, slave is in INIT",
                ctx.identity.station_address
            );

            request.complete(RequestState::Failure);
            self.state = FsmState::Idle;

            return false;
        }

        request.set_busy();

        fmt::debug!(
            "Slave {:#06x}: processing SoE request",
            ctx.identity.station_address
        );

        self.soe_request = Some(request.clone());
        self.state = FsmState::SoeRequest;

        self.transfers.soe.transfer(ctx.identity, request);
        self.transfers.soe.exec(&mut self.datagram);
        self.datagram.set_device_index(ctx.identity.device_index);
        ctx.tx.queue(ctx.handle, &mut self.datagram);

        true
    }

    fn state_soe_request(&mut self, ctx: &mut FsmContext<'_>) {
        let Some(request) = self.soe_request.clone() else {
            self.state = FsmState::Ready;
            return;
        };

        if self.transfers.soe.exec(&mut self.datagram) {
            ctx.tx.queue(ctx.handle, &mut self.datagram);
            return;
        }

        if !self.transfers.soe.success() {
            fmt::error!(
                "Slave {:#06x}: failed to process SoE request",
                ctx.identity.station_address
            );

            request.complete(RequestState::Failure);
            self.soe_request = None;
            self.state = FsmState::Ready;

            return;
        }

        fmt::debug!(
            "Slave {:#06x}: finished SoE request",
            ctx.identity.station_address
        );

        request.complete(RequestState::Success);
        self.soe_request = None;
        self.state = FsmState::Ready;
    }
}
