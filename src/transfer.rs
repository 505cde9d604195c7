//! The capability interface of the mailbox transfer engines (CoE, FoE,
//! SoE).
//!
//! The per-slave request state machine drives every mailbox protocol through
//! this one shape: bind a request with [`Transfer::transfer`], then call
//! [`Transfer::exec`] once per cycle until it reports completion, and
//! finally read the verdict from [`Transfer::success`]. The engines' internal
//! states are opaque to the state machine.

use crate::{datagram::Datagram, slave::SlaveIdentity};
use std::sync::Arc;

/// A multi-step mailbox exchange engine for one request class.
///
/// `R` is the request type the engine consumes ([`SdoRequest`](crate::SdoRequest),
/// [`FoeRequest`](crate::FoeRequest) or [`SoeRequest`](crate::SoeRequest)).
pub trait Transfer<R>: Send {
    /// Bind the engine to a new request. One-shot initialisation; the
    /// previous transfer must have finished.
    fn transfer(&mut self, slave: SlaveIdentity, request: Arc<R>);

    /// Advance the exchange by one step.
    ///
    /// While the transfer is running this prepares the next outgoing frame
    /// in `datagram` and returns `true`; the caller queues the datagram and
    /// calls `exec` again next cycle, after the round trip completed.
    /// Returns `false` once the transfer reached a terminal state. Calling
    /// `exec` again after that must keep returning `false` without touching
    /// the datagram.
    fn exec(&mut self, datagram: &mut Datagram) -> bool;

    /// Whether the finished transfer succeeded.
    ///
    /// Only meaningful after [`exec`](Transfer::exec) returned `false`.
    fn success(&self) -> bool;
}

/// An engine for a protocol the slave (or the master build) does not
/// support. Fails every request immediately.
#[derive(Debug, Default)]
pub struct Unsupported;

impl<R> Transfer<R> for Unsupported {
    fn transfer(&mut self, _slave: SlaveIdentity, _request: Arc<R>) {}

    fn exec(&mut self, _datagram: &mut Datagram) -> bool {
        false
    }

    fn success(&self) -> bool {
        false
    }
}

/// The three mailbox engines of one slave.
pub struct Transfers {
    /// CoE engine servicing SDO requests.
    pub coe: Box<dyn Transfer<crate::SdoRequest>>,
    /// FoE engine servicing file requests.
    pub foe: Box<dyn Transfer<crate::FoeRequest>>,
    /// SoE engine servicing drive parameter requests.
    pub soe: Box<dyn Transfer<crate::SoeRequest>>,
}

impl Transfers {
    /// Engines that fail every mailbox request. Register access still works;
    /// use this for slaves without mailbox support.
    pub fn unsupported() -> Self {
        Self {
            coe: Box::new(Unsupported),
            foe: Box::new(Unsupported),
            soe: Box::new(Unsupported),
        }
    }
}

impl core::fmt::Debug for Transfers {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Transfers").finish_non_exhaustive()
    }
}
