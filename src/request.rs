//! Typed carriers for the four classes of acyclic request a slave can
//! service: SDO, raw register, FoE and SoE.
//!
//! Requests are shared between the submitting context and the cyclic core as
//! `Arc`s. The core drives each request to exactly one terminal state
//! (`Success` or `Failure`); the submitter blocks on [`wait`](SdoRequest::wait)
//! until that happens. State transitions are monotone: once terminal, a
//! request only changes state again if its owner explicitly requeues it.

use crate::{
    datagram::MAX_DATA_SIZE,
    error::Error,
};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Lifecycle state of a request.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RequestState {
    /// On a queue, not yet picked up by the state machine.
    #[default]
    Queued,
    /// In flight: the state machine is driving it.
    Busy,
    /// Terminal: completed successfully.
    Success,
    /// Terminal: aborted or failed.
    Failure,
}

impl RequestState {
    /// Whether the request has finished, successfully or not.
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestState::Success | RequestState::Failure)
    }
}

/// Transfer direction, seen from the master.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Slave to master: register read, SDO upload, file read.
    Input,
    /// Master to slave: register write, SDO download, file write.
    Output,
}

impl Direction {
    /// Array index for per-direction storage.
    pub(crate) fn index(self) -> usize {
        match self {
            Direction::Input => 0,
            Direction::Output => 1,
        }
    }
}

#[derive(Debug)]
struct Inner<P> {
    state: RequestState,
    payload: P,
}

/// State plus payload guarded by one lock, with a condvar waking submitters
/// on terminal transitions.
#[derive(Debug)]
struct Signal<P> {
    inner: Mutex<Inner<P>>,
    done: Condvar,
}

impl<P> Signal<P> {
    fn new(payload: P) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: RequestState::Queued,
                payload,
            }),
            done: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<P>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> RequestState {
        self.lock().state
    }

    fn set_busy(&self) {
        self.lock().state = RequestState::Busy;
    }

    fn complete(&self, state: RequestState) {
        debug_assert!(state.is_terminal());

        self.lock().state = state;
        self.done.notify_all();
    }

    fn wait(&self) -> RequestState {
        let mut guard = self.lock();

        while !guard.state.is_terminal() {
            guard = self
                .done
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }

        guard.state
    }

    /// Re-arm a terminal request. Returns `false` while it is still queued
    /// or in flight.
    fn requeue(&self) -> bool {
        let mut guard = self.lock();

        if guard.state.is_terminal() {
            guard.state = RequestState::Queued;

            true
        } else {
            false
        }
    }
}

/// An SDO upload or download against a slave's object dictionary, executed
/// by the CoE transfer engine.
#[derive(Debug)]
pub struct SdoRequest {
    index: u16,
    subindex: u8,
    dir: Direction,
    signal: Signal<SdoPayload>,
}

#[derive(Debug)]
struct SdoPayload {
    data: Vec<u8>,
    abort_code: Option<u32>,
}

impl SdoRequest {
    /// An upload (read) of the given object.
    pub fn upload(index: u16, subindex: u8) -> Self {
        Self {
            index,
            subindex,
            dir: Direction::Input,
            signal: Signal::new(SdoPayload {
                data: Vec::new(),
                abort_code: None,
            }),
        }
    }

    /// A download (write) of the given object.
    pub fn download(index: u16, subindex: u8, data: Vec<u8>) -> Self {
        Self {
            index,
            subindex,
            dir: Direction::Output,
            signal: Signal::new(SdoPayload {
                data,
                abort_code: None,
            }),
        }
    }

    /// Object index.
    pub fn index(&self) -> u16 {
        self.index
    }

    /// Object subindex.
    pub fn subindex(&self) -> u8 {
        self.subindex
    }

    /// Transfer direction.
    pub fn direction(&self) -> Direction {
        self.dir
    }

    /// Current state.
    pub fn state(&self) -> RequestState {
        self.signal.state()
    }

    /// Block until the request reaches a terminal state.
    pub fn wait(&self) -> RequestState {
        self.signal.wait()
    }

    /// Copy of the payload: downloaded bytes, or the uploaded value once the
    /// request succeeded.
    pub fn data(&self) -> Vec<u8> {
        self.signal.lock().payload.data.clone()
    }

    /// CoE abort code of a failed transfer, if the slave sent one.
    pub fn abort_code(&self) -> Option<u32> {
        self.signal.lock().payload.abort_code
    }

    /// Store the uploaded value. Called by the CoE transfer engine.
    pub fn set_data(&self, data: Vec<u8>) {
        self.signal.lock().payload.data = data;
    }

    /// Record the abort code of a refused transfer. Called by the CoE
    /// transfer engine.
    pub fn set_abort_code(&self, code: u32) {
        self.signal.lock().payload.abort_code = Some(code);
    }

    pub(crate) fn set_busy(&self) {
        self.signal.set_busy();
    }

    pub(crate) fn complete(&self, state: RequestState) {
        self.signal.complete(state);
    }
}

/// A raw read or write of a slave's physical register space, executed
/// directly by the request state machine as a single FPRD/FPWR datagram.
#[derive(Debug)]
pub struct RegRequest {
    address: u16,
    dir: Direction,
    transfer_size: usize,
    signal: Signal<Vec<u8>>,
}

impl RegRequest {
    /// A register read of `size` bytes starting at `address`.
    pub fn read(address: u16, size: usize) -> Result<Self, Error> {
        if size > MAX_DATA_SIZE {
            return Err(Error::DataTooLong {
                requested: size,
                max: MAX_DATA_SIZE,
            });
        }

        Ok(Self {
            address,
            dir: Direction::Input,
            transfer_size: size,
            signal: Signal::new(vec![0; size]),
        })
    }

    /// A register write of `data` starting at `address`.
    pub fn write(address: u16, data: Vec<u8>) -> Result<Self, Error> {
        if data.len() > MAX_DATA_SIZE {
            return Err(Error::DataTooLong {
                requested: data.len(),
                max: MAX_DATA_SIZE,
            });
        }

        Ok(Self {
            address,
            dir: Direction::Output,
            transfer_size: data.len(),
            signal: Signal::new(data),
        })
    }

    /// Slave-local register address.
    pub fn address(&self) -> u16 {
        self.address
    }

    /// Transfer direction.
    pub fn direction(&self) -> Direction {
        self.dir
    }

    /// Transfer size in bytes.
    pub fn transfer_size(&self) -> usize {
        self.transfer_size
    }

    /// Current state.
    pub fn state(&self) -> RequestState {
        self.signal.state()
    }

    /// Block until the request reaches a terminal state.
    pub fn wait(&self) -> RequestState {
        self.signal.wait()
    }

    /// Copy of the payload. For a read, valid once the request succeeded.
    pub fn data(&self) -> Vec<u8> {
        self.signal.lock().payload.clone()
    }

    /// Replace the payload of a persistent write slot before requeueing it.
    ///
    /// The length must match the slot's transfer size.
    pub fn set_data(&self, data: &[u8]) {
        let mut guard = self.signal.lock();

        debug_assert_eq!(data.len(), self.transfer_size);

        guard.payload.clear();
        guard.payload.extend_from_slice(data);
    }

    /// Re-arm a terminal request so the state machine picks it up again.
    ///
    /// This is how the persistent, config-owned register slots are
    /// re-submitted. Returns `false` while the slot is still in flight.
    pub fn requeue(&self) -> bool {
        self.signal.requeue()
    }

    pub(crate) fn set_busy(&self) {
        self.signal.set_busy();
    }

    pub(crate) fn complete(&self, state: RequestState) {
        self.signal.complete(state);
    }

    /// Store the bytes read back from the slave and mark the request
    /// successful.
    pub(crate) fn complete_read(&self, bytes: &[u8]) {
        let mut guard = self.signal.lock();

        let len = bytes.len().min(guard.payload.len());
        guard.payload[..len].copy_from_slice(&bytes[..len]);
        guard.state = RequestState::Success;

        drop(guard);

        self.signal.done.notify_all();
    }
}

/// Longest FoE file name carried on the wire.
pub const FOE_FILE_NAME_LEN: usize = 32;

/// A file transfer over the mailbox (FoE), typically firmware, executed by
/// the FoE transfer engine over many cycles.
#[derive(Debug)]
pub struct FoeRequest {
    file_name: heapless::String<FOE_FILE_NAME_LEN>,
    password: u32,
    dir: Direction,
    signal: Signal<FoePayload>,
}

#[derive(Debug)]
struct FoePayload {
    data: Vec<u8>,
    error_code: Option<u32>,
}

impl FoeRequest {
    /// Read the named file from the slave.
    pub fn read(file_name: &str, password: u32) -> Result<Self, Error> {
        Ok(Self {
            file_name: heapless::String::try_from(file_name).map_err(|_| Error::StringTooLong)?,
            password,
            dir: Direction::Input,
            signal: Signal::new(FoePayload {
                data: Vec::new(),
                error_code: None,
            }),
        })
    }

    /// Write `data` to the named file on the slave.
    pub fn write(file_name: &str, password: u32, data: Vec<u8>) -> Result<Self, Error> {
        Ok(Self {
            file_name: heapless::String::try_from(file_name).map_err(|_| Error::StringTooLong)?,
            password,
            dir: Direction::Output,
            signal: Signal::new(FoePayload {
                data,
                error_code: None,
            }),
        })
    }

    /// File name.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// FoE password.
    pub fn password(&self) -> u32 {
        self.password
    }

    /// Transfer direction.
    pub fn direction(&self) -> Direction {
        self.dir
    }

    /// Current state.
    pub fn state(&self) -> RequestState {
        self.signal.state()
    }

    /// Block until the request reaches a terminal state.
    pub fn wait(&self) -> RequestState {
        self.signal.wait()
    }

    /// Copy of the payload: the file content for writes, or the received
    /// file once a read succeeded.
    pub fn data(&self) -> Vec<u8> {
        self.signal.lock().payload.data.clone()
    }

    /// FoE error code of a failed transfer, if the slave sent one.
    pub fn error_code(&self) -> Option<u32> {
        self.signal.lock().payload.error_code
    }

    /// Store the received file content. Called by the FoE transfer engine.
    pub fn set_data(&self, data: Vec<u8>) {
        self.signal.lock().payload.data = data;
    }

    /// Record the error code of a refused transfer. Called by the FoE
    /// transfer engine.
    pub fn set_error_code(&self, code: u32) {
        self.signal.lock().payload.error_code = Some(code);
    }

    pub(crate) fn set_busy(&self) {
        self.signal.set_busy();
    }

    pub(crate) fn complete(&self, state: RequestState) {
        self.signal.complete(state);
    }
}

/// A servo drive parameter (IDN) read or write over the mailbox (SoE),
/// executed by the SoE transfer engine.
#[derive(Debug)]
pub struct SoeRequest {
    drive_no: u8,
    idn: u16,
    dir: Direction,
    signal: Signal<SoePayload>,
}

#[derive(Debug)]
struct SoePayload {
    data: Vec<u8>,
    error_code: Option<u16>,
}

impl SoeRequest {
    /// Read the given IDN from a drive.
    pub fn read(drive_no: u8, idn: u16) -> Self {
        Self {
            drive_no,
            idn,
            dir: Direction::Input,
            signal: Signal::new(SoePayload {
                data: Vec::new(),
                error_code: None,
            }),
        }
    }

    /// Write `data` to the given IDN of a drive.
    pub fn write(drive_no: u8, idn: u16, data: Vec<u8>) -> Self {
        Self {
            drive_no,
            idn,
            dir: Direction::Output,
            signal: Signal::new(SoePayload {
                data,
                error_code: None,
            }),
        }
    }

    /// Drive number.
    pub fn drive_no(&self) -> u8 {
        self.drive_no
    }

    /// Parameter identification number.
    pub fn idn(&self) -> u16 {
        self.idn
    }

    /// Transfer direction.
    pub fn direction(&self) -> Direction {
        self.dir
    }

    /// Current state.
    pub fn state(&self) -> RequestState {
        self.signal.state()
    }

    /// Block until the request reaches a terminal state.
    pub fn wait(&self) -> RequestState {
        self.signal.wait()
    }

    /// Copy of the payload.
    pub fn data(&self) -> Vec<u8> {
        self.signal.lock().payload.data.clone()
    }

    /// SoE error code of a failed transfer, if the drive sent one.
    pub fn error_code(&self) -> Option<u16> {
        self.signal.lock().payload.error_code
    }

    /// Store the value read from the drive. Called by the SoE transfer
    /// engine.
    pub fn set_data(&self, data: Vec<u8>) {
        self.signal.lock().payload.data = data;
    }

    /// Record the error code of a refused transfer. Called by the SoE
    /// transfer engine.
    pub fn set_error_code(&self, code: u16) {
        self.signal.lock().payload.error_code = Some(code);
    }

    pub(crate) fn set_busy(&self) {
        self.signal.set_busy();
    }

    pub(crate) fn complete(&self, state: RequestState) {
        self.signal.complete(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn terminal_states() {
        assert!(!RequestState::Queued.is_terminal());
        assert!(!RequestState::Busy.is_terminal());
        assert!(RequestState::Success.is_terminal());
        assert!(RequestState::Failure.is_terminal());
    }

    #[test]
    fn reg_read_too_long() {
        assert!(matches!(
            RegRequest::read(0x0000, MAX_DATA_SIZE + 1),
            Err(Error::DataTooLong {
                requested,
                max: MAX_DATA_SIZE
            }) if requested == MAX_DATA_SIZE + 1
        ));
    }

    #[test]
    fn monotone_lifecycle() {
        let request = RegRequest::write(0x0130, vec![0x04, 0x00]).unwrap();

        assert_eq!(request.state(), RequestState::Queued);

        request.set_busy();
        assert_eq!(request.state(), RequestState::Busy);

        request.complete(RequestState::Success);
        assert_eq!(request.state(), RequestState::Success);
    }

    #[test]
    fn requeue_only_when_terminal() {
        let request = RegRequest::read(0x0130, 2).unwrap();

        assert!(!request.requeue());

        request.set_busy();
        request.complete(RequestState::Failure);

        assert!(request.requeue());
        assert_eq!(request.state(), RequestState::Queued);
    }

    #[test]
    fn wait_wakes_submitter() {
        let request = Arc::new(SdoRequest::upload(0x1018, 1));

        let waiter = {
            let request = request.clone();

            std::thread::spawn(move || request.wait())
        };

        request.set_busy();
        request.set_data(vec![0xad, 0xde]);
        request.complete(RequestState::Success);

        assert_eq!(waiter.join().unwrap(), RequestState::Success);
        assert_eq!(request.data(), vec![0xad, 0xde]);
    }

    #[test]
    fn complete_read_fills_buffer() {
        let request = RegRequest::read(0x0130, 2).unwrap();

        request.set_busy();
        request.complete_read(&[0x08, 0x00]);

        assert_eq!(request.state(), RequestState::Success);
        assert_eq!(request.data(), vec![0x08, 0x00]);
    }

    #[test]
    fn foe_file_name_too_long() {
        let long = "a".repeat(FOE_FILE_NAME_LEN + 1);

        assert!(matches!(
            FoeRequest::read(&long, 0),
            Err(Error::StringTooLong)
        ));
    }
}
