use core::fmt;

/// Top level error type for configuration-time failures.
///
/// Cyclic-path problems (lost datagrams, working counter mismatches, slave
/// refusals) are never surfaced through this type. They are recorded on the
/// offending request or reflected in the owning domain's health counters.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// A payload is larger than what fits into a single datagram.
    DataTooLong {
        /// Requested payload length in bytes.
        requested: usize,
        /// Maximum payload length in bytes.
        max: usize,
    },
    /// The domain's FMMU layout is frozen; no more configurations can be
    /// added and `finish` cannot run twice.
    DomainFinished,
    /// The externally supplied process data image is smaller than the
    /// domain's mapped size.
    ExternalMemoryTooSmall {
        /// Provided buffer length in bytes.
        provided: usize,
        /// Required buffer length in bytes.
        required: usize,
    },
    /// Slave index not found.
    SlaveNotFound(usize),
    /// Domain index not found.
    DomainNotFound(usize),
    /// No slave configuration matched the given identification.
    SlaveConfigNotFound,
    /// A PDO entry was not found in the slave configuration's mapping.
    PdoEntryNotFound {
        /// Object index.
        index: u16,
        /// Object subindex.
        subindex: u8,
    },
    /// A PDO entry lies outside the byte range already mapped for its slave
    /// configuration in this domain.
    PdoEntryOutOfRange,
    /// A visible string (e.g. an FoE file name) exceeds its wire length.
    StringTooLong,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::DataTooLong { requested, max } => write!(
                f,
                "payload of {} bytes exceeds datagram capacity of {} bytes",
                requested, max
            ),
            Error::DomainFinished => f.write_str("domain layout is already finished"),
            Error::ExternalMemoryTooSmall { provided, required } => write!(
                f,
                "external memory of {} bytes is smaller than the {} byte image",
                provided, required
            ),
            Error::SlaveNotFound(index) => write!(f, "slave {} not found", index),
            Error::DomainNotFound(index) => write!(f, "domain {} not found", index),
            Error::SlaveConfigNotFound => f.write_str("no matching slave configuration"),
            Error::PdoEntryNotFound { index, subindex } => write!(
                f,
                "PDO entry {:#06x}:{:02} is not part of the configured mapping",
                index, subindex
            ),
            Error::PdoEntryOutOfRange => {
                f.write_str("PDO entry lies outside the mapped process data range")
            }
            Error::StringTooLong => f.write_str("string exceeds its maximum wire length"),
        }
    }
}

impl std::error::Error for Error {}
