//! Error type for the event core.

use thiserror::Error;

use crate::device::{Location, ModuleType};

/// Failures reported by registration, allocation and polling.
///
/// Allocation and registration failures are always returned to the caller.
/// Bulk operations stop at the first failure and leave already applied
/// state in place.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Bad module, event, location, index or mask combination.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No free broadcast channel or shim internal-event slot.
    #[error("no free broadcast resource for {module} module at {location}")]
    ResourceExhausted {
        location: Location,
        module: ModuleType,
    },

    /// A different callback is already bound.
    #[error("event {event} of {module} module is registered with a different callback")]
    AlreadyRegistered {
        module: ModuleType,
        event: u8,
    },

    /// A poll-until operation never saw the expected value.
    #[error("timed out polling register 0x{address:X}")]
    HardwareTimeout {
        address: u64,
    },
}

pub type Result<T> = std::result::Result<T, EventError>;
