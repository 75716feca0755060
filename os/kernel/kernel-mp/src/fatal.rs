//! # Unrecoverable MP faults
//!
//! Nothing above this layer can repair a core that never started or a signal
//! slot in the wrong state, so every anomaly detected here ends boot. The
//! checks themselves return [`MpFault`] so they can be exercised on the host;
//! the process-wide entry points funnel every fault into [`fatal`].

use crate::ids::{HardwareId, LogicalId};
use crate::signal::SlotState;
use kernel_acpi::madt::MadtError;
use log::error;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MpFault {
    #[error("firmware provides no MADT")]
    MissingMadt,
    #[error("malformed MADT: {0}")]
    MalformedMadt(#[from] MadtError),
    #[error("MADT lists no local APICs")]
    NoProcessors,
    #[error("MADT changed between passes: counted {counted}, saved {saved}")]
    InconsistentMadt { counted: usize, saved: usize },
    #[error("hardware id {hardware} listed for both {first} and {second}")]
    DuplicateHardwareId {
        hardware: HardwareId,
        first: LogicalId,
        second: LogicalId,
    },
    #[error("processors were already discovered")]
    AlreadyDiscovered,
    #[error("processors have not been discovered yet")]
    NotDiscovered,
    #[error("{id} does not exist ({count} processors)")]
    NoSuchProcessor { id: LogicalId, count: usize },
    #[error("hardware id {0} is not a discovered processor")]
    UnknownProcessor(HardwareId),
    #[error("boot stub of {len} bytes does not fit the {capacity}-byte region")]
    BootStubTooLarge { len: usize, capacity: usize },
    #[error("boot stub address {0:#x} cannot be encoded as a startup vector")]
    InvalidStubAddress(u64),
    #[error("{id} (hardware id {hardware}) did not start within {timeout_ms} ms")]
    StartTimeout {
        id: LogicalId,
        hardware: HardwareId,
        timeout_ms: u64,
    },
    #[error("{0} is already running")]
    AlreadyRunning(LogicalId),
    #[error("{0} was never claimed by the scheduler")]
    NeverScheduled(LogicalId),
    #[error("signal slot of {target} is {found:?}, expected {expected:?}")]
    ProtocolViolation {
        target: LogicalId,
        expected: SlotState,
        found: SlotState,
    },
    #[error("signal slot of {target} holds unknown message tag {raw}")]
    UnknownMessage { target: LogicalId, raw: u8 },
}

/// Halts MP initialization. Logs the fault, then panics with it.
#[cold]
#[track_caller]
pub fn fatal(fault: MpFault) -> ! {
    error!("unrecoverable MP fault: {fault}");
    panic!("unrecoverable MP fault: {fault}");
}

/// Escalates an [`MpFault`] to [`fatal`].
pub trait OrFatal<T> {
    fn or_fatal(self) -> T;
}

impl<T> OrFatal<T> for Result<T, MpFault> {
    #[inline]
    #[track_caller]
    fn or_fatal(self) -> T {
        match self {
            Ok(v) => v,
            Err(fault) => fatal(fault),
        }
    }
}
