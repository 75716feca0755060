//! Maps the executing core's hardware id to its [`LogicalId`].

use crate::directory::ProcessorDirectory;
use crate::fatal::MpFault;
use crate::ids::{HardwareId, LogicalId};
use log::trace;

/// Resolves `hardware` against the directory.
///
/// Before discovery there is no directory and the only running code is on
/// the primary core, so the answer is [`LogicalId::BOOTSTRAP`].
///
/// # Errors
/// [`MpFault::UnknownProcessor`] if the directory exists but does not list
/// `hardware`.
pub fn resolve_logical_id(
    directory: Option<&ProcessorDirectory>,
    hardware: HardwareId,
) -> Result<LogicalId, MpFault> {
    let Some(directory) = directory else {
        trace!("no processor directory yet; assuming {}", LogicalId::BOOTSTRAP);
        return Ok(LogicalId::BOOTSTRAP);
    };

    directory
        .logical_id_of(hardware)
        .ok_or(MpFault::UnknownProcessor(hardware))
}
