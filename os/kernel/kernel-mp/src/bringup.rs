//! # AP Bring-up Sequencer
//!
//! Runs once on the primary core after discovery, controller configuration
//! and stub installation. Cores are started one at a time, in ascending
//! logical id order:
//!
//! ```text
//! primary                                   application processor
//! ───────                                   ─────────────────────
//! INIT IPI ───────────────────────────────▶ reset, wait for STARTUP
//! stall 10 ms
//! STARTUP IPI (vector) ───────────────────▶ boot stub at vector << 12
//! poll `running` (≤ 1 s)                    → long mode → ap_startup()
//!                                             local init, configure LAPIC
//!        ◀──────────────────────────────────  running = true
//! next core …
//! enable interrupts (after the last core)
//! ```
//!
//! Interrupts on the primary stay masked until every core reports running.

use crate::boot_stub::StartupVector;
use crate::directory::{ProcessorDirectory, ProcessorRecord};
use crate::fatal::MpFault;
use crate::identity::resolve_logical_id;
use crate::ids::LogicalId;
use crate::platform::{InterruptController, Ipi, LocalInit, SchedulerHandoff, Timer};
use core::time::Duration;
use kernel_sync::spin_until_deadline;
use log::{debug, info, trace};

/// Delay between the INIT and the STARTUP IPI.
pub const INIT_SETTLE_DELAY: Duration = Duration::from_millis(10);

/// How long the primary waits for a woken core to report running.
pub const AP_START_TIMEOUT: Duration = Duration::from_secs(1);

/// How long a started core waits for the scheduler to claim it.
pub const AP_CLAIM_TIMEOUT: Duration = Duration::from_secs(2);

/// Wakes every discovered core and waits for each to report running.
///
/// The executing core's own record is marked running directly. On success
/// the primary's local interrupts are enabled.
///
/// # Errors
/// [`MpFault::StartTimeout`] for the first core that does not report
/// running within [`AP_START_TIMEOUT`]. Cores started before it stay running;
/// interrupts stay masked.
pub fn start_all_processors(
    directory: &ProcessorDirectory,
    controller: &impl InterruptController,
    timer: &impl Timer,
    vector: StartupVector,
) -> Result<(), MpFault> {
    let this_core = controller.local_hardware_id();
    let wait_ticks = timer.ticks_for(AP_START_TIMEOUT);

    info!(
        "starting {} processor(s) from hardware id {this_core}",
        directory.len()
    );

    for record in directory {
        debug!("{}: hardware id {}", record.id(), record.hardware_id());

        if record.hardware_id() == this_core {
            trace!("{} is the executing core", record.id());
            record.mark_running();
            continue;
        }

        start_processor(record, controller, timer, vector, wait_ticks)?;
        info!("{} is running", record.id());
    }

    info!("all {} processor(s) running; enabling interrupts", directory.len());
    controller.enable_local_interrupts();
    Ok(())
}

/// Sends the INIT/STARTUP pair to one core and waits for its flag.
fn start_processor(
    record: &ProcessorRecord,
    controller: &impl InterruptController,
    timer: &impl Timer,
    vector: StartupVector,
    wait_ticks: u64,
) -> Result<(), MpFault> {
    let target = record.hardware_id();

    trace!("{}: INIT", record.id());
    controller.send_ipi(target, Ipi::Init, true);

    timer.stall(INIT_SETTLE_DELAY);

    trace!("{}: STARTUP vector {:#x}", record.id(), vector.as_u8());
    controller.send_ipi(target, Ipi::Startup(vector), true);

    let deadline = timer.now().saturating_add(wait_ticks);
    spin_until_deadline(|| timer.now(), deadline, || record.is_running()).map_err(|_| {
        MpFault::StartTimeout {
            id: record.id(),
            hardware: target,
            timeout_ms: u64::try_from(AP_START_TIMEOUT.as_millis()).unwrap_or(u64::MAX),
        }
    })
}

/// First kernel code on a freshly woken application processor.
///
/// Performs the core's self-initialization, reports it running, enables its
/// interrupts and then waits for the scheduler. Returns the core's logical id
/// once it has been claimed; the caller then enters the scheduler.
///
/// # Errors
/// [`MpFault::UnknownProcessor`] if this core was never discovered,
/// [`MpFault::AlreadyRunning`] if it was started twice, and
/// [`MpFault::NeverScheduled`] if it is not claimed within [`AP_CLAIM_TIMEOUT`].
pub fn ap_startup(
    directory: &ProcessorDirectory,
    controller: &impl InterruptController,
    timer: &impl Timer,
    local: &impl LocalInit,
    handoff: &impl SchedulerHandoff,
) -> Result<LogicalId, MpFault> {
    let id = resolve_logical_id(Some(directory), controller.local_hardware_id())?;
    let record = directory.record(id)?;
    if record.is_running() {
        return Err(MpFault::AlreadyRunning(id));
    }

    local.init_local(id);
    controller.configure_local();

    record.mark_running();
    controller.enable_local_interrupts();

    debug!("{id}: waiting for scheduling");
    let deadline = timer.now().saturating_add(timer.ticks_for(AP_CLAIM_TIMEOUT));
    spin_until_deadline(|| timer.now(), deadline, || handoff.claimed(id))
        .map_err(|_| MpFault::NeverScheduled(id))?;

    Ok(id)
}
