//! # Process-wide MP state
//!
//! The kernel discovers processors once, early on the primary core, and then
//! reads the result from every core for the rest of its life. [`MpState`]
//! bundles the directory and signal table built by discovery; the free
//! functions below operate on the single instance kept in [`MP_STATE`] and
//! escalate every fault to [`fatal`](crate::fatal::fatal).
//!
//! [`MpState`] is also usable on its own, which is how the sequencing is
//! exercised without touching the global.

use crate::boot_stub::{BootStub, PhysMapRw, StartupVector, install_boot_stub_low};
use crate::bringup;
use crate::directory::ProcessorDirectory;
use crate::fatal::{MpFault, OrFatal};
use crate::identity::resolve_logical_id;
use crate::ids::LogicalId;
use crate::platform::{
    FirmwareTables, InterruptController, LocalInit, MessageHandler, SchedulerHandoff, Timer,
};
use crate::signal::{IpiMessage, SignalTable};
use kernel_acpi::madt::Madt;
use kernel_sync::SyncOnceCell;
use log::info;

/// Directory and signal slots, sized identically and never resized.
#[derive(Debug)]
pub struct MpState {
    directory: ProcessorDirectory,
    signals: SignalTable,
}

impl MpState {
    /// Pairs `directory` with a fresh signal table of the same size.
    #[must_use]
    pub fn new(directory: ProcessorDirectory) -> Self {
        let signals = SignalTable::new(directory.len());
        Self { directory, signals }
    }

    /// Parses `madt`, builds the directory and configures the interrupt
    /// controllers for the discovered core count.
    ///
    /// # Errors
    /// [`MpFault::MalformedMadt`] and the directory faults of
    /// [`ProcessorDirectory::discover`].
    pub fn discover(madt: &[u8], controller: &impl InterruptController) -> Result<Self, MpFault> {
        let madt = Madt::parse(madt)?;
        let state = Self::new(ProcessorDirectory::discover(&madt)?);

        controller.configure_system(state.processor_count());
        controller.configure_local();
        controller.configure_global();

        info!("{} processor(s) discovered", state.processor_count());
        Ok(state)
    }

    #[inline]
    #[must_use]
    pub const fn directory(&self) -> &ProcessorDirectory {
        &self.directory
    }

    #[inline]
    #[must_use]
    pub const fn signals(&self) -> &SignalTable {
        &self.signals
    }

    #[inline]
    #[must_use]
    pub fn processor_count(&self) -> usize {
        self.directory.len()
    }

    /// Logical id of the executing core.
    ///
    /// # Errors
    /// [`MpFault::UnknownProcessor`] if the core was not discovered.
    pub fn current_logical_id(
        &self,
        controller: &impl InterruptController,
    ) -> Result<LogicalId, MpFault> {
        resolve_logical_id(Some(&self.directory), controller.local_hardware_id())
    }

    /// See [`bringup::start_all_processors`].
    ///
    /// # Errors
    /// [`MpFault::StartTimeout`] for the first core that does not come up.
    pub fn start_all_processors(
        &self,
        controller: &impl InterruptController,
        timer: &impl Timer,
        vector: StartupVector,
    ) -> Result<(), MpFault> {
        bringup::start_all_processors(&self.directory, controller, timer, vector)
    }

    /// See [`bringup::ap_startup`].
    ///
    /// # Errors
    /// As [`bringup::ap_startup`].
    pub fn ap_startup(
        &self,
        controller: &impl InterruptController,
        timer: &impl Timer,
        local: &impl LocalInit,
        handoff: &impl SchedulerHandoff,
    ) -> Result<LogicalId, MpFault> {
        bringup::ap_startup(&self.directory, controller, timer, local, handoff)
    }

    /// Delivers `message` to `target` and waits for its acknowledgement.
    ///
    /// # Errors
    /// As [`SignalTable::send`].
    pub fn signal(
        &self,
        controller: &impl InterruptController,
        target: LogicalId,
        message: IpiMessage,
    ) -> Result<(), MpFault> {
        self.signals
            .send(&self.directory, controller, target, message)
    }

    /// Signal interrupt entry for the executing core.
    ///
    /// # Errors
    /// As [`SignalTable::receive`], plus [`MpFault::UnknownProcessor`].
    pub fn receive(
        &self,
        controller: &impl InterruptController,
        handler: &impl MessageHandler,
    ) -> Result<IpiMessage, MpFault> {
        let this = self.current_logical_id(controller)?;
        self.signals.receive(this, handler)
    }
}

/// Set once by [`discover_processors`].
static MP_STATE: SyncOnceCell<MpState> = SyncOnceCell::new();

/// The discovered state, if discovery has run.
#[inline]
#[must_use]
pub fn mp_state() -> Option<&'static MpState> {
    MP_STATE.get()
}

fn discovered() -> Result<&'static MpState, MpFault> {
    mp_state().ok_or(MpFault::NotDiscovered)
}

/// Discovers the processors listed in the firmware's MADT, configures the
/// interrupt controllers and publishes the result for all cores.
///
/// # Panics
/// Via [`fatal`](crate::fatal::fatal) if the MADT is missing or malformed,
/// lists no usable processors, or discovery already ran.
pub fn discover_processors(
    tables: &impl FirmwareTables,
    controller: &impl InterruptController,
) -> &'static MpState {
    try_discover(tables, controller).or_fatal()
}

fn try_discover(
    tables: &impl FirmwareTables,
    controller: &impl InterruptController,
) -> Result<&'static MpState, MpFault> {
    if MP_STATE.is_initialized() {
        return Err(MpFault::AlreadyDiscovered);
    }

    let madt = tables.madt().ok_or(MpFault::MissingMadt)?;
    let state = MpState::discover(madt, controller)?;
    MP_STATE.set(state).map_err(|_| MpFault::AlreadyDiscovered)
}

/// Number of discovered processors; zero before discovery.
#[inline]
#[must_use]
pub fn processor_count() -> usize {
    mp_state().map_or(0, MpState::processor_count)
}

/// Logical id of the executing core; [`LogicalId::BOOTSTRAP`] before discovery.
///
/// # Panics
/// Via [`fatal`](crate::fatal::fatal) if the core is not in the directory.
#[must_use]
pub fn current_logical_id(controller: &impl InterruptController) -> LogicalId {
    resolve_logical_id(mp_state().map(MpState::directory), controller.local_hardware_id())
        .or_fatal()
}

/// Copies `stub` to the fixed low-memory page and returns its startup vector.
///
/// # Panics
/// Via [`fatal`](crate::fatal::fatal) if the stub does not fit the page.
///
/// # Safety
/// Nothing else may use the page at
/// [`AP_BOOT_STUB_ADDR`](crate::boot_stub::AP_BOOT_STUB_ADDR).
pub unsafe fn install_boot_stub(map: &impl PhysMapRw, stub: &BootStub<'_>) -> StartupVector {
    unsafe { install_boot_stub_low(map, stub) }.or_fatal()
}

/// Brings up every discovered application processor.
///
/// # Panics
/// Via [`fatal`](crate::fatal::fatal) before discovery or when a core fails
/// to start in time.
pub fn start_all_processors(
    controller: &impl InterruptController,
    timer: &impl Timer,
    vector: StartupVector,
) {
    discovered()
        .and_then(|state| state.start_all_processors(controller, timer, vector))
        .or_fatal();
}

/// Entry point for an application processor leaving the boot stub.
///
/// # Panics
/// Via [`fatal`](crate::fatal::fatal) if the core is unknown, already
/// running, or never claimed by the scheduler.
pub fn ap_startup(
    controller: &impl InterruptController,
    timer: &impl Timer,
    local: &impl LocalInit,
    handoff: &impl SchedulerHandoff,
) -> LogicalId {
    discovered()
        .and_then(|state| state.ap_startup(controller, timer, local, handoff))
        .or_fatal()
}

/// Sends `message` to `target` and blocks until it is acknowledged.
///
/// # Panics
/// Via [`fatal`](crate::fatal::fatal) before discovery, for an unknown
/// target, or on a protocol violation.
pub fn signal_processor(
    controller: &impl InterruptController,
    target: LogicalId,
    message: IpiMessage,
) {
    discovered()
        .and_then(|state| state.signal(controller, target, message))
        .or_fatal();
}

/// Signal interrupt handler body. Dispatches the pending message to
/// `handler` and acknowledges it.
///
/// # Panics
/// Via [`fatal`](crate::fatal::fatal) if no message is pending.
pub fn receive_signal_interrupt(
    controller: &impl InterruptController,
    handler: &impl MessageHandler,
) -> IpiMessage {
    discovered()
        .and_then(|state| state.receive(controller, handler))
        .or_fatal()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::tests::madt_bytes;
    use crate::ids::HardwareId;
    use crate::platform::Ipi;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<&'static str>>,
        system_size: Mutex<Option<usize>>,
    }

    impl InterruptController for Recording {
        fn local_hardware_id(&self) -> HardwareId {
            HardwareId::new(2)
        }

        fn configure_system(&self, processor_count: usize) {
            *self.system_size.lock().unwrap() = Some(processor_count);
            self.calls.lock().unwrap().push("system");
        }

        fn configure_local(&self) {
            self.calls.lock().unwrap().push("local");
        }

        fn configure_global(&self) {
            self.calls.lock().unwrap().push("global");
        }

        fn send_ipi(&self, _: HardwareId, _: Ipi, _: bool) {}

        fn enable_local_interrupts(&self) {}
    }

    #[test]
    fn discovery_configures_controllers_in_order() {
        let ctl = Recording::default();
        let state = MpState::discover(&madt_bytes(&[0, 2, 4]), &ctl).unwrap();

        assert_eq!(state.processor_count(), 3);
        assert_eq!(state.signals().len(), 3);
        assert_eq!(*ctl.calls.lock().unwrap(), ["system", "local", "global"]);
        assert_eq!(*ctl.system_size.lock().unwrap(), Some(3));
    }

    #[test]
    fn malformed_madt_configures_nothing() {
        let ctl = Recording::default();
        let mut bytes = madt_bytes(&[0, 1]);
        bytes[9] = bytes[9].wrapping_add(1);

        let err = MpState::discover(&bytes, &ctl).unwrap_err();

        assert!(matches!(err, MpFault::MalformedMadt(_)));
        assert!(ctl.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn executing_core_resolves_through_the_directory() {
        let ctl = Recording::default();
        let state = MpState::discover(&madt_bytes(&[0, 2, 4]), &ctl).unwrap();
        assert_eq!(state.current_logical_id(&ctl), Ok(LogicalId::new(1)));
    }

    #[test]
    fn unknown_target_is_rejected_before_any_ipi() {
        let ctl = Recording::default();
        let state = MpState::discover(&madt_bytes(&[0, 2]), &ctl).unwrap();

        let err = state
            .signal(&ctl, LogicalId::new(5), IpiMessage::Resume)
            .unwrap_err();

        assert_eq!(
            err,
            MpFault::NoSuchProcessor {
                id: LogicalId::new(5),
                count: 2,
            }
        );
    }
}
