//! # Collaborator seams
//!
//! The MP core drives hardware it does not own. Each collaborator is a
//! trait so the same sequencing runs against the x2APIC/TSC backends in
//! [`arch`](crate::arch) on the machine and against simulated cores in tests.

use crate::boot_stub::StartupVector;
use crate::ids::{HardwareId, LogicalId};
use crate::signal::IpiMessage;
use core::time::Duration;

/// Kind of inter-processor interrupt to deliver.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Ipi {
    /// INIT: resets the target into its wait-for-startup state.
    Init,
    /// STARTUP: the target begins executing at the vector's page.
    Startup(StartupVector),
    /// Payload-free signal that makes the target read its signal slot (NMI on x86-64).
    Signal,
}

/// Interrupt controller configuration and delivery.
pub trait InterruptController: Sync {
    /// Hardware id of the core executing the call.
    fn local_hardware_id(&self) -> HardwareId;

    /// Size controller-wide structures for `processor_count` cores.
    fn configure_system(&self, processor_count: usize);

    /// Program the executing core's local controller.
    fn configure_local(&self);

    /// Program the shared controllers (I/O APICs, legacy PIC masking).
    fn configure_global(&self);

    /// Deliver `ipi` to `target`. With `wait_for_delivery` the call returns
    /// only once the controller reports the interrupt as accepted.
    fn send_ipi(&self, target: HardwareId, ipi: Ipi, wait_for_delivery: bool);

    /// Unmask interrupt delivery on the executing core.
    fn enable_local_interrupts(&self);
}

/// Monotonic counter and busy-wait service.
pub trait Timer: Sync {
    /// Current counter value.
    fn now(&self) -> u64;

    /// Number of counter units in `duration`.
    fn ticks_for(&self, duration: Duration) -> u64;

    /// Busy-wait for at least `duration`.
    fn stall(&self, duration: Duration);
}

/// Source of the MADT bytes.
pub trait FirmwareTables {
    fn madt(&self) -> Option<&[u8]>;
}

/// Receives the messages delivered to the executing core.
pub trait MessageHandler {
    fn handle(&self, message: IpiMessage);
}

impl<F: Fn(IpiMessage)> MessageHandler for F {
    fn handle(&self, message: IpiMessage) {
        self(message);
    }
}

/// Per-core setup an application processor performs on itself before it
/// reports running: interrupt table, memory attributes, syscall MSRs,
/// descriptor tables.
pub trait LocalInit {
    fn init_local(&self, id: LogicalId);
}

/// Hand-off to the scheduler.
pub trait SchedulerHandoff {
    /// Whether the scheduler has taken ownership of `id`.
    fn claimed(&self, id: LogicalId) -> bool;
}
