//! # Multi-processor bring-up and signaling
//!
//! Discovers the cores listed in the firmware's MADT, wakes every application
//! processor through an INIT/STARTUP sequence and lets cores interrupt each
//! other with a small set of control messages.
//!
//! ## Boot flow
//!
//! ```text
//! primary core                                     each application processor
//! ────────────                                     ──────────────────────────
//! system::discover_processors     ProcessorDirectory + SignalTable, controllers configured
//! system::install_boot_stub       real-mode stub copied to 0x1000
//! system::start_all_processors ─▶ INIT, 10 ms, STARTUP ─▶ boot stub
//!                                                   system::ap_startup
//!      ◀──────────────── running = true ──────────  local init, LAPIC, sti
//! interrupts enabled                                wait for the scheduler
//! ```
//!
//! After bring-up any core can call [`system::signal_processor`]; the target
//! runs [`system::receive_signal_interrupt`] from its signal (NMI) handler.
//!
//! ## Modules
//!
//! * [`directory`]: logical id ↔ hardware id table with `running` flags.
//! * [`boot_stub`]: placement of the real-mode startup code in low memory.
//! * [`bringup`]: the wake-up sequencer and the AP entry path.
//! * [`signal`]: the per-core mailbox protocol behind inter-processor signals.
//! * [`identity`]: "which core am I" resolution.
//! * [`platform`]: traits for the interrupt controller, timer and firmware tables.
//! * [`firmware`]: the MADT located through the ACPI root pointer.
//! * [`system`]: the process-wide instance and its fatal-on-error entry points.
//! * `arch`: x2APIC and TSC implementations of the [`platform`] traits (x86-64 only).
//!
//! Faults are values of [`MpFault`]. The `system` functions escalate them to
//! [`fatal`], which logs and panics; the underlying operations return them so
//! the kernel (and the tests) can inspect them.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(target_arch = "x86_64")]
pub mod arch;
pub mod boot_stub;
pub mod bringup;
pub mod directory;
pub mod fatal;
pub mod firmware;
pub mod identity;
pub mod ids;
pub mod platform;
pub mod signal;
pub mod system;

pub use boot_stub::{BootStub, PhysMapRw, StartupVector};
pub use directory::{ProcessorDirectory, ProcessorRecord};
pub use fatal::{MpFault, OrFatal, fatal};
pub use firmware::AcpiFirmware;
pub use ids::{HardwareId, LogicalId};
pub use platform::{
    FirmwareTables, InterruptController, Ipi, LocalInit, MessageHandler, SchedulerHandoff, Timer,
};
pub use signal::{IpiMessage, SignalSlot, SignalTable, SlotState};
pub use system::MpState;
