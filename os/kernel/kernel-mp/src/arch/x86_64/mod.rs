//! x86-64 backends: x2APIC interrupt controller and TSC timer.

mod icr;
mod msr;
mod tsc;
mod x2apic;

pub use icr::{DeliveryMode, DestinationShorthand, InterruptCommand};
pub use tsc::{TscTimer, rdtsc};
pub use x2apic::X2Apic;
