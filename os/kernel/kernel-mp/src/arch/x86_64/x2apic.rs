//! x2APIC [`InterruptController`].
//!
//! All registers are MSRs. The local APIC is switched into x2APIC mode by
//! [`configure_local`](InterruptController::configure_local) on every core,
//! the primary during discovery and each application processor in
//! [`ap_startup`](crate::bringup::ap_startup).

use super::icr::{DeliveryMode, InterruptCommand};
use super::msr::{rdmsr, wrmsr};
use crate::ids::HardwareId;
use crate::platform::{InterruptController, Ipi};
use log::{debug, info, trace};

const IA32_APIC_BASE: u32 = 0x1B;
const APIC_EN: u64 = 1 << 11; // APIC global enable
const APIC_EXTD: u64 = 1 << 10; // x2APIC mode

const IA32_X2APIC_ID: u32 = 0x802;
const IA32_X2APIC_SVR: u32 = 0x80F;
const IA32_X2APIC_ICR: u32 = 0x830;

/// SVR bit 8: APIC software enable.
const SVR_ENABLE: u64 = 1 << 8;

const PIC1_DATA: u16 = 0x21;
const PIC2_DATA: u16 = 0xA1;

/// x2APIC backend. Holds no per-core state; one instance serves all cores.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct X2Apic {
    spurious_vector: u8,
}

impl X2Apic {
    /// `spurious_vector` is programmed into every core's SVR.
    #[must_use]
    pub const fn new(spurious_vector: u8) -> Self {
        Self { spurious_vector }
    }

    fn command_for(target: HardwareId, ipi: Ipi) -> InterruptCommand {
        let (mode, vector) = match ipi {
            Ipi::Init => (DeliveryMode::Init, 0),
            Ipi::Startup(vector) => (DeliveryMode::Startup, vector.as_u8()),
            Ipi::Signal => (DeliveryMode::Nmi, 0),
        };
        InterruptCommand::to(target.as_u32(), mode, vector)
    }
}

impl InterruptController for X2Apic {
    #[allow(clippy::cast_possible_truncation)]
    fn local_hardware_id(&self) -> HardwareId {
        let id = unsafe { rdmsr(IA32_X2APIC_ID) };
        HardwareId::new((id & 0xFFFF_FFFF) as u32)
    }

    fn configure_system(&self, processor_count: usize) {
        debug!("x2APIC: {processor_count} local APIC(s), no shared state to size");
    }

    fn configure_local(&self) {
        unsafe {
            let base = rdmsr(IA32_APIC_BASE);
            wrmsr(IA32_APIC_BASE, base | APIC_EN | APIC_EXTD);
            wrmsr(IA32_X2APIC_SVR, SVR_ENABLE | u64::from(self.spurious_vector));
        }
        info!(
            "x2APIC enabled on {} (spurious vector {:#x})",
            self.local_hardware_id(),
            self.spurious_vector
        );
    }

    fn configure_global(&self) {
        // Mask every line on both legacy PICs.
        unsafe {
            outb(PIC1_DATA, 0xFF);
            outb(PIC2_DATA, 0xFF);
        }
        debug!("legacy PIC masked");
    }

    fn send_ipi(&self, target: HardwareId, ipi: Ipi, wait_for_delivery: bool) {
        let icr = Self::command_for(target, ipi);
        trace!("ICR {:#018x} (wait: {wait_for_delivery})", icr.into_bits());
        // x2APIC ICR writes are not reported pending; there is nothing to poll.
        unsafe { wrmsr(IA32_X2APIC_ICR, icr.into_bits()) };
    }

    fn enable_local_interrupts(&self) {
        unsafe { core::arch::asm!("sti", options(nomem, nostack, preserves_flags)) }
    }
}

#[inline]
unsafe fn outb(port: u16, val: u8) {
    unsafe {
        core::arch::asm!("out dx, al", in("dx") port, in("al") val, options(nomem, nostack, preserves_flags));
    }
}
