//! Time Stamp Counter as the bring-up [`Timer`].
//!
//! The counter is assumed invariant (constant rate, synchronized across
//! cores), as on every CPU with x2APIC support.

use crate::platform::Timer;
use core::time::Duration;
use kernel_sync::spin_until;

#[inline(always)]
#[allow(clippy::inline_always)]
#[must_use]
pub fn rdtsc() -> u64 {
    let lo: u32;
    let hi: u32;
    unsafe {
        core::arch::asm!(
            "lfence", // serialize (Intel-recommended)
            "rdtsc",
            out("eax") lo,
            out("edx") hi,
            options(nomem, nostack, preserves_flags),
        );
    }
    (u64::from(hi) << 32) | u64::from(lo)
}

/// TSC-backed [`Timer`] with a calibrated frequency.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TscTimer {
    hz: u64,
}

impl TscTimer {
    /// `hz` is the counter frequency, as measured by the kernel's calibration.
    #[must_use]
    pub const fn new(hz: u64) -> Self {
        Self { hz }
    }

    #[must_use]
    pub const fn hz(&self) -> u64 {
        self.hz
    }
}

impl Timer for TscTimer {
    #[inline]
    fn now(&self) -> u64 {
        rdtsc()
    }

    fn ticks_for(&self, duration: Duration) -> u64 {
        ticks_for_hz(self.hz, duration)
    }

    fn stall(&self, duration: Duration) {
        let end = rdtsc().saturating_add(self.ticks_for(duration));
        spin_until(|| rdtsc() >= end);
    }
}

/// Counter ticks elapsed in `duration` at `hz`, saturating.
fn ticks_for_hz(hz: u64, duration: Duration) -> u64 {
    let ticks = u128::from(hz) * duration.as_nanos() / 1_000_000_000;
    u64::try_from(ticks).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_seconds() {
        assert_eq!(ticks_for_hz(2_000_000_000, Duration::from_secs(1)), 2_000_000_000);
        assert_eq!(ticks_for_hz(3_000_000_000, Duration::from_secs(2)), 6_000_000_000);
    }

    #[test]
    fn init_settle_delay_at_common_rates() {
        let delay = Duration::from_millis(10);
        assert_eq!(ticks_for_hz(2_400_000_000, delay), 24_000_000);
        assert_eq!(ticks_for_hz(1_193_182, delay), 11_931);
    }

    #[test]
    fn saturates_instead_of_wrapping() {
        assert_eq!(ticks_for_hz(u64::MAX, Duration::from_secs(10)), u64::MAX);
    }

    #[test]
    fn counter_advances() {
        let a = rdtsc();
        let b = rdtsc();
        assert!(b >= a);
    }
}
