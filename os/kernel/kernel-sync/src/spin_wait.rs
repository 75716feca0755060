//! Polling loops for conditions set by another core.
//!
//! [`spin_until`] never gives up. [`spin_until_deadline`] gives up once a
//! monotonic counter passes a deadline; counter units are whatever the
//! caller's clock counts in (TSC cycles, HPET ticks, nanoseconds in tests).

use core::hint::spin_loop;

/// The deadline passed before the condition held.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[error("deadline {deadline} expired at {now}")]
pub struct DeadlineExpired {
    pub deadline: u64,
    pub now: u64,
}

/// Spins until `done` returns `true`. There is no timeout.
#[inline]
pub fn spin_until(mut done: impl FnMut() -> bool) {
    while !done() {
        spin_loop();
    }
}

/// Spins until `done` returns `true` or `now()` reaches `deadline`.
///
/// The condition is checked once more after the deadline is seen, so a flag
/// set right at expiry still counts.
///
/// # Errors
/// [`DeadlineExpired`] with the counter value observed at expiry.
pub fn spin_until_deadline(
    mut now: impl FnMut() -> u64,
    deadline: u64,
    mut done: impl FnMut() -> bool,
) -> Result<(), DeadlineExpired> {
    loop {
        if done() {
            return Ok(());
        }

        let t = now();
        if t >= deadline {
            return if done() {
                Ok(())
            } else {
                Err(DeadlineExpired { deadline, now: t })
            };
        }

        spin_loop();
    }
}
