//! # Kernel synchronization primitives
//!
//! Everything here waits by spinning. These primitives are used before any
//! scheduler exists, so there is nothing to block on: a waiting core burns
//! cycles until the condition it polls for becomes true.
//!
//! * [`RawSpin`]: a data-less test-and-test-and-set lock.
//! * [`SpinLock`]: a [`RawSpin`] guarding a value, with an RAII guard.
//! * [`SyncOnceCell`]: a value published exactly once and read without locking afterward.
//! * [`spin_wait`]: unbounded and deadline-bounded polling loops.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod raw_spin;
mod spin_lock;
pub mod spin_wait;
mod sync_once_cell;

pub use raw_spin::RawSpin;
pub use spin_lock::{SpinLock, SpinLockGuard};
pub use spin_wait::{DeadlineExpired, spin_until, spin_until_deadline};
pub use sync_once_cell::SyncOnceCell;
