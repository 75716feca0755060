//! # Inter-Processor Signal Protocol
//!
//! The signal interrupt (an NMI on x86-64) carries no payload, so each core
//! owns a [`SignalSlot`] the sender fills in before raising the interrupt.
//! One exchange moves the slot through three states:
//!
//! ```text
//!            sender: store tag, raise IPI
//!   Idle ───────────────────────────────────▶ Pending
//!    ▲                                          │
//!    │ sender: observed ack,                    │ receiver (in its handler):
//!    │ reset, release lock                      │ read tag, dispatch
//!    │                                          ▼
//!    └─────────────────────────────────── Acknowledged
//! ```
//!
//! The sender holds the slot's lock for the whole round trip, so exchanges
//! with one target are totally ordered while exchanges with different
//! targets run in parallel. The sender waits for the acknowledgement without
//! a timeout: a target that never answers has crashed or deadlocked.

extern crate alloc;

use crate::directory::ProcessorDirectory;
use crate::fatal::MpFault;
use crate::ids::LogicalId;
use crate::platform::{InterruptController, Ipi, MessageHandler};
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU8, Ordering};
use kernel_sync::{SpinLock, spin_until};
use log::trace;

/// Control message carried across cores.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum IpiMessage {
    /// Stop running tasks and park.
    Suspend = 0,
    /// Leave the parked state and resume scheduling.
    Resume = 1,
    /// Reload the interrupt descriptor table.
    ReloadIdt = 2,
    /// Flush the local TLB.
    TlbShootdown = 3,
}

impl IpiMessage {
    /// Tag stored in idle slots. It is never acted on: the slot state, not
    /// the tag, says whether a message is in flight.
    pub const PLACEHOLDER: Self = Self::Suspend;
}

impl TryFrom<u8> for IpiMessage {
    type Error = u8;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(Self::Suspend),
            1 => Ok(Self::Resume),
            2 => Ok(Self::ReloadIdt),
            3 => Ok(Self::TlbShootdown),
            other => Err(other),
        }
    }
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SlotState {
    /// No exchange in progress.
    Idle = 0,
    /// A message waits for the target.
    Pending = 1,
    /// The target has handled the message.
    Acknowledged = 2,
}

impl SlotState {
    const fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            1 => Self::Pending,
            _ => Self::Acknowledged,
        }
    }

    /// The only legal successor of each state.
    #[must_use]
    pub const fn next(self) -> Self {
        match self {
            Self::Idle => Self::Pending,
            Self::Pending => Self::Acknowledged,
            Self::Acknowledged => Self::Idle,
        }
    }

    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        self.next() == next
    }
}

/// Per-core mailbox.
pub struct SignalSlot {
    /// Serializes senders to this core for a full round trip.
    sender: SpinLock<()>,
    message: AtomicU8,
    /// Polled outside the lock by the sender; written by both sides.
    state: AtomicU8,
}

impl Default for SignalSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalSlot {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sender: SpinLock::new(()),
            message: AtomicU8::new(IpiMessage::PLACEHOLDER as u8),
            state: AtomicU8::new(SlotState::Idle as u8),
        }
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> SlotState {
        SlotState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Whether a sender currently owns the slot.
    #[inline]
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.sender.is_locked()
    }

    /// Raw tag currently stored; meaningful only while `Pending`.
    #[inline]
    #[must_use]
    pub fn raw_message(&self) -> u8 {
        self.message.load(Ordering::Relaxed)
    }

    fn transition(&self, owner: LogicalId, from: SlotState) -> Result<(), MpFault> {
        let to = from.next();
        match self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                trace!("signal slot of {owner}: {from:?} -> {to:?}");
                Ok(())
            }
            Err(found) => Err(MpFault::ProtocolViolation {
                target: owner,
                expected: from,
                found: SlotState::from_raw(found),
            }),
        }
    }
}

impl core::fmt::Debug for SignalSlot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SignalSlot")
            .field("state", &self.state())
            .field("message", &self.raw_message())
            .field("busy", &self.is_busy())
            .finish()
    }
}

/// One [`SignalSlot`] per logical processor, parallel to the directory.
#[derive(Debug)]
pub struct SignalTable {
    slots: Box<[SignalSlot]>,
}

impl SignalTable {
    /// Allocates `count` idle slots.
    #[must_use]
    pub fn new(count: usize) -> Self {
        let mut slots = Vec::with_capacity(count);
        slots.resize_with(count, SignalSlot::new);
        Self {
            slots: slots.into_boxed_slice(),
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn slot(&self, id: LogicalId) -> Option<&SignalSlot> {
        self.slots.get(id.as_usize())
    }

    fn checked_slot(&self, id: LogicalId) -> Result<&SignalSlot, MpFault> {
        self.slot(id).ok_or(MpFault::NoSuchProcessor {
            id,
            count: self.len(),
        })
    }

    /// Sends `message` to `target` and waits until the target acknowledges it.
    ///
    /// Blocks first on the slot lock (another sender is mid-exchange with the
    /// same target), then on the acknowledgement. Neither wait times out.
    ///
    /// # Errors
    /// [`MpFault::NoSuchProcessor`] for an unknown target, and
    /// [`MpFault::ProtocolViolation`] if the slot is not `Idle` once the lock
    /// is held or changes under the sender.
    pub fn send(
        &self,
        directory: &ProcessorDirectory,
        controller: &impl InterruptController,
        target: LogicalId,
        message: IpiMessage,
    ) -> Result<(), MpFault> {
        let record = directory.record(target)?;
        let slot = self.checked_slot(target)?;

        trace!("signal {message:?} -> {target}");
        let _guard = slot.sender.lock();

        let found = slot.state();
        if found != SlotState::Idle {
            return Err(MpFault::ProtocolViolation {
                target,
                expected: SlotState::Idle,
                found,
            });
        }

        // Published to the receiver by the Release half of the transition.
        slot.message.store(message as u8, Ordering::Relaxed);
        slot.transition(target, SlotState::Idle)?;

        controller.send_ipi(record.hardware_id(), Ipi::Signal, false);

        spin_until(|| slot.state() == SlotState::Acknowledged);

        slot.transition(target, SlotState::Acknowledged)
    }

    /// Receive path, run in the signal interrupt handler of core `this`.
    ///
    /// Reads the pending tag, hands it to `handler`, then acknowledges.
    ///
    /// # Errors
    /// [`MpFault::ProtocolViolation`] if no message is pending (a signal
    /// interrupt the kernel did not send), [`MpFault::UnknownMessage`] for a
    /// corrupt tag.
    pub fn receive(
        &self,
        this: LogicalId,
        handler: &impl MessageHandler,
    ) -> Result<IpiMessage, MpFault> {
        let slot = self.checked_slot(this)?;

        let found = slot.state();
        if found != SlotState::Pending {
            return Err(MpFault::ProtocolViolation {
                target: this,
                expected: SlotState::Pending,
                found,
            });
        }

        let raw = slot.raw_message();
        let message =
            IpiMessage::try_from(raw).map_err(|raw| MpFault::UnknownMessage { target: this, raw })?;
        trace!("{this} received {message:?}");

        handler.handle(message);

        slot.transition(this, SlotState::Pending)?;
        Ok(message)
    }
}
