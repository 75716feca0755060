mod common;

use common::{Event, SimMachine, run_as};
use kernel_mp::{Ipi, IpiMessage, LogicalId, MpFault, SlotState};
use std::sync::{Arc, Barrier};
use std::thread;

fn handled(events: &[Event]) -> Vec<(u32, IpiMessage)> {
    events
        .iter()
        .filter_map(|e| match *e {
            Event::Handled { hw, message } => Some((hw, message)),
            _ => None,
        })
        .collect()
}

#[test]
fn suspend_round_trip_then_immediate_resend() {
    let (state, machine) = SimMachine::local(&[0, 1]);
    run_as(0);
    let target = LogicalId::new(1);

    state.signal(&machine, target, IpiMessage::Suspend).unwrap();

    let slot = state.signals().slot(target).unwrap();
    assert_eq!(slot.state(), SlotState::Idle);
    assert!(!slot.is_busy());
    assert_eq!(handled(&machine.events()), [(1, IpiMessage::Suspend)]);

    state.signal(&machine, target, IpiMessage::Resume).unwrap();
    assert_eq!(
        handled(&machine.events()),
        [(1, IpiMessage::Suspend), (1, IpiMessage::Resume)]
    );
    assert_eq!(slot.state(), SlotState::Idle);
}

#[test]
fn senders_to_one_target_take_turns() {
    let (state, machine) = SimMachine::local(&[0, 1, 2]);
    let start = Arc::new(Barrier::new(2));

    let senders: Vec<_> = [(0, IpiMessage::ReloadIdt), (2, IpiMessage::TlbShootdown)]
        .into_iter()
        .map(|(hw, message)| {
            let state = Arc::clone(&state);
            let machine = machine.clone();
            let start = Arc::clone(&start);
            thread::spawn(move || {
                run_as(hw);
                start.wait();
                for _ in 0..20 {
                    state.signal(&machine, LogicalId::new(1), message).unwrap();
                }
            })
        })
        .collect();
    for sender in senders {
        sender.join().unwrap();
    }

    // Every signal IPI to the target is followed by its handling before the
    // next one is raised.
    let mut expecting_ipi = true;
    for event in machine.events() {
        match event {
            Event::Ipi {
                target: 1,
                ipi: Ipi::Signal,
            } => {
                assert!(expecting_ipi, "second IPI raised before handling");
                expecting_ipi = false;
            }
            Event::Handled { hw: 1, .. } => {
                assert!(!expecting_ipi, "handled without an IPI");
                expecting_ipi = true;
            }
            _ => {}
        }
    }
    assert!(expecting_ipi);

    let delivered = handled(&machine.events());
    assert_eq!(delivered.len(), 40);
    for message in [IpiMessage::ReloadIdt, IpiMessage::TlbShootdown] {
        assert_eq!(delivered.iter().filter(|(_, m)| *m == message).count(), 20);
    }
}

#[test]
fn different_targets_proceed_in_parallel() {
    let (state, machine) = SimMachine::local(&[0, 1, 2, 3]);

    let senders: Vec<_> = (1..4)
        .map(|target| {
            let state = Arc::clone(&state);
            let machine = machine.clone();
            thread::spawn(move || {
                run_as(0);
                for _ in 0..10 {
                    state
                        .signal(&machine, LogicalId::new(target), IpiMessage::TlbShootdown)
                        .unwrap();
                }
            })
        })
        .collect();
    for sender in senders {
        sender.join().unwrap();
    }

    let delivered = handled(&machine.events());
    for hw in 1..4 {
        assert_eq!(delivered.iter().filter(|(h, _)| *h == hw).count(), 10);
    }
    for id in 0..4 {
        let slot = state.signals().slot(LogicalId::new(id)).unwrap();
        assert_eq!(slot.state(), SlotState::Idle);
    }
}

#[test]
fn stray_signal_interrupt_is_rejected() {
    let (state, machine) = SimMachine::local(&[0, 1]);
    run_as(1);

    let err = state
        .receive(&machine, &|_: IpiMessage| {})
        .unwrap_err();

    assert_eq!(
        err,
        MpFault::ProtocolViolation {
            target: LogicalId::new(1),
            expected: SlotState::Pending,
            found: SlotState::Idle,
        }
    );
}
