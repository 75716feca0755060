#![allow(dead_code)]

use kernel_mp::{
    FirmwareTables, HardwareId, InterruptController, Ipi, IpiMessage, LocalInit, LogicalId,
    MpState, ProcessorDirectory, SchedulerHandoff, Timer, system,
};
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

thread_local! {
    static HARDWARE_ID: Cell<u32> = const { Cell::new(0) };
}

/// Makes the calling thread act as the core with hardware id `hw`.
pub fn run_as(hw: u32) {
    HARDWARE_ID.with(|c| c.set(hw));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Ipi { target: u32, ipi: Ipi },
    Configure(&'static str),
    InterruptsOn { hw: u32, running: usize },
    Handled { hw: u32, message: IpiMessage },
}

/// Where simulated cores find the MP state.
#[derive(Clone)]
pub enum Backing {
    Local(Arc<MpState>),
    Global,
}

/// Nanoseconds since construction.
#[derive(Clone, Copy)]
pub struct StdTimer {
    epoch: Instant,
}

impl Default for StdTimer {
    fn default() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Timer for StdTimer {
    fn now(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap()
    }

    fn ticks_for(&self, duration: Duration) -> u64 {
        u64::try_from(duration.as_nanos()).unwrap()
    }

    fn stall(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Advances one millisecond per read; stalls advance it by their length.
#[derive(Default)]
pub struct StepTimer {
    ms: AtomicU64,
}

impl StepTimer {
    pub fn elapsed_ms(&self) -> u64 {
        self.ms.load(Ordering::Relaxed)
    }
}

impl Timer for StepTimer {
    fn now(&self) -> u64 {
        self.ms.fetch_add(1, Ordering::Relaxed)
    }

    fn ticks_for(&self, duration: Duration) -> u64 {
        u64::try_from(duration.as_millis()).unwrap()
    }

    fn stall(&self, duration: Duration) {
        self.ms.fetch_add(self.ticks_for(duration), Ordering::Relaxed);
    }
}

pub struct NoLocalInit;

impl LocalInit for NoLocalInit {
    fn init_local(&self, _: LogicalId) {}
}

/// Scheduler that is ready for every core.
pub struct AlwaysClaimed;

impl SchedulerHandoff for AlwaysClaimed {
    fn claimed(&self, _: LogicalId) -> bool {
        true
    }
}

/// Interrupt controller over simulated cores.
///
/// A STARTUP IPI runs the AP entry path on a new thread after
/// `start_delay` (inline when the delay is zero). A signal IPI runs the
/// receive path on a new thread acting as the target.
#[derive(Clone)]
pub struct SimMachine {
    pub backing: Backing,
    pub start_delay: Duration,
    pub dead: Arc<Vec<u32>>,
    pub events: Arc<Mutex<Vec<Event>>>,
    pub timer: StdTimer,
}

impl SimMachine {
    pub fn new(backing: Backing) -> Self {
        Self {
            backing,
            start_delay: Duration::ZERO,
            dead: Arc::new(Vec::new()),
            events: Arc::new(Mutex::new(Vec::new())),
            timer: StdTimer::default(),
        }
    }

    pub fn local(hardware_ids: &[u32]) -> (Arc<MpState>, Self) {
        let directory =
            ProcessorDirectory::from_hardware_ids(hardware_ids.iter().copied().map(HardwareId::new))
                .unwrap();
        let state = Arc::new(MpState::new(directory));
        let machine = Self::new(Backing::Local(Arc::clone(&state)));
        (state, machine)
    }

    #[must_use]
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    #[must_use]
    pub fn with_dead(mut self, dead: &[u32]) -> Self {
        self.dead = Arc::new(dead.to_vec());
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    fn running(&self) -> usize {
        match &self.backing {
            Backing::Local(state) => state.directory().running_count(),
            Backing::Global => system::mp_state().map_or(0, |s| s.directory().running_count()),
        }
    }

    fn ap_entry(&self, hw: u32) {
        run_as(hw);
        match &self.backing {
            Backing::Local(state) => {
                state
                    .ap_startup(self, &self.timer, &NoLocalInit, &AlwaysClaimed)
                    .unwrap();
            }
            Backing::Global => {
                system::ap_startup(self, &self.timer, &NoLocalInit, &AlwaysClaimed);
            }
        }
    }

    fn signal_entry(&self, hw: u32) {
        run_as(hw);
        let handler = |message: IpiMessage| self.push(Event::Handled { hw, message });
        match &self.backing {
            Backing::Local(state) => {
                state.receive(self, &handler).unwrap();
            }
            Backing::Global => {
                system::receive_signal_interrupt(self, &handler);
            }
        }
    }
}

impl InterruptController for SimMachine {
    fn local_hardware_id(&self) -> HardwareId {
        HardwareId::new(HARDWARE_ID.with(Cell::get))
    }

    fn configure_system(&self, _: usize) {
        self.push(Event::Configure("system"));
    }

    fn configure_local(&self) {
        self.push(Event::Configure("local"));
    }

    fn configure_global(&self) {
        self.push(Event::Configure("global"));
    }

    fn send_ipi(&self, target: HardwareId, ipi: Ipi, _: bool) {
        let hw = target.as_u32();
        self.push(Event::Ipi { target: hw, ipi });

        match ipi {
            Ipi::Init => {}
            Ipi::Startup(_) if self.dead.contains(&hw) => {}
            Ipi::Startup(_) if self.start_delay.is_zero() => {
                let machine = self.clone();
                thread::spawn(move || machine.ap_entry(hw)).join().unwrap();
            }
            Ipi::Startup(_) => {
                let machine = self.clone();
                thread::spawn(move || {
                    thread::sleep(machine.start_delay);
                    machine.ap_entry(hw);
                });
            }
            Ipi::Signal => {
                let machine = self.clone();
                thread::spawn(move || machine.signal_entry(hw));
            }
        }
    }

    fn enable_local_interrupts(&self) {
        let hw = HARDWARE_ID.with(Cell::get);
        let running = self.running();
        self.push(Event::InterruptsOn { hw, running });
    }
}

pub struct Tables(pub Option<Vec<u8>>);

impl FirmwareTables for Tables {
    fn madt(&self) -> Option<&[u8]> {
        self.0.as_deref()
    }
}

/// A checksummed MADT listing one enabled local APIC per id.
pub fn madt_bytes(apic_ids: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&0xFEE0_0000u32.to_le_bytes());
    body.extend_from_slice(&1u32.to_le_bytes());
    for (uid, &id) in apic_ids.iter().enumerate() {
        body.extend_from_slice(&[0, 8, u8::try_from(uid).unwrap(), id, 1, 0, 0, 0]);
    }

    let len = u32::try_from(36 + body.len()).unwrap();
    let mut table = Vec::new();
    table.extend_from_slice(b"APIC");
    table.extend_from_slice(&len.to_le_bytes());
    table.extend_from_slice(&[3, 0]);
    table.extend_from_slice(b"OEMID OEMTABLE");
    table.extend_from_slice(&[0; 12]);
    table.extend_from_slice(&body);
    let sum = table.iter().fold(0u8, |a, &b| a.wrapping_add(b));
    table[9] = 0u8.wrapping_sub(sum);
    table
}
