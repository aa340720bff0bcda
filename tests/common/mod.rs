#![allow(dead_code)]

use spwm::{OutputDriver, PinId, PinState, Spwm, TimerSource};
use std::cell::{Cell, RefCell};
use std::vec::Vec;

pub const PIN_COUNT: usize = 8;
pub const CLOCK_HZ: u32 = 16_000_000;

/// Output pins recording their levels and every moment two paired pins were
/// high together.
#[derive(Default)]
pub struct MockPins {
    levels: Cell<[bool; PIN_COUNT]>,
    outputs: Cell<[bool; PIN_COUNT]>,
    pairs: RefCell<Vec<(PinId, PinId)>>,
    overlaps: Cell<u32>,
    writes: Cell<u32>,
    history: RefCell<Vec<(PinId, bool)>>,
}

impl MockPins {
    pub fn watch(&self, primary: PinId, complementary: PinId) {
        self.pairs.borrow_mut().push((primary, complementary));
    }

    pub fn level(&self, pin: PinId) -> bool {
        self.levels.get()[usize::from(pin)]
    }

    pub fn levels(&self) -> [bool; PIN_COUNT] {
        self.levels.get()
    }

    pub fn is_output(&self, pin: PinId) -> bool {
        self.outputs.get()[usize::from(pin)]
    }

    pub fn force_high(&self, pin: PinId) {
        let mut levels = self.levels.get();
        levels[usize::from(pin)] = true;
        self.levels.set(levels);
    }

    pub fn overlaps(&self) -> u32 {
        self.overlaps.get()
    }

    pub fn writes(&self) -> u32 {
        self.writes.get()
    }

    /// Levels written to `pin`, in order.
    pub fn written(&self, pin: PinId) -> Vec<bool> {
        self.history
            .borrow()
            .iter()
            .filter(|(written_pin, _)| *written_pin == pin)
            .map(|(_, high)| *high)
            .collect()
    }
}

impl OutputDriver for &MockPins {
    fn set_level(&mut self, pin: PinId, level: PinState) {
        let mut levels = self.levels.get();
        levels[usize::from(pin)] = level == PinState::High;
        self.levels.set(levels);
        self.writes.set(self.writes.get() + 1);
        self.history.borrow_mut().push((pin, level == PinState::High));

        for &(primary, complementary) in self.pairs.borrow().iter() {
            if levels[usize::from(primary)] && levels[usize::from(complementary)] {
                self.overlaps.set(self.overlaps.get() + 1);
            }
        }
    }

    fn is_valid(&self, pin: PinId) -> bool {
        usize::from(pin) < PIN_COUNT
    }

    fn make_output(&mut self, pin: PinId) {
        let mut outputs = self.outputs.get();
        outputs[usize::from(pin)] = true;
        self.outputs.set(outputs);
    }
}

/// Countdown timer advanced by hand, one tick at a time.
#[derive(Default)]
pub struct MockTimer {
    reload: Cell<u32>,
    elapsed: Cell<u32>,
    running: Cell<bool>,
    pending: Cell<bool>,
    listening: Cell<bool>,
    expire_on_reload: Cell<bool>,
}

impl MockTimer {
    pub fn tick(&self) {
        if !self.running.get() {
            return;
        }

        let elapsed = self.elapsed.get() + 1;

        self.elapsed.set(elapsed);

        if elapsed >= self.reload.get() {
            self.pending.set(true);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    pub fn is_listening(&self) -> bool {
        self.listening.get()
    }

    pub fn reload_value(&self) -> u32 {
        self.reload.get()
    }

    /// Makes the next reload look like it raced with another expiry.
    pub fn expire_on_reload(&self, expire: bool) {
        self.expire_on_reload.set(expire);
    }
}

impl TimerSource for &MockTimer {
    fn listen(&mut self) {
        self.running.set(false);
        self.elapsed.set(0);
        self.pending.set(false);
        self.listening.set(true);
    }

    fn start(&mut self) {
        self.running.set(true);
    }

    fn stop(&mut self) {
        self.running.set(false);
    }

    fn reload(&mut self, ticks: u32) {
        self.reload.set(ticks);
        self.elapsed.set(0);

        if self.expire_on_reload.get() {
            self.pending.set(true);
        }
    }

    fn clear_interrupt(&mut self) {
        self.pending.set(false);
    }

    fn is_interrupt_set(&self) -> bool {
        self.pending.get()
    }
}

pub type MockSpwm<'a, const N: usize> = Spwm<&'a MockPins, &'a MockTimer, N>;

/// Advances the timer `ticks` times, running the interrupt handler after each
/// tick, and returns the pin levels seen after every tick.
pub fn simulate<const N: usize>(
    spwm: &MockSpwm<'_, N>,
    pins: &MockPins,
    timer: &MockTimer,
    ticks: usize,
) -> Vec<[bool; PIN_COUNT]> {
    let mut trace = Vec::with_capacity(ticks);

    for _ in 0..ticks {
        timer.tick();
        spwm.irq_handler();
        trace.push(pins.levels());
    }

    trace
}

/// Collapses the levels of one pin pair into `((primary, complementary), length)` runs.
pub fn runs(
    trace: &[[bool; PIN_COUNT]],
    primary: PinId,
    complementary: PinId,
) -> Vec<((bool, bool), usize)> {
    let mut runs: Vec<((bool, bool), usize)> = Vec::new();

    for levels in trace {
        let state = (levels[usize::from(primary)], levels[usize::from(complementary)]);

        match runs.last_mut() {
            Some((last, length)) if *last == state => *length += 1,
            _ => runs.push((state, 1)),
        }
    }

    runs
}
