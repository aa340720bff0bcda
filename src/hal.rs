//! Hardware seams used by the scheduler: the pins it drives and the timer
//! that paces it.

use embedded_hal::digital::{OutputPin, PinState};

/// Identifier of a physical output pin.
pub type PinId = u8;

/// Drives named output pins.
///
/// Every call must take effect before it returns.
pub trait OutputDriver {
    /// Sets `pin` to `level`.
    fn set_level(&mut self, pin: PinId, level: PinState);

    /// Whether `pin` names an output this driver controls.
    fn is_valid(&self, _pin: PinId) -> bool {
        true
    }

    /// Switches `pin` to output mode.
    fn make_output(&mut self, _pin: PinId) {}
}

/// A bank of `embedded-hal` output pins addressed by their index.
impl<P, const M: usize> OutputDriver for [P; M]
where
    P: OutputPin,
{
    fn set_level(&mut self, pin: PinId, level: PinState) {
        match self.get_mut(usize::from(pin)) {
            Some(output) => {
                if output.set_state(level).is_err() {
                    warn!("failed to drive pin {}", pin);
                }
            }
            None => warn!("pin {} is not part of the bank", pin),
        }
    }

    fn is_valid(&self, pin: PinId) -> bool {
        usize::from(pin) < M
    }
}

/// The single countdown timer shared by all channels.
///
/// The timer raises one interrupt per expiry. [`TimerSource::reload`] sets the
/// number of ticks until the next expiry and restarts the count.
pub trait TimerSource {
    /// Largest value [`TimerSource::reload`] accepts.
    const MAX_TICKS: u32 = u16::MAX as u32;

    /// Stops the timer, clears its counter and pending flag and enables its
    /// interrupt.
    fn listen(&mut self);

    /// Starts counting.
    fn start(&mut self);

    /// Stops counting.
    fn stop(&mut self);

    /// Arms the next expiry `ticks` ticks from now.
    fn reload(&mut self, ticks: u32);

    /// Clears the pending interrupt flag.
    fn clear_interrupt(&mut self);

    /// Whether an expiry is pending.
    fn is_interrupt_set(&self) -> bool;
}
