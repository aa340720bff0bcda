use crate::SpwmError;

/// Maximum duty cycle in percent.
pub const MAX_DUTY_CYCLE: u8 = 100;

/// The timer counts instruction cycles, which run at a quarter of the
/// oscillator clock.
pub const CLOCK_DIVIDER: u32 = 4;

/// Computes the period in timer ticks for `freq_hz`:
/// `clock_hz / (4 * freq_hz) - 1`, truncating.
///
/// Fails with [`SpwmError::InvalidFrequency`] when the frequency is zero, when
/// the resulting period is zero or when it does not fit into `max_ticks`.
pub fn period_ticks(clock_hz: u32, freq_hz: u32, max_ticks: u32) -> Result<u32, SpwmError> {
    let divisor = freq_hz
        .checked_mul(CLOCK_DIVIDER)
        .filter(|divisor| *divisor != 0)
        .ok_or(SpwmError::InvalidFrequency)?;
    let period = (clock_hz / divisor)
        .checked_sub(1)
        .ok_or(SpwmError::InvalidFrequency)?;

    if period == 0 || period > max_ticks {
        return Err(SpwmError::InvalidFrequency);
    }

    Ok(period)
}

/// Computes the primary on-time for `duty_cycle` percent of `period`,
/// truncating.
pub fn on_ticks(period: u32, duty_cycle: u8) -> Result<u32, SpwmError> {
    if duty_cycle > MAX_DUTY_CYCLE {
        return Err(SpwmError::InvalidDutyCycle);
    }

    let on_ticks = u64::from(period) * u64::from(duty_cycle) / u64::from(MAX_DUTY_CYCLE);

    // on_ticks <= period, so the conversion never truncates
    Ok(on_ticks as u32)
}

/// Tick durations describing one full switching cycle of a channel.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Timing {
    pub(crate) period: u32,
    pub(crate) on_time: u32,
    pub(crate) dead_time_rise: u32,
    pub(crate) dead_time_fall: u32,
}

impl Timing {
    pub(crate) fn new(
        clock_hz: u32,
        freq_hz: u32,
        duty_cycle: u8,
        dead_time_rise: u32,
        dead_time_fall: u32,
        max_ticks: u32,
    ) -> Result<Self, SpwmError> {
        let period = period_ticks(clock_hz, freq_hz, max_ticks)?;
        let on_time = on_ticks(period, duty_cycle)?;

        if dead_time_rise > max_ticks || dead_time_fall > max_ticks {
            return Err(SpwmError::InvalidDeadTime);
        }

        let timing = Self {
            period,
            on_time,
            dead_time_rise,
            dead_time_fall,
        };

        if !timing.fits_period() {
            warn!(
                "on-time {} and dead times {}/{} exceed period {}",
                on_time, dead_time_rise, dead_time_fall, period
            );
        }

        Ok(timing)
    }

    /// Ticks per switching cycle.
    pub fn period(&self) -> u32 {
        self.period
    }

    /// Ticks the primary output stays high.
    pub fn on_time(&self) -> u32 {
        self.on_time
    }

    /// Ticks between primary turn-off and complementary turn-on.
    pub fn dead_time_rise(&self) -> u32 {
        self.dead_time_rise
    }

    /// Ticks between complementary turn-off and primary turn-on.
    pub fn dead_time_fall(&self) -> u32 {
        self.dead_time_fall
    }

    /// Ticks the complementary output stays high. Derived from the rest of
    /// the cycle; zero if the on-time and dead times already fill the period.
    pub fn complementary_on_time(&self) -> u32 {
        self.period
            .saturating_sub(self.on_time)
            .saturating_sub(self.dead_time_rise)
            .saturating_sub(self.dead_time_fall)
    }

    /// Whether on-time plus both dead times fit into the period.
    pub fn fits_period(&self) -> bool {
        u64::from(self.on_time) + u64::from(self.dead_time_rise) + u64::from(self.dead_time_fall)
            <= u64::from(self.period)
    }
}
