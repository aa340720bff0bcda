use crate::hal::{OutputDriver, PinId};
use crate::timing::{self, MAX_DUTY_CYCLE, Timing};
use crate::SpwmError;
use core::marker::PhantomData;
use embedded_hal::digital::PinState;

/// Position of a channel within its switching cycle.
///
/// The phases follow each other in declaration order and wrap around.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    /// Primary output high, complementary low
    PrimaryOn,
    /// Both outputs low while the rising dead time elapses
    DeadAfterPrimary,
    /// Complementary output high, primary low
    ComplementaryOn,
    /// Both outputs low while the falling dead time elapses
    #[default]
    DeadAfterComplementary,
}

impl Phase {
    /// The phase that follows `self`.
    pub fn next(self) -> Self {
        match self {
            Phase::PrimaryOn => Phase::DeadAfterPrimary,
            Phase::DeadAfterPrimary => Phase::ComplementaryOn,
            Phase::ComplementaryOn => Phase::DeadAfterComplementary,
            Phase::DeadAfterComplementary => Phase::PrimaryOn,
        }
    }

    /// How long a channel with `timing` stays in this phase.
    pub fn ticks(self, timing: &Timing) -> u32 {
        match self {
            Phase::PrimaryOn => timing.on_time(),
            Phase::DeadAfterPrimary => timing.dead_time_rise(),
            Phase::ComplementaryOn => timing.complementary_on_time(),
            Phase::DeadAfterComplementary => timing.dead_time_fall(),
        }
    }

    /// Primary and complementary output levels held during this phase.
    pub fn levels(self) -> (PinState, PinState) {
        match self {
            Phase::PrimaryOn => (PinState::High, PinState::Low),
            Phase::ComplementaryOn => (PinState::Low, PinState::High),
            Phase::DeadAfterPrimary | Phase::DeadAfterComplementary => {
                (PinState::Low, PinState::Low)
            }
        }
    }
}

/// Requested parameters of a complementary output pair.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelConfig {
    pub primary_pin: PinId,
    pub complementary_pin: PinId,
    pub freq_hz: u32,
    pub duty_cycle: u8,
    pub dead_time_rise: u32,
    pub dead_time_fall: u32,
}

impl ChannelConfig {
    pub(crate) fn timing(&self, hardware_freq_hz: u32, max_ticks: u32) -> Result<Timing, SpwmError> {
        Timing::new(
            hardware_freq_hz,
            self.freq_hz,
            self.duty_cycle,
            self.dead_time_rise,
            self.dead_time_fall,
            max_ticks,
        )
    }
}

/// State of one complementary PWM output pair.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpwmChannel {
    pub(crate) configured: bool,
    pub(crate) primary_pin: PinId,
    pub(crate) complementary_pin: PinId,
    pub(crate) freq_hz: u32,
    pub(crate) duty_cycle: u8,
    pub(crate) timing: Timing,
    pub(crate) pending: Option<Timing>,
    pub(crate) active: bool,
    pub(crate) phase: Phase,
    pub(crate) remaining: u32,
}

impl SpwmChannel {
    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn primary_pin(&self) -> PinId {
        self.primary_pin
    }

    pub fn complementary_pin(&self) -> PinId {
        self.complementary_pin
    }

    pub fn freq_hz(&self) -> u32 {
        self.freq_hz
    }

    pub fn duty_cycle(&self) -> u8 {
        self.duty_cycle
    }

    /// Timing the scheduler currently runs with.
    pub fn timing(&self) -> Timing {
        self.timing
    }

    /// Timing staged on a running channel, applied when its next period
    /// starts.
    pub fn pending_timing(&self) -> Option<Timing> {
        self.pending
    }

    pub fn period(&self) -> u32 {
        self.timing.period()
    }

    pub fn on_time(&self) -> u32 {
        self.timing.on_time()
    }

    /// Ticks left in the current phase.
    pub fn remaining_ticks(&self) -> u32 {
        self.remaining
    }

    /// The parameters this channel was configured with, including staged
    /// updates.
    pub fn config(&self) -> ChannelConfig {
        let timing = self.latest_timing();

        ChannelConfig {
            primary_pin: self.primary_pin,
            complementary_pin: self.complementary_pin,
            freq_hz: self.freq_hz,
            duty_cycle: self.duty_cycle,
            dead_time_rise: timing.dead_time_rise(),
            dead_time_fall: timing.dead_time_fall(),
        }
    }

    pub(crate) fn uses_pin(&self, pin: PinId) -> bool {
        self.configured && (self.primary_pin == pin || self.complementary_pin == pin)
    }

    fn latest_timing(&self) -> Timing {
        self.pending.unwrap_or(self.timing)
    }

    /// Applies `timing` right away on a stopped channel, or at the next
    /// period boundary on a running one.
    pub(crate) fn stage(&mut self, timing: Timing) {
        if self.active {
            self.pending = Some(timing);
        } else {
            self.timing = timing;
            self.pending = None;
        }
    }

    pub(crate) fn arm(&mut self) {
        self.active = true;
        self.phase = Phase::default();
        self.remaining = 0;
    }

    /// Deactivates the channel and pulls both outputs low.
    pub(crate) fn halt<D: OutputDriver>(&mut self, driver: &mut D) {
        self.active = false;
        self.phase = Phase::default();
        self.remaining = 0;

        if let Some(timing) = self.pending.take() {
            self.timing = timing;
        }

        if self.configured {
            driver.set_level(self.primary_pin, PinState::Low);
            driver.set_level(self.complementary_pin, PinState::Low);
        }
    }

    /// Moves to the next phase with a non-zero duration and returns that
    /// duration.
    ///
    /// Zero-length phases are passed through without touching the outputs;
    /// only the levels of the phase finally entered are driven.
    pub(crate) fn advance<D: OutputDriver>(&mut self, driver: &mut D) -> u32 {
        // A valid timing always has at least one non-zero phase.
        let ticks = loop {
            self.phase = self.phase.next();

            if self.phase == Phase::PrimaryOn
                && let Some(timing) = self.pending.take()
            {
                self.timing = timing;
            }

            let ticks = self.phase.ticks(&self.timing);

            if ticks != 0 {
                break ticks;
            }
        };

        self.drive(driver);
        self.remaining = ticks;

        ticks
    }

    /// Pulls the outputs of the current phase low first, then raises the
    /// one it keeps high. A pin that stays high is never written low.
    fn drive<D: OutputDriver>(&self, driver: &mut D) {
        let (primary, complementary) = self.phase.levels();

        if primary == PinState::Low {
            driver.set_level(self.primary_pin, PinState::Low);
        }

        if complementary == PinState::Low {
            driver.set_level(self.complementary_pin, PinState::Low);
        }

        if primary == PinState::High {
            driver.set_level(self.primary_pin, PinState::High);
        }

        if complementary == PinState::High {
            driver.set_level(self.complementary_pin, PinState::High);
        }
    }
}

pub struct SpwmChannelPinsBuildState {}
pub struct SpwmChannelFreqHzBuildState {}
pub struct SpwmChannelDutyCycleBuildState {}
pub struct SpwmChannelFinalizedBuildState {}

/// Step-by-step construction of a validated [`ChannelConfig`]: pins, then
/// frequency, then duty cycle.
pub struct SpwmChannelBuilder<T> {
    hardware_freq_hz: u32,
    max_ticks: u32,
    config: ChannelConfig,
    _phantom: PhantomData<T>,
}

impl<T> SpwmChannelBuilder<T> {
    /// Sets the rising and falling dead times in timer ticks.
    pub fn dead_time(mut self, rise: u32, fall: u32) -> Self {
        self.config.dead_time_rise = rise;
        self.config.dead_time_fall = fall;
        self
    }

    fn into_state<S>(self) -> SpwmChannelBuilder<S> {
        SpwmChannelBuilder {
            hardware_freq_hz: self.hardware_freq_hz,
            max_ticks: self.max_ticks,
            config: self.config,
            _phantom: PhantomData,
        }
    }
}

impl SpwmChannelBuilder<SpwmChannelPinsBuildState> {
    /// Starts a builder for a 16-bit timer clocked at `hardware_freq_hz`.
    pub fn new(hardware_freq_hz: u32) -> Result<Self, SpwmError> {
        if hardware_freq_hz == 0 {
            return Err(SpwmError::InvalidHardwareFrequency);
        }

        Ok(Self::with_max_ticks(hardware_freq_hz, u32::from(u16::MAX)))
    }

    pub(crate) fn with_max_ticks(hardware_freq_hz: u32, max_ticks: u32) -> Self {
        Self {
            hardware_freq_hz,
            max_ticks,
            config: ChannelConfig::default(),
            _phantom: PhantomData,
        }
    }

    pub fn pins(
        mut self,
        primary_pin: PinId,
        complementary_pin: PinId,
    ) -> Result<SpwmChannelBuilder<SpwmChannelFreqHzBuildState>, SpwmError> {
        if primary_pin == complementary_pin {
            return Err(SpwmError::PinConflict);
        }

        self.config.primary_pin = primary_pin;
        self.config.complementary_pin = complementary_pin;

        Ok(self.into_state())
    }
}

impl SpwmChannelBuilder<SpwmChannelFreqHzBuildState> {
    pub fn freq_hz(
        mut self,
        freq_hz: u32,
    ) -> Result<SpwmChannelBuilder<SpwmChannelDutyCycleBuildState>, SpwmError> {
        timing::period_ticks(self.hardware_freq_hz, freq_hz, self.max_ticks)?;
        self.config.freq_hz = freq_hz;

        Ok(self.into_state())
    }
}

impl SpwmChannelBuilder<SpwmChannelDutyCycleBuildState> {
    pub fn duty_cycle(
        mut self,
        duty_cycle: u8,
    ) -> Result<SpwmChannelBuilder<SpwmChannelFinalizedBuildState>, SpwmError> {
        if duty_cycle > MAX_DUTY_CYCLE {
            return Err(SpwmError::InvalidDutyCycle);
        }

        self.config.duty_cycle = duty_cycle;

        Ok(self.into_state())
    }
}

impl SpwmChannelBuilder<SpwmChannelFinalizedBuildState> {
    pub fn build(self) -> Result<ChannelConfig, SpwmError> {
        self.config.timing(self.hardware_freq_hz, self.max_ticks)?;

        Ok(self.config)
    }
}
