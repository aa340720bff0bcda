//! Complementary software PWM with dead-time insertion.
//!
//! Drives several primary/complementary output pairs from one hardware
//! timer. Each timer expiry runs [`Spwm::irq_handler`], which moves every
//! active channel through its switching cycle
//!
//! ```text
//! primary   ‾‾‾‾‾‾‾‾|_____________________|‾‾‾‾
//! compl.    ________|__|‾‾‾‾‾‾‾‾‾‾‾‾‾‾|___|____
//!            on_time rise  remainder  fall
//! ```
//!
//! and reloads the timer with the length of the phase just entered. The two
//! outputs of a channel are never high at the same time.
//!
//! All state lives behind a [`critical_section::Mutex`], so a shared
//! `&'static Spwm` can be used from both the application and the timer
//! interrupt.
#![no_std]

mod fmt;

mod channel;
mod hal;
mod timing;

use core::cell::RefCell;
use critical_section::Mutex;

pub use channel::{
    ChannelConfig, Phase, SpwmChannel, SpwmChannelBuilder, SpwmChannelDutyCycleBuildState,
    SpwmChannelFinalizedBuildState, SpwmChannelFreqHzBuildState, SpwmChannelPinsBuildState,
};
pub use embedded_hal::digital::PinState;
pub use hal::{OutputDriver, PinId, TimerSource};
pub use timing::{CLOCK_DIVIDER, MAX_DUTY_CYCLE, Timing, on_ticks, period_ticks};

/// Errors that can occur during SPWM operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SpwmError {
    /// The specified hardware timer frequency is not valid
    InvalidHardwareFrequency,
    /// The specified channel index is out of range
    InvalidChannel,
    /// The requested frequency gives a period of zero ticks or one that does
    /// not fit into the timer
    InvalidFrequency,
    /// The duty cycle value is greater than 100
    InvalidDutyCycle,
    /// A dead time does not fit into the timer
    InvalidDeadTime,
    /// The output driver does not know the pin
    InvalidPin,
    /// The pins of a channel are equal or used by another channel
    PinConflict,
    /// The channel has not been configured yet
    ChannelNotConfigured,
    /// No free channel slots available for registration
    NoChannelSlotAvailable,
}

impl core::fmt::Display for SpwmError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SpwmError::InvalidHardwareFrequency => write!(f, "invalid hardware timer frequency"),
            SpwmError::InvalidChannel => write!(f, "channel index out of range"),
            SpwmError::InvalidFrequency => write!(f, "frequency not reachable with this timer"),
            SpwmError::InvalidDutyCycle => write!(f, "duty cycle above 100%"),
            SpwmError::InvalidDeadTime => write!(f, "dead time does not fit into the timer"),
            SpwmError::InvalidPin => write!(f, "unknown output pin"),
            SpwmError::PinConflict => write!(f, "output pin already in use"),
            SpwmError::ChannelNotConfigured => write!(f, "channel not configured"),
            SpwmError::NoChannelSlotAvailable => write!(f, "no free channel slot"),
        }
    }
}

impl core::error::Error for SpwmError {}

/// How the shared timer is reloaded after an expiry.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReloadPolicy {
    /// Every active channel advances one phase per expiry and the timer is
    /// reloaded with the phase length of the last active channel.
    ///
    /// Exact for a single channel. With several channels only the last one
    /// keeps its own timing.
    #[default]
    LastWriter,
    /// Every channel counts down its own phase and only channels whose
    /// phase has elapsed advance. The timer is reloaded with the shortest
    /// remaining phase.
    EarliestDeadline,
}

/// Unique identifier for a registered channel.
pub type ChannelId = usize;

struct Inner<D, T, const N: usize> {
    channels: [SpwmChannel; N],
    driver: D,
    timer: T,
    armed_ticks: u32,
    running: bool,
    overruns: u32,
}

impl<D, T, const N: usize> Inner<D, T, N>
where
    D: OutputDriver,
    T: TimerSource,
{
    fn configure(
        &mut self,
        channel_id: ChannelId,
        config: &ChannelConfig,
        hardware_freq_hz: u32,
    ) -> Result<(), SpwmError> {
        if channel_id >= N {
            return Err(SpwmError::InvalidChannel);
        }

        if config.primary_pin == config.complementary_pin {
            return Err(SpwmError::PinConflict);
        }

        if !self.driver.is_valid(config.primary_pin)
            || !self.driver.is_valid(config.complementary_pin)
        {
            return Err(SpwmError::InvalidPin);
        }

        let pin_taken = self
            .channels
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != channel_id)
            .any(|(_, other)| {
                other.uses_pin(config.primary_pin) || other.uses_pin(config.complementary_pin)
            });

        if pin_taken {
            return Err(SpwmError::PinConflict);
        }

        let timing = config.timing(hardware_freq_hz, T::MAX_TICKS)?;
        let channel = &mut self.channels[channel_id];
        let pins_changed = !channel.configured
            || channel.primary_pin != config.primary_pin
            || channel.complementary_pin != config.complementary_pin;

        if pins_changed {
            let was_active = channel.active;

            channel.halt(&mut self.driver);
            channel.primary_pin = config.primary_pin;
            channel.complementary_pin = config.complementary_pin;
            channel.configured = true;

            for pin in [config.primary_pin, config.complementary_pin] {
                self.driver.make_output(pin);
                self.driver.set_level(pin, PinState::Low);
            }

            channel.stage(timing);

            if was_active {
                channel.arm();
            }
        } else {
            channel.stage(timing);
        }

        channel.freq_hz = config.freq_hz;
        channel.duty_cycle = config.duty_cycle;

        debug!(
            "channel {} configured: period {} on {}",
            channel_id,
            timing.period(),
            timing.on_time()
        );

        Ok(())
    }

    fn update<F>(
        &mut self,
        channel_id: ChannelId,
        hardware_freq_hz: u32,
        update: F,
    ) -> Result<(), SpwmError>
    where
        F: FnOnce(&mut ChannelConfig),
    {
        let channel = self
            .channels
            .get_mut(channel_id)
            .ok_or(SpwmError::InvalidChannel)?;

        if !channel.configured {
            return Err(SpwmError::ChannelNotConfigured);
        }

        let mut config = channel.config();

        update(&mut config);

        let timing = config.timing(hardware_freq_hz, T::MAX_TICKS)?;

        channel.stage(timing);
        channel.freq_hz = config.freq_hz;
        channel.duty_cycle = config.duty_cycle;

        Ok(())
    }

    fn start(&mut self, channel_id: ChannelId) -> Result<(), SpwmError> {
        let channel = self
            .channels
            .get_mut(channel_id)
            .ok_or(SpwmError::InvalidChannel)?;

        if !channel.configured {
            return Err(SpwmError::ChannelNotConfigured);
        }

        if channel.active {
            return Ok(());
        }

        channel.arm();

        if !self.running {
            self.timer.reload(1);
            self.armed_ticks = 1;
            self.timer.start();
            self.running = true;
            info!("timer started by channel {}", channel_id);
        }

        Ok(())
    }

    fn stop(&mut self, channel_id: ChannelId) -> Result<(), SpwmError> {
        let channel = self
            .channels
            .get_mut(channel_id)
            .ok_or(SpwmError::InvalidChannel)?;

        channel.halt(&mut self.driver);

        if self.running && !self.channels.iter().any(|channel| channel.active) {
            self.timer.stop();
            self.running = false;
            info!("timer stopped, no active channels");
        }

        Ok(())
    }

    /// Advances every active channel by one phase.
    fn advance_all(&mut self) -> Option<u32> {
        let mut reload = None;

        for channel in self.channels.iter_mut().filter(|channel| channel.active) {
            reload = Some(channel.advance(&mut self.driver));
        }

        reload
    }

    /// Advances the channels whose current phase has elapsed.
    fn advance_due(&mut self) -> Option<u32> {
        let elapsed = self.armed_ticks;
        let mut reload: Option<u32> = None;

        for channel in self.channels.iter_mut().filter(|channel| channel.active) {
            channel.remaining = channel.remaining.saturating_sub(elapsed);

            if channel.remaining == 0 {
                channel.advance(&mut self.driver);
            }

            reload = Some(reload.map_or(channel.remaining, |ticks| ticks.min(channel.remaining)));
        }

        reload
    }
}

/// Software PWM scheduler for `N` complementary channels sharing one timer.
pub struct Spwm<D, T, const N: usize> {
    inner: Mutex<RefCell<Inner<D, T, N>>>,
    freq_hz: u32,
    policy: ReloadPolicy,
}

impl<D, T, const N: usize> Spwm<D, T, N>
where
    D: OutputDriver,
    T: TimerSource,
{
    /// Creates a scheduler for a timer whose input clock runs at `freq_hz`.
    ///
    /// Nothing is written to the hardware until [`Spwm::init`].
    pub fn new(freq_hz: u32, driver: D, timer: T) -> Result<Self, SpwmError> {
        if freq_hz == 0 {
            return Err(SpwmError::InvalidHardwareFrequency);
        }

        Ok(Self {
            inner: Mutex::new(RefCell::new(Inner {
                channels: [SpwmChannel::default(); N],
                driver,
                timer,
                armed_ticks: 0,
                running: false,
                overruns: 0,
            })),
            freq_hz,
            policy: ReloadPolicy::default(),
        })
    }

    #[must_use]
    pub fn with_reload_policy(mut self, policy: ReloadPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn reload_policy(&self) -> ReloadPolicy {
        self.policy
    }

    pub fn hardware_freq_hz(&self) -> u32 {
        self.freq_hz
    }

    /// Releases the output driver and the timer.
    pub fn free(self) -> (D, T) {
        let inner = self.inner.into_inner().into_inner();

        (inner.driver, inner.timer)
    }

    /// Pulls every configured output low, forgets all channels and prepares
    /// the timer with its interrupt enabled.
    pub fn init(&self) {
        critical_section::with(|cs| {
            let mut guard = self.inner.borrow_ref_mut(cs);
            let inner = &mut *guard;

            for channel in inner.channels.iter_mut() {
                channel.halt(&mut inner.driver);
                *channel = SpwmChannel::default();
            }

            inner.timer.listen();
            inner.armed_ticks = 0;
            inner.running = false;
            inner.overruns = 0;
        });
    }

    pub fn create_channel(&self) -> SpwmChannelBuilder<SpwmChannelPinsBuildState> {
        SpwmChannelBuilder::with_max_ticks(self.freq_hz, T::MAX_TICKS)
    }

    /// Configures channel `channel_id`, replacing any previous configuration.
    ///
    /// The pins are switched to outputs and pulled low. On a running channel
    /// with unchanged pins the new timing takes effect at the next period
    /// boundary; if the pins change the cycle restarts on the new pins.
    /// Nothing is changed when an error is returned.
    pub fn configure(&self, channel_id: ChannelId, config: &ChannelConfig) -> Result<(), SpwmError> {
        critical_section::with(|cs| {
            self.inner
                .borrow_ref_mut(cs)
                .configure(channel_id, config, self.freq_hz)
        })
        .inspect_err(|e| warn!("channel {} rejected configuration: {}", channel_id, e))
    }

    /// Configures the first unconfigured channel and returns its index.
    pub fn register_channel(&self, config: &ChannelConfig) -> Result<ChannelId, SpwmError> {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            let channel_id = inner
                .channels
                .iter()
                .position(|channel| !channel.configured)
                .ok_or(SpwmError::NoChannelSlotAvailable)?;

            inner.configure(channel_id, config, self.freq_hz)?;

            Ok(channel_id)
        })
    }

    /// Returns a snapshot of channel `channel_id`.
    pub fn channel(&self, channel_id: ChannelId) -> Option<SpwmChannel> {
        critical_section::with(|cs| self.inner.borrow_ref(cs).channels.get(channel_id).copied())
    }

    /// Changes the frequency of a channel while keeping its duty cycle.
    pub fn set_frequency(&self, channel_id: ChannelId, freq_hz: u32) -> Result<(), SpwmError> {
        critical_section::with(|cs| {
            self.inner
                .borrow_ref_mut(cs)
                .update(channel_id, self.freq_hz, |config| config.freq_hz = freq_hz)
        })
    }

    pub fn set_duty_cycle(&self, channel_id: ChannelId, duty_cycle: u8) -> Result<(), SpwmError> {
        critical_section::with(|cs| {
            self.inner
                .borrow_ref_mut(cs)
                .update(channel_id, self.freq_hz, |config| {
                    config.duty_cycle = duty_cycle
                })
        })
    }

    pub fn set_dead_time(&self, channel_id: ChannelId, rise: u32, fall: u32) -> Result<(), SpwmError> {
        critical_section::with(|cs| {
            self.inner
                .borrow_ref_mut(cs)
                .update(channel_id, self.freq_hz, |config| {
                    config.dead_time_rise = rise;
                    config.dead_time_fall = fall;
                })
        })
    }

    /// Starts a configured channel. The first start arms the timer for an
    /// expiry one tick later.
    pub fn start(&self, channel_id: ChannelId) -> Result<(), SpwmError> {
        critical_section::with(|cs| self.inner.borrow_ref_mut(cs).start(channel_id))
    }

    /// Stops a channel and pulls both of its outputs low before returning.
    /// The timer stops with the last active channel.
    pub fn stop(&self, channel_id: ChannelId) -> Result<(), SpwmError> {
        critical_section::with(|cs| self.inner.borrow_ref_mut(cs).stop(channel_id))
    }

    /// Number of expiries that arrived while the handler was still running.
    pub fn overruns(&self) -> u32 {
        critical_section::with(|cs| self.inner.borrow_ref(cs).overruns)
    }

    /// Timer interrupt entry point.
    pub fn irq_handler(&self) {
        critical_section::with(|cs| {
            let mut guard = self.inner.borrow_ref_mut(cs);
            let inner = &mut *guard;

            if !inner.timer.is_interrupt_set() {
                return;
            }

            inner.timer.clear_interrupt();

            let reload = match self.policy {
                ReloadPolicy::LastWriter => inner.advance_all(),
                ReloadPolicy::EarliestDeadline => inner.advance_due(),
            };

            match reload {
                Some(ticks) => {
                    inner.timer.reload(ticks);
                    inner.armed_ticks = ticks;
                }
                None => {
                    inner.timer.stop();
                    inner.running = false;
                }
            }

            if inner.timer.is_interrupt_set() {
                inner.overruns = inner.overruns.wrapping_add(1);
                warn!("timer expired during update, {} overruns", inner.overruns);
            }
        });
    }
}
