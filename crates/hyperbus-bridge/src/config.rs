//! Timing and latency configuration.
//!
//! All electrical constants come from the device datasheet and are converted
//! to whole cycles of the master clock at construction time. Validation
//! happens once, here; the per-cycle logic never re-checks.

use bridge_core::{MasterClock, Ticks};
use log::warn;
use thiserror::Error;

/// Minimum reset pulse width in nanoseconds.
pub const RESET_PULSE_NS: u64 = 200;
/// Recovery interval after reset release, before the first transaction.
pub const RESET_RECOVERY_NS: u64 = 400;
/// Maximum continuous chip-select assertion in nanoseconds.
pub const SELECT_WINDOW_NS: u64 = 4_000;

/// Maximum supported strobe return-path delay in cycles.
pub const MAX_SAMPLE_DELAY: u8 = 4;

/// Widest latency count the configuration register can encode.
pub const LATENCY_MAX: u8 = 6;

/// Headroom kept below the select-window limit before burst chaining is
/// refused: two data cycles plus close slack.
pub const CHAIN_MARGIN: u64 = 4;

/// Address-width configuration of the attached part.
///
/// Narrow parts honour the fixed-latency bit of the configuration register;
/// wide parts always use variable, device-confirmed latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressWidth {
    /// 21-bit word addressing (small parts).
    Narrow,
    /// 29-bit word addressing (the full command-word address field).
    Wide,
}

impl AddressWidth {
    /// Whether the fixed-latency mode bit of the configuration register is
    /// honoured in this configuration.
    #[must_use]
    pub const fn honors_fixed_latency(self) -> bool {
        matches!(self, AddressWidth::Narrow)
    }

    /// Number of word-address bits.
    #[must_use]
    pub const fn word_bits(self) -> u32 {
        match self {
            AddressWidth::Narrow => 21,
            AddressWidth::Wide => 29,
        }
    }

    /// Mask selecting the in-range word-address bits.
    #[must_use]
    pub const fn word_mask(self) -> u32 {
        (1 << self.word_bits()) - 1
    }
}

/// Configuration errors reported at construction time.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The master clock is outside the range the part supports.
    #[error("clock frequency {0} Hz outside the supported 10-166 MHz range")]
    ClockOutOfRange(u64),

    /// The select window cannot cover even one full transaction.
    #[error("select window of {got} cycles cannot cover one transaction ({need} cycles)")]
    SelectWindowTooShort { got: u64, need: u64 },

    /// The strobe return-path delay exceeds what the sequencer absorbs.
    #[error("strobe sample delay {0} exceeds the supported maximum {MAX_SAMPLE_DELAY}")]
    SampleDelayTooLong(u8),
}

/// Static timing parameters for one bridge instance.
#[derive(Debug, Clone, Copy)]
pub struct TimingConfig {
    /// Master clock both sides run from.
    pub clock: MasterClock,
    /// Address-width configuration of the attached part.
    pub address_width: AddressWidth,
    /// Cycles the device reset line is held low.
    pub reset_pulse: Ticks,
    /// Cycles of maintenance hold after reset release.
    pub recovery: Ticks,
    /// Maximum continuous chip-select assertion in cycles.
    pub max_select: u64,
    /// Strobe return-path delay in cycles.
    pub sample_delay: u8,
    /// Burst chaining of sequential same-direction memory requests.
    pub chaining: bool,
}

impl TimingConfig {
    /// Build a configuration from the master clock and address width, with
    /// datasheet-default electrical constants.
    pub fn new(clock: MasterClock, address_width: AddressWidth) -> Result<Self, ConfigError> {
        if !(10_000_000..=166_000_000).contains(&clock.frequency_hz) {
            return Err(ConfigError::ClockOutOfRange(clock.frequency_hz));
        }
        let max_select = clock.cycles_for_ns(SELECT_WINDOW_NS).get();
        let need = Self::longest_transaction_cycles() + CHAIN_MARGIN;
        if max_select < need {
            return Err(ConfigError::SelectWindowTooShort {
                got: max_select,
                need,
            });
        }
        Ok(Self {
            clock,
            address_width,
            reset_pulse: clock.cycles_for_ns(RESET_PULSE_NS),
            recovery: clock.cycles_for_ns(RESET_RECOVERY_NS),
            max_select,
            sample_delay: 0,
            chaining: true,
        })
    }

    /// Set the strobe return-path delay.
    pub fn with_sample_delay(mut self, cycles: u8) -> Result<Self, ConfigError> {
        if cycles > MAX_SAMPLE_DELAY {
            return Err(ConfigError::SampleDelayTooLong(cycles));
        }
        self.sample_delay = cycles;
        Ok(self)
    }

    /// Override the select window, clamped validation as in `new`.
    pub fn with_max_select(mut self, cycles: u64) -> Result<Self, ConfigError> {
        let need = Self::longest_transaction_cycles() + CHAIN_MARGIN;
        if cycles < need {
            return Err(ConfigError::SelectWindowTooShort { got: cycles, need });
        }
        self.max_select = cycles;
        Ok(self)
    }

    /// Smallest latency count the clock frequency permits.
    ///
    /// The part needs more wait states as the clock speeds up; this is the
    /// standard speed-grade ladder.
    #[must_use]
    pub fn min_latency(&self) -> u8 {
        match self.clock.frequency_hz {
            f if f <= 85_000_000 => 3,
            f if f <= 104_000_000 => 4,
            f if f <= 133_000_000 => 5,
            _ => 6,
        }
    }

    /// Open-to-close length of the longest single transaction: opening,
    /// command drain, doubled maximum latency, two data cycles.
    #[must_use]
    pub const fn longest_transaction_cycles() -> u64 {
        1 + 3 + 2 * LATENCY_MAX as u64 + 2
    }
}

/// Persisted latency configuration, loaded from configuration-register
/// writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyConfig {
    /// Wait cycles between command end and the first data cycle.
    pub cycles: u8,
    /// Fixed-latency mode: the wait is always doubled, never negotiated.
    pub fixed: bool,
}

impl LatencyConfig {
    /// Power-on state: the slowest latency class, variable mode.
    #[must_use]
    pub const fn power_on() -> Self {
        Self {
            cycles: LATENCY_MAX,
            fixed: false,
        }
    }

    /// Decode a configuration-register write payload.
    ///
    /// Bits `[7:4]` select the latency class, bit `[3]` the fixed-latency
    /// mode. The mode bit is only honoured on narrow parts. A class below
    /// the frequency floor is clamped up.
    #[must_use]
    pub fn decode(value: u16, width: AddressWidth, floor: u8) -> Self {
        let cycles = match (value >> 4) & 0xF {
            0x0 => 5,
            0x1 => 6,
            0xE => 3,
            0xF => 4,
            _ => LATENCY_MAX,
        };
        let cycles = if cycles < floor {
            warn!(
                "latency class {:#X} decodes to {} cycles, below the {} cycle floor; clamped",
                (value >> 4) & 0xF,
                cycles,
                floor
            );
            floor
        } else {
            cycles
        };
        Self {
            cycles,
            fixed: width.honors_fixed_latency() && (value & 0b1000) != 0,
        }
    }
}
