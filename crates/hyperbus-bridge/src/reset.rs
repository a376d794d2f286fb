//! Device reset sequencing.
//!
//! Holds the device reset line low for the minimum pulse width, then holds a
//! maintenance state for the recovery interval before any transaction is
//! admitted. A liveness gate, not an error path.

use bridge_core::Ticks;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResetState {
    /// Reset line driven low.
    PulseLow { remaining: u64 },
    /// Reset released, device recovering; admission still blocked.
    Recovery { remaining: u64 },
    /// Transactions may be admitted.
    Ready,
}

/// Reset sequencer for the device reset line.
#[derive(Debug, Clone, Copy)]
pub struct ResetSequencer {
    state: ResetState,
    pulse: u64,
    recovery: u64,
}

impl ResetSequencer {
    /// Start a sequencer that will hold reset low for `pulse` cycles and
    /// then recover for `recovery` cycles.
    #[must_use]
    pub fn new(pulse: Ticks, recovery: Ticks) -> Self {
        Self {
            state: ResetState::PulseLow {
                remaining: pulse.get(),
            },
            pulse: pulse.get(),
            recovery: recovery.get(),
        }
    }

    /// Re-enter the reset pulse (system reset).
    pub fn restart(&mut self) {
        self.state = ResetState::PulseLow {
            remaining: self.pulse,
        };
    }

    /// Advance one cycle.
    pub fn tick(&mut self) {
        self.state = match self.state {
            ResetState::PulseLow { remaining } if remaining > 1 => ResetState::PulseLow {
                remaining: remaining - 1,
            },
            ResetState::PulseLow { .. } => ResetState::Recovery {
                remaining: self.recovery,
            },
            ResetState::Recovery { remaining } if remaining > 1 => ResetState::Recovery {
                remaining: remaining - 1,
            },
            ResetState::Recovery { .. } | ResetState::Ready => ResetState::Ready,
        };
    }

    /// Level of the device reset line (active low).
    #[must_use]
    pub fn reset_n(&self) -> bool {
        !matches!(self.state, ResetState::PulseLow { .. })
    }

    /// The post-reset maintenance hold is still in effect.
    #[must_use]
    pub fn maintenance(&self) -> bool {
        matches!(self.state, ResetState::Recovery { .. })
    }

    /// Transactions may be admitted.
    #[must_use]
    pub fn ready(&self) -> bool {
        matches!(self.state, ResetState::Ready)
    }
}
