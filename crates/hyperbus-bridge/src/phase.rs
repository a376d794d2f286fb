//! Transaction phase state.

/// The phase of the open device transaction.
///
/// One value per cycle: the variant describes the cycle currently on the
/// wire. `Opening` is the chip-select setup cycle between acceptance and the
/// first command half; it is also the one-cycle back-pressure the admission
/// controller applies after accepting a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Chip select deasserted, no transaction open.
    Idle,
    /// Chip select asserting, command word latched, nothing driven yet.
    Opening,
    /// Command word draining; `remaining` counts 3 down to 1.
    Command { remaining: u8 },
    /// Waiting out the latency interval before the data phase.
    LatencyWait { remaining: u8 },
    /// Streaming data halves; `remaining` counts down to 1 on the final
    /// data cycle.
    Data { remaining: u8 },
}

impl Phase {
    #[must_use]
    pub fn is_idle(self) -> bool {
        matches!(self, Phase::Idle)
    }

    /// A short name for traces and state queries.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Opening => "opening",
            Phase::Command { .. } => "command",
            Phase::LatencyWait { .. } => "latency-wait",
            Phase::Data { .. } => "data",
        }
    }
}
