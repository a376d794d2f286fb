//! A scripted upstream bus master.

use std::collections::VecDeque;

use hyperbus_bridge::{Bridge, BusRequest};
use log::trace;
use thiserror::Error;

use crate::System;

/// A completed request with its timing.
#[derive(Debug, Clone, Copy)]
pub struct Completion {
    pub request: BusRequest,
    /// Cycle the request was accepted (strobe high, stall low).
    pub accepted_at: u64,
    /// Cycle the acknowledgment pulsed.
    pub acked_at: u64,
    /// Read result, captured the cycle after the acknowledgment.
    pub data: Option<u32>,
}

impl Completion {
    /// Cycles from acceptance to acknowledgment.
    #[must_use]
    pub fn ack_delay(&self) -> u64 {
        self.acked_at - self.accepted_at
    }
}

/// Errors from driving a request script.
#[derive(Debug, Error)]
pub enum RunError {
    /// The script did not complete within the cycle budget.
    #[error("script incomplete after {0} cycles ({1} requests outstanding)")]
    Timeout(u64, usize),
}

/// A scripted initiator: queued requests are presented back-to-back,
/// honouring stall, so sequential runs naturally exercise burst chaining.
#[derive(Debug, Default)]
pub struct BusMaster {
    queue: VecDeque<BusRequest>,
    inflight: VecDeque<(BusRequest, u64)>,
    completions: Vec<Completion>,
    pending_data: Option<usize>,
    cycle: u64,
}

impl BusMaster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a request for issue.
    pub fn push(&mut self, request: BusRequest) {
        self.queue.push_back(request);
    }

    /// All queued requests have been issued, acknowledged, and read back.
    #[must_use]
    pub fn idle(&self) -> bool {
        self.queue.is_empty() && self.inflight.is_empty() && self.pending_data.is_none()
    }

    /// Completions in acknowledgment order.
    #[must_use]
    pub fn completions(&self) -> &[Completion] {
        &self.completions
    }

    /// Current cycle count.
    #[must_use]
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Drive the bus pins for this cycle. Records an acceptance when the
    /// bridge's stall is low while the strobe is presented.
    pub fn drive(&mut self, bridge: &mut Bridge) {
        self.cycle += 1;
        bridge.bus_in.cyc = true;
        if let Some(&req) = self.queue.front() {
            bridge.bus_in.stb = true;
            bridge.bus_in.we = req.we;
            bridge.bus_in.addr = req.pin_address();
            bridge.bus_in.data = req.data;
            bridge.bus_in.sel = req.sel;
            if !bridge.stall() {
                trace!("cycle {}: issued {:?}", self.cycle, req);
                self.inflight.push_back((req, self.cycle));
                self.queue.pop_front();
            }
        } else {
            bridge.bus_in.stb = false;
        }
    }

    /// Observe the bridge outputs after the clock edge.
    pub fn observe(&mut self, bridge: &Bridge) {
        if let Some(idx) = self.pending_data.take() {
            self.completions[idx].data = Some(bridge.read_data());
        }
        if bridge.ack() {
            if let Some((request, accepted_at)) = self.inflight.pop_front() {
                trace!("cycle {}: acked {:?}", self.cycle, request);
                let idx = self.completions.len();
                self.completions.push(Completion {
                    request,
                    accepted_at,
                    acked_at: self.cycle,
                    data: None,
                });
                if !request.we {
                    self.pending_data = Some(idx);
                }
            }
        }
    }
}

/// Run the master's script against the system until it drains or the cycle
/// budget runs out.
pub fn run(system: &mut System, master: &mut BusMaster, limit: u64) -> Result<(), RunError> {
    for _ in 0..limit {
        system.prepare();
        master.drive(&mut system.bridge);
        system.commit();
        master.observe(&system.bridge);
        if master.idle() {
            return Ok(());
        }
    }
    Err(RunError::Timeout(limit, master.inflight.len() + master.queue.len()))
}
