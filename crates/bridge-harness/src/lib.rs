//! System wiring and a scripted bus master.
//!
//! `System` owns a bridge and a RAM part and advances both in one clock
//! domain, cross-sampling each side's previous-cycle outputs the way two
//! registered devices on one board do. `BusMaster` plays the upstream
//! initiator: it presents queued requests, honours stall, and collects
//! acknowledgments and read data with cycle timestamps, which is what the
//! timing assertions in the integration tests run on.

mod master;
mod system;

pub use master::{BusMaster, Completion, RunError, run};
pub use system::System;
