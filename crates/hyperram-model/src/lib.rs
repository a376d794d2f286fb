//! Behavioral model of a DDR-style serialized RAM part.
//!
//! The part decodes 48-bit command words arriving as three 16-bit halves,
//! signals its latency needs on the 2-bit strobe channel, waits out the
//! latency interval, then streams 16-bit data halves as a linear burst until
//! chip select deasserts. Byte masks ride the strobe lanes active-low during
//! writes; the data-valid pattern rides them during reads.
//!
//! Behavioral, not electrical: no DDR serialization, no analog timing. The
//! model exists to close the loop for the bridge in system tests and the
//! runner.

use bridge_core::{Observable, Tickable, Value};
use hyperbus_bridge::{AddressWidth, LatencyConfig, RWDS_DATA_VALID};
use log::{debug, trace};

/// Pin inputs from the bridge, sampled every tick.
#[derive(Debug, Clone, Copy)]
pub struct DevicePins {
    /// Reset line (active low).
    pub reset_n: bool,
    /// Clock enable.
    pub ck_en: bool,
    /// Chip select (active low).
    pub cs_n: bool,
    /// 2-bit strobe lanes as driven by the bridge (byte masks during
    /// writes).
    pub rwds: u8,
    /// 16-bit data half driven by the bridge.
    pub data: u16,
    /// The bridge is driving the data bus this cycle.
    pub drive_en: bool,
}

impl Default for DevicePins {
    fn default() -> Self {
        Self {
            reset_n: true,
            ck_en: false,
            cs_n: true,
            rwds: 0,
            data: 0,
            drive_en: false,
        }
    }
}

/// Model configuration.
#[derive(Debug, Clone, Copy)]
pub struct DeviceConfig {
    /// Storage capacity in 16-bit halfwords; rounded up to a power of two.
    pub capacity_halfwords: usize,
    /// The part asks for additional latency on every transaction (drives
    /// the strobe high during the command window even outside fixed mode).
    pub extra_latency: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            capacity_halfwords: 64 * 1024,
            extra_latency: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DevPhase {
    /// Deselected.
    Idle,
    /// Collecting command halves.
    Collect,
    /// Counting out the latency interval.
    Latency,
    /// Streaming read halves until deselect.
    StreamRead,
    /// Sampling write halves until deselect.
    StreamWrite,
    /// Waiting for the single register data half.
    RegisterWrite,
    /// Driving the single register data half.
    RegisterRead,
}

/// The RAM part.
pub struct HyperRam {
    /// Pin inputs, wired from the bridge outputs each cycle.
    pub pins: DevicePins,

    storage: Vec<u16>,
    addr_mask: u32,
    /// Configuration register: latency class, fixed-latency mode.
    cr: u16,
    extra_latency: bool,

    phase: DevPhase,
    halves: [u16; 3],
    collected: u8,
    /// Decoded: this transaction is a write.
    write_txn: bool,
    /// Decoded: this transaction targets the register file.
    register_txn: bool,
    /// Current halfword pointer of the linear burst.
    burst_addr: u32,
    latency_remaining: u8,

    rwds_out: u8,
    data_out: u16,
    driving: bool,
}

/// Power-on configuration-register value: slowest latency class, variable
/// mode.
const CR_POWER_ON: u16 = 0x0010;

impl HyperRam {
    #[must_use]
    pub fn new(config: DeviceConfig) -> Self {
        let capacity = config.capacity_halfwords.next_power_of_two();
        Self {
            pins: DevicePins::default(),
            storage: vec![0; capacity],
            addr_mask: (capacity - 1) as u32,
            cr: CR_POWER_ON,
            extra_latency: config.extra_latency,
            phase: DevPhase::Idle,
            halves: [0; 3],
            collected: 0,
            write_txn: false,
            register_txn: false,
            burst_addr: 0,
            latency_remaining: 0,
            rwds_out: 0,
            data_out: 0,
            driving: false,
        }
    }

    // --- Outputs toward the bridge ---

    /// The 2-bit strobe lanes the part drives: the additional-latency
    /// indication during the command window, the data-valid pattern during
    /// read streaming.
    #[must_use]
    pub fn rwds(&self) -> u8 {
        self.rwds_out
    }

    /// The 16-bit data half the part presents.
    #[must_use]
    pub fn data(&self) -> u16 {
        self.data_out
    }

    /// The part is driving the data bus.
    #[must_use]
    pub fn driving(&self) -> bool {
        self.driving
    }

    /// Direct storage access for tests and tooling: the halfword at `index`.
    #[must_use]
    pub fn peek(&self, index: u32) -> u16 {
        self.storage[(index & self.addr_mask) as usize]
    }

    /// Direct storage access for tests and tooling.
    pub fn poke(&mut self, index: u32, value: u16) {
        let mask = self.addr_mask;
        self.storage[(index & mask) as usize] = value;
    }

    /// The configuration register.
    #[must_use]
    pub fn config_register(&self) -> u16 {
        self.cr
    }

    // --- Internals ---

    fn latency_cycles(&self) -> u8 {
        LatencyConfig::decode(self.cr, AddressWidth::Narrow, 3).cycles
    }

    fn fixed_latency(&self) -> bool {
        LatencyConfig::decode(self.cr, AddressWidth::Narrow, 3).fixed
    }

    /// The part wants the doubled latency interval for memory transactions.
    fn wants_double(&self) -> bool {
        self.fixed_latency() || self.extra_latency
    }

    fn decode_command(&mut self) {
        let ca = (u64::from(self.halves[0]) << 32)
            | (u64::from(self.halves[1]) << 16)
            | u64::from(self.halves[2]);
        self.write_txn = ca & (1 << 47) == 0;
        self.register_txn = ca & (1 << 46) != 0;
        let upper = ((ca >> 16) & 0x1FFF_FFFF) as u32;
        self.burst_addr = (upper << 3) | (ca as u32 & 0b111);
        let wait = if self.register_txn || !self.wants_double() {
            self.latency_cycles()
        } else {
            2 * self.latency_cycles()
        };
        self.latency_remaining = wait;
        trace!(
            "command: {} {} halfword {:#X}, {} wait cycles",
            if self.write_txn { "write" } else { "read" },
            if self.register_txn { "register" } else { "memory" },
            self.burst_addr,
            wait
        );
    }

    /// Apply one write half at the burst pointer, honouring the active-low
    /// byte masks on the strobe lanes (lane 1 = high byte, lane 0 = low).
    fn apply_write_half(&mut self, half: u16, lanes: u8) {
        let index = (self.burst_addr & self.addr_mask) as usize;
        let mut value = self.storage[index];
        if lanes & 0b10 == 0 {
            value = (value & 0x00FF) | (half & 0xFF00);
        }
        if lanes & 0b01 == 0 {
            value = (value & 0xFF00) | (half & 0x00FF);
        }
        self.storage[index] = value;
    }

    fn enter_stream(&mut self) {
        if self.register_txn {
            if self.write_txn {
                self.phase = DevPhase::RegisterWrite;
            } else {
                // Drive the register value for the single data cycle
                let reg = self.burst_addr >> 1;
                self.data_out = if reg == 0 { self.cr } else { 0 };
                self.rwds_out = RWDS_DATA_VALID;
                self.driving = true;
                self.phase = DevPhase::RegisterRead;
            }
        } else if self.write_txn {
            self.phase = DevPhase::StreamWrite;
        } else {
            self.drive_read_half();
            self.phase = DevPhase::StreamRead;
        }
    }

    fn drive_read_half(&mut self) {
        self.data_out = self.storage[(self.burst_addr & self.addr_mask) as usize];
        self.rwds_out = RWDS_DATA_VALID;
        self.driving = true;
        self.burst_addr = self.burst_addr.wrapping_add(1);
    }
}

impl Tickable for HyperRam {
    fn tick(&mut self) {
        if !self.pins.reset_n {
            // Reset low: clear transaction state and the configuration
            // register.
            self.phase = DevPhase::Idle;
            self.cr = CR_POWER_ON;
            self.rwds_out = 0;
            self.data_out = 0;
            self.driving = false;
            return;
        }
        if self.pins.cs_n {
            if self.phase != DevPhase::Idle {
                trace!("deselected");
            }
            self.phase = DevPhase::Idle;
            self.rwds_out = 0;
            self.data_out = 0;
            self.driving = false;
            return;
        }

        match self.phase {
            DevPhase::Idle => {
                // Select asserted: command window opens next cycle. Signal
                // the latency need on the strobe for the whole window.
                self.phase = DevPhase::Collect;
                self.collected = 0;
                self.rwds_out = if self.wants_double() { 0b11 } else { 0b00 };
                self.driving = false;
            }
            DevPhase::Collect => {
                if self.pins.drive_en {
                    self.halves[self.collected as usize] = self.pins.data;
                    self.collected += 1;
                    if self.collected == 3 {
                        self.decode_command();
                        self.rwds_out = 0;
                        self.phase = DevPhase::Latency;
                    }
                }
            }
            DevPhase::Latency => {
                self.latency_remaining -= 1;
                if self.latency_remaining == 0 {
                    self.enter_stream();
                }
            }
            DevPhase::StreamRead => self.drive_read_half(),
            DevPhase::StreamWrite => {
                if self.pins.drive_en {
                    let half = self.pins.data;
                    let lanes = self.pins.rwds & 0b11;
                    self.apply_write_half(half, lanes);
                    self.burst_addr = self.burst_addr.wrapping_add(1);
                }
            }
            DevPhase::RegisterWrite => {
                if self.pins.drive_en {
                    let reg = self.burst_addr >> 1;
                    if reg == 0 && self.pins.rwds & 0b11 != 0b11 {
                        self.cr = self.pins.data;
                        debug!("configuration register now {:#06X}", self.cr);
                    }
                    self.phase = DevPhase::Idle;
                }
            }
            DevPhase::RegisterRead => {
                // Single data half driven; hold until deselect
                self.driving = false;
                self.rwds_out = 0;
            }
        }
    }
}

impl Observable for HyperRam {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "config_register" => Some(self.cr.into()),
            "burst_addr" => Some(self.burst_addr.into()),
            "driving" => Some(self.driving.into()),
            _ => None,
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        &["config_register", "burst_addr", "driving"]
    }
}
