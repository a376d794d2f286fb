//! Bridge + RAM part wired into one clock domain.

use bridge_core::Tickable;
use hyperbus_bridge::{Bridge, DeviceInputs, TimingConfig};
use hyperram_model::{DeviceConfig, DevicePins, HyperRam};

/// The bridge and the RAM part it serves.
pub struct System {
    pub bridge: Bridge,
    pub device: HyperRam,
}

impl System {
    #[must_use]
    pub fn new(cfg: TimingConfig, dev_cfg: DeviceConfig) -> Self {
        Self {
            bridge: Bridge::new(cfg),
            device: HyperRam::new(dev_cfg),
        }
    }

    /// Cross-wire the previous cycle's outputs into this cycle's inputs.
    ///
    /// Both sides are registered: each samples what the other drove last
    /// cycle. Call once per tick, before driving the bus pins.
    pub fn prepare(&mut self) {
        self.bridge.dev_in = DeviceInputs {
            rwds: self.device.rwds(),
            data: self.device.data(),
        };
        self.device.pins = DevicePins {
            reset_n: self.bridge.reset_out_n(),
            ck_en: self.bridge.clock_enable(),
            cs_n: self.bridge.chip_select_n(),
            rwds: self.bridge.strobe_out(),
            data: self.bridge.data_out(),
            drive_en: self.bridge.drive_enable(),
        };
    }

    /// Advance both sides one clock edge.
    pub fn commit(&mut self) {
        self.bridge.tick();
        self.device.tick();
    }

    /// `prepare` + `commit`, for ticking without a bus master in between.
    pub fn tick(&mut self) {
        self.prepare();
        self.commit();
    }

    /// Tick until the bridge admits requests (reset pulse plus recovery).
    pub fn settle(&mut self) {
        self.bridge.bus_in.cyc = true;
        while self.bridge.stall() {
            self.tick();
        }
    }
}
