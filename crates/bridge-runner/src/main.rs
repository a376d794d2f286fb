//! Headless bridge demo runner.
//!
//! Builds a bridge + RAM system, optionally reconfigures the latency class,
//! runs a sequential write burst followed by readbacks, and reports
//! per-request timing. `--trace` prints the observability word every cycle.

use bridge_core::MasterClock;
use bridge_harness::{BusMaster, System};
use hyperbus_bridge::{AddressWidth, BusRequest, TimingConfig};
use hyperram_model::DeviceConfig;
use clap::Parser;
use log::info;

/// Command-line arguments.
#[derive(Parser)]
#[command(about = "Drive a demo transaction script through the bridge")]
struct Cli {
    /// Master clock frequency in MHz.
    #[arg(long, default_value_t = 83)]
    clock_mhz: u64,

    /// Use the wide address-width configuration.
    #[arg(long)]
    wide: bool,

    /// The modelled part requests additional latency on every transaction.
    #[arg(long)]
    extra_latency: bool,

    /// Strobe return-path delay in cycles.
    #[arg(long, default_value_t = 0)]
    sample_delay: u8,

    /// Configuration-register payload written before the burst (hex).
    #[arg(long)]
    config: Option<String>,

    /// Number of sequential words in the demo burst.
    #[arg(long, default_value_t = 8)]
    burst: u32,

    /// First word address of the burst (hex).
    #[arg(long, default_value = "100")]
    base: String,

    /// Print the observability word every cycle.
    #[arg(long)]
    trace: bool,
}

fn parse_hex(text: &str) -> Result<u32, String> {
    u32::from_str_radix(text.trim_start_matches("0x"), 16)
        .map_err(|e| format!("bad hex value '{text}': {e}"))
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let width = if cli.wide {
        AddressWidth::Wide
    } else {
        AddressWidth::Narrow
    };
    let cfg = match TimingConfig::new(MasterClock::new(cli.clock_mhz * 1_000_000), width)
        .and_then(|c| c.with_sample_delay(cli.sample_delay))
    {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };
    let base = match parse_hex(&cli.base) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let mut sys = System::new(
        cfg,
        DeviceConfig {
            extra_latency: cli.extra_latency,
            ..DeviceConfig::default()
        },
    );
    sys.settle();
    info!(
        "system settled: {} MHz, latency floor {} cycles, select window {} cycles",
        cli.clock_mhz,
        cfg.min_latency(),
        cfg.max_select
    );

    let mut master = BusMaster::new();
    if let Some(text) = cli.config.as_deref() {
        match parse_hex(text) {
            Ok(value) => master.push(BusRequest::register_write(0, value as u16)),
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(1);
            }
        }
    }
    for i in 0..cli.burst {
        master.push(BusRequest::write(base + i, 0xD000_0000 + i));
    }
    for i in 0..cli.burst {
        master.push(BusRequest::read(base + i));
    }

    let limit = 50_000;
    let mut cycles = 0_u64;
    while !master.idle() {
        sys.prepare();
        master.drive(&mut sys.bridge);
        sys.commit();
        master.observe(&sys.bridge);
        if cli.trace {
            println!("cycle {:5}  debug {:#010X}", master.cycle(), sys.bridge.debug_word());
        }
        cycles += 1;
        if cycles > limit {
            eprintln!("script did not complete within {limit} cycles");
            std::process::exit(1);
        }
    }

    println!("completed {} requests in {cycles} cycles", master.completions().len());
    println!("  {:<28} {:>10} {:>8} {:>12}", "request", "accepted", "delay", "data");
    let mut failures = 0;
    for c in master.completions() {
        let kind = if c.request.we { "write" } else { "read" };
        let data = c
            .data
            .map_or_else(String::new, |d| format!("{d:#010X}"));
        println!(
            "  {kind:<6} {:#08X} {:>12} {:>8} {data:>12}",
            c.request.addr,
            c.accepted_at,
            c.ack_delay()
        );
        if let Some(d) = c.data {
            if !c.request.we
                && c.request.space == hyperbus_bridge::Space::Memory
                && d != 0xD000_0000 + (c.request.addr - base)
            {
                failures += 1;
            }
        }
    }
    if failures > 0 {
        eprintln!("{failures} readback mismatches");
        std::process::exit(1);
    }
    println!("all readbacks match");
}
