//! Simulated irrigation stream
//!
//! Drives a full ingestion context from the synthetic pump engine and prints
//! each processed sample. Accepts the engine's CLI flags:
//!
//! ```text
//! cargo run --example 01_simulated_stream -- --duration 30 --interval 500 --pump-pattern 4:8
//! ```

use std::thread;
use std::time::Duration;

use irriguard_core::{StreamContext, SynthConfig, SyntheticSampleEngine};

fn main() {
    env_logger::init();

    let cfg = match SynthConfig::from_args(std::env::args().skip(1)) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(2);
        }
    };

    let interval = Duration::from_millis(cfg.tick_interval_ms);
    let total_ticks = cfg
        .duration_secs
        .map(|secs| (secs * 1000).div_ceil(cfg.tick_interval_ms))
        .unwrap_or(30);

    let mut engine = SyntheticSampleEngine::new(cfg);
    let mut ctx = StreamContext::builder().build();

    ctx.subscribe_notifications(|n| {
        println!("  [{}] #{} {}", n.severity.as_str(), n.id, n.message);
    });

    println!("tick  pump  flow L/s  total L  moisture %");
    for _ in 0..total_ticks {
        let raw = engine.tick();
        if let Some(p) = ctx.ingest(&raw) {
            println!(
                "{:>5}  {:>4}  {:>8.2}  {:>7.2}  {:>10.1}",
                p.canonical.ts_millis % 100_000,
                if p.canonical.pump_on { "ON" } else { "off" },
                p.water.instantaneous_lps,
                p.water.cumulative_liters,
                p.display.soil_moisture.unwrap_or(0.0),
            );
        }
        thread::sleep(interval);
    }

    let stats = ctx.normalizer_stats();
    println!(
        "\naccepted {} samples, dropped {}, {} notifications",
        stats.accepted,
        stats.dropped,
        ctx.log().len()
    );
}
