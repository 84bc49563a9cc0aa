//! Run a short simulated session and print a few channels of every row.
//!
//! ```text
//! cargo run --example simulated_session
//! ```

use biosensor_aggregator::device::{SimulatedConfig, SimulatedDevice};
use biosensor_aggregator::{Aggregator, AggregatorConfig, CallbackSink, Row};
use std::io;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).compact().init();

    let device = SimulatedDevice::new(SimulatedConfig {
        duration: Some(Duration::from_secs(3)),
        ..SimulatedConfig::default()
    });
    let config = AggregatorConfig {
        window_size: 5,
        ..AggregatorConfig::default()
    };

    let sink = CallbackSink(|row: &Row| -> io::Result<()> {
        println!(
            "#{:<4} gyroX={:>8.2} eng={:.2} AF3/alpha={:.3}",
            row.seq,
            row.get("gyroX").unwrap_or_default(),
            row.get("eng").unwrap_or_default(),
            row.get("AF3/alpha").unwrap_or_default(),
        );
        Ok(())
    });

    let mut aggregator = Aggregator::start(device, &config, sink)?;
    aggregator.run(&AtomicBool::new(true))?;
    aggregator.stop()?;

    println!();
    println!("{}", aggregator.stats().summary());
    Ok(())
}
