use std::time::Duration;

use escpos_ble::{known_devices, scan};
use tracing_subscriber::EnvFilter;

/// Example: list printers
/// - Prints peripherals the adapter already knows
/// - Scans for the given number of seconds (default 5) and prints what was found
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let secs = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(5);

    let known = known_devices().await?;
    println!("Known devices: {}", known.len());
    for d in &known {
        println!("  id={} name={:?}", d.id, d.name);
    }

    println!("Scanning for {} seconds...", secs);
    let devices = scan(Duration::from_secs(secs)).await?;
    for d in &devices {
        println!(
            "  id={} name={} rssi={}",
            d.id,
            d.name.as_deref().unwrap_or("-"),
            d.rssi.map(|r| r.to_string()).unwrap_or_else(|| "-".into())
        );
    }
    println!("{} devices found.", devices.len());
    Ok(())
}
