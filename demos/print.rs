use std::io::{self, Write};
use std::time::Duration;

use escpos_ble::{BridgeConfig, PrinterBridge, scan};
use tracing_subscriber::EnvFilter;

/// Example: interactive print session
/// - Scans for BLE printers
/// - Lets user select device
/// - Prints text or a QR code based on user input
///
/// An optional first argument names a TOML config file.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => BridgeConfig::load(path)?,
        None => BridgeConfig::default(),
    };

    println!("Scanning for BLE devices for 3 seconds...");
    let devices = scan(Duration::from_secs(3)).await?;
    if devices.is_empty() {
        println!(
            "No devices found. Make sure your Bluetooth adapter is up and the printer is powered on and advertising."
        );
        return Ok(());
    }

    println!("Found devices:");
    for (i, d) in devices.iter().enumerate() {
        println!("  {}) id={} name={:?} rssi={:?}", i + 1, d.id, d.name, d.rssi);
    }

    let mut input = String::new();
    let chosen = loop {
        print!("Select device number to connect to (1-{}): ", devices.len());
        io::stdout().flush()?;
        input.clear();
        io::stdin().read_line(&mut input)?;
        if let Ok(n) = input.trim().parse::<usize>() {
            if n >= 1 && n <= devices.len() {
                break &devices[n - 1];
            }
        }
        println!("Invalid selection.");
    };

    let (printer, _task) = escpos_ble::open(&config).await?;
    println!("Bluetooth permission: {:?}", printer.check_permissions().await);

    println!("Connecting to device id={} name={:?} ...", chosen.id, chosen.name);
    if let Err(e) = printer.connect(&chosen.id).await {
        eprintln!("Failed to connect: {}", e);
        return Ok(());
    }
    println!("Connected successfully.");

    run_interactive_session(&printer, &chosen.id).await?;

    printer.disconnect(&chosen.id).await?;
    Ok(())
}

/// Prompts for text or QR data until an empty choice, printing each job.
async fn run_interactive_session(
    printer: &PrinterBridge,
    device_id: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    loop {
        let mut mode = String::new();
        print!("Choose print mode: 1 for text, 2 for QR code, enter to quit: ");
        io::stdout().flush()?;
        io::stdin().read_line(&mut mode)?;

        let result = match mode.trim() {
            "1" => {
                println!("Enter text, finish with an empty line:");
                let mut text = String::new();
                loop {
                    let mut line = String::new();
                    io::stdin().read_line(&mut line)?;
                    if line.trim_end().is_empty() {
                        break;
                    }
                    text.push_str(&line);
                }
                println!("Sending print job (text)...");
                printer.print(device_id, &text).await
            }
            "2" => {
                let mut data = String::new();
                print!("Enter the QR code data: ");
                io::stdout().flush()?;
                io::stdin().read_line(&mut data)?;
                println!("Sending print job (QR code)...");
                printer.print_qr_code(device_id, data.trim()).await
            }
            "" => return Ok(()),
            _ => {
                println!("Invalid selection.");
                continue;
            }
        };

        match result {
            Ok(()) => println!("Print job completed."),
            Err(e) => eprintln!("Print job failed: {}", e),
        }
    }
}
