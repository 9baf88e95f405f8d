//! Over-the-air bench tests for the LoRa lighting node.
//!
//! Run with the node powered and a USB LoRa bridge (same frequency, SF and
//! sync word) attached to this machine.

mod device;
mod protocol;

use clap::Parser;
use colored::Colorize;

use device::{resolve_port, BridgeClient};
use tests::{print_results, run_all_tests};

#[derive(Parser)]
#[command(name = "integration-tests")]
#[command(about = "Over-the-air tests for the LoRa lighting node")]
struct Args {
    /// Serial port of the LoRa bridge (use "auto" to auto-detect)
    #[arg(short, long, default_value = "auto")]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value = "115200")]
    baud: u32,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let port = resolve_port(&args.port)?;

    println!("{}", "Lighting Node Bench Tests".bold());
    println!("Bridge port: {}", port);
    println!("Baud: {}", args.baud);
    println!();

    println!("Connecting to bridge...");
    let mut bridge = BridgeClient::new(&port, args.baud)?;

    // Wait for bootloader output to finish, then clear buffer
    std::thread::sleep(std::time::Duration::from_secs(1));
    bridge.clear_buffer()?;
    let (major, minor, patch) = bridge.version()?;
    println!("{} (bridge v{}.{}.{})", "Connected!".green(), major, minor, patch);

    println!("\nRunning tests...\n");

    let results = run_all_tests(&mut bridge);
    print_results(&results);

    if results.iter().any(|r| !r.passed) {
        std::process::exit(1);
    }

    Ok(())
}
