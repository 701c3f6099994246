//! Query network registration over a modem's AT port.
//!
//! Demonstrates the basic transaction flow: open the serial AT port,
//! spawn a port task, run a few commands, and classify their results.
//!
//! # Requirements
//!
//! - A cellular module's AT port (adjust the path for your system;
//!   `/dev/ttyUSB2` is typical for Qualcomm-based modules)
//!
//! # Usage
//!
//! ```sh
//! cargo run -p atmux --example query_registration
//! ```

use std::time::Duration;

use atmux::{send_standard, spawn_port, CmdStatus, Command, PortConfig};
use atmux_transport::SerialDevice;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let serial_port = "/dev/ttyUSB2";

    println!("Opening AT port {}...", serial_port);
    let device = SerialDevice::open(serial_port, 115_200).await?;
    let port = spawn_port(Box::new(device), PortConfig::new("at-cmd"));

    // Probe the interpreter first.
    let (status, _) = send_standard::<&str>(&port, "AT", &[], Duration::from_secs(2)).await?;
    if status != CmdStatus::Ok {
        anyhow::bail!("modem did not answer AT: {:?}", status);
    }
    println!("Modem is responding.\n");

    // Network registration status.
    let (status, result) =
        send_standard(&port, "AT+CREG?", &["+CREG:"], Duration::from_secs(5)).await?;
    match status {
        CmdStatus::Ok => println!("Registration: {}", result.line(0).unwrap_or("<no line>")),
        CmdStatus::Fault => println!("Query failed: {:?}", result.final_line()),
        CmdStatus::Timeout => println!("Query timed out."),
    }

    // Signal quality, with the full builder for comparison.
    let cmd = Command::new("AT+CSQ")
        .intermediate(&["+CSQ:"])
        .final_patterns(&["OK", "ERROR", "+CME ERROR:"])
        .timeout(Duration::from_secs(5))
        .build();
    let result = port.send_command(cmd).await?;
    println!("Signal:       {}", result.line(0).unwrap_or("<no line>"));

    port.stop().await?;
    Ok(())
}
