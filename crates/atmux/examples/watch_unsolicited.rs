//! Watch unsolicited result codes from a modem.
//!
//! Demonstrates standing subscriptions: registration changes (`+CREG:`),
//! incoming calls (`RING`), and incoming SMS in PDU mode (`+CMT:`, which
//! carries its PDU on the following raw line and is subscribed with
//! extra data).
//!
//! # Usage
//!
//! ```sh
//! cargo run -p atmux --example watch_unsolicited
//! ```

use std::time::Duration;

use atmux::{send_standard, spawn_port, Notification, PortConfig};
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

    // Enable the unsolicited reports we want to watch.
    send_standard::<&str>(&port, "AT+CREG=1", &[], Duration::from_secs(2)).await?;
    send_standard::<&str>(&port, "AT+CNMI=2,2", &[], Duration::from_secs(2)).await?;

    let mut creg = port.subscribe("+CREG:", false).await?;
    let mut ring = port.subscribe("RING", false).await?;
    // +CMT: delivers the SMS PDU on the next raw line.
    let mut cmt = port.subscribe("+CMT:", true).await?;

    println!("Watching for 60 seconds...\n");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(60);

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(remaining) => break,
            Some(n) = creg.recv() => {
                println!("registration: {}", n.line());
            }
            Some(n) = ring.recv() => {
                println!("incoming call: {}", n.line());
            }
            Some(n) = cmt.recv() => {
                if let Notification::Unsolicited { line, extra } = n {
                    println!("incoming SMS: {}", line);
                    if let Some(pdu) = extra {
                        println!("          pdu: {}", pdu);
                    }
                }
            }
        }
    }

    port.unsubscribe(&creg).await?;
    port.unsubscribe(&ring).await?;
    port.unsubscribe(&cmt).await?;
    port.stop().await?;

    println!("\nDone.");
    Ok(())
}
