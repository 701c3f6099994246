//! Device implementations for atmux.
//!
//! This crate provides concrete implementations of the
//! [`Device`](atmux_core::Device) trait from `atmux-core` for the ways a
//! cellular modem is physically reached:
//!
//! - [`SerialDevice`]: UART and USB-CDC serial ports
//! - [`TcpDevice`]: TCP sockets, for `ser2net`-style bridges and modem
//!   emulators
//!
//! # Example
//!
//! ```no_run
//! use atmux_transport::SerialDevice;
//! use atmux_core::Device;
//! use std::time::Duration;
//!
//! # async fn example() -> atmux_core::Result<()> {
//! let mut device = SerialDevice::open("/dev/ttyUSB2", 115_200).await?;
//!
//! device.write(b"AT\r").await?;
//!
//! let mut buf = [0u8; 256];
//! let n = device.read(&mut buf, Duration::from_secs(1)).await?;
//! # Ok(())
//! # }
//! ```

pub mod serial;
pub mod tcp;

pub use serial::{DataBits, FlowControl, Parity, SerialConfig, SerialDevice, StopBits};
pub use tcp::TcpDevice;
