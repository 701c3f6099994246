//! atmux: AT command transaction engine.
//!
//! Turns the raw byte stream of a cellular modem's AT port into reliable,
//! strictly-serialized command/response transactions while routing
//! unsolicited result codes (`+CREG:`, `+CMT:`, `RING`, ...) to standing
//! subscribers, over any byte channel implementing [`Device`].
//!
//! # Architecture
//!
//! Each logical port runs one tokio task that owns its device exclusively
//! ([`port`]). Incoming bytes are framed into lines ([`framer`]), lines
//! are classified by prefix matching ([`matcher`]) against the in-flight
//! [`Command`]'s pattern sets, and callers rendezvous with results over
//! oneshot channels. [`registry`] binds a modem's fixed set of logical
//! ports, and [`sync`] layers the conventional send-and-classify helpers
//! on top.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use atmux::{spawn_port, Command, PortConfig};
//! use atmux_transport::SerialDevice;
//!
//! # async fn example() -> atmux::Result<()> {
//! let device = SerialDevice::open("/dev/ttyUSB2", 115_200).await?;
//! let port = spawn_port(Box::new(device), PortConfig::new("at-cmd"));
//!
//! let cmd = Command::new("AT+CREG?")
//!     .intermediate(&["+CREG:"])
//!     .final_patterns(&["OK", "ERROR"])
//!     .timeout(Duration::from_secs(5))
//!     .build();
//! let result = port.send_command(cmd).await?;
//! println!("registration: {:?}", result.line(0));
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod framer;
pub mod matcher;
pub mod port;
pub mod registry;
pub mod sync;

pub use atmux_core::{Device, Error, Notification, Result};

pub use command::{Command, CommandBuilder, CommandId, CommandResult, DEFAULT_TIMEOUT};
pub use framer::{FramerEvent, LineFramer};
pub use port::{spawn_port, PortConfig, PortHandle, Subscription, TIMEOUT_LINE};
pub use registry::{InitStatus, PortBinding, PortKind, Registry};
pub use sync::{check_result, send_standard, CmdStatus, STANDARD_FINAL_PATTERNS};
