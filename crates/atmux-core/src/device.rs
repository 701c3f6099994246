//! Device trait for modem communication.
//!
//! The [`Device`] trait abstracts over the physical link to a cellular
//! modem. Implementations exist for serial ports (UART), TCP sockets
//! (socket-attached modems), and mock devices for testing.
//!
//! The port engine in `atmux` operates on a `Device` rather than directly
//! on a serial port, enabling both real hardware control and deterministic
//! unit testing with `MockDevice` from the `atmux-test-harness` crate.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level device channel to a modem.
///
/// Implementations handle buffering and error mapping at the physical
/// layer. Line framing and response matching are handled by the port
/// engine that consumes this trait.
#[async_trait]
pub trait Device: Send {
    /// Read bytes from the device into the provided buffer.
    ///
    /// Returns the number of bytes actually read. `Ok(0)` means the stream
    /// has ended (device closed by the peer). Will wait up to `timeout` for
    /// data to arrive; returns [`Error::Timeout`](crate::error::Error::Timeout)
    /// if no data is received within the deadline.
    async fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Write raw bytes to the device.
    ///
    /// Implementations should block until all bytes have been written to
    /// the underlying channel (serial TX buffer, TCP socket, etc.).
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Close the device.
    ///
    /// After calling `close()`, subsequent `read()` and `write()` calls
    /// should return [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the device is currently open.
    fn is_open(&self) -> bool;
}
