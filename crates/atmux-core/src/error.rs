//! Error types for atmux.
//!
//! All fallible operations across the engine return [`Result<T>`], which
//! uses [`Error`] as the error type. Device-layer, engine-layer, and
//! registry-layer errors are all captured here.

/// The error type for all atmux operations.
///
/// Variants cover the failure modes of a shared serial channel: device
/// open/read/write failures, command timeouts, a torn-down port, and
/// registry misuse.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A device-level error (serial port, TCP socket).
    #[error("device error: {0}")]
    Device(String),

    /// Timed out waiting for data from the device.
    ///
    /// At the device layer this is a normal idle-poll expiry; command
    /// timeouts are *not* reported this way -- they resolve with the
    /// synthesized `TIMEOUT` final line instead.
    #[error("timeout waiting for data")]
    Timeout,

    /// The device stream ended or broke while a port was running.
    ///
    /// Fatal to the port's processing loop: every pending command on that
    /// port resolves with this error and the loop terminates.
    #[error("connection lost")]
    ConnectionLost,

    /// The port's processing task has terminated.
    ///
    /// Returned by handle calls made after the port was stopped or after a
    /// fatal framing error shut it down.
    #[error("port closed")]
    PortClosed,

    /// The command was cancelled before reaching a final response.
    #[error("command cancelled")]
    Cancelled,

    /// No device connection has been established.
    #[error("not connected")]
    NotConnected,

    /// The registry has not been initialized yet.
    #[error("registry not initialized")]
    NotInitialized,

    /// The requested logical port is not bound in the registry.
    #[error("unknown port: {0}")]
    UnknownPort(String),

    /// An invalid parameter was passed to an engine call.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
