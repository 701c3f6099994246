//! Mock devices for deterministic testing of the atmux engine.
//!
//! [`MockDevice`] implements the [`Device`](atmux_core::Device) trait with
//! pre-loaded request/response pairs plus a controller for injecting
//! unsolicited data, simulating write failures, and closing the stream.

pub mod mock_device;

pub use mock_device::{MockController, MockDevice};
