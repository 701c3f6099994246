//! Mock device for deterministic testing of the port engine.
//!
//! [`MockDevice`] implements the [`Device`] trait with pre-loaded
//! request/response pairs, so command round-trips can be tested without
//! real hardware. Unlike a pure request/response mock, modems also emit
//! spontaneous lines, so every mock comes with a [`MockController`] that
//! can inject bytes at any time, flip writes into failure mode, or end the
//! stream.
//!
//! # Example
//!
//! ```
//! use atmux_test_harness::MockDevice;
//!
//! let (mut mock, ctrl) = MockDevice::new();
//! // Pre-load: when the engine writes this request, make this readable.
//! mock.expect(b"AT+CREG?\r", b"\r\n+CREG: 0,1\r\n\r\nOK\r\n");
//! // Spontaneous data, independent of any write:
//! ctrl.inject(b"\r\n+CREG: 1\r\n");
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use atmux_core::error::{Error, Result};
use atmux_core::Device;

/// A pre-loaded request/response pair for the mock device.
#[derive(Debug, Clone)]
struct Expectation {
    /// The exact bytes we expect to be written.
    request: Vec<u8>,
    /// The bytes to make readable when the matching request is written.
    response: Vec<u8>,
}

/// Controller half of a [`MockDevice`].
///
/// Dropping the controller ends the mock's stream: once all injected data
/// has been drained, `read()` returns `Ok(0)` (EOF), which the port engine
/// treats as a fatal framing error.
#[derive(Debug)]
pub struct MockController {
    inject_tx: mpsc::UnboundedSender<Vec<u8>>,
    fail_writes: Arc<AtomicBool>,
    written: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MockController {
    /// Inject bytes that become readable without any preceding write,
    /// as a modem does for unsolicited lines.
    pub fn inject(&self, data: &[u8]) {
        // A send error just means the device was dropped first.
        let _ = self.inject_tx.send(data.to_vec());
    }

    /// When set, subsequent `write()` calls fail with a device error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// All byte slices written to the device so far, one per `write()` call.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written.lock().unwrap().clone()
    }
}

/// A mock [`Device`] for testing the engine without hardware.
///
/// Expectations are consumed in order: when `write()` is called, the data
/// is matched against the next expectation and the paired response bytes
/// become readable. Data injected through the controller is readable
/// regardless of writes. With no expectations loaded, writes are recorded
/// and accepted silently, which suits tests that drive all responses
/// through injection.
#[derive(Debug)]
pub struct MockDevice {
    /// Ordered queue of expected request/response pairs.
    expectations: VecDeque<Expectation>,
    /// Bytes currently readable.
    pending: VecDeque<u8>,
    /// Channel of spontaneously injected data.
    inject_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    /// Shared write-failure flag.
    fail_writes: Arc<AtomicBool>,
    /// Shared log of written data.
    written: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Whether the device is "open".
    open: bool,
}

impl MockDevice {
    /// Create a new mock device in the open state, with its controller.
    pub fn new() -> (Self, MockController) {
        let (inject_tx, inject_rx) = mpsc::unbounded_channel();
        let fail_writes = Arc::new(AtomicBool::new(false));
        let written = Arc::new(Mutex::new(Vec::new()));

        let device = MockDevice {
            expectations: VecDeque::new(),
            pending: VecDeque::new(),
            inject_rx,
            fail_writes: fail_writes.clone(),
            written: written.clone(),
            open: true,
        };
        let controller = MockController {
            inject_tx,
            fail_writes,
            written,
        };
        (device, controller)
    }

    /// Add an expected request/response pair.
    ///
    /// When `write()` is called with data matching `request`, `response`
    /// becomes readable.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        self.expectations.push_back(Expectation {
            request: request.to_vec(),
            response: response.to_vec(),
        });
    }

    /// Return the number of expectations that have not yet been consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.expectations.len()
    }

    fn drain_injected(&mut self) {
        while let Ok(chunk) = self.inject_rx.try_recv() {
            self.pending.extend(chunk);
        }
    }

    fn take_pending(&mut self, buf: &mut [u8]) -> usize {
        let n = self.pending.len().min(buf.len());
        for b in buf.iter_mut().take(n) {
            // VecDeque is non-empty for the first n slots.
            *b = self.pending.pop_front().unwrap();
        }
        n
    }
}

#[async_trait]
impl Device for MockDevice {
    async fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if !self.open {
            return Err(Error::NotConnected);
        }

        self.drain_injected();
        if !self.pending.is_empty() {
            return Ok(self.take_pending(buf));
        }

        match tokio::time::timeout(timeout, self.inject_rx.recv()).await {
            Ok(Some(chunk)) => {
                self.pending.extend(chunk);
                Ok(self.take_pending(buf))
            }
            // Controller dropped and nothing left to read: end of stream.
            Ok(None) => Ok(0),
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        if !self.open {
            return Err(Error::NotConnected);
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Device("simulated write failure".into()));
        }

        self.written.lock().unwrap().push(data.to_vec());

        if let Some(expectation) = self.expectations.front() {
            if data == expectation.request.as_slice() {
                let expectation = self.expectations.pop_front().unwrap();
                self.pending.extend(expectation.response);
            } else {
                return Err(Error::Device(format!(
                    "unexpected write: expected {:02X?}, got {:02X?}",
                    expectation.request, data
                )));
            }
        }

        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.open = false;
        self.pending.clear();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
