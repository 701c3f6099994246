//! Per-port command/response engine.
//!
//! Each logical port runs one tokio task that owns its [`Device`]
//! exclusively. The task serializes commands onto the half-duplex channel,
//! frames incoming bytes into lines, and dispatches every line to either
//! the in-flight command's pattern sets or the port's standing unsolicited
//! subscriptions. Because all port state lives inside the single task,
//! there is no locking: callers on other tasks reach it through an mpsc
//! request channel and get replies over oneshots.
//!
//! # Line dispatch order
//!
//! 1. A subscription awaiting its extra-data payload consumes the line
//!    verbatim (raw payload is never pattern-matched).
//! 2. The in-flight command's final patterns -- a match ends the command.
//! 3. The in-flight command's intermediate patterns (an empty set captures
//!    every non-final line).
//! 4. Standing subscriptions.
//! 5. Otherwise the line is dropped with a debug log (modem echo, noise).
//!
//! # Timeouts
//!
//! One deadline is armed per in-flight command and always disarmed before
//! the port returns to idle, on every exit path. Expiry synthesizes the
//! literal final line `TIMEOUT`, so callers classify it uniformly with
//! protocol-level error codes. At the race boundary the timer wins unless
//! a line arrived strictly before expiry: the deadline arm precedes the
//! read arm in the biased select.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use atmux_core::error::{Error, Result};
use atmux_core::{Device, Notification};

use crate::command::{Command, CommandId, CommandResult};
use crate::framer::{FramerEvent, LineFramer, DEFAULT_MAX_BUFFER};

/// The synthesized final line appended when a command's timer expires.
pub const TIMEOUT_LINE: &str = "TIMEOUT";

/// Read chunk size for the port loop's idle polling.
const READ_CHUNK: usize = 256;

/// Depth of the caller-request channel.
const REQUEST_QUEUE_DEPTH: usize = 32;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for one port task.
#[derive(Debug, Clone)]
pub struct PortConfig {
    /// Port name used in logs (e.g. `"at-cmd"`, `"gnss-nmea"`).
    pub name: String,
    /// How long each idle device read waits before re-checking for
    /// requests and timer expiry.
    pub idle_read_timeout: Duration,
    /// Maximum bytes buffered while waiting for a line terminator.
    pub max_buffer: usize,
}

impl PortConfig {
    /// Configuration with conventional defaults for the given port name.
    pub fn new(name: impl Into<String>) -> Self {
        PortConfig {
            name: name.into(),
            idle_read_timeout: Duration::from_millis(100),
            max_buffer: DEFAULT_MAX_BUFFER,
        }
    }
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

/// Process-unique identifier for one unsolicited subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

impl SubscriptionId {
    fn next() -> Self {
        SubscriptionId(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A standing registration for unsolicited lines matching one pattern.
///
/// Dropping the receiver does not remove the table entry; call
/// [`PortHandle::unsubscribe`] to remove it.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    pattern: String,
    rx: mpsc::UnboundedReceiver<Notification>,
}

impl Subscription {
    /// The subscribed pattern.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Receive the next matching unsolicited notification.
    ///
    /// Returns `None` once the port task has terminated.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    /// Non-blocking receive, for tests and polling consumers.
    pub fn try_recv(&mut self) -> Option<Notification> {
        self.rx.try_recv().ok()
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// A caller request routed onto the port task.
enum PortRequest {
    Send {
        command: Command,
        events: Option<mpsc::UnboundedSender<Notification>>,
        reply: oneshot::Sender<Result<CommandResult>>,
    },
    Cancel {
        id: CommandId,
        reply: oneshot::Sender<bool>,
    },
    Subscribe {
        id: SubscriptionId,
        pattern: String,
        with_extra_data: bool,
        tx: mpsc::UnboundedSender<Notification>,
    },
    Unsubscribe {
        id: SubscriptionId,
        pattern: String,
    },
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle to a running port task.
#[derive(Debug)]
pub struct PortHandle {
    name: String,
    req_tx: mpsc::Sender<PortRequest>,
    pub(crate) cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PortHandle {
    /// The port's configured name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send a command and wait for its result.
    ///
    /// Resolves exactly once: on a final-pattern match, on timeout (with
    /// the literal `TIMEOUT` final line), or with an error if the write
    /// failed, the command was cancelled, or the port went down. If
    /// another command is in flight the new one is queued FIFO.
    pub async fn send_command(&self, command: Command) -> Result<CommandResult> {
        self.submit(command, None).await
    }

    /// Send a command, streaming its intermediate and final notifications
    /// to `events` as they arrive, in addition to the returned result.
    pub async fn send_command_observed(
        &self,
        command: Command,
        events: mpsc::UnboundedSender<Notification>,
    ) -> Result<CommandResult> {
        self.submit(command, Some(events)).await
    }

    async fn submit(
        &self,
        command: Command,
        events: Option<mpsc::UnboundedSender<Notification>>,
    ) -> Result<CommandResult> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.req_tx
            .send(PortRequest::Send {
                command,
                events,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::PortClosed)?;
        reply_rx.await.map_err(|_| Error::PortClosed)?
    }

    /// Cancel a command by id without firing a final notification.
    ///
    /// Returns `true` if the command was in flight or queued. The
    /// cancelled caller resolves with [`Error::Cancelled`]. Shutdown-path
    /// use only.
    pub async fn cancel(&self, id: CommandId) -> Result<bool> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.req_tx
            .send(PortRequest::Cancel { id, reply: reply_tx })
            .await
            .map_err(|_| Error::PortClosed)?;
        reply_rx.await.map_err(|_| Error::PortClosed)
    }

    /// Register a standing subscription for unsolicited lines matching
    /// `pattern`. With `with_extra_data`, each match also captures the
    /// next raw line verbatim as its payload (e.g. the PDU line after
    /// `+CMT:`), delivered in the same notification.
    ///
    /// Effective for the next line the port processes. Multiple
    /// subscriptions for the same pattern coexist independently.
    ///
    /// # Panics
    ///
    /// Panics on an empty pattern -- it would match every line, which is
    /// a caller bug, not a runtime condition.
    pub async fn subscribe(
        &self,
        pattern: &str,
        with_extra_data: bool,
    ) -> Result<Subscription> {
        assert!(!pattern.is_empty(), "subscription pattern must not be empty");

        let (tx, rx) = mpsc::unbounded_channel();
        let id = SubscriptionId::next();
        self.req_tx
            .send(PortRequest::Subscribe {
                id,
                pattern: pattern.to_string(),
                with_extra_data,
                tx,
            })
            .await
            .map_err(|_| Error::PortClosed)?;
        Ok(Subscription {
            id,
            pattern: pattern.to_string(),
            rx,
        })
    }

    /// Remove exactly the given subscription; other subscriptions for the
    /// same pattern are untouched.
    pub async fn unsubscribe(&self, subscription: &Subscription) -> Result<()> {
        self.req_tx
            .send(PortRequest::Unsubscribe {
                id: subscription.id,
                pattern: subscription.pattern.clone(),
            })
            .await
            .map_err(|_| Error::PortClosed)
    }

    /// Stop the port task and close its device.
    ///
    /// Pending commands resolve with [`Error::PortClosed`].
    pub async fn stop(self) -> Result<()> {
        self.cancel.cancel();
        self.task.await.map_err(|_| Error::PortClosed)?;
        Ok(())
    }
}

/// Spawn a port task bound to `device`.
///
/// The task owns the device exclusively until the port is stopped or a
/// fatal device error terminates the loop.
pub fn spawn_port(device: Box<dyn Device>, config: PortConfig) -> PortHandle {
    let (req_tx, req_rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
    let cancel = CancellationToken::new();
    let name = config.name.clone();

    let task = tokio::spawn(port_loop(device, config, req_rx, cancel.clone()));

    PortHandle {
        name,
        req_tx,
        cancel,
        task,
    }
}

// ---------------------------------------------------------------------------
// Task state
// ---------------------------------------------------------------------------

/// A submitted command waiting to start or in flight.
struct PendingCommand {
    command: Command,
    events: Option<mpsc::UnboundedSender<Notification>>,
    reply: oneshot::Sender<Result<CommandResult>>,
}

/// The single in-flight command.
struct InFlight {
    pending: PendingCommand,
    result: CommandResult,
    deadline: Instant,
    data_sent: bool,
}

/// One entry in the unsolicited subscription table.
struct SubEntry {
    id: SubscriptionId,
    pattern: String,
    with_extra_data: bool,
    tx: mpsc::UnboundedSender<Notification>,
    /// Set when a match is waiting for its extra-data payload line.
    awaiting_extra: Option<String>,
}

/// All mutable state owned by the port task.
struct PortState {
    name: String,
    framer: LineFramer,
    in_flight: Option<InFlight>,
    queue: VecDeque<PendingCommand>,
    subs: Vec<SubEntry>,
}

// ---------------------------------------------------------------------------
// Task loop
// ---------------------------------------------------------------------------

/// The port task's main loop.
///
/// `tokio::select! { biased; }` priority order: cancellation, caller
/// requests, command deadline, device read.
async fn port_loop(
    mut device: Box<dyn Device>,
    config: PortConfig,
    mut req_rx: mpsc::Receiver<PortRequest>,
    cancel: CancellationToken,
) {
    let mut state = PortState {
        name: config.name.clone(),
        framer: LineFramer::with_max_buffer(config.max_buffer),
        in_flight: None,
        queue: VecDeque::new(),
        subs: Vec::new(),
    };
    let mut chunk = [0u8; READ_CHUNK];

    debug!(port = %state.name, "port task started");

    loop {
        let deadline = state.in_flight.as_ref().map(|f| f.deadline);

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!(port = %state.name, "port task cancelled");
                break;
            }

            req = req_rx.recv() => match req {
                Some(req) => handle_request(req, &mut device, &mut state).await,
                None => {
                    debug!(port = %state.name, "all handles dropped, exiting port task");
                    break;
                }
            },

            // Command timer. Checked before the read arm so the timer
            // wins unless a line arrived strictly before expiry.
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                if deadline.is_some() =>
            {
                on_timeout(&mut device, &mut state).await;
            }

            read = device.read(&mut chunk, config.idle_read_timeout) => match read {
                Ok(0) => {
                    warn!(port = %state.name, "device closed, terminating port");
                    state.framer.discard_partial();
                    fail_all(&mut state, || Error::ConnectionLost);
                    break;
                }
                Ok(n) => {
                    state.framer.feed(&chunk[..n]);
                    process_framer_events(&mut device, &mut state).await;
                }
                Err(Error::Timeout) => {
                    // Idle poll expiry; loop back to re-check everything.
                }
                Err(e) => {
                    warn!(port = %state.name, error = %e, "device read failed, terminating port");
                    state.framer.discard_partial();
                    fail_all(&mut state, || Error::ConnectionLost);
                    break;
                }
            }
        }
    }

    fail_all(&mut state, || Error::PortClosed);
    let _ = device.close().await;
    debug!(port = %state.name, "port task terminated");
}

/// Resolve the in-flight command and every queued command with an error.
fn fail_all(state: &mut PortState, make_err: impl Fn() -> Error) {
    if let Some(flight) = state.in_flight.take() {
        let _ = flight.pending.reply.send(Err(make_err()));
    }
    while let Some(pending) = state.queue.pop_front() {
        let _ = pending.reply.send(Err(make_err()));
    }
}

// ---------------------------------------------------------------------------
// Request handling
// ---------------------------------------------------------------------------

async fn handle_request(req: PortRequest, device: &mut Box<dyn Device>, state: &mut PortState) {
    match req {
        PortRequest::Send {
            command,
            events,
            reply,
        } => {
            let pending = PendingCommand {
                command,
                events,
                reply,
            };
            if state.in_flight.is_some() {
                debug!(
                    port = %state.name,
                    id = %pending.command.id(),
                    waiting = state.queue.len() + 1,
                    "command queued behind in-flight command"
                );
                state.queue.push_back(pending);
            } else {
                state.queue.push_back(pending);
                start_next(device, state).await;
            }
        }
        PortRequest::Cancel { id, reply } => {
            let in_flight_hit = state
                .in_flight
                .as_ref()
                .map(|f| f.pending.command.id() == id)
                .unwrap_or(false);
            if in_flight_hit {
                // Disarm by dropping the in-flight entry; no final
                // notification fires.
                let flight = state.in_flight.take().expect("checked above");
                debug!(port = %state.name, %id, "cancelled in-flight command");
                let _ = flight.pending.reply.send(Err(Error::Cancelled));
                let _ = reply.send(true);
                start_next(device, state).await;
            } else if let Some(pos) = state.queue.iter().position(|p| p.command.id() == id) {
                let pending = state.queue.remove(pos).expect("position just found");
                debug!(port = %state.name, %id, "cancelled queued command");
                let _ = pending.reply.send(Err(Error::Cancelled));
                let _ = reply.send(true);
            } else {
                warn!(port = %state.name, %id, "cancel for a command that no longer exists");
                let _ = reply.send(false);
            }
        }
        PortRequest::Subscribe {
            id,
            pattern,
            with_extra_data,
            tx,
        } => {
            debug!(port = %state.name, pattern, with_extra_data, "subscription added");
            state.subs.push(SubEntry {
                id,
                pattern,
                with_extra_data,
                tx,
                awaiting_extra: None,
            });
        }
        PortRequest::Unsubscribe { id, pattern } => {
            let before = state.subs.len();
            state.subs.retain(|s| !(s.id == id && s.pattern == pattern));
            if state.subs.len() == before {
                warn!(port = %state.name, pattern, "unsubscribe for unknown subscription");
            } else {
                debug!(port = %state.name, pattern, "subscription removed");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Command lifecycle
// ---------------------------------------------------------------------------

/// Start queued commands until one is in flight or the queue is empty.
///
/// Fire-and-forget commands and failed writes resolve their callers
/// without occupying the in-flight slot, so this keeps draining.
async fn start_next(device: &mut Box<dyn Device>, state: &mut PortState) {
    while state.in_flight.is_none() {
        let Some(pending) = state.queue.pop_front() else {
            return;
        };
        begin_command(device, state, pending).await;
    }
}

async fn begin_command(
    device: &mut Box<dyn Device>,
    state: &mut PortState,
    pending: PendingCommand,
) {
    debug!(
        port = %state.name,
        id = %pending.command.id(),
        text = pending.command.text(),
        "sending command"
    );

    let mut wire = pending.command.text().as_bytes().to_vec();
    wire.push(b'\r');

    if let Err(e) = device.write(&wire).await {
        // Fails the caller immediately; no timer is armed.
        warn!(port = %state.name, id = %pending.command.id(), error = %e, "command write failed");
        let _ = pending.reply.send(Err(e));
        return;
    }

    if pending.command.is_fire_and_forget() {
        let _ = pending.reply.send(Ok(CommandResult::new()));
        return;
    }

    let deadline = Instant::now() + pending.command.timeout();
    state.in_flight = Some(InFlight {
        pending,
        result: CommandResult::new(),
        deadline,
        data_sent: false,
    });
}

/// Timer expiry: synthesize the `TIMEOUT` final line and resolve.
async fn on_timeout(device: &mut Box<dyn Device>, state: &mut PortState) {
    let Some(mut flight) = state.in_flight.take() else {
        return;
    };
    warn!(
        port = %state.name,
        id = %flight.pending.command.id(),
        text = flight.pending.command.text(),
        "command timed out"
    );

    flight.result.push(TIMEOUT_LINE.to_string());
    if let Some(tx) = &flight.pending.events {
        let _ = tx.send(Notification::Final {
            line: TIMEOUT_LINE.to_string(),
        });
    }
    let _ = flight.pending.reply.send(Ok(flight.result));

    start_next(device, state).await;
}

// ---------------------------------------------------------------------------
// Line dispatch
// ---------------------------------------------------------------------------

/// Drain and dispatch every complete framer event.
async fn process_framer_events(device: &mut Box<dyn Device>, state: &mut PortState) {
    while let Some(event) = state.framer.next_event() {
        match event {
            FramerEvent::Line(line) => dispatch_line(line, device, state).await,
            FramerEvent::Prompt => on_prompt(device, state).await,
        }
    }
}

/// The modem's `>` data prompt: write the in-flight command's payload.
async fn on_prompt(device: &mut Box<dyn Device>, state: &mut PortState) {
    let Some(flight) = state.in_flight.as_mut() else {
        debug!(port = %state.name, "prompt with no command in flight, ignoring");
        return;
    };
    let Some(data) = flight.pending.command.data() else {
        debug!(
            port = %state.name,
            id = %flight.pending.command.id(),
            "prompt but command carries no data, ignoring"
        );
        return;
    };
    if flight.data_sent {
        debug!(port = %state.name, "repeated prompt, data already sent");
        return;
    }

    debug!(
        port = %state.name,
        id = %flight.pending.command.id(),
        bytes = data.len(),
        "prompt received, sending data payload"
    );
    let data = data.to_vec();
    if let Err(e) = device.write(&data).await {
        warn!(port = %state.name, error = %e, "data payload write failed");
        let flight = state.in_flight.take().expect("checked above");
        let _ = flight.pending.reply.send(Err(e));
        start_next(device, state).await;
        return;
    }
    if let Some(flight) = state.in_flight.as_mut() {
        flight.data_sent = true;
    }
}

/// Dispatch one framed line. See the module docs for the order contract.
async fn dispatch_line(line: String, device: &mut Box<dyn Device>, state: &mut PortState) {
    debug!(port = %state.name, %line, "processing line");

    // Raw extra-data capture consumes the line exclusively.
    let mut captured = false;
    for sub in state.subs.iter_mut() {
        if let Some(first) = sub.awaiting_extra.take() {
            debug!(port = %state.name, pattern = %sub.pattern, "delivering extra-data payload");
            let _ = sub.tx.send(Notification::Unsolicited {
                line: first,
                extra: Some(line.clone()),
            });
            captured = true;
        }
    }
    if captured {
        return;
    }

    if let Some(flight) = state.in_flight.as_mut() {
        if crate::matcher::match_prefix(&line, flight.pending.command.finals()).is_some() {
            complete_in_flight(line, device, state).await;
            return;
        }
        if crate::matcher::matches_any(&line, flight.pending.command.intermediates()) {
            debug!(port = %state.name, %line, "intermediate response");
            flight.result.push(line.clone());
            if let Some(tx) = &flight.pending.events {
                let _ = tx.send(Notification::Intermediate { line });
            }
            return;
        }
    }

    let mut matched = false;
    for sub in state.subs.iter_mut() {
        if line.starts_with(&sub.pattern) {
            matched = true;
            if sub.with_extra_data {
                // Hold the notification until the payload line arrives.
                sub.awaiting_extra = Some(line.clone());
            } else {
                debug!(port = %state.name, pattern = %sub.pattern, "unsolicited match");
                let _ = sub.tx.send(Notification::Unsolicited {
                    line: line.clone(),
                    extra: None,
                });
            }
        }
    }

    if !matched {
        debug!(port = %state.name, %line, "dropping unmatched line");
    }
}

/// Final-pattern match: append, notify, resolve, start the next command.
async fn complete_in_flight(line: String, device: &mut Box<dyn Device>, state: &mut PortState) {
    let mut flight = state.in_flight.take().expect("caller checked in-flight");
    debug!(
        port = %state.name,
        id = %flight.pending.command.id(),
        %line,
        "final response"
    );

    flight.result.push(line.clone());
    if let Some(tx) = &flight.pending.events {
        let _ = tx.send(Notification::Final { line });
    }
    let _ = flight.pending.reply.send(Ok(flight.result));

    start_next(device, state).await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use atmux_test_harness::MockDevice;
    use std::sync::Arc;

    fn test_config() -> PortConfig {
        PortConfig {
            idle_read_timeout: Duration::from_millis(20),
            ..PortConfig::new("test-port")
        }
    }

    fn creg_command(timeout: Duration) -> Command {
        Command::new("AT+CREG?")
            .intermediate(&["+CREG:"])
            .final_patterns(&["OK", "ERROR"])
            .timeout(timeout)
            .build()
    }

    // -------------------------------------------------------------------
    // Round trip
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn round_trip_creg_query() {
        let (mut mock, _ctrl) = MockDevice::new();
        mock.expect(b"AT+CREG?\r", b"\r\n+CREG: 0,1\r\n\r\nOK\r\n");

        let port = spawn_port(Box::new(mock), test_config());
        let result = port
            .send_command(creg_command(Duration::from_secs(1)))
            .await
            .unwrap();

        assert_eq!(result.num_lines(), 2);
        assert_eq!(result.line(0), Some("+CREG: 0,1"));
        assert_eq!(result.final_line(), Some("OK"));

        port.stop().await.unwrap();
    }

    #[tokio::test]
    async fn response_split_across_reads() {
        let (mock, ctrl) = MockDevice::new();
        let port = spawn_port(Box::new(mock), test_config());

        let port = Arc::new(port);
        let sender = {
            let port = port.clone();
            tokio::spawn(async move {
                port.send_command(creg_command(Duration::from_secs(2))).await
            })
        };

        // Deliver the response in fragments that split lines mid-way.
        tokio::time::sleep(Duration::from_millis(30)).await;
        ctrl.inject(b"\r\n+CRE");
        tokio::time::sleep(Duration::from_millis(10)).await;
        ctrl.inject(b"G: 0,1\r\n\r\nO");
        tokio::time::sleep(Duration::from_millis(10)).await;
        ctrl.inject(b"K\r\n");

        let result = sender.await.unwrap().unwrap();
        assert_eq!(result.line(0), Some("+CREG: 0,1"));
        assert_eq!(result.final_line(), Some("OK"));
    }

    #[tokio::test]
    async fn error_final_pattern() {
        let (mut mock, _ctrl) = MockDevice::new();
        mock.expect(b"AT+CREG?\r", b"\r\n+CME ERROR: 10\r\n");

        let port = spawn_port(Box::new(mock), test_config());
        let cmd = Command::new("AT+CREG?")
            .final_patterns(&["OK", "ERROR", "+CME ERROR:"])
            .timeout(Duration::from_secs(1))
            .build();
        let result = port.send_command(cmd).await.unwrap();

        assert_eq!(result.num_lines(), 1);
        assert_eq!(result.final_line(), Some("+CME ERROR: 10"));

        port.stop().await.unwrap();
    }

    // -------------------------------------------------------------------
    // Timeout
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn timeout_synthesizes_literal_line() {
        // Controller kept alive so the stream stays open but silent.
        let (mock, _ctrl) = MockDevice::new();
        let port = spawn_port(Box::new(mock), test_config());

        let cmd = Command::new("AT+CREG?")
            .final_patterns(&["OK"])
            .timeout(Duration::from_millis(100))
            .build();
        let result = port.send_command(cmd).await.unwrap();

        assert_eq!(result.num_lines(), 1);
        assert_eq!(result.final_line(), Some(TIMEOUT_LINE));

        port.stop().await.unwrap();
    }

    #[tokio::test]
    async fn line_before_deadline_wins() {
        let (mock, ctrl) = MockDevice::new();
        let port = Arc::new(spawn_port(Box::new(mock), test_config()));

        let sender = {
            let port = port.clone();
            tokio::spawn(async move {
                let cmd = Command::new("AT")
                    .final_patterns(&["OK"])
                    .timeout(Duration::from_millis(300))
                    .build();
                port.send_command(cmd).await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        ctrl.inject(b"\r\nOK\r\n");

        let result = sender.await.unwrap().unwrap();
        assert_eq!(result.final_line(), Some("OK"));
    }

    #[tokio::test]
    async fn port_survives_timeout() {
        let (mock, ctrl) = MockDevice::new();
        let port = spawn_port(Box::new(mock), test_config());

        let cmd = Command::new("AT+FIRST")
            .final_patterns(&["OK"])
            .timeout(Duration::from_millis(50))
            .build();
        let result = port.send_command(cmd).await.unwrap();
        assert_eq!(result.final_line(), Some(TIMEOUT_LINE));

        // The next command runs normally.
        ctrl.inject(b"\r\nOK\r\n");
        let cmd = Command::new("AT+SECOND")
            .final_patterns(&["OK"])
            .timeout(Duration::from_secs(1))
            .build();
        let result = port.send_command(cmd).await.unwrap();
        assert_eq!(result.final_line(), Some("OK"));

        port.stop().await.unwrap();
    }

    // -------------------------------------------------------------------
    // Serialization: at most one in flight
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn commands_serialize_fifo() {
        let (mut mock, _ctrl) = MockDevice::new();
        // The mock enforces write order: a second command written before
        // the first one's final response would mismatch.
        mock.expect(b"ATA\r", b"\r\nOK\r\n");
        mock.expect(b"ATH\r", b"\r\nOK\r\n");

        let port = Arc::new(spawn_port(Box::new(mock), test_config()));

        let first = Command::new("ATA")
            .final_patterns(&["OK"])
            .timeout(Duration::from_secs(1))
            .build();
        let second = Command::new("ATH")
            .final_patterns(&["OK"])
            .timeout(Duration::from_secs(1))
            .build();

        let (r1, r2) = tokio::join!(port.send_command(first), port.send_command(second));
        assert_eq!(r1.unwrap().final_line(), Some("OK"));
        assert_eq!(r2.unwrap().final_line(), Some("OK"));
    }

    #[tokio::test]
    async fn queued_result_not_interleaved() {
        let (mock, ctrl) = MockDevice::new();
        let port = Arc::new(spawn_port(Box::new(mock), test_config()));

        let first = Command::new("AT+CSQ")
            .intermediate(&["+CSQ:"])
            .final_patterns(&["OK"])
            .timeout(Duration::from_secs(2))
            .build();
        let second = Command::new("AT+CGSN")
            .final_patterns(&["OK"])
            .timeout(Duration::from_secs(2))
            .build();

        let p1 = port.clone();
        let t1 = tokio::spawn(async move { p1.send_command(first).await });
        let p2 = port.clone();
        let t2 = tokio::spawn(async move {
            // Ensure the first command is submitted first.
            tokio::time::sleep(Duration::from_millis(20)).await;
            p2.send_command(second).await
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        // Resolve the first command, then the second.
        ctrl.inject(b"\r\n+CSQ: 21,0\r\n\r\nOK\r\n");
        tokio::time::sleep(Duration::from_millis(60)).await;
        ctrl.inject(b"\r\n356938035643809\r\n\r\nOK\r\n");

        let r1 = t1.await.unwrap().unwrap();
        assert_eq!(
            r1.iter().collect::<Vec<_>>(),
            vec!["+CSQ: 21,0", "OK"]
        );

        let r2 = t2.await.unwrap().unwrap();
        assert_eq!(
            r2.iter().collect::<Vec<_>>(),
            vec!["356938035643809", "OK"]
        );
    }

    // -------------------------------------------------------------------
    // Line ordering and capture
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn line_order_preserved_final_last() {
        let (mut mock, _ctrl) = MockDevice::new();
        mock.expect(
            b"AT+COPS=?\r",
            b"\r\n+COPS: (1,\"A\")\r\n\r\n+COPS: (2,\"B\")\r\n\r\n+COPS: (3,\"C\")\r\n\r\nOK\r\n",
        );

        let port = spawn_port(Box::new(mock), test_config());
        let cmd = Command::new("AT+COPS=?")
            .intermediate(&["+COPS:"])
            .final_patterns(&["OK", "ERROR"])
            .timeout(Duration::from_secs(1))
            .build();
        let result = port.send_command(cmd).await.unwrap();

        assert_eq!(
            result.iter().collect::<Vec<_>>(),
            vec![
                "+COPS: (1,\"A\")",
                "+COPS: (2,\"B\")",
                "+COPS: (3,\"C\")",
                "OK"
            ]
        );

        port.stop().await.unwrap();
    }

    #[tokio::test]
    async fn unmatched_lines_dropped_from_result() {
        let (mut mock, _ctrl) = MockDevice::new();
        // Echo and noise around the real response.
        mock.expect(
            b"AT+CREG?\r",
            b"AT+CREG?\r\r\nNOISE\r\n\r\n+CREG: 0,1\r\n\r\nOK\r\n",
        );

        let port = spawn_port(Box::new(mock), test_config());
        let result = port
            .send_command(creg_command(Duration::from_secs(1)))
            .await
            .unwrap();

        assert_eq!(
            result.iter().collect::<Vec<_>>(),
            vec!["+CREG: 0,1", "OK"]
        );

        port.stop().await.unwrap();
    }

    #[tokio::test]
    async fn empty_intermediate_set_captures_all_lines() {
        let (mut mock, _ctrl) = MockDevice::new();
        mock.expect(b"AT+CGSN\r", b"\r\n356938035643809\r\n\r\nOK\r\n");

        let port = spawn_port(Box::new(mock), test_config());
        let cmd = Command::new("AT+CGSN")
            .final_patterns(&["OK", "ERROR"])
            .timeout(Duration::from_secs(1))
            .build();
        let result = port.send_command(cmd).await.unwrap();

        assert_eq!(
            result.iter().collect::<Vec<_>>(),
            vec!["356938035643809", "OK"]
        );

        port.stop().await.unwrap();
    }

    // -------------------------------------------------------------------
    // Unsolicited subscriptions
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn subscription_receives_matching_lines() {
        let (mock, ctrl) = MockDevice::new();
        let port = spawn_port(Box::new(mock), test_config());

        let mut sub = port.subscribe("+CREG:", false).await.unwrap();
        ctrl.inject(b"\r\n+CREG: 1\r\n");

        let notification = sub.recv().await.unwrap();
        assert_eq!(
            notification,
            Notification::Unsolicited {
                line: "+CREG: 1".into(),
                extra: None,
            }
        );

        port.stop().await.unwrap();
    }

    #[tokio::test]
    async fn subscriptions_are_independent() {
        let (mock, ctrl) = MockDevice::new();
        let port = spawn_port(Box::new(mock), test_config());

        let mut sub_a = port.subscribe("+CREG:", false).await.unwrap();
        let mut sub_b = port.subscribe("+CREG:", false).await.unwrap();

        ctrl.inject(b"\r\n+CREG: 1\r\n");
        assert_eq!(sub_a.recv().await.unwrap().line(), "+CREG: 1");
        assert_eq!(sub_b.recv().await.unwrap().line(), "+CREG: 1");

        // Removing A leaves B subscribed.
        port.unsubscribe(&sub_a).await.unwrap();
        // Give the port a moment to process the table mutation.
        tokio::time::sleep(Duration::from_millis(30)).await;

        ctrl.inject(b"\r\n+CREG: 2\r\n");
        assert_eq!(sub_b.recv().await.unwrap().line(), "+CREG: 2");
        assert!(sub_a.try_recv().is_none());

        port.stop().await.unwrap();
    }

    #[tokio::test]
    async fn extra_data_delivers_both_lines() {
        let (mock, ctrl) = MockDevice::new();
        let port = spawn_port(Box::new(mock), test_config());

        let mut sub = port.subscribe("+CMT:", true).await.unwrap();
        ctrl.inject(b"\r\n+CMT: \"+15551234567\",,\"24/06/01\"\r\n07914400000000F1\r\n");

        let notification = sub.recv().await.unwrap();
        assert_eq!(
            notification,
            Notification::Unsolicited {
                line: "+CMT: \"+15551234567\",,\"24/06/01\"".into(),
                extra: Some("07914400000000F1".into()),
            }
        );

        port.stop().await.unwrap();
    }

    #[tokio::test]
    async fn unsolicited_during_command_not_reordered() {
        let (mock, ctrl) = MockDevice::new();
        let port = Arc::new(spawn_port(Box::new(mock), test_config()));

        let mut sub = port.subscribe("+CREG:", false).await.unwrap();

        let sender = {
            let port = port.clone();
            tokio::spawn(async move {
                let cmd = Command::new("AT+CSQ")
                    .intermediate(&["+CSQ:"])
                    .final_patterns(&["OK"])
                    .timeout(Duration::from_secs(2))
                    .build();
                port.send_command(cmd).await
            })
        };

        tokio::time::sleep(Duration::from_millis(40)).await;
        // An unsolicited registration change interleaves with the
        // command's own response lines.
        ctrl.inject(b"\r\n+CREG: 1\r\n\r\n+CSQ: 21,0\r\n\r\nOK\r\n");

        let result = sender.await.unwrap().unwrap();
        assert_eq!(result.iter().collect::<Vec<_>>(), vec!["+CSQ: 21,0", "OK"]);

        let notification = sub.recv().await.unwrap();
        assert_eq!(notification.line(), "+CREG: 1");

        Arc::into_inner(port).unwrap().stop().await.unwrap();
    }

    // -------------------------------------------------------------------
    // Prompt and data payload
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn prompt_triggers_data_write() {
        let pdu: &[u8] = b"0011000B915155214365F70000AA0A\x1a";

        let (mut mock, _ctrl) = MockDevice::new();
        mock.expect(b"AT+CMGS=24\r", b"\r\n> ");
        mock.expect(pdu, b"\r\n+CMGS: 5\r\n\r\nOK\r\n");

        let port = spawn_port(Box::new(mock), test_config());
        let cmd = Command::new("AT+CMGS=24")
            .data(pdu.to_vec())
            .intermediate(&["+CMGS:"])
            .final_patterns(&["OK", "ERROR", "+CMS ERROR:"])
            .timeout(Duration::from_secs(2))
            .build();
        let result = port.send_command(cmd).await.unwrap();

        assert_eq!(result.iter().collect::<Vec<_>>(), vec!["+CMGS: 5", "OK"]);

        port.stop().await.unwrap();
    }

    #[tokio::test]
    async fn prompt_without_data_is_ignored() {
        let (mock, ctrl) = MockDevice::new();
        let port = Arc::new(spawn_port(Box::new(mock), test_config()));

        let sender = {
            let port = port.clone();
            tokio::spawn(async move {
                let cmd = Command::new("AT")
                    .final_patterns(&["OK"])
                    .timeout(Duration::from_secs(1))
                    .build();
                port.send_command(cmd).await
            })
        };

        tokio::time::sleep(Duration::from_millis(40)).await;
        ctrl.inject(b"\r\n> ");
        ctrl.inject(b"\r\nOK\r\n");

        let result = sender.await.unwrap().unwrap();
        assert_eq!(result.final_line(), Some("OK"));
    }

    // -------------------------------------------------------------------
    // Failure paths
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn write_failure_fails_caller_immediately() {
        let (mock, ctrl) = MockDevice::new();
        ctrl.fail_writes(true);

        let port = spawn_port(Box::new(mock), test_config());
        let result = port
            .send_command(creg_command(Duration::from_secs(5)))
            .await;
        assert!(matches!(result.unwrap_err(), Error::Device(_)));

        // The port stays up; later commands work once writes recover.
        ctrl.fail_writes(false);
        ctrl.inject(b"\r\nOK\r\n");
        let cmd = Command::new("AT")
            .final_patterns(&["OK"])
            .timeout(Duration::from_secs(1))
            .build();
        let result = port.send_command(cmd).await.unwrap();
        assert_eq!(result.final_line(), Some("OK"));

        port.stop().await.unwrap();
    }

    #[tokio::test]
    async fn device_eof_resolves_pending_with_connection_lost() {
        let (mock, ctrl) = MockDevice::new();
        let port = Arc::new(spawn_port(Box::new(mock), test_config()));

        let sender = {
            let port = port.clone();
            tokio::spawn(async move {
                let cmd = Command::new("AT+CREG?")
                    .final_patterns(&["OK"])
                    .timeout(Duration::from_secs(10))
                    .build();
                port.send_command(cmd).await
            })
        };

        tokio::time::sleep(Duration::from_millis(40)).await;
        drop(ctrl);

        let result = sender.await.unwrap();
        assert!(matches!(result.unwrap_err(), Error::ConnectionLost));

        // The loop has terminated; further sends fail.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let cmd = Command::new("AT")
            .final_patterns(&["OK"])
            .timeout(Duration::from_secs(1))
            .build();
        let result = port.send_command(cmd).await;
        assert!(matches!(result.unwrap_err(), Error::PortClosed));
    }

    // -------------------------------------------------------------------
    // Cancellation
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn cancel_in_flight_command() {
        let (mock, _ctrl) = MockDevice::new();
        let port = Arc::new(spawn_port(Box::new(mock), test_config()));

        let cmd = Command::new("AT+COPS=?")
            .final_patterns(&["OK"])
            .timeout(Duration::from_secs(30))
            .build();
        let id = cmd.id();

        let sender = {
            let port = port.clone();
            tokio::spawn(async move { port.send_command(cmd).await })
        };

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(port.cancel(id).await.unwrap());

        let result = sender.await.unwrap();
        assert!(matches!(result.unwrap_err(), Error::Cancelled));
    }

    #[tokio::test]
    async fn cancel_queued_command() {
        let (mock, ctrl) = MockDevice::new();
        let port = Arc::new(spawn_port(Box::new(mock), test_config()));

        let first = Command::new("AT+FIRST")
            .final_patterns(&["OK"])
            .timeout(Duration::from_secs(5))
            .build();
        let second = Command::new("AT+SECOND")
            .final_patterns(&["OK"])
            .timeout(Duration::from_secs(5))
            .build();
        let second_id = second.id();

        let t1 = {
            let port = port.clone();
            tokio::spawn(async move { port.send_command(first).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        let t2 = {
            let port = port.clone();
            tokio::spawn(async move { port.send_command(second).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        // The second command never started; cancelling it leaves the
        // first in flight.
        assert!(port.cancel(second_id).await.unwrap());
        assert!(matches!(t2.await.unwrap().unwrap_err(), Error::Cancelled));

        ctrl.inject(b"\r\nOK\r\n");
        assert_eq!(t1.await.unwrap().unwrap().final_line(), Some("OK"));
    }

    #[tokio::test]
    async fn cancel_unknown_command_reports_miss() {
        let (mock, _ctrl) = MockDevice::new();
        let port = spawn_port(Box::new(mock), test_config());

        let cmd = Command::new("AT")
            .final_patterns(&["OK"])
            .timeout(Duration::from_secs(1))
            .build();
        assert!(!port.cancel(cmd.id()).await.unwrap());

        port.stop().await.unwrap();
    }

    // -------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------

    #[tokio::test]
    async fn stop_resolves_pending_with_port_closed() {
        let (mock, _ctrl) = MockDevice::new();
        let port = Arc::new(spawn_port(Box::new(mock), test_config()));

        let sender = {
            let port = port.clone();
            tokio::spawn(async move {
                let cmd = Command::new("AT+COPS=?")
                    .final_patterns(&["OK"])
                    .timeout(Duration::from_secs(30))
                    .build();
                port.send_command(cmd).await
            })
        };

        tokio::time::sleep(Duration::from_millis(40)).await;
        port.cancel.cancel();

        let result = sender.await.unwrap();
        assert!(matches!(result.unwrap_err(), Error::PortClosed));
    }

    #[tokio::test]
    async fn fire_and_forget_resolves_immediately() {
        let (mock, ctrl) = MockDevice::new();
        let port = spawn_port(Box::new(mock), test_config());

        let cmd = Command::new("ATZ").timeout(Duration::ZERO).build();
        let result = port.send_command(cmd).await.unwrap();
        assert_eq!(result.num_lines(), 0);

        assert_eq!(ctrl.written(), vec![b"ATZ\r".to_vec()]);

        port.stop().await.unwrap();
    }

    #[tokio::test]
    async fn port_name_accessor() {
        let (mock, _ctrl) = MockDevice::new();
        let port = spawn_port(Box::new(mock), PortConfig::new("at-cmd"));
        assert_eq!(port.name(), "at-cmd");
        port.stop().await.unwrap();
    }
}
