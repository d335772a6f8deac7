//! Device session: one open port and its polling thread
//!
//! Lifecycle: `Created -> Open -> Polling -> Closing -> Closed`. A read error
//! ends the polling thread and moves the session straight to `Closed`.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::backend::{BackendError, InputFilter, InputHandle, MidiBackend, PortInfo};
use crate::midi::{self, format_hex, ControlChange, MessageKind};

/// Receives every Control Change a session decodes
pub type EventSink = Arc<dyn Fn(ControlChange, &Arc<str>) + Send + Sync>;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Created = 0,
    Open = 1,
    Polling = 2,
    Closing = 3,
    Closed = 4,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Created,
            1 => SessionState::Open,
            2 => SessionState::Polling,
            3 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

/// Per-session tuning
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// Idle sleep between polls
    pub poll_interval: Duration,
    /// How long shutdown waits for the polling thread
    pub shutdown_timeout: Duration,
    pub filter: InputFilter,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1),
            shutdown_timeout: Duration::from_secs(1),
            filter: InputFilter::default(),
        }
    }
}

#[derive(Clone)]
struct SharedState(Arc<AtomicU8>);

impl SharedState {
    fn new(state: SessionState) -> Self {
        Self(Arc::new(AtomicU8::new(state as u8)))
    }

    fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn set(&self, state: SessionState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    /// Move `from -> to` only if still in `from`
    fn advance(&self, from: SessionState, to: SessionState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// One opened input port and the thread polling it
pub struct DeviceSession {
    port: PortInfo,
    device: Arc<str>,
    handle: Arc<dyn InputHandle>,
    state: SharedState,
    options: SessionOptions,
    shutdown_tx: Option<Sender<()>>,
    done_rx: Option<Receiver<()>>,
    thread: Option<JoinHandle<()>>,
}

impl DeviceSession {
    /// Open a port and apply filtering (`Created -> Open`)
    pub fn open(
        backend: &dyn MidiBackend,
        port: PortInfo,
        options: SessionOptions,
    ) -> Result<Self, BackendError> {
        let state = SharedState::new(SessionState::Created);

        let handle = backend.open(&port)?;
        handle.configure(options.filter);
        state.set(SessionState::Open);

        debug!("Session opened for '{}'", port.name);

        Ok(Self {
            device: Arc::from(port.name.as_str()),
            port,
            handle,
            state,
            options,
            shutdown_tx: None,
            done_rx: None,
            thread: None,
        })
    }

    /// Launch the polling thread (`Open -> Polling`)
    pub fn start(&mut self, sink: EventSink) -> anyhow::Result<()> {
        if !self.state.advance(SessionState::Open, SessionState::Polling) {
            anyhow::bail!(
                "session for '{}' cannot start from state {:?}",
                self.device,
                self.state()
            );
        }

        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(1);
        let (done_tx, done_rx) = channel::bounded::<()>(1);

        let device = self.device.clone();
        let handle = self.handle.clone();
        let state = self.state.clone();
        let poll_interval = self.options.poll_interval;

        let spawned = thread::Builder::new()
            .name(format!("midi-in-{}", self.port.index))
            .spawn(move || {
                poll_loop(device, handle, state, sink, shutdown_rx, poll_interval);
                drop(done_tx);
            });

        match spawned {
            Ok(thread) => {
                self.shutdown_tx = Some(shutdown_tx);
                self.done_rx = Some(done_rx);
                self.thread = Some(thread);
                info!("Listening on '{}'", self.device);
                Ok(())
            }
            Err(e) => {
                self.handle.close();
                self.state.set(SessionState::Closed);
                Err(anyhow::anyhow!(
                    "failed to spawn polling thread for '{}': {}",
                    self.device,
                    e
                ))
            }
        }
    }

    /// Stop polling and release the port (`Polling -> Closing -> Closed`).
    ///
    /// Waits up to the configured timeout for the thread; the handle is
    /// closed either way. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            self.state.advance(SessionState::Polling, SessionState::Closing);
            let _ = shutdown_tx.try_send(());
            drop(shutdown_tx);

            let exited = match self.done_rx.take() {
                Some(done_rx) => !matches!(
                    done_rx.recv_timeout(self.options.shutdown_timeout),
                    Err(RecvTimeoutError::Timeout)
                ),
                None => true,
            };

            if exited {
                if let Some(thread) = self.thread.take() {
                    if thread.join().is_err() {
                        warn!("Polling thread for '{}' panicked", self.device);
                    }
                }
            } else {
                warn!(
                    "Polling thread for '{}' did not stop within {:?}; closing port anyway",
                    self.device, self.options.shutdown_timeout
                );
                // Detach; the thread exits on its own once its read returns
                self.thread.take();
            }
        }

        self.handle.close();
        if self.state.get() != SessionState::Closed {
            self.state.set(SessionState::Closed);
            debug!("Session closed for '{}'", self.device);
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    pub fn device_name(&self) -> &str {
        &self.device
    }

    pub fn port(&self) -> &PortInfo {
        &self.port
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Marks the session `Closed` if the polling thread unwinds
struct ClosedOnPanic<'a> {
    device: &'a str,
    state: &'a SharedState,
}

impl Drop for ClosedOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            warn!("Polling thread for '{}' panicked", self.device);
            self.state.set(SessionState::Closed);
        }
    }
}

/// Polling thread body
fn poll_loop(
    device: Arc<str>,
    handle: Arc<dyn InputHandle>,
    state: SharedState,
    sink: EventSink,
    shutdown_rx: Receiver<()>,
    poll_interval: Duration,
) {
    let _guard = ClosedOnPanic {
        device: &device,
        state: &state,
    };

    loop {
        match shutdown_rx.try_recv() {
            Ok(_) | Err(TryRecvError::Disconnected) => {
                debug!("Polling for '{}' stopped", device);
                break;
            }
            Err(TryRecvError::Empty) => {}
        }

        // Drain everything pending, then idle
        loop {
            match handle.read_nonblocking() {
                Ok(Some(data)) => handle_message(&device, &data, &sink),
                Ok(None) => break,
                Err(e) => {
                    warn!("'{}' stopped producing input: {}", device, e);
                    state.set(SessionState::Closed);
                    return;
                }
            }
        }

        thread::sleep(poll_interval);
    }
}

fn handle_message(device: &Arc<str>, data: &[u8], sink: &EventSink) {
    match midi::decode(data) {
        Ok(Some(change)) => {
            trace!("{} <- {}", device, change);
            sink(change, device);
        }
        Ok(None) => {
            trace!(
                "{} <- {} ignored ({:?})",
                device,
                format_hex(data),
                data.first().map(|s| MessageKind::from_status(*s))
            );
        }
        Err(e) => {
            debug!("{} <- {} dropped: {}", device, format_hex(data), e);
        }
    }
}
