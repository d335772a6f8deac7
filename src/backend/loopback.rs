//! In-process loopback backend
//!
//! Ports are plain queues fed from the same process. Used for demo mode and
//! for exercising sessions without hardware. A configured filter is applied
//! when a message is read.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{BackendError, InputFilter, InputHandle, MidiBackend, PortInfo};
use crate::midi::ControlChange;

#[derive(Default)]
struct LoopbackPort {
    name: String,
    queue: Mutex<VecDeque<Vec<u8>>>,
    open: AtomicBool,
    refuse_open: AtomicBool,
    fail_next_read: AtomicBool,
    panic_next_read: AtomicBool,
    stall: Mutex<Option<Duration>>,
    filter: Mutex<Option<InputFilter>>,
    close_count: AtomicUsize,
}

/// Backend whose ports are fed by [`LoopbackBackend::send`]
///
/// Cloning shares the same ports.
#[derive(Clone, Default)]
pub struct LoopbackBackend {
    ports: Arc<Mutex<Vec<Arc<LoopbackPort>>>>,
}

impl LoopbackBackend {
    /// Create a backend exposing one port per name
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let backend = Self::default();
        for name in names {
            backend.add_port(name);
        }
        backend
    }

    /// Add a port and return its index
    pub fn add_port(&self, name: impl Into<String>) -> usize {
        let mut ports = self.ports.lock();
        ports.push(Arc::new(LoopbackPort {
            name: name.into(),
            ..LoopbackPort::default()
        }));
        ports.len() - 1
    }

    fn port(&self, index: usize) -> Option<Arc<LoopbackPort>> {
        self.ports.lock().get(index).cloned()
    }

    /// Queue raw bytes on a port. Returns false if the port is not open.
    pub fn send(&self, index: usize, data: &[u8]) -> bool {
        match self.port(index) {
            Some(port) if port.open.load(Ordering::SeqCst) => {
                port.queue.lock().push_back(data.to_vec());
                true
            }
            _ => false,
        }
    }

    /// Queue a Control Change on a port
    pub fn send_cc(&self, index: usize, channel: u8, controller: u8, value: u8) -> bool {
        self.send(index, &ControlChange::new(channel, controller, value).to_bytes())
    }

    /// Make every future `open` of this port fail
    pub fn refuse_open(&self, index: usize) {
        if let Some(port) = self.port(index) {
            port.refuse_open.store(true, Ordering::SeqCst);
        }
    }

    /// Make the next read on this port return an error
    pub fn fail_next_read(&self, index: usize) {
        if let Some(port) = self.port(index) {
            port.fail_next_read.store(true, Ordering::SeqCst);
        }
    }

    /// Make the next read on this port panic (a driver bug)
    pub fn panic_next_read(&self, index: usize) {
        if let Some(port) = self.port(index) {
            port.panic_next_read.store(true, Ordering::SeqCst);
        }
    }

    /// Make every read on this port block for `duration` (a misbehaving driver)
    pub fn stall_reads(&self, index: usize, duration: Duration) {
        if let Some(port) = self.port(index) {
            *port.stall.lock() = Some(duration);
        }
    }

    /// Filter most recently applied to this port, if any
    pub fn configured_filter(&self, index: usize) -> Option<InputFilter> {
        self.port(index).and_then(|p| *p.filter.lock())
    }

    pub fn is_open(&self, index: usize) -> bool {
        self.port(index)
            .map(|p| p.open.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// How many times `close` released this port
    pub fn close_count(&self, index: usize) -> usize {
        self.port(index)
            .map(|p| p.close_count.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}

impl MidiBackend for LoopbackBackend {
    fn name(&self) -> &str {
        "loopback"
    }

    fn enumerate(&self) -> Result<Vec<PortInfo>, BackendError> {
        Ok(self
            .ports
            .lock()
            .iter()
            .enumerate()
            .map(|(index, port)| PortInfo {
                index,
                name: port.name.clone(),
            })
            .collect())
    }

    fn open(&self, info: &PortInfo) -> Result<Arc<dyn InputHandle>, BackendError> {
        let port = self.port(info.index).ok_or_else(|| BackendError::PortOpen {
            index: info.index,
            name: info.name.clone(),
            reason: "no such loopback port".to_string(),
        })?;

        if port.refuse_open.load(Ordering::SeqCst) {
            return Err(BackendError::PortOpen {
                index: info.index,
                name: info.name.clone(),
                reason: "port refused to open".to_string(),
            });
        }

        port.queue.lock().clear();
        *port.filter.lock() = None;
        port.open.store(true, Ordering::SeqCst);

        Ok(Arc::new(LoopbackInput { port }))
    }
}

struct LoopbackInput {
    port: Arc<LoopbackPort>,
}

impl InputHandle for LoopbackInput {
    fn configure(&self, filter: InputFilter) {
        *self.port.filter.lock() = Some(filter);
    }

    fn read_nonblocking(&self) -> Result<Option<Vec<u8>>, BackendError> {
        let stall = *self.port.stall.lock();
        if let Some(duration) = stall {
            std::thread::sleep(duration);
        }

        if !self.port.open.load(Ordering::SeqCst) {
            return Err(BackendError::Closed);
        }

        if self.port.fail_next_read.swap(false, Ordering::SeqCst) {
            return Err(BackendError::Read {
                port: self.port.name.clone(),
                reason: "simulated driver failure".to_string(),
            });
        }

        if self.port.panic_next_read.swap(false, Ordering::SeqCst) {
            panic!("loopback port '{}' read panicked", self.port.name);
        }

        let filter = (*self.port.filter.lock()).unwrap_or_default();
        let mut queue = self.port.queue.lock();
        while let Some(data) = queue.pop_front() {
            if !filter.drops(&data) {
                return Ok(Some(data));
            }
        }
        Ok(None)
    }

    fn close(&self) {
        if self.port.open.swap(false, Ordering::SeqCst) {
            self.port.close_count.fetch_add(1, Ordering::SeqCst);
            self.port.queue.lock().clear();
        }
    }
}
