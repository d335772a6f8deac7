//! Hardware backend on top of `midir`
//!
//! midir delivers input through a callback on its own thread. The callback
//! pushes into a bounded queue that `read_nonblocking` drains.

use crossbeam::channel::{self, Receiver, TryRecvError};
use midir::{Ignore, MidiInput, MidiInputConnection};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

use super::{BackendError, InputFilter, InputHandle, MidiBackend, PortInfo};
use crate::midi::format_hex;

/// Messages buffered per port; once full, newly arriving messages are dropped
const QUEUE_CAPACITY: usize = 1024;

/// Backend using the platform MIDI stack through midir
pub struct MidirBackend {
    client_name: String,
}

impl MidirBackend {
    /// Check that a midir client can be created on this host
    pub fn probe(client_name: &str) -> Result<Self, BackendError> {
        MidiInput::new(client_name).map_err(|e| BackendError::Unavailable(e.to_string()))?;
        Ok(Self {
            client_name: client_name.to_string(),
        })
    }

    fn client(&self, suffix: &str) -> Result<MidiInput, BackendError> {
        MidiInput::new(&format!("{}-{}", self.client_name, suffix))
            .map_err(|e| BackendError::Unavailable(e.to_string()))
    }
}

impl MidiBackend for MidirBackend {
    fn name(&self) -> &str {
        "midir"
    }

    fn enumerate(&self) -> Result<Vec<PortInfo>, BackendError> {
        let midi_in = self.client("discovery")?;

        let ports = midi_in
            .ports()
            .iter()
            .enumerate()
            .map(|(index, port)| PortInfo {
                index,
                name: midi_in
                    .port_name(port)
                    .unwrap_or_else(|_| format!("Port {}", index)),
            })
            .collect();

        Ok(ports)
    }

    fn open(&self, port: &PortInfo) -> Result<Arc<dyn InputHandle>, BackendError> {
        let open_error = |reason: String| BackendError::PortOpen {
            index: port.index,
            name: port.name.clone(),
            reason,
        };

        let mut midi_in = self
            .client(&format!("in{}", port.index))
            .map_err(|e| open_error(e.to_string()))?;
        // Filtering happens in the callback so it can be changed after connect
        midi_in.ignore(Ignore::None);

        // This client enumerates again, so look the port up by name
        let ports = midi_in.ports();
        let names: Vec<String> = ports
            .iter()
            .map(|p| midi_in.port_name(p).unwrap_or_default())
            .collect();
        let target = port
            .locate(&names)
            .and_then(|index| ports.get(index))
            .ok_or_else(|| open_error("port no longer exists".to_string()))?;

        let (tx, rx) = channel::bounded::<Vec<u8>>(QUEUE_CAPACITY);
        let filter_bits = Arc::new(AtomicU8::new(0));
        let callback_filter = filter_bits.clone();
        let port_name = port.name.clone();

        let connection = midi_in
            .connect(
                target,
                &format!("{}-{}", self.client_name, port.index),
                move |_timestamp, data, _| {
                    if InputFilter::from_bits(callback_filter.load(Ordering::Relaxed)).drops(data) {
                        return;
                    }
                    if tx.try_send(data.to_vec()).is_err() {
                        trace!("Input queue full for '{}', dropped {}", port_name, format_hex(data));
                    }
                },
                (),
            )
            .map_err(|e| open_error(e.to_string()))?;

        debug!("MIDI input opened: '{}'", port.name);

        Ok(Arc::new(MidirInput {
            port_name: port.name.clone(),
            connection: Mutex::new(Some(connection)),
            rx,
            filter_bits,
        }))
    }
}

/// An open midir input connection
struct MidirInput {
    port_name: String,
    connection: Mutex<Option<MidiInputConnection<()>>>,
    rx: Receiver<Vec<u8>>,
    filter_bits: Arc<AtomicU8>,
}

impl InputHandle for MidirInput {
    fn configure(&self, filter: InputFilter) {
        self.filter_bits.store(filter.to_bits(), Ordering::Relaxed);
    }

    fn read_nonblocking(&self) -> Result<Option<Vec<u8>>, BackendError> {
        if self.connection.lock().is_none() {
            return Err(BackendError::Closed);
        }

        match self.rx.try_recv() {
            Ok(data) => Ok(Some(data)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(BackendError::Read {
                port: self.port_name.clone(),
                reason: "driver callback went away".to_string(),
            }),
        }
    }

    fn close(&self) {
        if let Some(connection) = self.connection.lock().take() {
            connection.close();
            debug!("MIDI input closed: '{}'", self.port_name);
        }
    }
}
