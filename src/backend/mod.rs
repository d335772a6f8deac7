//! MIDI input backends
//!
//! Every driver variant is hidden behind [`MidiBackend`] and [`InputHandle`].
//! The rest of the crate never sees a driver-specific type: the variant is
//! picked once by [`detect_backend`] and passed around as a trait object.

pub mod hardware;
pub mod loopback;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::MidiSettings;

pub use hardware::MidirBackend;
pub use loopback::LoopbackBackend;

/// Information about a MIDI input port.
///
/// `index` is only meaningful within the enumeration pass that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub index: usize,
    pub name: String,
}

impl PortInfo {
    /// Find this port again in a fresh listing of port names.
    ///
    /// Matches by name; the stored index only breaks ties between ports that
    /// share a name. Returns `None` if no port carries the name any more.
    pub fn locate(&self, names: &[String]) -> Option<usize> {
        let mut matches = names
            .iter()
            .enumerate()
            .filter(|(_, name)| **name == self.name)
            .map(|(index, _)| index);

        let first = matches.next()?;
        if first == self.index {
            return Some(first);
        }
        Some(matches.find(|&index| index == self.index).unwrap_or(first))
    }
}

/// Message families a backend may drop before they reach the session.
///
/// Best effort: a backend that cannot filter ignores this silently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct InputFilter {
    #[serde(default)]
    pub sysex: bool,
    #[serde(default)]
    pub timing: bool,
    #[serde(default)]
    pub active_sensing: bool,
}

impl InputFilter {
    const SYSEX: u8 = 0b001;
    const TIMING: u8 = 0b010;
    const ACTIVE_SENSING: u8 = 0b100;

    /// Whether this filter discards the given raw message
    pub fn drops(&self, data: &[u8]) -> bool {
        match data.first() {
            Some(0xF0) => self.sysex,
            Some(0xF1) | Some(0xF8) => self.timing,
            Some(0xFE) => self.active_sensing,
            _ => false,
        }
    }

    /// Pack into a bit set (for sharing through an atomic)
    pub fn to_bits(self) -> u8 {
        let mut bits = 0;
        if self.sysex {
            bits |= Self::SYSEX;
        }
        if self.timing {
            bits |= Self::TIMING;
        }
        if self.active_sensing {
            bits |= Self::ACTIVE_SENSING;
        }
        bits
    }

    pub fn from_bits(bits: u8) -> Self {
        Self {
            sysex: bits & Self::SYSEX != 0,
            timing: bits & Self::TIMING != 0,
            active_sensing: bits & Self::ACTIVE_SENSING != 0,
        }
    }
}

/// Backend failures. None of them is fatal to the process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// No usable driver is present
    #[error("MIDI backend unavailable: {0}")]
    Unavailable(String),

    /// One port could not be opened; other ports are unaffected
    #[error("failed to open MIDI port {index} ('{name}'): {reason}")]
    PortOpen {
        index: usize,
        name: String,
        reason: String,
    },

    /// Reading from an open port failed; fatal to that port's session only
    #[error("read from '{port}' failed: {reason}")]
    Read { port: String, reason: String },

    /// The handle was already closed
    #[error("MIDI input handle is closed")]
    Closed,
}

/// Driver capability contract.
pub trait MidiBackend: Send + Sync {
    /// Short backend identifier (for logs)
    fn name(&self) -> &str;

    /// List the input ports currently exposed by the driver
    fn enumerate(&self) -> Result<Vec<PortInfo>, BackendError>;

    /// Open one port. Failure is reported per port.
    fn open(&self, port: &PortInfo) -> Result<Arc<dyn InputHandle>, BackendError>;
}

/// One opened input port.
///
/// Methods take `&self` so the session thread and the owner can share the
/// handle; implementations use interior mutability.
pub trait InputHandle: Send + Sync {
    /// Apply message filtering. Unsupported options are ignored.
    fn configure(&self, filter: InputFilter);

    /// Return the next pending message, or `None` if nothing is queued.
    /// Never blocks.
    fn read_nonblocking(&self) -> Result<Option<Vec<u8>>, BackendError>;

    /// Release driver resources. Safe to call more than once.
    fn close(&self);
}

/// Which backend variant to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// Use the hardware driver if it can be initialised
    #[default]
    Auto,
    /// Require the hardware driver
    Midir,
    /// In-process loopback ports
    Loopback,
    /// Run without controller input
    None,
}

/// Result of capability detection
#[derive(Clone)]
pub enum BackendSelection {
    Selected(Arc<dyn MidiBackend>),
    Unavailable { reason: String },
}

impl BackendSelection {
    pub fn is_available(&self) -> bool {
        matches!(self, BackendSelection::Selected(_))
    }
}

impl std::fmt::Debug for BackendSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendSelection::Selected(backend) => {
                f.debug_tuple("Selected").field(&backend.name()).finish()
            }
            BackendSelection::Unavailable { reason } => f
                .debug_struct("Unavailable")
                .field("reason", reason)
                .finish(),
        }
    }
}

/// Pick the backend variant for this process.
///
/// Call once at startup and hand the result to the controller manager.
pub fn detect_backend(settings: &MidiSettings) -> BackendSelection {
    let selection = match settings.backend {
        BackendPreference::None => BackendSelection::Unavailable {
            reason: "controller input disabled by configuration".to_string(),
        },
        BackendPreference::Loopback => BackendSelection::Selected(Arc::new(
            LoopbackBackend::new(settings.loopback_ports.iter().cloned()),
        )),
        BackendPreference::Auto | BackendPreference::Midir => {
            match MidirBackend::probe(&settings.client_name) {
                Ok(backend) => BackendSelection::Selected(Arc::new(backend)),
                Err(e) => {
                    if settings.backend == BackendPreference::Midir {
                        warn!("Requested MIDI backend is not usable: {}", e);
                    } else {
                        debug!("MIDI driver probe failed: {}", e);
                    }
                    BackendSelection::Unavailable {
                        reason: e.to_string(),
                    }
                }
            }
        }
    };

    match &selection {
        BackendSelection::Selected(backend) => info!("MIDI backend: {}", backend.name()),
        BackendSelection::Unavailable { reason } => {
            info!("MIDI backend: not available ({})", reason)
        }
    }

    selection
}
