//! Controller manager
//!
//! Discovers ports once at startup, runs one [`DeviceSession`] per opened
//! port, and exposes the state store and subscription table to visual
//! modules. Nothing here fails hard: with no backend the manager simply has
//! zero devices and every query returns the caller's default.

use std::sync::Arc;
use tracing::{info, warn};

use crate::backend::{detect_backend, BackendSelection, MidiBackend, PortInfo};
use crate::config::MidiSettings;
use crate::dispatch::{CallbackRegistry, CcCallback};
use crate::midi::ControlChange;
use crate::session::{DeviceSession, EventSink, SessionOptions, SessionState};
use crate::state::{ControlEvent, ControllerState};

/// Owner of every device session and of the shared controller state
pub struct ControllerManager {
    backend_name: Option<String>,
    ports: Vec<PortInfo>,
    sessions: Vec<DeviceSession>,
    state: ControllerState,
    registry: CallbackRegistry,
}

impl ControllerManager {
    /// Detect the backend and connect every available port
    pub fn start(settings: &MidiSettings) -> Self {
        let selection = detect_backend(settings);
        Self::from_selection(selection, settings.session_options())
    }

    /// Connect using an already detected backend
    pub fn from_selection(selection: BackendSelection, options: SessionOptions) -> Self {
        match selection {
            BackendSelection::Selected(backend) => Self::with_backend(backend, options),
            BackendSelection::Unavailable { reason } => {
                warn!("Controller input disabled: {}", reason);
                Self::disconnected()
            }
        }
    }

    /// Manager with no backend and no devices
    pub fn disconnected() -> Self {
        Self {
            backend_name: None,
            ports: Vec::new(),
            sessions: Vec::new(),
            state: ControllerState::new(),
            registry: CallbackRegistry::new(),
        }
    }

    /// Enumerate and open every port of `backend`
    pub fn with_backend(backend: Arc<dyn MidiBackend>, options: SessionOptions) -> Self {
        let mut manager = Self::disconnected();
        manager.backend_name = Some(backend.name().to_string());

        let ports = match backend.enumerate() {
            Ok(ports) => ports,
            Err(e) => {
                warn!("MIDI port enumeration failed: {}", e);
                return manager;
            }
        };

        if ports.is_empty() {
            info!("No MIDI input ports found");
        }

        let sink = manager.event_sink();
        for port in &ports {
            let mut session = match DeviceSession::open(backend.as_ref(), port.clone(), options) {
                Ok(session) => session,
                Err(e) => {
                    warn!("Skipping MIDI port: {}", e);
                    continue;
                }
            };

            if let Err(e) = session.start(sink.clone()) {
                warn!("Skipping MIDI port: {:#}", e);
                continue;
            }

            manager.sessions.push(session);
        }

        manager.ports = ports;

        if manager.is_connected() {
            info!(
                "Connected to MIDI devices: {:?}",
                manager.connected_devices()
            );
        }

        manager
    }

    /// Store then dispatch; shared by every session
    fn event_sink(&self) -> EventSink {
        let state = self.state.clone();
        let registry = self.registry.clone();
        Arc::new(move |change: ControlChange, device: &Arc<str>| {
            let event = state.record(change, device);
            registry.dispatch(&event);
        })
    }

    /// Whether at least one device was opened
    pub fn is_connected(&self) -> bool {
        !self.sessions.is_empty()
    }

    /// Names of the opened devices
    pub fn connected_devices(&self) -> Vec<String> {
        self.sessions
            .iter()
            .map(|s| s.device_name().to_string())
            .collect()
    }

    /// Names of every enumerated port, opened or not
    pub fn available_ports(&self) -> Vec<String> {
        self.ports.iter().map(|p| p.name.clone()).collect()
    }

    /// First connected device, if any
    pub fn primary_device(&self) -> Option<String> {
        self.sessions.first().map(|s| s.device_name().to_string())
    }

    pub fn backend_name(&self) -> Option<&str> {
        self.backend_name.as_deref()
    }

    /// Lifecycle state of each session
    pub fn session_states(&self) -> Vec<(String, SessionState)> {
        self.sessions
            .iter()
            .map(|s| (s.device_name().to_string(), s.state()))
            .collect()
    }

    /// Latest value of a controller, or `default` if never received
    pub fn get(&self, controller: u8, default: u8) -> u8 {
        self.state.get(controller, default)
    }

    /// Most recent event from any device
    pub fn last_event(&self) -> Option<ControlEvent> {
        self.state.last_event()
    }

    /// Shared handle to the controller state (cheap to clone)
    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    /// Returns false if `controller` is outside 0-127
    pub fn subscribe(&self, controller: u8, callback: CcCallback) -> bool {
        self.registry.subscribe(controller, callback)
    }

    /// Returns false if the callback was not registered for `controller`
    pub fn unsubscribe(&self, controller: u8, callback: &CcCallback) -> bool {
        self.registry.unsubscribe(controller, callback)
    }

    /// Stop every session and release all ports. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.sessions.is_empty() {
            return;
        }

        for session in &mut self.sessions {
            session.shutdown();
        }
        info!("Closed {} MIDI device(s)", self.sessions.len());
        self.sessions.clear();
    }
}

impl Drop for ControllerManager {
    fn drop(&mut self) {
        self.close();
    }
}
