//! Impact Control - MIDI controller input for the Impact Synth visual rig
//!
//! Discovers control surfaces, polls each one on its own thread, decodes
//! Control Change messages, keeps the latest value per controller, and fans
//! events out to subscribed visual modules.

pub mod backend;
pub mod brightness;
pub mod config;
pub mod dispatch;
pub mod manager;
pub mod midi;
pub mod session;
pub mod state;

pub use backend::{
    detect_backend, BackendError, BackendPreference, BackendSelection, InputFilter, InputHandle,
    LoopbackBackend, MidiBackend, MidirBackend, PortInfo,
};
pub use brightness::Brightness;
pub use config::AppConfig;
pub use dispatch::{callback, CallbackRegistry, CcCallback, DispatchReport};
pub use manager::ControllerManager;
pub use midi::{decode, ControlChange, DecodeError};
pub use session::{DeviceSession, SessionOptions, SessionState};
pub use state::{ControlEvent, ControllerState};
