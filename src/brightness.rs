//! Global display brightness driven by a controller
//!
//! The application reserves one controller number at startup; its value,
//! scaled to 0.0-1.0, multiplies every rendered frame.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::dispatch::{callback, CcCallback};
use crate::manager::ControllerManager;

/// Shared brightness level (0.0-1.0), readable from the render loop
#[derive(Clone)]
pub struct Brightness {
    level: Arc<AtomicU32>,
}

impl Default for Brightness {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl Brightness {
    pub fn new(initial: f32) -> Self {
        Self {
            level: Arc::new(AtomicU32::new(initial.clamp(0.0, 1.0).to_bits())),
        }
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.level.load(Ordering::Relaxed))
    }

    pub fn set(&self, level: f32) {
        self.level
            .store(level.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    /// Callback that updates this level from incoming events
    pub fn callback(&self) -> CcCallback {
        let brightness = self.clone();
        callback(move |event| {
            let level = event.normalized();
            brightness.set(level);
            info!(
                "Brightness CC{}={} from '{}': {:.2}",
                event.controller, event.value, event.device, level
            );
            Ok(())
        })
    }

    /// Subscribe this level to `controller` on the manager.
    ///
    /// Returns the registered callback so it can be unsubscribed later.
    pub fn attach(&self, manager: &ControllerManager, controller: u8) -> CcCallback {
        let cb = self.callback();
        manager.subscribe(controller, cb.clone());
        cb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ControlEvent;

    fn event(value: u8) -> ControlEvent {
        ControlEvent {
            controller: 7,
            value,
            channel: 0,
            device: Arc::from("Fader"),
            arrival_order: 0,
        }
    }

    #[test]
    fn test_defaults_to_full_brightness() {
        assert_eq!(Brightness::default().get(), 1.0);
    }

    #[test]
    fn test_callback_scales_value() {
        let brightness = Brightness::default();
        let cb = brightness.callback();

        cb(&event(0)).unwrap();
        assert_eq!(brightness.get(), 0.0);

        cb(&event(127)).unwrap();
        assert_eq!(brightness.get(), 1.0);

        cb(&event(64)).unwrap();
        assert!((brightness.get() - 64.0 / 127.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_set_clamps() {
        let brightness = Brightness::new(3.0);
        assert_eq!(brightness.get(), 1.0);
        brightness.set(-1.0);
        assert_eq!(brightness.get(), 0.0);
    }
}
