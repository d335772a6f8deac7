//! Callback registry and fault-isolated dispatch
//!
//! Subscribers register per controller number. On every event the matching
//! callbacks run in registration order; an `Err` or a panic from one of them
//! is logged and dropped, and the rest still run.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{trace, warn};

use crate::midi::DATA_MAX;
use crate::state::ControlEvent;

/// Callback type for controller events.
///
/// The device name travels on the event, so every subscriber has the same
/// shape. Identity (for unsubscribe) is the `Arc` allocation.
pub type CcCallback = Arc<dyn Fn(&ControlEvent) -> anyhow::Result<()> + Send + Sync>;

/// Wrap a closure as a [`CcCallback`]
pub fn callback<F>(f: F) -> CcCallback
where
    F: Fn(&ControlEvent) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Outcome of one dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Callbacks that were called
    pub invoked: usize,
    /// Callbacks that returned an error or panicked
    pub failed: usize,
}

/// Subscription table keyed by controller number. Clones share the table.
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    callbacks: Arc<RwLock<HashMap<u8, Vec<CcCallback>>>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a callback for a controller number.
    ///
    /// The same callback may be added several times; it then runs once per
    /// registration. Numbers above 127 can never match an event and are
    /// rejected (returns false).
    pub fn subscribe(&self, controller: u8, callback: CcCallback) -> bool {
        if controller > DATA_MAX {
            warn!("Ignoring subscription to out-of-range controller {}", controller);
            return false;
        }
        self.callbacks
            .write()
            .entry(controller)
            .or_default()
            .push(callback);
        true
    }

    /// Remove the first registration of `callback` for a controller number.
    ///
    /// Returns false (and does nothing) if it was not registered.
    pub fn unsubscribe(&self, controller: u8, callback: &CcCallback) -> bool {
        let mut callbacks = self.callbacks.write();
        let Some(list) = callbacks.get_mut(&controller) else {
            return false;
        };

        match list.iter().position(|cb| Arc::ptr_eq(cb, callback)) {
            Some(index) => {
                list.remove(index);
                true
            }
            None => false,
        }
    }

    /// Number of registrations for a controller number
    pub fn subscriber_count(&self, controller: u8) -> usize {
        self.callbacks
            .read()
            .get(&controller)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Run every callback registered for the event's controller.
    ///
    /// The list is copied before the first call, so callbacks may subscribe
    /// or unsubscribe without deadlocking; such changes apply from the next
    /// event on.
    pub fn dispatch(&self, event: &ControlEvent) -> DispatchReport {
        let targets: Vec<CcCallback> = match self.callbacks.read().get(&event.controller) {
            Some(list) if !list.is_empty() => list.clone(),
            _ => return DispatchReport::default(),
        };

        let mut report = DispatchReport::default();
        for callback in targets {
            report.invoked += 1;
            match panic::catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(
                        "CC{} callback failed (device '{}'): {:#}",
                        event.controller, event.device, e
                    );
                }
                Err(_) => {
                    report.failed += 1;
                    warn!(
                        "CC{} callback panicked (device '{}')",
                        event.controller, event.device
                    );
                }
            }
        }

        trace!(
            "Dispatched CC{}={} to {} callback(s)",
            event.controller,
            event.value,
            report.invoked
        );
        report
    }
}
