//! Controller state store
//!
//! Latest value per controller number plus the most recent event from any
//! device. Written by session threads, read by the render loop.
//!
//! Values are keyed by controller number only: two devices sending the same
//! controller overwrite each other.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::midi::ControlChange;

/// A Control Change attributed to the device that sent it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlEvent {
    /// Controller number (0-127)
    pub controller: u8,
    /// Controller value (0-127)
    pub value: u8,
    /// Channel (0-15)
    pub channel: u8,
    /// Name of the port the event arrived on
    pub device: Arc<str>,
    /// Position in the global order in which events were stored
    pub arrival_order: u64,
}

impl ControlEvent {
    /// Value scaled to 0.0-1.0
    pub fn normalized(&self) -> f32 {
        self.value as f32 / 127.0
    }
}

#[derive(Default)]
struct StateInner {
    values: HashMap<u8, u8>,
    last_event: Option<ControlEvent>,
    next_order: u64,
}

/// Thread-safe controller state. Clones share the same storage.
#[derive(Clone, Default)]
pub struct ControllerState {
    inner: Arc<RwLock<StateInner>>,
}

impl ControllerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a decoded Control Change and return the attributed event.
    ///
    /// The value and the last-event slot are updated under one write lock,
    /// so `arrival_order` matches the order in which writes happened.
    pub fn record(&self, change: ControlChange, device: &Arc<str>) -> ControlEvent {
        let change = ControlChange::new(change.channel, change.controller, change.value);

        let mut inner = self.inner.write();
        let arrival_order = inner.next_order;
        inner.next_order += 1;

        let event = ControlEvent {
            controller: change.controller,
            value: change.value,
            channel: change.channel,
            device: device.clone(),
            arrival_order,
        };

        inner.values.insert(event.controller, event.value);
        inner.last_event = Some(event.clone());
        event
    }

    /// Latest value for a controller, or `default` if it was never seen
    pub fn get(&self, controller: u8, default: u8) -> u8 {
        self.inner
            .read()
            .values
            .get(&controller)
            .copied()
            .unwrap_or(default)
    }

    /// Latest value scaled to 0.0-1.0, or `default` if never seen
    pub fn get_normalized(&self, controller: u8, default: f32) -> f32 {
        self.inner
            .read()
            .values
            .get(&controller)
            .map(|v| *v as f32 / 127.0)
            .unwrap_or(default)
    }

    /// Most recent event from any device
    pub fn last_event(&self) -> Option<ControlEvent> {
        self.inner.read().last_event.clone()
    }

    /// All observed controller values, ordered by controller number
    pub fn snapshot(&self) -> BTreeMap<u8, u8> {
        self.inner
            .read()
            .values
            .iter()
            .map(|(k, v)| (*k, *v))
            .collect()
    }

    /// Number of distinct controllers seen
    pub fn len(&self) -> usize {
        self.inner.read().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
