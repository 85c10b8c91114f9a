//! Callback registration and gate-checked delivery.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

use crate::memory::{MemoryProvider, MemoryRegion};
use crate::msg::{MessageGate, MsgType};
use crate::traits::{CameraError, Result};

/// Notification callback: `(msg, ext1, ext2, user)`.
pub type NotifyCallback<C> = Box<dyn Fn(MsgType, i32, i32, &C) + Send + Sync>;
/// Data callback: `(msg, payload, user)`.
pub type DataCallback<C> = Box<dyn Fn(MsgType, &MemoryRegion, &C) + Send + Sync>;
/// Timestamped data callback: `(timestamp, msg, payload, user)`.
pub type DataTimestampCallback<C> = Box<dyn Fn(Duration, MsgType, &MemoryRegion, &C) + Send + Sync>;

/// The consumer's callback set, its memory provider and its context object.
///
/// `user` is handed back unchanged on every invocation.
pub struct Callbacks<C> {
    notify: Option<NotifyCallback<C>>,
    data: Option<DataCallback<C>>,
    data_timestamp: Option<DataTimestampCallback<C>>,
    memory: Arc<dyn MemoryProvider>,
    user: C,
}

impl<C> Callbacks<C> {
    /// Start a registration with no callbacks set.
    pub fn new(memory: Arc<dyn MemoryProvider>, user: C) -> Self {
        Self {
            notify: None,
            data: None,
            data_timestamp: None,
            memory,
            user,
        }
    }

    /// Set the notification callback.
    #[must_use]
    pub fn on_notify<F>(mut self, callback: F) -> Self
    where
        F: Fn(MsgType, i32, i32, &C) + Send + Sync + 'static,
    {
        self.notify = Some(Box::new(callback));
        self
    }

    /// Set the data callback.
    #[must_use]
    pub fn on_data<F>(mut self, callback: F) -> Self
    where
        F: Fn(MsgType, &MemoryRegion, &C) + Send + Sync + 'static,
    {
        self.data = Some(Box::new(callback));
        self
    }

    /// Set the timestamped data callback.
    #[must_use]
    pub fn on_data_timestamp<F>(mut self, callback: F) -> Self
    where
        F: Fn(Duration, MsgType, &MemoryRegion, &C) + Send + Sync + 'static,
    {
        self.data_timestamp = Some(Box::new(callback));
        self
    }
}

impl<C> fmt::Debug for Callbacks<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("notify", &self.notify.is_some())
            .field("data", &self.data.is_some())
            .field("data_timestamp", &self.data_timestamp.is_some())
            .finish_non_exhaustive()
    }
}

/// Emits events through the installed callbacks, filtered by the message gate.
///
/// The gate is read when the callback is about to run, so a category
/// disabled after an event was scheduled suppresses that event.
#[derive(Debug)]
pub struct Dispatcher<C> {
    gate: Arc<MessageGate>,
    callbacks: Option<Callbacks<C>>,
}

impl<C> Dispatcher<C> {
    /// Create a dispatcher reading `gate`.
    pub const fn new(gate: Arc<MessageGate>) -> Self {
        Self {
            gate,
            callbacks: None,
        }
    }

    /// Install (or replace) the callback set.
    pub fn install(&mut self, callbacks: Callbacks<C>) {
        self.callbacks = Some(callbacks);
    }

    /// Drop the callback set and the context object.
    pub fn clear(&mut self) {
        self.callbacks = None;
    }

    /// Whether callbacks have been registered.
    pub const fn is_installed(&self) -> bool {
        self.callbacks.is_some()
    }

    /// Allocate a payload region from the consumer's provider.
    pub fn request_memory(&self, size: usize) -> Result<MemoryRegion> {
        self.callbacks
            .as_ref()
            .ok_or_else(|| CameraError::InvalidState("no memory provider registered".to_owned()))?
            .memory
            .request_memory(size)
    }

    /// Whether an event of category `msg` would currently be delivered.
    pub fn would_deliver(&self, msg: MsgType) -> bool {
        self.callbacks.is_some() && self.gate.is_enabled(msg)
    }

    /// Emit a notification. Returns whether the callback ran.
    pub fn notify(&self, msg: MsgType, ext1: i32, ext2: i32) -> bool {
        let Some(callbacks) = self.deliverable(msg) else {
            return false;
        };
        let Some(notify) = callbacks.notify.as_ref() else {
            trace!(%msg, "no notify callback registered");
            return false;
        };
        notify(msg, ext1, ext2, &callbacks.user);
        true
    }

    /// Emit a data event. Returns whether the callback ran.
    pub fn data(&self, msg: MsgType, region: &MemoryRegion) -> bool {
        let Some(callbacks) = self.deliverable(msg) else {
            return false;
        };
        let Some(data) = callbacks.data.as_ref() else {
            trace!(%msg, "no data callback registered");
            return false;
        };
        data(msg, region, &callbacks.user);
        true
    }

    /// Emit a timestamped data event. Returns whether the callback ran.
    pub fn data_timestamp(&self, timestamp: Duration, msg: MsgType, region: &MemoryRegion) -> bool {
        let Some(callbacks) = self.deliverable(msg) else {
            return false;
        };
        let Some(data_timestamp) = callbacks.data_timestamp.as_ref() else {
            trace!(%msg, "no timestamped data callback registered");
            return false;
        };
        data_timestamp(timestamp, msg, region, &callbacks.user);
        true
    }

    fn deliverable(&self, msg: MsgType) -> Option<&Callbacks<C>> {
        if !self.gate.is_enabled(msg) {
            trace!(%msg, "suppressed by message gate");
            return None;
        }
        self.callbacks.as_ref()
    }
}
