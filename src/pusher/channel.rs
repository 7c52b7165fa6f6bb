use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;

use super::types::Frame;

/// Callback invoked with the `data` of a matching frame.
pub type Handler = Arc<dyn Fn(&Value) + Send + Sync + 'static>;

/// A named subscription scope and the handlers bound to events within it.
///
/// Obtained from [`Connection::channel`](super::Connection::channel); the channel with
/// the empty name receives connection-level frames.
pub struct Channel {
    name: String,
    handlers: RwLock<HashMap<String, Vec<Handler>>>,
}

impl Channel {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            handlers: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke `handler` with the payload of every frame for `event` on this channel.
    ///
    /// Handlers for the same event run in registration order. Binding the same
    /// closure twice makes it run twice.
    pub fn bind<F>(&self, event: &str, handler: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        #[cfg(feature = "tracing")]
        tracing::debug!(channel = %self.name, %event, "Binding handler");

        // A poisoned map is still consistent: writers only push onto a Vec.
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event.to_owned())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Number of handlers bound to `event`.
    #[must_use]
    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .map_or(0, Vec::len)
    }

    /// Run every handler bound to `frame.event`, returning the messages of any that
    /// panicked.
    ///
    /// The handler list is snapshotted first so handlers may bind more handlers or
    /// open channels without deadlocking. A panic stops only the handler that raised it.
    pub(crate) fn dispatch(&self, frame: &Frame) -> Vec<String> {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&frame.event)
            .cloned()
            .unwrap_or_default();

        if handlers.is_empty() {
            #[cfg(feature = "tracing")]
            tracing::trace!(channel = %self.name, event = %frame.event, "No handler bound, dropping frame");
            return Vec::new();
        }

        handlers
            .iter()
            .filter_map(|handler| {
                catch_unwind(AssertUnwindSafe(|| handler(&frame.data)))
                    .err()
                    .map(panic_message)
            })
            .collect()
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let events: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();

        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("events", &events)
            .finish()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_owned()
    }
}
