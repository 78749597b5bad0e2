// src/services/observer.rs

//! Change notification fan-out.

use std::sync::Arc;

use crate::error::Result;
use crate::models::ChangeEvent;

/// Receiver of repository change events.
pub trait Observer: Send + Sync {
    /// Name used in log messages.
    fn name(&self) -> &str;

    fn on_change(&self, event: &ChangeEvent) -> Result<()>;
}

/// Ordered set of observers notified synchronously.
#[derive(Clone, Default)]
pub struct ObserverBus {
    observers: Vec<Arc<dyn Observer>>,
}

impl ObserverBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, observer: Arc<dyn Observer>) {
        log::debug!("Registered observer {}", observer.name());
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Deliver `event` to every observer in registration order.
    ///
    /// A failing observer is logged and does not stop delivery to the rest.
    pub fn notify(&self, event: &ChangeEvent) {
        for observer in &self.observers {
            if let Err(e) = observer.on_change(event) {
                log::error!(
                    "Observer {} failed on {} {}: {}",
                    observer.name(),
                    event.change_type,
                    event.resource_uri,
                    e
                );
            }
        }
    }
}
