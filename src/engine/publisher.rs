//! In-process event fan-out.
//!
//! Controllers publish typed events; registered listeners receive them
//! either inline (sync mode, listener-visible order preserved) or on a
//! spawned task (async mode, no ordering guarantee).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::domain::models::DependencyEvent;

/// Events crossing controller boundaries.
#[derive(Debug, Clone)]
pub enum BusEvent {
    Dependency(DependencyEvent),
}

pub trait Listener: Send + Sync {
    /// Stable identity; a second listener with the same id replaces the
    /// first.
    fn listener_id(&self) -> String;

    /// Must not block: async-mode emission runs on a shared task.
    fn handle_event(&self, event: &BusEvent);
}

pub struct Publisher {
    async_mode: bool,
    listeners: RwLock<HashMap<String, Arc<dyn Listener>>>,
}

impl Publisher {
    pub fn new(async_mode: bool) -> Self {
        Self {
            async_mode,
            listeners: RwLock::new(HashMap::new()),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn Listener>) {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        listeners.insert(listener.listener_id(), listener);
    }

    pub fn remove_listener(&self, listener_id: &str) {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        listeners.remove(listener_id);
    }

    pub fn emit(&self, event: BusEvent) {
        let targets: Vec<Arc<dyn Listener>> = {
            let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
            listeners.values().cloned().collect()
        };
        if self.async_mode {
            tokio::spawn(async move {
                for listener in targets {
                    listener.handle_event(&event);
                }
            });
        } else {
            for listener in targets {
                listener.handle_event(&event);
            }
        }
    }
}
