//! Typed listener lists
//!
//! Listeners run synchronously in registration order. A panicking listener is
//! logged and skipped; the remaining listeners and the emitter carry on.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use tracing::error;

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

pub struct Listeners<E> {
    name: &'static str,
    listeners: RwLock<Vec<Listener<E>>>,
}

impl<E> Listeners<E> {
    pub fn new(name: &'static str) -> Self {
        Self { name, listeners: RwLock::new(Vec::new()) }
    }

    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.push(Arc::new(listener));
        }
    }

    /// Call every listener with `event`; returns how many panicked.
    pub fn emit(&self, event: &E) -> usize {
        // Snapshot so listeners may subscribe without deadlocking
        let snapshot: Vec<Listener<E>> = match self.listeners.read() {
            Ok(listeners) => listeners.clone(),
            Err(_) => return 0,
        };

        let mut panicked = 0;
        for (index, listener) in snapshot.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                panicked += 1;
                error!(event = self.name, listener = index, "Event listener panicked");
            }
        }
        panicked
    }

    pub fn len(&self) -> usize {
        self.listeners.read().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
