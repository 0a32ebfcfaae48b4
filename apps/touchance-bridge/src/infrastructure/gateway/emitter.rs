//! Event Emitter
//!
//! Maps event names to ordered listener lists. Each emitter is owned by the
//! component that emits through it; there is no process-wide registry.
//!
//! Two dispatch disciplines:
//!
//! - [`Dispatch::Sequential`]: listeners run one after another in
//!   registration order and `emit` returns when the last one finishes.
//! - [`Dispatch::Concurrent`]: each listener is spawned as its own task;
//!   `emit` returns immediately and listeners may run in any order.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;

/// A registered listener.
pub type Listener<T> = Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>;

/// How `emit` runs listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Await each listener in registration order.
    Sequential,
    /// Spawn each listener as an independent task.
    Concurrent,
}

/// Name-keyed listener registry.
pub struct EventEmitter<T> {
    dispatch: Dispatch,
    listeners: RwLock<HashMap<String, Vec<Listener<T>>>>,
}

impl<T> std::fmt::Debug for EventEmitter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.listeners.read();
        let mut names: Vec<_> = listeners.keys().collect();
        names.sort();
        f.debug_struct("EventEmitter")
            .field("dispatch", &self.dispatch)
            .field("events", &names)
            .finish()
    }
}

impl<T: Clone + Send + 'static> EventEmitter<T> {
    /// Create an empty emitter.
    #[must_use]
    pub fn new(dispatch: Dispatch) -> Self {
        Self {
            dispatch,
            listeners: RwLock::new(HashMap::new()),
        }
    }

    /// Dispatch discipline of this emitter.
    #[must_use]
    pub const fn dispatch(&self) -> Dispatch {
        self.dispatch
    }

    /// Register a synchronous listener under `name`, stored as given.
    pub fn on<F>(&self, name: &str, listener: F)
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.on_async(name, move |payload| {
            listener(payload);
            async {}
        });
    }

    /// Register an async listener under `name`, stored as given.
    pub fn on_async<F, Fut>(&self, name: &str, listener: F)
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener: Listener<T> =
            Arc::new(move |payload| -> BoxFuture<'static, ()> { Box::pin(listener(payload)) });
        self.listeners
            .write()
            .entry(name.to_string())
            .or_default()
            .push(listener);
    }

    /// Number of listeners registered under `name`.
    #[must_use]
    pub fn listener_count(&self, name: &str) -> usize {
        self.listeners.read().get(name).map_or(0, Vec::len)
    }

    /// Remove every listener.
    pub fn clear(&self) {
        self.listeners.write().clear();
    }

    /// Run the listeners registered under exactly `name`.
    ///
    /// Emitting an event nobody listens to is a no-op. Returns the number of
    /// listeners invoked.
    pub async fn emit(&self, name: &str, payload: T) -> usize {
        // Snapshot so listeners may register more listeners without deadlock.
        let listeners = match self.listeners.read().get(name) {
            Some(listeners) => listeners.clone(),
            None => return 0,
        };

        match self.dispatch {
            Dispatch::Sequential => {
                for listener in &listeners {
                    listener(payload.clone()).await;
                }
            }
            Dispatch::Concurrent => {
                for listener in &listeners {
                    tokio::spawn(listener(payload.clone()));
                }
            }
        }

        listeners.len()
    }
}
