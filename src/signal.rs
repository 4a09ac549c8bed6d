// SPDX-License-Identifier: GPL-3.0-only

//! Multi-subscriber callbacks for session and device notifications
//!
//! Sessions never emit directly from backend threads; every emission runs on
//! the cooperative queue (see [`crate::dispatch`]).

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

type Slot<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Handle returned by [`Signal::connect`], used to disconnect later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Connection(u64);

/// A list of callbacks invoked with a shared reference to each emitted value
pub struct Signal<T> {
    slots: Mutex<Vec<(Connection, Slot<T>)>>,
    next_id: AtomicU64,
}

impl<T> Signal<T> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a callback
    pub fn connect<F>(&self, slot: F) -> Connection
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let connection = Connection(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.slots.lock().push((connection, Arc::new(slot)));
        connection
    }

    /// Remove a callback. Returns false if it was already gone.
    pub fn disconnect(&self, connection: Connection) -> bool {
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|(c, _)| *c != connection);
        slots.len() != before
    }

    pub fn disconnect_all(&self) {
        self.slots.lock().clear();
    }

    pub fn slot_count(&self) -> usize {
        self.slots.lock().len()
    }

    /// Invoke every connected callback.
    ///
    /// The slot list is snapshotted first, so callbacks may connect or
    /// disconnect (on this or any other signal) without deadlocking.
    pub fn emit(&self, value: &T) {
        let snapshot: Vec<Slot<T>> = self
            .slots
            .lock()
            .iter()
            .map(|(_, slot)| Arc::clone(slot))
            .collect();

        for slot in snapshot {
            slot(value);
        }
    }
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("slots", &self.slot_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn test_emit_reaches_all_slots() {
        let signal = Signal::<i32>::new();
        let total = Arc::new(AtomicI32::new(0));

        for _ in 0..3 {
            let total = Arc::clone(&total);
            signal.connect(move |v| {
                total.fetch_add(*v, Ordering::SeqCst);
            });
        }

        signal.emit(&5);
        assert_eq!(total.load(Ordering::SeqCst), 15);
    }

    #[test]
    fn test_disconnect() {
        let signal = Signal::<()>::new();
        let hits = Arc::new(AtomicI32::new(0));
        let hits_clone = Arc::clone(&hits);
        let connection = signal.connect(move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(signal.disconnect(connection));
        assert!(!signal.disconnect(connection));
        signal.emit(&());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_slot_can_connect_during_emit() {
        let signal = Arc::new(Signal::<()>::new());
        let inner = Arc::clone(&signal);
        signal.connect(move |_| {
            inner.connect(|_| {});
        });

        signal.emit(&());
        assert_eq!(signal.slot_count(), 2);
    }
}
