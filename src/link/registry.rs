//! Listener registry keyed by message kind
//!
//! Dispatch iterates a snapshot taken under the lock and calls listeners with
//! the lock released, so a listener may add or remove registrations (its own
//! included) while it runs. A listener removed mid-dispatch is not called
//! afterwards; the others are called exactly once each, in registration order.

use crate::codec::{Message, MessageKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::error;

/// Shared listener callback
pub type Listener = Arc<dyn Fn(&Message) + Send + Sync>;

/// Handle returned by `add`, used to remove the registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Clone)]
struct Entry {
    id: ListenerId,
    callback: Listener,
    active: Arc<AtomicBool>,
}

#[derive(Default)]
pub struct ListenerRegistry {
    entries: Mutex<HashMap<MessageKind, Vec<Entry>>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener for `kind`
    pub fn add(&self, kind: MessageKind, callback: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().entry(kind).or_default().push(Entry {
            id,
            callback,
            active: Arc::new(AtomicBool::new(true)),
        });
        id
    }

    /// Remove a listener; false if it was not registered for `kind`
    pub fn remove(&self, kind: MessageKind, id: ListenerId) -> bool {
        let mut entries = self.entries.lock();
        let Some(list) = entries.get_mut(&kind) else {
            return false;
        };
        let Some(pos) = list.iter().position(|e| e.id == id) else {
            return false;
        };
        let entry = list.remove(pos);
        entry.active.store(false, Ordering::SeqCst);
        if list.is_empty() {
            entries.remove(&kind);
        }
        true
    }

    /// Listeners registered for `kind`
    pub fn count(&self, kind: MessageKind) -> usize {
        self.entries.lock().get(&kind).map_or(0, Vec::len)
    }

    /// Listeners registered across all kinds
    pub fn len(&self) -> usize {
        self.entries.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every listener for the message's kind
    ///
    /// A panicking listener is logged and skipped. Returns the number of
    /// listeners that failed.
    pub fn dispatch(&self, message: &Message) -> usize {
        self.dispatch_while(message, || true)
    }

    /// Like `dispatch`, but stops before the next listener once `proceed`
    /// returns false
    pub fn dispatch_while(&self, message: &Message, proceed: impl Fn() -> bool) -> usize {
        let kind = message.kind();
        let snapshot = match self.entries.lock().get(&kind) {
            Some(list) => list.clone(),
            None => return 0,
        };

        let mut failures = 0;
        for entry in snapshot {
            if !proceed() {
                break;
            }
            if !entry.active.load(Ordering::SeqCst) {
                continue;
            }
            let callback = &entry.callback;
            if panic::catch_unwind(AssertUnwindSafe(|| callback(message))).is_err() {
                failures += 1;
                error!("Listener {:?} for {:?} panicked", entry.id, kind);
            }
        }
        failures
    }
}
