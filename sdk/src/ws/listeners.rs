//! Listener tables.
//!
//! Ordered callback lists keyed by event name. Registration hands back a
//! [`Disposer`] that removes exactly that callback.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::error;

/// A registered callback.
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registration<T> {
    id: u64,
    callback: Callback<T>,
}

struct Table<T> {
    next_id: u64,
    by_key: HashMap<String, Vec<Registration<T>>>,
}

impl<T> Table<T> {
    fn contains(&self, key: &str, id: u64) -> bool {
        self.by_key
            .get(key)
            .is_some_and(|regs| regs.iter().any(|r| r.id == id))
    }

    fn remove(&mut self, key: &str, id: u64) -> bool {
        let Some(regs) = self.by_key.get_mut(key) else {
            return false;
        };
        let Some(pos) = regs.iter().position(|r| r.id == id) else {
            return false;
        };
        regs.remove(pos);
        if regs.is_empty() {
            self.by_key.remove(key);
        }
        true
    }
}

/// Outcome of one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Callbacks that returned normally.
    pub delivered: usize,
    /// Callbacks that panicked.
    pub panicked: usize,
}

/// Callbacks keyed by event name, dispatched in registration order.
pub(crate) struct ListenerTable<T> {
    table: Arc<Mutex<Table<T>>>,
}

impl<T: 'static> ListenerTable<T> {
    pub(crate) fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(Table {
                next_id: 0,
                by_key: HashMap::new(),
            })),
        }
    }

    /// Appends a callback under `key`.
    pub(crate) fn add(&self, key: &str, callback: Callback<T>) -> Disposer {
        let id = {
            let mut table = self.table.lock();
            table.next_id += 1;
            let id = table.next_id;
            table
                .by_key
                .entry(key.to_string())
                .or_default()
                .push(Registration { id, callback });
            id
        };

        Disposer {
            slot: Some(Box::new(Slot {
                table: Arc::downgrade(&self.table),
                key: key.to_string(),
                id,
            })),
        }
    }

    /// Invokes every callback under `key`.
    ///
    /// The table is not locked while callbacks run, so they may register or
    /// dispose listeners. A callback disposed before its turn is skipped.
    /// Panics are caught and reported per callback.
    pub(crate) fn notify(&self, key: &str, data: &T) -> DispatchReport {
        let snapshot: Vec<(u64, Callback<T>)> = {
            let table = self.table.lock();
            table
                .by_key
                .get(key)
                .map(|regs| {
                    regs.iter()
                        .map(|r| (r.id, Arc::clone(&r.callback)))
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut report = DispatchReport::default();
        for (id, callback) in snapshot {
            if !self.table.lock().contains(key, id) {
                continue;
            }
            match panic::catch_unwind(AssertUnwindSafe(|| callback(data))) {
                Ok(()) => report.delivered += 1,
                Err(payload) => {
                    report.panicked += 1;
                    error!(
                        "Listener for {} panicked: {}",
                        key,
                        panic_message(payload.as_ref())
                    );
                }
            }
        }
        report
    }

    /// Returns the number of callbacks under `key`.
    pub(crate) fn count(&self, key: &str) -> usize {
        self.table.lock().by_key.get(key).map_or(0, Vec::len)
    }

    /// Removes every callback. Outstanding disposers report themselves
    /// disposed and become no-ops.
    pub(crate) fn clear(&self) {
        self.table.lock().by_key.clear();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Where a registration lives, as seen by its [`Disposer`].
trait Registered: Send {
    fn is_live(&self) -> bool;
    fn remove(&self);
}

struct Slot<T> {
    table: Weak<Mutex<Table<T>>>,
    key: String,
    id: u64,
}

impl<T: 'static> Registered for Slot<T> {
    fn is_live(&self) -> bool {
        self.table
            .upgrade()
            .is_some_and(|table| table.lock().contains(&self.key, self.id))
    }

    fn remove(&self) {
        if let Some(table) = self.table.upgrade() {
            table.lock().remove(&self.key, self.id);
        }
    }
}

/// Removes one listener registration.
///
/// Dropping a disposer does not remove the listener; call [`dispose`].
/// Disposing twice, or after the owning socket cleared its listeners, is a
/// no-op.
///
/// [`dispose`]: Disposer::dispose
#[must_use = "the listener stays registered until dispose() is called"]
pub struct Disposer {
    slot: Option<Box<dyn Registered>>,
}

impl Disposer {
    /// A disposer with nothing to remove.
    pub fn noop() -> Self {
        Self { slot: None }
    }

    /// Removes the listener. Takes effect before returning.
    pub fn dispose(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.remove();
        }
    }

    /// Returns true once the listener is gone: disposed here, cleared by
    /// its table, or never registered.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        !self.slot.as_ref().is_some_and(|slot| slot.is_live())
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposer")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
