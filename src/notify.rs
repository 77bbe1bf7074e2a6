//! Change subscribers of a data item.
//!
//! Subscriptions live in slots. Releasing a subscription empties its slot,
//! and the lowest empty slot is reused by the next subscription, so ids
//! stay dense.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Callback invoked with the new value of a data item.
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Handle returned by [`Subscribers::subscribe`].
///
/// Valid until passed to [`Subscribers::unsubscribe`]; the same number may
/// be handed out again afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(usize);

impl SubscriptionId {
    /// Slot index of this subscription.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Ordered, slot-reusing set of change callbacks.
pub struct Subscribers<T> {
    slots: Mutex<Vec<Option<Callback<T>>>>,
}

impl<T> Subscribers<T> {
    /// Create an empty set.
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
        }
    }

    /// Register a callback, reusing the lowest released slot if any.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let callback: Callback<T> = Arc::new(callback);
        let mut slots = self.slots.lock();

        if let Some(index) = slots.iter().position(Option::is_none) {
            slots[index] = Some(callback);
            return SubscriptionId(index);
        }

        slots.push(Some(callback));
        SubscriptionId(slots.len() - 1)
    }

    /// Release a subscription. Unknown or already released ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        if let Some(slot) = self.slots.lock().get_mut(id.0) {
            *slot = None;
        }
    }

    /// Call every live callback with `value`, in slot order.
    ///
    /// The live callbacks are collected before the first one runs, so a
    /// callback may subscribe or unsubscribe; such changes apply from the
    /// next notification on.
    pub fn notify(&self, value: &T) {
        let live: Vec<Callback<T>> = self.slots.lock().iter().flatten().cloned().collect();
        for callback in live {
            callback(value);
        }
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.slots.lock().iter().filter(|slot| slot.is_some()).count()
    }

    /// Check if there is no live subscription.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Subscribers<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribers")
            .field("live", &self.len())
            .finish()
    }
}
