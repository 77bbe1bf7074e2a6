//! Data items: one typed value with change notification, an optional
//! mutation policy and a persistence policy.
//!
//! Capabilities are chosen at construction. Every item can be reset,
//! defaulted, reloaded and observed; an item built with
//! [`DataItem::settable`] also accepts [`DataItem::set`], and one built with
//! [`DataItem::editable`] accepts [`DataItem::edit`].
//!
//! All mutators of one item serialize on the item's exclusive token. The
//! token is re-entrant, so a subscriber may mutate the item that is
//! notifying it. An `edit` callback works on a copy of the value and may
//! read the item; the copy is written back when the callback returns.

use parking_lot::{ReentrantMutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{Result, SettingsError};
use crate::mutation::MutationPolicy;
use crate::notify::{SubscriptionId, Subscribers};
use crate::persist::{Storage, ValueCell};

/// Bounds shared by every value a data item can hold.
pub trait Value: Clone + fmt::Debug + Send + Sync + 'static {}

impl<T: Clone + fmt::Debug + Send + Sync + 'static> Value for T {}

/// A typed setting with subscribers and pluggable policies.
pub struct DataItem<T: Value> {
    name: Option<String>,
    value: ValueCell<T>,
    subscribers: Subscribers<T>,
    storage: Box<dyn Storage<T>>,
    mutation: Option<Box<dyn MutationPolicy<T>>>,
    editable: bool,
    token: ReentrantMutex<()>,
    muted: AtomicBool,
    log_changes: AtomicBool,
}

impl<T: Value> DataItem<T> {
    /// Create an item around `storage`, loading its stored value or falling
    /// back to the default.
    pub fn new(storage: Box<dyn Storage<T>>, name: Option<String>) -> Self {
        let mut value = storage.default_value();
        if !storage.load_or_default_into(&mut value) {
            storage.default_into(&mut value);
        }

        Self {
            name,
            value: Arc::new(RwLock::new(value)),
            subscribers: Subscribers::new(),
            storage,
            mutation: None,
            editable: false,
            token: ReentrantMutex::new(()),
            muted: AtomicBool::new(false),
            log_changes: AtomicBool::new(false),
        }
    }

    /// Enable [`DataItem::set`], validated by `policy`.
    pub fn settable(mut self, policy: Box<dyn MutationPolicy<T>>) -> Self {
        self.mutation = Some(policy);
        self
    }

    /// Enable [`DataItem::edit`].
    pub fn editable(mut self) -> Self {
        self.editable = true;
        self
    }

    /// Display name, falling back to the storage key.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref().or_else(|| self.storage.key())
    }

    /// Storage key, if the value is persisted.
    pub fn key(&self) -> Option<&str> {
        self.storage.key()
    }

    fn label(&self) -> String {
        self.name().unwrap_or("<unnamed>").to_string()
    }

    /// Copy of the current value.
    pub fn get(&self) -> T {
        self.value.read().clone()
    }

    /// Run `f` with a borrow of the current value.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let value = self.value.read();
        f(&*value)
    }

    /// `(min, max)` of a bounded item.
    pub fn bounds(&self) -> Option<(T, T)> {
        self.mutation
            .as_ref()?
            .bounds()
            .map(|(min, max)| (min.clone(), max.clone()))
    }

    /// Whether [`DataItem::set`] is available.
    pub fn is_settable(&self) -> bool {
        self.mutation.is_some()
    }

    /// Whether [`DataItem::edit`] is available.
    pub fn is_editable(&self) -> bool {
        self.editable
    }

    /// Register `callback` for changes. With `immediate`, it is first called
    /// with the current value.
    pub fn subscribe<F>(&self, callback: F, immediate: bool) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        if immediate {
            callback(&self.get());
        }
        self.subscribers.subscribe(callback)
    }

    /// Release a subscription. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.unsubscribe(id);
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Suppress notifications until [`DataItem::unmute`].
    pub fn mute(&self) {
        self.muted.store(true, Ordering::SeqCst);
    }

    /// Resume notifications. If the item was muted, subscribers receive the
    /// current value once.
    pub fn unmute(&self) {
        let _token = self.token.lock();
        if self.muted.swap(false, Ordering::SeqCst) {
            let current = self.get();
            self.notify(&current);
        }
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    /// Log every delivered change through `tracing`.
    pub fn enable_change_logging(&self, enable: bool) {
        self.log_changes.store(enable, Ordering::SeqCst);
    }

    fn notify(&self, next: &T) {
        if self.is_muted() {
            return;
        }
        if self.log_changes.load(Ordering::SeqCst) {
            let current = self.get();
            info!(item = %self.label(), "{:?} -> {:?}", current, next);
        }
        self.subscribers.notify(next);
    }

    /// Propose `next` as the new value.
    ///
    /// Subscribers are notified with `next` while the item still holds the
    /// old value; the value is then replaced and scheduled for storing.
    /// Returns whether the policy accepted the value.
    pub fn set(&self, next: T) -> bool {
        let Some(policy) = self.mutation.as_deref() else {
            debug!(item = %self.label(), "set on an item without a mutation policy");
            return false;
        };

        let _token = self.token.lock();
        let accepted = policy.verify(&*self.value.read(), &next);
        if !accepted {
            return false;
        }

        self.notify(&next);
        policy.apply(&mut *self.value.write(), next);
        self.storage.defer_store(&self.value);
        true
    }

    /// Mutate the value in place.
    ///
    /// `f` returns whether it changed the value; only then are subscribers
    /// notified and the value scheduled for storing. While `f` runs, other
    /// readers still see the previous value. Blocks while another task
    /// holds the item. Returns what `f` returned.
    pub fn edit<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut T) -> bool,
    {
        if !self.editable {
            warn!(item = %self.label(), "edit on an item that is not editable");
            return false;
        }
        let _token = self.token.lock();
        self.edit_locked(f)
    }

    /// Like [`DataItem::edit`], but gives up after `timeout`.
    pub fn try_edit_for<F>(&self, timeout: Duration, f: F) -> Result<bool>
    where
        F: FnOnce(&mut T) -> bool,
    {
        if !self.editable {
            warn!(item = %self.label(), "edit on an item that is not editable");
            return Ok(false);
        }
        let Some(_token) = self.token.try_lock_for(timeout) else {
            return Err(SettingsError::EditTimeout {
                item: self.label(),
                timeout,
            });
        };
        Ok(self.edit_locked(f))
    }

    fn edit_locked<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut T) -> bool,
    {
        let mut next = self.get();
        let changed = f(&mut next);
        *self.value.write() = next;
        if changed {
            let current = self.get();
            self.notify(&current);
            self.storage.defer_store(&self.value);
        }
        changed
    }

    /// Return to the default value and drop the stored value, then notify.
    pub fn reset(&self) {
        let _token = self.token.lock();
        let mut next = self.get();
        self.storage.reset_into(&mut next);
        self.replace_and_notify(next);
    }

    /// Return to the default value, keeping the stored value, then notify.
    pub fn set_default(&self) {
        let _token = self.token.lock();
        let mut next = self.get();
        self.storage.default_into(&mut next);
        self.replace_and_notify(next);
    }

    /// Reload the stored value, notifying if it may have changed.
    pub fn load_or_reset(&self) {
        let _token = self.token.lock();
        let mut next = self.get();
        if self.storage.load_or_default_into(&mut next) {
            self.replace_and_notify(next);
        } else {
            *self.value.write() = next;
        }
    }

    // Storage policies may reach the commit batcher, so they work on a copy
    // and the cell is only locked to swap the result in.
    fn replace_and_notify(&self, next: T) {
        *self.value.write() = next.clone();
        self.notify(&next);
    }

    /// Append `name: value` at `indent_depth` to `out`.
    pub fn render_into(&self, indent_depth: usize, out: &mut String) {
        out.push_str(&"  ".repeat(indent_depth));
        if let Some(name) = self.name() {
            out.push_str(name);
            out.push_str(": ");
        }
        out.push_str(&format!("{:?}\n", self.get()));
    }
}

impl<T: Value> fmt::Debug for DataItem<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataItem")
            .field("name", &self.name())
            .field("value", &*self.value.read())
            .field("settable", &self.is_settable())
            .field("editable", &self.editable)
            .field("muted", &self.is_muted())
            .finish()
    }
}
