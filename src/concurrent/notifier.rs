//! Change notification: itemized events plus a coalesced refresh signal.
//!
//! Every committed write produces exactly one [`ChangeEvent`]. Events are
//! queued while the writer still holds exclusive access, so the queue order
//! is the commit order, and they are delivered after the lock is released.
//!
//! Delivery happens on a committing thread under a re-entrant lock: a
//! listener that mutates the collection from inside its callback simply
//! queues another event, which the outer delivery loop hands out next.
//!
//! The coalesced "view changed" signal is driven by a [`RefreshThrottle`]:
//! bursts of events collapse into one call of the refresh consumer, fired
//! one window after the first event of the burst.

use std::cell::Cell;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, ReentrantMutex};
use tracing::{debug, warn};

use crate::error::Result;
use crate::persistent::Entry;

// =============================================================================
// Events
// =============================================================================

/// What kind of change an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeAction {
    /// Items were added; they are listed in `new_items`.
    Add,
    /// Items were removed; they are listed in `old_items`.
    Remove,
    /// Values were replaced in place; `old_items` and `new_items` pair up.
    Replace,
    /// The collection changed wholesale, e.g. it was cleared.
    Reset,
}

/// One affected item and its position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedItem<K, V> {
    /// Position of the item: in the new snapshot for new items, in the
    /// previous snapshot for old items.
    pub index: usize,
    /// The item's key.
    pub key: K,
    /// The item's value.
    pub value: V,
}

impl<K: Clone, V: Clone> ChangedItem<K, V> {
    pub(crate) fn from_entry(index: usize, entry: &Entry<K, V>) -> Self {
        Self {
            index,
            key: entry.key().clone(),
            value: entry.value().clone(),
        }
    }
}

/// An itemized record of one committed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent<K, V> {
    /// Version of the snapshot this write published.
    pub version: u64,
    /// Kind of change.
    pub action: ChangeAction,
    /// Items present after the change, in ascending index order.
    pub new_items: Vec<ChangedItem<K, V>>,
    /// Items present before the change, in ascending index order.
    pub old_items: Vec<ChangedItem<K, V>>,
    /// Starting index when the affected items are contiguous.
    pub index: Option<usize>,
}

/// The part of an event known before its version is assigned.
pub(crate) struct Change<K, V> {
    action: ChangeAction,
    new_items: Vec<ChangedItem<K, V>>,
    old_items: Vec<ChangedItem<K, V>>,
}

impl<K, V> Change<K, V> {
    pub(crate) const fn added(new_items: Vec<ChangedItem<K, V>>) -> Self {
        Self {
            action: ChangeAction::Add,
            new_items,
            old_items: Vec::new(),
        }
    }

    pub(crate) const fn removed(old_items: Vec<ChangedItem<K, V>>) -> Self {
        Self {
            action: ChangeAction::Remove,
            new_items: Vec::new(),
            old_items,
        }
    }

    pub(crate) fn replaced(old_item: ChangedItem<K, V>, new_item: ChangedItem<K, V>) -> Self {
        Self {
            action: ChangeAction::Replace,
            new_items: vec![new_item],
            old_items: vec![old_item],
        }
    }

    pub(crate) const fn reset() -> Self {
        Self {
            action: ChangeAction::Reset,
            new_items: Vec::new(),
            old_items: Vec::new(),
        }
    }

    pub(crate) const fn action(&self) -> ChangeAction {
        self.action
    }

    pub(crate) fn item_count(&self) -> usize {
        self.new_items.len().max(self.old_items.len())
    }

    pub(crate) fn into_event(self, version: u64) -> ChangeEvent<K, V> {
        let items = if self.new_items.is_empty() {
            &self.old_items
        } else {
            &self.new_items
        };
        let contiguous = items
            .windows(2)
            .all(|pair| pair[1].index == pair[0].index + 1);
        let index = items.first().filter(|_| contiguous).map(|item| item.index);
        ChangeEvent {
            version,
            action: self.action,
            new_items: self.new_items,
            old_items: self.old_items,
            index,
        }
    }
}

// =============================================================================
// Listeners
// =============================================================================

/// Handle returned by `subscribe_*`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback<K, V> = Arc<dyn Fn(&ChangeEvent<K, V>) + Send + Sync>;

enum Listener<K, V> {
    Callback(Callback<K, V>),
    Channel(Sender<ChangeEvent<K, V>>),
}

impl<K, V> Clone for Listener<K, V> {
    fn clone(&self) -> Self {
        match self {
            Self::Callback(callback) => Self::Callback(callback.clone()),
            Self::Channel(sender) => Self::Channel(sender.clone()),
        }
    }
}

// =============================================================================
// ChangeNotifier
// =============================================================================

/// Queues committed change events and hands them to listeners in order.
pub struct ChangeNotifier<K, V> {
    label: String,
    refresh_window: Duration,
    listeners: Mutex<Vec<(ListenerId, Listener<K, V>)>>,
    next_listener: AtomicU64,
    pending: Mutex<VecDeque<ChangeEvent<K, V>>>,
    delivering: ReentrantMutex<Cell<bool>>,
    throttle: Mutex<Option<RefreshThrottle>>,
}

impl<K: Clone, V: Clone> ChangeNotifier<K, V> {
    pub(crate) fn new(label: &str, refresh_window: Duration) -> Self {
        Self {
            label: label.to_owned(),
            refresh_window,
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(0),
            pending: Mutex::new(VecDeque::new()),
            delivering: ReentrantMutex::new(Cell::new(false)),
            throttle: Mutex::new(None),
        }
    }

    /// Registers a callback invoked once per committed write.
    ///
    /// Callbacks run on a committing thread, after the write lock has been
    /// released. A panicking callback is logged and skipped.
    pub fn subscribe_fn<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&ChangeEvent<K, V>) + Send + Sync + 'static,
    {
        self.register(Listener::Callback(Arc::new(callback)))
    }

    /// Registers a channel that receives a copy of every event.
    ///
    /// Dropping the receiver unsubscribes it on the next delivery.
    pub fn subscribe_channel(&self) -> (ListenerId, Receiver<ChangeEvent<K, V>>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (self.register(Listener::Channel(sender)), receiver)
    }

    /// Removes a listener. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Returns the number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Installs the consumer of the coalesced view-changed signal.
    ///
    /// Replaces any previous consumer; the previous throttle delivers its
    /// pending signal before it stops.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::WorkerSpawn`](crate::CollectionError::WorkerSpawn)
    /// if the worker thread cannot be started.
    pub fn set_refresh_consumer<F>(&self, consumer: F) -> Result<()>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let throttle = RefreshThrottle::spawn(&self.label, self.refresh_window, consumer)?;
        let previous = self.throttle.lock().replace(throttle);
        drop(previous);
        Ok(())
    }

    /// Fires a pending view-changed signal now instead of at window end.
    ///
    /// The consumer runs without any notifier lock held, so it may write to
    /// the collection.
    pub fn flush_refresh(&self) {
        if let Some(shared) = self.throttle_shared() {
            shared.fire();
        }
    }

    fn throttle_shared(&self) -> Option<Arc<ThrottleShared>> {
        self.throttle
            .lock()
            .as_ref()
            .map(|throttle| Arc::clone(&throttle.shared))
    }

    fn register(&self, listener: Listener<K, V>) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, listener));
        id
    }

    /// Queues an event. Called while the write lock is held.
    pub(crate) fn enqueue(&self, event: ChangeEvent<K, V>) {
        self.pending.lock().push_back(event);
    }

    /// Delivers every queued event. Called after the write lock is released.
    pub(crate) fn deliver(&self) {
        let delivering = self.delivering.lock();
        if delivering.replace(true) {
            // Re-entered from a listener; the outer loop picks the event up.
            return;
        }

        let mut delivered = false;
        loop {
            let Some(event) = self.pending.lock().pop_front() else {
                break;
            };
            self.dispatch(&event);
            delivered = true;
        }
        delivering.set(false);
        drop(delivering);

        if delivered && let Some(throttle) = self.throttle.lock().as_ref() {
            // Only marks the burst and wakes the worker; never runs the consumer.
            throttle.signal();
        }
    }

    fn dispatch(&self, event: &ChangeEvent<K, V>) {
        let listeners = self.listeners.lock().clone();
        let mut disconnected = Vec::new();

        for (id, listener) in listeners {
            match listener {
                Listener::Callback(callback) => {
                    if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                        warn!(
                            collection = %self.label,
                            version = event.version,
                            "change listener panicked"
                        );
                    }
                }
                Listener::Channel(sender) => {
                    if sender.send(event.clone()).is_err() {
                        disconnected.push(id);
                    }
                }
            }
        }

        if !disconnected.is_empty() {
            self.listeners
                .lock()
                .retain(|(id, _)| !disconnected.contains(id));
        }
    }
}

impl<K, V> fmt::Debug for ChangeNotifier<K, V> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ChangeNotifier")
            .field("label", &self.label)
            .field("refresh_window", &self.refresh_window)
            .field("listeners", &self.listeners.lock().len())
            .field("pending", &self.pending.lock().len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// RefreshThrottle
// =============================================================================

struct ThrottleShared {
    label: String,
    pending: AtomicBool,
    consumer: Box<dyn Fn() + Send + Sync>,
}

impl ThrottleShared {
    fn fire(&self) {
        if !self.pending.swap(false, Ordering::AcqRel) {
            return;
        }
        debug!(collection = %self.label, "delivering view refresh");
        if catch_unwind(AssertUnwindSafe(|| (self.consumer)())).is_err() {
            warn!(collection = %self.label, "refresh consumer panicked");
        }
    }
}

/// Collapses bursts of signals into one consumer call per time window.
///
/// The first [`signal`](Self::signal) of a burst wakes a worker thread,
/// which waits one window and then calls the consumer once. Dropping the
/// throttle stops the worker without waiting out the window and delivers
/// any pending signal on the dropping thread. Signals that
/// arrive while the worker waits are absorbed by that call; a signal that
/// arrives after the consumer has started schedules another call.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::time::Duration;
/// use snapmap::concurrent::RefreshThrottle;
///
/// let calls = Arc::new(AtomicUsize::new(0));
/// let counter = calls.clone();
/// let throttle = RefreshThrottle::spawn("doc", Duration::from_secs(60), move || {
///     counter.fetch_add(1, Ordering::SeqCst);
/// })
/// .unwrap();
///
/// for _ in 0..100 {
///     throttle.signal();
/// }
/// throttle.flush();
/// assert_eq!(calls.load(Ordering::SeqCst), 1);
/// ```
pub struct RefreshThrottle {
    shared: Arc<ThrottleShared>,
    wake: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl RefreshThrottle {
    /// Starts a throttle whose worker calls `consumer`.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::WorkerSpawn`](crate::CollectionError::WorkerSpawn)
    /// if the worker thread cannot be started.
    pub fn spawn<F>(label: &str, window: Duration, consumer: F) -> Result<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let shared = Arc::new(ThrottleShared {
            label: label.to_owned(),
            pending: AtomicBool::new(false),
            consumer: Box::new(consumer),
        });
        let (wake, wakeups) = crossbeam_channel::bounded::<()>(1);
        let worker_shared = Arc::clone(&shared);

        let worker = thread::Builder::new()
            .name(format!("refresh-{label}"))
            .spawn(move || {
                debug!(collection = %worker_shared.label, "refresh worker started");
                'burst: while wakeups.recv().is_ok() {
                    let deadline = Instant::now() + window;
                    loop {
                        match wakeups.recv_deadline(deadline) {
                            Ok(()) => {}
                            Err(RecvTimeoutError::Timeout) => break,
                            Err(RecvTimeoutError::Disconnected) => break 'burst,
                        }
                    }
                    worker_shared.fire();
                }
                debug!(collection = %worker_shared.label, "refresh worker stopped");
            })?;

        Ok(Self {
            shared,
            wake: Some(wake),
            worker: Some(worker),
        })
    }

    /// Marks the view as changed.
    pub fn signal(&self) {
        if !self.shared.pending.swap(true, Ordering::AcqRel)
            && let Some(wake) = &self.wake
        {
            // A full channel already holds a wake-up for this burst.
            wake.try_send(()).ok();
        }
    }

    /// Returns `true` if a signal is waiting for delivery.
    pub fn is_pending(&self) -> bool {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// Calls the consumer now if a signal is pending.
    pub fn flush(&self) {
        self.shared.fire();
    }
}

impl Drop for RefreshThrottle {
    fn drop(&mut self) {
        drop(self.wake.take());
        if let Some(worker) = self.worker.take()
            && worker.thread().id() != thread::current().id()
            && worker.join().is_err()
        {
            warn!(collection = %self.shared.label, "refresh worker terminated abnormally");
        }
        self.shared.fire();
    }
}

impl fmt::Debug for RefreshThrottle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RefreshThrottle")
            .field("label", &self.shared.label)
            .field("pending", &self.is_pending())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::atomic::AtomicUsize;

    fn item(index: usize) -> ChangedItem<usize, ()> {
        ChangedItem {
            index,
            key: index,
            value: (),
        }
    }

    #[rstest]
    fn test_contiguous_items_carry_start_index() {
        let event = Change::added(vec![item(3), item(4), item(5)]).into_event(7);
        assert_eq!(event.version, 7);
        assert_eq!(event.action, ChangeAction::Add);
        assert_eq!(event.index, Some(3));
    }

    #[rstest]
    fn test_scattered_items_have_no_start_index() {
        let event = Change::removed(vec![item(1), item(4)]).into_event(1);
        assert_eq!(event.index, None);
        assert_eq!(event.old_items.len(), 2);
    }

    #[rstest]
    fn test_reset_has_no_index() {
        let event = Change::<usize, ()>::reset().into_event(2);
        assert_eq!(event.action, ChangeAction::Reset);
        assert_eq!(event.index, None);
    }

    #[rstest]
    fn test_deliver_in_queue_order() {
        let notifier: ChangeNotifier<usize, ()> = ChangeNotifier::new("test", Duration::from_millis(1));
        let (_, receiver) = notifier.subscribe_channel();
        for version in 1..=3 {
            notifier.enqueue(Change::added(vec![item(0)]).into_event(version));
        }
        notifier.deliver();
        let versions: Vec<u64> = receiver.try_iter().map(|event| event.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[rstest]
    fn test_panicking_listener_is_isolated() {
        let notifier: ChangeNotifier<usize, ()> = ChangeNotifier::new("test", Duration::from_millis(1));
        notifier.subscribe_fn(|_| panic!("listener failure"));
        let (_, receiver) = notifier.subscribe_channel();
        notifier.enqueue(Change::added(vec![item(0)]).into_event(1));
        notifier.deliver();
        assert_eq!(receiver.try_iter().count(), 1);
    }

    #[rstest]
    fn test_dropped_receiver_is_pruned() {
        let notifier: ChangeNotifier<usize, ()> = ChangeNotifier::new("test", Duration::from_millis(1));
        let (_, receiver) = notifier.subscribe_channel();
        drop(receiver);
        assert_eq!(notifier.listener_count(), 1);
        notifier.enqueue(Change::added(vec![item(0)]).into_event(1));
        notifier.deliver();
        assert_eq!(notifier.listener_count(), 0);
    }

    #[rstest]
    fn test_unsubscribe() {
        let notifier: ChangeNotifier<usize, ()> = ChangeNotifier::new("test", Duration::from_millis(1));
        let id = notifier.subscribe_fn(|_| {});
        assert!(notifier.unsubscribe(id));
        assert!(!notifier.unsubscribe(id));
    }

    #[rstest]
    fn test_throttle_coalesces_burst() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let throttle = RefreshThrottle::spawn("burst", Duration::from_millis(20), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        for _ in 0..50 {
            throttle.signal();
        }
        let deadline = Instant::now() + Duration::from_secs(5);
        while calls.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!throttle.is_pending());
    }

    #[rstest]
    fn test_throttle_drop_delivers_pending_signal() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let throttle = RefreshThrottle::spawn("drop", Duration::from_secs(60), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let throttle = throttle.unwrap();
        throttle.signal();
        drop(throttle);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
