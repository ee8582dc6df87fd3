//! Publish/subscribe substrate for camera events.
//!
//! A [`Notifier`] fans events out to every registered [`Listener`]. Each
//! listener owns an unbounded queue and a dispatch task that drains it in
//! order, invoking the registered callbacks. Synchronous callbacks run inline on
//! the dispatch task; asynchronous callbacks are spawned so a slow consumer
//! cannot hold up delivery of the next event.
//!
//! # Example
//!
//! ```rust,ignore
//! let notifier = Notifier::new();
//! let listener = Listener::filtered([CameraSystemEvent::CameraAdded]);
//! notifier.register_listener(&listener)?;
//!
//! listener.register_callback(Callback::sync(|event, payload| {
//!     println!("{event}: {:?}", payload.get_str("uid"));
//! }));
//!
//! let seen = listener
//!     .wait_for([CameraSystemEvent::CameraAdded], Some(Duration::from_secs(1)))
//!     .await;
//! ```

use std::collections::HashSet;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};
use uuid::Uuid;

use crate::error::{CameraError, CameraResult};
use crate::events::{Event, Payload};
use crate::tasks::cancel_task;

/// Capacity of the wake-signal channel used by [`Listener::wait_for`].
const SEEN_CAPACITY: usize = 256;

type SyncCallback = Arc<dyn Fn(&Event, &Payload) + Send + Sync>;
type AsyncCallback = Arc<dyn Fn(Event, Payload) -> BoxFuture<'static, ()> + Send + Sync>;

/// A function invoked for every event a listener dispatches.
#[derive(Clone)]
pub enum Callback {
    /// Runs inline on the dispatch task.
    Sync(SyncCallback),
    /// Spawned as an independent task for each event.
    Async(AsyncCallback),
}

impl Callback {
    /// Wraps a plain function run inline on the dispatch task.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&Event, &Payload) + Send + Sync + 'static,
    {
        Callback::Sync(Arc::new(f))
    }

    /// Wraps an async function; every event runs it on a fresh task.
    pub fn spawn<F, Fut>(f: F) -> Self
    where
        F: Fn(Event, Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Callback::Async(Arc::new(move |event, payload| Box::pin(f(event, payload))))
    }
}

/// Handle returned by [`Listener::register_callback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(Uuid);

type Envelope = (Event, Payload);

// =============================================================================
// Listener
// =============================================================================

/// State shared between a listener and its dispatch task.
struct Dispatch {
    callbacks: RwLock<Vec<(CallbackId, Callback)>>,
    seen: broadcast::Sender<Event>,
}

impl Dispatch {
    async fn run(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Envelope>) {
        while let Some((event, payload)) = rx.recv().await {
            let callbacks: Vec<Callback> = self
                .callbacks
                .read()
                .iter()
                .map(|(_, callback)| callback.clone())
                .collect();

            for callback in callbacks {
                match callback {
                    Callback::Sync(f) => {
                        if catch_unwind(AssertUnwindSafe(|| f(&event, &payload))).is_err() {
                            error!(%event, "Listener callback panicked");
                        }
                    }
                    Callback::Async(f) => {
                        tokio::spawn(f(event, payload.clone()));
                    }
                }
            }

            // An error only means nobody is waiting right now.
            let _ = self.seen.send(event);
        }
    }
}

#[derive(Default)]
struct Delivery {
    tx: Option<mpsc::UnboundedSender<Envelope>>,
    task: Option<JoinHandle<()>>,
}

/// An ordered event queue with callback dispatch and `wait_for` support.
///
/// Listeners are created listening and must be created inside a Tokio runtime.
pub struct Listener {
    filter: Option<HashSet<Event>>,
    dispatch: Arc<Dispatch>,
    delivery: Mutex<Delivery>,
    registered: AtomicBool,
}

impl Listener {
    /// Creates a listener that accepts every event.
    pub fn new() -> Arc<Self> {
        Self::create(None)
    }

    /// Creates a listener that only accepts the given events.
    pub fn filtered<I, E>(events: I) -> Arc<Self>
    where
        I: IntoIterator<Item = E>,
        E: Into<Event>,
    {
        Self::create(Some(events.into_iter().map(Into::into).collect()))
    }

    fn create(filter: Option<HashSet<Event>>) -> Arc<Self> {
        let (seen, _) = broadcast::channel(SEEN_CAPACITY);
        let listener = Arc::new(Self {
            filter,
            dispatch: Arc::new(Dispatch {
                callbacks: RwLock::new(Vec::new()),
                seen,
            }),
            delivery: Mutex::new(Delivery::default()),
            registered: AtomicBool::new(false),
        });
        listener.start_listening();
        listener
    }

    /// Returns `true` if the event passes this listener's filter.
    pub fn accepts(&self, event: &Event) -> bool {
        self.filter
            .as_ref()
            .map_or(true, |filter| filter.contains(event))
    }

    /// Returns `true` while the dispatch task is running.
    pub fn is_listening(&self) -> bool {
        let delivery = self.delivery.lock();
        delivery
            .task
            .as_ref()
            .map_or(false, |task| !task.is_finished())
    }

    /// Starts the dispatch task. Any stale queued events are discarded.
    pub fn start_listening(&self) {
        let mut delivery = self.delivery.lock();
        if delivery
            .task
            .as_ref()
            .map_or(false, |task| !task.is_finished())
        {
            return;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        delivery.tx = Some(tx);
        delivery.task = Some(tokio::spawn(self.dispatch.clone().run(rx)));
        debug!("Listener started");
    }

    /// Stops the dispatch task, dropping anything still queued.
    pub async fn stop_listening(&self) {
        let task = {
            let mut delivery = self.delivery.lock();
            delivery.tx = None;
            delivery.task.take()
        };
        if task.is_some() {
            cancel_task(task).await;
            debug!("Listener stopped");
        }
    }

    /// Adds a callback invoked for every event this listener dispatches.
    ///
    /// A sync callback that panics is logged and skipped; delivery continues.
    pub fn register_callback(&self, callback: Callback) -> CallbackId {
        let id = CallbackId(Uuid::new_v4());
        self.dispatch.callbacks.write().push((id, callback));
        id
    }

    /// Removes a callback. Fails if `id` is unknown.
    pub fn remove_callback(&self, id: CallbackId) -> CameraResult<()> {
        let mut callbacks = self.dispatch.callbacks.write();
        let index = callbacks
            .iter()
            .position(|(existing, _)| *existing == id)
            .ok_or(CameraError::CallbackNotRegistered)?;
        callbacks.remove(index);
        Ok(())
    }

    /// Number of registered callbacks.
    pub fn callback_count(&self) -> usize {
        self.dispatch.callbacks.read().len()
    }

    /// Waits until at least one of `events` has been dispatched since the call
    /// began.
    ///
    /// Returns the subset of `events` observed, or `None` if `timeout` elapsed
    /// first. Repeated occurrences of the same event are collapsed.
    pub async fn wait_for<I, E>(&self, events: I, timeout: Option<Duration>) -> Option<HashSet<Event>>
    where
        I: IntoIterator<Item = E>,
        E: Into<Event>,
    {
        let wanted: HashSet<Event> = events.into_iter().map(Into::into).collect();
        let mut seen_rx = self.dispatch.seen.subscribe();

        let wait = async move {
            let mut seen = HashSet::new();
            loop {
                match seen_rx.recv().await {
                    Ok(event) => {
                        if wanted.contains(&event) {
                            seen.insert(event);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "wait_for fell behind the dispatch loop");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }

                if !seen.is_empty() {
                    while let Ok(event) = seen_rx.try_recv() {
                        if wanted.contains(&event) {
                            seen.insert(event);
                        }
                    }
                    return Some(seen);
                }
            }
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.ok().flatten(),
            None => wait.await,
        }
    }

    /// Queues an event if it passes the filter and the listener is running.
    fn deliver(&self, event: Event, payload: Payload) -> bool {
        if !self.accepts(&event) {
            return false;
        }
        let delivery = self.delivery.lock();
        match delivery.tx.as_ref() {
            Some(tx) => tx.send((event, payload)).is_ok(),
            None => false,
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(task) = self.delivery.get_mut().task.take() {
            task.abort();
        }
    }
}

// =============================================================================
// Notifier
// =============================================================================

/// Fans events out to registered listeners.
#[derive(Default)]
pub struct Notifier {
    listeners: RwLock<Vec<Arc<Listener>>>,
}

impl Notifier {
    /// Creates a notifier with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener. Registering the same listener twice is a no-op.
    ///
    /// A listener can only belong to one notifier at a time.
    pub fn register_listener(&self, listener: &Arc<Listener>) -> CameraResult<()> {
        let mut listeners = self.listeners.write();
        if listeners.iter().any(|l| Arc::ptr_eq(l, listener)) {
            return Ok(());
        }
        if listener.registered.swap(true, Ordering::SeqCst) {
            return Err(CameraError::Configuration(
                "listener is already registered with another notifier".to_string(),
            ));
        }
        listeners.push(listener.clone());
        Ok(())
    }

    /// Unregisters a listener so it can join another notifier.
    pub fn remove_listener(&self, listener: &Arc<Listener>) -> CameraResult<()> {
        let mut listeners = self.listeners.write();
        let index = listeners
            .iter()
            .position(|l| Arc::ptr_eq(l, listener))
            .ok_or(CameraError::ListenerNotRegistered)?;
        listeners.remove(index);
        listener.registered.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Enqueues an event on every accepting listener.
    ///
    /// Never suspends. Returns `true` if at least one listener received it.
    pub fn notify(&self, event: impl Into<Event>, payload: Payload) -> bool {
        let event = event.into();
        let listeners = self.listeners.read().clone();

        let mut received = false;
        for listener in &listeners {
            if listener.deliver(event, payload.clone()) {
                received = true;
            }
        }

        trace!(%event, received, "Event notified");
        received
    }
}
