//! Listener notification pool
//!
//! All application callbacks (frames received/sent, nodes discovered,
//! registers and endpoints changed) run on a fixed set of OS worker threads
//! fed by a bounded queue, never on the async runtime. Producers never
//! wait: when the queue is full the oldest pending notification is dropped.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// State shared between producers and worker threads
struct Shared {
    queue: Mutex<VecDeque<Job>>,
    capacity: usize,
    available: Condvar,
    stopped: AtomicBool,
    dropped: AtomicU64,
    panicked: AtomicU64,
}

impl Shared {
    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.queue.lock().clear();
        self.available.notify_all();
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Block until a job is queued; `None` once stopped
    fn next_job(&self) -> Option<Job> {
        let mut queue = self.queue.lock();
        loop {
            if self.is_stopped() {
                return None;
            }
            if let Some(job) = queue.pop_front() {
                return Some(job);
            }
            self.available.wait(&mut queue);
        }
    }
}

struct DispatchInner {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for DispatchInner {
    fn drop(&mut self) {
        self.shared.stop();
    }
}

/// Bounded worker pool for listener callbacks
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatchInner>,
}

impl Dispatcher {
    /// Start `workers` threads sharing a queue of `capacity` jobs
    ///
    /// When called inside a tokio runtime, callbacks run with that runtime
    /// entered so they may spawn tasks or use channels tied to it.
    pub fn new(workers: usize, capacity: usize) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            available: Condvar::new(),
            stopped: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            panicked: AtomicU64::new(0),
        });
        let runtime = tokio::runtime::Handle::try_current().ok();

        let mut handles = Vec::new();
        for id in 0..workers.max(1) {
            let shared = shared.clone();
            let runtime = runtime.clone();
            let spawned = thread::Builder::new()
                .name(format!("swapgw-notify-{id}"))
                .spawn(move || worker_loop(id, &shared, runtime));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => error!("Cannot start notification worker {}: {}", id, e),
            }
        }

        Self {
            inner: Arc::new(DispatchInner {
                shared,
                workers: Mutex::new(handles),
            }),
        }
    }

    /// Queue a job; returns `false` once the pool is shut down
    pub fn dispatch<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let shared = &self.inner.shared;
        if shared.is_stopped() {
            return false;
        }
        {
            let mut queue = shared.queue.lock();
            if queue.len() >= shared.capacity {
                queue.pop_front();
                let dropped = shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    "Notification queue full ({}), dropped oldest (total dropped: {})",
                    shared.capacity, dropped
                );
            }
            queue.push_back(Box::new(job));
        }
        shared.available.notify_one();
        true
    }

    /// Jobs waiting for a worker
    pub fn pending(&self) -> usize {
        self.inner.shared.queue.lock().len()
    }

    /// Jobs discarded because the queue was full
    pub fn dropped(&self) -> u64 {
        self.inner.shared.dropped.load(Ordering::Relaxed)
    }

    /// Jobs that panicked
    pub fn panicked(&self) -> u64 {
        self.inner.shared.panicked.load(Ordering::Relaxed)
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shared.is_stopped()
    }

    /// Stop the workers after their current job; queued jobs are discarded
    pub async fn shutdown(&self) {
        self.inner.shared.stop();
        let handles: Vec<_> = std::mem::take(&mut *self.inner.workers.lock());
        if handles.is_empty() {
            return;
        }
        let current = thread::current().id();
        let joined = tokio::task::spawn_blocking(move || {
            for handle in handles {
                // A callback shutting the pool down cannot join its own thread
                if handle.thread().id() != current {
                    let _ = handle.join();
                }
            }
        })
        .await;
        if let Err(e) = joined {
            warn!("Notification workers did not stop cleanly: {}", e);
        }
        debug!("Dispatcher stopped");
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("capacity", &self.inner.shared.capacity)
            .field("pending", &self.pending())
            .field("dropped", &self.dropped())
            .finish()
    }
}

fn worker_loop(id: usize, shared: &Shared, runtime: Option<tokio::runtime::Handle>) {
    let _entered = runtime.as_ref().map(|handle| handle.enter());
    while let Some(job) = shared.next_job() {
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            shared.panicked.fetch_add(1, Ordering::Relaxed);
            error!("Listener panicked in notification worker {}", id);
        }
    }
}

// ============================================================================
// Listener sets
// ============================================================================

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

/// Handle returned when a listener is added; used to remove it again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Shared listener callback
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Listeners for one kind of event
pub struct ListenerSet<E> {
    listeners: Mutex<Vec<(SubscriptionId, Listener<E>)>>,
}

impl<E> Default for ListenerSet<E> {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl<E> fmt::Debug for ListenerSet<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSet")
            .field("len", &self.len())
            .finish()
    }
}

impl<E> ListenerSet<E> {
    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }
}

impl<E: Send + Sync + 'static> ListenerSet<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId::next();
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener; `false` if the id was not registered here
    pub fn remove(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Queue one job per listener
    pub fn notify(&self, dispatcher: &Dispatcher, event: E) {
        let listeners: Vec<Listener<E>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        if listeners.is_empty() {
            return;
        }
        let event = Arc::new(event);
        for listener in listeners {
            let event = event.clone();
            dispatcher.dispatch(move || listener(&event));
        }
    }
}
