//! Deduplicating, rate-limited work queue.
//!
//! Keys rather than events are queued: any number of `add` calls for a key
//! that is already waiting collapse into one entry. A key handed out by
//! [`WorkQueue::get`] is owned by that worker until [`WorkQueue::done`];
//! re-adding it meanwhile marks it dirty and it is queued again on `done`,
//! so one key is never processed by two workers at once.
//!
//! # Retry
//!
//! Failed keys go back through [`WorkQueue::add_rate_limited`], which waits
//! `base * 2^failures` (capped at `max`) before re-adding. A successful
//! pass calls [`WorkQueue::forget`] to reset the failure count.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, trace};

/// Backoff configuration for rate-limited re-adds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl RateLimiterConfig {
    /// Creates a config from millisecond bounds.
    pub fn from_millis(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay: Duration::from_millis(base_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
        }
    }

    /// Returns the delay for a key that has already failed `failures` times.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let factor = 1u32.checked_shl(failures).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1000),
        }
    }
}

#[derive(Debug)]
struct QueueState<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    failures: HashMap<K, u32>,
    shutting_down: bool,
}

impl<K> Default for QueueState<K> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            dirty: HashSet::new(),
            processing: HashSet::new(),
            failures: HashMap::new(),
            shutting_down: false,
        }
    }
}

#[derive(Debug)]
struct Shared<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
    limiter: RateLimiterConfig,
}

/// Cloneable handle to a shared work queue.
#[derive(Debug)]
pub struct WorkQueue<K> {
    shared: Arc<Shared<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K> WorkQueue<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    /// Creates a queue with the default backoff.
    pub fn new() -> Self {
        Self::with_rate_limiter(RateLimiterConfig::default())
    }

    /// Creates a queue with an explicit backoff.
    pub fn with_rate_limiter(limiter: RateLimiterConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                limiter,
            }),
        }
    }

    /// Queues a key unless it is already waiting.
    pub fn add(&self, key: K) {
        let mut state = self.shared.state.lock();
        if state.shutting_down {
            return;
        }
        if !state.dirty.insert(key.clone()) {
            trace!(?key, "Key already queued");
            return;
        }
        if state.processing.contains(&key) {
            trace!(?key, "Key in flight; will requeue on done");
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.shared.notify.notify_one();
    }

    /// Queues a key after `delay`.
    pub fn add_after(&self, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Queues a key after its exponential backoff delay.
    pub fn add_rate_limited(&self, key: K) {
        let delay = {
            let mut state = self.shared.state.lock();
            let failures = state.failures.entry(key.clone()).or_insert(0);
            let delay = self.shared.limiter.delay_for(*failures);
            *failures = failures.saturating_add(1);
            delay
        };
        debug!(?key, delay_ms = delay.as_millis() as u64, "Requeueing with backoff");
        self.add_after(key, delay);
    }

    /// Clears the failure history of a key.
    pub fn forget(&self, key: &K) {
        self.shared.state.lock().failures.remove(key);
    }

    /// Returns how many times a key has been rate-limited since it was
    /// last forgotten.
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.shared
            .state
            .lock()
            .failures
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Waits for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.shared.notify.notified();
            {
                let mut state = self.shared.state.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Marks a key as finished; requeues it if it was re-added meanwhile.
    pub fn done(&self, key: &K) {
        let mut state = self.shared.state.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.shared.notify.notify_one();
        }
    }

    /// Returns the number of keys waiting to be handed out.
    pub fn len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Returns true if no keys are waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops accepting keys and wakes every waiter.
    pub fn shut_down(&self) {
        self.shared.state.lock().shutting_down = true;
        self.shared.notify.notify_waiters();
    }

    /// Returns true after [`shut_down`](Self::shut_down).
    pub fn is_shutting_down(&self) -> bool {
        self.shared.state.lock().shutting_down
    }
}

impl<K> Default for WorkQueue<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Single-method observer notified whenever a watched source changes.
pub trait ChangeObserver: Send + Sync {
    /// Called once per observed change.
    fn on_change(&self);
}

/// Observer that enqueues one fixed key on every change, so bursts across
/// many sources coalesce into a single pending pass.
#[derive(Debug, Clone)]
pub struct KeyEnqueuer<K> {
    queue: WorkQueue<K>,
    key: K,
}

impl<K> KeyEnqueuer<K> {
    /// Creates an observer that enqueues `key` on `queue`.
    pub fn new(queue: WorkQueue<K>, key: K) -> Self {
        Self { queue, key }
    }
}

impl<K> ChangeObserver for KeyEnqueuer<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    fn on_change(&self) {
        self.queue.add(self.key.clone());
    }
}
