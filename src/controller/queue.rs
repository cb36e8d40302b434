//! A deduplicating work queue.
//!
//! Keys added while waiting are coalesced, and a key handed to a worker is
//! not handed to another one until the first calls [`WorkQueue::done`]. A
//! key added while it is being processed is queued again on `done`, so the
//! latest state always gets one more reconcile.

use super::backoff::Backoff;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug)]
struct State<K> {
    queue: VecDeque<K>,
    /// Keys waiting to be processed, whether queued or parked behind an
    /// in-flight reconcile.
    dirty: HashSet<K>,
    processing: HashSet<K>,
    shutting_down: bool,
}

#[derive(Debug)]
pub struct WorkQueue<K> {
    state: Mutex<State<K>>,
    notify: Notify,
    backoff: Backoff<K>,
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    pub fn new() -> Self {
        WorkQueue::with_backoff(Backoff::default())
    }

    pub fn with_backoff(backoff: Backoff<K>) -> Self {
        WorkQueue {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
            backoff,
        }
    }

    pub fn add(&self, key: K) {
        {
            let mut state = self.state.lock();
            if state.shutting_down || !state.dirty.insert(key.clone()) {
                return;
            }
            if state.processing.contains(&key) {
                return;
            }
            state.queue.push_back(key);
        }
        self.notify.notify_one();
    }

    /// Adds `key` once `delay` has passed.
    pub fn add_after(self: &Arc<Self>, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Adds `key` after its backoff delay, and counts one more failure.
    pub fn add_rate_limited(self: &Arc<Self>, key: K) {
        let delay = self.backoff.next_delay(&key);
        self.add_after(key, delay);
    }

    /// Clears the failure history of `key`.
    pub fn forget(&self, key: &K) {
        self.backoff.forget(key);
    }

    pub fn num_requeues(&self, key: &K) -> u32 {
        self.backoff.failures(key)
    }

    /// Waits for the next key. Returns `None` once the queue is shut down
    /// and drained.
    pub async fn get(&self) -> Option<K> {
        loop {
            // Registered before the state check so a wakeup in between is
            // not lost.
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock();
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

    /// Marks `key` as finished. If it was added again meanwhile it goes
    /// back on the queue.
    pub fn done(&self, key: &K) {
        let requeued = {
            let mut state = self.state.lock();
            state.processing.remove(key);
            if state.dirty.contains(key) {
                state.queue.push_back(key.clone());
                true
            } else {
                false
            }
        };
        if requeued {
            self.notify.notify_one();
        }
    }

    /// Refuses new keys and wakes every waiting worker.
    pub fn shut_down(&self) {
        self.state.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }

    /// Number of keys ready to be handed out.
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K> Default for WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    fn default() -> Self {
        WorkQueue::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_coalesces_keys() {
        let queue = WorkQueue::new();
        queue.add("a");
        queue.add("b");
        queue.add("a");
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.get().await, Some("a"));
        assert_eq!(queue.get().await, Some("b"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_key_in_flight_is_parked() {
        let queue = WorkQueue::new();
        queue.add("a");
        let key = queue.get().await;
        assert_eq!(key, Some("a"));

        // re-added while processing: not handed out twice
        queue.add("a");
        queue.add("a");
        assert_eq!(queue.len(), 0);

        queue.done(&"a");
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await, Some("a"));
        queue.done(&"a");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_get_waits_for_add() {
        let queue = Arc::new(WorkQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;
        queue.add(7);
        assert_eq!(waiter.await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn test_shut_down_drains_then_stops() {
        let queue = Arc::new(WorkQueue::new());
        queue.add("a");
        queue.shut_down();
        queue.add("b");

        assert!(queue.is_shutting_down());
        assert_eq!(queue.get().await, Some("a"));
        assert_eq!(queue.get().await, None);

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get().await })
        };
        assert_eq!(waiter.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_shut_down_wakes_waiters() {
        let queue: Arc<WorkQueue<&str>> = Arc::new(WorkQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;
        queue.shut_down();
        assert_eq!(waiter.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rate_limited_requeue() {
        let queue = Arc::new(WorkQueue::with_backoff(Backoff::new(
            Duration::from_millis(1),
            Duration::from_millis(10),
        )));
        queue.add_rate_limited("a");
        queue.add_rate_limited("a");
        assert_eq!(queue.num_requeues(&"a"), 2);

        let key = tokio::time::timeout(Duration::from_secs(5), queue.get())
            .await
            .unwrap();
        assert_eq!(key, Some("a"));

        queue.forget(&"a");
        assert_eq!(queue.num_requeues(&"a"), 0);
    }

    #[tokio::test]
    async fn test_add_after_zero_is_immediate() {
        let queue = Arc::new(WorkQueue::new());
        queue.add_after("a", Duration::ZERO);
        assert_eq!(queue.len(), 1);
    }
}
