//! Workers draining a [`WorkQueue`] into a [`Reconciler`].

use super::conditions::Conditions;
use super::queue::WorkQueue;
use crate::cluster::ObjectKey;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Retryable splits reconcile errors into the ones worth retrying with the
/// same input and the ones that are not.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

/// Reconciler brings one object to its desired state. Reconciles are
/// level-triggered: the key is all they get, the rest is read fresh.
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    type Error: std::error::Error + Retryable + Send + Sync + 'static;

    async fn reconcile(&self, key: &ObjectKey) -> Result<(), Self::Error>;
}

/// Controller runs `workers` concurrent reconciles of distinct keys.
pub struct Controller<R> {
    name: String,
    reconciler: Arc<R>,
    queue: Arc<WorkQueue<ObjectKey>>,
    conditions: Arc<Conditions>,
    workers: usize,
}

impl<R> Clone for Controller<R> {
    fn clone(&self) -> Self {
        Controller {
            name: self.name.clone(),
            reconciler: Arc::clone(&self.reconciler),
            queue: Arc::clone(&self.queue),
            conditions: Arc::clone(&self.conditions),
            workers: self.workers,
        }
    }
}

impl<R: Reconciler> Controller<R> {
    pub fn new(name: impl Into<String>, reconciler: R, conditions: Arc<Conditions>) -> Self {
        Controller {
            name: name.into(),
            reconciler: Arc::new(reconciler),
            queue: Arc::new(WorkQueue::new()),
            conditions,
            workers: 1,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_queue(mut self, queue: WorkQueue<ObjectKey>) -> Self {
        self.queue = Arc::new(queue);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn reconciler(&self) -> &R {
        &self.reconciler
    }

    pub fn queue(&self) -> &Arc<WorkQueue<ObjectKey>> {
        &self.queue
    }

    pub fn enqueue(&self, key: ObjectKey) {
        self.queue.add(key);
    }

    /// Runs the workers until `shutdown` is cancelled. Reconciles already
    /// started run to completion before this returns.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(controller = %self.name, workers = self.workers, "starting controller");

        let mut workers = JoinSet::new();
        for id in 0..self.workers {
            let controller = self.clone();
            let shutdown = shutdown.clone();
            workers.spawn(async move { controller.worker(id, shutdown).await });
        }

        shutdown.cancelled().await;
        self.queue.shut_down();

        while let Some(result) = workers.join_next().await {
            if let Err(err) = result {
                error!(controller = %self.name, error = %err, "worker panicked");
            }
        }
        info!(controller = %self.name, "controller stopped");
    }

    async fn worker(&self, id: usize, shutdown: CancellationToken) {
        loop {
            let key = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                key = self.queue.get() => match key {
                    Some(key) => key,
                    None => break,
                },
            };
            self.process(&key).await;
            self.queue.done(&key);
        }
        debug!(controller = %self.name, worker = id, "worker exiting");
    }

    /// Reconciles `key` once and files the outcome.
    pub async fn process(&self, key: &ObjectKey) {
        match self.reconciler.reconcile(key).await {
            Ok(()) => {
                self.queue.forget(key);
                self.conditions.clear(&self.name, key);
            }
            Err(err) if err.is_transient() => {
                warn!(
                    controller = %self.name,
                    namespace = %key.namespace,
                    name = %key.name,
                    retries = self.queue.num_requeues(key),
                    error = %err,
                    "reconcile failed, requeueing"
                );
                self.queue.add_rate_limited(key.clone());
            }
            Err(err) => {
                error!(
                    controller = %self.name,
                    namespace = %key.namespace,
                    name = %key.name,
                    error = %err,
                    "reconcile failed permanently"
                );
                self.queue.forget(key);
                self.conditions.record(&self.name, key, err.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::Backoff;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::time::Duration;
    use thiserror::Error;

    #[derive(Debug, Error)]
    enum FakeError {
        #[error("try again")]
        Transient,
        #[error("broken")]
        Permanent,
    }

    impl Retryable for FakeError {
        fn is_transient(&self) -> bool {
            matches!(self, FakeError::Transient)
        }
    }

    struct Recorder {
        calls: Mutex<Vec<ObjectKey>>,
        script: Mutex<VecDeque<Result<(), FakeError>>>,
    }

    #[async_trait]
    impl Reconciler for Recorder {
        type Error = FakeError;

        async fn reconcile(&self, key: &ObjectKey) -> Result<(), FakeError> {
            self.calls.lock().push(key.clone());
            self.script.lock().pop_front().unwrap_or(Ok(()))
        }
    }

    fn controller(script: Vec<Result<(), FakeError>>) -> Controller<Recorder> {
        let recorder = Recorder {
            calls: Mutex::new(Vec::new()),
            script: Mutex::new(script.into()),
        };
        Controller::new("test", recorder, Arc::new(Conditions::new())).with_queue(
            WorkQueue::with_backoff(Backoff::new(Duration::from_millis(1), Duration::from_millis(5))),
        )
    }

    async fn wait_for(mut done: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !done() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test]
    async fn test_success_clears_condition() {
        let controller = controller(vec![Err(FakeError::Permanent), Ok(())]);
        let key = ObjectKey::new("ns", "web");

        controller.process(&key).await;
        let failure = controller.conditions.get("test", &key).unwrap();
        assert_eq!(failure.message, "broken");
        // permanent failures are not retried on their own
        assert!(controller.queue().is_empty());

        controller.process(&key).await;
        assert!(controller.conditions.get("test", &key).is_none());
    }

    #[tokio::test]
    async fn test_transient_failure_requeues() {
        let controller = controller(vec![Err(FakeError::Transient)]);
        let key = ObjectKey::new("ns", "web");

        controller.process(&key).await;
        assert_eq!(controller.queue().num_requeues(&key), 1);
        assert!(controller.conditions.is_empty());

        let queue = Arc::clone(controller.queue());
        wait_for(|| queue.len() == 1).await;
    }

    #[tokio::test]
    async fn test_run_until_cancelled() {
        let controller = controller(vec![Err(FakeError::Transient)]).with_workers(2);
        let token = CancellationToken::new();
        let handle = tokio::spawn(controller.clone().run(token.clone()));

        controller.enqueue(ObjectKey::new("ns", "a"));
        controller.enqueue(ObjectKey::new("ns", "b"));

        // "a" or "b" fails once and is retried
        wait_for(|| controller.reconciler().calls.lock().len() == 3).await;

        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(controller.queue().is_shutting_down());

        let mut calls = controller.reconciler().calls.lock().clone();
        calls.sort();
        calls.dedup();
        assert_eq!(calls, vec![ObjectKey::new("ns", "a"), ObjectKey::new("ns", "b")]);
    }
}
