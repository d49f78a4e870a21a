// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Single-worker work queue with duplicate collapsing.
//!
//! Items are processed in enqueue order, one at a time. An item already waiting is
//! not queued twice; an item enqueued while it is being processed is queued again
//! once processing finishes, so no notification is lost. Failed items are retried
//! with per-item exponential backoff.

use crate::retry::{queue_backoff, ExponentialBackoff, QUEUE_POLICY};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::{Debug, Display};
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info};

/// What the queue does with an item after a successful handler run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueAction {
    /// Item is finished; its failure history is cleared
    Done,
    /// Process the item again after the delay without counting a failure
    RequeueAfter(Duration),
}

struct QueueState<T> {
    items: VecDeque<T>,
    queued: HashSet<T>,
    processing: HashSet<T>,
    /// Items enqueued again while being processed
    dirty: HashSet<T>,
    /// Failed items waiting out their backoff; new notifications collapse into the retry
    backing_off: HashSet<T>,
    failures: HashMap<T, ExponentialBackoff>,
    shutdown: bool,
}

pub struct TaskQueue<T> {
    name: &'static str,
    state: Mutex<QueueState<T>>,
    notify: Notify,
}

impl<T> TaskQueue<T>
where
    T: Clone + Eq + Hash + Debug + Display + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                queued: HashSet::new(),
                processing: HashSet::new(),
                dirty: HashSet::new(),
                backing_off: HashSet::new(),
                failures: HashMap::new(),
                shutdown: false,
            }),
            notify: Notify::new(),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds an item. Returns false when it was collapsed or the queue is shut down.
    pub fn enqueue(&self, item: T) -> bool {
        let mut state = self.lock();
        if state.shutdown {
            return false;
        }
        if state.queued.contains(&item) {
            debug!(queue = self.name, item = %item, "Item already queued, collapsing");
            return false;
        }
        if state.backing_off.contains(&item) {
            debug!(queue = self.name, item = %item, "Item waiting for retry, collapsing");
            return false;
        }
        if state.processing.contains(&item) {
            debug!(queue = self.name, item = %item, "Item in flight, queueing again afterwards");
            state.dirty.insert(item);
            return false;
        }
        state.queued.insert(item.clone());
        state.items.push_back(item);
        drop(state);
        self.notify.notify_one();
        true
    }

    /// Adds an item after `delay`.
    pub fn enqueue_after(self: &Arc<Self>, item: T, delay: Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.enqueue(item);
        });
    }

    /// Stops accepting items. Waiting items are abandoned; the item in flight finishes.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.shutdown = true;
        state.items.clear();
        state.queued.clear();
        state.dirty.clear();
        state.backing_off.clear();
        drop(state);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.lock().shutdown
    }

    /// Number of items waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits for the next item, `None` once shut down.
    pub async fn next(&self) -> Option<T> {
        loop {
            {
                let mut state = self.lock();
                if state.shutdown {
                    return None;
                }
                if let Some(item) = state.items.pop_front() {
                    state.queued.remove(&item);
                    state.processing.insert(item.clone());
                    return Some(item);
                }
            }
            self.notify.notified().await;
        }
    }

    /// Marks an item returned by [`TaskQueue::next`] as finished.
    pub fn done(&self, item: &T) {
        let mut state = self.lock();
        state.processing.remove(item);
        if state.dirty.remove(item) && !state.shutdown && state.queued.insert(item.clone()) {
            state.items.push_back(item.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Records a failure and schedules the retry after the item's backoff delay.
    ///
    /// Notifications for the item that arrived while it was in flight, or that
    /// arrive before the retry, are folded into the retry.
    fn retry_after_failure(self: &Arc<Self>, item: &T) -> Duration {
        let delay = {
            let mut state = self.lock();
            state.dirty.remove(item);
            state.backing_off.insert(item.clone());
            state
                .failures
                .entry(item.clone())
                .or_insert_with(queue_backoff)
                .next_backoff()
                .unwrap_or(QUEUE_POLICY.max_interval)
        };
        let queue = Arc::clone(self);
        let item = item.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.lock().backing_off.remove(&item);
            queue.enqueue(item);
        });
        delay
    }

    fn forget(&self, item: &T) {
        self.lock().failures.remove(item);
    }

    /// Processes items with `handler` until the queue is shut down.
    pub async fn run<F, Fut, E>(self: Arc<Self>, handler: F)
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<QueueAction, E>>,
        E: Display,
    {
        info!(queue = self.name, "Queue worker started");
        while let Some(item) = self.next().await {
            match handler(item.clone()).await {
                Ok(QueueAction::Done) => self.forget(&item),
                Ok(QueueAction::RequeueAfter(delay)) => {
                    debug!(queue = self.name, item = %item, delay_ms = delay.as_millis(), "Requeueing item");
                    self.enqueue_after(item.clone(), delay);
                }
                Err(e) => {
                    let delay = self.retry_after_failure(&item);
                    error!(
                        queue = self.name,
                        item = %item,
                        error = %e,
                        retry_in_ms = delay.as_millis(),
                        "Item failed, retrying with backoff"
                    );
                }
            }
            self.done(&item);
        }
        info!(queue = self.name, "Queue worker stopped");
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod queue_tests;
