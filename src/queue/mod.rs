//! Rate-limited work queue decoupling store events from reconciliation.
//!
//! Semantics follow the classic controller work queue:
//! - an item already waiting in the queue is coalesced with a new `add`
//! - an item being processed is never handed to a second worker; re-adding
//!   it marks it dirty and it is queued again once `done` is called
//! - failed items come back through `add_rate_limited` and are never dropped
//!
//! ```text
//!  add ──► dirty? ──no──► processing? ──no──► queue ──► get ──► processing
//!                                 │                                  │
//!                                 └──yes (wait for done) ◄───── done ┘
//! ```

mod rate_limiter;
mod worker;

pub use rate_limiter::*;
pub use worker::*;

#[cfg(test)]
mod queue_test;

use std::collections::HashSet;
use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

struct QueueState<T> {
    queue: VecDeque<T>,
    /// Items that need processing (queued or re-added while processing)
    dirty: HashSet<T>,
    /// Items currently held by a worker
    processing: HashSet<T>,
    /// Items parked by `add_after`
    waiting: HashSet<T>,
    shutting_down: bool,
}

pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
    limiter: Box<dyn RateLimiter<T>>,
}

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    pub fn new(limiter: Box<dyn RateLimiter<T>>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                waiting: HashSet::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
            limiter,
        }
    }

    /// Marks `item` for processing. Never blocks.
    pub fn add(
        &self,
        item: T,
    ) {
        let mut state = self.state.lock();
        if state.shutting_down || state.dirty.contains(&item) {
            return;
        }

        state.dirty.insert(item.clone());
        if state.processing.contains(&item) {
            // Requeued by `done`
            return;
        }

        state.queue.push_back(item);
        drop(state);
        self.notify.notify_one();
    }

    /// Adds `item` once `delay` has elapsed. A second delayed add of an item
    /// that is already waiting keeps the earlier deadline.
    pub fn add_after(
        self: &Arc<Self>,
        item: T,
        delay: Duration,
    ) {
        if delay.is_zero() {
            self.add(item);
            return;
        }

        {
            let mut state = self.state.lock();
            if state.shutting_down || !state.waiting.insert(item.clone()) {
                return;
            }
        }

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.state.lock().waiting.remove(&item);
            queue.add(item);
        });
    }

    /// Requeues `item` after the limiter's delay
    pub fn add_rate_limited(
        self: &Arc<Self>,
        item: T,
    ) {
        let delay = self.limiter.when(&item);
        trace!(?delay, "requeue with backoff");
        self.add_after(item, delay);
    }

    /// Clears the item's backoff history after a successful processing round
    pub fn forget(
        &self,
        item: &T,
    ) {
        self.limiter.forget(item);
    }

    pub fn num_requeues(
        &self,
        item: &T,
    ) -> usize {
        self.limiter.num_requeues(item)
    }

    /// Waits for the next item. Returns `None` once the queue shuts down.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking, so no wakeup is lost
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        // Pass the wakeup on to another idle worker
                        self.notify.notify_one();
                    }
                    return Some(item);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Marks processing of `item` finished
    pub fn done(
        &self,
        item: &T,
    ) {
        let mut state = self.state.lock();
        state.processing.remove(item);
        if state.dirty.contains(item) {
            state.queue.push_back(item.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Number of items waiting to be handed to a worker
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops accepting items and wakes every waiting worker
    pub fn shut_down(&self) {
        self.state.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }
}
