//! Per-channel queue of inbound work.
//!
//! Receiving a message and running it are decoupled: queued tasks run one at
//! a time in admission order and can be canceled by handle until they start.

use crate::message::TaskMetadata;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tokio::sync::Notify;

pub type Task = BoxFuture<'static, ()>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SchedulingPolicy {
    #[default]
    Fifo,
    /// Higher `TaskMetadata::priority` first, FIFO among equals.
    Priority,
}

type Key = (i16, u64);

struct QueueState {
    queue: BTreeMap<Key, (TaskMetadata, Task)>,
    seq: u64,
    closed: bool,
}

struct Shared {
    policy: SchedulingPolicy,
    state: Mutex<QueueState>,
    notify: Notify,
}

#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

/// Cancels a queued task; a no-op once the task has started.
#[derive(Clone)]
pub struct TaskHandle {
    key: Key,
    shared: Weak<Shared>,
}

impl TaskHandle {
    /// Returns true if the task was still queued and is now dropped.
    pub fn cancel(&self) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        let removed = shared.state.lock().queue.remove(&self.key);
        removed.is_some()
    }
}

impl Scheduler {
    pub fn new(policy: SchedulingPolicy) -> Self {
        Self {
            shared: Arc::new(Shared {
                policy,
                state: Mutex::new(QueueState {
                    queue: BTreeMap::new(),
                    seq: 0,
                    closed: false,
                }),
                notify: Notify::new(),
            }),
        }
    }

    pub fn policy(&self) -> SchedulingPolicy {
        self.shared.policy
    }

    /// Queues `task`. `None` only after [`Scheduler::remove`]; the task is
    /// dropped in that case.
    pub fn add(&self, task: Task, metadata: TaskMetadata) -> Option<TaskHandle> {
        let key = {
            let mut st = self.shared.state.lock();
            if st.closed {
                return None;
            }
            let rank = match self.shared.policy {
                SchedulingPolicy::Fifo => 0,
                SchedulingPolicy::Priority => -(metadata.priority as i16),
            };
            let key = (rank, st.seq);
            st.seq += 1;
            st.queue.insert(key, (metadata, task));
            key
        };
        self.shared.notify.notify_one();
        Some(TaskHandle {
            key,
            shared: Arc::downgrade(&self.shared),
        })
    }

    /// Waits for the next task. `None` once the scheduler is removed.
    pub async fn next(&self) -> Option<(TaskMetadata, Task)> {
        loop {
            let notified = self.shared.notify.notified();
            {
                let mut st = self.shared.state.lock();
                if let Some((_, entry)) = st.queue.pop_first() {
                    return Some(entry);
                }
                if st.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Runs one task to completion. Returns false once the scheduler is removed.
    pub async fn run_next(&self) -> bool {
        match self.next().await {
            Some((metadata, task)) => {
                tracing::trace!(kind = %metadata.kind, priority = metadata.priority, "running task");
                task.await;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Drops every pending task and refuses new ones. Returns how many were dropped.
    pub fn remove(&self) -> usize {
        let drained = {
            let mut st = self.shared.state.lock();
            st.closed = true;
            std::mem::take(&mut st.queue)
        };
        self.shared.notify.notify_waiters();
        self.shared.notify.notify_one();
        drained.len()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulingPolicy::Fifo)
    }
}
