//! Request/response transport over one message channel.
//!
//! Every outbound call gets a fresh correlation id and, if it has a callback,
//! an entry in the call table. A call leaves `Pending` exactly once: either a
//! response resolves it or a cancel discards it. Anything arriving later for
//! that id is dropped.

use crate::error::ActorError;
use crate::message::{CorrelationId, Message, MessageKind, Payload, TaskMetadata};
use crate::registry::{Done, Registry};
use crate::scheduler::{Scheduler, SchedulingPolicy, TaskHandle};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot, watch};

pub type Callback = Box<dyn FnOnce(Result<Payload, ActorError>) + Send>;

/// Which side of the channel an actor sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Runs inbound requests immediately unless they ask to be queued.
    Coordinator,
    /// Queues every inbound request through the scheduler.
    Worker,
}

/// Both ends of a bidirectional channel.
pub struct Port {
    pub tx: mpsc::UnboundedSender<Message>,
    pub rx: mpsc::UnboundedReceiver<Message>,
}

impl Port {
    pub fn pair() -> (Port, Port) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (Port { tx: a_tx, rx: b_rx }, Port { tx: b_tx, rx: a_rx })
    }
}

enum CallState {
    Pending(Option<Callback>),
    Resolved,
    Canceled,
}

struct Call {
    state: Mutex<CallState>,
}

impl Call {
    fn new(callback: Option<Callback>) -> Self {
        Self {
            state: Mutex::new(CallState::Pending(callback)),
        }
    }

    /// Pending -> Resolved. The callback runs outside the lock.
    fn resolve(&self, result: Result<Payload, ActorError>) -> bool {
        let callback = {
            let mut st = self.state.lock();
            match std::mem::replace(&mut *st, CallState::Resolved) {
                CallState::Pending(cb) => cb,
                other => {
                    *st = other;
                    return false;
                }
            }
        };
        if let Some(cb) = callback {
            cb(result);
        }
        true
    }

    /// Pending -> Canceled. The callback is dropped uninvoked.
    fn cancel(&self) -> bool {
        let mut st = self.state.lock();
        match *st {
            CallState::Pending(_) => {
                *st = CallState::Canceled;
                true
            }
            _ => false,
        }
    }

    fn is_pending(&self) -> bool {
        matches!(*self.state.lock(), CallState::Pending(_))
    }
}

struct Inner {
    name: String,
    role: Role,
    tx: mpsc::UnboundedSender<Message>,
    calls: DashMap<CorrelationId, Arc<Call>>,
    queued: DashMap<CorrelationId, TaskHandle>,
    scheduler: Scheduler,
    registry: Registry,
    shutdown: watch::Sender<bool>,
}

/// Cheap handle to a running actor.
#[derive(Clone)]
pub struct Actor {
    inner: Arc<Inner>,
}

/// Cancels one outbound call.
pub struct CancelHandle {
    id: CorrelationId,
    call: Arc<Call>,
    inner: Arc<Inner>,
}

impl CancelHandle {
    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    /// Suppresses the callback and asks the remote side to drop the task.
    /// Best effort: work that already started keeps running.
    pub fn cancel(&self) -> bool {
        if !self.call.cancel() {
            return false;
        }
        self.inner.calls.remove(&self.id);
        tracing::debug!(actor = %self.inner.name, id = %self.id, "canceling call");
        let _ = self.inner.tx.send(Message::cancel(self.id.clone()));
        true
    }

    pub fn is_pending(&self) -> bool {
        self.call.is_pending()
    }
}

/// Future returned by [`Actor::request`]. Resolves with
/// [`ActorError::Canceled`] if the call is canceled or the actor removed.
///
/// Dropping it before the reply arrives cancels the call.
pub struct ReplyFuture {
    handle: CancelHandle,
    rx: oneshot::Receiver<Result<Payload, ActorError>>,
}

impl ReplyFuture {
    pub fn id(&self) -> &CorrelationId {
        self.handle.id()
    }

    pub fn cancel(&self) -> bool {
        self.handle.cancel()
    }
}

impl Future for ReplyFuture {
    type Output = Result<Payload, ActorError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(ActorError::Canceled)))
    }
}

impl Drop for ReplyFuture {
    fn drop(&mut self) {
        if self.handle.is_pending() {
            self.handle.cancel();
        }
    }
}

impl Actor {
    /// Starts the actor's receive loop and task runner on the current tokio runtime.
    pub fn spawn(name: impl Into<String>, port: Port, registry: Registry, role: Role) -> Self {
        Self::spawn_with_policy(name, port, registry, role, SchedulingPolicy::Fifo)
    }

    pub fn spawn_with_policy(
        name: impl Into<String>,
        port: Port,
        registry: Registry,
        role: Role,
        policy: SchedulingPolicy,
    ) -> Self {
        let Port { tx, mut rx } = port;
        let (shutdown, _) = watch::channel(false);
        let inner = Arc::new(Inner {
            name: name.into(),
            role,
            tx,
            calls: DashMap::new(),
            queued: DashMap::new(),
            scheduler: Scheduler::new(policy),
            registry,
            shutdown,
        });

        let receiver = inner.clone();
        let mut stop = inner.shutdown.subscribe();
        tokio::spawn(async move {
            tracing::debug!(actor = %receiver.name, role = ?receiver.role, "actor started");
            loop {
                tokio::select! {
                    biased;
                    _ = stop.changed() => break,
                    msg = rx.recv() => match msg {
                        Some(msg) => receiver.receive(msg),
                        None => {
                            tracing::debug!(actor = %receiver.name, "peer closed channel");
                            break;
                        }
                    },
                }
            }
            receiver.teardown();
        });

        let runner = inner.scheduler.clone();
        tokio::spawn(async move { while runner.run_next().await {} });

        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// Number of outbound calls still awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.inner.calls.len()
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// Sends a request. Never fails: transport errors go to `callback`.
    pub fn send(
        &self,
        kind: &str,
        payload: Payload,
        callback: Option<Callback>,
        must_queue: bool,
        metadata: Option<TaskMetadata>,
    ) -> CancelHandle {
        let has_callback = callback.is_some();
        let call = Arc::new(Call::new(callback));
        let id = if has_callback {
            self.inner.register(call.clone())
        } else {
            CorrelationId::random()
        };

        let mut msg = Message::request(id.clone(), kind, payload);
        msg.has_callback = has_callback;
        msg.must_queue = must_queue;
        if let Some(metadata) = metadata {
            msg.metadata = metadata;
        }

        tracing::trace!(actor = %self.inner.name, id = %id, kind, has_callback, must_queue, "send");
        if let Err(e) = self.inner.tx.send(msg) {
            tracing::warn!(actor = %self.inner.name, id = %id, kind, "channel closed, failing call");
            self.inner.calls.remove(&id);
            call.resolve(Err(ActorError::Transport(format!("channel closed: {}", e.0.kind))));
        }

        CancelHandle {
            id,
            call,
            inner: self.inner.clone(),
        }
    }

    /// Sends with a callback and default queuing.
    pub fn call<F>(&self, kind: &str, payload: Payload, callback: F) -> CancelHandle
    where
        F: FnOnce(Result<Payload, ActorError>) + Send + 'static,
    {
        self.send(kind, payload, Some(Box::new(callback)), false, None)
    }

    /// Fire-and-forget.
    pub fn notify(&self, kind: &str, payload: Payload) -> CancelHandle {
        self.send(kind, payload, None, false, None)
    }

    pub fn request(&self, kind: &str, payload: Payload) -> ReplyFuture {
        self.request_with(kind, payload, false, None)
    }

    pub fn request_with(
        &self,
        kind: &str,
        payload: Payload,
        must_queue: bool,
        metadata: Option<TaskMetadata>,
    ) -> ReplyFuture {
        let (tx, rx) = oneshot::channel();
        let callback: Callback = Box::new(move |r| {
            let _ = tx.send(r);
        });
        let handle = self.send(kind, payload, Some(callback), must_queue, metadata);
        ReplyFuture { handle, rx }
    }

    /// Stops the actor: drains queued work, discards pending callbacks and
    /// closes the receive loop.
    pub fn remove(&self) {
        self.inner.shutdown.send_replace(true);
        self.inner.teardown();
    }

    /// Resolves once the actor has stopped.
    pub async fn closed(&self) {
        let mut stop = self.inner.shutdown.subscribe();
        loop {
            if *stop.borrow_and_update() {
                return;
            }
            if stop.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Inner {
    fn register(&self, call: Arc<Call>) -> CorrelationId {
        loop {
            let id = CorrelationId::random();
            if let Entry::Vacant(slot) = self.calls.entry(id.clone()) {
                slot.insert(call);
                return id;
            }
        }
    }

    fn receive(self: &Arc<Self>, msg: Message) {
        match msg.kind {
            MessageKind::Cancel => {
                if let Some((_, handle)) = self.queued.remove(&msg.id) {
                    if handle.cancel() {
                        tracing::debug!(actor = %self.name, id = %msg.id, "dropped queued task");
                    }
                }
            }
            MessageKind::Response => self.resolve(msg),
            MessageKind::Request(_) => {
                if msg.must_queue || self.role == Role::Worker {
                    self.enqueue(msg);
                } else {
                    tokio::spawn(self.clone().process_task(msg));
                }
            }
        }
    }

    fn enqueue(self: &Arc<Self>, msg: Message) {
        let id = msg.id.clone();
        let metadata = msg.metadata.clone();
        let has_callback = msg.has_callback;
        let task = {
            let this = self.clone();
            let id = id.clone();
            async move {
                this.queued.remove(&id);
                this.process_task(msg).await;
            }
            .boxed()
        };
        // The shard lock is held until the handle is stored, so a task that
        // starts immediately still finds and clears its own entry.
        let Entry::Vacant(slot) = self.queued.entry(id.clone()) else {
            tracing::warn!(actor = %self.name, id = %id, "duplicate queued id, request dropped");
            self.reject(id, has_callback);
            return;
        };
        match self.scheduler.add(task, metadata) {
            Some(handle) => {
                slot.insert(handle);
            }
            None => {
                tracing::debug!(actor = %self.name, id = %id, "scheduler closed, request dropped");
                self.reject(id, has_callback);
            }
        }
    }

    fn reject(&self, id: CorrelationId, has_callback: bool) {
        if has_callback {
            let _ = self.tx.send(Message::response(id, Err(ActorError::Canceled)));
        }
    }

    fn resolve(&self, msg: Message) {
        let Some((_, call)) = self.calls.remove(&msg.id) else {
            tracing::trace!(actor = %self.name, id = %msg.id, "response for unknown call dropped");
            return;
        };
        call.resolve(msg.into_result());
    }

    async fn process_task(self: Arc<Self>, msg: Message) {
        let Message { id, kind, has_callback, payload, .. } = msg;
        let MessageKind::Request(name) = kind else {
            return;
        };

        let done = Done::new(id.clone(), self.tx.clone(), has_callback);
        match self.registry.get(&name).cloned() {
            Some(handler) => handler(payload, done).await,
            None => {
                tracing::warn!(actor = %self.name, id = %id, op = %name, "no handler registered");
                done.err(ActorError::HandlerNotFound(name));
            }
        }
    }

    fn teardown(&self) {
        let dropped = self.scheduler.remove();
        self.queued.clear();
        for entry in self.calls.iter() {
            entry.value().cancel();
        }
        self.calls.clear();
        self.shutdown.send_replace(true);
        if dropped > 0 {
            tracing::debug!(actor = %self.name, dropped, "actor removed with queued tasks");
        }
    }
}
