//! Immutable name -> handler table, built once at context startup.

use crate::error::ActorError;
use crate::message::{CorrelationId, Message, Payload};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;

pub type Handler = Arc<dyn Fn(Payload, Done) -> BoxFuture<'static, ()> + Send + Sync>;

/// Reply slot handed to a handler. Consumed by the first reply; a no-op when
/// the caller registered no callback.
///
/// Dropping it unanswered reports [`ActorError::Canceled`] so a caller is
/// never left waiting on a task that was discarded.
pub struct Done {
    reply: Option<(CorrelationId, mpsc::UnboundedSender<Message>)>,
}

impl Done {
    pub(crate) fn new(id: CorrelationId, tx: mpsc::UnboundedSender<Message>, has_callback: bool) -> Self {
        Self {
            reply: has_callback.then_some((id, tx)),
        }
    }

    /// A slot that discards its reply.
    pub fn noop() -> Self {
        Self { reply: None }
    }

    pub fn expects_reply(&self) -> bool {
        self.reply.is_some()
    }

    pub fn send(mut self, result: Result<Payload, ActorError>) {
        self.reply_with(result);
    }

    pub fn ok(self, payload: Payload) {
        self.send(Ok(payload));
    }

    pub fn err(self, error: ActorError) {
        self.send(Err(error));
    }

    fn reply_with(&mut self, result: Result<Payload, ActorError>) {
        let Some((id, tx)) = self.reply.take() else {
            return;
        };
        if tx.send(Message::response(id.clone(), result)).is_err() {
            tracing::debug!(id = %id, "reply dropped, channel closed");
        }
    }
}

impl Drop for Done {
    fn drop(&mut self) {
        self.reply_with(Err(ActorError::Canceled));
    }
}

#[derive(Clone, Default)]
pub struct Registry {
    handlers: Arc<HashMap<String, Handler>>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Handler> {
        self.handlers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    handlers: HashMap<String, Handler>,
}

impl RegistryBuilder {
    /// Registers a `(params, done)` handler. A later registration under the
    /// same name replaces the earlier one.
    pub fn handler<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Payload, Done) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |params, done| f(params, done).boxed());
        self.handlers.insert(name.into(), handler);
        self
    }

    /// Registers a handler whose returned result becomes the reply.
    pub fn route<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Payload, ActorError>> + Send + 'static,
    {
        let f = Arc::new(f);
        self.handler(name, move |params, done: Done| {
            let f = f.clone();
            async move { done.send(f(params).await) }
        })
    }

    pub fn build(self) -> Registry {
        Registry {
            handlers: Arc::new(self.handlers),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn route_replies_once() {
        let registry = Registry::builder()
            .route("echo", |p: Payload| async move { Ok(p) })
            .build();
        assert!(registry.contains("echo"));
        assert!(!registry.contains("nope"));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let done = Done::new(CorrelationId::from("id0"), tx, true);
        let handler = registry.get("echo").unwrap().clone();
        handler(Payload::new(serde_json::json!("hi")), done).await;

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.id.as_str(), "id0");
        assert_eq!(reply.into_result().unwrap().decode::<String>().unwrap(), "hi");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_done_reports_cancel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        drop(Done::new(CorrelationId::from("id1"), tx.clone(), true));
        assert_eq!(rx.try_recv().unwrap().into_result(), Err(ActorError::Canceled));

        drop(Done::new(CorrelationId::from("id2"), tx, false));
        assert!(rx.try_recv().is_err());
    }
}
