//! Coordinator-side owner of one worker context.
//!
//! A [`Dispatcher`] spawns the context thread, keeps the coordinator actor
//! talking to it, and removes both when dropped.

use crate::actor::{Actor, Role};
use crate::context::spawn_context;
use crate::error::ActorError;
use crate::message::Payload;
use crate::registry::Registry;
use std::io;
use std::thread;

/// Wire name of the readiness check every context answers.
pub const READY_CHECK: &str = "checkIfReady";

/// Owns one coordinator-side [`Actor`] bound to one isolated context for the
/// lifetime of the owning service.
pub struct Dispatcher {
    actor: Actor,
    context: Option<thread::JoinHandle<()>>,
}

impl Dispatcher {
    /// Spawns the context and returns immediately; the context may still be
    /// building its registry. Use [`Dispatcher::ready`] to wait for it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<F>(name: impl Into<String>, build_registry: F) -> io::Result<Self>
    where
        F: FnOnce() -> Registry + Send + 'static,
    {
        let name = name.into();
        let (port, context) = spawn_context(name.clone(), build_registry)?;
        let actor = Actor::spawn(format!("{name}/coordinator"), port, Registry::empty(), Role::Coordinator);
        Ok(Self {
            actor,
            context: Some(context),
        })
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    /// Round-trips the readiness check.
    pub async fn ready(&self) -> Result<(), ActorError> {
        self.actor.request(READY_CHECK, Payload::empty()).await.map(|_| ())
    }

    /// True once the context thread has exited.
    pub fn is_finished(&self) -> bool {
        self.context.as_ref().map_or(true, |h| h.is_finished())
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.actor.remove();
        // Dropping the coordinator end closes the context's channel; the
        // thread winds down on its own.
        self.context.take();
    }
}
