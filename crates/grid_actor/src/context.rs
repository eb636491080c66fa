//! Isolated execution contexts: one OS thread, one single-threaded runtime.

use crate::actor::{Actor, Port, Role};
use crate::registry::Registry;
use std::io;
use std::thread;

/// Starts a context whose state is built inside its own thread by
/// `build_registry`. Returns the coordinator's end of the channel.
pub fn spawn_context<F>(name: impl Into<String>, build_registry: F) -> io::Result<(Port, thread::JoinHandle<()>)>
where
    F: FnOnce() -> Registry + Send + 'static,
{
    let name = name.into();
    let (outer, inner) = Port::pair();

    let handle = thread::Builder::new().name(name.clone()).spawn(move || {
        let rt = match tokio::runtime::Builder::new_current_thread().enable_time().build() {
            Ok(rt) => rt,
            Err(e) => {
                tracing::error!(context = %name, error = %e, "failed to build context runtime");
                return;
            }
        };

        rt.block_on(async move {
            let registry = build_registry();
            tracing::info!(context = %name, handlers = registry.len(), "context ready");
            let actor = Actor::spawn(name.clone(), inner, registry, Role::Worker);
            actor.closed().await;
            tracing::info!(context = %name, "context stopped");
        });
    })?;

    Ok((outer, handle))
}
