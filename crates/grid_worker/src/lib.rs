//! Grid operations served from an isolated context.
//!
//! [`spawn_grid_worker`] starts a context whose registry answers the
//! [`Operation`] table against a [`GridBackend`]. Populations and render
//! buffers cross the channel as payload buffers (see [`wire`]).

pub mod backend;
pub mod error;
pub mod manager;
pub mod ops;
pub mod wire;

pub use backend::{GridBackend, GridSaveInfo, HttpGridBackend, MemoryGridBackend};
pub use error::BackendError;
pub use manager::{GridContext, GridManager};
pub use ops::{build_registry, Operation};

use grid_actor::Dispatcher;
use std::io;
use std::sync::Arc;

/// Starts a grid worker context and returns its dispatcher.
pub fn spawn_grid_worker(name: impl Into<String>, backend: Arc<dyn GridBackend>) -> io::Result<Dispatcher> {
    Dispatcher::new(name, move || build_registry(backend))
}
