//! Asynchronous request/response between a coordinating context and isolated
//! worker contexts.
//!
//! Only [`Message`]s cross a context boundary. A message carries a correlation
//! id, a kind (an operation name, `"<response>"` or `"<cancel>"`) and a
//! [`Payload`] whose binary buffers move with it. Responses are matched by id,
//! never by arrival order.

pub mod actor;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod message;
pub mod registry;
pub mod scheduler;

pub use actor::{Actor, Callback, CancelHandle, Port, ReplyFuture, Role};
pub use context::spawn_context;
pub use dispatcher::{Dispatcher, READY_CHECK};
pub use error::ActorError;
pub use message::{CorrelationId, Message, MessageKind, Payload, TaskMetadata};
pub use registry::{Done, Handler, Registry, RegistryBuilder};
pub use scheduler::{Scheduler, SchedulingPolicy, Task, TaskHandle};
