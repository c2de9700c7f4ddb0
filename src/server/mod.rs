//! Listener orchestration: primary TCP server, companion UDP server and an
//! optional auxiliary TCP server, all tracked by one [`Supervisor`].

pub mod handler;
pub mod listener;
pub mod orchestrator;
pub mod registry;

pub use handler::{HandlerError, HandlerFactory, HandlerRegistry, RequestHandler, TraceHandler};
pub use listener::{ListenerHandle, ListenerKind};
pub use orchestrator::{start, PrimaryServer, StartupError};
pub use registry::{ShutdownGuard, Supervisor};
