//! A minimal, single-threaded HTTP/1.1 server with first-class SSE
//! pub/sub and declarative typed request handlers.
//!
//! One event-loop thread owns every socket and every piece of mutable
//! state; handlers are values built from a parameter-spec list and a body
//! closure, registered by name, and driven through a typed-parameter
//! pipeline before the body runs.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod server;
pub mod session;
pub mod sse;
pub mod static_files;
pub mod typed;

pub use config::ServerConfig;
pub use dispatcher::{BodyValue, Dispatcher, Disposition, HandlerEntry, HandlerScope, HandlerTable};
pub use error::HttpError;
pub use server::{Request, Response, Server};
pub use session::{Session, SessionStore};
pub use sse::{ChannelTable, SseEvent};
pub use static_files::StaticFiles;
pub use typed::{ParamEnv, ParamSpec, TypeRegistry};
