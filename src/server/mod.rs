//! # Server Module
//!
//! The single-threaded HTTP/1.1 serving core: the event loop that
//! multiplexes readiness over every socket, the per-connection request
//! buffer with its resource bounds, the request parser, and the response
//! writer.
//!
//! ## Request flow
//!
//! ```text
//! Listener -> ConnectionTable -> Buffer -> Parser -> Dispatcher -> Response
//!                                                        |
//!                                                        +-> retained for SSE
//! ```
//!
//! One OS thread runs the whole pipeline. The loop never blocks on a
//! single connection: reads drain whatever is available and return, and
//! each connection is bounded by size, age, and read-attempt limits.

mod buffer;
mod core;
pub mod request;
pub mod response;

pub use buffer::{Buffer, ReadOutcome};
pub use core::Server;
pub use request::{parse, parse_params, render_params, url_decode, Request};
pub use response::Response;
