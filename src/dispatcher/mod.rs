//! # Dispatcher Module
//!
//! Connects a parsed request to a registered handler: resolves the
//! session, runs the typed-parameter pipeline, executes the handler body,
//! and writes the kind-specific response.
//!
//! ## Handler kinds
//!
//! - **Closing** writes one response and closes the socket.
//! - **JSON** is a closing handler with `application/json` and a
//!   JSON-encoded body value.
//! - **Stream** opens a `text/event-stream` response and leaves the
//!   socket subscribed to channels for later publishes.
//! - **Redirect** answers 301/307 with a `Location` header.
//!
//! Handlers are plain values built with the [`HandlerEntry`] constructors
//! and registered by name before the server starts (re-registration at
//! runtime replaces the old entry with a warning).
//!
//! ## Error mapping
//!
//! Request-level failures become responses (400 for parameter rejections,
//! 404 for unknown URIs, 500 for handler errors); I/O failures while
//! answering are swallowed since the peer is already gone. New-session
//! hook failures are the one fatal case: they propagate to the event
//! loop.

mod core;
mod handler;

pub use core::{Dispatcher, Disposition, HandlerTable};
pub use handler::{BodyValue, HandlerBody, HandlerEntry, HandlerScope};
