//! # Server-Sent Events Module
//!
//! SSE framing and the channel table that fans frames out to subscribed
//! sockets.
//!
//! A channel is a named, ordered list of sockets. Stream handlers
//! subscribe their socket to one or more channels; any later request (or
//! the host application) can publish a message to a channel and every
//! subscriber receives one `data:` frame. There is no separate liveness
//! tracking: a subscriber whose write fails is dropped from that channel
//! during the publish that discovered it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;
use std::time::Duration;
use tracing::debug;

use crate::server::response::patient_write;

/// One unit of `text/event-stream` output. Line terminators inside a
/// frame are bare newlines, never CRLF.
#[derive(Debug, Clone, Default)]
pub struct SseEvent {
    pub id: Option<String>,
    pub event: Option<String>,
    pub retry: Option<u64>,
    pub data: String,
}

impl SseEvent {
    /// A plain data-only frame.
    #[must_use]
    pub fn data(data: impl Into<String>) -> Self {
        SseEvent {
            data: data.into(),
            ..SseEvent::default()
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    #[must_use]
    pub fn with_event(mut self, event: &str) -> Self {
        self.event = Some(event.to_string());
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: u64) -> Self {
        self.retry = Some(retry);
        self
    }

    #[must_use]
    pub fn render(&self) -> Vec<u8> {
        let mut out = Vec::new();
        if let Some(id) = &self.id {
            let _ = write!(out, "id: {id}\n");
        }
        if let Some(event) = &self.event {
            let _ = write!(out, "event: {event}\n");
        }
        if let Some(retry) = self.retry {
            let _ = write!(out, "retry: {retry}\n");
        }
        let _ = write!(out, "data: {}\n\n", self.data);
        out
    }
}

/// A socket shared between the channels it subscribed to.
pub type SharedStream = Rc<RefCell<mio::net::TcpStream>>;

/// Named subscription lists for SSE broadcast.
pub struct ChannelTable {
    channels: HashMap<String, Vec<SharedStream>>,
    write_patience: Duration,
}

impl ChannelTable {
    #[must_use]
    pub fn new(write_patience: Duration) -> Self {
        ChannelTable {
            channels: HashMap::new(),
            write_patience,
        }
    }

    /// Prepend a socket to a channel's subscription list.
    pub fn subscribe(&mut self, channel: &str, stream: SharedStream) {
        let subscribers = self.channels.entry(channel.to_string()).or_default();
        subscribers.insert(0, stream);
        debug!(channel, subscribers = subscribers.len(), "socket subscribed");
    }

    /// Broadcast `message` as a data frame to every subscriber, in
    /// subscription order (newest first).
    ///
    /// Subscribers whose write or flush fails are dropped from the
    /// channel; this is the only place dead stream sockets get reaped.
    /// Returns how many subscribers remain.
    pub fn publish(&mut self, channel: &str, message: &str) -> usize {
        let frame = SseEvent::data(message).render();
        let Some(subscribers) = self.channels.get_mut(channel) else {
            return 0;
        };
        let patience = self.write_patience;
        let before = subscribers.len();
        subscribers.retain(|stream| {
            let mut stream = stream.borrow_mut();
            patient_write(&mut *stream, &frame, patience)
                .and_then(|()| stream.flush())
                .is_ok()
        });
        let dropped = before - subscribers.len();
        if dropped > 0 {
            debug!(channel, dropped, remaining = subscribers.len(), "dead subscribers reaped");
        }
        subscribers.len()
    }

    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map_or(0, Vec::len)
    }

    /// Drop every channel and with it every retained socket.
    pub fn clear(&mut self) {
        self.channels.clear();
    }
}
