use serde_json::Value;

use crate::server::request::Request;
use crate::session::Session;
use crate::sse::ChannelTable;
use crate::typed::{ParamEnv, ParamSpec};

/// What a handler body hands back to the dispatcher.
#[derive(Debug)]
pub enum BodyValue {
    Text(String),
    Bytes(Vec<u8>),
    Json(Value),
    None,
}

impl From<String> for BodyValue {
    fn from(s: String) -> Self {
        BodyValue::Text(s)
    }
}

impl From<&str> for BodyValue {
    fn from(s: &str) -> Self {
        BodyValue::Text(s.to_string())
    }
}

impl From<Vec<u8>> for BodyValue {
    fn from(bytes: Vec<u8>) -> Self {
        BodyValue::Bytes(bytes)
    }
}

impl From<Value> for BodyValue {
    fn from(value: Value) -> Self {
        BodyValue::Json(value)
    }
}

impl From<i64> for BodyValue {
    fn from(n: i64) -> Self {
        BodyValue::Text(n.to_string())
    }
}

impl From<usize> for BodyValue {
    fn from(n: usize) -> Self {
        BodyValue::Text(n.to_string())
    }
}

impl BodyValue {
    /// Bytes for a plain response body. JSON strings render bare, other
    /// JSON values render as their serialization.
    pub(crate) fn into_body_bytes(self) -> Option<Vec<u8>> {
        match self {
            BodyValue::Text(s) => Some(s.into_bytes()),
            BodyValue::Bytes(b) => Some(b),
            BodyValue::Json(Value::String(s)) => Some(s.into_bytes()),
            BodyValue::Json(v) => Some(v.to_string().into_bytes()),
            BodyValue::None => None,
        }
    }

    /// The value a JSON handler serializes.
    pub(crate) fn into_json(self) -> anyhow::Result<Value> {
        match self {
            BodyValue::Json(v) => Ok(v),
            BodyValue::Text(s) => Ok(Value::String(s)),
            BodyValue::None => Ok(Value::Null),
            BodyValue::Bytes(_) => anyhow::bail!("raw bytes cannot be JSON-encoded"),
        }
    }

    /// Data for the opening frame of a stream response.
    pub(crate) fn into_stream_data(self) -> String {
        match self {
            BodyValue::Text(s) => s,
            BodyValue::Json(Value::String(s)) => s,
            BodyValue::Json(v) => v.to_string(),
            BodyValue::Bytes(b) => String::from_utf8_lossy(&b).into_owned(),
            BodyValue::None => "Listening...".to_string(),
        }
    }
}

/// Everything a handler body can see and do.
///
/// Carries the bound parameter environment, the current session, and the
/// full request, plus the channel operations: `subscribe` marks the
/// current socket for retention on a channel once the response goes out,
/// and `publish` broadcasts to a channel's existing subscribers right
/// away.
pub struct HandlerScope<'a> {
    pub request: &'a Request,
    pub session: &'a mut Session,
    pub params: &'a ParamEnv,
    channels: &'a mut ChannelTable,
    subscriptions: Vec<String>,
}

impl<'a> HandlerScope<'a> {
    pub(crate) fn new(
        request: &'a Request,
        session: &'a mut Session,
        params: &'a ParamEnv,
        channels: &'a mut ChannelTable,
    ) -> Self {
        HandlerScope {
            request,
            session,
            params,
            channels,
            subscriptions: Vec::new(),
        }
    }

    /// A bound parameter value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    /// Subscribe the requesting socket to `channel`. Takes effect after
    /// the stream response has been written; a closing handler's
    /// subscription is discarded with its socket.
    pub fn subscribe(&mut self, channel: &str) {
        self.subscriptions.push(channel.to_string());
    }

    /// Broadcast to a channel now. Returns the number of live subscribers.
    pub fn publish(&mut self, channel: &str, message: &str) -> usize {
        self.channels.publish(channel, message)
    }

    pub(crate) fn into_subscriptions(self) -> Vec<String> {
        self.subscriptions
    }
}

/// A handler body: runs with the scope, yields a body value.
pub type HandlerBody = Box<dyn Fn(&mut HandlerScope<'_>) -> anyhow::Result<BodyValue>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HandlerKind {
    Closing,
    Json,
    Stream,
    Redirect { location: String, permanent: bool },
}

/// A registered handler: its kind, response content type, declared
/// parameters, and body.
///
/// Entries are built with the constructors below and registered under a
/// URI; the dispatcher drives the parameter pipeline and the kind-specific
/// response protocol around the body.
pub struct HandlerEntry {
    pub(crate) kind: HandlerKind,
    pub(crate) content_type: String,
    pub(crate) params: Vec<ParamSpec>,
    pub(crate) body: Option<HandlerBody>,
}

impl HandlerEntry {
    /// A handler that writes one response and closes the socket.
    #[must_use]
    pub fn closing<F>(params: Vec<ParamSpec>, body: F) -> Self
    where
        F: for<'a, 'b> Fn(&'a mut HandlerScope<'b>) -> anyhow::Result<BodyValue> + 'static,
    {
        HandlerEntry {
            kind: HandlerKind::Closing,
            content_type: "text/html".to_string(),
            params,
            body: Some(Box::new(body)),
        }
    }

    /// A closing handler whose body value is JSON-encoded.
    #[must_use]
    pub fn json<F>(params: Vec<ParamSpec>, body: F) -> Self
    where
        F: for<'a, 'b> Fn(&'a mut HandlerScope<'b>) -> anyhow::Result<BodyValue> + 'static,
    {
        HandlerEntry {
            kind: HandlerKind::Json,
            content_type: "application/json".to_string(),
            params,
            body: Some(Box::new(body)),
        }
    }

    /// An SSE handler: the socket stays open after the opening frame and
    /// receives whatever is published to the channels the body subscribed.
    #[must_use]
    pub fn stream<F>(params: Vec<ParamSpec>, body: F) -> Self
    where
        F: for<'a, 'b> Fn(&'a mut HandlerScope<'b>) -> anyhow::Result<BodyValue> + 'static,
    {
        HandlerEntry {
            kind: HandlerKind::Stream,
            content_type: "text/event-stream".to_string(),
            params,
            body: Some(Box::new(body)),
        }
    }

    /// A handler that redirects to `location` and closes.
    #[must_use]
    pub fn redirect(location: &str, permanent: bool) -> Self {
        HandlerEntry {
            kind: HandlerKind::Redirect {
                location: location.to_string(),
                permanent,
            },
            content_type: "text/html".to_string(),
            params: Vec::new(),
            body: None,
        }
    }

    /// Override the response content type (closing handlers only need
    /// this; static file handlers use it for their MIME type).
    #[must_use]
    pub fn with_content_type(mut self, content_type: &str) -> Self {
        self.content_type = content_type.to_string();
        self
    }
}
