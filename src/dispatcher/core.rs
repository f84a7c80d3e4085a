use mio::net::TcpStream;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::HttpError;
use crate::server::request::Request;
use crate::server::response::{patient_write, respond_error, Response};
use crate::session::SessionStore;
use crate::sse::{ChannelTable, SseEvent};
use crate::typed::{bind_params, TypeRegistry};

use super::handler::{HandlerEntry, HandlerKind, HandlerScope};

/// URI-keyed table of registered handlers.
///
/// One handler per URI; registering a name again replaces the previous
/// entry with a warning, and lookups always see the latest binding.
#[derive(Default)]
pub struct HandlerTable {
    handlers: HashMap<String, HandlerEntry>,
}

impl HandlerTable {
    #[must_use]
    pub fn new() -> Self {
        HandlerTable {
            handlers: HashMap::new(),
        }
    }

    /// Register under the URI derived from `name`: `root` maps to `/`,
    /// any other name maps to `/name`, case-folded.
    pub fn register(&mut self, name: &str, entry: HandlerEntry) {
        let uri = uri_for_name(name);
        self.register_uri(&uri, entry);
    }

    /// Register under an explicit URI.
    pub fn register_uri(&mut self, uri: &str, entry: HandlerEntry) {
        if self.handlers.insert(uri.to_string(), entry).is_some() {
            warn!(uri, "handler replaced");
        } else {
            info!(uri, total_handlers = self.handlers.len(), "handler registered");
        }
    }

    #[must_use]
    pub fn lookup(&self, uri: &str) -> Option<&HandlerEntry> {
        self.handlers.get(uri)
    }

    #[must_use]
    pub fn contains(&self, uri: &str) -> bool {
        self.handlers.contains_key(uri)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn uris(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

pub(crate) fn uri_for_name(name: &str) -> String {
    if name.eq_ignore_ascii_case("root") {
        "/".to_string()
    } else {
        format!("/{}", name.to_lowercase())
    }
}

/// What the event loop should do with the socket after dispatch.
#[derive(Debug)]
pub enum Disposition {
    /// The response is complete; drop the socket.
    Close,
    /// A stream response went out; move the socket into these channels.
    Retain(Vec<String>),
}

/// Routes parsed requests through session resolution, the parameter
/// pipeline, and the kind-specific response protocol.
///
/// Owns every piece of process-wide mutable state: the handler table, the
/// type registry, the session table, and the channel table. All of it is
/// touched only from the event-loop thread.
pub struct Dispatcher {
    pub handlers: HandlerTable,
    pub types: TypeRegistry,
    pub sessions: SessionStore,
    pub channels: ChannelTable,
    write_patience: Duration,
}

impl Dispatcher {
    #[must_use]
    pub fn new(config: &ServerConfig) -> Self {
        Dispatcher {
            handlers: HandlerTable::new(),
            types: TypeRegistry::with_builtins(),
            sessions: SessionStore::new(config.max_session_idle, config.clean_sessions_every),
            channels: ChannelTable::new(config.write_patience),
            write_patience: config.write_patience,
        }
    }

    /// Serve one parsed request on `stream`.
    ///
    /// Request-level failures (no handler, parameter rejection, handler
    /// body error) are answered on the socket and reported as
    /// [`Disposition::Close`]. The only error this returns is a
    /// new-session hook failure, which is fatal to the server.
    pub fn dispatch(
        &mut self,
        stream: &mut TcpStream,
        request: &Request,
    ) -> anyhow::Result<Disposition> {
        let patience = self.write_patience;

        // A valid presented token counts as "client had a cookie"; a
        // stale or missing one means we mint a session and hand the
        // token back on this response.
        let (token, had_cookie) = match request.session_token.as_deref() {
            Some(presented) if self.sessions.get_session(presented).is_some() => {
                (presented.to_string(), true)
            }
            _ => (self.sessions.new_session()?, false),
        };
        let cookie = (!had_cookie).then(|| token.clone());

        let Some(entry) = self.handlers.lookup(&request.resource) else {
            warn!(uri = %request.resource, "no handler registered");
            respond_error(
                stream,
                &HttpError::NotFound(request.resource.clone()),
                patience,
            );
            return Ok(Disposition::Close);
        };

        if let HandlerKind::Redirect {
            location,
            permanent,
        } = &entry.kind
        {
            let code = if *permanent {
                "301 Moved Permanently"
            } else {
                "307 Temporary Redirect"
            };
            let response = Response::new()
                .with_code(code)
                .with_location(location)
                .with_body("Resource moved...");
            if let Err(err) = patient_write(stream, &response.render(), patience) {
                debug!(error = %err, "redirect response dropped");
            }
            return Ok(Disposition::Close);
        }

        let env = match bind_params(&self.types, &entry.params, &request.parameters) {
            Ok(env) => env,
            Err(err) => {
                debug!(uri = %request.resource, error = %err, "parameter pipeline rejected request");
                respond_error(stream, &err, patience);
                return Ok(Disposition::Close);
            }
        };

        let Some(session) = self.sessions.session_mut(&token) else {
            respond_error(
                stream,
                &HttpError::Handler(anyhow::anyhow!("session vanished mid-request")),
                patience,
            );
            return Ok(Disposition::Close);
        };
        let Some(body) = entry.body.as_ref() else {
            respond_error(
                stream,
                &HttpError::Handler(anyhow::anyhow!("handler has no body")),
                patience,
            );
            return Ok(Disposition::Close);
        };

        let mut scope = HandlerScope::new(request, session, &env, &mut self.channels);
        let outcome = body(&mut scope);
        let subscriptions = scope.into_subscriptions();

        let value = match outcome {
            Ok(value) => value,
            Err(err) => {
                error!(uri = %request.resource, error = %err, "handler body failed");
                respond_error(stream, &HttpError::Handler(err), patience);
                return Ok(Disposition::Close);
            }
        };

        match entry.kind {
            HandlerKind::Closing => {
                let mut response = Response::new()
                    .with_content_type(&entry.content_type)
                    .with_cookie(cookie);
                if let Some(bytes) = value.into_body_bytes() {
                    response = response.with_body(bytes);
                }
                if let Err(err) = patient_write(stream, &response.render(), patience) {
                    debug!(error = %err, "response dropped, peer gone");
                }
                debug!(uri = %request.resource, "request served");
                Ok(Disposition::Close)
            }
            HandlerKind::Json => {
                let encoded = value
                    .into_json()
                    .and_then(|v| Ok(serde_json::to_vec(&v)?));
                match encoded {
                    Ok(bytes) => {
                        let response = Response::new()
                            .with_content_type(&entry.content_type)
                            .with_cookie(cookie)
                            .with_body(bytes);
                        if let Err(err) = patient_write(stream, &response.render(), patience) {
                            debug!(error = %err, "response dropped, peer gone");
                        }
                        debug!(uri = %request.resource, "request served");
                    }
                    Err(err) => {
                        error!(uri = %request.resource, error = %err, "body not JSON-encodable");
                        respond_error(stream, &HttpError::Handler(err), patience);
                    }
                }
                Ok(Disposition::Close)
            }
            HandlerKind::Stream => {
                let head = Response::new()
                    .with_content_type(&entry.content_type)
                    .with_cookie(cookie)
                    .with_keep_alive();
                let mut opening = head.render();
                opening.extend_from_slice(b"\r\n");
                opening.extend_from_slice(&SseEvent::data(value.into_stream_data()).render());
                if let Err(err) = patient_write(stream, &opening, patience) {
                    debug!(error = %err, "stream opening dropped, peer gone");
                    return Ok(Disposition::Close);
                }
                debug!(
                    uri = %request.resource,
                    channels = subscriptions.len(),
                    "stream opened"
                );
                Ok(Disposition::Retain(subscriptions))
            }
            HandlerKind::Redirect { .. } => unreachable!("redirects return before the body runs"),
        }
    }
}
