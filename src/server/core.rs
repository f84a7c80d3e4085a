use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Registry, Token};
use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::net::ToSocketAddrs;
use std::rc::Rc;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::dispatcher::{Dispatcher, Disposition, HandlerEntry};
use crate::error::HttpError;
use crate::session::Session;
use crate::typed::{AssertFn, ConvertFn};

use super::buffer::{Buffer, ReadOutcome};
use super::request;
use super::response::respond_error;

const LISTENER: Token = Token(0);

/// One accepted socket and its request buffer. The buffer is allocated on
/// the connection's first readiness, not on accept.
struct Connection {
    stream: TcpStream,
    buffer: Option<Buffer>,
}

/// What a readiness event on a client socket resolved to.
enum ClientAction {
    Keep,
    Drop,
    Reject(HttpError),
    Dispatch,
}

/// The single-threaded server: a listener, a connection table, and the
/// dispatcher holding all process-wide state.
///
/// Handlers, types, and hooks are registered before [`Server::start`];
/// the loop then owns the thread until a fatal error. Every piece of
/// mutable state is touched only from this thread, so there are no locks
/// anywhere.
pub struct Server {
    config: ServerConfig,
    dispatcher: Dispatcher,
}

impl Server {
    /// Build a server around a validated configuration.
    pub fn new(config: ServerConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let dispatcher = Dispatcher::new(&config);
        Ok(Server { config, dispatcher })
    }

    /// Register a handler by name (`root` serves `/`, `foo` serves `/foo`).
    pub fn register(&mut self, name: &str, entry: HandlerEntry) {
        self.dispatcher.handlers.register(name, entry);
    }

    /// Register a handler under an explicit URI.
    pub fn register_uri(&mut self, uri: &str, entry: HandlerEntry) {
        self.dispatcher.handlers.register_uri(uri, entry);
    }

    /// Install a parameter type into the process-wide registry.
    pub fn define_type(
        &mut self,
        name: &str,
        priority: i32,
        convert: Option<ConvertFn>,
        assert: Option<AssertFn>,
    ) {
        self.dispatcher.types.define(name, priority, convert, assert);
    }

    /// Run `hook` for every session the server creates from now on.
    pub fn add_session_hook(
        &mut self,
        hook: impl FnMut(&Session) -> anyhow::Result<()> + 'static,
    ) {
        self.dispatcher.sessions.add_hook(hook);
    }

    pub fn clear_session_hooks(&mut self) {
        self.dispatcher.sessions.clear_hooks();
    }

    /// Broadcast to a channel from outside any handler.
    pub fn publish(&mut self, channel: &str, message: &str) -> usize {
        self.dispatcher.channels.publish(channel, message)
    }

    #[must_use]
    pub fn handlers(&self) -> &crate::dispatcher::HandlerTable {
        &self.dispatcher.handlers
    }

    /// Bind and serve until a fatal error.
    ///
    /// Only hook failures and listener-level I/O errors end the loop; when
    /// one does, every tracked socket (including retained stream sockets)
    /// is closed before the error is returned.
    pub fn start<A: ToSocketAddrs>(&mut self, addr: A) -> anyhow::Result<()> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| anyhow::anyhow!("no usable address"))?;
        let result = self.run(addr);
        self.dispatcher.channels.clear();
        if let Err(err) = &result {
            error!(error = %err, "server stopped");
        }
        result
    }

    fn run(&mut self, addr: std::net::SocketAddr) -> anyhow::Result<()> {
        let mut listener = TcpListener::bind(addr)?;
        let mut poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let mut events = Events::with_capacity(256);
        let mut connections: HashMap<Token, Connection> = HashMap::new();
        let mut next_token: usize = 1;
        info!(%addr, "listening");

        loop {
            if let Err(err) = poll.poll(&mut events, Some(self.config.poll_timeout)) {
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err.into());
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER => {
                        accept_ready(poll.registry(), &listener, &mut connections, &mut next_token);
                    }
                    token => {
                        self.client_ready(poll.registry(), &mut connections, token)?;
                    }
                }
            }

            self.sweep_stale(poll.registry(), &mut connections);
        }
    }

    /// Handle readiness on one client socket. The returned error is fatal
    /// (a session hook failed); everything request-level is resolved here.
    fn client_ready(
        &mut self,
        registry: &Registry,
        connections: &mut HashMap<Token, Connection>,
        token: Token,
    ) -> anyhow::Result<()> {
        let action = match connections.get_mut(&token) {
            // spurious wakeup for a connection already gone
            None => return Ok(()),
            Some(conn) => {
                let buffer = conn.buffer.get_or_insert_with(Buffer::new);
                match buffer.read_from(&mut conn.stream, self.config.max_request_size) {
                    ReadOutcome::Eof => ClientAction::Drop,
                    ReadOutcome::Progress => {
                        if buffer.too_big(self.config.max_request_size) {
                            ClientAction::Reject(HttpError::PayloadTooLarge)
                        } else if buffer.too_old(self.config.max_request_age) {
                            ClientAction::Reject(HttpError::ParseAssertion(
                                "request took too long to arrive".into(),
                            ))
                        } else if buffer.too_needy(self.config.max_buffer_tries) {
                            ClientAction::Reject(HttpError::ParseAssertion(
                                "request needed too many reads".into(),
                            ))
                        } else if buffer.complete() {
                            ClientAction::Dispatch
                        } else {
                            ClientAction::Keep
                        }
                    }
                }
            }
        };

        match action {
            ClientAction::Keep => Ok(()),
            ClientAction::Drop => {
                if let Some(mut conn) = connections.remove(&token) {
                    let _ = registry.deregister(&mut conn.stream);
                    debug!(token = token.0, "connection closed by peer");
                }
                Ok(())
            }
            ClientAction::Reject(err) => {
                if let Some(mut conn) = connections.remove(&token) {
                    let _ = registry.deregister(&mut conn.stream);
                    warn!(token = token.0, error = %err, "connection rejected");
                    respond_error(&mut conn.stream, &err, self.config.write_patience);
                    // unread input left in the socket would turn the close
                    // into a reset that races the response
                    drain_remaining(&mut conn.stream);
                }
                Ok(())
            }
            ClientAction::Dispatch => {
                let Some(mut conn) = connections.remove(&token) else {
                    return Ok(());
                };
                let _ = registry.deregister(&mut conn.stream);
                let raw = conn.buffer.take().map(Buffer::into_contents).unwrap_or_default();
                match request::parse(&raw) {
                    Err(err) => {
                        warn!(token = token.0, error = %err, "unparsable request");
                        respond_error(&mut conn.stream, &err, self.config.write_patience);
                        Ok(())
                    }
                    Ok(req) => match self.dispatcher.dispatch(&mut conn.stream, &req)? {
                        Disposition::Close => Ok(()),
                        Disposition::Retain(channels) => {
                            if channels.is_empty() {
                                debug!(token = token.0, "stream with no subscriptions dropped");
                                return Ok(());
                            }
                            let shared = Rc::new(RefCell::new(conn.stream));
                            for channel in &channels {
                                self.dispatcher
                                    .channels
                                    .subscribe(channel, Rc::clone(&shared));
                            }
                            Ok(())
                        }
                    },
                }
            }
        }
    }

    /// Cut connections whose request has been in flight too long. Runs
    /// once per poll wake so silent peers are bounded by `max_request_age`
    /// even though they never trigger readiness.
    fn sweep_stale(&mut self, registry: &Registry, connections: &mut HashMap<Token, Connection>) {
        let stale: Vec<Token> = connections
            .iter()
            .filter(|(_, conn)| {
                conn.buffer
                    .as_ref()
                    .map_or(false, |b| b.too_old(self.config.max_request_age))
            })
            .map(|(token, _)| *token)
            .collect();
        for token in stale {
            if let Some(mut conn) = connections.remove(&token) {
                let _ = registry.deregister(&mut conn.stream);
                warn!(token = token.0, "stale connection cut");
                respond_error(
                    &mut conn.stream,
                    &HttpError::ParseAssertion("request took too long to arrive".into()),
                    self.config.write_patience,
                );
            }
        }
    }
}

/// Discard whatever the peer already sent on a connection being cut.
fn drain_remaining(stream: &mut TcpStream) {
    use std::io::Read;
    let mut scratch = [0u8; 1024];
    loop {
        match stream.read(&mut scratch) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
    }
}

/// Accept every pending connection on the listener.
fn accept_ready(
    registry: &Registry,
    listener: &TcpListener,
    connections: &mut HashMap<Token, Connection>,
    next_token: &mut usize,
) {
    loop {
        match listener.accept() {
            Ok((mut stream, peer)) => {
                let token = Token(*next_token);
                *next_token += 1;
                if let Err(err) = registry.register(&mut stream, token, Interest::READABLE) {
                    warn!(%peer, error = %err, "could not register accepted socket");
                    continue;
                }
                debug!(%peer, token = token.0, "connection accepted");
                connections.insert(
                    token,
                    Connection {
                        stream,
                        buffer: None,
                    },
                );
            }
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
            Err(err) => {
                warn!(error = %err, "accept failed");
                break;
            }
        }
    }
}
