use std::io::{self, Write};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::HttpError;

/// An HTTP/1.1 response ready to be serialized onto a socket.
#[derive(Debug, Clone)]
pub struct Response {
    pub response_code: String,
    pub content_type: String,
    pub charset: String,
    pub cookie: Option<String>,
    pub location: Option<String>,
    pub keep_alive: bool,
    pub body: Option<Vec<u8>>,
}

impl Default for Response {
    fn default() -> Self {
        Response {
            response_code: "200 OK".to_string(),
            content_type: "text/html".to_string(),
            charset: "utf-8".to_string(),
            cookie: None,
            location: None,
            keep_alive: false,
            body: None,
        }
    }
}

impl Response {
    #[must_use]
    pub fn new() -> Self {
        Response::default()
    }

    #[must_use]
    pub fn with_code(mut self, code: &str) -> Self {
        self.response_code = code.to_string();
        self
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: &str) -> Self {
        self.content_type = content_type.to_string();
        self
    }

    #[must_use]
    pub fn with_cookie(mut self, cookie: Option<String>) -> Self {
        self.cookie = cookie;
        self
    }

    #[must_use]
    pub fn with_location(mut self, location: &str) -> Self {
        self.location = Some(location.to_string());
        self
    }

    #[must_use]
    pub fn with_keep_alive(mut self) -> Self {
        self.keep_alive = true;
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// The canned response for a request-path failure.
    #[must_use]
    pub fn error(err: &HttpError) -> Self {
        let text = match err {
            // handler internals stay server-side
            HttpError::Handler(_) => err.status_line().to_string(),
            other => format!("{} ({})", other.status_line(), other),
        };
        Response::new()
            .with_code(err.status_line())
            .with_body(text.into_bytes())
    }

    /// Serialize the status line, headers, and body.
    ///
    /// The blank separator and the body bytes are emitted only when a body
    /// is present; a stream response writes its own separator before the
    /// first event frame.
    #[must_use]
    pub fn render(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let _ = write!(out, "HTTP/1.1 {}\r\n", self.response_code);
        let _ = write!(
            out,
            "Content-Type: {}; charset={}\r\n",
            self.content_type, self.charset
        );
        let _ = write!(out, "Cache-Control: no-cache, no-store, must-revalidate\r\n");
        if let Some(cookie) = &self.cookie {
            let _ = write!(out, "Set-Cookie: {cookie}\r\n");
        }
        if let Some(location) = &self.location {
            let _ = write!(out, "Location: {location}\r\n");
        }
        if self.keep_alive {
            let _ = write!(out, "Connection: keep-alive\r\n");
            let _ = write!(out, "Expires: Thu, 01 Jan 1970 00:00:01 GMT\r\n");
        }
        if let Some(body) = &self.body {
            let _ = write!(out, "Content-Length: {}\r\n\r\n", body.len());
            out.extend_from_slice(body);
        }
        out
    }
}

/// Write the whole of `buf`, tolerating brief `WouldBlock` stalls.
///
/// Sockets here are non-blocking; a peer whose receive window stays full
/// past `patience` counts as dead and the write fails with `TimedOut`.
pub(crate) fn patient_write<W: Write>(
    w: &mut W,
    mut buf: &[u8],
    patience: Duration,
) -> io::Result<()> {
    let start = Instant::now();
    while !buf.is_empty() {
        match w.write(buf) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "peer stopped accepting bytes",
                ))
            }
            Ok(n) => buf = &buf[n..],
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                if start.elapsed() > patience {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "peer unwritable for too long",
                    ));
                }
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Best-effort delivery of an error response; the peer may already be gone.
pub(crate) fn respond_error<W: Write>(stream: &mut W, err: &HttpError, patience: Duration) {
    let response = Response::error(err);
    if let Err(io_err) = patient_write(stream, &response.render(), patience) {
        debug!(error = %io_err, "error response could not be delivered");
    }
}
