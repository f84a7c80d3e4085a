use std::fmt;

/// Failure classes surfaced by the request path.
///
/// Every variant maps to the status line the server emits for it. Handler
/// errors wrap whatever the handler body raised; everything else is a
/// contract violation detected before the handler runs.
#[derive(Debug)]
pub enum HttpError {
    /// Malformed request line, unsupported HTTP version, or a bad header.
    ParseAssertion(String),
    /// A declared parameter was missing, failed conversion, failed its
    /// type assertion, or failed a handler predicate.
    TypeAssertion(String),
    /// The connection buffer exceeded the configured request size bound.
    PayloadTooLarge,
    /// No handler is registered under the requested URI.
    NotFound(String),
    /// The handler body returned an error.
    Handler(anyhow::Error),
}

impl HttpError {
    /// The HTTP status line this error is reported as.
    #[must_use]
    pub fn status_line(&self) -> &'static str {
        match self {
            HttpError::ParseAssertion(_) | HttpError::TypeAssertion(_) => "400 Bad Request",
            HttpError::PayloadTooLarge => "413 Payload Too Large",
            HttpError::NotFound(_) => "404 Not Found",
            HttpError::Handler(_) => "500 Internal Server Error",
        }
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpError::ParseAssertion(msg) => write!(f, "malformed request: {msg}"),
            HttpError::TypeAssertion(msg) => write!(f, "parameter assertion failed: {msg}"),
            HttpError::PayloadTooLarge => {
                write!(f, "request exceeds the configured size limit")
            }
            HttpError::NotFound(uri) => write!(f, "no handler registered for {uri}"),
            HttpError::Handler(err) => write!(f, "handler error: {err}"),
        }
    }
}

impl std::error::Error for HttpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HttpError::Handler(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}
