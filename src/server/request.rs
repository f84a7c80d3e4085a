use http::Method;
use percent_encoding::percent_decode_str;
use std::collections::HashMap;

use crate::error::HttpError;

/// A parsed HTTP/1.1 request.
///
/// `parameters` carries query parameters followed by form-body parameters,
/// in arrival order and still URL-encoded. Lookups resolve to the last
/// insertion for a name, so body values shadow query values.
#[derive(Debug)]
pub struct Request {
    pub method: Method,
    pub resource: String,
    pub raw_query: Option<String>,
    /// Header names are case-folded to lowercase.
    pub headers: HashMap<String, String>,
    pub parameters: Vec<(String, String)>,
    /// Value of the `Cookie` header, if the client sent one.
    pub session_token: Option<String>,
    /// The raw body line, regardless of content type.
    pub body: Option<String>,
}

impl Request {
    /// Look up a parameter by name; the last insertion wins.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&str> {
        last_value(&self.parameters, name)
    }
}

/// Last-insertion-wins lookup over an ordered parameter list.
#[must_use]
pub fn last_value<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .rfind(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

/// Parse a raw request buffer into a [`Request`].
///
/// The buffer is decoded as UTF-8 and split on CRLF. The request line must
/// have exactly three space-separated fields and the version must be
/// `HTTP/1.1`. Headers run until the first empty line; the single line
/// after it is the body. The `cookie` header is captured as the session
/// token instead of landing in the header map.
pub fn parse(raw: &[u8]) -> Result<Request, HttpError> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| HttpError::ParseAssertion("request is not valid UTF-8".into()))?;
    let mut lines = text.split("\r\n");

    let request_line = lines
        .next()
        .ok_or_else(|| HttpError::ParseAssertion("empty request".into()))?;
    let fields: Vec<&str> = request_line.split(' ').collect();
    let (method, path, version) = match fields.as_slice() {
        [method, path, version] => (*method, *path, *version),
        _ => {
            return Err(HttpError::ParseAssertion(format!(
                "bad request line {request_line:?}"
            )))
        }
    };
    if version != "HTTP/1.1" {
        return Err(HttpError::ParseAssertion(format!(
            "unsupported protocol version {version:?}"
        )));
    }
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| HttpError::ParseAssertion(format!("bad method {method:?}")))?;

    let (resource, raw_query) = match path.split_once('?') {
        Some((resource, query)) => (resource.to_string(), Some(query.to_string())),
        None => (path.to_string(), None),
    };

    let mut headers = HashMap::new();
    let mut session_token = None;
    for line in lines.by_ref() {
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(": ")
            .ok_or_else(|| HttpError::ParseAssertion(format!("bad header line {line:?}")))?;
        let name = name.to_lowercase();
        if name == "cookie" {
            session_token = Some(value.to_string());
        } else {
            headers.insert(name, value.to_string());
        }
    }

    let body = lines.next().filter(|l| !l.is_empty()).map(str::to_string);

    let mut parameters = raw_query.as_deref().map(parse_params).unwrap_or_default();
    if let Some(body_line) = &body {
        if form_encoded(&headers) {
            parameters.extend(parse_params(body_line));
        }
    }

    Ok(Request {
        method,
        resource,
        raw_query,
        headers,
        parameters,
        session_token,
        body,
    })
}

/// Bodies merge into `parameters` only when the client declared them as a
/// form (or declared nothing at all).
fn form_encoded(headers: &HashMap<String, String>) -> bool {
    match headers.get("content-type") {
        Some(ct) => ct.contains("application/x-www-form-urlencoded"),
        None => true,
    }
}

/// Split a `k=v&k2=v2` string into an ordered parameter list.
///
/// Names are case-folded; a part without `=` gets an empty value. Values
/// stay URL-encoded; decoding happens when a handler declares the
/// parameter.
#[must_use]
pub fn parse_params(s: &str) -> Vec<(String, String)> {
    s.split('&')
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((name, value)) => (name.to_lowercase(), value.to_string()),
            None => (part.to_lowercase(), String::new()),
        })
        .collect()
}

/// Inverse of [`parse_params`] for already-encoded values.
#[must_use]
pub fn render_params(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Decode one URL-encoded value: `+` becomes a space, then percent
/// escapes are resolved.
pub fn url_decode(raw: &str) -> Result<String, HttpError> {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|cow| cow.into_owned())
        .map_err(|_| HttpError::TypeAssertion(format!("{raw:?} is not valid URL encoding")))
}
