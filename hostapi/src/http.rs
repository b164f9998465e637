//! Request, headers, and response shapes plus the backend seam.
//!
//! The bridge does not define a wire protocol; a boxed [`HttpBackend`]
//! supplied by the embedder performs the actual network call. Backends see
//! a flattened [`HttpRequest`] snapshot, never the shared `Rc` state the
//! handle graph aliases.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::HostError;
use crate::value::HostValue;

/// Ordered header map with case-insensitive names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header, replacing any existing value for the same name.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), HostError> {
        if name.is_empty()
            || !name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(HostError::BadHeader(format!("bad header name {name:?}")));
        }
        if value.bytes().any(|b| b == b'\r' || b == b'\n') {
            return Err(HostError::BadHeader(format!(
                "control character in value for {name:?}"
            )));
        }
        let name = name.to_ascii_lowercase();
        if let Some(entry) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = value.to_string();
        } else {
            self.entries.push((name, value.to_string()));
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A request under construction, reachable through a handle.
///
/// `headers` is shared: `request_headers` hands the guest an aliasing
/// handle, and mutation through either handle is visible through both.
#[derive(Debug)]
pub struct RequestData {
    pub url: String,
    pub method: String,
    pub body: Option<String>,
    pub headers: Rc<RefCell<Headers>>,
}

impl RequestData {
    /// Build a request from a URL and an options value
    /// (undefined/null for defaults, or a property bag with `method`
    /// and `body` entries).
    pub fn new(url: &str, init: &HostValue) -> Result<Self, HostError> {
        if url.is_empty() {
            return Err(HostError::BadRequest("empty url".into()));
        }
        let mut method = "GET".to_string();
        let mut body = None;
        match init {
            HostValue::Undefined | HostValue::Null => {}
            HostValue::Object(map) => {
                let map = map.borrow();
                if let Some(m) = map.get("method") {
                    method = m.expect_string()?.to_ascii_uppercase();
                }
                if let Some(b) = map.get("body") {
                    body = Some(b.expect_string()?.to_string());
                }
            }
            other => {
                return Err(HostError::mismatch("request options object", other.type_name()))
            }
        }
        if method.is_empty() {
            return Err(HostError::BadRequest("empty method".into()));
        }
        Ok(Self {
            url: url.to_string(),
            method,
            body,
            headers: Rc::new(RefCell::new(Headers::new())),
        })
    }

    /// Flatten into the snapshot a backend receives.
    pub fn snapshot(&self) -> HttpRequest {
        HttpRequest {
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self
                .headers
                .borrow()
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
            body: self.body.clone(),
        }
    }
}

/// Flattened request snapshot handed to a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// A completed response, immutable once produced by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseData {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl ResponseData {
    pub fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: value.to_string().into_bytes(),
        }
    }

    /// Decode the body as UTF-8 text.
    pub fn body_text(&self) -> Result<String, HostError> {
        String::from_utf8(self.body.clone()).map_err(|_| HostError::Utf8)
    }

    /// Parse the body as JSON.
    pub fn body_json(&self) -> Result<serde_json::Value, HostError> {
        serde_json::from_slice(&self.body).map_err(|e| HostError::Json(e.to_string()))
    }
}

/// Backend failure, reported to the guest as a rejected pending.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct BackendError(pub String);

/// The seam to the real network stack.
///
/// One call per `fetch`; the bridge settles the pending response with the
/// returned value on a later turn of the event loop.
pub trait HttpBackend {
    fn execute(&self, request: HttpRequest) -> Result<ResponseData, BackendError>;
}
