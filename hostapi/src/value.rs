//! `HostValue` — the runtime-typed payload behind every handle.
//!
//! The guest only ever sees `u32` handles; each live handle names exactly
//! one `HostValue`. The capability set is closed: values can report a type
//! name, render a debug string, be set as properties on an object, or be
//! downcast to one of the concrete shapes below. Cloning a `HostValue`
//! clones references (`Rc`), not object state, which is exactly the
//! aliasing a reference-based host exhibits.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::closure::ClosureRef;
use crate::error::HostError;
use crate::http::{Headers, RequestData, ResponseData};
use crate::pending::PendingRef;

/// Property bag used for option objects (`object_new` / `object_set`).
pub type PropertyMap = Rc<RefCell<BTreeMap<String, HostValue>>>;

/// An exception value delivered through the exception out-parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostException {
    pub message: String,
}

/// A host-owned value reachable from guest code through a handle.
#[derive(Clone)]
pub enum HostValue {
    Undefined,
    Null,
    Bool(bool),
    String(String),
    Json(serde_json::Value),
    Object(PropertyMap),
    Request(Rc<RefCell<RequestData>>),
    Headers(Rc<RefCell<Headers>>),
    Response(Rc<ResponseData>),
    Pending(PendingRef),
    Closure(ClosureRef),
    Error(Rc<HostException>),
}

impl HostValue {
    /// Box a string into a host value.
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    /// Build an exception value carrying `message`.
    pub fn exception(message: impl Into<String>) -> Self {
        Self::Error(Rc::new(HostException {
            message: message.into(),
        }))
    }

    /// Fresh empty property bag.
    pub fn empty_object() -> Self {
        Self::Object(Rc::new(RefCell::new(BTreeMap::new())))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::String(_) => "string",
            Self::Json(_) => "json",
            Self::Object(_) => "object",
            Self::Request(_) => "request",
            Self::Headers(_) => "headers",
            Self::Response(_) => "response",
            Self::Pending(_) => "pending",
            Self::Closure(_) => "function",
            Self::Error(_) => "error",
        }
    }

    /// Human-readable rendering, the host side of `debug_string`.
    pub fn debug_string(&self) -> String {
        match self {
            Self::Undefined => "undefined".into(),
            Self::Null => "null".into(),
            Self::Bool(b) => b.to_string(),
            Self::String(s) => format!("\"{}\"", s),
            Self::Json(serde_json::Value::Object(_)) => {
                format!("Object({})", self.json_text_lossy())
            }
            Self::Json(v) => v.to_string(),
            Self::Object(map) => {
                let map = map.borrow();
                let fields: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("\"{}\": {}", k, v.debug_string()))
                    .collect();
                format!("Object({{{}}})", fields.join(", "))
            }
            Self::Request(req) => format!("Request({})", req.borrow().url),
            Self::Headers(_) => "Headers".into(),
            Self::Response(resp) => format!("Response({})", resp.status),
            Self::Pending(_) => "Promise".into(),
            Self::Closure(_) => "Function".into(),
            Self::Error(e) => format!("Error: {}", e.message),
        }
    }

    fn json_text_lossy(&self) -> String {
        match self {
            Self::Json(v) => v.to_string(),
            _ => String::new(),
        }
    }

    /// Serialize to a JSON value, the host side of `json_serialize`.
    ///
    /// Only data-shaped values serialize; handles to runtime objects
    /// (requests, pendings, closures) do not.
    pub fn to_json(&self) -> Result<serde_json::Value, HostError> {
        match self {
            Self::Null => Ok(serde_json::Value::Null),
            Self::Bool(b) => Ok(serde_json::Value::Bool(*b)),
            Self::String(s) => Ok(serde_json::Value::String(s.clone())),
            Self::Json(v) => Ok(v.clone()),
            Self::Object(map) => {
                let map = map.borrow();
                let mut out = serde_json::Map::new();
                for (k, v) in map.iter() {
                    out.insert(k.clone(), v.to_json()?);
                }
                Ok(serde_json::Value::Object(out))
            }
            other => Err(HostError::Json(format!(
                "cannot serialize a {}",
                other.type_name()
            ))),
        }
    }

    /// Set a property on an object value.
    pub fn set_property(&self, key: &str, value: HostValue) -> Result<(), HostError> {
        match self {
            Self::Object(map) => {
                map.borrow_mut().insert(key.to_string(), value);
                Ok(())
            }
            other => Err(HostError::mismatch("object", other.type_name())),
        }
    }

    pub fn expect_string(&self) -> Result<&str, HostError> {
        match self {
            Self::String(s) => Ok(s),
            other => Err(HostError::mismatch("string", other.type_name())),
        }
    }

    pub fn expect_object(&self) -> Result<&PropertyMap, HostError> {
        match self {
            Self::Object(map) => Ok(map),
            other => Err(HostError::mismatch("object", other.type_name())),
        }
    }

    pub fn expect_request(&self) -> Result<&Rc<RefCell<RequestData>>, HostError> {
        match self {
            Self::Request(req) => Ok(req),
            other => Err(HostError::mismatch("request", other.type_name())),
        }
    }

    pub fn expect_headers(&self) -> Result<&Rc<RefCell<Headers>>, HostError> {
        match self {
            Self::Headers(h) => Ok(h),
            other => Err(HostError::mismatch("headers", other.type_name())),
        }
    }

    pub fn expect_response(&self) -> Result<&Rc<ResponseData>, HostError> {
        match self {
            Self::Response(r) => Ok(r),
            other => Err(HostError::mismatch("response", other.type_name())),
        }
    }

    pub fn expect_pending(&self) -> Result<&PendingRef, HostError> {
        match self {
            Self::Pending(p) => Ok(p),
            other => Err(HostError::mismatch("pending", other.type_name())),
        }
    }

    pub fn expect_closure(&self) -> Result<&ClosureRef, HostError> {
        match self {
            Self::Closure(c) => Ok(c),
            other => Err(HostError::mismatch("function", other.type_name())),
        }
    }
}

impl std::fmt::Debug for HostValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.debug_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_string_primitives() {
        assert_eq!(HostValue::Undefined.debug_string(), "undefined");
        assert_eq!(HostValue::Null.debug_string(), "null");
        assert_eq!(HostValue::Bool(true).debug_string(), "true");
        assert_eq!(HostValue::string("café").debug_string(), "\"café\"");
    }

    #[test]
    fn test_debug_string_json() {
        let v = HostValue::Json(serde_json::json!({"a": 1}));
        assert_eq!(v.debug_string(), "Object({\"a\":1})");
        let v = HostValue::Json(serde_json::json!([1, 2]));
        assert_eq!(v.debug_string(), "[1,2]");
    }

    #[test]
    fn test_debug_string_error() {
        let v = HostValue::exception("boom");
        assert_eq!(v.debug_string(), "Error: boom");
    }

    #[test]
    fn test_set_property_on_object() {
        let obj = HostValue::empty_object();
        obj.set_property("method", HostValue::string("POST")).unwrap();
        let map = obj.expect_object().unwrap().borrow();
        assert_eq!(map.get("method").unwrap().expect_string().unwrap(), "POST");
    }

    #[test]
    fn test_set_property_on_non_object_fails() {
        let err = HostValue::Null
            .set_property("k", HostValue::Undefined)
            .unwrap_err();
        assert_eq!(err.to_string(), "expected object, got null");
    }

    #[test]
    fn test_clone_aliases_object_state() {
        let obj = HostValue::empty_object();
        let alias = obj.clone();
        alias.set_property("k", HostValue::Bool(false)).unwrap();
        let map = obj.expect_object().unwrap().borrow();
        assert!(map.contains_key("k"));
    }

    #[test]
    fn test_to_json_round_trip() {
        let obj = HostValue::empty_object();
        obj.set_property("name", HostValue::string("weft")).unwrap();
        obj.set_property("ok", HostValue::Bool(true)).unwrap();
        let json = obj.to_json().unwrap();
        assert_eq!(json, serde_json::json!({"name": "weft", "ok": true}));
    }

    #[test]
    fn test_to_json_rejects_runtime_objects() {
        let err = HostValue::Undefined.to_json().unwrap_err();
        assert!(err.to_string().contains("cannot serialize"));
    }
}
