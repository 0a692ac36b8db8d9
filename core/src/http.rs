//! HTTP request, body and response types.
//!
//! # Design
//! These types describe one HTTP exchange as plain data. Conversations build
//! `HttpRequest` values, hand them to an `HttpTransport`, and interpret the
//! `HttpResponse` that comes back. Nothing in this module touches the network,
//! which keeps request building and response parsing testable without a
//! server.
//!
//! `HttpBody` pairs a content type with raw bytes. An empty content type is
//! the "no body" state; the transport only sends a `Content-Type` header when
//! a body is present.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use serde_json::{Map, Value};
use url::{form_urlencoded, Url};

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_FORM: &str = "application/x-www-form-urlencoded";

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request or response payload: content type plus raw bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpBody {
    content_type: String,
    data: Bytes,
}

impl HttpBody {
    pub fn new(content_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            content_type: content_type.into(),
            data: data.into(),
        }
    }

    /// The "no body" value.
    pub fn null() -> Self {
        Self::default()
    }

    /// Compact JSON serialization of `json` with `application/json`.
    pub fn from_json(json: &Value) -> Self {
        Self::new(CONTENT_TYPE_JSON, json.to_string().into_bytes())
    }

    /// JSON object whose members are the given pairs. Values stay strings.
    pub fn json_object_from_map<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let object: Map<String, Value> = pairs
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_string(), Value::String(v.as_ref().to_string())))
            .collect();
        Self::from_json(&Value::Object(object))
    }

    /// `application/x-www-form-urlencoded` encoding of the given pairs.
    pub fn url_encoded_from_map<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (k, v) in pairs {
            serializer.append_pair(k.as_ref(), v.as_ref());
        }
        Self::new(CONTENT_TYPE_FORM, serializer.finish().into_bytes())
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn is_null(&self) -> bool {
        self.content_type.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The payload decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_slice(&self.data)
    }

    /// The payload as a JSON array, or an empty array if it is not one.
    pub fn to_json_array(&self) -> Vec<Value> {
        match self.to_json() {
            Ok(Value::Array(items)) => items,
            _ => Vec::new(),
        }
    }

    /// The payload as a JSON object, or an empty object if it is not one.
    pub fn to_json_object(&self) -> Map<String, Value> {
        match self.to_json() {
            Ok(Value::Object(object)) => object,
            _ => Map::new(),
        }
    }
}

/// A pending HTTP call. Built fresh for every request and not modified after
/// it has been handed to a transport.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: HttpMethod,
    url: Url,
    headers: BTreeMap<String, String>,
    body: HttpBody,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: Url) -> Self {
        Self {
            method,
            url,
            headers: BTreeMap::new(),
            body: HttpBody::null(),
        }
    }

    /// Sets a header. A later value for the same name replaces the earlier one.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_header(name, value);
        self
    }

    pub fn set_body(&mut self, body: HttpBody) {
        self.body = body;
    }

    pub fn with_body(mut self, body: HttpBody) -> Self {
        self.set_body(body);
        self
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn body(&self) -> &HttpBody {
        &self.body
    }

    /// Content type to send on the wire, present only when there is a body.
    pub fn content_type(&self) -> Option<&str> {
        if self.body.is_null() {
            None
        } else {
            Some(self.body.content_type())
        }
    }
}

/// A completed HTTP exchange: the status code and the fully buffered body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    status: u16,
    body: HttpBody,
}

impl HttpResponse {
    pub fn new(status: u16, body: HttpBody) -> Self {
        Self { status, body }
    }

    /// A response without payload, such as `204 No Content`.
    pub fn empty(status: u16) -> Self {
        Self::new(status, HttpBody::null())
    }

    pub fn json(status: u16, json: &Value) -> Self {
        Self::new(status, HttpBody::from_json(json))
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn body(&self) -> &HttpBody {
        &self.body
    }

    pub fn into_body(self) -> HttpBody {
        self.body
    }
}
