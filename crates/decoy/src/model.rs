//! Protocol-agnostic request and response model.
//!
//! Adapters decode wire bytes into a [`Request`] and encode a [`Response`]
//! back. Everything between (predicates, injected code, recording) only ever
//! sees these types or the JSON view produced by [`Request::to_script_value`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;

/// Wire protocol spoken by an imposter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
    Tcp,
}

impl Protocol {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "http" => Some(Protocol::Http),
            "https" => Some(Protocol::Https),
            "tcp" => Some(Protocol::Tcp),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Tcp => "tcp",
        }
    }

    /// HTTP and HTTPS share request shape and response defaults.
    pub fn is_http(&self) -> bool {
        matches!(self, Protocol::Http | Protocol::Https)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoding of TCP payloads on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyMode {
    #[default]
    Text,
    /// Payload carried as base64 in requests and responses.
    Binary,
}

/// Canonical inbound request. Immutable once an adapter has built it.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub protocol: Protocol,
    pub method: String,
    pub path: String,
    pub query: BTreeMap<String, String>,
    /// Header names are lower-cased; repeated headers are joined with ", ".
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    /// Parsed `application/x-www-form-urlencoded` body, HTTP only.
    pub form: Option<BTreeMap<String, String>>,
    /// Raw payload for TCP, base64 encoded in binary mode.
    pub data: Option<String>,
    pub request_from: String,
    pub ip: String,
    pub timestamp: DateTime<Utc>,
}

impl Request {
    /// Create an empty HTTP-shaped request for the given client.
    pub fn http(protocol: Protocol, method: &str, path: &str, client: SocketAddr) -> Self {
        Self {
            protocol,
            method: method.to_string(),
            path: path.to_string(),
            query: BTreeMap::new(),
            headers: BTreeMap::new(),
            body: None,
            form: None,
            data: None,
            request_from: client.to_string(),
            ip: client.ip().to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Create a TCP request carrying one decoded payload.
    pub fn tcp(data: String, client: SocketAddr) -> Self {
        Self {
            protocol: Protocol::Tcp,
            method: String::new(),
            path: String::new(),
            query: BTreeMap::new(),
            headers: BTreeMap::new(),
            body: None,
            form: None,
            data: Some(data),
            request_from: client.to_string(),
            ip: client.ip().to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_query(mut self, query: BTreeMap<String, String>) -> Self {
        self.query = query;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        let name = name.to_ascii_lowercase();
        match self.headers.get_mut(&name) {
            Some(existing) => {
                existing.push_str(", ");
                existing.push_str(value);
            }
            None => {
                self.headers.insert(name, value.to_string());
            }
        }
        self
    }

    /// Attach a body. Form bodies are parsed when the content type says so.
    pub fn with_body(mut self, body: Option<String>) -> Self {
        let is_form = self
            .headers
            .get("content-type")
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
        if is_form {
            self.form = body.as_deref().map(parse_query_string);
        }
        self.body = body;
        self
    }

    /// JSON view handed to predicates and injected code.
    pub fn to_script_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("requestFrom".into(), Value::String(self.request_from.clone()));
        obj.insert("ip".into(), Value::String(self.ip.clone()));

        if !self.protocol.is_http() {
            obj.insert(
                "data".into(),
                Value::String(self.data.clone().unwrap_or_default()),
            );
            return Value::Object(obj);
        }

        obj.insert("method".into(), Value::String(self.method.clone()));
        obj.insert("path".into(), Value::String(self.path.clone()));
        obj.insert("query".into(), string_map(&self.query));
        obj.insert("headers".into(), string_map(&self.headers));
        obj.insert(
            "body".into(),
            Value::String(self.body.clone().unwrap_or_default()),
        );
        if let Some(form) = &self.form {
            obj.insert("form".into(), string_map(form));
        }
        Value::Object(obj)
    }
}

fn string_map(map: &BTreeMap<String, String>) -> Value {
    Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

/// Parse a query (or form) string, URL-decoding keys and values.
/// Repeated keys keep the last value.
pub fn parse_query_string(query: &str) -> BTreeMap<String, String> {
    query
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = key.replace('+', " ");
            let value = value.replace('+', " ");
            (
                urlencoding::decode(&key).map(|k| k.into_owned()).unwrap_or(key),
                urlencoding::decode(&value)
                    .map(|v| v.into_owned())
                    .unwrap_or(value),
            )
        })
        .collect()
}

/// Canonical outbound response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    /// HTTP body, or the TCP payload.
    pub body: String,
    #[serde(rename = "_mode")]
    pub mode: BodyMode,
}

impl Response {
    /// Defaults every partial response is merged over.
    pub fn defaults_for(protocol: Protocol) -> Self {
        let mut headers = BTreeMap::new();
        if protocol.is_http() {
            headers.insert("connection".to_string(), "close".to_string());
        }
        Self {
            status_code: 200,
            headers,
            body: String::new(),
            mode: BodyMode::Text,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> SocketAddr {
        "127.0.0.1:54321".parse().unwrap()
    }

    #[test]
    fn test_protocol_parse() {
        assert_eq!(Protocol::parse("http"), Some(Protocol::Http));
        assert_eq!(Protocol::parse("https"), Some(Protocol::Https));
        assert_eq!(Protocol::parse("tcp"), Some(Protocol::Tcp));
        assert_eq!(Protocol::parse("smtp"), None);
        assert!(Protocol::Https.is_http());
        assert!(!Protocol::Tcp.is_http());
    }

    #[test]
    fn test_headers_are_lower_cased_and_joined() {
        let req = Request::http(Protocol::Http, "GET", "/", client())
            .with_header("X-Trace", "a")
            .with_header("x-trace", "b");
        assert_eq!(req.headers.get("x-trace").map(String::as_str), Some("a, b"));
    }

    #[test]
    fn test_form_body_is_parsed() {
        let req = Request::http(Protocol::Http, "POST", "/login", client())
            .with_header("Content-Type", "application/x-www-form-urlencoded")
            .with_body(Some("user=bob+smith&pass=s%26cret".to_string()));
        let form = req.form.unwrap();
        assert_eq!(form.get("user").map(String::as_str), Some("bob smith"));
        assert_eq!(form.get("pass").map(String::as_str), Some("s&cret"));
    }

    #[test]
    fn test_http_script_value_shape() {
        let mut query = BTreeMap::new();
        query.insert("key".to_string(), "value".to_string());
        let req = Request::http(Protocol::Http, "POST", "/test", client())
            .with_query(query)
            .with_body(None);
        let value = req.to_script_value();
        assert_eq!(value["method"], "POST");
        assert_eq!(value["path"], "/test");
        assert_eq!(value["query"]["key"], "value");
        assert_eq!(value["body"], "");
        assert_eq!(value["requestFrom"], "127.0.0.1:54321");
        assert_eq!(value["ip"], "127.0.0.1");
        assert!(value.get("form").is_none());
    }

    #[test]
    fn test_tcp_script_value_shape() {
        let req = Request::tcp("hello".to_string(), client());
        let value = req.to_script_value();
        assert_eq!(value["data"], "hello");
        assert!(value.get("method").is_none());
    }

    #[test]
    fn test_parse_query_string_decodes() {
        let parsed = parse_query_string("a=1&b=x%2Cy&flag&&c=");
        assert_eq!(parsed.get("a").map(String::as_str), Some("1"));
        assert_eq!(parsed.get("b").map(String::as_str), Some("x,y"));
        assert_eq!(parsed.get("flag").map(String::as_str), Some(""));
        assert_eq!(parsed.get("c").map(String::as_str), Some(""));
    }

    #[test]
    fn test_http_defaults_close_connection() {
        let defaults = Response::defaults_for(Protocol::Http);
        assert_eq!(defaults.status_code, 200);
        assert_eq!(defaults.header("Connection"), Some("close"));
        assert!(defaults.body.is_empty());
        assert!(Response::defaults_for(Protocol::Tcp).headers.is_empty());
    }
}
