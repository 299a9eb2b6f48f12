//! Plain request/response descriptors exchanged with a response reader.

use std::{fmt, str::FromStr};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::spec::RequestContent;

/// Multi-valued string map used for query parameters, headers and forms.
pub type MultiMap = IndexMap<String, Vec<String>>;

/// HTTP methods an action may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Head,
    Delete,
    Trace,
    Connect,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown method: {0}")]
pub struct UnknownMethodError(pub String);

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Head => "HEAD",
            Self::Delete => "DELETE",
            Self::Trace => "TRACE",
            Self::Connect => "CONNECT",
        }
    }
}

impl FromStr for HttpMethod {
    type Err = UnknownMethodError;

    /// Parses a method name case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "HEAD" => Ok(Self::Head),
            "DELETE" => Ok(Self::Delete),
            "TRACE" => Ok(Self::Trace),
            "CONNECT" => Ok(Self::Connect),
            other => Err(UnknownMethodError(other.to_string())),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully resolved request, ready to hand to a response reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub tag: String,
    pub url: String,
    pub method: HttpMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<RequestContent>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub query: MultiMap,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub headers: MultiMap,
}

impl Request {
    pub fn new(tag: impl Into<String>, method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            url: url.into(),
            method,
            content: None,
            query: MultiMap::new(),
            headers: MultiMap::new(),
        }
    }

    /// First value of a query parameter, if any.
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query.get(name).and_then(|values| values.first()).map(String::as_str)
    }
}

/// Status code plus the fully read body, if the transport produced one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: Option<Vec<u8>>,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: Some(body.into()),
        }
    }

    /// A response with a status and no body.
    pub fn status_only(status: u16) -> Self {
        Self { status, body: None }
    }

    /// Synthetic failure used when a transport error is converted into a response.
    pub fn synthetic_failure() -> Self {
        Self {
            status: 500,
            body: Some(Vec::new()),
        }
    }
}
