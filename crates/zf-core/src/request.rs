//! Request boundary
//!
//! The only place that knows how an incoming HTTP request or CLI invocation
//! is turned into the `(method, path)` pair the route table dispatches on.

use crate::{Error, Result};
use std::str::FromStr;
use zf_router::RouteSource;

/// Request method, including the synthetic `CLI` method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    Connect,
    Trace,
    Cli,
}

impl Method {
    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Connect => "CONNECT",
            Method::Trace => "TRACE",
            Method::Cli => zf_router::CLI_METHOD,
        }
    }
}

impl FromStr for Method {
    type Err = Error;

    /// Parse from string (case-insensitive)
    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "PATCH" => Ok(Method::Patch),
            "HEAD" => Ok(Method::Head),
            "OPTIONS" => Ok(Method::Options),
            "CONNECT" => Ok(Method::Connect),
            "TRACE" => Ok(Method::Trace),
            "CLI" => Ok(Method::Cli),
            _ => Err(Error::InvalidMethod(s.to_string())),
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Incoming request, reduced to what dispatch needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Request method
    pub method: Method,
    /// Request path (without query string)
    pub path: String,
    /// Query string (without leading ?)
    pub query: Option<String>,
}

impl Request {
    /// Create a new request
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: None,
        }
    }

    /// Build from a method name and a request URI, splitting off the query
    ///
    /// # Example
    /// ```
    /// use zf_core::{Method, Request};
    ///
    /// let req = Request::from_uri("get", "/users/42?format=json").unwrap();
    /// assert_eq!(req.method, Method::Get);
    /// assert_eq!(req.path, "/users/42");
    /// assert_eq!(req.query.as_deref(), Some("format=json"));
    /// ```
    pub fn from_uri(method: &str, uri: &str) -> Result<Self> {
        let method = method.parse()?;
        let uri: http::Uri = uri
            .parse()
            .map_err(|e: http::uri::InvalidUri| Error::InvalidPath(e.to_string()))?;
        Ok(Self {
            method,
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
        })
    }

    /// Build a `CLI` request from an argument vector (program name excluded)
    ///
    /// Arguments become path segments: `["extract", "out"]` dispatches as
    /// `/extract/out`.
    pub fn cli<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut path = String::new();
        for arg in args {
            path.push('/');
            path.push_str(arg.as_ref());
        }
        if path.is_empty() {
            path.push('/');
        }
        Self::new(Method::Cli, path)
    }

    /// Decoded query parameters, in order
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.query
            .as_deref()
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl RouteSource for Request {
    fn method(&self) -> &str {
        self.method.as_str()
    }

    fn path(&self) -> &str {
        &self.path
    }
}
