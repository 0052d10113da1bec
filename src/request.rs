//! HTTP request descriptor.

use bytes::Bytes;
use http::Method;
use url::Url;

use crate::error::{Error, Result};
use crate::pool::Endpoint;

/// An HTTP request: method, URL, headers (in order) and optional body.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl Request {
    /// Create a request. Only `http` and `https` URLs with a host are accepted.
    pub fn new(method: Method, url: &str) -> Result<Self> {
        let url = Url::parse(url)?;
        Endpoint::from_url(&url)?;
        Ok(Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
        })
    }

    /// Create a GET request.
    pub fn get(url: &str) -> Result<Self> {
        Self::new(Method::GET, url)
    }

    /// Create a POST request.
    pub fn post(url: &str) -> Result<Self> {
        Self::new(Method::POST, url)
    }

    /// Add a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Endpoint this request is sent to.
    pub fn endpoint(&self) -> Result<Endpoint> {
        Endpoint::from_url(&self.url)
    }

    /// Path and query, as sent in origin-form.
    pub fn path_and_query(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{}", self.url.path(), query),
            None => self.url.path().to_string(),
        }
    }

    /// Absolute URL without fragment, as sent in absolute-form to a proxy.
    pub fn absolute_target(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        url.to_string()
    }

    /// Check for a header, case-insensitively.
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }
}

impl TryFrom<&str> for Request {
    type Error = Error;

    fn try_from(url: &str) -> Result<Self> {
        Self::get(url)
    }
}
