//! The request view the security pipeline works on.
//!
//! # Responsibilities
//! - Capture method, path, scheme, host and client IP once per request
//! - Parse cookies and url-encoded form fields up front
//! - Stay independent of the body type so the pipeline can run off the
//!   async executor
//!
//! # Design Decisions
//! - Built from axum request parts plus the buffered body
//! - Immutable once built; listeners only read it

use axum::http::{header, request::Parts, HeaderMap, HeaderName, HeaderValue, Method};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};

use crate::http::cookie::parse_cookie_header;

/// Transport channel of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Http,
    Https,
}

impl Channel {
    pub fn scheme(&self) -> &'static str {
        match self {
            Channel::Http => "http",
            Channel::Https => "https",
        }
    }
}

/// An inbound request as seen by the firewall.
#[derive(Debug, Clone)]
pub struct SecurityRequest {
    method: Method,
    path: String,
    query: Option<String>,
    channel: Channel,
    host: Option<String>,
    client_ip: IpAddr,
    headers: HeaderMap,
    cookies: HashMap<String, String>,
    form: HashMap<String, String>,
}

impl SecurityRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: None,
            channel: Channel::Http,
            host: None,
            client_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            headers: HeaderMap::new(),
            cookies: HashMap::new(),
            form: HashMap::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Build from axum request parts and the buffered body.
    pub fn from_parts(parts: &Parts, body: &[u8], client_ip: IpAddr) -> Self {
        let mut request = Self::new(parts.method.clone(), parts.uri.path());
        request.query = parts.uri.query().map(str::to_owned);
        request.client_ip = client_ip;
        request.headers = parts.headers.clone();
        request.host = parts
            .uri
            .host()
            .map(str::to_owned)
            .or_else(|| {
                parts
                    .headers
                    .get(header::HOST)
                    .and_then(|h| h.to_str().ok())
                    .map(|h| h.split(':').next().unwrap_or(h).to_string())
            });
        request.channel = match parts.uri.scheme_str() {
            Some("https") => Channel::Https,
            _ => Channel::Http,
        };

        for value in parts.headers.get_all(header::COOKIE) {
            if let Ok(raw) = value.to_str() {
                request.cookies.extend(parse_cookie_header(raw));
            }
        }

        let is_form = parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
            .unwrap_or(false);
        if is_form {
            request.form = url::form_urlencoded::parse(body).into_owned().collect();
        }

        request
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    pub fn with_form(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.form.insert(name.into(), value.into());
        self
    }

    /// Add a header. Invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = ip;
        self
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn client_ip(&self) -> IpAddr {
        self.client_ip
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn form_field(&self, name: &str) -> Option<&str> {
        self.form.get(name).map(String::as_str)
    }

    /// Path plus query string.
    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }

    /// The same URL on another channel, when the host is known.
    pub fn url_on(&self, channel: Channel) -> Option<String> {
        let host = self.host.as_deref()?;
        Some(format!("{}://{}{}", channel.scheme(), host, self.path_and_query()))
    }

    pub fn is_xml_http_request(&self) -> bool {
        self.header("x-requested-with") == Some("XMLHttpRequest")
    }
}
