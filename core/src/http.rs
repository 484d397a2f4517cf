//! HTTP request/response types exchanged between `AlmaApi` and an executor.
//!
//! # Design
//! Requests and responses are plain data. `AlmaApi` builds an `HttpRequest`
//! and parses an `HttpResponse` without touching the network; an
//! `HttpExecutor` performs the round-trip in between. Tests can therefore
//! check URL, header and query construction, and error decoding, with no
//! socket involved.

/// A GET request described as plain data.
///
/// Built by `AlmaApi::build_get`. `url` is absolute; `query` pairs are
/// appended by the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
}

impl HttpRequest {
    /// First header value with this name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// First query parameter value with this name.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }
}

/// An HTTP response described as plain data. Headers are not kept.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
