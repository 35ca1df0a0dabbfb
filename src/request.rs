//! The proxy's own request representation.
//!
//! [`crate::parser::h1::request::H1Request`] is the wire-parsing state
//! machine; [`RequestContext`] is what the router and filter chain actually
//! operate on once a request has fully arrived — it carries the parsed
//! head plus everything accumulated while the request is routed and
//! proxied (matched vhost/rule names, timing, and per-request filter
//! state), and can be rebuilt into wire bytes once any header rewrites
//! have been applied.

use std::net::SocketAddr;

use crate::filter_state::FilterState;
use crate::parser::h1::Header;
use crate::parser::{Method, Version};
use crate::stream_info::StreamInfo;
use crate::transport_socket::SslConnectionInfo;

/// A fully-parsed request plus the proxy-local state accumulated while it's
/// routed and forwarded.
pub struct RequestContext {
    /// HTTP method, once the request head has been parsed.
    pub method: Option<Method>,
    /// Request target (origin-form path + query), once parsed.
    pub target: Option<String>,
    /// HTTP version, once parsed.
    pub version: Option<Version>,
    /// Request headers, in wire order. Filters may append, remove, or
    /// rewrite entries here before the request is forwarded upstream.
    pub headers: Vec<Header>,
    /// Address of the downstream client, used for `X-Forwarded-For`.
    pub client_addr: Option<SocketAddr>,
    /// TLS session information, when the client connection is terminated
    /// over TLS, for the `X-SSL-*` header policy (§4.4).
    pub ssl_info: Option<SslConnectionInfo>,
    /// Name of the vhost this request was routed to, once matched.
    pub matched_vhost: Option<String>,
    /// Name of the upstream group the matched rule selected, once routed.
    pub matched_upstream_group: Option<String>,
    /// Per-request filter state (cleared between requests on the same
    /// connection, unlike connection-scoped state).
    pub filter_state: FilterState,
    /// Timing and outcome bookkeeping for this request.
    pub stream_info: StreamInfo,
}

impl RequestContext {
    /// Creates an empty context, ready to be filled in as the request head
    /// is parsed and routed.
    pub fn new() -> Self {
        RequestContext {
            method: None,
            target: None,
            version: None,
            headers: Vec::new(),
            client_addr: None,
            ssl_info: None,
            matched_vhost: None,
            matched_upstream_group: None,
            filter_state: FilterState::new(crate::filter_state::LifeSpan::Request),
            stream_info: StreamInfo::new(),
        }
    }

    /// The request path, stripped of any query string.
    pub fn path(&self) -> Option<&str> {
        self.target.as_deref().map(|t| t.split('?').next().unwrap_or(t))
    }

    /// Looks up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&Header> {
        self.headers.iter().find(|h| h.name() == name.to_ascii_lowercase())
    }

    /// Removes every header with the given case-insensitive name, reporting
    /// how many were removed (used by [`crate::config::HeaderPolicy`]'s
    /// `strip_headers`).
    pub fn strip_header(&mut self, name: &str) -> usize {
        let name = name.to_ascii_lowercase();
        let before = self.headers.len();
        self.headers.retain(|h| h.name() != name);
        before - self.headers.len()
    }

    /// Appends a header, without checking for an existing entry under the
    /// same name (callers that need replace-semantics should `strip_header`
    /// first).
    pub fn add_header(&mut self, name: &str, value: &[u8]) {
        self.headers.push(Header::new(name.as_bytes(), value));
    }

    /// The `Host` header value, if present.
    pub fn host(&self) -> Option<String> {
        self.header("host").map(|h| h.value_str().into_owned())
    }

    /// Serializes the request line and headers back onto the wire, after
    /// any filter has rewritten them, for forwarding to the selected origin.
    /// Bodies are streamed separately rather than buffered here.
    pub fn serialize(&self) -> Vec<u8> {
        let method = self.method.map(|m| m.to_string()).unwrap_or_default();
        let target = self.target.as_deref().unwrap_or("/");
        let version = self.version.unwrap_or(crate::parser::Version::H1_1);

        let mut out = Vec::with_capacity(128);
        out.extend_from_slice(method.as_bytes());
        out.push(b' ');
        out.extend_from_slice(target.as_bytes());
        out.push(b' ');
        out.extend_from_slice(version.to_string().as_bytes());
        out.extend_from_slice(b"\r\n");
        for header in &self.headers {
            out.extend_from_slice(header.name().as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(header.value());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_strips_query_string() {
        let mut ctx = RequestContext::new();
        ctx.target = Some("/widgets?id=5".to_string());
        assert_eq!(Some("/widgets"), ctx.path());
    }

    #[test]
    fn strip_header_removes_case_insensitively() {
        let mut ctx = RequestContext::new();
        ctx.add_header("X-Debug", b"1");
        assert_eq!(1, ctx.strip_header("x-debug"));
        assert!(ctx.header("x-debug").is_none());
    }

    #[test]
    fn host_reads_back_added_header() {
        let mut ctx = RequestContext::new();
        ctx.add_header("Host", b"example.com");
        assert_eq!(Some("example.com".to_string()), ctx.host());
    }

    #[test]
    fn serialize_round_trips_request_line_and_headers() {
        use crate::parser::{Method, Version};

        let mut ctx = RequestContext::new();
        ctx.method = Some(Method::Get);
        ctx.target = Some("/widgets".to_string());
        ctx.version = Some(Version::H1_1);
        ctx.add_header("Host", b"example.com");

        let bytes = ctx.serialize();
        assert!(bytes.starts_with(b"GET /widgets HTTP/1.1\r\n"));
        assert!(bytes.windows(4).any(|w| w == b"\r\n\r\n"));
    }
}
