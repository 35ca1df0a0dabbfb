// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! HTTP/1.1 Request
//!
//! A request may arrive split across several TCP reads, so `H1Request` owns
//! its parsed fields rather than borrowing from the caller's read buffer:
//! holding `&str`/`&[u8]` slices into a buffer that keeps growing (or gets
//! compacted) across reads would need self-referential lifetimes. Parsing
//! only proceeds once the full header block (ending in `b"\r\n\r\n"`) has
//! been buffered, so each field is allocated exactly once.

use core::str::from_utf8_unchecked;

use super::tokens::{is_header_name_token, is_header_value_token, is_request_target_token};
use super::{discard_required_whitespace, discard_whitespace, take_after_newline, Header, ParseError};
use crate::parser::raw_request::RawRequest;
use crate::parser::{Method, ParseResult, Status, Version};

/// Parsed H1 Request
/// IETF RFC 9112
#[derive(Debug, Default)]
pub struct H1Request {
    /// method
    pub method: Option<Method>,
    /// target
    pub target: Option<String>,
    /// version
    pub version: Option<Version>,
    /// headers, in wire order
    pub headers: Vec<Header>,
}

impl H1Request {
    /// Creates a new, empty HTTP/1.1 request.
    pub fn new() -> Self {
        H1Request {
            method: None,
            target: None,
            version: None,
            headers: Vec::new(),
        }
    }

    /// Parses a request out of `buf`.
    ///
    /// Returns [`Status::Partial`] if `buf` does not yet contain a full
    /// header block (no `b"\r\n\r\n"` terminator found), in which case the
    /// caller should read more bytes and retry with the same `self` and the
    /// enlarged buffer.
    ///
    /// # Example
    /// ```
    /// # use rproxy::parser::{Method, Version, Status};
    /// # use rproxy::parser::h1::ParseError;
    /// # use rproxy::parser::h1::request::H1Request;
    /// # fn main() -> Result<(), ParseError> {
    /// let mut req = H1Request::new();
    /// let status = req.parse(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n")?;
    /// assert!(status.is_complete());
    /// assert_eq!(Some(Method::Get), req.method);
    /// assert_eq!(Some("/".to_string()), req.target);
    /// assert_eq!(Some(Version::H1_1), req.version);
    /// # Ok(())
    /// # }
    /// ```
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<()> {
        if find_header_block_end(buf).is_none() {
            return Ok(Status::Partial);
        }

        let mut req = RawRequest::new(buf);
        self.set_method(&mut req)?;
        self.set_target(&mut req)?;
        self.set_version(&mut req)?;
        take_after_newline(&mut req)?;
        self.set_headers(&mut req)?;

        Ok(Status::Complete(()))
    }

    fn set_method(&mut self, buf: &mut RawRequest<'_>) -> Result<(), ParseError> {
        let slice = buf
            .take_until(|b| b == b' ')
            .ok_or(ParseError::Method)?;

        self.method = Some(Method::try_from(slice)?);
        discard_required_whitespace(buf).map_err(|_| ParseError::Method)?;
        Ok(())
    }

    fn set_target(&mut self, buf: &mut RawRequest<'_>) -> Result<(), ParseError> {
        for &b in buf.as_ref() {
            if b == b' ' {
                break;
            } else if !is_request_target_token(b) {
                return Err(ParseError::Target);
            }
        }

        let slice = buf.take_until(|b| b == b' ').ok_or(ParseError::Target)?;
        // SAFETY: every byte was checked against `is_request_target_token`,
        // which only accepts ASCII graphic characters.
        self.target = Some(unsafe { from_utf8_unchecked(slice) }.to_string());
        discard_required_whitespace(buf).map_err(|_| ParseError::Target)?;
        Ok(())
    }

    fn set_version(&mut self, buf: &mut RawRequest<'_>) -> Result<(), ParseError> {
        let slice = buf.take_until(|b| b == b'\r').ok_or(ParseError::Version)?;
        self.version = Some(Version::try_from(slice)?);
        Ok(())
    }

    fn set_headers(&mut self, buf: &mut RawRequest<'_>) -> Result<(), ParseError> {
        loop {
            // An empty line (bare CRLF) terminates the header block.
            if buf.peek() == Some(b'\r') {
                take_after_newline(buf)?;
                return Ok(());
            }

            let name = buf
                .take_until(|b| b == b':')
                .ok_or(ParseError::HeaderName)?;
            if name.is_empty() || !name.iter().all(|&b| is_header_name_token(b)) {
                return Err(ParseError::HeaderName);
            }
            buf.next(); // consume ':'
            buf.slice();

            discard_whitespace(buf);
            let value = buf
                .take_until(|b| b == b'\r')
                .unwrap_or_default();
            if !value.iter().all(|&b| is_header_value_token(b)) {
                return Err(ParseError::HeaderValue);
            }

            take_after_newline(buf)?;
            self.headers.push(Header::new(name, value));
        }
    }

    /// Looks up the first header matching `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&Header> {
        self.headers.iter().find(|h| h.name().eq_ignore_ascii_case(name))
    }

    /// The `Host` header value, if present.
    pub fn host(&self) -> Option<&str> {
        self.header("host").map(|h| {
            std::str::from_utf8(h.value()).unwrap_or_default()
        })
    }

    /// Parses `Content-Length`, if present.
    pub fn content_length(&self) -> Result<Option<u64>, ParseError> {
        match self.header("content-length") {
            Some(h) => {
                let s = std::str::from_utf8(h.value()).map_err(|_| ParseError::HeaderValue)?;
                s.trim()
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|_| ParseError::HeaderValue)
            }
            None => Ok(None),
        }
    }

    /// Whether `Transfer-Encoding` names `chunked` as its final coding.
    pub fn is_chunked(&self) -> bool {
        self.header("transfer-encoding")
            .map(|h| {
                h.value_str()
                    .rsplit(',')
                    .next()
                    .map(|c| c.trim().eq_ignore_ascii_case("chunked"))
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    /// Whether the client requested the connection stay open, honoring the
    /// per-version default and an explicit `Connection` header override.
    pub fn keep_alive(&self) -> bool {
        match self.header("connection") {
            Some(h) => !h.value_str().eq_ignore_ascii_case("close"),
            None => self.version.map(|v| v.keep_alive_by_default()).unwrap_or(false),
        }
    }
}

fn find_header_block_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Length of the header block (request line through the terminating blank
/// line, inclusive) at the start of `buf`, if a complete one is present.
/// Used by callers that need to drain exactly the bytes [`H1Request::parse`]
/// consumed, leaving any pipelined bytes that follow untouched.
pub fn head_len(buf: &[u8]) -> Option<usize> {
    find_header_block_end(buf).map(|idx| idx + 4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_get() {
        let mut req = H1Request::new();
        let status = req.parse(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n").unwrap();
        assert!(status.is_complete());
        assert_eq!(Some(Method::Get), req.method);
        assert_eq!(Some("/".to_string()), req.target);
        assert_eq!(Some(Version::H1_1), req.version);
        assert_eq!(Some("example.com"), req.host());
    }

    #[test]
    fn reports_partial_without_full_header_block() {
        let mut req = H1Request::new();
        let status = req.parse(b"GET / HTTP/1.1\r\nHost: example").unwrap();
        assert_eq!(Status::Partial, status);
    }

    #[test]
    fn parses_multiple_headers_in_order() {
        let mut req = H1Request::new();
        req.parse(b"POST /upload HTTP/1.1\r\nHost: a.com\r\nContent-Length: 4\r\n\r\n")
            .unwrap();
        assert_eq!(2, req.headers.len());
        assert_eq!(Some(4), req.content_length().unwrap());
    }

    #[test]
    fn rejects_invalid_method() {
        let mut req = H1Request::new();
        let err = req.parse(b"GE^T / HTTP/1.1\r\n\r\n").unwrap_err();
        assert_eq!(ParseError::Method, err);
    }

    #[test]
    fn detects_chunked_transfer_encoding() {
        let mut req = H1Request::new();
        req.parse(b"PUT /x HTTP/1.1\r\nTransfer-Encoding: gzip, chunked\r\n\r\n")
            .unwrap();
        assert!(req.is_chunked());
    }

    #[test]
    fn http_1_0_defaults_to_non_keep_alive() {
        let mut req = H1Request::new();
        req.parse(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        assert!(!req.keep_alive());
    }

    #[test]
    fn explicit_connection_close_overrides_http_1_1_default() {
        let mut req = H1Request::new();
        req.parse(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
        assert!(!req.keep_alive());
    }
}
