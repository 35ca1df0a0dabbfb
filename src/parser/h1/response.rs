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

//! Response model

use crate::parser::{status::Status as StatusCode, Version};

use super::Header;

/// An HTTP/1.1 response, built up for serialization to the wire.
#[derive(Debug)]
pub struct Response {
    version: Version,
    status: StatusCode,
    headers: Vec<Header>,
    body: Vec<u8>,
}

impl Response {
    /// Starts a response with the given status line.
    pub fn new_with_status_line(version: Version, status: StatusCode) -> Self {
        Response {
            version,
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Appends a header, consuming and returning `self` for chaining.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push(Header::new(name.as_bytes(), value.as_bytes()));
        self
    }

    /// Sets the response body, consuming and returning `self` for chaining.
    /// Does not set `Content-Length`; callers add that header explicitly so
    /// chunked/streamed responses aren't forced through this buffer-it-all path.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// The status code of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Serializes the status line, headers, and body onto the wire format.
    pub fn get_serialized(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128 + self.body.len());
        out.extend_from_slice(self.version.to_string().as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.status.to_string().as_bytes());
        out.push(b' ');
        out.extend_from_slice(reason_phrase(self.status).as_bytes());
        out.extend_from_slice(b"\r\n");

        for header in &self.headers {
            out.extend_from_slice(header.name().as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(header.value());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

/// The canonical reason phrase for a status code, per RFC 9110 §15.
fn reason_phrase(status: StatusCode) -> &'static str {
    use StatusCode::*;
    match status {
        Continue => "Continue",
        SwitchingProtocols => "Switching Protocols",
        Ok => "OK",
        Created => "Created",
        Accepted => "Accepted",
        NonAuthoritativeInformation => "Non-Authoritative Information",
        NoContent => "No Content",
        ResetContent => "Reset Content",
        PartialContent => "Partial Content",
        MultipleChoices => "Multiple Choices",
        MovedPermanently => "Moved Permanently",
        Found => "Found",
        SeeOther => "See Other",
        NotModified => "Not Modified",
        UseProxy => "Use Proxy",
        TemporaryRedirect => "Temporary Redirect",
        PermanentRedirect => "Permanent Redirect",
        BadRequest => "Bad Request",
        Unauthorized => "Unauthorized",
        PaymentRequired => "Payment Required",
        Forbidden => "Forbidden",
        NotFound => "Not Found",
        MethodNotAllowed => "Method Not Allowed",
        NotAcceptable => "Not Acceptable",
        ProxyAuthenticationRequired => "Proxy Authentication Required",
        RequestTimeout => "Request Timeout",
        Conflict => "Conflict",
        Gone => "Gone",
        LengthRequired => "Length Required",
        PreconditionFailed => "Precondition Failed",
        ContentTooLarge => "Content Too Large",
        UriTooLong => "URI Too Long",
        UnsupportedMediaType => "Unsupported Media Type",
        RangeNotSatisfiable => "Range Not Satisfiable",
        ExpectationFailed => "Expectation Failed",
        MisdirectedRequest => "Misdirected Request",
        UnprocessableContent => "Unprocessable Content",
        UpgradeRequired => "Upgrade Required",
        InternalServerError => "Internal Server Error",
        NotImplemented => "Not Implemented",
        BadGateway => "Bad Gateway",
        ServiceUnavailable => "Service Unavailable",
        GatewayTimeout => "Gateway Timeout",
        HTTPVersionNotSupported => "HTTP Version Not Supported",
    }
}
