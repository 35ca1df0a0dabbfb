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

//! H1 parser implementation

pub mod request;
pub mod response;
pub mod tokens;

pub use super::{discard_newline, discard_required_whitespace, discard_whitespace};
pub use super::{ParseError, ParseResult, Status};

use super::raw_request::RawRequest;

/// A single parsed header: a lowercased field name and its raw value bytes.
///
/// The name is lowercased at parse time per RFC 9110 §5.1 ("field names are
/// case-insensitive"), so every later lookup (`Host`, `Content-Length`,
/// `Connection`, ...) is a single case-sensitive comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    name: String,
    value: Vec<u8>,
}

impl Header {
    /// Builds a header from raw wire bytes, lowercasing the name.
    pub fn new(name: &[u8], value: &[u8]) -> Self {
        Header {
            name: String::from_utf8_lossy(&name.to_ascii_lowercase()).into_owned(),
            value: value.to_vec(),
        }
    }

    /// The lowercased header name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw header value bytes.
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// The header value interpreted as UTF-8, lossily.
    pub fn value_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.value)
    }
}

/// Consumes the newline that terminates the request-line (or a header line),
/// leaving `buf` positioned at the start of the next line.
#[inline]
pub fn take_after_newline(buf: &mut RawRequest<'_>) -> Result<(), ParseError> {
    discard_newline(buf)
}
