//! Representation of the requested HTTP version

use std::fmt::Display;

use super::ParseError;

/// Representation of the requested HTTP version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    /// HTTP/1.0
    H1_0,
    /// HTTP/1.1
    H1_1,
    /// HTTP/2
    H2,
    /// HTTP/3
    H3,
}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::H1_0 => "HTTP/1.0",
            Self::H1_1 => "HTTP/1.1",
            Self::H2 => "HTTP/2",
            Self::H3 => "HTTP/3",
        })
    }
}

impl TryFrom<&[u8]> for Version {
    type Error = ParseError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        match value {
            b"HTTP/1.0" => Ok(Self::H1_0),
            b"HTTP/1.1" => Ok(Self::H1_1),
            b"HTTP/2" | b"HTTP/2.0" => Ok(Self::H2),
            b"HTTP/3" | b"HTTP/3.0" => Ok(Self::H3),
            _ => Err(ParseError::Version),
        }
    }
}

impl Version {
    /// Whether this version keeps connections open by default absent a
    /// `Connection` header override (HTTP/1.1+; HTTP/1.0 defaults to close).
    pub fn keep_alive_by_default(&self) -> bool {
        !matches!(self, Self::H1_0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_from_recognizes_http11_and_http10() {
        assert_eq!(Ok(Version::H1_1), Version::try_from(b"HTTP/1.1".as_slice()));
        assert_eq!(Ok(Version::H1_0), Version::try_from(b"HTTP/1.0".as_slice()));
    }

    #[test]
    fn try_from_rejects_garbage() {
        assert_eq!(Err(ParseError::Version), Version::try_from(b"HTCPCP/1.0".as_slice()));
    }

    #[test]
    fn http_1_0_does_not_keep_alive_by_default() {
        assert!(!Version::H1_0.keep_alive_by_default());
        assert!(Version::H1_1.keep_alive_by_default());
    }
}
