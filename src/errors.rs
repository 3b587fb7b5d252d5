//! Error taxonomy.
//!
//! Two disjoint kinds, matching the split in the data model: a
//! per-request [`ErrorKind`] that a connection's parse/route/respond
//! cycle can always recover from by writing an error response and
//! moving on (it never unwinds), and a startup/config [`ConfigError`]
//! that is allowed to propagate with `?` all the way to `main`.

use crate::http::types::Version;
use std::{error, fmt, io};

/// Per-request error. Never panics the process; the connection layer
/// turns each variant into a wire response via [`ErrorKind::as_http`]
/// and then either keeps the connection alive or closes it.
#[derive(Debug, PartialEq)]
pub(crate) enum ErrorKind {
    InvalidMethod,
    UriTooLong,
    TooManyUriParts,

    InvalidVersion,
    UnsupportedVersion,

    InvalidHeader,
    TooManyHeaders,
    HeaderTooLarge,
    InvalidContentLength,

    BodyTooLarge,

    ServiceUnavailable,
    Io(IoError),
}

macro_rules! http_errors {
    ($($name:ident: $status_code:expr, $len:literal => $json:literal; )*) => {
        pub(crate) const fn as_http(&self, version: Version, json: bool) -> &'static [u8] {
            match (json, self, version) { $(
                (true, Self::$name { .. }, Version::Http11) => concat!(
                    "HTTP/1.1 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: ", $len, "\r\n",
                    "content-type: application/json\r\n",
                    "\r\n",
                    $json
                ),
                (false, Self::$name { .. }, Version::Http11) => concat!(
                    "HTTP/1.1 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: 0\r\n\r\n",
                ),
                (true, Self::$name { .. }, Version::Http10) => concat!(
                    "HTTP/1.0 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: ", $len, "\r\n",
                    "content-type: application/json\r\n",
                    "\r\n",
                    $json
                ),
                (false, Self::$name { .. }, Version::Http10) => concat!(
                    "HTTP/1.0 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: 0\r\n\r\n",
                ),
            )* }.as_bytes()
        }
    };
}

impl ErrorKind {
    http_errors! {
        InvalidMethod: "400 Bad Request", "55"
            => r#"{"error":"Invalid HTTP method","code":"INVALID_METHOD"}"#;
        UriTooLong: "414 URI Too Long", "48"
            => r#"{"error":"Request URI too long","code":"URI_TOO_LONG"}"#;
        TooManyUriParts: "414 URI Too Long", "50"
            => r#"{"error":"Request URI too complex","code":"URI_TOO_COMPLEX"}"#;

        InvalidVersion: "400 Bad Request", "57"
            => r#"{"error":"Invalid HTTP version","code":"INVALID_VERSION"}"#;
        UnsupportedVersion: "505 HTTP Version Not Supported", "67"
            => r#"{"error":"HTTP version not supported","code":"UNSUPPORTED_VERSION"}"#;

        InvalidHeader: "400 Bad Request", "57"
            => r#"{"error":"Invalid header format","code":"INVALID_HEADER"}"#;
        TooManyHeaders: "431 Request Header Fields Too Large", "54"
            => r#"{"error":"Too many headers","code":"TOO_MANY_HEADERS"}"#;
        HeaderTooLarge: "431 Request Header Fields Too Large", "52"
            => r#"{"error":"Header line too large","code":"HEADER_TOO_LARGE"}"#;
        InvalidContentLength: "400 Bad Request", "66"
            => r#"{"error":"Invalid Content-Length","code":"INVALID_CONTENT_LENGTH"}"#;

        BodyTooLarge: "413 Payload Too Large", "58"
            => r#"{"error":"Request body too large","code":"BODY_TOO_LARGE"}"#;

        ServiceUnavailable: "503 Service Unavailable", "72"
            => r#"{"error":"Service temporarily unavailable","code":"SERVICE_UNAVAILABLE"}"#;
        Io: "503 Service Unavailable", "48"
            => r#"{"error":"I/O error occurred","code":"IO_ERROR"}"#;
    }
}

impl error::Error for ErrorKind {}
impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<io::Error> for ErrorKind {
    fn from(err: io::Error) -> Self {
        ErrorKind::Io(IoError(err))
    }
}

#[derive(Debug)]
pub(crate) struct IoError(pub(crate) io::Error);

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

/// Startup and configuration failures. These are allowed to unwind via
/// `?` to `main`, which reports them and exits with a non-zero status.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path}:{line}: {message}")]
    Syntax {
        path: std::path::PathBuf,
        line: usize,
        message: String,
    },

    #[error("include of {pattern:?} at {path}:{line} forms a cycle")]
    RecursiveInclude {
        path: std::path::PathBuf,
        line: usize,
        pattern: String,
    },

    #[error("no default host declared (exactly one `host` block must set `default yes`)")]
    NoDefaultHost,

    #[error("more than one default host declared: {first} and {second}")]
    MultipleDefaultHosts { first: String, second: String },

    #[error("invalid listen address {0:?}: expected host:port")]
    InvalidListenAddress(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_renders_json_body_with_matching_content_length() {
        let wire = ErrorKind::BodyTooLarge.as_http(Version::Http11, true);
        let text = std::str::from_utf8(wire).unwrap();
        let body = text.split("\r\n\r\n").nth(1).unwrap();
        let declared: usize = text
            .lines()
            .find_map(|l| l.strip_prefix("content-length: "))
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(body.len(), declared);
    }

    #[test]
    fn error_kind_non_json_has_no_body() {
        let wire = ErrorKind::InvalidMethod.as_http(Version::Http10, false);
        assert!(wire.ends_with(b"content-length: 0\r\n\r\n"));
    }

    #[test]
    fn io_error_equality_compares_kind_only() {
        let a = IoError(io::Error::new(io::ErrorKind::TimedOut, "a"));
        let b = IoError(io::Error::new(io::ErrorKind::TimedOut, "b"));
        assert_eq!(a, b);
    }
}
