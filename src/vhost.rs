//! Virtual host configuration.
//!
//! One [`Host`] per configured `host(...) { ... }` block: the
//! name/port this host answers to, its document root, and whether it
//! is the fallback for connections whose `Host` header (or absence of
//! one) doesn't match any other configured host.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub(crate) struct Host {
    pub(crate) hostname: String,
    pub(crate) port: u16,
    pub(crate) docroot: PathBuf,
    pub(crate) is_default: bool,
    /// Per-host minimum log level override; `None` inherits the
    /// top-level `logging` block.
    pub(crate) log_level: Option<String>,
}

impl Host {
    pub(crate) fn matches(&self, host_header: &[u8]) -> bool {
        let (name, port) = match host_header.iter().position(|&b| b == b':') {
            Some(pos) => (&host_header[..pos], std::str::from_utf8(&host_header[pos + 1..]).ok().and_then(|s| s.parse().ok())),
            None => (host_header, None),
        };
        name.eq_ignore_ascii_case(self.hostname.as_bytes()) && port.unwrap_or(self.port) == self.port
    }
}

#[cfg(test)]
impl Host {
    pub(crate) fn default_for_test(_pool: &crate::arena::Arena) -> Self {
        Host {
            hostname: "localhost".to_string(),
            port: 8080,
            docroot: std::env::temp_dir(),
            is_default: true,
            log_level: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_hostname_case_insensitively_with_default_port() {
        let host = Host {
            hostname: "Example.com".into(),
            port: 80,
            docroot: PathBuf::from("/var/www"),
            is_default: false,
            log_level: None,
        };
        assert!(host.matches(b"example.com"));
        assert!(host.matches(b"example.com:80"));
        assert!(!host.matches(b"example.com:8080"));
    }
}
