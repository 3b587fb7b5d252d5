//! Per-phase size limits for request parsing and response buffering.
//!
//! Every field here bounds one phase of the request lifecycle so a
//! client can never force unbounded memory growth: the method, the
//! URI, the version, each header name/value, the header count, and the
//! body. Defaults are generous for a static file server but still
//! finite.

/// Limits applied while parsing one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReqLimits {
    /// Maximum bytes in the request line's method token.
    pub method_size: usize,
    /// Maximum bytes in the request-target (URI) component.
    pub uri_size: usize,
    /// Maximum `/`-delimited path segments kept for routing.
    pub uri_parts: usize,
    /// Maximum number of header lines.
    pub header_count: usize,
    /// Maximum bytes in one header name.
    pub header_name_size: usize,
    /// Maximum bytes in one header value.
    pub header_value_size: usize,
    /// Maximum request body size, in bytes.
    pub body_size: usize,
}

impl Default for ReqLimits {
    fn default() -> Self {
        ReqLimits {
            method_size: 16,
            uri_size: 4096,
            uri_parts: 64,
            header_count: 100,
            header_name_size: 128,
            header_value_size: 8192,
            body_size: 128 * 1024 * 1024,
        }
    }
}

impl ReqLimits {
    /// A reasonable initial receive-buffer size: big enough to hold a
    /// typical request line and header block without growing, without
    /// wasting a full `uri_size + header budget` for every connection.
    pub fn initial_buffer_size(&self) -> usize {
        (self.method_size + self.uri_size + 16 + self.header_count * 64).min(16 * 1024)
    }
}

/// Limits applied to outgoing responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RespLimits {
    /// Default capacity reserved for a response's header buffer.
    pub default_capacity: usize,
    /// Upper bound on a response's header buffer before it is
    /// considered a programming error (headers never come from
    /// untrusted input in this server, so this guards against bugs,
    /// not attackers).
    pub max_capacity: usize,
}

impl Default for RespLimits {
    fn default() -> Self {
        RespLimits {
            default_capacity: 512,
            max_capacity: 64 * 1024,
        }
    }
}

/// Per-connection timeouts and request-count ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnLimits {
    /// Seconds of read inactivity before a connection is closed.
    pub read_timeout_secs: u64,
    /// Seconds allowed for a single write to drain.
    pub write_timeout_secs: u64,
    /// Maximum requests served on one keep-alive connection.
    pub max_requests_per_connection: u64,
    /// Maximum lifetime of one connection, in seconds, regardless of
    /// activity (bounds worst-case slow-loris-style connections).
    pub max_connection_lifetime_secs: u64,
}

impl Default for ConnLimits {
    fn default() -> Self {
        ConnLimits {
            read_timeout_secs: 30,
            write_timeout_secs: 30,
            max_requests_per_connection: 1000,
            max_connection_lifetime_secs: 300,
        }
    }
}

/// Process- and worker-wide resource limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerLimits {
    /// Maximum simultaneously open connections per worker process.
    pub max_connections_per_worker: usize,
    /// Whether error bodies are JSON (`true`) or an empty
    /// `Connection: close` response (`false`).
    pub json_errors: bool,
}

impl Default for ServerLimits {
    fn default() -> Self {
        ServerLimits {
            max_connections_per_worker: 10_000,
            json_errors: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_buffer_size_is_capped() {
        let mut limits = ReqLimits::default();
        limits.header_count = 10_000;
        assert!(limits.initial_buffer_size() <= 16 * 1024);
    }
}
