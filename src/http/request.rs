//! Incremental HTTP/1.x request parser.
//!
//! Parses directly over a connection's [`Stream`](crate::buffer::Stream)
//! via a [`Cursor`](crate::buffer::Cursor) — no copy into an
//! intermediate buffer. Each phase (method, URI, version, header
//! name/value) is bounded by [`ReqLimits`] so a client can never force
//! unbounded scanning or allocation.
//!
//! Parsing re-scans from the stream head on every call: the request
//! head is small (bounded by the same limits) so re-scanning after
//! each `recv` is cheap relative to the syscall that produced the new
//! bytes, and it avoids persisting a resumable state machine across
//! partial reads. The per-phase limits still bound worst-case work.

use crate::arena::Arena;
use crate::buffer::{to_static, Cursor, Stream};
use crate::errors::ErrorKind;
use crate::http::types::{slice_to_usize, to_lower_case, Header, HeaderMap, Method, Uri, Version};
use crate::limits::ReqLimits;
use memchr::memchr;

/// Outcome of one parse attempt over the bytes currently in the
/// stream.
#[derive(Debug, PartialEq)]
pub(crate) enum ParseStatus {
    /// The full request head is available; `body_offset` locates
    /// where the body (if any) begins within the stream.
    Complete,
    /// Not enough bytes have arrived yet; call again after the next
    /// successful `recv`.
    Incomplete,
}

enum Scan {
    Found { before: &'static [u8], consumed: usize },
    Incomplete,
    TooLong,
}

/// Advances `cursor` by `n` bytes, crossing into subsequent
/// already-appended links as needed. Callers must already know (e.g.
/// via [`peek_byte`]) that `n` bytes are available ahead of `cursor`.
fn advance(cursor: &mut Cursor, mut n: usize) {
    loop {
        let remaining = cursor.remaining_in_link().len();
        if n <= remaining {
            cursor.advance_within_link(n);
            if cursor.remaining_in_link().is_empty() {
                cursor.advance_link();
            }
            return;
        }
        n -= remaining;
        cursor.advance_within_link(remaining);
        if !cursor.advance_link() {
            return;
        }
    }
}

/// Looks `offset` bytes ahead of `cursor` without consuming anything,
/// crossing link boundaries if the lookahead window spans more than
/// one already-appended link. Returns `None` if that far ahead hasn't
/// arrived yet.
fn peek_byte(cursor: &Cursor, offset: usize) -> Option<u8> {
    let mut walk = *cursor;
    let mut remaining = offset;
    loop {
        let window = walk.remaining_in_link();
        if remaining < window.len() {
            return Some(window[remaining]);
        }
        remaining -= window.len();
        if !walk.advance_link() {
            return None;
        }
    }
}

/// Scans forward from `cursor` for `delim`, stopping with `TooLong` if
/// more than `max` bytes are scanned first. On `Found`, `cursor` is
/// advanced past the delimiter.
///
/// A token is usually found within `cursor`'s current link, in which
/// case `before` borrows directly from that link (zero-copy). When a
/// delimiter straddles a link boundary — the token's bytes have
/// arrived across more than one `recv`, appending more than one link —
/// the spanned bytes are accumulated and linearised into a single
/// fresh buffer in `arena`, sized exactly to the accumulated length, so
/// the caller still gets one contiguous slice.
fn scan(cursor: &mut Cursor, delim: u8, max: usize, arena: &Arena) -> Scan {
    let first = cursor.remaining_in_link();
    let bound = first.len().min(max + 1);
    if let Some(pos) = memchr(delim, &first[..bound]) {
        return if pos <= max {
            let before = &first[..pos];
            advance(cursor, pos + 1);
            Scan::Found { before, consumed: pos + 1 }
        } else {
            Scan::TooLong
        };
    }
    if first.len() > max {
        return Scan::TooLong;
    }
    if cursor.link.and_then(|l| l.next()).is_none() {
        return Scan::Incomplete;
    }

    let mut acc: Vec<u8> = Vec::with_capacity(first.len() + 64);
    acc.extend_from_slice(first);
    let mut walk = *cursor;
    loop {
        if !walk.advance_link() {
            return if acc.len() > max { Scan::TooLong } else { Scan::Incomplete };
        }
        let chunk = walk.remaining_in_link();
        let room = max + 1 - acc.len().min(max + 1);
        let window = &chunk[..chunk.len().min(room)];
        match memchr(delim, window) {
            Some(pos) => {
                acc.extend_from_slice(&chunk[..pos]);
                let linear = arena.alloc(acc.len());
                linear.copy_from_slice(&acc);
                let before: &'static [u8] = unsafe { to_static(&*linear) };
                advance(&mut walk, pos + 1);
                *cursor = walk;
                let consumed = before.len() + 1;
                return Scan::Found { before, consumed };
            }
            None => {
                if window.len() < chunk.len() {
                    return Scan::TooLong;
                }
                acc.extend_from_slice(chunk);
            }
        }
    }
}

fn is_blank_line(cursor: &Cursor) -> bool {
    peek_byte(cursor, 0) == Some(b'\r')
}

fn trim_leading_space(value: &[u8]) -> &[u8] {
    let mut v = value;
    while v.first() == Some(&b' ') {
        v = &v[1..];
    }
    v
}

/// A parsed HTTP/1.x request.
pub(crate) struct Request {
    pub(crate) method: Method,
    pub(crate) uri: Uri,
    pub(crate) version: Version,
    pub(crate) headers: HeaderMap,
    pub(crate) keep_alive: bool,
    /// Byte offset of the body within the stream, once known.
    pub(crate) body_offset: usize,
}

impl Request {
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        Request {
            method: Method::Get,
            uri: Uri::new(limits.uri_parts),
            version: Version::Http11,
            headers: HeaderMap::new(limits.header_count),
            keep_alive: true,
            body_offset: 0,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.uri.clear();
        self.headers.clear();
        self.keep_alive = true;
        self.body_offset = 0;
    }

    pub(crate) fn header(&self, name: &[u8]) -> Option<&[u8]> {
        self.headers.get(name)
    }

    pub(crate) fn content_length(&self) -> Option<usize> {
        self.headers.content_length
    }

    /// Attempts to parse a full request head from `stream`, starting
    /// at its first byte. On [`ParseStatus::Complete`], `self` holds
    /// the parsed head and `self.body_offset` is the stream-relative
    /// byte offset where the body (if any) begins.
    pub(crate) fn parse(
        &mut self,
        stream: &Stream,
        limits: &ReqLimits,
    ) -> Result<ParseStatus, ErrorKind> {
        self.clear();
        let arena = stream.arena();
        let mut cursor = Cursor::at_head(stream);
        let mut consumed_total = 0usize;

        // Method
        let method_bytes = match scan(&mut cursor, b' ', limits.method_size, arena) {
            Scan::Found { before, consumed } => {
                consumed_total += consumed;
                before
            }
            Scan::Incomplete => return Ok(ParseStatus::Incomplete),
            Scan::TooLong => return Err(ErrorKind::InvalidMethod),
        };
        // `Method::from_bytes` expects the trailing space still present.
        let mut rejoined = Vec::with_capacity(method_bytes.len() + 1);
        rejoined.extend_from_slice(method_bytes);
        rejoined.push(b' ');
        let (method, _) = Method::from_bytes(&rejoined)?;
        self.method = method;

        // URI
        let uri_bytes = match scan(&mut cursor, b' ', limits.uri_size, arena) {
            Scan::Found { before, consumed } => {
                consumed_total += consumed;
                before
            }
            Scan::Incomplete => return Ok(ParseStatus::Incomplete),
            Scan::TooLong => return Err(ErrorKind::UriTooLong),
        };
        parse_uri(uri_bytes, &mut self.uri, limits)?;

        // Version, terminated by \r\n
        let version_bytes = match scan(&mut cursor, b'\r', 16, arena) {
            Scan::Found { before, consumed } => {
                consumed_total += consumed;
                before
            }
            Scan::Incomplete => return Ok(ParseStatus::Incomplete),
            Scan::TooLong => return Err(ErrorKind::InvalidVersion),
        };
        if peek_byte(&cursor, 0).is_none() {
            return Ok(ParseStatus::Incomplete);
        }
        consumed_total += 1;
        advance(&mut cursor, 1);
        let (version, default_keep_alive) = Version::from_bytes(version_bytes)?;
        self.version = version;
        self.keep_alive = default_keep_alive;

        // Headers
        loop {
            if is_blank_line(&cursor) {
                if peek_byte(&cursor, 1).is_none() {
                    return Ok(ParseStatus::Incomplete);
                }
                consumed_total += 2;
                advance(&mut cursor, 2);
                break;
            }
            if self.headers.headers.len() >= limits.header_count {
                return Err(ErrorKind::TooManyHeaders);
            }

            let name_bytes = match scan(&mut cursor, b':', limits.header_name_size, arena) {
                Scan::Found { before, consumed } => {
                    consumed_total += consumed;
                    before
                }
                Scan::Incomplete => return Ok(ParseStatus::Incomplete),
                Scan::TooLong => return Err(ErrorKind::HeaderTooLarge),
            };
            if name_bytes.is_empty() {
                return Err(ErrorKind::InvalidHeader);
            }

            let raw_value = match scan(&mut cursor, b'\r', limits.header_value_size + 1, arena) {
                Scan::Found { before, consumed } => {
                    consumed_total += consumed;
                    before
                }
                Scan::Incomplete => return Ok(ParseStatus::Incomplete),
                Scan::TooLong => return Err(ErrorKind::HeaderTooLarge),
            };
            if peek_byte(&cursor, 0).is_none() {
                return Ok(ParseStatus::Incomplete);
            }
            consumed_total += 1;
            advance(&mut cursor, 1);

            let value = trim_leading_space(raw_value);
            let name_buf = arena.alloc(name_bytes.len());
            name_buf.copy_from_slice(name_bytes);
            to_lower_case(name_buf);
            let name: &'static [u8] = unsafe { to_static(&*name_buf) };

            if name == b"content-length" {
                let n = slice_to_usize(value).ok_or(ErrorKind::InvalidContentLength)?;
                if n > limits.body_size {
                    return Err(ErrorKind::BodyTooLarge);
                }
                self.headers.content_length = Some(n);
            } else if name == b"connection" {
                self.keep_alive = !value.eq_ignore_ascii_case(b"close");
            }

            self.headers.headers.push(Header::new(name, value));
        }

        self.body_offset = consumed_total;
        Ok(ParseStatus::Complete)
    }
}

fn parse_uri(target: &'static [u8], uri: &mut Uri, limits: &ReqLimits) -> Result<(), ErrorKind> {
    uri.target = target;

    let (path, query) = match memchr(b'?', target) {
        Some(pos) => (&target[..pos], Some(&target[pos + 1..])),
        None => (target, None),
    };
    uri.path = path;
    uri.query = query;

    for segment in path.split(|&b| b == b'/').filter(|s| !s.is_empty()) {
        if uri.parts.len() >= limits.uri_parts {
            return Err(ErrorKind::TooManyUriParts);
        }
        uri.parts.push(segment);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_complete(raw: &[u8]) -> Request {
        // Leaked for the test's duration only, mirroring how a real
        // connection keeps its arena alive behind a heap box
        // (`connection.rs`) for as long as data borrowed from it is in
        // use — `req`'s fields borrow from this arena and must outlive
        // this function.
        let arena: &'static Arena = Box::leak(Box::new(Arena::create(4096)));
        let stream = Stream::new(arena);
        stream.append_data(raw, raw.len());
        let limits = ReqLimits::default();
        let mut req = Request::new(&limits);
        match req.parse(&stream, &limits).unwrap() {
            ParseStatus::Complete => req,
            ParseStatus::Incomplete => panic!("expected a complete parse"),
        }
    }

    #[test]
    fn parses_simple_get_request() {
        let req = parse_complete(b"GET /foo/bar?x=1 HTTP/1.1\r\nHost: example.com\r\n\r\n");
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.uri.path(), b"/foo/bar");
        assert_eq!(req.uri.query(b"x"), Some(&b"1"[..]));
        assert_eq!(req.header(b"host"), Some(&b"example.com"[..]));
        assert_eq!(req.version, Version::Http11);
        assert!(req.keep_alive);
    }

    /// A header name/value pair arriving split across two `recv`s (two
    /// distinct stream links, with no spare tail capacity to absorb the
    /// second write) must still be parsed as one contiguous token via
    /// linearisation, not stall forever.
    #[test]
    fn header_split_across_a_link_boundary_is_linearised() {
        let arena: &'static Arena = Box::leak(Box::new(Arena::create(4096)));
        let stream = Stream::new(arena);
        stream.append_data(b"GET / HTTP/1.1\r\nX-Long-Head", 28);
        stream.append_data(b"er-Name: value\r\n\r\n", 18);

        let limits = ReqLimits::default();
        let mut req = Request::new(&limits);
        match req.parse(&stream, &limits).unwrap() {
            ParseStatus::Complete => {}
            ParseStatus::Incomplete => panic!("delimiter spanning a link boundary stalled the parse"),
        }
        assert_eq!(req.header(b"x-long-header-name"), Some(&b"value"[..]));
    }

    /// Same as above but the split falls inside the URI token itself.
    #[test]
    fn uri_split_across_a_link_boundary_is_linearised() {
        let arena: &'static Arena = Box::leak(Box::new(Arena::create(4096)));
        let stream = Stream::new(arena);
        stream.append_data(b"GET /foo/b", 10);
        stream.append_data(b"ar HTTP/1.1\r\n\r\n", 15);

        let limits = ReqLimits::default();
        let mut req = Request::new(&limits);
        match req.parse(&stream, &limits).unwrap() {
            ParseStatus::Complete => {}
            ParseStatus::Incomplete => panic!("delimiter spanning a link boundary stalled the parse"),
        }
        assert_eq!(req.uri.path(), b"/foo/bar");
    }

    #[test]
    fn returns_incomplete_for_partial_head() {
        let arena = Arena::create(4096);
        let stream = Stream::new(&arena);
        stream.append_data(b"GET /foo HTTP/1.1\r\nHost: ex", 4096);
        let limits = ReqLimits::default();
        let mut req = Request::new(&limits);
        assert_eq!(req.parse(&stream, &limits).unwrap(), ParseStatus::Incomplete);
    }

    #[test]
    fn connection_close_disables_keep_alive() {
        let req = parse_complete(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n");
        assert!(!req.keep_alive);
    }

    #[test]
    fn content_length_is_parsed_and_bounded() {
        let req = parse_complete(b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello");
        assert_eq!(req.content_length(), Some(5));
    }

    #[test]
    fn oversized_uri_is_rejected() {
        let arena = Arena::create(8192);
        let stream = Stream::new(&arena);
        let mut raw = b"GET /".to_vec();
        raw.extend(std::iter::repeat(b'a').take(5000));
        raw.extend_from_slice(b" HTTP/1.1\r\n\r\n");
        stream.append_data(&raw, raw.len());
        let limits = ReqLimits::default();
        let mut req = Request::new(&limits);
        assert_eq!(req.parse(&stream, &limits), Err(ErrorKind::UriTooLong));
    }

    #[test]
    fn too_many_headers_is_rejected() {
        let arena = Arena::create(16384);
        let stream = Stream::new(&arena);
        let mut raw = b"GET / HTTP/1.1\r\n".to_vec();
        for i in 0..200 {
            raw.extend_from_slice(format!("X-{i}: v\r\n").as_bytes());
        }
        raw.extend_from_slice(b"\r\n");
        stream.append_data(&raw, raw.len());
        let limits = ReqLimits::default();
        let mut req = Request::new(&limits);
        assert_eq!(req.parse(&stream, &limits), Err(ErrorKind::TooManyHeaders));
    }
}
