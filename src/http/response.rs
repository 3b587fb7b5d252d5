//! HTTP/1.x response builder.
//!
//! A response is built by setting a status and headers, then calling
//! exactly one of the terminal body methods ([`body`](Response::body),
//! [`body_static`](Response::body_static), [`file_body`](Response::file_body),
//! or [`begin_chunked`](Response::begin_chunked) followed by
//! [`chunk`](Response::chunk)/[`end_chunked`](Response::end_chunked)).
//! The builder appends directly to an output [`Stream`]; nothing is
//! copied to the socket here — `worker.rs` drains the stream with a
//! [`Cursor`](crate::buffer::Cursor), using `sendfile` for `File`
//! links.
//!
//! Build responses by chaining methods in strict order:
//! `status()` -> `header()`* -> one terminal body call.

use crate::arena::Arena;
use crate::buffer::Stream;
use crate::http::types::{Method, StatusCode, Version};
use std::io::Write as _;
use std::os::unix::io::RawFd;

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    Building,
    Chunked,
    Done,
}

/// Builds one HTTP/1.x response as an output [`Stream`].
pub(crate) struct Response<'a> {
    pub(crate) out: Stream<'a>,
    version: Version,
    status: StatusCode,
    headers: Vec<(&'static [u8], &'static [u8])>,
    no_send_body: bool,
    state: State,
}

impl<'a> Response<'a> {
    pub(crate) fn new(pool: &'a Arena, version: Version) -> Self {
        Response {
            out: Stream::new(pool),
            version,
            status: StatusCode::Ok,
            headers: Vec::new(),
            no_send_body: false,
            state: State::Building,
        }
    }

    pub(crate) fn status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    pub(crate) fn header(&mut self, name: &'static [u8], value: &'static [u8]) -> &mut Self {
        self.headers.push((name, value));
        self
    }

    /// Suppresses body frames while still emitting an accurate
    /// `Content-Length` — set for `HEAD` and `CONNECT` per
    /// [`Method::forbids_response_body`].
    pub(crate) fn no_send_body_for(&mut self, method: Method) -> &mut Self {
        self.no_send_body = method.forbids_response_body();
        self
    }

    /// Finalizes headers and body for a plain, in-memory response.
    pub(crate) fn body(&mut self, bytes: &[u8]) {
        self.emit_head(Some(bytes.len()), false);
        if !self.no_send_body {
            self.out.append_data(bytes, bytes.len());
        }
        self.out.close();
        self.state = State::Done;
    }

    /// Finalizes headers and body for a `'static` literal (autoindex
    /// templates, canned error pages).
    pub(crate) fn body_static(&mut self, bytes: &'static [u8]) {
        self.emit_head(Some(bytes.len()), false);
        if !self.no_send_body {
            self.out.append_borrowed(bytes);
        }
        self.out.close();
        self.state = State::Done;
    }

    /// Finalizes headers and body as a file range to be sent via
    /// `sendfile`.
    pub(crate) fn file_body(&mut self, fd: RawFd, offset: u64, len: u64) {
        self.emit_head(Some(len as usize), false);
        if !self.no_send_body {
            self.out.append_file(fd, offset, len);
        }
        self.out.close();
        self.state = State::Done;
    }

    /// Finalizes headers for a chunked response; body frames are
    /// appended with [`chunk`](Self::chunk) and terminated with
    /// [`end_chunked`](Self::end_chunked).
    pub(crate) fn begin_chunked(&mut self) -> &mut Self {
        self.emit_head(None, true);
        self.state = State::Chunked;
        self
    }

    /// Appends one chunk frame: `<hex-len>\r\n<bytes>\r\n`.
    pub(crate) fn chunk(&mut self, bytes: &[u8]) {
        debug_assert_eq!(self.state, State::Chunked);
        if self.no_send_body || bytes.is_empty() {
            return;
        }
        let mut framed = Vec::with_capacity(bytes.len() + 20);
        write!(framed, "{:x}\r\n", bytes.len()).unwrap();
        framed.extend_from_slice(bytes);
        framed.extend_from_slice(b"\r\n");
        self.out.append_data(&framed, framed.len());
    }

    /// Appends the terminal zero-length chunk and closes the stream.
    pub(crate) fn end_chunked(&mut self) {
        debug_assert_eq!(self.state, State::Chunked);
        if !self.no_send_body {
            self.out.append_borrowed(b"0\r\n\r\n");
        }
        self.out.close();
        self.state = State::Done;
    }

    fn emit_head(&mut self, content_length: Option<usize>, chunked: bool) {
        debug_assert_eq!(self.state, State::Building);
        let status_line = self.status.into_first_line(self.version);

        let mut head = Vec::with_capacity(256);
        head.extend_from_slice(status_line);
        head.extend_from_slice(b"server: originhttpd\r\n");
        if chunked {
            head.extend_from_slice(b"transfer-encoding: chunked\r\n");
        } else if let Some(n) = content_length {
            write!(head, "content-length: {n}\r\n").unwrap();
        }
        for (name, value) in &self.headers {
            head.extend_from_slice(name);
            head.extend_from_slice(b": ");
            head.extend_from_slice(value);
            head.extend_from_slice(b"\r\n");
        }
        head.extend_from_slice(b"\r\n");

        self.out.append_data(&head, head.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Cursor;

    fn drain(stream: &Stream) -> Vec<u8> {
        let mut cur = Cursor::at_head(stream);
        let mut out = Vec::new();
        loop {
            out.extend_from_slice(cur.remaining_in_link());
            if !cur.advance_link() {
                break;
            }
        }
        out
    }

    #[test]
    fn plain_body_carries_exact_content_length() {
        let arena = Arena::create(4096);
        let mut resp = Response::new(&arena, Version::Http11);
        resp.status(StatusCode::Ok)
            .header(b"content-type", b"text/plain");
        resp.body(b"hello");

        let wire = drain(&resp.out);
        let text = std::str::from_utf8(&wire).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("content-length: 5\r\n"));
        assert!(text.ends_with("hello"));
    }

    #[test]
    fn head_request_suppresses_body_but_keeps_content_length() {
        let arena = Arena::create(4096);
        let mut resp = Response::new(&arena, Version::Http11);
        resp.status(StatusCode::Ok).no_send_body_for(Method::Head);
        resp.body(b"hello world");

        let wire = drain(&resp.out);
        let text = std::str::from_utf8(&wire).unwrap();
        assert!(text.contains("content-length: 11\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn chunked_response_frames_each_chunk_and_terminates() {
        let arena = Arena::create(4096);
        let mut resp = Response::new(&arena, Version::Http11);
        resp.status(StatusCode::Ok).begin_chunked();
        resp.chunk(b"abc");
        resp.chunk(b"de");
        resp.end_chunked();

        let wire = drain(&resp.out);
        let text = std::str::from_utf8(&wire).unwrap();
        assert!(text.contains("transfer-encoding: chunked\r\n"));
        assert!(text.ends_with("3\r\nabc\r\n2\r\nde\r\n0\r\n\r\n"));
    }
}
