//! Per-connection state.
//!
//! A `Connection` owns a heap-boxed [`Arena`] and a receive [`Stream`]
//! borrowing from it with its lifetime erased to `'static` — the same
//! technique documented in `buffer.rs`'s `to_static`. The box is never
//! dropped before the connection is, and the `Arena` itself never
//! moves once boxed, so the erased borrow stays sound even as the
//! `Connection` value itself is moved around a `HashMap`.

use crate::arena::Arena;
use crate::buffer::Stream;
use crate::http::request::{ParseStatus, Request};
use crate::limits::ReqLimits;
use std::net::{SocketAddr, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Instant;

/// Tracks an in-progress, possibly-partial write of a response output
/// chain, so the worker can resume after `EAGAIN` without re-invoking
/// the handler (the router's `CALL_ONCE` contract).
pub(crate) struct PendingWrite {
    pub(crate) cursor: crate::buffer::Cursor,
}

pub(crate) struct Connection {
    pub(crate) id: u64,
    /// Owns the accepted socket: dropping the connection closes it.
    pub(crate) stream: TcpStream,
    pub(crate) client_addr: SocketAddr,
    pub(crate) server_addr: SocketAddr,
    pub(crate) arena: Box<Arena>,
    pub(crate) receive_stream: Stream<'static>,
    pub(crate) request: Request,
    pub(crate) created_at: Instant,
    pub(crate) last_activity: Instant,
    pub(crate) requests_served: u64,
    pub(crate) pending_write: Option<PendingWrite>,
    /// Set once the request head has been committed to the receive
    /// stream and parsing should resume from it, rather than from an
    /// empty stream, on the next readable event.
    pub(crate) awaiting_more_data: bool,
}

impl Connection {
    pub(crate) fn new(
        id: u64,
        stream: TcpStream,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
        limits: &ReqLimits,
    ) -> Self {
        let arena = Box::new(Arena::create(limits.initial_buffer_size()));
        // SAFETY: see module docs — `arena`'s heap allocation is stable
        // for the life of this `Connection`, independent of where the
        // `Connection` value itself is stored or moved.
        let arena_ref: &'static Arena = unsafe { std::mem::transmute::<&Arena, &'static Arena>(&arena) };
        let receive_stream = Stream::new(arena_ref);
        let now = Instant::now();
        Connection {
            id,
            stream,
            client_addr,
            server_addr,
            arena,
            receive_stream,
            request: Request::new(limits),
            created_at: now,
            last_activity: now,
            requests_served: 0,
            pending_write: None,
            awaiting_more_data: false,
        }
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    /// Reserves spare capacity in the receive stream for a `recv` call
    /// and returns it, following the tail-fill rule: extend the tail
    /// buffer if it still has room, else start a fresh ~4 KiB link.
    pub(crate) fn recv_target(&self) -> &mut [u8] {
        if let Some(spare) = self.receive_stream.tail_spare() {
            if !spare.is_empty() {
                return spare;
            }
        }
        self.receive_stream.append_data(&[], 4096);
        self.receive_stream.tail_spare().expect("just-appended buffer has spare capacity")
    }

    pub(crate) fn commit_recv(&mut self, n: usize) {
        self.receive_stream.commit_tail(n);
        self.last_activity = Instant::now();
    }

    /// Attempts to parse the next request head from the accumulated
    /// receive stream.
    pub(crate) fn try_parse(&mut self, limits: &ReqLimits) -> Result<ParseStatus, crate::errors::ErrorKind> {
        self.request.parse(&self.receive_stream, limits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, TcpListener};

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
    }

    fn dummy_stream() -> TcpStream {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = listener.local_addr().unwrap();
        TcpStream::connect(addr).unwrap()
    }

    #[test]
    fn recv_target_then_parse_completes_a_request() {
        let limits = ReqLimits::default();
        let mut conn = Connection::new(1, dummy_stream(), addr(), addr(), &limits);

        let raw = b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n";
        let target = conn.recv_target();
        target[..raw.len()].copy_from_slice(raw);
        conn.commit_recv(raw.len());

        match conn.try_parse(&limits).unwrap() {
            ParseStatus::Complete => {}
            ParseStatus::Incomplete => panic!("expected a complete parse"),
        }
        assert_eq!(conn.request.uri.path(), b"/hello");
    }

    #[test]
    fn split_recv_across_two_calls_still_parses() {
        let limits = ReqLimits::default();
        let mut conn = Connection::new(2, dummy_stream(), addr(), addr(), &limits);

        let first = b"GET /a HTTP/1.1\r\n";
        let t1 = conn.recv_target();
        t1[..first.len()].copy_from_slice(first);
        conn.commit_recv(first.len());
        assert_eq!(conn.try_parse(&limits).unwrap(), ParseStatus::Incomplete);

        let second = b"Host: x\r\n\r\n";
        let t2 = conn.recv_target();
        t2[..second.len()].copy_from_slice(second);
        conn.commit_recv(second.len());
        assert_eq!(conn.try_parse(&limits).unwrap(), ParseStatus::Complete);
    }
}
