//! Per-process event loop.
//!
//! One [`Worker`] runs in each forked child: it owns every listen
//! socket for the distinct ports across the configured virtual hosts,
//! the event multiplexer, and the table of live connections. `run`
//! blocks on `wait`, then drives each ready descriptor through
//! accept/recv/send. There is no thread pool and no lock on the hot
//! path — see the module docs in `lib.rs`.

use crate::connection::Connection;
use crate::errors::ErrorKind;
use crate::event::{Interest, Multiplexer, ReadyEvent};
use crate::http::request::ParseStatus;
use crate::http::response::Response;
use crate::http::types::Version;
use crate::limits::{ConnLimits, ReqLimits, ServerLimits};
use crate::router::Router;
use crate::vhost::Host;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};

/// Set by the worker's own SIGTERM/SIGINT handler; checked once per
/// loop iteration so the current event batch always finishes cleanly.
pub(crate) static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn request_shutdown(_signum: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Installs this worker's own SIGTERM/SIGINT → [`SHUTDOWN`] handlers.
/// Called once per child right after `fork`, replacing whatever the
/// master installed in the parent before the fork.
pub(crate) fn install_signal_handlers() {
    // SAFETY: `request_shutdown` only stores to an atomic and is
    // async-signal-safe; `libc::signal` is the simplest portable way
    // to install it (no `sigaction` flags are needed here).
    unsafe {
        libc::signal(libc::SIGTERM, request_shutdown as *const () as libc::sighandler_t);
        libc::signal(libc::SIGINT, request_shutdown as *const () as libc::sighandler_t);
        libc::signal(libc::SIGHUP, libc::SIG_IGN);
    }
}

const MAX_EVENTS: usize = 256;
const POLL_TIMEOUT_MS: i32 = 1000;

pub(crate) struct Worker {
    mux: Multiplexer,
    listeners: HashMap<RawFd, (TcpListener, SocketAddr)>,
    connections: HashMap<RawFd, Connection>,
    hosts: Vec<Host>,
    router: Router,
    req_limits: ReqLimits,
    server_limits: ServerLimits,
    #[allow(dead_code)]
    conn_limits: ConnLimits,
    next_conn_id: u64,
}

// SAFETY: a `Worker` is driven exclusively by a single owning
// thread/process for its entire lifetime (one per forked child in
// production, one per spawned thread in integration tests) and is
// never accessed concurrently or shared by reference; its internal
// arenas use unsynchronized interior mutability because they are
// never meant to be touched from more than one thread at once, not
// because they are tied to the thread that created them. Moving the
// whole value across a thread boundary exactly once, before it is
// used, is therefore sound even though the compiler cannot prove it.
unsafe impl Send for Worker {}

impl Worker {
    pub(crate) fn new(
        hosts: Vec<Host>,
        router: Router,
        req_limits: ReqLimits,
        server_limits: ServerLimits,
        conn_limits: ConnLimits,
    ) -> io::Result<Self> {
        let mux = Multiplexer::new()?;
        let mut listeners = HashMap::new();
        let mut bound_ports = std::collections::HashSet::new();
        for host in &hosts {
            if !bound_ports.insert(host.port) {
                continue;
            }
            let want = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, host.port));
            let listener = bind_listener(want)?;
            let fd = listener.as_raw_fd();
            let bound = listener.local_addr()?;
            mux.add(fd, fd as u64, Interest::READABLE)?;
            tracing::info!(port = bound.port(), "listening");
            listeners.insert(fd, (listener, bound));
        }
        Ok(Worker {
            mux,
            listeners,
            connections: HashMap::new(),
            hosts,
            router,
            req_limits,
            server_limits,
            conn_limits,
            next_conn_id: 0,
        })
    }

    /// The actual bound address of one of this worker's listeners —
    /// ephemeral-port-friendly, used by integration tests that bind to
    /// port 0 and need to learn what the kernel picked.
    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.listeners.values().next().expect("at least one listener").1
    }

    /// Blocks on the event multiplexer until `SHUTDOWN` is set.
    pub(crate) fn run(&mut self) {
        let mut events = vec![
            ReadyEvent {
                token: 0,
                readiness: Interest::empty()
            };
            MAX_EVENTS
        ];
        while !SHUTDOWN.load(Ordering::Relaxed) {
            let n = match self.mux.wait(&mut events, POLL_TIMEOUT_MS) {
                Ok(n) => n,
                Err(err) => {
                    tracing::error!(%err, "event wait failed");
                    continue;
                }
            };
            for ev in &events[..n] {
                let fd = ev.token as RawFd;
                if self.listeners.contains_key(&fd) {
                    self.accept_until_would_block(fd);
                    continue;
                }
                if ev.readiness.contains(Interest::HANGUP) || ev.readiness.contains(Interest::READ_HANGUP) {
                    self.connections.remove(&fd);
                    continue;
                }
                if ev.readiness.contains(Interest::WRITABLE) {
                    self.on_writable(fd);
                }
                if ev.readiness.contains(Interest::READABLE) {
                    self.on_readable(fd);
                }
            }
        }
        tracing::info!("worker shutting down");
    }

    fn accept_until_would_block(&mut self, listener_fd: RawFd) {
        let server_addr = self.listeners[&listener_fd].1;
        loop {
            if self.connections.len() >= self.server_limits.max_connections_per_worker {
                tracing::warn!("connection table full, pausing accept");
                break;
            }
            let accepted = self.listeners[&listener_fd].0.accept();
            let (stream, client_addr) = match accepted {
                Ok(pair) => pair,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    tracing::warn!(%err, "accept failed");
                    break;
                }
            };
            if let Err(err) = stream.set_nonblocking(true) {
                tracing::warn!(%err, "set_nonblocking failed on accepted socket");
                continue;
            }
            let fd = stream.as_raw_fd();
            self.next_conn_id += 1;
            let conn = Connection::new(self.next_conn_id, stream, client_addr, server_addr, &self.req_limits);
            if let Err(err) = self.mux.add(fd, fd as u64, Interest::READABLE) {
                tracing::warn!(%err, "failed to register accepted connection");
                continue;
            }
            self.connections.insert(fd, conn);
        }
    }

    fn on_readable(&mut self, fd: RawFd) {
        loop {
            let Some(conn) = self.connections.get_mut(&fd) else { return };
            let target = conn.recv_target();
            match (&conn.stream).read(target) {
                Ok(0) => {
                    self.connections.remove(&fd);
                    return;
                }
                Ok(n) => {
                    conn.commit_recv(n);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(_) => {
                    self.connections.remove(&fd);
                    return;
                }
            }
        }
        self.try_advance(fd);
    }

    /// Attempts to parse the request head currently buffered on `fd`
    /// and dispatch it, then drains as much of the response as the
    /// socket accepts without blocking.
    fn try_advance(&mut self, fd: RawFd) {
        let Some(conn) = self.connections.get_mut(&fd) else { return };
        if conn.pending_write.is_none() {
            match conn.try_parse(&self.req_limits) {
                Ok(ParseStatus::Incomplete) => {}
                Ok(ParseStatus::Complete) => self.dispatch_one(fd),
                Err(kind) => {
                    self.send_parse_error(fd, kind);
                    return;
                }
            }
        }
        self.flush(fd);
    }

    fn dispatch_one(&mut self, fd: RawFd) {
        let Some(conn) = self.connections.get_mut(&fd) else { return };
        let host = select_host(&self.hosts, &conn.request);

        let response_pool = conn.arena.child();
        let mut response = Response::new(response_pool, conn.request.version);
        self.router.dispatch(host, response_pool, &conn.request, &mut response);
        conn.requests_served += 1;

        let cursor = crate::buffer::Cursor::at_head(&response.out);
        conn.pending_write = Some(crate::connection::PendingWrite { cursor });
        self.arm_write(fd);
    }

    fn send_parse_error(&mut self, fd: RawFd, kind: ErrorKind) {
        let version = self
            .connections
            .get(&fd)
            .map(|c| c.request.version)
            .unwrap_or(Version::Http11);
        let wire = kind.as_http(version, self.server_limits.json_errors);
        if let Some(conn) = self.connections.get_mut(&fd) {
            use io::Write as _;
            let _ = (&conn.stream).write_all(wire);
        }
        self.connections.remove(&fd);
    }

    fn arm_write(&mut self, fd: RawFd) {
        if let Err(err) = self.mux.modify(fd, fd as u64, Interest::READABLE | Interest::WRITABLE) {
            tracing::warn!(%err, "failed to arm write interest");
        }
    }

    fn on_writable(&mut self, fd: RawFd) {
        self.flush(fd);
    }

    /// Drains as much of the pending response as the socket accepts
    /// without blocking. Per the router's `CALL_ONCE` contract, this
    /// never re-invokes the handler — it only resumes the cursor left
    /// by `dispatch_one`.
    fn flush(&mut self, fd: RawFd) {
        loop {
            let Some(conn) = self.connections.get_mut(&fd) else { return };
            let Some(pending) = conn.pending_write.as_mut() else { return };

            let Some(link) = pending.cursor.link else {
                conn.pending_write = None;
                self.finish_response(fd);
                return;
            };

            let result = match &link.buf {
                crate::buffer::Buffer::File { fd: src_fd, offset, len } => {
                    let remaining = *len as usize - pending.cursor.offset;
                    if remaining == 0 {
                        Ok(0)
                    } else {
                        send_file(*src_fd, conn.stream.as_raw_fd(), *offset + pending.cursor.offset as u64, remaining)
                    }
                }
                _ => {
                    let chunk = pending.cursor.remaining_in_link();
                    if chunk.is_empty() {
                        Ok(0)
                    } else {
                        write_chunk(&conn.stream, chunk)
                    }
                }
            };

            match result {
                Ok(0) => {
                    if !pending.cursor.advance_link() {
                        conn.pending_write = None;
                        self.finish_response(fd);
                        return;
                    }
                }
                Ok(n) => {
                    pending.cursor.advance_within_link(n);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    self.arm_write(fd);
                    return;
                }
                Err(_) => {
                    self.connections.remove(&fd);
                    return;
                }
            }
        }
    }

    fn finish_response(&mut self, fd: RawFd) {
        let _ = self.mux.modify(fd, fd as u64, Interest::READABLE);
        // Per spec §4.6.3: the current implementation closes every
        // connection once its response is fully sent; `keep_alive` is
        // parsed but not yet acted on.
        self.connections.remove(&fd);
    }
}

use std::io::Read as _;

fn write_chunk(stream: &std::net::TcpStream, chunk: &[u8]) -> io::Result<usize> {
    use io::Write as _;
    let mut stream = stream;
    stream.write(chunk)
}

/// Sends up to `len` bytes of `src_fd` starting at `offset` to
/// `dst_fd` via `sendfile`. Advancing `offset` across repeated calls is
/// the caller's job (tracked by the response cursor instead).
#[cfg(target_os = "linux")]
fn send_file(src_fd: RawFd, dst_fd: RawFd, offset: u64, len: usize) -> io::Result<usize> {
    let mut off = offset as libc::off_t;
    // SAFETY: both descriptors are owned and open for the duration of
    // this call: `src_fd` by the response arena's attached `File`,
    // `dst_fd` by the connection's `TcpStream`.
    let n = unsafe { libc::sendfile(dst_fd, src_fd, &mut off, len) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

/// BSD/macOS `sendfile` has a different signature (and writes through
/// an optional header/trailer struct); a plain `pread`+`write` pair is
/// simpler and still zero-copies only one side, which is an acceptable
/// fallback outside the primary Linux target.
#[cfg(not(target_os = "linux"))]
fn send_file(src_fd: RawFd, dst_fd: RawFd, offset: u64, len: usize) -> io::Result<usize> {
    let want = len.min(64 * 1024);
    let mut buf = vec![0u8; want];
    // SAFETY: `src_fd` is a valid open file descriptor for the
    // duration of this call, owned by the response arena.
    let read = unsafe { libc::pread(src_fd, buf.as_mut_ptr() as *mut _, want, offset as libc::off_t) };
    if read < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `dst_fd` is the connection's own socket descriptor.
    let written = unsafe { libc::write(dst_fd, buf.as_ptr() as *const _, read as usize) };
    if written < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(written as usize)
}

/// Picks the virtual host matching the request's `Host` header,
/// falling back to the configured default.
fn select_host<'a>(hosts: &'a [Host], request: &crate::http::request::Request) -> &'a Host {
    if let Some(h) = request.header(b"host") {
        if let Some(host) = hosts.iter().find(|h2| h2.matches(h)) {
            return host;
        }
    }
    hosts.iter().find(|h| h.is_default).unwrap_or(&hosts[0])
}

fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_reuse_port(true)?;
    socket.bind(&SockAddr::from(addr))?;
    socket.listen(libc::SOMAXCONN)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}
