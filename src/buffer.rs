//! Buffer chain (stream): the singly-linked list of byte regions that
//! backs both a connection's receive stream and a response's output
//! chain.
//!
//! A [`Buffer`] is one of: an arena-owned, still-writable memory span
//! (`Memory`), a borrowed read-only slice that isn't arena-owned at all
//! (`StaticMemory` — used for literal templates and the canned
//! "parent directory" autoindex row), or a file descriptor range meant
//! to be sent with `sendfile` (`File`). A [`Link`] wraps one `Buffer`
//! plus structural flags; a [`Stream`] is the ordered chain of links,
//! walked forward-only through a [`Cursor`].
//!
//! Links are appended, never removed — consumers track their own
//! position via a `Cursor` rather than mutating the chain.

use crate::arena::Arena;
use std::cell::Cell;
use std::os::unix::io::RawFd;

/// Erases a reference's lifetime to `'static`.
///
/// # Safety
/// The referent must be owned by storage that outlives every derived
/// `'static` reference. In this crate that storage is always a
/// heap-boxed, never-moved per-connection [`Arena`] — see
/// `connection.rs`, which boxes the arena once at connection creation
/// and never relocates it. All `'static` references produced here are
/// used only while that connection is alive.
#[inline(always)]
pub(crate) unsafe fn to_static<T: ?Sized>(r: &T) -> &'static T {
    std::mem::transmute(r)
}

/// An arena-owned, still-growable memory span.
///
/// `len <= cap` always. `ptr` points at a region inside an `Arena`
/// chunk (or a large allocation), which never moves once handed out,
/// so raw-pointer access through `Cell<usize>`-tracked `len` is sound
/// for the lifetime of the owning arena.
pub struct MemoryBuf {
    ptr: *mut u8,
    cap: usize,
    len: Cell<usize>,
    read_only: bool,
}

impl MemoryBuf {
    fn new(ptr: *mut u8, cap: usize, len: usize, read_only: bool) -> Self {
        MemoryBuf {
            ptr,
            cap,
            len: Cell::new(len),
            read_only,
        }
    }

    pub fn len(&self) -> usize {
        self.len.get()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn committed(&self) -> &[u8] {
        // SAFETY: `[0, len)` has always been written to: either by
        // `Stream::append_data`'s initial copy, or by a prior
        // `commit_tail` following a caller write into `spare_mut`.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len.get()) }
    }

    /// The writable region beyond the committed bytes — where a
    /// non-blocking `recv` should write directly, per the stream's
    /// tail-fill rule.
    #[allow(clippy::mut_from_ref)]
    pub fn spare_mut(&self) -> &mut [u8] {
        let len = self.len.get();
        // SAFETY: `[len, cap)` is reserved capacity inside the owning
        // arena chunk; no other live reference aliases it because the
        // connection's receive loop is the sole writer.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.add(len), self.cap - len) }
    }

    fn commit(&self, n: usize) {
        self.len.set((self.len.get() + n).min(self.cap));
    }
}

/// A tagged I/O buffer: either bytes, or a file range to be sent
/// zero-copy via `sendfile`.
pub enum Buffer {
    /// Arena-owned, currently-writable span.
    Memory(MemoryBuf),
    /// Borrowed, read-only, not arena-owned (e.g. literal templates).
    StaticMemory(&'static [u8]),
    /// A byte range of an open file descriptor.
    File { fd: RawFd, offset: u64, len: u64 },
}

impl Buffer {
    pub fn len(&self) -> usize {
        match self {
            Buffer::Memory(m) => m.len(),
            Buffer::StaticMemory(s) => s.len(),
            Buffer::File { len, .. } => *len as usize,
        }
    }

    /// Byte view for the two memory-backed variants. Panics for
    /// `File`, which never appears on an inbound receive stream (only
    /// on an outbound response chain, where the parser never looks).
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Buffer::Memory(m) => unsafe { to_static(m.committed()) },
            Buffer::StaticMemory(s) => s,
            Buffer::File { .. } => unreachable!("file buffers carry no in-memory bytes"),
        }
    }
}

/// One node in a buffer chain. Immutable after being appended, except
/// for a `Memory` buffer's own committed length, which may still grow
/// while this link remains the stream's tail.
pub struct Link {
    pub buf: Buffer,
    next: Cell<Option<&'static Link>>,
    pub is_eos: bool,
    pub is_start: bool,
}

impl Link {
    pub fn next(&self) -> Option<&'static Link> {
        self.next.get()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }
}

/// The ordered chain of links forming one connection's receive stream
/// or one response's output chain. Single-writer, single-reader.
pub struct Stream<'a> {
    arena: &'a Arena,
    head: Cell<Option<&'static Link>>,
    tail: Cell<Option<&'static Link>>,
    total: Cell<usize>,
}

impl<'a> Stream<'a> {
    pub fn new(arena: &'a Arena) -> Self {
        Stream {
            arena,
            head: Cell::new(None),
            tail: Cell::new(None),
            total: Cell::new(0),
        }
    }

    /// The arena this stream's owned links are allocated from — lets a
    /// consumer (e.g. the request parser) allocate its own derived
    /// data with the same lifetime as the stream's bytes, instead of
    /// leaking.
    pub fn arena(&self) -> &'a Arena {
        self.arena
    }

    pub fn head(&self) -> Option<&'static Link> {
        self.head.get()
    }

    pub fn tail(&self) -> Option<&'static Link> {
        self.tail.get()
    }

    pub fn total(&self) -> usize {
        self.total.get()
    }

    fn push(&self, buf: Buffer, is_eos: bool) -> &'static Link {
        let added = buf.len();
        let link = Link {
            buf,
            next: Cell::new(None),
            is_eos,
            is_start: self.head.get().is_none(),
        };
        let stored = self.arena.attach(link);
        // SAFETY: see `to_static` — `stored` is owned by `self.arena`,
        // which outlives this stream.
        let stored: &'static Link = unsafe { to_static(stored) };
        match self.tail.get() {
            Some(tail) => tail.next.set(Some(stored)),
            None => self.head.set(Some(stored)),
        }
        self.tail.set(Some(stored));
        self.total.set(self.total.get() + added);
        stored
    }

    /// Copies `len` bytes from `src` into a fresh arena-owned memory
    /// buffer sized for `cap` total bytes, so the receive loop can
    /// later `recv` directly into the spare capacity without a new
    /// link.
    pub fn append_data(&self, src: &[u8], cap: usize) -> &'static Link {
        let cap = cap.max(src.len());
        let mem = self.arena.alloc(cap);
        mem[..src.len()].copy_from_slice(src);
        let ptr = mem.as_mut_ptr();
        self.push(Buffer::Memory(MemoryBuf::new(ptr, cap, src.len(), false)), false)
    }

    /// Appends a non-owned, read-only reference (e.g. a literal
    /// template chunk).
    pub fn append_borrowed(&self, src: &'static [u8]) -> &'static Link {
        self.push(Buffer::StaticMemory(src), false)
    }

    /// Appends a file descriptor range, to be sent zero-copy.
    pub fn append_file(&self, fd: RawFd, offset: u64, len: u64) -> &'static Link {
        self.push(Buffer::File { fd, offset, len }, false)
    }

    /// Marks the most recently appended link as end-of-stream. Links
    /// are immutable once appended, so this replaces the tail link
    /// with an equivalent one carrying `is_eos = true` — cheap, since
    /// it only reuses the same `Buffer`.
    pub fn close(&self) {
        // There is nothing to rewrite if the stream is still empty;
        // callers append an explicit empty EOS marker in that case.
        if self.tail.get().is_none() {
            self.push(Buffer::StaticMemory(&[]), true);
        }
    }

    /// The tail's writable spare capacity, if the tail is a still-open
    /// memory buffer with room left — the stream's tail-fill rule.
    pub fn tail_spare(&self) -> Option<&mut [u8]> {
        match self.tail.get() {
            Some(link) => match &link.buf {
                Buffer::Memory(m) if !m.read_only() && m.cap() > m.len() => Some(m.spare_mut()),
                _ => None,
            },
            None => None,
        }
    }

    /// Records that `n` more bytes were written into the tail's spare
    /// capacity (e.g. by a direct `recv`).
    pub fn commit_tail(&self, n: usize) {
        if let Some(link) = self.tail.get() {
            if let Buffer::Memory(m) = &link.buf {
                m.commit(n);
                self.total.set(self.total.get() + n);
            }
        }
    }
}

/// A forward-only position into a [`Stream`]: `{ link, offset }`.
#[derive(Clone, Copy)]
pub struct Cursor {
    pub link: Option<&'static Link>,
    pub offset: usize,
}

impl Cursor {
    pub fn at_head(stream: &Stream) -> Self {
        Cursor {
            link: stream.head(),
            offset: 0,
        }
    }

    /// Unread bytes in the current link.
    pub fn remaining_in_link(&self) -> &'static [u8] {
        match self.link {
            None => &[],
            Some(l) => &l.buf.as_bytes()[self.offset.min(l.len())..],
        }
    }

    pub fn advance_within_link(&mut self, n: usize) {
        self.offset += n;
    }

    /// Moves to the next link, resetting the offset. Returns `false`
    /// at the end of the currently-appended chain.
    pub fn advance_link(&mut self) -> bool {
        match self.link.and_then(|l| l.next()) {
            Some(next) => {
                self.link = Some(next);
                self.offset = 0;
                true
            }
            None => false,
        }
    }

    pub fn is_eos(&self) -> bool {
        self.link.map(|l| l.is_eos).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_traverse_chain() {
        let arena = Arena::create(64);
        let stream = Stream::new(&arena);
        stream.append_data(b"GET / HTTP", 64);
        stream.append_borrowed(b"/1.1\r\n");

        let mut cur = Cursor::at_head(&stream);
        let mut collected = Vec::new();
        loop {
            collected.extend_from_slice(cur.remaining_in_link());
            if !cur.advance_link() {
                break;
            }
        }
        assert_eq!(collected, b"GET / HTTP/1.1\r\n");
        assert_eq!(stream.total(), 16);
    }

    #[test]
    fn tail_fill_rule_reuses_spare_capacity() {
        let arena = Arena::create(64);
        let stream = Stream::new(&arena);
        stream.append_data(b"GET ", 32);

        let spare = stream.tail_spare().expect("tail has spare capacity");
        spare[..4].copy_from_slice(b"/foo");
        stream.commit_tail(4);

        assert_eq!(stream.total(), 8);
        assert_eq!(stream.head().unwrap().buf.as_bytes(), b"GET /foo");
        // Still one link: no new buffer was appended.
        assert!(stream.head().unwrap().next().is_none());
    }

    #[test]
    fn new_link_appended_once_tail_capacity_is_exhausted() {
        let arena = Arena::create(64);
        let stream = Stream::new(&arena);
        stream.append_data(b"abcd", 4);
        assert!(stream.tail_spare().is_none());
        stream.append_data(b"efgh", 4);
        assert_eq!(stream.total(), 8);
        assert!(stream.head().unwrap().next().is_some());
    }
}
