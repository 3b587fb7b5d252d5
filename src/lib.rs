//! originhttpd - a non-blocking, prefork, event-driven HTTP/1.x origin
//! server for serving static files from a filesystem root.
//!
//! # Architecture
//!
//! A master process reads configuration, binds one `SO_REUSEPORT`
//! listen socket per configured host, then forks a fixed number of
//! worker processes. Each worker owns its own single-threaded
//! readiness-based event loop (`epoll` on Linux, `kqueue` on BSD)
//! driving a per-connection [`arena`]-backed request parser and
//! response builder. There is no shared mutable state between
//! workers: the kernel load-balances accepted connections across the
//! `SO_REUSEPORT` group.
//!
//! This crate is currently under active transformation; modules are
//! being brought up one at a time.
pub(crate) mod arena;
pub(crate) mod buffer;
pub(crate) mod errors;
pub(crate) mod event;
pub(crate) mod http {
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod config;
pub(crate) mod connection;
pub(crate) mod fs_handler;
pub(crate) mod limits;
pub(crate) mod master;
pub(crate) mod router;
pub(crate) mod vhost;
pub(crate) mod worker;

pub use crate::errors::ConfigError;

/// Runs the master process against the config at `config_path`,
/// forking the worker pool and blocking until clean shutdown. The
/// binary entry point (`main.rs`) is the only intended caller.
pub fn run(config_path: &std::path::Path) -> Result<(), ConfigError> {
    master::run(config_path)
}

/// Support for the end-to-end tests under `tests/`: everything else in
/// this crate is `pub(crate)`, so integration tests need one narrow,
/// explicit door into a real worker loop rather than a config file and
/// a forked process.
#[doc(hidden)]
pub mod testing {
    use crate::limits::{ConnLimits, ReqLimits, ServerLimits};
    use crate::router::Router;
    use crate::vhost::Host;
    use crate::worker::Worker;
    use std::net::SocketAddr;
    use std::path::PathBuf;

    /// Spawns a worker thread serving `docroot` as the sole (default)
    /// host on an OS-assigned ephemeral port, returning the address to
    /// connect to. The worker runs until the test process exits.
    pub fn spawn_worker(docroot: PathBuf) -> SocketAddr {
        let host = Host {
            hostname: "localhost".to_string(),
            port: 0,
            docroot,
            is_default: true,
            log_level: None,
        };
        let mut worker = Worker::new(
            vec![host],
            Router::new(),
            ReqLimits::default(),
            ServerLimits::default(),
            ConnLimits::default(),
        )
        .expect("bind test worker");
        let addr = worker.local_addr();
        std::thread::spawn(move || worker.run());
        addr
    }
}
