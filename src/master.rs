//! Master process: supervises the worker pool.
//!
//! Reads and validates configuration, installs the master's own
//! signal handlers, forks `worker_count` children, and waits for them.
//! `SIGTERM`/`SIGINT` request a graceful stop (propagated to every
//! worker); `SIGHUP` is ignored — reserved for a future config reload.

use crate::config::{FhConfig, HostConfig};
use crate::errors::ConfigError;
use crate::limits::{ConnLimits, ReqLimits, ServerLimits};
use crate::router::Router;
use crate::vhost::Host;
use crate::worker::Worker;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

static EXIT_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn request_exit(_signum: libc::c_int) {
    EXIT_REQUESTED.store(true, Ordering::SeqCst);
}

/// Installs SIGTERM/SIGINT → [`request_exit`] and ignores SIGHUP.
fn install_master_signal_handlers() {
    // SAFETY: `request_exit` only stores to an atomic and is
    // async-signal-safe; `libc::signal` is the simplest portable way
    // to install it (no `sigaction` flags are needed here).
    unsafe {
        libc::signal(libc::SIGTERM, request_exit as *const () as libc::sighandler_t);
        libc::signal(libc::SIGINT, request_exit as *const () as libc::sighandler_t);
        libc::signal(libc::SIGHUP, libc::SIG_IGN);
    }
}

/// Loads `config_path`, forks `worker_count` workers, and blocks until
/// they all exit (or until a signal tells the master to stop them).
/// Returns `Ok(())` on clean shutdown; startup failures propagate as
/// [`ConfigError`] for `main` to report.
pub(crate) fn run(config_path: &Path) -> Result<(), ConfigError> {
    let config = crate::config::load(config_path)?;
    let hosts = build_hosts(&config);

    tracing::info!(workers = config.worker_count, hosts = hosts.len(), "starting");
    install_master_signal_handlers();

    let mut children = Vec::with_capacity(config.worker_count);
    for _ in 0..config.worker_count {
        // SAFETY: `fork` is safe to call here — the parent immediately
        // records the child PID and continues the supervision loop;
        // the child resets its signal handlers before doing anything
        // else and never returns across this function boundary.
        let pid = unsafe { libc::fork() };
        match pid {
            -1 => {
                tracing::error!("fork failed");
                continue;
            }
            0 => {
                crate::worker::install_signal_handlers();
                run_worker(&config, &hosts);
                std::process::exit(0);
            }
            child_pid => {
                tracing::info!(pid = child_pid, "forked worker");
                children.push(child_pid);
            }
        }
    }

    wait_for_children(children);
    Ok(())
}

fn run_worker(config: &FhConfig, hosts: &[Host]) {
    let router = Router::new();
    let req_limits = ReqLimits::default();
    let server_limits = ServerLimits {
        max_connections_per_worker: config.security.max_connections,
        ..ServerLimits::default()
    };
    let conn_limits = ConnLimits {
        read_timeout_secs: config.security.recv_timeout,
        write_timeout_secs: config.security.send_timeout,
        ..ConnLimits::default()
    };

    match Worker::new(hosts.to_vec(), router, req_limits, server_limits, conn_limits) {
        Ok(mut worker) => worker.run(),
        Err(err) => tracing::error!(%err, "worker failed to bind listeners"),
    }
}

fn build_hosts(config: &FhConfig) -> Vec<Host> {
    let mut hosts = Vec::new();
    for host_cfg in &config.hosts {
        for (name, port) in &host_cfg.names {
            hosts.push(to_vhost(host_cfg, name.clone(), *port));
        }
    }
    hosts
}

fn to_vhost(cfg: &HostConfig, hostname: String, port: u16) -> Host {
    Host {
        hostname,
        port,
        docroot: cfg.docroot.clone(),
        is_default: cfg.is_default,
        log_level: cfg.logging.as_ref().map(|l| format!("{:?}", l.min_level)),
    }
}

/// Waits for every forked worker in order, per the spec's supervision
/// contract. On an exit request, remaining workers are signalled
/// before the final `waitpid`s are issued.
fn wait_for_children(children: Vec<libc::pid_t>) {
    loop {
        if EXIT_REQUESTED.load(Ordering::SeqCst) {
            for &pid in &children {
                // SAFETY: `pid` is a PID this process forked and has
                // not yet reaped.
                unsafe {
                    libc::kill(pid, libc::SIGTERM);
                }
            }
            break;
        }
        // Give the exit flag a chance to be observed between reaps
        // rather than blocking indefinitely on the first child.
        std::thread::sleep(std::time::Duration::from_millis(200));
        if children.iter().all(|&pid| !process_alive(pid)) {
            break;
        }
    }

    for pid in children {
        let mut status: libc::c_int = 0;
        // SAFETY: `pid` was returned by a `fork` this process
        // performed and is reaped at most once.
        unsafe {
            libc::waitpid(pid, &mut status, 0);
        }
    }
    tracing::info!("all workers reaped, exiting");
}

fn process_alive(pid: libc::pid_t) -> bool {
    // SAFETY: signal 0 performs no action beyond existence/permission
    // checks, valid for any PID.
    unsafe { libc::kill(pid, 0) == 0 }
}
