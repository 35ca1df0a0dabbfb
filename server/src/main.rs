//! Binary entry point: loads a TOML config, starts the proxy core, and
//! drives it to a clean shutdown on SIGINT.
//!
//! Everything in this file is the "external collaborator" boundary
//! SPEC_FULL.md describes: config file parsing, log sink setup, and signal
//! handling are the binary's job precisely because the `rproxy` library
//! crate never touches a filesystem path or an environment variable itself.

mod cli;

use std::fs;
use std::path::Path;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use rproxy::config::Config;
use rproxy::error::ServerError;
use rproxy::server::Server;

use cli::Args;

/// Set by [`handle_sigint`], polled by the relay thread spawned in `main`.
/// A signal handler may only touch async-signal-safe state; an atomic store
/// is the one thing this binary does from inside the handler itself.
static SIGINT_RECEIVED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigint(_signum: libc::c_int) {
    SIGINT_RECEIVED.store(true, Ordering::SeqCst);
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(&args.config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err:#}");
            return ExitCode::from(1);
        }
    };

    init_tracing(&config.logger.level);

    // SAFETY: the handler only stores to a process-wide `AtomicBool`, which
    // is async-signal-safe; it performs no allocation, locking, or I/O.
    unsafe {
        libc::signal(libc::SIGINT, handle_sigint as usize);
    }

    let server = match Server::build(&config) {
        Ok(server) => server,
        Err(ServerError::Bind { addr, source }) => {
            tracing::error!(%addr, error = %source, "failed to bind listener");
            return ExitCode::from(2);
        }
        Err(err) => {
            tracing::error!(error = %err, "failed to start server");
            return ExitCode::from(1);
        }
    };

    for addr in server.local_addrs() {
        tracing::info!(%addr, "listening");
    }

    let shutdown = server.shutdown_flag();
    thread::spawn(move || {
        while !SIGINT_RECEIVED.load(Ordering::Relaxed) {
            thread::sleep(Duration::from_millis(100));
        }
        tracing::info!("received SIGINT, shutting down");
        shutdown.store(true, Ordering::Relaxed);
    });

    match server.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "server exited with an error");
            ExitCode::from(1)
        }
    }
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let config: Config = toml::from_str(&contents)
        .with_context(|| format!("parsing config file {}", path.display()))?;
    config.validate().context("validating config")?;
    Ok(config)
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
