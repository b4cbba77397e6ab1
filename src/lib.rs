pub mod config;

use std::io::Write;
use std::os::fd::AsRawFd;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use mixer_core::listener::{Listener, Spawns};
use mixer_core::{AuthOptions, EventLoop, Store};

use self::config::{Config, DirectConnect};

fn socket_path(dot_dir: &std::path::Path, suffix: &str) -> std::path::PathBuf {
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    dot_dir.join(format!("mixer.{user}.{suffix}"))
}

/// Acquires the single-instance pid lock at `$DOT_DIR/mixer.$USER.lock`
/// (spec §6.4), the same non-blocking `flock` technique `vat::Arena` uses
/// for its own file lock. Held for the lifetime of the returned `File`;
/// dropping it (process exit) releases the lock automatically.
fn acquire_pid_lock(path: &std::path::Path) -> Result<std::fs::File> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(path)
        .with_context(|| format!("opening pid lock {}", path.display()))?;
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc != 0 {
        bail!("another mixer instance already holds {}", path.display());
    }
    let mut file = file;
    file.set_len(0).context("truncating pid lock")?;
    write!(file, "{}", std::process::id()).context("writing pid lock")?;
    Ok(file)
}

/// Replaces `main` for integration tests that want to drive the daemon
/// without going through the CLI, same role as the teacher's `startup`
/// in `src/lib.rs`.
pub async fn startup(config: Arc<Config>, direct: DirectConnect) -> Result<()> {
    if direct.fork {
        log::warn!("--fork requested; running in the foreground regardless (daemonizing is out of scope)");
    }

    std::fs::create_dir_all(&config.server.dot_dir).context("creating dot-dir")?;

    let lock_path = socket_path(&config.server.dot_dir, "lock");
    let _pid_lock = acquire_pid_lock(&lock_path).context("acquiring single-instance lock")?;

    let store = if config.store.no_db {
        Store::open_in_memory()
    } else {
        let path = config
            .store
            .db
            .clone()
            .unwrap_or_else(|| config.server.dot_dir.join("mixer.db"));
        Store::open(&path)
    }
    .context("opening store")?;

    let ws_path = socket_path(&config.server.dot_dir, "ws");
    let console_path = config.server.console.then(|| socket_path(&config.server.dot_dir, "cons"));

    let auth_options = AuthOptions {
        use_agent: config.ssh.use_agent,
        use_known_hosts: config.ssh.use_known_hosts,
        known_hosts_path: config.server.home.join(".ssh/known_hosts"),
        keep_alive: config.ssh.keep_alive,
    };

    let config_for_loop = config.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut event_loop = EventLoop::new(store, auth_options).context("initializing event loop")?;

        let mut ws_listener = Listener::bind(&ws_path, Spawns::Websocket).context("binding websocket listener")?;
        let ws_token = event_loop.alloc_token();
        ws_listener
            .register(event_loop.runtime_mut(), ws_token)
            .context("registering websocket listener")?;
        event_loop.register(ws_token, Box::new(ws_listener));

        if let Some(console_path) = console_path {
            let mut console_listener = Listener::bind(&console_path, Spawns::Console).context("binding console listener")?;
            let console_token = event_loop.alloc_token();
            console_listener
                .register(event_loop.runtime_mut(), console_token)
                .context("registering console listener")?;
            event_loop.register(console_token, Box::new(console_listener));
        }

        log::info!(
            "mixer event loop starting (dot-dir {})",
            config_for_loop.server.dot_dir.display()
        );
        event_loop.run_forever().context("event loop terminated")
    })
    .await
    .context("event loop task panicked")??;

    Ok(())
}
