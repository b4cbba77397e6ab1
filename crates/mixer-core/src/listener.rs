//! Unix-socket listener accepting new websocket/console clients (spec
//! §6.4's `$DOT_DIR/mixer.$USER.{ws,cons}`). Grounded on
//! `original_source/mixer/listener.c`'s `mx_listener`/`mx_listener_accept`,
//! reworked from a TCP `PF_INET` listener onto `mio::net::UnixListener`
//! (spec.md §6.4 names Unix sockets, not TCP, as the external surface).

use std::io;
use std::os::unix::net::UnixListener as StdUnixListener;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mio::Interest;
use mio::net::UnixListener;

use crate::console::Console;
use crate::error::Error as MixerError;
use crate::eventloop::Runtime;
use crate::socket::{ChannelId, HostkeyPrompt, MixerSocket, PollInterest, SocketKind};
use crate::websocket::Websocket;

/// What kind of client a Listener spawns on accept (spec.md's
/// `msl_spawns` field, generalized from a numeric type-table index).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Spawns {
    Websocket,
    Console,
}

pub struct Listener {
    kind: SocketKind,
    spawns: Spawns,
    path: PathBuf,
    inner: UnixListener,
}

impl Listener {
    /// Binds a fresh Unix socket at `path`, removing a stale socket file
    /// left behind by a previous unclean shutdown first (the original's
    /// `.lock` file, acquired via `flock` before `bind`, is the actual
    /// mutual-exclusion mechanism; a leftover socket file after a crash
    /// is otherwise harmless to unlink since `bind` would fail on it).
    pub fn bind(path: &Path, spawns: Spawns) -> io::Result<Self> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let std_listener = StdUnixListener::bind(path)?;
        std_listener.set_nonblocking(true)?;
        let inner = UnixListener::from_std(std_listener);

        Ok(Self {
            kind: SocketKind::Listener,
            spawns,
            path: path.to_path_buf(),
            inner,
        })
    }

    pub fn register(&mut self, rt: &mut Runtime, token: mio::Token) -> io::Result<()> {
        rt.poll.registry().register(&mut self.inner, token, Interest::READABLE)
    }
}

impl MixerSocket for Listener {
    fn kind(&self) -> SocketKind {
        self.kind
    }

    fn prep(&mut self, _timeout: &mut Option<Duration>) -> Option<PollInterest> {
        Some(PollInterest::READABLE)
    }

    fn poller(&mut self, ready: PollInterest, rt: &mut Runtime) -> io::Result<()> {
        if !ready.readable {
            return Ok(());
        }
        loop {
            match self.inner.accept() {
                Ok((stream, _addr)) => {
                    log::info!("listener {:?} accepted a {:?} connection", self.path, self.spawns);
                    let token = rt.alloc_token();
                    let client_id = token.0 as ChannelId;
                    let spawned: Box<dyn MixerSocket> = match self.spawns {
                        Spawns::Console => Box::new(Console::accept(stream, client_id, rt, token)?),
                        Spawns::Websocket => Box::new(Websocket::accept(stream, client_id, rt, token)?),
                    };
                    rt.queue_spawn(token, spawned);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn spawn(_rt: &mut Runtime) -> io::Result<Box<dyn MixerSocket>>
    where
        Self: Sized,
    {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "Listener sockets are created via Listener::bind, not spawn",
        ))
    }

    fn write(&mut self, _bytes: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "a Listener has no write side"))
    }

    fn close(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }

    fn set_channel(&mut self, _channel: ChannelId) {}

    fn check_hostkey(&mut self, _prompt: &HostkeyPrompt) -> bool {
        false
    }

    fn error(&mut self, err: &MixerError) {
        log::warn!("listener {:?} error: {err}", self.path);
    }
}
