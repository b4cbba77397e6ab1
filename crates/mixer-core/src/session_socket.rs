//! Registers a [`Session`]'s underlying TCP stream with the EventLoop's
//! `mio::Poll` so replies arriving on its multiplexed SSH channels get
//! pumped without blocking the rest of the dispatch loop (spec §4.5,
//! §9's "Global mutable state" design note: Sessions are tied to the
//! Runtime rather than polled out-of-band). The `Session` value itself
//! still lives in `Runtime::sessions`; this is a thin registration shim
//! looked up by id on every `poller` call, the same split `Listener`
//! uses for `Console`/`Websocket` (spec socket accept, not ownership).

use std::io::{self, Read};
use std::os::fd::RawFd;
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Interest, Token};

use crate::dispatch;
use crate::error::Error as MixerError;
use crate::eventloop::Runtime;
use crate::session::{Session, SessionId};
use crate::socket::{ChannelId, MixerSocket, PollInterest, SocketKind};
use crate::state::State;

pub struct SessionSocket {
    session_id: SessionId,
    raw_fd: RawFd,
}

impl SessionSocket {
    /// Registers a session's raw fd under `token`. Takes the id/fd as
    /// plain values rather than `&Session` so the caller
    /// (`dispatch::finish_session_open`) can still pass `rt` by unique
    /// reference in the same call — a `&Session` borrowed out of
    /// `rt.sessions` would conflict with that. The caller hands the
    /// returned value to `Runtime::queue_spawn` the same way
    /// `Listener::poller` does for freshly accepted client sockets.
    pub fn register(session_id: SessionId, raw_fd: RawFd, token: Token, rt: &mut Runtime) -> io::Result<Self> {
        rt.poll
            .registry()
            .register(&mut SourceFd(&raw_fd), token, Interest::READABLE)?;
        Ok(Self { session_id, raw_fd })
    }
}

/// Outcome of one non-blocking drain attempt on a channel's SSH stream.
enum PumpOutcome {
    /// No full frame yet; still waiting on more bytes.
    Pending,
    /// The `]]>]]>` end-of-frame marker completed the current RPC.
    Complete,
    /// The peer closed its side before the marker arrived (spec §7 `EOF`).
    Eof,
}

/// Drains whatever is available on `channel`'s underlying SSH channel
/// without blocking, feeding each chunk through its NETCONF framing
/// scanner.
fn pump_channel(session: &mut Session, channel_id: ChannelId) -> io::Result<PumpOutcome> {
    session.session.set_blocking(false);
    let Some(channel) = session.channels.get_mut(&channel_id) else {
        return Ok(PumpOutcome::Pending);
    };
    let Some(ssh_channel) = channel.ssh_channel.as_mut() else {
        return Ok(PumpOutcome::Pending);
    };

    let mut buf = [0u8; 4096];
    loop {
        match ssh_channel.read(&mut buf) {
            Ok(0) => return Ok(PumpOutcome::Eof),
            Ok(n) => {
                channel.feed_read(&buf[..n]);
                if channel.state == State::RpcComplete {
                    return Ok(PumpOutcome::Complete);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(PumpOutcome::Pending),
            Err(e) => return Err(e),
        }
    }
}

impl MixerSocket for SessionSocket {
    fn kind(&self) -> SocketKind {
        SocketKind::Session
    }

    fn prep(&mut self, _timeout: &mut Option<Duration>) -> Option<PollInterest> {
        Some(PollInterest::READABLE)
    }

    fn poller(&mut self, _ready: PollInterest, rt: &mut Runtime) -> io::Result<()> {
        let Some(session) = rt.sessions.get_mut(&self.session_id) else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "session already torn down"));
        };

        let in_flight: Vec<ChannelId> = session
            .channels
            .iter()
            .filter(|(_, c)| c.state == State::RpcReadReply)
            .map(|(id, _)| *id)
            .collect();

        let mut completed = Vec::new();
        let mut failed: Vec<(ChannelId, &'static str)> = Vec::new();
        for channel_id in in_flight {
            match pump_channel(session, channel_id) {
                Ok(PumpOutcome::Complete) => completed.push(channel_id),
                Ok(PumpOutcome::Pending) => {}
                Ok(PumpOutcome::Eof) => {
                    log::warn!(
                        "session {} channel {channel_id} hit EOF before the end-of-frame marker",
                        self.session_id
                    );
                    failed.push((channel_id, "channel EOF before end of frame"));
                }
                Err(e) => {
                    log::warn!("session {} channel {channel_id} read failed: {e}", self.session_id);
                    failed.push((channel_id, "channel read failed"));
                }
            }
        }

        for channel_id in completed {
            dispatch::complete_channel(rt, self.session_id, channel_id);
        }
        for (channel_id, reason) in failed {
            dispatch::fail_channel(rt, self.session_id, channel_id, reason);
        }
        Ok(())
    }

    fn spawn(_rt: &mut Runtime) -> io::Result<Box<dyn MixerSocket>>
    where
        Self: Sized,
    {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "Session sockets are created by dispatch::finish_session_open, not spawn",
        ))
    }

    fn write(&mut self, _bytes: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "a Session socket has no single write side; writes go through its Channels",
        ))
    }

    fn close(&mut self) {
        let _ = self.raw_fd;
    }

    fn error(&mut self, err: &MixerError) {
        log::warn!("session {} error: {err}", self.session_id);
    }
}
