//! The local console socket (spec §6.4's `$DOT_DIR/mixer.$USER.cons`):
//! the same wire-framed protocol as the websocket listener (`wire.rs`),
//! carried directly over the Unix socket's bytes with no WebSocket
//! handshake in front of it. Grounded on `listener.rs`'s accept-spawned
//! socket shape; the original's console interface speaks the same
//! `mx_header_t` framing over a bare local-domain socket rather than a
//! second protocol.

use std::io::{self, Read, Write};
use std::time::Duration;

use mio::Interest;
use mio::net::UnixStream;
use mio::{Poll, Token};

use crate::dispatch;
use crate::error::Error as MixerError;
use crate::eventloop::Runtime;
use crate::socket::{ChannelId, HostkeyPrompt, MixerSocket, PollInterest, SocketKind};
use crate::wire;

pub struct Console {
    id: ChannelId,
    stream: UnixStream,
    inbuf: Vec<u8>,
    closed: bool,
}

impl Console {
    /// Registers `stream` (already accepted and nonblocking) with `rt.poll`
    /// under `token`, the same token the caller will later use to place
    /// this socket in the EventLoop's dispatch table via `Runtime::
    /// queue_spawn`.
    pub fn accept(mut stream: UnixStream, id: ChannelId, rt: &mut Runtime, token: Token) -> io::Result<Self> {
        register(&mut rt.poll, token, &mut stream)?;
        Ok(Self {
            id,
            stream,
            inbuf: Vec::new(),
            closed: false,
        })
    }

    /// Pulls complete wire messages out of `self.inbuf` and hands each to
    /// `dispatch::handle_incoming` (spec §4.5's "a header arrives" entry
    /// point), the same routing the websocket listener uses.
    fn drain_messages(&mut self, rt: &mut Runtime) -> io::Result<()> {
        loop {
            match wire::parse_message(&self.inbuf) {
                Ok(Some((header, body, consumed))) => {
                    self.inbuf.drain(..consumed);
                    dispatch::handle_incoming(rt, self.id, &header, body);
                }
                Ok(None) => return Ok(()),
                Err(e) => {
                    log::warn!("console {} sent a malformed wire message: {e}", self.id);
                    return Ok(());
                }
            }
        }
    }
}

fn register(poll: &mut Poll, token: Token, stream: &mut UnixStream) -> io::Result<()> {
    poll.registry().register(stream, token, Interest::READABLE | Interest::WRITABLE)
}

impl MixerSocket for Console {
    fn kind(&self) -> SocketKind {
        SocketKind::Console
    }

    fn prep(&mut self, _timeout: &mut Option<Duration>) -> Option<PollInterest> {
        Some(PollInterest::READABLE)
    }

    fn poller(&mut self, ready: PollInterest, rt: &mut Runtime) -> io::Result<()> {
        if ready.readable {
            let mut chunk = [0u8; 4096];
            loop {
                match self.stream.read(&mut chunk) {
                    Ok(0) => {
                        self.closed = true;
                        break;
                    }
                    Ok(n) => self.inbuf.extend_from_slice(&chunk[..n]),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => return Err(e),
                }
            }
            self.drain_messages(rt)?;
        }
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "console socket closed"));
        }
        Ok(())
    }

    fn spawn(_rt: &mut Runtime) -> io::Result<Box<dyn MixerSocket>>
    where
        Self: Sized,
    {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "Console sockets are created by Listener::poller via Console::accept",
        ))
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.stream.write(bytes)
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn set_channel(&mut self, _channel: ChannelId) {}

    fn check_hostkey(&mut self, _prompt: &HostkeyPrompt) -> bool {
        false
    }

    fn error(&mut self, err: &MixerError) {
        log::warn!("console {} error: {err}", self.id);
    }
}
