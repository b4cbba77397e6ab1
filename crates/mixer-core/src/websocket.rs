//! The `ws` listener kind (spec §6.4's `$DOT_DIR/mixer.$USER.ws`):
//! `tungstenite` owns the outer WebSocket handshake/frame layer; once
//! open, each binary frame carries one or more `wire.rs`-framed messages,
//! the same inner protocol the console socket carries directly over raw
//! bytes. Grounded on `console.rs`'s message-draining loop, generalized
//! over a `tungstenite::WebSocket` instead of a bare stream.

use std::io;
use std::time::Duration;

use mio::Interest;
use mio::net::UnixStream;
use mio::{Poll, Token};
use tungstenite::handshake::MidHandshake;
use tungstenite::handshake::server::{NoCallback, ServerHandshake};
use tungstenite::{Message, WebSocket};

use crate::dispatch;
use crate::error::Error as MixerError;
use crate::eventloop::Runtime;
use crate::socket::{ChannelId, HostkeyPrompt, MixerSocket, PollInterest, SocketKind};
use crate::wire;

type Handshake = ServerHandshake<UnixStream, NoCallback>;

enum Phase {
    Handshaking(Option<MidHandshake<Handshake>>),
    Open(WebSocket<UnixStream>),
    Closed,
}

pub struct Websocket {
    id: ChannelId,
    phase: Phase,
    inbuf: Vec<u8>,
}

impl Websocket {
    pub fn accept(mut stream: UnixStream, id: ChannelId, rt: &mut Runtime, token: Token) -> io::Result<Self> {
        register(&mut rt.poll, token, &mut stream)?;
        let phase = match tungstenite::accept(stream) {
            Ok(ws) => Phase::Open(ws),
            Err(tungstenite::HandshakeError::Interrupted(mid)) => Phase::Handshaking(Some(mid)),
            Err(tungstenite::HandshakeError::Failure(e)) => {
                return Err(io::Error::other(format!("websocket handshake failed: {e}")));
            }
        };
        Ok(Self {
            id,
            phase,
            inbuf: Vec::new(),
        })
    }

    fn advance_handshake(&mut self) -> io::Result<()> {
        let Phase::Handshaking(slot) = &mut self.phase else {
            return Ok(());
        };
        let mid = slot.take().expect("handshake phase always holds a MidHandshake");
        match mid.handshake() {
            Ok(ws) => self.phase = Phase::Open(ws),
            Err(tungstenite::HandshakeError::Interrupted(mid)) => {
                self.phase = Phase::Handshaking(Some(mid));
            }
            Err(tungstenite::HandshakeError::Failure(e)) => {
                self.phase = Phase::Closed;
                return Err(io::Error::other(format!("websocket handshake failed: {e}")));
            }
        }
        Ok(())
    }

    /// Pulls complete wire messages out of `self.inbuf` and hands each to
    /// `dispatch::handle_incoming`, the same routing `console.rs` uses.
    fn drain_messages(&mut self, rt: &mut Runtime) {
        loop {
            match wire::parse_message(&self.inbuf) {
                Ok(Some((header, body, consumed))) => {
                    self.inbuf.drain(..consumed);
                    dispatch::handle_incoming(rt, self.id, &header, body);
                }
                Ok(None) => return,
                Err(e) => {
                    log::warn!("websocket {} sent a malformed wire message: {e}", self.id);
                    return;
                }
            }
        }
    }
}

fn register(poll: &mut Poll, token: Token, stream: &mut UnixStream) -> io::Result<()> {
    poll.registry().register(stream, token, Interest::READABLE | Interest::WRITABLE)
}

fn would_block(err: &tungstenite::Error) -> bool {
    matches!(err, tungstenite::Error::Io(e) if e.kind() == io::ErrorKind::WouldBlock)
}

impl MixerSocket for Websocket {
    fn kind(&self) -> SocketKind {
        SocketKind::Websocket
    }

    fn prep(&mut self, _timeout: &mut Option<Duration>) -> Option<PollInterest> {
        Some(PollInterest {
            readable: true,
            writable: true,
        })
    }

    fn poller(&mut self, ready: PollInterest, rt: &mut Runtime) -> io::Result<()> {
        if matches!(self.phase, Phase::Handshaking(_)) && (ready.readable || ready.writable) {
            self.advance_handshake()?;
        }

        let Phase::Open(ws) = &mut self.phase else {
            return Ok(());
        };

        if ready.readable {
            loop {
                match ws.read() {
                    Ok(Message::Binary(data)) => self.inbuf.extend_from_slice(&data),
                    Ok(Message::Close(_)) => {
                        self.phase = Phase::Closed;
                        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "websocket closed by peer"));
                    }
                    Ok(_) => {}
                    Err(e) if would_block(&e) => break,
                    Err(e) => return Err(io::Error::other(format!("websocket read failed: {e}"))),
                }
            }
            self.drain_messages(rt);
        }
        Ok(())
    }

    fn spawn(_rt: &mut Runtime) -> io::Result<Box<dyn MixerSocket>>
    where
        Self: Sized,
    {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "Websocket sockets are created by Listener::poller via Websocket::accept",
        ))
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        let Phase::Open(ws) = &mut self.phase else {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "websocket handshake not complete"));
        };
        ws.send(Message::Binary(bytes.to_vec().into()))
            .map_err(|e| io::Error::other(format!("websocket send failed: {e}")))?;
        Ok(bytes.len())
    }

    fn close(&mut self) {
        if let Phase::Open(ws) = &mut self.phase {
            let _ = ws.close(None);
        }
        self.phase = Phase::Closed;
    }

    fn set_channel(&mut self, _channel: ChannelId) {}

    fn check_hostkey(&mut self, _prompt: &HostkeyPrompt) -> bool {
        false
    }

    fn error(&mut self, err: &MixerError) {
        log::warn!("websocket {} error: {err}", self.id);
    }
}
