//! Polymorphic socket dispatch (spec §4.5, §9).
//!
//! The original's function-pointer type table (`print, prep, poller,
//! spawn, write, write_complete, set_channel, close, check_hostkey,
//! get_passphrase, get_password, is_buf, error`) maps onto a trait the
//! EventLoop dispatches through without ever inspecting a concrete type;
//! `spawn` becomes an associated function since it produces new instances
//! rather than acting on `self`.

use std::io;
use std::time::Duration;

use crate::error::Error as MixerError;
use crate::eventloop::Runtime;

pub type ChannelId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    Listener,
    Forwarder,
    Session,
    Console,
    Websocket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollInterest {
    pub readable: bool,
    pub writable: bool,
}

impl PollInterest {
    pub const NONE: Self = Self {
        readable: false,
        writable: false,
    };
    pub const READABLE: Self = Self {
        readable: true,
        writable: false,
    };
    pub const WRITABLE: Self = Self {
        readable: false,
        writable: true,
    };
}

#[derive(Debug, Clone)]
pub struct HostkeyPrompt {
    pub target: String,
    pub fingerprint: String,
    /// The key type name (`"RSA"`/`"DSA"`), matching `store::HostkeyType::
    /// name()` so the wire attribute round-trips straight into a Store
    /// lookup.
    pub key_type: String,
}

/// Dispatch surface the EventLoop drives every live socket through,
/// independent of its concrete kind (spec §4.5's type table generalised
/// into a trait).
pub trait MixerSocket {
    fn kind(&self) -> SocketKind;

    /// Declares interest for the next `poll()`; returning `None` means
    /// this socket has buffered work ready and should not be polled this
    /// iteration.
    fn prep(&mut self, timeout: &mut Option<Duration>) -> Option<PollInterest>;

    fn poller(&mut self, ready: PollInterest, rt: &mut Runtime) -> io::Result<()>;

    /// Accepts or otherwise produces a new socket of this concrete kind
    /// (e.g. a Listener accepting a connection); an associated function
    /// since it creates new instances rather than acting on `self`.
    fn spawn(rt: &mut Runtime) -> io::Result<Box<dyn MixerSocket>>
    where
        Self: Sized;

    fn write(&mut self, bytes: &[u8]) -> io::Result<usize>;

    fn write_complete(&mut self) {}

    fn set_channel(&mut self, _channel: ChannelId) {}

    fn close(&mut self);

    fn check_hostkey(&mut self, _prompt: &HostkeyPrompt) -> bool {
        false
    }

    fn get_passphrase(&mut self, _prompt: &str) -> bool {
        false
    }

    fn get_password(&mut self, _prompt: &str) -> bool {
        false
    }

    fn is_buf(&self) -> bool {
        false
    }

    fn error(&mut self, _err: &MixerError) {}
}
