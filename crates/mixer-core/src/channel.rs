//! Channel lifecycle and NETCONF framing (spec §3.5, §4.5).

use bitflags::bitflags;
use std::io::Write;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::netconf;
use crate::request::RequestId;
use crate::socket::ChannelId;
use crate::state::State;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChannelFlags: u32 {
        const HOLD_CHANNEL = 1 << 0;
        const SEEN_EOFRAME = 1 << 1;
    }
}

/// Growable read buffer with the NETCONF framing scanner's progress
/// threaded through it (spec §3.5's Buffer plus the marker's
/// `marker_seen` counter).
#[derive(Debug, Default)]
pub struct Buffer {
    bytes: Vec<u8>,
    marker_seen: usize,
}

impl Buffer {
    pub fn reset(&mut self) {
        self.bytes.clear();
        self.marker_seen = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Appends `chunk` and scans it for the NETCONF end-of-frame marker,
    /// consuming the marker itself out of the buffer when found. Returns
    /// `true` once a full frame has been delivered.
    pub fn feed(&mut self, chunk: &[u8]) -> bool {
        let start = self.bytes.len();
        self.bytes.extend_from_slice(chunk);
        let (seen, completed_at) = netconf::scan(chunk, self.marker_seen);
        match completed_at {
            Some(offset) => {
                self.bytes.truncate(start + offset - netconf::MARKER.len());
                self.marker_seen = 0;
                true
            }
            None => {
                self.marker_seen = seen;
                false
            }
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes
    }
}

/// Frames an RPC body for transmission to the target device (spec §4.5
/// NETCONF framing): prefixed `<rpc format="html">`, suffixed
/// `</rpc>]]>]]>`.
pub fn frame_rpc(body: &[u8]) -> Vec<u8> {
    const PREFIX: &[u8] = b"<rpc format=\"html\">";
    const SUFFIX: &[u8] = b"</rpc>]]>]]>";
    let mut framed = Vec::with_capacity(PREFIX.len() + body.len() + SUFFIX.len());
    framed.extend_from_slice(PREFIX);
    framed.extend_from_slice(body);
    framed.extend_from_slice(SUFFIX);
    framed
}

pub type SessionId = u64;

/// One multiplexed SSH channel within a Session (spec §3.5).
pub struct Channel {
    pub id: ChannelId,
    pub session: SessionId,
    pub current_request: Option<RequestId>,
    pub current_client: Option<ChannelId>,
    pub buffer: Buffer,
    pub state: State,
    pub flags: ChannelFlags,
    /// The underlying libssh2 channel this one multiplexes over. `None`
    /// for a Channel under test that never opened a real SSH channel.
    pub ssh_channel: Option<ssh2::Channel>,
}

impl Channel {
    pub fn new(id: ChannelId, session: SessionId) -> Self {
        Self {
            id,
            session,
            current_request: None,
            current_client: None,
            buffer: Buffer::default(),
            state: State::RpcInitial,
            flags: ChannelFlags::empty(),
            ssh_channel: None,
        }
    }

    /// Wraps a freshly opened libssh2 channel, requesting the `netconf`
    /// subsystem on it (spec §4.5's Channel-open step, `mx_channel_create`
    /// in the original). The channel starts idle: no request bound yet.
    pub fn create(id: ChannelId, session: SessionId, mut ssh_channel: ssh2::Channel) -> Result<Self> {
        ssh_channel.subsystem("netconf")?;
        Ok(Self {
            id,
            session,
            current_request: None,
            current_client: None,
            buffer: Buffer::default(),
            state: State::RpcIdle,
            flags: ChannelFlags::empty(),
            ssh_channel: Some(ssh_channel),
        })
    }

    /// Sends the NETCONF `hello` exchange that every fresh channel must
    /// complete before carrying RPCs (spec §4.5 "netconf"). The `<hello>`
    /// is a session-level message, not an RPC, and already carries its own
    /// trailing `]]>]]>` marker, so it goes out verbatim — `frame_rpc`'s
    /// `<rpc format="html">` wrapper applies only to actual RPC bodies.
    pub fn netconf(&mut self) -> Result<()> {
        const HELLO: &[u8] = b"<hello xmlns=\"urn:ietf:params:xml:ns:netconf:base:1.0\"><capabilities><capability>urn:ietf:params:netconf:base:1.0</capability></capabilities></hello>]]>]]>";
        let channel = self.ssh_channel.as_mut().ok_or(Error::NoSuchChannel)?;
        channel.write_all(HELLO)?;
        self.state = State::RpcWriteRpc;
        Ok(())
    }

    /// Tears the underlying SSH channel down (spec §4.5 `close`); the
    /// Session drops this Channel from its table once this returns,
    /// regardless of whether the close handshake finished cleanly.
    pub fn close(&mut self) {
        if let Some(channel) = self.ssh_channel.as_mut() {
            let _ = channel.close();
            let _ = channel.wait_close();
        }
        self.state = State::Failed;
    }

    /// Moves the channel back to its session's idle pool: clears the
    /// client/request links and resets framing state, but keeps the
    /// underlying SSH channel open for reuse (spec §4.5 `release`).
    pub fn release(&mut self) {
        self.current_request = None;
        self.current_client = None;
        self.buffer.reset();
        self.flags.remove(ChannelFlags::SEEN_EOFRAME);
        self.state = State::RpcIdle;
    }

    pub fn is_idle(&self) -> bool {
        self.state == State::RpcIdle
    }

    pub fn bind_request(&mut self, request: RequestId, client: ChannelId) -> Result<()> {
        if self.current_request.is_some() {
            return Err(Error::NoSuchChannel);
        }
        self.current_request = Some(request);
        self.current_client = Some(client);
        self.state = State::RpcInitial;
        Ok(())
    }

    /// Feeds a read chunk through the NETCONF framing scanner, advancing
    /// state to `RpcComplete` once the end-of-frame marker completes.
    pub fn feed_read(&mut self, chunk: &[u8]) {
        if self.buffer.feed(chunk) {
            self.flags.insert(ChannelFlags::SEEN_EOFRAME);
            self.state = State::RpcComplete;
        }
    }
}

/// Keepalive countdown granularity shared with [`crate::session::Session`].
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(30);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_strips_marker_and_signals_completion() {
        let mut buf = Buffer::default();
        assert!(!buf.feed(b"<rpc-reply>ok"));
        assert!(buf.feed(b"</rpc-reply>]]>]]>"));
        assert_eq!(buf.payload(), b"<rpc-reply>ok</rpc-reply>");
    }

    #[test]
    fn buffer_handles_marker_split_across_feeds() {
        let mut buf = Buffer::default();
        assert!(!buf.feed(b"<ok/>]]>]"));
        assert!(buf.feed(b"]>"));
        assert_eq!(buf.payload(), b"<ok/>");
    }

    #[test]
    fn frame_rpc_wraps_body_with_prefix_and_marker_suffix() {
        let framed = frame_rpc(b"<get/>");
        assert!(framed.starts_with(b"<rpc format=\"html\">"));
        assert!(framed.ends_with(b"</rpc>]]>]]>"));
    }

    #[test]
    fn close_without_an_underlying_ssh_channel_just_marks_failed() {
        let mut ch = Channel::new(1, 1);
        ch.close();
        assert_eq!(ch.state, State::Failed);
    }

    #[test]
    fn netconf_without_an_underlying_ssh_channel_errors() {
        let mut ch = Channel::new(1, 1);
        assert!(ch.netconf().is_err());
    }

    #[test]
    fn release_clears_links_but_keeps_channel_reusable() {
        let mut ch = Channel::new(1, 1);
        ch.bind_request(9, 2).unwrap();
        ch.feed_read(b"data]]>]]>");
        ch.release();
        assert!(ch.current_request.is_none());
        assert!(ch.is_idle());
        assert!(ch.buffer.is_empty());
    }
}
