//! Request tracking (spec §3.5, §4.5): one Request exists for the
//! lifetime of a single client-initiated operation, from the moment its
//! header arrives on the websocket until the matching `reply`/`complete`/
//! `error` is written back.

use crate::channel::SessionId;
use crate::socket::ChannelId;
use crate::state::State;

pub type RequestId = u64;

/// Which client-visible operation this Request is carrying out; mirrors
/// the wire [`crate::wire::Operation`] that created it but is tracked
/// separately since a Request outlives any single wire message (e.g. an
/// `rpc` Request later emits a `reply`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Rpc,
    Htmlrpc,
    Authinit,
    Forward,
}

/// Destination for a TCP-forwarder Request (spec §3.5's "destination host
/// and port for TCP forwarders").
#[derive(Debug, Clone)]
pub struct ForwardTarget {
    pub host: String,
    pub port: u16,
}

/// One in-flight client operation (spec §3.5). Carries both the identity
/// needed to route its eventual reply back to the right client socket,
/// and the resolved connection parameters accumulated while an
/// interactive auth prompt (hostkey confirmation, passphrase, password)
/// is outstanding.
pub struct Request {
    pub id: RequestId,
    pub muxid: u32,
    pub kind: RequestKind,

    pub target: String,
    pub hostname: Option<String>,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub passphrase: Option<String>,
    pub hostkey_confirmation: Option<String>,

    pub forward: Option<ForwardTarget>,

    pub client: ChannelId,
    pub session: Option<SessionId>,
    pub channel: Option<ChannelId>,

    /// RPC body parked while a hostkey/passphrase/password prompt is
    /// outstanding on `client`; replayed into the Channel once the prompt
    /// resolves (spec §4.5 Request processing).
    pub pending_body: Vec<u8>,

    pub state: State,
}

impl Request {
    pub fn new(id: RequestId, muxid: u32, kind: RequestKind, target: &str, client: ChannelId) -> Self {
        Self {
            id,
            muxid,
            kind,
            target: target.to_string(),
            hostname: None,
            port: 0,
            user: None,
            password: None,
            passphrase: None,
            hostkey_confirmation: None,
            forward: None,
            client,
            session: None,
            channel: None,
            pending_body: Vec::new(),
            state: State::Normal,
        }
    }

    /// A Request is waiting on an interactive prompt when it has no
    /// Channel bound yet but has already been handed to a Session.
    pub fn is_awaiting_prompt(&self) -> bool {
        self.session.is_some() && self.channel.is_none()
    }

    pub fn bind_channel(&mut self, channel: ChannelId) {
        self.channel = Some(channel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_request_starts_unbound_and_not_awaiting_prompt() {
        let req = Request::new(1, 7, RequestKind::Rpc, "r1", 3);
        assert!(req.session.is_none());
        assert!(req.channel.is_none());
        assert!(!req.is_awaiting_prompt());
    }

    #[test]
    fn request_is_awaiting_prompt_once_handed_to_a_session_without_a_channel() {
        let mut req = Request::new(1, 7, RequestKind::Rpc, "r1", 3);
        req.session = Some(5);
        assert!(req.is_awaiting_prompt());
        req.bind_channel(9);
        assert!(!req.is_awaiting_prompt());
    }
}
