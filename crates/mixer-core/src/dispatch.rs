//! Request-to-Session/Channel orchestration (spec §4.5 "Request
//! processing", "Session open", "Channel lifecycle"). This is the glue
//! `console.rs`/`websocket.rs` hand freshly parsed wire messages to and
//! the EventLoop calls once per tick (§4.5 step 3.5 in `eventloop.rs`):
//! it resolves a Request's target, opens or reuses a Session, walks the
//! hostkey/passphrase/password prompt chain, acquires a Channel, and
//! forwards the framed RPC — all the "caller" responsibilities `session.rs`
//! and `channel.rs`'s doc comments defer to one level up.
//!
//! Session open and the initial Channel netconf handshake run blocking,
//! per spec §5 ("channel open, subsystem request, and initial hello
//! exchange run blocking for the duration of the call to simplify
//! framing"); once a Channel is carrying an RPC, its replies are pumped
//! asynchronously by `session_socket.rs` so one slow device can't stall
//! every other client.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use crate::channel::{Channel, frame_rpc};
use crate::error::Error;
use crate::eventloop::Runtime;
use crate::request::{RequestId, RequestKind};
use crate::session::{HostkeyVerdict, Session, SessionId};
use crate::session_socket::SessionSocket;
use crate::socket::{ChannelId, HostkeyPrompt};
use crate::state::State;
use crate::store::{self, HostkeyType};
use crate::wire::{self, Operation};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// SSH auth-chain knobs sourced from `src/config.rs`'s `SshConfig` (kept
/// here, not in `session.rs`, since they govern the orchestration in
/// this file rather than any one Session's own state).
#[derive(Debug, Clone)]
pub struct AuthOptions {
    pub use_agent: bool,
    pub use_known_hosts: bool,
    pub known_hosts_path: PathBuf,
    pub keep_alive: u32,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            use_agent: true,
            use_known_hosts: false,
            known_hosts_path: std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/"))
                .join(".ssh/known_hosts"),
            keep_alive: 30,
        }
    }
}

/// Entry point for a freshly parsed wire message (spec §4.5 "Request
/// processing"): `rpc`/`htmlrpc`/`authinit` start a new Request,
/// `hostkey`/`psphrase`/`psword` resume one already parked on a prompt.
/// Shared by `console.rs` and `websocket.rs` so the two listener kinds
/// don't duplicate this routing.
pub fn handle_incoming(rt: &mut Runtime, client: ChannelId, header: &wire::Header, body: Vec<u8>) {
    match header.operation {
        Operation::Rpc | Operation::Htmlrpc => {
            let kind = if header.operation == Operation::Htmlrpc {
                RequestKind::Htmlrpc
            } else {
                RequestKind::Rpc
            };
            let target = header.attr("target").unwrap_or_default().to_string();
            let id = rt.alloc_request_id();
            let mut request = crate::request::Request::new(id, header.muxid, kind, &target, client);
            request.pending_body = body;
            if let Some(user) = header.attr("user") {
                request.user = Some(user.to_string());
            }
            if let Some(password) = header.attr("password") {
                request.password = Some(password.to_string());
            }
            rt.requests.insert(id, request);
        }
        Operation::Authinit => {
            let target = header.attr("target").unwrap_or_default().to_string();
            let id = rt.alloc_request_id();
            let mut request = crate::request::Request::new(id, header.muxid, RequestKind::Authinit, &target, client);
            if let Some(user) = header.attr("user") {
                request.user = Some(user.to_string());
            }
            rt.requests.insert(id, request);
        }
        Operation::Hostkey => {
            if let Some(id) = find_waiting(rt, client, header.muxid, State::Hostkey) {
                resume_hostkey(rt, id, header.attr("accept") == Some("yes"));
            }
        }
        Operation::Psphrase => {
            if let Some(id) = find_waiting(rt, client, header.muxid, State::Passphrase) {
                resume_passphrase(rt, id, String::from_utf8_lossy(&body).into_owned());
            }
        }
        Operation::Psword => {
            if let Some(id) = find_waiting(rt, client, header.muxid, State::Password) {
                resume_password(rt, id, String::from_utf8_lossy(&body).into_owned());
            }
        }
        other => {
            log::warn!("client {client} sent unexpected operation {other}");
        }
    }
}

fn find_waiting(rt: &Runtime, client: ChannelId, muxid: u32, state: State) -> Option<RequestId> {
    rt.requests
        .iter()
        .find(|(_, r)| r.client == client && r.muxid == muxid && r.state == state)
        .map(|(id, _)| *id)
}

/// Advances every freshly arrived Request one step (spec §4.5's `rpc`
/// handling): Requests already parked on a Session/prompt are left for
/// `resume_hostkey`/`resume_passphrase`/`resume_password` to drive
/// forward once the client answers.
pub fn drive(rt: &mut Runtime) {
    let ids: Vec<RequestId> = rt
        .requests
        .iter()
        .filter(|(_, r)| r.state == State::Normal && r.session.is_none())
        .map(|(id, _)| *id)
        .collect();
    for id in ids {
        open_for_request(rt, id);
    }
}

fn open_for_request(rt: &mut Runtime, id: RequestId) {
    let Some(target) = rt.requests.get(&id).map(|r| r.target.clone()) else {
        return;
    };

    let found = match rt.requests.get_mut(&id) {
        Some(request) => rt.store.target_lookup(&target, request),
        None => return,
    };
    match found {
        Ok(true) => {}
        Ok(false) => {
            // No saved device row; treat the target string itself as
            // `[user@]host[:port]` syntax directly (spec §4.6 allows
            // connecting to an unregistered target this way).
            let syntax = store::parse_target(&target);
            if let Some(request) = rt.requests.get_mut(&id) {
                request.hostname = Some(syntax.name);
                request.port = syntax.port.unwrap_or(22);
                request.user = request.user.clone().or(syntax.user);
            }
        }
        Err(e) => return fail_request(rt, id, &e.to_string()),
    }

    let (hostname, port, user) = {
        let Some(r) = rt.requests.get(&id) else { return };
        (
            r.hostname.clone().unwrap_or_default(),
            if r.port == 0 { 22 } else { r.port },
            r.user.clone().unwrap_or_else(|| "root".to_string()),
        )
    };
    if let Some(request) = rt.requests.get_mut(&id) {
        request.port = port;
    }

    if let Some(session_id) = rt
        .sessions
        .iter()
        .find(|(_, s)| s.established && s.display_name() == hostname && s.auth_user.as_deref() == Some(user.as_str()))
        .map(|(sid, _)| *sid)
    {
        if let Some(request) = rt.requests.get_mut(&id) {
            request.session = Some(session_id);
        }
        acquire_channel_and_send(rt, id, session_id);
        return;
    }

    let connect_target = format!("{hostname}:{port}");
    let stream = match resolve_and_connect(&connect_target) {
        Ok(s) => s,
        Err(e) => return fail_request(rt, id, &format!("connect to {connect_target} failed: {e}")),
    };

    let session_id = rt.alloc_session_id();
    let mut session = match Session::handshake(session_id, &target, stream) {
        Ok(s) => s,
        Err(e) => return fail_request(rt, id, &format!("SSH handshake with {connect_target} failed: {e}")),
    };
    session.set_canonical_hostname(hostname.clone());
    session.set_keepalive(rt.auth_options.keep_alive);

    let name = format!("{hostname}:{port}");
    let verify = if rt.auth_options.use_known_hosts {
        session.check_known_hosts(&rt.auth_options.known_hosts_path)
    } else {
        (|| {
            let stored = rt.store.get_hostkey(&name)?;
            session.check_hostkey(stored.as_ref().map(|(t, _)| t.name()), stored.as_ref().map(|(_, k)| k.as_str()))
        })()
    };
    let (verdict, prompt) = match verify {
        Ok(v) => v,
        Err(e) => return fail_request(rt, id, &format!("hostkey verification failed: {e}")),
    };

    rt.sessions.insert(session_id, session);

    match verdict {
        HostkeyVerdict::Match => continue_auth(rt, id, session_id),
        HostkeyVerdict::NoMatch | HostkeyVerdict::Mismatch => park_for_hostkey(rt, id, session_id, &prompt),
    }
}

/// Loops candidate addresses from resolution, retrying each in turn
/// (spec §4.5 step 1's `AI_CANONNAME` retry-across-addresses policy);
/// `ToSocketAddrs` is std's equivalent of `getaddrinfo`.
fn resolve_and_connect(addr: &str) -> io::Result<TcpStream> {
    let mut last_err = None;
    for candidate in addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&candidate, CONNECT_TIMEOUT) {
            Ok(stream) => {
                stream.set_nodelay(true).ok();
                return Ok(stream);
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses resolved")))
}

fn park_for_hostkey(rt: &mut Runtime, id: RequestId, session_id: SessionId, prompt: &HostkeyPrompt) {
    let Some(request) = rt.requests.get_mut(&id) else { return };
    request.session = Some(session_id);
    request.state = State::Hostkey;
    let muxid = request.muxid;
    let client = request.client;
    rt.outbox.push((
        client,
        wire::build_message(
            Operation::Hostkey,
            muxid,
            &[("target", prompt.target.as_str()), ("fingerprint", prompt.fingerprint.as_str()), ("type", prompt.key_type.as_str())],
            b"",
        ),
    ));
}

/// Handles the client's `hostkey` reply (spec §4.5 "hostkey" handling,
/// E5): persists an accepted key and resumes auth, or tears the Session
/// down on rejection.
pub fn resume_hostkey(rt: &mut Runtime, id: RequestId, accept: bool) {
    let Some(session_id) = rt.requests.get(&id).and_then(|r| r.session) else {
        return;
    };
    if !accept {
        rt.fail_session(session_id);
        return fail_request(rt, id, "hostkey confirmation declined by client");
    }

    let port = rt.requests.get(&id).map(|r| r.port).unwrap_or(22);
    let raw = {
        let Some(session) = rt.sessions.get(&session_id) else { return };
        session.raw_hostkey()
    };
    let (key_type, raw_key) = match raw {
        Ok(v) => v,
        Err(e) => return fail_request(rt, id, &format!("{e}")),
    };
    let store_type = match key_type {
        ssh2::HostKeyType::Rsa => HostkeyType::Rsa,
        ssh2::HostKeyType::Dss => HostkeyType::Dsa,
        _ => return fail_request(rt, id, "unsupported host key type"),
    };
    let name = {
        let Some(session) = rt.sessions.get(&session_id) else { return };
        format!("{}:{}", session.display_name(), port)
    };
    if let Err(e) = rt.store.save_hostkey(&name, store_type, &raw_key) {
        return fail_request(rt, id, &format!("saving hostkey failed: {e}"));
    }

    if let Some(request) = rt.requests.get_mut(&id) {
        request.state = State::Normal;
    }
    continue_auth(rt, id, session_id);
}

/// Runs the publickey/password auth chain (spec §4.5 step 5). Parks the
/// Request on a `Passphrase`/`Password` prompt if neither an unlocked
/// keyfile nor an already-supplied credential succeeds.
fn continue_auth(rt: &mut Runtime, id: RequestId, session_id: SessionId) {
    let Some(user) = rt.requests.get(&id).and_then(|r| r.user.clone()) else {
        return fail_request(rt, id, "no user given for authentication");
    };
    let supplied_password = rt.requests.get(&id).and_then(|r| r.password.clone());

    let methods = {
        let Some(session) = rt.sessions.get(&session_id) else { return };
        session.auth_methods(&user).unwrap_or_default()
    };

    if methods.iter().any(|m| m == "publickey") {
        let agent_ok = {
            let Some(session) = rt.sessions.get(&session_id) else { return };
            session.try_agent_auth(&user, rt.auth_options.use_agent).unwrap_or(false)
        };
        if agent_ok {
            return finish_auth(rt, id, session_id, user);
        }

        let keypair = rt.store.get_keypair().ok().flatten();
        if let Some((privatekey, publickey)) = keypair {
            let privatekey = PathBuf::from(privatekey);
            let publickey = if publickey.is_empty() { None } else { Some(PathBuf::from(publickey)) };
            let supplied_passphrase = rt.requests.get(&id).and_then(|r| r.passphrase.clone());
            let stored_passphrase = rt.store.get_passphrase().ok().flatten();

            let pubkey_ok = {
                let Some(session) = rt.sessions.get(&session_id) else { return };
                session.try_publickey_auth(
                    &user,
                    &privatekey,
                    publickey.as_deref(),
                    supplied_passphrase.as_deref(),
                    stored_passphrase.as_deref(),
                )
            };
            if pubkey_ok {
                return finish_auth(rt, id, session_id, user);
            }
            if supplied_passphrase.is_none() {
                return park_for_passphrase(rt, id);
            }
        }
    }

    if methods.iter().any(|m| m == "password") {
        if let Some(password) = supplied_password {
            let attempt = {
                let Some(session) = rt.sessions.get_mut(&session_id) else { return };
                session.try_password_auth(&user, &password)
            };
            match attempt {
                Ok(true) => {
                    if let Some(request) = rt.requests.get_mut(&id) {
                        request.password = Some(password);
                    }
                    return finish_auth(rt, id, session_id, user);
                }
                Ok(false) => return park_for_password(rt, id),
                Err(Error::PasswordRetriesExhausted) => {
                    rt.fail_session(session_id);
                    return fail_request(rt, id, "password retry ceiling reached");
                }
                Err(e) => return fail_request(rt, id, &format!("{e}")),
            }
        }
        return park_for_password(rt, id);
    }

    fail_request(rt, id, "no viable authentication method")
}

fn park_for_passphrase(rt: &mut Runtime, id: RequestId) {
    let Some(request) = rt.requests.get_mut(&id) else { return };
    request.state = State::Passphrase;
    let muxid = request.muxid;
    let client = request.client;
    rt.outbox.push((client, wire::build_message(Operation::Psphrase, muxid, &[], b"")));
}

fn park_for_password(rt: &mut Runtime, id: RequestId) {
    let Some(request) = rt.requests.get_mut(&id) else { return };
    request.state = State::Password;
    let muxid = request.muxid;
    let client = request.client;
    rt.outbox.push((client, wire::build_message(Operation::Psword, muxid, &[], b"")));
}

/// Handles the client's `psphrase` reply: records the passphrase on the
/// Request and re-enters the auth chain.
pub fn resume_passphrase(rt: &mut Runtime, id: RequestId, passphrase: String) {
    let Some(session_id) = rt.requests.get(&id).and_then(|r| r.session) else {
        return;
    };
    if let Some(request) = rt.requests.get_mut(&id) {
        request.passphrase = Some(passphrase);
        request.state = State::Normal;
    }
    continue_auth(rt, id, session_id);
}

/// Handles the client's `psword` reply: records the password and
/// re-enters the auth chain.
pub fn resume_password(rt: &mut Runtime, id: RequestId, password: String) {
    let Some(session_id) = rt.requests.get(&id).and_then(|r| r.session) else {
        return;
    };
    if let Some(request) = rt.requests.get_mut(&id) {
        request.password = Some(password);
        request.state = State::Normal;
    }
    continue_auth(rt, id, session_id);
}

fn finish_auth(rt: &mut Runtime, id: RequestId, session_id: SessionId, user: String) {
    if let Some(session) = rt.sessions.get_mut(&session_id) {
        session.auth_user = Some(user);
        session.established = true;
    }

    let (password, passphrase, target_name) = {
        let Some(request) = rt.requests.get(&id) else { return };
        (request.password.clone(), request.passphrase.clone(), store::parse_target(&request.target).name)
    };
    if let Some(password) = password {
        let _ = rt.store.save_password(&target_name, &password);
    }
    if let Some(passphrase) = passphrase {
        let _ = rt.store.save_passphrase(&passphrase);
    }

    finish_session_open(rt, id, session_id);
}

/// Registers the newly authenticated Session with the EventLoop's
/// `mio::Poll` (via `SessionSocket`) and hands the originating Request
/// its first Channel — unless the Request only asked to establish
/// authentication (`authinit`, spec §4.5), in which case opening a
/// Session already satisfies it.
fn finish_session_open(rt: &mut Runtime, id: RequestId, session_id: SessionId) {
    let token = rt.alloc_token();
    let raw_fd = match rt.sessions.get(&session_id) {
        Some(session) => session.raw_fd,
        None => return,
    };
    let socket = match SessionSocket::register(session_id, raw_fd, token, rt) {
        Ok(s) => s,
        Err(e) => return fail_request(rt, id, &format!("registering session socket failed: {e}")),
    };
    rt.queue_spawn(token, Box::new(socket));

    if let Some(request) = rt.requests.get_mut(&id) {
        request.session = Some(session_id);
    }

    if rt.requests.get(&id).map(|r| r.kind) == Some(RequestKind::Authinit) {
        return complete_authinit(rt, id);
    }
    acquire_channel_and_send(rt, id, session_id);
}

fn complete_authinit(rt: &mut Runtime, id: RequestId) {
    let Some(request) = rt.requests.get_mut(&id) else { return };
    let muxid = request.muxid;
    let client = request.client;
    request.state = State::RpcComplete;
    rt.outbox.push((client, wire::build_message(Operation::Complete, muxid, &[], b"")));
}

/// Reuses an idle Channel from the Session's `released` pool, or opens
/// a fresh one (running the blocking `netconf` subsystem request and
/// `<hello>` exchange), then frames and writes the Request's pending RPC
/// body (spec §4.5 "Channel lifecycle" `netconf`).
fn acquire_channel_and_send(rt: &mut Runtime, id: RequestId, session_id: SessionId) {
    let channel_id = match open_or_reuse_channel(rt, session_id) {
        Ok(id) => id,
        Err(e) => return fail_request(rt, id, &format!("channel open failed: {e}")),
    };

    let (client, body) = {
        let Some(request) = rt.requests.get(&id) else { return };
        (request.client, request.pending_body.clone())
    };
    let framed = frame_rpc(&body);

    if let Err(e) = send_rpc(rt, session_id, channel_id, id, client, &framed) {
        return fail_request(rt, id, &format!("{e}"));
    }

    if let Some(request) = rt.requests.get_mut(&id) {
        request.channel = Some(channel_id);
    }
}

/// Binds `request_id` to the channel and writes the framed RPC,
/// toggling the underlying `ssh2::Session` to blocking mode for the
/// duration of the write (spec §5's blocking-write simplification).
/// Isolated in its own function, returning a plain `Result`, so every
/// `?` inside stays scoped to one `&mut Runtime` borrow instead of
/// interleaving with the caller's own error reporting.
fn send_rpc(
    rt: &mut Runtime,
    session_id: SessionId,
    channel_id: ChannelId,
    request_id: RequestId,
    client: ChannelId,
    framed: &[u8],
) -> crate::error::Result<()> {
    let session = rt.sessions.get_mut(&session_id).ok_or(Error::NoSuchSession)?;
    let channel = session.channels.get_mut(&channel_id).ok_or(Error::NoSuchChannel)?;
    channel.bind_request(request_id, client)?;

    session.session.set_blocking(true);
    let write_result = session
        .channels
        .get_mut(&channel_id)
        .and_then(|c| c.ssh_channel.as_mut())
        .ok_or(Error::NoSuchChannel)
        .and_then(|c| c.write_all(framed).map_err(Error::Io));
    session.session.set_blocking(false);
    write_result?;

    let channel = session.channels.get_mut(&channel_id).ok_or(Error::NoSuchChannel)?;
    channel.buffer.reset();
    channel.state = State::RpcReadReply;
    Ok(())
}

fn open_or_reuse_channel(rt: &mut Runtime, session_id: SessionId) -> crate::error::Result<ChannelId> {
    let Some(session) = rt.sessions.get_mut(&session_id) else {
        return Err(Error::NoSuchSession);
    };

    if let Some(channel_id) = session.released.pop() {
        if let Some(channel) = session.channels.get_mut(&channel_id) {
            channel.state = State::RpcInitial;
            return Ok(channel_id);
        }
    }

    session.session.set_blocking(true);
    let ssh_channel = session.open_ssh_channel()?;
    let channel_id = session.alloc_channel_id();
    let mut channel = Channel::create(channel_id, session_id, ssh_channel)?;
    channel.netconf()?;
    absorb_hello(&mut channel)?;
    channel.state = State::RpcIdle;
    session.channels.insert(channel_id, channel);
    session.session.set_blocking(false);
    Ok(channel_id)
}

/// Blocking-reads the peer's NETCONF `<hello>` until the end-of-frame
/// marker completes (spec §4.5 "netconf"), discarding the body — this
/// implementation does not negotiate capabilities beyond base 1.0.
fn absorb_hello(channel: &mut Channel) -> crate::error::Result<()> {
    let mut buf = [0u8; 4096];
    loop {
        let n = channel
            .ssh_channel
            .as_mut()
            .ok_or(Error::NoSuchChannel)?
            .read(&mut buf)?;
        if n == 0 {
            return Err(Error::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed before completing hello")));
        }
        if channel.buffer.feed(&buf[..n]) {
            channel.buffer.reset();
            return Ok(());
        }
    }
}

/// A Channel whose in-flight RPC has completed (spec §4.5 `release`):
/// ships the `reply`/`complete` frame pair back to the client and
/// returns the Channel to the Session's idle pool.
pub fn complete_channel(rt: &mut Runtime, session_id: SessionId, channel_id: ChannelId) {
    let Some(session) = rt.sessions.get_mut(&session_id) else { return };
    let Some(channel) = session.channels.get_mut(&channel_id) else { return };

    let payload = channel.buffer.payload().to_vec();
    let request_id = channel.current_request;
    let client = channel.current_client;
    channel.release();
    session.released.push(channel_id);

    let (Some(request_id), Some(client)) = (request_id, client) else {
        return;
    };
    let Some(request) = rt.requests.get_mut(&request_id) else { return };
    let muxid = request.muxid;
    request.state = State::RpcComplete;

    rt.outbox.push((client, wire::build_message(Operation::Reply, muxid, &[], &payload)));
    rt.outbox.push((client, wire::build_message(Operation::Complete, muxid, &[], b"")));
}

/// A Channel whose read failed (spec §4.5 "Channel EOF during an RPC
/// releases the channel and fails the Request"): closes the Channel
/// outright (it cannot be trusted back into the idle pool) and reports
/// `error` to the client.
pub fn fail_channel(rt: &mut Runtime, session_id: SessionId, channel_id: ChannelId, reason: &str) {
    let Some(session) = rt.sessions.get_mut(&session_id) else { return };
    let Some(mut channel) = session.channels.remove(&channel_id) else { return };

    let request_id = channel.current_request;
    let client = channel.current_client;
    channel.close();

    let (Some(request_id), Some(client)) = (request_id, client) else {
        return;
    };
    let Some(request) = rt.requests.get_mut(&request_id) else { return };
    let muxid = request.muxid;
    request.state = State::Failed;

    rt.outbox.push((client, wire::build_message(Operation::Error, muxid, &[("message", reason)], b"")));
}

fn fail_request(rt: &mut Runtime, id: RequestId, message: &str) {
    let Some(request) = rt.requests.get_mut(&id) else { return };
    let muxid = request.muxid;
    let client = request.client;
    request.state = State::Error;
    rt.outbox.push((client, wire::build_message(Operation::Error, muxid, &[("message", message)], b"")));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Request;
    use crate::store::Store;

    fn runtime() -> Runtime {
        Runtime::new(Store::open_in_memory().unwrap(), AuthOptions::default()).unwrap()
    }

    #[test]
    fn default_auth_options_prefer_agent_over_known_hosts() {
        let opts = AuthOptions::default();
        assert!(opts.use_agent);
        assert!(!opts.use_known_hosts);
        assert_eq!(opts.keep_alive, 30);
        assert!(opts.known_hosts_path.ends_with(".ssh/known_hosts"));
    }

    #[test]
    fn find_waiting_matches_client_muxid_and_state() {
        let mut rt = runtime();
        let id = rt.alloc_request_id();
        let mut request = Request::new(id, 7, RequestKind::Rpc, "router1", 1);
        request.state = State::Hostkey;
        rt.requests.insert(id, request);

        assert_eq!(find_waiting(&rt, 1, 7, State::Hostkey), Some(id));
        assert_eq!(find_waiting(&rt, 1, 7, State::Passphrase), None);
        assert_eq!(find_waiting(&rt, 2, 7, State::Hostkey), None);
        assert_eq!(find_waiting(&rt, 1, 8, State::Hostkey), None);
    }

    #[test]
    fn handle_incoming_rpc_parks_target_and_pending_body() {
        let mut rt = runtime();
        let header = wire::Header {
            operation: Operation::Rpc,
            muxid: 3,
            attrs: vec![("target".to_string(), "admin@router1".to_string())],
        };
        handle_incoming(&mut rt, 1, &header, b"<rpc/>".to_vec());

        let request = rt.requests.values().next().expect("one request parked");
        assert_eq!(request.target, "admin@router1");
        assert_eq!(request.pending_body, b"<rpc/>");
        assert_eq!(request.user, None);
        assert_eq!(request.state, State::Normal);
    }

    #[test]
    fn handle_incoming_hostkey_resumes_only_a_matching_parked_request() {
        let mut rt = runtime();
        let id = rt.alloc_request_id();
        let mut request = Request::new(id, 9, RequestKind::Rpc, "router1", 4);
        request.state = State::Hostkey;
        request.session = None;
        rt.requests.insert(id, request);

        let header = wire::Header {
            operation: Operation::Hostkey,
            muxid: 9,
            attrs: vec![("accept".to_string(), "yes".to_string())],
        };
        // No session bound for this request, so resume_hostkey is a no-op
        // past its first lookup rather than panicking.
        handle_incoming(&mut rt, 4, &header, Vec::new());
        assert_eq!(rt.requests.get(&id).unwrap().state, State::Hostkey);
    }
}
