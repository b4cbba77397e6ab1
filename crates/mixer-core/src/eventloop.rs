//! Single-threaded, poll-based dispatch loop (spec §4.5's per-iteration
//! algorithm), run over heterogeneous sockets via the [`MixerSocket`]
//! trait. Grounded on `mixer.c`'s `mx_select_loop` shape, reworked onto
//! `mio::Poll` rather than raw `poll(2)` (DESIGN.md records why: spec.md
//! §5 mandates single-threaded cooperative scheduling suspending only at
//! `poll()`, which the teacher's fully-async tokio core does not model
//! directly, so this one subsystem runs on its own blocking thread).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use mio::{Events, Poll, Token};

use crate::channel::SessionId;
use crate::dispatch::{self, AuthOptions};
use crate::request::{Request, RequestId};
use crate::session::Session;
use crate::socket::{ChannelId, MixerSocket, PollInterest};
use crate::state::State;
use crate::store::Store;

/// Shared context threaded through every socket's `poller`/`spawn` call:
/// the mio registry plus the live Session/Request tables a socket may
/// need to mutate (e.g. a websocket socket creating a Request, or a
/// Session socket failing every Request bound to it).
pub struct Runtime {
    pub poll: Poll,
    pub sessions: HashMap<SessionId, Session>,
    pub requests: HashMap<RequestId, Request>,
    pub store: Store,
    pub auth_options: AuthOptions,
    /// Wire messages queued by `dispatch.rs` for a client socket that
    /// isn't reachable from `&mut Runtime` (sockets live in the
    /// EventLoop's own table, see `Registered` below); drained by
    /// `EventLoop::tick` right after dispatch runs each tick.
    pub outbox: Vec<(ChannelId, Vec<u8>)>,
    /// Sockets a currently-dispatching socket spawned (a Listener's
    /// accept loop, or `dispatch.rs` opening a fresh Session) but cannot
    /// register into the EventLoop's own socket table directly, since
    /// `poller` only ever sees the shared `Runtime`, not the EventLoop
    /// itself. Drained at the top of every `EventLoop::tick`.
    pending_spawns: Vec<(Token, Box<dyn MixerSocket>)>,
    next_session_id: SessionId,
    next_request_id: RequestId,
    next_token: usize,
}

impl Runtime {
    pub fn new(store: Store, auth_options: AuthOptions) -> std::io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            sessions: HashMap::new(),
            requests: HashMap::new(),
            store,
            auth_options,
            outbox: Vec::new(),
            pending_spawns: Vec::new(),
            next_session_id: 1,
            next_request_id: 1,
            next_token: 0,
        })
    }

    pub fn alloc_session_id(&mut self) -> SessionId {
        let id = self.next_session_id;
        self.next_session_id += 1;
        id
    }

    pub fn alloc_request_id(&mut self) -> RequestId {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }

    /// Allocates a fresh mio `Token`, usable both for `EventLoop`'s own
    /// socket table and for a socket (such as a Listener) that spawns a
    /// new connection mid-dispatch and must register it with `poll`
    /// before handing it off via `queue_spawn`.
    pub fn alloc_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    /// Hands a freshly accepted/spawned socket, already registered with
    /// `self.poll` under `token`, to the EventLoop for inclusion in its
    /// dispatch table starting next tick.
    pub fn queue_spawn(&mut self, token: Token, socket: Box<dyn MixerSocket>) {
        self.pending_spawns.push((token, socket));
    }

    /// Session failures release every Request bound to the session,
    /// marking each `FAILED` (spec §4.5 Failure semantics).
    pub fn fail_session(&mut self, session: SessionId) {
        self.sessions.remove(&session);
        for request in self.requests.values_mut() {
            if request.session == Some(session) {
                request.state = State::Failed;
            }
        }
    }
}

struct Registered {
    socket: Box<dyn MixerSocket>,
}

/// The EventLoop itself: owns every live socket and drives the
/// prep/poll/poller/sweep/close cycle (spec §4.5).
pub struct EventLoop {
    sockets: HashMap<Token, Registered>,
    events: Events,
    rt: Runtime,
}

impl EventLoop {
    pub fn new(store: Store, auth_options: AuthOptions) -> std::io::Result<Self> {
        Ok(Self {
            sockets: HashMap::new(),
            events: Events::with_capacity(256),
            rt: Runtime::new(store, auth_options)?,
        })
    }

    /// Allocates a fresh mio `Token`. Callers that need to register a
    /// socket's underlying fd with `runtime_mut().poll` directly (mio
    /// readiness sources, unlike raw `poll(2)`, are registered once up
    /// front rather than per-call) must use this same token when later
    /// calling `register` so the EventLoop's socket table and mio's
    /// readiness events key on the same value.
    pub fn alloc_token(&mut self) -> Token {
        self.rt.alloc_token()
    }

    pub fn register(&mut self, token: Token, socket: Box<dyn MixerSocket>) {
        self.sockets.insert(token, Registered { socket });
    }

    pub fn runtime_mut(&mut self) -> &mut Runtime {
        &mut self.rt
    }

    /// Runs exactly one iteration of the spec's five-step algorithm.
    /// The caller loops this (typically forever, from a dedicated
    /// blocking thread) until shutdown.
    pub fn tick(&mut self) -> std::io::Result<()> {
        // Step 0: adopt any socket spawned mid-dispatch by a socket that
        // only had `&mut Runtime` in scope (a Listener accepting a
        // connection, most commonly).
        for (token, socket) in self.rt.pending_spawns.drain(..) {
            self.sockets.insert(token, Registered { socket });
        }

        let mut timeout: Option<Duration> = None;
        let mut declined = Vec::new();

        // Step 1: prep every live socket.
        for (token, entry) in self.sockets.iter_mut() {
            match entry.socket.prep(&mut timeout) {
                Some(_interest) => {}
                None => declined.push(*token),
            }
        }

        // Step 2: poll with the accumulated minimum timeout. `mio`
        // readiness comes through registered sources directly rather
        // than a per-call interest set the way raw `poll(2)` would take
        // one, so sockets that want readiness must already be
        // registered with `self.rt.poll`; `declined` sockets are simply
        // skipped in step 3 below.
        let deadline = timeout.unwrap_or(Duration::from_secs(1));
        self.rt.poll.poll(&mut self.events, Some(deadline))?;

        let mut ready_tokens: HashMap<Token, PollInterest> = HashMap::new();
        for event in self.events.iter() {
            let interest = PollInterest {
                readable: event.is_readable(),
                writable: event.is_writable(),
            };
            ready_tokens.insert(event.token(), interest);
        }

        // Step 3: dispatch `poller` to every socket that either has
        // mio-reported readiness or declined polling (buffered work).
        let mut failed = Vec::new();
        for (token, entry) in self.sockets.iter_mut() {
            let ready = match ready_tokens.get(token).copied() {
                Some(interest) => interest,
                None if declined.contains(token) => PollInterest::NONE,
                None => continue,
            };
            if entry.socket.poller(ready, &mut self.rt).is_err() {
                failed.push(*token);
            }
        }

        // Step 3.5: drive freshly arrived Requests forward (opening or
        // reusing a Session, acquiring a Channel, forwarding the RPC —
        // spec §4.5 "Request processing") and flush whatever it queued
        // for a client socket. Not one of the five numbered steps in
        // spec §4.5 itself, but the natural place for it: it needs the
        // Request states `poller` just updated, and must run before the
        // sweep below sees their results.
        dispatch::drive(&mut self.rt);
        for (client, bytes) in self.rt.outbox.drain(..) {
            if let Some(entry) = self.sockets.get_mut(&Token(client as usize)) {
                let _ = entry.socket.write(&bytes);
            }
        }

        // Step 4: sweep the Request list.
        let mut to_release = Vec::new();
        for (id, request) in self.rt.requests.iter_mut() {
            if request.state == State::Error {
                request.state = State::RpcComplete;
            }
            if matches!(request.state, State::Failed | State::RpcComplete) {
                to_release.push(*id);
            }
        }
        for id in to_release {
            self.rt.requests.remove(&id);
        }

        // Step 5: close any socket in a failed state.
        for token in failed {
            if let Some(mut entry) = self.sockets.remove(&token) {
                entry.socket.close();
            }
        }

        Ok(())
    }

    /// Runs `tick` forever; the boundary at which a blocking OS thread
    /// (spawned via `tokio::task::spawn_blocking` from `main.rs`) takes
    /// over from the async runtime for the rest of the process.
    pub fn run_forever(&mut self) -> std::io::Result<()> {
        loop {
            self.tick()?;
        }
    }
}

/// Per-tick deadline bookkeeping shared by `prep` implementations that
/// track their own keepalive countdown (spec §3.5's Session "next
/// keepalive countdown").
pub fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}
