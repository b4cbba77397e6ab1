//! EventLoop, Session, Channel, Request and Store for the mixer daemon.

pub mod channel;
pub mod console;
pub mod dispatch;
pub mod error;
pub mod eventloop;
pub mod listener;
pub mod netconf;
pub mod request;
pub mod session;
pub mod session_socket;
pub mod socket;
pub mod state;
pub mod store;
pub mod websocket;
pub mod wire;

pub use channel::{Channel, ChannelFlags, SessionId};
pub use console::Console;
pub use dispatch::AuthOptions;
pub use error::{Error, Result};
pub use eventloop::{EventLoop, Runtime};
pub use listener::{Listener, Spawns};
pub use request::{Request, RequestId, RequestKind};
pub use session::{HostkeyVerdict, Session};
pub use session_socket::SessionSocket;
pub use socket::{ChannelId, HostkeyPrompt, MixerSocket, PollInterest, SocketKind};
pub use state::State;
pub use store::{HostkeyType, Store};
pub use websocket::Websocket;
pub use wire::{Header, Operation};
