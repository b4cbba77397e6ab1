//! The single state enumeration shared by Sockets, Channels, and Requests
//! (spec §4.5). A Channel or Request only ever occupies the subset of
//! states meaningful to it; the EventLoop's sweep (§4.5 step 4) only looks
//! at `Failed`/`Error`/`RpcComplete`, so the type stays shared rather than
//! split three ways the way the teacher keeps one `TransportState` shared
//! across its socket kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Normal,
    Failed,
    Error,
    Input,
    Output,
    Hostkey,
    Passphrase,
    Password,
    Established,
    RpcInitial,
    RpcIdle,
    RpcReadRpc,
    RpcWriteRpc,
    RpcReadReply,
    RpcWriteReply,
    RpcComplete,
}
