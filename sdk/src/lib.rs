//! Thin client for the mixer wire protocol (spec.md §6.3), for
//! integration tests and external tooling. Grounded on the teacher's
//! `crates/client`'s builder-pattern shape (`TurnClientBuilder`/
//! `TurnClient`), generalized from a UDP/TCP STUN client onto mixer's
//! Unix-socket-framed RPC wire protocol.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use mixer_core::wire::{self, Header, Operation};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

/// Default location of the websocket-framed listener relative to a
/// `$DOT_DIR`, mirroring `src/config.rs`'s socket naming.
pub fn default_socket_path(dot_dir: &Path, user: &str) -> PathBuf {
    dot_dir.join(format!("mixer.{user}.ws"))
}

pub struct MixerClientBuilder {
    socket_path: PathBuf,
}

impl MixerClientBuilder {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub fn with_socket_path(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.socket_path = path.into();
        self
    }

    pub async fn connect(&self) -> Result<MixerClient> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .with_context(|| format!("connecting to {}", self.socket_path.display()))?;
        Ok(MixerClient {
            stream,
            next_muxid: 1,
            recv_buf: Vec::new(),
        })
    }
}

/// A single connection to the mixer daemon's websocket listener. Not
/// `Clone`/`Sync` — one client per logical session, the same shape as
/// one `Request`'s client Socket on the daemon side.
pub struct MixerClient {
    stream: UnixStream,
    next_muxid: u32,
    recv_buf: Vec<u8>,
}

impl MixerClient {
    fn alloc_muxid(&mut self) -> u32 {
        let id = self.next_muxid;
        self.next_muxid += 1;
        id
    }

    /// Sends an `rpc` request for `target` carrying `body`, and returns
    /// the resulting `reply` body (or an error if the daemon replies
    /// `error` or closes the connection first).
    pub async fn rpc(&mut self, target: &str, body: &[u8]) -> Result<Vec<u8>> {
        let muxid = self.alloc_muxid();
        let msg = wire::build_message(Operation::Rpc, muxid, &[("target", target)], body);
        self.stream.write_all(&msg).await.context("writing rpc request")?;

        loop {
            let (header, reply_body) = self.read_one_for(muxid).await?;
            match header.operation {
                Operation::Reply | Operation::Complete => return Ok(reply_body),
                Operation::Error => bail!("mixer error: {}", String::from_utf8_lossy(&reply_body)),
                Operation::Hostkey | Operation::Psphrase | Operation::Psword => {
                    bail!(
                        "interactive auth prompt ({}) requires a confirmation reply, which this thin client does not automate",
                        header.operation
                    );
                }
                other => bail!("unexpected operation {other} in reply to muxid {muxid}"),
            }
        }
    }

    /// Answers an interactive hostkey/passphrase/password prompt for
    /// `muxid` with `confirmation` (spec §4.5's `hostkey`/`password`/
    /// `psphrase` operations).
    pub async fn confirm(&mut self, operation: Operation, muxid: u32, confirmation: &[u8]) -> Result<()> {
        let msg = wire::build_message(operation, muxid, &[], confirmation);
        self.stream.write_all(&msg).await.context("writing auth confirmation")?;
        Ok(())
    }

    /// Reads and parses wire messages off the stream until one matching
    /// `muxid` is found, buffering any that don't (a real multiplexing
    /// client would dispatch those to other pending calls; this thin
    /// client only tracks one outstanding request at a time).
    async fn read_one_for(&mut self, muxid: u32) -> Result<(Header, Vec<u8>)> {
        loop {
            if let Some((header, body, consumed)) = wire::parse_message(&self.recv_buf)? {
                self.recv_buf.drain(..consumed);
                if header.muxid == muxid {
                    return Ok((header, body));
                }
                continue;
            }

            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk).await.context("reading from mixer socket")?;
            if n == 0 {
                bail!("mixer closed the connection while waiting for muxid {muxid}");
            }
            self.recv_buf.extend_from_slice(&chunk[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_socket_path_matches_daemon_naming_convention() {
        let path = default_socket_path(Path::new("/home/alice/.mixer"), "alice");
        assert_eq!(path, PathBuf::from("/home/alice/.mixer/mixer.alice.ws"));
    }
}
