//! Session: one authenticated SSH connection to a device, owning a set
//! of Channels (spec §3.5, §4.5 "Session open"). Grounded on
//! `session.c`'s `mx_session_open`/`mx_session_check_hostkey`/
//! `mx_session_check_auth` state machine, reworked onto `ssh2::Session`.

use std::collections::HashMap;
use std::net::TcpStream;
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;
use std::time::Duration;

use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use ssh2::HashType;

use crate::channel::{Channel, DEFAULT_KEEPALIVE};
use crate::error::{Error, Result};
use crate::socket::{ChannelId, HostkeyPrompt};

pub type SessionId = u64;

const MAX_PASSWORD_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostkeyVerdict {
    Match,
    Mismatch,
    NoMatch,
}

/// An authenticated SSH connection to one device (spec §3.5's Session).
pub struct Session {
    pub id: SessionId,
    /// As supplied by the client, including any `user@` or `:port`.
    pub target: String,
    /// Filled in once address resolution completes (`AI_CANONNAME`).
    pub canonical_hostname: Option<String>,
    pub session: ssh2::Session,
    /// The raw fd of the underlying TCP stream, kept for `mio::unix::
    /// SourceFd` registration (`session_socket.rs`) — `ssh2::Session`
    /// itself owns the stream and exposes no fd accessor after
    /// `set_tcp_stream`, so this is captured beforehand.
    pub raw_fd: RawFd,
    pub channels: HashMap<ChannelId, Channel>,
    pub released: Vec<ChannelId>,
    pub password_failures: u32,
    pub keepalive: Duration,
    pub established: bool,
    /// The user auth actually succeeded as, once established (spec
    /// §4.5's auth chain); lets later Requests to the same target under
    /// the same user reuse this Session instead of opening a new one.
    pub auth_user: Option<String>,
    next_channel_id: ChannelId,
}

impl Session {
    /// Wraps a TCP stream that has already completed the SSH handshake
    /// (address resolution with `AI_CANONNAME` retry across candidates,
    /// per spec §4.5 step 1, is the caller's responsibility — it belongs
    /// to the EventLoop's connect-in-progress bookkeeping, not here).
    pub fn handshake(id: SessionId, target: &str, stream: TcpStream) -> Result<Self> {
        let raw_fd = stream.as_raw_fd();
        let mut session = ssh2::Session::new()?;
        session.set_tcp_stream(stream);
        session.handshake()?;
        session.set_keepalive(true, DEFAULT_KEEPALIVE.as_secs() as u32);

        Ok(Self {
            id,
            target: target.to_string(),
            canonical_hostname: None,
            session,
            raw_fd,
            channels: HashMap::new(),
            released: Vec::new(),
            password_failures: 0,
            keepalive: DEFAULT_KEEPALIVE,
            established: false,
            auth_user: None,
            next_channel_id: 1,
        })
    }

    /// Applies a caller-configured keepalive interval (spec §6.4's
    /// `--keep-alive`), overriding the `DEFAULT_KEEPALIVE` set at
    /// handshake time.
    pub fn set_keepalive(&mut self, seconds: u32) {
        self.keepalive = Duration::from_secs(seconds as u64);
        self.session.set_keepalive(true, seconds);
    }

    /// Allocates the next Channel id scoped to this Session (spec §3.5's
    /// per-session Channel lists).
    pub fn alloc_channel_id(&mut self) -> ChannelId {
        let id = self.next_channel_id;
        self.next_channel_id += 1;
        id
    }

    pub fn set_canonical_hostname(&mut self, name: String) {
        self.canonical_hostname = Some(name);
    }

    pub fn display_name(&self) -> &str {
        self.canonical_hostname.as_deref().unwrap_or(&self.target)
    }

    /// Looks up the session's host key against a stored fingerprint
    /// (spec §4.5 step 4); the actual Store/known-hosts lookup is
    /// performed by the caller, which passes in what it found.
    pub fn check_hostkey(&self, stored_type: Option<&str>, stored_key_b64: Option<&str>) -> Result<(HostkeyVerdict, HostkeyPrompt)> {
        let (key_bytes, key_type) = self.session.host_key().ok_or(Error::NoHostkey)?;
        let fingerprint = self
            .session
            .host_key_hash(HashType::Sha1)
            .map(hex_encode)
            .unwrap_or_default();
        let type_name = ssh_key_type_name(key_type);
        let encoded = BASE64_STANDARD.encode(key_bytes);

        let verdict = match (stored_type, stored_key_b64) {
            (Some(t), Some(k)) if t == type_name && k == encoded => HostkeyVerdict::Match,
            (Some(_), Some(_)) => HostkeyVerdict::Mismatch,
            _ => HostkeyVerdict::NoMatch,
        };

        let prompt = HostkeyPrompt {
            target: self.display_name().to_string(),
            fingerprint,
            key_type: type_name.to_string(),
        };

        Ok((verdict, prompt))
    }

    /// Fetches the peer's raw host key bytes and type, for saving to the
    /// Store once a client accepts a hostkey confirmation prompt (spec
    /// §4.5's `hostkey` operation handling).
    pub fn raw_hostkey(&self) -> Result<(ssh2::HostKeyType, Vec<u8>)> {
        let (key_bytes, key_type) = self.session.host_key().ok_or(Error::NoHostkey)?;
        Ok((key_type, key_bytes.to_vec()))
    }

    /// Alternate hostkey verification path for `ssh.use-known-hosts`
    /// (spec §4.5 step 4's "or in the ssh-known-hosts file if that
    /// option is enabled"). Reads `path` if present (a missing file is
    /// treated the same as an empty one, matching `libssh2`'s own
    /// `read_file` tolerance for ENOENT) and checks the current host key
    /// against it.
    pub fn check_known_hosts(&self, path: &Path) -> Result<(HostkeyVerdict, HostkeyPrompt)> {
        let (key_bytes, key_type) = self.session.host_key().ok_or(Error::NoHostkey)?;
        let fingerprint = self
            .session
            .host_key_hash(HashType::Sha1)
            .map(hex_encode)
            .unwrap_or_default();
        let type_name = ssh_key_type_name(key_type);
        let prompt = HostkeyPrompt {
            target: self.display_name().to_string(),
            fingerprint,
            key_type: type_name.to_string(),
        };

        let mut known_hosts = self.session.known_hosts()?;
        let _ = known_hosts.read_file(path, ssh2::KnownHostFileKind::OpenSSH);
        let verdict = match known_hosts.check(self.display_name(), key_bytes) {
            ssh2::CheckResult::Match => HostkeyVerdict::Match,
            ssh2::CheckResult::Mismatch => HostkeyVerdict::Mismatch,
            ssh2::CheckResult::NotFound | ssh2::CheckResult::Failure => HostkeyVerdict::NoMatch,
        };
        Ok((verdict, prompt))
    }

    /// Enumerates the peer's advertised auth methods (spec §4.5 step 5).
    pub fn auth_methods(&self, user: &str) -> Result<Vec<String>> {
        Ok(self
            .session
            .auth_methods(user)
            .map(|s| s.split(',').map(str::to_string).collect())
            .unwrap_or_default())
    }

    /// ssh-agent identities, unless disabled by the caller.
    pub fn try_agent_auth(&self, user: &str, use_agent: bool) -> Result<bool> {
        if !use_agent {
            return Ok(false);
        }
        let mut agent = self.session.agent()?;
        agent.connect()?;
        agent.list_identities()?;
        for identity in agent.identities()? {
            if agent.userauth(user, &identity).is_ok() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Keyfile auth tried with no passphrase, then the supplied
    /// passphrase, then the Store's cached passphrase, in that order
    /// (spec §4.5 step 5's publickey ordering).
    pub fn try_publickey_auth(
        &self,
        user: &str,
        privatekey: &std::path::Path,
        publickey: Option<&std::path::Path>,
        supplied_passphrase: Option<&str>,
        stored_passphrase: Option<&str>,
    ) -> bool {
        if self
            .session
            .userauth_pubkey_file(user, publickey, privatekey, None)
            .is_ok()
        {
            return true;
        }
        for candidate in [supplied_passphrase, stored_passphrase].into_iter().flatten() {
            if candidate.is_empty() {
                continue;
            }
            if self
                .session
                .userauth_pubkey_file(user, publickey, privatekey, Some(candidate))
                .is_ok()
            {
                return true;
            }
        }
        false
    }

    /// Tries `password`, then the in-memory/Store cache if `password` is
    /// absent; counts consecutive failures toward the teardown ceiling
    /// (spec §4.5 step 5 / §8-E6: three `psword` prompts are issued, one
    /// per failed attempt including the first if it came supplied on the
    /// request, before the session is torn down on the fourth failure —
    /// mirrors the original's `pwfail > MAX_PWFAIL` check, not `>=`).
    pub fn try_password_auth(&mut self, user: &str, password: &str) -> Result<bool> {
        if self.session.userauth_password(user, password).is_ok() {
            self.password_failures = 0;
            self.established = true;
            return Ok(true);
        }
        self.password_failures += 1;
        if self.password_failures > MAX_PASSWORD_FAILURES {
            return Err(Error::PasswordRetriesExhausted);
        }
        Ok(false)
    }

    pub fn authenticated(&self) -> bool {
        self.session.authenticated()
    }

    pub fn open_ssh_channel(&self) -> Result<ssh2::Channel> {
        Ok(self.session.channel_session()?)
    }
}

fn ssh_key_type_name(kind: ssh2::HostKeyType) -> &'static str {
    match kind {
        ssh2::HostKeyType::Rsa => "RSA",
        ssh2::HostKeyType::Dss => "DSA",
        _ => "UNKNOWN",
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssh_key_type_name_maps_known_types() {
        assert_eq!(ssh_key_type_name(ssh2::HostKeyType::Rsa), "RSA");
        assert_eq!(ssh_key_type_name(ssh2::HostKeyType::Dss), "DSA");
    }

    #[test]
    fn hex_encode_matches_expected_lowercase_form() {
        assert_eq!(hex_encode(&[0xde, 0xad, 0xbe, 0xef]), "deadbeef");
    }
}
