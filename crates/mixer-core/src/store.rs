//! Small relational persistence for targets, saved passwords, and host
//! keys (spec §3.6, §4.6). Grounded on `original_source/mixer/db.c`'s
//! DDL and query shapes, reworked onto `rusqlite` (bundled) behind a
//! `parking_lot::Mutex` since the original serializes all access through
//! a single connection under the EventLoop's single-threaded model.

use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::Result;
use crate::request::Request;
use crate::session::HostkeyVerdict;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS general (
    version INTEGER NOT NULL,
    privatekey TEXT,
    publickey TEXT,
    passphrase TEXT,
    save_passphrase INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS devices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT UNIQUE NOT NULL,
    hostname TEXT NOT NULL,
    port INTEGER,
    username TEXT,
    password TEXT,
    save_password INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS hostkeys (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    type INTEGER NOT NULL,
    hostkey_b64 TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS groups (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT UNIQUE NOT NULL
);

CREATE TABLE IF NOT EXISTS groups_members (
    group_id INTEGER NOT NULL,
    device_id INTEGER NOT NULL
);
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostkeyType {
    Rsa,
    Dsa,
}

impl HostkeyType {
    fn code(self) -> i64 {
        match self {
            Self::Rsa => 0,
            Self::Dsa => 1,
        }
    }

    fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Rsa),
            1 => Some(Self::Dsa),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Rsa => "RSA",
            Self::Dsa => "DSA",
        }
    }
}

/// Parsed `[user@]name[:port]` target syntax (spec §4.6's `target_lookup`).
#[derive(Debug, Clone, Default)]
pub struct TargetSyntax {
    pub user: Option<String>,
    pub name: String,
    pub port: Option<u16>,
}

/// Parses `target` into its `user@`/`:port` components without touching
/// the Store; kept free-standing so it can be unit tested without a
/// database.
pub fn parse_target(target: &str) -> TargetSyntax {
    let (user, rest) = match target.split_once('@') {
        Some((u, rest)) => (Some(u.to_string()), rest),
        None => (None, target),
    };
    let (name, port) = match rest.rsplit_once(':') {
        Some((name, port)) => (name.to_string(), port.parse::<u16>().ok()),
        None => (rest.to_string(), None),
    };
    TargetSyntax { user, name, port }
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Strips any leading `"ssh-rsa "`/`"ssh-dss "` ASCII algorithm
    /// prefix before base64-encoding the key blob, per `mx_db_save_hostkey`.
    fn encode_hostkey(raw: &[u8]) -> String {
        let stripped = raw
            .strip_prefix(b"ssh-rsa ")
            .or_else(|| raw.strip_prefix(b"ssh-dss "))
            .unwrap_or(raw);
        BASE64_STANDARD.encode(stripped)
    }

    pub fn check_hostkey(&self, name: &str, key_type: HostkeyType, raw_key: &[u8]) -> Result<HostkeyVerdict> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT type, hostkey_b64 FROM hostkeys WHERE name = ?1 ORDER BY id DESC LIMIT 1")?;
        let row: Option<(i64, String)> = stmt
            .query_row(params![name], |r| Ok((r.get(0)?, r.get(1)?)))
            .optional()?;

        let encoded = Self::encode_hostkey(raw_key);
        Ok(match row {
            Some((stored_type, stored_key)) if HostkeyType::from_code(stored_type) == Some(key_type) && stored_key == encoded => {
                HostkeyVerdict::Match
            }
            Some(_) => HostkeyVerdict::Mismatch,
            None => HostkeyVerdict::NoMatch,
        })
    }

    /// Fetches the most recently saved hostkey row for `name`, if any, so
    /// a caller already holding the peer's current key can compare
    /// without re-deriving the comparison `check_hostkey` performs
    /// internally (used by `dispatch::open_for_request`, which needs the
    /// type/key pair for the `hostkey` prompt's Store round-trip).
    pub fn get_hostkey(&self, name: &str) -> Result<Option<(HostkeyType, String)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT type, hostkey_b64 FROM hostkeys WHERE name = ?1 ORDER BY id DESC LIMIT 1")?;
        let row: Option<(i64, String)> = stmt
            .query_row(params![name], |r| Ok((r.get(0)?, r.get(1)?)))
            .optional()?;
        Ok(row.and_then(|(code, key)| HostkeyType::from_code(code).map(|t| (t, key))))
    }

    /// Deletes prior rows for `name`, inserts the new key (spec §4.6).
    pub fn save_hostkey(&self, name: &str, key_type: HostkeyType, raw_key: &[u8]) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM hostkeys WHERE name = ?1", params![name])?;
        conn.execute(
            "INSERT INTO hostkeys (name, type, hostkey_b64) VALUES (?1, ?2, ?3)",
            params![name, key_type.code(), Self::encode_hostkey(raw_key)],
        )?;
        Ok(())
    }

    pub fn get_passphrase(&self) -> Result<Option<String>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row("SELECT passphrase FROM general LIMIT 1", [], |r| r.get(0))
            .optional()?
            .flatten())
    }

    /// No-op when `general.save_passphrase = 0`.
    pub fn save_passphrase(&self, passphrase: &str) -> Result<()> {
        let conn = self.conn.lock();
        let save_passphrase: Option<i64> = conn
            .query_row("SELECT save_passphrase FROM general LIMIT 1", [], |r| r.get(0))
            .optional()?;
        if save_passphrase != Some(1) {
            return Ok(());
        }
        conn.execute("UPDATE general SET passphrase = ?1", params![passphrase])?;
        Ok(())
    }

    /// No-op when the device row's `save_password = 0`.
    pub fn save_password(&self, target_name: &str, password: &str) -> Result<()> {
        let conn = self.conn.lock();
        let save_password: Option<i64> = conn
            .query_row("SELECT save_password FROM devices WHERE name = ?1", params![target_name], |r| r.get(0))
            .optional()?;
        if save_password != Some(1) {
            return Ok(());
        }
        conn.execute("UPDATE devices SET password = ?1 WHERE name = ?2", params![password, target_name])?;
        Ok(())
    }

    /// Reads the singleton `general` row's keyfile paths (spec §3.6),
    /// used as the publickey-auth fallback identity when no per-request
    /// keyfile is configured. `None` if the row is absent or both
    /// columns are empty.
    pub fn get_keypair(&self) -> Result<Option<(String, String)>> {
        let conn = self.conn.lock();
        let row: Option<(Option<String>, Option<String>)> = conn
            .query_row("SELECT privatekey, publickey FROM general LIMIT 1", [], |r| Ok((r.get(0)?, r.get(1)?)))
            .optional()?;
        Ok(row.and_then(|(privatekey, publickey)| {
            let privatekey = privatekey?;
            if privatekey.is_empty() {
                return None;
            }
            Some((privatekey, publickey.unwrap_or_default()))
        }))
    }

    /// Parses `target`, overriding stored device values with syntax
    /// elements present in `target` itself, and fills the Request's
    /// `hostname`, `port`, `user`, `password` (spec §4.6).
    pub fn target_lookup(&self, target: &str, request: &mut Request) -> Result<bool> {
        let syntax = parse_target(target);
        let conn = self.conn.lock();
        let row: Option<(String, Option<i64>, Option<String>, Option<String>)> = conn
            .query_row(
                "SELECT hostname, port, username, password FROM devices WHERE name = ?1",
                params![syntax.name],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .optional()?;

        let Some((hostname, db_port, db_user, db_password)) = row else {
            return Ok(false);
        };

        request.hostname = Some(hostname);
        request.port = syntax.port.or(db_port.map(|p| p as u16)).unwrap_or(22);
        request.user = syntax.user.or(db_user);
        request.password = db_password;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestKind;

    #[test]
    fn parse_target_splits_user_name_and_port() {
        let s = parse_target("admin@router1:2222");
        assert_eq!(s.user.as_deref(), Some("admin"));
        assert_eq!(s.name, "router1");
        assert_eq!(s.port, Some(2222));
    }

    #[test]
    fn parse_target_handles_bare_name() {
        let s = parse_target("router1");
        assert_eq!(s.user, None);
        assert_eq!(s.name, "router1");
        assert_eq!(s.port, None);
    }

    #[test]
    fn hostkey_round_trip_matches_then_mismatches_on_changed_key() {
        let store = Store::open_in_memory().unwrap();
        store.save_hostkey("router1:22", HostkeyType::Rsa, b"ssh-rsa abc123").unwrap();
        assert_eq!(
            store.check_hostkey("router1:22", HostkeyType::Rsa, b"ssh-rsa abc123").unwrap(),
            HostkeyVerdict::Match
        );
        assert_eq!(
            store.check_hostkey("router1:22", HostkeyType::Rsa, b"ssh-rsa zzz999").unwrap(),
            HostkeyVerdict::Mismatch
        );
        assert_eq!(
            store.check_hostkey("router2:22", HostkeyType::Rsa, b"ssh-rsa abc123").unwrap(),
            HostkeyVerdict::NoMatch
        );
    }

    #[test]
    fn get_hostkey_returns_most_recent_row_or_none() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.get_hostkey("router1:22").unwrap(), None);

        store.save_hostkey("router1:22", HostkeyType::Rsa, b"ssh-rsa abc123").unwrap();
        store.save_hostkey("router1:22", HostkeyType::Dsa, b"ssh-dss def456").unwrap();
        let (key_type, encoded) = store.get_hostkey("router1:22").unwrap().unwrap();
        assert_eq!(key_type, HostkeyType::Dsa);
        assert_eq!(encoded, Store::encode_hostkey(b"ssh-dss def456"));
    }

    #[test]
    fn get_keypair_is_none_without_a_general_row_or_empty_privatekey() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.get_keypair().unwrap(), None);

        let conn = store.conn.lock();
        conn.execute(
            "INSERT INTO general (version, privatekey, publickey) VALUES (1, '', '')",
            [],
        )
        .unwrap();
        drop(conn);
        assert_eq!(store.get_keypair().unwrap(), None);

        let conn = store.conn.lock();
        conn.execute(
            "UPDATE general SET privatekey = '/home/user/.ssh/id_rsa', publickey = '/home/user/.ssh/id_rsa.pub'",
            [],
        )
        .unwrap();
        drop(conn);
        assert_eq!(
            store.get_keypair().unwrap(),
            Some(("/home/user/.ssh/id_rsa".to_string(), "/home/user/.ssh/id_rsa.pub".to_string()))
        );
    }

    #[test]
    fn save_password_is_a_no_op_without_the_device_opt_in() {
        let store = Store::open_in_memory().unwrap();
        let conn = store.conn.lock();
        conn.execute(
            "INSERT INTO devices (name, hostname, save_password) VALUES ('router1', 'router1.example', 0)",
            [],
        )
        .unwrap();
        drop(conn);

        store.save_password("router1", "hunter2").unwrap();
        let conn = store.conn.lock();
        let stored: Option<String> = conn
            .query_row("SELECT password FROM devices WHERE name = 'router1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(stored, None);
    }

    #[test]
    fn target_lookup_fills_request_from_device_row_and_syntax_override() {
        let store = Store::open_in_memory().unwrap();
        let conn = store.conn.lock();
        conn.execute(
            "INSERT INTO devices (name, hostname, port, username, password) VALUES ('router1', 'router1.example', 22, 'orig', 'secret')",
            [],
        )
        .unwrap();
        drop(conn);

        let mut req = Request::new(1, 0, RequestKind::Rpc, "admin@router1:2022", 0);
        assert!(store.target_lookup("admin@router1:2022", &mut req).unwrap());
        assert_eq!(req.hostname.as_deref(), Some("router1.example"));
        assert_eq!(req.port, 2022);
        assert_eq!(req.user.as_deref(), Some("admin"));
        assert_eq!(req.password.as_deref(), Some("secret"));
    }
}
