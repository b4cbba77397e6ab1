//! Component-level versions of spec.md §8's mixer scenarios that don't
//! require a live SSH endpoint (E4's wire shape, E5's Store flow). E6
//! (password retry ceiling) exercises `ssh2::Session::userauth_password`
//! against a real handshake and is out of scope for a toolchain-free,
//! network-free test run; its counting logic is documented at
//! `session.rs`'s `MAX_PASSWORD_FAILURES`.

use mixer_core::store::{HostkeyType, Store};
use mixer_core::wire::{self, Header, Operation};

/// E4: a client's `rpc` request wire-round-trips with the exact field
/// layout spec.md §8 shows (`target`/`user` attrs, muxid preserved),
/// and the daemon's `reply` followed by `complete` both carry the same
/// muxid the request used.
#[test]
fn e4_rpc_request_round_trips_and_reply_then_complete_share_muxid() {
    let request = wire::build_message(Operation::Rpc, 1, &[("target", "r1"), ("user", "u")], b"<get/>");
    let (header, body, consumed) = wire::parse_message(&request).unwrap().unwrap();
    assert_eq!(consumed, request.len());
    assert_eq!(header.operation, Operation::Rpc);
    assert_eq!(header.muxid, 1);
    assert_eq!(header.attr("target"), Some("r1"));
    assert_eq!(header.attr("user"), Some("u"));
    assert_eq!(body, b"<get/>");

    let reply = wire::build_message(Operation::Reply, header.muxid, &[], b"<rpc-reply/>");
    let complete = wire::build_message(Operation::Complete, header.muxid, &[], b"");

    let (reply_header, _, _) = wire::parse_message(&reply).unwrap().unwrap();
    let (complete_header, _, _) = wire::parse_message(&complete).unwrap().unwrap();
    assert_eq!(reply_header.muxid, header.muxid);
    assert_eq!(complete_header.muxid, header.muxid);
}

fn header_for(buf: &[u8]) -> Header {
    wire::parse_message(buf).unwrap().unwrap().0
}

/// E5: with an empty Store, the first hostkey check misses; the daemon
/// issues a `hostkey` prompt frame carrying the fingerprint; once the
/// client's `hostkey` confirmation round-trips and the Store persists
/// the key, a second check against the same key matches.
#[test]
fn e5_hostkey_confirmation_persists_then_matches() {
    let store = Store::open_in_memory().unwrap();
    let raw_key = b"ssh-rsa AAAAB3NzaC1yc2EAAAADAQABAAAB";

    assert_eq!(
        store.check_hostkey("r1:22", HostkeyType::Rsa, raw_key).unwrap(),
        mixer_core::HostkeyVerdict::NoMatch
    );

    let prompt = wire::build_message(Operation::Hostkey, 1, &[("fingerprint", "de:ad:be:ef")], b"");
    let prompt_header = header_for(&prompt);
    assert_eq!(prompt_header.operation, Operation::Hostkey);
    assert_eq!(prompt_header.attr("fingerprint"), Some("de:ad:be:ef"));

    let confirmation = wire::build_message(Operation::Hostkey, prompt_header.muxid, &[("accept", "yes")], b"");
    let confirmation_header = header_for(&confirmation);
    assert_eq!(confirmation_header.attr("accept"), Some("yes"));
    assert_eq!(confirmation_header.muxid, prompt_header.muxid);

    store.save_hostkey("r1:22", HostkeyType::Rsa, raw_key).unwrap();
    assert_eq!(
        store.check_hostkey("r1:22", HostkeyType::Rsa, raw_key).unwrap(),
        mixer_core::HostkeyVerdict::Match
    );
}

/// Boundary behaviour: a framing marker split across two buffers is
/// detected iff the concatenation contains the marker at a boundary.
#[test]
fn netconf_marker_split_boundary_behaviour() {
    use mixer_core::channel::Buffer;

    let mut buf = Buffer::default();
    assert!(!buf.feed(b"<hello/>]]>]"));
    assert!(buf.feed(b"]>"));
    assert_eq!(buf.payload(), b"<hello/>");

    let mut no_marker = Buffer::default();
    assert!(!no_marker.feed(b"<hello/>]]>"));
    assert!(!no_marker.feed(b"not-the-rest"));
}
