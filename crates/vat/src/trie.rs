//! Versioned Patricia trie over an [`Arena`] (spec §3.3, §4.3, §6.2).
//!
//! Every inserted key owns exactly one node/leaf pair, created together by
//! [`add`] and never recreated afterwards; `add`'s splice always leaves one
//! of a new node's two children pointing at itself (the "back pointer" that
//! terminates a radix descent). That invariant — a node's back edge is
//! always its own self-loop, never another node's — is what lets [`delete`]
//! avoid the general down-pointer/up-pointer bookkeeping and just splice the
//! victim's surviving child into its parent's slot.

use std::cmp::Ordering;
use std::mem::size_of;
use std::ptr;

use crate::arena::Arena;
use crate::bits::{self, BitNum, NOBIT};
use crate::error::{Error, Result};
use crate::offset::Offset;

/// Maximum key length in bytes (spec §4.3).
pub const VAT_MAXKEY: usize = 256;

/// On-disk node record, spec §6.2: `length:u16, bit:u16, left:offset,
/// right:offset, refcount:u16, leaf:offset`.
///
/// `length` and `bit` both carry [`BitNum`] values (spec §3.3: "a bit index
/// to test, a key length, both encoded in an internal bit-number form"):
/// `bit` is the decision bit, `length` is the bit-ceiling of the key that
/// created this node (`keylen_bytes << 8`, one past the key's last testable
/// bit — see [`bit_ceiling`]).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct RawNode {
    length: u16,
    bit: u16,
    left: u32,
    right: u32,
    refcount: u16,
    leaf: u32,
}

/// On-disk leaf record, spec §6.2: `refcount:u16, type:u8, length:u16,
/// contents:offset, key:offset`. `length` here is a plain byte count, not a
/// bit number.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct RawLeaf {
    refcount: u16,
    ty: u8,
    length: u16,
    contents: u32,
    key: u32,
}

/// In-arena tree descriptor (spec §3.3's TrieRoot). Owned by the VAT layer,
/// which persists it alongside its per-generation bookkeeping.
#[derive(Debug, Clone, Copy)]
pub struct TrieRoot {
    pub root: Offset,
    /// Declared fixed key length; 0 means "use [`VAT_MAXKEY`]".
    pub keylen: u16,
    /// Byte offset from a leaf's contents to its key, for callers that embed
    /// the key inside the stored record.
    pub key_offset: u16,
    pub generation: u32,
}

impl TrieRoot {
    pub fn new(key_offset: u16) -> Self {
        Self {
            root: Offset::NULL,
            keylen: 0,
            key_offset,
            generation: 0,
        }
    }

    pub fn max_key_len(&self) -> usize {
        if self.keylen == 0 {
            VAT_MAXKEY
        } else {
            self.keylen as usize
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_null()
    }
}

/// Bit-ceiling of a byte length: one past the last testable bit, so
/// `bits::mismatch`/`bits::test` can use it directly as an exclusive bound.
pub const fn bit_ceiling(byte_len: usize) -> BitNum {
    (byte_len as i32) << 8
}

fn encode_bitnum(b: BitNum) -> u16 {
    // NOBIT collides with the single valid bit number at the maximum key
    // length (256 bytes gives bit_ceiling(256)-1 == 0xffff too); an
    // implementation capped at VAT_MAXKEY never actually produces that
    // value as a *decision* bit, only as a length ceiling, so the
    // collision never affects `bit`, only the unused top of `length`.
    if b == NOBIT { 0xffff } else { b as u16 }
}

fn decode_bitnum(raw: u16) -> BitNum {
    if raw == 0xffff { NOBIT } else { raw as BitNum }
}

fn load_node(arena: &Arena, off: Offset) -> RawNode {
    unsafe { ptr::read_unaligned(arena.pointer::<RawNode>(off)) }
}

fn store_node(arena: &mut Arena, off: Offset, node: RawNode) {
    unsafe { ptr::write_unaligned(arena.pointer::<RawNode>(off), node) }
}

fn load_leaf(arena: &Arena, off: Offset) -> RawLeaf {
    unsafe { ptr::read_unaligned(arena.pointer::<RawLeaf>(off)) }
}

fn store_leaf(arena: &mut Arena, off: Offset, leaf: RawLeaf) {
    unsafe { ptr::write_unaligned(arena.pointer::<RawLeaf>(off), leaf) }
}

fn read_key(arena: &Arena, leaf: &RawLeaf) -> Vec<u8> {
    let len = leaf.length as usize;
    if len == 0 {
        return Vec::new();
    }
    let ptr = arena.pointer::<u8>(Offset::new(leaf.key));
    unsafe { std::slice::from_raw_parts(ptr, len) }.to_vec()
}

fn node_bit(arena: &Arena, off: Offset) -> BitNum {
    decode_bitnum(load_node(arena, off).bit)
}

fn node_key(arena: &Arena, off: Offset) -> Vec<u8> {
    let node = load_node(arena, off);
    let leaf = load_leaf(arena, Offset::new(node.leaf));
    read_key(arena, &leaf)
}

pub(crate) const NODE_SIZE: usize = size_of::<RawNode>();
pub(crate) const LEAF_SIZE: usize = size_of::<RawLeaf>();

/// Duplicates a node into a fresh allocation, bumping its leaf's refcount
/// (the leaf is now reachable from both the original and the clone). Used
/// by the generation layer to copy a shared ancestor before mutating it.
pub(crate) fn clone_node(arena: &mut Arena, off: Offset) -> Result<Offset> {
    let node = load_node(arena, off);
    let new_off = arena.allocate(NODE_SIZE)?;
    let mut leaf = load_leaf(arena, Offset::new(node.leaf));
    leaf.refcount = leaf.refcount.saturating_add(1);
    store_leaf(arena, Offset::new(node.leaf), leaf);
    let mut copy = node;
    copy.refcount = 1;
    store_node(arena, new_off, copy);
    Ok(new_off)
}

/// Overwrites one child pointer of a node already owned by the caller.
pub(crate) fn set_child(arena: &mut Arena, off: Offset, right: bool, child: Offset) {
    let mut node = load_node(arena, off);
    if right {
        node.right = child.get();
    } else {
        node.left = child.get();
    }
    store_node(arena, off, node);
}

/// Walks down from `root` testing `key` at each node's decision bit, until
/// a step's bit numbers stop increasing (spec §4.3 `search`). Returns the
/// node reached; `Offset::NULL` if the tree is empty.
pub fn search(arena: &Arena, root: &TrieRoot, key: &[u8]) -> Offset {
    if root.is_empty() {
        return Offset::NULL;
    }
    let keylen_bits = bit_ceiling(key.len());
    let mut cur = root.root;
    loop {
        let node = load_node(arena, cur);
        let bit = decode_bitnum(node.bit);
        let go_right = bit >= 0 && bit < keylen_bits && bits::test(key, bit);
        let next = if go_right { node.right } else { node.left };
        let next_off = Offset::new(next);
        let next_bit = node_bit(arena, next_off);
        if next_bit <= bit {
            return next_off;
        }
        cur = next_off;
    }
}

/// Follows `left` (or `right`, if `!want_left`) from `from` until a
/// back-pointer is reached, giving the leftmost/rightmost leaf of the
/// subtree rooted at `from`.
fn extreme(arena: &Arena, from: Offset, want_left: bool) -> Offset {
    let mut cur = from;
    loop {
        let node = load_node(arena, cur);
        let bit = decode_bitnum(node.bit);
        let next = if want_left { node.left } else { node.right };
        let next_off = Offset::new(next);
        if node_bit(arena, next_off) <= bit {
            return next_off;
        }
        cur = next_off;
    }
}

fn release_node(arena: &mut Arena, node_off: Offset, leaf_off: Offset) {
    let mut leaf = load_leaf(arena, leaf_off);
    leaf.refcount = leaf.refcount.saturating_sub(1);
    if leaf.refcount == 0 {
        arena.free(leaf_off, size_of::<RawLeaf>());
    } else {
        store_leaf(arena, leaf_off, leaf);
    }
    arena.free(node_off, size_of::<RawNode>());
}

/// The edge at which a new key should be spliced into the tree: `path` is
/// the root-to-parent chain of (node, went-right) steps, and `other` is the
/// subtree that becomes the new node's non-self-loop child. Shared by
/// [`add`] and the generation layer's copy-on-write insert.
pub(crate) struct InsertionPoint {
    pub diff: BitNum,
    pub path: Vec<(Offset, bool)>,
    pub other: Offset,
}

/// Finds where `key` would splice into the tree, or `None` if it is already
/// present or collides as a prefix/superstring of an existing key. Does not
/// mutate the tree.
pub(crate) fn locate_insertion(arena: &Arena, root: &TrieRoot, key: &[u8]) -> Option<InsertionPoint> {
    let new_length = bit_ceiling(key.len());
    let cur_off = search(arena, root, key);
    let cur_key = node_key(arena, cur_off);
    let cur_node = load_node(arena, cur_off);
    let m = new_length.min(decode_bitnum(cur_node.length));
    let diff = bits::mismatch(key, &cur_key, m);
    if diff >= m {
        return None;
    }

    let mut path = Vec::new();
    let mut cur2 = root.root;
    loop {
        let node2 = load_node(arena, cur2);
        let bit2 = decode_bitnum(node2.bit);
        if bit2 >= diff {
            break;
        }
        let go_right = bit2 >= 0 && bits::test(key, bit2);
        path.push((cur2, go_right));
        let next2_off = Offset::new(if go_right { node2.right } else { node2.left });
        let stop = node_bit(arena, next2_off) <= bit2;
        cur2 = next2_off;
        if stop {
            break;
        }
    }

    Some(InsertionPoint { diff, path, other: cur2 })
}

/// Allocates and wires a fresh node/leaf pair for `key` at a previously
/// located [`InsertionPoint`], without touching the rest of the tree.
pub(crate) fn splice_new_leaf(
    arena: &mut Arena,
    new_length: BitNum,
    diff: BitNum,
    other: Offset,
    contents: Offset,
    ty: u8,
    key_ptr: Offset,
    key: &[u8],
) -> Result<Offset> {
    let node_off = arena.allocate(NODE_SIZE)?;
    let leaf_off = arena.allocate(LEAF_SIZE)?;
    store_leaf(
        arena,
        leaf_off,
        RawLeaf {
            refcount: 1,
            ty,
            length: key.len() as u16,
            contents: contents.get(),
            key: key_ptr.get(),
        },
    );
    let goes_right = bits::test(key, diff);
    let (left, right) = if goes_right {
        (other.get(), node_off.get())
    } else {
        (node_off.get(), other.get())
    };
    store_node(
        arena,
        node_off,
        RawNode {
            length: encode_bitnum(new_length),
            bit: encode_bitnum(diff),
            left,
            right,
            refcount: 1,
            leaf: leaf_off.get(),
        },
    );
    Ok(node_off)
}

/// Allocates a node and leaf, initialises refcounts to 1, and either seats
/// them as the tree's sole entry or splices the new node at the first edge
/// whose bit is at or past the mismatch point (spec §4.3 `add`). Returns
/// `Ok(false)` without mutating the tree if `key` is already present or is
/// a prefix/superstring collision with an existing key.
pub fn add(
    arena: &mut Arena,
    root: &mut TrieRoot,
    contents: Offset,
    ty: u8,
    key_ptr: Offset,
    key: &[u8],
) -> Result<bool> {
    if key.is_empty() || key.len() > root.max_key_len() {
        return Err(Error::InvalidKeyLength);
    }
    let new_length = bit_ceiling(key.len());

    if root.is_empty() {
        let node_off = arena.allocate(NODE_SIZE)?;
        let leaf_off = arena.allocate(LEAF_SIZE)?;
        store_leaf(
            arena,
            leaf_off,
            RawLeaf {
                refcount: 1,
                ty,
                length: key.len() as u16,
                contents: contents.get(),
                key: key_ptr.get(),
            },
        );
        store_node(
            arena,
            node_off,
            RawNode {
                length: encode_bitnum(new_length),
                bit: encode_bitnum(NOBIT),
                left: node_off.get(),
                right: node_off.get(),
                refcount: 1,
                leaf: leaf_off.get(),
            },
        );
        root.root = node_off;
        return Ok(true);
    }

    let point = match locate_insertion(arena, root, key) {
        Some(p) => p,
        None => return Ok(false),
    };

    let node_off = splice_new_leaf(arena, new_length, point.diff, point.other, contents, ty, key_ptr, key)?;

    let &(parent_off, parent_right) = point
        .path
        .last()
        .expect("a non-empty tree's descent always passes through its root");
    let mut parent = load_node(arena, parent_off);
    if parent_right {
        parent.right = node_off.get();
    } else {
        parent.left = node_off.get();
    }
    store_node(arena, parent_off, parent);

    Ok(true)
}

/// Removes `victim_off` from the tree (spec §4.3 `delete`). Returns
/// `Ok(false)` if the tree is empty or `victim_off` does not belong to it.
pub fn delete(arena: &mut Arena, root: &mut TrieRoot, victim_off: Offset) -> Result<bool> {
    if root.is_empty() || victim_off.is_null() {
        return Ok(false);
    }

    let victim = load_node(arena, victim_off);
    let victim_bit = decode_bitnum(victim.bit);

    if victim_bit == NOBIT {
        if root.root != victim_off {
            return Ok(false);
        }
        if victim.left == victim_off.get() && victim.right == victim_off.get() {
            release_node(arena, victim_off, Offset::new(victim.leaf));
            root.root = Offset::NULL;
            return Ok(true);
        }
        // The down side of a NOBIT node is always `left` (its own bit
        // never tests true, so `add`'s re-descent always continues left).
        let new_root_off = Offset::new(victim.left);
        let mut new_root = load_node(arena, new_root_off);
        new_root.bit = encode_bitnum(NOBIT);
        store_node(arena, new_root_off, new_root);
        root.root = new_root_off;
        release_node(arena, victim_off, Offset::new(victim.leaf));
        return Ok(true);
    }

    let point = match locate_deletion(arena, root, victim_off) {
        Some(p) => p,
        None => return Ok(false),
    };

    let &(parent_off, parent_right) = point
        .path
        .last()
        .expect("a reachable non-NOBIT victim always has a structural parent");
    let mut parent = load_node(arena, parent_off);
    if parent_right {
        parent.right = point.other.get();
    } else {
        parent.left = point.other.get();
    }
    store_node(arena, parent_off, parent);

    release_node(arena, victim_off, Offset::new(victim.leaf));
    Ok(true)
}

/// The edge that must be rewired to remove a non-NOBIT node: `path` is the
/// root-to-parent chain of (node, went-right) steps reaching the victim,
/// and `other` is the victim's surviving (non-self-loop) child. `None` for
/// the NOBIT root sentinel, which the generation layer does not support
/// deleting.
pub(crate) struct DeletionPoint {
    pub path: Vec<(Offset, bool)>,
    pub other: Offset,
}

/// Locates the structural parent of `victim_off` by re-descending on its
/// own key, relying on the self-loop invariant: a descent on a node's own
/// key always reaches that node via its true structural parent, never a
/// sibling's back edge. Returns `None` for the NOBIT root (callers must
/// handle that case separately) or if `victim_off` is unreachable.
pub(crate) fn locate_deletion(arena: &Arena, root: &TrieRoot, victim_off: Offset) -> Option<DeletionPoint> {
    let victim = load_node(arena, victim_off);
    if decode_bitnum(victim.bit) == NOBIT {
        return None;
    }

    let key = node_key(arena, victim_off);
    let mut path = Vec::new();
    let mut cur = root.root;
    while cur != victim_off {
        let node = load_node(arena, cur);
        let bit = decode_bitnum(node.bit);
        let go_right = bit >= 0 && bits::test(&key, bit);
        path.push((cur, go_right));
        let next = Offset::new(if go_right { node.right } else { node.left });
        if next == cur {
            return None;
        }
        cur = next;
    }
    if path.is_empty() {
        return None;
    }

    let self_on_right = victim.right == victim_off.get();
    let other = Offset::new(if self_on_right { victim.left } else { victim.right });
    Some(DeletionPoint { path, other })
}

/// Successor of `node_off` (or the leftmost leaf if `None`), by tracking
/// the last left turn during a descent and going right then leftmost from
/// it (spec §4.3 `find_next`).
pub fn find_next(arena: &Arena, root: &TrieRoot, node_off: Option<Offset>) -> Offset {
    if root.is_empty() {
        return Offset::NULL;
    }
    let target = match node_off {
        None => return extreme(arena, root.root, true),
        Some(t) => t,
    };
    let key = node_key(arena, target);
    let mut last_left: Option<Offset> = None;
    let mut cur = root.root;
    loop {
        let node = load_node(arena, cur);
        let bit = decode_bitnum(node.bit);
        let go_right = bit >= 0 && bits::test(&key, bit);
        if !go_right {
            last_left = Some(cur);
        }
        let next_off = Offset::new(if go_right { node.right } else { node.left });
        if node_bit(arena, next_off) <= bit {
            debug_assert_eq!(next_off, target, "descent on a node's own key must reach it");
            break;
        }
        cur = next_off;
    }
    match last_left {
        None => Offset::NULL,
        Some(turn) => {
            let turn_node = load_node(arena, turn);
            extreme(arena, Offset::new(turn_node.right), true)
        }
    }
}

/// Predecessor of `node_off` (or the rightmost leaf if `None`); the mirror
/// image of [`find_next`].
pub fn find_prev(arena: &Arena, root: &TrieRoot, node_off: Option<Offset>) -> Offset {
    if root.is_empty() {
        return Offset::NULL;
    }
    let target = match node_off {
        None => return extreme(arena, root.root, false),
        Some(t) => t,
    };
    let key = node_key(arena, target);
    let mut last_right: Option<Offset> = None;
    let mut cur = root.root;
    loop {
        let node = load_node(arena, cur);
        let bit = decode_bitnum(node.bit);
        let go_right = bit >= 0 && bits::test(&key, bit);
        if go_right {
            last_right = Some(cur);
        }
        let next_off = Offset::new(if go_right { node.right } else { node.left });
        if node_bit(arena, next_off) <= bit {
            debug_assert_eq!(next_off, target, "descent on a node's own key must reach it");
            break;
        }
        cur = next_off;
    }
    match last_right {
        None => Offset::NULL,
        Some(turn) => {
            let turn_node = load_node(arena, turn);
            extreme(arena, Offset::new(turn_node.left), false)
        }
    }
}

/// Smallest key with `prefix` as a prefix, or `Offset::NULL` if none
/// (spec §4.3 `subtree_match`).
pub fn subtree_match(arena: &Arena, root: &TrieRoot, prefix: &[u8]) -> Offset {
    if root.is_empty() {
        return Offset::NULL;
    }
    let reached = search(arena, root, prefix);
    let node = load_node(arena, reached);
    let leaf = load_leaf(arena, Offset::new(node.leaf));
    if (leaf.length as usize) < prefix.len() {
        return Offset::NULL;
    }
    let key = read_key(arena, &leaf);
    let prefix_bits = bit_ceiling(prefix.len());
    if bits::mismatch(prefix, &key, prefix_bits) >= prefix_bits {
        reached
    } else {
        Offset::NULL
    }
}

/// Successor of `node_off` within the subtree matching `prefix_bits`, or
/// `Offset::NULL` once the traversal has left the subtree (spec §4.3
/// `subtree_next`).
pub fn subtree_next(arena: &Arena, root: &TrieRoot, node_off: Offset, prefix_bits: BitNum) -> Offset {
    if root.is_empty() {
        return Offset::NULL;
    }
    let key = node_key(arena, node_off);
    let mut last_left: Option<Offset> = None;
    let mut cur = root.root;
    loop {
        let node = load_node(arena, cur);
        let bit = decode_bitnum(node.bit);
        let go_right = bit >= 0 && bits::test(&key, bit);
        if !go_right {
            last_left = Some(cur);
        }
        let next_off = Offset::new(if go_right { node.right } else { node.left });
        if node_bit(arena, next_off) <= bit {
            break;
        }
        cur = next_off;
    }
    match last_left {
        Some(turn) if decode_bitnum(load_node(arena, turn).bit) > prefix_bits => {
            extreme(arena, Offset::new(load_node(arena, turn).right), true)
        }
        _ => Offset::NULL,
    }
}

/// SNMP-style "smallest key ≥ `key`" (spec §4.3 `getnext`); returns an exact
/// match only when `return_equal` is set.
pub fn getnext(arena: &Arena, root: &TrieRoot, key: &[u8], return_equal: bool) -> Offset {
    if root.is_empty() {
        return Offset::NULL;
    }
    let keylen_bits = bit_ceiling(key.len());

    let mut path = Vec::new();
    let mut last_left: Option<Offset> = None;
    let mut last_right: Option<Offset> = None;
    let mut cur = root.root;
    loop {
        path.push(cur);
        let node = load_node(arena, cur);
        let bit = decode_bitnum(node.bit);
        let go_right = bit >= 0 && bit < keylen_bits && bits::test(key, bit);
        if go_right {
            last_right = Some(cur);
        } else {
            last_left = Some(cur);
        }
        let next_off = Offset::new(if go_right { node.right } else { node.left });
        if node_bit(arena, next_off) <= bit {
            cur = next_off;
            break;
        }
        cur = next_off;
    }

    let current_key = node_key(arena, cur);
    let current_node = load_node(arena, cur);
    let current_leaf = load_leaf(arena, Offset::new(current_node.leaf));
    let m = bit_ceiling(key.len().min(current_leaf.length as usize));
    let diff = bits::mismatch(key, &current_key, m);

    if diff >= m {
        let key_len = key.len();
        let cur_len = current_leaf.length as usize;
        if key_len < cur_len || (key_len == cur_len && return_equal) {
            return cur;
        }
        if key_len == cur_len {
            return find_next(arena, root, Some(cur));
        }
        return match last_left {
            Some(turn) => extreme(arena, Offset::new(load_node(arena, turn).right), true),
            None => Offset::NULL,
        };
    }

    if bits::test(key, diff) {
        for &anc in path.iter().rev() {
            let anc_node = load_node(arena, anc);
            let anc_bit = decode_bitnum(anc_node.bit);
            if anc_bit >= 0 && anc_bit < diff {
                return extreme(arena, Offset::new(anc_node.right), true);
            }
        }
        return Offset::NULL;
    }

    match last_right {
        Some(turn) if decode_bitnum(load_node(arena, turn).bit) >= diff => {
            let mut cur2 = root.root;
            loop {
                let node2 = load_node(arena, cur2);
                let bit2 = decode_bitnum(node2.bit);
                if bit2 >= diff {
                    return cur2;
                }
                let go_right2 = bit2 >= 0 && bits::test(key, bit2);
                let next2 = Offset::new(if go_right2 { node2.right } else { node2.left });
                if node_bit(arena, next2) <= bit2 {
                    return next2;
                }
                cur2 = next2;
            }
        }
        _ => cur,
    }
}

/// Lexicographic comparison of two nodes' keys (spec §4.3), padded to the
/// longer of the two declared lengths.
pub fn compare(arena: &Arena, a: Offset, b: Offset) -> Ordering {
    let ka = node_key(arena, a);
    let kb = node_key(arena, b);
    bits::compare_keys(&ka, &kb, ka.len().max(kb.len()))
}

/// Reads the leaf data (type tag, contents offset, key length) associated
/// with a node, for callers that need more than the raw key bytes.
pub fn leaf_info(arena: &Arena, node_off: Offset) -> Option<(u8, Offset, u16)> {
    if node_off.is_null() {
        return None;
    }
    let node = load_node(arena, node_off);
    let leaf = load_leaf(arena, Offset::new(node.leaf));
    Some((leaf.ty, Offset::new(leaf.contents), leaf.length))
}

/// Reads the key bytes stored at a node's leaf.
pub fn key_at(arena: &Arena, node_off: Offset) -> Option<Vec<u8>> {
    if node_off.is_null() {
        return None;
    }
    Some(node_key(arena, node_off))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::OpenFlags;
    use tempfile::tempdir;

    fn open_arena(path: &std::path::Path) -> Arena {
        Arena::open(path, 0, 1 << 20, None, OpenFlags::CREATE).unwrap()
    }

    fn insert(arena: &mut Arena, root: &mut TrieRoot, key: &[u8]) -> Offset {
        let contents = arena.allocate(key.len().max(1)).unwrap();
        let ptr = arena.pointer::<u8>(contents);
        unsafe { std::ptr::copy_nonoverlapping(key.as_ptr(), ptr, key.len()) };
        assert!(add(arena, root, contents, 0, contents, key).unwrap());
        search(arena, root, key)
    }

    #[test]
    fn insert_then_search_finds_every_key() {
        let dir = tempdir().unwrap();
        let mut arena = open_arena(&dir.path().join("t.vat"));
        let mut root = TrieRoot::new(0);
        let keys: [&[u8]; 5] = [b"alpha", b"beta", b"gamma", b"a", b"alphabet"];
        for k in keys {
            insert(&mut arena, &mut root, k);
        }
        for k in keys {
            let off = search(&arena, &root, k);
            assert_eq!(key_at(&arena, off).unwrap(), k.to_vec());
        }
    }

    #[test]
    fn duplicate_insert_rejected() {
        let dir = tempdir().unwrap();
        let mut arena = open_arena(&dir.path().join("t.vat"));
        let mut root = TrieRoot::new(0);
        insert(&mut arena, &mut root, b"dup");
        let contents = arena.allocate(8).unwrap();
        assert!(!add(&mut arena, &mut root, contents, 0, contents, b"dup").unwrap());
    }

    #[test]
    fn find_next_and_find_prev_are_mutual_inverses() {
        let dir = tempdir().unwrap();
        let mut arena = open_arena(&dir.path().join("t.vat"));
        let mut root = TrieRoot::new(0);
        let keys: [&[u8]; 6] = [b"m", b"a", b"z", b"mm", b"ab", b"zz"];
        let mut offs = Vec::new();
        for k in keys {
            offs.push(insert(&mut arena, &mut root, k));
        }
        for &off in &offs {
            let nxt = find_next(&arena, &root, Some(off));
            if !nxt.is_null() {
                assert_eq!(find_prev(&arena, &root, Some(nxt)), off);
            }
        }
        assert!(!find_prev(&arena, &root, None).is_null());
    }

    #[test]
    fn delete_the_no_bit_node_promotes_its_child() {
        let dir = tempdir().unwrap();
        let mut arena = open_arena(&dir.path().join("t.vat"));
        let mut root = TrieRoot::new(0);
        let first = insert(&mut arena, &mut root, b"first");
        insert(&mut arena, &mut root, b"second");
        assert_eq!(root.root, first);
        assert!(delete(&mut arena, &mut root, first).unwrap());
        assert_ne!(root.root, first);
        assert_eq!(node_bit(&arena, root.root), NOBIT);
        let found = search(&arena, &root, b"second");
        assert_eq!(key_at(&arena, found).unwrap(), b"second".to_vec());
    }

    #[test]
    fn delete_then_reinsert_round_trips() {
        let dir = tempdir().unwrap();
        let mut arena = open_arena(&dir.path().join("t.vat"));
        let mut root = TrieRoot::new(0);
        let keys: [&[u8]; 4] = [b"one", b"two", b"three", b"four"];
        let offs: Vec<Offset> = keys.iter().map(|k| insert(&mut arena, &mut root, k)).collect();
        assert!(delete(&mut arena, &mut root, offs[2]).unwrap());
        for (i, k) in keys.iter().enumerate() {
            if i == 2 {
                continue;
            }
            let off = search(&arena, &root, k);
            assert_eq!(key_at(&arena, off).unwrap(), k.to_vec());
        }
        insert(&mut arena, &mut root, b"three");
        let off = search(&arena, &root, b"three");
        assert_eq!(key_at(&arena, off).unwrap(), b"three".to_vec());
    }

    #[test]
    fn subtree_match_finds_smallest_key_with_prefix() {
        let dir = tempdir().unwrap();
        let mut arena = open_arena(&dir.path().join("t.vat"));
        let mut root = TrieRoot::new(0);
        for k in [b"car".as_slice(), b"cart", b"care", b"dog"] {
            insert(&mut arena, &mut root, k);
        }
        let off = subtree_match(&arena, &root, b"car");
        assert!(!off.is_null());
        let found = key_at(&arena, off).unwrap();
        assert!(found.starts_with(b"car"));
        assert!(subtree_match(&arena, &root, b"zzz").is_null());
    }

    #[test]
    fn getnext_returns_smallest_key_not_less_than_input() {
        let dir = tempdir().unwrap();
        let mut arena = open_arena(&dir.path().join("t.vat"));
        let mut root = TrieRoot::new(0);
        for k in [b"bb".as_slice(), b"dd", b"ff"] {
            insert(&mut arena, &mut root, k);
        }
        let off = getnext(&arena, &root, b"cc", false);
        assert_eq!(key_at(&arena, off).unwrap(), b"dd".to_vec());

        let eq = getnext(&arena, &root, b"dd", true);
        assert_eq!(key_at(&arena, eq).unwrap(), b"dd".to_vec());

        let strictly_after = getnext(&arena, &root, b"dd", false);
        assert_eq!(key_at(&arena, strictly_after).unwrap(), b"ff".to_vec());
    }
}
