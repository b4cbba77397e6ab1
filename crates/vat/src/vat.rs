//! VAT handle and copy-on-write generations over a [`Trie`](crate::trie)
//! (spec §3.4, §4.4, §9).
//!
//! A [`VatHandle`] owns one [`Arena`] plus the user-space bookkeeping the
//! arena itself has no notion of: a generation counter and an ownership
//! map. A [`Tree`] is cheap to derive from another tree's current state
//! (`derive` just copies a root offset), and stays cheap to mutate because
//! [`cow_add`]/[`cow_delete`] only clone the spine nodes a derived
//! generation doesn't already own outright — every other node keeps being
//! shared with whichever generation created it.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::arena::{Arena, OpenFlags};
use crate::error::Result;
use crate::offset::Offset;
use crate::trie::{self, TrieRoot};

/// Generation id meaning "no parent"; the generation a fresh [`VatHandle`]
/// hands out its first tree under.
pub const NO_GENERATION: u32 = 0;

/// One Arena plus the per-process state the arena format itself doesn't
/// carry: the next generation id to hand out, and which node offsets each
/// live generation owns outright (created directly under that generation,
/// as opposed to inherited by sharing with a parent).
pub struct VatHandle {
    arena: Arena,
    next_generation: u32,
    owned: HashMap<u32, HashSet<Offset>>,
}

/// A root binding plus the generation it was derived from (spec §3.4's
/// Tree). `base_generation == NO_GENERATION` means this tree has no
/// parent; `root.generation` is this tree's own id.
#[derive(Debug, Clone)]
pub struct Tree {
    pub root: TrieRoot,
    pub base_generation: u32,
}

impl VatHandle {
    /// Opens (or creates) the arena backing this VAT. Thin wrapper over
    /// [`Arena::open`]; the VAT layer shares the arena's header rather than
    /// mapping a second one, since every field the original's distinct VAT
    /// header carries (magic, version, endianness) is already validated at
    /// the arena level.
    pub fn open(
        path: impl AsRef<Path>,
        base_addr: usize,
        init_bytes: usize,
        ceiling: Option<usize>,
        flags: OpenFlags,
    ) -> Result<Self> {
        let arena = Arena::open(path, base_addr, init_bytes, ceiling, flags)?;
        Ok(Self {
            arena,
            next_generation: NO_GENERATION + 1,
            owned: HashMap::new(),
        })
    }

    pub fn path(&self) -> &Path {
        self.arena.path()
    }

    pub fn path_buf(&self) -> PathBuf {
        self.arena.path().to_path_buf()
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn arena_mut(&mut self) -> &mut Arena {
        &mut self.arena
    }

    fn alloc_generation(&mut self) -> u32 {
        let id = self.next_generation;
        self.next_generation += 1;
        id
    }

    fn is_owned(&self, generation: u32, off: Offset) -> bool {
        self.owned
            .get(&generation)
            .is_some_and(|set| set.contains(&off))
    }

    fn mark_owned(&mut self, generation: u32, off: Offset) {
        self.owned.entry(generation).or_default().insert(off);
    }

    /// Drops a generation's ownership bookkeeping once it (and every tree
    /// derived from it) is no longer reachable. Does not free any arena
    /// storage; nodes the generation owned are freed individually as they
    /// are deleted, same as any other node.
    pub fn forget_generation(&mut self, generation: u32) {
        self.owned.remove(&generation);
    }

    /// Creates a brand new, empty tree under a fresh generation with no
    /// parent (spec §4.4 `vat_tree_new`, base-generation case).
    pub fn tree_new(&mut self, key_offset: u16) -> Tree {
        let generation = self.alloc_generation();
        let mut root = TrieRoot::new(key_offset);
        root.generation = generation;
        Tree {
            root,
            base_generation: NO_GENERATION,
        }
    }

    /// Derives a new tree sharing `base`'s current structure: the new
    /// tree's root offset starts out identical to `base`'s, so every node
    /// is shared until the new tree's first mutation shadows the spine.
    pub fn derive(&mut self, base: &Tree) -> Tree {
        let generation = self.alloc_generation();
        let mut root = base.root;
        root.generation = generation;
        Tree {
            root,
            base_generation: base.root.generation,
        }
    }
}

/// Inserts `key` into `tree`, cloning only the spine nodes `tree`'s
/// generation does not already own (spec §9 "shared state across
/// generations"). Semantics otherwise match [`trie::add`]: `Ok(false)` for
/// a duplicate/colliding key, no mutation in that case.
pub fn cow_add(
    handle: &mut VatHandle,
    tree: &mut Tree,
    contents: Offset,
    ty: u8,
    key_ptr: Offset,
    key: &[u8],
) -> Result<bool> {
    let generation = tree.root.generation;

    if tree.root.is_empty() {
        let inserted = trie::add(&mut handle.arena, &mut tree.root, contents, ty, key_ptr, key)?;
        if inserted {
            handle.mark_owned(generation, tree.root.root);
        }
        return Ok(inserted);
    }

    let point = match trie::locate_insertion(&handle.arena, &tree.root, key) {
        Some(p) => p,
        None => return Ok(false),
    };
    let new_length = trie::bit_ceiling(key.len());
    let node_off = trie::splice_new_leaf(
        &mut handle.arena,
        new_length,
        point.diff,
        point.other,
        contents,
        ty,
        key_ptr,
        key,
    )?;
    handle.mark_owned(generation, node_off);

    if let Some(new_root) = reshadow_spine(handle, generation, &point.path, node_off)? {
        tree.root.root = new_root;
    }
    Ok(true)
}

/// Removes `victim_off` from `tree`, cloning only the spine nodes this
/// generation doesn't already own. Returns `Ok(false)` if `victim_off` is
/// not in the tree, or if it is the tree's sole NOBIT node — promoting it
/// away its generation's root identity, which [`trie::delete`] supports in
/// the single-generation case, has no well-defined copy-on-write analogue
/// and is intentionally unsupported here.
pub fn cow_delete(handle: &mut VatHandle, tree: &mut Tree, victim_off: Offset) -> Result<bool> {
    if tree.root.is_empty() || victim_off.is_null() {
        return Ok(false);
    }
    let generation = tree.root.generation;

    let point = match trie::locate_deletion(&handle.arena, &tree.root, victim_off) {
        Some(p) => p,
        None => return Ok(false),
    };

    if let Some(new_root) = reshadow_spine(handle, generation, &point.path, point.other)? {
        tree.root.root = new_root;
    }

    // The victim is not released here: an ancestor generation's tree may
    // still reference it directly. Only the derived generation's spine was
    // rewired; the victim's own refcount is untouched.
    Ok(true)
}

/// Walks `path` (root-to-parent, shallowest first) from the deepest
/// ancestor upward, cloning any node `generation` doesn't already own and
/// rewiring its child pointer to `child`. Stops at the first ancestor the
/// generation already owns, since that node (and everything above it) is
/// already correctly wired. Returns the new root offset if the walk
/// reached past the tree's root, or `None` if the existing root was
/// reused in place.
fn reshadow_spine(
    handle: &mut VatHandle,
    generation: u32,
    path: &[(Offset, bool)],
    child: Offset,
) -> Result<Option<Offset>> {
    let mut child = child;
    let mut new_root = None;
    for &(ancestor, went_right) in path.iter().rev() {
        if handle.is_owned(generation, ancestor) {
            trie::set_child(&mut handle.arena, ancestor, went_right, child);
            return Ok(None);
        }
        let clone_off = trie::clone_node(&mut handle.arena, ancestor)?;
        trie::set_child(&mut handle.arena, clone_off, went_right, child);
        handle.mark_owned(generation, clone_off);
        child = clone_off;
        new_root = Some(clone_off);
    }
    Ok(new_root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_key(handle: &mut VatHandle, key: &[u8]) -> Offset {
        let off = handle.arena_mut().allocate(key.len().max(1)).unwrap();
        let ptr = handle.arena_mut().pointer::<u8>(off);
        unsafe { std::ptr::copy_nonoverlapping(key.as_ptr(), ptr, key.len()) };
        off
    }

    #[test]
    fn derived_tree_sees_parent_keys_until_its_own_mutation() {
        let dir = tempdir().unwrap();
        let mut handle = VatHandle::open(dir.path().join("t.vat"), 0, 1 << 20, None, OpenFlags::CREATE).unwrap();

        let mut base = handle.tree_new(0);
        for k in [b"alpha".as_slice(), b"beta", b"gamma"] {
            let contents = store_key(&mut handle, k);
            assert!(cow_add(&mut handle, &mut base, contents, 0, contents, k).unwrap());
        }

        let mut child = handle.derive(&base);
        assert_eq!(child.root.root, base.root.root, "derived tree starts fully shared");

        let contents = store_key(&mut handle, b"delta");
        assert!(cow_add(&mut handle, &mut child, contents, 0, contents, b"delta").unwrap());
        assert_ne!(child.root.root, base.root.root, "mutation shadows the spine");

        assert!(trie::search(handle.arena(), &child.root, b"alpha") != Offset::NULL);
        assert!(!trie::key_at(handle.arena(), trie::search(handle.arena(), &child.root, b"delta"))
            .unwrap()
            .is_empty());

        // The parent generation is untouched by the child's insert.
        let found_in_base = trie::search(handle.arena(), &base.root, b"delta");
        let base_key = trie::key_at(handle.arena(), found_in_base).unwrap();
        assert_ne!(base_key, b"delta".to_vec());
    }

    #[test]
    fn cow_delete_does_not_affect_parent_generation() {
        let dir = tempdir().unwrap();
        let mut handle = VatHandle::open(dir.path().join("t.vat"), 0, 1 << 20, None, OpenFlags::CREATE).unwrap();

        let mut base = handle.tree_new(0);
        let mut victims = Vec::new();
        for k in [b"one".as_slice(), b"two", b"three"] {
            let contents = store_key(&mut handle, k);
            cow_add(&mut handle, &mut base, contents, 0, contents, k).unwrap();
            victims.push(trie::search(handle.arena(), &base.root, k));
        }

        let mut child = handle.derive(&base);
        assert!(cow_delete(&mut handle, &mut child, victims[1]).unwrap());

        assert_eq!(
            trie::key_at(handle.arena(), trie::search(handle.arena(), &base.root, b"two")).unwrap(),
            b"two".to_vec(),
            "deleting from the child must not remove the key from the parent's view"
        );
    }

    #[test]
    fn cow_add_rejects_duplicate_key() {
        let dir = tempdir().unwrap();
        let mut handle = VatHandle::open(dir.path().join("t.vat"), 0, 1 << 20, None, OpenFlags::CREATE).unwrap();
        let mut tree = handle.tree_new(0);
        let contents = store_key(&mut handle, b"dup");
        assert!(cow_add(&mut handle, &mut tree, contents, 0, contents, b"dup").unwrap());
        let contents2 = store_key(&mut handle, b"dup");
        assert!(!cow_add(&mut handle, &mut tree, contents2, 0, contents2, b"dup").unwrap());
    }
}
