//! End-to-end trie scenarios (spec.md §8 E1-E3).

use mixer_vat::arena::{Arena, OpenFlags};
use mixer_vat::trie::{self, TrieRoot};
use mixer_vat::Offset;
use tempfile::tempdir;

fn open_arena(path: &std::path::Path) -> Arena {
    Arena::open(path, 0, 1 << 16, None, OpenFlags::CREATE).unwrap()
}

fn insert(arena: &mut Arena, root: &mut TrieRoot, key: &[u8]) -> Offset {
    let contents = arena.allocate(key.len()).unwrap();
    let ptr = arena.pointer::<u8>(contents);
    unsafe { std::ptr::copy_nonoverlapping(key.as_ptr(), ptr, key.len()) };
    assert!(trie::add(arena, root, contents, 0, contents, key).unwrap());
    trie::search(arena, root, key)
}

/// E1: insert four fixed-length-4 keys, then check hit/miss, subtree_match,
/// and lexicographic find_next order.
#[test]
fn e1_trie_insert_and_search() {
    let dir = tempdir().unwrap();
    let mut arena = open_arena(&dir.path().join("e1.vat"));
    let mut root = TrieRoot::new(0);

    let keys: [&[u8]; 4] = [
        &[0x01, 0x02, 0x03, 0x04],
        &[0x01, 0x02, 0x03, 0x05],
        &[0x01, 0x02, 0x04, 0x04],
        &[0xff, 0xff, 0xff, 0xff],
    ];
    for k in keys {
        insert(&mut arena, &mut root, k);
    }

    let hit = trie::search(&arena, &root, &[0x01, 0x02, 0x03, 0x05]);
    assert_eq!(trie::key_at(&arena, hit).unwrap(), keys[1]);

    let miss = trie::search(&arena, &root, &[0x01, 0x02, 0x03, 0x06]);
    assert_ne!(trie::key_at(&arena, miss).unwrap(), vec![0x01, 0x02, 0x03, 0x06]);

    let matched = trie::subtree_match(&arena, &root, &[0x01, 0x02, 0x03]);
    assert_eq!(trie::key_at(&arena, matched).unwrap(), keys[0]);

    let mut seen = Vec::new();
    let mut cur = trie::find_next(&arena, &root, None);
    while cur != Offset::NULL {
        seen.push(trie::key_at(&arena, cur).unwrap());
        cur = trie::find_next(&arena, &root, Some(cur));
    }
    let mut expected: Vec<Vec<u8>> = keys.iter().map(|k| k.to_vec()).collect();
    expected.sort();
    assert_eq!(seen, expected);
}

/// E2: deleting the no-bit node leaves the remaining keys reachable in
/// order, and find_prev(find_next(null)) == null.
#[test]
fn e2_delete_the_root_leaf() {
    let dir = tempdir().unwrap();
    let mut arena = open_arena(&dir.path().join("e2.vat"));
    let mut root = TrieRoot::new(0);

    let keys: [&[u8]; 4] = [
        &[0x01, 0x02, 0x03, 0x04],
        &[0x01, 0x02, 0x03, 0x05],
        &[0x01, 0x02, 0x04, 0x04],
        &[0xff, 0xff, 0xff, 0xff],
    ];
    for k in keys {
        insert(&mut arena, &mut root, k);
    }

    let victim = trie::search(&arena, &root, keys[0]);
    assert!(trie::delete(&mut arena, &mut root, victim).unwrap());

    let first = trie::find_next(&arena, &root, None);
    assert_eq!(trie::key_at(&arena, first).unwrap(), keys[1]);
    assert_eq!(trie::find_prev(&arena, &root, Some(first)), Offset::NULL);
}

/// E3: arena growth across an ftruncate-driven remap preserves previously
/// returned offsets' contents.
#[test]
fn e3_arena_growth_preserves_offsets() {
    let dir = tempdir().unwrap();
    let mut arena = Arena::open(&dir.path().join("e3.vat"), 0, 16 * 1024, None, OpenFlags::CREATE).unwrap();
    let mut root = TrieRoot::new(0);

    let mut rng_state: u64 = 0x9e3779b97f4a7c15;
    let mut next_key = || {
        rng_state = rng_state.wrapping_mul(6364136223846793005).wrapping_add(1);
        rng_state.to_be_bytes()
    };

    let first_key = next_key();
    let first_off = insert(&mut arena, &mut root, &first_key);
    let first_contents = trie::leaf_info(&arena, first_off).unwrap().1;

    let mut seen = std::collections::HashSet::new();
    seen.insert(first_key.to_vec());
    let mut inserted = 1;
    while inserted < 10_000 {
        let key = next_key();
        if seen.insert(key.to_vec()) {
            insert(&mut arena, &mut root, &key);
            inserted += 1;
        }
    }

    let recovered = trie::key_at(&arena, first_off).unwrap();
    assert_eq!(recovered, first_key);
    let recovered_ptr = arena.pointer::<u8>(first_contents);
    let recovered_bytes = unsafe { std::slice::from_raw_parts(recovered_ptr, first_key.len()) };
    assert_eq!(recovered_bytes, first_key);
}
