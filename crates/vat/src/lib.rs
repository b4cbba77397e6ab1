//! Versioned Patricia trie over a memory-mapped, file-backed arena.
//!
//! Three layers, bottom to top: [`arena`] is a growable offset-addressed
//! region backed by a fixed-mapped file; [`trie`] is a Patricia radix trie
//! built entirely out of arena offsets; [`vat`] adds copy-on-write
//! generations on top of the trie so multiple versions of a tree can share
//! unmutated structure.

pub mod arena;
pub mod bits;
pub mod error;
pub mod header;
pub mod offset;
pub mod trie;
pub mod vat;

pub use arena::{Arena, OpenFlags};
pub use error::{Error, Result};
pub use offset::Offset;
pub use trie::{TrieRoot, VAT_MAXKEY};
pub use vat::{Tree, VatHandle, NO_GENERATION};
