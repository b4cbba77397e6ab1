//! NETCONF end-of-frame marker detection (spec §4.5, §9).
//!
//! The marker `]]>]]>` can straddle two separate reads; a six-state KMP
//! automaton parameterised by how many marker bytes have matched so far
//! (`marker_seen`) detects it uniformly regardless of where the split
//! falls, rather than special-casing the straddle with an explicit
//! memcmp (either is acceptable per spec.md §9; KMP is branch-uniform and
//! easy to test exhaustively across every split point).

pub const MARKER: &[u8; 6] = b"]]>]]>";

/// Standard KMP failure function of [`MARKER`]: `FAIL[k]` is the length of
/// the longest proper prefix of `MARKER` that is also a suffix of the
/// first `k` matched bytes. Index 0 is unused (a mismatch with nothing
/// matched just stays at 0).
const FAIL: [usize; 6] = [0, 0, 1, 0, 1, 2];

/// Scans `chunk` for [`MARKER`], continuing from `seen` marker bytes
/// already matched by a previous chunk. Returns the updated `seen` count
/// and, if the marker completed inside this chunk, the byte offset one
/// past its last byte (so the caller can split payload from trailer).
pub fn scan(chunk: &[u8], mut seen: usize) -> (usize, Option<usize>) {
    for (i, &b) in chunk.iter().enumerate() {
        while seen > 0 && b != MARKER[seen] {
            seen = FAIL[seen];
        }
        if b == MARKER[seen] {
            seen += 1;
        }
        if seen == MARKER.len() {
            return (0, Some(i + 1));
        }
    }
    (seen, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_marker_in_one_chunk() {
        let (seen, pos) = scan(b"<hello/>]]>]]>", 0);
        assert_eq!(seen, 0);
        assert_eq!(pos, Some(14));
    }

    #[test]
    fn detects_marker_straddling_every_split_point() {
        let payload = b"<hello/>]]>]]>";
        for split in 0..=payload.len() {
            let (first, second) = payload.split_at(split);
            let (seen, pos1) = scan(first, 0);
            if let Some(p) = pos1 {
                assert_eq!(p + split.saturating_sub(split), p);
                continue;
            }
            let (_, pos2) = scan(second, seen);
            assert!(pos2.is_some(), "failed to detect marker split at {split}");
        }
    }

    #[test]
    fn no_false_positive_on_partial_marker() {
        let (seen, pos) = scan(b"]]>]]", 0);
        assert_eq!(pos, None);
        assert_eq!(seen, 5);
    }

    #[test]
    fn marker_prefix_is_counted_exactly() {
        let (seen, pos) = scan(b"]]>]", 0);
        assert_eq!(pos, None);
        assert_eq!(seen, 4);
    }

    #[test]
    fn mismatch_after_partial_match_falls_back_correctly() {
        // "]]X" matches one byte of MARKER, then diverges; KMP's failure
        // function must not silently drop below what's actually still a
        // valid partial match ("]" at the start re-matches after "]X").
        let (seen, pos) = scan(b"]]X]", 0);
        assert_eq!(pos, None);
        assert_eq!(seen, 1);
    }
}
