//! Triangular matrix addressing.
//!
//! All-pairs relay data is stored once per unordered pair. For a pair of
//! distinct indices the flat index is `hi*(hi-1)/2 + lo`, which lays the
//! pairs for a given higher index out contiguously, which is the property the
//! optimizer's segment concatenation relies on.

/// Flat index for the unordered pair `(i, j)`, `i != j`.
#[inline]
pub fn tri_index(i: usize, j: usize) -> usize {
    debug_assert_ne!(i, j);
    let (lo, hi) = if i < j { (i, j) } else { (j, i) };
    hi * (hi - 1) / 2 + lo
}

/// Number of entries for `n` relays.
#[inline]
pub fn tri_matrix_length(n: usize) -> usize {
    n * (n - 1) / 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symmetric() {
        for i in 0..32 {
            for j in 0..32 {
                if i != j {
                    assert_eq!(tri_index(i, j), tri_index(j, i));
                }
            }
        }
    }

    #[test]
    fn bijection_onto_range() {
        let n = 64;
        let mut seen = vec![false; tri_matrix_length(n)];
        for i in 0..n {
            for j in 0..i {
                let index = tri_index(i, j);
                assert!(index < seen.len());
                assert!(!seen[index], "collision at ({i},{j})");
                seen[index] = true;
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn higher_index_region_is_contiguous() {
        // Pairs (l, h) for fixed h occupy [h(h-1)/2, h(h+1)/2).
        for h in 1..16 {
            for l in 0..h {
                let index = tri_index(l, h);
                assert!(index >= h * (h - 1) / 2);
                assert!(index < h * (h + 1) / 2);
            }
        }
    }
}
