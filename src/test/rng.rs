//! Seeded permutation streams.
//!
//! Permutation `i` of a test seeded with `s` draws from its own stream
//! `stream_seed(s, i)`, so results do not depend on whether permutations run
//! in parallel. Streams of neighbouring seeds share no permutations.

/// xorshift64 generator.
#[derive(Debug, Clone)]
pub(crate) struct SimpleRng {
    state: u64,
}

/// splitmix64 finaliser.
fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Seed of sub-stream `index` under `seed`. Not additive: `(s, i + 1)` and
/// `(s + 1, i)` give unrelated streams.
pub(crate) fn stream_seed(seed: u64, index: usize) -> u64 {
    splitmix64(splitmix64(seed) ^ index as u64)
}

impl SimpleRng {
    pub(crate) fn new(seed: u64) -> Self {
        let z = splitmix64(seed);
        Self {
            state: if z == 0 { 1 } else { z },
        }
    }

    /// Stream for permutation `index` of a test seeded with `seed`.
    pub(crate) fn for_permutation(seed: u64, index: usize) -> Self {
        Self::new(stream_seed(seed, index))
    }

    pub(crate) fn next_u64(&mut self) -> u64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }

    /// Fisher-Yates shuffle
    pub(crate) fn shuffle<T>(&mut self, slice: &mut [T]) {
        let n = slice.len();
        for i in (1..n).rev() {
            let j = (self.next_u64() % (i as u64 + 1)) as usize;
            slice.swap(i, j);
        }
    }

    /// A random permutation of `0..n`.
    pub(crate) fn permutation(&mut self, n: usize) -> Vec<usize> {
        let mut idx: Vec<usize> = (0..n).collect();
        self.shuffle(&mut idx);
        idx
    }
}

/// `(extreme + 1) / (n_permutations + 1)`; the observed statistic counts as
/// one permutation so the p-value is never zero.
pub(crate) fn permutation_p_value(extreme: usize, n_permutations: usize) -> f64 {
    (extreme as f64 + 1.0) / (n_permutations as f64 + 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reproducible() {
        let a = SimpleRng::for_permutation(42, 7).permutation(20);
        let b = SimpleRng::for_permutation(42, 7).permutation(20);
        assert_eq!(a, b);
        let c = SimpleRng::for_permutation(42, 8).permutation(20);
        assert_ne!(a, c);
    }

    #[test]
    fn test_neighbouring_seeds_do_not_share_streams() {
        let shared = (1..999)
            .filter(|&i| {
                SimpleRng::for_permutation(42, i).permutation(12)
                    == SimpleRng::for_permutation(43, i - 1).permutation(12)
            })
            .count();
        assert_eq!(shared, 0);

        let firsts: std::collections::HashSet<u64> = (0..100)
            .flat_map(|s| (0..100).map(move |i| stream_seed(s, i)))
            .collect();
        assert_eq!(firsts.len(), 100 * 100);
    }

    #[test]
    fn test_permutation_is_bijection() {
        let mut p = SimpleRng::new(0).permutation(50);
        p.sort_unstable();
        assert_eq!(p, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_p_value_bounds() {
        assert_eq!(permutation_p_value(0, 999), 0.001);
        assert_eq!(permutation_p_value(999, 999), 1.0);
    }
}
