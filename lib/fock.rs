//! Occupation-number (Fock) states for a fixed number of modes and photons:
//! canonical enumeration, dense integer indexing, and the binomial-coefficient
//! cache backing both.
//!
//! States with `m` modes and `p` photons are enumerated in **descending
//! lexicographic order** of their occupation tuples: `[p, 0, …, 0]` comes
//! first and `[0, …, 0, p]` last. This order is fixed; every amplitude tensor
//! produced by [`crate::phi`] is indexed by it, and the combinatorial
//! ranking/unranking here round-trips with it exactly.

use std::sync::RwLock;
use rustc_hash::FxHashMap;
use crate::{ BosonicError, BosonicResult };

/// Thread-safe memoized table of binomial coefficients.
///
/// Values are immutable facts, so the table only ever grows; concurrent
/// lookups that race on the same entry at worst recompute it.
#[derive(Debug, Default)]
pub struct BinomCache {
    table: RwLock<FxHashMap<(u32, u32), u128>>,
}

impl BinomCache {
    /// Create a new, empty cache.
    pub fn new() -> Self { Self::default() }

    /// Binomial coefficient `n` choose `k`; `0` when `k > n`.
    ///
    /// (Negative `k` is unrepresentable in this API; the zero convention for
    /// it is inherited by construction.) Evaluation uses the exact stepwise
    /// multiplicative formula in `u128`, which cannot overflow for any
    /// realistic mode/photon count.
    pub fn binom(&self, n: u32, k: u32) -> u128 {
        if k > n { return 0; }
        let k = k.min(n - k);
        if k == 0 { return 1; }
        if let Some(c) = self.table.read().unwrap().get(&(n, k)) {
            return *c;
        }
        let mut c: u128 = 1;
        for j in 0..u128::from(k) {
            // exact: c * (n - j) is always divisible by j + 1 here
            c = c * (u128::from(n) - j) / (j + 1);
        }
        self.table.write().unwrap().insert((n, k), c);
        c
    }

    /// Number of entries currently memoized.
    pub fn len(&self) -> usize { self.table.read().unwrap().len() }

    /// Return `true` if nothing has been memoized yet.
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

/// Number of occupation states of `photons` photons in `modes` modes,
/// `C(modes + photons - 1, photons)`.
///
/// Fails if `modes == 0`.
pub fn basis_size(cache: &BinomCache, modes: usize, photons: usize)
    -> BosonicResult<usize>
{
    if modes == 0 {
        return Err(BosonicError::InvalidState {
            reason: "basis requires at least one mode".into(),
        });
    }
    Ok(cache.binom((modes + photons - 1) as u32, photons as u32) as usize)
}

/// Iterator over all occupation states of a fixed `(modes, photons)` pair in
/// canonical (descending lexicographic) order.
///
/// See [`fock_basis`].
#[derive(Clone, Debug)]
pub struct FockBasis {
    state: Option<Vec<usize>>,
}

impl Iterator for FockBasis {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        let cur = self.state.take()?;
        self.state = next_state(&cur);
        Some(cur)
    }
}

impl std::iter::FusedIterator for FockBasis { }

/// Successor of `state` in descending lexicographic order: decrement the last
/// movable occupation and collect everything to its right one slot further
/// along.
fn next_state(state: &[usize]) -> Option<Vec<usize>> {
    let m = state.len();
    let i = (0..m - 1).rev().find(|i| state[*i] > 0)?;
    let tail: usize = state[i + 1..].iter().sum();
    let mut next = state.to_vec();
    next[i] -= 1;
    next[i + 1..].iter_mut().for_each(|n| { *n = 0; });
    next[i + 1] = tail + 1;
    Some(next)
}

/// Enumerate every occupation state of `photons` photons in `modes` modes, in
/// canonical order.
///
/// The enumeration is deterministic and identical across runs; it defines the
/// index space used by [`fock_to_idx`]/[`idx_to_fock`] and by all amplitude
/// tensors. An empty iterator is returned for `modes == 0`.
pub fn fock_basis(modes: usize, photons: usize) -> FockBasis {
    if modes == 0 { return FockBasis { state: None }; }
    let mut first = vec![0; modes];
    first[0] = photons;
    FockBasis { state: Some(first) }
}

/// Map an occupation state to its dense index within the canonical
/// enumeration of all states with the same mode count and photon total.
///
/// Fails if `state` is empty.
pub fn fock_to_idx(cache: &BinomCache, state: &[usize])
    -> BosonicResult<usize>
{
    if state.is_empty() {
        return Err(BosonicError::InvalidState {
            reason: "occupation state has no modes".into(),
        });
    }
    let mut p: usize = state.iter().sum();
    let mut idx: usize = 0;
    let mut m = state.len();
    for &n in state {
        // everything with a larger occupation at this position comes first
        if p > n {
            idx += cache.binom((m + p - n - 2) as u32, (p - n - 1) as u32)
                as usize;
        }
        p -= n;
        m -= 1;
    }
    Ok(idx)
}

/// Inverse of [`fock_to_idx`]: recover the occupation state at a given dense
/// index.
///
/// Fails if `modes == 0` or `idx` is out of range for `(modes, photons)`.
pub fn idx_to_fock(
    cache: &BinomCache,
    modes: usize,
    photons: usize,
    idx: usize,
) -> BosonicResult<Vec<usize>>
{
    let size = basis_size(cache, modes, photons)?;
    if idx >= size {
        return Err(BosonicError::InvalidState {
            reason: format!(
                "index {} out of range for {} modes, {} photons ({} states)",
                idx, modes, photons, size,
            ),
        });
    }
    let mut state = vec![0; modes];
    let mut p = photons;
    let mut rem = idx;
    for i in 0..modes {
        let m = modes - i;
        if m == 1 {
            state[i] = p;
            break;
        }
        let mut n = p;
        loop {
            // states with occupation exactly n here: p - n photons in the
            // remaining m - 1 modes
            let block
                = cache.binom((m + p - n - 2) as u32, (p - n) as u32)
                as usize;
            if rem < block {
                state[i] = n;
                p -= n;
                break;
            }
            rem -= block;
            n -= 1;
        }
    }
    Ok(state)
}

/// Check that `state` belongs to the occupation space of `photons` photons
/// in `modes` modes: exactly `modes` entries summing to `photons`.
///
/// Useful at the boundary when assembling state lists for a fixed amplitude
/// tensor; [`fock_to_idx`] itself infers the photon total from the state.
pub fn validate_state(state: &[usize], modes: usize, photons: usize)
    -> BosonicResult<()>
{
    if state.len() != modes {
        return Err(BosonicError::InvalidState {
            reason: format!(
                "state has {} modes, expected {}", state.len(), modes),
        });
    }
    let total: usize = state.iter().sum();
    if total != photons {
        return Err(BosonicError::InvalidState {
            reason: format!(
                "state holds {} photons, expected {}", total, photons),
        });
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn binom_values() {
        let cache = BinomCache::new();
        assert_eq!(cache.binom(0, 0), 1);
        assert_eq!(cache.binom(5, 2), 10);
        assert_eq!(cache.binom(5, 6), 0);
        assert_eq!(cache.binom(60, 30), 118264581564861424);
        // memoized on repeat
        assert_eq!(cache.binom(5, 2), 10);
        assert!(!cache.is_empty());
    }

    #[test]
    fn basis_order() {
        let basis: Vec<Vec<usize>> = fock_basis(3, 2).collect();
        let expected: Vec<Vec<usize>> = vec![
            vec![2, 0, 0],
            vec![1, 1, 0],
            vec![1, 0, 1],
            vec![0, 2, 0],
            vec![0, 1, 1],
            vec![0, 0, 2],
        ];
        assert_eq!(basis, expected);
    }

    #[test]
    fn basis_sizes() {
        let cache = BinomCache::new();
        for modes in 1..6 {
            for photons in 0..5 {
                let n = basis_size(&cache, modes, photons).unwrap();
                assert_eq!(fock_basis(modes, photons).count(), n);
            }
        }
    }

    #[test]
    fn roundtrip() {
        let cache = BinomCache::new();
        for modes in 1..6 {
            for photons in 0..5 {
                for (k, state) in fock_basis(modes, photons).enumerate() {
                    assert_eq!(fock_to_idx(&cache, &state).unwrap(), k);
                    assert_eq!(
                        idx_to_fock(&cache, modes, photons, k).unwrap(),
                        state,
                    );
                }
            }
        }
    }

    #[test]
    fn invalid_inputs() {
        let cache = BinomCache::new();
        assert!(basis_size(&cache, 0, 2).is_err());
        assert!(fock_to_idx(&cache, &[]).is_err());
        assert!(idx_to_fock(&cache, 2, 2, 3).is_err());
        assert!(validate_state(&[1, 0], 3, 1).is_err());
        assert!(validate_state(&[1, 1], 2, 1).is_err());
        assert!(validate_state(&[1, 1], 2, 2).is_ok());
    }
}
