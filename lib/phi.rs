//! Multi-photon transition amplitudes for linear-optical networks (the
//! Aaronson-Arkhipov formula), with lossy and mode-restricted variants and a
//! reverse-mode gradient path back to the mode unitary.
//!
//! For an input occupation state `S` and output state `T` with the same total
//! photon number `n`, the amplitude under mode unitary `U` is
//! ```text
//! ⟨T| Φ(U) |S⟩ = per(U_ST) / sqrt(s1! ⋯ sm! t1! ⋯ tm!)
//! ```
//! where the n×n submatrix `U_ST` repeats row `i` of `U` `s_i` times and
//! column `j` `t_j` times. Pairs with differing photon totals have amplitude
//! exactly zero (photon number is conserved) and never reach the permanent
//! kernel. Submatrices are grouped by photon number and evaluated through the
//! batched kernel in [`crate::permanent`].

use itertools::Itertools;
use ndarray as nd;
use num_complex::Complex64 as C64;
use num_traits::Zero;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use crate::{ BosonicError, BosonicResult };
use crate::fock::fock_basis;
use crate::permanent::{ permanent_batch, permanent_minors };

fn check_modes(U: &nd::ArrayView2<C64>) -> BosonicResult<usize> {
    let (rows, cols) = U.dim();
    if rows != cols {
        return Err(BosonicError::NonSquareMatrix { rows, cols });
    }
    if rows == 0 {
        return Err(BosonicError::InvalidState {
            reason: "mode unitary must act on at least one mode".into(),
        });
    }
    Ok(rows)
}

fn check_states(states: &[Vec<usize>], modes: usize) -> BosonicResult<()> {
    for state in states {
        if state.len() != modes {
            return Err(BosonicError::InvalidState {
                reason: format!(
                    "state {:?} has {} modes, expected {}",
                    state, state.len(), modes,
                ),
            });
        }
    }
    Ok(())
}

fn factorial(n: usize) -> f64 {
    (1..=n).map(|k| k as f64).product()
}

/// `sqrt(Π s_i! Π t_j!)`, the bosonic indistinguishability normalization.
fn norm_factor(s: &[usize], t: &[usize]) -> f64 {
    let prod: f64
        = s.iter().chain(t).map(|n| factorial(*n)).product();
    prod.sqrt()
}

/// Mode indices repeated by their occupation numbers; length equals the total
/// photon number.
fn expand_modes(state: &[usize]) -> Vec<usize> {
    state.iter().enumerate()
        .flat_map(|(mode, n)| std::iter::repeat(mode).take(*n))
        .collect()
}

fn build_submatrix(
    U: &nd::ArrayView2<C64>,
    mut block: nd::ArrayViewMut2<C64>,
    rows: &[usize],
    cols: &[usize],
)
{
    for (r, ri) in rows.iter().enumerate() {
        for (c, cj) in cols.iter().enumerate() {
            block[[r, c]] = U[[*ri, *cj]];
        }
    }
}

/// Amplitudes for an explicit list of (input, output) state pairs, in pair
/// order. Pairs are grouped by photon number so that each group shares one
/// batched subset enumeration; mismatched pairs are exactly zero.
///
/// States are assumed already validated against the dimension of `U`.
fn pair_amplitudes(
    U: &nd::ArrayView2<C64>,
    pairs: &[(&[usize], &[usize])],
) -> BosonicResult<Vec<C64>>
{
    let mut amps: Vec<C64> = vec![C64::zero(); pairs.len()];
    let mut groups: FxHashMap<usize, Vec<usize>> = FxHashMap::default();
    for (k, (s, t)) in pairs.iter().enumerate() {
        let n_in: usize = s.iter().sum();
        let n_out: usize = t.iter().sum();
        if n_in == n_out {
            groups.entry(n_in).or_default().push(k);
        }
    }
    for (n, members) in groups {
        let mut mats: nd::Array3<C64>
            = nd::Array3::zeros((members.len(), n, n));
        for (b, &k) in members.iter().enumerate() {
            let (s, t) = pairs[k];
            build_submatrix(
                U,
                mats.slice_mut(nd::s![b, .., ..]),
                &expand_modes(s),
                &expand_modes(t),
            );
        }
        let perms = permanent_batch(mats.view())?;
        for (b, &k) in members.iter().enumerate() {
            let (s, t) = pairs[k];
            amps[k] = perms[b] / norm_factor(s, t);
        }
    }
    Ok(amps)
}

/// Compute the transition amplitude for every combination of an input and an
/// output occupation state under the mode unitary `U`.
///
/// The result has shape `(out_states.len(), in_states.len())` with entry
/// `[t, s]` equal to `⟨out_states[t]| Φ(U) |in_states[s]⟩`; ordering always
/// follows the order of the given state lists. Combinations whose photon
/// totals differ are exactly zero without invoking the permanent kernel.
///
/// Fails if `U` is not square or any state's mode count does not match it.
pub fn aa_phi(
    U: nd::ArrayView2<C64>,
    in_states: &[Vec<usize>],
    out_states: &[Vec<usize>],
) -> BosonicResult<nd::Array2<C64>>
{
    let m = check_modes(&U)?;
    check_states(in_states, m)?;
    check_states(out_states, m)?;
    let pairs: Vec<(&[usize], &[usize])>
        = out_states.iter().cartesian_product(in_states)
        .map(|(t, s)| (s.as_slice(), t.as_slice()))
        .collect();
    let amps = pair_amplitudes(&U, &pairs)?;
    Ok(
        nd::Array2::from_shape_vec(
            (out_states.len(), in_states.len()), amps)
        .unwrap()
    )
}

/// Compute the full multi-particle transformation Φ(U) for a fixed photon
/// number: the amplitude matrix over the entire canonical Fock basis of
/// `photons` photons in `U`'s modes, indexed on both axes by the enumeration
/// order of [`fock_basis`].
///
/// Fails if `U` is not square.
pub fn aa_phi_all(U: nd::ArrayView2<C64>, photons: usize)
    -> BosonicResult<nd::Array2<C64>>
{
    let m = check_modes(&U)?;
    let basis: Vec<Vec<usize>> = fock_basis(m, photons).collect();
    aa_phi(U, &basis, &basis)
}

/// Photon-loss model for [`aa_phi_lossy`]: the power transmission of each
/// mode, in `[0, 1]` (1 = lossless).
#[derive(Clone, Debug, PartialEq)]
pub enum Loss {
    /// Every mode has the same transmission.
    Uniform(f64),
    /// Per-mode transmissions; length must equal the mode count.
    PerMode(Vec<f64>),
}

impl Loss {
    fn transmissions(&self, modes: usize) -> BosonicResult<Vec<f64>> {
        let t: Vec<f64> = match self {
            Self::Uniform(t) => vec![*t; modes],
            Self::PerMode(t) => t.clone(),
        };
        if t.len() != modes {
            return Err(BosonicError::InvalidState {
                reason: format!(
                    "{} transmission values for {} modes", t.len(), modes),
            });
        }
        if t.iter().any(|tk| !(0.0..=1.0).contains(tk)) {
            return Err(BosonicError::InvalidState {
                reason: "transmissions must lie in [0, 1]".into(),
            });
        }
        Ok(t)
    }
}

/// Embed `U` in a 2m×2m unitary where each mode is beamsplit into its own
/// environment mode with amplitude transmission `sqrt(t_i)`:
/// ```text
/// W = [  D_√t · U      D_√(1-t) ]
///     [ -D_√(1-t) · U  D_√t     ]
/// ```
/// `W` is exactly unitary whenever `U` is.
fn extend_lossy(U: &nd::ArrayView2<C64>, t: &[f64]) -> nd::Array2<C64> {
    let m = U.nrows();
    let mut W: nd::Array2<C64> = nd::Array2::zeros((2 * m, 2 * m));
    for i in 0..m {
        let ti = t[i].sqrt();
        let ri = (1.0 - t[i]).sqrt();
        for j in 0..m {
            W[[i, j]] = ti * U[[i, j]];
            W[[i + m, j]] = -ri * U[[i, j]];
        }
        W[[i, i + m]] = C64::new(ri, 0.0);
        W[[i + m, i + m]] = C64::new(ti, 0.0);
    }
    W
}

/// Transition amplitudes under a lossy linear-optical network.
///
/// Loss is modeled exactly: `U` is embedded in an explicit extended unitary
/// with one untracked environment mode per system mode (see the construction
/// in this module's source), inputs enter with the environment in vacuum, and
/// the permanent formula is applied on the extended matrix.
///
/// For photon-conserving pairs no photon reaches the environment, a single
/// coherent amplitude exists, and the result reduces exactly to [`aa_phi`]
/// when every transmission is 1. For pairs where the output holds fewer
/// photons than the input the lost photons are marginalized over the
/// untracked environment occupations, which are mutually orthogonal; the
/// returned entry is the real nonnegative magnitude whose square is the
/// physical transition probability (no global phase exists for such pairs).
/// Outputs holding *more* photons than the input are exactly zero.
///
/// Fails if `U` is not square, any state's mode count does not match it, or
/// the loss description is malformed.
pub fn aa_phi_lossy(
    U: nd::ArrayView2<C64>,
    loss: &Loss,
    in_states: &[Vec<usize>],
    out_states: &[Vec<usize>],
) -> BosonicResult<nd::Array2<C64>>
{
    let m = check_modes(&U)?;
    check_states(in_states, m)?;
    check_states(out_states, m)?;
    let t = loss.transmissions(m)?;
    let W = extend_lossy(&U, &t);

    // one job per extended (input, output ⊗ environment) pair; `slot` maps a
    // job back to its entry in the result grid
    let mut jobs: Vec<(Vec<usize>, Vec<usize>)> = Vec::new();
    let mut slot: Vec<usize> = Vec::new();
    let n_grid = (out_states.len(), in_states.len());
    for (ti, out) in out_states.iter().enumerate() {
        for (si, inp) in in_states.iter().enumerate() {
            let n_in: usize = inp.iter().sum();
            let n_out: usize = out.iter().sum();
            if n_out > n_in { continue; }
            let mut in_ext = inp.clone();
            in_ext.extend(std::iter::repeat(0).take(m));
            for env in fock_basis(m, n_in - n_out) {
                let mut out_ext = out.clone();
                out_ext.extend(env);
                jobs.push((in_ext.clone(), out_ext));
                slot.push(ti * in_states.len() + si);
            }
        }
    }
    let pairs: Vec<(&[usize], &[usize])>
        = jobs.iter().map(|(s, t)| (s.as_slice(), t.as_slice())).collect();
    let amps = pair_amplitudes(&W.view(), &pairs)?;

    let mut grid: nd::Array2<C64> = nd::Array2::zeros(n_grid);
    let mut weight: nd::Array2<f64> = nd::Array2::zeros(n_grid);
    let mut terms: nd::Array2<usize> = nd::Array2::zeros(n_grid);
    for (k, amp) in amps.iter().enumerate() {
        let (ti, si) = (slot[k] / n_grid.1, slot[k] % n_grid.1);
        grid[[ti, si]] = *amp;
        weight[[ti, si]] += amp.norm_sqr();
        terms[[ti, si]] += 1;
    }
    // photon-conserving entries keep their single coherent amplitude; lossy
    // entries collapse to the incoherent magnitude
    let result = nd::Array2::from_shape_fn(n_grid, |(ti, si)| {
        if terms[[ti, si]] <= 1 {
            grid[[ti, si]]
        } else {
            C64::new(weight[[ti, si]].sqrt(), 0.0)
        }
    });
    Ok(result)
}

/// Transition amplitudes computed on a restricted subset of modes.
///
/// `allowed_modes` selects which rows/columns of `U` participate; all states
/// must have zero occupation outside the allowed modes. The computation is
/// equivalent to [`aa_phi`] on the sub-unitary `U[allowed × allowed]` with
/// the states compressed onto the allowed modes, and the result grid is
/// ordered exactly as the given state lists.
///
/// Fails (`InvalidState`) if `allowed_modes` is empty, repeats a mode, or
/// indexes outside `U`, or if any state occupies a forbidden mode.
pub fn aa_phi_restricted(
    U: nd::ArrayView2<C64>,
    allowed_modes: &[usize],
    in_states: &[Vec<usize>],
    out_states: &[Vec<usize>],
) -> BosonicResult<nd::Array2<C64>>
{
    let m = check_modes(&U)?;
    check_states(in_states, m)?;
    check_states(out_states, m)?;
    if allowed_modes.is_empty() {
        return Err(BosonicError::InvalidState {
            reason: "no allowed modes given".into(),
        });
    }
    let mut seen = vec![false; m];
    for &mode in allowed_modes {
        if mode >= m {
            return Err(BosonicError::InvalidState {
                reason: format!(
                    "allowed mode {} out of range for {} modes", mode, m),
            });
        }
        if seen[mode] {
            return Err(BosonicError::InvalidState {
                reason: format!("allowed mode {} repeated", mode),
            });
        }
        seen[mode] = true;
    }
    let compress = |state: &Vec<usize>| -> BosonicResult<Vec<usize>> {
        if let Some(mode)
            = (0..m).find(|k| !seen[*k] && state[*k] != 0)
        {
            return Err(BosonicError::InvalidState {
                reason: format!(
                    "state {:?} occupies forbidden mode {}", state, mode),
            });
        }
        Ok(allowed_modes.iter().map(|&k| state[k]).collect())
    };
    let in_sub: Vec<Vec<usize>>
        = in_states.iter().map(compress).collect::<BosonicResult<_>>()?;
    let out_sub: Vec<Vec<usize>>
        = out_states.iter().map(compress).collect::<BosonicResult<_>>()?;
    let k = allowed_modes.len();
    let U_sub = nd::Array2::from_shape_fn(
        (k, k),
        |(a, b)| U[[allowed_modes[a], allowed_modes[b]]],
    );
    aa_phi(U_sub.view(), &in_sub, &out_sub)
}

/// Vector-Jacobian product of [`aa_phi`] with respect to the mode unitary.
///
/// `upstream` must have the shape of the forward output,
/// `(out_states.len(), in_states.len())`. The returned m×m gradient applies
/// the permanent-cofactor rule per pair and accumulates contributions back
/// through the row/column repetition map: a single entry of `U` appears at
/// every submatrix cell generated by its repeated row and column, and all
/// those cofactor terms are summed. The rule is holomorphic (no
/// conjugation), matching [`crate::permanent::permanent_vjp`].
///
/// Fails with `ShapeMismatch` if `upstream` has the wrong shape, and with
/// the same errors as [`aa_phi`] for invalid inputs.
pub fn aa_phi_vjp(
    U: nd::ArrayView2<C64>,
    in_states: &[Vec<usize>],
    out_states: &[Vec<usize>],
    upstream: nd::ArrayView2<C64>,
) -> BosonicResult<nd::Array2<C64>>
{
    let m = check_modes(&U)?;
    check_states(in_states, m)?;
    check_states(out_states, m)?;
    let expected = (out_states.len(), in_states.len());
    if upstream.dim() != expected {
        return Err(BosonicError::ShapeMismatch {
            expected,
            found: upstream.dim(),
        });
    }
    // one job per photon-conserving pair with a nonzero upstream entry
    let jobs: Vec<(&[usize], &[usize], C64)>
        = out_states.iter().enumerate()
        .cartesian_product(in_states.iter().enumerate())
        .filter_map(|((ti, t), (si, s))| {
            let n_in: usize = s.iter().sum();
            let n_out: usize = t.iter().sum();
            let g = upstream[[ti, si]];
            (n_in == n_out && n_in > 0 && g != C64::zero())
                .then_some((s.as_slice(), t.as_slice(), g))
        })
        .collect();
    let locals: Vec<nd::Array2<C64>>
        = jobs.par_iter()
        .map(|(s, t, g)| {
            let rows = expand_modes(s);
            let cols = expand_modes(t);
            let n = rows.len();
            let mut sub: nd::Array2<C64> = nd::Array2::zeros((n, n));
            build_submatrix(&U, sub.view_mut(), &rows, &cols);
            let minors = permanent_minors(sub.view())?;
            let scale = *g / norm_factor(s, t);
            let mut local: nd::Array2<C64> = nd::Array2::zeros((m, m));
            for (r, &ri) in rows.iter().enumerate() {
                for (c, &cj) in cols.iter().enumerate() {
                    local[[ri, cj]] += scale * minors[[r, c]];
                }
            }
            Ok(local)
        })
        .collect::<BosonicResult<_>>()?;
    let mut grad: nd::Array2<C64> = nd::Array2::zeros((m, m));
    for local in locals {
        grad += &local;
    }
    Ok(grad)
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::Rng;
    use crate::fock::BinomCache;

    const EPS: f64 = 1e-12;

    fn beamsplitter() -> nd::Array2<C64> {
        let r = std::f64::consts::FRAC_1_SQRT_2;
        nd::array![
            [C64::new(r, 0.0), C64::new(r, 0.0)],
            [C64::new(r, 0.0), C64::new(-r, 0.0)],
        ]
    }

    fn random_matrix(n: usize) -> nd::Array2<C64> {
        let mut rng = rand::thread_rng();
        nd::Array2::from_shape_fn((n, n), |_| {
            C64::new(rng.gen::<f64>() - 0.5, rng.gen::<f64>() - 0.5)
        })
    }

    #[test]
    fn beamsplitter_single_photon() {
        let U = beamsplitter();
        let states = vec![vec![1, 0], vec![0, 1]];
        let phi = aa_phi(U.view(), &states[..1].to_vec(), &states).unwrap();
        let r = std::f64::consts::FRAC_1_SQRT_2;
        assert!((phi[[0, 0]].norm() - r).abs() < EPS);
        assert!((phi[[1, 0]].norm() - r).abs() < EPS);
        let total: f64 = phi.column(0).iter().map(|a| a.norm_sqr()).sum();
        assert!((total - 1.0).abs() < EPS);
    }

    #[test]
    fn hong_ou_mandel() {
        // coincident output vanishes for two photons on a 50/50 splitter
        let U = beamsplitter();
        let phi = aa_phi_all(U.view(), 2).unwrap();
        let basis: Vec<Vec<usize>> = fock_basis(2, 2).collect();
        let coincident
            = basis.iter().position(|s| s == &vec![1, 1]).unwrap();
        assert!(phi[[coincident, coincident]].norm() < EPS);
    }

    #[test]
    fn probability_conservation() {
        let U = beamsplitter();
        for photons in 1..4 {
            let phi = aa_phi_all(U.view(), photons).unwrap();
            for col in phi.columns() {
                let total: f64 = col.iter().map(|a| a.norm_sqr()).sum();
                assert!((total - 1.0).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn photon_mismatch_is_exactly_zero() {
        let U = beamsplitter();
        let phi = aa_phi(
            U.view(),
            &[vec![2, 0]],
            &[vec![2, 1]],
        ).unwrap();
        assert_eq!(phi[[0, 0]], C64::zero());
    }

    #[test]
    fn amplitude_grid_indexing() {
        let cache = BinomCache::new();
        let U = beamsplitter();
        let basis: Vec<Vec<usize>> = fock_basis(2, 2).collect();
        let phi = aa_phi_all(U.view(), 2).unwrap();
        // rows/columns of the grid follow the canonical index of each state
        for (k, state) in basis.iter().enumerate() {
            assert_eq!(
                crate::fock::fock_to_idx(&cache, state).unwrap(), k);
        }
        assert_eq!(phi.dim(), (basis.len(), basis.len()));
    }

    #[test]
    fn lossless_loss_reduces_to_aa_phi() {
        let U = beamsplitter();
        let in_states = vec![vec![1, 1], vec![2, 0]];
        let out_states: Vec<Vec<usize>> = fock_basis(2, 2).collect();
        let plain = aa_phi(U.view(), &in_states, &out_states).unwrap();
        let lossy = aa_phi_lossy(
            U.view(), &Loss::Uniform(1.0), &in_states, &out_states,
        ).unwrap();
        for (a, b) in plain.iter().zip(lossy.iter()) {
            assert!((a - b).norm() < EPS);
        }
    }

    #[test]
    fn lossy_probabilities_sum_to_one() {
        let U = beamsplitter();
        let in_states = vec![vec![1, 1]];
        let loss = Loss::PerMode(vec![0.7, 0.4]);
        let mut total = 0.0;
        for k in 0..3 {
            let out_states: Vec<Vec<usize>> = fock_basis(2, k).collect();
            let grid = aa_phi_lossy(
                U.view(), &loss, &in_states, &out_states).unwrap();
            total += grid.iter().map(|a| a.norm_sqr()).sum::<f64>();
        }
        assert!((total - 1.0).abs() < 1e-10);
    }

    #[test]
    fn full_loss_sends_everything_to_vacuum() {
        let U = beamsplitter();
        let grid = aa_phi_lossy(
            U.view(),
            &Loss::Uniform(0.0),
            &[vec![1, 1]],
            &[vec![0, 0]],
        ).unwrap();
        assert!((grid[[0, 0]].norm_sqr() - 1.0).abs() < 1e-10);
    }

    #[test]
    fn loss_validation() {
        let U = beamsplitter();
        let s = vec![vec![1, 0]];
        assert!(aa_phi_lossy(
            U.view(), &Loss::Uniform(1.5), &s, &s).is_err());
        assert!(aa_phi_lossy(
            U.view(), &Loss::PerMode(vec![0.5]), &s, &s).is_err());
    }

    #[test]
    fn restricted_matches_subblock() {
        let mut U: nd::Array2<C64> = nd::Array2::eye(3);
        U.slice_mut(nd::s![..2, ..2]).assign(&beamsplitter());
        let in_states = vec![vec![1, 0, 0]];
        let out_states = vec![vec![1, 0, 0], vec![0, 1, 0]];
        let restricted = aa_phi_restricted(
            U.view(), &[0, 1], &in_states, &out_states).unwrap();
        let direct = aa_phi(
            beamsplitter().view(),
            &[vec![1, 0]],
            &[vec![1, 0], vec![0, 1]],
        ).unwrap();
        for (a, b) in restricted.iter().zip(direct.iter()) {
            assert!((a - b).norm() < EPS);
        }
    }

    #[test]
    fn restricted_rejects_forbidden_occupation() {
        let U: nd::Array2<C64> = nd::Array2::eye(3);
        let err = aa_phi_restricted(
            U.view(),
            &[0, 1],
            &[vec![1, 0, 1]],
            &[vec![1, 0, 1]],
        );
        assert!(matches!(err, Err(BosonicError::InvalidState { .. })));
    }

    #[test]
    fn vjp_rejects_bad_shape() {
        let U = beamsplitter();
        let states = vec![vec![1, 0], vec![0, 1]];
        let upstream: nd::Array2<C64> = nd::Array2::zeros((3, 2));
        assert!(matches!(
            aa_phi_vjp(U.view(), &states, &states, upstream.view()),
            Err(BosonicError::ShapeMismatch { .. }),
        ));
    }

    #[test]
    fn vjp_matches_finite_difference() {
        let m = 3;
        let A = random_matrix(m);
        let in_states = vec![vec![1, 1, 0], vec![0, 1, 1]];
        let out_states: Vec<Vec<usize>> = fock_basis(m, 2).collect();
        let mut rng = rand::thread_rng();
        let upstream = nd::Array2::from_shape_fn(
            (out_states.len(), in_states.len()),
            |_| C64::new(rng.gen::<f64>() - 0.5, rng.gen::<f64>() - 0.5),
        );
        let grad = aa_phi_vjp(
            A.view(), &in_states, &out_states, upstream.view()).unwrap();
        let h = 1e-6;
        for i in 0..m {
            for j in 0..m {
                let mut ap = A.clone();
                let mut am = A.clone();
                ap[[i, j]] += C64::new(h, 0.0);
                am[[i, j]] -= C64::new(h, 0.0);
                let fp = aa_phi(ap.view(), &in_states, &out_states).unwrap();
                let fm = aa_phi(am.view(), &in_states, &out_states).unwrap();
                let fd: C64
                    = upstream.iter().zip(fp.iter().zip(fm.iter()))
                    .map(|(g, (p, q))| *g * (p - q) / (2.0 * h))
                    .sum();
                assert!((grad[[i, j]] - fd).norm() < 1e-5);
            }
        }
    }

    #[test]
    fn vacuum_amplitude_is_unity() {
        let U = beamsplitter();
        let phi = aa_phi(
            U.view(), &[vec![0, 0]], &[vec![0, 0]]).unwrap();
        assert!((phi[[0, 0]] - 1.0).norm() < EPS);
    }
}
