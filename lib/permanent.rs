//! Exact matrix permanents via Ryser's inclusion-exclusion formula,
//! ```text
//! per(A) = (-1)^n Σ_{∅ ≠ S ⊆ [n]} (-1)^|S| Π_i Σ_{j ∈ S} a_ij
//! ```
//! with the column subsets walked in Gray-code order so that each step
//! updates the running row sums by a single column add/subtract. The batched
//! form shares one subset enumeration across many same-size matrices,
//! vectorizing the row-sum update and product step over the batch axis.
//!
//! Cost is Θ(2^n · n) per matrix; the permanent is #P-hard and no polynomial
//! exact algorithm exists. Accumulation is in `Complex64`. The alternating
//! sum cancels heavily, so results degrade past `n ≈ 30` or so; only
//! double-precision-class accuracy is guaranteed, and dimensions above
//! [`MAX_DIM`] are rejected outright.

use ndarray as nd;
use num_complex::Complex64 as C64;
use num_traits::{ One, Zero };
use rayon::prelude::*;
use crate::{ BosonicError, BosonicResult };

/// Largest matrix dimension accepted by the kernels.
///
/// The subset bitmask is a `u64`, and a 2^63-term sum is unreachable anyway.
pub const MAX_DIM: usize = 63;

/// Batch slice size handed to each rayon worker.
const CHUNK: usize = 128;

fn check_square(rows: usize, cols: usize) -> BosonicResult<usize> {
    if rows != cols {
        return Err(BosonicError::NonSquareMatrix { rows, cols });
    }
    if rows > MAX_DIM {
        return Err(BosonicError::DimensionTooLarge { dim: rows, max: MAX_DIM });
    }
    Ok(rows)
}

/// Compute the permanent of a square complex matrix.
///
/// `per` of the empty (0x0) matrix is 1, and of a 1x1 matrix its sole entry.
/// Fails if the matrix is not square or larger than [`MAX_DIM`].
pub fn permanent(A: nd::ArrayView2<C64>) -> BosonicResult<C64> {
    let (rows, cols) = A.dim();
    check_square(rows, cols)?;
    Ok(perm_single(&A))
}

fn perm_single(A: &nd::ArrayView2<C64>) -> C64 {
    let n = A.nrows();
    if n == 0 { return C64::one(); }
    let mut rowsum: Vec<C64> = vec![C64::zero(); n];
    let mut acc = C64::zero();
    let mut gray_prev: u64 = 0;
    for s in 1..(1_u64 << n) {
        let gray = s ^ (s >> 1);
        let flipped = gray ^ gray_prev;
        let j = flipped.trailing_zeros() as usize;
        if gray & flipped != 0 {
            rowsum.iter_mut().zip(A.column(j))
                .for_each(|(r, aij)| { *r += *aij; });
        } else {
            rowsum.iter_mut().zip(A.column(j))
                .for_each(|(r, aij)| { *r -= *aij; });
        }
        let prod: C64 = rowsum.iter().product();
        if (n as u32 - gray.count_ones()) % 2 == 0 {
            acc += prod;
        } else {
            acc -= prod;
        }
        gray_prev = gray;
    }
    acc
}

/// Compute the permanents of a batch of same-size square matrices, indexed by
/// the first axis of `mats`.
///
/// The Gray-code subset walk is performed once per chunk of the batch with
/// the inner row-sum/product work vectorized across the chunk, and chunks are
/// distributed over rayon workers. Results match [`permanent`] applied to
/// each matrix individually.
///
/// Fails if the matrices are not square or larger than [`MAX_DIM`].
pub fn permanent_batch(mats: nd::ArrayView3<C64>)
    -> BosonicResult<nd::Array1<C64>>
{
    let (b, rows, cols) = mats.dim();
    check_square(rows, cols)?;
    if b == 0 { return Ok(nd::Array1::zeros(0)); }
    let chunks: Vec<nd::ArrayView3<C64>>
        = mats.axis_chunks_iter(nd::Axis(0), CHUNK).collect();
    let parts: Vec<Vec<C64>>
        = chunks.par_iter().map(perm_chunk).collect();
    Ok(parts.into_iter().flatten().collect())
}

fn perm_chunk(mats: &nd::ArrayView3<C64>) -> Vec<C64> {
    let (b, n, _) = mats.dim();
    if n == 0 { return vec![C64::one(); b]; }
    let mut rowsum: nd::Array2<C64> = nd::Array2::zeros((b, n));
    let mut acc: Vec<C64> = vec![C64::zero(); b];
    let mut gray_prev: u64 = 0;
    for s in 1..(1_u64 << n) {
        let gray = s ^ (s >> 1);
        let flipped = gray ^ gray_prev;
        let j = flipped.trailing_zeros() as usize;
        let col = mats.slice(nd::s![.., .., j]);
        if gray & flipped != 0 {
            rowsum += &col;
        } else {
            rowsum -= &col;
        }
        let neg = (n as u32 - gray.count_ones()) % 2 == 1;
        acc.iter_mut().zip(rowsum.axis_iter(nd::Axis(0)))
            .for_each(|(a, row)| {
                let prod: C64 = row.iter().product();
                if neg { *a -= prod; } else { *a += prod; }
            });
        gray_prev = gray;
    }
    acc
}

/// Compute the matrix of permanent cofactors of `A`: entry `(i, j)` is the
/// permanent of `A` with row `i` and column `j` deleted.
///
/// This is the exact entrywise derivative of [`permanent`] — the analogue of
/// the determinant's cofactor expansion, without sign alternation. All n²
/// minors are pushed through a single shared subset enumeration via
/// [`permanent_batch`] instead of being evaluated independently.
///
/// Fails if the matrix is not square or larger than [`MAX_DIM`].
pub fn permanent_minors(A: nd::ArrayView2<C64>)
    -> BosonicResult<nd::Array2<C64>>
{
    let (rows, cols) = A.dim();
    let n = check_square(rows, cols)?;
    if n == 0 { return Ok(nd::Array2::zeros((0, 0))); }
    if n == 1 {
        return Ok(nd::Array2::from_elem((1, 1), C64::one()));
    }
    let mut minors: nd::Array3<C64> = nd::Array3::zeros((n * n, n - 1, n - 1));
    for i in 0..n {
        for j in 0..n {
            let mut minor = minors.slice_mut(nd::s![i * n + j, .., ..]);
            for (r, ri) in (0..n).filter(|r| *r != i).enumerate() {
                for (c, cj) in (0..n).filter(|c| *c != j).enumerate() {
                    minor[[r, c]] = A[[ri, cj]];
                }
            }
        }
    }
    let perms = permanent_batch(minors.view())?;
    Ok(nd::Array2::from_shape_fn((n, n), |(i, j)| perms[i * n + j]))
}

/// Vector-Jacobian product of [`permanent`]: the gradient of the permanent
/// with respect to each entry of `A`, scaled by the scalar upstream gradient.
///
/// The permanent is holomorphic in the matrix entries and the rule is applied
/// without conjugation: the result is `upstream * per(A minor (i, j))` at
/// entry `(i, j)`.
///
/// Fails if the matrix is not square or larger than [`MAX_DIM`].
pub fn permanent_vjp(A: nd::ArrayView2<C64>, upstream: C64)
    -> BosonicResult<nd::Array2<C64>>
{
    let mut grad = permanent_minors(A)?;
    grad.mapv_inplace(|g| upstream * g);
    Ok(grad)
}
