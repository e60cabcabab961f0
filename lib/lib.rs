#![allow(dead_code, non_snake_case, non_upper_case_globals)]

//! Fast computations for systems of indistinguishable bosons passing through
//! linear-optical networks.
//!
//! The centerpiece is the Aaronson-Arkhipov transition amplitude
//! ```text
//! ⟨T| Φ(U) |S⟩ = per(U_ST) / sqrt(s1! ⋯ sm! t1! ⋯ tm!)
//! ```
//! where `U_ST` is the submatrix of the mode unitary `U` built by repeating
//! rows and columns according to the occupation numbers of the input state
//! `S` and output state `T`, and `per` is the matrix permanent. [`fock`]
//! provides the occupation-state enumeration and indexing scheme,
//! [`permanent`] the exact (exponential-time) permanent kernel and its
//! reverse-mode gradient, and [`phi`] the amplitude engine together with its
//! lossy and mode-restricted variants and the gradient path back to the
//! unitary.

pub mod fock;
pub mod permanent;
pub mod phi;

pub use fock::{
    BinomCache,
    FockBasis,
    basis_size,
    fock_basis,
    fock_to_idx,
    idx_to_fock,
    validate_state,
};
pub use permanent::{ permanent, permanent_batch, permanent_minors, permanent_vjp };
pub use phi::{ Loss, aa_phi, aa_phi_all, aa_phi_lossy, aa_phi_restricted, aa_phi_vjp };

/// Errors arising from shape or occupation-state validation.
///
/// All validation happens eagerly at the boundary of each public operation;
/// no partial computation is performed before a state or matrix is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BosonicError {
    /// A matrix that must be square is not.
    #[error("expected a square matrix, got {rows}x{cols}")]
    NonSquareMatrix { rows: usize, cols: usize },

    /// A matrix dimension exceeds what the subset-enumeration kernel can
    /// address.
    #[error("matrix dimension {dim} exceeds the supported maximum {max}")]
    DimensionTooLarge { dim: usize, max: usize },

    /// A malformed or out-of-domain occupation state.
    #[error("invalid occupation state: {reason}")]
    InvalidState { reason: String },

    /// An upstream gradient whose shape does not match the forward output it
    /// is meant to backpropagate.
    #[error("gradient shape mismatch: expected {expected:?}, got {found:?}")]
    ShapeMismatch { expected: (usize, usize), found: (usize, usize) },
}

pub type BosonicResult<T> = Result<T, BosonicError>;
