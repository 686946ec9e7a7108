//! Matrix product operators in matrix representation.
//!
//! Each site of the lattice carries a sparse matrix whose entries are
//! (optional) rank-2 site operators `[s_out, s_in]`. The Hamiltonian is the
//! product of these operator-valued matrices taken along the chain, so the
//! column index of site `k` is contracted with the row index of site `k + 1`.
//! Boundary matrices are a single row (site 0) and a single column (site
//! `N - 1`).
//!
//! ```text
//!     a        b        c
//! ... ─ W[k] ─── W[k+1] ─ ...
//!       │         │
//! ```

use std::ops::Index;
use once_cell::sync::Lazy;
use thiserror::Error;
use crate::{ ComplexScalar, tensor::Tensor };

#[derive(Debug, Error)]
pub enum MpoError {
    /// Returned when attempting to create an MPO for fewer than 2 sites.
    #[error("error in MPO creation: need at least 2 sites, got {0}")]
    TooFewSites(usize),

    /// Returned when a boundary matrix isn't a single row/column.
    #[error("error in MPO creation: boundary site {site} has a {rows}×{cols} matrix")]
    BadBoundary { site: usize, rows: usize, cols: usize },

    /// Returned when the columns of one site don't line up with the rows of
    /// the next.
    #[error("error in MPO creation: site {0} has {1} columns but site {2} has {3} rows")]
    BondMismatch(usize, usize, usize, usize),

    /// Returned when accessing an entry outside of an operator matrix.
    #[error("error in operator matrix: entry ({0}, {1}) out of bounds")]
    OutOfBounds(usize, usize),

    /// Returned when an entry isn't a square rank-2 tensor, or doesn't match
    /// the physical dimension of the rest of the matrix.
    #[error("error in operator matrix: invalid site operator at ({0}, {1})")]
    BadOperator(usize, usize),
}
use MpoError::*;
pub type MpoResult<T> = Result<T, MpoError>;

/// A `rows × cols` grid of optional site operators.
#[derive(Clone, Debug)]
pub struct SparseOpMatrix<A> {
    rows: usize,
    cols: usize,
    data: Vec<Option<Tensor<A>>>,
}

impl<A> SparseOpMatrix<A>
where A: ComplexScalar
{
    /// Create a new matrix with all entries null.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols, data: vec![None; rows * cols] }
    }

    pub fn rows(&self) -> usize { self.rows }

    pub fn cols(&self) -> usize { self.cols }

    /// Set the `(i, j)`-th entry.
    ///
    /// Fails if the entry is out of bounds or if `op` isn't a square rank-2
    /// tensor of the same physical dimension as the other entries.
    pub fn set(&mut self, i: usize, j: usize, op: Tensor<A>) -> MpoResult<()> {
        if i >= self.rows || j >= self.cols { return Err(OutOfBounds(i, j)); }
        let sh = op.shape();
        if sh.len() != 2 || sh[0] != sh[1] { return Err(BadOperator(i, j)); }
        if self.phys_dim().is_some_and(|d| d != sh[0]) {
            return Err(BadOperator(i, j));
        }
        self.data[i * self.cols + j] = Some(op);
        Ok(())
    }

    /// Return the `(i, j)`-th entry, if it's non-null.
    pub fn get(&self, i: usize, j: usize) -> Option<&Tensor<A>> {
        (i < self.rows && j < self.cols)
            .then(|| self.data[i * self.cols + j].as_ref())
            .flatten()
    }

    pub fn is_null(&self, i: usize, j: usize) -> bool { self.get(i, j).is_none() }

    /// Return the dimension of the local Hilbert space, if at least one entry
    /// is non-null.
    pub fn phys_dim(&self) -> Option<usize> {
        self.data.iter().flatten().map(|op| op.shape()[0]).next()
    }

    /// Iterate over the non-null entries of row `i` as `(j, op)`.
    pub fn row(&self, i: usize) -> impl Iterator<Item = (usize, &Tensor<A>)> + '_ {
        (0..self.cols).filter_map(move |j| self.get(i, j).map(|op| (j, op)))
    }

    /// Iterate over the non-null entries of column `j` as `(i, op)`.
    pub fn col(&self, j: usize) -> impl Iterator<Item = (usize, &Tensor<A>)> + '_ {
        (0..self.rows).filter_map(move |i| self.get(i, j).map(|op| (i, op)))
    }

    // Return the number of non-null entries.
}

/// A matrix product operator with one [`SparseOpMatrix`] per site.
#[derive(Clone, Debug)]
pub struct MatReprMpo<A> {
    sites: Vec<SparseOpMatrix<A>>,
}

impl<A> MatReprMpo<A>
where A: ComplexScalar
{
    /// Create a new MPO from its site matrices, checking the boundary shapes
    /// and that neighbouring matrices line up.
    pub fn new(sites: Vec<SparseOpMatrix<A>>) -> MpoResult<Self> {
        let n = sites.len();
        if n < 2 { return Err(TooFewSites(n)); }
        if sites[0].rows() != 1 {
            return Err(BadBoundary { site: 0, rows: sites[0].rows(), cols: sites[0].cols() });
        }
        if sites[n - 1].cols() != 1 {
            return Err(
                BadBoundary { site: n - 1, rows: sites[n - 1].rows(), cols: sites[n - 1].cols() });
        }
        for (k, (w0, w1)) in sites.iter().zip(sites.iter().skip(1)).enumerate() {
            if w0.cols() != w1.rows() {
                return Err(BondMismatch(k, w0.cols(), k + 1, w1.rows()));
            }
        }
        Ok(Self { sites })
    }

    /// Return the number of sites.
    pub fn len(&self) -> usize { self.sites.len() }

    pub fn is_empty(&self) -> bool { self.sites.is_empty() }

    /// Return the local Hilbert space dimension of each site (0 for a site
    /// whose matrix is entirely null).
    pub fn phys_dims(&self) -> Vec<usize> {
        self.sites.iter().map(|w| w.phys_dim().unwrap_or(0)).collect()
    }
}

impl<A> Index<usize> for MatReprMpo<A> {
    type Output = SparseOpMatrix<A>;

    fn index(&self, k: usize) -> &Self::Output { &self.sites[k] }
}

// spin-1/2 operators in the basis (↑, ↓)
struct SpinHalf {
    id: Tensor<f64>,
    sz: Tensor<f64>,
    sp: Tensor<f64>,
    sm: Tensor<f64>,
}

static SPIN_HALF: Lazy<SpinHalf> = Lazy::new(|| {
    let elem = |i: usize, j: usize| move |ij: &[usize]| {
        if ij[0] == i && ij[1] == j { 1.0 } else { 0.0 }
    };
    SpinHalf {
        id: Tensor::identity(2),
        sz: Tensor::from_fn(&[2, 2], |ij| {
            match (ij[0], ij[1]) {
                (0, 0) => 0.5,
                (1, 1) => -0.5,
                _ => 0.0,
            }
        }),
        sp: Tensor::from_fn(&[2, 2], elem(0, 1)),
        sm: Tensor::from_fn(&[2, 2], elem(1, 0)),
    }
});

fn scaled<A>(op: &Tensor<f64>, a: f64) -> Tensor<A>
where A: ComplexScalar
{
    Tensor::from(op.as_array().mapv(|x| A::from_real(a * x)))
}

/// Build the MPO for a spin-1/2 XXZ chain of `n` sites in a longitudinal
/// field,
///
/// <blockquote>
///   <p style="font-size:20px">
///     <i>H</i>
///       = Σ<sub><i>k</i></sub> [
///         (<i>J</i><sub><i>xy</i></sub>/2)
///           (<i>S</i><sup>+</sup><sub><i>k</i></sub> <i>S</i><sup>−</sup><sub><i>k</i>+1</sub>
///           + <i>S</i><sup>−</sup><sub><i>k</i></sub> <i>S</i><sup>+</sup><sub><i>k</i>+1</sub>)
///         + <i>J</i><sub><i>z</i></sub>
///           <i>S</i><sup><i>z</i></sup><sub><i>k</i></sub> <i>S</i><sup><i>z</i></sup><sub><i>k</i>+1</sub>
///       ]
///       + <i>h</i> Σ<sub><i>k</i></sub> <i>S</i><sup><i>z</i></sup><sub><i>k</i></sub>
///   </p>
/// </blockquote>
///
/// with open boundary conditions. The bulk matrix is the usual
/// lower-triangular 5×5 form; site 0 keeps only its last row and site `n - 1`
/// only its first column.
pub fn spin_chain_mpo<A>(n: usize, jz: f64, jxy: f64, h: f64)
    -> MpoResult<MatReprMpo<A>>
where A: ComplexScalar
{
    if n < 2 { return Err(TooFewSites(n)); }
    let ops = &*SPIN_HALF;
    let mut bulk: SparseOpMatrix<A> = SparseOpMatrix::new(5, 5);
    bulk.set(0, 0, scaled(&ops.id, 1.0))?;
    bulk.set(1, 0, scaled(&ops.sp, 1.0))?;
    bulk.set(2, 0, scaled(&ops.sm, 1.0))?;
    bulk.set(3, 0, scaled(&ops.sz, 1.0))?;
    if h != 0.0 { bulk.set(4, 0, scaled(&ops.sz, h))?; }
    if jxy != 0.0 {
        bulk.set(4, 1, scaled(&ops.sm, jxy / 2.0))?;
        bulk.set(4, 2, scaled(&ops.sp, jxy / 2.0))?;
    }
    if jz != 0.0 { bulk.set(4, 3, scaled(&ops.sz, jz))?; }
    bulk.set(4, 4, scaled(&ops.id, 1.0))?;

    let mut first: SparseOpMatrix<A> = SparseOpMatrix::new(1, 5);
    bulk.row(4)
        .try_for_each(|(j, op)| first.set(0, j, op.clone()))?;
    let mut last: SparseOpMatrix<A> = SparseOpMatrix::new(5, 1);
    bulk.col(0)
        .try_for_each(|(i, op)| last.set(i, 0, op.clone()))?;

    let mut sites = Vec::with_capacity(n);
    sites.push(first);
    (1..n - 1).for_each(|_| { sites.push(bulk.clone()); });
    sites.push(last);
    MatReprMpo::new(sites)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra as na;

    // contract the MPO into a dense 2^n × 2^n matrix, site 0 most significant
    fn dense(mpo: &MatReprMpo<f64>) -> na::DMatrix<f64> {
        let n = mpo.len();
        let dim = 1 << n;
        let bit = |x: usize, k: usize| (x >> (n - 1 - k)) & 1;
        na::DMatrix::from_fn(dim, dim, |out, inp| {
            let mut vec = na::DVector::from_element(1, 1.0);
            for k in 0..n {
                let w = &mpo[k];
                let m = na::DMatrix::from_fn(w.rows(), w.cols(), |i, j| {
                    w.get(i, j)
                        .and_then(|op| op.get(&[bit(out, k), bit(inp, k)]).copied())
                        .unwrap_or(0.0)
                });
                vec = m.transpose() * vec;
            }
            vec[0]
        })
    }

    #[test]
    fn boundary_shapes() {
        let mpo: MatReprMpo<f64> = spin_chain_mpo(4, 1.0, 1.0, 0.0).unwrap();
        assert_eq!(mpo.len(), 4);
        assert_eq!((mpo[0].rows(), mpo[0].cols()), (1, 5));
        assert_eq!((mpo[1].rows(), mpo[1].cols()), (5, 5));
        assert_eq!((mpo[3].rows(), mpo[3].cols()), (5, 1));
        assert_eq!(mpo.phys_dims(), vec![2; 4]);
        assert!(mpo[1].is_null(0, 1));
        assert!(!mpo[1].is_null(4, 4));
    }

    #[test]
    fn rejects_malformed() {
        assert!(matches!(spin_chain_mpo::<f64>(1, 1.0, 1.0, 0.0), Err(TooFewSites(1))));
        let sites = vec![SparseOpMatrix::<f64>::new(1, 2), SparseOpMatrix::new(3, 1)];
        assert!(matches!(MatReprMpo::new(sites), Err(BondMismatch(0, 2, 1, 3))));
        let mut w = SparseOpMatrix::<f64>::new(1, 1);
        assert!(matches!(w.set(0, 0, Tensor::zeros(&[2, 3])), Err(BadOperator(0, 0))));
    }

    #[test]
    fn heisenberg_matrix_elements() {
        let (jz, jxy, h) = (1.3, 0.7, 0.2);
        let mpo: MatReprMpo<f64> = spin_chain_mpo(3, jz, jxy, h).unwrap();
        let hmat = dense(&mpo);
        // ↑↑↑
        assert_relative_eq!(hmat[(0, 0)], 2.0 * jz / 4.0 + 1.5 * h, epsilon = 1e-12);
        // ↑↓↑: two anti-aligned bonds
        assert_relative_eq!(hmat[(2, 2)], -2.0 * jz / 4.0 + 0.5 * h, epsilon = 1e-12);
        // ↓↑↑ ↔ ↑↓↑
        assert_relative_eq!(hmat[(4, 2)], jxy / 2.0, epsilon = 1e-12);
        // no next-nearest-neighbour hopping: ↓↑↑ ↔ ↑↑↓
        assert_relative_eq!(hmat[(4, 1)], 0.0);
        assert_relative_eq!(&hmat, &hmat.transpose(), epsilon = 1e-12);
    }
}
