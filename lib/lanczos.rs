//! Krylov-subspace ground state solver.
//!
//! The solver only needs to be able to apply the effective Hamiltonian to a
//! state, which is abstracted by [`HamiltonianMultiply`]. The same control
//! logic therefore drives both the single-process multiply (a direct sum over
//! effective Hamiltonian terms) and the distributed one (a full round of the
//! master/worker protocol per call).
//!
//! Basis vectors are generated with the plain three-term recurrence
//!
//! <blockquote>
//!   <p style="font-size:20px">
//!     <i>γ</i><sub><i>m</i></sub>
//!       = <i>H</i> <i>v</i><sub><i>m</i>−1</sub>
//!       − <i>a</i><sub><i>m</i>−1</sub> <i>v</i><sub><i>m</i>−1</sub>
//!       − <i>b</i><sub><i>m</i>−2</sub> <i>v</i><sub><i>m</i>−2</sub>
//!   </p>
//! </blockquote>
//!
//! without reorthogonalization; the lowest Ritz value of the tridiagonal
//! matrix `T = tridiag(b, a, b)` is probed after every step.

use nalgebra as na;
use serde::{ Deserialize, Serialize };
use thiserror::Error;
use tracing::warn;
use crate::{ ComplexScalar, tensor::{ Tensor, TensorError } };

#[derive(Debug, Error)]
pub enum LanczosError {
    /// Returned when the initial state has zero norm.
    #[error("error in Lanczos solver: initial state has zero norm")]
    ZeroState,

    /// Returned when the tridiagonal eigenproblem fails to converge.
    #[error("error in Lanczos solver: tridiagonal eigensolver failed at size {0}")]
    TridiagFailed(usize),
}
use LanczosError::*;
pub type LanczosResult<T> = Result<T, LanczosError>;

/// Something that can be applied to a state as an effective Hamiltonian.
///
/// Implementations may carry state across calls (e.g. caches that are only
/// valid within a single solve), so `multiply` takes `&mut self`.
pub trait HamiltonianMultiply<A> {
    type Error: From<TensorError> + From<LanczosError>;

    /// Compute `H·state`. The result must have the same shape as `state`.
    fn multiply(&mut self, state: &Tensor<A>) -> Result<Tensor<A>, Self::Error>;
}

/// Convergence parameters.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LanczosParams {
    /// Stop when the lowest Ritz value improves by less than this amount.
    pub error: f64,
    /// Maximum number of Krylov vectors.
    pub max_iterations: usize,
}

impl Default for LanczosParams {
    fn default() -> Self { Self { error: 1e-9, max_iterations: 100 } }
}

/// Output of [`lanczos`].
#[derive(Clone, Debug)]
pub struct LanczosRes<A> {
    /// Lowest eigenvalue estimate.
    pub gs_eng: f64,
    /// Corresponding normalized eigenvector.
    pub gs_vec: Tensor<A>,
    /// Number of Krylov vectors used.
    pub iters: usize,
}

// symmetric tridiagonal matrix with diagonal `a` and off-diagonal `b`
fn tridiag(a: &[f64], b: &[f64]) -> na::DMatrix<f64> {
    let n = a.len();
    na::DMatrix::from_fn(n, n, |i, j| {
        if i == j {
            a[i]
        } else if i + 1 == j {
            b[i]
        } else if j + 1 == i {
            b[j]
        } else {
            0.0
        }
    })
}

fn tridiag_eigen(a: &[f64], b: &[f64]) -> LanczosResult<na::SymmetricEigen<f64, na::Dyn>> {
    na::SymmetricEigen::try_new(tridiag(a, b), f64::EPSILON, 0)
        .ok_or(TridiagFailed(a.len()))
}

/// Lowest eigenvalue of the tridiagonal matrix.
fn tridiag_ground_energy(a: &[f64], b: &[f64]) -> LanczosResult<f64> {
    let eig = tridiag_eigen(a, b)?;
    Ok(eig.eigenvalues.iter().copied().fold(f64::INFINITY, f64::min))
}

/// Lowest eigenvalue of the tridiagonal matrix and its eigenvector.
fn tridiag_ground_state(a: &[f64], b: &[f64]) -> LanczosResult<(f64, Vec<f64>)> {
    let eig = tridiag_eigen(a, b)?;
    let (k0, e0)
        = eig.eigenvalues.iter().copied().enumerate()
        .fold((0, f64::INFINITY), |(k, e), (j, ej)| if ej < e { (j, ej) } else { (k, e) });
    let vec: Vec<f64> = eig.eigenvectors.column(k0).iter().copied().collect();
    Ok((e0, vec))
}

// numerical threshold below which a residual is considered to vanish
fn is_exhausted(norm: f64, a: f64) -> bool { norm <= 1e-12 * a.abs().max(1.0) }

fn combine_bases<A, E>(coefs: &[f64], bases: &[Tensor<A>]) -> Result<Tensor<A>, E>
where
    A: ComplexScalar,
    E: From<TensorError>,
{
    let coefs: Vec<A> = coefs.iter().map(|c| A::from_real(*c)).collect();
    let refs: Vec<&Tensor<A>> = bases.iter().take(coefs.len()).collect();
    let mut gs_vec = Tensor::zeros(&[]);
    Tensor::linear_combine(&coefs, &refs, A::zero(), &mut gs_vec)?;
    Ok(gs_vec)
}

/// Find the lowest eigenpair of `ham` starting from `init_state`.
///
/// Iteration stops when the lowest Ritz value improves by less than
/// `params.error`, when the number of Krylov vectors reaches the dimension of
/// the state, or when `params.max_iterations` vectors have been generated. In
/// the last case the best estimate is returned as-is. If the Krylov space is
/// exhausted before any of these (a vanishing residual), the ground state of
/// the tridiagonal matrix built so far is returned immediately.
pub fn lanczos<A, H>(
    ham: &mut H,
    mut init_state: Tensor<A>,
    params: &LanczosParams,
) -> Result<LanczosRes<A>, H::Error>
where
    A: ComplexScalar,
    H: HamiltonianMultiply<A>,
{
    let dim = init_state.size();
    let max_iter = params.max_iterations.max(2);
    if init_state.normalize() == 0.0 { return Err(ZeroState.into()); }

    let mut bases: Vec<Tensor<A>> = Vec::with_capacity(max_iter);
    let mut a: Vec<f64> = Vec::with_capacity(max_iter);
    let mut b: Vec<f64> = Vec::with_capacity(max_iter);

    let mut last_hv = ham.multiply(&init_state)?;
    a.push(init_state.inner(&last_hv)?.real());
    bases.push(init_state);
    let mut energy0 = a[0];
    let mut m: usize = 0;
    loop {
        m += 1;
        let mut gamma = last_hv;
        if m == 1 {
            Tensor::linear_combine(
                &[A::from_real(-a[m - 1])],
                &[&bases[m - 1]],
                A::one(),
                &mut gamma,
            )?;
        } else {
            Tensor::linear_combine(
                &[A::from_real(-a[m - 1]), A::from_real(-b[m - 2])],
                &[&bases[m - 1], &bases[m - 2]],
                A::one(),
                &mut gamma,
            )?;
        }
        let norm_gamma = gamma.normalize();
        if is_exhausted(norm_gamma, a[m - 1]) {
            if m == 1 {
                let gs_vec = bases.swap_remove(0);
                return Ok(LanczosRes { gs_eng: energy0, gs_vec, iters: m });
            }
            let (gs_eng, coefs) = tridiag_ground_state(&a, &b)?;
            let gs_vec = combine_bases::<A, H::Error>(&coefs, &bases)?;
            return Ok(LanczosRes { gs_eng, gs_vec, iters: m });
        }
        b.push(norm_gamma);
        last_hv = ham.multiply(&gamma)?;
        a.push(gamma.inner(&last_hv)?.real());
        bases.push(gamma);

        let energy0_new = tridiag_ground_energy(&a, &b)?;
        let converged = energy0 - energy0_new < params.error;
        if converged || m == dim || m == max_iter - 1 {
            if !converged && m == max_iter - 1 {
                warn!(
                    iters = m + 1,
                    delta = energy0 - energy0_new,
                    "Lanczos iteration cap reached before convergence"
                );
            }
            let (gs_eng, coefs) = tridiag_ground_state(&a, &b)?;
            let gs_vec = combine_bases::<A, H::Error>(&coefs, &bases)?;
            return Ok(LanczosRes { gs_eng, gs_vec, iters: m + 1 });
        }
        energy0 = energy0_new;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crate::tensor::TensorResult;

    #[derive(Debug, Error)]
    enum TestError {
        #[error(transparent)]
        Tensor(#[from] TensorError),
        #[error(transparent)]
        Lanczos(#[from] LanczosError),
    }

    // dense symmetric matrix acting on rank-1 tensors; records every input
    struct Dense {
        mat: na::DMatrix<f64>,
        seen: Vec<Tensor<f64>>,
    }

    impl HamiltonianMultiply<f64> for Dense {
        type Error = TestError;

        fn multiply(&mut self, state: &Tensor<f64>) -> Result<Tensor<f64>, TestError> {
            self.seen.push(state.clone());
            let v = na::DVector::from_iterator(state.size(), state.iter().copied());
            let hv = &self.mat * v;
            Ok(Tensor::from_elems(&[hv.len()], hv.iter().copied().collect())?)
        }
    }

    fn chain_matrix(n: usize) -> na::DMatrix<f64> {
        // 1D tight-binding chain plus a ramp potential
        na::DMatrix::from_fn(n, n, |i, j| {
            if i == j {
                0.1 * i as f64
            } else if i.abs_diff(j) == 1 {
                -1.0
            } else {
                0.0
            }
        })
    }

    fn seed_vector(n: usize) -> TensorResult<Tensor<f64>> {
        Tensor::from_elems(&[n], (0..n).map(|k| 1.0 + (k as f64 * 0.7).cos()).collect())
    }

    #[test]
    fn finds_ground_state() {
        let n = 30;
        let mat = chain_matrix(n);
        let exact = mat.clone().symmetric_eigenvalues().min();
        let mut ham = Dense { mat, seen: Vec::new() };
        let params = LanczosParams { error: 1e-12, max_iterations: 100 };
        let res = lanczos(&mut ham, seed_vector(n).unwrap(), &params).unwrap();
        assert_relative_eq!(res.gs_eng, exact, epsilon = 1e-8);
        assert_relative_eq!(res.gs_vec.norm(), 1.0, epsilon = 1e-8);
        // residual of the returned eigenpair
        let hv = ham.multiply(&res.gs_vec).unwrap();
        let mut r = Tensor::zeros(&[]);
        Tensor::linear_combine(&[1.0, -res.gs_eng], &[&hv, &res.gs_vec], 0.0, &mut r)
            .unwrap();
        assert!(r.norm() < 1e-3);
    }

    #[test]
    fn krylov_basis_is_orthonormal() {
        let n = 40;
        let mut ham = Dense { mat: chain_matrix(n), seen: Vec::new() };
        let params = LanczosParams { error: 0.0, max_iterations: 12 };
        let res = lanczos(&mut ham, seed_vector(n).unwrap(), &params).unwrap();
        assert_eq!(res.iters, 12);
        assert_eq!(ham.seen.len(), 12);
        for (i, vi) in ham.seen.iter().enumerate() {
            for (j, vj) in ham.seen.iter().enumerate() {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(vi.inner(vj).unwrap(), expected, epsilon = 1e-8);
            }
        }
    }

    #[test]
    fn probe_energy_is_non_increasing() {
        let n = 40;
        let energies: Vec<f64>
            = (2..15)
            .map(|max_iterations| {
                let mut ham = Dense { mat: chain_matrix(n), seen: Vec::new() };
                let params = LanczosParams { error: 0.0, max_iterations };
                lanczos(&mut ham, seed_vector(n).unwrap(), &params).unwrap().gs_eng
            })
            .collect();
        assert!(energies.windows(2).all(|w| w[1] <= w[0] + 1e-12));
    }

    #[test]
    fn exact_eigenvector_terminates_immediately() {
        let diag = [3.0, -1.5, 2.0, 0.5];
        let mat = na::DMatrix::from_fn(4, 4, |i, j| if i == j { diag[i] } else { 0.0 });
        let mut ham = Dense { mat, seen: Vec::new() };
        let init = Tensor::from_elems(&[4], vec![0.0, 2.0, 0.0, 0.0]).unwrap();
        let params = LanczosParams::default();
        let res = lanczos(&mut ham, init, &params).unwrap();
        assert_eq!(res.iters, 1);
        assert_eq!(res.gs_eng, -1.5);
        assert_eq!(res.gs_vec, Tensor::from_elems(&[4], vec![0.0, 1.0, 0.0, 0.0]).unwrap());
    }

    #[test]
    fn stops_at_vector_dimension() {
        let n = 3;
        let mut ham = Dense { mat: chain_matrix(n), seen: Vec::new() };
        let exact = chain_matrix(n).symmetric_eigenvalues().min();
        let params = LanczosParams { error: -1.0, max_iterations: 50 };
        let res = lanczos(&mut ham, seed_vector(n).unwrap(), &params).unwrap();
        assert!(res.iters <= n + 1);
        assert_relative_eq!(res.gs_eng, exact, epsilon = 1e-10);
    }

    #[test]
    fn zero_state_is_rejected() {
        let mut ham = Dense { mat: chain_matrix(2), seen: Vec::new() };
        let res = lanczos(&mut ham, Tensor::zeros(&[2]), &LanczosParams::default());
        assert!(matches!(res, Err(TestError::Lanczos(ZeroState))));
    }
}
