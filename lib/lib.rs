#![allow(non_snake_case)]

//! Finite-size two-site density matrix renormalization group (DMRG) with the
//! effective Hamiltonian–state products distributed over a pool of worker
//! ranks.
//!
//! The crate is organized leaf-first:
//! - [`tensor`]: a dense tensor engine (contraction, linear combination,
//!   truncated SVD, normalization);
//! - [`mpo`] and [`mps`]: the Hamiltonian in matrix representation and the
//!   variational state;
//! - [`store`]: persistence of block operators and MPS tensors;
//! - [`comm`] and [`protocol`]: rank-addressed message passing and the closed
//!   set of messages exchanged between the master and its workers;
//! - [`effham`], [`distributor`], [`lanczos`]: effective Hamiltonian terms, the
//!   distribution of their contraction over workers, and the Krylov ground
//!   state solver built on top;
//! - [`dmrg`] and [`worker`]: the sweep state machine run by the master and the
//!   loop run by every worker.
//!
//! ```no_run
//! use rand::{ rngs::StdRng, SeedableRng };
//! use tensor_dmrg::{
//!     dmrg::{ self, SweepParams },
//!     mpo::spin_chain_mpo,
//!     mps::FiniteMps,
//!     store::MemStore,
//! };
//!
//! let n = 10;
//! let mpo = spin_chain_mpo::<f64>(n, 1.0, 1.0, 0.0).unwrap();
//! let mut rng = StdRng::seed_from_u64(10546);
//! let mps = FiniteMps::<f64>::random(&vec![2; n], 8, &mut rng).unwrap();
//! let params = SweepParams::default();
//! let out
//!     = dmrg::run_distributed(&mpo, mps, &params, MemStore::new(), 4)
//!     .unwrap();
//! println!("E0 = {}", out.energy);
//! ```

use std::fmt;
use nalgebra as na;
use ndarray as nd;
use ndarray_npy::{ ReadableElement, WritableElement };

pub mod tensor;
pub mod mpo;
pub mod mps;
pub mod store;

pub mod comm;
pub mod protocol;

pub mod effham;
pub mod distributor;
pub mod lanczos;

pub mod dmrg;
pub mod worker;

pub mod config;

/// Convenience trait to identify number types that can be used as tensor
/// elements.
///
/// All inner products, Krylov coefficients, and singular values are real
/// (`f64`) regardless of whether the elements themselves are real or complex.
/// Implemented for `f64` and [`Complex64`][num_complex::Complex64].
pub trait ComplexScalar
where
    Self:
        na::ComplexField<RealField = f64>
        + nd::LinalgScalar
        + ReadableElement
        + WritableElement
        + Send
        + Sync
        + fmt::Debug
{
    /// Return the complex conjugate of `self` multiplied by `other`, i.e. the
    /// single-element contribution to an inner product ⟨`self`∣`other`⟩.
    fn conj_mul(self, other: Self) -> Self { self.conjugate() * other }
}

impl<A> ComplexScalar for A
where
    A:
        na::ComplexField<RealField = f64>
        + nd::LinalgScalar
        + ReadableElement
        + WritableElement
        + Send
        + Sync
        + fmt::Debug
{ }
