//! Finite matrix product states with tracked canonical forms.
//!
//! Every site tensor has shape `[left bond, physical, right bond]`, with the
//! bonds at either end of the chain having dimension 1.
//!
//! ```text
//!  1    D[0]   D[1]        D[n-2]   1
//!  ─ A[0] ─ A[1] ─ ... ─ A[n-1] ─
//!     │       │             │
//!    d[0]    d[1]         d[n-1]
//! ```
//!
//! Each site additionally carries a [`Canon`] tag recording whether it's
//! known to be left- or right-canonical, and the state as a whole may have a
//! canonical center: a site such that every tensor to its left is
//! left-canonical and every tensor to its right is right-canonical. Any
//! mutable access to a site tensor clears that site's tag and the center.
//!
//! Site tensors can be moved out to a [`BlockStore`] and back again without
//! touching the tags, so that only the tensors needed at the current bond
//! have to be resident.

use rand::{ Rng, distributions::Distribution };
use statrs::distribution::Normal;
use thiserror::Error;
use tracing::debug;
use crate::{
    ComplexScalar,
    store::{ BlockStore, StoreError },
    tensor::{ SvdOutput, Tensor, TensorError, Truncation },
};

#[derive(Debug, Error)]
pub enum MpsError {
    /// Returned when attempting to create an MPS of fewer than 2 sites.
    #[error("error in MPS creation: need at least 2 sites, got {0}")]
    TooFewSites(usize),

    /// Returned when a site tensor isn't rank 3, or a boundary bond isn't 1.
    #[error("error in MPS creation: invalid shape {1:?} at site {0}")]
    BadShape(usize, Vec<usize>),

    /// Returned when neighbouring site tensors don't share a bond dimension.
    #[error("error in MPS creation: bond dimension mismatch between sites {0} and {1}")]
    BondMismatch(usize, usize),

    /// Returned when a random state is requested with zero bond dimension.
    #[error("error in MPS creation: bond dimension must be non-zero")]
    ZeroBond,

    /// Returned when accessing a site outside the chain.
    #[error("error in MPS access: site {0} out of bounds")]
    OutOfBounds(usize),

    /// Returned when accessing a site tensor that has been dumped to a store.
    #[error("error in MPS access: tensor at site {0} is not resident")]
    NotResident(usize),

    #[error("tensor error: {0}")]
    TensorError(#[from] TensorError),

    #[error("store error: {0}")]
    StoreError(#[from] StoreError),
}
use MpsError::*;
pub type MpsResult<T> = Result<T, MpsError>;

/// Canonical form tag of a single site tensor.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Canon {
    /// No known canonical form.
    None,
    /// `Σ_{α,s} A*[α,s,β'] A[α,s,β] = δ_{β',β}`.
    Left,
    /// `Σ_{s,β} B[α,s,β] B*[α',s,β] = δ_{α,α'}`.
    Right,
}

/// A finite matrix product state.
#[derive(Clone, Debug)]
pub struct FiniteMps<A> {
    tens: Vec<Option<Tensor<A>>>,
    canon: Vec<Canon>,
    center: Option<usize>,
}

fn is_identity<A>(t: &Tensor<A>, eps: f64) -> bool
where A: ComplexScalar
{
    let sh = t.shape();
    sh.len() == 2 && sh[0] == sh[1]
        && t.as_array().indexed_iter()
            .all(|(idx, x)| {
                let target = if idx[0] == idx[1] { 1.0 } else { 0.0 };
                (*x - A::from_real(target)).modulus() < eps
            })
}

impl<A> FiniteMps<A>
where A: ComplexScalar
{
    /// Create a new MPS from a list of site tensors with no canonical form.
    pub fn new(tens: Vec<Tensor<A>>) -> MpsResult<Self> {
        let n = tens.len();
        if n < 2 { return Err(TooFewSites(n)); }
        for (k, t) in tens.iter().enumerate() {
            let sh = t.shape();
            if sh.len() != 3
                || (k == 0 && sh[0] != 1)
                || (k == n - 1 && sh[2] != 1)
            {
                return Err(BadShape(k, sh.to_vec()));
            }
        }
        for (k, (t0, t1)) in tens.iter().zip(tens.iter().skip(1)).enumerate() {
            if t0.shape()[2] != t1.shape()[0] { return Err(BondMismatch(k, k + 1)); }
        }
        Ok(Self {
            tens: tens.into_iter().map(Some).collect(),
            canon: vec![Canon::None; n],
            center: None,
        })
    }

    /// Create a random, normalized MPS with bond dimensions at most `d`,
    /// centered on site 0.
    ///
    /// Each bond is additionally capped by the dimension of the smaller of the
    /// two Hilbert spaces it separates. Entries are drawn from a standard
    /// normal distribution.
    pub fn random<R>(phys_dims: &[usize], d: usize, rng: &mut R) -> MpsResult<Self>
    where R: Rng + ?Sized
    {
        let n = phys_dims.len();
        if n < 2 { return Err(TooFewSites(n)); }
        if d == 0 { return Err(ZeroBond); }
        let bonds: Vec<usize>
            = (0..n - 1)
            .map(|k| {
                let left: usize
                    = phys_dims[..=k].iter()
                    .fold(1_usize, |acc, p| acc.saturating_mul(*p));
                let right: usize
                    = phys_dims[k + 1..].iter()
                    .fold(1_usize, |acc, p| acc.saturating_mul(*p));
                d.min(left).min(right)
            })
            .collect();
        let normal = Normal::standard();
        let tens: Vec<Tensor<A>>
            = phys_dims.iter().enumerate()
            .map(|(k, p)| {
                let dl = if k == 0 { 1 } else { bonds[k - 1] };
                let dr = if k == n - 1 { 1 } else { bonds[k] };
                Tensor::from_fn(&[dl, *p, dr], |_| A::from_real(normal.sample(rng)))
            })
            .collect();
        let mut mps = Self::new(tens)?;
        mps.centralize(0)?;
        mps.normalize_site(0)?;
        Ok(mps)
    }

    /// Return the number of sites.
    pub fn len(&self) -> usize { self.tens.len() }

    pub fn is_empty(&self) -> bool { self.tens.is_empty() }

    fn check_site(&self, site: usize) -> MpsResult<()> {
        if site >= self.tens.len() { Err(OutOfBounds(site)) } else { Ok(()) }
    }

    /// Return a reference to a resident site tensor.
    pub fn get(&self, site: usize) -> MpsResult<&Tensor<A>> {
        self.check_site(site)?;
        self.tens[site].as_ref().ok_or(NotResident(site))
    }

    /// Return a mutable reference to a resident site tensor, clearing its
    /// canonical tag and the center.
    pub fn get_mut(&mut self, site: usize) -> MpsResult<&mut Tensor<A>> {
        self.check_site(site)?;
        self.canon[site] = Canon::None;
        self.center = None;
        self.tens[site].as_mut().ok_or(NotResident(site))
    }

    /// Replace a site tensor, clearing its canonical tag and the center.
    pub fn set(&mut self, site: usize, ten: Tensor<A>) -> MpsResult<()> {
        self.check_site(site)?;
        self.tens[site] = Some(ten);
        self.canon[site] = Canon::None;
        self.center = None;
        Ok(())
    }

    /// Return `true` if the site tensor is held in memory.
    pub fn is_resident(&self, site: usize) -> bool {
        self.tens.get(site).is_some_and(|t| t.is_some())
    }

    pub fn canon(&self, site: usize) -> Canon {
        self.canon.get(site).copied().unwrap_or(Canon::None)
    }

    /// Overwrite the canonical tag of a site.
    ///
    /// The caller is responsible for the tag actually holding.
    pub fn set_canon(&mut self, site: usize, canon: Canon) -> MpsResult<()> {
        self.check_site(site)?;
        self.canon[site] = canon;
        Ok(())
    }

    pub fn center(&self) -> Option<usize> { self.center }

    /// Overwrite the canonical center.
    ///
    /// The caller is responsible for the tags on either side being
    /// consistent with it.
    pub fn set_center(&mut self, center: Option<usize>) { self.center = center; }

    /// Return the dimensions of all internal bonds of resident neighbouring
    /// tensors (`None` where either neighbour isn't resident).
    pub fn bond_dims(&self) -> Vec<Option<usize>> {
        self.tens.iter().zip(self.tens.iter().skip(1))
            .map(|(t0, _)| t0.as_ref().map(|t| t.shape()[2]))
            .collect()
    }

    /// Normalize a single site tensor in place, returning its previous norm.
    ///
    /// Canonical tags are left untouched.
    pub fn normalize_site(&mut self, site: usize) -> MpsResult<f64> {
        self.check_site(site)?;
        let t = self.tens[site].as_mut().ok_or(NotResident(site))?;
        Ok(t.normalize())
    }

    fn left_canonicalize_ten(&mut self, site: usize) -> MpsResult<()> {
        let SvdOutput { u, s, mut v, .. } = self.get(site)?.svd(2, None)?;
        v.scale_axis(0, &s)?;
        let next = v.contract(self.get(site + 1)?, &[1], &[0])?;
        self.tens[site] = Some(u);
        self.tens[site + 1] = Some(next);
        self.canon[site] = Canon::Left;
        self.canon[site + 1] = Canon::None;
        Ok(())
    }

    fn right_canonicalize_ten(&mut self, site: usize) -> MpsResult<()> {
        let SvdOutput { mut u, s, v, .. } = self.get(site)?.svd(1, None)?;
        u.scale_axis(1, &s)?;
        let prev = self.get(site - 1)?.contract(&u, &[2], &[0])?;
        self.tens[site] = Some(v);
        self.tens[site - 1] = Some(prev);
        self.canon[site] = Canon::Right;
        self.canon[site - 1] = Canon::None;
        Ok(())
    }

    /// Move the canonical center to site `c`.
    ///
    /// Only the tensors that aren't already in the required form are
    /// decomposed: on the left, canonicalization starts from the first site
    /// not tagged [`Canon::Left`]; on the right, from the last site not tagged
    /// [`Canon::Right`].
    pub fn centralize(&mut self, c: usize) -> MpsResult<()> {
        let n = self.len();
        self.check_site(c)?;
        if let Some(start) = (0..c).find(|&k| self.canon[k] != Canon::Left) {
            for k in start..c { self.left_canonicalize_ten(k)?; }
        }
        if let Some(start) = (c + 1..n).rev().find(|&k| self.canon[k] != Canon::Right) {
            for k in (c + 1..=start).rev() { self.right_canonicalize_ten(k)?; }
        }
        self.center = Some(c);
        Ok(())
    }

    /// Compress all bonds with truncated SVDs.
    ///
    /// The state is first centered on site 0 and normalized there, then each
    /// bond is truncated from left to right; the kept singular values are
    /// renormalized at every step. Afterwards every site but the last is
    /// left-canonical and the center is the last site.
    pub fn truncate(&mut self, trunc: &Truncation) -> MpsResult<()> {
        let n = self.len();
        self.centralize(0)?;
        self.normalize_site(0)?;
        for i in 0..n - 1 {
            let SvdOutput { u, mut s, mut v, trunc_err, d }
                = self.get(i)?.svd(2, Some(trunc))?;
            debug!(bond = i, trunc_err, d, "truncate MPS bond");
            let snorm: f64 = s.iter().map(|sk| sk * sk).sum::<f64>().sqrt();
            if snorm > 0.0 { s.iter_mut().for_each(|sk| { *sk /= snorm; }); }
            v.scale_axis(0, &s)?;
            let next = v.contract(self.get(i + 1)?, &[1], &[0])?;
            self.tens[i] = Some(u);
            self.tens[i + 1] = Some(next);
            self.canon[i] = Canon::Left;
            self.canon[i + 1] = Canon::None;
        }
        self.center = Some(n - 1);
        Ok(())
    }

    /// Check the left-canonical condition on a site to within `eps`.
    pub fn is_left_canonical(&self, site: usize, eps: f64) -> MpsResult<bool> {
        let t = self.get(site)?;
        let id = t.dag().contract(t, &[0, 1], &[0, 1])?;
        Ok(is_identity(&id, eps))
    }

    /// Check the right-canonical condition on a site to within `eps`.
    pub fn is_right_canonical(&self, site: usize, eps: f64) -> MpsResult<bool> {
        let t = self.get(site)?;
        let id = t.contract(&t.dag(), &[1, 2], &[1, 2])?;
        Ok(is_identity(&id, eps))
    }

    /// Move a site tensor out to a store. Its canonical tag is kept.
    pub fn dump_ten<S>(&mut self, site: usize, store: &mut S) -> MpsResult<()>
    where S: BlockStore<A> + ?Sized
    {
        self.check_site(site)?;
        let t = self.tens[site].take().ok_or(NotResident(site))?;
        store.dump_mps_ten(site, t)?;
        Ok(())
    }

    /// Bring a site tensor back from a store. Its canonical tag is kept.
    pub fn load_ten<S>(&mut self, site: usize, store: &mut S) -> MpsResult<()>
    where S: BlockStore<A> + ?Sized
    {
        self.check_site(site)?;
        self.tens[site] = Some(store.load_mps_ten(site)?);
        Ok(())
    }

    /// Move every resident site tensor out to a store.
    pub fn dump_all<S>(&mut self, store: &mut S) -> MpsResult<()>
    where S: BlockStore<A> + ?Sized
    {
        (0..self.len())
            .filter(|&k| self.is_resident(k))
            .collect::<Vec<usize>>()
            .into_iter()
            .try_for_each(|k| self.dump_ten(k, store))
    }

    /// Bring every site tensor back from a store.
    pub fn load_all<S>(&mut self, store: &mut S) -> MpsResult<()>
    where S: BlockStore<A> + ?Sized
    {
        (0..self.len()).try_for_each(|k| self.load_ten(k, store))
    }

    /// Contract the whole chain into a flat state vector, with site 0 as the
    /// most significant index.
    ///
    /// The size of the result is exponential in the number of sites.
    pub fn to_state_vector(&self) -> MpsResult<Tensor<A>> {
        let mut acc = self.get(0)?.clone();
        for k in 1..self.len() {
            acc = acc.contract(self.get(k)?, &[acc.rank() - 1], &[0])?;
        }
        Ok(Tensor::from_elems(&[acc.size()], acc.iter().copied().collect())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use num_complex::Complex64 as C64;
    use rand::{ SeedableRng, rngs::StdRng };
    use crate::store::MemStore;

    const EPS: f64 = 1e-10;

    fn assert_same_state<A: ComplexScalar>(a: &Tensor<A>, b: &Tensor<A>) {
        let overlap = a.inner(b).unwrap().modulus();
        assert_relative_eq!(overlap, a.norm() * b.norm(), epsilon = 1e-10);
        assert_relative_eq!(a.norm(), b.norm(), epsilon = 1e-10);
    }

    #[test]
    fn random_bond_dims_are_capped() {
        let mut rng = StdRng::seed_from_u64(10546);
        let mps: FiniteMps<f64> = FiniteMps::random(&[2; 6], 8, &mut rng).unwrap();
        let bonds: Vec<usize> = mps.bond_dims().into_iter().flatten().collect();
        assert_eq!(bonds, vec![2, 4, 8, 4, 2]);
        assert_eq!(mps.center(), Some(0));
        assert_relative_eq!(mps.to_state_vector().unwrap().norm(), 1.0, epsilon = EPS);
    }

    #[test]
    fn centralize_gives_canonical_form() {
        let mut rng = StdRng::seed_from_u64(123);
        let mut mps: FiniteMps<C64> = FiniteMps::random(&[2, 3, 2, 2, 3], 5, &mut rng).unwrap();
        let state = mps.to_state_vector().unwrap();
        for c in [4, 1, 3, 0, 2] {
            mps.centralize(c).unwrap();
            assert_eq!(mps.center(), Some(c));
            for k in 0..c {
                assert_eq!(mps.canon(k), Canon::Left);
                assert!(mps.is_left_canonical(k, EPS).unwrap());
            }
            for k in c + 1..mps.len() {
                assert_eq!(mps.canon(k), Canon::Right);
                assert!(mps.is_right_canonical(k, EPS).unwrap());
            }
            assert_same_state(&state, &mps.to_state_vector().unwrap());
        }
    }

    #[test]
    fn mutable_access_clears_tags() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut mps: FiniteMps<f64> = FiniteMps::random(&[2; 4], 4, &mut rng).unwrap();
        assert_eq!(mps.canon(2), Canon::Right);
        mps.get_mut(2).unwrap().scale_axis(1, &[2.0, 2.0]).unwrap();
        assert_eq!(mps.canon(2), Canon::None);
        assert_eq!(mps.center(), None);
        assert_eq!(mps.canon(3), Canon::Right);
    }

    #[test]
    fn truncation_within_bounds_is_idempotent() {
        let mut rng = StdRng::seed_from_u64(99);
        let mut mps: FiniteMps<f64> = FiniteMps::random(&[2; 7], 6, &mut rng).unwrap();
        let before = mps.to_state_vector().unwrap();
        let trunc = Truncation { trunc_err: 0.0, dmin: 1, dmax: 64 };
        mps.truncate(&trunc).unwrap();
        let after = mps.to_state_vector().unwrap();
        before.iter().zip(after.iter())
            .for_each(|(x, y)| { assert_relative_eq!(x.abs(), y.abs(), epsilon = 1e-10); });
        assert_same_state(&before, &after);
        assert_eq!(mps.center(), Some(6));
        for k in 0..6 { assert!(mps.is_left_canonical(k, EPS).unwrap()); }
        // a second pass changes nothing
        mps.truncate(&trunc).unwrap();
        assert_same_state(&after, &mps.to_state_vector().unwrap());
    }

    #[test]
    fn truncation_caps_bond_dimension() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut mps: FiniteMps<f64> = FiniteMps::random(&[2; 8], 16, &mut rng).unwrap();
        let trunc = Truncation { trunc_err: 0.0, dmin: 1, dmax: 3 };
        mps.truncate(&trunc).unwrap();
        assert!(mps.bond_dims().into_iter().flatten().all(|d| d <= 3));
        assert_relative_eq!(mps.to_state_vector().unwrap().norm(), 1.0, epsilon = EPS);
    }

    #[test]
    fn dump_and_load_keep_tags() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut mps: FiniteMps<f64> = FiniteMps::random(&[2; 5], 4, &mut rng).unwrap();
        mps.centralize(2).unwrap();
        let t3 = mps.get(3).unwrap().clone();
        let mut store = MemStore::new();
        mps.dump_all(&mut store).unwrap();
        assert!(!mps.is_resident(3));
        assert!(matches!(mps.get(3), Err(NotResident(3))));
        mps.load_ten(3, &mut store).unwrap();
        assert_eq!(mps.get(3).unwrap(), &t3);
        assert_eq!(mps.canon(3), Canon::Right);
        assert_eq!(mps.center(), Some(2));
    }

    #[test]
    fn rejects_bad_shapes() {
        let a: Tensor<f64> = Tensor::zeros(&[1, 2, 3]);
        let b: Tensor<f64> = Tensor::zeros(&[2, 2, 1]);
        assert!(matches!(FiniteMps::new(vec![a.clone(), b]), Err(BondMismatch(0, 1))));
        let c: Tensor<f64> = Tensor::zeros(&[3, 2, 2]);
        assert!(matches!(FiniteMps::new(vec![a.clone(), c]), Err(BadShape(1, _))));
        assert!(matches!(FiniteMps::new(vec![a]), Err(TooFewSites(1))));
    }
}
