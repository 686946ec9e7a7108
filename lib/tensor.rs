//! Dense N-dimensional arrays with the handful of multi-linear operations
//! needed by a DMRG sweep.
//!
//! A [`Tensor`] is addressed positionally: every operation refers to axes by
//! their index in the tensor's shape. Contractions follow the usual convention
//! that the surviving axes of the left operand come first (in order), followed
//! by the surviving axes of the right operand.
//!
//! <blockquote>
//!   <p style="font-size:20px">
//!     <i>C</i><sub>
//!       <i>a</i><sub>1</sub>,...,<i>a</i><sub><i>N</i></sub>,
//!       <i>b</i><sub>1</sub>,...,<i>b</i><sub><i>M</i></sub>
//!     </sub>
//!       = Σ<sub><i>α</i><sub>1</sub>,...,<i>α</i><sub><i>D</i></sub></sub> [
//!         <i>A</i><sub>
//!           <i>a</i><sub>1</sub>,...,<i>a</i><sub><i>N</i></sub>,
//!           <i>α</i><sub>1</sub>,...,<i>α</i><sub><i>D</i></sub>
//!         </sub>
//!         × <i>B</i><sub>
//!           <i>α</i><sub>1</sub>,...,<i>α</i><sub><i>D</i></sub>,
//!           <i>b</i><sub>1</sub>,...,<i>b</i><sub><i>M</i></sub>
//!         </sub>
//!       ]
//!   </p>
//! </blockquote>
//!
//! Contractions are carried out by permuting and reshaping both operands into
//! matrices and calling a single matrix product; singular value decompositions
//! are delegated to `nalgebra`.
//!
//! ```
//! use tensor_dmrg::tensor::Tensor;
//!
//! let a: Tensor<f64> = Tensor::from_fn(&[2, 3], |ij| (ij[0] + ij[1]) as f64);
//! let b: Tensor<f64> = Tensor::from_fn(&[3, 4], |_| 1.0);
//! let c = a.contract(&b, &[1], &[0]).unwrap(); // C_ik = Σ_j A_ij B_jk
//! assert_eq!(c.shape(), &[2, 4]);
//! assert_eq!(c.get(&[1, 0]), Some(&6.0));
//! ```

use std::{ cmp::Ordering, fmt };
use nalgebra as na;
use ndarray::{ self as nd, Dimension };
use thiserror::Error;
use crate::ComplexScalar;

#[derive(Debug, Error)]
pub enum TensorError {
    /// Returned when the number of provided elements doesn't match the
    /// requested shape.
    #[error("error in tensor creation: shape {0:?} cannot hold {1} elements")]
    IncompatibleShape(Vec<usize>, usize),

    /// Returned when the two lists of contracted axes have different lengths.
    #[error("error in tensor contraction: axis lists of lengths {0} and {1}")]
    AxesLengthMismatch(usize, usize),

    /// Returned when an axis is out of bounds for a tensor.
    #[error("error in tensor operation: axis {axis} out of bounds for rank {rank}")]
    AxisOutOfBounds { axis: usize, rank: usize },

    /// Returned when the same axis is listed twice.
    #[error("error in tensor operation: duplicate axis {0}")]
    DuplicateAxis(usize),

    /// Returned when a pair of contracted axes have different dimensions.
    #[error("error in tensor contraction: axes ({0}, {1}) have dimensions {2} != {3}")]
    DimMismatch(usize, usize, usize, usize),

    /// Returned when a transpose is requested with something other than a
    /// permutation of all axes.
    #[error("error in tensor transpose: invalid permutation {0:?}")]
    InvalidPermutation(Vec<usize>),

    /// Returned when a linear combination is given a different number of
    /// coefficients and tensors.
    #[error("error in linear combination: {0} coefficients for {1} tensors")]
    CoefsMismatch(usize, usize),

    /// Returned when tensors of different shapes are added.
    #[error("error in linear combination: non-matching shapes {0:?} and {1:?}")]
    IncompatibleShapesAdd(Vec<usize>, Vec<usize>),

    /// Returned when a scalar is requested from a tensor of non-zero rank.
    #[error("error in scalar extraction: tensor has rank {0}")]
    NotScalar(usize),

    /// Returned when a weight vector doesn't match the dimension of an axis.
    #[error("error in axis scaling: {0} weights for an axis of dimension {1}")]
    WeightsMismatch(usize, usize),

    /// Returned when an SVD is requested with no axes on one side.
    #[error("error in SVD: cannot split a rank-{rank} tensor after {ldims} axes")]
    InvalidSplit { ldims: usize, rank: usize },

    /// Returned when the underlying decomposition fails to produce singular
    /// vectors.
    #[error("error in SVD: decomposition failed")]
    SvdFailed,
}
use TensorError::*;
pub type TensorResult<T> = Result<T, TensorError>;

/// Bounds on the number of singular values kept in a truncated SVD.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Truncation {
    /// Target truncation error, i.e. the maximum discarded fraction of the
    /// squared singular-value weight.
    pub trunc_err: f64,
    /// Minimum number of singular values to keep (if available).
    pub dmin: usize,
    /// Maximum number of singular values to keep.
    pub dmax: usize,
}

impl Truncation {
    // number of singular values to keep and the resulting truncation error;
    // `s` is sorted in descending order
    fn keep(&self, s: &[f64]) -> (usize, f64) {
        let total: f64 = s.iter().map(|sk| sk * sk).sum();
        if total <= 0.0 {
            return (self.dmin.max(1).min(s.len()), 0.0);
        }
        let mut d = s.len();
        let mut discarded: f64 = 0.0;
        while d > 0 {
            let w = discarded + s[d - 1] * s[d - 1];
            if w / total > self.trunc_err { break; }
            discarded = w;
            d -= 1;
        }
        let d = d.max(self.dmin).min(self.dmax).min(s.len()).max(1);
        let err: f64 = s[d..].iter().map(|sk| sk * sk).sum::<f64>() / total;
        (d, err)
    }
}

/// Output of [`Tensor::svd`].
///
/// For a tensor `T` split after its first `ldims` axes, `T ≈ U · diag(s) · V`,
/// where `U` has shape `[left dims..., d]` and `V` has shape
/// `[d, right dims...]`.
#[derive(Clone, Debug)]
pub struct SvdOutput<A> {
    pub u: Tensor<A>,
    pub s: Vec<f64>,
    pub v: Tensor<A>,
    /// Discarded fraction of the squared singular-value weight.
    pub trunc_err: f64,
    /// Number of kept singular values.
    pub d: usize,
}

/// Compute the Von Neumann entropy `-Σ p ln p` of a Schmidt spectrum, where
/// `p = s² / Σ s²`.
pub fn entanglement_entropy(s: &[f64]) -> f64 {
    let total: f64 = s.iter().map(|sk| sk * sk).sum();
    if total <= 0.0 { return 0.0; }
    s.iter()
        .map(|sk| sk * sk / total)
        .filter(|p| *p > 0.0)
        .map(|p| -p * p.ln())
        .sum()
}

/// A dense tensor of arbitrary rank.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor<A> {
    data: nd::ArrayD<A>,
}

impl<A> From<nd::ArrayD<A>> for Tensor<A> {
    fn from(data: nd::ArrayD<A>) -> Self { Self { data } }
}

fn check_axes(axes: &[usize], rank: usize) -> TensorResult<()> {
    for (k, &ax) in axes.iter().enumerate() {
        if ax >= rank { return Err(AxisOutOfBounds { axis: ax, rank }); }
        if axes[..k].contains(&ax) { return Err(DuplicateAxis(ax)); }
    }
    Ok(())
}

// permute and reshape into a standard-layout matrix
fn as_matrix<A>(
    data: &nd::ArrayD<A>,
    perm: Vec<usize>,
    rows: usize,
    cols: usize,
) -> TensorResult<nd::Array2<A>>
where A: Clone
{
    let shape = data.shape().to_vec();
    data.view()
        .permuted_axes(perm)
        .as_standard_layout()
        .into_owned()
        .into_shape((rows, cols))
        .map_err(|_| IncompatibleShape(shape, rows * cols))
}

fn into_dyn<A>(mat: nd::Array2<A>, shape: Vec<usize>) -> TensorResult<nd::ArrayD<A>>
where A: Clone
{
    let n = mat.len();
    let mat =
        if mat.is_standard_layout() {
            mat
        } else {
            mat.as_standard_layout().into_owned()
        };
    mat.into_shape(shape.clone())
        .map_err(|_| IncompatibleShape(shape, n))
}

impl<A> Tensor<A>
where A: ComplexScalar
{
    /// Create a new tensor of zeros.
    pub fn zeros(shape: &[usize]) -> Self {
        Self { data: nd::ArrayD::zeros(nd::IxDyn(shape)) }
    }

    /// Create a new rank-0 tensor.
    pub fn scalar(val: A) -> Self {
        Self { data: nd::arr0(val).into_dyn() }
    }

    /// Create a new rank-2 identity tensor.
    pub fn identity(dim: usize) -> Self {
        Self::from_fn(&[dim, dim], |ij| if ij[0] == ij[1] { A::one() } else { A::zero() })
    }

    /// Create a new tensor from a function of each element's multi-index.
    pub fn from_fn<F>(shape: &[usize], mut f: F) -> Self
    where F: FnMut(&[usize]) -> A
    {
        let data = nd::ArrayD::from_shape_fn(nd::IxDyn(shape), |idx| f(idx.slice()));
        Self { data }
    }

    /// Create a new tensor from elements listed in row-major order.
    ///
    /// Fails if the number of elements doesn't match the shape.
    pub fn from_elems(shape: &[usize], elems: Vec<A>) -> TensorResult<Self> {
        let n = elems.len();
        nd::ArrayD::from_shape_vec(nd::IxDyn(shape), elems)
            .map(|data| Self { data })
            .map_err(|_| IncompatibleShape(shape.to_vec(), n))
    }

    /// Return a reference to the underlying array.
    pub fn as_array(&self) -> &nd::ArrayD<A> { &self.data }

    /// Unwrap the underlying array.
    pub fn into_array(self) -> nd::ArrayD<A> { self.data }

    /// Return the dimensions of all axes.
    pub fn shape(&self) -> &[usize] { self.data.shape() }

    /// Return the number of axes.
    pub fn rank(&self) -> usize { self.data.ndim() }

    /// Return the total number of elements.
    pub fn size(&self) -> usize { self.data.len() }

    /// Return a reference to a single element, if the multi-index is in
    /// bounds.
    pub fn get(&self, idx: &[usize]) -> Option<&A> { self.data.get(idx) }

    /// Iterate over all elements in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = &A> + '_ { self.data.iter() }

    /// Extract the value of a rank-0 tensor.
    pub fn to_scalar(&self) -> TensorResult<A> {
        if self.rank() != 0 { return Err(NotScalar(self.rank())); }
        self.data.iter().next().copied().ok_or(NotScalar(0))
    }

    /// Return a new tensor with axes reordered so that axis `k` of the result
    /// is axis `perm[k]` of `self`.
    pub fn transpose(&self, perm: &[usize]) -> TensorResult<Self> {
        if perm.len() != self.rank() || check_axes(perm, self.rank()).is_err() {
            return Err(InvalidPermutation(perm.to_vec()));
        }
        let data =
            self.data.view()
            .permuted_axes(perm.to_vec())
            .as_standard_layout()
            .into_owned();
        Ok(Self { data })
    }

    /// Contract `self` with `other` over the paired axes `axes_a[k]` ↔
    /// `axes_b[k]`.
    ///
    /// The result carries the remaining axes of `self` followed by the
    /// remaining axes of `other`. Passing empty axis lists gives the outer
    /// product.
    pub fn contract(&self, other: &Self, axes_a: &[usize], axes_b: &[usize])
        -> TensorResult<Self>
    {
        if axes_a.len() != axes_b.len() {
            return Err(AxesLengthMismatch(axes_a.len(), axes_b.len()));
        }
        check_axes(axes_a, self.rank())?;
        check_axes(axes_b, other.rank())?;
        let sh_a = self.shape();
        let sh_b = other.shape();
        for (&a, &b) in axes_a.iter().zip(axes_b) {
            if sh_a[a] != sh_b[b] {
                return Err(DimMismatch(a, b, sh_a[a], sh_b[b]));
            }
        }
        let free_a: Vec<usize>
            = (0..self.rank()).filter(|k| !axes_a.contains(k)).collect();
        let free_b: Vec<usize>
            = (0..other.rank()).filter(|k| !axes_b.contains(k)).collect();
        let m: usize = free_a.iter().map(|&k| sh_a[k]).product();
        let c: usize = axes_a.iter().map(|&k| sh_a[k]).product();
        let n: usize = free_b.iter().map(|&k| sh_b[k]).product();
        let shape_c: Vec<usize>
            = free_a.iter().map(|&k| sh_a[k])
            .chain(free_b.iter().map(|&k| sh_b[k]))
            .collect();
        let perm_a: Vec<usize> = free_a.iter().chain(axes_a).copied().collect();
        let perm_b: Vec<usize> = axes_b.iter().chain(&free_b).copied().collect();
        let mat_a = as_matrix(&self.data, perm_a, m, c)?;
        let mat_b = as_matrix(&other.data, perm_b, c, n)?;
        let data = into_dyn(mat_a.dot(&mat_b), shape_c)?;
        Ok(Self { data })
    }

    /// Compute `out = beta * out + Σ_k coefs[k] * tens[k]`.
    ///
    /// If `beta` is zero, the previous contents (and shape) of `out` are
    /// discarded; if additionally `tens` is empty, `out` is zeroed in place.
    pub fn linear_combine(
        coefs: &[A],
        tens: &[&Tensor<A>],
        beta: A,
        out: &mut Tensor<A>,
    ) -> TensorResult<()>
    {
        if coefs.len() != tens.len() {
            return Err(CoefsMismatch(coefs.len(), tens.len()));
        }
        if beta.is_zero() {
            match tens.first() {
                Some(first) => { out.data = nd::ArrayD::zeros(first.shape()); },
                None => { out.data.fill(A::zero()); },
            }
        } else if !beta.is_one() {
            out.data.mapv_inplace(|x| x * beta);
        }
        for (&c, t) in coefs.iter().zip(tens) {
            if t.shape() != out.shape() {
                return Err(
                    IncompatibleShapesAdd(out.shape().to_vec(), t.shape().to_vec()));
            }
            out.data.zip_mut_with(&t.data, |o, &x| { *o += c * x; });
        }
        Ok(())
    }

    /// Multiply every slice along `axis` by the corresponding real weight.
    pub fn scale_axis(&mut self, axis: usize, weights: &[f64])
        -> TensorResult<()>
    {
        if axis >= self.rank() {
            return Err(AxisOutOfBounds { axis, rank: self.rank() });
        }
        let dim = self.shape()[axis];
        if weights.len() != dim { return Err(WeightsMismatch(weights.len(), dim)); }
        self.data.axis_iter_mut(nd::Axis(axis))
            .zip(weights)
            .for_each(|(mut lane, wk)| {
                let w = A::from_real(*wk);
                lane.mapv_inplace(|x| x * w);
            });
        Ok(())
    }

    /// Return the Frobenius norm.
    pub fn norm(&self) -> f64 {
        self.data.iter()
            .map(|x| x.modulus_squared())
            .sum::<f64>()
            .sqrt()
    }

    /// Normalize in place, returning the norm before normalization.
    ///
    /// A zero tensor is left untouched.
    pub fn normalize(&mut self) -> f64 {
        let norm = self.norm();
        if norm > 0.0 {
            let inv = A::from_real(norm.recip());
            self.data.mapv_inplace(|x| x * inv);
        }
        norm
    }

    /// Return the element-wise complex conjugate.
    ///
    /// Dense tensors carry no index directions, so this is the full
    /// "dagger" operation.
    pub fn dag(&self) -> Self {
        Self { data: self.data.mapv(|x| x.conjugate()) }
    }

    /// Compute the inner product ⟨`self`∣`other`⟩ over all elements.
    pub fn inner(&self, other: &Self) -> TensorResult<A> {
        if self.shape() != other.shape() {
            return Err(
                IncompatibleShapesAdd(self.shape().to_vec(), other.shape().to_vec()));
        }
        let res
            = self.data.iter().zip(other.data.iter())
            .fold(A::zero(), |acc, (&a, &b)| acc + a.conj_mul(b));
        Ok(res)
    }

    /// Compute a singular value decomposition, grouping the first `ldims` axes
    /// as matrix rows and the rest as columns.
    ///
    /// Singular values are sorted in descending order. If `trunc` is `None`,
    /// all `min(m, n)` singular values are kept; otherwise the smallest number
    /// whose discarded weight stays within `trunc.trunc_err` is kept, clamped
    /// to `[trunc.dmin, trunc.dmax]` and to the number available.
    pub fn svd(&self, ldims: usize, trunc: Option<&Truncation>)
        -> TensorResult<SvdOutput<A>>
    {
        let rank = self.rank();
        if ldims == 0 || ldims >= rank { return Err(InvalidSplit { ldims, rank }); }
        let lshape = self.shape()[..ldims].to_vec();
        let rshape = self.shape()[ldims..].to_vec();
        let m: usize = lshape.iter().product();
        let n: usize = rshape.iter().product();
        let mat: na::DMatrix<A>
            = na::DMatrix::from_row_iterator(m, n, self.data.iter().copied());
        let svd = mat.try_svd(true, true, f64::EPSILON, 0).ok_or(SvdFailed)?;
        let u = svd.u.ok_or(SvdFailed)?;
        let v_t = svd.v_t.ok_or(SvdFailed)?;
        let sv = svd.singular_values;
        let mut order: Vec<usize> = (0..sv.len()).collect();
        order.sort_by(|&a, &b| sv[b].partial_cmp(&sv[a]).unwrap_or(Ordering::Equal));
        let s_sorted: Vec<f64> = order.iter().map(|&k| sv[k]).collect();
        let (d, trunc_err) = match trunc {
            Some(t) => t.keep(&s_sorted),
            None => (s_sorted.len(), 0.0),
        };
        let u_mat: nd::Array2<A>
            = nd::Array2::from_shape_fn((m, d), |(i, j)| u[(i, order[j])]);
        let v_mat: nd::Array2<A>
            = nd::Array2::from_shape_fn((d, n), |(i, j)| v_t[(order[i], j)]);
        let mut ushape = lshape;
        ushape.push(d);
        let mut vshape = vec![d];
        vshape.extend(rshape);
        let u = Self { data: into_dyn(u_mat, ushape)? };
        let v = Self { data: into_dyn(v_mat, vshape)? };
        let s: Vec<f64> = s_sorted.into_iter().take(d).collect();
        Ok(SvdOutput { u, s, v, trunc_err, d })
    }
}

impl<A> fmt::Display for Tensor<A>
where A: fmt::Display
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.data, self.data.shape())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use num_complex::Complex64 as C64;

    fn ramp(shape: &[usize]) -> Tensor<f64> {
        let mut k = 0.0_f64;
        Tensor::from_fn(shape, |_| { k += 1.0; (k * 0.37).sin() + (k * k * 0.11).cos() })
    }

    fn assert_close(a: &Tensor<f64>, b: &Tensor<f64>, eps: f64) {
        assert_eq!(a.shape(), b.shape());
        a.iter().zip(b.iter())
            .for_each(|(x, y)| { assert_relative_eq!(*x, *y, epsilon = eps); });
    }

    #[test]
    fn contract_matches_matrix_product() {
        let a = ramp(&[3, 4]);
        let b = ramp(&[4, 2]);
        let c = a.contract(&b, &[1], &[0]).unwrap();
        assert_eq!(c.shape(), &[3, 2]);
        for i in 0..3 {
            for k in 0..2 {
                let expected: f64
                    = (0..4).map(|j| a.get(&[i, j]).unwrap() * b.get(&[j, k]).unwrap())
                    .sum();
                assert_relative_eq!(*c.get(&[i, k]).unwrap(), expected, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn contract_non_adjacent_axes() {
        let a = ramp(&[2, 3, 4]);
        let b = ramp(&[4, 5, 2]);
        // C_{j,l} = Σ_{i,k} A_{i,j,k} B_{k,l,i}
        let c = a.contract(&b, &[0, 2], &[2, 0]).unwrap();
        assert_eq!(c.shape(), &[3, 5]);
        let expected: f64
            = (0..2).flat_map(|i| (0..4).map(move |k| (i, k)))
            .map(|(i, k)| a.get(&[i, 1, k]).unwrap() * b.get(&[k, 3, i]).unwrap())
            .sum();
        assert_relative_eq!(*c.get(&[1, 3]).unwrap(), expected, epsilon = 1e-12);
    }

    #[test]
    fn full_contraction_is_scalar() {
        let a = ramp(&[2, 3]);
        let s = a.contract(&a, &[0, 1], &[0, 1]).unwrap();
        assert_eq!(s.rank(), 0);
        assert_relative_eq!(s.to_scalar().unwrap(), a.norm().powi(2), epsilon = 1e-12);
    }

    #[test]
    fn contract_rejects_bad_axes() {
        let a = ramp(&[2, 3]);
        assert!(matches!(a.contract(&a, &[0], &[1]), Err(DimMismatch(0, 1, 2, 3))));
        assert!(matches!(a.contract(&a, &[2], &[0]), Err(AxisOutOfBounds { .. })));
        assert!(matches!(a.contract(&a, &[0, 0], &[0, 1]), Err(DuplicateAxis(0))));
    }

    #[test]
    fn transpose_moves_elements() {
        let a = ramp(&[2, 3, 4]);
        let t = a.transpose(&[2, 0, 1]).unwrap();
        assert_eq!(t.shape(), &[4, 2, 3]);
        assert_eq!(t.get(&[3, 1, 2]), a.get(&[1, 2, 3]));
        assert!(a.transpose(&[0, 0, 1]).is_err());
    }

    #[test]
    fn linear_combine_accumulates() {
        let a = ramp(&[2, 2]);
        let b = Tensor::<f64>::identity(2);
        let mut out = Tensor::zeros(&[]);
        Tensor::linear_combine(&[2.0, -1.0], &[&a, &b], 0.0, &mut out).unwrap();
        Tensor::linear_combine(&[1.0], &[&b], 0.5, &mut out).unwrap();
        let expected = Tensor::from_fn(&[2, 2], |ij| {
            let aij = *a.get(ij).unwrap();
            let bij = *b.get(ij).unwrap();
            0.5 * (2.0 * aij - bij) + bij
        });
        assert_close(&out, &expected, 1e-12);
        let c = ramp(&[3]);
        assert!(Tensor::linear_combine(&[1.0], &[&c], 1.0, &mut out).is_err());
    }

    #[test]
    fn svd_reconstructs() {
        let t = ramp(&[2, 3, 4]);
        let SvdOutput { u, s, mut v, trunc_err, d } = t.svd(2, None).unwrap();
        assert_eq!(d, 4);
        assert_eq!(trunc_err, 0.0);
        assert!(s.windows(2).all(|w| w[0] >= w[1]));
        v.scale_axis(0, &s).unwrap();
        let rec = u.contract(&v, &[2], &[0]).unwrap();
        assert_close(&rec, &t, 1e-10);
        // left factor is an isometry
        let id = u.dag().contract(&u, &[0, 1], &[0, 1]).unwrap();
        assert_close(&id, &Tensor::identity(d), 1e-10);
    }

    #[test]
    fn svd_truncates_by_weight_and_bounds() {
        // rank-2 matrix with singular values 3, 1e-4
        let t: Tensor<f64> = Tensor::from_fn(&[3, 3], |ij| {
            match (ij[0], ij[1]) {
                (0, 0) => 3.0,
                (1, 1) => 1e-4,
                _ => 0.0,
            }
        });
        let trunc = Truncation { trunc_err: 1e-6, dmin: 1, dmax: 10 };
        let out = t.svd(1, Some(&trunc)).unwrap();
        assert_eq!(out.d, 1);
        assert_relative_eq!(out.trunc_err, 1e-8 / (9.0 + 1e-8), epsilon = 1e-14);
        // dmin forces more values than the error budget requires
        let trunc = Truncation { trunc_err: 1e-6, dmin: 2, dmax: 10 };
        assert_eq!(t.svd(1, Some(&trunc)).unwrap().d, 2);
        // dmin beyond the number of singular values is capped
        let trunc = Truncation { trunc_err: 0.0, dmin: 7, dmax: 10 };
        assert_eq!(t.svd(1, Some(&trunc)).unwrap().d, 3);
        // dmax wins over the error budget
        let trunc = Truncation { trunc_err: 0.0, dmin: 1, dmax: 1 };
        assert_eq!(t.svd(1, Some(&trunc)).unwrap().d, 1);
    }

    #[test]
    fn complex_dag_and_inner() {
        let a: Tensor<C64>
            = Tensor::from_fn(&[2, 2], |ij| C64::new(ij[0] as f64, 1.0 + ij[1] as f64));
        let n2 = a.inner(&a).unwrap();
        assert_relative_eq!(n2.re, a.norm().powi(2), epsilon = 1e-12);
        assert_relative_eq!(n2.im, 0.0, epsilon = 1e-12);
        assert_eq!(a.dag().get(&[1, 0]), Some(&C64::new(1.0, -1.0)));
    }

    #[test]
    fn entropy_of_product_and_bell() {
        assert_relative_eq!(entanglement_entropy(&[1.0, 0.0]), 0.0);
        let h = std::f64::consts::FRAC_1_SQRT_2;
        assert_relative_eq!(entanglement_entropy(&[h, h]), 2.0_f64.ln(), epsilon = 1e-12);
    }
}
