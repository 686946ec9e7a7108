//! Effective Hamiltonian terms and the contraction kernels that act with them.
//!
//! At the bond `(l, r = l + 1)` the effective Hamiltonian is a sum of terms
//! `L_i ⊗ W_l(i, j) ⊗ W_r(j, k) ⊗ R_k`, one for every pair of non-null MPO
//! entries sharing the middle index `j`. Here `L_i[α', α]` and `R_k[β', β]`
//! are block operators (bra index first), and `W(i, j)[s', s]` are site
//! operators.
//!
//! Grouping the terms by `j` gives
//!
//! ```text
//! H·θ = Σ_j BS_j · θ · SB_j,    BS_j = Σ_i L_i ⊗ W_l(i, j),    SB_j = Σ_k W_r(j, k) ⊗ R_k
//! ```
//!
//! which is the unit of work handed to a worker (one [`Task`] per `j`). The
//! same grouping gives the block growth steps `L'_j = A† · BS_j · A` and
//! `R'_j = B · SB_j · B†`.

use thiserror::Error;
use crate::{
    ComplexScalar,
    mpo::SparseOpMatrix,
    protocol::{ Task, TermGroup },
    store::Side,
    tensor::{ Tensor, TensorError },
};

#[derive(Debug, Error)]
pub enum EffHamError {
    /// Returned when a block operator group doesn't line up with the MPO.
    #[error("error in effective Hamiltonian: {side} operator group has {got} operators, expected {expected}")]
    GroupSize { side: Side, expected: usize, got: usize },

    #[error("tensor error: {0}")]
    TensorError(#[from] TensorError),
}
use EffHamError::*;
pub type EffHamResult<T> = Result<T, EffHamError>;

/// A group of block operators, indexed by MPO row (left) or column (right).
pub type OpGroup<A> = Vec<Tensor<A>>;

/// One additive term of a two-site effective Hamiltonian.
#[derive(Copy, Clone, Debug)]
pub struct EffHamTerm<'a, A> {
    pub lop: &'a Tensor<A>,
    pub wl: &'a Tensor<A>,
    pub wr: &'a Tensor<A>,
    pub rop: &'a Tensor<A>,
}

fn check_group<A>(side: Side, group: &[Tensor<A>], expected: usize)
    -> EffHamResult<()>
{
    if group.len() != expected {
        Err(GroupSize { side, expected, got: group.len() })
    } else {
        Ok(())
    }
}

/// List every term of the effective Hamiltonian at a bond.
pub fn assemble_terms<'a, A>(
    lgroup: &'a [Tensor<A>],
    wl: &'a SparseOpMatrix<A>,
    wr: &'a SparseOpMatrix<A>,
    rgroup: &'a [Tensor<A>],
) -> EffHamResult<Vec<EffHamTerm<'a, A>>>
where A: ComplexScalar
{
    check_group(Side::Left, lgroup, wl.rows())?;
    check_group(Side::Right, rgroup, wr.cols())?;
    let mut terms = Vec::new();
    for (i, lop) in lgroup.iter().enumerate() {
        for j in 0..wl.cols() {
            for (k, rop) in rgroup.iter().enumerate() {
                if let (Some(opl), Some(opr)) = (wl.get(i, j), wr.get(j, k)) {
                    terms.push(EffHamTerm { lop, wl: opl, wr: opr, rop });
                }
            }
        }
    }
    Ok(terms)
}

impl<'a, A> EffHamTerm<'a, A>
where A: ComplexScalar
{
    /// Apply this term alone to a two-site state `θ[α, s1, s2, β]`.
    pub fn apply(&self, state: &Tensor<A>) -> EffHamResult<Tensor<A>> {
        let t = self.lop.contract(state, &[1], &[0])?; // [α', s1, s2, β]
        let t = self.wl.contract(&t, &[1], &[1])?; // [s1', α', s2, β]
        let t = self.wr.contract(&t, &[1], &[2])?; // [s2', s1', α', β]
        let t = self.rop.contract(&t, &[1], &[3])?; // [β', s2', s1', α']
        Ok(t.transpose(&[3, 2, 1, 0])?)
    }
}

/// Apply a list of terms to a two-site state by direct summation.
pub fn multiply_terms<A>(terms: &[EffHamTerm<'_, A>], state: &Tensor<A>)
    -> EffHamResult<Tensor<A>>
where A: ComplexScalar
{
    let mut res = Tensor::zeros(state.shape());
    for term in terms.iter() {
        let t = term.apply(state)?;
        Tensor::linear_combine(&[A::one()], &[&t], A::one(), &mut res)?;
    }
    Ok(res)
}

fn block_site_group<A>(lgroup: &[Tensor<A>], w: &SparseOpMatrix<A>, j: usize)
    -> TermGroup<A>
where A: ComplexScalar
{
    w.col(j)
        .filter_map(|(i, op)| lgroup.get(i).map(|lop| (lop.clone(), op.clone())))
        .collect()
}

fn site_block_group<A>(w: &SparseOpMatrix<A>, rgroup: &[Tensor<A>], j: usize)
    -> TermGroup<A>
where A: ComplexScalar
{
    w.row(j)
        .filter_map(|(k, op)| rgroup.get(k).map(|rop| (op.clone(), rop.clone())))
        .collect()
}

/// Split the effective Hamiltonian at a bond into one task per middle MPO
/// index.
pub fn bond_tasks<A>(
    lgroup: &[Tensor<A>],
    wl: &SparseOpMatrix<A>,
    wr: &SparseOpMatrix<A>,
    rgroup: &[Tensor<A>],
) -> EffHamResult<Vec<Task<A>>>
where A: ComplexScalar
{
    check_group(Side::Left, lgroup, wl.rows())?;
    check_group(Side::Right, rgroup, wr.cols())?;
    let tasks
        = (0..wl.cols())
        .map(|j| {
            Task {
                id: j,
                block_site: block_site_group(lgroup, wl, j),
                site_block: site_block_group(wr, rgroup, j),
            }
        })
        .collect();
    Ok(tasks)
}

/// Tasks to grow a left block across a site with MPO matrix `w`, one per
/// column of `w`.
pub fn grow_left_tasks<A>(lgroup: &[Tensor<A>], w: &SparseOpMatrix<A>)
    -> EffHamResult<Vec<Task<A>>>
where A: ComplexScalar
{
    check_group(Side::Left, lgroup, w.rows())?;
    let tasks
        = (0..w.cols())
        .map(|j| {
            Task { id: j, block_site: block_site_group(lgroup, w, j), site_block: Vec::new() }
        })
        .collect();
    Ok(tasks)
}

/// Tasks to grow a right block across a site with MPO matrix `w`, one per
/// row of `w`.
pub fn grow_right_tasks<A>(w: &SparseOpMatrix<A>, rgroup: &[Tensor<A>])
    -> EffHamResult<Vec<Task<A>>>
where A: ComplexScalar
{
    check_group(Side::Right, rgroup, w.cols())?;
    let tasks
        = (0..w.rows())
        .map(|a| {
            Task { id: a, block_site: Vec::new(), site_block: site_block_group(w, rgroup, a) }
        })
        .collect();
    Ok(tasks)
}

// Σ over pairs of outer products, with axes reordered as
// [out_0, out_1, in_0, in_1]
fn sum_outer<A>(group: &TermGroup<A>) -> EffHamResult<Option<Tensor<A>>>
where A: ComplexScalar
{
    let mut acc: Option<Tensor<A>> = None;
    for (x, y) in group.iter() {
        let xy = x.contract(y, &[], &[])?; // [x', x, y', y]
        match acc.as_mut() {
            Some(sum) => { Tensor::linear_combine(&[A::one()], &[&xy], A::one(), sum)?; },
            None => { acc = Some(xy); },
        }
    }
    acc.map(|sum| sum.transpose(&[0, 2, 1, 3]))
        .transpose()
        .map_err(EffHamError::from)
}

/// A [`Task`] whose term groups have been summed into single operators.
///
/// `block_site` is `BS[α', s', α, s]` and `site_block` is `SB[s', β', s, β]`;
/// either is `None` if the corresponding group was empty, in which case the
/// task contributes zero.
#[derive(Clone, Debug)]
pub struct ContractedTask<A> {
    pub id: usize,
    block_site: Option<Tensor<A>>,
    site_block: Option<Tensor<A>>,
}

impl<A> Task<A>
where A: ComplexScalar
{
    /// Sum the term groups, consuming them.
    pub fn contract(self) -> EffHamResult<ContractedTask<A>> {
        let Task { id, block_site, site_block } = self;
        let block_site = sum_outer(&block_site)?;
        let site_block = sum_outer(&site_block)?;
        Ok(ContractedTask { id, block_site, site_block })
    }
}

impl<A> ContractedTask<A>
where A: ComplexScalar
{
    /// Compute `BS · θ · SB` for a two-site state `θ[α, s1, s2, β]`.
    pub fn apply(&self, state: &Tensor<A>) -> EffHamResult<Tensor<A>> {
        match (&self.block_site, &self.site_block) {
            (Some(bs), Some(sb)) => {
                let t = bs.contract(state, &[2, 3], &[0, 1])?; // [α', s1', s2, β]
                Ok(t.contract(sb, &[2, 3], &[2, 3])?) // [α', s1', s2', β']
            },
            _ => Ok(Tensor::zeros(state.shape())),
        }
    }

    /// Compute `A† · BS · A` for a left-canonical site tensor `A[α, s, β]`.
    pub fn grow_left(&self, a: &Tensor<A>) -> EffHamResult<Tensor<A>> {
        match &self.block_site {
            Some(bs) => {
                let t = bs.contract(a, &[2, 3], &[0, 1])?; // [α', s', β]
                Ok(a.dag().contract(&t, &[0, 1], &[0, 1])?) // [β', β]
            },
            None => {
                let d = a.shape().get(2).copied().unwrap_or(1);
                Ok(Tensor::zeros(&[d, d]))
            },
        }
    }

    /// Compute `B · SB · B†` for a right-canonical site tensor `B[α, s, β]`.
    pub fn grow_right(&self, b: &Tensor<A>) -> EffHamResult<Tensor<A>> {
        match &self.site_block {
            Some(sb) => {
                let t = sb.contract(b, &[2, 3], &[1, 2])?; // [s', β', α]
                Ok(b.dag().contract(&t, &[1, 2], &[0, 1])?) // [α', α]
            },
            None => {
                let d = b.shape().first().copied().unwrap_or(1);
                Ok(Tensor::zeros(&[d, d]))
            },
        }
    }
}

/// Sum per-task results in the order given, or return zeros of the given
/// shape if there are none.
pub fn sum_results<A>(results: &[Tensor<A>], shape: &[usize])
    -> EffHamResult<Tensor<A>>
where A: ComplexScalar
{
    let mut res = Tensor::zeros(shape);
    for t in results.iter() {
        Tensor::linear_combine(&[A::one()], &[t], A::one(), &mut res)?;
    }
    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{ Rng, SeedableRng, rngs::StdRng };
    use crate::mpo::spin_chain_mpo;

    fn rand_ten(shape: &[usize], rng: &mut StdRng) -> Tensor<f64> {
        Tensor::from_fn(shape, |_| rng.gen::<f64>() - 0.5)
    }

    // hermitian block operator
    fn rand_op(d: usize, rng: &mut StdRng) -> Tensor<f64> {
        let m = rand_ten(&[d, d], rng);
        let mut res = Tensor::zeros(&[]);
        Tensor::linear_combine(&[1.0, 1.0], &[&m, &m.transpose(&[1, 0]).unwrap()], 0.0, &mut res)
            .unwrap();
        res
    }

    fn assert_close(a: &Tensor<f64>, b: &Tensor<f64>) {
        assert_eq!(a.shape(), b.shape());
        a.iter().zip(b.iter())
            .for_each(|(x, y)| { assert_relative_eq!(*x, *y, epsilon = 1e-10); });
    }

    #[test]
    fn task_multiply_matches_direct_terms() {
        let mut rng = StdRng::seed_from_u64(10546);
        let mpo = spin_chain_mpo::<f64>(5, 1.0, 0.8, 0.3).unwrap();
        let (dl, dr) = (3, 4);
        let lgroup: Vec<Tensor<f64>> = (0..5).map(|_| rand_op(dl, &mut rng)).collect();
        let rgroup: Vec<Tensor<f64>> = (0..5).map(|_| rand_op(dr, &mut rng)).collect();
        let state = rand_ten(&[dl, 2, 2, dr], &mut rng);

        let terms = assemble_terms(&lgroup, &mpo[2], &mpo[3], &rgroup).unwrap();
        assert_eq!(terms.len(), 13);
        let direct = multiply_terms(&terms, &state).unwrap();

        let tasks = bond_tasks(&lgroup, &mpo[2], &mpo[3], &rgroup).unwrap();
        assert_eq!(tasks.len(), 5);
        let results: Vec<Tensor<f64>>
            = tasks.into_iter()
            .map(|task| task.contract().unwrap().apply(&state).unwrap())
            .collect();
        let via_tasks = sum_results(&results, state.shape()).unwrap();
        assert_close(&direct, &via_tasks);
    }

    #[test]
    fn grow_left_matches_explicit_sum() {
        let mut rng = StdRng::seed_from_u64(2);
        let mpo = spin_chain_mpo::<f64>(4, 1.0, 1.0, 0.5).unwrap();
        let w = &mpo[1];
        let lgroup: Vec<Tensor<f64>> = (0..5).map(|_| rand_op(3, &mut rng)).collect();
        let a = rand_ten(&[3, 2, 4], &mut rng);
        let tasks = grow_left_tasks(&lgroup, w).unwrap();
        for task in tasks.into_iter() {
            let j = task.id;
            let grown = task.contract().unwrap().grow_left(&a).unwrap();
            assert_eq!(grown.shape(), &[4, 4]);
            for bp in 0..4 {
                for b in 0..4 {
                    let mut expected = 0.0;
                    for (i, op) in w.col(j) {
                        for ap in 0..3 {
                            for al in 0..3 {
                                for sp in 0..2 {
                                    for s in 0..2 {
                                        expected += a.get(&[ap, sp, bp]).unwrap()
                                            * lgroup[i].get(&[ap, al]).unwrap()
                                            * op.get(&[sp, s]).unwrap()
                                            * a.get(&[al, s, b]).unwrap();
                                    }
                                }
                            }
                        }
                    }
                    assert_relative_eq!(*grown.get(&[bp, b]).unwrap(), expected, epsilon = 1e-10);
                }
            }
        }
    }

    #[test]
    fn grow_right_matches_explicit_sum() {
        let mut rng = StdRng::seed_from_u64(3);
        let mpo = spin_chain_mpo::<f64>(4, 1.0, 1.0, 0.5).unwrap();
        let w = &mpo[2];
        let rgroup: Vec<Tensor<f64>> = (0..5).map(|_| rand_op(3, &mut rng)).collect();
        let b = rand_ten(&[4, 2, 3], &mut rng);
        let tasks = grow_right_tasks(w, &rgroup).unwrap();
        assert_eq!(tasks.len(), 5);
        for task in tasks.into_iter() {
            let a = task.id;
            let grown = task.contract().unwrap().grow_right(&b).unwrap();
            for alp in 0..4 {
                for al in 0..4 {
                    let mut expected = 0.0;
                    for (k, op) in w.row(a) {
                        for bp in 0..3 {
                            for bt in 0..3 {
                                for sp in 0..2 {
                                    for s in 0..2 {
                                        expected += b.get(&[alp, sp, bp]).unwrap()
                                            * op.get(&[sp, s]).unwrap()
                                            * rgroup[k].get(&[bp, bt]).unwrap()
                                            * b.get(&[al, s, bt]).unwrap();
                                    }
                                }
                            }
                        }
                    }
                    assert_relative_eq!(*grown.get(&[alp, al]).unwrap(), expected, epsilon = 1e-10);
                }
            }
        }
    }

    #[test]
    fn empty_groups_contribute_zero() {
        let task: Task<f64> = Task { id: 3, block_site: Vec::new(), site_block: Vec::new() };
        let task = task.contract().unwrap();
        let state: Tensor<f64> = Tensor::from_fn(&[2, 2, 2, 3], |_| 1.0);
        assert_eq!(task.apply(&state).unwrap(), Tensor::zeros(&[2, 2, 2, 3]));
        let a: Tensor<f64> = Tensor::zeros(&[2, 2, 5]);
        assert_eq!(task.grow_left(&a).unwrap().shape(), &[5, 5]);
        assert_eq!(task.grow_right(&a).unwrap().shape(), &[2, 2]);
        assert_eq!(sum_results::<f64>(&[], &[2, 2]).unwrap(), Tensor::zeros(&[2, 2]));
    }

    #[test]
    fn mismatched_group_is_rejected() {
        let mpo = spin_chain_mpo::<f64>(4, 1.0, 1.0, 0.0).unwrap();
        let lgroup = vec![Tensor::identity(2); 3];
        let rgroup = vec![Tensor::identity(2); 5];
        assert!(matches!(
            bond_tasks(&lgroup, &mpo[1], &mpo[2], &rgroup),
            Err(GroupSize { side: Side::Left, expected: 5, got: 3 }),
        ));
    }
}
