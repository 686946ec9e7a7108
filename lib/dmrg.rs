//! Finite-size two-site DMRG sweeps.
//!
//! [`DmrgExecutor`] runs the sweep state machine: after growing the initial
//! right environments, it alternates a right sweep over the bonds
//! `(0, 1), ..., (N - 3, N - 2)` with a left sweep over
//! `(N - 2, N - 1), ..., (1, 2)`. At each bond the two site tensors are
//! contracted into a two-site state, optimized with [`lanczos`], split back
//! with a truncated SVD, and the block operator group on the side that was
//! just finalized is grown by one site.
//!
//! All the numerical work that can be farmed out is done through a
//! [`SweepEngine`]: [`SerialEngine`] performs it in place, while
//! [`MasterEngine`] drives a pool of workers running
//! [`Worker::run`][crate::worker::Worker::run]. Both see exactly the same
//! tasks in exactly the same order and reduce results in task-id order, so
//! they produce bitwise identical sweeps.
//!
//! Only the operator groups and MPS tensors needed at the current bond are
//! kept in memory; everything else lives in a [`BlockStore`].

use std::{ path::PathBuf, time::Instant };
use itertools::Itertools;
use serde::{ Deserialize, Serialize };
use thiserror::Error;
use tracing::{ debug, info };
use crate::{
    ComplexScalar,
    comm::{ self, Comm, CommError, MASTER, Tag },
    config::ConfigError,
    distributor::{ collect, dispatch },
    effham::{
        ContractedTask,
        EffHamError,
        OpGroup,
        bond_tasks,
        grow_left_tasks,
        grow_right_tasks,
        sum_results,
    },
    lanczos::{ HamiltonianMultiply, LanczosError, LanczosParams, LanczosRes, lanczos },
    mpo::{ MatReprMpo, MpoError },
    mps::{ Canon, FiniteMps, MpsError },
    protocol::{ Message, Order, Task },
    store::{ BlockStore, Side, StoreError },
    tensor::{ SvdOutput, Tensor, TensorError, Truncation, entanglement_entropy },
    worker::{ SVD_RANK, Worker },
};

#[derive(Debug, Error)]
pub enum DmrgError {
    /// Returned when the MPO and MPS don't describe the same chain.
    #[error("error in DMRG setup: MPO has {0} sites but MPS has {1}")]
    SiteMismatch(usize, usize),

    /// Returned when the MPO and MPS disagree on a physical dimension.
    #[error("error in DMRG setup: physical dimension mismatch at site {0}")]
    PhysDimMismatch(usize),

    /// Returned when the chain is too short for two-site sweeps.
    #[error("error in DMRG setup: need at least 3 sites, got {0}")]
    TooFewSites(usize),

    /// Returned for sweep parameters that cannot be run.
    #[error("error in DMRG setup: invalid parameters: {0}")]
    InvalidParams(String),

    /// Returned when an operator group expected to be resident is missing.
    #[error("error in DMRG sweep: missing {side} operator group at site {site}")]
    MissingGroup { side: Side, site: usize },

    #[error("tensor error: {0}")]
    TensorError(#[from] TensorError),

    #[error("MPO error: {0}")]
    MpoError(#[from] MpoError),

    #[error("MPS error: {0}")]
    MpsError(#[from] MpsError),

    #[error("store error: {0}")]
    StoreError(#[from] StoreError),

    #[error("{0}")]
    CommError(#[from] CommError),

    #[error("{0}")]
    LanczosError(#[from] LanczosError),

    #[error("{0}")]
    EffHamError(#[from] EffHamError),

    #[error("{0}")]
    ConfigError(#[from] ConfigError),
}
use DmrgError::*;
pub type DmrgResult<T> = Result<T, DmrgError>;

fn default_sweeps() -> usize { 4 }
fn default_dmin() -> usize { 1 }
fn default_dmax() -> usize { 64 }
fn default_trunc_err() -> f64 { 1e-10 }
fn default_mps_path() -> PathBuf { PathBuf::from("mps") }
fn default_temp_path() -> PathBuf { PathBuf::from("temp") }

/// Parameters of a DMRG run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SweepParams {
    /// Number of full (right, then left) sweeps.
    #[serde(default = "default_sweeps")]
    pub sweeps: usize,
    /// Minimum number of singular values kept at each bond.
    #[serde(default = "default_dmin")]
    pub dmin: usize,
    /// Maximum number of singular values kept at each bond.
    #[serde(default = "default_dmax")]
    pub dmax: usize,
    /// Target truncation error at each bond.
    #[serde(default = "default_trunc_err")]
    pub trunc_err: f64,
    #[serde(default)]
    pub lanczos: LanczosParams,
    /// Directory holding MPS tensors for a disk-backed run.
    #[serde(default = "default_mps_path")]
    pub mps_path: PathBuf,
    /// Directory holding block operator groups for a disk-backed run.
    #[serde(default = "default_temp_path")]
    pub temp_path: PathBuf,
}

impl Default for SweepParams {
    fn default() -> Self {
        Self {
            sweeps: default_sweeps(),
            dmin: default_dmin(),
            dmax: default_dmax(),
            trunc_err: default_trunc_err(),
            lanczos: LanczosParams::default(),
            mps_path: default_mps_path(),
            temp_path: default_temp_path(),
        }
    }
}

impl SweepParams {
    /// Truncation settings applied at each bond.
    pub fn truncation(&self) -> Truncation {
        Truncation { trunc_err: self.trunc_err, dmin: self.dmin, dmax: self.dmax }
    }

    /// Check that the parameters describe a runnable sweep.
    pub fn check(&self) -> DmrgResult<()> {
        if self.sweeps == 0 {
            return Err(InvalidParams("sweeps must be non-zero".into()));
        }
        if self.dmax == 0 {
            return Err(InvalidParams("dmax must be non-zero".into()));
        }
        if self.dmin > self.dmax {
            return Err(InvalidParams(
                format!("dmin ({}) exceeds dmax ({})", self.dmin, self.dmax)));
        }
        if !(self.trunc_err >= 0.0) {
            return Err(InvalidParams(
                format!("trunc_err must be non-negative, got {}", self.trunc_err)));
        }
        if self.lanczos.max_iterations < 2 {
            return Err(InvalidParams(
                format!(
                    "Lanczos needs at least 2 iterations, got {}",
                    self.lanczos.max_iterations,
                )
            ));
        }
        Ok(())
    }
}

/// Output of a DMRG run.
#[derive(Clone, Debug)]
pub struct DmrgOutput<A> {
    /// Ground state energy found at the last bond of the last sweep.
    pub energy: f64,
    /// Energy at the end of each sweep.
    pub sweep_energies: Vec<f64>,
    /// The optimized state. Its tensors remain in the store, centered on
    /// site 1; use [`FiniteMps::load_all`] to bring them back.
    pub mps: FiniteMps<A>,
}

/// Performs the parts of a sweep that can be distributed.
///
/// All operator groups are produced in task-id order.
pub trait SweepEngine<A> {
    /// Called once before anything else.
    fn start(&mut self) -> DmrgResult<()> { Ok(()) }

    /// Grow an initial right environment across `site`, using the
    /// right-canonical tensor `b`.
    fn init_env(&mut self, site: usize, tasks: Vec<Task<A>>, b: &Tensor<A>)
        -> DmrgResult<OpGroup<A>>;

    /// Called once all initial environments have been grown.
    fn init_env_finish(&mut self) -> DmrgResult<()> { Ok(()) }

    /// Find the ground state of the effective Hamiltonian at the bond
    /// `(l_site, l_site + 1)`, given as a set of tasks.
    fn ground_state(
        &mut self,
        l_site: usize,
        tasks: Vec<Task<A>>,
        state: Tensor<A>,
        params: &LanczosParams,
    ) -> DmrgResult<LanczosRes<A>>;

    /// Perform a truncated SVD of a two-site state.
    fn svd(&mut self, state: &Tensor<A>, trunc: &Truncation)
        -> DmrgResult<SvdOutput<A>>;

    /// Grow the left block across a left-canonical tensor `a`.
    fn grow_left(&mut self, tasks: Vec<Task<A>>, a: &Tensor<A>)
        -> DmrgResult<OpGroup<A>>;

    /// Grow the right block across a right-canonical tensor `b`.
    fn grow_right(&mut self, tasks: Vec<Task<A>>, b: &Tensor<A>)
        -> DmrgResult<OpGroup<A>>;

    /// Called once after the last sweep.
    fn finish(&mut self) -> DmrgResult<()> { Ok(()) }
}

/// Single-process effective Hamiltonian over contracted tasks.
struct SerialHam<A> {
    tasks: Vec<ContractedTask<A>>,
}

impl<A> HamiltonianMultiply<A> for SerialHam<A>
where A: ComplexScalar
{
    type Error = DmrgError;

    fn multiply(&mut self, state: &Tensor<A>) -> DmrgResult<Tensor<A>> {
        let results: Vec<Tensor<A>>
            = self.tasks.iter()
            .map(|task| task.apply(state))
            .collect::<Result<_, _>>()?;
        Ok(sum_results(&results, state.shape())?)
    }
}

/// Does everything on the calling thread.
#[derive(Copy, Clone, Debug, Default)]
pub struct SerialEngine;

impl<A> SweepEngine<A> for SerialEngine
where A: ComplexScalar
{
    fn init_env(&mut self, _site: usize, tasks: Vec<Task<A>>, b: &Tensor<A>)
        -> DmrgResult<OpGroup<A>>
    {
        self.grow_right(tasks, b)
    }

    fn ground_state(
        &mut self,
        _l_site: usize,
        tasks: Vec<Task<A>>,
        state: Tensor<A>,
        params: &LanczosParams,
    ) -> DmrgResult<LanczosRes<A>>
    {
        let tasks: Vec<ContractedTask<A>>
            = tasks.into_iter()
            .map(|task| task.contract())
            .collect::<Result<_, _>>()?;
        let mut ham = SerialHam { tasks };
        lanczos(&mut ham, state, params)
    }

    fn svd(&mut self, state: &Tensor<A>, trunc: &Truncation)
        -> DmrgResult<SvdOutput<A>>
    {
        Ok(state.svd(2, Some(trunc))?)
    }

    fn grow_left(&mut self, tasks: Vec<Task<A>>, a: &Tensor<A>)
        -> DmrgResult<OpGroup<A>>
    {
        tasks.into_iter()
            .map(|task| -> DmrgResult<Tensor<A>> { Ok(task.contract()?.grow_left(a)?) })
            .collect()
    }

    fn grow_right(&mut self, tasks: Vec<Task<A>>, b: &Tensor<A>)
        -> DmrgResult<OpGroup<A>>
    {
        tasks.into_iter()
            .map(|task| -> DmrgResult<Tensor<A>> { Ok(task.contract()?.grow_right(b)?) })
            .collect()
    }
}

/// Effective Hamiltonian whose products are computed by the workers.
///
/// The first multiply of a solve hands out the tasks themselves; workers
/// keep the contracted tasks they were given, so later multiplies only need
/// to broadcast the new state.
struct DistributedHam<'c, A> {
    comm: &'c mut Comm<Message<A>>,
    tasks: Option<Vec<Task<A>>>,
    num_tasks: usize,
}

impl<'c, A> HamiltonianMultiply<A> for DistributedHam<'c, A>
where A: ComplexScalar
{
    type Error = DmrgError;

    fn multiply(&mut self, state: &Tensor<A>) -> DmrgResult<Tensor<A>> {
        let results = match self.tasks.take() {
            Some(tasks) => {
                let order = Order::MatVecDynamic {
                    num_tasks: self.num_tasks,
                    state: state.clone(),
                };
                self.comm.broadcast(&order.into())?;
                dispatch(self.comm, tasks)?
            },
            None => {
                let order = Order::MatVecStatic { state: state.clone() };
                self.comm.broadcast(&order.into())?;
                collect(self.comm, self.num_tasks)?
            },
        };
        Ok(sum_results(&results, state.shape())?)
    }
}

/// Drives a pool of workers from rank 0.
#[derive(Debug)]
pub struct MasterEngine<A> {
    comm: Comm<Message<A>>,
}

impl<A> MasterEngine<A>
where A: ComplexScalar
{
    pub fn new(comm: Comm<Message<A>>) -> Self { Self { comm } }

    fn order(&mut self, order: Order<A>) -> DmrgResult<()> {
        debug!(rank = MASTER, %order, "broadcast order");
        self.comm.broadcast(&order.into())?;
        Ok(())
    }
}

impl<A> SweepEngine<A> for MasterEngine<A>
where A: ComplexScalar
{
    fn start(&mut self) -> DmrgResult<()> {
        self.order(Order::ProgramStart)?;
        for w in 1..self.comm.size() {
            match self.comm.recv(w, Tag::Control)? {
                Message::Ready => { },
                other => {
                    return Err(self.comm.violation(
                        format!("expected Ready from rank {w}, got {}", other.kind())).into());
                },
            }
        }
        debug!(workers = self.comm.size() - 1, "all workers ready");
        Ok(())
    }

    fn init_env(&mut self, site: usize, tasks: Vec<Task<A>>, b: &Tensor<A>)
        -> DmrgResult<OpGroup<A>>
    {
        self.order(Order::InitGrowEnv { site, mps: b.clone() })?;
        Ok(dispatch(&mut self.comm, tasks)?)
    }

    fn init_env_finish(&mut self) -> DmrgResult<()> {
        self.order(Order::InitGrowEnvFinish)
    }

    fn ground_state(
        &mut self,
        l_site: usize,
        tasks: Vec<Task<A>>,
        state: Tensor<A>,
        params: &LanczosParams,
    ) -> DmrgResult<LanczosRes<A>>
    {
        self.order(Order::Lanczos { l_site })?;
        let num_tasks = tasks.len();
        let mut ham = DistributedHam { comm: &mut self.comm, tasks: Some(tasks), num_tasks };
        let res = lanczos(&mut ham, state, params)?;
        self.order(Order::LanczosFinish)?;
        Ok(res)
    }

    fn svd(&mut self, state: &Tensor<A>, trunc: &Truncation)
        -> DmrgResult<SvdOutput<A>>
    {
        self.order(Order::Svd)?;
        let job = Message::SvdJob { state: state.clone(), ldims: 2, trunc: *trunc };
        self.comm.send(SVD_RANK, Tag::Svd, job)?;
        match self.comm.recv(SVD_RANK, Tag::Svd)? {
            Message::SvdResult(out) => Ok(out),
            other => Err(self.comm.violation(
                format!("expected an SVD result, got {}", other.kind())).into()),
        }
    }

    fn grow_left(&mut self, tasks: Vec<Task<A>>, a: &Tensor<A>)
        -> DmrgResult<OpGroup<A>>
    {
        self.order(Order::GrowLeftEnv { mps: a.clone() })?;
        Ok(dispatch(&mut self.comm, tasks)?)
    }

    fn grow_right(&mut self, tasks: Vec<Task<A>>, b: &Tensor<A>)
        -> DmrgResult<OpGroup<A>>
    {
        self.order(Order::GrowRightEnv { mps: b.clone() })?;
        Ok(dispatch(&mut self.comm, tasks)?)
    }

    fn finish(&mut self) -> DmrgResult<()> {
        self.order(Order::ProgramFinal)?;
        self.comm.barrier()?;
        Ok(())
    }
}

fn normalize_spectrum(s: &mut [f64]) {
    let norm: f64 = s.iter().map(|sk| sk * sk).sum::<f64>().sqrt();
    if norm > 0.0 { s.iter_mut().for_each(|sk| { *sk /= norm; }); }
}

/// Check that an MPO and MPS can be swept together.
fn check_inputs<A>(mpo: &MatReprMpo<A>, mps: &FiniteMps<A>, params: &SweepParams)
    -> DmrgResult<()>
where A: ComplexScalar
{
    params.check()?;
    if mpo.len() != mps.len() { return Err(SiteMismatch(mpo.len(), mps.len())); }
    if mps.len() < 3 { return Err(TooFewSites(mps.len())); }
    for (k, d) in mpo.phys_dims().into_iter().enumerate() {
        if mps.get(k)?.shape()[1] != d { return Err(PhysDimMismatch(k)); }
    }
    Ok(())
}

/// The sweep state machine.
pub struct DmrgExecutor<'a, A, S, E> {
    mpo: &'a MatReprMpo<A>,
    mps: FiniteMps<A>,
    store: S,
    engine: E,
    params: &'a SweepParams,
    left: Option<OpGroup<A>>,
    right: Option<OpGroup<A>>,
    energy: f64,
}

impl<'a, A, S, E> DmrgExecutor<'a, A, S, E>
where
    A: ComplexScalar,
    S: BlockStore<A>,
    E: SweepEngine<A>,
{
    /// Set up a run.
    ///
    /// Every tensor of `mps` must be resident. Fails if the MPO and MPS don't
    /// match, if there are fewer than 3 sites, or if `params` can't be run.
    pub fn new(
        mpo: &'a MatReprMpo<A>,
        mps: FiniteMps<A>,
        store: S,
        engine: E,
        params: &'a SweepParams,
    ) -> DmrgResult<Self>
    {
        check_inputs(mpo, &mps, params)?;
        Ok(Self {
            mpo,
            mps,
            store,
            engine,
            params,
            left: None,
            right: None,
            energy: f64::NAN,
        })
    }

    /// Run every sweep.
    pub fn run(mut self) -> DmrgResult<DmrgOutput<A>> {
        self.engine.start()?;
        self.init()?;
        let mut sweep_energies: Vec<f64> = Vec::with_capacity(self.params.sweeps);
        for sweep in 0..self.params.sweeps {
            let t0 = Instant::now();
            self.right_sweep(sweep)?;
            self.left_sweep(sweep)?;
            info!(
                sweep,
                energy = self.energy,
                elapsed = ?t0.elapsed(),
                "sweep complete"
            );
            sweep_energies.push(self.energy);
        }
        self.mps.dump_ten(1, &mut self.store)?;
        self.engine.finish()?;
        Ok(DmrgOutput { energy: self.energy, sweep_energies, mps: self.mps })
    }

    // grow the right environments for every block of length 1..=N-2, and
    // leave only site 1 resident
    fn init(&mut self) -> DmrgResult<()> {
        let n = self.mps.len();
        self.mps.centralize(0)?;
        self.mps.normalize_site(0)?;
        let mut rgroup: OpGroup<A> = vec![Tensor::identity(1)];
        self.store.write_group(Side::Right, 0, &rgroup)?;
        for site in (2..n).rev() {
            let tasks = grow_right_tasks(&self.mpo[site], &rgroup)?;
            rgroup = self.engine.init_env(site, tasks, self.mps.get(site)?)?;
            self.store.write_group(Side::Right, n - site, &rgroup)?;
        }
        self.engine.init_env_finish()?;
        self.store.write_group(Side::Left, 0, &[Tensor::identity(1)])?;
        self.mps.dump_all(&mut self.store)?;
        self.mps.load_ten(1, &mut self.store)?;
        debug!(sites = n, "initial environments complete");
        Ok(())
    }

    fn right_sweep(&mut self, sweep: usize) -> DmrgResult<()> {
        let n = self.mps.len();
        self.right = None;
        for l in 0..n - 2 {
            self.right_step(sweep, l)?;
        }
        Ok(())
    }

    fn left_sweep(&mut self, sweep: usize) -> DmrgResult<()> {
        let n = self.mps.len();
        self.left = None;
        for l in (1..n - 1).rev() {
            self.left_step(sweep, l)?;
        }
        Ok(())
    }

    // contract the two site tensors, optimize, and split; returns the SVD of
    // the ground state with a normalized spectrum
    fn optimize(
        &mut self,
        sweep: usize,
        l: usize,
        lgroup: &[Tensor<A>],
        rgroup: &[Tensor<A>],
    ) -> DmrgResult<SvdOutput<A>>
    {
        let r = l + 1;
        let state = self.mps.get(l)?.contract(self.mps.get(r)?, &[2], &[0])?;
        let tasks = bond_tasks(lgroup, &self.mpo[l], &self.mpo[r], rgroup)?;
        let LanczosRes { gs_eng, gs_vec, iters }
            = self.engine.ground_state(l, tasks, state, &self.params.lanczos)?;
        let mut svd = self.engine.svd(&gs_vec, &self.params.truncation())?;
        let entropy = entanglement_entropy(&svd.s);
        normalize_spectrum(&mut svd.s);
        self.energy = gs_eng;
        info!(
            sweep,
            l,
            r,
            energy = gs_eng,
            trunc_err = svd.trunc_err,
            d = svd.d,
            iters,
            entropy,
            "bond optimized"
        );
        Ok(svd)
    }

    fn right_step(&mut self, sweep: usize, l: usize) -> DmrgResult<()> {
        let n = self.mps.len();
        let r = l + 1;
        if l == 0 {
            self.mps.load_ten(0, &mut self.store)?;
            self.left = Some(self.store.read_group(Side::Left, 0)?);
        } else {
            self.mps.load_ten(r, &mut self.store)?;
        }
        let lgroup = self.left.take().ok_or(MissingGroup { side: Side::Left, site: l })?;
        let rgroup = self.store.read_and_remove_group(Side::Right, n - 1 - r)?;

        let SvdOutput { u, s, mut v, .. } = self.optimize(sweep, l, &lgroup, &rgroup)?;
        v.scale_axis(0, &s)?;
        let tasks = grow_left_tasks(&lgroup, &self.mpo[l])?;
        let new_left = self.engine.grow_left(tasks, &u)?;
        self.mps.set(l, u)?;
        self.mps.set(r, v)?;
        self.mps.set_canon(l, Canon::Left)?;
        self.mps.set_center(Some(r));

        self.mps.dump_ten(l, &mut self.store)?;
        self.store.write_group(Side::Left, r, &new_left)?;
        self.left = Some(new_left);
        Ok(())
    }

    fn left_step(&mut self, sweep: usize, l: usize) -> DmrgResult<()> {
        let n = self.mps.len();
        let r = l + 1;
        if r == n - 1 {
            self.mps.load_ten(r, &mut self.store)?;
            self.right = Some(self.store.read_group(Side::Right, 0)?);
        } else {
            self.mps.load_ten(l, &mut self.store)?;
        }
        let lgroup = self.store.read_and_remove_group(Side::Left, l)?;
        let rgroup = self.right.take().ok_or(MissingGroup { side: Side::Right, site: r })?;

        let SvdOutput { mut u, s, v, .. } = self.optimize(sweep, l, &lgroup, &rgroup)?;
        u.scale_axis(2, &s)?;
        let tasks = grow_right_tasks(&self.mpo[r], &rgroup)?;
        let new_right = self.engine.grow_right(tasks, &v)?;
        self.mps.set(l, u)?;
        self.mps.set(r, v)?;
        self.mps.set_canon(r, Canon::Right)?;
        self.mps.set_center(Some(l));

        self.mps.dump_ten(r, &mut self.store)?;
        self.store.write_group(Side::Right, n - 1 - l, &new_right)?;
        self.right = Some(new_right);
        Ok(())
    }
}

/// Run DMRG on the calling thread.
pub fn run_serial<A, S>(
    mpo: &MatReprMpo<A>,
    mps: FiniteMps<A>,
    params: &SweepParams,
    store: S,
) -> DmrgResult<DmrgOutput<A>>
where
    A: ComplexScalar,
    S: BlockStore<A>,
{
    info!(sites = mps.len(), sweeps = params.sweeps, "begin serial DMRG");
    DmrgExecutor::new(mpo, mps, store, SerialEngine, params)?.run()
}

/// Run DMRG with the given number of worker ranks.
///
/// The master runs on the calling thread; every worker runs on its own
/// thread. Any error on any rank ends the run.
pub fn run_distributed<A, S>(
    mpo: &MatReprMpo<A>,
    mps: FiniteMps<A>,
    params: &SweepParams,
    store: S,
    workers: usize,
) -> DmrgResult<DmrgOutput<A>>
where
    A: ComplexScalar,
    S: BlockStore<A>,
{
    check_inputs(mpo, &mps, params)?;
    info!(
        sites = mps.len(),
        sweeps = params.sweeps,
        workers,
        bonds = %mps.bond_dims().into_iter().flatten().join(" "),
        "begin distributed DMRG"
    );
    comm::launch(
        workers + 1,
        move |comm: Comm<Message<A>>| {
            let engine = MasterEngine::new(comm);
            DmrgExecutor::new(mpo, mps, store, engine, params)?.run()
        },
        |comm: Comm<Message<A>>| Worker::new(comm).run(),
    )
}
