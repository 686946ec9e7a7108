//! Messages exchanged between the master and its workers.
//!
//! The master drives every worker through a sequence of [`Order`]s sent as
//! broadcasts; each order carries exactly the data the workers need to enter
//! the corresponding phase. Within a phase, work is handed out as
//! [`Dispatch`] messages and results come back as [`Message::TaskResult`]s
//! tagged with their task id.
//!
//! The order sequence is:
//!
//! ```text
//! ProgramStart
//! (InitGrowEnv)* InitGrowEnvFinish
//! (
//!     Lanczos MatVecDynamic (MatVecStatic)* LanczosFinish
//!     Svd
//!     GrowLeftEnv | GrowRightEnv
//! )*
//! ProgramFinal
//! ```

use std::fmt;
use crate::tensor::{ SvdOutput, Tensor, Truncation };

/// A list of operator pairs whose outer products are summed.
pub type TermGroup<A> = Vec<(Tensor<A>, Tensor<A>)>;

/// A single unit of work: the operators attached to one MPO bond index
/// between a block and a site.
///
/// `block_site` holds pairs (block operator, site operator) on the left of
/// the bond, `site_block` holds pairs (site operator, block operator) on the
/// right. Either group may be empty.
#[derive(Clone, Debug)]
pub struct Task<A> {
    pub id: usize,
    pub block_site: TermGroup<A>,
    pub site_block: TermGroup<A>,
}

/// Broadcast orders selecting the phase every worker enters next.
#[allow(clippy::large_enum_variant)]
#[derive(Clone, Debug)]
pub enum Order<A> {
    /// Begin the run; every worker answers with [`Message::Ready`].
    ProgramStart,
    /// Grow the initial right environment across `site` using the given
    /// (right-canonical) MPS tensor.
    InitGrowEnv { site: usize, mps: Tensor<A> },
    /// Initial environments are complete.
    InitGrowEnvFinish,
    /// Begin a Lanczos solve at the bond `(l_site, l_site + 1)`.
    Lanczos { l_site: usize },
    /// First multiply of a solve: term groups are dispatched and cached.
    MatVecDynamic { num_tasks: usize, state: Tensor<A> },
    /// Subsequent multiply: cached term groups are applied to a new state.
    MatVecStatic { state: Tensor<A> },
    /// The current solve is over; caches are dropped.
    LanczosFinish,
    /// Rank 1 performs a truncated SVD on request.
    Svd,
    /// Grow the left environment with the given left-canonical MPS tensor.
    GrowLeftEnv { mps: Tensor<A> },
    /// Grow the right environment with the given right-canonical MPS tensor.
    GrowRightEnv { mps: Tensor<A> },
    /// End the run.
    ProgramFinal,
}

impl<A> Order<A> {
    /// Short name of the order, for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ProgramStart => "ProgramStart",
            Self::InitGrowEnv { .. } => "InitGrowEnv",
            Self::InitGrowEnvFinish => "InitGrowEnvFinish",
            Self::Lanczos { .. } => "Lanczos",
            Self::MatVecDynamic { .. } => "MatVecDynamic",
            Self::MatVecStatic { .. } => "MatVecStatic",
            Self::LanczosFinish => "LanczosFinish",
            Self::Svd => "Svd",
            Self::GrowLeftEnv { .. } => "GrowLeftEnv",
            Self::GrowRightEnv { .. } => "GrowRightEnv",
            Self::ProgramFinal => "ProgramFinal",
        }
    }
}

impl<A> fmt::Display for Order<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitGrowEnv { site, .. } => write!(f, "InitGrowEnv(site = {site})"),
            Self::Lanczos { l_site } => write!(f, "Lanczos(l_site = {l_site})"),
            Self::MatVecDynamic { num_tasks, .. }
                => write!(f, "MatVecDynamic(num_tasks = {num_tasks})"),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// Pull-queue messages from the master to a single worker.
#[allow(clippy::large_enum_variant)]
#[derive(Clone, Debug)]
pub enum Dispatch<A> {
    /// Work on this task, then report back for more.
    Assign(Task<A>),
    /// No tasks are left for this worker in the current phase.
    Stop,
}

/// Everything that travels over a [`Comm`][crate::comm::Comm].
#[allow(clippy::large_enum_variant)]
#[derive(Clone, Debug)]
pub enum Message<A> {
    Order(Order<A>),
    Ready,
    Dispatch(Dispatch<A>),
    TaskResult { id: usize, result: Tensor<A> },
    SvdJob { state: Tensor<A>, ldims: usize, trunc: Truncation },
    SvdResult(SvdOutput<A>),
}

impl<A> Message<A> {
    /// Short description of the message kind, for diagnostics.
    pub fn kind(&self) -> String {
        match self {
            Self::Order(order) => format!("order {order}"),
            Self::Ready => "Ready".to_string(),
            Self::Dispatch(Dispatch::Assign(task)) => format!("Assign(task {})", task.id),
            Self::Dispatch(Dispatch::Stop) => "Stop".to_string(),
            Self::TaskResult { id, .. } => format!("TaskResult(task {id})"),
            Self::SvdJob { .. } => "SvdJob".to_string(),
            Self::SvdResult(_) => "SvdResult".to_string(),
        }
    }
}

impl<A> From<Order<A>> for Message<A> {
    fn from(order: Order<A>) -> Self { Self::Order(order) }
}
