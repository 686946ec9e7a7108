//! The loop run by every worker rank.
//!
//! A worker does nothing but wait for the next broadcast [`Order`] and
//! execute the matching phase, until it sees [`Order::ProgramFinal`]. During a
//! Lanczos solve it keeps the tasks it contracted on the first multiply and
//! reapplies them to every later state of the same solve.

use tracing::debug;
use crate::{
    ComplexScalar,
    comm::{ Comm, MASTER, Tag },
    dmrg::DmrgResult,
    distributor::serve,
    effham::ContractedTask,
    protocol::{ Message, Order },
    tensor::Tensor,
};

/// Rank that performs the truncated SVDs.
pub const SVD_RANK: usize = 1;

/// A worker rank.
#[derive(Debug)]
pub struct Worker<A> {
    comm: Comm<Message<A>>,
    cache: Vec<ContractedTask<A>>,
}

impl<A> Worker<A>
where A: ComplexScalar
{
    pub fn new(comm: Comm<Message<A>>) -> Self { Self { comm, cache: Vec::new() } }

    fn next_order(&mut self) -> DmrgResult<Order<A>> {
        match self.comm.recv_broadcast()? {
            Message::Order(order) => {
                debug!(rank = self.comm.rank(), %order, "received order");
                Ok(order)
            },
            other => Err(self.comm.violation(
                format!("expected an order, got {}", other.kind())).into()),
        }
    }

    /// Serve orders until the run ends.
    pub fn run(mut self) -> DmrgResult<()> {
        loop {
            match self.next_order()? {
                Order::ProgramStart => {
                    self.comm.send(MASTER, Tag::Control, Message::Ready)?;
                },
                Order::InitGrowEnv { mps, .. } | Order::GrowRightEnv { mps } => {
                    serve(&mut self.comm, |task| -> DmrgResult<Tensor<A>> {
                        Ok(task.contract()?.grow_right(&mps)?)
                    })?;
                },
                Order::InitGrowEnvFinish => { },
                Order::GrowLeftEnv { mps } => {
                    serve(&mut self.comm, |task| -> DmrgResult<Tensor<A>> {
                        Ok(task.contract()?.grow_left(&mps)?)
                    })?;
                },
                Order::Lanczos { .. } => { self.lanczos()?; },
                Order::Svd => {
                    if self.comm.rank() == SVD_RANK { self.svd()?; }
                },
                Order::ProgramFinal => {
                    self.comm.barrier()?;
                    break;
                },
                other @ (
                    Order::MatVecDynamic { .. }
                    | Order::MatVecStatic { .. }
                    | Order::LanczosFinish
                ) => {
                    return Err(self.comm.violation(
                        format!("order {other} outside of a Lanczos solve")).into());
                },
            }
        }
        Ok(())
    }

    // handle multiplies until the solve is over
    fn lanczos(&mut self) -> DmrgResult<()> {
        self.cache.clear();
        loop {
            match self.next_order()? {
                Order::MatVecDynamic { state, .. } => {
                    self.cache.clear();
                    let cache = &mut self.cache;
                    serve(&mut self.comm, |task| -> DmrgResult<Tensor<A>> {
                        let task = task.contract()?;
                        let result = task.apply(&state)?;
                        cache.push(task);
                        Ok(result)
                    })?;
                },
                Order::MatVecStatic { state } => {
                    for task in self.cache.iter() {
                        let result = task.apply(&state)?;
                        let id = task.id;
                        let msg = Message::TaskResult { id, result };
                        self.comm.send(MASTER, Tag::Task(id), msg)?;
                    }
                },
                Order::LanczosFinish => { break; },
                other => {
                    return Err(self.comm.violation(
                        format!("order {other} inside a Lanczos solve")).into());
                },
            }
        }
        self.cache.clear();
        Ok(())
    }

    fn svd(&mut self) -> DmrgResult<()> {
        match self.comm.recv(MASTER, Tag::Svd)? {
            Message::SvdJob { state, ldims, trunc } => {
                let out = state.svd(ldims, Some(&trunc))?;
                self.comm.send(MASTER, Tag::Svd, Message::SvdResult(out))?;
                Ok(())
            },
            other => Err(self.comm.violation(
                format!("expected an SVD job, got {}", other.kind())).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        comm::{ CommError, launch },
        distributor::{ collect, dispatch },
        dmrg::DmrgError,
        protocol::Task,
    };

    fn one_by_one(x: f64) -> Tensor<f64> {
        Tensor::from_elems(&[1, 1], vec![x]).unwrap()
    }

    fn scalar_task(id: usize, x: f64) -> Task<f64> {
        Task {
            id,
            block_site: vec![(Tensor::identity(1), one_by_one(x))],
            site_block: vec![(one_by_one(1.0), Tensor::identity(1))],
        }
    }

    #[test]
    fn cached_tasks_are_reapplied() {
        // every dimension is 1, so task k just scales the state by k + 1
        let res: DmrgResult<Vec<f64>>
            = launch(3,
                |mut comm: Comm<Message<f64>>| {
                    comm.broadcast(&Order::ProgramStart.into())?;
                    for w in 1..3 { comm.recv(w, Tag::Control)?; }
                    comm.broadcast(&Order::Lanczos { l_site: 0 }.into())?;
                    let state = Tensor::from_elems(&[1, 1, 1, 1], vec![2.0])?;
                    let order = Order::MatVecDynamic { num_tasks: 3, state };
                    comm.broadcast(&order.into())?;
                    let tasks: Vec<Task<f64>>
                        = (0..3).map(|k| scalar_task(k, (k + 1) as f64)).collect();
                    let first = dispatch(&mut comm, tasks)?;
                    let state = Tensor::from_elems(&[1, 1, 1, 1], vec![10.0])?;
                    comm.broadcast(&Order::MatVecStatic { state }.into())?;
                    let second = collect(&mut comm, 3)?;
                    comm.broadcast(&Order::LanczosFinish.into())?;
                    comm.broadcast(&Order::ProgramFinal.into())?;
                    comm.barrier()?;
                    Ok(first.iter().chain(second.iter())
                        .flat_map(|t| t.iter().copied().collect::<Vec<f64>>())
                        .collect())
                },
                |comm| Worker::new(comm).run(),
            );
        assert_eq!(res.unwrap(), vec![2.0, 4.0, 6.0, 10.0, 20.0, 30.0]);
    }

    #[test]
    fn multiply_outside_solve_is_a_violation() {
        let res: DmrgResult<()>
            = launch(2,
                |mut comm: Comm<Message<f64>>| {
                    comm.broadcast(&Order::LanczosFinish.into())?;
                    // blocks until the worker aborts the run
                    comm.recv(1, Tag::Control)?;
                    Ok(())
                },
                |comm| Worker::new(comm).run(),
            );
        assert!(matches!(
            res,
            Err(DmrgError::CommError(CommError::Aborted { src: 1, .. })),
        ));
    }
}
