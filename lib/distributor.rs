//! Distribution of contraction tasks over worker ranks.
//!
//! The master hands out [`Task`]s through a pull queue: every worker starts
//! with at most one task, and each time it reports a result it is either
//! assigned the next unclaimed task or told to stop. If there are no more
//! tasks than workers this reduces to one task per worker by rank, with the
//! surplus workers stopped immediately.
//!
//! Results come back tagged by task id and are returned in task-id order,
//! regardless of which worker computed them or when, so that reductions over
//! them don't depend on the number of workers.

use tracing::debug;
use crate::{
    ComplexScalar,
    comm::{ Comm, CommError, CommResult, MASTER, Tag },
    protocol::{ Dispatch, Message, Task },
    tensor::Tensor,
};

// place a single result, checking that its id is in range and new
fn file_result<A>(
    comm: &Comm<Message<A>>,
    results: &mut [Option<Tensor<A>>],
    src: usize,
    tag_id: usize,
    msg: Message<A>,
) -> CommResult<()>
{
    let (id, result) = match msg {
        Message::TaskResult { id, result } => (id, result),
        other => {
            return Err(comm.violation(
                format!("expected a task result from rank {src}, got {}", other.kind())));
        },
    };
    if id != tag_id {
        return Err(comm.violation(
            format!("rank {src} sent result for task {id} under tag Task({tag_id})")));
    }
    let num_tasks = results.len();
    match results.get_mut(id) {
        None => Err(comm.violation(
            format!("rank {src} sent result for task {id}, but only {num_tasks} exist"))),
        Some(Some(_)) => Err(comm.violation(
            format!("rank {src} sent a second result for task {id}"))),
        Some(slot) => { *slot = Some(result); Ok(()) },
    }
}

fn unwrap_results<A>(comm: &Comm<Message<A>>, results: Vec<Option<Tensor<A>>>)
    -> CommResult<Vec<Tensor<A>>>
{
    results.into_iter().enumerate()
        .map(|(id, res)| {
            res.ok_or_else(|| comm.violation(format!("no result for task {id}")))
        })
        .collect()
}

/// Hand out `tasks` to every worker through the pull queue and collect one
/// result per task, returned in task-id order.
///
/// Task ids must be `0..tasks.len()`.
pub fn dispatch<A>(comm: &mut Comm<Message<A>>, tasks: Vec<Task<A>>)
    -> CommResult<Vec<Tensor<A>>>
where A: ComplexScalar
{
    let num_tasks = tasks.len();
    let num_workers = comm.size() - 1;
    let mut results: Vec<Option<Tensor<A>>> = vec![None; num_tasks];
    let mut served: Vec<usize> = vec![0; comm.size()];
    let mut queue = tasks.into_iter();
    let mut active: usize = 0;
    for w in 1..comm.size() {
        match queue.next() {
            Some(task) => {
                comm.send(w, Tag::Dispatch, Message::Dispatch(Dispatch::Assign(task)))?;
                active += 1;
            },
            None => {
                comm.send(w, Tag::Dispatch, Message::Dispatch(Dispatch::Stop))?;
            },
        }
    }
    while active > 0 {
        let (src, id, msg) = comm.recv_any_task()?;
        file_result(comm, &mut results, src, id, msg)?;
        served[src] += 1;
        match queue.next() {
            Some(task) => {
                comm.send(src, Tag::Dispatch, Message::Dispatch(Dispatch::Assign(task)))?;
            },
            None => {
                comm.send(src, Tag::Dispatch, Message::Dispatch(Dispatch::Stop))?;
                active -= 1;
            },
        }
    }
    debug!(num_tasks, num_workers, served = ?&served[1..], "dispatch complete");
    unwrap_results(comm, results)
}

/// Collect exactly one result for each of `num_tasks` tasks that workers
/// already hold, returned in task-id order.
pub fn collect<A>(comm: &mut Comm<Message<A>>, num_tasks: usize)
    -> CommResult<Vec<Tensor<A>>>
where A: ComplexScalar
{
    let mut results: Vec<Option<Tensor<A>>> = vec![None; num_tasks];
    for _ in 0..num_tasks {
        let (src, id, msg) = comm.recv_any_task()?;
        file_result(comm, &mut results, src, id, msg)?;
    }
    unwrap_results(comm, results)
}

/// Worker half of [`dispatch`]: compute every assigned task with `f` and
/// report the result to the master until told to stop.
///
/// Returns the number of tasks served.
pub fn serve<A, E, F>(comm: &mut Comm<Message<A>>, mut f: F) -> Result<usize, E>
where
    A: ComplexScalar,
    E: From<CommError>,
    F: FnMut(Task<A>) -> Result<Tensor<A>, E>,
{
    let mut served: usize = 0;
    loop {
        match comm.recv(MASTER, Tag::Dispatch)? {
            Message::Dispatch(Dispatch::Assign(task)) => {
                let id = task.id;
                let result = f(task)?;
                comm.send(MASTER, Tag::Task(id), Message::TaskResult { id, result })?;
                served += 1;
            },
            Message::Dispatch(Dispatch::Stop) => { break; },
            other => {
                return Err(comm.violation(
                    format!("expected a dispatch, got {}", other.kind())).into());
            },
        }
    }
    Ok(served)
}
