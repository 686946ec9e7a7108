//! Rank-addressed message passing between a master and its workers.
//!
//! A "world" of `size` ranks is wired together with unbounded channels, one
//! inbox per rank. Every rank owns exactly one [`Comm`] and is driven by a
//! single thread; rank 0 is the master.
//!
//! Point-to-point messages are addressed by `(source rank, tag)`. A receive
//! blocks until a matching message arrives, buffering any non-matching ones
//! that arrive in the meantime, so messages from a single sender with the
//! same tag are always received in the order they were sent. Broadcasts are
//! point-to-point sends from the root under [`Tag::Broadcast`].
//!
//! There is no recovery from a failed rank: [`Comm::abort`] (or a worker
//! returning an error or panicking under [`launch`]) makes every other rank's
//! pending or next receive fail with [`CommError::Aborted`].

use std::{
    collections::VecDeque,
    fmt,
    panic::{ self, AssertUnwindSafe },
    thread,
};
use crossbeam::channel;
use thiserror::Error;
use tracing::error;

/// Rank of the master.
pub const MASTER: usize = 0;

#[derive(Debug, Error)]
pub enum CommError {
    /// Returned when a world is created with no worker ranks.
    #[error("communication error: a world needs at least 2 ranks, got {0}")]
    NoWorkers(usize),

    /// Returned when addressing a rank outside the world.
    #[error("communication error: rank {0} out of bounds")]
    InvalidRank(usize),

    /// Returned when a peer's inbox or every sender to this rank has been
    /// dropped.
    #[error("communication error: rank {0} disconnected")]
    Disconnected(usize),

    /// Returned when another rank has aborted the run.
    #[error("communication error: run aborted by rank {src}: {reason}")]
    Aborted { src: usize, reason: String },

    /// Returned when a rank receives something it didn't expect.
    #[error("protocol violation on rank {rank}: {detail}")]
    Protocol { rank: usize, detail: String },

    /// Returned when a rank's thread panicked.
    #[error("rank {0} panicked")]
    Panicked(usize),
}
use CommError::*;
pub type CommResult<T> = Result<T, CommError>;

/// Message tags.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Tag {
    /// Collective broadcast from the master.
    Broadcast,
    /// Handshakes.
    Control,
    /// Task assignment and termination.
    Dispatch,
    /// Result of the task with the given id.
    Task(usize),
    /// Point-to-point SVD job and its result.
    Svd,
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task(id) => write!(f, "Task({id})"),
            other => write!(f, "{other:?}"),
        }
    }
}

#[derive(Debug)]
enum Packet<M> {
    Data { src: usize, tag: Tag, msg: M },
    Abort { src: usize, reason: String },
    Sync,
}

/// Can be used to abort a run on behalf of a rank after its [`Comm`] has
/// been moved or dropped.
#[derive(Debug)]
pub struct AbortHandle<M> {
    rank: usize,
    outboxes: Vec<channel::Sender<Packet<M>>>,
}

impl<M> Clone for AbortHandle<M> {
    fn clone(&self) -> Self {
        Self { rank: self.rank, outboxes: self.outboxes.clone() }
    }
}

impl<M> AbortHandle<M> {
    /// Notify every other rank that the run is over.
    pub fn abort(&self, reason: &str) {
        self.outboxes.iter().enumerate()
            .filter(|(dest, _)| *dest != self.rank)
            .for_each(|(_, tx)| {
                tx.send(Packet::Abort { src: self.rank, reason: reason.to_string() })
                    .ok();
            });
    }
}

/// One rank's endpoint into a world.
#[derive(Debug)]
pub struct Comm<M> {
    rank: usize,
    outboxes: Vec<channel::Sender<Packet<M>>>,
    inbox: channel::Receiver<Packet<M>>,
    pending: VecDeque<(usize, Tag, M)>,
    syncs: usize,
    aborted: Option<(usize, String)>,
}

/// Create all endpoints of a world of `size` ranks, indexed by rank.
pub fn world<M>(size: usize) -> CommResult<Vec<Comm<M>>> {
    if size < 2 { return Err(NoWorkers(size)); }
    let (outboxes, inboxes): (Vec<_>, Vec<_>)
        = (0..size).map(|_| channel::unbounded()).unzip();
    let comms
        = inboxes.into_iter().enumerate()
        .map(|(rank, inbox)| {
            Comm {
                rank,
                outboxes: outboxes.clone(),
                inbox,
                pending: VecDeque::new(),
                syncs: 0,
                aborted: None,
            }
        })
        .collect();
    Ok(comms)
}

impl<M> Comm<M> {
    /// Return this endpoint's rank.
    pub fn rank(&self) -> usize { self.rank }

    /// Return the number of ranks in the world.
    pub fn size(&self) -> usize { self.outboxes.len() }

    /// Return `true` if this is the master's endpoint.
    pub fn is_master(&self) -> bool { self.rank == MASTER }

    /// Return a handle that can abort the run on behalf of this rank.
    pub fn abort_handle(&self) -> AbortHandle<M> {
        AbortHandle { rank: self.rank, outboxes: self.outboxes.clone() }
    }

    /// Build a protocol violation error for this rank.
    pub fn violation<S>(&self, detail: S) -> CommError
    where S: Into<String>
    {
        Protocol { rank: self.rank, detail: detail.into() }
    }

    fn check_aborted(&self) -> CommResult<()> {
        match &self.aborted {
            Some((src, reason)) => Err(Aborted { src: *src, reason: reason.clone() }),
            None => Ok(()),
        }
    }

    /// Send a message. Never blocks.
    pub fn send(&self, dest: usize, tag: Tag, msg: M) -> CommResult<()> {
        let tx = self.outboxes.get(dest).ok_or(InvalidRank(dest))?;
        tx.send(Packet::Data { src: self.rank, tag, msg })
            .map_err(|_| Disconnected(dest))
    }

    // pull the next packet off the channel, handling everything that isn't
    // data; returns `None` for packets that were absorbed
    fn pull(&mut self) -> CommResult<Option<(usize, Tag, M)>> {
        self.check_aborted()?;
        match self.inbox.recv() {
            Ok(Packet::Data { src, tag, msg }) => Ok(Some((src, tag, msg))),
            Ok(Packet::Abort { src, reason }) => {
                self.aborted = Some((src, reason.clone()));
                Err(Aborted { src, reason })
            },
            Ok(Packet::Sync) => { self.syncs += 1; Ok(None) },
            Err(_) => Err(Disconnected(self.rank)),
        }
    }

    fn recv_matching<F>(&mut self, mut pred: F) -> CommResult<(usize, Tag, M)>
    where F: FnMut(usize, Tag) -> bool
    {
        self.check_aborted()?;
        if let Some(k) = self.pending.iter().position(|(src, tag, _)| pred(*src, *tag)) {
            if let Some(item) = self.pending.remove(k) { return Ok(item); }
        }
        loop {
            if let Some((src, tag, msg)) = self.pull()? {
                if pred(src, tag) { return Ok((src, tag, msg)); }
                self.pending.push_back((src, tag, msg));
            }
        }
    }

    /// Block until a message from `src` with tag `tag` arrives.
    pub fn recv(&mut self, src: usize, tag: Tag) -> CommResult<M> {
        if src >= self.size() { return Err(InvalidRank(src)); }
        self.recv_matching(|s, t| s == src && t == tag)
            .map(|(_, _, msg)| msg)
    }

    /// Block until a task result from any rank arrives, returning the source
    /// rank, task id, and message.
    pub fn recv_any_task(&mut self) -> CommResult<(usize, usize, M)> {
        self.recv_matching(|_, t| matches!(t, Tag::Task(_)))
            .and_then(|(src, tag, msg)| {
                match tag {
                    Tag::Task(id) => Ok((src, id, msg)),
                    other => Err(self.violation(format!("expected a task tag, got {other}"))),
                }
            })
    }

    /// Block until a broadcast from the master arrives.
    pub fn recv_broadcast(&mut self) -> CommResult<M> { self.recv(MASTER, Tag::Broadcast) }

    /// Block until every rank has entered the barrier.
    pub fn barrier(&mut self) -> CommResult<()> {
        if self.is_master() {
            let expected = self.size() - 1;
            while self.syncs < expected {
                if let Some(item) = self.pull()? { self.pending.push_back(item); }
            }
            self.syncs -= expected;
            for dest in 1..self.size() {
                self.outboxes[dest].send(Packet::Sync).map_err(|_| Disconnected(dest))?;
            }
        } else {
            self.outboxes[MASTER].send(Packet::Sync).map_err(|_| Disconnected(MASTER))?;
            while self.syncs < 1 {
                if let Some(item) = self.pull()? { self.pending.push_back(item); }
            }
            self.syncs -= 1;
        }
        Ok(())
    }
}

impl<M> Comm<M>
where M: Clone
{
    /// Send a copy of `msg` to every other rank under [`Tag::Broadcast`].
    pub fn broadcast(&self, msg: &M) -> CommResult<()> {
        (0..self.size())
            .filter(|dest| *dest != self.rank)
            .try_for_each(|dest| self.send(dest, Tag::Broadcast, msg.clone()))
    }
}

/// Run a world of `size` ranks: `master` on the calling thread as rank 0, and
/// `worker` on one scoped thread per remaining rank.
///
/// If any rank fails (by returning an error or panicking), every other rank is
/// aborted. The master's own error takes precedence; otherwise the first
/// worker error (by rank) is returned.
pub fn launch<M, T, E, FM, FW>(size: usize, master: FM, worker: FW) -> Result<T, E>
where
    M: Send,
    E: From<CommError> + fmt::Display + Send,
    FM: FnOnce(Comm<M>) -> Result<T, E>,
    FW: Fn(Comm<M>) -> Result<(), E> + Sync,
{
    let mut comms = world::<M>(size)?.into_iter();
    let master_comm = comms.next().ok_or(NoWorkers(size))?;
    let master_abort = master_comm.abort_handle();
    thread::scope(|s| {
        let worker = &worker;
        let handles: Vec<_>
            = comms
            .map(|comm| {
                let rank = comm.rank();
                let abort = comm.abort_handle();
                s.spawn(move || {
                    match panic::catch_unwind(AssertUnwindSafe(|| worker(comm))) {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(err)) => {
                            error!(rank, "worker failed: {err}");
                            abort.abort(&err.to_string());
                            Err(err)
                        },
                        Err(_) => {
                            error!(rank, "worker panicked");
                            abort.abort("worker panicked");
                            Err(E::from(Panicked(rank)))
                        },
                    }
                })
            })
            .collect();

        let res
            = match panic::catch_unwind(AssertUnwindSafe(|| master(master_comm))) {
                Ok(res) => res,
                Err(_) => {
                    error!(rank = MASTER, "master panicked");
                    master_abort.abort("master panicked");
                    Err(E::from(Panicked(MASTER)))
                },
            };
        if let Err(err) = &res {
            master_abort.abort(&err.to_string());
        }
        let mut worker_err: Option<E> = None;
        for (k, handle) in handles.into_iter().enumerate() {
            let out = handle.join().unwrap_or_else(|_| Err(E::from(Panicked(k + 1))));
            if let Err(err) = out { worker_err.get_or_insert(err); }
        }
        match (res, worker_err) {
            (Err(err), _) => Err(err),
            (Ok(_), Some(err)) => Err(err),
            (Ok(val), None) => Ok(val),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_order_receive_is_buffered() {
        let mut comms = world::<u32>(3).unwrap();
        let mut c2 = comms.pop().unwrap();
        let c1 = comms.pop().unwrap();
        let c0 = comms.pop().unwrap();
        c0.send(2, Tag::Task(5), 50).unwrap();
        c1.send(2, Tag::Task(1), 10).unwrap();
        c0.send(2, Tag::Task(5), 51).unwrap();
        c0.send(2, Tag::Control, 7).unwrap();
        assert_eq!(c2.recv(0, Tag::Control).unwrap(), 7);
        assert_eq!(c2.recv(1, Tag::Task(1)).unwrap(), 10);
        assert_eq!(c2.recv_any_task().unwrap(), (0, 5, 50));
        assert_eq!(c2.recv(0, Tag::Task(5)).unwrap(), 51);
        assert!(matches!(c2.recv(3, Tag::Control), Err(InvalidRank(3))));
    }

    #[test]
    fn broadcast_and_barrier() {
        let res: Result<u32, CommError>
            = launch(4,
                |c: Comm<u32>| {
                    let mut c = c;
                    c.broadcast(&11)?;
                    let mut total = 0;
                    for w in 1..c.size() { total += c.recv(w, Tag::Control)?; }
                    c.barrier()?;
                    Ok(total)
                },
                |mut c: Comm<u32>| {
                    let x = c.recv_broadcast()?;
                    c.send(MASTER, Tag::Control, x + c.rank() as u32)?;
                    c.barrier()?;
                    Ok(())
                },
            );
        assert_eq!(res.unwrap(), 3 * 11 + 6);
    }

    #[test]
    fn worker_error_aborts_master() {
        let res: Result<(), CommError>
            = launch(3,
                |mut c: Comm<u32>| {
                    // would block forever without the abort
                    c.recv(2, Tag::Control)?;
                    Ok(())
                },
                |c: Comm<u32>| {
                    if c.rank() == 1 { return Err(c.violation("bad order")); }
                    let mut c = c;
                    c.recv_broadcast()?;
                    Ok(())
                },
            );
        assert!(matches!(res, Err(Aborted { src: 1, .. })));
    }

    #[test]
    fn world_needs_workers() {
        assert!(matches!(world::<u32>(1), Err(NoWorkers(1))));
        let res: Result<(), CommError> = launch(1, |_: Comm<u32>| Ok(()), |_| Ok(()));
        assert!(matches!(res, Err(NoWorkers(1))));
    }
}
