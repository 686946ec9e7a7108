//! Persistence of block operator groups and MPS site tensors.
//!
//! Operator groups are keyed by the side of the block they act on and the
//! number of sites in that block; MPS tensors are keyed by site index.
//! [`DiskStore`] writes them as NumPy archives so that only the groups needed
//! at the current bond have to be resident in memory; [`MemStore`] keeps
//! everything in a hash map.

use std::{
    fmt,
    fs,
    path::{ Path, PathBuf },
};
use ndarray as nd;
use ndarray_npy::{
    NpzReader,
    NpzWriter,
    ReadNpyError,
    ReadNpzError,
    WriteNpyError,
    WriteNpzError,
    read_npy,
    write_npy,
};
use rustc_hash::FxHashMap as HashMap;
use thiserror::Error;
use crate::{ ComplexScalar, tensor::Tensor };

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store error: no {0} found")]
    Missing(String),

    #[error("store error: I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: error writing npz archive: {0}")]
    WriteNpz(#[from] WriteNpzError),

    #[error("store error: error reading npz archive: {0}")]
    ReadNpz(#[from] ReadNpzError),

    #[error("store error: error writing npy file: {0}")]
    WriteNpy(#[from] WriteNpyError),

    #[error("store error: error reading npy file: {0}")]
    ReadNpy(#[from] ReadNpyError),
}
use StoreError::*;
pub type StoreResult<T> = Result<T, StoreError>;

/// Side of the chain a block operator group lives on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    /// Short file-name prefix.
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Left => "l",
            Self::Right => "r",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix())
    }
}

/// Load/save primitives for operator groups and MPS tensors.
pub trait BlockStore<A> {
    /// Save the operator group for a block of `block_len` sites on `side`,
    /// replacing any previous one.
    fn write_group(&mut self, side: Side, block_len: usize, group: &[Tensor<A>])
        -> StoreResult<()>;

    /// Load an operator group, leaving the stored copy in place.
    fn read_group(&mut self, side: Side, block_len: usize)
        -> StoreResult<Vec<Tensor<A>>>;

    /// Load an operator group and delete the stored copy.
    fn read_and_remove_group(&mut self, side: Side, block_len: usize)
        -> StoreResult<Vec<Tensor<A>>>;

    /// Save a single MPS tensor.
    fn dump_mps_ten(&mut self, site: usize, ten: Tensor<A>) -> StoreResult<()>;

    /// Load a single MPS tensor, leaving the stored copy in place.
    fn load_mps_ten(&mut self, site: usize) -> StoreResult<Tensor<A>>;
}

impl<A, S> BlockStore<A> for &mut S
where S: BlockStore<A> + ?Sized
{
    fn write_group(&mut self, side: Side, block_len: usize, group: &[Tensor<A>])
        -> StoreResult<()>
    {
        (**self).write_group(side, block_len, group)
    }

    fn read_group(&mut self, side: Side, block_len: usize)
        -> StoreResult<Vec<Tensor<A>>>
    {
        (**self).read_group(side, block_len)
    }

    fn read_and_remove_group(&mut self, side: Side, block_len: usize)
        -> StoreResult<Vec<Tensor<A>>>
    {
        (**self).read_and_remove_group(side, block_len)
    }

    fn dump_mps_ten(&mut self, site: usize, ten: Tensor<A>) -> StoreResult<()> {
        (**self).dump_mps_ten(site, ten)
    }

    fn load_mps_ten(&mut self, site: usize) -> StoreResult<Tensor<A>> {
        (**self).load_mps_ten(site)
    }
}

/// Stores everything in memory.
#[derive(Clone, Debug)]
pub struct MemStore<A> {
    groups: HashMap<(Side, usize), Vec<Tensor<A>>>,
    tens: HashMap<usize, Tensor<A>>,
}

impl<A> Default for MemStore<A> {
    fn default() -> Self {
        Self { groups: HashMap::default(), tens: HashMap::default() }
    }
}

impl<A> MemStore<A> {
    pub fn new() -> Self { Self::default() }

    /// Return `true` if an operator group is stored under the given key.
    pub fn has_group(&self, side: Side, block_len: usize) -> bool {
        self.groups.contains_key(&(side, block_len))
    }

    /// Return the number of stored operator groups.
    pub fn num_groups(&self) -> usize { self.groups.len() }
}

impl<A> BlockStore<A> for MemStore<A>
where A: ComplexScalar
{
    fn write_group(&mut self, side: Side, block_len: usize, group: &[Tensor<A>])
        -> StoreResult<()>
    {
        self.groups.insert((side, block_len), group.to_vec());
        Ok(())
    }

    fn read_group(&mut self, side: Side, block_len: usize)
        -> StoreResult<Vec<Tensor<A>>>
    {
        self.groups.get(&(side, block_len))
            .cloned()
            .ok_or_else(|| Missing(format!("operator group {side}{block_len}")))
    }

    fn read_and_remove_group(&mut self, side: Side, block_len: usize)
        -> StoreResult<Vec<Tensor<A>>>
    {
        self.groups.remove(&(side, block_len))
            .ok_or_else(|| Missing(format!("operator group {side}{block_len}")))
    }

    fn dump_mps_ten(&mut self, site: usize, ten: Tensor<A>) -> StoreResult<()> {
        self.tens.insert(site, ten);
        Ok(())
    }

    fn load_mps_ten(&mut self, site: usize) -> StoreResult<Tensor<A>> {
        self.tens.get(&site)
            .cloned()
            .ok_or_else(|| Missing(format!("MPS tensor {site}")))
    }
}

/// Stores operator groups under `temp_path` and MPS tensors under `mps_path`.
///
/// A group for a block of `n` sites on the left is written to
/// `<temp_path>/l<n>.npz`, with one array per operator slot; MPS tensor `k` is
/// written to `<mps_path>/mps_ten<k>.npy`.
#[derive(Clone, Debug)]
pub struct DiskStore {
    mps_path: PathBuf,
    temp_path: PathBuf,
}

impl DiskStore {
    /// Create a new store, creating both directories if they don't already
    /// exist.
    pub fn new<P, Q>(mps_path: P, temp_path: Q) -> StoreResult<Self>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        fs::create_dir_all(mps_path.as_ref())?;
        fs::create_dir_all(temp_path.as_ref())?;
        Ok(Self {
            mps_path: mps_path.as_ref().to_path_buf(),
            temp_path: temp_path.as_ref().to_path_buf(),
        })
    }

    fn group_file(&self, side: Side, block_len: usize) -> PathBuf {
        self.temp_path.join(format!("{side}{block_len}.npz"))
    }

    fn ten_file(&self, site: usize) -> PathBuf {
        self.mps_path.join(format!("mps_ten{site}.npy"))
    }
}

fn slot_name(k: usize) -> String { format!("op{k}") }

impl<A> BlockStore<A> for DiskStore
where A: ComplexScalar
{
    fn write_group(&mut self, side: Side, block_len: usize, group: &[Tensor<A>])
        -> StoreResult<()>
    {
        let file = fs::File::create(self.group_file(side, block_len))?;
        let mut npz = NpzWriter::new(file);
        for (k, op) in group.iter().enumerate() {
            npz.add_array(slot_name(k), op.as_array())?;
        }
        npz.finish()?;
        Ok(())
    }

    fn read_group(&mut self, side: Side, block_len: usize)
        -> StoreResult<Vec<Tensor<A>>>
    {
        let path = self.group_file(side, block_len);
        if !path.exists() {
            return Err(Missing(format!("operator group file {}", path.display())));
        }
        let mut npz = NpzReader::new(fs::File::open(&path)?)?;
        let len = npz.names()?.len();
        (0..len)
            .map(|k| -> StoreResult<Tensor<A>> {
                let arr: nd::ArrayD<A> = npz.by_name(&slot_name(k))?;
                Ok(Tensor::from(arr))
            })
            .collect()
    }

    fn read_and_remove_group(&mut self, side: Side, block_len: usize)
        -> StoreResult<Vec<Tensor<A>>>
    {
        let group = self.read_group(side, block_len)?;
        fs::remove_file(self.group_file(side, block_len))?;
        Ok(group)
    }

    fn dump_mps_ten(&mut self, site: usize, ten: Tensor<A>) -> StoreResult<()> {
        write_npy(self.ten_file(site), ten.as_array())?;
        Ok(())
    }

    fn load_mps_ten(&mut self, site: usize) -> StoreResult<Tensor<A>> {
        let path = self.ten_file(site);
        if !path.exists() {
            return Err(Missing(format!("MPS tensor file {}", path.display())));
        }
        let arr: nd::ArrayD<A> = read_npy(&path)?;
        Ok(Tensor::from(arr))
    }
}
