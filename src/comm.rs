//! Collective communication between the processes of a coupled run.
//!
//! The participant only needs a broadcast from the owner root.  `SerialComm`
//! is the one-process world; `ThreadComm` runs several ranks as threads of
//! one process, which is enough to exercise every collective code path.

use crate::types::{CouplingError, Result};
use std::sync::{Arc, Barrier, Mutex};

/// World rank that every broadcast originates from.  Always an owner.
pub const ROOT: usize = 0;

pub trait Communicator {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Overwrite `buf` on every rank with the contents held by `root`.
    fn broadcast(&self, buf: &mut [f64], root: usize) -> Result<()>;

    fn broadcast_scalar(&self, value: &mut f64, root: usize) -> Result<()> {
        self.broadcast(std::slice::from_mut(value), root)
    }
}

// ─────────────────────────────────────────────────────────────
//  Process role
// ─────────────────────────────────────────────────────────────

/// Whether this process holds the in-memory structural model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    Owner,
    NonOwner,
}

impl ProcessRole {
    /// The first `owner_procs` world ranks form the structural sub-communicator.
    pub fn assign(world_rank: usize, owner_procs: usize) -> Self {
        if world_rank < owner_procs.max(1) {
            Self::Owner
        } else {
            Self::NonOwner
        }
    }

    pub fn is_owner(self) -> bool {
        matches!(self, Self::Owner)
    }
}

// ─────────────────────────────────────────────────────────────
//  Serial world
// ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct SerialComm;

impl Communicator for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn broadcast(&self, _buf: &mut [f64], root: usize) -> Result<()> {
        if root != 0 {
            return Err(CouplingError::Comm(format!(
                "root {root} out of range for a serial world"
            )));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────
//  Threaded world
// ─────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Shared {
    size: usize,
    barrier: Barrier,
    buffer: Mutex<Vec<f64>>,
}

/// One rank of an in-process world; move each handle into its own thread.
#[derive(Debug, Clone)]
pub struct ThreadComm {
    rank: usize,
    shared: Arc<Shared>,
}

impl ThreadComm {
    /// Create handles for ranks `0..size`.
    pub fn world(size: usize) -> Vec<ThreadComm> {
        let shared = Arc::new(Shared {
            size,
            barrier: Barrier::new(size),
            buffer: Mutex::new(Vec::new()),
        });
        (0..size)
            .map(|rank| ThreadComm {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    fn publish(&self, buf: &[f64]) -> Result<()> {
        let mut shared = self
            .shared
            .buffer
            .lock()
            .map_err(|_| CouplingError::Comm("broadcast buffer poisoned".into()))?;
        shared.clear();
        shared.extend_from_slice(buf);
        Ok(())
    }

    fn receive(&self, buf: &mut [f64]) -> Result<()> {
        let shared = self
            .shared
            .buffer
            .lock()
            .map_err(|_| CouplingError::Comm("broadcast buffer poisoned".into()))?;
        if shared.len() != buf.len() {
            return Err(CouplingError::Comm(format!(
                "rank {} expected {} values, root sent {}",
                self.rank,
                buf.len(),
                shared.len()
            )));
        }
        buf.copy_from_slice(&shared);
        Ok(())
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn broadcast(&self, buf: &mut [f64], root: usize) -> Result<()> {
        if root >= self.shared.size {
            return Err(CouplingError::Comm(format!(
                "root {root} out of range for world of size {}",
                self.shared.size
            )));
        }
        // Both barriers are always reached so a local error cannot deadlock peers.
        let sent = if self.rank == root { self.publish(buf) } else { Ok(()) };
        self.shared.barrier.wait();
        let received = if self.rank == root { Ok(()) } else { self.receive(buf) };
        self.shared.barrier.wait();
        sent.and(received)
    }
}
