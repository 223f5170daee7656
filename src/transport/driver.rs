//! The driver seam.
//!
//! The ring client only talks to the transport through these traits: a
//! registration service for raw fds, a mount resolver, a ring factory and a
//! descriptor factory. [`LocalDriver`](super::local::LocalDriver) is the
//! in-process implementation shipped with the crate.

use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};

use super::iovec::{Iovec, IovecSlice};
use super::shm::SharedSegment;
use crate::error::UsrbioResult;

/// Driver report of a finished ring operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// Cookie of the submission this completes
    pub user_data: u64,
    /// Transferred byte count, or negative errno
    pub result: i64,
}

impl Completion {
    pub fn is_error(&self) -> bool {
        self.result < 0
    }

    /// Positive errno for failed completions
    pub fn errno(&self) -> Option<i32> {
        if self.result < 0 {
            Some(
                self.result
                    .checked_neg()
                    .and_then(|e| i32::try_from(e).ok())
                    .unwrap_or(libc::EIO),
            )
        } else {
            None
        }
    }
}

/// A submission/completion channel bound to one mount and one direction.
pub trait IoRing: Send {
    /// Direction this ring was created for
    fn is_read(&self) -> bool;

    /// Queue one operation over `slice` against `fd` at `file_offset`.
    fn prepare(
        &mut self,
        slice: IovecSlice,
        is_read: bool,
        fd: RawFd,
        file_offset: u64,
    ) -> UsrbioResult<()>;

    /// Hand every prepared operation to the driver; returns how many.
    fn submit_prepared(&mut self) -> UsrbioResult<usize>;

    /// Block until at least `min_results` completions are available and
    /// return them.
    fn wait_completions(&mut self, min_results: usize) -> UsrbioResult<Vec<Completion>>;

    /// Submit prepared operations, returning a handle to wait on.
    fn submit(&mut self) -> UsrbioResult<Submission<'_, Self>>
    where
        Self: Sized,
    {
        let submitted = self.submit_prepared()?;
        Ok(Submission {
            ring: self,
            submitted,
        })
    }
}

/// Operations handed to the driver and not yet waited on.
pub struct Submission<'r, R: IoRing> {
    ring: &'r mut R,
    submitted: usize,
}

impl<R: IoRing> Submission<'_, R> {
    pub fn submitted(&self) -> usize {
        self.submitted
    }

    pub fn wait(self, min_results: usize) -> UsrbioResult<Vec<Completion>> {
        self.ring.wait_completions(min_results)
    }
}

/// Registration service, mount resolver, ring factory and descriptor factory.
pub trait Driver: Send + Sync {
    type Ring: IoRing;

    /// Map a filesystem path to the mount the rings and descriptors bind to
    fn mount_point_of(&self, path: &Path) -> UsrbioResult<PathBuf>;

    fn register_fd(&self, fd: RawFd) -> UsrbioResult<()>;

    fn deregister_fd(&self, fd: RawFd) -> UsrbioResult<()>;

    fn make_ring(&self, mount_point: &Path, depth: u32, for_read: bool)
        -> UsrbioResult<Self::Ring>;

    fn release_ring(&self, ring: Self::Ring) -> UsrbioResult<()>;

    /// Register `segment` so ring operations can address it.
    ///
    /// The segment must outlive the returned descriptor.
    fn make_iovec(&self, segment: &SharedSegment, mount_point: &Path) -> UsrbioResult<Iovec>;

    fn release_iovec(&self, iovec: Iovec) -> UsrbioResult<()>;
}
