//! Memory segment descriptors.
//!
//! An [`Iovec`] is a driver-side registration of a [`SharedSegment`] against
//! a mount point. Rings never see the segment directly; they are handed
//! [`IovecSlice`]s cut from a descriptor.
//!
//! [`SharedSegment`]: super::shm::SharedSegment

use std::ops::{Bound, RangeBounds};
use std::path::{Path, PathBuf};

use crate::error::{UsrbioError, UsrbioResult};

/// A registered descriptor. Not `Clone`: it is released exactly once.
#[derive(Debug)]
pub struct Iovec {
    id: u64,
    len: usize,
    mount_point: PathBuf,
}

/// Bounded view of a descriptor, handed to `IoRing::prepare`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IovecSlice {
    pub iov_id: u64,
    pub offset: usize,
    pub len: usize,
}

impl Iovec {
    /// Called by drivers once the segment is registered under `id`.
    pub fn new(id: u64, len: usize, mount_point: &Path) -> Self {
        Self {
            id,
            len,
            mount_point: mount_point.to_path_buf(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    /// Cut a bounded view, e.g. `iov.slice(..now)`.
    pub fn slice<R: RangeBounds<usize>>(&self, range: R) -> UsrbioResult<IovecSlice> {
        let start = match range.start_bound() {
            Bound::Included(&s) => s,
            Bound::Excluded(&s) => s.saturating_add(1),
            Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            Bound::Included(&e) => e.saturating_add(1),
            Bound::Excluded(&e) => e,
            Bound::Unbounded => self.len,
        };

        if start > end || end > self.len {
            return Err(UsrbioError::SliceOutOfRange {
                start,
                end,
                len: self.len,
            });
        }

        Ok(IovecSlice {
            iov_id: self.id,
            offset: start,
            len: end - start,
        })
    }
}
