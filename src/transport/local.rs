//! In-process driver.
//!
//! `LocalDriver` implements the driver seam without a kernel or FUSE
//! component: rings live in shared memory regions, and `submit` drains the
//! submission queue on the calling thread, performing positional
//! `pread`/`pwrite` between the registered fd and the registered segment,
//! then posts one completion per entry.
//!
//! Completion results follow the usual convention: transferred byte count on
//! success, negative errno on failure. Requests the driver itself rejects map
//! to:
//! - unregistered fd: `-EBADF`
//! - unknown or released iovec: `-EFAULT`
//! - iovec registered on another mount: `-EXDEV`
//! - slice outside the iovec, or an op against the ring's direction: `-EINVAL`

use std::collections::{HashMap, HashSet};
use std::io;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, trace};

use super::driver::{Completion, Driver, IoRing};
use super::iovec::{Iovec, IovecSlice};
use super::protocol::{CompletionEntry, OpKind, SubmissionEntry};
use super::ring::RingRegion;
use super::shm::SharedSegment;
use crate::config::ClientConfig;
use crate::constants::MAX_RING_DEPTH;
use crate::error::{UsrbioError, UsrbioResult};
use crate::mount::MountTable;

/// Registered segment as the driver sees it
struct IovecRecord {
    base: SegmentPtr,
    len: usize,
    mount_point: PathBuf,
}

struct SegmentPtr(NonNull<u8>);

// SAFETY: the pointer is only dereferenced while executing a submission, and
// the registering client keeps the segment alive until the iovec is released.
unsafe impl Send for SegmentPtr {}

// SAFETY: shared access only reads the address; concurrent use of the bytes
// behind it is ruled out by each client keeping one outstanding op per ring.
unsafe impl Sync for SegmentPtr {}

#[derive(Default)]
struct DriverState {
    registered_fds: Mutex<HashSet<RawFd>>,
    iovecs: RwLock<HashMap<u64, IovecRecord>>,
    next_iov_id: AtomicU64,
}

// A panic while holding any of these locks leaves the maps consistent
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl DriverState {
    fn is_registered(&self, fd: RawFd) -> bool {
        lock(&self.registered_fds).contains(&fd)
    }

    /// Execute one submission and return its completion result.
    fn execute(&self, entry: &SubmissionEntry, ring_mount: &Path, ring_is_read: bool) -> i64 {
        let op = entry.op_kind();
        let is_read = match op {
            OpKind::Read => true,
            OpKind::Write => false,
            OpKind::Nop => return -(libc::EINVAL as i64),
        };
        if is_read != ring_is_read {
            return -(libc::EINVAL as i64);
        }

        if !self.is_registered(entry.fd) {
            return -(libc::EBADF as i64);
        }

        let iovecs = read_lock(&self.iovecs);
        let record = match iovecs.get(&entry.iov_id) {
            Some(r) => r,
            None => return -(libc::EFAULT as i64),
        };
        if record.mount_point != ring_mount {
            return -(libc::EXDEV as i64);
        }

        let (iov_offset, len) = match (
            usize::try_from(entry.iov_offset),
            usize::try_from(entry.len),
        ) {
            (Ok(o), Ok(l)) => (o, l),
            _ => return -(libc::EINVAL as i64),
        };
        match iov_offset.checked_add(len) {
            Some(end) if end <= record.len => {}
            _ => return -(libc::EINVAL as i64),
        }
        let file_offset = match libc::off_t::try_from(entry.file_offset) {
            Ok(o) => o,
            Err(_) => return -(libc::EINVAL as i64),
        };

        // SAFETY: bounds checked against the registered length above, and the
        // record cannot be released while the read lock is held.
        let buf = unsafe { record.base.0.as_ptr().add(iov_offset) };
        let ret = unsafe {
            if is_read {
                libc::pread(entry.fd, buf as *mut libc::c_void, len, file_offset)
            } else {
                libc::pwrite(entry.fd, buf as *const libc::c_void, len, file_offset)
            }
        };

        if ret < 0 {
            let errno = io::Error::last_os_error()
                .raw_os_error()
                .unwrap_or(libc::EIO);
            -(errno as i64)
        } else {
            ret as i64
        }
    }
}

/// Driver that completes ring operations in-process.
///
/// Cheap to clone; clones share registrations.
#[derive(Clone, Default)]
pub struct LocalDriver {
    state: Arc<DriverState>,
    /// Restricts mount resolution to these filesystem types (empty = any)
    mount_fs_types: Vec<String>,
}

impl LocalDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only resolve mounts of the given filesystem types, e.g. `fuse.hf3fs`.
    pub fn with_mount_fs_types(mut self, fs_types: Vec<String>) -> Self {
        self.mount_fs_types = fs_types;
        self
    }

    /// Driver honoring the mount filter of `config`
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new().with_mount_fs_types(config.mount_fs_types.clone())
    }

    /// Number of fds currently registered
    pub fn registered_fd_count(&self) -> usize {
        lock(&self.state.registered_fds).len()
    }

    /// Number of iovecs currently registered
    pub fn registered_iovec_count(&self) -> usize {
        read_lock(&self.state.iovecs).len()
    }
}

impl Driver for LocalDriver {
    type Ring = LocalRing;

    fn mount_point_of(&self, path: &Path) -> UsrbioResult<PathBuf> {
        MountTable::load()?.resolve(path, &self.mount_fs_types)
    }

    fn register_fd(&self, fd: RawFd) -> UsrbioResult<()> {
        if fd < 0 {
            return Err(UsrbioError::Registration(format!("invalid fd {}", fd)));
        }
        if !lock(&self.state.registered_fds).insert(fd) {
            return Err(UsrbioError::Registration(format!(
                "fd {} already registered",
                fd
            )));
        }
        debug!("registered fd {}", fd);
        Ok(())
    }

    fn deregister_fd(&self, fd: RawFd) -> UsrbioResult<()> {
        if !lock(&self.state.registered_fds).remove(&fd) {
            return Err(UsrbioError::Registration(format!(
                "fd {} is not registered",
                fd
            )));
        }
        debug!("deregistered fd {}", fd);
        Ok(())
    }

    fn make_ring(
        &self,
        mount_point: &Path,
        depth: u32,
        for_read: bool,
    ) -> UsrbioResult<LocalRing> {
        if depth > MAX_RING_DEPTH {
            return Err(UsrbioError::Registration(format!(
                "ring depth {} exceeds {}",
                depth, MAX_RING_DEPTH
            )));
        }
        let region = RingRegion::create(depth, for_read)?;
        debug!(
            "created {} ring {} (depth {}) on {}",
            if for_read { "read" } else { "write" },
            region.name(),
            depth,
            mount_point.display()
        );
        Ok(LocalRing {
            state: Arc::clone(&self.state),
            region,
            mount_point: mount_point.to_path_buf(),
            for_read,
            next_user_data: 1,
        })
    }

    fn release_ring(&self, ring: LocalRing) -> UsrbioResult<()> {
        let name = ring.region.name().to_string();
        ring.region.release()?;
        debug!("released ring {}", name);
        Ok(())
    }

    fn make_iovec(&self, segment: &SharedSegment, mount_point: &Path) -> UsrbioResult<Iovec> {
        let base = NonNull::new(segment.as_ptr()).ok_or_else(|| {
            UsrbioError::Registration(format!("segment {} is not mapped", segment.name()))
        })?;
        let id = self.state.next_iov_id.fetch_add(1, Ordering::Relaxed) + 1;

        write_lock(&self.state.iovecs).insert(
            id,
            IovecRecord {
                base: SegmentPtr(base),
                len: segment.len(),
                mount_point: mount_point.to_path_buf(),
            },
        );
        debug!(
            "registered iovec {} over {} ({} bytes)",
            id,
            segment.name(),
            segment.len()
        );

        Ok(Iovec::new(id, segment.len(), mount_point))
    }

    fn release_iovec(&self, iovec: Iovec) -> UsrbioResult<()> {
        if write_lock(&self.state.iovecs).remove(&iovec.id()).is_none() {
            return Err(UsrbioError::Registration(format!(
                "iovec {} is not registered",
                iovec.id()
            )));
        }
        debug!("released iovec {}", iovec.id());
        Ok(())
    }
}

/// Ring created by [`LocalDriver`].
pub struct LocalRing {
    state: Arc<DriverState>,
    region: RingRegion,
    mount_point: PathBuf,
    for_read: bool,
    next_user_data: u64,
}

impl LocalRing {
    fn direction(&self) -> &'static str {
        OpKind::from_is_read(self.for_read).as_str()
    }
}

impl IoRing for LocalRing {
    fn is_read(&self) -> bool {
        self.for_read
    }

    fn prepare(
        &mut self,
        slice: IovecSlice,
        is_read: bool,
        fd: RawFd,
        file_offset: u64,
    ) -> UsrbioResult<()> {
        if is_read != self.for_read {
            return Err(UsrbioError::DirectionMismatch {
                ring: self.direction(),
                op: OpKind::from_is_read(is_read).as_str(),
            });
        }

        let entry = SubmissionEntry {
            user_data: self.next_user_data,
            iov_id: slice.iov_id,
            iov_offset: slice.offset as u64,
            len: slice.len as u64,
            file_offset,
            fd,
            op: OpKind::from_is_read(is_read) as u32,
        };

        if !self.region.submission_queue().push(&entry) {
            return Err(UsrbioError::RingFull {
                depth: self.region.depth(),
            });
        }
        self.next_user_data = self.next_user_data.wrapping_add(1);

        trace!(
            "prepared {} of {} bytes at file offset {}",
            self.direction(),
            slice.len,
            file_offset
        );
        Ok(())
    }

    fn submit_prepared(&mut self) -> UsrbioResult<usize> {
        let sq = self.region.submission_queue();
        let cq = self.region.completion_queue();

        let mut submitted = 0;
        // Entries stay queued while the completion queue has no room for them
        while !cq.is_full() {
            let entry = match sq.try_pop() {
                Some(e) => e,
                None => break,
            };
            let result = self.state.execute(&entry, &self.mount_point, self.for_read);
            let pushed = cq.push(&CompletionEntry {
                user_data: entry.user_data,
                result,
            });
            debug_assert!(pushed);
            submitted += 1;
        }

        trace!("submitted {} {} entries", submitted, self.direction());
        Ok(submitted)
    }

    fn wait_completions(&mut self, min_results: usize) -> UsrbioResult<Vec<Completion>> {
        let cq = self.region.completion_queue();

        let mut completions = Vec::with_capacity(cq.len() as usize);
        while let Some(entry) = cq.try_pop() {
            completions.push(Completion {
                user_data: entry.user_data,
                result: entry.result,
            });
        }

        // Everything completes inside submit, so a shortfall can never be
        // made up by blocking
        if completions.len() < min_results {
            return Err(UsrbioError::InvalidCompletion(format!(
                "expected at least {} completions, got {}",
                min_results,
                completions.len()
            )));
        }

        Ok(completions)
    }
}
