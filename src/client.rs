//! Ring-mediated read/write client.
//!
//! A [`RingClient`] owns one registered file handle plus, for each direction,
//! a ring, a shared memory segment of `chunk_capacity` bytes and the
//! descriptor registering that segment. `read`/`write` split a request into
//! chunks of at most `chunk_capacity` bytes and push them through the ring
//! one at a time: prepare, submit, wait for one completion, then the next
//! chunk.
//!
//! # Segment reuse
//!
//! Each direction has a single segment that every chunk reuses. The loop
//! relies on strict ordering:
//!
//! - read: the bytes of chunk N are copied out of the read segment before
//!   chunk N+1 is prepared, since the driver overwrites the segment
//! - write: chunk N+1 is staged into the write segment only after chunk N
//!   has completed
//!
//! Exclusive `&mut self` on every operation keeps a second caller from
//! interleaving with the loop.
//!
//! # Teardown order
//!
//! `close` deregisters and closes the file, releases both descriptors, both
//! rings and finally both segments. Every step runs even if an earlier one
//! fails; the first failure is returned.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, IntoRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::config::ClientConfig;
use crate::constants::{FILE_CREATE_MODE, SEGMENT_NAME_PREFIX};
use crate::error::{UsrbioError, UsrbioResult};
use crate::transport::driver::{Driver, IoRing};
use crate::transport::iovec::Iovec;
use crate::transport::shm::SharedSegment;

/// Ring, descriptor and segment for one direction.
struct Channel<R> {
    ring: R,
    iovec: Iovec,
    segment: SharedSegment,
}

impl<R: IoRing> Channel<R> {
    /// Build a channel, releasing whatever was built if a later step fails.
    fn open<D: Driver<Ring = R>>(
        driver: &D,
        mount_point: &Path,
        chunk_capacity: usize,
        ring_depth: u32,
        for_read: bool,
    ) -> UsrbioResult<Self> {
        let segment = SharedSegment::create_unique(SEGMENT_NAME_PREFIX, chunk_capacity)?;
        let ring = driver.make_ring(mount_point, ring_depth, for_read)?;
        let iovec = match driver.make_iovec(&segment, mount_point) {
            Ok(iovec) => iovec,
            Err(e) => {
                if let Err(re) = driver.release_ring(ring) {
                    warn!("failed to release ring after setup error: {}", re);
                }
                return Err(e);
            }
        };

        Ok(Self {
            ring,
            iovec,
            segment,
        })
    }

    /// Best-effort release used when construction is abandoned.
    fn abandon<D: Driver<Ring = R>>(self, driver: &D) {
        if let Err(e) = driver.release_iovec(self.iovec) {
            warn!("failed to release iovec after setup error: {}", e);
        }
        if let Err(e) = driver.release_ring(self.ring) {
            warn!("failed to release ring after setup error: {}", e);
        }
        if let Err(e) = self.segment.release() {
            warn!("failed to release segment after setup error: {}", e);
        }
    }

    /// Run one ring operation over the first `len` bytes of the segment.
    ///
    /// Returns the number of bytes the driver transferred, which is in
    /// `1..=len`.
    fn transfer(&mut self, len: usize, is_read: bool, fd: RawFd, file_offset: u64) -> UsrbioResult<usize> {
        let slice = self.iovec.slice(..len)?;
        self.ring.prepare(slice, is_read, fd, file_offset)?;
        let completions = self.ring.submit()?.wait(1)?;

        let done = completions.first().ok_or_else(|| {
            UsrbioError::InvalidCompletion("wait returned no completions".to_string())
        })?;

        if let Some(errno) = done.errno() {
            return Err(UsrbioError::driver(errno));
        }

        let transferred = usize::try_from(done.result).map_err(|_| {
            UsrbioError::InvalidCompletion(format!("result {} does not fit usize", done.result))
        })?;
        if transferred == 0 {
            return Err(UsrbioError::NoProgress {
                offset: file_offset,
            });
        }
        if transferred > len {
            return Err(UsrbioError::InvalidCompletion(format!(
                "driver reported {} bytes for a {} byte request",
                transferred, len
            )));
        }

        trace!(
            "{} chunk: {} of {} bytes at offset {}",
            if is_read { "read" } else { "write" },
            transferred,
            len,
            file_offset
        );
        Ok(transferred)
    }
}

/// Everything that exists only while the client is open.
struct OpenState<R> {
    file: File,
    read: Channel<R>,
    write: Channel<R>,
}

/// Client for bounded, chunked reads and writes over a ring transport.
///
/// One client serves one worker; parallel workers each open their own
/// client against the same file.
pub struct RingClient<D: Driver> {
    driver: Arc<D>,
    path: PathBuf,
    mount_point: PathBuf,
    chunk_capacity: usize,
    file_size: u64,
    state: Option<OpenState<D::Ring>>,
}

impl<D: Driver> RingClient<D> {
    /// Open `path` with the default configuration.
    pub fn open(path: impl AsRef<Path>, driver: Arc<D>) -> UsrbioResult<Self> {
        Self::open_with_config(path, driver, &ClientConfig::default())
    }

    /// Open (creating if absent) `path`, register it and build both
    /// directions' ring, segment and descriptor.
    pub fn open_with_config(
        path: impl AsRef<Path>,
        driver: Arc<D>,
        config: &ClientConfig,
    ) -> UsrbioResult<Self> {
        config.validate()?;
        let path = path.as_ref();
        let chunk_capacity = config.chunk_capacity();

        let mount_point = driver.mount_point_of(path)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(FILE_CREATE_MODE)
            .open(path)
            .map_err(|source| UsrbioError::Resource {
                what: format!("open {}", path.display()),
                source,
            })?;
        let fd = file.as_raw_fd();

        driver.register_fd(fd)?;

        let channels = Channel::open(&*driver, &mount_point, chunk_capacity, config.ring_depth, true)
            .and_then(|read| {
                match Channel::open(&*driver, &mount_point, chunk_capacity, config.ring_depth, false) {
                    Ok(write) => Ok((read, write)),
                    Err(e) => {
                        read.abandon(&*driver);
                        Err(e)
                    }
                }
            });

        let (read, write) = match channels {
            Ok(channels) => channels,
            Err(e) => {
                if let Err(de) = driver.deregister_fd(fd) {
                    warn!("failed to deregister fd {} after setup error: {}", fd, de);
                }
                return Err(e);
            }
        };

        debug!(
            "opened {} on mount {} (fd {}, chunk capacity {})",
            path.display(),
            mount_point.display(),
            fd,
            chunk_capacity
        );

        Ok(Self {
            driver,
            path: path.to_path_buf(),
            mount_point,
            chunk_capacity,
            file_size: 0,
            state: Some(OpenState { file, read, write }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    /// Largest number of bytes moved by one ring operation
    pub fn chunk_capacity(&self) -> usize {
        self.chunk_capacity
    }

    /// Logical file size established by the last `set_size`
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_none()
    }

    fn state_mut(&mut self) -> UsrbioResult<&mut OpenState<D::Ring>> {
        self.state.as_mut().ok_or(UsrbioError::Closed)
    }

    fn check_bounds(&self, op: &'static str, offset: u64, size: usize) -> UsrbioResult<()> {
        let end = u64::try_from(size)
            .ok()
            .and_then(|size| offset.checked_add(size));
        match end {
            Some(end) if end <= self.file_size => Ok(()),
            _ => Err(UsrbioError::OutOfBounds {
                op,
                offset,
                size,
                file_size: self.file_size,
            }),
        }
    }

    /// Truncate or extend the file to `size` bytes and bound later I/O by it.
    pub fn set_size(&mut self, size: u64) -> UsrbioResult<()> {
        let state = self.state_mut()?;
        state.file.set_len(size)?;
        self.file_size = size;
        debug!("set size of {} to {}", self.path.display(), size);
        Ok(())
    }

    /// Read exactly `size` bytes starting at `offset`.
    ///
    /// Any error discards the bytes gathered so far.
    pub fn read(&mut self, offset: u64, size: usize) -> UsrbioResult<Vec<u8>> {
        if self.state.is_none() {
            return Err(UsrbioError::Closed);
        }
        self.check_bounds("read", offset, size)?;

        let chunk_capacity = self.chunk_capacity;
        let state = self.state_mut()?;
        let fd = state.file.as_raw_fd();
        let channel = &mut state.read;

        let mut out = Vec::with_capacity(size);
        let mut remaining = size;
        let mut cursor = offset;

        while remaining > 0 {
            let now = remaining.min(chunk_capacity);
            let done = channel.transfer(now, true, fd, cursor)?;

            // Copy out before the next prepare lets the driver overwrite it
            out.extend_from_slice(&channel.segment.as_slice()[..done]);

            cursor += done as u64;
            remaining -= done;
        }

        Ok(out)
    }

    /// Write all of `data` at `offset`; returns the bytes accepted.
    pub fn write(&mut self, offset: u64, data: &[u8]) -> UsrbioResult<u64> {
        if self.state.is_none() {
            return Err(UsrbioError::Closed);
        }
        self.check_bounds("write", offset, data.len())?;

        let chunk_capacity = self.chunk_capacity;
        let state = self.state_mut()?;
        let fd = state.file.as_raw_fd();
        let channel = &mut state.write;

        let mut remaining = data.len();
        let mut cursor = offset;

        while remaining > 0 {
            let now = remaining.min(chunk_capacity);
            // Source position tracks accepted bytes, so a short write is
            // retried from where the driver stopped
            let start = (cursor - offset) as usize;
            channel.segment.as_mut_slice()[..now].copy_from_slice(&data[start..start + now]);

            let done = channel.transfer(now, false, fd, cursor)?;

            cursor += done as u64;
            remaining -= done;
        }

        Ok(cursor - offset)
    }

    /// fsync the file. Failures carry their errno like ring failures do.
    pub fn flush(&mut self) -> UsrbioResult<()> {
        let state = self.state_mut()?;
        state.file.sync_all().map_err(os_error)?;
        Ok(())
    }

    /// Release every resource. A second call fails with `Closed`.
    pub fn close(&mut self) -> UsrbioResult<()> {
        let state = self.state.take().ok_or(UsrbioError::Closed)?;
        let result = teardown(&*self.driver, state);
        debug!("closed {}", self.path.display());
        result
    }
}

/// Report an OS failure the way a failed completion is reported
fn os_error(e: std::io::Error) -> UsrbioError {
    match e.raw_os_error() {
        Some(errno) => UsrbioError::driver(errno),
        None => UsrbioError::Io(e),
    }
}

fn close_fd(fd: RawFd) -> UsrbioResult<()> {
    if unsafe { libc::close(fd) } < 0 {
        return Err(UsrbioError::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}

fn teardown<D: Driver>(driver: &D, state: OpenState<D::Ring>) -> UsrbioResult<()> {
    let OpenState { file, read, write } = state;
    let mut first_error: Option<UsrbioError> = None;

    let mut record = |step: &str, result: UsrbioResult<()>| {
        if let Err(e) = result {
            warn!("teardown step '{}' failed: {}", step, e);
            first_error.get_or_insert(e);
        }
    };

    let fd = file.into_raw_fd();
    record("deregister fd", driver.deregister_fd(fd));
    record("close fd", close_fd(fd));

    // Descriptors reference the segments, so they go first
    record("release read iovec", driver.release_iovec(read.iovec));
    record("release write iovec", driver.release_iovec(write.iovec));
    record("release read ring", driver.release_ring(read.ring));
    record("release write ring", driver.release_ring(write.ring));
    record("release read segment", read.segment.release().map_err(Into::into));
    record("release write segment", write.segment.release().map_err(Into::into));

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

impl<D: Driver> Drop for RingClient<D> {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            if let Err(e) = teardown(&*self.driver, state) {
                warn!("failed to tear down client for {}: {}", self.path.display(), e);
            }
        }
    }
}
