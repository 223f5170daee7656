//! Shared memory segments.
//!
//! A segment is a named POSIX shared memory object mapped into this process.
//! The client uses one per direction as the landing zone for a chunk, and the
//! local driver uses one per ring for its submission/completion queues.

use std::ffi::CString;
use std::io;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

/// Error type for shared memory operations
#[derive(Error, Debug)]
pub enum ShmError {
    /// Failed to create shared memory
    #[error("failed to create shared memory: {0}")]
    CreateFailed(#[source] io::Error),
    /// Failed to set shared memory size
    #[error("failed to set shared memory size: {0}")]
    TruncateFailed(#[source] io::Error),
    /// Failed to map shared memory
    #[error("failed to map shared memory: {0}")]
    MmapFailed(#[source] io::Error),
    /// Failed to unmap shared memory
    #[error("failed to unmap shared memory: {0}")]
    UnmapFailed(#[source] io::Error),
    /// Failed to unlink shared memory
    #[error("failed to unlink shared memory: {0}")]
    UnlinkFailed(#[source] io::Error),
    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

static SEGMENT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A mapped, named shared memory segment owned by this process.
pub struct SharedSegment {
    /// Shared memory name (always starts with '/')
    name: String,
    /// Base pointer to mapped region
    base_ptr: NonNull<u8>,
    /// Size of the mapping
    len: usize,
    /// Cleared once the mapping has been torn down
    mapped: bool,
}

// SAFETY: the mapping is process-wide and owned exclusively by this value;
// mutable access goes through `&mut self`.
unsafe impl Send for SharedSegment {}

// SAFETY: `&SharedSegment` only hands out shared slices and the raw base pointer.
unsafe impl Sync for SharedSegment {}

impl SharedSegment {
    /// Create a new segment with a process-unique name derived from `prefix`.
    pub fn create_unique(prefix: &str, len: usize) -> Result<Self, ShmError> {
        let hostname = gethostname::gethostname()
            .to_string_lossy()
            .into_owned()
            .replace(['.', '/'], "_");
        let name = format!(
            "{}_{}_{}_{}",
            prefix,
            hostname,
            std::process::id(),
            SEGMENT_COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        Self::create(&name, len)
    }

    /// Create and map a segment of `len` bytes.
    ///
    /// The object is created exclusively; an existing object with the same
    /// name is an error. Contents start zeroed.
    pub fn create(name: &str, len: usize) -> Result<Self, ShmError> {
        if len == 0 {
            return Err(ShmError::InvalidConfig(
                "segment length must be > 0".to_string(),
            ));
        }

        let shm_name = Self::normalize_name(name);
        let c_name = CString::new(shm_name.as_str())
            .map_err(|_| ShmError::InvalidConfig("Invalid shared memory name".to_string()))?;

        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR | libc::O_EXCL,
                0o600,
            )
        };
        if fd < 0 {
            return Err(ShmError::CreateFailed(io::Error::last_os_error()));
        }

        let ret = unsafe { libc::ftruncate(fd, len as libc::off_t) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(fd);
                libc::shm_unlink(c_name.as_ptr());
            }
            return Err(ShmError::TruncateFailed(err));
        }

        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };

        // mmap keeps its own reference
        unsafe { libc::close(fd) };

        if ptr == libc::MAP_FAILED {
            let err = io::Error::last_os_error();
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
            return Err(ShmError::MmapFailed(err));
        }

        let base_ptr = match NonNull::new(ptr as *mut u8) {
            Some(p) => p,
            None => {
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
                return Err(ShmError::MmapFailed(io::Error::from_raw_os_error(
                    libc::EFAULT,
                )));
            }
        };

        tracing::trace!("mapped shared segment {} ({} bytes)", shm_name, len);

        Ok(Self {
            name: shm_name,
            base_ptr,
            len,
            mapped: true,
        })
    }

    /// Normalize shared memory name (ensure it starts with '/')
    fn normalize_name(name: &str) -> String {
        if name.starts_with('/') {
            name.to_string()
        } else {
            format!("/{}", name)
        }
    }

    /// Get the shared memory name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size of the segment in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Base address of the mapping.
    ///
    /// Valid until the segment is released or dropped.
    pub fn as_ptr(&self) -> *mut u8 {
        self.base_ptr.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.base_ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.base_ptr.as_ptr(), self.len) }
    }

    /// Unmap and unlink the segment, reporting the first failure.
    pub fn release(mut self) -> Result<(), ShmError> {
        self.unmap()
    }

    fn unmap(&mut self) -> Result<(), ShmError> {
        if !self.mapped {
            return Ok(());
        }
        self.mapped = false;

        let unmap_ret =
            unsafe { libc::munmap(self.base_ptr.as_ptr() as *mut libc::c_void, self.len) };
        let unmap_result = if unmap_ret < 0 {
            Err(ShmError::UnmapFailed(io::Error::last_os_error()))
        } else {
            Ok(())
        };

        let unlink_result = match CString::new(self.name.as_str()) {
            Ok(c_name) => {
                if unsafe { libc::shm_unlink(c_name.as_ptr()) } < 0 {
                    Err(ShmError::UnlinkFailed(io::Error::last_os_error()))
                } else {
                    Ok(())
                }
            }
            Err(_) => Ok(()),
        };

        unmap_result.and(unlink_result)
    }
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        if let Err(e) = self.unmap() {
            tracing::warn!("failed to release shared segment {}: {}", self.name, e);
        }
    }
}

impl std::fmt::Debug for SharedSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSegment")
            .field("name", &self.name)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shm_name_normalization() {
        assert_eq!(SharedSegment::normalize_name("test"), "/test".to_string());
        assert_eq!(SharedSegment::normalize_name("/test"), "/test".to_string());
    }

    #[test]
    fn test_zero_length_rejected() {
        assert!(matches!(
            SharedSegment::create_unique("usrbio_test", 0),
            Err(ShmError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_segment_read_write() {
        let mut seg = SharedSegment::create_unique("usrbio_test", 4096).unwrap();
        assert_eq!(seg.len(), 4096);
        assert!(seg.as_slice().iter().all(|&b| b == 0));

        seg.as_mut_slice()[0] = 0xAB;
        seg.as_mut_slice()[4095] = 0xCD;
        assert_eq!(seg.as_slice()[0], 0xAB);
        assert_eq!(seg.as_slice()[4095], 0xCD);

        seg.release().unwrap();
    }

    #[test]
    fn test_release_unlinks_name() {
        let seg = SharedSegment::create_unique("usrbio_test", 128).unwrap();
        let name = seg.name().to_string();
        seg.release().unwrap();

        // The name is free again once released
        let again = SharedSegment::create(&name, 128).unwrap();
        again.release().unwrap();
    }

    #[test]
    fn test_unique_names_differ() {
        let a = SharedSegment::create_unique("usrbio_test", 64).unwrap();
        let b = SharedSegment::create_unique("usrbio_test", 64).unwrap();
        assert_ne!(a.name(), b.name());
    }
}
