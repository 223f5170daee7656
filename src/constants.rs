//! Global constants for usrbio
//!
//! Limits and naming used across the client and the local driver.

/// Prefix of the POSIX shared memory objects backing data segments
pub const SEGMENT_NAME_PREFIX: &str = "usrbio_seg";

/// Prefix of the POSIX shared memory objects backing ring regions
pub const RING_NAME_PREFIX: &str = "usrbio_ring";

/// Largest block size a client may be configured with (1GB)
pub const MAX_BLOCK_SIZE: usize = 1 << 30;

/// Largest ring depth accepted by the local driver
pub const MAX_RING_DEPTH: u32 = 4096;

/// Mode used when the client creates the target file
pub const FILE_CREATE_MODE: u32 = 0o644;

/// Mount table consulted by the mount resolver
pub const MOUNTINFO_PATH: &str = "/proc/self/mountinfo";
