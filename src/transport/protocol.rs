//! Ring layout shared between the client side and the local driver.
//!
//! A ring region is one shared memory segment laid out as:
//!
//! ```text
//! ┌────────────────────┬──────────────────────────┬──────────────────────────┐
//! │ RingControlBlock   │ SubmissionEntry × depth  │ CompletionEntry × depth  │
//! │ (64 bytes)         │ (client → driver)        │ (driver → client)        │
//! └────────────────────┴──────────────────────────┴──────────────────────────┘
//! ```

use std::sync::atomic::AtomicU32;

/// Magic number for ring validation ("USRBIORG")
pub const RING_MAGIC: u64 = 0x5553_5242_494F_5247;

/// Ring layout version
pub const RING_VERSION: u32 = 1;

/// Operation types for submission entries
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// No operation (invalid)
    Nop = 0,
    /// Read from file into the iovec
    Read = 1,
    /// Write from the iovec into the file
    Write = 2,
}

impl From<u32> for OpKind {
    fn from(v: u32) -> Self {
        match v {
            1 => OpKind::Read,
            2 => OpKind::Write,
            _ => OpKind::Nop,
        }
    }
}

impl OpKind {
    pub fn from_is_read(is_read: bool) -> Self {
        if is_read {
            OpKind::Read
        } else {
            OpKind::Write
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Nop => "nop",
            OpKind::Read => "read",
            OpKind::Write => "write",
        }
    }
}

/// Control block at the start of a ring region.
#[repr(C, align(64))]
pub struct RingControlBlock {
    /// Magic number for validation
    pub magic: u64,
    /// Layout version
    pub version: u32,
    /// Number of entries in each queue (power of 2)
    pub depth: u32,
    /// 1 for a read ring, 0 for a write ring
    pub for_read: u32,
    /// Submission queue head (updated by client)
    pub sq_head: AtomicU32,
    /// Submission queue tail (updated by driver)
    pub sq_tail: AtomicU32,
    /// Completion queue head (updated by driver)
    pub cq_head: AtomicU32,
    /// Completion queue tail (updated by client)
    pub cq_tail: AtomicU32,
    /// Reserved/padding
    _padding: [u8; 28],
}

impl RingControlBlock {
    /// Initialize a new control block
    pub fn init(depth: u32, for_read: bool) -> Self {
        Self {
            magic: RING_MAGIC,
            version: RING_VERSION,
            depth,
            for_read: for_read as u32,
            sq_head: AtomicU32::new(0),
            sq_tail: AtomicU32::new(0),
            cq_head: AtomicU32::new(0),
            cq_tail: AtomicU32::new(0),
            _padding: [0; 28],
        }
    }

    /// Validate the control block
    pub fn validate(&self) -> bool {
        self.magic == RING_MAGIC && self.version == RING_VERSION
    }
}

/// Submission queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct SubmissionEntry {
    /// Caller cookie echoed in the completion
    pub user_data: u64,
    /// Descriptor the slice is cut from
    pub iov_id: u64,
    /// Offset of the slice within the descriptor
    pub iov_offset: u64,
    /// Length of the slice
    pub len: u64,
    /// Target offset within the file
    pub file_offset: u64,
    /// Registered file descriptor
    pub fd: i32,
    /// Operation type
    pub op: u32,
}

impl SubmissionEntry {
    pub fn op_kind(&self) -> OpKind {
        OpKind::from(self.op)
    }
}

/// Completion queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct CompletionEntry {
    /// Cookie copied from the submission
    pub user_data: u64,
    /// Transferred byte count, or negative errno
    pub result: i64,
}

/// Total size of a ring region with `depth` entries per queue
pub fn ring_region_size(depth: u32) -> usize {
    std::mem::size_of::<RingControlBlock>()
        + std::mem::size_of::<SubmissionEntry>() * depth as usize
        + std::mem::size_of::<CompletionEntry>() * depth as usize
}
