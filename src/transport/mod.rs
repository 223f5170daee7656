//! Shared-memory ring transport.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         RingClient                           │
//! │   read ring ── read iovec ── read segment (chunk_capacity)   │
//! │   write ring ─ write iovec ─ write segment (chunk_capacity)  │
//! └──────────────┬───────────────────────────────┬───────────────┘
//!                │ SubmissionEntry               ▲ CompletionEntry
//!                ▼                               │
//! ┌──────────────────────────────────────────────────────────────┐
//! │          Driver (registered fds, registered iovecs)          │
//! │       pread/pwrite between the file and the segment          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Data path
//!
//! - The client stages write data in its write segment, or lets the driver
//!   land read data in its read segment
//! - Rings carry only descriptors (iovec id, offset, length, fd, file offset)
//! - Completions carry a byte count or a negative errno
//!
//! [`driver`] holds the traits the client is written against; [`local`] is
//! the in-process implementation.

pub mod driver;
pub mod iovec;
pub mod local;
pub mod protocol;
pub mod ring;
pub mod shm;

pub use driver::{Completion, Driver, IoRing, Submission};
pub use iovec::{Iovec, IovecSlice};
pub use local::{LocalDriver, LocalRing};
pub use protocol::{CompletionEntry, OpKind, SubmissionEntry};
pub use ring::{CompletionQueue, RingRegion, SpscQueue, SubmissionQueue};
pub use shm::{SharedSegment, ShmError};
