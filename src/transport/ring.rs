//! Lock-free SPSC (Single Producer Single Consumer) queues over a ring region.
//!
//! Each ring region carries two queues:
//! - submission queue: client (producer) -> driver (consumer)
//! - completion queue: driver (producer) -> client (consumer)

use std::sync::atomic::{AtomicU32, Ordering};

use super::protocol::{
    ring_region_size, CompletionEntry, RingControlBlock, SubmissionEntry,
};
use super::shm::{SharedSegment, ShmError};
use crate::constants::RING_NAME_PREFIX;

/// Queue view over entries stored in shared memory.
pub struct SpscQueue<'a, T: Copy> {
    /// Pointer to queue entries
    entries: *mut T,
    /// Number of entries (must be power of 2)
    capacity: u32,
    /// Mask for index wrapping
    mask: u32,
    /// Head index (producer updates)
    head: &'a AtomicU32,
    /// Tail index (consumer updates)
    tail: &'a AtomicU32,
}

impl<'a, T: Copy> SpscQueue<'a, T> {
    /// Check if the queue is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head == tail
    }

    /// Check if the queue is full.
    #[inline]
    pub fn is_full(&self) -> bool {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail) >= self.capacity
    }

    /// Get the number of entries in the queue.
    #[inline]
    pub fn len(&self) -> u32 {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Push an entry (producer side).
    /// Returns false if the queue is full.
    pub fn push(&self, entry: &T) -> bool {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);

        if head.wrapping_sub(tail) >= self.capacity {
            return false;
        }

        let idx = (head & self.mask) as usize;
        unsafe {
            std::ptr::write_volatile(self.entries.add(idx), *entry);
        }

        // Release makes the entry visible before the head moves
        self.head.store(head.wrapping_add(1), Ordering::Release);

        true
    }

    /// Try to pop an entry (consumer side).
    /// Returns None if the queue is empty.
    pub fn try_pop(&self) -> Option<T> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);

        if tail == head {
            return None;
        }

        let idx = (tail & self.mask) as usize;
        let entry = unsafe { std::ptr::read_volatile(self.entries.add(idx)) };

        // Release: the slot is free only after the read above
        self.tail.store(tail.wrapping_add(1), Ordering::Release);

        Some(entry)
    }
}

// SAFETY: SpscQueue synchronizes through the head/tail atomics
unsafe impl<T: Copy + Send> Send for SpscQueue<'_, T> {}

pub type SubmissionQueue<'a> = SpscQueue<'a, SubmissionEntry>;
pub type CompletionQueue<'a> = SpscQueue<'a, CompletionEntry>;

/// Shared memory backing for one ring: control block plus both queues.
pub struct RingRegion {
    segment: SharedSegment,
    depth: u32,
}

impl RingRegion {
    /// Create a ring region with `depth` entries per queue.
    pub fn create(depth: u32, for_read: bool) -> Result<Self, ShmError> {
        if depth == 0 || !depth.is_power_of_two() {
            return Err(ShmError::InvalidConfig(
                "ring depth must be a power of 2".to_string(),
            ));
        }

        let segment = SharedSegment::create_unique(RING_NAME_PREFIX, ring_region_size(depth))?;

        // The mapping is page aligned, so the control block sits at offset 0
        let control = segment.as_ptr() as *mut RingControlBlock;
        unsafe {
            std::ptr::write(control, RingControlBlock::init(depth, for_read));
        }

        Ok(Self { segment, depth })
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Shared memory name of the backing segment
    pub fn name(&self) -> &str {
        self.segment.name()
    }

    /// Get reference to the control block
    pub fn control(&self) -> &RingControlBlock {
        unsafe { &*(self.segment.as_ptr() as *const RingControlBlock) }
    }

    fn submission_ptr(&self) -> *mut SubmissionEntry {
        let offset = std::mem::size_of::<RingControlBlock>();
        unsafe { self.segment.as_ptr().add(offset) as *mut SubmissionEntry }
    }

    fn completion_ptr(&self) -> *mut CompletionEntry {
        let offset = std::mem::size_of::<RingControlBlock>()
            + std::mem::size_of::<SubmissionEntry>() * self.depth as usize;
        unsafe { self.segment.as_ptr().add(offset) as *mut CompletionEntry }
    }

    /// Submission queue view.
    pub fn submission_queue(&self) -> SubmissionQueue<'_> {
        let control = self.control();
        SpscQueue {
            entries: self.submission_ptr(),
            capacity: self.depth,
            mask: self.depth - 1,
            head: &control.sq_head,
            tail: &control.sq_tail,
        }
    }

    /// Completion queue view.
    pub fn completion_queue(&self) -> CompletionQueue<'_> {
        let control = self.control();
        SpscQueue {
            entries: self.completion_ptr(),
            capacity: self.depth,
            mask: self.depth - 1,
            head: &control.cq_head,
            tail: &control.cq_tail,
        }
    }

    /// Unmap and unlink the backing segment.
    pub fn release(self) -> Result<(), ShmError> {
        self.segment.release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::protocol::OpKind;

    fn sqe(user_data: u64) -> SubmissionEntry {
        SubmissionEntry {
            user_data,
            iov_id: 1,
            iov_offset: 0,
            len: 4096,
            file_offset: user_data * 4096,
            fd: 3,
            op: OpKind::Read as u32,
        }
    }

    #[test]
    fn test_depth_must_be_power_of_two() {
        assert!(RingRegion::create(0, true).is_err());
        assert!(RingRegion::create(3, true).is_err());
        assert!(RingRegion::create(4, true).is_ok());
    }

    #[test]
    fn test_control_block_initialized() {
        let region = RingRegion::create(2, false).unwrap();
        assert!(region.control().validate());
        assert_eq!(region.control().depth, 2);
        assert_eq!(region.control().for_read, 0);
    }

    #[test]
    fn test_submission_queue_push_pop() {
        let region = RingRegion::create(4, true).unwrap();
        let sq = region.submission_queue();

        assert!(sq.is_empty());
        assert!(!sq.is_full());
        assert_eq!(sq.len(), 0);

        for i in 0..4 {
            assert!(sq.push(&sqe(i)));
        }

        assert!(sq.is_full());
        assert_eq!(sq.len(), 4);
        assert!(!sq.push(&sqe(99)));

        for i in 0..4 {
            let entry = sq.try_pop().unwrap();
            assert_eq!(entry.user_data, i);
            assert_eq!(entry.op_kind(), OpKind::Read);
        }

        assert!(sq.is_empty());
        assert!(sq.try_pop().is_none());
    }

    #[test]
    fn test_queues_are_independent() {
        let region = RingRegion::create(2, true).unwrap();
        let sq = region.submission_queue();
        let cq = region.completion_queue();

        assert!(sq.push(&sqe(7)));
        assert!(cq.is_empty());

        assert!(cq.push(&CompletionEntry {
            user_data: 7,
            result: -5,
        }));
        assert_eq!(sq.try_pop().unwrap().user_data, 7);
        assert_eq!(cq.try_pop().unwrap().result, -5);
    }

    #[test]
    fn test_queue_wrap_around() {
        let region = RingRegion::create(2, false).unwrap();
        let sq = region.submission_queue();
        let cq = region.completion_queue();

        for round in 0..10u64 {
            for i in 0..2 {
                assert!(sq.push(&sqe(round * 2 + i)));
                assert!(cq.push(&CompletionEntry {
                    user_data: round * 2 + i,
                    result: 0,
                }));
            }
            for i in 0..2 {
                assert_eq!(sq.try_pop().unwrap().user_data, round * 2 + i);
                assert_eq!(cq.try_pop().unwrap().user_data, round * 2 + i);
            }
        }
    }
}
