//! The implicit allocator: one header per block, no free list.
//!
//! Allocation walks every block from `segment_start`, looking for the first
//! one that is FREE and large enough. Freeing a block just flips its status
//! bit in place — neighbors are never inspected, so adjacent FREE blocks
//! accumulate as separate entries in the walk instead of merging. This
//! makes the implicit allocator simple and its `free` O(1), at the cost of
//! fragmentation that only grows over time.

use crate::header::{roundup, Header, Status, ALIGNMENT, HEADER_LEN};
use crate::segment::{header_of, next_header, payload_of, read_header, write_header, BlockIter};
use crate::SegmentAllocator;
use core::ptr::{self, NonNull};

/// The smallest payload size this allocator ever hands out: one alignment
/// unit, since there is no in-payload bookkeeping to make room for.
const MIN_PAYLOAD: usize = ALIGNMENT;

#[derive(Clone, Copy)]
struct Segment {
    start: NonNull<u8>,
    end: NonNull<u8>,
}

/// A first-fit allocator over a single flat segment, with no free list.
///
/// See the [crate-level documentation](crate) for the shared data model and
/// [`SegmentAllocator`] for the operations this type implements.
pub struct ImplicitAllocator {
    segment: Option<Segment>,
}

impl ImplicitAllocator {
    /// Create an allocator with no active segment.
    ///
    /// Call [`init`](SegmentAllocator::init) before using it; every other
    /// method is a no-op (or reports "out of space") until then.
    pub const fn new() -> Self {
        Self { segment: None }
    }
}

impl Default for ImplicitAllocator {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl SegmentAllocator for ImplicitAllocator {
    unsafe fn init(&mut self, segment_start: *mut u8, segment_size: usize) -> bool {
        let Some(start) = NonNull::new(segment_start) else {
            return false;
        };
        if segment_size <= HEADER_LEN {
            return false;
        }

        let payload_size = segment_size - HEADER_LEN;
        // SAFETY: `start` is non-null and the caller guarantees (per this
        // function's safety contract) that `segment_size` bytes starting
        // there are valid and writable.
        unsafe { write_header(start, Header::pack(payload_size, Status::Free)) };

        self.segment = Some(Segment {
            start,
            // SAFETY: `start.as_ptr().add(segment_size)` is one-past-the-end
            // of a region the caller guarantees is valid, which is a legal
            // (possibly non-dereferenceable) pointer value.
            end: unsafe { NonNull::new_unchecked(start.as_ptr().add(segment_size)) },
        });
        true
    }

    fn malloc(&mut self, size: usize) -> Option<*mut u8> {
        let segment = self.segment.as_ref()?;
        let need = roundup(size, MIN_PAYLOAD);

        // SAFETY: `self.segment` is only ever populated by `init`, which
        // establishes I1-I3 for `[segment.start, segment.end)`.
        let blocks = unsafe { BlockIter::new(segment.start, segment.end) };
        for header in blocks {
            // SAFETY: `header` came from `BlockIter`, which only yields live
            // header addresses within the segment.
            let word = unsafe { read_header(header) };
            if word.status() != Status::Free || word.size() < need {
                continue;
            }

            let curr_size = word.size();
            if curr_size - need <= HEADER_LEN {
                // Not enough slack to carve off a legal trailing block:
                // grant the whole block, wasting the slack as padding.
                // SAFETY: `header` is a live header in the segment.
                unsafe { write_header(header, Header::pack(curr_size, Status::Used)) };
            } else {
                // SAFETY: `header` is a live header in the segment.
                unsafe { write_header(header, Header::pack(need, Status::Used)) };
                // SAFETY: `next_header` stays within the segment because
                // `curr_size - need > HEADER_LEN` leaves room for another
                // header plus a non-empty payload before `segment.end`.
                let remainder = unsafe {
                    NonNull::new_unchecked(next_header(header, need))
                };
                let remainder_size = curr_size - need - HEADER_LEN;
                unsafe { write_header(remainder, Header::pack(remainder_size, Status::Free)) };
            }
            return Some(payload_of(header).as_ptr());
        }
        None
    }

    unsafe fn free(&mut self, ptr: *mut u8) {
        let Some(payload) = NonNull::new(ptr) else {
            return;
        };
        // SAFETY: by this function's contract, `ptr` is the most recent live
        // return of `malloc`/`realloc`, so the 8 bytes before it are that
        // block's header.
        let header = unsafe { header_of(payload) };
        // SAFETY: `header` is a live header, per the same contract.
        let word = unsafe { read_header(header) };
        // SAFETY: same.
        unsafe { write_header(header, Header::pack(word.size(), Status::Free)) };
    }

    unsafe fn realloc(&mut self, ptr: *mut u8, new_size: usize) -> Option<*mut u8> {
        let Some(payload) = NonNull::new(ptr) else {
            return self.malloc(new_size);
        };
        // SAFETY: `ptr` is a live allocation per this function's contract.
        let header = unsafe { header_of(payload) };
        // SAFETY: same; the block is USED, so its size bits are exactly its
        // payload size (see `Header::status` for why a masked read and the
        // raw word agree here).
        let old_size = unsafe { read_header(header) }.size();
        let need = roundup(new_size, MIN_PAYLOAD);

        if old_size >= need {
            if old_size - need > HEADER_LEN {
                // SAFETY: `header` is live, and the slack computed above
                // leaves room for a full header plus a non-empty payload.
                unsafe { write_header(header, Header::pack(need, Status::Used)) };
                let remainder = unsafe {
                    NonNull::new_unchecked(payload.as_ptr().add(need))
                };
                let remainder_size = old_size - need - HEADER_LEN;
                unsafe {
                    write_header(remainder, Header::pack(remainder_size, Status::Free));
                }
            }
            // Slack too small to split off: leave the block exactly as is.
            return Some(ptr);
        }

        let new_ptr = self.malloc(new_size)?;
        // SAFETY: `ptr` is valid for `old_size` bytes (its own payload) and
        // `new_ptr` is valid for at least `min(old_size, new_size)` bytes
        // (just allocated by `malloc` above); the two regions cannot
        // overlap since `new_ptr` was carved from a still-FREE block.
        unsafe {
            ptr::copy_nonoverlapping(ptr, new_ptr, old_size.min(new_size));
        }
        // SAFETY: `ptr` is still the live allocation being replaced.
        unsafe { self.free(ptr) };
        Some(new_ptr)
    }

    fn validate_heap(&self) -> bool {
        let Some(segment) = self.segment.as_ref() else {
            return true;
        };

        // SAFETY: see `malloc`.
        let mut blocks = unsafe { BlockIter::new(segment.start, segment.end) };
        for header in &mut blocks {
            // SAFETY: `header` came from `BlockIter`.
            let word = unsafe { read_header(header) };
            if !word.has_valid_status() {
                return false;
            }
        }
        blocks.cursor() == segment.end.as_ptr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(size: usize) -> (Vec<u8>, ImplicitAllocator) {
        let mut buf = vec![0u8; size];
        let mut allocator = ImplicitAllocator::new();
        assert!(unsafe { allocator.init(buf.as_mut_ptr(), size) });
        (buf, allocator)
    }

    #[test]
    fn init_rejects_null_and_tiny_segments() {
        let mut allocator = ImplicitAllocator::new();
        assert!(!unsafe { allocator.init(ptr::null_mut(), 1024) });

        let mut tiny = [0u8; 8];
        let mut allocator = ImplicitAllocator::new();
        assert!(!unsafe { allocator.init(tiny.as_mut_ptr(), 8) });
    }

    #[test]
    fn successful_single_allocation_splits_remainder() {
        let (_buf, mut allocator) = fresh(32);
        let ptr = allocator.malloc(4).unwrap();
        assert_eq!((ptr as usize) % ALIGNMENT, 0);
        assert!(allocator.validate_heap());
    }

    #[test]
    fn allocation_too_large_fails() {
        let (_buf, mut allocator) = fresh(32);
        assert!(allocator.malloc(100).is_none());
    }

    #[test]
    fn free_does_not_coalesce_neighbors() {
        // freeing a block never merges it with its neighbor.
        let (mut buf, mut allocator) = fresh(1024);
        let p = allocator.malloc(100).unwrap();
        unsafe { allocator.free(p) };

        let start = NonNull::new(buf.as_mut_ptr()).unwrap();
        let first = unsafe { read_header(start) };
        assert_eq!(first.size(), 104);
        assert_eq!(first.status(), Status::Free);

        let second = unsafe {
            NonNull::new_unchecked(next_header(start, first.size()))
        };
        let second_header = unsafe { read_header(second) };
        assert_eq!(second_header.size(), 904);
        assert_eq!(second_header.status(), Status::Free);
        assert!(allocator.validate_heap());
    }

    #[test]
    fn free_then_malloc_same_size_reuses_pointer() {
        let (_buf, mut allocator) = fresh(1024);
        let p = allocator.malloc(100).unwrap();
        unsafe { allocator.free(p) };
        let q = allocator.malloc(100).unwrap();
        assert_eq!(p, q);
    }

    #[test]
    fn realloc_grow_in_place_when_room() {
        let (_buf, mut allocator) = fresh(1024);
        let p = allocator.malloc(8).unwrap();
        unsafe {
            ptr::write_bytes(p, 0xAB, 8);
        }
        let q = unsafe { allocator.realloc(p, 64) }.unwrap();
        assert_eq!(p, q, "enough trailing free space to grow in place");
        assert!(allocator.validate_heap());
    }

    #[test]
    fn realloc_moves_when_no_room() {
        let (_buf, mut allocator) = fresh(64);
        let p = allocator.malloc(8).unwrap();
        unsafe {
            ptr::write_bytes(p, 0x7, 8);
        }
        let _blocker = allocator.malloc(8).unwrap();
        let q = unsafe { allocator.realloc(p, 40) }.unwrap();
        assert_ne!(p, q);
        let bytes = unsafe { core::slice::from_raw_parts(q, 8) };
        assert_eq!(bytes, &[0x7; 8]);
        assert!(allocator.validate_heap());
    }

    #[test]
    fn realloc_null_is_malloc() {
        let (_buf, mut allocator) = fresh(32);
        let p = unsafe { allocator.realloc(ptr::null_mut(), 4) };
        assert!(p.is_some());
    }
}
