//! The explicit allocator: an address-ordered doubly linked free list,
//! right-coalescing on free, and realloc absorption of right neighbors.
//!
//! Unlike [`crate::implicit`], freeing a block inspects its right neighbor
//! and merges with it if free, so fragmentation from adjacent frees never
//! accumulates the way it does in the implicit allocator. The cost is a
//! free list that every [`malloc`](SegmentAllocator::malloc)/
//! [`free`](SegmentAllocator::free) must keep consistent with the heap
//! itself — see [`validate_heap`](SegmentAllocator::validate_heap) for how
//! that consistency is checked.

mod free_list;

use crate::header::{roundup, Header, Status, HEADER_LEN};
use crate::segment::{header_of, next_header, payload_of, read_header, write_header};
use crate::SegmentAllocator;
use core::ptr::{self, NonNull};
use free_list::FreeList;

/// The smallest payload an explicit-allocator block ever has: two 8-byte
/// link slots, since every FREE block must be able to hold its free-list
/// links in its own payload.
const MIN_PAYLOAD: usize = 16;

#[derive(Clone, Copy)]
struct Segment {
    start: NonNull<u8>,
    end: NonNull<u8>,
}

fn within_range(segment: &Segment, ptr: NonNull<u8>) -> bool {
    let addr = ptr.as_ptr() as usize;
    segment.start.as_ptr() as usize <= addr && addr <= segment.end.as_ptr() as usize
}

/// An address-ordered, right-coalescing, free-list-based allocator over a
/// single flat segment.
///
/// See the [crate-level documentation](crate) for the shared data model and
/// [`SegmentAllocator`] for the operations this type implements.
pub struct ExplicitAllocator {
    segment: Option<Segment>,
    free_list: FreeList,
}

impl ExplicitAllocator {
    /// Create an allocator with no active segment.
    ///
    /// Call [`init`](SegmentAllocator::init) before using it; every other
    /// method is a no-op (or reports "out of space") until then.
    pub const fn new() -> Self {
        Self {
            segment: None,
            free_list: FreeList::new(),
        }
    }

    /// Check every block in the heap in address order: size at least
    /// [`MIN_PAYLOAD`], a valid status, and a FREE count that matches the
    /// free list's own length.
    fn traverse_heap(&self, segment: &Segment) -> bool {
        let mut cursor = segment.start;
        let mut free_count = 0usize;
        loop {
            if cursor.as_ptr() >= segment.end.as_ptr() {
                break;
            }
            // SAFETY: the segment tiles exactly (I1) as long as no prior
            // corruption has occurred, which is exactly what this loop is
            // checking; a corrupt size is caught below before it can drive
            // an out-of-bounds read on the next iteration.
            let word = unsafe { read_header(cursor) };
            if word.size() < MIN_PAYLOAD || !word.has_valid_status() {
                return false;
            }
            if word.status() == Status::Free {
                free_count += 1;
            }
            let next = next_header(cursor, word.size());
            cursor = match NonNull::new(next) {
                Some(next) => next,
                None => return false,
            };
        }
        cursor.as_ptr() == segment.end.as_ptr() && free_count == self.free_list.len()
    }

    /// Walk the free list in one direction, checking that every member is
    /// FREE, that endpoints have no out-of-list neighbor, and that every
    /// other neighbor is both in range and keeps the list address-sorted.
    fn traverse_free_list(&self, segment: &Segment, reverse: bool) -> bool {
        let len = self.free_list.len();
        if len == 0 {
            return self.free_list.head().is_none() && self.free_list.end().is_none();
        }

        let mut ptr = if reverse {
            self.free_list.end()
        } else {
            self.free_list.head()
        };
        let mut count = 1;
        while count <= len {
            let Some(curr) = ptr else { return false };
            // SAFETY: `curr` came from the free list, which only ever holds
            // addresses inserted via `FreeList::insert`/`replace`.
            let word = unsafe { read_header(curr) };
            if word.status() != Status::Free {
                return false;
            }

            // SAFETY: same.
            let prev = unsafe { FreeList::prev_of(curr) };
            // SAFETY: same.
            let next = unsafe { FreeList::next_of(curr) };

            let (prev_ok, next_ok) = if !reverse {
                (
                    if count == 1 {
                        prev.is_none()
                    } else {
                        prev.is_some_and(|p| within_range(segment, p))
                    },
                    if count == len {
                        next.is_none()
                    } else {
                        next.is_some_and(|n| within_range(segment, n))
                    },
                )
            } else {
                (
                    if count == len {
                        prev.is_none()
                    } else {
                        prev.is_some_and(|p| within_range(segment, p))
                    },
                    if count == 1 {
                        next.is_none()
                    } else {
                        next.is_some_and(|n| within_range(segment, n))
                    },
                )
            };
            if !prev_ok || !next_ok {
                return false;
            }

            if let Some(prev) = prev {
                if prev.as_ptr() >= curr.as_ptr() {
                    return false;
                }
            }
            if let Some(next) = next {
                if curr.as_ptr() >= next.as_ptr() {
                    return false;
                }
            }

            ptr = if reverse { prev } else { next };
            count += 1;
        }
        true
    }
}

impl Default for ExplicitAllocator {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl SegmentAllocator for ExplicitAllocator {
    unsafe fn init(&mut self, segment_start: *mut u8, segment_size: usize) -> bool {
        let Some(start) = NonNull::new(segment_start) else {
            return false;
        };
        if segment_size < HEADER_LEN + MIN_PAYLOAD {
            return false;
        }

        let payload_size = segment_size - HEADER_LEN;
        // SAFETY: `start` is non-null and the caller guarantees `segment_size`
        // bytes starting there are valid and writable.
        unsafe { write_header(start, Header::pack(payload_size, Status::Free)) };

        self.free_list = FreeList::new();
        // SAFETY: `start` is a fresh FREE block with a payload large enough
        // to hold two link words (`payload_size >= MIN_PAYLOAD`), and is not
        // yet a member of any list.
        unsafe { self.free_list.insert(start) };

        self.segment = Some(Segment {
            start,
            // SAFETY: one-past-the-end of a region the caller guarantees is
            // valid is a legal (possibly non-dereferenceable) pointer value.
            end: unsafe { NonNull::new_unchecked(start.as_ptr().add(segment_size)) },
        });
        true
    }

    fn malloc(&mut self, size: usize) -> Option<*mut u8> {
        self.segment?;
        let need = roundup(size, MIN_PAYLOAD);

        let mut cursor = self.free_list.head();
        while let Some(curr) = cursor {
            // SAFETY: `curr` is a free-list member, hence a live header.
            let word = unsafe { read_header(curr) };
            let curr_size = word.size();
            if curr_size >= need {
                if curr_size - need < HEADER_LEN + MIN_PAYLOAD {
                    // Not enough slack to split off another block: hand out
                    // the whole thing and drop it from the free list.
                    // SAFETY: `curr` is live.
                    unsafe {
                        write_header(curr, Header::pack(curr_size, Status::Used));
                        self.free_list.remove(curr);
                    }
                } else {
                    // SAFETY: `curr` is live, and the slack computed above
                    // leaves room for a header plus a `MIN_PAYLOAD` payload.
                    unsafe {
                        write_header(curr, Header::pack(need, Status::Used));
                    }
                    let remainder = unsafe { NonNull::new_unchecked(next_header(curr, need)) };
                    let remainder_size = curr_size - need - HEADER_LEN;
                    // SAFETY: `remainder` is freshly carved, uninitialized
                    // space within the segment.
                    unsafe {
                        write_header(remainder, Header::pack(remainder_size, Status::Free));
                        self.free_list.replace(curr, remainder);
                    }
                }
                return Some(payload_of(curr).as_ptr());
            }
            // SAFETY: `curr` is a free-list member.
            cursor = unsafe { FreeList::next_of(curr) };
        }
        None
    }

    unsafe fn free(&mut self, ptr: *mut u8) {
        let Some(payload) = NonNull::new(ptr) else {
            return;
        };
        let Some(segment) = self.segment else {
            return;
        };
        // SAFETY: `ptr` is a live allocation per this function's contract.
        let curr = unsafe { header_of(payload) };
        // SAFETY: same.
        let curr_size = unsafe { read_header(curr) }.size();

        let right_ptr = next_header(curr, curr_size);
        if right_ptr == segment.end.as_ptr() {
            // SAFETY: `curr` is live.
            unsafe {
                write_header(curr, Header::pack(curr_size, Status::Free));
                self.free_list.insert(curr);
            }
            return;
        }

        // SAFETY: `right_ptr` is strictly before `segment.end`, checked above.
        let right = unsafe { NonNull::new_unchecked(right_ptr) };
        // SAFETY: `right` is a live header within the segment.
        let right_word = unsafe { read_header(right) };
        if right_word.status() == Status::Free {
            let merged_size = curr_size + HEADER_LEN + right_word.size();
            // SAFETY: `curr` is live, `right` is a free-list member being
            // absorbed into it.
            unsafe {
                write_header(curr, Header::pack(merged_size, Status::Free));
                self.free_list.replace(right, curr);
            }
        } else {
            // SAFETY: `curr` is live.
            unsafe {
                write_header(curr, Header::pack(curr_size, Status::Free));
                self.free_list.insert(curr);
            }
        }
    }

    unsafe fn realloc(&mut self, ptr: *mut u8, new_size: usize) -> Option<*mut u8> {
        let Some(payload) = NonNull::new(ptr) else {
            return self.malloc(new_size);
        };
        let segment = self.segment?;
        // SAFETY: `ptr` is a live allocation per this function's contract.
        let curr = unsafe { header_of(payload) };
        // SAFETY: same.
        let old_size = unsafe { read_header(curr) }.size();
        let need = roundup(new_size, MIN_PAYLOAD);

        // Probe how much the free run immediately to the right could grow
        // this block to, without touching the free list yet: if it still
        // wouldn't be enough, absorbing is pointless and must not happen,
        // since a failed realloc has to leave the original block and its
        // free neighbors exactly as they were.
        let mut probe = next_header(curr, old_size);
        let mut absorbable = old_size;
        while probe != segment.end.as_ptr() {
            // SAFETY: `probe` is strictly before `segment.end`, checked by
            // the loop condition, so it addresses a live header.
            let right = unsafe { NonNull::new_unchecked(probe) };
            // SAFETY: same.
            let right_word = unsafe { read_header(right) };
            if right_word.status() != Status::Free {
                break;
            }
            absorbable += HEADER_LEN + right_word.size();
            probe = next_header(right, right_word.size());
        }

        if absorbable >= need {
            // Commit the absorb: now actually unlink each right neighbor
            // from the free list and fold it into `curr`.
            let mut curr_size = old_size;
            loop {
                let right_ptr = next_header(curr, curr_size);
                if right_ptr == segment.end.as_ptr() {
                    break;
                }
                // SAFETY: `right_ptr` is strictly before `segment.end`.
                let right = unsafe { NonNull::new_unchecked(right_ptr) };
                // SAFETY: `right` is a live header.
                let right_word = unsafe { read_header(right) };
                if right_word.status() != Status::Free {
                    break;
                }
                // SAFETY: `right` is a free-list member being absorbed.
                unsafe { self.free_list.remove(right) };
                curr_size += HEADER_LEN + right_word.size();
            }

            if curr_size - need < HEADER_LEN + MIN_PAYLOAD {
                // SAFETY: `curr` is live.
                unsafe { write_header(curr, Header::pack(curr_size, Status::Used)) };
            } else {
                // SAFETY: `curr` is live, and the slack computed above
                // leaves room for a header plus a `MIN_PAYLOAD` payload.
                unsafe { write_header(curr, Header::pack(need, Status::Used)) };
                let remainder = unsafe { NonNull::new_unchecked(next_header(curr, need)) };
                let remainder_size = curr_size - need - HEADER_LEN;
                // SAFETY: freshly carved space within the segment.
                unsafe {
                    write_header(remainder, Header::pack(remainder_size, Status::Free));
                    self.free_list.insert(remainder);
                }
            }
            return Some(ptr);
        }

        // In-place is impossible even with the full right-adjacent free
        // run folded in: leave `curr` exactly as it was and fall back to
        // move-and-copy. If this `malloc` also fails, `curr` was never
        // touched, satisfying the "unchanged on failure" contract.
        let new_ptr = self.malloc(new_size)?;
        // SAFETY: `ptr` is valid for `old_size` bytes and `new_ptr` for at
        // least `min(old_size, new_size)` bytes, just allocated from a
        // block that cannot overlap `ptr` since `ptr`'s block is still
        // USED at this point.
        unsafe { ptr::copy_nonoverlapping(ptr, new_ptr, old_size.min(new_size)) };
        // SAFETY: `ptr` is still the live allocation being replaced; `free`
        // will right-coalesce it with whatever is now adjacent.
        unsafe { self.free(ptr) };
        Some(new_ptr)
    }

    fn validate_heap(&self) -> bool {
        let Some(segment) = self.segment.as_ref() else {
            return true;
        };
        self.traverse_heap(segment)
            && self.traverse_free_list(segment, false)
            && self.traverse_free_list(segment, true)
    }
}
