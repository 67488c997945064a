//! Raw pointer primitives shared by both allocators.
//!
//! Neither allocator touches a header's bytes directly; every read or write
//! goes through the small typed interface below, and every walk from one
//! block to the next goes through [`BlockIter`]. This keeps the unsafe
//! boundary small: a reader only has to trust these functions once, instead
//! of re-deriving pointer arithmetic at every call site.

use crate::header::{Header, HEADER_LEN};
use core::ptr::NonNull;

/// Read the header word at `header`.
///
/// # Safety
/// `header` must point to a live, initialized header within a segment this
/// allocator owns, and must be valid for an 8-byte unaligned read.
pub(crate) unsafe fn read_header(header: NonNull<u8>) -> Header {
    // SAFETY: forwarded from the caller's contract; the read is unaligned so
    // no alignment precondition is placed on `header` beyond being in-bounds.
    unsafe { Header::from_raw(header.as_ptr().cast::<u64>().read_unaligned()) }
}

/// Overwrite the header word at `header`.
///
/// # Safety
/// Same as [`read_header`], but for a write.
pub(crate) unsafe fn write_header(header: NonNull<u8>, value: Header) {
    // SAFETY: forwarded from the caller's contract.
    unsafe {
        header
            .as_ptr()
            .cast::<u64>()
            .write_unaligned(value.raw());
    }
}

/// The payload pointer for a block whose header starts at `header`.
pub(crate) fn payload_of(header: NonNull<u8>) -> NonNull<u8> {
    // SAFETY: `header + HEADER_LEN` stays within the same allocation as long
    // as the block has a payload, which every block does (min size > 0).
    unsafe { NonNull::new_unchecked(header.as_ptr().add(HEADER_LEN)) }
}

/// The header pointer for a block whose payload starts at `payload`.
///
/// # Safety
/// `payload` must be the payload pointer of a real block, i.e. there must be
/// a valid header exactly `HEADER_LEN` bytes before it.
pub(crate) unsafe fn header_of(payload: NonNull<u8>) -> NonNull<u8> {
    // SAFETY: forwarded from the caller's contract.
    unsafe { NonNull::new_unchecked(payload.as_ptr().sub(HEADER_LEN)) }
}

/// The header pointer of the block immediately following the one whose
/// header is `header` and whose payload size is `size`.
///
/// This may point past `segment_end` if `header`'s block is the last one;
/// callers are responsible for bounds-checking the result before reading it.
pub(crate) fn next_header(header: NonNull<u8>, size: usize) -> *mut u8 {
    header.as_ptr().wrapping_add(HEADER_LEN + size)
}

/// Walks every block header in `[start, end)`, assuming the segment tiles
/// exactly (invariant I1).
///
/// Used by both allocators' validators and by the implicit allocator's
/// first-fit search.
pub(crate) struct BlockIter {
    cursor: *mut u8,
    end: NonNull<u8>,
}

impl BlockIter {
    /// # Safety
    /// `[start, end)` must be a validly tiled segment (I1-I3).
    pub(crate) unsafe fn new(start: NonNull<u8>, end: NonNull<u8>) -> Self {
        Self {
            cursor: start.as_ptr(),
            end,
        }
    }

    /// The cursor's current address, useful for asserting it lands exactly
    /// on `segment_end` once iteration is exhausted.
    pub(crate) fn cursor(&self) -> *mut u8 {
        self.cursor
    }
}

impl Iterator for BlockIter {
    type Item = NonNull<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.end.as_ptr() {
            return None;
        }
        // SAFETY: the segment tiles exactly (I1), so every `cursor` value
        // produced here (starting at `start`) addresses a real header, as
        // long as the caller upheld `BlockIter::new`'s contract.
        let header = unsafe { NonNull::new_unchecked(self.cursor) };
        let size = unsafe { read_header(header).size() };
        self.cursor = next_header(header, size);
        Some(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Status;

    #[test]
    fn header_roundtrip_through_raw_pointer() {
        let mut buf = [0u8; 8];
        let ptr = NonNull::new(buf.as_mut_ptr()).unwrap();
        let h = Header::pack(32, Status::Free);
        unsafe { write_header(ptr, h) };
        assert_eq!(unsafe { read_header(ptr) }, h);
    }

    #[test]
    fn payload_and_header_are_inverses() {
        let mut buf = [0u8; 16];
        let header = NonNull::new(buf.as_mut_ptr()).unwrap();
        let payload = payload_of(header);
        assert_eq!(unsafe { header_of(payload) }, header);
    }

    #[test]
    fn block_iter_visits_every_block_and_reaches_end() {
        // layout: [used 8][free 8] inside a 32-byte buffer (two 8-byte
        // headers + 16 bytes of payload total).
        let mut buf = [0u8; 32];
        let start = NonNull::new(buf.as_mut_ptr()).unwrap();
        unsafe { write_header(start, Header::pack(8, Status::Used)) };
        let second = NonNull::new(next_header(start, 8)).unwrap();
        unsafe { write_header(second, Header::pack(8, Status::Free)) };

        let end = NonNull::new(buf.as_mut_ptr().wrapping_add(32)).unwrap();
        let mut iter = unsafe { BlockIter::new(start, end) };
        assert_eq!(iter.next(), Some(start));
        assert_eq!(iter.next(), Some(second));
        assert_eq!(iter.next(), None);
        assert_eq!(iter.cursor(), end.as_ptr());
    }
}
