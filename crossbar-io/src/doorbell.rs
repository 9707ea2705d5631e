use std::mem;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DoorbellError {
    #[error("Doorbell offset {0} is not word-aligned")]
    Misaligned(usize),
    #[error("Doorbell word at offset {offset} does not fit in a {len}-byte region")]
    OutOfBounds { offset: usize, len: usize },
}

/// Typed, bounds-checked view of one 32-bit doorbell word inside a mapped
/// control region.
///
/// The producer side stores nonzero to signal; the dispatch side swaps the
/// word back to zero to claim the event. Both operations are lock-free and
/// allocation-free, safe to call from the host's event-dispatch context.
///
/// The view is only valid while the underlying mapping is alive; the
/// lifecycle manager guarantees this by disengaging every view from the line
/// table before it unmaps region 0.
#[derive(Debug)]
pub struct Doorbell {
    word: NonNull<AtomicU32>,
}

// SAFETY: All access goes through a single AtomicU32; validity of the pointer
// is the lifecycle invariant documented above.
unsafe impl Send for Doorbell {}
unsafe impl Sync for Doorbell {}

impl Doorbell {
    /// Builds a view of the word at `offset` inside the `len`-byte window at
    /// `base`.
    ///
    /// # Errors
    /// Rejects offsets that are not 4-byte aligned or whose word would extend
    /// past the window. Register content past this word is never touched.
    pub fn new(base: *mut u8, len: usize, offset: usize) -> Result<Self, DoorbellError> {
        if offset % mem::align_of::<AtomicU32>() != 0 {
            return Err(DoorbellError::Misaligned(offset));
        }
        match offset.checked_add(mem::size_of::<AtomicU32>()) {
            Some(end) if end <= len => {}
            _ => return Err(DoorbellError::OutOfBounds { offset, len }),
        }

        // SAFETY: base is the non-null, page-aligned start of a live mapping
        // and offset was bounds- and alignment-checked above.
        let word = unsafe { NonNull::new_unchecked(base.add(offset) as *mut AtomicU32) };
        Ok(Self { word })
    }

    fn word(&self) -> &AtomicU32 {
        // SAFETY: construction validated the pointer; the mapping outlives
        // the view per the lifecycle invariant.
        unsafe { self.word.as_ref() }
    }

    /// Producer side: store nonzero, fire and forget.
    pub fn ring(&self) {
        self.word().store(1, Ordering::Release);
    }

    /// Dispatch side: claim a pending event, if any.
    ///
    /// Atomically resets the word to zero and reports whether it was nonzero.
    /// Repeated rings before a claim collapse into one `true`.
    pub fn poll_and_clear(&self) -> bool {
        self.word().swap(0, Ordering::AcqRel) != 0
    }

    /// Reads the word without claiming it.
    pub fn peek(&self) -> u32 {
        self.word().load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_and_claim_coalesce() {
        let mut backing = [0u8; 64];
        let bell = Doorbell::new(backing.as_mut_ptr(), backing.len(), 0).unwrap();

        assert!(!bell.poll_and_clear());
        bell.ring();
        bell.ring();
        assert_eq!(bell.peek(), 1);
        assert!(bell.poll_and_clear());
        assert!(!bell.poll_and_clear());
        assert_eq!(bell.peek(), 0);
    }

    #[test]
    fn test_rejects_bad_offsets() {
        let mut backing = [0u8; 8];
        let base = backing.as_mut_ptr();
        assert_eq!(
            Doorbell::new(base, 8, 2).unwrap_err(),
            DoorbellError::Misaligned(2)
        );
        assert_eq!(
            Doorbell::new(base, 8, 8).unwrap_err(),
            DoorbellError::OutOfBounds { offset: 8, len: 8 }
        );
        // Word end past usize::MAX is out of bounds, not a wrapped low address.
        assert_eq!(
            Doorbell::new(base, 8, usize::MAX - 3).unwrap_err(),
            DoorbellError::OutOfBounds {
                offset: usize::MAX - 3,
                len: 8
            }
        );
        assert!(Doorbell::new(base, 8, 4).is_ok());
    }
}
