//! Cooperative lock and ready handshake over the buffer flag words.
//!
//! The writer marks a finished buffer by setting one or more "ready" bits (the check
//! mask). The reader picks an eligible buffer, sets the lock bit before touching any of
//! its bytes, and clears both the lock bit and the check mask when done. This is not a
//! hardware-enforced lock: it relies on the writer skipping locked buffers and on this
//! reader being the only reader.
//!
//! [`BufferLease`] ties the lock to a value so it is released on every exit path,
//! including early returns on corrupted data.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{ReaderError, ReaderResult};
use crate::layout::flags;
use crate::shm::directory::BufferDescriptor;
use crate::shm::segment::SegmentHandle;

/// Result of looking for a readable buffer. Only `Selected` carries work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Buffer at this directory index should be read.
    Selected(usize),
    /// No buffer is ready right now.
    NoNewFrame,
    /// No buffer is ready and every buffer still has frame number zero.
    NotStarted,
}

/// Whether a buffer with `flag_bits` may be read for `check_mask`.
///
/// A zero mask accepts any unlocked buffer.
pub fn is_eligible(flag_bits: u32, check_mask: u32) -> bool {
    let ready = check_mask == 0 || flag_bits & check_mask != 0;
    ready && flag_bits & flags::LOCK == 0
}

/// Snapshot of one slot used for selection and verbose dumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferState {
    /// Directory index.
    pub index: usize,
    /// Flag bits at the time of the snapshot.
    pub flags: u32,
    /// Frame number of the first message.
    pub frame_number: u32,
}

impl BufferState {
    /// Capture the state of `descriptor`.
    pub fn capture(segment: &SegmentHandle, descriptor: &BufferDescriptor) -> ReaderResult<Self> {
        Ok(Self {
            index: descriptor.index,
            flags: descriptor.flags(segment)?,
            frame_number: descriptor.frame_number(segment)?,
        })
    }

    /// Whether the lock bit is set.
    pub fn locked(&self) -> bool {
        self.flags & flags::LOCK != 0
    }

    /// Whether any check mask bit is set.
    pub fn ready(&self, check_mask: u32) -> bool {
        self.flags & check_mask != 0
    }
}

/// Choose the buffer to read from pre-captured states.
///
/// Among eligible buffers the one with the highest frame number wins; ties keep
/// directory order, so a single-buffer segment always selects slot 0. With `forced`
/// set, only that slot is considered.
pub fn choose(states: &[BufferState], check_mask: u32, forced: Option<usize>) -> Selection {
    let chosen = states
        .iter()
        .filter(|state| forced.map_or(true, |index| state.index == index))
        .filter(|state| is_eligible(state.flags, check_mask))
        .fold(None::<&BufferState>, |best, state| match best {
            Some(best) if best.frame_number >= state.frame_number => Some(best),
            _ => Some(state),
        });

    match chosen {
        Some(state) => Selection::Selected(state.index),
        None if states.iter().all(|state| state.frame_number == 0) => Selection::NotStarted,
        None => Selection::NoNewFrame,
    }
}

/// Inspect every descriptor and choose the buffer to read.
pub fn select_readable_buffer(
    segment: &SegmentHandle,
    descriptors: &[BufferDescriptor],
    check_mask: u32,
    forced: Option<usize>,
) -> ReaderResult<Selection> {
    let states = descriptors
        .iter()
        .map(|descriptor| BufferState::capture(segment, descriptor))
        .collect::<ReaderResult<Vec<_>>>()?;
    Ok(choose(&states, check_mask, forced))
}

/// Exclusive access to one buffer, held from lock to release.
///
/// Dropping the lease clears the check mask bits and the lock bit exactly once.
pub struct BufferLease<'a> {
    segment: &'a SegmentHandle,
    descriptor: BufferDescriptor,
    flag_word: &'a AtomicU32,
    check_mask: u32,
}

impl std::fmt::Debug for BufferLease<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferLease")
            .field("buffer", &self.descriptor.index)
            .field("flags", &self.flag_word.load(Ordering::Relaxed))
            .field("check_mask", &self.check_mask)
            .finish()
    }
}

impl<'a> BufferLease<'a> {
    /// Set the lock bit on `descriptor`.
    ///
    /// Fails without locking if the buffer became locked since selection.
    pub fn acquire(
        segment: &'a SegmentHandle,
        descriptor: BufferDescriptor,
        check_mask: u32,
    ) -> ReaderResult<Self> {
        let flag_word = segment.flag_word(descriptor.flags_offset())?;
        let previous = flag_word.fetch_or(flags::LOCK, Ordering::AcqRel);
        if previous & flags::LOCK != 0 {
            return Err(ReaderError::BufferLocked(descriptor.index));
        }

        tracing::trace!(buffer = descriptor.index, flags = previous, "Locked buffer");
        Ok(Self {
            segment,
            descriptor,
            flag_word,
            check_mask,
        })
    }

    /// Descriptor of the leased buffer.
    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }

    /// The buffer's bytes, stable while the lease is alive.
    pub fn bytes(&self) -> ReaderResult<&'a [u8]> {
        self.segment
            .locked_bytes(self.descriptor.byte_offset, self.descriptor.byte_capacity)
    }

    /// Release explicitly; equivalent to dropping the lease.
    pub fn release(self) {}
}

impl Drop for BufferLease<'_> {
    fn drop(&mut self) {
        let cleared = self.check_mask | flags::LOCK;
        let previous = self.flag_word.fetch_and(!cleared, Ordering::AcqRel);
        tracing::trace!(
            buffer = self.descriptor.index,
            flags = previous & !cleared,
            "Released buffer"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBuffer, MockSegmentBuilder};
    use crate::shm::directory::list_buffers;

    fn state(index: usize, flags: u32, frame_number: u32) -> BufferState {
        BufferState {
            index,
            flags,
            frame_number,
        }
    }

    #[test]
    fn eligibility_rules() {
        assert!(is_eligible(flags::READY_TC, flags::READY_TC));
        assert!(is_eligible(0, 0));
        assert!(!is_eligible(0, flags::READY_TC));
        assert!(!is_eligible(flags::READY_IG, flags::READY_TC));
        assert!(!is_eligible(flags::READY_TC | flags::LOCK, flags::READY_TC));
        assert!(!is_eligible(flags::LOCK, 0));
    }

    #[test]
    fn prefers_newest_frame_among_eligible_buffers() {
        let states = [
            state(0, flags::READY_TC, 10),
            state(1, flags::READY_TC, 11),
        ];
        assert_eq!(choose(&states, flags::READY_TC, None), Selection::Selected(1));

        let states = [
            state(0, flags::READY_TC, 12),
            state(1, flags::READY_TC, 11),
        ];
        assert_eq!(choose(&states, flags::READY_TC, None), Selection::Selected(0));
    }

    #[test]
    fn equal_frames_keep_directory_order() {
        let states = [state(0, 0, 5), state(1, 0, 5)];
        assert_eq!(choose(&states, 0, None), Selection::Selected(0));
    }

    #[test]
    fn forced_buffer_restricts_choice() {
        let states = [
            state(0, flags::READY_TC, 10),
            state(1, flags::READY_TC, 9),
        ];
        assert_eq!(choose(&states, flags::READY_TC, Some(1)), Selection::Selected(1));

        let states = [state(0, flags::READY_TC, 10), state(1, 0, 9)];
        assert_eq!(choose(&states, flags::READY_TC, Some(1)), Selection::NoNewFrame);
    }

    #[test]
    fn unset_mask_bits_are_never_selected() {
        let states = [state(0, 0, 4), state(1, flags::READY_IG, 5)];
        assert_eq!(choose(&states, flags::READY_TC, None), Selection::NoNewFrame);
    }

    #[test]
    fn reports_not_started_when_all_frames_are_zero() {
        let states = [state(0, 0, 0), state(1, flags::LOCK, 0)];
        assert_eq!(choose(&states, flags::READY_TC, None), Selection::NotStarted);
    }

    #[test]
    fn lease_locks_then_clears_lock_and_mask() {
        let segment = MockSegmentBuilder::new()
            .buffer(MockBuffer::new(64).flags(flags::READY_TC | flags::READY_IG).frame(1))
            .build()
            .unwrap();
        let descriptor = list_buffers(&segment).unwrap()[0];

        let lease = BufferLease::acquire(&segment, descriptor, flags::READY_TC).unwrap();
        assert_eq!(
            descriptor.flags(&segment).unwrap(),
            flags::READY_TC | flags::READY_IG | flags::LOCK
        );
        assert_eq!(lease.bytes().unwrap().len(), 64);

        lease.release();
        // Only the checked mask and the lock are cleared; other consumers keep their bit.
        assert_eq!(descriptor.flags(&segment).unwrap(), flags::READY_IG);
    }

    #[test]
    fn refuses_to_lock_a_locked_buffer() {
        let segment = MockSegmentBuilder::new()
            .buffer(MockBuffer::new(64).flags(flags::LOCK | flags::READY_TC))
            .build()
            .unwrap();
        let descriptor = list_buffers(&segment).unwrap()[0];

        let err = BufferLease::acquire(&segment, descriptor, flags::READY_TC).unwrap_err();
        assert!(matches!(err, ReaderError::BufferLocked(0)));
        // The writer's lock must survive the failed attempt.
        assert_eq!(
            descriptor.flags(&segment).unwrap(),
            flags::LOCK | flags::READY_TC
        );
    }

    #[test]
    fn select_reads_live_flags() {
        let segment = MockSegmentBuilder::new()
            .buffer(MockBuffer::new(64).flags(flags::READY_TC).frame(7))
            .build()
            .unwrap();
        let descriptors = list_buffers(&segment).unwrap();

        assert_eq!(
            select_readable_buffer(&segment, &descriptors, flags::READY_TC, None).unwrap(),
            Selection::Selected(0)
        );
        assert_eq!(
            select_readable_buffer(&segment, &descriptors, flags::READY_IG, None).unwrap(),
            Selection::NoNewFrame
        );
    }
}
