//! Buffer directory at the start of the segment.
//!
//! The segment header announces how many buffers follow and where the first
//! descriptor starts. Each descriptor declares its own size, which is the stride to
//! the next one; nothing assumes a fixed record size.

use std::sync::atomic::Ordering;

use crate::cursor::ByteCursor;
use crate::error::{ReaderError, ReaderResult};
use crate::layout::{buffer_info, msg_header, segment_header, MAX_BUFFERS};
use crate::shm::segment::SegmentHandle;

/// Leading header of the segment. Never written by the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Offset of the first buffer descriptor.
    pub header_size: usize,
    /// Size of the data following the header, as declared by the writer.
    pub data_size: usize,
    /// Number of buffer slots.
    pub buffer_count: u8,
}

impl SegmentHeader {
    /// Read the header from the start of the segment.
    pub fn read(segment: &SegmentHandle) -> ReaderResult<Self> {
        let raw = segment.copy_out("segment header", 0, segment_header::SIZE)?;
        let cursor = ByteCursor::new(&raw, "segment header");
        Ok(Self {
            header_size: cursor.usize32(segment_header::HEADER_SIZE)?,
            data_size: cursor.usize32(segment_header::DATA_SIZE)?,
            buffer_count: cursor.u8(segment_header::BUFFER_COUNT)?,
        })
    }
}

/// Metadata for one buffer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDescriptor {
    /// Slot index in directory order.
    pub index: usize,
    /// Writer-assigned buffer id.
    pub id: u16,
    /// Offset of this descriptor within the segment.
    pub descriptor_offset: usize,
    /// Declared size of this descriptor (stride to the next one).
    pub descriptor_size: usize,
    /// Offset of the buffer's data within the segment.
    pub byte_offset: usize,
    /// Capacity of the buffer in bytes.
    pub byte_capacity: usize,
}

impl BufferDescriptor {
    /// Offset of the mutable flag word within the segment.
    pub fn flags_offset(&self) -> usize {
        self.descriptor_offset + buffer_info::FLAGS
    }

    /// Current flag bits, loaded with `Acquire` ordering.
    pub fn flags(&self, segment: &SegmentHandle) -> ReaderResult<u32> {
        Ok(segment.flag_word(self.flags_offset())?.load(Ordering::Acquire))
    }

    /// Frame number of the first message in the buffer.
    ///
    /// Zero means the writer has not produced a frame into this slot yet.
    pub fn frame_number(&self, segment: &SegmentHandle) -> ReaderResult<u32> {
        if self.byte_capacity < msg_header::SIZE {
            return Ok(0);
        }
        let raw = segment.copy_out("message header", self.byte_offset, msg_header::SIZE)?;
        ByteCursor::new(&raw, "message header").u32(msg_header::FRAME_NO)
    }
}

/// Walk the directory and return one descriptor per buffer slot.
///
/// Fails if the header announces no buffers (or more than [`MAX_BUFFERS`]), if a
/// descriptor declares a stride smaller than the descriptor layout, or if any
/// descriptor or buffer would extend past the end of the segment.
pub fn list_buffers(segment: &SegmentHandle) -> ReaderResult<Vec<BufferDescriptor>> {
    let header = SegmentHeader::read(segment)?;
    let segment_size = segment.size();

    match header.buffer_count as usize {
        0 => return Err(ReaderError::EmptyDirectory),
        n if n > MAX_BUFFERS => return Err(ReaderError::TooManyBuffers(header.buffer_count)),
        _ => {}
    }

    let out_of_bounds = |what: &'static str, offset: usize, len: usize| {
        ReaderError::DirectoryOutOfBounds {
            what,
            offset,
            len,
            segment_size,
        }
    };

    let mut descriptors = Vec::with_capacity(header.buffer_count as usize);
    let mut offset = header.header_size;

    for index in 0..header.buffer_count as usize {
        if offset
            .checked_add(buffer_info::SIZE)
            .map_or(true, |end| end > segment_size)
        {
            return Err(out_of_bounds("buffer descriptor", offset, buffer_info::SIZE));
        }

        let raw = segment.copy_out("buffer descriptor", offset, buffer_info::SIZE)?;
        let cursor = ByteCursor::new(&raw, "buffer descriptor");
        let descriptor = BufferDescriptor {
            index,
            id: cursor.u16(buffer_info::ID)?,
            descriptor_offset: offset,
            descriptor_size: cursor.usize32(buffer_info::THIS_SIZE)?,
            byte_offset: cursor.usize32(buffer_info::OFFSET)?,
            byte_capacity: cursor.usize32(buffer_info::BUFFER_SIZE)?,
        };

        if descriptor.descriptor_size < buffer_info::SIZE {
            return Err(ReaderError::SizeMismatch {
                what: "buffer descriptor",
                declared: descriptor.descriptor_size,
                required: buffer_info::SIZE,
            });
        }

        if descriptor
            .byte_offset
            .checked_add(descriptor.byte_capacity)
            .map_or(true, |end| end > segment_size)
        {
            return Err(out_of_bounds(
                "buffer",
                descriptor.byte_offset,
                descriptor.byte_capacity,
            ));
        }

        offset = offset
            .checked_add(descriptor.descriptor_size)
            .ok_or_else(|| out_of_bounds("buffer descriptor", offset, descriptor.descriptor_size))?;
        descriptors.push(descriptor);
    }

    Ok(descriptors)
}
