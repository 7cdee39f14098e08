//! Mock segments for testing without a running simulator.
//!
//! Builders here lay out messages, entries and image packages exactly as the writer
//! does and place them in an anonymous mapping, so every reader stage can be exercised
//! in unit and integration tests. They are test fixtures, not a writer: there is no
//! lock handling and no double-buffer rotation.
//!
//! ```rust
//! use rdb_shm_reader::layout::flags;
//! use rdb_shm_reader::mock::{MockBuffer, MockEntry, MockImage, MockMessage, MockSegmentBuilder};
//!
//! let segment = MockSegmentBuilder::new()
//!     .buffer(
//!         MockBuffer::new(4096)
//!             .flags(flags::READY_TC)
//!             .message(MockMessage::new(1, 0.04).entry(MockEntry::image(MockImage::rgb8(
//!                 2,
//!                 2,
//!                 vec![0; 12],
//!             )))),
//!     )
//!     .build()
//!     .unwrap();
//! assert!(segment.size() > 4096);
//! ```

use crate::error::{ReaderError, ReaderResult};
use crate::layout::{buffer_info, entry_header, image, msg_header, pix_format, pkg_id, segment_header, MAGIC_NO};
use crate::shm::segment::SegmentHandle;

const MOCK_VERSION: u16 = 0x0119;

fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_ne_bytes());
}

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_ne_bytes());
}

fn align8(value: usize) -> usize {
    (value + 7) & !7
}

/// An image package.
#[derive(Debug, Clone, PartialEq)]
pub struct MockImage {
    width: u16,
    height: u16,
    pixel_format: u8,
    pixels: Vec<u8>,
}

impl MockImage {
    /// RGB8 image; `pixels` is written verbatim and sets `imgSize`.
    pub fn rgb8(width: u16, height: u16, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixel_format: pix_format::RGB8,
            pixels,
        }
    }

    /// Override the pixel format discriminator.
    pub fn pixel_format(mut self, format: u8) -> Self {
        self.pixel_format = format;
        self
    }

    /// Header followed by pixels.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; image::SIZE];
        put_u32(&mut bytes, image::ID, 1);
        put_u16(&mut bytes, image::WIDTH, self.width);
        put_u16(&mut bytes, image::HEIGHT, self.height);
        bytes[image::PIXEL_SIZE] = 24;
        bytes[image::PIXEL_FORMAT] = self.pixel_format;
        put_u32(&mut bytes, image::IMG_SIZE, self.pixels.len() as u32);
        bytes.extend_from_slice(&self.pixels);
        bytes
    }
}

/// A message entry.
#[derive(Debug, Clone, PartialEq)]
pub struct MockEntry {
    pkg_id: u16,
    element_size: u32,
    data: Vec<u8>,
    data_size: Option<u32>,
}

impl MockEntry {
    /// Entry with raw element bytes.
    pub fn new(pkg_id: u16, element_size: u32, data: Vec<u8>) -> Self {
        Self {
            pkg_id,
            element_size,
            data,
            data_size: None,
        }
    }

    /// Image entry; the element size is the bare image header, as the simulator declares it.
    pub fn image(img: MockImage) -> Self {
        Self::new(pkg_id::IMAGE, image::SIZE as u32, img.to_bytes())
    }

    /// Custom optix entry carrying an image.
    pub fn optix(img: MockImage) -> Self {
        Self::new(pkg_id::CUSTOM_OPTIX_START, image::SIZE as u32, img.to_bytes())
    }

    /// Empty start-of-frame marker.
    pub fn start_of_frame() -> Self {
        Self::new(pkg_id::START_OF_FRAME, 0, Vec::new())
    }

    /// Entry of a package kind the reader does not interpret.
    pub fn ignored(pkg_id: u16, element_size: u32, data: Vec<u8>) -> Self {
        Self::new(pkg_id, element_size, data)
    }

    /// Declare a `dataSize` different from the bytes actually written.
    pub fn data_size(mut self, declared: u32) -> Self {
        self.data_size = Some(declared);
        self
    }

    /// Header followed by data.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; entry_header::SIZE];
        put_u32(&mut bytes, entry_header::HEADER_SIZE, entry_header::SIZE as u32);
        put_u32(
            &mut bytes,
            entry_header::DATA_SIZE,
            self.data_size.unwrap_or(self.data.len() as u32),
        );
        put_u32(&mut bytes, entry_header::ELEMENT_SIZE, self.element_size);
        put_u16(&mut bytes, entry_header::PKG_ID, self.pkg_id);
        bytes.extend_from_slice(&self.data);
        bytes
    }
}

/// One message of a buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct MockMessage {
    frame_number: u32,
    simulation_time: f64,
    magic: u16,
    entries: Vec<MockEntry>,
    trailing: Vec<u8>,
    data_size: Option<u32>,
}

impl MockMessage {
    /// Empty message for `frame_number` at `simulation_time`.
    pub fn new(frame_number: u32, simulation_time: f64) -> Self {
        Self {
            frame_number,
            simulation_time,
            magic: MAGIC_NO,
            entries: Vec::new(),
            trailing: Vec::new(),
            data_size: None,
        }
    }

    /// Append an entry.
    pub fn entry(mut self, entry: MockEntry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Override the magic number.
    pub fn magic(mut self, magic: u16) -> Self {
        self.magic = magic;
        self
    }

    /// Append raw bytes after the entries; they count towards `dataSize`.
    pub fn trailing(mut self, bytes: Vec<u8>) -> Self {
        self.trailing = bytes;
        self
    }

    /// Declare a `dataSize` different from the bytes actually written.
    pub fn data_size(mut self, declared: u32) -> Self {
        self.data_size = Some(declared);
        self
    }

    /// Header followed by entries.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut payload: Vec<u8> = self.entries.iter().flat_map(MockEntry::to_bytes).collect();
        payload.extend_from_slice(&self.trailing);

        let mut bytes = vec![0u8; msg_header::SIZE];
        put_u16(&mut bytes, msg_header::MAGIC_NO, self.magic);
        put_u16(&mut bytes, msg_header::VERSION, MOCK_VERSION);
        put_u32(&mut bytes, msg_header::HEADER_SIZE, msg_header::SIZE as u32);
        put_u32(
            &mut bytes,
            msg_header::DATA_SIZE,
            self.data_size.unwrap_or(payload.len() as u32),
        );
        put_u32(&mut bytes, msg_header::FRAME_NO, self.frame_number);
        bytes[msg_header::SIM_TIME..msg_header::SIM_TIME + 8]
            .copy_from_slice(&self.simulation_time.to_ne_bytes());
        bytes.extend_from_slice(&payload);
        bytes
    }
}

/// One buffer slot.
#[derive(Debug, Clone, PartialEq)]
pub struct MockBuffer {
    capacity: usize,
    flags: u32,
    contents: Vec<u8>,
}

impl MockBuffer {
    /// Zeroed buffer of `capacity` bytes with no flags set.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            flags: 0,
            contents: Vec::new(),
        }
    }

    /// Initial flag bits.
    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    /// Append a message.
    pub fn message(mut self, message: MockMessage) -> Self {
        self.contents.extend_from_slice(&message.to_bytes());
        self
    }

    /// Append a minimal message for `frame_number` carrying a start-of-frame marker.
    pub fn frame(self, frame_number: u32) -> Self {
        self.message(MockMessage::new(frame_number, 0.0).entry(MockEntry::start_of_frame()))
    }

    /// Append raw bytes.
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.contents.extend_from_slice(bytes);
        self
    }
}

/// Lays out a complete segment.
#[derive(Debug, Clone)]
pub struct MockSegmentBuilder {
    descriptor_size: usize,
    buffers: Vec<MockBuffer>,
    capacity_overrides: Vec<(usize, u32)>,
}

impl Default for MockSegmentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSegmentBuilder {
    /// Segment without buffers.
    pub fn new() -> Self {
        Self {
            descriptor_size: buffer_info::SIZE,
            buffers: Vec::new(),
            capacity_overrides: Vec::new(),
        }
    }

    /// Declared descriptor stride; must be at least the descriptor layout size.
    pub fn descriptor_size(mut self, size: usize) -> Self {
        self.descriptor_size = size;
        self
    }

    /// Append a buffer slot.
    pub fn buffer(mut self, buffer: MockBuffer) -> Self {
        self.buffers.push(buffer);
        self
    }

    /// Declare a capacity for buffer `index` different from its real size.
    pub fn capacity_override(mut self, index: usize, capacity: u32) -> Self {
        self.capacity_overrides.push((index, capacity));
        self
    }

    /// Raw segment bytes.
    pub fn to_bytes(&self) -> ReaderResult<Vec<u8>> {
        if self.descriptor_size < buffer_info::SIZE {
            return Err(ReaderError::Configuration(format!(
                "mock descriptor size {} is below {}",
                self.descriptor_size,
                buffer_info::SIZE
            )));
        }

        let directory_end = segment_header::SIZE + self.buffers.len() * self.descriptor_size;
        let mut offsets = Vec::with_capacity(self.buffers.len());
        let mut end = align8(directory_end);
        for buffer in &self.buffers {
            if buffer.contents.len() > buffer.capacity {
                return Err(ReaderError::Configuration(format!(
                    "mock buffer holds {} bytes but has capacity {}",
                    buffer.contents.len(),
                    buffer.capacity
                )));
            }
            offsets.push(end);
            end = align8(end + buffer.capacity);
        }
        let total = end.max(64);

        let mut bytes = vec![0u8; total];
        put_u32(&mut bytes, segment_header::HEADER_SIZE, segment_header::SIZE as u32);
        put_u32(
            &mut bytes,
            segment_header::DATA_SIZE,
            (total - segment_header::SIZE) as u32,
        );
        bytes[segment_header::BUFFER_COUNT] = self.buffers.len() as u8;

        for (index, (buffer, offset)) in self.buffers.iter().zip(&offsets).enumerate() {
            let descriptor = segment_header::SIZE + index * self.descriptor_size;
            let capacity = self
                .capacity_overrides
                .iter()
                .rev()
                .find(|(i, _)| *i == index)
                .map_or(buffer.capacity as u32, |(_, c)| *c);

            put_u32(&mut bytes, descriptor + buffer_info::THIS_SIZE, self.descriptor_size as u32);
            put_u32(&mut bytes, descriptor + buffer_info::BUFFER_SIZE, capacity);
            put_u16(&mut bytes, descriptor + buffer_info::ID, index as u16);
            put_u32(&mut bytes, descriptor + buffer_info::FLAGS, buffer.flags);
            put_u32(&mut bytes, descriptor + buffer_info::OFFSET, *offset as u32);

            bytes[*offset..*offset + buffer.contents.len()].copy_from_slice(&buffer.contents);
        }

        Ok(bytes)
    }

    /// Place the segment in anonymous shared memory.
    pub fn build(&self) -> ReaderResult<SegmentHandle> {
        let bytes = self.to_bytes()?;
        let mut mmap = memmap2::MmapMut::map_anon(bytes.len()).map_err(ReaderError::Attach)?;
        mmap.copy_from_slice(&bytes);
        SegmentHandle::from_mmap(mmap, format!("mock {} bytes", bytes.len()))
    }
}
