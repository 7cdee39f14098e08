//! Fixed byte layout of the RDB shared memory segment.
//!
//! The external writer is the source of truth for these values; any change here breaks
//! interoperability. All multi-byte fields use the host's native byte order because the
//! segment never leaves the machine.
//!
//! ```text
//! segment:  [SegmentHeader][BufferDescriptor * n] ... [buffer 0] ... [buffer 1]
//! buffer:   [MessageHeader][EntryHeader][elements] [EntryHeader][elements] ... [MessageHeader] ...
//! image:    [ImagePackage header][imgSize pixel bytes]
//! ```

/// Default System V key of the segment.
pub const DEFAULT_SHM_KEY: u32 = 0x8130;

/// Magic number opening every message header.
pub const MAGIC_NO: u16 = 35712;

/// Most buffer slots a segment may carry.
pub const MAX_BUFFERS: usize = 2;

/// Buffer flag bits shared with the writer.
pub mod flags {
    /// Buffer is locked by a reader or writer.
    pub const LOCK: u32 = 0x0000_0001;
    /// Buffer holds a frame ready for the task control consumer.
    pub const READY_TC: u32 = 0x0000_0002;
    /// Buffer holds a frame ready for the image generator consumer.
    pub const READY_IG: u32 = 0x0000_0004;
}

/// Package identifiers carried in entry headers.
pub mod pkg_id {
    /// Start of a simulation frame.
    pub const START_OF_FRAME: u16 = 1;
    /// End of a simulation frame.
    pub const END_OF_FRAME: u16 = 2;
    /// Rendered camera image.
    pub const IMAGE: u16 = 22;
    /// First custom package of the optix sensor extension; image-shaped.
    pub const CUSTOM_OPTIX_START: u16 = 12100;
}

/// Pixel format discriminators of image packages.
pub mod pix_format {
    /// Interleaved RGB, 8 bits per channel.
    pub const RGB8: u8 = 0;
}

/// Segment header: `headerSize:u32`, `dataSize:u32`, `bufferCount:u8`, padded to 4 bytes.
pub mod segment_header {
    /// Minimum size of the header.
    pub const SIZE: usize = 12;
    /// Offset of `headerSize`.
    pub const HEADER_SIZE: usize = 0;
    /// Offset of `dataSize`.
    pub const DATA_SIZE: usize = 4;
    /// Offset of `bufferCount`.
    pub const BUFFER_COUNT: usize = 8;
}

/// Per-buffer descriptor.
pub mod buffer_info {
    /// Minimum size of a descriptor.
    pub const SIZE: usize = 36;
    /// Offset of `thisSize`, the stride to the next descriptor.
    pub const THIS_SIZE: usize = 0;
    /// Offset of `bufferSize`.
    pub const BUFFER_SIZE: usize = 4;
    /// Offset of `id`.
    pub const ID: usize = 8;
    /// Offset of `flags`.
    pub const FLAGS: usize = 12;
    /// Offset of `offset`, the buffer position within the segment.
    pub const OFFSET: usize = 16;
}

/// Message header.
pub mod msg_header {
    /// Minimum size of a message header.
    pub const SIZE: usize = 24;
    /// Offset of `magicNo`.
    pub const MAGIC_NO: usize = 0;
    /// Offset of `version`.
    pub const VERSION: usize = 2;
    /// Offset of `headerSize`.
    pub const HEADER_SIZE: usize = 4;
    /// Offset of `dataSize`.
    pub const DATA_SIZE: usize = 8;
    /// Offset of `frameNo`.
    pub const FRAME_NO: usize = 12;
    /// Offset of `simTime`.
    pub const SIM_TIME: usize = 16;
}

/// Entry header.
pub mod entry_header {
    /// Minimum size of an entry header.
    pub const SIZE: usize = 16;
    /// Offset of `headerSize`.
    pub const HEADER_SIZE: usize = 0;
    /// Offset of `dataSize`.
    pub const DATA_SIZE: usize = 4;
    /// Offset of `elementSize`.
    pub const ELEMENT_SIZE: usize = 8;
    /// Offset of `pkgId`.
    pub const PKG_ID: usize = 12;
    /// Offset of `flags`.
    pub const FLAGS: usize = 14;
}

/// Image package header; pixel bytes follow immediately.
pub mod image {
    /// Size of the header preceding the pixels.
    pub const SIZE: usize = 32;
    /// Offset of `id`.
    pub const ID: usize = 0;
    /// Offset of `width`.
    pub const WIDTH: usize = 4;
    /// Offset of `height`.
    pub const HEIGHT: usize = 6;
    /// Offset of `pixelSize` (bits).
    pub const PIXEL_SIZE: usize = 8;
    /// Offset of `pixelFormat`.
    pub const PIXEL_FORMAT: usize = 9;
    /// Offset of `cameraId`.
    pub const CAMERA_ID: usize = 10;
    /// Offset of `imgSize`.
    pub const IMG_SIZE: usize = 12;
    /// Offset of `color`.
    pub const COLOR: usize = 16;
}

// Flag words are accessed atomically, so they must land on 4-byte boundaries for the
// canonical packing.
const _: () = assert!((segment_header::SIZE + buffer_info::FLAGS) % 4 == 0);
const _: () = assert!(buffer_info::SIZE % 4 == 0);
