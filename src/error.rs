//! Custom error types for the reader.
//!
//! This module defines the primary error type, `ReaderError`, for the whole crate.
//! Using the `thiserror` crate, it gives one consistent way to report everything that
//! can go wrong between attaching to the segment and writing an image file.
//!
//! ## Error Hierarchy
//!
//! `ReaderError` falls into three groups, mirrored by the classification helpers:
//!
//! - **Retryable**: `SegmentUnavailable`, `Attach` and `BufferLocked`. The writer has not
//!   created the segment yet, or grabbed a buffer first; the loop sleeps and tries again.
//! - **Corruption**: `Truncated`, `BadMagic`, `EmptyMessage`, `SizeMismatch`,
//!   `DirectoryOutOfBounds`, `EmptyDirectory`, `TooManyBuffers`, `MisalignedFlags`,
//!   `UnsupportedPixelFormat` and `EmptyImage`. The current buffer or package is
//!   abandoned, flags are still released, and polling continues.
//! - **Environment**: `Io`, `Encode`, `Config` and `Configuration`. These come
//!   from the operating system, the image encoder or the configuration layer. An
//!   `Encode` failure costs only the package being written.
//!
//! By using `#[from]`, `ReaderError` can be created from the underlying error types with
//! the `?` operator.

use thiserror::Error;

/// Convenience alias for results using the reader error type.
pub type ReaderResult<T> = std::result::Result<T, ReaderError>;

/// Every failure the reader can report.
#[derive(Error, Debug)]
pub enum ReaderError {
    /// No segment exists for the key (or file) yet.
    #[error("No shared memory segment at {segment}: {source}")]
    SegmentUnavailable {
        /// Human readable segment location, e.g. `key 0x8130`.
        segment: String,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// The segment exists but could not be attached or inspected.
    #[error("Failed to attach shared memory segment: {0}")]
    Attach(std::io::Error),

    /// A read would run past the end of the region it targets.
    #[error("Truncated {what}: need {needed} bytes at offset {offset}, only {available} available")]
    Truncated {
        /// Structure that was being read.
        what: &'static str,
        /// Offset of the read within its region.
        offset: usize,
        /// Bytes required.
        needed: usize,
        /// Bytes left in the region.
        available: usize,
    },

    /// The segment header announces no buffers at all.
    #[error("Segment header announces zero buffers")]
    EmptyDirectory,

    /// The segment header announces more buffers than a double-buffered segment has.
    #[error("Segment header announces {0} buffers, at most 2 are supported")]
    TooManyBuffers(u8),

    /// A directory entry or a buffer it describes lies outside the segment.
    #[error("Buffer directory out of bounds: {what} at {offset}+{len} exceeds segment size {segment_size}")]
    DirectoryOutOfBounds {
        /// Part of the directory being checked.
        what: &'static str,
        /// Byte offset into the segment.
        offset: usize,
        /// Length of the checked range.
        len: usize,
        /// Total size of the segment.
        segment_size: usize,
    },

    /// The selected buffer was locked between selection and locking.
    #[error("Buffer {0} is locked by another party")]
    BufferLocked(usize),

    /// A buffer flag word is not 4-byte aligned and cannot be accessed atomically.
    #[error("Buffer flag word at offset {0} is not 4-byte aligned")]
    MisalignedFlags(usize),

    /// The first message of a buffer does not start with the magic number.
    #[error("Invalid message magic number 0x{found:04x}")]
    BadMagic {
        /// Value found in place of the magic number.
        found: u16,
    },

    /// A message declares no payload.
    #[error("Zero message data size in frame {frame}")]
    EmptyMessage {
        /// Frame number of the offending message.
        frame: u32,
    },

    /// Entry sizes do not add up to the size their container declares.
    #[error("Size mismatch in {what}: declared {declared} bytes, entries need {required}")]
    SizeMismatch {
        /// Container whose size was violated.
        what: &'static str,
        /// Size the container declares.
        declared: usize,
        /// Size the entries actually require.
        required: usize,
    },

    /// An image package uses a pixel format other than interleaved 8-bit RGB.
    #[error("Unsupported pixel format {0}, only RGB8 can be written")]
    UnsupportedPixelFormat(u8),

    /// An image package declares no rows or no columns.
    #[error("Image package has no pixels: {width}x{height}")]
    EmptyImage {
        /// Declared width.
        width: u16,
        /// Declared height.
        height: u16,
    },

    /// File system failure while writing output.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The image encoder rejected the pixel data.
    #[error("Image encoding error: {0}")]
    Encode(#[from] image::ImageError),

    /// Configuration could not be loaded or parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration parsed but holds invalid values.
    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl From<figment::Error> for ReaderError {
    fn from(value: figment::Error) -> Self {
        ReaderError::Config(Box::new(value))
    }
}

impl ReaderError {
    /// Whether the poll loop should simply try again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReaderError::SegmentUnavailable { .. }
                | ReaderError::Attach(_)
                | ReaderError::BufferLocked(_)
        )
    }

    /// Whether the error means the shared data itself is malformed.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            ReaderError::Truncated { .. }
                | ReaderError::EmptyDirectory
                | ReaderError::TooManyBuffers(_)
                | ReaderError::DirectoryOutOfBounds { .. }
                | ReaderError::MisalignedFlags(_)
                | ReaderError::BadMagic { .. }
                | ReaderError::EmptyMessage { .. }
                | ReaderError::SizeMismatch { .. }
                | ReaderError::UnsupportedPixelFormat(_)
                | ReaderError::EmptyImage { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_unavailable_segment_as_retryable() {
        let err = ReaderError::SegmentUnavailable {
            segment: "key 0x8130".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(err.is_retryable());
        assert!(!err.is_corruption());
        assert!(err.to_string().contains("0x8130"));
    }

    #[test]
    fn classifies_layout_errors_as_corruption() {
        let errors = [
            ReaderError::BadMagic { found: 0x1234 },
            ReaderError::EmptyMessage { frame: 7 },
            ReaderError::EmptyDirectory,
            ReaderError::UnsupportedPixelFormat(3),
            ReaderError::EmptyImage { width: 0, height: 4 },
            ReaderError::SizeMismatch {
                what: "message",
                declared: 10,
                required: 20,
            },
        ];
        for err in errors {
            assert!(err.is_corruption(), "{err} should be corruption");
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn io_errors_are_neither_retryable_nor_corruption() {
        let err: ReaderError = std::io::Error::other("disk full").into();
        assert!(!err.is_retryable());
        assert!(!err.is_corruption());
        assert!(err.to_string().contains("disk full"));
    }
}
