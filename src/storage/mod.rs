//! Output of extracted images.

pub mod image_writer;

pub use image_writer::{
    to_display_order, FileCodec, FrameTag, ImageCodec, ImageExtractor, ImageFileFormat,
};
