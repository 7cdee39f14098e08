//! Image export for extracted camera frames.
//!
//! The writer delivers interleaved 8-bit pixels bottom row first. Before encoding, the
//! red and blue channels are exchanged and the row order is reversed so the file shows
//! the image upright. Output is PNG by default, TIFF on request.
//!
//! # Usage
//!
//! ```rust,ignore
//! use rdb_shm_reader::storage::{FileCodec, FrameTag, ImageExtractor, ImageFileFormat};
//!
//! let extractor = ImageExtractor::new("frames", FileCodec::new(ImageFileFormat::Png));
//! let tag = FrameTag { frame_number: 12, simulation_time: 0.4, counter: 1 };
//! extractor.extract(&image_package, &tag)?;
//! ```

use image::codecs::png::PngEncoder;
use image::codecs::tiff::TiffEncoder;
use image::{ExtendedColorType, ImageBuffer, ImageEncoder, RgbImage};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::error::{ReaderError, ReaderResult};
use crate::rdb::image::ImagePackage;

/// File format of written images.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ImageFileFormat {
    /// Portable Network Graphics.
    #[default]
    Png,
    /// Tagged Image File Format.
    Tiff,
}

impl ImageFileFormat {
    /// File extension without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            ImageFileFormat::Png => "png",
            ImageFileFormat::Tiff => "tiff",
        }
    }
}

/// Converts raw RGB8 pixels into an image file.
pub trait ImageCodec {
    /// Extension of the files this codec writes.
    fn file_extension(&self) -> &'static str;

    /// Swap red and blue, flip vertically and encode `raw` (`height` rows of `width`
    /// pixels, 3 bytes each, bottom row first) to `path`.
    fn write_rgb8(&self, raw: &[u8], width: u32, height: u32, path: &Path) -> ReaderResult<()>;
}

/// Reorder raw writer pixels into an upright image with swapped red and blue.
pub fn to_display_order(raw: &[u8], width: u32, height: u32) -> ReaderResult<RgbImage> {
    let mut img: RgbImage = ImageBuffer::from_raw(width, height, raw.to_vec()).ok_or_else(|| {
        ReaderError::SizeMismatch {
            what: "image buffer",
            declared: raw.len(),
            required: width as usize * height as usize * 3,
        }
    })?;

    for pixel in img.pixels_mut() {
        pixel.0.swap(0, 2);
    }
    image::imageops::flip_vertical_in_place(&mut img);
    Ok(img)
}

/// Codec backed by the `image` crate encoders.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileCodec {
    format: ImageFileFormat,
}

impl FileCodec {
    /// Codec writing `format` files.
    pub fn new(format: ImageFileFormat) -> Self {
        Self { format }
    }
}

impl ImageCodec for FileCodec {
    fn file_extension(&self) -> &'static str {
        self.format.extension()
    }

    fn write_rgb8(&self, raw: &[u8], width: u32, height: u32, path: &Path) -> ReaderResult<()> {
        let img = to_display_order(raw, width, height)?;

        let file = File::create(path)?;
        let writer = BufWriter::new(file);

        match self.format {
            ImageFileFormat::Png => PngEncoder::new(writer).write_image(
                img.as_raw(),
                width,
                height,
                ExtendedColorType::Rgb8,
            )?,
            ImageFileFormat::Tiff => TiffEncoder::new(writer).write_image(
                img.as_raw(),
                width,
                height,
                ExtendedColorType::Rgb8,
            )?,
        }

        tracing::debug!(
            path = ?path,
            dimensions = format!("{}x{}", width, height),
            format = self.format.extension(),
            "Wrote image"
        );
        Ok(())
    }
}

/// Identifies an image within the simulation run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTag {
    /// Frame number of the originating message.
    pub frame_number: u32,
    /// Simulation time of the originating message.
    pub simulation_time: f64,
    /// Position of the image within its message, starting at 1.
    pub counter: u32,
}

impl FrameTag {
    /// File name without extension, unique per image of a run.
    ///
    /// The time is written in its shortest exact decimal form, so `1.2345678` stays
    /// `1.2345678` and `0.0` becomes `0`.
    pub fn file_stem(&self) -> String {
        format!(
            "image_frame_{}_time_{}_{}",
            self.frame_number, self.simulation_time, self.counter
        )
    }
}

/// Validates image packages and writes them through a codec.
#[derive(Debug, Clone)]
pub struct ImageExtractor<C = FileCodec> {
    output_dir: PathBuf,
    codec: C,
}

impl<C: ImageCodec> ImageExtractor<C> {
    /// Write files into `output_dir` using `codec`.
    pub fn new(output_dir: impl Into<PathBuf>, codec: C) -> Self {
        Self {
            output_dir: output_dir.into(),
            codec,
        }
    }

    /// Directory receiving the files.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Codec used for encoding.
    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Path the image identified by `tag` is written to.
    pub fn path_for(&self, tag: &FrameTag) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", tag.file_stem(), self.codec.file_extension()))
    }

    /// Write `image` to a file named after `tag`.
    ///
    /// Returns `Ok(None)` when the pixel format is not RGB8; the package is discarded
    /// without failing the buffer.
    pub fn extract(&self, image: &ImagePackage<'_>, tag: &FrameTag) -> ReaderResult<Option<PathBuf>> {
        tracing::debug!(
            frame = tag.frame_number,
            sim_time = tag.simulation_time,
            counter = tag.counter,
            width = image.width,
            height = image.height,
            image_size = image.image_size,
            pixel_format = image.pixel_format,
            "Image package"
        );

        let pixels = match image.rgb8_pixels() {
            Ok(pixels) => pixels,
            Err(ReaderError::UnsupportedPixelFormat(format)) => {
                tracing::warn!(
                    frame = tag.frame_number,
                    pixel_format = format,
                    "Only RGB8 images can be written, discarding package"
                );
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let path = self.path_for(tag);
        self.codec
            .write_rgb8(pixels, image.width.into(), image.height.into(), &path)?;
        Ok(Some(path))
    }
}
