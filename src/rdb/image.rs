//! Image package: a fixed header followed by raw pixel bytes.

use crate::cursor::ByteCursor;
use crate::error::{ReaderError, ReaderResult};
use crate::layout::{image, pix_format};

/// Bytes per pixel of interleaved 8-bit RGB.
pub const RGB8_BYTES_PER_PIXEL: usize = 3;

/// A rendered image borrowed from a locked buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImagePackage<'a> {
    /// Writer-assigned image id.
    pub id: u32,
    /// Width in pixels.
    pub width: u16,
    /// Height in pixels.
    pub height: u16,
    /// Bits per pixel as declared by the writer.
    pub pixel_size: u8,
    /// Pixel format discriminator.
    pub pixel_format: u8,
    /// Camera that rendered the image.
    pub camera_id: u16,
    /// Declared number of pixel bytes.
    pub image_size: usize,
    /// Clear color.
    pub color: [u8; 4],
    /// Exactly `image_size` bytes following the header.
    pub pixels: &'a [u8],
}

impl<'a> ImagePackage<'a> {
    /// Parse an image package at the start of `bytes`.
    ///
    /// `bytes` may extend beyond the package; only `32 + imgSize` bytes are used.
    pub fn parse(bytes: &'a [u8]) -> ReaderResult<Self> {
        let cursor = ByteCursor::new(bytes, "image package");
        cursor.require(0, image::SIZE)?;

        let image_size = cursor.usize32(image::IMG_SIZE)?;
        let mut color = [0u8; 4];
        color.copy_from_slice(cursor.slice(image::COLOR, 4)?);

        Ok(Self {
            id: cursor.u32(image::ID)?,
            width: cursor.u16(image::WIDTH)?,
            height: cursor.u16(image::HEIGHT)?,
            pixel_size: cursor.u8(image::PIXEL_SIZE)?,
            pixel_format: cursor.u8(image::PIXEL_FORMAT)?,
            camera_id: cursor.u16(image::CAMERA_ID)?,
            image_size,
            color,
            pixels: cursor.slice(image::SIZE, image_size)?,
        })
    }

    /// Bytes occupied by header plus pixels.
    pub fn span(&self) -> usize {
        image::SIZE + self.image_size
    }

    /// Whether the pixels are interleaved 8-bit RGB.
    pub fn is_rgb8(&self) -> bool {
        self.pixel_format == pix_format::RGB8
    }

    /// Bytes needed for `height` rows of `width` RGB8 pixels without padding.
    pub fn rgb8_len(&self) -> usize {
        self.width as usize * self.height as usize * RGB8_BYTES_PER_PIXEL
    }

    /// The packed RGB8 rows, or the reason they cannot be used.
    pub fn rgb8_pixels(&self) -> ReaderResult<&'a [u8]> {
        if !self.is_rgb8() {
            return Err(ReaderError::UnsupportedPixelFormat(self.pixel_format));
        }
        if self.width == 0 || self.height == 0 {
            return Err(ReaderError::EmptyImage {
                width: self.width,
                height: self.height,
            });
        }
        let needed = self.rgb8_len();
        if self.pixels.len() < needed {
            return Err(ReaderError::SizeMismatch {
                what: "image package",
                declared: self.pixels.len(),
                required: needed,
            });
        }
        Ok(&self.pixels[..needed])
    }
}
