//! Entry dispatcher: walks the typed entries of one message.
//!
//! A message payload is a run of entries, each an entry header followed by
//! `dataSize` bytes. Those bytes hold `dataSize / elementSize` repeated elements, or a
//! single blob when `elementSize` is zero. Image-bearing packages are parsed and
//! forwarded; every other package id is skipped element by element.
//!
//! The entry sizes must add up to the message's `dataSize` exactly. Running short or
//! over is reported as [`ReaderError::SizeMismatch`].

use crate::cursor::ByteCursor;
use crate::error::{ReaderError, ReaderResult};
use crate::layout::{entry_header, pkg_id};
use crate::rdb::image::ImagePackage;
use crate::rdb::message::Message;

/// Package discriminator of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageKind {
    /// Frame start marker.
    StartOfFrame,
    /// Frame end marker.
    EndOfFrame,
    /// Camera image.
    Image,
    /// Image-shaped package of the optix sensor extension.
    CustomOptix,
    /// Anything else; skipped without interpretation.
    Unrecognized(u16),
}

impl From<u16> for PackageKind {
    fn from(id: u16) -> Self {
        match id {
            pkg_id::START_OF_FRAME => PackageKind::StartOfFrame,
            pkg_id::END_OF_FRAME => PackageKind::EndOfFrame,
            pkg_id::IMAGE => PackageKind::Image,
            pkg_id::CUSTOM_OPTIX_START => PackageKind::CustomOptix,
            other => PackageKind::Unrecognized(other),
        }
    }
}

impl PackageKind {
    /// Whether elements of this kind are image packages.
    pub fn carries_image(self) -> bool {
        matches!(self, PackageKind::Image | PackageKind::CustomOptix)
    }
}

/// Fixed part of every entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHeader {
    /// Bytes consumed by this header.
    pub header_size: usize,
    /// Payload bytes of the entry, possibly several elements.
    pub data_size: usize,
    /// Bytes per element; zero means one opaque element of `data_size`.
    pub element_size: usize,
    /// Raw package id.
    pub pkg_id: u16,
    /// Entry flags, unused by the reader.
    pub flags: u16,
}

impl EntryHeader {
    /// Parse the header at `offset`.
    pub fn parse(cursor: &ByteCursor<'_>, offset: usize) -> ReaderResult<Self> {
        cursor.require(offset, entry_header::SIZE)?;
        Ok(Self {
            header_size: cursor.usize32(offset + entry_header::HEADER_SIZE)?,
            data_size: cursor.usize32(offset + entry_header::DATA_SIZE)?,
            element_size: cursor.usize32(offset + entry_header::ELEMENT_SIZE)?,
            pkg_id: cursor.u16(offset + entry_header::PKG_ID)?,
            flags: cursor.u16(offset + entry_header::FLAGS)?,
        })
    }

    /// Package kind.
    pub fn kind(&self) -> PackageKind {
        PackageKind::from(self.pkg_id)
    }

    /// Distance between consecutive elements.
    pub fn stride(&self) -> usize {
        if self.element_size == 0 {
            self.data_size
        } else {
            self.element_size
        }
    }

    /// Number of elements the header announces.
    pub fn element_count(&self) -> usize {
        match self.stride() {
            0 => 0,
            stride => self.data_size / stride,
        }
    }

    /// Header plus payload.
    pub fn total_size(&self) -> usize {
        self.header_size.saturating_add(self.data_size)
    }
}

/// One entry with its payload.
#[derive(Debug, Clone, Copy)]
pub struct Entry<'a> {
    /// Parsed header.
    pub header: EntryHeader,
    /// Exactly `header.data_size` bytes.
    pub data: &'a [u8],
}

impl<'a> Entry<'a> {
    /// Walk the entry's elements.
    pub fn packages(&self) -> Packages<'a> {
        Packages {
            kind: self.header.kind(),
            data: self.data,
            stride: self.header.stride(),
            offset: 0,
            done: false,
        }
    }
}

/// Iterator over the entries of one message payload.
#[derive(Debug, Clone)]
pub struct Entries<'a> {
    cursor: ByteCursor<'a>,
    offset: usize,
    done: bool,
}

impl<'a> Entries<'a> {
    /// Walk the entries of `payload`.
    pub fn new(payload: &'a [u8]) -> Self {
        Self {
            cursor: ByteCursor::new(payload, "message entry"),
            offset: 0,
            done: false,
        }
    }

    fn mismatch(&mut self, required: usize) -> Option<ReaderResult<Entry<'a>>> {
        self.done = true;
        Some(Err(ReaderError::SizeMismatch {
            what: "message",
            declared: self.cursor.len(),
            required,
        }))
    }
}

impl<'a> Iterator for Entries<'a> {
    type Item = ReaderResult<Entry<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let remaining = self.cursor.len() - self.offset;
        if remaining == 0 {
            self.done = true;
            return None;
        }
        if remaining < entry_header::SIZE {
            return self.mismatch(self.offset + entry_header::SIZE);
        }

        let header = match EntryHeader::parse(&self.cursor, self.offset) {
            Ok(header) => header,
            Err(err) => {
                self.done = true;
                return Some(Err(err));
            }
        };

        if header.header_size < entry_header::SIZE {
            self.done = true;
            return Some(Err(ReaderError::SizeMismatch {
                what: "entry header",
                declared: header.header_size,
                required: entry_header::SIZE,
            }));
        }
        if header.total_size() > remaining {
            return self.mismatch(self.offset.saturating_add(header.total_size()));
        }

        let data = match self
            .cursor
            .slice(self.offset + header.header_size, header.data_size)
        {
            Ok(data) => data,
            Err(err) => {
                self.done = true;
                return Some(Err(err));
            }
        };
        self.offset += header.total_size();
        Some(Ok(Entry { header, data }))
    }
}

/// One element of an entry, classified.
#[derive(Debug, Clone, Copy)]
pub enum Package<'a> {
    /// An image-bearing element, parsed.
    Image {
        /// `Image` or `CustomOptix`.
        kind: PackageKind,
        /// The image header and pixels.
        image: ImagePackage<'a>,
    },
    /// An element that is not interpreted.
    Skipped {
        /// Kind of the skipped element.
        kind: PackageKind,
    },
}

/// Iterator over the elements of one entry.
#[derive(Debug, Clone)]
pub struct Packages<'a> {
    kind: PackageKind,
    data: &'a [u8],
    stride: usize,
    offset: usize,
    done: bool,
}

impl<'a> Iterator for Packages<'a> {
    type Item = ReaderResult<Package<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        let fits = self
            .offset
            .checked_add(self.stride)
            .is_some_and(|end| end <= self.data.len());
        if self.done || self.stride == 0 || !fits {
            self.done = true;
            return None;
        }

        if !self.kind.carries_image() {
            self.offset += self.stride;
            return Some(Ok(Package::Skipped { kind: self.kind }));
        }

        // Pixels trail the image header, so an image element may be longer than the
        // declared element size; never reinterpret pixel bytes as another header.
        match ImagePackage::parse(&self.data[self.offset..]) {
            Ok(image) => {
                self.offset += self.stride.max(image.span());
                Some(Ok(Package::Image {
                    kind: self.kind,
                    image,
                }))
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

/// Every package of a message, entry after entry.
///
/// Ends after the first error; the message is then abandoned.
#[derive(Debug, Clone)]
pub struct Dispatcher<'a> {
    entries: Entries<'a>,
    current: Option<Packages<'a>>,
    failed: bool,
}

/// Walk all packages of `message`.
pub fn dispatch<'a>(message: &Message<'a>) -> Dispatcher<'a> {
    Dispatcher {
        entries: Entries::new(message.payload),
        current: None,
        failed: false,
    }
}

impl<'a> Iterator for Dispatcher<'a> {
    type Item = ReaderResult<Package<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.failed {
                return None;
            }
            if let Some(packages) = self.current.as_mut() {
                if let Some(item) = packages.next() {
                    self.failed = item.is_err();
                    return Some(item);
                }
                self.current = None;
            }
            match self.entries.next()? {
                Ok(entry) => {
                    tracing::trace!(
                        kind = ?entry.header.kind(),
                        data_size = entry.header.data_size,
                        elements = entry.header.element_count(),
                        "Entry"
                    );
                    self.current = Some(entry.packages());
                }
                Err(err) => {
                    self.failed = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockEntry, MockImage, MockMessage};
    use crate::rdb::message::MessageScanner;

    fn packages_of(message: MockMessage) -> Vec<ReaderResult<(PackageKind, Option<(u16, u16)>)>> {
        let bytes = message.to_bytes();
        let scanned = MessageScanner::new(&bytes).next().unwrap().unwrap();
        dispatch(&scanned)
            .map(|item| {
                item.map(|package| match package {
                    Package::Image { kind, image } => (kind, Some((image.width, image.height))),
                    Package::Skipped { kind } => (kind, None),
                })
            })
            .collect()
    }

    #[test]
    fn maps_package_ids_to_kinds() {
        assert_eq!(PackageKind::from(pkg_id::IMAGE), PackageKind::Image);
        assert_eq!(PackageKind::from(pkg_id::CUSTOM_OPTIX_START), PackageKind::CustomOptix);
        assert_eq!(PackageKind::from(pkg_id::START_OF_FRAME), PackageKind::StartOfFrame);
        assert_eq!(PackageKind::from(9), PackageKind::Unrecognized(9));
        assert!(!PackageKind::Unrecognized(9).carries_image());
        assert!(PackageKind::CustomOptix.carries_image());
    }

    #[test]
    fn element_count_follows_element_size() {
        let header = EntryHeader {
            header_size: 16,
            data_size: 40,
            element_size: 8,
            pkg_id: 9,
            flags: 0,
        };
        assert_eq!(header.element_count(), 5);
        assert_eq!(EntryHeader { element_size: 0, ..header }.element_count(), 1);
        assert_eq!(EntryHeader { data_size: 0, element_size: 0, ..header }.element_count(), 0);
    }

    #[test]
    fn forwards_images_and_skips_everything_else() {
        let message = MockMessage::new(1, 0.0)
            .entry(MockEntry::start_of_frame())
            .entry(MockEntry::ignored(9, 4, vec![0; 12]))
            .entry(MockEntry::image(MockImage::rgb8(4, 2, vec![0; 24])))
            .entry(MockEntry::optix(MockImage::rgb8(2, 1, vec![0; 6])));

        let packages: Vec<_> = packages_of(message).into_iter().map(|p| p.unwrap()).collect();
        assert_eq!(
            packages,
            vec![
                (PackageKind::Unrecognized(9), None),
                (PackageKind::Unrecognized(9), None),
                (PackageKind::Unrecognized(9), None),
                (PackageKind::Image, Some((4, 2))),
                (PackageKind::CustomOptix, Some((2, 1))),
            ]
        );
    }

    #[test]
    fn image_pixels_are_not_reparsed_as_images() {
        // Element size is the bare image header, as real writers declare it.
        let image = MockImage::rgb8(8, 8, vec![0xAB; 192]);
        let message = MockMessage::new(1, 0.0).entry(MockEntry::image(image));

        let packages = packages_of(message);
        assert_eq!(packages.len(), 1);
    }

    #[test]
    fn repeated_image_elements_are_each_forwarded() {
        let first = MockImage::rgb8(1, 1, vec![1, 2, 3]).to_bytes();
        let second = MockImage::rgb8(1, 1, vec![4, 5, 6]).to_bytes();
        let mut data = first.clone();
        data.extend_from_slice(&second);
        let message = MockMessage::new(1, 0.0).entry(MockEntry::new(
            pkg_id::IMAGE,
            first.len() as u32,
            data,
        ));

        let packages = packages_of(message);
        assert_eq!(packages.len(), 2);
    }

    #[test]
    fn entries_overrunning_the_message_are_a_size_mismatch() {
        let message = MockMessage::new(1, 0.0)
            .entry(MockEntry::ignored(9, 0, vec![0; 32]).data_size(64));

        let packages = packages_of(message);
        assert_eq!(packages.len(), 1);
        assert!(matches!(
            packages[0],
            Err(ReaderError::SizeMismatch { what: "message", .. })
        ));
    }

    #[test]
    fn trailing_bytes_short_of_an_entry_are_a_size_mismatch() {
        let message = MockMessage::new(1, 0.0)
            .entry(MockEntry::start_of_frame())
            .trailing(vec![0; 6]);

        let packages = packages_of(message);
        assert_eq!(packages.len(), 1);
        assert!(packages[0].is_err());
    }
}
