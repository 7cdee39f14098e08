//! Parsing of the RDB message format inside a locked buffer.
//!
//! Buffer → messages ([`message`]) → entries and their elements ([`entry`]) → image
//! packages ([`image`]). Everything borrows from the buffer; nothing is copied until an
//! image is handed to the codec.

pub mod entry;
pub mod image;
pub mod message;

pub use entry::{dispatch, Entries, Entry, EntryHeader, Package, PackageKind};
pub use image::ImagePackage;
pub use message::{Message, MessageHeader, MessageScanner};
