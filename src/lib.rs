//! # RDB Shared Memory Reader
//!
//! This crate reads simulation frames that an external driving simulator publishes into a
//! double-buffered shared memory segment, and writes the camera images embedded in them to
//! files. The writer process is not part of this crate; the segment layout is the only
//! contract between the two.
//!
//! ## Crate Structure
//!
//! The library is organized into several modules, each with a distinct responsibility:
//!
//! - **`shm`**: Attaching to the segment (System V key or mapped file), walking the buffer
//!   directory, and the lock/ready flag handshake that guards each buffer.
//! - **`rdb`**: Parsing inside a locked buffer: the message scanner, the entry dispatcher and
//!   image packages. Everything borrows from the buffer.
//! - **`storage`**: The image extractor and the `ImageCodec` trait that turns raw pixels into
//!   PNG or TIFF files.
//! - **`reader`**: `ShmReader`, which runs one inspect-and-drain pass at a time, and `run`, the
//!   poll loop used by the binary.
//! - **`layout`**: Byte offsets and constants of the wire format.
//! - **`cursor`**: Bounds-checked native-endian reads over byte slices.
//! - **`config`**: Layered `ReaderConfig` (defaults, TOML, environment, command line).
//! - **`logging`**: `tracing-subscriber` initialization.
//! - **`error`**: The crate-wide `ReaderError` enum.
//! - **`mock`**: Builders for synthetic segments, used by the tests.

pub mod config;
pub mod cursor;
pub mod error;
pub mod layout;
pub mod logging;
pub mod mock;
pub mod rdb;
pub mod reader;
pub mod shm;
pub mod storage;

pub use config::ReaderConfig;
pub use error::{ReaderError, ReaderResult};
pub use reader::{run, PassOutcome, ReaderStats, ShmReader};
