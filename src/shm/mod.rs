//! Shared memory access: attaching, the buffer directory and the lock handshake.

pub mod directory;
pub mod segment;
pub mod sync;

pub use directory::{list_buffers, BufferDescriptor, SegmentHeader};
pub use segment::{SegmentAttacher, SegmentHandle, SegmentSource};
pub use sync::{select_readable_buffer, BufferLease, BufferState, Selection};
