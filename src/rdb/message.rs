//! Frame scanner: walks a locked buffer as a sequence of RDB messages.
//!
//! A buffer holds one or more messages back to back. Each message header declares its
//! own header size and payload size; the scanner advances by their sum and stops when
//! too few bytes remain for another message header plus entry header, or when the next
//! header does not carry the magic number (the rest of the buffer is padding).

use crate::cursor::ByteCursor;
use crate::error::{ReaderError, ReaderResult};
use crate::layout::{entry_header, msg_header, MAGIC_NO};

/// Fixed part of every message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MessageHeader {
    /// Sentinel validating the message boundary.
    pub magic_no: u16,
    /// Protocol version written by the simulator.
    pub version: u16,
    /// Bytes consumed by this header.
    pub header_size: usize,
    /// Bytes of entries following the header.
    pub data_size: usize,
    /// Simulation frame counter.
    pub frame_number: u32,
    /// Simulation time in seconds.
    pub simulation_time: f64,
}

impl MessageHeader {
    /// Parse the header at `offset`.
    pub fn parse(cursor: &ByteCursor<'_>, offset: usize) -> ReaderResult<Self> {
        cursor.require(offset, msg_header::SIZE)?;
        Ok(Self {
            magic_no: cursor.u16(offset + msg_header::MAGIC_NO)?,
            version: cursor.u16(offset + msg_header::VERSION)?,
            header_size: cursor.usize32(offset + msg_header::HEADER_SIZE)?,
            data_size: cursor.usize32(offset + msg_header::DATA_SIZE)?,
            frame_number: cursor.u32(offset + msg_header::FRAME_NO)?,
            simulation_time: cursor.f64(offset + msg_header::SIM_TIME)?,
        })
    }

    /// Whether the magic number is valid.
    pub fn has_valid_magic(&self) -> bool {
        self.magic_no == MAGIC_NO
    }

    /// Total bytes occupied by the message.
    pub fn total_size(&self) -> usize {
        self.header_size.saturating_add(self.data_size)
    }
}

/// One message and its payload (the entry region).
#[derive(Debug, Clone, Copy)]
pub struct Message<'a> {
    /// Parsed header.
    pub header: MessageHeader,
    /// Offset of the message within the buffer.
    pub offset: usize,
    /// Exactly `header.data_size` bytes of entries.
    pub payload: &'a [u8],
}

/// Lazy, finite iterator over the messages of one buffer.
///
/// Yields `Err` at most once, for corruption (first header without magic number,
/// empty message, sizes running past the buffer), and then ends.
#[derive(Debug, Clone)]
pub struct MessageScanner<'a> {
    cursor: ByteCursor<'a>,
    offset: usize,
    remaining: usize,
    done: bool,
}

impl<'a> MessageScanner<'a> {
    /// Scan `buffer` from offset zero; its length is the buffer capacity.
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            cursor: ByteCursor::new(buffer, "message"),
            offset: 0,
            remaining: buffer.len(),
            done: false,
        }
    }

    /// Bytes not yet consumed by yielded messages.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    fn fail(&mut self, err: ReaderError) -> Option<ReaderResult<Message<'a>>> {
        self.done = true;
        Some(Err(err))
    }

    fn next_message(&mut self) -> Option<ReaderResult<Message<'a>>> {
        if self.remaining < msg_header::SIZE + entry_header::SIZE {
            self.done = true;
            return None;
        }

        let header = match MessageHeader::parse(&self.cursor, self.offset) {
            Ok(header) => header,
            Err(err) => return self.fail(err),
        };

        if !header.has_valid_magic() {
            if self.offset == 0 {
                return self.fail(ReaderError::BadMagic {
                    found: header.magic_no,
                });
            }
            tracing::trace!(offset = self.offset, "No further message, rest is padding");
            self.done = true;
            return None;
        }

        if header.data_size == 0 {
            return self.fail(ReaderError::EmptyMessage {
                frame: header.frame_number,
            });
        }

        if header.header_size < msg_header::SIZE {
            return self.fail(ReaderError::SizeMismatch {
                what: "message header",
                declared: header.header_size,
                required: msg_header::SIZE,
            });
        }

        if header.total_size() > self.remaining {
            return self.fail(ReaderError::SizeMismatch {
                what: "buffer",
                declared: self.remaining,
                required: header.total_size(),
            });
        }

        let payload = match self
            .cursor
            .slice(self.offset + header.header_size, header.data_size)
        {
            Ok(payload) => payload,
            Err(err) => return self.fail(err),
        };

        let message = Message {
            header,
            offset: self.offset,
            payload,
        };
        self.offset += header.total_size();
        self.remaining -= header.total_size();
        Some(Ok(message))
    }
}

impl<'a> Iterator for MessageScanner<'a> {
    type Item = ReaderResult<Message<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        self.next_message()
    }
}
