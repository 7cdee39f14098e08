//! File-backed segments shared between two mappings
//!
//! Two handles map the same file, standing in for the writer and the reader. The
//! writer-side handle observes the reader's flag changes, which checks the handshake
//! across mappings rather than within one.

use rdb_shm_reader::error::ReaderResult;
use rdb_shm_reader::layout::flags;
use rdb_shm_reader::mock::{MockBuffer, MockEntry, MockImage, MockMessage, MockSegmentBuilder};
use rdb_shm_reader::reader::{PassOutcome, ReaderSettings, ShmReader};
use rdb_shm_reader::shm::{list_buffers, SegmentAttacher, SegmentHandle, SegmentSource};
use rdb_shm_reader::storage::{FileCodec, ImageCodec, ImageExtractor};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tempfile::TempDir;

/// Codec that records the buffer's flag word at the moment pixels are handed over.
struct LockWitness {
    writer_view: SegmentHandle,
    flags_offset: usize,
    seen: RefCell<Vec<u32>>,
}

impl ImageCodec for LockWitness {
    fn file_extension(&self) -> &'static str {
        "raw"
    }

    fn write_rgb8(&self, _raw: &[u8], _width: u32, _height: u32, _path: &Path) -> ReaderResult<()> {
        let word = self.writer_view.flag_word(self.flags_offset)?;
        self.seen.borrow_mut().push(word.load(Ordering::Acquire));
        Ok(())
    }
}

fn write_segment(dir: &TempDir, builder: &MockSegmentBuilder) -> PathBuf {
    let path = dir.path().join("rdb.shm");
    std::fs::write(&path, builder.to_bytes().unwrap()).unwrap();
    path
}

#[test]
fn test_lock_is_held_while_images_are_extracted() {
    let dir = TempDir::new().unwrap();
    let message = MockMessage::new(12, 0.48)
        .entry(MockEntry::image(MockImage::rgb8(2, 1, vec![0; 6])))
        .entry(MockEntry::image(MockImage::rgb8(2, 1, vec![0; 6])));
    let path = write_segment(
        &dir,
        &MockSegmentBuilder::new().buffer(
            MockBuffer::new(512)
                .flags(flags::READY_TC | flags::READY_IG)
                .message(message),
        ),
    );

    let writer_view = SegmentHandle::map_file(&path).unwrap();
    let flags_offset = list_buffers(&writer_view).unwrap()[0].flags_offset();
    let witness = LockWitness {
        writer_view,
        flags_offset,
        seen: RefCell::new(Vec::new()),
    };

    let segment = SegmentHandle::map_file(&path).unwrap();
    let mut reader = ShmReader::new(
        segment,
        ImageExtractor::new(dir.path(), witness),
        ReaderSettings::default(),
    );

    let outcome = reader.check_shm().unwrap();
    assert!(matches!(outcome, PassOutcome::Drained(ref report) if report.images_written == 2));

    // Re-map to read the final state through a fresh view.
    let after = SegmentHandle::map_file(&path).unwrap();
    let descriptor = list_buffers(&after).unwrap()[0];
    assert_eq!(descriptor.flags(&after).unwrap(), flags::READY_IG);

    let expected = flags::READY_TC | flags::READY_IG | flags::LOCK;
    let seen = reader.extractor().codec().seen.borrow().clone();
    assert_eq!(seen, vec![expected, expected]);
}

#[test]
fn test_attacher_waits_for_segment_to_appear() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("late.shm");
    let bytes = MockSegmentBuilder::new()
        .buffer(MockBuffer::new(256).frame(1))
        .to_bytes()
        .unwrap();
    let expected_size = bytes.len();

    let writer = {
        let path = path.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            let staging = path.with_extension("tmp");
            std::fs::write(&staging, bytes).unwrap();
            std::fs::rename(&staging, &path).unwrap();
        })
    };

    let segment = SegmentAttacher::new(SegmentSource::File { path })
        .attach_blocking(Duration::from_millis(5))
        .unwrap();
    writer.join().unwrap();

    assert_eq!(segment.size(), expected_size);
    assert_eq!(list_buffers(&segment).unwrap().len(), 1);
}

#[test]
fn test_writer_republishing_a_buffer_is_read_again() {
    let dir = TempDir::new().unwrap();
    let path = write_segment(
        &dir,
        &MockSegmentBuilder::new().buffer(MockBuffer::new(256).flags(flags::READY_TC).frame(1)),
    );
    let writer_view = SegmentHandle::map_file(&path).unwrap();
    let descriptor = list_buffers(&writer_view).unwrap()[0];

    let segment = SegmentHandle::map_file(&path).unwrap();
    let mut reader = ShmReader::new(
        segment,
        ImageExtractor::new(dir.path(), FileCodec::default()),
        ReaderSettings::default(),
    );

    assert!(matches!(reader.check_shm().unwrap(), PassOutcome::Drained(_)));
    assert!(matches!(reader.check_shm().unwrap(), PassOutcome::NoNewFrame));

    // The writer only ever touches unlocked buffers.
    let word = writer_view.flag_word(descriptor.flags_offset()).unwrap();
    assert_eq!(word.load(Ordering::Acquire) & flags::LOCK, 0);
    word.fetch_or(flags::READY_TC, Ordering::AcqRel);

    assert!(matches!(reader.check_shm().unwrap(), PassOutcome::Drained(_)));
    assert_eq!(reader.stats().buffers_drained, 2);
}

#[test]
fn test_writer_lock_makes_reader_wait() {
    let dir = TempDir::new().unwrap();
    let path = write_segment(
        &dir,
        &MockSegmentBuilder::new()
            .buffer(MockBuffer::new(256).flags(flags::READY_TC | flags::LOCK).frame(8)),
    );

    let segment = SegmentHandle::map_file(&path).unwrap();
    let mut reader = ShmReader::new(
        segment,
        ImageExtractor::new(dir.path(), FileCodec::default()),
        ReaderSettings::default(),
    );

    assert!(matches!(reader.check_shm().unwrap(), PassOutcome::NoNewFrame));
    assert!(reader.poll().is_none());
}
