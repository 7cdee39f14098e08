//! The inspect-and-drain loop.
//!
//! One pass ([`ShmReader::check_shm`]) walks the directory, picks a ready buffer,
//! locks it, scans its messages, forwards image packages to the extractor and
//! releases the buffer. [`run`] attaches (retrying until the writer has created
//! the segment) and then repeats passes forever at the poll interval.
//!
//! Nothing that goes wrong inside a buffer stops the loop: corruption abandons the
//! buffer, the lease still clears its flags, and the next pass starts fresh.

use std::path::PathBuf;
use std::time::Duration;

use crate::config::ReaderConfig;
use crate::error::{ReaderError, ReaderResult};
use crate::rdb::{dispatch, Message, MessageScanner, Package};
use crate::shm::{
    list_buffers, select_readable_buffer, BufferDescriptor, BufferLease, BufferState,
    SegmentAttacher, SegmentHandle, SegmentHeader, Selection,
};
use crate::storage::{FileCodec, FrameTag, ImageCodec, ImageExtractor};

/// Per-pass settings taken from [`ReaderConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderSettings {
    /// Flag bits marking a buffer as ready for this reader.
    pub check_mask: u32,
    /// Restrict selection to one slot.
    pub force_buffer: Option<usize>,
    /// Dump buffer states before and after each pass.
    pub verbose: bool,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self::from(&ReaderConfig::default())
    }
}

impl From<&ReaderConfig> for ReaderSettings {
    fn from(config: &ReaderConfig) -> Self {
        Self {
            check_mask: config.check_mask,
            force_buffer: config.force_buffer,
            verbose: config.verbose,
        }
    }
}

/// What one drained buffer yielded.
#[derive(Debug, Default)]
pub struct BufferReport {
    /// Directory index of the buffer.
    pub buffer_index: usize,
    /// Frame number of the first message, zero if none was read.
    pub frame_number: u32,
    /// Messages scanned successfully.
    pub messages: usize,
    /// Image files written.
    pub images_written: usize,
    /// Image packages not written (unsupported format or short pixel data).
    pub images_discarded: usize,
    /// Elements of package kinds that carry no image.
    pub packages_skipped: usize,
    /// Paths of the written files, in order.
    pub written: Vec<PathBuf>,
    /// Why the rest of the buffer was abandoned, if it was.
    pub abort: Option<ReaderError>,
}

/// Result of one pass.
#[derive(Debug)]
pub enum PassOutcome {
    /// No buffer has carried a frame yet.
    NotStarted,
    /// No buffer is ready for this reader.
    NoNewFrame,
    /// A buffer was locked, read and released.
    Drained(BufferReport),
}

/// Cumulative counters across passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStats {
    /// Calls to [`ShmReader::check_shm`].
    pub passes: u64,
    /// Buffers locked and released.
    pub buffers_drained: u64,
    /// Messages scanned.
    pub messages: u64,
    /// Image files written.
    pub images_written: u64,
    /// Image packages discarded.
    pub images_discarded: u64,
    /// Non-image elements skipped.
    pub packages_skipped: u64,
    /// Buffers abandoned because of malformed data.
    pub corrupt_buffers: u64,
}

impl ReaderStats {
    fn record(&mut self, report: &BufferReport) {
        self.buffers_drained += 1;
        self.messages += report.messages as u64;
        self.images_written += report.images_written as u64;
        self.images_discarded += report.images_discarded as u64;
        self.packages_skipped += report.packages_skipped as u64;
        if report.abort.as_ref().is_some_and(ReaderError::is_corruption) {
            self.corrupt_buffers += 1;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Idle {
    NotStarted,
    NoNewFrame,
    MalformedDirectory,
}

/// Reader bound to one attached segment.
#[derive(Debug)]
pub struct ShmReader<C = FileCodec> {
    segment: SegmentHandle,
    extractor: ImageExtractor<C>,
    settings: ReaderSettings,
    stats: ReaderStats,
    idle: Option<Idle>,
}

impl<C: ImageCodec> ShmReader<C> {
    /// Read `segment`, writing images through `extractor`.
    pub fn new(segment: SegmentHandle, extractor: ImageExtractor<C>, settings: ReaderSettings) -> Self {
        Self {
            segment,
            extractor,
            settings,
            stats: ReaderStats::default(),
            idle: None,
        }
    }

    /// The attached segment.
    pub fn segment(&self) -> &SegmentHandle {
        &self.segment
    }

    /// The extractor images are written through.
    pub fn extractor(&self) -> &ImageExtractor<C> {
        &self.extractor
    }

    /// Active settings.
    pub fn settings(&self) -> &ReaderSettings {
        &self.settings
    }

    /// Counters accumulated so far.
    pub fn stats(&self) -> ReaderStats {
        self.stats
    }

    /// Run one inspect-and-drain pass.
    ///
    /// Errors are returned only when no buffer was locked: a malformed directory, or
    /// the chosen buffer being locked by someone else in the meantime. Problems inside
    /// a locked buffer end up in [`BufferReport::abort`].
    pub fn check_shm(&mut self) -> ReaderResult<PassOutcome> {
        self.stats.passes += 1;

        let descriptors = list_buffers(&self.segment)?;
        if self.settings.verbose {
            self.dump_states("before", &descriptors);
        }

        let selection = select_readable_buffer(
            &self.segment,
            &descriptors,
            self.settings.check_mask,
            self.settings.force_buffer,
        )?;
        let index = match selection {
            Selection::Selected(index) => index,
            Selection::NoNewFrame => return Ok(PassOutcome::NoNewFrame),
            Selection::NotStarted => return Ok(PassOutcome::NotStarted),
        };
        let descriptor = descriptors
            .iter()
            .copied()
            .find(|descriptor| descriptor.index == index)
            .ok_or(ReaderError::DirectoryOutOfBounds {
                what: "selected buffer",
                offset: index,
                len: 0,
                segment_size: self.segment.size(),
            })?;

        let report = {
            let lease = BufferLease::acquire(&self.segment, descriptor, self.settings.check_mask)?;
            self.drain(&lease)
        };

        if self.settings.verbose {
            self.dump_states("after", &descriptors);
        }

        self.stats.record(&report);
        tracing::debug!(stats = ?self.stats, "Pass complete");
        Ok(PassOutcome::Drained(report))
    }

    /// Run one pass and log its outcome; never fails.
    pub fn poll(&mut self) -> Option<BufferReport> {
        match self.check_shm() {
            Ok(PassOutcome::Drained(report)) => {
                self.idle = None;
                log_report(&report);
                Some(report)
            }
            Ok(PassOutcome::NotStarted) => {
                if self.idle != Some(Idle::NotStarted) {
                    tracing::info!("Simulation not started yet");
                    self.idle = Some(Idle::NotStarted);
                }
                None
            }
            Ok(PassOutcome::NoNewFrame) => {
                if self.idle != Some(Idle::NoNewFrame) {
                    tracing::debug!("Waiting for next frame");
                    self.idle = Some(Idle::NoNewFrame);
                }
                None
            }
            Err(err) if err.is_retryable() => {
                tracing::debug!(error = %err, "Buffer busy, retrying");
                None
            }
            Err(err) if err.is_corruption() => {
                if self.idle == Some(Idle::MalformedDirectory) {
                    tracing::debug!(error = %err, "Malformed buffer directory");
                } else {
                    tracing::warn!(error = %err, "Malformed buffer directory");
                    self.idle = Some(Idle::MalformedDirectory);
                }
                None
            }
            Err(err) => {
                tracing::error!(error = %err, "Pass failed");
                None
            }
        }
    }

    fn drain(&self, lease: &BufferLease<'_>) -> BufferReport {
        let mut report = BufferReport {
            buffer_index: lease.descriptor().index,
            ..BufferReport::default()
        };

        let bytes = match lease.bytes() {
            Ok(bytes) => bytes,
            Err(err) => {
                report.abort = Some(err);
                return report;
            }
        };

        for item in MessageScanner::new(bytes) {
            let message = match item {
                Ok(message) => message,
                Err(err) => {
                    report.abort = Some(err);
                    break;
                }
            };
            if report.messages == 0 {
                report.frame_number = message.header.frame_number;
            }
            report.messages += 1;

            if let Err(err) = self.handle_message(&message, &mut report) {
                report.abort = Some(err);
                break;
            }
        }
        report
    }

    fn handle_message(&self, message: &Message<'_>, report: &mut BufferReport) -> ReaderResult<()> {
        tracing::trace!(
            frame = message.header.frame_number,
            sim_time = message.header.simulation_time,
            data_size = message.header.data_size,
            "Message"
        );

        let mut counter = 0;
        for package in dispatch(message) {
            let (kind, image) = match package? {
                Package::Image { kind, image } => (kind, image),
                Package::Skipped { .. } => {
                    report.packages_skipped += 1;
                    continue;
                }
            };

            counter += 1;
            let tag = FrameTag {
                frame_number: message.header.frame_number,
                simulation_time: message.header.simulation_time,
                counter,
            };
            match self.extractor.extract(&image, &tag) {
                Ok(Some(path)) => {
                    report.images_written += 1;
                    report.written.push(path);
                }
                Ok(None) => report.images_discarded += 1,
                Err(err) if err.is_corruption() => {
                    tracing::warn!(
                        frame = tag.frame_number,
                        counter,
                        kind = ?kind,
                        error = %err,
                        "Discarding malformed image package"
                    );
                    report.images_discarded += 1;
                }
                Err(ReaderError::Encode(err)) => {
                    tracing::warn!(
                        frame = tag.frame_number,
                        counter,
                        kind = ?kind,
                        error = %err,
                        "Discarding image the encoder rejected"
                    );
                    report.images_discarded += 1;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn dump_states(&self, stage: &'static str, descriptors: &[BufferDescriptor]) {
        for descriptor in descriptors {
            match BufferState::capture(&self.segment, descriptor) {
                Ok(state) => tracing::debug!(
                    stage,
                    buffer = state.index,
                    id = descriptor.id,
                    flags = format!("{:#010x}", state.flags),
                    locked = state.locked(),
                    ready = state.ready(self.settings.check_mask),
                    frame = state.frame_number,
                    capacity = descriptor.byte_capacity,
                    "Buffer state"
                ),
                Err(err) => tracing::debug!(stage, buffer = descriptor.index, error = %err, "Buffer state unreadable"),
            }
        }
    }
}

fn log_report(report: &BufferReport) {
    match &report.abort {
        Some(err) if err.is_corruption() => tracing::warn!(
            buffer = report.buffer_index,
            frame = report.frame_number,
            messages = report.messages,
            error = %err,
            "Abandoned corrupt buffer"
        ),
        Some(err) => tracing::error!(
            buffer = report.buffer_index,
            frame = report.frame_number,
            error = %err,
            "Failed to drain buffer"
        ),
        None => tracing::debug!(
            buffer = report.buffer_index,
            frame = report.frame_number,
            messages = report.messages,
            images = report.images_written,
            "Drained buffer"
        ),
    }
}

/// Attach according to `config` and poll forever.
///
/// Returns only if the segment cannot be attached for a non-retryable reason, or
/// the output directory cannot be created.
pub fn run(config: &ReaderConfig) -> ReaderResult<()> {
    let source = config.segment_source();
    tracing::info!(segment = %source, "Waiting for shared memory segment");
    let segment = SegmentAttacher::new(source)
        .attach_blocking(Duration::from_millis(config.attach_retry_ms))?;

    match SegmentHeader::read(&segment) {
        Ok(header) => tracing::info!(
            segment = segment.label(),
            size = segment.size(),
            buffers = header.buffer_count,
            "Attached"
        ),
        Err(err) => tracing::warn!(segment = segment.label(), error = %err, "Attached, header unreadable"),
    }

    std::fs::create_dir_all(&config.output_dir)?;
    let extractor = ImageExtractor::new(&config.output_dir, FileCodec::new(config.image_format));
    let mut reader = ShmReader::new(segment, extractor, ReaderSettings::from(config));

    let interval = Duration::from_millis(config.poll_interval_ms);
    loop {
        reader.poll();
        std::thread::sleep(interval);
    }
}
