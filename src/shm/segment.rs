#![allow(unsafe_code)]
//! Attaching to the writer's shared memory segment.
//!
//! The reader never creates a segment. It attaches to one that the simulator has
//! already set up, either a System V segment identified by an integer key or a
//! file-backed mapping (typically under `/dev/shm`). Both end up as a
//! [`SegmentHandle`]: a base pointer plus the total size reported by the OS.
//!
//! # Safety
//!
//! The segment is shared with another process, so Rust cannot prove the absence of
//! concurrent writes. The handle therefore only hands out:
//! - copies of directory bytes ([`SegmentHandle::copy_out`]),
//! - atomic views of 4-byte flag words ([`SegmentHandle::flag_word`]),
//! - borrowed byte views of a buffer whose lock bit the caller holds
//!   ([`SegmentHandle::locked_bytes`]).
//!
//! All three are bounds-checked against the size captured at attach time.

use memmap2::{MmapMut, MmapOptions};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::AtomicU32;
use std::time::Duration;

use crate::error::{ReaderError, ReaderResult};

/// Where the segment lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentSource {
    /// System V shared memory addressed by key.
    SysV {
        /// Segment key.
        key: u32,
    },
    /// A file mapped shared, e.g. `/dev/shm/rdb`.
    File {
        /// Path of the backing file.
        path: PathBuf,
    },
}

impl std::fmt::Display for SegmentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SegmentSource::SysV { key } => write!(f, "key 0x{:x}", key),
            SegmentSource::File { path } => write!(f, "file {}", path.display()),
        }
    }
}

impl SegmentSource {
    /// Attach to the segment without creating it.
    pub fn open(&self) -> ReaderResult<SegmentHandle> {
        match self {
            SegmentSource::SysV { key } => SegmentHandle::attach_sysv(*key),
            SegmentSource::File { path } => SegmentHandle::map_file(path),
        }
    }
}

enum Backing {
    SysV { shmid: libc::c_int },
    Mapped(MmapMut),
}

/// An attached segment: base address plus total byte length.
///
/// Held for the lifetime of the process. System V segments are detached on drop,
/// mappings are unmapped.
pub struct SegmentHandle {
    backing: Backing,
    base: NonNull<u8>,
    size: usize,
    label: String,
}

impl std::fmt::Debug for SegmentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentHandle")
            .field("label", &self.label)
            .field("size", &self.size)
            .field("base", &format!("{:p}", self.base))
            .finish()
    }
}

impl SegmentHandle {
    /// Attach to an existing System V segment and capture its size via `IPC_STAT`.
    pub fn attach_sysv(key: u32) -> ReaderResult<Self> {
        let label = format!("key 0x{:x}", key);

        // SAFETY: shmget with size 0 and no flags only looks the key up.
        let shmid = unsafe { libc::shmget(key as libc::key_t, 0, 0) };
        if shmid < 0 {
            return Err(ReaderError::SegmentUnavailable {
                segment: label,
                source: std::io::Error::last_os_error(),
            });
        }

        // SAFETY: a null address lets the kernel choose where to map the segment.
        let addr = unsafe { libc::shmat(shmid, std::ptr::null(), 0) };
        if addr as isize == -1 {
            return Err(ReaderError::Attach(std::io::Error::last_os_error()));
        }

        // SAFETY: shmid_ds is plain old data; IPC_STAT fills it in.
        let mut info: libc::shmid_ds = unsafe { std::mem::zeroed() };
        // SAFETY: `info` is a valid, writable shmid_ds.
        if unsafe { libc::shmctl(shmid, libc::IPC_STAT, &mut info) } < 0 {
            let err = std::io::Error::last_os_error();
            // SAFETY: addr came from a successful shmat above.
            unsafe { libc::shmdt(addr) };
            return Err(ReaderError::Attach(err));
        }

        let base = NonNull::new(addr as *mut u8).ok_or_else(|| {
            ReaderError::Attach(std::io::Error::other("shmat returned a null address"))
        })?;

        Ok(Self {
            backing: Backing::SysV { shmid },
            base,
            size: info.shm_segsz as usize,
            label,
        })
    }

    /// Map an existing file shared and read-write.
    pub fn map_file(path: &Path) -> ReaderResult<Self> {
        let label = format!("file {}", path.display());
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| ReaderError::SegmentUnavailable {
                segment: label.clone(),
                source,
            })?;

        // SAFETY: the mapping is only accessed through the bounds-checked accessors
        // below; concurrent modification by the writer is the documented contract.
        let mmap = unsafe { MmapOptions::new().map_mut(&file) }.map_err(ReaderError::Attach)?;
        Self::from_mmap(mmap, label)
    }

    /// Wrap an anonymous mapping of `len` zeroed bytes.
    pub fn anonymous(len: usize) -> ReaderResult<Self> {
        let mmap = MmapMut::map_anon(len).map_err(ReaderError::Attach)?;
        Self::from_mmap(mmap, format!("anonymous {} bytes", len))
    }

    /// Wrap an already-populated mapping.
    pub fn from_mmap(mut mmap: MmapMut, label: String) -> ReaderResult<Self> {
        let size = mmap.len();
        let base = NonNull::new(mmap.as_mut_ptr()).ok_or_else(|| {
            ReaderError::Attach(std::io::Error::other("mapping returned a null address"))
        })?;
        Ok(Self {
            backing: Backing::Mapped(mmap),
            base,
            size,
            label,
        })
    }

    /// Total size of the segment in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Human readable location of the segment.
    pub fn label(&self) -> &str {
        &self.label
    }

    fn check_range(&self, what: &'static str, offset: usize, len: usize) -> ReaderResult<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(ReaderError::Truncated {
                what,
                offset,
                needed: len,
                available: self.size.saturating_sub(offset),
            }),
        }
    }

    /// Copy `len` bytes starting at `offset` out of the segment.
    pub fn copy_out(&self, what: &'static str, offset: usize, len: usize) -> ReaderResult<Vec<u8>> {
        self.check_range(what, offset, len)?;
        let mut out = vec![0u8; len];
        // SAFETY: range checked above; `out` does not overlap the segment.
        unsafe {
            std::ptr::copy_nonoverlapping(self.base.as_ptr().add(offset), out.as_mut_ptr(), len);
        }
        Ok(out)
    }

    /// Atomic view of the 4-byte word at `offset`.
    pub fn flag_word(&self, offset: usize) -> ReaderResult<&AtomicU32> {
        self.check_range("flag word", offset, 4)?;
        // SAFETY: range checked above.
        let ptr = unsafe { self.base.as_ptr().add(offset) };
        if ptr as usize % std::mem::align_of::<AtomicU32>() != 0 {
            return Err(ReaderError::MisalignedFlags(offset));
        }
        // SAFETY: in bounds, aligned, and valid for as long as `self` keeps the
        // segment attached. Cross-process access to the word is always atomic.
        Ok(unsafe { &*(ptr as *const AtomicU32) })
    }

    /// Borrow `len` bytes of a buffer whose lock bit the caller has set.
    ///
    /// The writer does not touch a locked buffer, so the bytes are stable for as long
    /// as the lock is held.
    pub(crate) fn locked_bytes(&self, offset: usize, len: usize) -> ReaderResult<&[u8]> {
        self.check_range("buffer", offset, len)?;
        // SAFETY: range checked above; stability guaranteed by the lock protocol.
        Ok(unsafe { std::slice::from_raw_parts(self.base.as_ptr().add(offset), len) })
    }
}

impl Drop for SegmentHandle {
    fn drop(&mut self) {
        match &self.backing {
            Backing::SysV { shmid } => {
                // SAFETY: base came from shmat and is detached exactly once.
                if unsafe { libc::shmdt(self.base.as_ptr() as *const libc::c_void) } < 0 {
                    tracing::warn!(
                        shmid = *shmid,
                        error = %std::io::Error::last_os_error(),
                        "Failed to detach shared memory segment"
                    );
                }
            }
            Backing::Mapped(_) => {}
        }
    }
}

/// Attach-only, idempotent access to a segment.
#[derive(Debug)]
pub struct SegmentAttacher {
    source: SegmentSource,
    handle: Option<SegmentHandle>,
}

impl SegmentAttacher {
    /// Create an attacher for `source`; nothing is attached yet.
    pub fn new(source: SegmentSource) -> Self {
        Self {
            source,
            handle: None,
        }
    }

    /// Whether a segment is currently attached.
    pub fn is_attached(&self) -> bool {
        self.handle.is_some()
    }

    /// Attach once. Calling again reports the existing handle instead of re-attaching.
    pub fn attach(&mut self) -> ReaderResult<&SegmentHandle> {
        let handle = match self.handle.take() {
            Some(existing) => {
                tracing::debug!(segment = %self.source, "Segment already attached");
                existing
            }
            None => {
                let handle = self.source.open()?;
                tracing::info!(
                    segment = %self.source,
                    size = handle.size(),
                    "Attached to shared memory"
                );
                handle
            }
        };
        Ok(self.handle.insert(handle))
    }

    /// Retry [`attach`](Self::attach) every `retry` until it succeeds, then hand out
    /// the handle. Non-retryable errors are returned immediately.
    pub fn attach_blocking(mut self, retry: Duration) -> ReaderResult<SegmentHandle> {
        let mut attempts: u64 = 0;
        loop {
            match self.attach() {
                Ok(_) => break,
                Err(err) if err.is_retryable() => {
                    attempts += 1;
                    if attempts == 1 {
                        tracing::info!(segment = %self.source, error = %err, "Waiting for segment");
                    } else {
                        tracing::trace!(attempts, error = %err, "Segment still unavailable");
                    }
                    std::thread::sleep(retry);
                }
                Err(err) => return Err(err),
            }
        }
        self.handle.take().ok_or_else(|| {
            ReaderError::Attach(std::io::Error::other("segment handle missing after attach"))
        })
    }
}
