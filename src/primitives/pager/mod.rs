#![forbid(unsafe_code)]

use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use crate::error::{CinderError, Result};
use crate::primitives::io::{FileIo, StdFileIo};

/// Byte value a reclaimed slot is filled with.
///
/// Mirrors NOR-flash behavior where an erased block reads back as all ones.
pub const ERASE_FILL: u8 = 0xFF;

/// Slot-addressed page storage consumed by the variable-length payload log.
///
/// Implementations present a durable block device as a grid of fixed-size
/// page slots. Callers address slots by index; slot reuse and wear policy
/// live above this trait.
pub trait PageStore: Send + Sync + 'static {
    /// Returns the fixed page size in bytes.
    fn page_size(&self) -> u32;
    /// Reads one page into `buf`, which must be exactly one page long.
    ///
    /// Returns `false` when the slot has never been materialized (the file
    /// does not cover it); a torn trailing page counts as absent.
    fn read_page(&self, slot: u32, buf: &mut [u8]) -> Result<bool>;
    /// Writes one full page at `slot`.
    fn write_page(&self, slot: u32, buf: &[u8]) -> Result<()>;
    /// Erases a contiguous range of slots by filling them with [`ERASE_FILL`].
    fn erase(&self, slots: Range<u32>) -> Result<()>;
    /// Synchronizes all buffered writes to durable storage.
    fn sync(&self) -> Result<()>;
    /// Discards every slot, resetting the store to empty.
    fn truncate(&self) -> Result<()>;
}

/// [`PageStore`] backed by a single file of raw pages.
pub struct FilePageStore {
    io: Arc<dyn FileIo>,
    page_size: u32,
}

impl FilePageStore {
    /// Opens (or creates) the page file at `path`.
    pub fn open(path: impl AsRef<Path>, page_size: u32) -> Result<Self> {
        let io = StdFileIo::open(path)?;
        Self::with_io(Arc::new(io), page_size)
    }

    /// Wraps an existing I/O handle.
    pub fn with_io(io: Arc<dyn FileIo>, page_size: u32) -> Result<Self> {
        if page_size == 0 {
            return Err(CinderError::InvalidArgument(
                "page size must be non-zero".into(),
            ));
        }
        Ok(Self { io, page_size })
    }

    fn offset(&self, slot: u32) -> u64 {
        u64::from(slot) * u64::from(self.page_size)
    }
}

impl PageStore for FilePageStore {
    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn read_page(&self, slot: u32, buf: &mut [u8]) -> Result<bool> {
        if buf.len() != self.page_size as usize {
            return Err(CinderError::InvalidArgument(
                "read buffer is not one page long".into(),
            ));
        }
        let off = self.offset(slot);
        if off + u64::from(self.page_size) > self.io.len()? {
            return Ok(false);
        }
        self.io.read_at(off, buf)?;
        Ok(true)
    }

    fn write_page(&self, slot: u32, buf: &[u8]) -> Result<()> {
        if buf.len() != self.page_size as usize {
            return Err(CinderError::InvalidArgument(
                "write buffer is not one page long".into(),
            ));
        }
        self.io.write_at(self.offset(slot), buf)
    }

    fn erase(&self, slots: Range<u32>) -> Result<()> {
        let blank = vec![ERASE_FILL; self.page_size as usize];
        for slot in slots {
            self.io.write_at(self.offset(slot), &blank)?;
        }
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.io.sync_all()
    }

    fn truncate(&self) -> Result<()> {
        self.io.truncate(0)
    }
}
