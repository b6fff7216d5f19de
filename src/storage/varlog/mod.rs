#![forbid(unsafe_code)]

use std::cmp::min;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{CinderError, Result};
use crate::primitives::pager::PageStore;
use crate::storage::options::VarLogOptions;
use crate::types::page::{self, PageHeader, LEN_PREFIX_LEN, PAGE_HDR_LEN};
use crate::types::{RecordId, VarRef};
use tracing::{debug, trace};

mod recovery;
mod stream;

pub use stream::VarStream;

/// Metrics tracking for the variable-length payload log.
#[derive(Default)]
pub struct VarLogMetrics {
    pages_written: AtomicU64,
    pages_reclaimed: AtomicU64,
    bytes_appended: AtomicU64,
    bytes_read: AtomicU64,
    page_reads: AtomicU64,
    buffer_hits: AtomicU64,
}

/// Snapshot of var-log metrics at a point in time.
#[derive(Clone, Copy, Debug, Default)]
pub struct VarLogMetricsSnapshot {
    /// Total pages sealed and written through the page store.
    pub pages_written: u64,
    /// Total slots reclaimed by erasure for reuse.
    pub pages_reclaimed: u64,
    /// Total payload bytes appended (length prefixes excluded).
    pub bytes_appended: u64,
    /// Total payload bytes handed to read streams.
    pub bytes_read: u64,
    /// Pages fetched through the page store on the read path.
    pub page_reads: u64,
    /// Read requests served from an already-buffered page.
    pub buffer_hits: u64,
}

impl VarLogMetrics {
    /// Returns the total number of pages written.
    pub fn pages_written(&self) -> u64 {
        self.pages_written.load(Ordering::Relaxed)
    }

    /// Returns the total number of slots reclaimed.
    pub fn pages_reclaimed(&self) -> u64 {
        self.pages_reclaimed.load(Ordering::Relaxed)
    }

    /// Returns the total number of payload bytes appended.
    pub fn bytes_appended(&self) -> u64 {
        self.bytes_appended.load(Ordering::Relaxed)
    }

    /// Returns the total number of payload bytes read.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    /// Returns the number of page fetches on the read path.
    pub fn page_reads(&self) -> u64 {
        self.page_reads.load(Ordering::Relaxed)
    }

    /// Returns the number of reads served from a buffered page.
    pub fn buffer_hits(&self) -> u64 {
        self.buffer_hits.load(Ordering::Relaxed)
    }

    /// Creates a snapshot of the current metrics.
    pub fn snapshot(&self) -> VarLogMetricsSnapshot {
        VarLogMetricsSnapshot {
            pages_written: self.pages_written(),
            pages_reclaimed: self.pages_reclaimed(),
            bytes_appended: self.bytes_appended(),
            bytes_read: self.bytes_read(),
            page_reads: self.page_reads(),
            buffer_hits: self.buffer_hits(),
        }
    }

    fn add_pages_written(&self, delta: u64) {
        self.pages_written.fetch_add(delta, Ordering::Relaxed);
    }

    fn add_pages_reclaimed(&self, delta: u64) {
        self.pages_reclaimed.fetch_add(delta, Ordering::Relaxed);
    }

    fn add_bytes_appended(&self, delta: u64) {
        if delta != 0 {
            self.bytes_appended.fetch_add(delta, Ordering::Relaxed);
        }
    }

    fn add_bytes_read(&self, delta: u64) {
        if delta != 0 {
            self.bytes_read.fetch_add(delta, Ordering::Relaxed);
        }
    }

    fn add_page_reads(&self, delta: u64) {
        self.page_reads.fetch_add(delta, Ordering::Relaxed);
    }

    fn add_buffer_hits(&self, delta: u64) {
        self.buffer_hits.fetch_add(delta, Ordering::Relaxed);
    }
}

/// Circular variable-length payload log over a fixed page budget.
///
/// One volatile page buffer accumulates appended bytes; full pages are
/// written to the slot `logical_id % num_pages`, so the writer overwrites
/// the oldest pages once the budget is exhausted. Logical page ids never
/// repeat even though slots do, and per-record liveness is decided against
/// the oldest id whose payload has not been destroyed by that reuse.
pub struct VarLog {
    store: Arc<dyn PageStore>,
    page_size: u32,
    num_pages: u32,
    erase_pages: u32,
    /// Logical write cursor over the header-inclusive address space.
    cursor: u32,
    /// Logical id of the page the next rollover will complete.
    next_page_id: u32,
    /// Oldest record whose payload bytes have not been overwritten.
    oldest_live: Option<RecordId>,
    /// Slots free to take a page without destroying live payloads.
    avail_pages: u32,
    /// Next var-record id to assign.
    next_record: u64,
    write_buf: Vec<u8>,
    /// Greatest record id with bytes in the write buffer.
    buf_max_record: u64,
    read_buf: Vec<u8>,
    read_slot: Option<u32>,
    metrics: Arc<VarLogMetrics>,
}

impl std::fmt::Debug for VarLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VarLog")
            .field("page_size", &self.page_size)
            .field("num_pages", &self.num_pages)
            .field("erase_pages", &self.erase_pages)
            .field("cursor", &self.cursor)
            .field("next_page_id", &self.next_page_id)
            .field("oldest_live", &self.oldest_live)
            .field("avail_pages", &self.avail_pages)
            .field("next_record", &self.next_record)
            .field("buf_max_record", &self.buf_max_record)
            .field("read_slot", &self.read_slot)
            .finish_non_exhaustive()
    }
}

impl VarLog {
    /// Opens the log over `store`, rebuilding writer state from persisted
    /// pages unless the store is empty or `options.reset` is set.
    pub fn open(store: Arc<dyn PageStore>, options: VarLogOptions) -> Result<Self> {
        let page_size = store.page_size();
        options.validate(page_size)?;
        let mut log = Self {
            page_size,
            num_pages: options.num_pages,
            erase_pages: options.erase_pages,
            cursor: PAGE_HDR_LEN as u32,
            next_page_id: 0,
            oldest_live: None,
            avail_pages: options.num_pages,
            next_record: 1,
            write_buf: vec![0u8; page_size as usize],
            buf_max_record: 0,
            read_buf: vec![0u8; page_size as usize],
            read_slot: None,
            store,
            metrics: Arc::new(VarLogMetrics::default()),
        };
        if options.reset {
            log.store.truncate()?;
        } else if let Some(state) =
            recovery::scan(log.store.as_ref(), page_size, log.num_pages, log.erase_pages)?
        {
            log.cursor = state.cursor;
            log.next_page_id = state.next_page_id;
            log.oldest_live = state.oldest_live;
            log.avail_pages = state.avail_pages;
            log.next_record = state.next_record;
        }
        debug!(
            cursor = log.cursor,
            next_page = log.next_page_id,
            avail = log.avail_pages,
            "varlog.open"
        );
        Ok(log)
    }

    /// Appends one payload and returns the token needed to read it back.
    ///
    /// The payload is copied into the volatile page buffer; pages filled
    /// along the way are written out, reclaiming the oldest erase block
    /// first when no free slot remains. Bytes left in a partially-filled
    /// buffer are not durable until [`VarLog::flush`] or a later rollover.
    pub fn append(&mut self, payload: &[u8]) -> Result<VarRef> {
        let data_capacity =
            u64::from(self.num_pages) * u64::from(self.page_size - PAGE_HDR_LEN as u32);
        if payload.len() as u64 + LEN_PREFIX_LEN as u64 > data_capacity {
            return Err(CinderError::InvalidArgument(
                "payload larger than total log capacity".into(),
            ));
        }
        if self.next_record > u64::from(u32::MAX) {
            return Err(CinderError::InvalidArgument(
                "var-record id space exhausted".into(),
            ));
        }
        let len = payload.len() as u32;

        let cursor = self.cursor;
        let next_record = self.next_record;
        let oldest_live = self.oldest_live;
        let buf_max_record = self.buf_max_record;
        let mut dirtied = false;
        match self.append_inner(payload, len, &mut dirtied) {
            Ok(token) => {
                self.metrics.add_bytes_appended(u64::from(len));
                trace!(
                    record = token.record.0,
                    len,
                    addr = token.addr,
                    "varlog.append"
                );
                Ok(token)
            }
            Err(err) => {
                // Until something durable happened the copy is invisible, so
                // rewinding the counters makes a retry exact. Afterwards the
                // counters must keep describing what is on storage; the
                // record's partial bytes stay behind as dead space.
                if !dirtied {
                    self.cursor = cursor;
                    self.next_record = next_record;
                    self.oldest_live = oldest_live;
                    self.buf_max_record = buf_max_record;
                }
                Err(err)
            }
        }
    }

    fn append_inner(&mut self, payload: &[u8], len: u32, dirtied: &mut bool) -> Result<VarRef> {
        let page_size = self.page_size;

        // The length prefix never straddles a page boundary.
        if page_size - self.cursor % page_size < LEN_PREFIX_LEN as u32 {
            self.seal_page(dirtied)?;
            self.cursor += page_size - self.cursor % page_size + PAGE_HDR_LEN as u32;
        }

        let record = RecordId(self.next_record);
        self.next_record += 1;
        if self.oldest_live.is_none() {
            self.oldest_live = Some(record);
        }

        let addr = self.cursor;
        self.buf_max_record = record.0;
        let off = (self.cursor % page_size) as usize;
        page::encode_len_prefix(&mut self.write_buf[off..], len)?;
        self.cursor += LEN_PREFIX_LEN as u32;
        if self.cursor % page_size == 0 {
            self.seal_page(dirtied)?;
            self.cursor += PAGE_HDR_LEN as u32;
            self.buf_max_record = record.0;
        }

        let mut checksum = crc32fast::Hasher::new();
        let mut written = 0usize;
        while written < payload.len() {
            let off = (self.cursor % page_size) as usize;
            let take = min(page_size as usize - off, payload.len() - written);
            self.write_buf[off..off + take].copy_from_slice(&payload[written..written + take]);
            checksum.update(&payload[written..written + take]);
            written += take;
            self.cursor += take as u32;
            if self.cursor % page_size == 0 {
                self.seal_page(dirtied)?;
                self.cursor += PAGE_HDR_LEN as u32;
                self.buf_max_record = record.0;
            }
        }

        Ok(VarRef {
            addr,
            record,
            len,
            checksum: checksum.finalize(),
        })
    }

    /// Forces the partially-filled current page out to durable storage.
    ///
    /// Recovery only trusts pages that reached storage through a completed
    /// rollover or this call; anything still in the volatile buffer is lost
    /// with the process. A no-op when the buffer holds no payload bytes.
    pub fn flush(&mut self) -> Result<()> {
        if self.cursor % self.page_size != PAGE_HDR_LEN as u32 {
            let mut dirtied = false;
            self.seal_page(&mut dirtied)?;
            self.cursor += self.page_size - self.cursor % self.page_size + PAGE_HDR_LEN as u32;
        }
        self.store.sync()?;
        trace!(cursor = self.cursor, "varlog.flush");
        Ok(())
    }

    /// Returns true while `record`'s payload bytes are still retrievable.
    pub fn is_live(&self, record: RecordId) -> bool {
        self.oldest_live.is_some_and(|boundary| record >= boundary)
    }

    /// Logical write cursor: the address the next appended byte lands on.
    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    /// Logical id of the page the next rollover will complete.
    pub fn next_page_id(&self) -> u32 {
        self.next_page_id
    }

    /// Oldest record whose payload has not been reclaimed, if any.
    pub fn oldest_live_record(&self) -> Option<RecordId> {
        self.oldest_live
    }

    /// Physical slots currently free to take a page without destroying
    /// live payloads.
    pub fn avail_pages(&self) -> u32 {
        self.avail_pages
    }

    /// Fixed page size in bytes.
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Size in bytes of the header at the start of every page.
    pub fn header_len(&self) -> u32 {
        PAGE_HDR_LEN as u32
    }

    /// Fixed page budget of the log.
    pub fn num_pages(&self) -> u32 {
        self.num_pages
    }

    /// Returns a handle to the log's metrics.
    pub fn metrics(&self) -> Arc<VarLogMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Returns a snapshot of current metrics.
    pub fn metrics_snapshot(&self) -> VarLogMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Seals the buffered page into its slot and starts a fresh one.
    ///
    /// The cursor is not moved here; callers advance it according to how
    /// the page filled.
    fn seal_page(&mut self, dirtied: &mut bool) -> Result<()> {
        let slot = self.next_page_id % self.num_pages;
        if self.avail_pages == 0 {
            self.reclaim(slot, dirtied)?;
        }
        let header = PageHeader {
            page_id: self.next_page_id,
            max_record: self.buf_max_record as u32,
        };
        header.encode(&mut self.write_buf[..PAGE_HDR_LEN])?;
        self.store.write_page(slot, &self.write_buf)?;
        *dirtied = true;
        if self.read_slot == Some(slot) {
            self.read_slot = None;
        }
        trace!(page = self.next_page_id, slot, "varlog.seal");
        self.next_page_id += 1;
        self.avail_pages -= 1;
        self.write_buf.fill(0);
        self.buf_max_record = 0;
        self.metrics.add_pages_written(1);
        Ok(())
    }

    /// Erases the oldest block of slots so `slot` can be rewritten.
    ///
    /// The liveness boundary moves past every record with bytes on the
    /// erased block, and past those on the first surviving page as well:
    /// recovery cannot tell whether a record beginning on that page started
    /// earlier, so the run-time boundary matches what a restart would
    /// compute.
    fn reclaim(&mut self, slot: u32, dirtied: &mut bool) -> Result<()> {
        let survivor = (slot + self.erase_pages) % self.num_pages;
        if !self.store.read_page(survivor, &mut self.read_buf)? {
            return Err(CinderError::Corruption(
                "reclamation found no surviving page".into(),
            ));
        }
        self.metrics.add_page_reads(1);
        let header = PageHeader::decode(&self.read_buf[..PAGE_HDR_LEN])?;
        if !header.plausible_at(survivor, self.num_pages) {
            return Err(CinderError::Corruption(
                "surviving page header implausible".into(),
            ));
        }
        self.read_slot = Some(survivor);
        self.store.erase(slot..slot + self.erase_pages)?;
        *dirtied = true;
        self.avail_pages += self.erase_pages;
        let boundary = RecordId(u64::from(header.max_record) + 1);
        self.oldest_live = Some(boundary);
        self.metrics.add_pages_reclaimed(u64::from(self.erase_pages));
        trace!(
            first_slot = slot,
            count = self.erase_pages,
            boundary = boundary.0,
            "varlog.reclaim"
        );
        Ok(())
    }

    /// Returns the bytes of the page at `slot`, preferring the volatile
    /// write buffer and the one-page read cache over a store fetch.
    pub(crate) fn page_bytes(&mut self, slot: u32) -> Result<&[u8]> {
        if slot == self.next_page_id % self.num_pages {
            self.metrics.add_buffer_hits(1);
            return Ok(&self.write_buf);
        }
        if self.read_slot == Some(slot) {
            self.metrics.add_buffer_hits(1);
            return Ok(&self.read_buf);
        }
        if !self.store.read_page(slot, &mut self.read_buf)? {
            return Err(CinderError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "payload page was never persisted",
            )));
        }
        self.read_slot = Some(slot);
        self.metrics.add_page_reads(1);
        Ok(&self.read_buf)
    }
}
