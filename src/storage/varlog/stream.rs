use std::cmp::min;

use crate::error::{CinderError, Result};
use crate::types::page::{self, LEN_PREFIX_LEN, PAGE_HDR_LEN};
use crate::types::VarRef;
use tracing::trace;

use super::VarLog;

/// Finite, forward-only byte stream over one stored payload.
///
/// A stream is a detached cursor: it holds no borrow of the log and fetches
/// pages through it on each [`VarStream::read`] call, crossing page
/// boundaries transparently. It is restartable only by resolving the token
/// again, and it stays trustworthy only until a later append can evict the
/// pages it walks, so callers consume or copy out what they need before
/// writing more records.
#[derive(Debug)]
pub struct VarStream {
    total: u32,
    consumed: u32,
    /// Wrapped byte offset of the next unread payload byte.
    offset: u32,
    expected_crc: u32,
    hasher: crc32fast::Hasher,
}

impl VarLog {
    /// Resolves `token` into a byte stream.
    ///
    /// Returns `Ok(None)` when the payload has been reclaimed by the
    /// circular writer; that is the expected outcome of bounded retention,
    /// not a failure.
    pub fn stream(&mut self, token: VarRef) -> Result<Option<VarStream>> {
        if !self.is_live(token.record) {
            trace!(record = token.record.0, "varlog.stream.reclaimed");
            return Ok(None);
        }
        let page_size = self.page_size();
        let capacity = self.num_pages() * page_size;
        let prefix_at = token.addr % capacity;
        let slot = prefix_at / page_size;
        let in_page = (prefix_at % page_size) as usize;
        let bytes = self.page_bytes(slot)?;
        let len = page::decode_len_prefix(&bytes[in_page..])?;
        if len != token.len {
            return Err(CinderError::Corruption(
                "stored payload length disagrees with token".into(),
            ));
        }
        let mut offset = (prefix_at + LEN_PREFIX_LEN as u32) % capacity;
        if offset % page_size == 0 {
            offset = (offset + PAGE_HDR_LEN as u32) % capacity;
        }
        trace!(record = token.record.0, len, "varlog.stream");
        Ok(Some(VarStream {
            total: len,
            consumed: 0,
            offset,
            expected_crc: token.checksum,
            hasher: crc32fast::Hasher::new(),
        }))
    }
}

impl VarStream {
    /// Total payload length in bytes.
    pub fn len(&self) -> u32 {
        self.total
    }

    /// Returns true for a zero-length payload.
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Payload bytes not yet consumed.
    pub fn remaining(&self) -> u32 {
        self.total - self.consumed
    }

    /// Copies up to `dst.len()` payload bytes into `dst`.
    ///
    /// Returns the number of bytes copied; 0 means end of stream. The call
    /// that consumes the final byte verifies the token checksum and reports
    /// a mismatch as corruption.
    pub fn read(&mut self, log: &mut VarLog, dst: &mut [u8]) -> Result<usize> {
        let page_size = log.page_size();
        let capacity = log.num_pages() * page_size;
        let mut copied = 0usize;
        while copied < dst.len() && self.consumed < self.total {
            let slot = self.offset / page_size;
            let in_page = (self.offset % page_size) as usize;
            let take = min(
                (self.total - self.consumed) as usize,
                min(page_size as usize - in_page, dst.len() - copied),
            );
            let bytes = log.page_bytes(slot)?;
            dst[copied..copied + take].copy_from_slice(&bytes[in_page..in_page + take]);
            self.hasher.update(&dst[copied..copied + take]);
            copied += take;
            self.consumed += take as u32;
            self.offset += take as u32;
            if self.offset % page_size == 0 {
                self.offset = (self.offset + PAGE_HDR_LEN as u32) % capacity;
            }
        }
        if self.consumed == self.total && self.hasher.clone().finalize() != self.expected_crc {
            return Err(CinderError::Corruption("payload checksum mismatch".into()));
        }
        log.metrics.add_bytes_read(copied as u64);
        Ok(copied)
    }

    /// Reads the whole remaining payload into a new vector.
    pub fn read_to_vec(&mut self, log: &mut VarLog) -> Result<Vec<u8>> {
        let mut out = vec![0u8; self.remaining() as usize];
        let mut filled = 0;
        while filled < out.len() {
            let read = self.read(log, &mut out[filled..])?;
            if read == 0 {
                break;
            }
            filled += read;
        }
        out.truncate(filled);
        Ok(out)
    }
}
