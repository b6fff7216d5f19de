use std::convert::TryInto;
use std::ops::Range;

use crate::error::{CinderError, Result};

/// Length in bytes of the header at the start of every var-log page.
pub const PAGE_HDR_LEN: usize = 8;

/// Length in bytes of the payload length prefix preceding each record.
pub const LEN_PREFIX_LEN: usize = 4;

/// Logical page id an erased slot reads back as; never assigned to a page.
pub const ERASED_PAGE_ID: u32 = u32::MAX;

const HDR_PAGE_ID: Range<usize> = 0..4;
const HDR_MAX_RECORD: Range<usize> = 4..8;

/// Header persisted in the first [`PAGE_HDR_LEN`] bytes of every var-log page.
///
/// The logical page id survives physical slot reuse; the greatest record id
/// is what lets recovery place the liveness boundary without replaying
/// payload bytes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PageHeader {
    /// Logical page id, monotonically increasing across slot reuse.
    pub page_id: u32,
    /// Greatest var-record id with payload bytes on this page (0 when the
    /// page holds none, which never happens for a durably written page).
    pub max_record: u32,
}

impl PageHeader {
    /// Serializes the header into the first [`PAGE_HDR_LEN`] bytes of `buf`.
    pub fn encode(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < PAGE_HDR_LEN {
            return Err(CinderError::InvalidArgument(
                "header buffer too small".into(),
            ));
        }
        buf[HDR_PAGE_ID].copy_from_slice(&self.page_id.to_be_bytes());
        buf[HDR_MAX_RECORD].copy_from_slice(&self.max_record.to_be_bytes());
        Ok(())
    }

    /// Deserializes a header from the first [`PAGE_HDR_LEN`] bytes of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < PAGE_HDR_LEN {
            return Err(CinderError::Corruption("page header truncated".into()));
        }
        let page_id = u32::from_be_bytes(
            buf[HDR_PAGE_ID]
                .try_into()
                .map_err(|_| CinderError::Corruption("page id truncated".into()))?,
        );
        let max_record = u32::from_be_bytes(
            buf[HDR_MAX_RECORD]
                .try_into()
                .map_err(|_| CinderError::Corruption("max record id truncated".into()))?,
        );
        Ok(Self {
            page_id,
            max_record,
        })
    }

    /// Returns true when this header can belong to the given physical slot.
    ///
    /// Rules out erased fill, ids written to the wrong slot, and the all-zero
    /// pattern a blank region decodes to (record ids start at 1, so a real
    /// page never pairs id 0 with no records).
    pub fn plausible_at(&self, slot: u32, num_pages: u32) -> bool {
        self.page_id != ERASED_PAGE_ID
            && self.page_id % num_pages == slot
            && !(self.page_id == 0 && self.max_record == 0)
    }
}

/// Writes a record's 4-byte length prefix at the start of `buf`.
pub fn encode_len_prefix(buf: &mut [u8], len: u32) -> Result<()> {
    if buf.len() < LEN_PREFIX_LEN {
        return Err(CinderError::InvalidArgument(
            "length prefix buffer too small".into(),
        ));
    }
    buf[..LEN_PREFIX_LEN].copy_from_slice(&len.to_be_bytes());
    Ok(())
}

/// Reads a record's 4-byte length prefix from the start of `buf`.
pub fn decode_len_prefix(buf: &[u8]) -> Result<u32> {
    let raw: [u8; LEN_PREFIX_LEN] = buf
        .get(..LEN_PREFIX_LEN)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| CinderError::Corruption("length prefix truncated".into()))?;
    Ok(u32::from_be_bytes(raw))
}
