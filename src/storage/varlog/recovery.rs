use crate::error::{CinderError, Result};
use crate::primitives::pager::PageStore;
use crate::types::page::{PageHeader, PAGE_HDR_LEN};
use crate::types::RecordId;
use tracing::debug;

/// Writer bookkeeping reconstructed from persisted page headers.
#[derive(Debug)]
pub(crate) struct Recovered {
    pub cursor: u32,
    pub next_page_id: u32,
    pub oldest_live: Option<RecordId>,
    pub avail_pages: u32,
    pub next_record: u64,
}

/// Scans the persisted slots and rebuilds the writer state.
///
/// Only complete pages that reached storage are trusted; a torn trailing
/// page reads as absent and ends the scan before it. Returns `None` when no
/// durable page exists, leaving the caller on the empty-log state.
pub(crate) fn scan(
    store: &dyn PageStore,
    page_size: u32,
    num_pages: u32,
    erase_pages: u32,
) -> Result<Option<Recovered>> {
    let mut buf = vec![0u8; page_size as usize];

    // Locate the start of the newest run of consecutive pages. The first
    // erase block can be junk when a crash interrupted a wrap-around
    // reclamation, so up to two block starts are probed.
    let mut slot: u32 = 0;
    let mut more = store.read_page(0, &mut buf)?;
    let mut probes = 0;
    let mut found = false;
    let mut run_start = 0u32;
    let mut max_id = 0u32;
    while more && probes < 2 {
        let header = PageHeader::decode(&buf[..PAGE_HDR_LEN])?;
        if header.plausible_at(slot, num_pages) {
            run_start = slot;
            max_id = header.page_id;
            found = true;
            break;
        }
        slot += erase_pages - slot % erase_pages;
        probes += 1;
        more = slot < num_pages && store.read_page(slot, &mut buf)?;
    }
    if !found {
        return Ok(None);
    }

    // Extend the run while logical ids stay consecutive. Where it stops is
    // either the end of everything written or the wrap-around seam.
    slot += 1;
    more = slot < num_pages && store.read_page(slot, &mut buf)?;
    let mut seam: Option<PageHeader> = None;
    while more {
        let header = PageHeader::decode(&buf[..PAGE_HDR_LEN])?;
        if header.plausible_at(slot, num_pages) && header.page_id == max_id + 1 {
            max_id = header.page_id;
            slot += 1;
            more = slot < num_pages && store.read_page(slot, &mut buf)?;
        } else {
            seam = Some(header);
            break;
        }
    }

    // The oldest surviving page: where the run started, unless the writer
    // wrapped. A plausible seam page is itself the oldest; otherwise the
    // seam is junk from the latest reclamation and the oldest data begins
    // at the next erase-block boundary.
    let (oldest_slot, oldest) = match seam {
        None => {
            if !store.read_page(run_start, &mut buf)? {
                return Err(CinderError::Corruption("oldest page unreadable".into()));
            }
            (run_start, PageHeader::decode(&buf[..PAGE_HDR_LEN])?)
        }
        Some(header) if header.plausible_at(slot, num_pages) => (slot, header),
        Some(_) => {
            let target = (slot + (erase_pages - slot % erase_pages)) % num_pages;
            if !store.read_page(target, &mut buf)? {
                return Err(CinderError::Corruption(
                    "no page found past the reclaimed block".into(),
                ));
            }
            let header = PageHeader::decode(&buf[..PAGE_HDR_LEN])?;
            if !header.plausible_at(target, num_pages) {
                return Err(CinderError::Corruption(
                    "implausible page past the reclaimed block".into(),
                ));
            }
            (target, header)
        }
    };

    let min_id = oldest.page_id;
    if min_id > max_id || max_id - min_id >= num_pages {
        return Err(CinderError::Corruption(
            "logical page id sequence inconsistent".into(),
        ));
    }

    // Resume record ids above everything durably stamped.
    if !store.read_page(max_id % num_pages, &mut buf)? {
        return Err(CinderError::Corruption("newest page unreadable".into()));
    }
    let newest = PageHeader::decode(&buf[..PAGE_HDR_LEN])?;
    let next_record = u64::from(newest.max_record) + 1;

    let oldest_live = if min_id == 0 {
        // Nothing was ever overwritten; the first record assigned still has
        // its payload on page 0.
        Some(RecordId(1))
    } else {
        // Records beginning on an overwritten page may spill into the
        // oldest surviving one, so everything up to and including that
        // page's records is given up.
        Some(RecordId(u64::from(oldest.max_record) + 1))
    };

    let next_page_id = max_id + 1;
    let recovered = Recovered {
        cursor: (next_page_id % num_pages) * page_size + PAGE_HDR_LEN as u32,
        next_page_id,
        oldest_live,
        avail_pages: num_pages - (max_id - min_id) - 1,
        next_record,
    };
    debug!(
        next_page = recovered.next_page_id,
        oldest_page = min_id,
        oldest_slot,
        avail = recovered.avail_pages,
        "varlog.recover"
    );
    Ok(Some(recovered))
}
