#![allow(missing_docs)]

use std::sync::Arc;

use cinder::primitives::io::{FileIo, StdFileIo};
use cinder::primitives::pager::{FilePageStore, PageStore};
use cinder::storage::{VarLog, VarLogOptions};
use cinder::types::page::PAGE_HDR_LEN;
use cinder::{CinderError, Result};
use tempfile::tempdir;

const PAGE_SIZE: u32 = 512;
const NUM_PAGES: u32 = 8;
const ERASE_PAGES: u32 = 2;

fn open_log(store: &Arc<FilePageStore>) -> Result<VarLog> {
    VarLog::open(
        Arc::clone(store) as Arc<dyn PageStore>,
        VarLogOptions::new(NUM_PAGES).erase_pages(ERASE_PAGES),
    )
}

#[test]
fn multi_page_payload_roundtrips_across_reopen() -> Result<()> {
    let dir = tempdir()?;
    let store = Arc::new(FilePageStore::open(dir.path().join("var.db"), PAGE_SIZE)?);
    let mut log = open_log(&store)?;

    let payload: Vec<u8> = (0..2000u32).map(|v| (v % 251) as u8).collect();
    let token = log.append(&payload)?;
    log.flush()?;
    drop(log);

    let mut log = open_log(&store)?;
    let mut stream = log.stream(token)?.expect("payload should be live");
    assert_eq!(stream.len(), 2000);

    // Consume in awkward chunk sizes to cross page boundaries mid-read.
    let mut collected = Vec::new();
    let mut chunk = [0u8; 333];
    loop {
        let read = stream.read(&mut log, &mut chunk)?;
        if read == 0 {
            break;
        }
        collected.extend_from_slice(&chunk[..read]);
    }
    assert_eq!(collected, payload);
    assert_eq!(stream.remaining(), 0);
    Ok(())
}

#[test]
fn oversized_destination_stops_at_end_of_stream() -> Result<()> {
    let dir = tempdir()?;
    let store = Arc::new(FilePageStore::open(dir.path().join("var.db"), PAGE_SIZE)?);
    let mut log = open_log(&store)?;

    let token = log.append(b"short payload")?;
    let mut stream = log.stream(token)?.unwrap();
    let mut dst = [0u8; 64];
    assert_eq!(stream.read(&mut log, &mut dst)?, 13);
    assert_eq!(&dst[..13], b"short payload");
    assert_eq!(stream.read(&mut log, &mut dst)?, 0);
    Ok(())
}

#[test]
fn corrupted_payload_fails_the_checksum() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("var.db");
    let store = Arc::new(FilePageStore::open(&path, PAGE_SIZE)?);
    let mut log = open_log(&store)?;

    let token = log.append(&[0x5A; 100])?;
    log.flush()?;
    drop(log);

    // Flip one payload byte on storage, past the header and length prefix.
    let io = StdFileIo::open(&path)?;
    let mut byte = [0u8; 1];
    io.read_at(50, &mut byte)?;
    io.write_at(50, &[byte[0] ^ 0xFF])?;

    let mut log = open_log(&store)?;
    let mut stream = log.stream(token)?.unwrap();
    let err = stream.read_to_vec(&mut log).unwrap_err();
    assert!(matches!(err, CinderError::Corruption(_)));
    Ok(())
}

#[test]
fn forged_token_length_is_detected() -> Result<()> {
    let dir = tempdir()?;
    let store = Arc::new(FilePageStore::open(dir.path().join("var.db"), PAGE_SIZE)?);
    let mut log = open_log(&store)?;

    let mut token = log.append(b"honest bytes")?;
    token.len += 1;
    let err = log.stream(token).unwrap_err();
    assert!(matches!(err, CinderError::Corruption(_)));
    Ok(())
}

#[test]
fn inconsistent_header_sequence_fails_open() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("var.db");
    let store = Arc::new(FilePageStore::open(&path, PAGE_SIZE)?);
    let mut log = open_log(&store)?;

    log.append(&vec![1u8; 500])?; // fills page 0 exactly
    log.append(b"second page")?;
    log.flush()?;
    drop(log);

    // Rewrite slot 1's header to claim a page id its neighbors cannot
    // precede: congruent to the slot, so it scans as plausible.
    let io = StdFileIo::open(&path)?;
    let forged_id = (NUM_PAGES + 1).to_be_bytes();
    io.write_at(u64::from(PAGE_SIZE), &forged_id)?;

    let err = open_log(&store).unwrap_err();
    assert!(matches!(err, CinderError::Corruption(_)));
    Ok(())
}

#[test]
fn reclaimed_token_reads_absent_without_side_effects() -> Result<()> {
    let dir = tempdir()?;
    let store = Arc::new(FilePageStore::open(dir.path().join("var.db"), PAGE_SIZE)?);
    let mut log = open_log(&store)?;

    // Page-filling payloads: the budget wraps after NUM_PAGES of them.
    let fill = (PAGE_SIZE - PAGE_HDR_LEN as u32 - 4) as usize;
    let first = log.append(&vec![0u8; fill])?;
    for i in 1..NUM_PAGES + ERASE_PAGES {
        log.append(&vec![i as u8; fill])?;
    }
    assert!(!log.is_live(first.record));

    let cursor = log.cursor();
    let avail = log.avail_pages();
    assert!(log.stream(first)?.is_none());
    // Asking again keeps answering the same way, and nothing moved.
    assert!(log.stream(first)?.is_none());
    assert_eq!(log.cursor(), cursor);
    assert_eq!(log.avail_pages(), avail);
    Ok(())
}
