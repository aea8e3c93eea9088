//! # Rollback Journal
//!
//! Transactions journal the *pre-image* of every page they touch into a
//! sidecar file (`<store>.journal`). The commit protocol is:
//!
//! 1. Append the header pre-image, fsync the journal.
//! 2. Flush all data segments.
//! 3. Write the new header (checksum stamped last), flush it.
//! 4. Delete the journal.
//!
//! A crash before step 4 leaves the journal behind. On the next open the
//! journal is replayed — every frame with a valid checksum has its page
//! written back — which restores the pre-transaction snapshot regardless of
//! how far the commit got. An invalid checksum marks the write frontier of
//! the journal itself and ends replay, the same "bad checksum = end of log"
//! rule the write-ahead world uses for recovery.
//!
//! Frames are appended on first touch during the transaction, so a journal
//! interrupted mid-transaction still covers every page the kernel may have
//! flushed behind our back.
//!
//! ## Frame format
//!
//! ```text
//! +--------------------+-------------------+
//! | FrameHeader (16 B) | page data (pgsz)  |
//! +--------------------+-------------------+
//! ```
//!
//! The checksum is CRC-32 over `page_no`, `page_size` and the page data.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use hashbrown::HashMap;
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::header::PageNum;

pub const FRAME_HEADER_SIZE: usize = 16;

const CRC32: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISCSI);

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct FrameHeader {
    page_no: U32,
    page_size: U32,
    checksum: U32,
    _reserved: U32,
}

const _: () = assert!(std::mem::size_of::<FrameHeader>() == FRAME_HEADER_SIZE);

fn frame_checksum(page_no: u32, page_data: &[u8]) -> u32 {
    let mut digest = CRC32.digest();
    digest.update(&page_no.to_le_bytes());
    digest.update(&(page_data.len() as u32).to_le_bytes());
    digest.update(page_data);
    digest.finalize()
}

pub fn journal_path(store_path: &Path) -> PathBuf {
    let mut os = store_path.as_os_str().to_os_string();
    os.push(".journal");
    os.into()
}

/// In-flight journal of one transaction. Keeps pre-images in memory for
/// in-process rollback and mirrors them to the sidecar file for crash
/// recovery.
pub struct Journal {
    path: PathBuf,
    file: Option<File>,
    page_size: usize,
    pre_images: HashMap<PageNum, Box<[u8]>>,
}

impl Journal {
    pub fn begin(store_path: &Path, page_size: usize) -> Self {
        Self {
            path: journal_path(store_path),
            file: None,
            page_size,
            pre_images: HashMap::new(),
        }
    }

    pub fn contains(&self, page: PageNum) -> bool {
        self.pre_images.contains_key(&page)
    }

    pub fn page_count(&self) -> usize {
        self.pre_images.len()
    }

    /// Records the pre-image of `page` if this is its first touch.
    pub fn record(&mut self, page: PageNum, data: &[u8]) -> Result<()> {
        ensure!(
            data.len() == self.page_size,
            "pre-image of page {} has {} bytes, expected {}",
            page,
            data.len(),
            self.page_size
        );
        if self.pre_images.contains_key(&page) {
            return Ok(());
        }

        if self.file.is_none() {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&self.path)
                .wrap_err_with(|| format!("failed to create journal '{}'", self.path.display()))?;
            self.file = Some(file);
        }
        let file = self.file.as_mut().unwrap();

        let header = FrameHeader {
            page_no: U32::new(page),
            page_size: U32::new(data.len() as u32),
            checksum: U32::new(frame_checksum(page, data)),
            _reserved: U32::ZERO,
        };
        file.write_all(header.as_bytes())
            .and_then(|_| file.write_all(data))
            .wrap_err_with(|| format!("failed to append journal frame for page {}", page))?;

        self.pre_images.insert(page, data.to_vec().into_boxed_slice());
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        if let Some(file) = &mut self.file {
            file.flush()
                .and_then(|_| file.sync_all())
                .wrap_err_with(|| format!("failed to sync journal '{}'", self.path.display()))?;
        }
        Ok(())
    }

    /// Pre-images for in-process rollback, in arbitrary order.
    pub fn pre_images(&self) -> impl Iterator<Item = (PageNum, &[u8])> {
        self.pre_images.iter().map(|(p, d)| (*p, &**d))
    }

    /// Removes the sidecar after a successful commit or rollback.
    pub fn remove(&mut self) {
        self.file = None;
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Replays a leftover journal into the store file, restoring the
/// pre-transaction snapshot. Returns the number of pages restored, or
/// `None` when no journal exists. Runs before the store is mapped.
pub fn replay(store_path: &Path) -> Result<Option<usize>> {
    let path = journal_path(store_path);
    let mut journal = match File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e)
                .wrap_err_with(|| format!("failed to open journal '{}'", path.display()))
        }
    };

    let mut store = OpenOptions::new()
        .read(true)
        .write(true)
        .open(store_path)
        .wrap_err_with(|| {
            format!(
                "failed to open '{}' for journal rollback",
                store_path.display()
            )
        })?;

    let mut restored = 0usize;
    let mut header_bytes = [0u8; FRAME_HEADER_SIZE];
    loop {
        match journal.read_exact(&mut header_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e).wrap_err("failed to read journal frame header"),
        }
        let header = FrameHeader::read_from_bytes(&header_bytes)
            .map_err(|e| eyre::eyre!("failed to parse journal frame header: {:?}", e))?;

        let page_size = header.page_size.get() as usize;
        if page_size == 0 || page_size > (1 << 16) {
            break;
        }
        let mut data = vec![0u8; page_size];
        match journal.read_exact(&mut data) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e).wrap_err("failed to read journal frame data"),
        }

        let page_no = header.page_no.get();
        if frame_checksum(page_no, &data) != header.checksum.get() {
            // Torn journal tail; everything before it is intact.
            break;
        }

        store
            .seek(SeekFrom::Start(page_no as u64 * page_size as u64))
            .and_then(|_| store.write_all(&data))
            .wrap_err_with(|| format!("failed to restore page {} from journal", page_no))?;
        restored += 1;
    }

    store
        .sync_all()
        .wrap_err("failed to sync store after journal rollback")?;
    drop(journal);
    std::fs::remove_file(&path)
        .wrap_err_with(|| format!("failed to remove journal '{}'", path.display()))?;

    tracing::warn!(
        store = %store_path.display(),
        pages = restored,
        "rolled back interrupted transaction from journal"
    );
    Ok(Some(restored))
}
