//! # BlobStore
//!
//! The persistent, page-oriented blob store underneath a Geographic Object
//! Library. A store is one file, divided into 1 GiB segments, each segment
//! divided into power-of-two pages (`page_size_shift` is fixed at creation).
//! Page 0 holds the [`StoreHeader`]; everything else is blobs.
//!
//! Reads go straight through the segment mapping and are zero-copy. All
//! mutation happens inside a [`Transaction`](super::txn::Transaction),
//! obtained through `begin(&mut self)` — requiring `&mut self` is how the
//! single-writer rule is enforced at compile time, the same borrow-checker
//! trick the mapping layer documents for its growth path.
//!
//! ## Open protocol
//!
//! 1. Replay a leftover rollback journal, if any (crash recovery).
//! 2. Map segment 0 and verify magic, version and page-size shift
//!    (`InvalidFormat` on mismatch).
//! 3. Verify the header checksum; with the journal already replayed, a
//!    mismatch at this point is real corruption, not a torn commit.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use eyre::{ensure, Result, WrapErr};

use crate::error::StoreError;

use super::blob::{pages_for_payload, BlobHeader, BLOB_HEADER_SIZE};
use super::header::{PageNum, StoreHeader, HEADER_SIZE};
use super::journal;
use super::mapping::{SegmentedMapping, SEGMENT_SIZE};
use super::txn::Transaction;

/// Hard cap on store size: 4096 segments of 1 GiB.
pub const MAX_STORE_SIZE: u64 = 1 << 42;

#[derive(Debug)]
pub struct BlobStore {
    mapping: SegmentedMapping,
    path: PathBuf,
    page_size_shift: u8,
}

impl BlobStore {
    /// Opens a store read-only. This is the query path.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_inner(path, false)
    }

    /// Opens a store for mutation (maintenance path).
    pub fn open_writable(path: &Path) -> Result<Self> {
        Self::open_inner(path, true)
    }

    fn open_inner(path: &Path, writable: bool) -> Result<Self> {
        if !path.exists() {
            return Err(StoreError::FileNotFound {
                path: path.to_path_buf(),
            }
            .into());
        }
        journal::replay(path)
            .wrap_err_with(|| format!("journal rollback failed for '{}'", path.display()))?;

        let mapping = SegmentedMapping::open(path, writable)?;
        let invalid = |reason: String| StoreError::InvalidFormat {
            path: path.to_path_buf(),
            reason,
        };

        if mapping.len() < HEADER_SIZE as u64 {
            return Err(invalid(format!("file is only {} bytes", mapping.len())).into());
        }
        let header_bytes = mapping.slice(0, HEADER_SIZE)?;
        let header = StoreHeader::from_bytes(header_bytes)
            .map_err(|e| invalid(e.to_string()))
            .wrap_err_with(|| format!("cannot open '{}'", path.display()))?;

        if !header.checksum_ok() {
            return Err(invalid("header checksum mismatch".into()).into());
        }

        let page_size_shift = header.page_size_shift();
        let store = Self {
            mapping,
            path: path.to_path_buf(),
            page_size_shift,
        };
        tracing::debug!(
            store = %path.display(),
            pages = store.header()?.total_page_count(),
            page_size = store.page_size(),
            writable,
            "opened store"
        );
        Ok(store)
    }

    /// Creates a new, empty store: one header page, no blobs.
    pub fn create(path: &Path, page_size_shift: u8) -> Result<Self> {
        ensure!(
            (12..=16).contains(&page_size_shift),
            "page size shift {} out of range 12..=16",
            page_size_shift
        );

        let timestamp = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let header = StoreHeader::new(page_size_shift, timestamp, make_guid(timestamp));

        let page_size = 1u64 << page_size_shift;
        let mut mapping = SegmentedMapping::create(path, page_size)?;
        mapping
            .slice_mut(0, HEADER_SIZE)?
            .copy_from_slice(zerocopy::IntoBytes::as_bytes(&header));
        mapping.flush_all()?;

        Ok(Self {
            mapping,
            path: path.to_path_buf(),
            page_size_shift,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_size_shift(&self) -> u8 {
        self.page_size_shift
    }

    pub fn page_size(&self) -> usize {
        1 << self.page_size_shift
    }

    pub fn page_offset(&self, page: PageNum) -> u64 {
        (page as u64) << self.page_size_shift
    }

    /// Pages per 1 GiB segment.
    pub fn segment_pages(&self) -> u32 {
        (SEGMENT_SIZE >> self.page_size_shift) as u32
    }

    pub fn header(&self) -> Result<&StoreHeader> {
        StoreHeader::from_bytes(self.mapping.slice(0, HEADER_SIZE)?)
    }

    pub fn total_page_count(&self) -> Result<u32> {
        Ok(self.header()?.total_page_count())
    }

    pub fn blob_header(&self, page: PageNum) -> Result<BlobHeader> {
        let total = self.total_page_count()?;
        ensure!(
            page >= 1 && page < total,
            "page {} out of bounds (total pages {})",
            page,
            total
        );
        BlobHeader::read(self.mapping.slice(self.page_offset(page), BLOB_HEADER_SIZE)?)
    }

    /// Returns the payload of the allocated blob whose first page is `page`.
    pub fn blob_payload(&self, page: PageNum) -> Result<&[u8]> {
        let header = self.blob_header(page)?;
        if header.is_free() {
            return Err(StoreError::InvalidFormat {
                path: self.path.clone(),
                reason: format!("blob at page {} is free", page),
            }
            .into());
        }
        let payload_size = header.payload_size();
        let pages = pages_for_payload(payload_size, self.page_size_shift);
        let total = self.total_page_count()?;
        if page.checked_add(pages).map_or(true, |end| end > total) {
            return Err(StoreError::InvalidFormat {
                path: self.path.clone(),
                reason: format!(
                    "blob at page {} claims {} pages beyond total {}",
                    page, pages, total
                ),
            }
            .into());
        }
        self.mapping.slice(
            self.page_offset(page) + BLOB_HEADER_SIZE as u64,
            payload_size as usize,
        )
    }

    /// Advisory read-ahead for a blob about to be scanned.
    pub fn prefetch_blob(&self, page: PageNum) {
        let offset = self.page_offset(page);
        if let Ok(bytes) = self.mapping.slice(offset, BLOB_HEADER_SIZE) {
            if let Ok(header) = BlobHeader::read(bytes) {
                self.mapping
                    .prefetch(offset, header.raw_size() as usize + BLOB_HEADER_SIZE);
            }
        }
    }

    /// Flushes dirty pages to disk. May block on the kernel.
    pub fn force(&self) -> Result<()> {
        self.mapping.flush_all()
    }

    /// Starts the (single) writer transaction.
    pub fn begin(&mut self) -> Result<Transaction<'_>> {
        ensure!(
            self.mapping.is_writable(),
            "store '{}' was opened read-only",
            self.path.display()
        );
        Transaction::new(self)
    }

    pub(super) fn mapping(&self) -> &SegmentedMapping {
        &self.mapping
    }

    pub(super) fn mapping_mut(&mut self) -> &mut SegmentedMapping {
        &mut self.mapping
    }
}

fn make_guid(timestamp: u64) -> [u8; 16] {
    use std::sync::atomic::{AtomicU64, Ordering};
    // Timestamp, PID, ASLR and a process-wide counter; stores only need the
    // GUID to tell files apart, not to be unguessable.
    static SEQUENCE: AtomicU64 = AtomicU64::new(0);
    let stack_probe = &timestamp as *const u64 as u64;
    let mixed = stack_probe
        .rotate_left(17)
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ ((std::process::id() as u64) << 32)
        ^ SEQUENCE.fetch_add(1, Ordering::Relaxed).rotate_right(8);
    let mut guid = [0u8; 16];
    guid[..8].copy_from_slice(&timestamp.to_le_bytes());
    guid[8..].copy_from_slice(&mixed.to_le_bytes());
    guid
}
