//! # Store Header
//!
//! Page 0 of every store starts with a fixed 2176-byte header: 128 bytes of
//! metadata followed by the 512-slot trunk free-table. All fields are
//! little-endian; the layout is pinned by offset and must never change:
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  ------------------------------------------------
//! 0       4     magic            0x7ADA0BB1
//! 4       4     version          1_000_000
//! 8       8     creation_timestamp (epoch millis)
//! 16      4     total_page_count
//! 20      16    guid
//! 36      1     page_size_shift  (12..=16)
//! 37      3     reserved
//! 40      4     metadata_size
//! 44      4     properties_ptr   (global string table blob, 0 = none)
//! 48      4     index_ptr        (tile index root blob, 0 = none)
//! 52      4     trunk_ranges     (1 bit per 16 trunk slots)
//! 56      4     checksum         (CRC-32 over all other bytes)
//! 60      4     tail_free_pages  (free blob ending at total_page_count)
//! 64      64    subtype_data     (opaque to the store)
//! 128     2048  trunk_free_table[512]
//! ```
//!
//! The checksum is stamped as the last step of a commit; a mismatch on open
//! means the header write was torn and the journal must be replayed. Readers
//! treat the header as immutable for the duration of a query snapshot; the
//! writer mutates a private copy and publishes it wholesale at commit.

use eyre::{ensure, Result};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const MAGIC: u32 = 0x7ADA_0BB1;
pub const VERSION: u32 = 1_000_000;

pub const HEADER_SIZE: usize = 2176;
pub const TRUNK_SLOTS: usize = 512;

const CHECKSUM_OFS: usize = 56;

const CRC32: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISCSI);

/// A page number. Absolute byte offset = `page << page_size_shift`.
pub type PageNum = u32;

#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct StoreHeader {
    magic: U32,
    version: U32,
    creation_timestamp: U64,
    total_page_count: U32,
    guid: [u8; 16],
    page_size_shift: u8,
    reserved: [u8; 3],
    metadata_size: U32,
    properties_ptr: U32,
    index_ptr: U32,
    trunk_ranges: U32,
    checksum: U32,
    tail_free_pages: U32,
    subtype_data: [u8; 64],
    trunk_free_table: [U32; TRUNK_SLOTS],
}

const _: () = assert!(std::mem::size_of::<StoreHeader>() == HEADER_SIZE);
const _: () = assert!(std::mem::offset_of!(StoreHeader, total_page_count) == 16);
const _: () = assert!(std::mem::offset_of!(StoreHeader, trunk_ranges) == 52);
const _: () = assert!(std::mem::offset_of!(StoreHeader, checksum) == CHECKSUM_OFS);
const _: () = assert!(std::mem::offset_of!(StoreHeader, subtype_data) == 64);
const _: () = assert!(std::mem::offset_of!(StoreHeader, trunk_free_table) == 128);

impl StoreHeader {
    pub fn new(page_size_shift: u8, creation_timestamp: u64, guid: [u8; 16]) -> Self {
        let mut header = Self {
            magic: U32::new(MAGIC),
            version: U32::new(VERSION),
            creation_timestamp: U64::new(creation_timestamp),
            total_page_count: U32::new(1),
            guid,
            page_size_shift,
            reserved: [0; 3],
            metadata_size: U32::new(HEADER_SIZE as u32),
            properties_ptr: U32::new(0),
            index_ptr: U32::new(0),
            trunk_ranges: U32::new(0),
            checksum: U32::new(0),
            tail_free_pages: U32::new(0),
            subtype_data: [0; 64],
            trunk_free_table: [U32::ZERO; TRUNK_SLOTS],
        };
        header.stamp_checksum();
        header
    }

    /// Parses and structurally verifies a header. The checksum is *not*
    /// checked here — the store decides whether a mismatch means a pending
    /// rollback or corruption.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= HEADER_SIZE,
            "truncated store header: {} < {}",
            bytes.len(),
            HEADER_SIZE
        );

        let header = Self::ref_from_bytes(&bytes[..HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse store header: {:?}", e))?;

        ensure!(
            header.magic.get() == MAGIC,
            "bad magic {:#010x} (expected {:#010x})",
            header.magic.get(),
            MAGIC
        );
        ensure!(
            header.version.get() == VERSION,
            "unsupported store version {} (expected {})",
            header.version.get(),
            VERSION
        );
        ensure!(
            (12..=16).contains(&header.page_size_shift),
            "page size shift {} out of range 12..=16",
            header.page_size_shift
        );

        Ok(header)
    }

    pub fn compute_checksum(&self) -> u32 {
        let bytes = self.as_bytes();
        let mut digest = CRC32.digest();
        digest.update(&bytes[..CHECKSUM_OFS]);
        digest.update(&bytes[CHECKSUM_OFS + 4..]);
        digest.finalize()
    }

    pub fn stamp_checksum(&mut self) {
        self.checksum = U32::new(self.compute_checksum());
    }

    pub fn checksum_ok(&self) -> bool {
        self.checksum.get() == self.compute_checksum()
    }

    pub fn creation_timestamp(&self) -> u64 {
        self.creation_timestamp.get()
    }

    pub fn guid(&self) -> &[u8; 16] {
        &self.guid
    }

    pub fn page_size_shift(&self) -> u8 {
        self.page_size_shift
    }

    pub fn total_page_count(&self) -> u32 {
        self.total_page_count.get()
    }

    pub fn set_total_page_count(&mut self, pages: u32) {
        self.total_page_count = U32::new(pages);
    }

    pub fn properties_ptr(&self) -> PageNum {
        self.properties_ptr.get()
    }

    pub fn set_properties_ptr(&mut self, page: PageNum) {
        self.properties_ptr = U32::new(page);
    }

    pub fn index_ptr(&self) -> PageNum {
        self.index_ptr.get()
    }

    pub fn set_index_ptr(&mut self, page: PageNum) {
        self.index_ptr = U32::new(page);
    }

    pub fn tail_free_pages(&self) -> u32 {
        self.tail_free_pages.get()
    }

    pub fn set_tail_free_pages(&mut self, pages: u32) {
        self.tail_free_pages = U32::new(pages);
    }

    pub fn subtype_data(&self) -> &[u8; 64] {
        &self.subtype_data
    }

    pub fn subtype_data_mut(&mut self) -> &mut [u8; 64] {
        &mut self.subtype_data
    }

    pub fn trunk_ranges(&self) -> u32 {
        self.trunk_ranges.get()
    }

    pub fn set_trunk_ranges(&mut self, ranges: u32) {
        self.trunk_ranges = U32::new(ranges);
    }

    pub fn trunk_slot(&self, slot: usize) -> PageNum {
        self.trunk_free_table[slot].get()
    }

    pub fn set_trunk_slot(&mut self, slot: usize, page: PageNum) {
        self.trunk_free_table[slot] = U32::new(page);
    }

    /// Serialized trunk table bytes; tests compare these to verify that
    /// alloc/free pairs restore the free-table exactly.
    pub fn trunk_table_bytes(&self) -> &[u8] {
        self.trunk_free_table.as_bytes()
    }
}

impl std::fmt::Debug for StoreHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHeader")
            .field("total_page_count", &self.total_page_count.get())
            .field("page_size_shift", &self.page_size_shift)
            .field("properties_ptr", &self.properties_ptr.get())
            .field("index_ptr", &self.index_ptr.get())
            .field("trunk_ranges", &format_args!("{:#010x}", self.trunk_ranges.get()))
            .field("tail_free_pages", &self.tail_free_pages.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_size_is_2176() {
        assert_eq!(std::mem::size_of::<StoreHeader>(), 2176);
    }

    #[test]
    fn new_header_starts_with_expected_bytes() {
        let header = StoreHeader::new(12, 0, [0; 16]);

        // magic + version, little-endian
        assert_eq!(
            &header.as_bytes()[..8],
            &[0xB1, 0x0B, 0xDA, 0x7A, 0x40, 0x42, 0x0F, 0x00]
        );
    }

    #[test]
    fn from_bytes_accepts_valid_header() {
        let header = StoreHeader::new(12, 1_700_000_000_000, [7; 16]);
        let bytes = header.as_bytes();

        let parsed = StoreHeader::from_bytes(bytes).unwrap();

        assert_eq!(parsed.creation_timestamp(), 1_700_000_000_000);
        assert_eq!(parsed.total_page_count(), 1);
        assert_eq!(parsed.guid(), &[7; 16]);
    }

    #[test]
    fn from_bytes_rejects_corrupted_magic() {
        let header = StoreHeader::new(12, 0, [0; 16]);
        let mut bytes = header.as_bytes().to_vec();
        bytes[0] = 0x00;

        assert!(StoreHeader::from_bytes(&bytes).is_err());
    }

    #[test]
    fn from_bytes_rejects_wrong_version() {
        let header = StoreHeader::new(12, 0, [0; 16]);
        let mut bytes = header.as_bytes().to_vec();
        bytes[4..8].copy_from_slice(&999_999u32.to_le_bytes());

        assert!(StoreHeader::from_bytes(&bytes).is_err());
    }

    #[test]
    fn from_bytes_rejects_truncated_header() {
        let header = StoreHeader::new(12, 0, [0; 16]);

        assert!(StoreHeader::from_bytes(&header.as_bytes()[..100]).is_err());
    }

    #[test]
    fn checksum_detects_field_mutation() {
        let mut header = StoreHeader::new(12, 0, [0; 16]);
        assert!(header.checksum_ok());

        header.set_total_page_count(99);

        assert!(!header.checksum_ok());
        header.stamp_checksum();
        assert!(header.checksum_ok());
    }

    #[test]
    fn trunk_slots_round_trip() {
        let mut header = StoreHeader::new(12, 0, [0; 16]);

        header.set_trunk_slot(0, 17);
        header.set_trunk_slot(511, 42);

        assert_eq!(header.trunk_slot(0), 17);
        assert_eq!(header.trunk_slot(511), 42);
        assert_eq!(header.trunk_slot(1), 0);
    }
}
