//! # Blob Headers
//!
//! A blob is a contiguous run of pages inside one segment. Its first 8 bytes
//! are the header:
//!
//! ```text
//! Word 0: preceding_free_pages   page count of the free blob immediately
//!                                before this one, or 0
//! Word 1: bits 0..29 size        allocated: payload bytes
//!                                free:      page count of the blob
//!         bit 30                 unused
//!         bit 31                 is_free
//! ```
//!
//! A free blob extends the header with free-list links and, when it is the
//! representative of its trunk class, a 512-slot leaf free-table:
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----------------------------------------
//! 0       4     preceding_free_pages
//! 4       4     size word (pages | FREE_FLAG)
//! 8       4     prev_free       (0 = head of its list)
//! 12      4     next_free       (0 = end of its list)
//! 16      4     leaf_ranges     (1 bit per 16 leaf slots)
//! 20      44    reserved
//! 64      2048  leaf_free_table[512]
//! ```
//!
//! 2112 bytes total, which fits the smallest supported page (4 KiB), so all
//! free-list surgery touches only the first page of a blob.

use eyre::{ensure, Result};
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::header::PageNum;

pub const BLOB_HEADER_SIZE: usize = 8;
pub const PAYLOAD_SIZE_MASK: u32 = 0x3FFF_FFFF;
pub const FREE_FLAG: u32 = 0x8000_0000;

pub const LEAF_SLOTS: usize = 512;
pub const FREE_BLOB_SIZE: usize = 2112;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct BlobHeader {
    preceding_free_pages: U32,
    size_word: U32,
}

const _: () = assert!(std::mem::size_of::<BlobHeader>() == BLOB_HEADER_SIZE);

impl BlobHeader {
    pub fn allocated(preceding_free_pages: u32, payload_size: u32) -> Self {
        debug_assert!(payload_size <= PAYLOAD_SIZE_MASK);
        Self {
            preceding_free_pages: U32::new(preceding_free_pages),
            size_word: U32::new(payload_size & PAYLOAD_SIZE_MASK),
        }
    }

    pub fn read(bytes: &[u8]) -> Result<Self> {
        ensure!(
            bytes.len() >= BLOB_HEADER_SIZE,
            "truncated blob header: {} bytes",
            bytes.len()
        );
        Self::read_from_bytes(&bytes[..BLOB_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read blob header: {:?}", e))
    }

    pub fn write_to(&self, bytes: &mut [u8]) {
        bytes[..BLOB_HEADER_SIZE].copy_from_slice(self.as_bytes());
    }

    pub fn is_free(&self) -> bool {
        self.size_word.get() & FREE_FLAG != 0
    }

    /// Payload bytes of an allocated blob. Meaningless for a free blob.
    pub fn payload_size(&self) -> u32 {
        debug_assert!(!self.is_free());
        self.size_word.get() & PAYLOAD_SIZE_MASK
    }

    /// Page count of a free blob. Meaningless for an allocated blob.
    pub fn free_pages(&self) -> u32 {
        debug_assert!(self.is_free());
        self.size_word.get() & PAYLOAD_SIZE_MASK
    }

    /// Raw size bits regardless of the free flag; `prefetch` uses this the
    /// same way for both states.
    pub fn raw_size(&self) -> u32 {
        self.size_word.get() & PAYLOAD_SIZE_MASK
    }

    pub fn preceding_free_pages(&self) -> u32 {
        self.preceding_free_pages.get()
    }
}

#[repr(C)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct FreeBlob {
    preceding_free_pages: U32,
    size_word: U32,
    prev_free: U32,
    next_free: U32,
    leaf_ranges: U32,
    reserved: [u8; 44],
    leaf_free_table: [U32; LEAF_SLOTS],
}

const _: () = assert!(std::mem::size_of::<FreeBlob>() == FREE_BLOB_SIZE);
const _: () = assert!(std::mem::offset_of!(FreeBlob, prev_free) == 8);
const _: () = assert!(std::mem::offset_of!(FreeBlob, leaf_ranges) == 16);
const _: () = assert!(std::mem::offset_of!(FreeBlob, leaf_free_table) == 64);

impl FreeBlob {
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= FREE_BLOB_SIZE,
            "page too small for a free blob: {} bytes",
            bytes.len()
        );
        Self::ref_from_bytes(&bytes[..FREE_BLOB_SIZE])
            .map_err(|e| eyre::eyre!("failed to read free blob: {:?}", e))
    }

    pub fn from_bytes_mut(bytes: &mut [u8]) -> Result<&mut Self> {
        ensure!(
            bytes.len() >= FREE_BLOB_SIZE,
            "page too small for a free blob: {} bytes",
            bytes.len()
        );
        Self::mut_from_bytes(&mut bytes[..FREE_BLOB_SIZE])
            .map_err(|e| eyre::eyre!("failed to read free blob: {:?}", e))
    }

    /// Stamps the fixed part of a freshly freed blob. Links and leaf table
    /// are left untouched; callers set them according to list position.
    pub fn init(&mut self, preceding_free_pages: u32, pages: u32) {
        self.preceding_free_pages = U32::new(preceding_free_pages);
        self.size_word = U32::new((pages & PAYLOAD_SIZE_MASK) | FREE_FLAG);
        self.prev_free = U32::ZERO;
        self.next_free = U32::ZERO;
    }

    pub fn clear_leaf_table(&mut self) {
        self.leaf_ranges = U32::ZERO;
        self.leaf_free_table = [U32::ZERO; LEAF_SLOTS];
    }

    pub fn pages(&self) -> u32 {
        self.size_word.get() & PAYLOAD_SIZE_MASK
    }

    pub fn is_free(&self) -> bool {
        self.size_word.get() & FREE_FLAG != 0
    }

    pub fn prev_free(&self) -> PageNum {
        self.prev_free.get()
    }

    pub fn set_prev_free(&mut self, page: PageNum) {
        self.prev_free = U32::new(page);
    }

    pub fn next_free(&self) -> PageNum {
        self.next_free.get()
    }

    pub fn set_next_free(&mut self, page: PageNum) {
        self.next_free = U32::new(page);
    }

    pub fn leaf_ranges(&self) -> u32 {
        self.leaf_ranges.get()
    }

    pub fn set_leaf_ranges(&mut self, ranges: u32) {
        self.leaf_ranges = U32::new(ranges);
    }

    pub fn leaf_slot(&self, slot: usize) -> PageNum {
        self.leaf_free_table[slot].get()
    }

    pub fn set_leaf_slot(&mut self, slot: usize, page: PageNum) {
        self.leaf_free_table[slot] = U32::new(page);
    }

    pub fn copy_leaf_table(&self) -> ([U32; LEAF_SLOTS], u32) {
        (self.leaf_free_table, self.leaf_ranges.get())
    }

    pub fn install_leaf_table(&mut self, table: [U32; LEAF_SLOTS], ranges: u32) {
        self.leaf_free_table = table;
        self.leaf_ranges = U32::new(ranges);
    }
}

/// Number of pages needed for a payload of `payload_size` bytes, including
/// the 8-byte blob header.
pub fn pages_for_payload(payload_size: u32, page_size_shift: u8) -> u32 {
    let page_size = 1u64 << page_size_shift;
    ((payload_size as u64 + BLOB_HEADER_SIZE as u64 + page_size - 1) >> page_size_shift) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_header_allocated_round_trip() {
        let header = BlobHeader::allocated(3, 100);
        let mut bytes = [0u8; 16];

        header.write_to(&mut bytes);
        let parsed = BlobHeader::read(&bytes).unwrap();

        assert_eq!(parsed.preceding_free_pages(), 3);
        assert_eq!(parsed.payload_size(), 100);
        assert!(!parsed.is_free());
    }

    #[test]
    fn free_blob_layout_offsets() {
        let mut bytes = [0u8; FREE_BLOB_SIZE];
        let blob = FreeBlob::from_bytes_mut(&mut bytes).unwrap();

        blob.init(0, 7);
        blob.set_prev_free(11);
        blob.set_next_free(22);
        blob.set_leaf_ranges(0x8000_0001);
        blob.set_leaf_slot(0, 33);
        blob.set_leaf_slot(511, 44);

        assert_eq!(&bytes[4..8], &(7u32 | FREE_FLAG).to_le_bytes());
        assert_eq!(&bytes[8..12], &11u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &22u32.to_le_bytes());
        assert_eq!(&bytes[16..20], &0x8000_0001u32.to_le_bytes());
        assert_eq!(&bytes[64..68], &33u32.to_le_bytes());
        assert_eq!(&bytes[64 + 511 * 4..64 + 512 * 4], &44u32.to_le_bytes());
    }

    #[test]
    fn pages_for_payload_boundaries() {
        // 4 KiB pages: header + payload must fit
        assert_eq!(pages_for_payload(0, 12), 1);
        assert_eq!(pages_for_payload(4088, 12), 1); // pageSize - 8
        assert_eq!(pages_for_payload(4089, 12), 2); // pageSize - 7
        assert_eq!(pages_for_payload(4096, 12), 2);
        assert_eq!(pages_for_payload(8184, 12), 2);
        assert_eq!(pages_for_payload(8185, 12), 3);
    }

    #[test]
    fn pages_for_payload_larger_pages() {
        assert_eq!(pages_for_payload(0, 14), 1);
        assert_eq!(pages_for_payload(16376, 14), 1);
        assert_eq!(pages_for_payload(16377, 14), 2);
    }
}
