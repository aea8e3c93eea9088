//! # Segmented File Mapping
//!
//! A Geographic Object Library is addressed in fixed 1 GiB **segments**.
//! Segments are memory-mapped on first touch and stay mapped until the store
//! is closed, which is what makes blob pointers stable for the lifetime of
//! the mapping: a reader may hold a `&[u8]` into a segment across later
//! growth, because growth only ever appends *new* segments and never remaps
//! an existing one.
//!
//! ## Growth discipline
//!
//! Segments are always mapped at their full 1 GiB size, even while the file
//! is still shorter — the pages past EOF are simply never touched (every
//! access is bounds-checked against the logical length). Growth is then a
//! plain `set_len` plus a bump of the logical length; no remap, so existing
//! pointers stay valid. On Unix the file stays sparse; on Windows the
//! mapping may allocate eagerly (there is no hole-punching there).
//!
//! Read-only mappings never grow.
//!
//! ## Safety model
//!
//! Interior mutability (a `RwLock` over the segment table) is needed because
//! readers map segments lazily through `&self`. The returned slices are
//! sound despite the lock being released before the borrow ends:
//!
//! 1. A mapped segment is never unmapped or remapped until the
//!    `SegmentedMapping` is dropped; the `Vec` only ever transitions slots
//!    from `None` to `Some`.
//! 2. Moving an `MmapRaw` (e.g. when the `Vec` reallocates) does not move
//!    the mapped memory it points to.
//! 3. Mutable access goes through `&mut self`, so the borrow checker keeps
//!    readers and the single writer apart — the same argument the store's
//!    transaction layer relies on.
//!
//! `prefetch` issues `madvise(MADV_WILLNEED)` on Unix and is a no-op
//! elsewhere; it is advisory and never fails.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use memmap2::{MmapOptions, MmapRaw};
use parking_lot::RwLock;

use crate::error::StoreError;

/// Size of one mapping segment. Blobs never cross a segment boundary.
pub const SEGMENT_SIZE: u64 = 1 << 30;

pub struct SegmentedMapping {
    file: File,
    path: PathBuf,
    writable: bool,
    /// Logical file length in bytes (the writable path rounds the physical
    /// file up to segment boundaries; this tracks the real end of data).
    len: u64,
    segments: RwLock<Vec<Option<MmapRaw>>>,
}

impl SegmentedMapping {
    pub fn open(path: &Path, writable: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => StoreError::FileNotFound {
                    path: path.to_path_buf(),
                },
                _ => StoreError::Io {
                    path: path.to_path_buf(),
                    source: e,
                },
            })
            .wrap_err_with(|| format!("failed to open store '{}'", path.display()))?;

        let len = file
            .metadata()
            .map_err(|e| StoreError::Io {
                path: path.to_path_buf(),
                source: e,
            })?
            .len();

        let segment_count = len.div_ceil(SEGMENT_SIZE) as usize;
        let mut segments = Vec::new();
        segments.resize_with(segment_count.max(1), || None);

        Ok(Self {
            file,
            path: path.to_path_buf(),
            writable,
            len,
            segments: RwLock::new(segments),
        })
    }

    pub fn create(path: &Path, initial_len: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| StoreError::Io {
                path: path.to_path_buf(),
                source: e,
            })
            .wrap_err_with(|| format!("failed to create store '{}'", path.display()))?;

        file.set_len(initial_len).map_err(|e| StoreError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            writable: true,
            len: initial_len,
            segments: RwLock::new(vec![None]),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Extends the file and the logical length. Existing mappings remain
    /// valid; a new segment slot is added when the length crosses a
    /// segment boundary.
    pub fn grow(&mut self, new_len: u64) -> Result<()> {
        ensure!(self.writable, "cannot grow a read-only mapping");
        if new_len <= self.len {
            return Ok(());
        }
        let segment_count = new_len.div_ceil(SEGMENT_SIZE) as usize;
        let mut segments = self.segments.write();
        if segments.len() < segment_count {
            segments.resize_with(segment_count, || None);
        }
        drop(segments);
        if self.file.metadata().map(|m| m.len()).unwrap_or(0) < new_len {
            self.file.set_len(new_len).map_err(|e| StoreError::Io {
                path: self.path.clone(),
                source: e,
            })?;
        }
        self.len = new_len;
        Ok(())
    }

    fn map_segment(&self, seg: usize) -> Result<(*mut u8, usize)> {
        {
            let segments = self.segments.read();
            if let Some(Some(m)) = segments.get(seg) {
                return Ok((m.as_mut_ptr(), m.len()));
            }
        }

        let mut segments = self.segments.write();
        ensure!(
            seg < segments.len(),
            "segment {} beyond end of store '{}'",
            seg,
            self.path.display()
        );
        // Re-check under the write lock; another reader may have raced us.
        if let Some(m) = &segments[seg] {
            return Ok((m.as_mut_ptr(), m.len()));
        }

        // The whole segment range is mapped even while the file is still
        // shorter; the pages past EOF stay untouched (every access is
        // bounds-checked against the logical length), and later in-segment
        // growth never needs a remap — which is what keeps blob pointers
        // stable. On Windows the mapping may extend the file eagerly; there
        // is no sparse-file hole to punch there.
        let offset = seg as u64 * SEGMENT_SIZE;
        let mut options = MmapOptions::new();
        options.offset(offset).len(SEGMENT_SIZE as usize);
        // SAFETY: mapping a file is unsafe because the file could be
        // modified externally. This is safe for the store's contract:
        // 1. Readers open the store read-shared; the single writer holds
        //    &mut BlobStore, so no aliased mutation within this process.
        // 2. Store files are not meant to be modified by other processes
        //    while open (single-writer contract).
        // 3. The mapping lives until the SegmentedMapping is dropped, so no
        //    use-after-unmap is possible through the returned pointers.
        let raw = unsafe {
            if self.writable {
                options.map_raw(&self.file)
            } else {
                options.map_raw_read_only(&self.file)
            }
        }
        .map_err(|e| StoreError::Io {
            path: self.path.clone(),
            source: e,
        })
        .wrap_err_with(|| {
            format!(
                "failed to map segment {} of '{}'",
                seg,
                self.path.display()
            )
        })?;

        let ptr = raw.as_mut_ptr();
        let len = raw.len();
        segments[seg] = Some(raw);
        Ok((ptr, len))
    }

    fn locate(&self, offset: u64, len: usize) -> Result<(*mut u8, usize)> {
        let seg = (offset / SEGMENT_SIZE) as usize;
        let in_seg = (offset % SEGMENT_SIZE) as usize;
        ensure!(
            in_seg + len <= SEGMENT_SIZE as usize,
            "range {}+{} crosses a segment boundary",
            offset,
            len
        );
        ensure!(
            offset + len as u64 <= self.len,
            "range {}+{} beyond store length {}",
            offset,
            len,
            self.len
        );
        let (base, mapped) = self.map_segment(seg)?;
        ensure!(in_seg + len <= mapped, "segment {} mapped short", seg);
        // SAFETY: in_seg + len was bounds-checked against both the logical
        // length and the mapped length; pages past EOF are never touched.
        Ok((unsafe { base.add(in_seg) }, len))
    }

    /// Returns a stable byte slice for `offset..offset + len`. The range
    /// must not cross a segment boundary.
    pub fn slice(&self, offset: u64, len: usize) -> Result<&[u8]> {
        let (ptr, len) = self.locate(offset, len)?;
        // SAFETY: the pointer is valid for `len` bytes (locate checked), the
        // mapping outlives `&self`, and no `&mut` overlaps it (see module
        // docs, point 3).
        Ok(unsafe { std::slice::from_raw_parts(ptr, len) })
    }

    /// Mutable counterpart of [`slice`](Self::slice). Requires `&mut self`,
    /// which is what keeps the single-writer contract honest.
    pub fn slice_mut(&mut self, offset: u64, len: usize) -> Result<&mut [u8]> {
        ensure!(self.writable, "store '{}' is read-only", self.path.display());
        let (ptr, len) = self.locate(offset, len)?;
        // SAFETY: as in `slice`, plus exclusivity via `&mut self`.
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr, len) })
    }

    /// Advisory sequential-read hint. May be a no-op.
    pub fn prefetch(&self, offset: u64, len: usize) {
        if len == 0 || offset >= self.len {
            return;
        }
        let seg = (offset / SEGMENT_SIZE) as usize;
        let in_seg = (offset % SEGMENT_SIZE) as usize;
        let segments = self.segments.read();
        let Some(Some(raw)) = segments.get(seg) else {
            return;
        };
        let len = len
            .min(raw.len().saturating_sub(in_seg))
            .min((self.len - offset) as usize);
        if len == 0 {
            return;
        }
        #[cfg(unix)]
        // SAFETY: madvise with MADV_WILLNEED is a hint; the range was
        // clamped to the segment's mapped length above.
        unsafe {
            libc::madvise(
                raw.as_mut_ptr().add(in_seg) as *mut libc::c_void,
                len,
                libc::MADV_WILLNEED,
            );
        }
        #[cfg(not(unix))]
        let _ = (in_seg, len, raw);
    }

    /// Flushes all mapped segments to disk. Only the in-file span of each
    /// segment is synced; the tail past EOF has no pages to write.
    pub fn flush_all(&self) -> Result<()> {
        let segments = self.segments.read();
        for (seg, raw) in segments.iter().enumerate() {
            let Some(raw) = raw else { continue };
            let seg_start = seg as u64 * SEGMENT_SIZE;
            let span = (self.len.saturating_sub(seg_start)).min(SEGMENT_SIZE) as usize;
            if span == 0 {
                continue;
            }
            raw.flush_range(0, span).map_err(|e| StoreError::Io {
                path: self.path.clone(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Flushes a byte range (used to force the header independently of the
    /// data pages during commit).
    pub fn flush_range(&self, offset: u64, len: usize) -> Result<()> {
        let seg = (offset / SEGMENT_SIZE) as usize;
        let in_seg = (offset % SEGMENT_SIZE) as usize;
        let len = len.min(self.len.saturating_sub(offset) as usize);
        let segments = self.segments.read();
        if let Some(Some(raw)) = segments.get(seg) {
            if len > 0 {
                raw.flush_range(in_seg, len).map_err(|e| StoreError::Io {
                    path: self.path.clone(),
                    source: e,
                })?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for SegmentedMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentedMapping")
            .field("path", &self.path)
            .field("writable", &self.writable)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        (dir, path)
    }

    #[test]
    fn open_missing_file_reports_file_not_found() {
        let (_dir, path) = temp_path("missing.gol");

        let err = SegmentedMapping::open(&path, false).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::FileNotFound { .. })
        ));
    }

    #[test]
    fn create_write_reopen_read_round_trips() {
        let (_dir, path) = temp_path("rt.gol");
        {
            let mut mapping = SegmentedMapping::create(&path, 8192).unwrap();
            mapping.slice_mut(100, 4).unwrap().copy_from_slice(b"gol!");
            mapping.flush_all().unwrap();
        }

        let mapping = SegmentedMapping::open(&path, false).unwrap();

        assert_eq!(mapping.slice(100, 4).unwrap(), b"gol!");
    }

    #[test]
    fn slice_rejects_segment_crossing_range() {
        let (_dir, path) = temp_path("cross.gol");
        let mapping = SegmentedMapping::create(&path, 4096).unwrap();

        let result = mapping.slice(SEGMENT_SIZE - 2, 8);

        assert!(result.is_err());
    }

    #[test]
    fn slice_mut_on_read_only_mapping_fails() {
        let (_dir, path) = temp_path("ro.gol");
        SegmentedMapping::create(&path, 4096).unwrap();

        let mut mapping = SegmentedMapping::open(&path, false).unwrap();

        assert!(mapping.slice_mut(0, 16).is_err());
    }

    #[test]
    fn grow_extends_logical_length() {
        let (_dir, path) = temp_path("grow.gol");
        let mut mapping = SegmentedMapping::create(&path, 4096).unwrap();

        mapping.grow(16384).unwrap();
        mapping.slice_mut(16000, 4).unwrap().copy_from_slice(b"tail");

        assert_eq!(mapping.len(), 16384);
        assert_eq!(mapping.slice(16000, 4).unwrap(), b"tail");
    }

    #[test]
    fn prefetch_never_panics() {
        let (_dir, path) = temp_path("pf.gol");
        let mapping = SegmentedMapping::create(&path, 4096).unwrap();
        mapping.slice(0, 16).unwrap();

        mapping.prefetch(0, 4096);
        mapping.prefetch(1 << 40, 4096);
    }
}
