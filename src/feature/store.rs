//! # FeatureStore
//!
//! Read-side access to one Geographic Object Library: the blob store, the
//! global string table (interned tag keys) and the tile index root.
//!
//! Stores are shared: opening the same canonical path twice yields the same
//! `Arc<FeatureStore>` through a process-wide registry of weak references.
//! The store closes (and the mapping unwinds) when the last `Features`
//! handle referring to it is dropped.
//!
//! The `.gol` extension may be omitted from the path; if the bare path does
//! not exist, it is retried with the extension appended.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Weak};

use eyre::{Result, WrapErr};
use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::error::StoreError;
use crate::store::{BlobStore, PageNum};

use super::tags::{read_varstr, TilePayload};

static REGISTRY: LazyLock<Mutex<HashMap<PathBuf, Weak<FeatureStore>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

#[derive(Debug)]
pub struct FeatureStore {
    store: BlobStore,
    keys: Vec<Box<str>>,
    key_codes: HashMap<Box<str>, u16>,
}

impl FeatureStore {
    /// Opens (or re-uses) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<FeatureStore>> {
        let resolved = resolve_path(path.as_ref())?;
        let canonical = std::fs::canonicalize(&resolved).map_err(|e| StoreError::Io {
            path: resolved.clone(),
            source: e,
        })?;

        let mut registry = REGISTRY.lock();
        if let Some(existing) = registry.get(&canonical).and_then(Weak::upgrade) {
            return Ok(existing);
        }
        registry.retain(|_, weak| weak.strong_count() > 0);

        let store = Arc::new(Self::load(&canonical)?);
        registry.insert(canonical, Arc::downgrade(&store));
        Ok(store)
    }

    fn load(path: &Path) -> Result<FeatureStore> {
        let store = BlobStore::open(path)
            .wrap_err_with(|| format!("failed to open GOL '{}'", path.display()))?;

        let mut keys = Vec::new();
        let mut key_codes = HashMap::new();
        let properties = store.header()?.properties_ptr();
        if properties != 0 {
            let bytes = store
                .blob_payload(properties)
                .wrap_err("failed to read the global string table")?;
            let count = u16::from_le_bytes(
                bytes
                    .get(..2)
                    .ok_or_else(|| eyre::eyre!("truncated global string table"))?
                    .try_into()
                    .unwrap(),
            ) as usize;
            let mut ofs = 2usize;
            for code in 0..count {
                let key = read_varstr(bytes, ofs).ok_or_else(|| {
                    eyre::eyre!("global string table truncated at entry {}", code)
                })?;
                ofs += super::tags::varstr_len(key);
                keys.push(Box::from(key));
                key_codes.insert(Box::from(key), code as u16);
            }
        }

        Ok(FeatureStore {
            store,
            keys,
            key_codes,
        })
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    /// Interned code of a global key, if the key is global in this store.
    pub fn key_code(&self, key: &str) -> Option<u16> {
        self.key_codes.get(key).copied()
    }

    pub fn key_name(&self, code: u16) -> Option<&str> {
        self.keys.get(code as usize).map(|k| &**k)
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Root of the tile index, or `None` for a store without one.
    pub fn index_root(&self) -> Result<Option<PageNum>> {
        let root = self.store.header()?.index_ptr();
        Ok((root != 0).then_some(root))
    }

    /// Parses the tile payload blob at `page`.
    pub fn payload(&self, page: PageNum) -> Result<TilePayload<'_>> {
        TilePayload::parse(page, self.store.blob_payload(page)?)
    }

    /// Raw payload of an index node blob.
    pub fn index_node(&self, page: PageNum) -> Result<&[u8]> {
        self.store.blob_payload(page)
    }

    /// Advisory read-ahead before a tile scan.
    pub fn prefetch_blob(&self, page: PageNum) {
        self.store.prefetch_blob(page);
    }

    pub fn blob_store(&self) -> &BlobStore {
        &self.store
    }
}

fn resolve_path(path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    if path.extension().is_none() {
        let with_ext = path.with_extension("gol");
        if with_ext.exists() {
            return Ok(with_ext);
        }
    }
    Err(StoreError::FileNotFound {
        path: path.to_path_buf(),
    }
    .into())
}
