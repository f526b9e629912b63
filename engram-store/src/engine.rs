//! Embedded storage engine
//!
//! A thin relational layer over RocksDB. Each table and each secondary index
//! lives in its own column family; a dedicated `catalog` column family maps
//! logical names to physical column families and holds the schema version.
//! Writes go through atomic batches committed with a synced WAL.

use parking_lot::RwLock;
use rocksdb::{
    BoundColumnFamily, IteratorMode, Options, ReadOptions, WriteBatch, WriteOptions, DB,
};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Result, StorageContext, StoreError};

/// Column family holding table and index definitions
pub const CATALOG_CF: &str = "catalog";

const DEFAULT_CF: &str = "default";

/// Half-open key range `[lower, upper)`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRange {
    pub lower: Option<Vec<u8>>,
    pub upper: Option<Vec<u8>>,
}

impl KeyRange {
    /// Every key
    pub fn all() -> Self {
        Self::default()
    }

    /// Every key starting with `prefix`
    pub fn prefix(prefix: &[u8]) -> Self {
        Self {
            lower: (!prefix.is_empty()).then(|| prefix.to_vec()),
            upper: prefix_successor(prefix),
        }
    }
}

/// Smallest key greater than every key starting with `prefix`
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut next = prefix.to_vec();
    while let Some(last) = next.pop() {
        if last < u8::MAX {
            next.push(last + 1);
            return Some(next);
        }
    }
    None
}

/// RocksDB handle plus the set of live column families
pub struct Engine {
    db: DB,
    path: PathBuf,
    families: RwLock<BTreeSet<String>>,
}

impl Engine {
    /// Open (or create) the engine at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        let opts = Self::options();
        let mut families: BTreeSet<String> = if path.join("CURRENT").exists() {
            DB::list_cf(&opts, path)
                .during("list column families")?
                .into_iter()
                .collect()
        } else {
            BTreeSet::new()
        };
        families.insert(DEFAULT_CF.to_string());
        families.insert(CATALOG_CF.to_string());

        let db = DB::open_cf(&opts, path, families.iter()).during("open database")?;
        log::info!(
            "Engine opened at {} with {} column families",
            path.display(),
            families.len()
        );

        Ok(Self {
            db,
            path: path.to_path_buf(),
            families: RwLock::new(families),
        })
    }

    fn options() -> Options {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_max_background_jobs(2);
        opts.set_bytes_per_sync(1048576); // 1MB
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::schema(format!("column family {name} does not exist")))
    }

    pub fn has_family(&self, name: &str) -> bool {
        self.families.read().contains(name)
    }

    /// Column families other than the built-in ones
    pub fn user_families(&self) -> Vec<String> {
        self.families
            .read()
            .iter()
            .filter(|name| *name != DEFAULT_CF && *name != CATALOG_CF)
            .cloned()
            .collect()
    }

    /// Create a column family; no-op if it already exists
    pub fn create_family(&self, name: &str) -> Result<()> {
        let mut families = self.families.write();
        if families.contains(name) {
            return Ok(());
        }
        self.db
            .create_cf(name, &Self::options())
            .during("create column family")?;
        families.insert(name.to_string());
        log::debug!("Created column family {}", name);
        Ok(())
    }

    /// Drop a column family and all of its data; no-op if absent
    pub fn drop_family(&self, name: &str) -> Result<()> {
        let mut families = self.families.write();
        if !families.contains(name) {
            return Ok(());
        }
        self.db.drop_cf(name).during("drop column family")?;
        families.remove(name);
        log::debug!("Dropped column family {}", name);
        Ok(())
    }

    /// Point lookup
    pub fn get(&self, family: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.cf(family)?;
        self.db.get_cf(&cf, key).during("read")
    }

    pub fn contains(&self, family: &str, key: &[u8]) -> Result<bool> {
        Ok(self.get(family, key)?.is_some())
    }

    /// Iterate a key range, ascending or descending
    pub fn scan(
        &self,
        family: &str,
        range: KeyRange,
        reverse: bool,
    ) -> Result<impl Iterator<Item = Result<(Box<[u8]>, Box<[u8]>)>> + '_> {
        let cf = self.cf(family)?;
        let mut read_opts = ReadOptions::default();
        if let Some(lower) = range.lower {
            read_opts.set_iterate_lower_bound(lower);
        }
        if let Some(upper) = range.upper {
            read_opts.set_iterate_upper_bound(upper);
        }
        let mode = if reverse {
            IteratorMode::End
        } else {
            IteratorMode::Start
        };
        Ok(self
            .db
            .iterator_cf_opt(&cf, read_opts, mode)
            .map(|item| item.during("scan")))
    }

    /// Count keys in a column family
    pub fn count(&self, family: &str) -> Result<usize> {
        let mut count = 0;
        for item in self.scan(family, KeyRange::all(), false)? {
            item?;
            count += 1;
        }
        Ok(count)
    }

    /// Read a bincode-encoded catalog entry
    pub fn catalog_get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(CATALOG_CF, key.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Read every catalog entry whose key starts with `prefix`
    pub fn catalog_scan<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>> {
        let mut entries = Vec::new();
        for item in self.scan(CATALOG_CF, KeyRange::prefix(prefix.as_bytes()), false)? {
            let (_, value) = item?;
            entries.push(bincode::deserialize(&value)?);
        }
        Ok(entries)
    }

    /// Start an atomic write batch
    pub fn batch(&self) -> Batch<'_> {
        Batch {
            engine: self,
            inner: WriteBatch::default(),
        }
    }

    /// Flush the write-ahead log to disk
    pub fn sync(&self) -> Result<()> {
        self.db.flush_wal(true).during("flush wal")
    }
}

/// Atomic group of writes across column families
pub struct Batch<'a> {
    engine: &'a Engine,
    inner: WriteBatch,
}

impl Batch<'_> {
    pub fn put(&mut self, family: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let cf = self.engine.cf(family)?;
        self.inner.put_cf(&cf, key, value);
        Ok(())
    }

    pub fn delete(&mut self, family: &str, key: &[u8]) -> Result<()> {
        let cf = self.engine.cf(family)?;
        self.inner.delete_cf(&cf, key);
        Ok(())
    }

    pub fn put_catalog<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let bytes = bincode::serialize(value)?;
        self.put(CATALOG_CF, key.as_bytes(), &bytes)
    }

    pub fn delete_catalog(&mut self, key: &str) -> Result<()> {
        self.delete(CATALOG_CF, key.as_bytes())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Durably apply every write in the batch, or none of them
    pub fn commit(self, operation: &'static str) -> Result<()> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(true);
        self.engine
            .db
            .write_opt(self.inner, &write_opts)
            .during(operation)
    }
}
