//! RocksDB-backed episode store with HNSW indexing
//!
//! Opening the store runs schema setup and migrations before any operation
//! can be issued. Each write commits the row and all of its index entries in
//! one synced batch.

use chrono::Utc;
use parking_lot::Mutex;
use std::path::Path;

use crate::ann::VectorIndex;
use crate::codec::{self, decode_episode, encode_episode};
use crate::engine::{prefix_successor, Engine, KeyRange};
use crate::episode::{Episode, UpdateParams};
use crate::error::{Result, StoreError};
use crate::migration;
use crate::schema::{self, col, text_index_prefix, Schema};
use crate::search::{self, AccessPath, QueryPlan, Ranking, SearchParams};
use crate::temporal;
use crate::value::{check_row, Row, Value};

/// Tunables for opening a store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Build the in-memory HNSW index on open
    pub vector_index: bool,
    /// HNSW construction beam width
    pub ef_construction: usize,
    /// HNSW search beam width, which also bounds the ANN candidate pool
    pub ef_search: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            vector_index: true,
            ef_construction: 100,
            ef_search: 100,
        }
    }
}

/// Durable episode log
pub struct EpisodeStore {
    engine: Engine,
    schema: Schema,
    vectors: Option<VectorIndex>,
    write_lock: Mutex<()>,
}

impl EpisodeStore {
    /// Open the store at `path` with default settings
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, StoreConfig::default())
    }

    /// Open the store, creating or migrating the schema as needed
    pub fn open_with_config(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        let path = path.as_ref();
        let engine = Engine::open(path)?;

        schema::ensure_schema(&engine)?;
        let report = migration::migrate(&engine)?;
        if !report.applied.is_empty() {
            log::info!(
                "Applied migrations {:?} ({} rows)",
                report.applied,
                report.rows_copied
            );
        }

        if config.vector_index {
            if let Err(e) = schema::ensure_vector_index(&engine) {
                log::warn!(
                    "Vector index unavailable, semantic search will scan: {}",
                    e
                );
            }
        }

        let schema = Schema::load(&engine)?;
        schema.validate()?;
        schema::drop_orphans(&engine, &schema)?;

        let vectors = (config.vector_index && schema.has_vector_index())
            .then(|| VectorIndex::new(config.ef_construction, config.ef_search));

        let store = Self {
            engine,
            schema,
            vectors,
            write_lock: Mutex::new(()),
        };
        store.load_vectors()?;

        log::info!("EpisodeStore opened at: {}", path.display());
        Ok(store)
    }

    /// Populate the vector index from stored embeddings
    fn load_vectors(&self) -> Result<()> {
        let Some(vectors) = &self.vectors else {
            return Ok(());
        };

        let mut skipped = 0;
        for item in self.engine.scan(self.table(), KeyRange::all(), false)? {
            let (key, bytes) = item?;
            let id = String::from_utf8_lossy(&key).into_owned();
            let row: Row = bincode::deserialize(&bytes)?;
            let embedding = row.into_iter().nth(col::EMBEDDING).unwrap_or(Value::Null);
            match codec::decode_embedding(embedding) {
                Ok(Some(vector)) => vectors.insert(&id, vector),
                Ok(None) => {}
                Err(e) => {
                    log::warn!("Skipping embedding of {}: {}", id, e);
                    skipped += 1;
                }
            }
        }

        if !vectors.is_empty() {
            vectors.rebuild();
            log::info!("Loaded {} embeddings into the vector index", vectors.len());
        }
        if skipped > 0 {
            log::warn!("Skipped {} embeddings due to decode errors", skipped);
        }
        Ok(())
    }

    fn table(&self) -> &str {
        &self.schema.table.physical
    }

    /// Index entries (column family, key) for a row
    fn index_entries(&self, row: &Row) -> Result<Vec<(&str, Vec<u8>)>> {
        let mut entries = Vec::new();
        for index in self.schema.btree_indexes() {
            let Some(family) = index.physical.as_deref() else {
                continue;
            };
            if let Some(key) = index.entry_key(&self.schema.table, row)? {
                entries.push((family, key));
            }
        }
        Ok(entries)
    }

    /// Stored row, checked for width so callers can index columns
    fn read_row(&self, id: &str) -> Result<Option<Row>> {
        let Some(bytes) = self.engine.get(self.table(), id.as_bytes())? else {
            return Ok(None);
        };
        let row: Row = bincode::deserialize(&bytes)?;
        let width = self.schema.table.columns.len();
        if row.len() != width {
            return Err(StoreError::decode(format!(
                "episode {} has {} columns, expected {}",
                id,
                row.len(),
                width
            )));
        }
        Ok(Some(row))
    }

    fn fetch(&self, id: &str) -> Result<Option<Episode>> {
        self.read_row(id)?.map(decode_episode).transpose()
    }

    /// Persist a new episode. Fills in id, created_at and group_id on the
    /// caller's record when they are empty.
    pub fn insert(&self, episode: &mut Episode) -> Result<String> {
        episode.apply_insert_defaults(Utc::now());
        let row = encode_episode(episode);
        check_row(&self.schema.table.columns, &row)?;
        let bytes = bincode::serialize(&row)?;
        let id = episode.id.clone();

        let _guard = self.write_lock.lock();
        if self.engine.contains(self.table(), id.as_bytes())? {
            return Err(StoreError::DuplicateId(id));
        }

        let mut batch = self.engine.batch();
        batch.put(self.table(), id.as_bytes(), &bytes)?;
        for (family, key) in self.index_entries(&row)? {
            batch.put(family, &key, &[])?;
        }
        batch.commit("insert episode")?;

        if let (Some(vectors), Value::FloatArray(vector)) = (&self.vectors, &row[col::EMBEDDING]) {
            vectors.insert(&id, vector.clone());
        }

        log::debug!("Inserted episode {} into group {}", id, episode.group_id);
        Ok(id)
    }

    /// Point lookup
    pub fn get(&self, id: &str) -> Result<Episode> {
        self.fetch(id)?.ok_or_else(|| StoreError::not_found(id))
    }

    /// Apply a sparse patch to tags, expired_at and metadata
    pub fn update(&self, id: &str, params: &UpdateParams) -> Result<()> {
        if params.is_empty() {
            return Err(StoreError::NoUpdatesProvided);
        }

        let _guard = self.write_lock.lock();
        let old = self
            .read_row(id)?
            .ok_or_else(|| StoreError::not_found(id))?;

        let mut row = old.clone();
        if let Some(tags) = &params.tags {
            row[col::TAGS] = codec::encode_tags(tags);
        }
        if let Some(expired_at) = params.expired_at {
            row[col::EXPIRED_AT] = Value::TimestampTz(expired_at);
        }
        if let Some(metadata) = &params.metadata {
            row[col::METADATA] = codec::encode_metadata(Some(metadata));
        }
        check_row(&self.schema.table.columns, &row)?;

        let old_entries = self.index_entries(&old)?;
        let new_entries = self.index_entries(&row)?;

        let mut batch = self.engine.batch();
        for entry in old_entries.iter().filter(|e| !new_entries.contains(*e)) {
            batch.delete(entry.0, &entry.1)?;
        }
        for entry in new_entries.iter().filter(|e| !old_entries.contains(*e)) {
            batch.put(entry.0, &entry.1, &[])?;
        }
        batch.put(self.table(), id.as_bytes(), &bincode::serialize(&row)?)?;
        batch.commit("update episode")?;

        log::debug!("Updated episode {}", id);
        Ok(())
    }

    /// Permanently remove an episode
    pub fn delete(&self, id: &str) -> Result<()> {
        let _guard = self.write_lock.lock();
        let row = self
            .read_row(id)?
            .ok_or_else(|| StoreError::not_found(id))?;

        let mut batch = self.engine.batch();
        batch.delete(self.table(), id.as_bytes())?;
        for (family, key) in self.index_entries(&row)? {
            batch.delete(family, &key)?;
        }
        batch.commit("delete episode")?;

        if let Some(vectors) = &self.vectors {
            vectors.remove(id);
        }

        log::info!("Deleted episode {}", id);
        Ok(())
    }

    /// Filtered, ranked search
    pub fn search(&self, params: &SearchParams) -> Result<Vec<Episode>> {
        let plan = QueryPlan::build(params, Utc::now());

        if let Ranking::Similarity(query) = &plan.ranking {
            if let Some(found) = self.ann_search(&plan, query)? {
                return Ok(found);
            }
        }

        // Index order already matches recency, so the scan can stop early
        let stop_at = match plan.ranking {
            Ranking::Recency => Some(plan.limit),
            Ranking::Similarity(_) => None,
        };

        let mut matched = Vec::new();
        for id in self.scan_ids(&plan)? {
            let id = id?;
            let Some(episode) = self.fetch(&id)? else {
                log::warn!("Index entry for missing episode {}", id);
                continue;
            };
            if plan.matches(&episode) {
                matched.push(episode);
                if stop_at.is_some_and(|limit| matched.len() >= limit) {
                    break;
                }
            }
        }

        Ok(search::rank(matched, &plan.ranking, plan.limit))
    }

    /// Rank HNSW candidates; None when they cannot fill the result cap
    fn ann_search(&self, plan: &QueryPlan, query: &[f32]) -> Result<Option<Vec<Episode>>> {
        let Some(vectors) = &self.vectors else {
            return Ok(None);
        };

        let mut matched = Vec::new();
        for (id, _) in vectors.nearest(query) {
            if let Some(episode) = self.fetch(&id)? {
                if plan.matches(&episode) {
                    matched.push(episode);
                }
            }
        }

        if matched.len() < plan.limit {
            return Ok(None);
        }
        Ok(Some(search::rank(matched, &plan.ranking, plan.limit)))
    }

    /// Episode ids from the plan's index, newest first
    fn scan_ids<'a>(
        &'a self,
        plan: &QueryPlan,
    ) -> Result<impl Iterator<Item = Result<String>> + 'a> {
        let (name, prefix) = match &plan.access {
            AccessPath::Group(group) => ("idx_episodes_group_id", text_index_prefix(group)),
            AccessPath::Source(source) => ("idx_episodes_source", text_index_prefix(source)),
            AccessPath::CreatedAt => ("idx_episodes_created_at", Vec::new()),
        };
        let index = self
            .schema
            .btree(name)
            .ok_or_else(|| StoreError::schema(format!("index {name} is missing")))?;
        let family = index
            .physical
            .as_deref()
            .ok_or_else(|| StoreError::schema(format!("index {name} has no storage")))?;

        let range = time_range(&prefix, plan);
        let table = &self.schema.table;
        Ok(self
            .engine
            .scan(family, range, true)?
            .map(move |item| item.and_then(|(key, _)| index.id_from_key(table, &key))))
    }

    /// Number of stored episodes, expired ones included
    pub fn count(&self) -> Result<usize> {
        self.engine.count(self.table())
    }

    /// Names of every registered index
    pub fn index_names(&self) -> Vec<String> {
        self.schema.index_names()
    }

    /// Whether semantic search can use the HNSW index
    pub fn has_vector_index(&self) -> bool {
        self.vectors.is_some()
    }

    pub fn path(&self) -> &Path {
        self.engine.path()
    }

    /// Flush and release the database handle
    pub fn close(self) -> Result<()> {
        self.engine.sync()?;
        log::info!("EpisodeStore closed: {}", self.engine.path().display());
        Ok(())
    }
}

/// Key range of an index scan narrowed by the created_at bounds
fn time_range(prefix: &[u8], plan: &QueryPlan) -> KeyRange {
    let lower = match plan.after {
        Some(after) => Some([prefix, &temporal::sort_key(&after)[..]].concat()),
        None => (!prefix.is_empty()).then(|| prefix.to_vec()),
    };
    let upper = match plan.before {
        Some(before) => Some([prefix, &temporal::sort_key_after(&before)[..]].concat()),
        None => prefix_successor(prefix),
    };
    KeyRange { lower, upper }
}
