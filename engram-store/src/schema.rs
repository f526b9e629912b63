//! Episode table and index definitions
//!
//! `ensure_schema` creates the table and its secondary indexes when absent and
//! backfills any index that is missing on an existing table. Indexes are
//! registered by name, so repeated calls are no-ops.

use serde::{Deserialize, Serialize};

use crate::engine::{Engine, KeyRange};
use crate::episode::EMBEDDING_DIMENSION;
use crate::error::{Result, StoreError};
use crate::temporal::{self, SORT_KEY_LEN};
use crate::value::{ColumnDef, ColumnType, Row, Value};

/// Logical name of the episode table
pub const EPISODES_TABLE: &str = "episodes";

/// Schema version written by this build
pub const SCHEMA_VERSION: u32 = 2;

/// Catalog key holding the schema version
pub const SCHEMA_VERSION_KEY: &str = "meta/schema_version";

/// Name of the approximate nearest-neighbor index
pub const VECTOR_INDEX: &str = "idx_episodes_embedding";

/// Positions of the episode columns within a row
pub mod col {
    pub const ID: usize = 0;
    pub const CONTENT: usize = 1;
    pub const NAME: usize = 2;
    pub const SOURCE: usize = 3;
    pub const SOURCE_MODEL: usize = 4;
    pub const SOURCE_DESCRIPTION: usize = 5;
    pub const GROUP_ID: usize = 6;
    pub const TAGS: usize = 7;
    pub const EMBEDDING: usize = 8;
    pub const CREATED_AT: usize = 9;
    pub const VALID_AT: usize = 10;
    pub const EXPIRED_AT: usize = 11;
    pub const METADATA: usize = 12;
    pub const COUNT: usize = 13;
}

/// Column names in row order
pub const COLUMN_NAMES: [&str; col::COUNT] = [
    "id",
    "content",
    "name",
    "source",
    "source_model",
    "source_description",
    "group_id",
    "tags",
    "embedding",
    "created_at",
    "valid_at",
    "expired_at",
    "metadata",
];

/// Secondary B-tree indexes: (name, column)
pub const SECONDARY_INDEXES: [(&str, &str); 4] = [
    ("idx_episodes_created_at", "created_at"),
    ("idx_episodes_group_id", "group_id"),
    ("idx_episodes_valid_at", "valid_at"),
    ("idx_episodes_source", "source"),
];

/// Catalog entry for a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    /// Column family holding the rows
    pub physical: String,
    /// Bumped each time the table is rebuilt
    pub generation: u32,
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    pub fn column(&self, name: &str) -> Option<(usize, &ColumnDef)> {
        self.columns
            .iter()
            .enumerate()
            .find(|(_, column)| column.name == name)
    }

    pub fn catalog_key(&self) -> String {
        table_key(&self.name)
    }
}

/// Index access method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexMethod {
    BTree,
    Hnsw,
}

/// Catalog entry for an index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub table: String,
    pub column: String,
    pub method: IndexMethod,
    /// Column family for B-tree indexes; HNSW indexes live in memory
    pub physical: Option<String>,
}

impl IndexDef {
    pub fn catalog_key(&self) -> String {
        index_key(&self.name)
    }

    /// Key for `row` in this index, or None when the indexed column is NULL
    pub fn entry_key(&self, table: &TableDef, row: &Row) -> Result<Option<Vec<u8>>> {
        let (pos, _) = table.column(&self.column).ok_or_else(|| {
            StoreError::schema(format!("index {} references unknown column", self.name))
        })?;
        let (created_pos, _) = table
            .column("created_at")
            .ok_or_else(|| StoreError::schema("table has no created_at column"))?;
        let id = row
            .get(col::ID)
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::decode("row has no id"))?;
        let created_at = row
            .get(created_pos)
            .and_then(Value::as_utc)
            .ok_or_else(|| StoreError::decode(format!("row {id} has no created_at")))?;

        let key = match row.get(pos) {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::Varchar(text)) => text_index_key(text, &created_at, id),
            Some(value) => match value.as_utc() {
                Some(ts) => timestamp_index_key(&ts, id),
                None => {
                    return Err(StoreError::decode(format!(
                        "cannot index {} value in {}",
                        value.type_name(),
                        self.name
                    )))
                }
            },
        };
        Ok(Some(key))
    }

    /// Recover the episode id from one of this index's keys
    pub fn id_from_key(&self, table: &TableDef, key: &[u8]) -> Result<String> {
        let is_text = matches!(
            table.column(&self.column).map(|(_, column)| &column.ty),
            Some(ColumnType::Varchar | ColumnType::Text)
        );
        id_from_index_key(key, is_text)
    }
}

pub fn table_key(name: &str) -> String {
    format!("table/{name}")
}

pub fn index_key(name: &str) -> String {
    format!("index/{name}")
}

/// Physical column family name for a table generation
pub fn table_family(table: &str, generation: u32) -> String {
    format!("{table}@{generation}")
}

/// Physical column family name for an index on a table generation
pub fn index_family(index: &str, generation: u32) -> String {
    format!("{index}@{generation}")
}

/// Key layout for timestamp indexes: `ts | id`
pub fn timestamp_index_key(ts: &chrono::DateTime<chrono::Utc>, id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(SORT_KEY_LEN + id.len());
    key.extend_from_slice(&temporal::sort_key(ts));
    key.extend_from_slice(id.as_bytes());
    key
}

/// Key prefix selecting one value of a text index: `len | text`
pub fn text_index_prefix(text: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + text.len());
    key.extend_from_slice(&(text.len() as u32).to_be_bytes());
    key.extend_from_slice(text.as_bytes());
    key
}

/// Key layout for text indexes: `len | text | created_at | id`
pub fn text_index_key(text: &str, created_at: &chrono::DateTime<chrono::Utc>, id: &str) -> Vec<u8> {
    let mut key = text_index_prefix(text);
    key.extend_from_slice(&temporal::sort_key(created_at));
    key.extend_from_slice(id.as_bytes());
    key
}

/// Recover the episode id from an index key
pub fn id_from_index_key(key: &[u8], method_is_text: bool) -> Result<String> {
    let offset = if method_is_text {
        let len_bytes: [u8; 4] = key
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| StoreError::decode("truncated index key"))?;
        4 + u32::from_be_bytes(len_bytes) as usize + SORT_KEY_LEN
    } else {
        SORT_KEY_LEN
    };
    let id = key
        .get(offset..)
        .ok_or_else(|| StoreError::decode("truncated index key"))?;
    String::from_utf8(id.to_vec()).map_err(|e| StoreError::decode(e.to_string()))
}

/// Current episode columns (timezone-aware timestamps)
pub fn episode_columns() -> Vec<ColumnDef> {
    vec![
        ColumnDef::new("id", ColumnType::Varchar).not_null(),
        ColumnDef::new("content", ColumnType::Text).not_null(),
        ColumnDef::new("name", ColumnType::Varchar),
        ColumnDef::new("source", ColumnType::Varchar).not_null(),
        ColumnDef::new("source_model", ColumnType::Varchar),
        ColumnDef::new("source_description", ColumnType::Text),
        ColumnDef::new("group_id", ColumnType::Varchar).not_null(),
        ColumnDef::new("tags", ColumnType::VarcharList),
        ColumnDef::new("embedding", ColumnType::FloatArray(EMBEDDING_DIMENSION)),
        ColumnDef::new("created_at", ColumnType::TimestampTz).not_null(),
        ColumnDef::new("valid_at", ColumnType::TimestampTz),
        ColumnDef::new("expired_at", ColumnType::TimestampTz),
        ColumnDef::new("metadata", ColumnType::Json),
    ]
}

/// Index definitions for a table generation
pub fn secondary_index_defs(generation: u32) -> Vec<IndexDef> {
    SECONDARY_INDEXES
        .iter()
        .map(|(name, column)| IndexDef {
            name: name.to_string(),
            table: EPISODES_TABLE.to_string(),
            column: column.to_string(),
            method: IndexMethod::BTree,
            physical: Some(index_family(name, generation)),
        })
        .collect()
}

/// The schema as recorded in the catalog
#[derive(Debug, Clone)]
pub struct Schema {
    pub table: TableDef,
    pub indexes: Vec<IndexDef>,
}

impl Schema {
    /// Load the episode table and its indexes from the catalog
    pub fn load(engine: &Engine) -> Result<Self> {
        let table: TableDef = engine
            .catalog_get(&table_key(EPISODES_TABLE))?
            .ok_or_else(|| StoreError::schema("episodes table does not exist"))?;
        let indexes = engine
            .catalog_scan::<IndexDef>("index/")?
            .into_iter()
            .filter(|index| index.table == table.name)
            .collect();
        Ok(Self { table, indexes })
    }

    /// Refuse to operate on a table whose layout differs from the current one
    pub fn validate(&self) -> Result<()> {
        let names: Vec<&str> = self.table.columns.iter().map(|c| c.name.as_str()).collect();
        if names != COLUMN_NAMES {
            return Err(StoreError::schema(format!(
                "unexpected episode columns: {names:?}"
            )));
        }
        let expected = episode_columns();
        for (have, want) in self.table.columns.iter().zip(&expected) {
            if have.ty != want.ty {
                return Err(StoreError::schema(format!(
                    "column {} has type {}, expected {}",
                    have.name, have.ty, want.ty
                )));
            }
        }
        Ok(())
    }

    /// B-tree index by name
    pub fn btree(&self, name: &str) -> Option<&IndexDef> {
        self.indexes
            .iter()
            .find(|index| index.name == name && index.method == IndexMethod::BTree)
    }

    pub fn btree_indexes(&self) -> impl Iterator<Item = &IndexDef> {
        self.indexes
            .iter()
            .filter(|index| index.method == IndexMethod::BTree)
    }

    pub fn has_vector_index(&self) -> bool {
        self.indexes
            .iter()
            .any(|index| index.method == IndexMethod::Hnsw)
    }

    /// Sorted index names
    pub fn index_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indexes.iter().map(|i| i.name.clone()).collect();
        names.sort();
        names
    }

    /// Column families referenced by the catalog
    pub fn families(&self) -> Vec<String> {
        std::iter::once(self.table.physical.clone())
            .chain(self.indexes.iter().filter_map(|i| i.physical.clone()))
            .collect()
    }
}

/// Create the episode table and secondary indexes if absent
pub fn ensure_schema(engine: &Engine) -> Result<()> {
    let table = match engine.catalog_get::<TableDef>(&table_key(EPISODES_TABLE))? {
        Some(table) => table,
        None => {
            let table = TableDef {
                name: EPISODES_TABLE.to_string(),
                physical: table_family(EPISODES_TABLE, 1),
                generation: 1,
                columns: episode_columns(),
            };
            engine.create_family(&table.physical)?;
            let mut batch = engine.batch();
            batch.put_catalog(&table.catalog_key(), &table)?;
            batch.put_catalog(SCHEMA_VERSION_KEY, &SCHEMA_VERSION)?;
            batch.commit("create table")?;
            log::info!("Created episodes table in {}", table.physical);
            table
        }
    };

    for index in secondary_index_defs(table.generation) {
        if engine
            .catalog_get::<IndexDef>(&index.catalog_key())?
            .is_some()
        {
            continue;
        }
        create_index(engine, &table, &index)?;
    }

    Ok(())
}

/// Build a B-tree index over the existing rows and register it
pub fn create_index(engine: &Engine, table: &TableDef, index: &IndexDef) -> Result<()> {
    let family = index
        .physical
        .as_deref()
        .ok_or_else(|| StoreError::schema(format!("index {} has no storage", index.name)))?;
    engine.create_family(family)?;

    let entries = backfill_index(engine, table, index, family)?;
    let mut batch = engine.batch();
    batch.put_catalog(&index.catalog_key(), index)?;
    batch.commit("create index")?;
    log::info!("Created index {} ({} entries)", index.name, entries);
    Ok(())
}

/// Write index entries for every row of `table` into `family`
pub fn backfill_index(
    engine: &Engine,
    table: &TableDef,
    index: &IndexDef,
    family: &str,
) -> Result<usize> {
    const CHUNK: usize = 1000;

    let mut batch = engine.batch();
    let mut entries = 0;
    for item in engine.scan(&table.physical, KeyRange::all(), false)? {
        let (_, bytes) = item?;
        let row: Row = bincode::deserialize(&bytes)?;
        if let Some(key) = index.entry_key(table, &row)? {
            batch.put(family, &key, &[])?;
            entries += 1;
        }
        if batch.len() >= CHUNK {
            std::mem::replace(&mut batch, engine.batch()).commit("backfill index")?;
        }
    }
    if !batch.is_empty() {
        batch.commit("backfill index")?;
    }
    Ok(entries)
}

/// Register the HNSW index on the embedding column. Existing registration is
/// left alone.
pub fn ensure_vector_index(engine: &Engine) -> Result<()> {
    let def = IndexDef {
        name: VECTOR_INDEX.to_string(),
        table: EPISODES_TABLE.to_string(),
        column: "embedding".to_string(),
        method: IndexMethod::Hnsw,
        physical: None,
    };
    if engine.catalog_get::<IndexDef>(&def.catalog_key())?.is_some() {
        return Ok(());
    }
    let mut batch = engine.batch();
    batch.put_catalog(&def.catalog_key(), &def)?;
    batch.commit("create vector index")
}

/// Drop column families that the catalog no longer references
pub fn drop_orphans(engine: &Engine, schema: &Schema) -> Result<()> {
    let referenced = schema.families();
    for family in engine.user_families() {
        if !referenced.contains(&family) {
            log::warn!("Dropping unreferenced column family {}", family);
            engine.drop_family(&family)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    #[test]
    fn test_ensure_schema_idempotent() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(dir.path()).unwrap();

        ensure_schema(&engine).unwrap();
        ensure_vector_index(&engine).unwrap();
        let first = Schema::load(&engine).unwrap();

        ensure_schema(&engine).unwrap();
        ensure_vector_index(&engine).unwrap();
        let second = Schema::load(&engine).unwrap();

        assert_eq!(first.table, second.table);
        assert_eq!(second.indexes.len(), 5);
        assert_eq!(
            second.index_names(),
            vec![
                "idx_episodes_created_at",
                "idx_episodes_embedding",
                "idx_episodes_group_id",
                "idx_episodes_source",
                "idx_episodes_valid_at",
            ]
        );
        second.validate().unwrap();
        assert_eq!(engine.user_families().len(), 5);
    }

    #[test]
    fn test_text_key_orders_by_time_within_value() {
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();

        let a_old = text_index_key("a", &t1, "z");
        let a_new = text_index_key("a", &t2, "a");
        let ab = text_index_key("ab", &t1, "a");

        assert!(a_old < a_new);
        // Length prefix keeps "a" and "ab" in separate ranges
        assert!(a_new < ab);
        assert!(a_new.starts_with(&text_index_prefix("a")));
        assert!(!ab.starts_with(&text_index_prefix("a")));
    }

    #[test]
    fn test_id_from_index_key() {
        let ts = Utc::now();
        let key = text_index_key("group", &ts, "ep-1");
        assert_eq!(id_from_index_key(&key, true).unwrap(), "ep-1");
        let key = timestamp_index_key(&ts, "ep-2");
        assert_eq!(id_from_index_key(&key, false).unwrap(), "ep-2");
        assert!(id_from_index_key(&[0, 0], true).is_err());
    }

    #[test]
    fn test_validate_rejects_naive_timestamps() {
        let mut columns = episode_columns();
        columns[col::CREATED_AT].ty = ColumnType::Timestamp;
        let schema = Schema {
            table: TableDef {
                name: EPISODES_TABLE.into(),
                physical: table_family(EPISODES_TABLE, 1),
                generation: 1,
                columns,
            },
            indexes: Vec::new(),
        };
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_column_positions_match_names() {
        let columns = episode_columns();
        assert_eq!(columns.len(), col::COUNT);
        assert_eq!(columns[col::EMBEDDING].name, "embedding");
        assert_eq!(columns[col::METADATA].name, "metadata");
        assert_eq!(COLUMN_NAMES[col::GROUP_ID], "group_id");
    }
}
