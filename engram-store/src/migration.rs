//! Schema migrations
//!
//! Each migration has a guard over the catalog's table definition and a pure
//! column-level transform. A migration rebuilds the table into a shadow
//! generation, builds every secondary index for it, and then swaps the
//! catalog in one atomic write. Until that write lands the old table is
//! untouched, so a failure at any earlier step leaves the store as it was.

use crate::engine::{Engine, KeyRange};
use crate::error::{Result, StoreError};
use crate::schema::{
    secondary_index_defs, table_family, table_key, IndexDef, IndexMethod, TableDef,
    EPISODES_TABLE, SCHEMA_VERSION_KEY,
};
use crate::temporal;
use crate::value::{check_row, ColumnDef, ColumnType, Row, Value};

const COPY_CHUNK: usize = 1000;

/// One versioned schema change
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    /// Guard: true when the table still needs this migration
    pub applies: fn(&TableDef) -> bool,
    /// New definition for a column
    pub column: fn(&ColumnDef) -> ColumnDef,
    /// Convert a stored value to the new column type
    pub cast: fn(&ColumnDef, Value) -> Result<Value>,
}

/// Known migrations, oldest first
pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 2,
    name: "timestamptz",
    applies: has_naive_created_at,
    column: naive_to_tz_column,
    cast: naive_to_tz_value,
}];

fn has_naive_created_at(table: &TableDef) -> bool {
    matches!(
        table.column("created_at").map(|(_, column)| &column.ty),
        Some(ColumnType::Timestamp)
    )
}

fn naive_to_tz_column(column: &ColumnDef) -> ColumnDef {
    let mut column = column.clone();
    if column.ty == ColumnType::Timestamp {
        column.ty = ColumnType::TimestampTz;
    }
    column
}

fn naive_to_tz_value(column: &ColumnDef, value: Value) -> Result<Value> {
    match (&column.ty, value) {
        (ColumnType::Timestamp, Value::Timestamp(naive)) => {
            Ok(Value::TimestampTz(temporal::assume_utc(naive)))
        }
        (_, value) => Ok(value),
    }
}

/// Summary of a migration run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub applied: Vec<&'static str>,
    pub rows_copied: usize,
}

/// Bring the episode table up to date. No-op when the table is absent or
/// already current.
pub fn migrate(engine: &Engine) -> Result<MigrationReport> {
    let mut report = MigrationReport::default();
    let Some(mut table) = engine.catalog_get::<TableDef>(&table_key(EPISODES_TABLE))? else {
        log::debug!("No episodes table, skipping migration");
        return Ok(report);
    };

    for migration in MIGRATIONS {
        if !(migration.applies)(&table) {
            continue;
        }
        log::warn!(
            "Episodes table needs migration '{}' (v{})",
            migration.name,
            migration.version
        );
        let (rebuilt, rows) = rebuild_table(engine, &table, migration)?;
        log::info!(
            "Migration '{}' completed: {} rows moved to {}",
            migration.name,
            rows,
            rebuilt.physical
        );
        report.applied.push(migration.name);
        report.rows_copied += rows;
        table = rebuilt;
    }

    Ok(report)
}

/// Shadow-copy `old` under `migration`, then swap it into place
fn rebuild_table(
    engine: &Engine,
    old: &TableDef,
    migration: &Migration,
) -> Result<(TableDef, usize)> {
    let generation = old.generation + 1;
    let shadow = TableDef {
        name: old.name.clone(),
        physical: table_family(&old.name, generation),
        generation,
        columns: old.columns.iter().map(migration.column).collect(),
    };
    let shadow_indexes = secondary_index_defs(generation);

    // Leftovers from an attempt that died before its swap
    discard_shadow(engine, &shadow, &shadow_indexes);

    let rows = match build_shadow(engine, old, &shadow, &shadow_indexes, migration) {
        Ok(rows) => rows,
        Err(e) => {
            log::error!("Migration '{}' aborted: {}", migration.name, e);
            discard_shadow(engine, &shadow, &shadow_indexes);
            return Err(e);
        }
    };

    let old_indexes: Vec<IndexDef> = engine
        .catalog_scan::<IndexDef>("index/")?
        .into_iter()
        .filter(|index| index.table == old.name && index.method == IndexMethod::BTree)
        .collect();

    let swap = || -> Result<()> {
        let mut batch = engine.batch();
        for index in &old_indexes {
            batch.delete_catalog(&index.catalog_key())?;
        }
        for index in &shadow_indexes {
            batch.put_catalog(&index.catalog_key(), index)?;
        }
        batch.put_catalog(&shadow.catalog_key(), &shadow)?;
        batch.put_catalog(SCHEMA_VERSION_KEY, &migration.version)?;
        batch.commit("swap table")
    };
    if let Err(e) = swap() {
        discard_shadow(engine, &shadow, &shadow_indexes);
        return Err(StoreError::migration("swap table", e));
    }

    for family in std::iter::once(old.physical.as_str())
        .chain(old_indexes.iter().filter_map(|i| i.physical.as_deref()))
    {
        engine
            .drop_family(family)
            .map_err(|e| StoreError::migration("drop old table", e))?;
    }

    Ok((shadow, rows))
}

fn build_shadow(
    engine: &Engine,
    old: &TableDef,
    shadow: &TableDef,
    indexes: &[IndexDef],
    migration: &Migration,
) -> Result<usize> {
    engine
        .create_family(&shadow.physical)
        .map_err(|e| StoreError::migration("create shadow table", e))?;
    for index in indexes {
        if let Some(family) = &index.physical {
            engine
                .create_family(family)
                .map_err(|e| StoreError::migration("create shadow index", e))?;
        }
    }

    let copied = copy_rows(engine, old, shadow, indexes, migration)
        .map_err(|e| StoreError::migration("copy rows", e))?;

    let expected = engine
        .count(&old.physical)
        .map_err(|e| StoreError::migration("verify row count", e))?;
    if copied != expected {
        return Err(StoreError::migration(
            "verify row count",
            format!("copied {copied} of {expected} rows"),
        ));
    }
    Ok(copied)
}

fn copy_rows(
    engine: &Engine,
    old: &TableDef,
    shadow: &TableDef,
    indexes: &[IndexDef],
    migration: &Migration,
) -> Result<usize> {
    let mut batch = engine.batch();
    let mut copied = 0;

    for item in engine.scan(&old.physical, KeyRange::all(), false)? {
        let (key, bytes) = item?;
        let row: Row = bincode::deserialize(&bytes)?;
        let row = old
            .columns
            .iter()
            .zip(row)
            .map(|(column, value)| (migration.cast)(column, value))
            .collect::<Result<Row>>()?;
        check_row(&shadow.columns, &row)?;

        batch.put(&shadow.physical, &key, &bincode::serialize(&row)?)?;
        for index in indexes {
            if let (Some(family), Some(entry)) =
                (index.physical.as_deref(), index.entry_key(shadow, &row)?)
            {
                batch.put(family, &entry, &[])?;
            }
        }
        copied += 1;

        if batch.len() >= COPY_CHUNK {
            std::mem::replace(&mut batch, engine.batch()).commit("copy rows")?;
        }
    }
    if !batch.is_empty() {
        batch.commit("copy rows")?;
    }
    Ok(copied)
}

fn discard_shadow(engine: &Engine, shadow: &TableDef, indexes: &[IndexDef]) {
    for family in std::iter::once(shadow.physical.as_str())
        .chain(indexes.iter().filter_map(|i| i.physical.as_deref()))
    {
        if let Err(e) = engine.drop_family(family) {
            log::warn!("Failed to discard {}: {}", family, e);
        }
    }
}
