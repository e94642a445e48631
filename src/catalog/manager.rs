//! In-memory catalog and the read-only interface the optimizer consumes.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::schema::{CatalogError, CatalogResult, Table};
use super::stats::TableStats;
use super::types::{DataType, Index};

/// Read-only access to table metadata and statistics.
///
/// The optimizer only ever reads through this trait, so a catalog can be
/// shared between independent optimizations.
pub trait CatalogReader: Send + Sync {
    fn table_exists(&self, table: &str) -> bool;

    fn column_exists(&self, table: &str, column: &str) -> bool;

    fn column_type(&self, table: &str, column: &str) -> Option<DataType>;

    fn table_stats(&self, table: &str) -> Option<&TableStats>;

    /// Index whose leading key column is `column`. Clustered indexes are
    /// preferred when several qualify.
    fn index_on_column(&self, table: &str, column: &str) -> Option<&Index>;

    /// Index whose key columns are exactly `columns`.
    fn compound_index(&self, table: &str, columns: &BTreeSet<String>) -> Option<&Index>;
}

/// Catalog holding every table definition in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    tables: BTreeMap<String, Table>,
}

impl Catalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table. Fails if the name is taken or the definition is invalid.
    pub fn add_table(&mut self, table: Table) -> CatalogResult<()> {
        table.validate()?;
        if self.tables.contains_key(&table.name) {
            return Err(CatalogError::TableExists(table.name));
        }
        debug!(table = %table.name, rows = table.statistics.row_count, "registered table");
        self.tables.insert(table.name.clone(), table);
        Ok(())
    }

    /// Register a table, replacing any table with the same name. Returns the
    /// replaced definition.
    pub fn replace_table(&mut self, table: Table) -> CatalogResult<Option<Table>> {
        table.validate()?;
        debug!(table = %table.name, rows = table.statistics.row_count, "replaced table");
        Ok(self.tables.insert(table.name.clone(), table))
    }

    /// Remove a table, returning its definition.
    pub fn remove_table(&mut self, name: &str) -> CatalogResult<Table> {
        self.tables
            .remove(name)
            .ok_or_else(|| CatalogError::TableNotFound(name.to_string()))
    }

    /// Get a table definition.
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    /// List table names in sorted order.
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Parse a catalog snapshot from JSON. Every table is validated.
    pub fn from_json_str(json: &str) -> CatalogResult<Self> {
        let raw: Catalog = serde_json::from_str(json)?;
        let mut catalog = Catalog::new();
        for (key, mut table) in raw.tables {
            if table.name.is_empty() {
                table.name = key;
            }
            catalog.add_table(table)?;
        }
        Ok(catalog)
    }

    /// Load a catalog snapshot from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> CatalogResult<Self> {
        let json = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    /// Serialize the catalog as pretty-printed JSON.
    pub fn to_json_string(&self) -> CatalogResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the catalog to a JSON file.
    pub fn save_json_file(&self, path: impl AsRef<Path>) -> CatalogResult<()> {
        fs::write(path.as_ref(), self.to_json_string()?)?;
        Ok(())
    }
}

impl CatalogReader for Catalog {
    fn table_exists(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    fn column_exists(&self, table: &str, column: &str) -> bool {
        self.table(table)
            .is_some_and(|t| t.get_column(column).is_some())
    }

    fn column_type(&self, table: &str, column: &str) -> Option<DataType> {
        self.table(table)?.get_column(column).map(|c| c.data_type)
    }

    fn table_stats(&self, table: &str) -> Option<&TableStats> {
        self.table(table).map(|t| &t.statistics)
    }

    fn index_on_column(&self, table: &str, column: &str) -> Option<&Index> {
        let table = self.table(table)?;
        let mut candidates = table.indexes.iter().filter(|i| i.leads_with(column));
        let first = candidates.next()?;
        if first.clustered {
            return Some(first);
        }
        Some(candidates.find(|i| i.clustered).unwrap_or(first))
    }

    fn compound_index(&self, table: &str, columns: &BTreeSet<String>) -> Option<&Index> {
        self.table(table)?
            .indexes
            .iter()
            .find(|i| i.covers_exactly(columns))
    }
}
