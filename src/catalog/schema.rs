//! Table definitions and validation.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use super::stats::{ColumnStats, StatsConfig, TableStats};
use super::types::{Column, DataType, Index};

/// Result type for catalog operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Catalog-related errors.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("duplicate column: {0}")]
    DuplicateColumn(String),

    #[error("table has no columns: {0}")]
    EmptyTable(String),

    #[error("invalid index {index}: {reason}")]
    InvalidIndex { index: String, reason: String },

    #[error("malformed data at line {line}: {reason}")]
    MalformedData { line: usize, reason: String },

    #[error("statistics reference unknown column: {0}")]
    InvalidStatistics(String),

    #[error("table already exists: {0}")]
    TableExists(String),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Table definition: columns, indexes and statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    /// Table name.
    pub name: String,
    /// Column definitions, in declaration order.
    pub columns: Vec<Column>,
    /// Indexes defined on the table.
    #[serde(default)]
    pub indexes: Vec<Index>,
    /// Statistics used for estimation.
    #[serde(default)]
    pub statistics: TableStats,
}

impl Table {
    /// Get a column definition by name.
    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Get column names.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Get an index by name.
    pub fn get_index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// Validate the definition itself.
    pub fn validate(&self) -> CatalogResult<()> {
        if self.columns.is_empty() {
            return Err(CatalogError::EmptyTable(self.name.clone()));
        }

        let mut seen = HashSet::new();
        for col in &self.columns {
            if !seen.insert(col.name.as_str()) {
                return Err(CatalogError::DuplicateColumn(col.name.clone()));
            }
        }

        for index in &self.indexes {
            if index.columns.is_empty() {
                return Err(CatalogError::InvalidIndex {
                    index: index.name.clone(),
                    reason: "no key columns".into(),
                });
            }
            if let Some(missing) = index.columns.iter().find(|c| !seen.contains(c.as_str())) {
                return Err(CatalogError::InvalidIndex {
                    index: index.name.clone(),
                    reason: format!("unknown column {}", missing),
                });
            }
        }

        if let Some(unknown) = self
            .statistics
            .columns
            .keys()
            .find(|c| !seen.contains(c.as_str()))
        {
            return Err(CatalogError::InvalidStatistics(format!("{}.{}", self.name, unknown)));
        }

        Ok(())
    }
}

/// Builder for table definitions.
///
/// Statistics can either be supplied whole with [`TableBuilder::statistics`]
/// or derived from per-column statistics with [`TableBuilder::row_count`] and
/// [`TableBuilder::column_stats`].
pub struct TableBuilder {
    name: String,
    columns: Vec<Column>,
    indexes: Vec<Index>,
    statistics: Option<TableStats>,
    row_count: u64,
    clustered: bool,
    column_stats: BTreeMap<String, ColumnStats>,
    config: StatsConfig,
}

impl TableBuilder {
    /// Start building a new table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
            statistics: None,
            row_count: 0,
            clustered: false,
            column_stats: BTreeMap::new(),
            config: StatsConfig::default(),
        }
    }

    /// Add a column.
    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Add a simple column with just name and type.
    pub fn add_column(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.columns.push(Column::new(name, data_type));
        self
    }

    /// Add a primary key column.
    pub fn add_key_column(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.columns.push(Column::new(name, data_type).with_primary_key());
        self
    }

    /// Add an index.
    pub fn index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self
    }

    /// Use fully specified statistics.
    pub fn statistics(mut self, statistics: TableStats) -> Self {
        self.statistics = Some(statistics);
        self
    }

    pub fn row_count(mut self, rows: u64) -> Self {
        self.row_count = rows;
        self
    }

    pub fn clustered(mut self, clustered: bool) -> Self {
        self.clustered = clustered;
        self
    }

    pub fn column_stats(mut self, column: impl Into<String>, stats: ColumnStats) -> Self {
        self.column_stats.insert(column.into(), stats);
        self
    }

    pub fn stats_config(mut self, config: StatsConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the table.
    pub fn build(self) -> CatalogResult<Table> {
        let statistics = match self.statistics {
            Some(stats) => stats,
            None => {
                let mut stats = TableStats::from_columns(
                    self.row_count,
                    self.column_stats,
                    self.clustered,
                    &self.config,
                );
                stats.tuple_size =
                    self.columns.len() as u64 * self.config.attribute_size + self.config.tuple_header;
                stats
            }
        };

        let table = Table {
            name: self.name,
            columns: self.columns,
            indexes: self.indexes,
            statistics,
        };
        table.validate()?;
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> Table {
        TableBuilder::new("radnik")
            .add_key_column("mbr", DataType::Integer)
            .add_column("god", DataType::Integer)
            .add_column("plt", DataType::Integer)
            .index(Index::new("PK_radnik_mbr", ["mbr"]))
            .row_count(100)
            .clustered(true)
            .column_stats("mbr", ColumnStats::new(100, Default::default()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_derives_tuple_size() {
        let table = sample_table();
        assert_eq!(table.statistics.tuple_size, 32);
        assert_eq!(table.statistics.row_count, 100);
        assert!(table.statistics.clustered);
        assert_eq!(table.column_names(), vec!["mbr", "god", "plt"]);
    }

    #[test]
    fn test_duplicate_column() {
        let result = TableBuilder::new("t")
            .add_column("a", DataType::Integer)
            .add_column("a", DataType::Text)
            .build();
        assert!(matches!(result, Err(CatalogError::DuplicateColumn(c)) if c == "a"));
    }

    #[test]
    fn test_index_unknown_column() {
        let result = TableBuilder::new("t")
            .add_column("a", DataType::Integer)
            .index(Index::new("ix", ["b"]))
            .build();
        assert!(matches!(result, Err(CatalogError::InvalidIndex { .. })));
    }

    #[test]
    fn test_empty_table() {
        let result = TableBuilder::new("t").build();
        assert!(matches!(result, Err(CatalogError::EmptyTable(_))));
    }

    #[test]
    fn test_stats_unknown_column() {
        let result = TableBuilder::new("t")
            .add_column("a", DataType::Integer)
            .column_stats("zzz", ColumnStats::default())
            .build();
        assert!(matches!(result, Err(CatalogError::InvalidStatistics(_))));
    }

    #[test]
    fn test_lookup() {
        let table = sample_table();
        assert!(table.get_column("god").is_some());
        assert!(table.get_column("nope").is_none());
        assert!(table.get_index("PK_radnik_mbr").is_some());
    }
}
