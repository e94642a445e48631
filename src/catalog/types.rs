//! Column data types, column definitions and index descriptors.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Data types a column can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Integer numbers. Histograms are only kept for integer columns.
    Integer,
    /// Text/string data.
    Text,
}

impl DataType {
    /// Get the SQL name for this type.
    pub fn sql_name(&self) -> &'static str {
        match self {
            DataType::Integer => "INTEGER",
            DataType::Text => "TEXT",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.sql_name())
    }
}

/// Column definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Data type.
    pub data_type: DataType,
    /// Whether NULL is allowed.
    #[serde(default)]
    pub nullable: bool,
    /// Whether the column is (part of) the primary key.
    #[serde(default)]
    pub primary_key: bool,
}

impl Column {
    /// Create a new non-nullable, non-key column.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: false,
            primary_key: false,
        }
    }

    /// Mark the column as primary key.
    pub fn with_primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    /// Allow NULL values.
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable && !self.primary_key;
        self
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.data_type)?;
        if self.primary_key {
            write!(f, " PRIMARY KEY")?;
        } else if !self.nullable {
            write!(f, " NOT NULL")?;
        }
        Ok(())
    }
}

/// Index over one or more columns of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    /// Index name.
    pub name: String,
    /// Indexed columns, in key order.
    pub columns: Vec<String>,
    /// Whether the index order matches the physical row order.
    pub clustered: bool,
}

impl Index {
    /// Create an index. Single-column indexes start out clustered,
    /// compound indexes unclustered.
    pub fn new<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let clustered = columns.len() == 1;
        Self {
            name: name.into(),
            columns,
            clustered,
        }
    }

    /// Override the clustered flag.
    pub fn with_clustered(mut self, clustered: bool) -> Self {
        self.clustered = clustered;
        self
    }

    /// The first key column.
    pub fn leading_column(&self) -> Option<&str> {
        self.columns.first().map(String::as_str)
    }

    /// Check whether the index can be searched on `column`.
    pub fn leads_with(&self, column: &str) -> bool {
        self.leading_column() == Some(column)
    }

    /// Check whether the key columns are exactly `columns` (order ignored).
    pub fn covers_exactly(&self, columns: &BTreeSet<String>) -> bool {
        let own: BTreeSet<&str> = self.columns.iter().map(String::as_str).collect();
        own.len() == columns.len() && columns.iter().all(|c| own.contains(c.as_str()))
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.columns.join(", "))?;
        if self.clustered {
            write!(f, " CLUSTERED")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_clustered_default() {
        assert!(Index::new("pk", ["mbr"]).clustered);
        assert!(!Index::new("ix", ["mbr", "spr"]).clustered);
        assert!(!Index::new("ix", ["plt"]).with_clustered(false).clustered);
    }

    #[test]
    fn test_index_covers_exactly() {
        let index = Index::new("ix", ["mbr", "spr"]);
        let exact: BTreeSet<String> = ["spr".to_string(), "mbr".to_string()].into();
        let partial: BTreeSet<String> = ["mbr".to_string()].into();
        let wider: BTreeSet<String> =
            ["mbr".to_string(), "spr".to_string(), "brc".to_string()].into();

        assert!(index.covers_exactly(&exact));
        assert!(!index.covers_exactly(&partial));
        assert!(!index.covers_exactly(&wider));
    }

    #[test]
    fn test_index_leads_with() {
        let index = Index::new("ix", ["mbr", "spr"]);
        assert!(index.leads_with("mbr"));
        assert!(!index.leads_with("spr"));
    }

    #[test]
    fn test_column_display() {
        let col = Column::new("mbr", DataType::Integer).with_primary_key();
        assert_eq!(col.to_string(), "mbr INTEGER PRIMARY KEY");

        let col = Column::new("name", DataType::Text).with_nullable(true);
        assert_eq!(col.to_string(), "name TEXT");
    }
}
