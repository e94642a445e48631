//! Whitespace-separated data files.
//!
//! The first line names the columns; a trailing `+` marks a primary key
//! column. Every following line holds one integer per column:
//!
//! ```text
//! mbr+ god plt
//! 1 1994 3200
//! 2 2001 1850
//! ```
//!
//! [`table_from_data_file`] derives a table definition and its statistics
//! from such a file. [`generate_data_file`] writes one with uniformly drawn
//! values.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use rand::Rng;
use tracing::debug;

use super::schema::{CatalogError, CatalogResult, Table, TableBuilder};
use super::stats::{ColumnStats, StatsConfig};
use super::types::{DataType, Index};

const KEY_MARKER: char = '+';

/// One generated column: its name, key flag and inclusive value range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub key: bool,
    pub low: i64,
    pub high: i64,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, low: i64, high: i64) -> Self {
        Self {
            name: name.into(),
            key: false,
            low: low.min(high),
            high: low.max(high),
        }
    }

    /// Mark the column as part of the primary key.
    pub fn key(mut self) -> Self {
        self.key = true;
        self
    }

    fn header(&self) -> String {
        if self.key {
            format!("{}{}", self.name, KEY_MARKER)
        } else {
            self.name.clone()
        }
    }
}

/// How a data file is turned into a table.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Table name. Defaults to the file stem.
    pub name: Option<String>,
    /// Whether rows are stored in key order.
    pub clustered: bool,
    /// Key columns of the index to create. `None` indexes the primary key
    /// columns; an empty list creates no index.
    pub indexed: Option<Vec<String>>,
    pub config: StatsConfig,
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn clustered(mut self, clustered: bool) -> Self {
        self.clustered = clustered;
        self
    }

    pub fn indexed<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.indexed = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn config(mut self, config: StatsConfig) -> Self {
        self.config = config;
        self
    }
}

/// Name of the index built over `columns` of `table`.
pub fn index_name(table: &str, columns: &[String]) -> String {
    let mut name = format!("PK_Index_{}", table);
    for column in columns {
        name.push('_');
        name.push_str(column);
    }
    name
}

/// Write `rows` rows of uniformly drawn values to `out`.
pub fn write_data<W: Write, R: Rng>(
    out: &mut W,
    columns: &[ColumnSpec],
    rows: usize,
    rng: &mut R,
) -> CatalogResult<()> {
    let header: Vec<String> = columns.iter().map(ColumnSpec::header).collect();
    writeln!(out, "{}", header.join(" "))?;
    for _ in 0..rows {
        let row: Vec<String> = columns
            .iter()
            .map(|c| rng.random_range(c.low..=c.high).to_string())
            .collect();
        writeln!(out, "{}", row.join(" "))?;
    }
    Ok(())
}

/// Generate a data file at `path`.
pub fn generate_data_file<R: Rng>(
    path: impl AsRef<Path>,
    columns: &[ColumnSpec],
    rows: usize,
    rng: &mut R,
) -> CatalogResult<()> {
    let path = path.as_ref();
    let mut out = BufWriter::new(File::create(path)?);
    write_data(&mut out, columns, rows, rng)?;
    out.flush()?;
    debug!(path = %path.display(), rows, "generated data file");
    Ok(())
}

/// Build a table from the contents of a data file.
pub fn table_from_data(name: &str, text: &str, options: &LoadOptions) -> CatalogResult<Table> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty());

    let Some((_, header)) = lines.next() else {
        return Err(malformed(1, "missing header"));
    };
    let columns: Vec<(&str, bool)> = header
        .split_whitespace()
        .map(|token| match token.strip_suffix(KEY_MARKER) {
            Some(column) => (column, true),
            None => (token, false),
        })
        .collect();
    if let Some((column, _)) = columns.iter().find(|(c, _)| c.is_empty()) {
        return Err(malformed(1, format!("bad column name '{}{}'", column, KEY_MARKER)));
    }

    let mut values: Vec<Vec<i64>> = vec![Vec::new(); columns.len()];
    let mut rows = 0u64;
    for (line_no, line) in lines {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != columns.len() {
            return Err(malformed(
                line_no,
                format!("expected {} values, found {}", columns.len(), fields.len()),
            ));
        }
        for (slot, field) in values.iter_mut().zip(&fields) {
            let value = field
                .parse::<i64>()
                .map_err(|_| malformed(line_no, format!("not an integer: {}", field)))?;
            slot.push(value);
        }
        rows += 1;
    }

    let mut stats = BTreeMap::new();
    let mut builder = TableBuilder::new(name)
        .row_count(rows)
        .clustered(options.clustered)
        .stats_config(options.config);
    for ((column, key), column_values) in columns.iter().zip(&values) {
        builder = if *key {
            builder.add_key_column(*column, DataType::Integer)
        } else {
            builder.add_column(*column, DataType::Integer)
        };
        stats.insert(*column, ColumnStats::from_values(column_values, &options.config));
    }
    for (column, column_stats) in stats {
        builder = builder.column_stats(column, column_stats);
    }
    let indexed: Vec<String> = match &options.indexed {
        Some(indexed) => indexed.clone(),
        None => columns
            .iter()
            .filter(|(_, key)| *key)
            .map(|(column, _)| column.to_string())
            .collect(),
    };
    if !indexed.is_empty() {
        builder = builder.index(
            Index::new(index_name(name, &indexed), indexed.iter().cloned())
                .with_clustered(options.clustered),
        );
    }

    debug!(table = name, rows, columns = columns.len(), "loaded table data");
    builder.build()
}

/// Build a table from a data file on disk.
pub fn table_from_data_file(path: impl AsRef<Path>, options: &LoadOptions) -> CatalogResult<Table> {
    let path = path.as_ref();
    let name = match &options.name {
        Some(name) => name.clone(),
        None => path
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| malformed(0, format!("cannot derive a table name from {}", path.display())))?
            .to_string(),
    };
    let text = fs::read_to_string(path)?;
    table_from_data(&name, &text, options)
}

fn malformed(line: usize, reason: impl Into<String>) -> CatalogError {
    CatalogError::MalformedData {
        line,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn radnik_columns() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::new("mbr", 1, 500).key(),
            ColumnSpec::new("god", 1990, 2004),
            ColumnSpec::new("plt", 1000, 5000),
        ]
    }

    #[test]
    fn test_table_from_data() {
        let text = "mbr+ god\n1 1990\n2 1990\n\n3 2000\n";
        let options = LoadOptions::new().clustered(true).indexed(["mbr"]);
        let table = table_from_data("radnik", text, &options).unwrap();

        assert_eq!(table.column_names(), vec!["mbr", "god"]);
        assert!(table.get_column("mbr").unwrap().primary_key);
        assert!(!table.get_column("god").unwrap().primary_key);
        assert_eq!(table.statistics.row_count, 3);
        assert_eq!(table.statistics.tuple_size, 28);
        assert!(table.statistics.clustered);
        assert_eq!(table.statistics.distinct_values("god"), Some(2));
        assert_eq!(table.statistics.column("mbr").unwrap().histogram.total_rows(), 3);

        let index = table.get_index("PK_Index_radnik_mbr").unwrap();
        assert!(index.clustered);
        assert_eq!(index.columns, vec!["mbr".to_string()]);
    }

    #[test]
    fn test_table_from_data_errors() {
        let options = LoadOptions::new();
        assert!(matches!(
            table_from_data("t", "", &options),
            Err(CatalogError::MalformedData { line: 1, .. })
        ));
        assert!(matches!(
            table_from_data("t", "a b\n1 2\n3\n", &options),
            Err(CatalogError::MalformedData { line: 3, .. })
        ));
        assert!(matches!(
            table_from_data("t", "a\nx\n", &options),
            Err(CatalogError::MalformedData { line: 2, .. })
        ));
        assert!(matches!(
            table_from_data("t", "a a\n1 2\n", &options),
            Err(CatalogError::DuplicateColumn(_))
        ));
        assert!(matches!(
            table_from_data("t", "a\n1\n", &LoadOptions::new().indexed(["b"])),
            Err(CatalogError::InvalidIndex { .. })
        ));
    }

    #[test]
    fn test_key_columns_indexed_by_default() {
        let text = "mbr+ spr+ brc\n1 1 3\n1 2 4\n";
        let table = table_from_data("radproj", text, &LoadOptions::new()).unwrap();
        let index = table.get_index("PK_Index_radproj_mbr_spr").unwrap();
        assert_eq!(index.columns, vec!["mbr".to_string(), "spr".to_string()]);
        assert!(!index.clustered);

        let empty: [&str; 0] = [];
        let table = table_from_data("radproj", text, &LoadOptions::new().indexed(empty)).unwrap();
        assert!(table.indexes.is_empty());
    }

    #[test]
    fn test_generated_values_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut out = Vec::new();
        write_data(&mut out, &radnik_columns(), 200, &mut rng).unwrap();
        let text = String::from_utf8(out).unwrap();

        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("mbr+ god plt"));
        let mut rows = 0;
        for line in lines {
            let fields: Vec<i64> = line.split_whitespace().map(|f| f.parse().unwrap()).collect();
            assert!((1..=500).contains(&fields[0]));
            assert!((1990..=2004).contains(&fields[1]));
            assert!((1000..=5000).contains(&fields[2]));
            rows += 1;
        }
        assert_eq!(rows, 200);
    }

    #[test]
    fn test_data_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("radnik.txt");
        let mut rng = StdRng::seed_from_u64(0x5EED);
        generate_data_file(&path, &radnik_columns(), 1_000, &mut rng).unwrap();

        let options = LoadOptions::new().clustered(true).indexed(["mbr"]);
        let table = table_from_data_file(&path, &options).unwrap();
        assert_eq!(table.name, "radnik");
        assert_eq!(table.statistics.row_count, 1_000);
        assert!(table.statistics.distinct_values("god").unwrap() <= 15);
        assert!(table.statistics.distinct_values("mbr").unwrap() <= 500);
        assert!(table.get_index("PK_Index_radnik_mbr").is_some());

        let renamed = table_from_data_file(&path, &options.clone().name("emp")).unwrap();
        assert_eq!(renamed.name, "emp");
        assert_eq!(renamed.statistics, table.statistics);
    }

    #[test]
    fn test_missing_data_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = table_from_data_file(dir.path().join("missing.txt"), &LoadOptions::new());
        assert!(matches!(result, Err(CatalogError::Io(_))));
    }

    #[test]
    fn test_index_name() {
        let columns = vec!["mbr".to_string(), "spr".to_string()];
        assert_eq!(index_name("radproj", &columns), "PK_Index_radproj_mbr_spr");
    }
}
