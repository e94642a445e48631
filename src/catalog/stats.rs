//! Table and column statistics.
//!
//! Column statistics consist of a distinct-value count and an equal-width
//! histogram. Histograms are the input to equality selectivity and to the
//! bucket-overlay join estimate, so two columns that are meant to be joined
//! should be built over the same domain (see
//! [`ColumnStats::from_values_in_domain`]) to get aligned bucket ranges.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Default number of histogram buckets.
pub const DEFAULT_BUCKETS: usize = 10;
/// Default block (page) size in bytes.
pub const DEFAULT_BLOCK_SIZE: u64 = 4096;
/// Default per-tuple header size in bytes.
pub const DEFAULT_TUPLE_HEADER: u64 = 20;
/// Default size of one attribute in bytes.
pub const DEFAULT_ATTRIBUTE_SIZE: u64 = 4;

/// Knobs used when statistics are derived from raw column values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsConfig {
    pub buckets: usize,
    pub block_size: u64,
    pub tuple_header: u64,
    pub attribute_size: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            buckets: DEFAULT_BUCKETS,
            block_size: DEFAULT_BLOCK_SIZE,
            tuple_header: DEFAULT_TUPLE_HEADER,
            attribute_size: DEFAULT_ATTRIBUTE_SIZE,
        }
    }
}

impl StatsConfig {
    pub fn buckets(mut self, buckets: usize) -> Self {
        self.buckets = buckets.max(1);
        self
    }

    pub fn block_size(mut self, block_size: u64) -> Self {
        self.block_size = block_size;
        self
    }
}

/// One histogram bucket covering the closed range `[lower, upper]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub lower: i64,
    pub upper: i64,
    pub row_count: u64,
}

impl Bucket {
    pub fn contains(&self, value: i64) -> bool {
        self.lower <= value && value <= self.upper
    }

    /// Check whether two buckets cover exactly the same range.
    pub fn same_range(&self, other: &Bucket) -> bool {
        self.lower == other.lower && self.upper == other.upper
    }
}

/// Equal-width histogram.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Histogram {
    pub buckets: Vec<Bucket>,
}

impl Histogram {
    /// Build an equal-width histogram over `[low, high]`.
    ///
    /// Values outside the domain are clamped into the first or last bucket.
    /// When the domain is narrower than the bucket count, fewer buckets are
    /// produced so that every bucket covers at least one value.
    pub fn equal_width(values: &[i64], low: i64, high: i64, buckets: usize) -> Self {
        let (low, high) = if low <= high { (low, high) } else { (high, low) };
        let span = (high as i128) - (low as i128) + 1;
        let count = (buckets.max(1) as i128).min(span) as usize;
        let width = (span + count as i128 - 1) / count as i128;

        let mut result: Vec<Bucket> = (0..count)
            .map(|i| low as i128 + i as i128 * width)
            .take_while(|&lower| lower <= high as i128)
            .map(|lower| Bucket {
                lower: lower as i64,
                upper: (lower + width - 1).min(high as i128) as i64,
                row_count: 0,
            })
            .collect();

        let last = result.len().saturating_sub(1);
        for &value in values {
            let offset = ((value as i128) - (low as i128)).max(0) / width;
            let slot = (offset as usize).min(last);
            if let Some(bucket) = result.get_mut(slot) {
                bucket.row_count += 1;
            }
        }

        Self { buckets: result }
    }

    /// Sum of the row counts of every bucket containing `value`.
    pub fn rows_containing(&self, value: i64) -> u64 {
        self.buckets
            .iter()
            .filter(|b| b.contains(value))
            .map(|b| b.row_count)
            .sum()
    }

    pub fn total_rows(&self) -> u64 {
        self.buckets.iter().map(|b| b.row_count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Statistics for one column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub distinct_values: u64,
    #[serde(default)]
    pub histogram: Histogram,
}

impl ColumnStats {
    pub fn new(distinct_values: u64, histogram: Histogram) -> Self {
        Self {
            distinct_values,
            histogram,
        }
    }

    /// Statistics for an integer column, with a histogram over the observed
    /// `[min, max]` range.
    pub fn from_values(values: &[i64], config: &StatsConfig) -> Self {
        let low = values.iter().copied().min().unwrap_or(0);
        let high = values.iter().copied().max().unwrap_or(0);
        Self::from_values_in_domain(values, low, high, config)
    }

    /// Statistics for an integer column, with a histogram over a fixed
    /// `[low, high]` domain.
    pub fn from_values_in_domain(values: &[i64], low: i64, high: i64, config: &StatsConfig) -> Self {
        let distinct = values.iter().collect::<BTreeSet<_>>().len() as u64;
        let histogram = if values.is_empty() {
            Histogram::default()
        } else {
            Histogram::equal_width(values, low, high, config.buckets)
        };
        Self::new(distinct, histogram)
    }

    /// Statistics for a text column. Only the distinct count is kept.
    pub fn from_text<S: AsRef<str>>(values: &[S]) -> Self {
        let distinct = values.iter().map(AsRef::as_ref).collect::<BTreeSet<_>>().len() as u64;
        Self::new(distinct, Histogram::default())
    }
}

/// Statistics for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStats {
    pub row_count: u64,
    /// Tuple size in bytes.
    pub tuple_size: u64,
    /// Block size in bytes.
    pub block_size: u64,
    /// Whether rows are stored in key order.
    pub clustered: bool,
    #[serde(default)]
    pub columns: BTreeMap<String, ColumnStats>,
}

impl Default for TableStats {
    fn default() -> Self {
        Self {
            row_count: 0,
            tuple_size: DEFAULT_TUPLE_HEADER,
            block_size: DEFAULT_BLOCK_SIZE,
            clustered: false,
            columns: BTreeMap::new(),
        }
    }
}

impl TableStats {
    /// Derive table statistics from per-column statistics.
    ///
    /// The tuple size is `columns * attribute_size + tuple_header`.
    pub fn from_columns(
        row_count: u64,
        columns: BTreeMap<String, ColumnStats>,
        clustered: bool,
        config: &StatsConfig,
    ) -> Self {
        let tuple_size = columns.len() as u64 * config.attribute_size + config.tuple_header;
        Self {
            row_count,
            tuple_size,
            block_size: config.block_size,
            clustered,
            columns,
        }
    }

    /// Number of blocks a full scan touches.
    ///
    /// Clustered tables pack `block_size / tuple_size` rows per block; an
    /// unclustered table is charged one block per row.
    pub fn blocks(&self) -> u64 {
        if self.clustered {
            let per_block = (self.block_size / self.tuple_size.max(1)).max(1);
            self.row_count.div_ceil(per_block)
        } else {
            self.row_count
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnStats> {
        self.columns.get(name)
    }

    pub fn distinct_values(&self, column: &str) -> Option<u64> {
        self.columns.get(column).map(|c| c.distinct_values)
    }
}
