//! Catalog module: table metadata and statistics.
//!
//! The optimizer reads the catalog through [`CatalogReader`]; [`Catalog`] is
//! the in-memory implementation, loadable from a JSON snapshot or built up
//! from whitespace-separated data files.

mod datafile;
mod manager;
mod sample;
mod schema;
mod stats;
mod types;

pub use datafile::{
    generate_data_file, index_name, table_from_data, table_from_data_file, write_data, ColumnSpec,
    LoadOptions,
};
pub use manager::{Catalog, CatalogReader};
pub use sample::{
    sample_catalog, sample_catalog_from_dir, sample_catalog_with, write_sample_data, SAMPLE_SEED,
};
pub use schema::{CatalogError, CatalogResult, Table, TableBuilder};
pub use stats::{Bucket, ColumnStats, Histogram, StatsConfig, TableStats};
pub use types::{Column, DataType, Index};
