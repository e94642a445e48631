//! Deterministic demo catalog.
//!
//! Four tables from a small project-staffing schema, with statistics
//! computed from generated column values. Columns that are joined with each
//! other (`mbr`, `spr`) share a histogram domain so their buckets line up.
//!
//! The same schema can also be written out as data files with
//! [`write_sample_data`] and read back with [`sample_catalog_from_dir`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::datafile::{generate_data_file, table_from_data_file, ColumnSpec, LoadOptions};
use super::manager::Catalog;
use super::schema::{CatalogResult, Table, TableBuilder};
use super::stats::{ColumnStats, StatsConfig};
use super::types::{DataType, Index};

const EMPLOYEES: i64 = 10_000;
const PROJECTS: i64 = 5_000;
/// Seed of the built-in demo catalog.
pub const SAMPLE_SEED: u64 = 0x5EED;
const ASSIGNMENTS: usize = 20_000;
const ENGAGEMENTS: usize = 8_000;

/// Uniform values in `[low, high]`.
fn column(rng: &mut StdRng, rows: usize, low: i64, high: i64) -> Vec<i64> {
    (0..rows).map(|_| rng.random_range(low..=high)).collect()
}

struct GeneratedColumn {
    name: &'static str,
    key: bool,
    values: Vec<i64>,
    domain: (i64, i64),
}

fn generated_table(
    name: &str,
    columns: Vec<GeneratedColumn>,
    indexes: Vec<Index>,
    clustered: bool,
    config: &StatsConfig,
) -> CatalogResult<Table> {
    let rows = columns.first().map_or(0, |c| c.values.len()) as u64;
    let mut builder = TableBuilder::new(name)
        .row_count(rows)
        .clustered(clustered)
        .stats_config(*config);

    let mut stats = BTreeMap::new();
    for col in columns {
        let (low, high) = col.domain;
        stats.insert(
            col.name,
            ColumnStats::from_values_in_domain(&col.values, low, high, config),
        );
        builder = if col.key {
            builder.add_key_column(col.name, DataType::Integer)
        } else {
            builder.add_column(col.name, DataType::Integer)
        };
    }
    for (column, column_stats) in stats {
        builder = builder.column_stats(column, column_stats);
    }
    for index in indexes {
        builder = builder.index(index);
    }
    builder.build()
}

/// Build the demo catalog with default statistics settings.
pub fn sample_catalog() -> CatalogResult<Catalog> {
    sample_catalog_with(&StatsConfig::default())
}

/// Build the demo catalog with custom statistics settings.
pub fn sample_catalog_with(config: &StatsConfig) -> CatalogResult<Catalog> {
    let mut rng = StdRng::seed_from_u64(SAMPLE_SEED);
    let mut catalog = Catalog::new();

    catalog.add_table(generated_table(
        "radnik",
        vec![
            GeneratedColumn {
                name: "mbr",
                key: true,
                values: (1..=EMPLOYEES).collect(),
                domain: (1, EMPLOYEES),
            },
            GeneratedColumn {
                name: "god",
                key: false,
                values: column(&mut rng, EMPLOYEES as usize, 1990, 2004),
                domain: (1990, 2004),
            },
            GeneratedColumn {
                name: "plt",
                key: false,
                values: column(&mut rng, EMPLOYEES as usize, 1000, 5000),
                domain: (1000, 5000),
            },
        ],
        vec![
            Index::new("PK_Index_radnik_mbr", ["mbr"]),
            Index::new("IX_radnik_plt", ["plt"]).with_clustered(false),
        ],
        true,
        config,
    )?)?;

    catalog.add_table(generated_table(
        "projekat",
        vec![
            GeneratedColumn {
                name: "spr",
                key: true,
                values: (1..=PROJECTS).collect(),
                domain: (1, PROJECTS),
            },
            GeneratedColumn {
                name: "ruk",
                key: false,
                values: column(&mut rng, PROJECTS as usize, 1, EMPLOYEES),
                domain: (1, EMPLOYEES),
            },
            GeneratedColumn {
                name: "trajanje",
                key: false,
                values: column(&mut rng, PROJECTS as usize, 1, 12),
                domain: (1, 12),
            },
        ],
        vec![Index::new("PK_Index_projekat_spr", ["spr"])],
        true,
        config,
    )?)?;

    catalog.add_table(generated_table(
        "radproj",
        vec![
            GeneratedColumn {
                name: "mbr",
                key: true,
                values: column(&mut rng, ASSIGNMENTS, 1, EMPLOYEES),
                domain: (1, EMPLOYEES),
            },
            GeneratedColumn {
                name: "spr",
                key: true,
                values: column(&mut rng, ASSIGNMENTS, 1, PROJECTS),
                domain: (1, PROJECTS),
            },
            GeneratedColumn {
                name: "brc",
                key: false,
                values: column(&mut rng, ASSIGNMENTS, 1, 12),
                domain: (1, 12),
            },
        ],
        vec![Index::new("PK_Index_radproj_mbr_spr", ["mbr", "spr"])],
        false,
        config,
    )?)?;

    catalog.add_table(generated_table(
        "angazovanje",
        vec![
            GeneratedColumn {
                name: "mbr",
                key: true,
                values: column(&mut rng, ENGAGEMENTS, 1, EMPLOYEES),
                domain: (1, EMPLOYEES),
            },
            GeneratedColumn {
                name: "brp",
                key: false,
                values: column(&mut rng, ENGAGEMENTS, 1, 10),
                domain: (1, 10),
            },
        ],
        vec![Index::new("PK_Index_angazovanje_mbr", ["mbr"])],
        true,
        config,
    )?)?;

    Ok(catalog)
}

/// One data file of the demo schema.
struct SampleFile {
    table: &'static str,
    columns: Vec<ColumnSpec>,
    rows: usize,
    clustered: bool,
}

fn sample_files() -> Vec<SampleFile> {
    vec![
        SampleFile {
            table: "radnik",
            columns: vec![
                ColumnSpec::new("mbr", 1, EMPLOYEES).key(),
                ColumnSpec::new("god", 1990, 2004),
                ColumnSpec::new("plt", 1000, 5000),
            ],
            rows: EMPLOYEES as usize,
            clustered: true,
        },
        SampleFile {
            table: "projekat",
            columns: vec![
                ColumnSpec::new("spr", 1, PROJECTS).key(),
                ColumnSpec::new("ruk", 1, EMPLOYEES),
                ColumnSpec::new("trajanje", 1, 12),
            ],
            rows: PROJECTS as usize,
            clustered: true,
        },
        SampleFile {
            table: "radproj",
            columns: vec![
                ColumnSpec::new("mbr", 1, EMPLOYEES).key(),
                ColumnSpec::new("spr", 1, PROJECTS).key(),
                ColumnSpec::new("brc", 1, 12),
            ],
            rows: ASSIGNMENTS,
            clustered: false,
        },
        SampleFile {
            table: "angazovanje",
            columns: vec![
                ColumnSpec::new("mbr", 1, EMPLOYEES).key(),
                ColumnSpec::new("brp", 1, 10),
            ],
            rows: ENGAGEMENTS,
            clustered: true,
        },
    ]
}

fn data_path(dir: &Path, table: &str) -> PathBuf {
    dir.join(format!("{}.txt", table))
}

/// Write one data file per demo table into `dir`, drawing values from
/// `seed`. Returns the written paths.
pub fn write_sample_data(dir: impl AsRef<Path>, seed: u64) -> CatalogResult<Vec<PathBuf>> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut written = Vec::new();
    for file in sample_files() {
        let path = data_path(dir, file.table);
        generate_data_file(&path, &file.columns, file.rows, &mut rng)?;
        written.push(path);
    }
    Ok(written)
}

/// Load the demo tables from data files in `dir`, as written by
/// [`write_sample_data`].
pub fn sample_catalog_from_dir(dir: impl AsRef<Path>, config: &StatsConfig) -> CatalogResult<Catalog> {
    let dir = dir.as_ref();
    let mut catalog = Catalog::new();
    for file in sample_files() {
        let options = LoadOptions::new()
            .name(file.table)
            .clustered(file.clustered)
            .config(*config);
        catalog.add_table(table_from_data_file(data_path(dir, file.table), &options)?)?;
    }
    Ok(catalog)
}
