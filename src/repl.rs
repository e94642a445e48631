//! Interactive REPL for the optimizer.
//!
//! Reads `;`-terminated queries, optimizes each against the loaded catalog
//! and prints the resulting plans. A failing query is reported and the loop
//! continues with the next one.

use std::io::{self, BufRead, Write};

use tracing::warn;

use crate::catalog::{table_from_data_file, Catalog, CatalogReader, LoadOptions};
use crate::planner::{render_explanation, OptimizerConfig, QueryPlanner};

/// REPL configuration.
#[derive(Debug, Clone)]
pub struct ReplConfig {
    /// Prompt string.
    pub prompt: String,
    /// Print the plan after every optimization pass.
    pub show_stages: bool,
}

impl Default for ReplConfig {
    fn default() -> Self {
        Self {
            prompt: "miniopt> ".into(),
            show_stages: false,
        }
    }
}

impl ReplConfig {
    pub fn show_stages(mut self, enabled: bool) -> Self {
        self.show_stages = enabled;
        self
    }
}

/// The interactive REPL.
pub struct Repl {
    catalog: Catalog,
    config: ReplConfig,
    optimizer: OptimizerConfig,
}

impl Repl {
    /// Create a new REPL over `catalog`.
    pub fn new(catalog: Catalog) -> Self {
        Self::with_config(catalog, ReplConfig::default())
    }

    /// Create a REPL with custom configuration.
    pub fn with_config(catalog: Catalog, config: ReplConfig) -> Self {
        Self {
            catalog,
            config,
            optimizer: OptimizerConfig::default(),
        }
    }

    pub fn with_optimizer(mut self, optimizer: OptimizerConfig) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Run the REPL on stdin and stdout.
    pub fn run(&mut self) -> io::Result<()> {
        let stdin = io::stdin();
        let stdout = io::stdout();
        self.print_banner(&mut stdout.lock())?;
        self.run_with(stdin.lock(), stdout.lock())
    }

    /// Run the REPL over arbitrary input and output streams.
    pub fn run_with<R: BufRead, W: Write>(&mut self, mut input: R, mut out: W) -> io::Result<()> {
        let mut buffer = String::new();

        loop {
            let prompt = if buffer.is_empty() { self.config.prompt.as_str() } else { "      -> " };
            write!(out, "{}", prompt)?;
            out.flush()?;

            let mut line = String::new();
            if input.read_line(&mut line)? == 0 {
                writeln!(out)?;
                break;
            }
            let line = line.trim();

            if buffer.is_empty() {
                if line.is_empty() {
                    continue;
                }
                if is_command(line) {
                    if self.handle_command(line, &mut out)? {
                        break;
                    }
                    continue;
                }
            } else {
                buffer.push(' ');
            }
            buffer.push_str(line);

            // a statement is complete once it ends with a semicolon
            if !buffer.ends_with(';') {
                continue;
            }
            let query = std::mem::take(&mut buffer);
            self.run_query(&query, &mut out)?;
        }

        Ok(())
    }

    /// Optimize one query and print the explanation.
    pub fn run_query<W: Write>(&self, sql: &str, out: &mut W) -> io::Result<()> {
        let config = self.optimizer.clone().capture_stages(self.config.show_stages);
        let planner = QueryPlanner::with_config(&self.catalog, config);
        match planner.plan(sql) {
            Ok(optimized) => write!(out, "{}", render_explanation(&optimized)),
            Err(e) => {
                warn!(error = %e, "query failed");
                writeln!(out, "Error: {}", e)
            }
        }
    }

    fn print_banner<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "miniopt {}", env!("CARGO_PKG_VERSION"))?;
        writeln!(
            out,
            "{} tables loaded. Type .help for commands, or end a query with ';'.",
            self.catalog.len()
        )?;
        writeln!(out)
    }

    /// Returns true when the REPL should exit.
    fn handle_command<W: Write>(&mut self, cmd: &str, out: &mut W) -> io::Result<bool> {
        let cmd = cmd.trim_start_matches('.').trim_end_matches(';');
        let parts: Vec<&str> = cmd.split_whitespace().collect();
        let command = parts.first().map(|s| s.to_lowercase());

        match command.as_deref() {
            Some("help") | Some("h") | Some("?") => self.print_help(out)?,
            Some("quit") | Some("exit") | Some("q") => return Ok(true),
            Some("tables") => self.list_tables(out)?,
            Some("schema") => match parts.get(1) {
                Some(table) => self.describe_table(table, out)?,
                None => writeln!(out, "Usage: .schema <table>")?,
            },
            Some("stats") => match parts.get(1) {
                Some(table) => self.print_stats(table, out)?,
                None => writeln!(out, "Usage: .stats <table>")?,
            },
            Some("load") => match parts.get(1) {
                Some(path) => self.load_table(path, &parts[2..], out)?,
                None => writeln!(out, "Usage: .load <file> [clustered] [index columns...]")?,
            },
            Some("stages") => match parts.get(1).copied() {
                Some("on") => self.config.show_stages = true,
                Some("off") => self.config.show_stages = false,
                _ => writeln!(
                    out,
                    "Stages: {}",
                    if self.config.show_stages { "on" } else { "off" }
                )?,
            },
            Some(other) => {
                writeln!(out, "Unknown command: .{}", other)?;
                writeln!(out, "Type .help for available commands")?;
            }
            None => {}
        }

        Ok(false)
    }

    fn print_help<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "Commands:")?;
        writeln!(out, "  .help, .h, .?        Show this help message")?;
        writeln!(out, "  .quit, .exit, .q     Exit the REPL")?;
        writeln!(out, "  .tables              List all tables")?;
        writeln!(out, "  .schema <table>      Show columns and indexes")?;
        writeln!(out, "  .stats <table>       Show table statistics")?;
        writeln!(out, "  .stages on|off       Print the plan after every pass")?;
        writeln!(out, "  .load <file> [clustered] [columns...]")?;
        writeln!(out, "                       Load a table from a data file")?;
        writeln!(out)?;
        writeln!(out, "Queries:")?;
        writeln!(out, "  SELECT t.c, ... FROM t, ... [WHERE t.c op value AND ...];")?;
        writeln!(out)
    }

    /// Load a table from a data file, replacing a table of the same name.
    fn load_table<W: Write>(&mut self, path: &str, args: &[&str], out: &mut W) -> io::Result<()> {
        let clustered = args.first() == Some(&"clustered");
        let columns = if clustered { &args[1..] } else { args };
        let mut options = LoadOptions::new().clustered(clustered);
        if !columns.is_empty() {
            options = options.indexed(columns.iter().copied());
        }

        let loaded = table_from_data_file(path, &options).and_then(|table| {
            let summary = (table.name.clone(), table.statistics.row_count);
            self.catalog.replace_table(table).map(|_| summary)
        });
        match loaded {
            Ok((name, rows)) => writeln!(out, "Loaded {} ({} rows)", name, rows),
            Err(e) => {
                warn!(error = %e, path, "load failed");
                writeln!(out, "Error: {}", e)
            }
        }
    }

    fn list_tables<W: Write>(&self, out: &mut W) -> io::Result<()> {
        if self.catalog.is_empty() {
            return writeln!(out, "No tables found.");
        }
        writeln!(out, "Tables:")?;
        for name in self.catalog.table_names() {
            writeln!(out, "  {}", name)?;
        }
        Ok(())
    }

    fn describe_table<W: Write>(&self, name: &str, out: &mut W) -> io::Result<()> {
        let Some(table) = self.catalog.table(name) else {
            return writeln!(out, "Table not found: {}", name);
        };
        writeln!(out, "Table: {}", table.name)?;
        writeln!(out, "{:<20} {:<10} {:<5}", "Column", "Type", "Key")?;
        writeln!(out, "{:-<20} {:-<10} {:-<5}", "", "", "")?;
        for col in &table.columns {
            let key = if col.primary_key { "PK" } else { "" };
            writeln!(out, "{:<20} {:<10} {:<5}", col.name, col.data_type, key)?;
        }
        for index in &table.indexes {
            writeln!(out, "Index: {}", index)?;
        }
        Ok(())
    }

    fn print_stats<W: Write>(&self, name: &str, out: &mut W) -> io::Result<()> {
        let Some(stats) = self.catalog.table_stats(name) else {
            return writeln!(out, "Table not found: {}", name);
        };
        writeln!(out, "Table: {}", name)?;
        writeln!(out, "  rows:       {}", stats.row_count)?;
        writeln!(out, "  tuple size: {}", stats.tuple_size)?;
        writeln!(out, "  block size: {}", stats.block_size)?;
        writeln!(out, "  clustered:  {}", stats.clustered)?;
        writeln!(out, "  blocks:     {}", stats.blocks())?;
        for (column, col_stats) in &stats.columns {
            writeln!(
                out,
                "  {:<12} distinct {:>8}, {} buckets",
                column,
                col_stats.distinct_values,
                col_stats.histogram.buckets.len()
            )?;
        }
        Ok(())
    }
}

fn is_command(input: &str) -> bool {
    input.starts_with('.')
}
