//! miniopt command line.
//!
//! Without a query the interactive REPL starts; `-e` optimizes one query
//! and exits.

use std::path::PathBuf;
use std::process::ExitCode;

use miniopt::catalog::{
    sample_catalog, sample_catalog_from_dir, write_sample_data, Catalog, StatsConfig, SAMPLE_SEED,
};
use miniopt::planner::{OptimizerConfig, QueryPlanner};
use miniopt::repl::{Repl, ReplConfig};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    // Parse simple command line args.
    let mut catalog_path: Option<PathBuf> = None;
    let mut data_dir: Option<PathBuf> = None;
    let mut generate_dir: Option<PathBuf> = None;
    let mut execute: Option<String> = None;
    let mut show_stages = false;
    let mut verbose = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-c" | "--catalog" => {
                i += 1;
                match args.get(i) {
                    Some(path) => catalog_path = Some(PathBuf::from(path)),
                    None => {
                        eprintln!("Missing value for {}", args[i - 1]);
                        return ExitCode::FAILURE;
                    }
                }
            }
            "-d" | "--data" | "-g" | "--generate" => {
                let flag = args[i].clone();
                i += 1;
                let Some(dir) = args.get(i).map(PathBuf::from) else {
                    eprintln!("Missing value for {}", flag);
                    return ExitCode::FAILURE;
                };
                if flag == "-d" || flag == "--data" {
                    data_dir = Some(dir);
                } else {
                    generate_dir = Some(dir);
                }
            }
            "-e" | "--execute" => {
                i += 1;
                match args.get(i) {
                    Some(sql) => execute = Some(sql.clone()),
                    None => {
                        eprintln!("Missing value for {}", args[i - 1]);
                        return ExitCode::FAILURE;
                    }
                }
            }
            "-s" | "--stages" => show_stages = true,
            "-v" | "--verbose" => verbose = true,
            "-h" | "--help" => {
                print_help();
                return ExitCode::SUCCESS;
            }
            "--version" => {
                println!("miniopt v{}", env!("CARGO_PKG_VERSION"));
                return ExitCode::SUCCESS;
            }
            arg => {
                eprintln!("Unknown option: {}", arg);
                return ExitCode::FAILURE;
            }
        }
        i += 1;
    }

    init_tracing(verbose);

    if let Some(dir) = generate_dir {
        return match write_sample_data(&dir, SAMPLE_SEED) {
            Ok(paths) => {
                for path in paths {
                    println!("wrote {}", path.display());
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error generating data: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    let catalog = match load_catalog(catalog_path, data_dir) {
        Ok(catalog) => catalog,
        Err(e) => {
            eprintln!("Error loading catalog: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(sql) = execute {
        let config = OptimizerConfig::new().capture_stages(show_stages);
        let planner = QueryPlanner::with_config(&catalog, config);
        return match planner.explain(&sql) {
            Ok(text) => {
                print!("{}", text);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    let mut repl = Repl::with_config(catalog, ReplConfig::default().show_stages(show_stages));
    match repl.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "miniopt=debug" } else { "miniopt=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_catalog(
    path: Option<PathBuf>,
    data_dir: Option<PathBuf>,
) -> Result<Catalog, Box<dyn std::error::Error>> {
    match (path, data_dir) {
        (Some(_), Some(_)) => Err("--catalog and --data cannot be combined".into()),
        (Some(path), None) => Ok(Catalog::from_json_file(path)?),
        (None, Some(dir)) => Ok(sample_catalog_from_dir(dir, &StatsConfig::default())?),
        (None, None) => Ok(sample_catalog()?),
    }
}

fn print_help() {
    println!("miniopt - a statistics-driven query optimizer");
    println!();
    println!("Usage: miniopt [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -c, --catalog PATH     Load the catalog from a JSON file (default: sample catalog)");
    println!("  -d, --data DIR         Build the catalog from demo data files in DIR");
    println!("  -g, --generate DIR     Write demo data files into DIR and exit");
    println!("  -e, --execute QUERY    Optimize one query, print its plans and exit");
    println!("  -s, --stages           Print the plan after every optimization pass");
    println!("  -v, --verbose          Log optimizer decisions");
    println!("  -h, --help             Show this help message");
    println!("  --version              Show version");
    println!();
    println!("Examples:");
    println!("  miniopt -e 'SELECT radnik.mbr FROM radnik WHERE radnik.god = 2000'");
    println!("  miniopt -g data && miniopt -d data");
    println!("  RUST_LOG=miniopt=trace miniopt -c catalog.json");
}
