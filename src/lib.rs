//! miniopt - a statistics-driven relational query optimizer
//!
//! Queries of the form `SELECT t.c, ... FROM t, ... WHERE ...` are parsed,
//! checked against a catalog, rewritten by rules (join creation, selection
//! push-down, projection replication), join-ordered by dynamic programming
//! over catalog statistics and finally mapped to physical operators with
//! cost-based access path selection.
//!
//! # Example
//!
//! ```
//! use miniopt::catalog::sample_catalog;
//! use miniopt::planner::QueryPlanner;
//!
//! let catalog = sample_catalog().unwrap();
//! let planner = QueryPlanner::new(&catalog);
//! let plan = planner
//!     .plan("SELECT radnik.mbr FROM radnik, radproj WHERE radnik.mbr = radproj.mbr")
//!     .unwrap();
//! println!("{}", plan.physical);
//! ```

pub mod catalog;
pub mod planner;
pub mod repl;
pub mod sql;
