//! epc - Epic task reconciliation and scheduling library
//!
//! This library provides the core functionality for the epc CLI tool:
//! decomposing a feature specification ("Epic") into tracked task records,
//! reconciling those records against the source over time, and selecting the
//! next task to execute based on the dependency graph.
//!
//! # Core Concepts
//!
//! - **Task specs**: ephemeral task descriptions derived from an Epic
//! - **Task records**: persisted markdown+frontmatter files, never deleted
//! - **Reconciliation**: KEEP/UPDATE/CREATE/DEPRECATE decisions per spec
//! - **Feature lock**: one reconciliation run per feature scope at a time
//! - **Scheduler**: dependency-aware, crash-resumable task selection
//!
//! # Module Organization
//!
//! - `cli`: Command-line interface using clap
//! - `config`: Configuration loading from `.epc.toml`
//! - `error`: Error types and result aliases
//! - `epic`: Structural Epic document parsing into task specs
//! - `record`: Task record/spec data model and file format
//! - `store`: Task record repository with atomic writes
//! - `lock`: Feature-scope lock files with staleness reclaim
//! - `similarity`: Weighted similarity scoring between specs and records
//! - `reconcile`: The reconciliation engine and batch run report
//! - `conflict`: Near-duplicate detection across unrelated records
//! - `graph`: Dependency graph, cycle detection, readiness analysis
//! - `state`: Persisted execution state for crash/interrupt recovery
//! - `scheduler`: Priority-based selection of the next ready task
//! - `tracker`: Issue-tracker collaborator boundary with rate limiting

pub mod cli;
pub mod config;
pub mod conflict;
pub mod epic;
pub mod error;
pub mod graph;
pub mod lock;
pub mod output;
pub mod reconcile;
pub mod record;
pub mod scheduler;
pub mod similarity;
pub mod state;
pub mod store;
pub mod tracker;

pub use error::{Error, Result};
