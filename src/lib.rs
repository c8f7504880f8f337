//! Persistence and execution-claim coordination core for orc.
//!
//! One SQLite database per project holds tasks, initiatives, branches,
//! review history, and the append-only event log; a single global store
//! holds workflow and agent definitions shared across projects. The claim
//! manager guarantees at most one live executor per task, and the project
//! store cache bounds how many project databases are open at once.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod global;
pub mod proc;
pub mod refname;
pub mod registry;
pub mod types;

pub use error::{Result, StoreError};
