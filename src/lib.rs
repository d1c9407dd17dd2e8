//! Matching and allocation core for a hierarchical HPC resource
//! scheduler: given a resource graph and a jobspec, finds (and,
//! optionally, commits) a satisfying assignment.
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── error       – shared error type and per-traverser error log
//! ├── idset       – compressed integer-set grammar (ranks, range compression)
//! ├── planner     – per-resource temporal availability oracle
//! │   └── multi   – bundle of planners sharing one span-id space
//! ├── graph       – vertex/edge storage, generational DFS coloring
//! ├── scoring     – best-k edge-group accumulation during matching
//! ├── filter      – pruning-filter registry (which types get tracked where)
//! ├── policy      – match policy trait + built-in policies
//! ├── constraint  – jobspec constraint evaluator
//! ├── jobspec     – jobspec (de)serialization
//! ├── traverser   – depth-first-and-up matcher/allocator
//! ├── emit        – output format emitters (RLITE, JGF, RV1, ...)
//! └── loader      – file-based jobspec/JGF entry points for callers
//! ```

pub mod constraint;
pub mod emit;
pub mod error;
pub mod filter;
pub mod graph;
pub mod idset;
pub mod jobspec;
pub mod loader;
pub mod planner;
pub mod policy;
pub mod scoring;
pub mod traverser;

pub use error::CoreError;
