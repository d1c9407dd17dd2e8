//! File-based entry points for loading a jobspec or a JGF resource
//! graph from disk. Kept outside the traversal hot path — which returns
//! the typed `CoreError` instead — since these are the crate-external
//! glue a CLI or scheduler front-end calls before anything in
//! `traverser` runs.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::emit::jgf::{self, JgfDoc};
use crate::jobspec::Jobspec;

/// Read and parse a jobspec YAML file.
pub fn load_jobspec_file(path: &Path) -> Result<Jobspec> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read jobspec file: {}", path.display()))?;
    debug!(path = %path.display(), "loading jobspec");
    let js = Jobspec::from_yaml_str(&content)
        .with_context(|| format!("failed to parse jobspec: {}", path.display()))?;
    Ok(js)
}

/// Read and parse a JGF resource-graph document (the format `prime_graph`
/// loads a cluster from).
pub fn load_jgf_file(path: &Path) -> Result<JgfDoc> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read JGF file: {}", path.display()))?;
    debug!(path = %path.display(), "loading JGF resource graph");
    jgf::parse(&content).with_context(|| format!("failed to parse JGF document: {}", path.display()))
}
