//! Input graph builder.
//!
//! Resolves the named native tools and libraries a manifest declares against
//! an [`InputEnvironment`] and produces an [`EnvironmentDescriptor`]. Inputs
//! have set semantics, and the fingerprint depends only on the sorted names so
//! declaration order never changes a cache key.
//!
//! # Modules
//!
//! - [`environment`] - collaborators that locate inputs by name
//! - [`types`] - resolved inputs and the environment descriptor

pub mod environment;
mod types;

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::util::hash::hash_bytes;

pub use environment::{HostEnvironment, InputEnvironment, MapEnvironment, PrefixEnvironment};
pub use types::*;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
  #[error("unresolved input '{0}'")]
  UnresolvedInput(String),
}

/// Canonical record hashed into the fingerprint.
#[derive(Serialize)]
struct FingerprintRecord<'a> {
  native: &'a BTreeSet<&'a str>,
  libraries: &'a BTreeSet<&'a str>,
}

/// Order-independent fingerprint of two input sets.
pub fn fingerprint<'a>(
  native: impl IntoIterator<Item = &'a str>,
  libraries: impl IntoIterator<Item = &'a str>,
) -> String {
  let native: BTreeSet<&str> = native.into_iter().collect();
  let libraries: BTreeSet<&str> = libraries.into_iter().collect();
  fingerprint_sets(&native, &libraries)
}

fn fingerprint_sets(native: &BTreeSet<&str>, libraries: &BTreeSet<&str>) -> String {
  let record = FingerprintRecord { native, libraries };
  // BTreeSet serializes in sorted order; serializing plain strings cannot fail
  let json = serde_json::to_vec(&record).unwrap_or_default();
  hash_bytes(&json).0
}

/// Build an environment descriptor from the declared input sets.
///
/// Duplicate names collapse to one entry. The first unresolved name in sorted
/// order (native before libraries) is reported.
pub fn build_environment<'a, E: InputEnvironment + ?Sized>(
  native: impl IntoIterator<Item = &'a String>,
  libraries: impl IntoIterator<Item = &'a String>,
  vars: &BTreeMap<String, String>,
  entry_hook: Option<&str>,
  env: &E,
) -> Result<EnvironmentDescriptor, GraphError> {
  let native: BTreeSet<&str> = native.into_iter().map(String::as_str).collect();
  let libraries: BTreeSet<&str> = libraries.into_iter().map(String::as_str).collect();

  let resolve = |names: &BTreeSet<&str>| -> Result<Vec<ResolvedInput>, GraphError> {
    names
      .iter()
      .map(|name| {
        let prefix = env
          .locate(name)
          .ok_or_else(|| GraphError::UnresolvedInput(name.to_string()))?;
        debug!(input = %name, prefix = ?prefix, "resolved input");
        Ok(ResolvedInput {
          name: name.to_string(),
          prefix,
        })
      })
      .collect()
  };

  let resolved_native = resolve(&native)?;
  let resolved_libraries = resolve(&libraries)?;

  Ok(EnvironmentDescriptor {
    native: resolved_native,
    libraries: resolved_libraries,
    vars: vars.clone(),
    entry_hook: entry_hook.map(str::to_string),
    fingerprint: fingerprint_sets(&native, &libraries),
  })
}
