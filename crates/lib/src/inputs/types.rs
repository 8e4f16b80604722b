//! Types produced by the input graph builder.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A named input located in the surrounding environment.
///
/// `prefix` is an installation root laid out as `bin/`, `lib/`, `include/`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResolvedInput {
  pub name: String,
  pub prefix: PathBuf,
}

impl ResolvedInput {
  pub fn bin_dir(&self) -> PathBuf {
    self.prefix.join("bin")
  }

  pub fn lib_dir(&self) -> PathBuf {
    self.prefix.join("lib")
  }

  pub fn include_dir(&self) -> PathBuf {
    self.prefix.join("include")
  }

  pub fn pkg_config_dir(&self) -> PathBuf {
    self.lib_dir().join("pkgconfig")
  }

  /// The subdirectories of `prefix` that exist, for search-path variables.
  pub(crate) fn existing(dirs: impl IntoIterator<Item = PathBuf>) -> Vec<PathBuf> {
    dirs.into_iter().filter(|d| Path::is_dir(d)).collect()
  }
}

/// The resolved, deduplicated input sets plus their fingerprint.
///
/// Inputs are sorted by name so two descriptors built from the same sets are
/// equal regardless of declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentDescriptor {
  pub native: Vec<ResolvedInput>,
  pub libraries: Vec<ResolvedInput>,
  /// Variable overrides carried through from the manifest.
  pub vars: BTreeMap<String, String>,
  pub entry_hook: Option<String>,
  pub fingerprint: String,
}

impl EnvironmentDescriptor {
  /// All inputs, native first.
  pub fn all_inputs(&self) -> impl Iterator<Item = &ResolvedInput> {
    self.native.iter().chain(self.libraries.iter())
  }

  /// `bin/` directories of every input, in order, without duplicates.
  pub fn bin_dirs(&self) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    for dir in self.all_inputs().map(ResolvedInput::bin_dir) {
      if !dirs.contains(&dir) {
        dirs.push(dir);
      }
    }
    dirs
  }

  /// Search-path hints derived from library inputs.
  ///
  /// Only directories that exist are included.
  pub fn library_hints(&self) -> BTreeMap<&'static str, Vec<PathBuf>> {
    let mut hints = BTreeMap::new();
    hints.insert(
      "PKG_CONFIG_PATH",
      ResolvedInput::existing(self.libraries.iter().map(ResolvedInput::pkg_config_dir)),
    );
    hints.insert(
      "LIBRARY_PATH",
      ResolvedInput::existing(self.libraries.iter().map(ResolvedInput::lib_dir)),
    );
    hints.insert(
      "CPATH",
      ResolvedInput::existing(self.libraries.iter().map(ResolvedInput::include_dir)),
    );
    hints.retain(|_, dirs| !dirs.is_empty());
    hints
  }
}
