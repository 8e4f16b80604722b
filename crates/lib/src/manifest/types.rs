//! Manifest types.
//!
//! A manifest is the declarative description of one package build and/or dev
//! environment. It is a pure value: loaded once, validated, then read by every
//! component without mutation.
//!
//! # Example
//!
//! ```json
//! {
//!   "package": { "name": "ox", "version": "v0.1.1-alpha" },
//!   "source": {
//!     "origin": "github:curlpipe/ox",
//!     "revision": "${version}",
//!     "hash": "5f0b…",
//!     "hashAlgo": "sha256"
//!   },
//!   "inputs": { "native": ["pkg-config"], "libraries": ["openssl"] },
//!   "env": { "OPENSSL_NO_VENDOR": "1" },
//!   "lockHash": "9c1e…",
//!   "devShell": { "entryHook": "ox", "inputs": ["cargo", "rustc"] }
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::util::hash::HashAlgo;

/// The root entity: one package and how to obtain, build and develop it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Manifest {
  pub package: Package,
  pub source: SourceLocator,
  #[serde(default)]
  pub inputs: InputSets,
  /// Environment variable overrides applied to builds and dev shells.
  #[serde(default)]
  pub env: BTreeMap<String, String>,
  /// Expected hash of the fully resolved dependency graph.
  ///
  /// May be omitted until `kiln lock` has computed it; builds require it.
  #[serde(default)]
  pub lock_hash: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub dev_shell: Option<DevShell>,
  #[serde(default)]
  pub build: BuildSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Package {
  pub name: String,
  pub version: String,
}

/// Where to obtain the source and the hash it must have.
///
/// `origin` and `revision` may reference `${name}` and `${version}`; see
/// [`Manifest::locator`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SourceLocator {
  pub origin: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub revision: Option<String>,
  /// Expected content hash of the fetched tree, lowercase hex.
  pub hash: String,
  #[serde(default)]
  pub hash_algo: HashAlgo,
}

/// Named build inputs, resolved from the surrounding environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputSets {
  /// Compile/link-time tools.
  #[serde(default)]
  pub native: Vec<String>,
  /// Link/runtime libraries.
  #[serde(default)]
  pub libraries: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DevShell {
  /// Command run on entry; it replaces the shell process.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub entry_hook: Option<String>,
  #[serde(default)]
  pub inputs: Vec<String>,
}

/// How the build engine turns the source into an output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct BuildSpec {
  pub builder: Builder,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub script: Option<String>,
  /// Run the package's test phase before installing.
  pub check: bool,
}

impl Default for BuildSpec {
  fn default() -> Self {
    Self {
      builder: Builder::Cargo,
      script: None,
      check: true,
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Builder {
  #[default]
  Cargo,
  Make,
  Script,
}
