use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::manifest::{BuildSpec, Builder, Package};
use crate::util::hash::{HashError, Hashable, ObjectHash};

/// The shell script a build engine runs, rendered from a [`BuildSpec`].
///
/// Scripts run with `$src` as the working directory and must install into `$out`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Recipe {
  pub builder: Builder,
  pub script: String,
}

impl Recipe {
  /// Render `spec`. `check` enables the package's test phase.
  pub fn from_spec(spec: &BuildSpec, check: bool) -> Self {
    let script = match spec.builder {
      Builder::Cargo => {
        let mut lines = vec!["set -e"];
        if check {
          lines.push("cargo test --locked");
        }
        lines.push(r#"cargo install --locked --path . --root "$out""#);
        lines.join("\n")
      }
      Builder::Make => {
        let mut lines = vec!["set -e", "make"];
        if check {
          lines.push("make check");
        }
        lines.push(r#"make install PREFIX="$out""#);
        lines.join("\n")
      }
      Builder::Script => spec.script.clone().unwrap_or_default(),
    };
    Self {
      builder: spec.builder,
      script,
    }
  }
}

/// Everything that identifies a build output.
///
/// Two builds with equal key inputs share one store entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildKeyInput<'a> {
  pub name: &'a str,
  pub version: &'a str,
  pub source_hash: &'a str,
  pub lock_hash: &'a str,
  pub fingerprint: &'a str,
  pub env: &'a BTreeMap<String, String>,
  pub recipe: &'a Recipe,
}

impl Hashable for BuildKeyInput<'_> {}

impl<'a> BuildKeyInput<'a> {
  pub fn new(
    package: &'a Package,
    source_hash: &'a str,
    lock_hash: &'a str,
    fingerprint: &'a str,
    env: &'a BTreeMap<String, String>,
    recipe: &'a Recipe,
  ) -> Self {
    Self {
      name: &package.name,
      version: &package.version,
      source_hash,
      lock_hash,
      fingerprint,
      env,
      recipe,
    }
  }

  pub fn key(&self) -> Result<ObjectHash, HashError> {
    self.compute_hash()
  }
}

/// A build output in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutput {
  pub key: ObjectHash,
  pub path: PathBuf,
  /// True when the output was already present and the engine was not invoked.
  pub cached: bool,
}
