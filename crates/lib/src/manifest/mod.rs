//! Manifest loading and validation.
//!
//! Manifests are read from JSON (`kiln.json`) or Lua (`kiln.lua`) and validated
//! before any I/O happens. Every validation failure is an `InvalidManifest`.

mod load;
mod types;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::source::origin::{Origin, OriginError};

pub use load::{DEFAULT_MANIFEST_JSON, DEFAULT_MANIFEST_LUA, find_manifest};
pub use types::*;

#[derive(Debug, Error)]
pub enum ManifestError {
  #[error("failed to read manifest '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("unsupported manifest format '{0}', expected .json or .lua")]
  UnsupportedFormat(PathBuf),

  #[error("failed to parse manifest: {0}")]
  Parse(#[source] serde_json::Error),

  #[error("failed to evaluate lua manifest: {0}")]
  Lua(String),

  #[error("invalid {field}: {reason}")]
  Invalid { field: &'static str, reason: String },

  #[error("invalid source.origin: {0}")]
  Origin(#[from] OriginError),
}

impl ManifestError {
  fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
    ManifestError::Invalid {
      field,
      reason: reason.into(),
    }
  }
}

impl Manifest {
  /// Human-readable identity, `<name>-<version>`.
  pub fn identity(&self) -> String {
    format!("{}-{}", self.package.name, self.package.version)
  }

  /// The source locator with `${name}` / `${version}` expanded.
  pub fn locator(&self) -> SourceLocator {
    let expand = |s: &str| {
      s.replace("${name}", &self.package.name)
        .replace("${version}", &self.package.version)
    };
    SourceLocator {
      origin: expand(&self.source.origin),
      revision: self.source.revision.as_deref().map(expand),
      hash: self.source.hash.clone(),
      hash_algo: self.source.hash_algo,
    }
  }

  /// Check every constraint that can be checked without I/O.
  pub fn validate(&self) -> Result<(), ManifestError> {
    self.validate_unlocked()?;
    validate_hex("lockHash", &self.lock_hash, 64)
  }

  /// [`validate`](Self::validate) without the lockHash check.
  ///
  /// Used when computing the lock hash, before the manifest declares one.
  pub fn validate_unlocked(&self) -> Result<(), ManifestError> {
    if self.package.name.trim().is_empty() {
      return Err(ManifestError::invalid("package.name", "must not be empty"));
    }
    if self.package.version.trim().is_empty() {
      return Err(ManifestError::invalid("package.version", "must not be empty"));
    }

    self.locator().validate()?;

    for (field, names) in [
      ("inputs.native", &self.inputs.native),
      ("inputs.libraries", &self.inputs.libraries),
    ] {
      validate_input_names(field, names)?;
    }

    if let Some(shell) = &self.dev_shell {
      validate_input_names("devShell.inputs", &shell.inputs)?;
      if let Some(hook) = &shell.entry_hook
        && hook.trim().is_empty()
      {
        return Err(ManifestError::invalid("devShell.entryHook", "must not be blank when set"));
      }
    }

    for key in self.env.keys() {
      if key.is_empty() || key.contains('=') || key.contains('\0') {
        return Err(ManifestError::invalid("env", format!("invalid variable name '{}'", key)));
      }
    }

    if self.build.builder == Builder::Script && self.build.script.as_deref().is_none_or(|s| s.trim().is_empty()) {
      return Err(ManifestError::invalid("build.script", "required when builder is 'script'"));
    }

    Ok(())
  }
}

impl SourceLocator {
  /// Parse the origin reference.
  pub fn parse_origin(&self) -> Result<Origin, ManifestError> {
    if self.origin.contains("${") || self.revision.as_deref().is_some_and(|r| r.contains("${")) {
      return Err(ManifestError::invalid(
        "source",
        "unknown placeholder, only ${name} and ${version} are supported",
      ));
    }
    Ok(Origin::parse(&self.origin, self.revision.as_deref())?)
  }

  /// Check the expected hash and origin reference.
  pub fn validate(&self) -> Result<Origin, ManifestError> {
    if self.hash.trim().is_empty() {
      return Err(ManifestError::invalid("source.hash", "expected hash must not be empty"));
    }
    validate_hex("source.hash", &self.hash, self.hash_algo.hex_len())?;
    self.parse_origin()
  }
}

fn validate_hex(field: &'static str, value: &str, len: usize) -> Result<(), ManifestError> {
  if value.len() != len {
    return Err(ManifestError::invalid(
      field,
      format!("expected {} hex characters, got {}", len, value.len()),
    ));
  }
  if !value.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)) {
    return Err(ManifestError::invalid(field, "must be lowercase hex"));
  }
  Ok(())
}

fn validate_input_names(field: &'static str, names: &[String]) -> Result<(), ManifestError> {
  for name in names {
    if name.trim().is_empty() {
      return Err(ManifestError::invalid(field, "input names must not be empty"));
    }
    if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
      return Err(ManifestError::invalid(field, format!("'{}' is not a valid input name", name)));
    }
  }
  Ok(())
}
