//! Surrounding-environment collaborators that locate inputs by name.

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::consts::INPUT_PATH_ENV;

/// Knows where an installed tool or library lives.
pub trait InputEnvironment: Send + Sync {
  /// Return the installation prefix of `name`, if available.
  fn locate(&self, name: &str) -> Option<PathBuf>;
}

/// Inputs installed as `<root>/<name>/` under a list of roots.
///
/// The first root containing `<name>/` wins.
#[derive(Debug, Clone, Default)]
pub struct PrefixEnvironment {
  roots: Vec<PathBuf>,
}

impl PrefixEnvironment {
  pub fn new(roots: Vec<PathBuf>) -> Self {
    Self { roots }
  }

  /// Roots from `KILN_INPUT_PATH`.
  pub fn from_env() -> Self {
    let roots = env::var_os(INPUT_PATH_ENV)
      .map(|v| env::split_paths(&v).filter(|p| !p.as_os_str().is_empty()).collect())
      .unwrap_or_default();
    Self { roots }
  }

  pub fn roots(&self) -> &[PathBuf] {
    &self.roots
  }
}

impl InputEnvironment for PrefixEnvironment {
  fn locate(&self, name: &str) -> Option<PathBuf> {
    self.roots.iter().map(|root| root.join(name)).find(|p| p.is_dir())
  }
}

/// Fixed name-to-prefix table.
#[derive(Debug, Clone, Default)]
pub struct MapEnvironment {
  entries: BTreeMap<String, PathBuf>,
}

impl MapEnvironment {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, name: impl Into<String>, prefix: impl Into<PathBuf>) -> Self {
    self.insert(name, prefix);
    self
  }

  pub fn insert(&mut self, name: impl Into<String>, prefix: impl Into<PathBuf>) {
    self.entries.insert(name.into(), prefix.into());
  }
}

impl InputEnvironment for MapEnvironment {
  fn locate(&self, name: &str) -> Option<PathBuf> {
    self.entries.get(name).cloned()
  }
}

/// The host: `KILN_INPUT_PATH` prefixes first, then executables on `PATH`.
///
/// An executable found at `<prefix>/bin/<name>` resolves to `<prefix>`.
#[derive(Debug, Clone, Default)]
pub struct HostEnvironment {
  prefixes: PrefixEnvironment,
}

impl HostEnvironment {
  pub fn new() -> Self {
    Self {
      prefixes: PrefixEnvironment::from_env(),
    }
  }
}

impl InputEnvironment for HostEnvironment {
  fn locate(&self, name: &str) -> Option<PathBuf> {
    if let Some(prefix) = self.prefixes.locate(name) {
      return Some(prefix);
    }
    let exe = which::which(name).ok()?;
    trace!(name, path = ?exe, "found input on PATH");
    let exe = dunce::canonicalize(&exe).unwrap_or(exe);
    exe.parent().and_then(Path::parent).map(Path::to_path_buf)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;
  use std::fs;

  #[test]
  fn prefix_environment_first_root_wins() {
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();
    fs::create_dir_all(a.path().join("openssl")).unwrap();
    fs::create_dir_all(b.path().join("openssl")).unwrap();
    fs::create_dir_all(b.path().join("zlib")).unwrap();

    let env = PrefixEnvironment::new(vec![a.path().to_path_buf(), b.path().to_path_buf()]);

    assert_eq!(env.locate("openssl"), Some(a.path().join("openssl")));
    assert_eq!(env.locate("zlib"), Some(b.path().join("zlib")));
    assert_eq!(env.locate("missing"), None);
  }

  #[test]
  fn prefix_environment_ignores_files() {
    let a = tempfile::tempdir().unwrap();
    fs::write(a.path().join("openssl"), "").unwrap();
    let env = PrefixEnvironment::new(vec![a.path().to_path_buf()]);
    assert_eq!(env.locate("openssl"), None);
  }

  #[test]
  #[serial]
  fn prefix_environment_from_env() {
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();
    let joined = env::join_paths([a.path(), b.path()]).unwrap();
    temp_env::with_var(INPUT_PATH_ENV, Some(joined), || {
      let env = PrefixEnvironment::from_env();
      assert_eq!(env.roots(), &[a.path().to_path_buf(), b.path().to_path_buf()]);
    });
  }

  #[test]
  #[serial]
  fn prefix_environment_unset_is_empty() {
    temp_env::with_var_unset(INPUT_PATH_ENV, || {
      assert!(PrefixEnvironment::from_env().roots().is_empty());
    });
  }

  #[test]
  fn map_environment_lookup() {
    let env = MapEnvironment::new().with("cargo", "/opt/rust");
    assert_eq!(env.locate("cargo"), Some(PathBuf::from("/opt/rust")));
    assert_eq!(env.locate("rustc"), None);
  }

  #[cfg(unix)]
  #[test]
  #[serial]
  fn host_environment_finds_executables_on_path() {
    use std::os::unix::fs::PermissionsExt;

    let prefix = tempfile::tempdir().unwrap();
    let bin = prefix.path().join("bin");
    fs::create_dir_all(&bin).unwrap();
    let tool = bin.join("kiln-test-tool");
    fs::write(&tool, "#!/bin/sh\n").unwrap();
    fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();

    temp_env::with_vars(
      [(INPUT_PATH_ENV, None), ("PATH", Some(bin.as_os_str()))],
      || {
        let env = HostEnvironment::new();
        let expected = dunce::canonicalize(prefix.path()).unwrap();
        assert_eq!(env.locate("kiln-test-tool"), Some(expected));
        assert_eq!(env.locate("kiln-definitely-missing"), None);
      },
    );
  }
}
