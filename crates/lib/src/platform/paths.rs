//! Well-known directories and store root resolution.

use std::path::PathBuf;

use crate::consts::{APP_NAME, STORE_ENV};

/// Returns the user's home directory.
///
/// Falls back to the current directory when no home is configured, which only
/// happens in stripped-down build sandboxes.
pub fn home_dir() -> PathBuf {
  #[cfg(windows)]
  let var = "USERPROFILE";
  #[cfg(not(windows))]
  let var = "HOME";

  std::env::var_os(var).map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."))
}

/// Returns the directory for data files for the application
#[cfg(windows)]
pub fn data_dir() -> PathBuf {
  std::env::var_os("APPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(home_dir)
    .join(APP_NAME)
}

/// Returns the directory for data files for the application
#[cfg(not(windows))]
pub fn data_dir() -> PathBuf {
  let data_home = std::env::var("XDG_DATA_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".local").join("share"));
  data_home.join(APP_NAME)
}

/// Returns the root of the content-addressed store.
///
/// `KILN_STORE` takes precedence over `<data_dir>/store`.
pub fn store_dir() -> PathBuf {
  if let Some(path) = std::env::var_os(STORE_ENV) {
    return PathBuf::from(path);
  }
  data_dir().join("store")
}
