//! Fetchers populate a staging directory with the contents of an origin.
//!
//! A fetcher never verifies content; the resolver hashes whatever lands in the
//! staging directory and decides whether it may enter the store.

use std::fs;
use std::future::Future;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::{Archive, EntryType};
use thiserror::Error;
use tracing::{debug, info};

use crate::source::origin::Origin;
use crate::util::fs::copy_tree;

#[derive(Debug, Error)]
pub enum FetchError {
  #[error("request to {url} failed: {message}")]
  Transport { url: String, message: String },

  #[error("{url} returned HTTP {status}")]
  Status { url: String, status: u16 },

  #[error("failed to unpack archive from {url}: {source}")]
  Unpack {
    url: String,
    #[source]
    source: io::Error,
  },

  #[error("local source '{path}' is not readable: {source}")]
  Local {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("origin '{0}' is not supported by this fetcher")]
  Unsupported(String),

  #[error("fetch task failed: {0}")]
  Join(String),
}

impl FetchError {
  /// Whether retrying the same request could succeed.
  pub fn is_retryable(&self) -> bool {
    matches!(self, FetchError::Transport { .. })
  }
}

/// Network (or filesystem) collaborator that materializes an origin.
pub trait Fetcher: Send + Sync {
  /// Populate `dest` (an existing, empty directory) with the origin's tree.
  fn fetch(&self, origin: &Origin, dest: &Path) -> impl Future<Output = Result<(), FetchError>> + Send;
}

/// Downloads `github:` and `http(s)://` origins.
///
/// Tarballs are unpacked with their top-level directory stripped. Any other
/// payload is stored as a single file named after the last URL segment.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new() -> Result<Self, FetchError> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("kiln/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| FetchError::Transport {
        url: String::new(),
        message: e.to_string(),
      })?;
    Ok(Self { client })
  }

  async fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
    info!(url = %url, "fetching");
    let transport = |e: reqwest::Error| FetchError::Transport {
      url: url.to_string(),
      message: e.to_string(),
    };

    let response = self.client.get(url).send().await.map_err(transport)?;
    if !response.status().is_success() {
      return Err(FetchError::Status {
        url: url.to_string(),
        status: response.status().as_u16(),
      });
    }
    let bytes = response.bytes().await.map_err(transport)?;
    debug!(url = %url, size = bytes.len(), "download complete");
    Ok(bytes.to_vec())
  }
}

impl Fetcher for HttpFetcher {
  async fn fetch(&self, origin: &Origin, dest: &Path) -> Result<(), FetchError> {
    let url = origin
      .download_url()
      .ok_or_else(|| FetchError::Unsupported(origin.to_string()))?;
    let bytes = self.download(&url).await?;

    let dest = dest.to_path_buf();
    let task_url = url.clone();
    tokio::task::spawn_blocking(move || store_payload(&task_url, &bytes, &dest))
      .await
      .map_err(|e| FetchError::Join(e.to_string()))?
      .map_err(|source| FetchError::Unpack { url, source })
  }
}

/// Copies `path:` origins, skipping `.git`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathFetcher;

impl Fetcher for PathFetcher {
  async fn fetch(&self, origin: &Origin, dest: &Path) -> Result<(), FetchError> {
    let Origin::Path(path) = origin else {
      return Err(FetchError::Unsupported(origin.to_string()));
    };
    let src = dunce::canonicalize(path).map_err(|source| FetchError::Local {
      path: path.clone(),
      source,
    })?;
    if !src.is_dir() {
      return Err(FetchError::Local {
        path: path.clone(),
        source: io::Error::new(io::ErrorKind::NotADirectory, "not a directory"),
      });
    }

    info!(path = %src.display(), "copying local source");
    let dest = dest.to_path_buf();
    let task_src = src.clone();
    tokio::task::spawn_blocking(move || copy_tree(&task_src, &dest, &[".git"]))
      .await
      .map_err(|e| FetchError::Join(e.to_string()))?
      .map_err(|source| FetchError::Local { path: src, source })
  }
}

/// Dispatches on the origin kind.
#[derive(Debug, Clone)]
pub struct DefaultFetcher {
  http: HttpFetcher,
  path: PathFetcher,
}

impl DefaultFetcher {
  pub fn new() -> Result<Self, FetchError> {
    Ok(Self {
      http: HttpFetcher::new()?,
      path: PathFetcher,
    })
  }
}

impl Fetcher for DefaultFetcher {
  async fn fetch(&self, origin: &Origin, dest: &Path) -> Result<(), FetchError> {
    match origin {
      Origin::Path(_) => self.path.fetch(origin, dest).await,
      Origin::GitHub { .. } | Origin::Url(_) => self.http.fetch(origin, dest).await,
    }
  }
}

fn store_payload(url: &str, bytes: &[u8], dest: &Path) -> io::Result<()> {
  let name = url_file_name(url);
  if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
    unpack_tar(GzDecoder::new(bytes), dest)
  } else if name.ends_with(".tar") {
    unpack_tar(bytes, dest)
  } else {
    let name = if name.is_empty() { "download" } else { name.as_str() };
    fs::write(dest.join(name), bytes)
  }
}

/// Unpack a tar stream into `dest`, stripping the first path component.
///
/// Nothing is written outside `dest`. Entries may not pass through a symlink
/// unpacked earlier, symlink targets must resolve inside `dest`, and hard
/// links must point at another entry of the archive.
pub fn unpack_tar<R: Read>(reader: R, dest: &Path) -> io::Result<()> {
  let mut archive = Archive::new(reader);
  archive.set_preserve_mtime(false);

  for entry in archive.entries()? {
    let mut entry = entry?;
    let path = entry.path()?.into_owned();
    // Strip the first component (e.g. ox-0.1.1/)
    let Some(stripped) = strip_top_level(&path)? else {
      continue;
    };
    reject_symlink_ancestors(dest, &stripped, &path)?;
    let dest_path = dest.join(&stripped);
    if let Some(parent) = dest_path.parent() {
      fs::create_dir_all(parent)?;
    }

    match entry.header().entry_type() {
      EntryType::Symlink => {
        let target = entry.link_name()?.map(|t| t.into_owned());
        if !target.is_some_and(|t| symlink_stays_inside(&stripped, &t)) {
          return Err(escapes(&path));
        }
      }
      EntryType::Link => {
        let target = entry.link_name()?.map(|t| t.into_owned());
        let Some(target) = target.as_deref().map(strip_top_level).transpose()?.flatten() else {
          return Err(escapes(&path));
        };
        reject_symlink_ancestors(dest, &target, &path)?;
        fs::hard_link(dest.join(&target), &dest_path)?;
        continue;
      }
      _ => {}
    }

    entry.unpack(&dest_path)?;
  }

  Ok(())
}

/// `path` without its first component, or `None` for the top-level directory itself.
fn strip_top_level(path: &Path) -> io::Result<Option<PathBuf>> {
  let stripped: PathBuf = path.components().skip(1).collect();
  if stripped.as_os_str().is_empty() {
    return Ok(None);
  }
  if stripped.components().any(|c| !matches!(c, Component::Normal(_))) {
    return Err(escapes(path));
  }
  Ok(Some(stripped))
}

/// Fail if `rel`, or any directory on the way to it, is already a symlink under `dest`.
fn reject_symlink_ancestors(dest: &Path, rel: &Path, entry: &Path) -> io::Result<()> {
  let mut current = dest.to_path_buf();
  for component in rel.components() {
    current.push(component);
    if fs::symlink_metadata(&current).is_ok_and(|meta| meta.file_type().is_symlink()) {
      return Err(escapes(entry));
    }
  }
  Ok(())
}

/// Whether a symlink at `link` (relative to the tree root) pointing at `target` stays in the tree.
fn symlink_stays_inside(link: &Path, target: &Path) -> bool {
  let mut depth = link.components().count() as isize - 1;
  for component in target.components() {
    match component {
      Component::Normal(_) => depth += 1,
      Component::CurDir => {}
      Component::ParentDir => {
        depth -= 1;
        if depth < 0 {
          return false;
        }
      }
      Component::RootDir | Component::Prefix(_) => return false,
    }
  }
  true
}

fn escapes(path: &Path) -> io::Error {
  io::Error::new(
    io::ErrorKind::InvalidData,
    format!("archive entry escapes destination: {}", path.display()),
  )
}

/// Last URL path segment without query or fragment, sanitized.
fn url_file_name(url: &str) -> String {
  let path = url.split(['?', '#']).next().unwrap_or(url);
  path
    .rsplit('/')
    .next()
    .unwrap_or("")
    .chars()
    .map(|c| {
      if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
        c
      } else {
        '_'
      }
    })
    .collect()
}
