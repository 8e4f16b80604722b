//! Origin references parsed from a manifest's `source` section.
//!
//! Supported forms:
//! - `github:<owner>/<repo>` with a separate revision, or `github:<owner>/<repo>/<rev>`
//! - `https://…` / `http://…` archive or file URLs
//! - `path:<dir>` local directory trees

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OriginError {
  #[error("origin is empty")]
  Empty,

  #[error("origin '{0}' requires a revision")]
  MissingRevision(String),

  #[error("origin '{origin}' declares revision '{in_origin}' but source.revision is '{declared}'")]
  ConflictingRevision {
    origin: String,
    in_origin: String,
    declared: String,
  },

  #[error("malformed github origin '{0}', expected github:<owner>/<repo>")]
  MalformedGitHub(String),

  #[error("unsupported origin scheme in '{0}'")]
  UnknownScheme(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
  GitHub { owner: String, repo: String, rev: String },
  Url(String),
  Path(PathBuf),
}

impl Origin {
  pub fn parse(origin: &str, revision: Option<&str>) -> Result<Self, OriginError> {
    let origin = origin.trim();
    if origin.is_empty() {
      return Err(OriginError::Empty);
    }
    let revision = revision.map(str::trim).filter(|r| !r.is_empty());

    if let Some(rest) = origin.strip_prefix("github:") {
      let parts: Vec<&str> = rest.split('/').collect();
      let (owner, repo, rev) = match parts.as_slice() {
        [owner, repo] => {
          let rev = revision.ok_or_else(|| OriginError::MissingRevision(origin.to_string()))?;
          (*owner, *repo, rev)
        }
        [owner, repo, rev] => {
          if let Some(declared) = revision
            && declared != *rev
          {
            return Err(OriginError::ConflictingRevision {
              origin: origin.to_string(),
              in_origin: rev.to_string(),
              declared: declared.to_string(),
            });
          }
          (*owner, *repo, *rev)
        }
        _ => return Err(OriginError::MalformedGitHub(origin.to_string())),
      };
      if owner.is_empty() || repo.is_empty() || rev.is_empty() {
        return Err(OriginError::MalformedGitHub(origin.to_string()));
      }
      return Ok(Origin::GitHub {
        owner: owner.to_string(),
        repo: repo.to_string(),
        rev: rev.to_string(),
      });
    }

    if origin.starts_with("https://") || origin.starts_with("http://") {
      return Ok(Origin::Url(origin.to_string()));
    }

    if let Some(path) = origin.strip_prefix("path:") {
      if path.is_empty() {
        return Err(OriginError::Empty);
      }
      return Ok(Origin::Path(PathBuf::from(path)));
    }

    Err(OriginError::UnknownScheme(origin.to_string()))
  }

  /// URL to download for remote origins.
  pub fn download_url(&self) -> Option<String> {
    match self {
      Origin::GitHub { owner, repo, rev } => Some(format!(
        "https://github.com/{}/{}/archive/{}.tar.gz",
        owner, repo, rev
      )),
      Origin::Url(url) => Some(url.clone()),
      Origin::Path(_) => None,
    }
  }
}

impl fmt::Display for Origin {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Origin::GitHub { owner, repo, rev } => write!(f, "github:{}/{}/{}", owner, repo, rev),
      Origin::Url(url) => f.write_str(url),
      Origin::Path(path) => write!(f, "path:{}", path.display()),
    }
  }
}
