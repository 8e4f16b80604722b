use std::fs;
use std::path::{Path, PathBuf};

use mlua::prelude::*;
use tracing::debug;

use super::{Manifest, ManifestError};

pub const DEFAULT_MANIFEST_JSON: &str = "kiln.json";
pub const DEFAULT_MANIFEST_LUA: &str = "kiln.lua";

/// Look for `kiln.lua` then `kiln.json` in `dir`.
pub fn find_manifest(dir: &Path) -> Option<PathBuf> {
  [DEFAULT_MANIFEST_LUA, DEFAULT_MANIFEST_JSON]
    .into_iter()
    .map(|name| dir.join(name))
    .find(|p| p.is_file())
}

impl Manifest {
  /// Load and validate a manifest file.
  ///
  /// Relative `path:` origins are resolved against the manifest's directory.
  /// A missing lockHash is accepted here; builds reject it.
  pub fn load(path: &Path) -> Result<Self, ManifestError> {
    let content = fs::read_to_string(path).map_err(|source| ManifestError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let dir = path
      .parent()
      .filter(|p| !p.as_os_str().is_empty())
      .unwrap_or(Path::new("."));
    let dir = dunce::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());

    let mut manifest = match path.extension().and_then(|e| e.to_str()) {
      Some("json") => Self::from_json_str(&content)?,
      Some("lua") => Self::from_lua_str(&content, &path.display().to_string(), &dir)?,
      _ => return Err(ManifestError::UnsupportedFormat(path.to_path_buf())),
    };

    if let Some(rel) = manifest.source.origin.strip_prefix("path:")
      && Path::new(rel).is_relative()
    {
      manifest.source.origin = format!("path:{}", dir.join(rel).display());
    }

    manifest.validate_unlocked()?;
    debug!(path = %path.display(), package = %manifest.identity(), "loaded manifest");
    Ok(manifest)
  }

  /// Parse a JSON manifest without validating it.
  pub fn from_json_str(content: &str) -> Result<Self, ManifestError> {
    serde_json::from_str(content).map_err(ManifestError::Parse)
  }

  /// Evaluate a Lua chunk that returns the manifest table.
  ///
  /// The chunk sees a `kiln` global with `os`, `arch` and `dir` fields.
  pub fn from_lua_str(content: &str, chunk_name: &str, dir: &Path) -> Result<Self, ManifestError> {
    let eval = || -> LuaResult<Self> {
      let lua = Lua::new();
      let kiln = lua.create_table()?;
      kiln.set("os", std::env::consts::OS)?;
      kiln.set("arch", std::env::consts::ARCH)?;
      kiln.set("dir", dir.to_string_lossy().into_owned())?;
      lua.globals().set("kiln", kiln)?;

      let value = lua.load(content).set_name(format!("@{}", chunk_name)).eval::<LuaValue>()?;
      if !value.is_table() {
        return Err(LuaError::external(format!(
          "manifest must return a table, got {}",
          value.type_name()
        )));
      }
      lua.from_value(value)
    };
    eval().map_err(|e| ManifestError::Lua(e.to_string()))
  }
}
