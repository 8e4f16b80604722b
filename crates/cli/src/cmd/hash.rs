use std::path::Path;

use anyhow::{Context, Result};

use kiln_lib::util::hash::{HashAlgo, hash_directory};

/// Print the content hash of a directory, as declared in a manifest's `source.hash`.
pub fn cmd_hash(path: &Path, algo: HashAlgo) -> Result<()> {
  let hash = hash_directory(path, &[".git"], algo).with_context(|| format!("Failed to hash {}", path.display()))?;
  println!("{}", hash);
  Ok(())
}
