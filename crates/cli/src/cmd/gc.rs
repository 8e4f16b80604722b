use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use super::open_store;
use crate::output::{format_duration, print_stat, print_success};

/// Remove staging directories older than `older_than`.
pub fn cmd_gc(store: Option<&Path>, older_than: Duration) -> Result<()> {
  let start = Instant::now();
  let store = open_store(store)?;

  let removed = store
    .gc_staging(older_than)
    .context("Failed to clean staging area")?;

  print_success("Staging area cleaned");
  print_stat("Removed", &removed.to_string());
  print_stat("Duration", &format_duration(start.elapsed()));
  Ok(())
}
