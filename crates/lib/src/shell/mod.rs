//! Environment composer.
//!
//! Turns an [`EnvironmentDescriptor`] into a [`LiveEnvironment`]: the set of
//! visible tools, variable overrides and an optional entry hook. Composing is
//! purely descriptive and never touches the store; nothing runs until
//! [`LiveEnvironment::enter`] is called.

mod script;

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::env;
use std::ffi::{OsStr, OsString};
use std::io;
use std::path::PathBuf;
use std::process::Command;

use thiserror::Error;
use tracing::{debug, info};

use crate::inputs::{EnvironmentDescriptor, ResolvedInput};

pub use script::Shell;

/// Set to `1` inside every composed environment.
pub const IN_SHELL_VAR: &str = "IN_KILN_SHELL";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComposeError {
  #[error("entry hook must not be blank")]
  InvalidEntryHook,
}

/// A ready-to-enter interactive environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveEnvironment {
  tools: Vec<ResolvedInput>,
  vars: BTreeMap<String, String>,
  entry: Option<String>,
  path_entries: Vec<PathBuf>,
  search_paths: BTreeMap<&'static str, Vec<PathBuf>>,
}

/// Compose a live environment.
///
/// `entry_hook` overrides the descriptor's hook when given.
pub fn compose(descriptor: &EnvironmentDescriptor, entry_hook: Option<&str>) -> Result<LiveEnvironment, ComposeError> {
  let entry = entry_hook.or(descriptor.entry_hook.as_deref());
  if entry.is_some_and(|hook| hook.trim().is_empty()) {
    return Err(ComposeError::InvalidEntryHook);
  }

  let live = LiveEnvironment {
    tools: descriptor.all_inputs().cloned().collect(),
    vars: descriptor.vars.clone(),
    entry: entry.map(|hook| hook.trim().to_string()),
    path_entries: descriptor.bin_dirs(),
    search_paths: descriptor.library_hints(),
  };
  debug!(tools = live.tools.len(), entry = ?live.entry, "composed environment");
  Ok(live)
}

impl LiveEnvironment {
  /// Every visible tool, as resolved by the input graph builder.
  pub fn tools(&self) -> &[ResolvedInput] {
    &self.tools
  }

  pub fn vars(&self) -> &BTreeMap<String, String> {
    &self.vars
  }

  /// The command run on entry, if any.
  pub fn entry(&self) -> Option<&str> {
    self.entry.as_deref()
  }

  /// Directories prepended to `PATH`, in order.
  pub fn path_entries(&self) -> &[PathBuf] {
    &self.path_entries
  }

  /// Variables to apply on top of the caller's environment.
  ///
  /// `PATH` is the tool directories followed by `base_path`.
  pub fn env_map(&self, base_path: Option<&OsStr>) -> BTreeMap<String, OsString> {
    let mut map: BTreeMap<String, OsString> = BTreeMap::new();

    let mut path: Vec<PathBuf> = self.path_entries.clone();
    if let Some(base) = base_path {
      path.extend(env::split_paths(base));
    }
    if let Ok(joined) = env::join_paths(&path) {
      map.insert("PATH".to_string(), joined);
    }
    for (name, dirs) in &self.search_paths {
      if let Ok(joined) = env::join_paths(dirs) {
        map.insert(name.to_string(), joined);
      }
    }
    map.insert(IN_SHELL_VAR.to_string(), "1".into());
    for (key, value) in &self.vars {
      map.insert(key.clone(), value.into());
    }
    map
  }

  /// A script that activates this environment in `shell` when sourced.
  ///
  /// The entry hook, if any, is the last statement and replaces the shell.
  pub fn activation_script(&self, shell: Shell) -> String {
    let mut lines = vec![shell.header().to_string()];

    for dir in self.path_entries.iter().rev() {
      lines.push(shell.prepend_path("PATH", &dir.to_string_lossy()));
    }
    for (name, dirs) in &self.search_paths {
      for dir in dirs.iter().rev() {
        lines.push(shell.prepend_path(name, &dir.to_string_lossy()));
      }
    }
    lines.push(shell.export_var(IN_SHELL_VAR, "1"));
    for (key, value) in &self.vars {
      lines.push(shell.export_var(key, value));
    }
    if let Some(entry) = &self.entry {
      lines.push(shell.exec(entry));
    }

    lines.join("\n") + "\n"
  }

  /// The process that [`enter`](Self::enter) replaces the caller with.
  ///
  /// With an entry hook, the hook runs via `/bin/sh -c "exec <hook>"`;
  /// otherwise `shell` (or `$SHELL`, or `/bin/sh`) runs interactively.
  pub fn command(&self, shell: Option<&str>) -> Command {
    let mut command = match &self.entry {
      Some(entry) => {
        let mut command = Command::new(default_shell());
        command.arg(if cfg!(windows) { "-Command" } else { "-c" });
        command.arg(if cfg!(windows) {
          entry.clone()
        } else {
          format!("exec {}", entry)
        });
        command
      }
      None => {
        let program = shell
          .map(str::to_string)
          .or_else(|| env::var("SHELL").ok())
          .unwrap_or_else(|| default_shell().to_string());
        Command::new(program)
      }
    };
    command.envs(self.env_map(env::var_os("PATH").as_deref()));
    command
  }

  /// Replace the current process with the environment.
  ///
  /// Only returns on failure.
  pub fn enter(&self, shell: Option<&str>) -> io::Result<Infallible> {
    let mut command = self.command(shell);
    info!(program = ?command.get_program(), entry = ?self.entry, "entering environment");

    #[cfg(unix)]
    {
      use std::os::unix::process::CommandExt;
      Err(command.exec())
    }

    #[cfg(not(unix))]
    {
      let status = command.status()?;
      std::process::exit(status.code().unwrap_or(1))
    }
  }
}

fn default_shell() -> &'static str {
  if cfg!(windows) { "powershell.exe" } else { "/bin/sh" }
}
