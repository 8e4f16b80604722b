//! The external build engine.
//!
//! [`ShellEngine`] runs a recipe script in an isolated environment, following
//! Nix-inspired principles: the host environment is cleared and only the
//! resolved inputs are visible.

use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use crate::consts::SOURCE_DATE_EPOCH;
use crate::inputs::EnvironmentDescriptor;

/// PATH used when no input provides a `bin/` directory, so undeclared tools fail fast.
pub const PATH_NOT_SET: &str = "/path-not-set";

/// HOME inside builds.
pub const HOMELESS_SHELTER: &str = "/homeless-shelter";

/// One engine invocation.
#[derive(Debug, Clone, Copy)]
pub struct EngineRequest<'a> {
  /// Script to run, with `src` as the working directory.
  pub script: &'a str,
  /// Writable copy of the verified source.
  pub src_dir: &'a Path,
  /// Staging directory the build installs into.
  pub out_dir: &'a Path,
  /// Scratch directory for temporary files.
  pub tmp_dir: &'a Path,
  pub environment: &'a EnvironmentDescriptor,
}

/// Exit status and captured output, verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineOutput {
  /// `None` when the process was killed by a signal.
  pub code: Option<i32>,
  pub stdout: String,
  pub stderr: String,
}

impl EngineOutput {
  pub fn success(&self) -> bool {
    self.code == Some(0)
  }
}

/// Compiles a source tree into an output directory.
pub trait BuildEngine: Send + Sync {
  /// Run the build. An `Err` means the engine could not be started at all.
  fn run(&self, request: EngineRequest<'_>) -> impl Future<Output = io::Result<EngineOutput>> + Send;
}

/// Runs recipes with `/bin/sh -c` (or `powershell.exe` on Windows).
#[derive(Debug, Clone, Default)]
pub struct ShellEngine {
  shell: Option<String>,
}

impl ShellEngine {
  pub fn new() -> Self {
    Self::default()
  }

  /// Use `shell` instead of the platform default.
  pub fn with_shell(shell: impl Into<String>) -> Self {
    Self {
      shell: Some(shell.into()),
    }
  }
}

impl BuildEngine for ShellEngine {
  async fn run(&self, request: EngineRequest<'_>) -> io::Result<EngineOutput> {
    let (shell_cmd, shell_args) = get_shell(self.shell.as_deref());
    let vars = isolated_env(&request)?;

    let mut command = Command::new(&shell_cmd);
    command
      .args(&shell_args)
      .arg(request.script)
      .current_dir(request.src_dir)
      .env_clear()
      .envs(&vars)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true);

    info!(shell = %shell_cmd, src = ?request.src_dir, "running build engine");
    let output = command.output().await?;

    let result = EngineOutput {
      code: output.status.code(),
      stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
      stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };
    debug!(code = ?result.code, "build engine exited");
    Ok(result)
  }
}

/// The complete environment of a build process.
///
/// Manifest overrides are applied last and win over everything else.
pub fn isolated_env(request: &EngineRequest<'_>) -> io::Result<BTreeMap<String, OsString>> {
  let descriptor = request.environment;
  let mut vars: BTreeMap<String, OsString> = BTreeMap::new();

  let bin_dirs = descriptor.bin_dirs();
  let path = if bin_dirs.is_empty() {
    OsString::from(PATH_NOT_SET)
  } else {
    join(&bin_dirs)?
  };
  vars.insert("PATH".to_string(), path);
  vars.insert("HOME".to_string(), HOMELESS_SHELTER.into());
  for name in ["TMPDIR", "TMP", "TEMP", "TEMPDIR"] {
    vars.insert(name.to_string(), request.tmp_dir.into());
  }
  vars.insert("out".to_string(), request.out_dir.into());
  vars.insert("src".to_string(), request.src_dir.into());
  vars.insert("LANG".to_string(), "C".into());
  vars.insert("LC_ALL".to_string(), "C".into());
  vars.insert("SOURCE_DATE_EPOCH".to_string(), SOURCE_DATE_EPOCH.into());

  for (name, dirs) in descriptor.library_hints() {
    vars.insert(name.to_string(), join(&dirs)?);
  }

  for (key, value) in &descriptor.vars {
    vars.insert(key.clone(), value.into());
  }

  Ok(vars)
}

fn join(dirs: &[PathBuf]) -> io::Result<OsString> {
  env::join_paths(dirs).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

/// Shell command and arguments for the current platform.
///
/// Profile-sourcing shells are avoided by default so the build environment
/// stays isolated.
fn get_shell(override_shell: Option<&str>) -> (String, Vec<String>) {
  if let Some(shell) = override_shell {
    let args = if shell.contains("powershell") || shell.contains("pwsh") {
      vec!["-NoProfile".to_string(), "-Command".to_string()]
    } else if shell.contains("cmd") {
      vec!["/C".to_string()]
    } else {
      vec!["-c".to_string()]
    };
    return (shell.to_string(), args);
  }

  #[cfg(unix)]
  {
    ("/bin/sh".to_string(), vec!["-c".to_string()])
  }

  #[cfg(windows)]
  {
    (
      "powershell.exe".to_string(),
      vec![
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-Command".to_string(),
      ],
    )
  }
}
