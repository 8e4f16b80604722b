//! Shell detection and activation script generation.

use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Supported shell types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shell {
  Bash,
  Zsh,
  Fish,
  PowerShell,
  Sh,
}

impl Shell {
  /// Detect the current shell from `$SHELL`, falling back to the platform default.
  pub fn detect() -> Self {
    if let Ok(shell) = env::var("SHELL") {
      let name = Path::new(&shell)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_lowercase();
      return Self::from_name(&name).unwrap_or(Shell::Sh);
    }

    #[cfg(windows)]
    return Shell::PowerShell;

    #[cfg(not(windows))]
    Shell::Sh
  }

  fn from_name(name: &str) -> Option<Self> {
    match name {
      "zsh" => Some(Shell::Zsh),
      "bash" => Some(Shell::Bash),
      "fish" => Some(Shell::Fish),
      "sh" | "dash" => Some(Shell::Sh),
      "pwsh" | "powershell" => Some(Shell::PowerShell),
      _ if name.contains("zsh") => Some(Shell::Zsh),
      _ if name.contains("bash") => Some(Shell::Bash),
      _ if name.contains("fish") => Some(Shell::Fish),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Shell::Bash => "bash",
      Shell::Zsh => "zsh",
      Shell::Fish => "fish",
      Shell::PowerShell => "powershell",
      Shell::Sh => "sh",
    }
  }

  /// Quote `value` as a literal for this shell.
  pub fn quote(&self, value: &str) -> String {
    match self {
      Shell::Fish => format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'")),
      Shell::PowerShell => format!("'{}'", value.replace('\'', "''")),
      Shell::Bash | Shell::Zsh | Shell::Sh => format!("'{}'", value.replace('\'', r"'\''")),
    }
  }

  /// Statement setting an environment variable.
  pub fn export_var(&self, name: &str, value: &str) -> String {
    let value = self.quote(value);
    match self {
      Shell::Fish => format!("set -gx {} {}", name, value),
      Shell::PowerShell => format!("$env:{} = {}", name, value),
      Shell::Bash | Shell::Zsh | Shell::Sh => format!("export {}={}", name, value),
    }
  }

  /// Statement prepending `value` to a PATH-like variable.
  pub fn prepend_path(&self, name: &str, value: &str) -> String {
    let value = self.quote(value);
    match self {
      Shell::Fish => format!("set -gx {} {} ${}", name, value, name),
      Shell::PowerShell => format!("$env:{} = {} + [IO.Path]::PathSeparator + $env:{}", name, value, name),
      Shell::Bash | Shell::Zsh | Shell::Sh => format!("export {}={}${{{}:+:${}}}", name, value, name, name),
    }
  }

  /// Statement replacing the shell with `command`.
  pub fn exec(&self, command: &str) -> String {
    match self {
      Shell::Fish => format!("exec {}", command),
      Shell::PowerShell => format!("{}; exit $LASTEXITCODE", command),
      Shell::Bash | Shell::Zsh | Shell::Sh => format!("exec {}", command),
    }
  }

  pub fn header(&self) -> &'static str {
    match self {
      Shell::Bash => "#!/usr/bin/env bash",
      Shell::Zsh => "#!/usr/bin/env zsh",
      Shell::Fish => "# Fish shell environment",
      Shell::PowerShell => "# PowerShell environment",
      Shell::Sh => "#!/bin/sh",
    }
  }
}

impl fmt::Display for Shell {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Shell {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let name = s.to_lowercase();
    Self::from_name(&name).ok_or_else(|| format!("unsupported shell '{}'", s))
  }
}
