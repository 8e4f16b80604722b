//! CLI output formatting utilities.
//!
//! Provides consistent formatting for terminal output including colored status
//! messages, tagged error reports and Unicode symbols.

use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

use kiln_lib::eval::EvalError;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
}

pub fn truncate_hash(hash: &str) -> &str {
  let len = hash.len().min(12);
  &hash[..len]
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  let millis = duration.subsec_millis();

  if secs >= 60 {
    let mins = secs / 60;
    let remaining_secs = secs % 60;
    format!("{}m {}s", mins, remaining_secs)
  } else if secs > 0 {
    format!("{}.{:02}s", secs, millis / 10)
  } else {
    format!("{}ms", millis)
  }
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}

/// `[Tag] message`, or the plain error chain when the error is not an evaluation error.
pub fn error_summary(err: &anyhow::Error) -> String {
  match err.downcast_ref::<EvalError>() {
    Some(eval) => format!("[{}] {:#}", eval.tag(), err),
    None => format!("{:#}", err),
  }
}

/// Print a failed command's error. Build engine output is passed through unmodified.
pub fn report_error(err: &anyhow::Error) {
  print_error(&error_summary(err));

  if let Some(eval) = err.downcast_ref::<EvalError>() {
    if let Some((stdout, stderr)) = eval.engine_output() {
      if !stdout.is_empty() {
        eprintln!("--- build stdout ---");
        eprint!("{}", stdout);
      }
      if !stderr.is_empty() {
        eprintln!("--- build stderr ---");
        eprint!("{}", stderr);
      }
    }
    if eval.is_retryable() {
      print_warning("this failure may be transient; re-run to retry");
    }
  }
}
