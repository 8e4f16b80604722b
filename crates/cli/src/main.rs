mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kiln_lib::eval::EvalConfig;
use kiln_lib::util::hash::HashAlgo;

use crate::output::{OutputFormat, report_error};

/// kiln - reproducible package builds and dev environments
#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Store root (defaults to $KILN_STORE or the user data directory)
  #[arg(long, global = true)]
  store: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Args)]
struct EvalArgs {
  /// Give up fetching a source after this long (e.g. "90s", "5m")
  #[arg(long, value_parser = humantime::parse_duration)]
  fetch_timeout: Option<Duration>,

  /// Give up building after this long
  #[arg(long, value_parser = humantime::parse_duration)]
  build_timeout: Option<Duration>,

  /// Skip the package's test phase
  #[arg(long)]
  no_check: bool,
}

impl EvalArgs {
  fn config(&self, shell: Option<String>) -> EvalConfig {
    EvalConfig {
      fetch_timeout: self.fetch_timeout,
      build_timeout: self.build_timeout,
      shell,
      check: !self.no_check,
    }
  }
}

#[derive(Subcommand)]
enum Commands {
  /// Build the package and print its store key and path
  Build {
    /// Manifest file or directory containing kiln.lua / kiln.json
    manifest: Option<PathBuf>,

    #[command(flatten)]
    eval: EvalArgs,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },

  /// Enter the manifest's devShell
  Shell {
    /// Manifest file or directory containing kiln.lua / kiln.json
    manifest: Option<PathBuf>,

    /// Print an activation script instead of entering
    #[arg(long)]
    print: bool,

    /// Shell to enter or generate a script for (auto-detected if not specified)
    #[arg(short, long)]
    shell: Option<String>,
  },

  /// Compute the lock hash the manifest should declare
  Lock {
    /// Manifest file or directory containing kiln.lua / kiln.json
    manifest: Option<PathBuf>,

    #[command(flatten)]
    eval: EvalArgs,

    /// Output format
    #[arg(short, long, value_enum, default_value_t)]
    output: OutputFormat,
  },

  /// Print the content hash of a directory
  Hash {
    path: PathBuf,

    /// Digest algorithm
    #[arg(long, default_value = "sha256")]
    algo: HashAlgo,
  },

  /// Remove staging directories left behind by interrupted operations
  Gc {
    /// Only remove directories older than this
    #[arg(long, value_parser = humantime::parse_duration, default_value = "1h")]
    older_than: Duration,
  },
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let store = cli.store.as_deref();
  let result = match cli.command {
    Commands::Build { manifest, eval, output } => {
      cmd::cmd_build(manifest.as_deref(), store, eval.config(None), output)
    }
    Commands::Shell { manifest, print, shell } => cmd::cmd_shell(manifest.as_deref(), store, print, shell),
    Commands::Lock { manifest, eval, output } => cmd::cmd_lock(manifest.as_deref(), store, eval.config(None), output),
    Commands::Hash { path, algo } => cmd::cmd_hash(&path, algo),
    Commands::Gc { older_than } => cmd::cmd_gc(store, older_than),
  };

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      report_error(&err);
      ExitCode::FAILURE
    }
  }
}
