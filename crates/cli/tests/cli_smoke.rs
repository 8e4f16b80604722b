//! CLI smoke tests for kiln.
//!
//! These tests drive the binary end to end against `path:` sources and
//! script builders, so no network access or toolchain is needed.

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serial_test::serial;
use tempfile::TempDir;

const ZERO_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Isolated workspace: a source tree, a store and an input root per test.
struct TestEnv {
  temp: TempDir,
}

impl TestEnv {
  fn new() -> Self {
    let temp = TempDir::new().unwrap();
    let env = Self { temp };
    env.write_file("src/greeting.txt", "hello from ox\n");
    fs::create_dir_all(env.inputs()).unwrap();
    env
  }

  fn path(&self) -> &Path {
    self.temp.path()
  }

  fn store(&self) -> PathBuf {
    self.path().join("store")
  }

  fn inputs(&self) -> PathBuf {
    self.path().join("inputs")
  }

  fn manifest(&self) -> PathBuf {
    self.path().join("kiln.json")
  }

  fn write_file(&self, relative: &str, content: &str) {
    let path = self.path().join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
  }

  fn cmd(&self) -> Command {
    let mut cmd = cargo_bin_cmd!("kiln");
    cmd
      .env("KILN_STORE", self.store())
      .env("KILN_INPUT_PATH", self.inputs())
      .env_remove("RUST_LOG")
      .current_dir(self.path());
    cmd
  }

  /// Content hash of the source tree, as printed by `kiln hash`.
  fn source_hash(&self) -> String {
    let output = self.cmd().arg("hash").arg(self.path().join("src")).output().unwrap();
    assert!(output.status.success());
    String::from_utf8(output.stdout).unwrap().trim().to_string()
  }

  fn write_manifest(&self, manifest: serde_json::Value) {
    fs::write(self.manifest(), serde_json::to_string_pretty(&manifest).unwrap()).unwrap();
  }

  /// Write a script-built manifest and pin its lockHash via `kiln lock`.
  fn pinned_manifest(&self, native: &[&str], script: &str) {
    let mut manifest = self.script_manifest(&self.source_hash(), native, script);
    manifest.as_object_mut().unwrap().remove("lockHash");
    self.write_manifest(manifest.clone());

    let output = self.cmd().arg("lock").arg(self.manifest()).output().unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8(output.stdout).unwrap();
    manifest["lockHash"] = stdout.lines().next().unwrap().trim().into();
    self.write_manifest(manifest);
  }

  fn script_manifest(&self, source_hash: &str, native: &[&str], script: &str) -> serde_json::Value {
    serde_json::json!({
      "package": { "name": "ox", "version": "0.1.0" },
      "source": { "origin": "path:./src", "hash": source_hash },
      "inputs": { "native": native, "libraries": [] },
      "lockHash": ZERO_HASH,
      "devShell": { "inputs": native },
      "build": { "builder": "script", "script": script },
    })
  }

  /// Install an executable `bin/<tool>` under `<inputs>/<name>/`.
  #[cfg(unix)]
  fn install_tool(&self, name: &str, tool: &str, body: &str) {
    use std::os::unix::fs::PermissionsExt;

    let path = self.inputs().join(name).join("bin").join(tool);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
  }
}

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_flag_works() {
  cargo_bin_cmd!("kiln")
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"));
}

#[test]
fn version_flag_works() {
  cargo_bin_cmd!("kiln")
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("kiln"));
}

#[test]
fn subcommand_help_works() {
  for cmd in &["build", "shell", "lock", "hash", "gc"] {
    cargo_bin_cmd!("kiln")
      .arg(cmd)
      .arg("--help")
      .assert()
      .success()
      .stdout(predicate::str::contains("Usage"));
  }
}

// =============================================================================
// hash
// =============================================================================

#[test]
fn hash_is_stable_and_content_sensitive() {
  let env = TestEnv::new();
  let first = env.source_hash();
  assert_eq!(first.len(), 64);
  assert_eq!(env.source_hash(), first);

  env.write_file("src/greeting.txt", "goodbye\n");
  assert_ne!(env.source_hash(), first);
}

#[test]
fn hash_missing_directory_fails() {
  let env = TestEnv::new();
  env
    .cmd()
    .arg("hash")
    .arg(env.path().join("nope"))
    .assert()
    .failure();
}

// =============================================================================
// Manifest errors
// =============================================================================

#[test]
fn missing_manifest_is_invalid() {
  let env = TestEnv::new();
  env
    .cmd()
    .arg("build")
    .assert()
    .failure()
    .stderr(predicate::str::contains("[InvalidManifest]"));
}

#[test]
fn malformed_manifest_is_invalid() {
  let env = TestEnv::new();
  env.write_file("kiln.json", "{ not json");
  env
    .cmd()
    .arg("build")
    .arg(env.manifest())
    .assert()
    .failure()
    .stderr(predicate::str::contains("[InvalidManifest]"));
}

#[test]
fn lua_manifest_is_found_in_directory() {
  let env = TestEnv::new();
  let hash = env.source_hash();
  env.write_file(
    "kiln.lua",
    &format!(
      r#"
local name = "ox"
return {{
  package = {{ name = name, version = "0.1.0" }},
  source = {{ origin = "path:./src", hash = "{hash}" }},
  lockHash = "{ZERO_HASH}",
  build = {{ builder = "script", script = "echo hi" }},
}}
"#
    ),
  );

  env
    .cmd()
    .arg("lock")
    .arg(env.path())
    .assert()
    .success()
    .stderr(predicate::str::contains("manifest declares lockHash"));
}

// =============================================================================
// lock / build
// =============================================================================

#[cfg(unix)]
#[test]
#[serial]
fn build_then_rebuild_is_cached() {
  let env = TestEnv::new();
  env.pinned_manifest(&[], r#"while read -r line; do echo "$line"; done < greeting.txt > "$out/greeting""#);

  env
    .cmd()
    .arg("build")
    .arg(env.manifest())
    .assert()
    .success()
    .stdout(predicate::str::contains("Built ox-0.1.0"));

  let output = env
    .cmd()
    .args(["build", "--output", "json"])
    .arg(env.manifest())
    .output()
    .unwrap();
  assert!(output.status.success());
  let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(summary["cached"], true);
  assert_eq!(summary["package"], "ox-0.1.0");

  let path = PathBuf::from(summary["path"].as_str().unwrap());
  assert!(path.starts_with(env.store().join("out")));
  assert_eq!(fs::read_to_string(path.join("greeting")).unwrap(), "hello from ox\n");
}

#[cfg(unix)]
#[test]
#[serial]
fn native_inputs_are_on_build_path() {
  let env = TestEnv::new();
  env.install_tool("greeter", "greet", "echo greeted");
  env.pinned_manifest(&["greeter"], r#"greet > "$out/greeting""#);

  let output = env
    .cmd()
    .args(["build", "-o", "json"])
    .arg(env.manifest())
    .output()
    .unwrap();
  assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
  let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  let path = PathBuf::from(summary["path"].as_str().unwrap());
  assert_eq!(fs::read_to_string(path.join("greeting")).unwrap(), "greeted\n");
}

#[cfg(unix)]
#[test]
#[serial]
fn lock_reports_up_to_date() {
  let env = TestEnv::new();
  env.pinned_manifest(&[], "echo hi");

  env
    .cmd()
    .args(["lock", "--output", "json"])
    .arg(env.manifest())
    .assert()
    .success()
    .stdout(predicate::str::contains("\"upToDate\": true"));
}

#[test]
#[serial]
fn lock_works_before_lock_hash_is_declared() {
  let env = TestEnv::new();
  let mut manifest = env.script_manifest(&env.source_hash(), &[], "echo hi");
  manifest.as_object_mut().unwrap().remove("lockHash");
  env.write_manifest(manifest);

  env
    .cmd()
    .arg("build")
    .arg(env.manifest())
    .assert()
    .failure()
    .stderr(predicate::str::contains("[InvalidManifest]"))
    .stderr(predicate::str::contains("lockHash"));

  let output = env.cmd().arg("lock").arg(env.manifest()).output().unwrap();
  assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
  let stdout = String::from_utf8(output.stdout).unwrap();
  assert_eq!(stdout.lines().next().unwrap().trim().len(), 64);
}

#[cfg(unix)]
#[test]
#[serial]
fn failing_build_prints_engine_output() {
  let env = TestEnv::new();
  env.pinned_manifest(&[], "echo compiling; echo 'error: linker not found' >&2; exit 3");

  env
    .cmd()
    .arg("build")
    .arg(env.manifest())
    .assert()
    .failure()
    .stderr(predicate::str::contains("[BuildFailed]"))
    .stderr(predicate::str::contains("compiling\n"))
    .stderr(predicate::str::contains("error: linker not found\n"));
}

#[test]
#[serial]
fn stale_lock_hash_is_rejected() {
  let env = TestEnv::new();
  let manifest = env.script_manifest(&env.source_hash(), &[], "echo hi");
  env.write_manifest(manifest);

  env
    .cmd()
    .arg("build")
    .arg(env.manifest())
    .assert()
    .failure()
    .stderr(predicate::str::contains("[LockHashMismatch]"));
  assert_eq!(fs::read_dir(env.store().join("out")).unwrap().count(), 0);
}

#[test]
#[serial]
fn wrong_source_hash_is_rejected() {
  let env = TestEnv::new();
  env.write_manifest(env.script_manifest(ZERO_HASH, &[], "echo hi"));

  env
    .cmd()
    .arg("build")
    .arg(env.manifest())
    .assert()
    .failure()
    .stderr(predicate::str::contains("[HashMismatch]"));
  assert_eq!(fs::read_dir(env.store().join("src")).unwrap().count(), 0);
}

#[test]
#[serial]
fn missing_input_is_unresolved() {
  let env = TestEnv::new();
  env.write_manifest(env.script_manifest(&env.source_hash(), &["kiln-no-such-tool-xyz"], "echo hi"));

  env
    .cmd()
    .arg("build")
    .arg(env.manifest())
    .assert()
    .failure()
    .stderr(predicate::str::contains("[UnresolvedInput]"))
    .stderr(predicate::str::contains("kiln-no-such-tool-xyz"));
}

// =============================================================================
// shell
// =============================================================================

#[cfg(unix)]
#[test]
#[serial]
fn shell_print_emits_activation_script() {
  let env = TestEnv::new();
  env.install_tool("greeter", "greet", "echo greeted");
  env.write_manifest(env.script_manifest(ZERO_HASH, &["greeter"], "echo hi"));

  env
    .cmd()
    .args(["shell", "--print", "--shell", "bash"])
    .arg(env.manifest())
    .assert()
    .success()
    .stdout(predicate::str::contains("export IN_KILN_SHELL='1'"))
    .stdout(predicate::str::contains("greeter/bin"));
}

#[cfg(unix)]
#[test]
#[serial]
fn shell_runs_entry_hook() {
  let env = TestEnv::new();
  env.install_tool("greeter", "greet", "echo greeted");
  let mut manifest = env.script_manifest(ZERO_HASH, &["greeter"], "echo hi");
  manifest["devShell"]["entryHook"] = "greet".into();
  env.write_manifest(manifest);

  env
    .cmd()
    .arg("shell")
    .arg(env.manifest())
    .assert()
    .success()
    .stdout(predicate::str::diff("greeted\n"));
}

#[test]
#[serial]
fn shell_without_dev_shell_is_invalid() {
  let env = TestEnv::new();
  let mut manifest = env.script_manifest(ZERO_HASH, &[], "echo hi");
  manifest.as_object_mut().unwrap().remove("devShell");
  env.write_manifest(manifest);

  env
    .cmd()
    .args(["shell", "--print"])
    .arg(env.manifest())
    .assert()
    .failure()
    .stderr(predicate::str::contains("[InvalidManifest]"));
}

// =============================================================================
// gc
// =============================================================================

#[test]
#[serial]
fn gc_on_fresh_store() {
  let env = TestEnv::new();
  env
    .cmd()
    .arg("gc")
    .assert()
    .success()
    .stdout(predicate::str::contains("Removed: 0"));
}
