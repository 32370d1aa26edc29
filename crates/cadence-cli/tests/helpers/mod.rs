#![allow(dead_code)]

use assert_cmd::Command;
use chrono::{Duration, Utc};
use std::path::PathBuf;
use tempfile::TempDir;
use uuid::Uuid;

/// Test harness for running CLI commands against a temporary database
pub struct CliTestHarness {
    temp_dir: TempDir,
    db_path: PathBuf,
}

impl CliTestHarness {
    /// Create a new test harness with a temporary database
    pub fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("test.db");

        Self { temp_dir, db_path }
    }

    /// Get a Command instance configured for testing.
    ///
    /// Runs inside the temp directory so no stray `cadence.toml` is picked up.
    pub fn command(&self) -> Command {
        let mut cmd = Command::cargo_bin("cadence").expect("Failed to find cadence binary");
        cmd.current_dir(self.temp_dir.path());
        cmd.env("CADENCE_DATABASE_PATH", &self.db_path);
        cmd.env_remove("RUST_LOG");
        cmd
    }

    pub fn db_path(&self) -> &std::path::Path {
        &self.db_path
    }

    /// Helper to run a command and assert success
    pub fn run_success(&self, args: &[&str]) -> assert_cmd::assert::Assert {
        self.command().args(args).assert().success()
    }

    /// Helper to run a command and assert failure
    pub fn run_failure(&self, args: &[&str]) -> assert_cmd::assert::Assert {
        self.command().args(args).assert().failure()
    }

    /// Runs a command that must succeed and returns its stdout
    pub fn stdout_of(&self, args: &[&str]) -> String {
        let output = self.run_success(args).get_output().stdout.clone();
        String::from_utf8(output).expect("stdout is not UTF-8")
    }

    /// Adds a task and returns its full id as printed by `add`
    pub fn add_task(&self, args: &[&str]) -> String {
        let mut full = vec!["add"];
        full.extend_from_slice(args);
        let stdout = self.stdout_of(&full);
        id_on_line(&stdout, "Task ID").expect("add did not print a task id")
    }
}

/// Finds the first UUID on the first line containing `marker`.
pub fn id_on_line(output: &str, marker: &str) -> Option<String> {
    let line = output.lines().find(|l| l.contains(marker))?;
    (0..line.len()).find_map(|start| {
        line.get(start..start + 36)
            .and_then(|candidate| Uuid::parse_str(candidate).ok())
            .map(|id| id.to_string())
    })
}

/// A due date a few days out, so that every default reminder offset is in the future
pub fn due_in_days(days: i64) -> String {
    (Utc::now() + Duration::days(days)).format("%Y-%m-%d").to_string()
}

/// Common test fixtures
pub struct TestFixtures;

impl TestFixtures {
    pub fn weekly_series_args(due: &str) -> Vec<String> {
        ["Weekly Review", "--due", due, "--every", "weekly", "--on", "mon,wed,fri", "--priority", "high"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }
}

/// Utility predicates for test assertions
pub mod assertions {
    use predicates::prelude::*;

    pub fn task_created_successfully() -> impl Predicate<str> {
        predicate::str::contains("✓").and(predicate::str::contains("Created"))
    }

    pub fn has_task_table_headers() -> impl Predicate<str> {
        predicate::str::contains("ID")
            .and(predicate::str::contains("Title"))
            .and(predicate::str::contains("Status"))
    }

    pub fn has_error() -> impl Predicate<str> {
        predicate::str::contains("Error").or(predicate::str::contains("error"))
    }
}
