//! CLI integration tests for the administrative commands.
//!
//! Each test uses an isolated temp directory for the database, so tests can
//! run in parallel.

#![allow(deprecated)] // Command::cargo_bin deprecation only affects custom build dirs

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

use voltcore::store::{SqliteStore, Store};

struct TestContext {
    temp_dir: TempDir,
}

impl TestContext {
    fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("failed to create temp dir"),
        }
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("voltcore").expect("failed to find binary");
        cmd.env("DATA_DIR", self.temp_dir.path())
            .env("POSTGRES_URL", "")
            .env_remove("VOLTCORE_CONFIG")
            .env_remove("VOLTCORE_USER_PASSWORD")
            .env("NO_COLOR", "1");
        cmd
    }

    fn create_user(&self, username: &str, email: &str) -> assert_cmd::assert::Assert {
        self.cmd()
            .args([
                "user",
                "create",
                "--username",
                username,
                "--email",
                email,
                "--full-name",
                "Test User",
                "--password",
                "s3cret-pass",
            ])
            .assert()
    }

    fn store(&self) -> SqliteStore {
        SqliteStore::new(&self.temp_dir.path().join("voltcore.db")).expect("open store")
    }
}

#[test]
fn test_migrate_creates_database() {
    let ctx = TestContext::new();
    ctx.cmd()
        .arg("migrate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Database ready at"));

    assert!(ctx.temp_dir.path().join("voltcore.db").exists());

    // Running it again against an existing schema is fine.
    ctx.cmd().arg("migrate").assert().success();
}

#[test]
fn test_user_create() {
    let ctx = TestContext::new();
    ctx.create_user("alice", "Alice@Example.com")
        .success()
        .stdout(predicate::str::contains("Created user 'alice'"));

    let user = ctx
        .store()
        .get_user_by_username("alice")
        .expect("query user")
        .expect("user exists");
    assert_eq!(user.email, "alice@example.com");
    assert_eq!(user.full_name, "Test User");
    assert!(!user.password_hash.is_empty());
}

#[test]
fn test_user_create_rejects_duplicates() {
    let ctx = TestContext::new();
    ctx.create_user("alice", "alice@example.com").success();
    ctx.create_user("alice", "other@example.com").failure();
}

#[test]
fn test_user_create_validates_input() {
    let ctx = TestContext::new();
    ctx.create_user("not valid!", "alice@example.com")
        .failure()
        .stderr(predicate::str::contains("username can only contain"));

    ctx.create_user("alice", "not-an-email")
        .failure()
        .stderr(predicate::str::contains("is not a valid email address"));
}

#[test]
fn test_user_create_requires_password() {
    let ctx = TestContext::new();
    ctx.cmd()
        .args(["user", "create", "--username", "alice", "--email", "alice@example.com"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--password"));
}

#[test]
fn test_invalid_config_is_reported() {
    let ctx = TestContext::new();
    ctx.cmd()
        .env("CONVERSION_WORKERS", "0")
        .arg("migrate")
        .assert()
        .failure();
}
