//! CLI integration tests for sqlrest.
//!
//! These tests cover argument parsing, offline compilation and exit codes
//! for configuration errors. Nothing here needs a running database.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

/// Get a command for the sqlrest binary.
fn cmd() -> Command {
    Command::cargo_bin("sqlrest").unwrap()
}

fn config_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{}", contents).unwrap();
    file
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("compile"))
        .stdout(predicate::str::contains("introspect"))
        .stdout(predicate::str::contains("health-check"))
        .stdout(predicate::str::contains("query"))
        .stdout(predicate::str::contains("watch"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sqlrest"));
}

#[test]
fn test_global_flags_have_defaults() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("[default: text]"))
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("[default: info]"))
        .stdout(predicate::str::contains("[default: config.yaml]"));
}

#[test]
fn test_compile_subcommand_help() {
    cmd()
        .args(["compile", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--dialect"))
        .stdout(predicate::str::contains("--param"))
        .stdout(predicate::str::contains("--operation"));
}

#[test]
fn test_watch_subcommand_help() {
    cmd()
        .args(["watch", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--cursor-column"))
        .stdout(predicate::str::contains("--from-beginning"));
}

// =============================================================================
// Offline Compilation
// =============================================================================

#[test]
fn test_compile_postgres_select() {
    cmd()
        .args([
            "compile",
            "--dialect",
            "postgresql",
            "--table",
            "users",
            "--param",
            "name=eq.Alice",
            "--param",
            "order=created_at.desc",
            "--param",
            "limit=10",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            r#"SELECT * FROM "users" WHERE "name" = $1 ORDER BY "created_at" DESC LIMIT 10 OFFSET 0"#,
        ))
        .stdout(predicate::str::contains(r#"params: ["Alice"]"#));
}

#[test]
fn test_compile_tsql_select() {
    cmd()
        .args([
            "compile",
            "--dialect",
            "tsql",
            "--table",
            "users",
            "--param",
            "name=eq.Alice",
            "--param",
            "order=created_at.desc",
            "--param",
            "limit=10",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "SELECT * FROM [users] WHERE [name] = @param0 ORDER BY [created_at] DESC OFFSET 0 ROWS FETCH NEXT 10 ROWS ONLY",
        ));
}

#[test]
fn test_compile_in_list_as_json() {
    cmd()
        .args([
            "--output-json",
            "compile",
            "--dialect",
            "pg",
            "--table",
            "users",
            "--param",
            "age=in.18,19,20",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""sql""#))
        .stdout(predicate::str::contains("IN ($1, $2, $3)"));
}

#[test]
fn test_compile_update_with_set() {
    cmd()
        .args([
            "compile",
            "--dialect",
            "tsql",
            "--table",
            "dbo.users",
            "--operation",
            "update",
            "--set",
            "active=false",
            "--param",
            "age=lt.18",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "UPDATE [dbo].[users] SET [active] = @param0 WHERE [age] < @param1",
        ));
}

// =============================================================================
// Exit Code Tests - Request Errors (Exit Code 4)
// =============================================================================

#[test]
fn test_compile_delete_without_filters_exits_with_code_4() {
    cmd()
        .args([
            "compile",
            "--dialect",
            "postgresql",
            "--table",
            "users",
            "--operation",
            "delete",
        ])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("at least one filter"));
}

#[test]
fn test_compile_unsupported_operator_exits_with_code_4() {
    cmd()
        .args([
            "compile",
            "--dialect",
            "postgresql",
            "--table",
            "users",
            "--param",
            "tags=cs.{a,b}",
        ])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("'cs'"));
}

// =============================================================================
// Exit Code Tests - Config Errors (Exit Code 2)
// =============================================================================

#[test]
fn test_compile_unknown_dialect_exits_with_code_2() {
    cmd()
        .args(["compile", "--dialect", "oracle", "--table", "users"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("oracle"));
}

#[test]
fn test_param_without_equals_is_rejected() {
    cmd()
        .args([
            "compile",
            "--dialect",
            "postgresql",
            "--table",
            "users",
            "--param",
            "novalue",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no `=` found"));
}

#[test]
fn test_missing_config_exits_with_code_2() {
    cmd()
        .args(["--config", "nonexistent_config_file.yaml", "health-check"])
        .assert()
        .code(2);
}

#[test]
fn test_invalid_yaml_exits_with_code_2() {
    let file = config_file("invalid: yaml: content: [\n");

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(2);
}

#[test]
fn test_missing_required_fields_exits_with_code_2() {
    let file = config_file("provider: postgresql\nconnection:\n  host: localhost\n  database: \"\"\n  user: app\n");

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("connection.database"));
}

#[test]
fn test_unknown_provider_exits_with_code_2() {
    let file = config_file(
        "provider: oracle\nconnection:\n  host: localhost\n  database: app\n  user: app\n",
    );

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "introspect"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Known providers"));
}
