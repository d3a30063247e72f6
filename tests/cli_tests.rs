//! CLI integration tests for the `assetflow` binary.
//!
//! Every test runs inside its own project directory with an explicit
//! assetflow.toml so the upward config search never escapes the fixture.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn project(config: &str) -> TempDir {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("assetflow.toml"), config).unwrap();
    temp
}

fn run(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_assetflow"))
        .args(args)
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute assetflow")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

#[test]
fn test_list_tasks() {
    let temp = project("");
    let output = run(temp.path(), &["--list"]);
    assert!(output.status.success(), "{}", stderr(&output));

    let out = stdout(&output);
    for name in ["default", "styles", "styles:watch", "images", "scripts", "html", "sassToDist", "sass:watch"] {
        assert!(out.lines().any(|l| l.split_whitespace().next() == Some(name)), "missing {name} in:\n{out}");
    }
}

#[test]
fn test_unknown_task_exit_code() {
    let temp = project("");
    let output = run(temp.path(), &["nope"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("unknown task 'nope'"));
}

#[test]
fn test_invalid_config_exit_code() {
    let temp = project("[watch]\ndebounce_ms = 0\n");
    let output = run(temp.path(), &["styles"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("watch.debounce_ms"));
}

#[test]
fn test_styles_run() {
    let temp = project("[styles]\nbrowsers = [\"chrome 100\"]\n");
    fs::create_dir_all(temp.path().join("src/sass")).unwrap();
    fs::write(temp.path().join("src/sass/site.scss"), "$c: #fff;\nbody { color: $c; }\n").unwrap();

    let output = run(temp.path(), &["styles"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stdout(&output).contains("Task 'styles' succeeded"));
    assert!(temp.path().join("dist/css/site.css").is_file());
    assert!(temp.path().join("dist/css/site.css.map").is_file());
}

#[test]
fn test_dest_override_and_failure_exit() {
    let temp = project("");
    fs::create_dir_all(temp.path().join("src/sass")).unwrap();
    fs::write(temp.path().join("src/sass/ok.scss"), ".ok { color: red; }\n").unwrap();
    fs::write(temp.path().join("src/sass/broken.scss"), ".broken {\n").unwrap();

    let output = run(temp.path(), &["sassToDist", "--dest", "public"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("broken.scss"));
    assert!(temp.path().join("public/css/ok.css").is_file());
    assert!(!temp.path().join("dist").exists());
}

#[test]
fn test_explicit_config_path() {
    let temp = TempDir::new().unwrap();
    let site = temp.path().join("site");
    fs::create_dir_all(site.join("assets/js")).unwrap();
    fs::write(site.join("build.toml"), "[scripts]\nsrc = \"assets/js\"\nbundle = \"app.js\"\n").unwrap();
    fs::write(site.join("assets/js/main.js"), "let ready = true;\n").unwrap();

    let output = run(temp.path(), &["scripts", "--config", "site/build.toml"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let bundle = fs::read_to_string(site.join("dist/js/app.js")).unwrap();
    assert!(bundle.starts_with("var ready=true;\n"));
}
