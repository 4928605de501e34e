//! CLI tests for the `pl` binary

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Writes a config pointing views and cache into `root`
fn setup(root: &Path) -> std::path::PathBuf {
    let views = root.join("views");
    fs::create_dir_all(views.join("layouts")).expect("Failed to create views");
    fs::write(views.join("hello.plate.html"), "Hello {{ name }}! @if($vip) VIP @endif").expect("write");
    fs::write(views.join("layouts/base.plate.html"), "<body>\n  @yield('body')\n</body>").expect("write");

    let config = root.join("plates.yml");
    fs::write(
        &config,
        format!(
            "views-path: {}\ncache-path: {}\n",
            views.display(),
            root.join("cache").display()
        ),
    )
    .expect("Failed to write config");
    config
}

fn pl(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("pl").expect("Failed to find pl binary");
    cmd.arg("--config").arg(config);
    cmd
}

#[test]
fn test_render_with_json_data() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let config = setup(temp.path());

    pl(&config)
        .args(["render", "hello", "--data", r#"{"name": "Ada", "vip": true}"#])
        .assert()
        .success()
        .stdout("Hello Ada! VIP");
}

#[test]
fn test_render_with_yaml_data_file() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let config = setup(temp.path());
    let data = temp.path().join("data.yml");
    fs::write(&data, "name: Grace\nvip: false\n").expect("write");

    pl(&config)
        .args(["render", "hello", "--data-file"])
        .arg(&data)
        .assert()
        .success()
        .stdout("Hello Grace! ");
}

#[test]
fn test_render_missing_template_fails() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let config = setup(temp.path());

    pl(&config)
        .args(["render", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Template not found: nope"));
}

#[test]
fn test_compile_prints_script() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let config = setup(temp.path());

    pl(&config)
        .args(["compile", "hello"])
        .assert()
        .success()
        .stdout("Hello <%= name %>! <% if ($vip): %>VIP<% endif; %>");
}

#[test]
fn test_check_reports_broken_templates() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let config = setup(temp.path());

    pl(&config)
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("layouts.base").and(predicate::str::contains("2 templates ok")));

    fs::write(temp.path().join("views/broken.plate.html"), "@if($x) never closed").expect("write");
    pl(&config)
        .arg("check")
        .assert()
        .failure()
        .stdout(predicate::str::contains("broken"));
}

#[test]
fn test_purge_all() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let config = setup(temp.path());

    pl(&config).args(["compile", "hello"]).assert().success();
    pl(&config)
        .arg("purge")
        .assert()
        .success()
        .stdout(predicate::str::contains("Purged all"));
}

#[test]
fn test_minify_stdin() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let config = setup(temp.path());

    pl(&config)
        .arg("minify")
        .write_stdin("<ul>\n  <li>a</li>\n  <!-- gone -->\n</ul>")
        .assert()
        .success()
        .stdout("<ul><li>a</li></ul>");
}
