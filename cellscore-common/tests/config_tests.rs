//! Integration tests for configuration loading and resolution
//!
//! Covers:
//! - work_dir joining and trailing slash handling
//! - `{date}` / `{models}` substitution with `{source}` preserved
//! - data source glob expansion, including descent to directories with `fakes/`
//! - config file lookup priority
//!
//! Tests that change the process working directory are marked #[serial].

use cellscore_common::config::{
    expand_source_template, resolve_config_path, ActivationConfig, IdStrategy, ResizePolicy,
    UnclassifiedPolicy, DEFAULT_TABLE_VARIABLE,
};
use chrono::NaiveDate;
use serial_test::serial;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn make_source(root: &Path, rel: &str) {
    fs::create_dir_all(root.join(rel).join("fakes")).unwrap();
    fs::create_dir_all(root.join(rel).join("cells")).unwrap();
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2022, 7, 3).unwrap()
}

#[test]
fn test_full_config_resolution() {
    let temp = TempDir::new().unwrap();
    make_source(temp.path(), "Labeled/pos1");
    make_source(temp.path(), "Labeled/pos2");

    // work_dir without trailing slash
    let content = format!(
        r#"
[activation]
work_dir = "{}"
data_sources = ["Labeled/*/"]
output_format = "{{source}}/Inference/{{date}}_{{models}}.csv"
model = "models/scorer.json"
stretch_level = 1
flag_unclassified = "unlabeled"
id_strategy = "pairing"

[logging]
level = "debug"
"#,
        temp.path().display()
    );

    let config = ActivationConfig::from_toml_str(&content, today()).unwrap();

    assert_eq!(config.sources.len(), 2);
    assert!(config.sources[0].ends_with("Labeled/pos1"));
    assert!(config.sources[1].ends_with("Labeled/pos2"));
    assert_eq!(config.out_path, "{source}/Inference/2022_07_03_L.csv");
    assert_eq!(
        config.model_path,
        temp.path().join("models/scorer.json")
    );
    assert_eq!(config.resize_policy, ResizePolicy::ScaleThenPad);
    assert_eq!(config.unclassified, UnclassifiedPolicy::Unlabeled);
    assert_eq!(config.id_strategy, IdStrategy::Pairing);
    assert_eq!(config.table_variable, DEFAULT_TABLE_VARIABLE);
    assert_eq!(config.logging.level, "debug");
}

#[test]
fn test_defaults_when_optional_keys_missing() {
    let temp = TempDir::new().unwrap();
    make_source(temp.path(), "pos1");

    let content = format!(
        r#"
[activation]
work_dir = "{}/"
data_sources = ["pos1"]
model = "/abs/model.json"
"#,
        temp.path().display()
    );

    let config = ActivationConfig::from_toml_str(&content, today()).unwrap();

    assert_eq!(config.resize_policy, ResizePolicy::PadCenter);
    assert_eq!(config.unclassified, UnclassifiedPolicy::Positive);
    assert_eq!(config.id_strategy, IdStrategy::Direct);
    assert_eq!(config.model_path, Path::new("/abs/model.json"));
    assert_eq!(
        config.out_path,
        format!("{}/Inference/2022_07_03_P1", temp.path().display())
    );
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_invalid_stretch_level_is_config_error() {
    let content = r#"
[activation]
work_dir = "/tmp"
data_sources = []
model = "m.json"
stretch_level = 7
"#;

    let err = ActivationConfig::from_toml_str(content, today()).unwrap_err();
    assert!(err.to_string().contains("Configuration error"));
}

#[test]
fn test_missing_activation_section_is_error() {
    let err = ActivationConfig::from_toml_str("[logging]\nlevel = \"info\"\n", today()).unwrap_err();
    assert!(err.to_string().contains("Parse TOML failed"));
}

#[test]
fn test_template_descends_until_fakes_found() {
    let temp = TempDir::new().unwrap();
    make_source(temp.path(), "movie/pos1/Cells");
    make_source(temp.path(), "movie/pos2/Cells");

    let template = format!("{}/movie", temp.path().display());
    let sources = expand_source_template(&template).unwrap();

    assert_eq!(sources.len(), 2);
    assert!(sources[0].ends_with("pos1/Cells"));
    assert!(sources[1].ends_with("pos2/Cells"));
}

#[test]
fn test_template_without_matches_is_skipped() {
    let temp = TempDir::new().unwrap();
    let template = format!("{}/does_not_exist/*", temp.path().display());
    let sources = expand_source_template(&template).unwrap();
    assert!(sources.is_empty());
}

#[test]
fn test_cli_config_path_wins() {
    let path = resolve_config_path(Some(Path::new("/somewhere/custom.toml"))).unwrap();
    assert_eq!(path, Path::new("/somewhere/custom.toml"));
}

#[test]
#[serial]
fn test_local_config_path_used_when_present() {
    let temp = TempDir::new().unwrap();
    fs::create_dir_all(temp.path().join("cfg")).unwrap();
    fs::write(temp.path().join("cfg/config.toml"), "").unwrap();

    let previous = std::env::current_dir().unwrap();
    std::env::set_current_dir(temp.path()).unwrap();
    let resolved = resolve_config_path(None);
    std::env::set_current_dir(previous).unwrap();

    assert_eq!(resolved.unwrap(), Path::new("cfg/config.toml"));
}

#[test]
fn test_load_reads_file() {
    let temp = TempDir::new().unwrap();
    make_source(temp.path(), "pos1");
    let config_path = temp.path().join("config.toml");
    fs::write(
        &config_path,
        format!(
            "[activation]\nwork_dir = \"{}\"\ndata_sources = [\"pos1\"]\nmodel = \"m.json\"\n",
            temp.path().display()
        ),
    )
    .unwrap();

    let config = ActivationConfig::load(&config_path).unwrap();
    assert_eq!(config.sources.len(), 1);
}

#[test]
fn test_load_missing_file_is_config_error() {
    let err = ActivationConfig::load(Path::new("/nonexistent/config.toml")).unwrap_err();
    assert!(err.to_string().contains("Read /nonexistent/config.toml failed"));
}
