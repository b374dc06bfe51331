use std::ffi::OsString;
use std::fs;

use kagura_config::Config;
use ortho_config::OrthoConfig;
use tempfile::TempDir;

#[test]
fn malformed_config_file_fails_loading() {
    let temp_dir = TempDir::new().expect("create temp dir");
    let path = temp_dir.path().join("kagura.toml");
    fs::write(&path, "max_log_bytes = \"not a number\"\n").expect("write malformed config");

    let args = vec![
        OsString::from("kagura"),
        OsString::from("--config-path"),
        path.into_os_string(),
    ];

    let error = Config::load_from_iter(args).expect_err("loading must fail");
    assert!(
        !error.to_string().is_empty(),
        "expected a descriptive configuration error"
    );
}

#[test]
fn file_values_override_defaults() {
    let temp_dir = TempDir::new().expect("create temp dir");
    let path = temp_dir.path().join("kagura.toml");
    fs::write(
        &path,
        "max_log_bytes = 1024\nsession_store = true\nlog_format = \"json\"\n",
    )
    .expect("write config");

    let args = vec![
        OsString::from("kagura"),
        OsString::from("--config-path"),
        path.into_os_string(),
    ];

    let config = Config::load_from_iter(args).expect("config loads");
    assert_eq!(config.max_log_bytes(), 1024);
    assert!(config.session_store());
    assert_eq!(config.log_format(), kagura_config::LogFormat::Json);
}
