use std::time::Duration;

use serial_test::serial;
use tempfile::TempDir;
use partkit::config::{AppConfig, ErrorPolicy, CONFIG_FILE};
use partkit::disk::LabelKind;

struct InDir {
    prev: std::path::PathBuf,
    _temp: TempDir,
}

impl InDir {
    fn new() -> Self {
        let temp = TempDir::new().expect("temp dir");
        let prev = std::env::current_dir().expect("cwd");
        std::env::set_current_dir(temp.path()).expect("chdir");
        Self { prev, _temp: temp }
    }
}

impl Drop for InDir {
    fn drop(&mut self) {
        let _ = std::env::set_current_dir(&self.prev);
    }
}

#[test]
#[serial]
fn generate_config_refuses_overwrite() {
    let _dir = InDir::new();
    AppConfig::generate_config_file(false).expect("generate");
    assert!(AppConfig::generate_config_file(false).is_err());
    AppConfig::generate_config_file(true).expect("force");

    let config = AppConfig::load_from_file(CONFIG_FILE).expect("load");
    let disk = config.disk.expect("disk section");
    assert_eq!(disk.label, Some(LabelKind::Gpt));
    assert_eq!(disk.align.as_deref(), Some("1M"));
}

#[test]
#[serial]
fn load_partial_config() {
    let _dir = InDir::new();
    std::fs::write(
        CONFIG_FILE,
        "[disk]\nlabel = \"dos\"\nretry_attempts = 5\nretry_delay = \"1s\"\non_error = \"ignore\"\n",
    )
    .expect("write");

    let config = AppConfig::load_from_file(CONFIG_FILE).expect("load");
    let disk = config.disk.expect("disk section");
    assert_eq!(disk.label, Some(LabelKind::Dos));
    assert_eq!(disk.on_error, Some(ErrorPolicy::Ignore));
    let retry = disk.retry_policy();
    assert_eq!(retry.attempts, 5);
    assert_eq!(retry.delay, Duration::from_secs(1));
}

#[test]
#[serial]
fn load_rejects_bad_values() {
    let _dir = InDir::new();
    std::fs::write(CONFIG_FILE, "[disk]\nlabel = \"sun\"\n").expect("write");
    assert!(AppConfig::load_from_file(CONFIG_FILE).is_err());
}
