use datarepo_core::config::{ConfigError, ConfigValue, DataConfig, DataSettings, StorageKind, PROFILE_ENV};
use serial_test::serial;

fn clear_env() {
    for var in ["DATA_BACKEND", "DATA_URL", "DATA_MAX_PAGE_SIZE", "DATA_DEFAULT_PAGE_SIZE", PROFILE_ENV, "DATAREPO_TEST_DB"] {
        unsafe { std::env::remove_var(var) };
    }
}

#[test]
fn empty_config_has_no_keys() {
    let config = DataConfig::empty();
    assert!(matches!(config.get::<String>("data.url"), Err(ConfigError::NotFound(_))));
    assert_eq!(config.get_or("data.max_page_size", 2000u64).unwrap(), 2000);
}

#[test]
fn set_and_get_converts_types() {
    let mut config = DataConfig::empty();
    config.set("data.max_connections", ConfigValue::String("8".into()));
    config.set("data.url", ConfigValue::Null);
    assert_eq!(config.get::<u32>("data.max_connections").unwrap(), 8);
    assert_eq!(config.get::<Option<String>>("data.url").unwrap(), None);
    assert!(config.get::<bool>("data.max_connections").is_err());
}

#[test]
fn settings_default_to_memory() {
    let settings = DataConfig::empty().with_typed::<DataSettings>().unwrap();
    assert_eq!(settings.backend, StorageKind::Memory);
    assert_eq!(settings.default_page_size, 20);
    assert_eq!(settings.max_page_size, 2000);
}

#[test]
fn settings_from_yaml() {
    let yaml = r#"
data:
  backend: sqlite
  url: "sqlite::memory:"
  max_connections: 2
  max_page_size: 50
"#;
    let config = DataConfig::from_yaml_str(yaml, "test")
        .unwrap()
        .with_typed::<DataSettings>()
        .unwrap();
    assert_eq!(config.backend, StorageKind::Sqlite);
    assert_eq!(config.url.as_deref(), Some("sqlite::memory:"));
    assert_eq!(config.max_connections, 2);
    assert_eq!(config.max_page_size, 50);
    assert_eq!(config.profile(), "test");
}

#[test]
fn sqlite_without_url_is_rejected() {
    let err = DataConfig::from_yaml_str("data:\n  backend: sqlite\n", "test")
        .unwrap()
        .with_typed::<DataSettings>()
        .unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "data.url"), "{err}");
}

#[test]
fn unknown_backend_is_rejected() {
    let err = DataConfig::from_yaml_str("data:\n  backend: oracle\n", "test")
        .unwrap()
        .with_typed::<DataSettings>()
        .unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { .. }), "{err}");
}

#[test]
#[serial]
fn profile_file_and_env_overlay() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("application.yaml"),
        "data:\n  backend: memory\n  max_page_size: 100\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("application-prod.yaml"),
        "data:\n  backend: sqlite\n  url: \"${DATAREPO_TEST_DB}\"\n",
    )
    .unwrap();
    std::fs::write(dir.path().join(".env.prod"), "DATAREPO_TEST_DB=sqlite://prod.db\n").unwrap();

    let config = DataConfig::load_from(dir.path(), "prod")
        .unwrap()
        .with_typed::<DataSettings>()
        .unwrap();
    assert_eq!(config.profile(), "prod");
    assert_eq!(config.backend, StorageKind::Sqlite);
    assert_eq!(config.url.as_deref(), Some("sqlite://prod.db"));
    assert_eq!(config.max_page_size, 100);

    unsafe { std::env::set_var("DATA_BACKEND", "memory") };
    unsafe { std::env::set_var("DATA_MAX_PAGE_SIZE", "10") };
    unsafe { std::env::set_var("DATA_DEFAULT_PAGE_SIZE", "5") };
    let overridden = DataConfig::load_from(dir.path(), "prod")
        .unwrap()
        .with_typed::<DataSettings>()
        .unwrap();
    assert_eq!(overridden.backend, StorageKind::Memory);
    assert_eq!(overridden.max_page_size, 10);
    assert_eq!(overridden.default_page_size, 5);
    clear_env();
}

#[test]
#[serial]
fn overlay_is_validated_against_the_section() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    unsafe { std::env::set_var("DATA_MAX_PAGE_SIZE", "10") };
    let err = DataConfig::load_from(dir.path(), "dev")
        .unwrap()
        .with_typed::<DataSettings>()
        .unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "data.default_page_size"), "{err}");
    clear_env();
}

#[test]
#[serial]
fn profile_env_var_wins_over_argument() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("application-staging.yaml"), "data:\n  max_connections: 3\n").unwrap();
    unsafe { std::env::set_var(PROFILE_ENV, "staging") };
    let config = DataConfig::load_from(dir.path(), "dev").unwrap();
    assert_eq!(config.profile(), "staging");
    assert_eq!(config.get::<u32>("data.max_connections").unwrap(), 3);
    clear_env();
}
