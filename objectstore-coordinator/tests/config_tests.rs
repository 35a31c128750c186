use objectstore_coordinator::{CoordinatorConfig, CoordinatorError, DEFAULT_REQUEST_TIMEOUT_MS};
use pretty_assertions::assert_eq;
use std::io::Write;
use std::time::Duration;

#[test]
fn defaults() {
    let config = CoordinatorConfig::default();
    assert!(config.app_name.is_empty());
    assert_eq!(config.request_timeout_ms, DEFAULT_REQUEST_TIMEOUT_MS);
    assert_eq!(config.request_timeout(), Duration::from_secs(5));
    assert_eq!(config.task_loop_period(), Duration::from_millis(10));
    assert_eq!(config.observe_retry_limit, 3);
}

#[test]
fn missing_fields_take_defaults() {
    let config = CoordinatorConfig::from_json(r#"{"app_name": "notes"}"#).unwrap();
    assert_eq!(config, CoordinatorConfig::for_app("notes"));
}

#[test]
fn loads_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"app_name": "notes", "request_timeout_ms": 250, "observe_retry_limit": 5}}"#
    )
    .unwrap();

    let json = std::fs::read_to_string(file.path()).unwrap();
    let config = CoordinatorConfig::from_json(&json).unwrap();
    assert_eq!(config.app_name, "notes");
    assert_eq!(config.request_timeout(), Duration::from_millis(250));
    assert_eq!(config.observe_retry_limit, 5);
    assert_eq!(config.task_loop_period_ms, 10);
}

#[test]
fn invalid_json_is_an_invalid_argument() {
    let err = CoordinatorConfig::from_json("{ not json").unwrap_err();
    assert!(matches!(err, CoordinatorError::InvalidArgument(_)));
}

#[test]
fn wrong_field_type_is_rejected() {
    assert!(CoordinatorConfig::from_json(r#"{"request_timeout_ms": "soon"}"#).is_err());
}
