use objectstore_coordinator::CoordinatorConfig;
use objectstore_mesh::{run, ScenarioOptions, ScenarioReport};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn three_devices_write_and_observe() {
    let report = run(&ScenarioOptions::default()).await.unwrap();
    assert_eq!(report.key, "dataobject://device-1/0/bundle/store/f");
    assert_eq!(report.owner, "device-1");
    assert_eq!(report.writer, "device-3");
    assert_eq!(report.observer.as_deref(), Some("device-2"));
    assert_eq!(report.value.get("name").map(String::as_str), Some("zhangsan"));
    assert_eq!(report.traffic.get("PutRequest"), Some(&1));
    assert_eq!(report.traffic.get("PublishRequest"), Some(&1));
}

#[tokio::test]
async fn two_devices_skip_observation() {
    let options = ScenarioOptions {
        devices: 2,
        ..ScenarioOptions::default()
    };
    let report = run(&options).await.unwrap();
    assert_eq!(report.observer, None);
    assert_eq!(report.writer, "device-2");
    assert!(!report.traffic.contains_key("ObserveRequest"));
}

#[tokio::test]
async fn single_device_is_rejected() {
    let options = ScenarioOptions {
        devices: 1,
        ..ScenarioOptions::default()
    };
    let err = run(&options).await.unwrap_err();
    assert!(err.to_string().contains("at least two devices"));
}

#[tokio::test]
async fn missing_app_name_fails_startup() {
    let options = ScenarioOptions {
        config: CoordinatorConfig::default(),
        ..ScenarioOptions::default()
    };
    let err = run(&options).await.unwrap_err();
    assert!(err.to_string().contains("failed to start"));
}

#[test]
fn report_serializes_to_json() {
    let report = ScenarioReport {
        key: "k".into(),
        owner: "device-1".into(),
        writer: "device-2".into(),
        observer: None,
        value: [("name".to_string(), "zhangsan".to_string())].into(),
        traffic: [("PutRequest".to_string(), 1)].into(),
    };
    let json = serde_json::to_string(&report).unwrap();
    let back: ScenarioReport = serde_json::from_str(&json).unwrap();
    assert_eq!(back, report);
}
