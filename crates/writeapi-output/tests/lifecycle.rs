use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use writeapi_output::{
    FaultPoint, FlushOutcome, MemoryWriteService, PluginStatus, RemoteError, RemoteErrorKind,
    SessionError, WriteApiOutput,
};
use writeapi_rows::{
    EventTime, FieldMode, FieldType, RawRecord, RawValue, TableFieldSchema, TableSchema, encode_events,
};

const LOGS: &str = "projects/proj/datasets/ds/tables/logs";
const AUDIT: &str = "projects/proj/datasets/ds/tables/audit";

fn log_schema() -> TableSchema {
    TableSchema::new(vec![
        TableFieldSchema::nullable("Time", FieldType::String),
        TableFieldSchema::nullable("Text", FieldType::String),
    ])
}

fn service() -> MemoryWriteService {
    MemoryWriteService::new()
        .with_table(LOGS, log_schema())
        .with_table(
            AUDIT,
            TableSchema::new(vec![
                TableFieldSchema::required("Text", FieldType::String),
                TableFieldSchema::nullable("seq", FieldType::Int64),
                TableFieldSchema::record(
                    "payload",
                    FieldMode::Nullable,
                    vec![TableFieldSchema::nullable("level", FieldType::String)],
                ),
            ]),
        )
}

fn config(id: &str, table: &str) -> HashMap<String, String> {
    [
        ("OutputID", id),
        ("ProjectID", "proj"),
        ("DatasetID", "ds"),
        ("TableID", table),
        ("EnableRetries", "false"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn event(fields: Vec<(&str, RawValue)>) -> RawRecord {
    RawRecord::new(
        EventTime::new(1_704_067_200, 0),
        fields
            .into_iter()
            .map(|(k, v)| (RawValue::from(k), v))
            .collect(),
    )
}

fn buffer(records: &[RawRecord]) -> Vec<u8> {
    encode_events(records).unwrap()
}

#[tokio::test]
async fn end_to_end_single_instance() {
    let service = service();
    let output = WriteApiOutput::new(Arc::new(service.clone()));

    assert_eq!(output.init(&config("inst-1", "logs")).await, PluginStatus::Ok);
    let data = buffer(&[event(vec![
        ("Time", RawValue::from("2024-01-01T00:00:00Z")),
        ("Text", RawValue::from("hello")),
    ])]);

    assert_eq!(output.flush("inst-1", &data).await, PluginStatus::Ok);
    assert_eq!(service.rows(LOGS).len(), 1);
    assert_eq!(service.batches(LOGS), 1);
    assert_eq!(
        service.decoded_rows(LOGS),
        vec![json!({"Time": "2024-01-01T00:00:00Z", "Text": "hello"})]
    );

    assert_eq!(output.exit("inst-1").await, PluginStatus::Ok);
    assert_eq!(service.open_handles(), 0);
    assert_eq!(output.try_flush("inst-1", &data).await.unwrap(), FlushOutcome::NoSession);
    assert_eq!(output.flush("inst-1", &data).await, PluginStatus::Ok);
    assert_eq!(service.rows(LOGS).len(), 1);
}

#[tokio::test]
async fn unknown_instances_are_no_ops() {
    let service = service();
    let output = WriteApiOutput::new(Arc::new(service.clone()));
    let data = buffer(&[event(vec![("Text", RawValue::from("x"))])]);

    assert_eq!(output.flush("ghost", &data).await, PluginStatus::Ok);
    assert_eq!(output.exit("ghost").await, PluginStatus::Ok);
    assert_eq!(service.connects(), 0);
    assert!(service.rows(LOGS).is_empty());
}

#[tokio::test]
async fn nested_bytes_arrive_as_nested_text() {
    let service = service();
    let output = WriteApiOutput::new(Arc::new(service.clone()));
    assert_eq!(output.init(&config("audit", "audit")).await, PluginStatus::Ok);

    let data = buffer(&[event(vec![
        ("Text", RawValue::Bytes(b"login".to_vec())),
        ("seq", RawValue::UInt(7)),
        (
            "payload",
            RawValue::map([("level", RawValue::Bytes(b"warn".to_vec()))]),
        ),
    ])]);
    assert_eq!(output.flush("audit", &data).await, PluginStatus::Ok);
    assert_eq!(
        service.decoded_rows(AUDIT),
        vec![json!({"Text": "login", "seq": 7, "payload": {"level": "warn"}})]
    );
}

#[tokio::test]
async fn rejected_record_drops_the_whole_batch() {
    let service = service();
    let output = WriteApiOutput::new(Arc::new(service.clone()));
    output.init(&config("audit", "audit")).await;

    let good = event(vec![("Text", RawValue::from("ok"))]);
    let unknown_field = event(vec![("Text", RawValue::from("x")), ("extra", RawValue::from("y"))]);
    let wrong_type = event(vec![("Text", RawValue::from("x")), ("seq", RawValue::from("seven"))]);
    let missing_required = event(vec![("seq", RawValue::Int(1))]);

    for bad in [unknown_field, wrong_type, missing_required] {
        let err = output
            .flush_records("audit", vec![good.clone(), bad])
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Encode { index: 1, .. }), "{err}");
    }
    assert!(service.rows(AUDIT).is_empty());

    // The session survives a failed flush.
    let outcome = output.flush_records("audit", vec![good]).await.unwrap();
    assert!(matches!(outcome, FlushOutcome::Appended(_)));
    assert_eq!(service.rows(AUDIT).len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_instances_stay_isolated() {
    let service = service();
    let output = Arc::new(WriteApiOutput::new(Arc::new(service.clone())));
    assert_eq!(output.init(&config("a", "logs")).await, PluginStatus::Ok);
    assert_eq!(output.init(&config("b", "audit")).await, PluginStatus::Ok);

    let mut tasks = Vec::new();
    for i in 0..20 {
        let output = Arc::clone(&output);
        tasks.push(tokio::spawn(async move {
            let (id, data) = if i % 2 == 0 {
                ("a", buffer(&[event(vec![("Text", RawValue::from(format!("a-{i}")))])]))
            } else {
                ("b", buffer(&[event(vec![("Text", RawValue::from(format!("b-{i}")))])]))
            };
            output.flush(id, &data).await
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), PluginStatus::Ok);
    }

    let logs = service.decoded_rows(LOGS);
    let audit = service.decoded_rows(AUDIT);
    assert_eq!(logs.len(), 10);
    assert_eq!(audit.len(), 10);
    assert!(logs.iter().all(|row| row["Text"].as_str().unwrap().starts_with("a-")));
    assert!(audit.iter().all(|row| row["Text"].as_str().unwrap().starts_with("b-")));
}

#[tokio::test]
async fn double_init_closes_the_prior_session() {
    let service = service();
    let output = WriteApiOutput::new(Arc::new(service.clone()));
    assert_eq!(output.init(&config("x", "logs")).await, PluginStatus::Ok);
    assert_eq!(output.init(&config("x", "audit")).await, PluginStatus::Ok);

    assert_eq!(output.registry().len(), 1);
    assert_eq!(service.open_handles(), 1);

    let data = buffer(&[event(vec![("Text", RawValue::from("after"))])]);
    assert_eq!(output.flush("x", &data).await, PluginStatus::Ok);
    assert!(service.rows(LOGS).is_empty());
    assert_eq!(service.rows(AUDIT).len(), 1);
}

#[tokio::test]
async fn failed_init_leaves_no_session() {
    let service = service();
    let output = WriteApiOutput::new(Arc::new(service.clone()));

    assert_eq!(output.init(&config("missing", "nope")).await, PluginStatus::Error);
    assert!(!output.registry().contains("missing"));

    service.inject_fault(
        FaultPoint::OpenAppend,
        RemoteError::new(RemoteErrorKind::PermissionDenied, "denied"),
    );
    assert_eq!(output.init(&config("denied", "logs")).await, PluginStatus::Error);
    assert!(output.registry().is_empty());
    assert_eq!(service.open_handles(), 0);

    let data = buffer(&[event(vec![("Text", RawValue::from("x"))])]);
    assert_eq!(output.flush("denied", &data).await, PluginStatus::Ok);
    assert_eq!(output.exit("denied").await, PluginStatus::Ok);
}

#[tokio::test]
async fn append_failures_fail_only_that_flush() {
    let service = service();
    let output = WriteApiOutput::new(Arc::new(service.clone()));
    output.init(&config("a", "logs")).await;
    let data = buffer(&[event(vec![("Text", RawValue::from("x"))])]);

    service.inject_fault(FaultPoint::Submit, RemoteError::new(RemoteErrorKind::Unavailable, "down"));
    assert!(matches!(
        output.try_flush("a", &data).await.unwrap_err(),
        SessionError::Append(_)
    ));

    service.inject_fault(FaultPoint::Ack, RemoteError::new(RemoteErrorKind::Internal, "lost"));
    assert_eq!(output.flush("a", &data).await, PluginStatus::Error);
    assert!(service.rows(LOGS).is_empty());

    assert_eq!(output.flush("a", &data).await, PluginStatus::Ok);
    assert_eq!(service.rows(LOGS).len(), 1);
}

#[tokio::test]
async fn unregister_closes_everything() {
    let service = service();
    let output = WriteApiOutput::new(Arc::new(service.clone()));
    output.init(&config("a", "logs")).await;
    output.init(&config("b", "audit")).await;

    assert_eq!(output.unregister().await, PluginStatus::Ok);
    assert!(output.registry().is_empty());
    assert_eq!(service.open_handles(), 0);
    assert_eq!(service.client_closes(), 1);
}
