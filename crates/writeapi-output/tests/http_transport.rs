#![cfg(feature = "transport-http")]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use writeapi_output::remote::HttpConnector;
use writeapi_output::{AppendHandle, ClientConnector, RemoteErrorKind, WriteClient, WriteStreamView};
use writeapi_rows::{
    FieldType, RawValue, RowDescriptor, TableFieldSchema, TableSchema, encode_row, normalize_record,
};

const STREAM: &str = "projects/p/datasets/d/tables/t/streams/_default";

struct CapturedRequest {
    head: String,
    body: Vec<u8>,
}

impl CapturedRequest {
    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

/// Serve one request with a canned response and hand the request back to the test.
async fn start_test_server(
    status_line: &'static str,
    body: String,
) -> (SocketAddr, oneshot::Receiver<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        if let Ok((mut stream, _)) = listener.accept().await {
            let request = read_request(&mut stream).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
            let _ = tx.send(request);
        }
    });
    (addr, rx)
}

async fn read_request(stream: &mut tokio::net::TcpStream) -> CapturedRequest {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            break buf.len();
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
    let content_length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    CapturedRequest {
        head,
        body: buf[header_end..].to_vec(),
    }
}

async fn loopback_available() -> bool {
    TcpListener::bind("127.0.0.1:0").await.is_ok()
}

fn connector(addr: SocketAddr, token: Option<&str>) -> HttpConnector {
    HttpConnector::new(
        &format!("http://{addr}"),
        token.map(str::to_string),
        Duration::from_secs(5),
    )
    .unwrap()
}

fn descriptor() -> RowDescriptor {
    RowDescriptor::compile(&TableSchema::new(vec![TableFieldSchema::nullable(
        "Text",
        FieldType::String,
    )]))
    .unwrap()
}

#[tokio::test]
async fn fetches_full_write_stream_with_bearer_token() {
    if !loopback_available().await {
        eprintln!("skipping fetches_full_write_stream_with_bearer_token: loopback bind not permitted");
        return;
    }
    let body = serde_json::json!({
        "name": STREAM,
        "type": "COMMITTED",
        "tableSchema": {"fields": [
            {"name": "Time", "type": "TIMESTAMP"},
            {"name": "Text", "type": "STRING", "mode": "REQUIRED"}
        ]}
    })
    .to_string();
    let (addr, request) = start_test_server("200 OK", body).await;

    let client = connector(addr, Some("secret")).connect("p").await.unwrap();
    let stream = client.get_write_stream(STREAM, WriteStreamView::Full).await.unwrap();
    let schema = stream.table_schema.unwrap();
    assert_eq!(schema.fields.len(), 2);
    assert_eq!(schema.fields[1].field_type, FieldType::String);

    let request = request.await.unwrap();
    assert!(request.head.starts_with(&format!("get /v1/{STREAM}?view=full")));
    assert!(request.head.contains("authorization: bearer secret"));
}

#[tokio::test]
async fn appends_rows_as_base64_with_writer_schema() {
    if !loopback_available().await {
        eprintln!("skipping appends_rows_as_base64_with_writer_schema: loopback bind not permitted");
        return;
    }
    let (addr, request) =
        start_test_server("200 OK", r#"{"appendResult":{"offset":"12"}}"#.to_string()).await;
    let descriptor = descriptor();
    let row = encode_row(
        &descriptor,
        &normalize_record(vec![(RawValue::from("Text"), RawValue::from("hello"))]),
    )
    .unwrap();

    let client = connector(addr, None).connect("p").await.unwrap();
    let handle = client.open_append(STREAM, descriptor.proto()).await.unwrap();
    let ack = handle
        .append_rows(vec![row.clone()])
        .await
        .unwrap()
        .result()
        .await
        .unwrap();
    assert_eq!(ack.offset, Some(12));
    assert_eq!(ack.row_count, 1);

    let request = request.await.unwrap();
    assert!(request.head.starts_with(&format!("post /v1/{STREAM}:appendrows")));
    assert!(!request.head.contains("authorization:"));
    let body = request.json();
    assert_eq!(body["writeStream"], STREAM);
    assert_eq!(
        body["protoRows"]["writerSchema"]["protoDescriptor"]["field"][0]["name"],
        "Text"
    );
    let sent = body["protoRows"]["rows"]["serializedRows"][0].as_str().unwrap();
    assert_eq!(BASE64.decode(sent).unwrap(), row);
}

#[tokio::test]
async fn http_status_maps_to_error_kind() {
    if !loopback_available().await {
        eprintln!("skipping http_status_maps_to_error_kind: loopback bind not permitted");
        return;
    }
    let body = r#"{"error":{"code":404,"message":"Table not found","status":"NOT_FOUND"}}"#.to_string();
    let (addr, _request) = start_test_server("404 Not Found", body).await;

    let client = connector(addr, None).connect("p").await.unwrap();
    let err = client
        .get_write_stream(STREAM, WriteStreamView::Full)
        .await
        .unwrap_err();
    assert_eq!(err.kind, RemoteErrorKind::NotFound);
    assert_eq!(err.message, "Table not found");
    assert!(!err.retryable());
}

#[tokio::test]
async fn in_body_status_fails_the_ack() {
    if !loopback_available().await {
        eprintln!("skipping in_body_status_fails_the_ack: loopback bind not permitted");
        return;
    }
    let body = r#"{"error":{"code":3,"message":"row does not match schema"}}"#.to_string();
    let (addr, _request) = start_test_server("200 OK", body).await;

    let client = connector(addr, None).connect("p").await.unwrap();
    let handle = client.open_append(STREAM, descriptor().proto()).await.unwrap();
    let err = handle
        .append_rows(vec![vec![]])
        .await
        .unwrap()
        .result()
        .await
        .unwrap_err();
    assert_eq!(err.kind, RemoteErrorKind::InvalidArgument);
}

#[tokio::test]
async fn refused_connection_is_retryable() {
    if !loopback_available().await {
        eprintln!("skipping refused_connection_is_retryable: loopback bind not permitted");
        return;
    }
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = connector(addr, None).connect("p").await.unwrap();
    let err = client
        .get_write_stream(STREAM, WriteStreamView::Full)
        .await
        .unwrap_err();
    assert_eq!(err.kind, RemoteErrorKind::Unavailable);
    assert!(err.retryable());
}

#[tokio::test]
async fn closed_client_refuses_calls() {
    let client: Arc<dyn WriteClient> = connector("127.0.0.1:9".parse().unwrap(), None)
        .connect("p")
        .await
        .unwrap();
    client.close().await.unwrap();
    let err = client
        .get_write_stream(STREAM, WriteStreamView::Full)
        .await
        .unwrap_err();
    assert_eq!(err.kind, RemoteErrorKind::Closed);
}
