//! JSON/HTTP transport for the write service.
//!
//! Talks to the REST surface of the storage write API: schema discovery through
//! `GET v1/{stream}?view=FULL` and appends through `POST v1/{stream}:appendRows`, with rows
//! and the writer schema carried as base64 and proto-JSON respectively.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use prost_types::{DescriptorProto, FieldDescriptorProto};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};
use url::Url;

use super::error::{RemoteError, RemoteErrorKind};
use super::pool::ClientConnector;
use super::traits::{AppendAck, AppendHandle, PendingAppend, WriteClient, WriteStream, WriteStreamView};

/// Connector that opens one [`HttpWriteClient`] per project against a fixed endpoint.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    endpoint: Url,
    access_token: Option<String>,
    timeout: Duration,
}

impl HttpConnector {
    pub fn new(endpoint: &str, access_token: Option<String>, timeout: Duration) -> Result<Self, RemoteError> {
        Ok(Self {
            endpoint: normalize_endpoint(endpoint)?,
            access_token,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl ClientConnector for HttpConnector {
    async fn connect(&self, project: &str) -> Result<Arc<dyn WriteClient>, RemoteError> {
        debug!(project, endpoint = %self.endpoint, "connecting to write service");
        let client = HttpWriteClient::new(self.endpoint.clone(), self.access_token.clone(), self.timeout)?;
        Ok(Arc::new(client))
    }
}

fn normalize_endpoint(endpoint: &str) -> Result<Url, RemoteError> {
    let mut url = Url::parse(endpoint).map_err(|err| {
        RemoteError::new(
            RemoteErrorKind::InvalidArgument,
            format!("invalid endpoint '{endpoint}': {err}"),
        )
    })?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

pub struct HttpWriteClient {
    http: Client,
    endpoint: Url,
    access_token: Option<String>,
    closed: AtomicBool,
}

impl HttpWriteClient {
    pub fn new(endpoint: Url, access_token: Option<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let http = Client::builder().timeout(timeout).build().map_err(|err| {
            RemoteError::new(RemoteErrorKind::Internal, format!("build http client: {err}"))
        })?;
        Ok(Self {
            http,
            endpoint,
            access_token,
            closed: AtomicBool::new(false),
        })
    }

    fn url(&self, path: &str) -> Result<Url, RemoteError> {
        resource_url(&self.endpoint, path)
    }

    fn ensure_open(&self) -> Result<(), RemoteError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RemoteError::closed("client"));
        }
        Ok(())
    }
}

fn resource_url(endpoint: &Url, path: &str) -> Result<Url, RemoteError> {
    endpoint.join(&format!("v1/{path}")).map_err(|err| {
        RemoteError::new(
            RemoteErrorKind::InvalidArgument,
            format!("invalid resource name '{path}': {err}"),
        )
    })
}

fn authorize(request: RequestBuilder, access_token: Option<&str>) -> RequestBuilder {
    match access_token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

#[async_trait]
impl WriteClient for HttpWriteClient {
    async fn get_write_stream(&self, name: &str, view: WriteStreamView) -> Result<WriteStream, RemoteError> {
        self.ensure_open()?;
        let url = self.url(name)?;
        let request = self.http.get(url).query(&[("view", view.as_str())]);
        let response = authorize(request, self.access_token.as_deref())
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response).await?;
        response.json::<WriteStream>().await.map_err(|err| {
            RemoteError::new(
                RemoteErrorKind::Internal,
                format!("malformed write stream response: {err}"),
            )
        })
    }

    async fn open_append(
        &self,
        stream: &str,
        descriptor: &DescriptorProto,
    ) -> Result<Box<dyn AppendHandle>, RemoteError> {
        self.ensure_open()?;
        let url = self.url(&format!("{stream}:appendRows"))?;
        Ok(Box::new(HttpAppendHandle {
            http: self.http.clone(),
            url,
            access_token: self.access_token.clone(),
            stream: stream.to_string(),
            writer_schema: descriptor_json(descriptor),
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<(), RemoteError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(RemoteError::closed("client"));
        }
        Ok(())
    }
}

struct HttpAppendHandle {
    http: Client,
    url: Url,
    access_token: Option<String>,
    stream: String,
    writer_schema: Value,
    closed: AtomicBool,
}

#[async_trait]
impl AppendHandle for HttpAppendHandle {
    fn stream_name(&self) -> &str {
        &self.stream
    }

    async fn append_rows(&self, rows: Vec<Vec<u8>>) -> Result<PendingAppend, RemoteError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RemoteError::closed("append stream"));
        }
        let row_count = rows.len();
        let body = json!({
            "writeStream": self.stream,
            "protoRows": {
                "writerSchema": { "protoDescriptor": self.writer_schema },
                "rows": {
                    "serializedRows": rows.iter().map(|row| BASE64.encode(row)).collect::<Vec<_>>(),
                },
            },
        });
        let request = authorize(
            self.http.post(self.url.clone()).json(&body),
            self.access_token.as_deref(),
        );

        let (tx, pending) = PendingAppend::channel();
        tokio::spawn(async move {
            let result = send_append(request, row_count).await;
            if tx.send(result).is_err() {
                debug!("append acknowledgement dropped by caller");
            }
        });
        Ok(pending)
    }

    async fn close(&self) -> Result<(), RemoteError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(RemoteError::closed("append stream"));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendRowsResponse {
    #[serde(default)]
    append_result: Option<AppendResultBody>,
    #[serde(default)]
    error: Option<StatusBody>,
    #[serde(default)]
    row_errors: Vec<RowErrorBody>,
}

#[derive(Debug, Deserialize)]
struct AppendResultBody {
    #[serde(default)]
    offset: Option<OffsetValue>,
}

/// Int64 wrappers arrive as strings in proto-JSON; accept both.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OffsetValue {
    Number(i64),
    Text(String),
}

impl OffsetValue {
    fn as_i64(&self) -> Option<i64> {
        match self {
            OffsetValue::Number(n) => Some(*n),
            OffsetValue::Text(s) => s.parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct RowErrorBody {
    #[serde(default)]
    index: Option<OffsetValue>,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: StatusBody,
}

async fn send_append(request: RequestBuilder, row_count: usize) -> Result<AppendAck, RemoteError> {
    let response = request.send().await.map_err(transport_error)?;
    let response = check_status(response).await?;
    let body: AppendRowsResponse = response.json().await.map_err(|err| {
        RemoteError::new(
            RemoteErrorKind::Internal,
            format!("malformed append response: {err}"),
        )
    })?;

    if let Some(status) = body.error {
        return Err(RemoteError::new(
            RemoteErrorKind::from_grpc_code(status.code),
            status.message,
        ));
    }
    if let Some(first) = body.row_errors.first() {
        let index = first.index.as_ref().and_then(OffsetValue::as_i64).unwrap_or(-1);
        return Err(RemoteError::new(
            RemoteErrorKind::InvalidArgument,
            format!(
                "{} row(s) rejected; row {index}: {}",
                body.row_errors.len(),
                first.message
            ),
        ));
    }
    Ok(AppendAck {
        offset: body
            .append_result
            .and_then(|result| result.offset)
            .and_then(|offset| offset.as_i64()),
        row_count,
    })
}

async fn check_status(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let kind = RemoteErrorKind::from_http_status(status.as_u16());
    let text = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ErrorEnvelope>(&text) {
        Ok(envelope) if !envelope.error.message.is_empty() => envelope.error.message,
        _ if text.is_empty() => format!("http status {status}"),
        _ => text,
    };
    warn!(%status, %kind, "write service returned an error");
    Err(RemoteError::new(kind, message))
}

fn transport_error(err: reqwest::Error) -> RemoteError {
    let kind = if err.is_timeout() {
        RemoteErrorKind::DeadlineExceeded
    } else if err.is_connect() {
        RemoteErrorKind::Unavailable
    } else {
        RemoteErrorKind::Internal
    };
    RemoteError::new(kind, format!("request failed: {err}"))
}

/// Proto-JSON rendering of a self-contained descriptor.
fn descriptor_json(descriptor: &DescriptorProto) -> Value {
    json!({
        "name": descriptor.name(),
        "field": descriptor.field.iter().map(field_json).collect::<Vec<_>>(),
        "nestedType": descriptor.nested_type.iter().map(descriptor_json).collect::<Vec<_>>(),
    })
}

fn field_json(field: &FieldDescriptorProto) -> Value {
    let mut value = json!({
        "name": field.name(),
        "number": field.number(),
        "label": field.label().as_str_name(),
        "type": field.r#type().as_str_name(),
    });
    if let Some(type_name) = field.type_name.as_deref() {
        value["typeName"] = Value::String(type_name.to_string());
    }
    value
}
