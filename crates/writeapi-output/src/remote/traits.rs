use async_trait::async_trait;
use prost_types::DescriptorProto;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use writeapi_rows::TableSchema;

use super::error::{RemoteError, RemoteErrorKind};

/// Detail level requested from schema discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStreamView {
    Basic,
    Full,
}

impl WriteStreamView {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteStreamView::Basic => "BASIC",
            WriteStreamView::Full => "FULL",
        }
    }
}

/// Schema-discovery response for a write stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteStream {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_schema: Option<TableSchema>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub stream_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Remote acknowledgement of one appended batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendAck {
    /// Offset of the first row; default streams do not report one.
    pub offset: Option<i64>,
    pub row_count: usize,
}

/// A submitted batch whose acknowledgement has not been awaited yet.
#[derive(Debug)]
pub struct PendingAppend {
    rx: oneshot::Receiver<Result<AppendAck, RemoteError>>,
}

impl PendingAppend {
    /// Pending append completed by sending on the returned sender.
    pub fn channel() -> (oneshot::Sender<Result<AppendAck, RemoteError>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// Pending append whose outcome is already known.
    pub fn ready(result: Result<AppendAck, RemoteError>) -> Self {
        let (tx, pending) = Self::channel();
        let _ = tx.send(result);
        pending
    }

    /// Wait for the acknowledgement of this batch.
    pub async fn result(self) -> Result<AppendAck, RemoteError> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::new(
                RemoteErrorKind::Internal,
                "append dropped before acknowledgement",
            )),
        }
    }
}

/// Connection to the remote write service. One connection may back many append handles.
#[async_trait]
pub trait WriteClient: Send + Sync {
    async fn get_write_stream(&self, name: &str, view: WriteStreamView) -> Result<WriteStream, RemoteError>;

    /// Open an append handle on `stream` bound to the given writer schema.
    async fn open_append(
        &self,
        stream: &str,
        descriptor: &DescriptorProto,
    ) -> Result<Box<dyn AppendHandle>, RemoteError>;

    async fn close(&self) -> Result<(), RemoteError>;
}

/// Live append stream bound to one row descriptor.
#[async_trait]
pub trait AppendHandle: Send + Sync {
    fn stream_name(&self) -> &str;

    /// Submit one batch of serialized rows.
    async fn append_rows(&self, rows: Vec<Vec<u8>>) -> Result<PendingAppend, RemoteError>;

    async fn close(&self) -> Result<(), RemoteError>;
}
