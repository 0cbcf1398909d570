//! In-process write service.
//!
//! Holds table schemas and appended rows in memory, validates every row against the writer
//! schema it was appended with, and lets callers inject failures at each remote step. Used by
//! the integration tests and by the CLI's replay driver.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use prost_types::DescriptorProto;
use tracing::debug;
use writeapi_rows::{RowDescriptor, TableSchema, decode_row};

use super::error::{RemoteError, RemoteErrorKind};
use super::pool::ClientConnector;
use super::traits::{AppendAck, AppendHandle, PendingAppend, WriteClient, WriteStream, WriteStreamView};

const DEFAULT_STREAM_SUFFIX: &str = "/streams/_default";

/// Remote step a fault can be injected at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    SchemaLookup,
    OpenAppend,
    Submit,
    Ack,
}

#[derive(Default)]
struct MemoryTable {
    schema: TableSchema,
    rows: Vec<StoredRow>,
    batches: usize,
}

struct StoredRow {
    bytes: Vec<u8>,
    writer: Arc<RowDescriptor>,
}

#[derive(Default)]
struct MemoryState {
    tables: HashMap<String, MemoryTable>,
    faults: HashMap<FaultPoint, VecDeque<RemoteError>>,
    connects: usize,
    client_closes: usize,
    open_handles: usize,
}

/// Shared handle to the in-memory service; clones see the same tables.
#[derive(Clone, Default)]
pub struct MemoryWriteService {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryWriteService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`add_table`](Self::add_table).
    pub fn with_table(self, table_path: impl Into<String>, schema: TableSchema) -> Self {
        self.add_table(table_path, schema);
        self
    }

    pub fn add_table(&self, table_path: impl Into<String>, schema: TableSchema) {
        self.lock().tables.insert(
            table_path.into(),
            MemoryTable {
                schema,
                ..Default::default()
            },
        );
    }

    /// Fail the next call at `point` with `error`. Faults queue up in order.
    pub fn inject_fault(&self, point: FaultPoint, error: RemoteError) {
        self.lock().faults.entry(point).or_default().push_back(error);
    }

    /// Raw rows appended to a table, in append order.
    pub fn rows(&self, table_path: &str) -> Vec<Vec<u8>> {
        self.lock()
            .tables
            .get(table_path)
            .map(|t| t.rows.iter().map(|r| r.bytes.clone()).collect())
            .unwrap_or_default()
    }

    /// Appended rows decoded with the writer schema they arrived with.
    pub fn decoded_rows(&self, table_path: &str) -> Vec<serde_json::Value> {
        self.lock()
            .tables
            .get(table_path)
            .map(|t| {
                t.rows
                    .iter()
                    .filter_map(|r| decode_row(&r.writer, &r.bytes).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of acknowledged batches for a table.
    pub fn batches(&self, table_path: &str) -> usize {
        self.lock().tables.get(table_path).map(|t| t.batches).unwrap_or(0)
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    pub fn client_closes(&self) -> usize {
        self.lock().client_closes
    }

    /// Append handles opened and not yet closed.
    pub fn open_handles(&self) -> usize {
        self.lock().open_handles
    }

    /// A fresh client connection to this service.
    pub fn client(&self) -> Arc<dyn WriteClient> {
        self.lock().connects += 1;
        Arc::new(MemoryWriteClient {
            service: self.clone(),
            closed: AtomicBool::new(false),
        })
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A panicking test thread must not wedge every other user of the service.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_fault(&self, point: FaultPoint) -> Option<RemoteError> {
        self.lock().faults.get_mut(&point).and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl ClientConnector for MemoryWriteService {
    async fn connect(&self, project: &str) -> Result<Arc<dyn WriteClient>, RemoteError> {
        debug!(project, "connecting to in-memory write service");
        Ok(self.client())
    }
}

struct MemoryWriteClient {
    service: MemoryWriteService,
    closed: AtomicBool,
}

impl MemoryWriteClient {
    fn ensure_open(&self) -> Result<(), RemoteError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RemoteError::closed("client"));
        }
        Ok(())
    }
}

fn table_of(stream: &str) -> Result<&str, RemoteError> {
    stream.strip_suffix(DEFAULT_STREAM_SUFFIX).ok_or_else(|| {
        RemoteError::new(
            RemoteErrorKind::InvalidArgument,
            format!("unsupported write stream '{stream}'"),
        )
    })
}

#[async_trait]
impl WriteClient for MemoryWriteClient {
    async fn get_write_stream(&self, name: &str, view: WriteStreamView) -> Result<WriteStream, RemoteError> {
        self.ensure_open()?;
        if let Some(fault) = self.service.take_fault(FaultPoint::SchemaLookup) {
            return Err(fault);
        }
        let table = table_of(name)?;
        let state = self.service.lock();
        let entry = state.tables.get(table).ok_or_else(|| {
            RemoteError::new(RemoteErrorKind::NotFound, format!("table '{table}' not found"))
        })?;
        Ok(WriteStream {
            name: name.to_string(),
            table_schema: (view == WriteStreamView::Full).then(|| entry.schema.clone()),
            stream_type: Some("COMMITTED".to_string()),
            location: None,
        })
    }

    async fn open_append(
        &self,
        stream: &str,
        descriptor: &DescriptorProto,
    ) -> Result<Box<dyn AppendHandle>, RemoteError> {
        self.ensure_open()?;
        if let Some(fault) = self.service.take_fault(FaultPoint::OpenAppend) {
            return Err(fault);
        }
        let table = table_of(stream)?.to_string();
        let writer = RowDescriptor::from_proto(descriptor.clone()).map_err(|err| {
            RemoteError::new(
                RemoteErrorKind::InvalidArgument,
                format!("invalid writer schema: {err}"),
            )
        })?;

        let mut state = self.service.lock();
        if !state.tables.contains_key(&table) {
            return Err(RemoteError::new(
                RemoteErrorKind::NotFound,
                format!("table '{table}' not found"),
            ));
        }
        state.open_handles += 1;
        drop(state);

        Ok(Box::new(MemoryAppendHandle {
            service: self.service.clone(),
            stream: stream.to_string(),
            table,
            writer: Arc::new(writer),
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<(), RemoteError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(RemoteError::closed("client"));
        }
        self.service.lock().client_closes += 1;
        Ok(())
    }
}

struct MemoryAppendHandle {
    service: MemoryWriteService,
    stream: String,
    table: String,
    writer: Arc<RowDescriptor>,
    closed: AtomicBool,
}

#[async_trait]
impl AppendHandle for MemoryAppendHandle {
    fn stream_name(&self) -> &str {
        &self.stream
    }

    async fn append_rows(&self, rows: Vec<Vec<u8>>) -> Result<PendingAppend, RemoteError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RemoteError::closed("append stream"));
        }
        if let Some(fault) = self.service.take_fault(FaultPoint::Submit) {
            return Err(fault);
        }
        if let Some(fault) = self.service.take_fault(FaultPoint::Ack) {
            return Ok(PendingAppend::ready(Err(fault)));
        }

        for (index, row) in rows.iter().enumerate() {
            if let Err(err) = decode_row(&self.writer, row) {
                return Ok(PendingAppend::ready(Err(RemoteError::new(
                    RemoteErrorKind::InvalidArgument,
                    format!("row {index} does not match writer schema: {err}"),
                ))));
            }
        }

        let mut state = self.service.lock();
        let table = state.tables.entry(self.table.clone()).or_default();
        let row_count = rows.len();
        table.rows.extend(rows.into_iter().map(|bytes| StoredRow {
            bytes,
            writer: Arc::clone(&self.writer),
        }));
        table.batches += 1;
        Ok(PendingAppend::ready(Ok(AppendAck {
            offset: None,
            row_count,
        })))
    }

    async fn close(&self) -> Result<(), RemoteError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(RemoteError::closed("append stream"));
        }
        self.service.lock().open_handles -= 1;
        Ok(())
    }
}
