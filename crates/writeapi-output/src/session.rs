//! One open append stream to one destination table.

use std::sync::Arc;

use tracing::{debug, info, warn};
use writeapi_rows::{RawRecord, RowDescriptor, encode_row, normalize_record};

use crate::config::SessionOptions;
use crate::destination::DestinationCoordinates;
use crate::error::SessionError;
use crate::remote::{AppendHandle, ClientLease, ConnectionPool, RetryingAppendHandle};
use crate::resolver::resolve;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub batches: u64,
    pub rows: u64,
}

/// Outcome of one acknowledged batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendResult {
    pub rows: usize,
    pub offset: Option<i64>,
}

pub struct StreamSession {
    coordinates: DestinationCoordinates,
    descriptor: RowDescriptor,
    handle: Option<Box<dyn AppendHandle>>,
    lease: Option<ClientLease>,
    state: SessionState,
    stats: SessionStats,
}

impl StreamSession {
    /// Resolve the destination schema and open an append handle on its default stream.
    ///
    /// The descriptor compiled here is the writer schema for the session's whole lifetime.
    pub async fn open(
        pool: &Arc<ConnectionPool>,
        coordinates: DestinationCoordinates,
        options: &SessionOptions,
    ) -> Result<Self, SessionError> {
        let lease = pool
            .acquire(coordinates.project())
            .await
            .map_err(SessionError::SessionOpen)?;

        match open_handle(&lease, &coordinates, options).await {
            Ok((descriptor, handle)) => {
                info!(table = %coordinates, retries = options.write_retries, "session opened");
                Ok(Self {
                    coordinates,
                    descriptor,
                    handle: Some(handle),
                    lease: Some(lease),
                    state: SessionState::Open,
                    stats: SessionStats::default(),
                })
            }
            Err(err) => {
                if let Err(release_err) = lease.release().await {
                    warn!(table = %coordinates, error = %release_err, "releasing client after failed open");
                }
                Err(err)
            }
        }
    }

    pub fn coordinates(&self) -> &DestinationCoordinates {
        &self.coordinates
    }

    pub fn descriptor(&self) -> &RowDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Normalize and encode a batch of records, then append it.
    ///
    /// Any record that fails to encode aborts the whole batch before anything is sent.
    /// Returns `None` for an empty batch.
    pub async fn write_records(&mut self, records: Vec<RawRecord>) -> Result<Option<AppendResult>, SessionError> {
        if records.is_empty() {
            return Ok(None);
        }
        let mut rows = Vec::with_capacity(records.len());
        for (index, record) in records.into_iter().enumerate() {
            let normalized = normalize_record(record.fields);
            let row = encode_row(&self.descriptor, &normalized)
                .map_err(|source| SessionError::Encode { index, source })?;
            rows.push(row);
        }
        self.append(rows).await.map(Some)
    }

    /// Submit one batch of encoded rows and wait for its acknowledgement.
    pub async fn append(&mut self, rows: Vec<Vec<u8>>) -> Result<AppendResult, SessionError> {
        let handle = match (&self.handle, self.state) {
            (Some(handle), SessionState::Open) => handle,
            _ => return Err(SessionError::Closed),
        };
        let row_count = rows.len();
        let pending = handle.append_rows(rows).await.map_err(SessionError::Append)?;
        let ack = pending.result().await.map_err(SessionError::Ack)?;

        self.stats.batches += 1;
        self.stats.rows += row_count as u64;
        debug!(table = %self.coordinates, rows = row_count, offset = ?ack.offset, "batch acknowledged");
        Ok(AppendResult {
            rows: row_count,
            offset: ack.offset,
        })
    }

    /// Close the append handle and give back the client lease. Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<(), SessionError> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.state = SessionState::Closed;

        let mut first_error = None;
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.close().await {
                first_error = Some(SessionError::Close(err));
            }
        }
        if let Some(lease) = self.lease.take() {
            if let Err(err) = lease.release().await {
                warn!(table = %self.coordinates, error = %err, "closing write client");
                first_error.get_or_insert(SessionError::Close(err));
            }
        }

        info!(
            table = %self.coordinates,
            batches = self.stats.batches,
            rows = self.stats.rows,
            "session closed"
        );
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

async fn open_handle(
    lease: &ClientLease,
    coordinates: &DestinationCoordinates,
    options: &SessionOptions,
) -> Result<(RowDescriptor, Box<dyn AppendHandle>), SessionError> {
    let client = lease.client();
    let descriptor = resolve(client.as_ref(), coordinates).await?;
    let handle = client
        .open_append(&coordinates.default_stream(), descriptor.proto())
        .await
        .map_err(SessionError::SessionOpen)?;
    let handle: Box<dyn AppendHandle> = if options.write_retries {
        Box::new(RetryingAppendHandle::new(handle, options.retry.clone()))
    } else {
        handle
    };
    Ok((descriptor, handle))
}
