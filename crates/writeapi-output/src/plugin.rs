//! Host-facing lifecycle: Register, Init, Flush, Exit, Unregister.
//!
//! Each callback is a plain async method over the shared registry, so hosts and tests drive
//! the same code. Failures are logged and reported as [`PluginStatus::Error`]; nothing here
//! panics or terminates the host.

use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, error, info};
use writeapi_rows::{RawRecord, RecordDecoder};

use crate::config::{ConfigLookup, InstanceConfig, SessionOptions};
use crate::error::SessionError;
use crate::registry::SessionRegistry;
use crate::remote::{ClientConnector, ConnectionPool};
use crate::session::AppendResult;

pub const PLUGIN_NAME: &str = "writeapi";
pub const PLUGIN_DESCRIPTION: &str = "Sends data to BigQuery through WriteAPI";

/// Status codes understood by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginStatus {
    Ok,
    Error,
}

impl PluginStatus {
    pub fn code(self) -> i32 {
        match self {
            PluginStatus::Ok => 1,
            PluginStatus::Error => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfo {
    pub name: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Appended(AppendResult),
    /// The batch held no records; nothing was sent.
    Empty,
    /// No session is registered for the instance.
    NoSession,
}

pub struct WriteApiOutput {
    registry: SessionRegistry,
    defaults: SessionOptions,
}

impl WriteApiOutput {
    pub fn new(connector: Arc<dyn ClientConnector>) -> Self {
        Self::with_options(connector, SessionOptions::default())
    }

    /// `defaults` apply to every instance that does not override them in its config.
    pub fn with_options(connector: Arc<dyn ClientConnector>, defaults: SessionOptions) -> Self {
        let pool = Arc::new(ConnectionPool::new(connector));
        Self {
            registry: SessionRegistry::new(pool),
            defaults,
        }
    }

    /// Output backed by the HTTP transport described by `settings`.
    #[cfg(feature = "transport-http")]
    pub fn with_http(settings: &crate::config::OutputSettings) -> Result<Self, crate::remote::RemoteError> {
        let connector = crate::remote::HttpConnector::new(
            &settings.endpoint,
            settings.access_token.clone(),
            settings.request_timeout,
        )?;
        Ok(Self::with_options(Arc::new(connector), settings.session.clone()))
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn register(&self) -> PluginInfo {
        PluginInfo {
            name: PLUGIN_NAME,
            description: PLUGIN_DESCRIPTION,
        }
    }

    /// Configure one instance and open its session. A failed Init leaves no session behind.
    pub async fn init(&self, config: &impl ConfigLookup) -> PluginStatus {
        let instance = match InstanceConfig::from_lookup(config, &self.defaults) {
            Ok(instance) => instance,
            Err(err) => {
                error!(error = %err, "invalid output configuration");
                return PluginStatus::Error;
            }
        };
        let id = instance.instance_id.clone();
        let table = instance.coordinates.to_string();

        match self
            .registry
            .register(&id, instance.coordinates, &instance.options)
            .await
        {
            Ok(()) => {
                info!(instance = %id, table = %table, "output initialized");
                PluginStatus::Ok
            }
            Err(err) => {
                error!(instance = %id, table = %table, error = %err, "init failed");
                PluginStatus::Error
            }
        }
    }

    /// Flush a host buffer of encoded events for `id`.
    pub async fn flush(&self, id: &str, data: &[u8]) -> PluginStatus {
        match self.try_flush(id, data).await {
            Ok(_) => PluginStatus::Ok,
            Err(err) => {
                error!(instance = id, error = %err, "flush failed");
                PluginStatus::Error
            }
        }
    }

    pub async fn try_flush(&self, id: &str, data: &[u8]) -> Result<FlushOutcome, SessionError> {
        if !self.registry.contains(id) {
            debug!(instance = id, "flush for unknown instance ignored");
            return Ok(FlushOutcome::NoSession);
        }
        let records = RecordDecoder::new(data).collect::<Result<Vec<_>, _>>()?;
        self.flush_records(id, records).await
    }

    /// Append already decoded records as one batch.
    pub async fn flush_records(&self, id: &str, records: Vec<RawRecord>) -> Result<FlushOutcome, SessionError> {
        let outcome = self
            .registry
            .with_session(id, move |session| session.write_records(records).boxed())
            .await?;

        Ok(match outcome {
            None => {
                debug!(instance = id, "flush for unknown or closed instance ignored");
                FlushOutcome::NoSession
            }
            Some(None) => FlushOutcome::Empty,
            Some(Some(result)) => {
                debug!(instance = id, rows = result.rows, "flush appended");
                FlushOutcome::Appended(result)
            }
        })
    }

    /// Close and forget the session for `id`. Unknown ids succeed.
    pub async fn exit(&self, id: &str) -> PluginStatus {
        match self.registry.remove(id).await {
            Ok(true) => {
                info!(instance = id, "output closed");
                PluginStatus::Ok
            }
            Ok(false) => {
                debug!(instance = id, "exit for unknown instance ignored");
                PluginStatus::Ok
            }
            Err(err) => {
                error!(instance = id, error = %err, "exit failed");
                PluginStatus::Error
            }
        }
    }

    /// Close every remaining session.
    pub async fn unregister(&self) -> PluginStatus {
        match self.registry.close_all().await {
            Ok(closed) => {
                info!(closed, "output unregistered");
                PluginStatus::Ok
            }
            Err(err) => {
                error!(error = %err, "unregister failed");
                PluginStatus::Error
            }
        }
    }
}
