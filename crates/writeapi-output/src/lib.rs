//! Per-destination streaming sessions for the write API relay.
//!
//! The host drives a [`WriteApiOutput`] through Init/Flush/Exit callbacks. Each Init opens a
//! [`StreamSession`] (schema resolution, descriptor compilation, append handle) stored in the
//! [`SessionRegistry`] under the instance id; every Flush for that id decodes, normalizes and
//! encodes the host's records and appends them as one acknowledged batch.

pub mod config;
pub mod destination;
pub mod error;
pub mod plugin;
pub mod registry;
pub mod remote;
pub mod resolver;
pub mod session;

pub use config::{ConfigError, ConfigLookup, InstanceConfig, OutputSettings, SessionOptions};
pub use destination::DestinationCoordinates;
pub use error::SessionError;
pub use plugin::{FlushOutcome, PluginInfo, PluginStatus, WriteApiOutput};
pub use registry::SessionRegistry;
pub use remote::{
    AppendAck, AppendHandle, ClientConnector, ConnectionPool, FaultPoint, MemoryWriteService, PendingAppend,
    RemoteError, RemoteErrorKind, RetryPolicy, WriteClient, WriteStream, WriteStreamView,
};
pub use resolver::resolve;
pub use session::{AppendResult, SessionState, SessionStats, StreamSession};
