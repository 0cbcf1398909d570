//! Remote write service: the contract sessions talk to and its transports.

pub mod error;
#[cfg(feature = "transport-http")]
pub mod http;
pub mod memory;
pub mod pool;
pub mod retry;
pub mod traits;

pub use error::{RemoteError, RemoteErrorKind};
#[cfg(feature = "transport-http")]
pub use http::{HttpConnector, HttpWriteClient};
pub use memory::{FaultPoint, MemoryWriteService};
pub use pool::{ClientConnector, ClientLease, ConnectionPool};
pub use retry::{RetryPolicy, RetryingAppendHandle, Retryable, retry_async};
pub use traits::{AppendAck, AppendHandle, PendingAppend, WriteClient, WriteStream, WriteStreamView};
