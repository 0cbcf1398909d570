use thiserror::Error;
use writeapi_rows::{DecodeError, DescriptorAdaptError, EncodeError};

use crate::remote::RemoteError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("schema fetch for {stream} failed: {source}")]
    SchemaFetch {
        stream: String,
        #[source]
        source: RemoteError,
    },
    #[error("descriptor adapt failed: {0}")]
    DescriptorAdapt(#[from] DescriptorAdaptError),
    #[error("session open failed: {0}")]
    SessionOpen(#[source] RemoteError),
    #[error("record decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("record {index} failed to encode ({stage}): {source}", stage = .source.stage())]
    Encode {
        index: usize,
        #[source]
        source: EncodeError,
    },
    #[error("append submit failed: {0}")]
    Append(#[source] RemoteError),
    #[error("append acknowledgement failed: {0}")]
    Ack(#[source] RemoteError),
    #[error("session close failed: {0}")]
    Close(#[source] RemoteError),
    #[error("session is closed")]
    Closed,
}
