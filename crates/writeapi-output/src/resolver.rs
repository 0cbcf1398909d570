use tracing::{debug, info};
use writeapi_rows::{DescriptorAdaptError, RowDescriptor};

use crate::destination::DestinationCoordinates;
use crate::error::SessionError;
use crate::remote::{WriteClient, WriteStreamView};

/// Fetch the destination's table schema from its default stream and compile it into a
/// row descriptor.
pub async fn resolve(
    client: &dyn WriteClient,
    coordinates: &DestinationCoordinates,
) -> Result<RowDescriptor, SessionError> {
    let stream = coordinates.default_stream();
    debug!(stream = %stream, "fetching table schema");

    let write_stream = client
        .get_write_stream(&stream, WriteStreamView::Full)
        .await
        .map_err(|source| SessionError::SchemaFetch {
            stream: stream.clone(),
            source,
        })?;

    let schema = write_stream
        .table_schema
        .ok_or(SessionError::DescriptorAdapt(DescriptorAdaptError::EmptySchema))?;
    let descriptor = RowDescriptor::compile(&schema)?;

    info!(
        table = %coordinates,
        columns = descriptor.field_names().len(),
        "resolved row descriptor"
    );
    Ok(descriptor)
}
