//! Outbound gateway and fan-out sink.
//!
//! Each ingestion record becomes one independent `greetings` call; every
//! element of the resulting stream is handed to a terminal consumer
//! together with its delivery metadata. The consumer's return value is
//! discarded - this is a pure sink, and delivery order matches the
//! server's emission order.

use futures::StreamExt;
use hail_wire::{GREETINGS_ROUTE, GreetingRequest, GreetingResponse, Requester};

use crate::client::source::IngestionRecord;

/// Metadata attached to every delivered element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DeliveryMetadata {
    pub route: &'static str,
    /// Wire-level id of the response stream the element arrived on.
    pub stream_id: u64,
    /// Position of the element within its stream.
    pub sequence: u64,
    /// Sequence of the ingestion record that opened the stream.
    pub record_sequence: u64,
}

/// Issues the greeting call for one record and fans the response stream
/// out to `consumer`.
pub(crate) async fn deliver<C>(
    requester: Requester,
    record: IngestionRecord,
    mut consumer: C,
) -> hail_wire::Result<()>
where
    C: FnMut(GreetingResponse, &DeliveryMetadata),
{
    let request = GreetingRequest::new(record.payload);
    let mut responses = requester.request_stream(GREETINGS_ROUTE, &request).await?;

    let mut sequence = 0u64;
    while let Some(item) = responses.next().await {
        let response: GreetingResponse = serde_json::from_value(item?)?;
        let metadata = DeliveryMetadata {
            route: GREETINGS_ROUTE,
            stream_id: responses.stream_id(),
            sequence,
            record_sequence: record.sequence,
        };
        consumer(response, &metadata);
        sequence += 1;
    }
    Ok(())
}

/// The default terminal consumer: logs each element with its metadata.
pub(crate) fn log_consumer() -> impl FnMut(GreetingResponse, &DeliveryMetadata) {
    |response, metadata| {
        tracing::info!(
            stream = metadata.stream_id,
            sequence = metadata.sequence,
            record = metadata.record_sequence,
            route = metadata.route,
            generated_at = %response.generated_at,
            "new message: {}",
            response.message
        );
    }
}
