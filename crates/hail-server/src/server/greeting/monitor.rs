//! Reverse health monitor.
//!
//! For every greeting stream the server opens one `health` stream back
//! toward the peer that issued the request, over the same connection. The
//! subscription is scoped to that single stream: the returned future holds
//! the response stream, and dropping the future (which the race coordinator
//! does on any terminal state) sends the cancel frame that tears the
//! subscription down.

use futures::StreamExt;
use hail_wire::{HEALTH_ROUTE, HealthSample, Requester};
use serde_json::Value;

/// Resolves when the peer first reports itself unhealthy.
///
/// Healthy samples are observed but produce no event. If the reverse
/// stream cannot be opened, fails mid-flight, or the peer completes it,
/// this future never resolves: absence of an unhealthy signal is treated
/// as healthy and the generator runs on (fail-open).
pub(crate) async fn first_unhealthy(peer: Requester) {
    let mut samples = match peer.request_stream(HEALTH_ROUTE, &Value::Null).await {
        Ok(samples) => samples,
        Err(e) => {
            tracing::warn!(error = %e, "health monitor unavailable; continuing unmonitored");
            return std::future::pending().await;
        }
    };

    while let Some(item) = samples.next().await {
        match item {
            Ok(value) => match serde_json::from_value::<HealthSample>(value) {
                Ok(sample) if !sample.healthy => {
                    tracing::info!(sampled_at = %sample.sampled_at, "peer reported unhealthy");
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring undecodable health sample");
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "health monitor stream failed; continuing unmonitored");
                return std::future::pending().await;
            }
        }
    }

    tracing::debug!("peer completed its health stream; continuing unmonitored");
    std::future::pending().await
}
