//! The `health` responder route.
//!
//! The server opens a reverse stream on this route for every greeting
//! stream it serves; we push one liveness sample per second until the
//! server tears the subscription down.

use std::time::Duration;

use chrono::Utc;
use hail_wire::{HEALTH_ROUTE, HandlerStream, HealthSample, Router, StreamContext};
use rand::Rng;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// One liveness sample per second.
pub(crate) const SAMPLE_CADENCE: Duration = Duration::from_secs(1);

/// How the responder decides each sample.
#[derive(Debug, Clone, Copy)]
pub enum HealthBehavior {
    /// Every sample healthy.
    Always,
    /// Healthy for the first `healthy_samples` samples, unhealthy from
    /// then on.
    UnhealthyAfter { healthy_samples: u32 },
    /// Healthy with the given probability, decided per sample.
    Random { healthy_probability: f64 },
}

impl HealthBehavior {
    fn sample(&self, emitted: u32) -> bool {
        match self {
            HealthBehavior::Always => true,
            HealthBehavior::UnhealthyAfter { healthy_samples } => emitted < *healthy_samples,
            HealthBehavior::Random { healthy_probability } => {
                rand::rng().random_bool(*healthy_probability)
            }
        }
    }
}

/// Registers the health responder on `router` under [`HEALTH_ROUTE`].
pub(crate) fn register(router: Router, behavior: HealthBehavior) -> Router {
    router.register(HEALTH_ROUTE, move |ctx: StreamContext, _payload: Value| {
        async move {
            tracing::debug!(stream = ctx.handle.id(), "health subscription opened");
            let (tx, rx) = mpsc::channel(4);
            tokio::spawn(report(behavior, SAMPLE_CADENCE, ctx.cancel.clone(), tx));
            Ok(Box::pin(ReceiverStream::new(rx)) as HandlerStream)
        }
    })
}

/// Emits one sample per cadence until the subscription is cancelled.
async fn report(
    behavior: HealthBehavior,
    cadence: Duration,
    cancel: CancellationToken,
    tx: mpsc::Sender<hail_wire::Result<Value>>,
) {
    let mut interval = time::interval_at(time::Instant::now() + cadence, cadence);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut emitted = 0u32;
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!(emitted, "health subscription torn down");
                return;
            }
            _ = interval.tick() => {
                let healthy = behavior.sample(emitted);
                emitted += 1;
                if !healthy {
                    tracing::info!(emitted, "reporting unhealthy");
                }
                let sample = HealthSample {
                    healthy,
                    sampled_at: Utc::now(),
                };
                match serde_json::to_value(sample) {
                    Ok(value) => {
                        if tx.send(Ok(value)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e.into())).await;
                        return;
                    }
                }
            }
        }
    }
}
