//! Race coordination between the greeting generator and the reverse health
//! monitor.
//!
//! One task per greeting stream owns the emission timer, the element cap,
//! and the monitor future. That single ownership is the cancellation
//! point: every emission and every terminal decision passes through one
//! `select!` loop, so no element can overtake a cancellation signal, and
//! the `biased` arm order makes a same-tick tie resolve in favor of
//! stopping rather than overrunning.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use hail_wire::StreamHandle;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::generator;

/// Drives one greeting stream to a terminal state.
///
/// Forwards up to `cap` elements at `cadence` spacing until `unhealthy`
/// resolves (peer went unhealthy: handle becomes `Cancelled`), the cap is
/// reached (`Completed`), or the peer cancels the stream outright. The
/// monitor future is dropped on every exit path, which tears the reverse
/// subscription down; dropping `tx` completes the output stream normally -
/// a cancellation is a planned termination, not a fault.
pub(crate) async fn run(
    name: String,
    cadence: Duration,
    cap: usize,
    handle: Arc<StreamHandle>,
    cancel: CancellationToken,
    unhealthy: impl Future<Output = ()>,
    tx: mpsc::Sender<hail_wire::Result<Value>>,
) {
    tokio::pin!(unhealthy);

    // First element one cadence in, like every element after it.
    let mut interval = time::interval_at(time::Instant::now() + cadence, cadence);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut emitted = 0usize;
    while emitted < cap {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                handle.cancel();
                tracing::debug!(stream = handle.id(), emitted, "greeting stream cancelled by peer");
                return;
            }
            () = &mut unhealthy => {
                handle.cancel();
                tracing::info!(
                    stream = handle.id(),
                    emitted,
                    "peer unhealthy; greeting stream cancelled"
                );
                return;
            }
            _ = interval.tick() => {
                let response = generator::greet(&name);
                match serde_json::to_value(&response) {
                    Ok(value) => {
                        if tx.send(Ok(value)).await.is_err() {
                            // Consumer went away without a cancel frame;
                            // the connection is already tearing down.
                            handle.fail();
                            return;
                        }
                        emitted += 1;
                    }
                    Err(e) => {
                        handle.fail();
                        let _ = tx.send(Err(e.into())).await;
                        return;
                    }
                }
            }
        }
    }

    handle.complete();
    tracing::debug!(stream = handle.id(), emitted, "greeting stream ran to its cap");
}

#[cfg(test)]
mod tests {
    use super::*;
    use hail_wire::StreamState;
    use tokio::time::Instant;

    const CADENCE: Duration = Duration::from_secs(1);

    async fn run_race(
        cap: usize,
        unhealthy_after: Option<Duration>,
    ) -> (Vec<Instant>, Arc<StreamHandle>) {
        let handle = Arc::new(StreamHandle::new(1));
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(16);
        let unhealthy = async move {
            match unhealthy_after {
                Some(delay) => time::sleep(delay).await,
                None => std::future::pending().await,
            }
        };
        tokio::spawn(run(
            "alice".into(),
            CADENCE,
            cap,
            Arc::clone(&handle),
            cancel,
            unhealthy,
            tx,
        ));

        let mut arrivals = Vec::new();
        while let Some(item) = rx.recv().await {
            item.unwrap();
            arrivals.push(Instant::now());
        }
        (arrivals, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn generator_exhaustion_completes_the_stream() {
        let (arrivals, handle) = run_race(5, None).await;
        assert_eq!(arrivals.len(), 5);
        assert_eq!(handle.state(), StreamState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn elements_are_spaced_by_at_least_the_cadence() {
        let (arrivals, _) = run_race(4, None).await;
        for pair in arrivals.windows(2) {
            assert!(pair[1] - pair[0] >= CADENCE);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unhealthy_sample_cancels_between_ticks() {
        // Monitor fires at 3.5s: elements at 1s, 2s, 3s made it out, the
        // 4s element is never generated.
        let (arrivals, handle) = run_race(100, Some(Duration::from_millis(3_500))).await;
        assert_eq!(arrivals.len(), 3);
        assert_eq!(handle.state(), StreamState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn same_tick_tie_favors_cancellation() {
        // Both the monitor and the second tick are due at exactly 2s; the
        // biased arm order stops the stream before emitting.
        let (arrivals, handle) = run_race(100, Some(Duration::from_secs(2))).await;
        assert_eq!(arrivals.len(), 1);
        assert_eq!(handle.state(), StreamState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn peer_cancel_stops_emission() {
        let handle = Arc::new(StreamHandle::new(1));
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(16);
        tokio::spawn(run(
            "alice".into(),
            CADENCE,
            100,
            Arc::clone(&handle),
            cancel.clone(),
            std::future::pending(),
            tx,
        ));

        let mut received = 0;
        while received < 2 {
            rx.recv().await.unwrap().unwrap();
            received += 1;
        }
        cancel.cancel();
        assert!(rx.recv().await.is_none());
        assert_eq!(handle.state(), StreamState::Cancelled);
    }
}
