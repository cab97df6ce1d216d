//! The ingestion scheduler.

use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::client::source::{IngestionRecord, IngestionSource};

/// Polls `source` once per `poll` interval and hands each record to
/// `dispatch`, at most one per tick.
///
/// An exhausted source is not an error: the tick produces nothing and
/// ticking continues, so a directory source can pick up files that appear
/// later. `dispatch` must not block the tick - it fires an independent
/// call and returns; streams from earlier ticks stay concurrently active.
pub(crate) async fn run_ingestion<F>(
    mut source: IngestionSource,
    poll: Duration,
    shutdown: CancellationToken,
    mut dispatch: F,
) where
    F: FnMut(IngestionRecord),
{
    let mut interval = time::interval(poll);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                tracing::info!("ingestion scheduler stopped");
                return;
            }
            _ = interval.tick() => match source.next_record().await {
                Ok(Some(record)) => {
                    tracing::info!(
                        sequence = record.sequence,
                        payload = %record.payload,
                        "ingested record"
                    );
                    dispatch(record);
                }
                Ok(None) => tracing::trace!("ingestion source empty; idle tick"),
                Err(e) => tracing::warn!(error = %e, "ingestion source poll failed"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn one_record_per_tick_then_silence() {
        let source = IngestionSource::memory(vec![
            "Jacky".to_owned(),
            "Long".to_owned(),
            "Juven".to_owned(),
        ]);
        let shutdown = CancellationToken::new();
        let dispatched = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&dispatched);
        let start = Instant::now();

        let scheduler = tokio::spawn(run_ingestion(
            source,
            Duration::from_millis(1_000),
            shutdown.clone(),
            move |record| sink.lock().unwrap().push((record, Instant::now() - start)),
        ));

        // Three records at ticks 0, 1 and 2; ticks 3 and beyond are empty.
        time::sleep(Duration::from_millis(5_500)).await;
        shutdown.cancel();
        scheduler.await.unwrap();

        let dispatched = dispatched.lock().unwrap();
        assert_eq!(dispatched.len(), 3);
        for (i, (record, at)) in dispatched.iter().enumerate() {
            assert_eq!(record.sequence, i as u64);
            assert_eq!(*at, Duration::from_millis(1_000) * i as u32);
        }
        assert_eq!(dispatched[0].0.payload, "Jacky");
        assert_eq!(dispatched[1].0.payload, "Long");
        assert_eq!(dispatched[2].0.payload, "Juven");
    }
}
