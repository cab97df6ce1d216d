//! Ingestion record sources.
//!
//! A source produces records in a fixed, exhaustible order; each record is
//! consumed exactly once and sequence numbers never repeat or decrease.
//! The cursor lives here and is advanced only by the scheduler that owns
//! the source.

use std::collections::HashSet;
use std::path::PathBuf;

/// One unit of ingestion work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionRecord {
    pub payload: String,
    pub sequence: u64,
}

/// Record source for the ingestion scheduler.
#[derive(Debug)]
pub enum IngestionSource {
    /// Fixed in-memory record list, consumed front to back.
    Memory {
        pending: std::vec::IntoIter<String>,
        next_sequence: u64,
    },
    /// Directory poll: each file is consumed once, name order, its
    /// contents becoming one record. Files are remembered, not removed.
    Directory {
        dir: PathBuf,
        seen: HashSet<PathBuf>,
        next_sequence: u64,
    },
}

impl IngestionSource {
    pub fn memory(records: Vec<String>) -> Self {
        Self::Memory {
            pending: records.into_iter(),
            next_sequence: 0,
        }
    }

    pub fn directory(dir: PathBuf) -> Self {
        Self::Directory {
            dir,
            seen: HashSet::new(),
            next_sequence: 0,
        }
    }

    /// Pulls at most one record. `Ok(None)` means the source had nothing
    /// this time; a directory source may produce again later, a memory
    /// source is exhausted for good.
    pub async fn next_record(&mut self) -> std::io::Result<Option<IngestionRecord>> {
        match self {
            Self::Memory {
                pending,
                next_sequence,
            } => Ok(pending.next().map(|payload| {
                let sequence = *next_sequence;
                *next_sequence += 1;
                IngestionRecord { payload, sequence }
            })),
            Self::Directory {
                dir,
                seen,
                next_sequence,
            } => {
                let mut fresh = Vec::new();
                let mut entries = tokio::fs::read_dir(&dir).await?;
                while let Some(entry) = entries.next_entry().await? {
                    let path = entry.path();
                    if entry.file_type().await?.is_file() && !seen.contains(&path) {
                        fresh.push(path);
                    }
                }
                let Some(path) = fresh.into_iter().min() else {
                    return Ok(None);
                };
                let payload = tokio::fs::read_to_string(&path).await?;
                seen.insert(path);
                let sequence = *next_sequence;
                *next_sequence += 1;
                Ok(Some(IngestionRecord { payload, sequence }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_source_preserves_order_and_exhausts() {
        let mut source = IngestionSource::memory(vec![
            "Jacky".to_owned(),
            "Long".to_owned(),
            "Juven".to_owned(),
        ]);

        let first = source.next_record().await.unwrap().unwrap();
        assert_eq!((first.payload.as_str(), first.sequence), ("Jacky", 0));
        let second = source.next_record().await.unwrap().unwrap();
        assert_eq!((second.payload.as_str(), second.sequence), ("Long", 1));
        let third = source.next_record().await.unwrap().unwrap();
        assert_eq!((third.payload.as_str(), third.sequence), ("Juven", 2));

        assert!(source.next_record().await.unwrap().is_none());
        assert!(source.next_record().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn directory_source_consumes_each_file_once() {
        let dir = std::env::temp_dir().join(format!("hail-ingest-{}", std::process::id()));
        let _ = tokio::fs::remove_dir_all(&dir).await;
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("a.txt"), "Jacky").await.unwrap();
        tokio::fs::write(dir.join("b.txt"), "Long").await.unwrap();

        let mut source = IngestionSource::directory(dir.clone());
        let first = source.next_record().await.unwrap().unwrap();
        assert_eq!((first.payload.as_str(), first.sequence), ("Jacky", 0));
        let second = source.next_record().await.unwrap().unwrap();
        assert_eq!((second.payload.as_str(), second.sequence), ("Long", 1));
        assert!(source.next_record().await.unwrap().is_none());

        // A file appearing later is picked up exactly once.
        tokio::fs::write(dir.join("c.txt"), "Juven").await.unwrap();
        let third = source.next_record().await.unwrap().unwrap();
        assert_eq!((third.payload.as_str(), third.sequence), ("Juven", 2));
        assert!(source.next_record().await.unwrap().is_none());

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
