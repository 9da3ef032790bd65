use std::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use crate::record::LogRecord;
use crate::sink::LogSink;

const MAX_SEND_ATTEMPTS: u32 = 5;

/// Hands finalized [`LogRecord`]s to a [`LogSink`] without blocking the
/// caller.
///
/// Records go through a bounded channel to a background task that batches
/// them by size and flush interval. When the channel is full the record is
/// dropped and counted; logging never waits on sink I/O.
#[derive(Clone)]
pub struct Dispatcher {
    sender: mpsc::Sender<LogRecord>,
    /// Records offered to the dispatcher.
    pub total_records: Arc<AtomicU64>,
    /// Records accepted into the channel.
    pub enqueued_records: Arc<AtomicU64>,
    /// Records lost to a full channel or a batch that kept failing.
    pub dropped_records: Arc<AtomicU64>,
    /// Records the sink accepted.
    pub written_records: Arc<AtomicU64>,
}

/// Point-in-time copy of the dispatcher counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchStats {
    pub total: u64,
    pub enqueued: u64,
    pub dropped: u64,
    pub written: u64,
}

impl Dispatcher {
    /// Spawn the background writer on the current tokio runtime.
    ///
    /// The task drains the channel until every `Dispatcher` clone is dropped,
    /// then writes the last partial batch, flushes the sink and exits.
    /// Degenerate `buffer`, `batch_size` and `flush_interval` values are
    /// raised to a small minimum.
    pub fn spawn(
        sink: Arc<dyn LogSink>,
        buffer: usize,
        batch_size: usize,
        flush_interval: Duration,
    ) -> (Self, JoinHandle<()>) {
        let buffer = buffer.max(16);
        let batch_size = batch_size.max(1);
        let flush_interval = flush_interval.max(Duration::from_millis(10));

        let (tx, mut rx) = mpsc::channel::<LogRecord>(buffer);

        let dispatcher = Self {
            sender: tx,
            total_records: Arc::new(AtomicU64::new(0)),
            enqueued_records: Arc::new(AtomicU64::new(0)),
            dropped_records: Arc::new(AtomicU64::new(0)),
            written_records: Arc::new(AtomicU64::new(0)),
        };

        let dropped_bg = Arc::clone(&dispatcher.dropped_records);
        let written_bg = Arc::clone(&dispatcher.written_records);

        let handle = tokio::spawn(async move {
            let mut batch = Vec::with_capacity(batch_size);
            let counters = (&*dropped_bg, &*written_bg);

            loop {
                tokio::select! {
                    received = rx.recv() => match received {
                        Some(record) => {
                            batch.push(record);
                            if batch.len() >= batch_size {
                                write_batch(&*sink, &mut batch, counters).await;
                            }
                        }
                        None => {
                            if !batch.is_empty() {
                                write_batch(&*sink, &mut batch, counters).await;
                            }
                            break;
                        }
                    },
                    _ = sleep(flush_interval) => {
                        if !batch.is_empty() {
                            write_batch(&*sink, &mut batch, counters).await;
                        }
                    }
                }
            }
        });

        (dispatcher, handle)
    }

    /// Queue a record. Returns `false` if it was dropped.
    pub fn dispatch(&self, record: LogRecord) -> bool {
        self.total_records.fetch_add(1, Ordering::Relaxed);
        match self.sender.try_send(record) {
            Ok(()) => {
                self.enqueued_records.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(err) => {
                self.dropped_records.fetch_add(1, Ordering::Relaxed);
                if let TrySendError::Full(_) = err {
                    eprintln!("log channel full, dropping log record");
                }
                false
            }
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            total: self.total_records.load(Ordering::Relaxed),
            enqueued: self.enqueued_records.load(Ordering::Relaxed),
            dropped: self.dropped_records.load(Ordering::Relaxed),
            written: self.written_records.load(Ordering::Relaxed),
        }
    }
}

async fn write_batch(sink: &dyn LogSink, batch: &mut Vec<LogRecord>, counters: (&AtomicU64, &AtomicU64)) {
    let (dropped, written) = counters;
    match send_batch(sink, batch).await {
        Ok(()) => {
            written.fetch_add(batch.len() as u64, Ordering::Relaxed);
        }
        Err(e) => {
            dropped.fetch_add(batch.len() as u64, Ordering::Relaxed);
            eprintln!(
                "{} sink: giving up on {} log records: {}",
                sink.name(),
                batch.len(),
                e
            );
        }
    }
    batch.clear();
}

/// Send every record of the batch, retrying the whole batch with
/// exponential backoff.
async fn send_batch(sink: &dyn LogSink, batch: &[LogRecord]) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut backoff = Duration::from_millis(100);
    let max_backoff = Duration::from_secs(10);
    let mut attempt = 1;

    loop {
        let mut result = Ok(());
        for record in batch {
            if let Err(e) = sink.send(record).await {
                result = Err(e);
                break;
            }
        }
        if result.is_ok() {
            result = sink.flush().await;
        }

        match result {
            Ok(()) => return Ok(()),
            Err(e) if attempt >= MAX_SEND_ATTEMPTS => return Err(e),
            Err(e) => {
                eprintln!("{} sink send failed ({}), retrying in {:?}", sink.name(), e, backoff);
                sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, max_backoff);
                attempt += 1;
            }
        }
    }
}
