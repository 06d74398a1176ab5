//! Result aggregation: the channel every agent produces into and the single
//! writer that drains it.
//!
//! The channel is the only mutable state shared across the whole run. It is
//! unbounded on purpose: losing or rejecting a record is worse than memory
//! growth, and producers must never stall mid-measurement.
use crate::error::{RunError, WriteError};
use crate::script::CustomTimers;
use async_channel::{Receiver, Sender};
use serde::Serialize;
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error};

pub const RESULTS_FILE: &str = "results.csv";

/// One measured iteration. Produced once by exactly one agent, consumed
/// exactly once by the results writer, not retained after persistence.
#[derive(Debug, Clone)]
pub struct ResultRecord {
    /// Seconds since the owning group started, wall clock.
    pub elapsed: f64,
    /// Unix epoch seconds at the end of the iteration.
    pub epoch: f64,
    pub group_name: Arc<str>,
    /// Iteration duration in seconds, monotonic clock.
    pub duration: f64,
    /// Empty string means the iteration succeeded.
    pub error: String,
    pub custom_timers: CustomTimers,
}

pub type ResultSender = Sender<ResultRecord>;
pub type ResultReceiver = Receiver<ResultRecord>;

/// Creates the aggregation channel: many agent producers, one consumer.
pub fn result_channel() -> (ResultSender, ResultReceiver) {
    async_channel::unbounded()
}

/// Live counters maintained by the writer and read by the progress loop.
/// The writer is the only mutator; readers take relaxed snapshots.
#[derive(Debug, Default)]
pub struct RunCounters {
    transactions: AtomicU64,
    timers: AtomicU64,
    errors: AtomicU64,
}

impl RunCounters {
    pub fn transactions(&self) -> u64 {
        self.transactions.load(Ordering::Relaxed)
    }

    pub fn timers(&self) -> u64 {
        self.timers.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

/// One persisted row of the result log.
#[derive(Serialize)]
struct Row<'a> {
    sequence: u64,
    elapsed: f64,
    epoch: f64,
    group_name: &'a str,
    duration: f64,
    error: &'a str,
    custom_timers: &'a str,
}

/// Sole consumer of the aggregation channel. Appends one quoted CSV row per
/// record with an immediate flush, keeps the live counters current and
/// optionally echoes a compact console line.
#[derive(Debug)]
pub struct ResultsWriter {
    rx: ResultReceiver,
    log: csv::Writer<File>,
    counters: Arc<RunCounters>,
    console_logging: bool,
    sequence: u64,
}

impl ResultsWriter {
    /// Creates the run's output directory and opens the result log. Failure
    /// is fatal to the whole run: without a writable output location there is
    /// no point starting any agent.
    pub fn new(
        rx: ResultReceiver,
        output_dir: &Path,
        console_logging: bool,
    ) -> Result<Self, RunError> {
        std::fs::create_dir_all(output_dir).map_err(|source| RunError::OutputDir {
            path: output_dir.to_path_buf(),
            source,
        })?;
        let path = output_dir.join(RESULTS_FILE);
        let file = File::create(&path).map_err(|source| RunError::ResultLog { path, source })?;
        let log = csv::WriterBuilder::new().has_headers(false).from_writer(file);

        Ok(Self {
            rx,
            log,
            counters: Arc::new(RunCounters::default()),
            console_logging,
            sequence: 0,
        })
    }

    pub fn counters(&self) -> Arc<RunCounters> {
        Arc::clone(&self.counters)
    }

    /// Spawns the writer thread. The thread exits once the channel is closed
    /// and fully drained; joining it is the coordinator's flush handshake.
    pub fn spawn(self) -> JoinHandle<()> {
        std::thread::spawn(move || self.drain())
    }

    fn drain(mut self) {
        while let Ok(record) = self.rx.recv_blocking() {
            if let Err(err) = self.persist(&record) {
                error!("abandoning result log: {err}");
                return;
            }
        }
        debug!("results writer drained after {} records", self.sequence);
    }

    fn persist(&mut self, record: &ResultRecord) -> Result<(), WriteError> {
        let sequence = self.sequence + 1;
        let timers = serde_json::to_string(&record.custom_timers)?;
        self.log.serialize(Row {
            sequence,
            elapsed: record.elapsed,
            epoch: record.epoch,
            group_name: record.group_name.as_ref(),
            duration: record.duration,
            error: &record.error,
            custom_timers: &timers,
        })?;
        self.log.flush()?;

        self.sequence = sequence;
        self.counters.transactions.fetch_add(1, Ordering::Relaxed);
        self.counters
            .timers
            .fetch_add(record.custom_timers.len() as u64, Ordering::Relaxed);
        if !record.error.is_empty() {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
        }

        if self.console_logging {
            println!(
                "{}, {:.3}, {}, {}, {:.3}, {}, {}",
                sequence,
                record.elapsed,
                record.epoch as i64,
                record.group_name,
                record.duration,
                record.error,
                timers,
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn record(group: &str, error: &str) -> ResultRecord {
        let mut custom_timers = HashMap::new();
        custom_timers.insert("db".to_string(), 0.02);
        ResultRecord {
            elapsed: 1.5,
            epoch: 1_700_000_000.0,
            group_name: group.into(),
            duration: 0.25,
            error: error.to_string(),
            custom_timers,
        }
    }

    fn read_rows(path: &Path) -> Vec<(u64, f64, f64, String, f64, String, String)> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)
            .unwrap();
        reader.deserialize().map(|row| row.unwrap()).collect()
    }

    #[test]
    fn persists_every_record_with_gap_free_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let output_dir = dir.path().join("results_test");

        let (tx, rx) = result_channel();
        let writer = ResultsWriter::new(rx, &output_dir, false).unwrap();
        let counters = writer.counters();
        let handle = writer.spawn();

        for i in 0..10 {
            let error = if i % 3 == 0 { "boom" } else { "" };
            tx.send_blocking(record("Home", error)).unwrap();
        }
        tx.close();
        handle.join().unwrap();

        let rows = read_rows(&output_dir.join(RESULTS_FILE));
        assert_eq!(rows.len(), 10);
        for (i, row) in rows.iter().enumerate() {
            assert_eq!(row.0, i as u64 + 1);
            assert_eq!(row.3, "Home");
        }
        assert_eq!(counters.transactions(), 10);
        assert_eq!(counters.timers(), 10);
        assert_eq!(counters.errors(), 4);
    }

    #[test]
    fn error_messages_with_commas_survive_quoting() {
        let dir = tempfile::tempdir().unwrap();
        let output_dir = dir.path().join("results_test");

        let (tx, rx) = result_channel();
        let writer = ResultsWriter::new(rx, &output_dir, false).unwrap();
        let handle = writer.spawn();

        let message = "connection refused, retry later";
        tx.send_blocking(record("Home", message)).unwrap();
        tx.close();
        handle.join().unwrap();

        let rows = read_rows(&output_dir.join(RESULTS_FILE));
        assert_eq!(rows[0].5, message);
    }

    #[test]
    fn custom_timers_round_trip_through_the_log() {
        let dir = tempfile::tempdir().unwrap();
        let output_dir = dir.path().join("results_test");

        let (tx, rx) = result_channel();
        let writer = ResultsWriter::new(rx, &output_dir, false).unwrap();
        let handle = writer.spawn();

        let mut rec = record("Home", "");
        rec.custom_timers.insert("render".to_string(), 0.01);
        tx.send_blocking(rec).unwrap();
        tx.close();
        handle.join().unwrap();

        let rows = read_rows(&output_dir.join(RESULTS_FILE));
        let timers: CustomTimers = serde_json::from_str(&rows[0].6).unwrap();
        assert_eq!(timers.get("db"), Some(&0.02));
        assert_eq!(timers.get("render"), Some(&0.01));
    }

    #[test]
    fn unwritable_output_location_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocked = dir.path().join("results");
        std::fs::write(&blocked, b"not a directory").unwrap();

        let (_tx, rx) = result_channel();
        let err = ResultsWriter::new(rx, &blocked.join("results_test"), false).unwrap_err();
        assert!(matches!(err, RunError::OutputDir { .. }));
    }

    #[test]
    fn blocked_result_log_names_the_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let output_dir = dir.path().join("results_test");
        // A directory squatting on the log file name makes File::create fail.
        std::fs::create_dir_all(output_dir.join(RESULTS_FILE)).unwrap();

        let (_tx, rx) = result_channel();
        let err = ResultsWriter::new(rx, &output_dir, false).unwrap_err();
        match err {
            RunError::ResultLog { path, .. } => {
                assert_eq!(path, output_dir.join(RESULTS_FILE));
            }
            other => panic!("expected result log error, got {other:?}"),
        }
    }
}
