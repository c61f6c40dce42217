use crate::config::TrackerConfig;
use crate::fix::{format_time, LocationFix};
use crate::history::{AppendOutcome, HistoryWriter};
use crate::producer::{self, ProducerWatch, Transition};
use crate::snapshot::Snapshot;
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Counts for one poll cycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Fixes decoded from the snapshot
    pub seen: usize,
    /// Dropped by the device filter
    pub filtered: usize,
    /// Written to a log
    pub appended: usize,
    /// Not newer than the last recorded fix
    pub duplicates: usize,
}

/// Polls the snapshot file and feeds new fixes to the history writer.
///
/// Owns the writer for its whole life; `run` hands it back on shutdown so
/// the caller can close the logs.
pub struct Poller {
    source_path: PathBuf,
    device_filter: Option<String>,
    producer_process: String,
    poll_interval: Duration,
    absent_backoff: Duration,
    writer: HistoryWriter,
    watch: ProducerWatch,
}

impl Poller {
    pub fn new(config: &TrackerConfig, source_path: PathBuf, writer: HistoryWriter) -> Self {
        Self {
            source_path,
            device_filter: config.device_filter().map(str::to_string),
            producer_process: config.producer_process.clone(),
            poll_interval: config.poll_interval(),
            absent_backoff: config.absent_backoff(),
            writer,
            watch: ProducerWatch::new(),
        }
    }

    /// Resolve paths from the config and open the output directory
    pub fn from_config(config: &TrackerConfig) -> Result<Self> {
        let (source_path, output_dir) = config.resolve_paths()?;
        let writer = HistoryWriter::new(output_dir)?;
        Ok(Self::new(config, source_path, writer))
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn writer(&self) -> &HistoryWriter {
        &self.writer
    }

    /// Run one cycle: read the snapshot, filter, and record every fix.
    ///
    /// Errors are not retried; a missing or malformed snapshot and any log
    /// I/O failure end the cycle with an error.
    pub fn poll_once(&mut self) -> Result<CycleReport> {
        let mut snapshot = Snapshot::load_from_file(&self.source_path)?;
        let filtered = snapshot.retain_name(self.device_filter.as_deref());

        let mut report = CycleReport {
            seen: snapshot.fix_count() + filtered,
            filtered,
            ..CycleReport::default()
        };

        for fix in &snapshot.fixes {
            match self.writer.record(fix)? {
                AppendOutcome::Appended => {
                    report.appended += 1;
                    print_status(fix)?;
                }
                AppendOutcome::Duplicate => report.duplicates += 1,
            }
        }

        Ok(report)
    }

    /// Poll until `shutdown` turns true (or its sender is dropped).
    ///
    /// Shutdown is observed between cycles and while waiting; a cycle in
    /// progress always completes. Returns the writer so the caller can close
    /// it, or the first fatal error.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<HistoryWriter> {
        info!(
            source = %self.source_path.display(),
            output = %self.writer.output_dir().display(),
            device = ?self.device_filter,
            interval_ms = self.poll_interval.as_millis() as u64,
            "Starting poll loop"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            if !wait_or_shutdown(self.poll_interval, &mut shutdown).await {
                break;
            }

            let running = producer::is_running(&self.producer_process).await;
            match self.watch.observe(running) {
                Transition::WentAbsent => warn!(
                    process = %self.producer_process,
                    "Producer app is not running; keep it open in the background to record locations"
                ),
                Transition::Recovered => {
                    info!(process = %self.producer_process, "Producer app is running again")
                }
                Transition::Unchanged => {}
            }

            if !running {
                if !wait_or_shutdown(self.absent_backoff, &mut shutdown).await {
                    break;
                }
                continue;
            }

            let report = self.poll_once()?;
            debug!(
                seen = report.seen,
                filtered = report.filtered,
                appended = report.appended,
                duplicates = report.duplicates,
                "Poll cycle complete"
            );
        }

        info!("Poll loop stopped");
        Ok(self.writer)
    }
}

/// Sleep for `duration`. Returns false if shutdown was requested meanwhile.
async fn wait_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        changed = shutdown.changed() => match changed {
            Ok(()) => !*shutdown.borrow(),
            Err(_) => false,
        },
    }
}

/// Console line for an accepted fix
fn print_status(fix: &LocationFix) -> Result<()> {
    let time = fix.event_time()?;
    println!("[{}] {}: {}", format_time(&time), fix.name, fix.full_address);
    Ok(())
}
