use crate::fix::LocationFix;
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

mod entity_log;
mod filename;

pub use entity_log::{encode_record, EntityLog, OpenedLog, HEADER};
pub use filename::{
    disambiguated_file_name, log_file_name, normalize_name, numbered_file_name,
};

/// What the writer did with a fix
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppendOutcome {
    /// A new row was written
    Appended,
    /// Not newer than the last recorded fix; nothing written
    Duplicate,
}

/// Writes fixes to one append-only log per entity.
///
/// Owns the last-seen map and every open log handle. It is driven by a
/// single task, so none of this state is shared or locked.
pub struct HistoryWriter {
    output_dir: PathBuf,

    /// entity_id -> time of the newest row in its log
    last_seen: HashMap<String, DateTime<Local>>,

    /// entity_id -> open log
    logs: HashMap<String, EntityLog>,

    /// file name -> entity_id that claimed it during this run
    claimed: HashMap<String, String>,
}

impl HistoryWriter {
    /// Create a writer, creating the output directory if needed
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self> {
        let output_dir = output_dir.into();
        fs::create_dir_all(&output_dir).with_context(|| {
            format!("Failed to create output directory {}", output_dir.display())
        })?;

        Ok(Self {
            output_dir,
            last_seen: HashMap::new(),
            logs: HashMap::new(),
            claimed: HashMap::new(),
        })
    }

    /// Record one fix.
    ///
    /// The fix is appended only if its event time is strictly newer than the
    /// last recorded time for its entity. The first fix for an entity opens
    /// (or creates) its log and seeds the last-seen time from the log's tail.
    pub fn record(&mut self, fix: &LocationFix) -> Result<AppendOutcome> {
        let time = fix.event_time()?;

        let Self {
            output_dir,
            last_seen,
            logs,
            claimed,
        } = self;

        let log = match logs.entry(fix.entity_id.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let path = claim_path(output_dir, claimed, fix);
                let opened = EntityLog::open_or_create(&path)?;

                if opened.created {
                    info!(entity_id = %fix.entity_id, path = %path.display(), "Created log");
                } else {
                    info!(
                        entity_id = %fix.entity_id,
                        path = %path.display(),
                        last_seen = ?opened.last_seen,
                        "Resuming log"
                    );
                }

                if let Some(recovered) = opened.last_seen {
                    last_seen.insert(fix.entity_id.clone(), recovered);
                }
                entry.insert(opened.log)
            }
        };

        if let Some(last) = last_seen.get(&fix.entity_id) {
            if time <= *last {
                debug!(
                    entity_id = %fix.entity_id,
                    time = %time,
                    "Fix not newer than last recorded, skipping"
                );
                return Ok(AppendOutcome::Duplicate);
            }
        }

        log.append(&time, fix)?;
        last_seen.insert(fix.entity_id.clone(), time);

        Ok(AppendOutcome::Appended)
    }

    /// Time of the newest recorded fix for an entity, if known
    pub fn last_seen(&self, entity_id: &str) -> Option<DateTime<Local>> {
        self.last_seen.get(entity_id).copied()
    }

    /// Path of an entity's open log
    pub fn log_path(&self, entity_id: &str) -> Option<&Path> {
        self.logs.get(entity_id).map(EntityLog::path)
    }

    pub fn open_log_count(&self) -> usize {
        self.logs.len()
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Sync and close every open log.
    ///
    /// All handles are closed even if one fails; the first error is returned.
    pub fn close(self) -> Result<()> {
        let count = self.logs.len();
        let mut first_err = None;

        for (entity_id, log) in self.logs {
            if let Err(e) = log.close() {
                warn!(entity_id = %entity_id, error = %e, "Failed to close log");
                first_err.get_or_insert(e);
            }
        }

        info!(logs = count, "Closed history logs");
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Pick the log path for a newly seen entity.
///
/// Two entities whose names normalize to the same file never share a log
/// within a run: the later one gets its identifier appended, then a counter
/// if that name is taken too. A log carrying the entity's identifier from an
/// earlier run wins over the plain name, so a restart that meets the
/// entities in a different order keeps writing to the same files.
fn claim_path(
    output_dir: &Path,
    claimed: &mut HashMap<String, String>,
    fix: &LocationFix,
) -> PathBuf {
    let plain = log_file_name(&fix.name, &fix.entity_id);
    let tagged = disambiguated_file_name(&fix.name, &fix.entity_id);
    let available = |file_name: &str| {
        claimed
            .get(file_name)
            .map_or(true, |owner| owner == &fix.entity_id)
    };

    let file_name = if tagged != plain
        && available(tagged.as_str())
        && output_dir.join(&tagged).exists()
    {
        info!(
            entity_id = %fix.entity_id,
            file = %tagged,
            "Using log with identifier from an earlier run"
        );
        tagged
    } else if available(plain.as_str()) {
        plain
    } else {
        let mut candidate = tagged;
        let mut counter = 2;
        while !available(candidate.as_str()) {
            candidate = numbered_file_name(&fix.name, &fix.entity_id, counter);
            counter += 1;
        }
        warn!(
            entity_id = %fix.entity_id,
            other_entity_id = ?claimed.get(&plain),
            file = %plain,
            using = %candidate,
            "Log file name already used by another device"
        );
        candidate
    };

    claimed.insert(file_name.clone(), fix.entity_id.clone());
    output_dir.join(file_name)
}
