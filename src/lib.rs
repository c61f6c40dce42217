// Configuration (TOML file + defaults)
pub mod config;

// Snapshot record schema and location fixes
pub mod fix;

// Snapshot file loading and entity filtering
pub mod snapshot;

// Per-entity append-only history logs
pub mod history;

// Producer liveness and keep-awake helper
pub mod producer;

// Poll loop
pub mod poller;

pub use config::TrackerConfig;
pub use fix::LocationFix;
pub use history::{AppendOutcome, HistoryWriter};
pub use poller::{CycleReport, Poller};
pub use snapshot::Snapshot;
