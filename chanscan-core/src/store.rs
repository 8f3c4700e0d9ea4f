use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::channel::DiscoveredChannel;

pub const QUEUE_SCHEMA_VERSION: u32 = 1;
pub const PROGRESS_SCHEMA_VERSION: u32 = 1;
pub const STATE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read checkpoint {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("failed to decode checkpoint {path}: {source}")]
    Decode {
        source: serde_json::Error,
        path: PathBuf,
    },
    #[error("failed to encode checkpoint {path}: {source}")]
    Encode {
        source: serde_json::Error,
        path: PathBuf,
    },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Load a checkpoint document from disk.
pub fn load_json<T, P>(path: P) -> StoreResult<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    serde_json::from_str(&content).map_err(|source| StoreError::Decode {
        source,
        path: path.to_path_buf(),
    })
}

/// Persist a checkpoint document as a full-document overwrite.
///
/// Writes to a sibling temp file and renames over the target so a crash
/// mid-write never leaves a truncated checkpoint behind.
pub fn save_json<T, P>(path: P, document: &T) -> StoreResult<()>
where
    T: Serialize,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
            source,
            path: path.to_path_buf(),
        })?;
    }
    let payload = serde_json::to_string_pretty(document).map_err(|source| StoreError::Encode {
        source,
        path: path.to_path_buf(),
    })?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, payload).map_err(|source| StoreError::Io {
        source,
        path: tmp.clone(),
    })?;
    std::fs::rename(&tmp, path).map_err(|source| StoreError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    debug!(path = %path.display(), "checkpoint written");
    Ok(())
}

/// Region-scoped directory layout for queues, progress, state and
/// output artifacts.
#[derive(Debug, Clone)]
pub struct DataLayout {
    data_dir: PathBuf,
    region: String,
}

impl DataLayout {
    pub fn new(data_dir: impl Into<PathBuf>, region: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            region: region.into(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn queue_dir(&self) -> PathBuf {
        self.data_dir.join("queue").join(&self.region)
    }

    pub fn progress_dir(&self) -> PathBuf {
        self.data_dir.join("progress")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.data_dir.join(format!("output_{}", self.region))
    }

    pub fn thumbnails_dir(&self) -> PathBuf {
        self.data_dir.join(format!("thumbnails_{}", self.region))
    }

    pub fn state_file(&self) -> PathBuf {
        self.data_dir
            .join("orchestration")
            .join(format!("pipeline_state_{}.json", self.region))
    }

    pub fn scrape_progress_file(&self) -> PathBuf {
        self.data_dir
            .join(format!("scraper_progress_{}.json", self.region))
    }

    pub fn discovery_progress_file(&self, session_id: &str) -> PathBuf {
        self.progress_dir()
            .join(format!("discovery_progress_{}_{}.json", self.region, session_id))
    }

    pub fn queue_file(&self, session_id: &str) -> PathBuf {
        self.queue_dir()
            .join(format!("mixed_{}_{}.json", self.region, session_id))
    }
}

/// Detect a region tag from a config or queue file path (`_us`, `_uk`,
/// `_eur`, `_east`, `_gulf`, `_ind`).
pub fn detect_region(path: &str) -> Option<String> {
    let lowered = path.to_lowercase();
    ["us", "uk", "eur", "east", "gulf", "ind"]
        .into_iter()
        .find(|region| lowered.contains(&format!("_{region}")))
        .map(str::to_string)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailureRecord {
    pub attempts: u32,
    pub last_error: String,
    pub first_failed_at: DateTime<Utc>,
}

/// The scraping work list plus its checkpoint fields. Owned exclusively
/// by the scraping stage while it runs; rewritten after every entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelQueue {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub channels: Vec<String>,
    #[serde(default)]
    pub channel_details: Vec<DiscoveredChannel>,
    #[serde(default)]
    pub completed: Vec<String>,
    #[serde(default)]
    pub failed: BTreeMap<String, FailureRecord>,
    pub current_index: usize,
    pub created_at: DateTime<Utc>,
    pub total_count: usize,
}

impl ChannelQueue {
    pub fn new(
        channels: Vec<DiscoveredChannel>,
        category: Option<String>,
        location: Option<String>,
    ) -> Self {
        let ids = channels.iter().map(|c| c.channel_id.clone()).collect::<Vec<_>>();
        let total = ids.len();
        Self {
            version: QUEUE_SCHEMA_VERSION,
            category,
            location,
            channels: ids,
            channel_details: channels,
            completed: Vec::new(),
            failed: BTreeMap::new(),
            current_index: 0,
            created_at: Utc::now(),
            total_count: total,
        }
    }

    /// Advance the cursor. The cursor is monotonic within a run; a
    /// smaller target is ignored rather than rewinding progress.
    pub fn advance_cursor(&mut self, index: usize) {
        if index > self.current_index {
            self.current_index = index;
        }
    }

    pub fn mark_completed(&mut self, channel_id: &str) {
        if !self.completed.iter().any(|id| id == channel_id) {
            self.completed.push(channel_id.to_string());
        }
        self.failed.remove(channel_id);
    }

    pub fn record_failure(&mut self, channel_id: &str, error: &str) {
        match self.failed.get_mut(channel_id) {
            Some(record) => {
                record.attempts += 1;
                record.last_error = error.to_string();
            }
            None => {
                self.failed.insert(
                    channel_id.to_string(),
                    FailureRecord {
                        attempts: 1,
                        last_error: error.to_string(),
                        first_failed_at: Utc::now(),
                    },
                );
            }
        }
    }

    pub fn attempts_for(&self, channel_id: &str) -> u32 {
        self.failed.get(channel_id).map(|r| r.attempts).unwrap_or(0)
    }

    /// Count failures immediately behind the cursor, scanning backward
    /// over at most the last ten positions and stopping at the first
    /// non-failed entity. Drives the circuit breaker.
    pub fn consecutive_failures(&self) -> usize {
        if self.failed.is_empty() {
            return 0;
        }
        let mut consecutive = 0;
        let floor = self.current_index.saturating_sub(10);
        for index in (floor..self.current_index).rev() {
            let Some(channel_id) = self.channels.get(index) else {
                continue;
            };
            if self.failed.contains_key(channel_id) {
                consecutive += 1;
            } else {
                break;
            }
        }
        consecutive
    }
}

/// Resumable discovery checkpoint, rewritten after every query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryProgress {
    pub version: u32,
    pub session_id: String,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
    pub total_queries: usize,
    pub current_query_index: usize,
    #[serde(default)]
    pub completed_queries: Vec<String>,
    #[serde(default)]
    pub failed_queries: BTreeMap<String, u32>,
    #[serde(default)]
    pub discovered_channels: Vec<DiscoveredChannel>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl DiscoveryProgress {
    pub fn new(
        session_id: impl Into<String>,
        region: impl Into<String>,
        total_queries: usize,
        categories: Vec<String>,
        locations: Vec<String>,
    ) -> Self {
        Self {
            version: PROGRESS_SCHEMA_VERSION,
            session_id: session_id.into(),
            region: region.into(),
            config_path: None,
            total_queries,
            current_query_index: 0,
            completed_queries: Vec::new(),
            failed_queries: BTreeMap::new(),
            discovered_channels: Vec::new(),
            categories,
            locations,
            started_at: Utc::now(),
            last_updated: None,
            completed: false,
            completed_at: None,
        }
    }

    pub fn is_query_completed(&self, query: &str) -> bool {
        self.completed_queries.iter().any(|q| q == query)
    }

    pub fn mark_query_completed(&mut self, query: &str, next_index: usize) {
        if !self.is_query_completed(query) {
            self.completed_queries.push(query.to_string());
        }
        self.current_query_index = next_index;
    }

    pub fn record_query_failure(&mut self, query: &str, next_index: usize) {
        *self.failed_queries.entry(query.to_string()).or_insert(0) += 1;
        self.current_query_index = next_index;
    }

    pub fn mark_completed(&mut self) {
        self.completed = true;
        self.completed_at = Some(Utc::now());
    }

    pub fn touch(&mut self) {
        self.last_updated = Some(Utc::now());
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionStats {
    pub success: u64,
    pub failed: u64,
    pub skipped: u64,
}

/// Global scrape progress shared across queue files in a region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeProgress {
    pub version: u32,
    #[serde(default)]
    pub completed_channels: Vec<String>,
    #[serde(default)]
    pub failed_channels: BTreeMap<String, FailureRecord>,
    #[serde(default)]
    pub session_stats: SessionStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for ScrapeProgress {
    fn default() -> Self {
        Self {
            version: PROGRESS_SCHEMA_VERSION,
            completed_channels: Vec::new(),
            failed_channels: BTreeMap::new(),
            session_stats: SessionStats::default(),
            last_updated: None,
        }
    }
}

impl ScrapeProgress {
    pub fn is_completed(&self, channel_id: &str) -> bool {
        self.completed_channels.iter().any(|id| id == channel_id)
    }

    pub fn mark_completed(&mut self, channel_id: &str) {
        if !self.is_completed(channel_id) {
            self.completed_channels.push(channel_id.to_string());
        }
        self.failed_channels.remove(channel_id);
    }

    pub fn record_failure(&mut self, channel_id: &str, record: FailureRecord) {
        self.failed_channels.insert(channel_id.to_string(), record);
    }

    pub fn touch(&mut self) {
        self.last_updated = Some(Utc::now());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Discovery,
    Scraping,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Interrupted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryPhase {
    pub status: PhaseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_file: Option<PathBuf>,
    #[serde(default)]
    pub queue_files: Vec<PathBuf>,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapingPhase {
    pub status: PhaseStatus,
    #[serde(default)]
    pub queue_files: Vec<PathBuf>,
    pub channels_scraped: u64,
    pub channels_failed: u64,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    pub total_channels_discovered: u64,
    pub total_channels_scraped: u64,
    pub total_channels_failed: u64,
    pub discovery_attempts: u64,
    pub scraping_attempts: u64,
    pub browser_restarts: u64,
}

/// Retry and cadence knobs carried inside the state file so a resumed
/// run keeps the limits it started with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tunables {
    pub max_discovery_retries: u32,
    pub max_channel_retries: u32,
    pub browser_restart_interval: u32,
    pub cooldown_after_failure_secs: u64,
    pub cooldown_multiplier: u64,
    pub max_cooldown_secs: u64,
    pub restart_pause_secs: u64,
    pub breaker_pause_secs: u64,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            max_discovery_retries: 5,
            max_channel_retries: 3,
            browser_restart_interval: 50,
            cooldown_after_failure_secs: 60,
            cooldown_multiplier: 2,
            max_cooldown_secs: 600,
            restart_pause_secs: 5,
            breaker_pause_secs: 30,
        }
    }
}

/// Top-level orchestration record. One file per region; created on the
/// first run, mutated on every phase transition and checkpoint, never
/// deleted. Doubles as the resume anchor and an audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    pub version: u32,
    pub region: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub phase: Phase,
    pub discovery: DiscoveryPhase,
    pub scraping: ScrapingPhase,
    pub stats: PipelineStats,
    pub tunables: Tunables,
}

impl PipelineState {
    pub fn new(region: impl Into<String>, tunables: Tunables) -> Self {
        let now = Utc::now();
        Self {
            version: STATE_SCHEMA_VERSION,
            region: region.into(),
            created_at: now,
            last_updated: now,
            phase: Phase::Discovery,
            discovery: DiscoveryPhase {
                status: PhaseStatus::Pending,
                progress_file: None,
                queue_files: Vec::new(),
                attempts: 0,
                last_error: None,
                started_at: None,
                completed_at: None,
            },
            scraping: ScrapingPhase {
                status: PhaseStatus::Pending,
                queue_files: Vec::new(),
                channels_scraped: 0,
                channels_failed: 0,
                attempts: 0,
                last_error: None,
                started_at: None,
                completed_at: None,
            },
            stats: PipelineStats::default(),
            tunables,
        }
    }

    /// Load the state file if present, otherwise create a fresh record.
    pub fn load_or_init(path: &Path, region: &str, tunables: Tunables) -> Self {
        match load_json::<PipelineState, _>(path) {
            Ok(state) => state,
            Err(StoreError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                PipelineState::new(region, tunables)
            }
            Err(err) => {
                tracing::warn!(error = %err, "unreadable state file, starting fresh");
                PipelineState::new(region, tunables)
            }
        }
    }

    pub fn save(&mut self, path: &Path) -> StoreResult<()> {
        self.last_updated = Utc::now();
        save_json(path, self)
    }

    pub fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }
}
