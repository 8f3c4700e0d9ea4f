use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::artifact::ArtifactStore;
use crate::backoff::CooldownPolicy;
use crate::browser::{BrowserError, SessionProvider};
use crate::config::{DiscoverySection, ScrapeSection};
use crate::discovery::DiscoveryStage;
use crate::scrape::ScrapingStage;
use crate::shutdown::ShutdownFlag;
use crate::store::{
    load_json, ChannelQueue, DataLayout, DiscoveryProgress, Phase, PhaseStatus, PipelineState,
    ScrapeProgress, SessionStats, StoreError, Tunables,
};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("shutdown requested")]
    Shutdown,
    #[error("discovery produced no channels")]
    DiscoveryExhausted,
    #[error("discovery failed after {attempts} attempts")]
    DiscoveryFailed { attempts: u32 },
    #[error("browser failure: {0}")]
    Browser(#[from] BrowserError),
    #[error("checkpoint failure: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug)]
pub struct RunReport {
    pub phase: Phase,
    pub stats: SessionStats,
    pub channels_discovered: usize,
    pub state_file: PathBuf,
}

/// Phase machine: discovery, then scraping, then completed. Every
/// transition is persisted to the region's state file, so a later run
/// with `resume` picks up exactly where this one stopped.
pub struct Orchestrator {
    discovery: DiscoverySection,
    scrape: ScrapeSection,
    tunables: Tunables,
    layout: DataLayout,
    sessions: Arc<dyn SessionProvider>,
    shutdown: ShutdownFlag,
    resume: bool,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        discovery: DiscoverySection,
        scrape: ScrapeSection,
        tunables: Tunables,
        layout: DataLayout,
        sessions: Arc<dyn SessionProvider>,
        shutdown: ShutdownFlag,
        resume: bool,
    ) -> Self {
        Self {
            discovery,
            scrape,
            tunables,
            layout,
            sessions,
            shutdown,
            resume,
        }
    }

    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        let state_path = self.layout.state_file();
        let mut state = if self.resume {
            PipelineState::load_or_init(&state_path, self.layout.region(), self.tunables.clone())
        } else {
            PipelineState::new(self.layout.region(), self.tunables.clone())
        };

        if state.discovery.status == PhaseStatus::Completed {
            info!(
                queues = state.discovery.queue_files.len(),
                "discovery already completed, reusing queue files"
            );
        } else {
            state.set_phase(Phase::Discovery);
            state.discovery.status = PhaseStatus::Running;
            state.discovery.started_at.get_or_insert_with(Utc::now);
            state.save(&state_path)?;

            match self.run_discovery(&mut state, &state_path).await {
                Ok(channels_found) => {
                    state.discovery.status = PhaseStatus::Completed;
                    state.discovery.completed_at = Some(Utc::now());
                    state.stats.total_channels_discovered = channels_found as u64;
                    state.save(&state_path)?;
                }
                Err(PipelineError::Shutdown) => {
                    state.discovery.status = PhaseStatus::Interrupted;
                    state.save(&state_path)?;
                    info!(state = %state_path.display(), "run interrupted during discovery");
                    return Err(PipelineError::Shutdown);
                }
                Err(err) => {
                    state.discovery.status = PhaseStatus::Failed;
                    state.discovery.last_error = Some(err.to_string());
                    state.save(&state_path)?;
                    error!(error = %err, "discovery phase failed, scraping will not start");
                    return Err(err);
                }
            }
        }

        state.set_phase(Phase::Scraping);
        state.scraping.status = PhaseStatus::Running;
        state.scraping.started_at.get_or_insert_with(Utc::now);
        state.scraping.attempts += 1;
        state.stats.scraping_attempts += 1;
        state.scraping.queue_files = state.discovery.queue_files.clone();
        state.save(&state_path)?;

        match self.run_scraping(&mut state).await {
            Ok(stats) => {
                state.scraping.status = PhaseStatus::Completed;
                state.scraping.completed_at = Some(Utc::now());
                state.set_phase(Phase::Completed);
                state.save(&state_path)?;
                info!(
                    success = stats.success,
                    failed = stats.failed,
                    skipped = stats.skipped,
                    state = %state_path.display(),
                    "pipeline completed"
                );
                Ok(RunReport {
                    phase: Phase::Completed,
                    stats,
                    channels_discovered: state.stats.total_channels_discovered as usize,
                    state_file: state_path,
                })
            }
            Err(PipelineError::Shutdown) => {
                state.scraping.status = PhaseStatus::Interrupted;
                state.save(&state_path)?;
                info!(state = %state_path.display(), "run interrupted during scraping");
                Err(PipelineError::Shutdown)
            }
            Err(err) => {
                state.scraping.status = PhaseStatus::Failed;
                state.scraping.last_error = Some(err.to_string());
                state.save(&state_path)?;
                error!(error = %err, "scraping phase failed");
                Err(err)
            }
        }
    }

    /// Discovery with phase-level retries: the whole stage is retried
    /// up to `max_discovery_retries`, resuming from the progress file
    /// after the first failure, with an exponential cooldown between
    /// attempts. An empty result retries immediately.
    async fn run_discovery(
        &self,
        state: &mut PipelineState,
        state_path: &std::path::Path,
    ) -> Result<usize, PipelineError> {
        let policy = CooldownPolicy::from_tunables(&self.tunables);
        let stage = DiscoveryStage::new(
            Arc::clone(&self.sessions),
            self.discovery.clone(),
            self.layout.clone(),
            self.shutdown.clone(),
        );

        // One session id names the progress file, the record inside it
        // and the queue file materialized from it.
        let (progress_path, mut progress) = match &state.discovery.progress_file {
            Some(path) if path.exists() => {
                (path.clone(), load_json::<DiscoveryProgress, _>(path)?)
            }
            _ => {
                let session_id = Uuid::new_v4().simple().to_string();
                let path = self.layout.discovery_progress_file(&session_id);
                let progress = DiscoveryProgress::new(
                    session_id,
                    self.layout.region(),
                    0,
                    self.discovery.categories.clone(),
                    self.discovery.locations.clone(),
                );
                (path, progress)
            }
        };
        state.discovery.progress_file = Some(progress_path.clone());

        let max_attempts = self.tunables.max_discovery_retries.max(1);
        for attempt in 1..=max_attempts {
            state.discovery.attempts += 1;
            state.stats.discovery_attempts += 1;
            state.save(state_path)?;

            match stage.run(&mut progress, &progress_path).await {
                Ok(outcome) => {
                    state.discovery.queue_files = outcome.queue_files;
                    return Ok(outcome.channels_found);
                }
                Err(PipelineError::Shutdown) => return Err(PipelineError::Shutdown),
                Err(PipelineError::DiscoveryExhausted) => {
                    warn!(attempt, "discovery found no channels, retrying");
                    progress.completed = false;
                    progress.current_query_index = 0;
                    progress.completed_queries.clear();
                }
                Err(err) => {
                    warn!(attempt, error = %err, "discovery attempt failed");
                    if attempt < max_attempts {
                        let cooldown = policy.cooldown(attempt);
                        info!(cooldown_secs = cooldown.as_secs(), "cooling down before retry");
                        tokio::time::sleep(cooldown).await;
                    }
                }
            }
        }
        Err(PipelineError::DiscoveryFailed {
            attempts: max_attempts,
        })
    }

    async fn run_scraping(&self, state: &mut PipelineState) -> Result<SessionStats, PipelineError> {
        let artifacts = ArtifactStore::new(
            self.layout.output_dir(),
            self.layout.thumbnails_dir(),
            self.scrape.download_thumbnails,
        );
        let stage = ScrapingStage::new(
            Arc::clone(&self.sessions),
            artifacts,
            self.tunables.clone(),
            self.scrape.entity_delay_secs,
            self.shutdown.clone(),
        );

        let progress_path = self.layout.scrape_progress_file();
        let mut progress = if progress_path.exists() {
            load_json::<ScrapeProgress, _>(&progress_path)?
        } else {
            ScrapeProgress::default()
        };

        let mut totals = SessionStats::default();
        for queue_path in state.scraping.queue_files.clone() {
            let mut queue: ChannelQueue = load_json(&queue_path)?;
            let summary = stage
                .run(&mut queue, &queue_path, &mut progress, &progress_path)
                .await?;
            totals = summary.stats;
            state.stats.browser_restarts += summary.browser_restarts;
        }
        state.stats.total_channels_scraped = progress.session_stats.success;
        state.stats.total_channels_failed = progress.session_stats.failed;
        state.scraping.channels_scraped = progress.session_stats.success;
        state.scraping.channels_failed = progress.session_stats.failed;
        Ok(totals)
    }
}
