use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use crate::browser::{ScrapeError, SessionProvider};
use crate::config::DiscoverySection;
use crate::pipeline::PipelineError;
use crate::shutdown::ShutdownFlag;
use crate::store::{save_json, ChannelQueue, DataLayout, DiscoveryProgress};

/// Build the ordered query list: either the explicit search terms, or
/// the categories x locations cross product.
pub fn build_queries(config: &DiscoverySection) -> Vec<String> {
    if !config.search_terms.is_empty() {
        return config.search_terms.clone();
    }
    let mut queries = Vec::new();
    for location in &config.locations {
        for category in &config.categories {
            queries.push(format!("{location} {category} influencer"));
        }
    }
    queries
}

#[derive(Debug)]
pub struct DiscoveryOutcome {
    pub queue_files: Vec<PathBuf>,
    pub channels_found: usize,
}

/// Walks the query list with one browser session, checkpointing the
/// progress document after every query. Failed queries are recorded and
/// left behind; the cursor advances regardless of outcome.
pub struct DiscoveryStage {
    sessions: Arc<dyn SessionProvider>,
    config: DiscoverySection,
    layout: DataLayout,
    shutdown: ShutdownFlag,
}

impl DiscoveryStage {
    pub fn new(
        sessions: Arc<dyn SessionProvider>,
        config: DiscoverySection,
        layout: DataLayout,
        shutdown: ShutdownFlag,
    ) -> Self {
        Self {
            sessions,
            config,
            layout,
            shutdown,
        }
    }

    pub async fn run(
        &self,
        progress: &mut DiscoveryProgress,
        progress_path: &Path,
    ) -> Result<DiscoveryOutcome, PipelineError> {
        let queries = build_queries(&self.config);
        progress.total_queries = queries.len();

        let mut seen: HashSet<String> = progress
            .discovered_channels
            .iter()
            .map(|c| c.channel_id.clone())
            .collect();

        let mut session = self.sessions.open().await?;
        let start = progress.current_query_index;
        info!(
            region = %progress.region,
            total = queries.len(),
            resume_from = start,
            "discovery stage started"
        );

        for (index, query) in queries.iter().enumerate().skip(start) {
            if self.shutdown.is_requested() {
                info!(query_index = index, "shutdown requested, flushing discovery progress");
                self.checkpoint(progress, progress_path)?;
                session.close().await?;
                return Err(PipelineError::Shutdown);
            }

            if progress.is_query_completed(query) {
                progress.current_query_index = index + 1;
                self.checkpoint(progress, progress_path)?;
                continue;
            }

            match session
                .search_channels(query, self.config.max_channels_per_query)
                .await
            {
                Ok(channels) => {
                    let mut added = 0;
                    for channel in channels {
                        if seen.insert(channel.channel_id.clone()) {
                            progress.discovered_channels.push(channel);
                            added += 1;
                        }
                    }
                    progress.mark_query_completed(query, index + 1);
                    info!(
                        query = %query,
                        added,
                        total = progress.discovered_channels.len(),
                        "query completed"
                    );
                }
                Err(err) => {
                    warn!(query = %query, error = %err, "query failed, moving on");
                    progress.record_query_failure(query, index + 1);
                    if matches!(err, ScrapeError::RateLimited) {
                        session.close().await?;
                        session = self.sessions.open().await?;
                    }
                }
            }
            self.checkpoint(progress, progress_path)?;

            if index + 1 < queries.len() {
                self.pause_between_queries().await;
            }
        }

        session.close().await?;

        if progress.discovered_channels.is_empty() {
            return Err(PipelineError::DiscoveryExhausted);
        }

        progress.mark_completed();
        self.checkpoint(progress, progress_path)?;

        let queue_file = self.materialize_queue(progress)?;
        info!(
            channels = progress.discovered_channels.len(),
            queue = %queue_file.display(),
            "discovery stage completed"
        );
        Ok(DiscoveryOutcome {
            channels_found: progress.discovered_channels.len(),
            queue_files: vec![queue_file],
        })
    }

    fn checkpoint(
        &self,
        progress: &mut DiscoveryProgress,
        path: &Path,
    ) -> Result<(), PipelineError> {
        progress.touch();
        save_json(path, progress)?;
        Ok(())
    }

    /// A single configured category or location annotates every record
    /// in the queue; mixed sessions stay unannotated.
    fn materialize_queue(&self, progress: &DiscoveryProgress) -> Result<PathBuf, PipelineError> {
        let category = match self.config.categories.as_slice() {
            [only] => Some(only.clone()),
            _ => None,
        };
        let location = match self.config.locations.as_slice() {
            [only] => Some(only.clone()),
            _ => None,
        };
        let queue = ChannelQueue::new(progress.discovered_channels.clone(), category, location);
        let path = self.layout.queue_file(&progress.session_id);
        save_json(&path, &queue)?;
        Ok(path)
    }

    async fn pause_between_queries(&self) {
        let [min, max] = self.config.query_delay_secs;
        if max == 0 {
            return;
        }
        let secs = {
            let mut rng = rand::thread_rng();
            rng.gen_range(min.min(max)..=max)
        };
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }
}
