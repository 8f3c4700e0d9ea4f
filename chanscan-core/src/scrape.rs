use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use crate::artifact::ArtifactStore;
use crate::backoff::CooldownPolicy;
use crate::browser::{ChannelSession, ScrapeError, SessionProvider};
use crate::pipeline::PipelineError;
use crate::shutdown::ShutdownFlag;
use crate::store::{save_json, ChannelQueue, ScrapeProgress, SessionStats, Tunables};

pub const CONSECUTIVE_FAILURE_THRESHOLD: usize = 5;

#[derive(Debug, Clone, Copy)]
pub struct ScrapeSummary {
    pub stats: SessionStats,
    pub browser_restarts: u64,
}

/// Cursor-driven scraping loop. One live browser session at a time; the
/// queue and the global progress are rewritten after every entity.
///
/// A rate-limited entity pins the persisted cursor at its position so a
/// later run reattempts it, while the in-memory pass keeps going; work
/// finished past the pin is protected by the completed set instead.
pub struct ScrapingStage {
    sessions: Arc<dyn SessionProvider>,
    artifacts: ArtifactStore,
    tunables: Tunables,
    policy: CooldownPolicy,
    entity_delay_secs: [u64; 2],
    shutdown: ShutdownFlag,
}

impl ScrapingStage {
    pub fn new(
        sessions: Arc<dyn SessionProvider>,
        artifacts: ArtifactStore,
        tunables: Tunables,
        entity_delay_secs: [u64; 2],
        shutdown: ShutdownFlag,
    ) -> Self {
        let policy = CooldownPolicy::from_tunables(&tunables);
        Self {
            sessions,
            artifacts,
            tunables,
            policy,
            entity_delay_secs,
            shutdown,
        }
    }

    pub async fn run(
        &self,
        queue: &mut ChannelQueue,
        queue_path: &Path,
        progress: &mut ScrapeProgress,
        progress_path: &Path,
    ) -> Result<ScrapeSummary, PipelineError> {
        let total = queue.channels.len();
        let mut session = self.sessions.open().await?;
        let mut restarts: u64 = 0;
        let mut successes_since_restart: u32 = 0;
        // First unresolved (rate-limited) position; the persisted cursor
        // never moves past it.
        let mut pin: Option<usize> = None;
        let mut index = queue.current_index;

        info!(
            total,
            resume_from = index,
            completed = queue.completed.len(),
            "scraping stage started"
        );

        while index < total {
            if self.shutdown.is_requested() {
                info!(index, "shutdown requested, flushing scrape checkpoints");
                self.checkpoint(queue, queue_path, progress, progress_path)?;
                session.close().await?;
                return Err(PipelineError::Shutdown);
            }

            let channel_id = queue.channels[index].clone();

            if progress.is_completed(&channel_id) || self.artifacts.exists(&channel_id) {
                progress.session_stats.skipped += 1;
                self.advance(queue, index + 1, pin);
                self.checkpoint(queue, queue_path, progress, progress_path)?;
                index += 1;
                continue;
            }

            if queue.attempts_for(&channel_id) >= self.tunables.max_channel_retries {
                warn!(channel = %channel_id, "retry budget exhausted, giving up");
                progress.session_stats.failed += 1;
                self.advance(queue, index + 1, pin);
                self.checkpoint(queue, queue_path, progress, progress_path)?;
                index += 1;
                continue;
            }

            match session.scrape_channel(&channel_id).await {
                Ok(mut record) => {
                    record.category = queue.category.clone();
                    record.location = queue.location.clone();
                    self.artifacts.save(&mut record).await?;
                    queue.mark_completed(&channel_id);
                    progress.mark_completed(&channel_id);
                    progress.session_stats.success += 1;
                    self.advance(queue, index + 1, pin);
                    self.checkpoint(queue, queue_path, progress, progress_path)?;

                    successes_since_restart += 1;
                    if successes_since_restart >= self.tunables.browser_restart_interval {
                        info!(
                            interval = self.tunables.browser_restart_interval,
                            "cadence browser restart"
                        );
                        session = self.restart(session, &mut restarts).await?;
                        successes_since_restart = 0;
                    }
                    self.pause_between_entities().await;
                }
                Err(ScrapeError::NotFound(_)) => {
                    warn!(channel = %channel_id, "channel not found");
                    queue.record_failure(&channel_id, "channel not found");
                    self.mirror_failure(queue, progress, &channel_id);
                    progress.session_stats.failed += 1;
                    self.advance(queue, index + 1, pin);
                    self.checkpoint(queue, queue_path, progress, progress_path)?;
                    session = self.breaker_check(queue, session, &mut restarts).await?;
                }
                Err(ScrapeError::RateLimited) => {
                    queue.record_failure(&channel_id, "rate limited");
                    self.mirror_failure(queue, progress, &channel_id);
                    if pin.is_none() {
                        pin = Some(index);
                    }
                    self.checkpoint(queue, queue_path, progress, progress_path)?;

                    let attempt = queue.attempts_for(&channel_id);
                    let cooldown = self.policy.cooldown(attempt);
                    warn!(
                        channel = %channel_id,
                        attempt,
                        cooldown_secs = cooldown.as_secs(),
                        "rate limited, cooling down and restarting browser"
                    );
                    tokio::time::sleep(cooldown).await;
                    session = self.restart(session, &mut restarts).await?;
                    successes_since_restart = 0;
                }
                Err(ScrapeError::Transient(message)) => {
                    warn!(channel = %channel_id, error = %message, "transient scrape failure");
                    queue.record_failure(&channel_id, &message);
                    self.mirror_failure(queue, progress, &channel_id);
                    progress.session_stats.failed += 1;
                    self.advance(queue, index + 1, pin);
                    self.checkpoint(queue, queue_path, progress, progress_path)?;
                    session = self.breaker_check(queue, session, &mut restarts).await?;
                }
            }
            index += 1;
        }

        session.close().await?;
        self.checkpoint(queue, queue_path, progress, progress_path)?;
        info!(
            success = progress.session_stats.success,
            failed = progress.session_stats.failed,
            skipped = progress.session_stats.skipped,
            restarts,
            "scraping stage finished"
        );
        Ok(ScrapeSummary {
            stats: progress.session_stats,
            browser_restarts: restarts,
        })
    }

    /// Advance the persisted cursor, clamped at the pinned position.
    fn advance(&self, queue: &mut ChannelQueue, target: usize, pin: Option<usize>) {
        let target = match pin {
            Some(held) => target.min(held),
            None => target,
        };
        queue.advance_cursor(target);
    }

    fn mirror_failure(&self, queue: &ChannelQueue, progress: &mut ScrapeProgress, id: &str) {
        if let Some(record) = queue.failed.get(id) {
            progress.record_failure(id, record.clone());
        }
    }

    /// Restart after the circuit breaker trips on a run of trailing
    /// failures.
    async fn breaker_check(
        &self,
        queue: &ChannelQueue,
        session: Box<dyn ChannelSession>,
        restarts: &mut u64,
    ) -> Result<Box<dyn ChannelSession>, PipelineError> {
        let consecutive = queue.consecutive_failures();
        if consecutive < CONSECUTIVE_FAILURE_THRESHOLD {
            return Ok(session);
        }
        warn!(
            consecutive,
            pause_secs = self.tunables.breaker_pause_secs,
            "consecutive failure threshold reached, restarting browser"
        );
        tokio::time::sleep(Duration::from_secs(self.tunables.breaker_pause_secs)).await;
        self.restart(session, restarts).await
    }

    async fn restart(
        &self,
        session: Box<dyn ChannelSession>,
        restarts: &mut u64,
    ) -> Result<Box<dyn ChannelSession>, PipelineError> {
        session.close().await?;
        tokio::time::sleep(Duration::from_secs(self.tunables.restart_pause_secs)).await;
        let fresh = self.sessions.open().await?;
        *restarts += 1;
        Ok(fresh)
    }

    fn checkpoint(
        &self,
        queue: &ChannelQueue,
        queue_path: &Path,
        progress: &mut ScrapeProgress,
        progress_path: &Path,
    ) -> Result<(), PipelineError> {
        save_json(queue_path, queue)?;
        progress.touch();
        save_json(progress_path, progress)?;
        Ok(())
    }

    async fn pause_between_entities(&self) {
        let [min, max] = self.entity_delay_secs;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::BrowserResult;
    use crate::channel::{ChannelRecord, DiscoveredChannel, InfluencerTier, UrlKind};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;
    use tempfile::{tempdir, TempDir};

    fn discovered(id: &str) -> DiscoveredChannel {
        DiscoveredChannel {
            channel_id: id.to_string(),
            url_type: UrlKind::Handle,
            original_url: format!("https://www.youtube.com/@{id}"),
            channel_name: None,
            subscriber_hint: None,
            origin_query: None,
            discovered_at: Utc::now(),
        }
    }

    fn record(id: &str) -> ChannelRecord {
        ChannelRecord {
            channel_id: id.to_string(),
            channel_name: Some(id.to_string()),
            handle: None,
            channel_url: format!("https://www.youtube.com/@{id}"),
            subscribers: 2_000,
            video_count: 5,
            total_views: 10_000,
            description: None,
            profile_pic_url: None,
            profile_pic_local: None,
            banner_url: None,
            is_verified: false,
            joined_date: None,
            country: None,
            external_links: vec![],
            recent_videos: vec![],
            influencer_tier: InfluencerTier::Micro,
            category: None,
            location: None,
            scraped_at: Utc::now(),
        }
    }

    enum Scripted {
        Success,
        NotFound,
        RateLimited,
        Transient,
    }

    #[derive(Default)]
    struct FakeState {
        outcomes: HashMap<String, Scripted>,
        scrape_calls: Vec<String>,
        sessions_opened: usize,
    }

    struct FakeProvider {
        state: Rc<RefCell<FakeState>>,
    }

    struct FakeSession {
        state: Rc<RefCell<FakeState>>,
    }

    #[async_trait(?Send)]
    impl SessionProvider for FakeProvider {
        async fn open(&self) -> BrowserResult<Box<dyn ChannelSession>> {
            self.state.borrow_mut().sessions_opened += 1;
            Ok(Box::new(FakeSession {
                state: Rc::clone(&self.state),
            }))
        }
    }

    #[async_trait(?Send)]
    impl ChannelSession for FakeSession {
        async fn search_channels(
            &mut self,
            _query: &str,
            _max_results: usize,
        ) -> Result<Vec<DiscoveredChannel>, ScrapeError> {
            unreachable!("scraping never searches")
        }

        async fn scrape_channel(&mut self, identifier: &str) -> Result<ChannelRecord, ScrapeError> {
            let mut state = self.state.borrow_mut();
            state.scrape_calls.push(identifier.to_string());
            match state.outcomes.get(identifier) {
                Some(Scripted::Success) | None => Ok(record(identifier)),
                Some(Scripted::NotFound) => Err(ScrapeError::NotFound(identifier.to_string())),
                Some(Scripted::RateLimited) => Err(ScrapeError::RateLimited),
                Some(Scripted::Transient) => {
                    Err(ScrapeError::Transient("timeout".to_string()))
                }
            }
        }

        async fn close(self: Box<Self>) -> BrowserResult<()> {
            Ok(())
        }
    }

    fn fast_tunables() -> Tunables {
        Tunables {
            cooldown_after_failure_secs: 0,
            restart_pause_secs: 0,
            breaker_pause_secs: 0,
            ..Tunables::default()
        }
    }

    fn stage(state: Rc<RefCell<FakeState>>, dir: &TempDir, tunables: Tunables) -> ScrapingStage {
        let artifacts = ArtifactStore::new(
            dir.path().join("output"),
            dir.path().join("thumbs"),
            false,
        );
        ScrapingStage::new(
            Arc::new(FakeProvider { state }),
            artifacts,
            tunables,
            [0, 0],
            ShutdownFlag::new(),
        )
    }

    fn queue_of(ids: &[&str]) -> ChannelQueue {
        ChannelQueue::new(ids.iter().map(|id| discovered(id)).collect(), None, None)
    }

    #[tokio::test]
    async fn three_entity_pass_matches_outcome_table() {
        let dir = tempdir().unwrap();
        let state = Rc::new(RefCell::new(FakeState::default()));
        {
            let mut s = state.borrow_mut();
            s.outcomes.insert("a".into(), Scripted::Success);
            s.outcomes.insert("b".into(), Scripted::NotFound);
            s.outcomes.insert("c".into(), Scripted::RateLimited);
        }
        let stage = stage(Rc::clone(&state), &dir, fast_tunables());
        let mut queue = queue_of(&["a", "b", "c"]);
        let mut progress = ScrapeProgress::default();

        let summary = stage
            .run(
                &mut queue,
                &dir.path().join("queue.json"),
                &mut progress,
                &dir.path().join("progress.json"),
            )
            .await
            .unwrap();

        assert_eq!(queue.completed, vec!["a"]);
        assert_eq!(queue.attempts_for("b"), 1);
        assert_eq!(queue.current_index, 2);
        assert_eq!(summary.stats.success, 1);
        assert_eq!(summary.stats.failed, 1);
        assert_eq!(summary.stats.skipped, 0);
        assert_eq!(summary.browser_restarts, 1);
    }

    #[tokio::test]
    async fn completed_rerun_is_idempotent() {
        let dir = tempdir().unwrap();
        let state = Rc::new(RefCell::new(FakeState::default()));
        let stage = stage(Rc::clone(&state), &dir, fast_tunables());
        let mut queue = queue_of(&["a", "b"]);
        let mut progress = ScrapeProgress::default();
        let queue_path = dir.path().join("queue.json");
        let progress_path = dir.path().join("progress.json");

        stage
            .run(&mut queue, &queue_path, &mut progress, &progress_path)
            .await
            .unwrap();
        assert_eq!(state.borrow().scrape_calls, vec!["a", "b"]);

        let mut rerun_queue = queue_of(&["a", "b"]);
        stage
            .run(&mut rerun_queue, &queue_path, &mut progress, &progress_path)
            .await
            .unwrap();
        // Second pass never reaches the browser.
        assert_eq!(state.borrow().scrape_calls, vec!["a", "b"]);
        assert_eq!(progress.session_stats.success, 2);
        assert_eq!(progress.session_stats.skipped, 2);
    }

    #[tokio::test]
    async fn retry_budget_exhaustion_gives_up() {
        let dir = tempdir().unwrap();
        let state = Rc::new(RefCell::new(FakeState::default()));
        let stage = stage(Rc::clone(&state), &dir, fast_tunables());
        let mut queue = queue_of(&["a"]);
        for _ in 0..3 {
            queue.record_failure("a", "timeout");
        }
        let mut progress = ScrapeProgress::default();

        let summary = stage
            .run(
                &mut queue,
                &dir.path().join("queue.json"),
                &mut progress,
                &dir.path().join("progress.json"),
            )
            .await
            .unwrap();

        assert!(state.borrow().scrape_calls.is_empty());
        assert_eq!(summary.stats.failed, 1);
        assert_eq!(queue.current_index, 1);
    }

    #[tokio::test]
    async fn cadence_restart_after_interval_successes() {
        let dir = tempdir().unwrap();
        let state = Rc::new(RefCell::new(FakeState::default()));
        let tunables = Tunables {
            browser_restart_interval: 2,
            ..fast_tunables()
        };
        let stage = stage(Rc::clone(&state), &dir, tunables);
        let mut queue = queue_of(&["a", "b", "c", "d", "e"]);
        let mut progress = ScrapeProgress::default();

        let summary = stage
            .run(
                &mut queue,
                &dir.path().join("queue.json"),
                &mut progress,
                &dir.path().join("progress.json"),
            )
            .await
            .unwrap();

        assert_eq!(summary.stats.success, 5);
        assert_eq!(summary.browser_restarts, 2);
        assert_eq!(state.borrow().sessions_opened, 3);
    }

    #[tokio::test]
    async fn circuit_breaker_restarts_after_consecutive_failures() {
        let dir = tempdir().unwrap();
        let state = Rc::new(RefCell::new(FakeState::default()));
        {
            let mut s = state.borrow_mut();
            for id in ["a", "b", "c", "d", "e"] {
                s.outcomes.insert(id.into(), Scripted::Transient);
            }
            s.outcomes.insert("f".into(), Scripted::Success);
        }
        let stage = stage(Rc::clone(&state), &dir, fast_tunables());
        let mut queue = queue_of(&["a", "b", "c", "d", "e", "f"]);
        let mut progress = ScrapeProgress::default();

        let summary = stage
            .run(
                &mut queue,
                &dir.path().join("queue.json"),
                &mut progress,
                &dir.path().join("progress.json"),
            )
            .await
            .unwrap();

        // Breaker trips once the fifth trailing failure lands.
        assert_eq!(summary.browser_restarts, 1);
        assert_eq!(summary.stats.failed, 5);
        assert_eq!(summary.stats.success, 1);
        assert_eq!(queue.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn rate_limit_pins_cursor_while_pass_continues() {
        let dir = tempdir().unwrap();
        let state = Rc::new(RefCell::new(FakeState::default()));
        state
            .borrow_mut()
            .outcomes
            .insert("b".into(), Scripted::RateLimited);
        let stage = stage(Rc::clone(&state), &dir, fast_tunables());
        let mut queue = queue_of(&["a", "b", "c"]);
        let mut progress = ScrapeProgress::default();

        stage
            .run(
                &mut queue,
                &dir.path().join("queue.json"),
                &mut progress,
                &dir.path().join("progress.json"),
            )
            .await
            .unwrap();

        // "c" was scraped, but resume still points at the unresolved "b".
        assert_eq!(queue.current_index, 1);
        assert!(progress.is_completed("c"));
        assert_eq!(state.borrow().scrape_calls, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn shutdown_before_entity_flushes_and_raises() {
        let dir = tempdir().unwrap();
        let state = Rc::new(RefCell::new(FakeState::default()));
        let shutdown = ShutdownFlag::new();
        shutdown.request();
        let artifacts = ArtifactStore::new(
            dir.path().join("output"),
            dir.path().join("thumbs"),
            false,
        );
        let stage = ScrapingStage::new(
            Arc::new(FakeProvider {
                state: Rc::clone(&state),
            }),
            artifacts,
            fast_tunables(),
            [0, 0],
            shutdown,
        );
        let mut queue = queue_of(&["a"]);
        let mut progress = ScrapeProgress::default();
        let queue_path = dir.path().join("queue.json");

        let err = stage
            .run(
                &mut queue,
                &queue_path,
                &mut progress,
                &dir.path().join("progress.json"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Shutdown));
        assert!(queue_path.exists());
        assert!(state.borrow().scrape_calls.is_empty());
    }
}
