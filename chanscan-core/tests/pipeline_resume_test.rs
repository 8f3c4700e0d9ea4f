use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tempfile::tempdir;

use chanscan_core::browser::{BrowserResult, ChannelSession, ScrapeError, SessionProvider};
use chanscan_core::channel::{ChannelRecord, DiscoveredChannel, InfluencerTier, UrlKind};
use chanscan_core::config::{DiscoverySection, ScrapeSection};
use chanscan_core::pipeline::{Orchestrator, PipelineError};
use chanscan_core::store::{DataLayout, Phase, PhaseStatus, PipelineState, Tunables};
use chanscan_core::ShutdownFlag;

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
        subscribers: 12_000,
        video_count: 40,
        total_views: 900_000,
        description: None,
        profile_pic_url: None,
        profile_pic_local: None,
        banner_url: None,
        is_verified: false,
        joined_date: None,
        country: None,
        external_links: vec![],
        recent_videos: vec![],
        influencer_tier: InfluencerTier::Mid,
        category: None,
        location: None,
        scraped_at: Utc::now(),
    }
}

#[derive(Default)]
struct SharedState {
    scrape_calls: Vec<String>,
    search_calls: Vec<String>,
    // Interrupt the run after this many total scrapes.
    interrupt_after: Option<usize>,
}

struct ScriptedProvider {
    state: Rc<RefCell<SharedState>>,
    shutdown: ShutdownFlag,
}

struct ScriptedSession {
    state: Rc<RefCell<SharedState>>,
    shutdown: ShutdownFlag,
}

#[async_trait(?Send)]
impl SessionProvider for ScriptedProvider {
    async fn open(&self) -> BrowserResult<Box<dyn ChannelSession>> {
        Ok(Box::new(ScriptedSession {
            state: Rc::clone(&self.state),
            shutdown: self.shutdown.clone(),
        }))
    }
}

#[async_trait(?Send)]
impl ChannelSession for ScriptedSession {
    async fn search_channels(
        &mut self,
        query: &str,
        _max_results: usize,
    ) -> Result<Vec<DiscoveredChannel>, ScrapeError> {
        self.state.borrow_mut().search_calls.push(query.to_string());
        Ok(vec![discovered("a"), discovered("b"), discovered("c")])
    }

    async fn scrape_channel(&mut self, identifier: &str) -> Result<ChannelRecord, ScrapeError> {
        let mut state = self.state.borrow_mut();
        state.scrape_calls.push(identifier.to_string());
        if let Some(limit) = state.interrupt_after {
            if state.scrape_calls.len() >= limit {
                self.shutdown.request();
            }
        }
        Ok(record(identifier))
    }

    async fn close(self: Box<Self>) -> BrowserResult<()> {
        Ok(())
    }
}

fn sections() -> (DiscoverySection, ScrapeSection) {
    (
        DiscoverySection {
            categories: vec![],
            locations: vec![],
            search_terms: vec!["q0".to_string()],
            max_channels_per_query: 30,
            query_delay_secs: [0, 0],
        },
        ScrapeSection {
            max_channel_retries: 3,
            browser_restart_interval: 50,
            max_videos: 0,
            download_thumbnails: false,
            entity_delay_secs: [0, 0],
        },
    )
}

fn tunables() -> Tunables {
    Tunables {
        cooldown_after_failure_secs: 0,
        restart_pause_secs: 0,
        breaker_pause_secs: 0,
        ..Tunables::default()
    }
}

#[tokio::test]
async fn interrupted_scrape_resumes_without_redoing_work() {
    let dir = tempdir().unwrap();
    let layout = DataLayout::new(dir.path(), "us");
    let state = Rc::new(RefCell::new(SharedState {
        interrupt_after: Some(1),
        ..SharedState::default()
    }));

    // First run: discovery completes, scraping stops after "a".
    let shutdown = ShutdownFlag::new();
    let (discovery, scrape) = sections();
    let first = Orchestrator::new(
        discovery,
        scrape,
        tunables(),
        layout.clone(),
        Arc::new(ScriptedProvider {
            state: Rc::clone(&state),
            shutdown: shutdown.clone(),
        }),
        shutdown.clone(),
        false,
    );
    let err = first.run().await.unwrap_err();
    assert!(matches!(err, PipelineError::Shutdown));
    assert_eq!(state.borrow().scrape_calls, vec!["a"]);

    let persisted = PipelineState::load_or_init(&layout.state_file(), "us", tunables());
    assert_eq!(persisted.discovery.status, PhaseStatus::Completed);
    assert_eq!(persisted.scraping.status, PhaseStatus::Interrupted);

    // Second run resumes: no new discovery, only "b" and "c" scraped.
    state.borrow_mut().interrupt_after = None;
    let searches_before = state.borrow().search_calls.len();
    let shutdown = ShutdownFlag::new();
    let (discovery, scrape) = sections();
    let second = Orchestrator::new(
        discovery,
        scrape,
        tunables(),
        layout.clone(),
        Arc::new(ScriptedProvider {
            state: Rc::clone(&state),
            shutdown: shutdown.clone(),
        }),
        shutdown,
        true,
    );
    let report = second.run().await.unwrap();

    assert_eq!(report.phase, Phase::Completed);
    assert_eq!(state.borrow().search_calls.len(), searches_before);
    assert_eq!(state.borrow().scrape_calls, vec!["a", "b", "c"]);
    assert_eq!(report.stats.success, 3);

    let persisted = PipelineState::load_or_init(&layout.state_file(), "us", tunables());
    assert_eq!(persisted.phase, Phase::Completed);
    assert_eq!(persisted.scraping.status, PhaseStatus::Completed);
}

#[tokio::test]
async fn completed_pipeline_is_idempotent_across_runs() {
    let dir = tempdir().unwrap();
    let layout = DataLayout::new(dir.path(), "us");
    let state = Rc::new(RefCell::new(SharedState::default()));

    let shutdown = ShutdownFlag::new();
    let (discovery, scrape) = sections();
    let first = Orchestrator::new(
        discovery,
        scrape,
        tunables(),
        layout.clone(),
        Arc::new(ScriptedProvider {
            state: Rc::clone(&state),
            shutdown: shutdown.clone(),
        }),
        shutdown,
        false,
    );
    first.run().await.unwrap();
    let scrapes = state.borrow().scrape_calls.len();
    assert_eq!(scrapes, 3);

    let shutdown = ShutdownFlag::new();
    let (discovery, scrape) = sections();
    let second = Orchestrator::new(
        discovery,
        scrape,
        tunables(),
        layout.clone(),
        Arc::new(ScriptedProvider {
            state: Rc::clone(&state),
            shutdown: shutdown.clone(),
        }),
        shutdown,
        true,
    );
    let report = second.run().await.unwrap();

    // Re-running the completed pipeline touches no external interface.
    assert_eq!(state.borrow().scrape_calls.len(), scrapes);
    assert_eq!(report.phase, Phase::Completed);
}
