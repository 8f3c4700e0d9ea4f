use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::page::Page;

use crate::channel::{ChannelRecord, DiscoveredChannel};
use crate::config::ScanConfig;

use super::error::{BrowserResult, ScrapeError};
use super::human::HumanBehavior;
use super::launcher::{BrowserLauncher, BrowserSession, LaunchOverrides};
use super::scraper::ChannelScraper;
use super::searcher::ChannelSearcher;

/// One browser-backed working session. Both stages hold exactly one at
/// a time; a restart closes the old session before opening a new one.
#[async_trait(?Send)]
pub trait ChannelSession {
    async fn search_channels(
        &mut self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<DiscoveredChannel>, ScrapeError>;

    async fn scrape_channel(&mut self, identifier: &str) -> Result<ChannelRecord, ScrapeError>;

    async fn close(self: Box<Self>) -> BrowserResult<()>;
}

#[async_trait(?Send)]
pub trait SessionProvider {
    async fn open(&self) -> BrowserResult<Box<dyn ChannelSession>>;
}

/// Production provider: every `open` launches a fresh Chromium
/// instance with a newly rotated fingerprint.
pub struct ChromiumSessionProvider {
    launcher: BrowserLauncher,
    overrides: LaunchOverrides,
    config: Arc<ScanConfig>,
}

impl ChromiumSessionProvider {
    pub fn new(config: Arc<ScanConfig>, overrides: LaunchOverrides) -> Self {
        Self {
            launcher: BrowserLauncher::new(Arc::clone(&config)),
            overrides,
            config,
        }
    }
}

#[async_trait(?Send)]
impl SessionProvider for ChromiumSessionProvider {
    async fn open(&self) -> BrowserResult<Box<dyn ChannelSession>> {
        let session = self
            .launcher
            .launch_with_overrides(self.overrides.clone())
            .await?;
        let page = session.new_page().await?;
        let human = HumanBehavior::new(self.config.human.clone());
        Ok(Box::new(ChromiumSession {
            session,
            page,
            searcher: ChannelSearcher::new(human.clone()),
            scraper: ChannelScraper::new(human, self.config.scrape.max_videos),
        }))
    }
}

pub struct ChromiumSession {
    session: BrowserSession,
    page: Page,
    searcher: ChannelSearcher,
    scraper: ChannelScraper,
}

#[async_trait(?Send)]
impl ChannelSession for ChromiumSession {
    async fn search_channels(
        &mut self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<DiscoveredChannel>, ScrapeError> {
        self.searcher.search(&self.page, query, max_results).await
    }

    async fn scrape_channel(&mut self, identifier: &str) -> Result<ChannelRecord, ScrapeError> {
        self.scraper.scrape(&self.page, identifier).await
    }

    async fn close(self: Box<Self>) -> BrowserResult<()> {
        self.session.shutdown().await
    }
}
