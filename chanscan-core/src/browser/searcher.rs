use std::collections::HashSet;

use chromiumoxide::page::Page;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, trace};

use crate::channel::{clean_channel_name, parse_channel_url, DiscoveredChannel};

use super::error::{BrowserError, ScrapeError};
use super::human::HumanBehavior;
use super::scraper::throttle_page_detected;

#[derive(Debug, Clone, Deserialize)]
struct SearchResultRaw {
    url: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    subscribers: Option<String>,
}

/// Drives a YouTube results page filtered to channels and turns the
/// result cards into `DiscoveredChannel`s.
#[derive(Debug, Clone)]
pub struct ChannelSearcher {
    human: HumanBehavior,
}

impl ChannelSearcher {
    pub fn new(human: HumanBehavior) -> Self {
        Self { human }
    }

    /// Results URL with the channel-only filter applied.
    pub fn results_url(query: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
        format!("https://www.youtube.com/results?search_query={encoded}&sp=EgIQAg%253D%253D")
    }

    pub async fn search(
        &self,
        page: &Page,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<DiscoveredChannel>, ScrapeError> {
        let url = Self::results_url(query);
        trace!(query = %query, url = %url, "opening channel search");
        page.goto(url.as_str())
            .await
            .map_err(BrowserError::from)?;
        page.wait_for_navigation().await.map_err(BrowserError::from)?;

        if throttle_page_detected(page).await? {
            return Err(ScrapeError::RateLimited);
        }

        self.human.wander(page).await?;
        self.human.scroll_page(page, 3).await?;

        let raw = self.extract_results(page).await?;
        let mut seen = HashSet::new();
        let mut channels = Vec::new();
        for result in raw {
            let Some((identifier, kind)) = parse_channel_url(&result.url) else {
                continue;
            };
            if !seen.insert(identifier.clone()) {
                continue;
            }
            channels.push(DiscoveredChannel {
                channel_id: identifier,
                url_type: kind,
                original_url: result.url,
                channel_name: result.name.as_deref().map(clean_channel_name),
                subscriber_hint: result.subscribers,
                origin_query: Some(query.to_string()),
                discovered_at: Utc::now(),
            });
            if channels.len() >= max_results {
                break;
            }
        }
        debug!(query = %query, found = channels.len(), "channel search finished");
        Ok(channels)
    }

    async fn extract_results(&self, page: &Page) -> Result<Vec<SearchResultRaw>, ScrapeError> {
        let value = page
            .evaluate(RESULT_PARSER)
            .await
            .map_err(BrowserError::from)?
            .into_value()
            .map_err(|err| {
                ScrapeError::Transient(format!("failed to decode search results payload: {err}"))
            })?;
        serde_json::from_value(value).map_err(|err| {
            ScrapeError::Transient(format!("failed to deserialize search results: {err}"))
        })
    }
}

const RESULT_PARSER: &str = r#"
(() => {
    const results = [];
    const cards = document.querySelectorAll('ytd-channel-renderer');
    cards.forEach(card => {
        const link = card.querySelector('a#main-link, a.channel-link');
        const name = card.querySelector('#text.ytd-channel-name, yt-formatted-string#text');
        const subs = card.querySelector('#video-count, #subscribers');
        if (link && link.href) {
            results.push({
                url: link.href,
                name: name ? name.textContent.trim() : null,
                subscribers: subs ? subs.textContent.trim() : null,
            });
        }
    });
    if (results.length === 0) {
        document.querySelectorAll('a[href*="/@"], a[href*="/channel/"]').forEach(link => {
            results.push({ url: link.href, name: null, subscribers: null });
        });
    }
    return results;
})()
"#;
