use chromiumoxide::page::Page;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, trace};

use crate::channel::{
    channel_page_url, clean_channel_name, parse_count, ChannelRecord, InfluencerTier, VideoRecord,
};

use super::error::{BrowserError, ScrapeError};
use super::human::HumanBehavior;

const THROTTLE_MARKERS: &[&str] = &[
    "unusual traffic",
    "verify you are human",
    "are you a robot",
    "captcha",
];

const NOT_FOUND_MARKERS: &[&str] = &[
    "this page isn't available",
    "this page is not available",
    "404 not found",
];

pub(crate) fn is_throttle_text(text: &str) -> bool {
    let lowered = text.to_lowercase();
    THROTTLE_MARKERS.iter().any(|marker| lowered.contains(marker))
}

pub(crate) fn is_not_found_text(text: &str) -> bool {
    let lowered = text.to_lowercase();
    NOT_FOUND_MARKERS.iter().any(|marker| lowered.contains(marker))
}

async fn visible_text(page: &Page) -> Result<String, ScrapeError> {
    let value = page
        .evaluate("document.body ? document.body.innerText.slice(0, 4000) : ''")
        .await
        .map_err(BrowserError::from)?
        .into_value::<String>()
        .map_err(|err| ScrapeError::Transient(format!("failed to read page text: {err}")))?;
    Ok(value)
}

/// Throttle detection shared by search and scrape: the interstitial URL
/// or its body text gives it away.
pub(crate) async fn throttle_page_detected(page: &Page) -> Result<bool, ScrapeError> {
    if let Some(url) = page.url().await.map_err(BrowserError::from)? {
        if url.contains("/sorry/") {
            return Ok(true);
        }
    }
    let text = visible_text(page).await?;
    Ok(is_throttle_text(&text))
}

#[derive(Debug, Clone, Deserialize)]
struct RawChannel {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    handle: Option<String>,
    #[serde(default)]
    subscribers: Option<String>,
    #[serde(default)]
    videos: Option<String>,
    #[serde(default)]
    views: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    avatar: Option<String>,
    #[serde(default)]
    banner: Option<String>,
    #[serde(default)]
    verified: bool,
    #[serde(default)]
    joined: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    links: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawVideo {
    #[serde(default)]
    video_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    views: Option<String>,
    #[serde(default)]
    thumbnail: Option<String>,
}

/// Extracts one channel's profile and recent uploads. All outcome
/// classification happens here; callers branch on the variant only.
#[derive(Debug, Clone)]
pub struct ChannelScraper {
    human: HumanBehavior,
    max_videos: usize,
}

impl ChannelScraper {
    pub fn new(human: HumanBehavior, max_videos: usize) -> Self {
        Self { human, max_videos }
    }

    pub async fn scrape(
        &self,
        page: &Page,
        identifier: &str,
    ) -> Result<ChannelRecord, ScrapeError> {
        let url = channel_page_url(identifier);
        trace!(channel = %identifier, url = %url, "opening channel page");
        page.goto(url.as_str()).await.map_err(BrowserError::from)?;
        page.wait_for_navigation().await.map_err(BrowserError::from)?;

        if throttle_page_detected(page).await? {
            return Err(ScrapeError::RateLimited);
        }
        let text = visible_text(page).await?;
        if is_not_found_text(&text) {
            return Err(ScrapeError::NotFound(identifier.to_string()));
        }

        self.dismiss_consent(page).await?;
        self.human.wander(page).await?;

        let raw = self.extract_channel(page).await?;
        if raw.name.is_none() && raw.subscribers.is_none() {
            return Err(ScrapeError::Transient(format!(
                "no channel data extracted for {identifier}"
            )));
        }

        let videos = self.scrape_recent_videos(page, &url).await?;
        let record = build_record(identifier, &url, raw, videos);
        debug!(
            channel = %identifier,
            subscribers = record.subscribers,
            videos = record.recent_videos.len(),
            "channel scraped"
        );
        Ok(record)
    }

    async fn dismiss_consent(&self, page: &Page) -> Result<(), ScrapeError> {
        let script = r#"
            (() => {
                const buttons = document.querySelectorAll(
                    'button[aria-label*="Accept"], button[aria-label*="Reject"], tp-yt-paper-button'
                );
                for (const button of buttons) {
                    const label = (button.textContent || '').toLowerCase();
                    if (label.includes('accept all') || label.includes('reject all')) {
                        button.click();
                        return true;
                    }
                }
                return false;
            })()
        "#;
        page.evaluate(script).await.map_err(BrowserError::from)?;
        Ok(())
    }

    async fn extract_channel(&self, page: &Page) -> Result<RawChannel, ScrapeError> {
        let value = page
            .evaluate(CHANNEL_PARSER)
            .await
            .map_err(BrowserError::from)?
            .into_value()
            .map_err(|err| {
                ScrapeError::Transient(format!("failed to decode channel payload: {err}"))
            })?;
        serde_json::from_value(value).map_err(|err| {
            ScrapeError::Transient(format!("failed to deserialize channel payload: {err}"))
        })
    }

    async fn scrape_recent_videos(
        &self,
        page: &Page,
        channel_url: &str,
    ) -> Result<Vec<VideoRecord>, ScrapeError> {
        if self.max_videos == 0 {
            return Ok(Vec::new());
        }
        let videos_url = format!("{}/videos", channel_url.trim_end_matches('/'));
        page.goto(videos_url.as_str())
            .await
            .map_err(BrowserError::from)?;
        page.wait_for_navigation().await.map_err(BrowserError::from)?;
        self.human.scroll_page(page, 2).await?;

        let value = page
            .evaluate(VIDEO_PARSER)
            .await
            .map_err(BrowserError::from)?
            .into_value()
            .map_err(|err| {
                ScrapeError::Transient(format!("failed to decode video payload: {err}"))
            })?;
        let raw: Vec<RawVideo> = serde_json::from_value(value).map_err(|err| {
            ScrapeError::Transient(format!("failed to deserialize video payload: {err}"))
        })?;

        Ok(raw
            .into_iter()
            .filter_map(|video| {
                let video_id = video.video_id?;
                Some(VideoRecord {
                    video_id,
                    title: video.title,
                    views: video.views.as_deref().map(parse_count),
                    thumbnail_url: video.thumbnail,
                    thumbnail_local: None,
                })
            })
            .take(self.max_videos)
            .collect())
    }
}

fn build_record(
    identifier: &str,
    url: &str,
    raw: RawChannel,
    videos: Vec<VideoRecord>,
) -> ChannelRecord {
    let subscribers = raw.subscribers.as_deref().map(parse_count).unwrap_or(0);
    let video_count = raw.videos.as_deref().map(parse_count).unwrap_or(0);
    let total_views = raw.views.as_deref().map(parse_count).unwrap_or(0);
    ChannelRecord {
        channel_id: identifier.to_string(),
        channel_name: raw.name.as_deref().map(clean_channel_name),
        handle: raw.handle,
        channel_url: url.to_string(),
        subscribers,
        video_count,
        total_views,
        description: raw.description,
        profile_pic_url: raw.avatar,
        profile_pic_local: None,
        banner_url: raw.banner,
        is_verified: raw.verified,
        joined_date: raw.joined,
        country: raw.country,
        external_links: raw.links,
        recent_videos: videos,
        influencer_tier: InfluencerTier::from_subscribers(subscribers),
        category: None,
        location: None,
        scraped_at: Utc::now(),
    }
}

const CHANNEL_PARSER: &str = r#"
(() => {
    const textOf = (selector) => {
        const el = document.querySelector(selector);
        return el ? el.textContent.trim() : null;
    };
    const header = {
        name: textOf('yt-dynamic-text-view-model h1, #channel-name #text, ytd-channel-name #text'),
        handle: textOf('yt-content-metadata-view-model span.yt-core-attributed-string, #channel-handle'),
        subscribers: null,
        videos: null,
        views: null,
        description: textOf('yt-description-preview-view-model span, #description'),
        avatar: null,
        banner: null,
        verified: !!document.querySelector('ytd-badge-supported-renderer [aria-label*="Verified"], .badge-style-type-verified'),
        joined: null,
        country: null,
        links: [],
    };
    document.querySelectorAll('yt-content-metadata-view-model span, #subscriber-count, #videos-count').forEach(el => {
        const text = (el.textContent || '').trim();
        if (/subscriber/i.test(text)) header.subscribers = text;
        else if (/video/i.test(text)) header.videos = text;
        else if (/view/i.test(text)) header.views = text;
    });
    const avatar = document.querySelector('yt-avatar-shape img, #avatar img');
    if (avatar && avatar.src) header.avatar = avatar.src;
    const banner = document.querySelector('yt-image-banner-view-model img, #banner img');
    if (banner && banner.src) header.banner = banner.src;
    document.querySelectorAll('yt-channel-external-link-view-model a, #links-section a').forEach(a => {
        if (a.href) header.links.push(a.href);
    });
    return header;
})()
"#;

const VIDEO_PARSER: &str = r#"
(() => {
    const results = [];
    const cards = document.querySelectorAll('ytd-rich-item-renderer, ytd-grid-video-renderer');
    cards.forEach(card => {
        const link = card.querySelector('a#thumbnail, a.yt-lockup-view-model-wiz__content-image');
        const title = card.querySelector('#video-title, h3');
        const meta = card.querySelector('#metadata-line span, .inline-metadata-item');
        const thumb = card.querySelector('img');
        if (!link || !link.href) return;
        const match = link.href.match(/[?&]v=([^&]+)/) || link.href.match(/shorts\/([^?&/]+)/);
        results.push({
            video_id: match ? match[1] : null,
            title: title ? title.textContent.trim() : null,
            views: meta ? meta.textContent.trim() : null,
            thumbnail: thumb && thumb.src ? thumb.src : null,
        });
    });
    return results;
})()
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_markers_match_interstitials() {
        assert!(is_throttle_text("Our systems have detected unusual traffic"));
        assert!(is_throttle_text("Please solve this CAPTCHA to continue"));
        assert!(!is_throttle_text("10M subscribers"));
    }

    #[test]
    fn not_found_markers_match_dead_pages() {
        assert!(is_not_found_text("This page isn't available. Sorry about that."));
        assert!(!is_not_found_text("Welcome to the channel"));
    }

    #[test]
    fn record_building_parses_counts_and_tier() {
        let raw = RawChannel {
            name: Some("Tech Channel Tech Channel".to_string()),
            handle: Some("@techchannel".to_string()),
            subscribers: Some("1.5M subscribers".to_string()),
            videos: Some("450 videos".to_string()),
            views: Some("320,000,000 views".to_string()),
            description: None,
            avatar: None,
            banner: None,
            verified: true,
            joined: None,
            country: Some("United States".to_string()),
            links: vec![],
        };
        let record = build_record("@techchannel", "https://www.youtube.com/@techchannel", raw, vec![]);
        assert_eq!(record.channel_name.as_deref(), Some("Tech Channel"));
        assert_eq!(record.subscribers, 1_500_000);
        assert_eq!(record.video_count, 450);
        assert_eq!(record.influencer_tier, InfluencerTier::Mega);
        assert!(record.is_verified);
    }
}
