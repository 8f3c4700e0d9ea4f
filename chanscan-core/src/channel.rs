use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Which form of channel URL an identifier was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlKind {
    Handle,
    ChannelId,
    CustomUrl,
    LegacyUser,
}

impl fmt::Display for UrlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UrlKind::Handle => "handle",
            UrlKind::ChannelId => "channel_id",
            UrlKind::CustomUrl => "custom_url",
            UrlKind::LegacyUser => "legacy_user",
        };
        f.write_str(label)
    }
}

/// A channel sighted during discovery. Immutable once created;
/// deduplicated by `channel_id` for the lifetime of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredChannel {
    pub channel_id: String,
    pub url_type: UrlKind,
    pub original_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscriber_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_query: Option<String>,
    pub discovered_at: DateTime<Utc>,
}

/// Subscriber-count bands used downstream to bucket channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfluencerTier {
    Nano,
    Micro,
    Mid,
    Macro,
    Mega,
}

impl InfluencerTier {
    pub fn from_subscribers(subscribers: u64) -> Self {
        match subscribers {
            1_000_000.. => InfluencerTier::Mega,
            100_000.. => InfluencerTier::Macro,
            10_000.. => InfluencerTier::Mid,
            1_000.. => InfluencerTier::Micro,
            _ => InfluencerTier::Nano,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoRecord {
    pub video_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub views: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_local: Option<String>,
}

/// The scraped artifact persisted per channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    pub channel_url: String,
    pub subscribers: u64,
    pub video_count: u64,
    pub total_views: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_pic_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_pic_local: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner_url: Option<String>,
    pub is_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joined_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default)]
    pub external_links: Vec<String>,
    #[serde(default)]
    pub recent_videos: Vec<VideoRecord>,
    pub influencer_tier: InfluencerTier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub scraped_at: DateTime<Utc>,
}

/// Normalize a channel identifier into a canonical channel page URL.
pub fn channel_page_url(identifier: &str) -> String {
    if identifier.starts_with('@') {
        format!("https://www.youtube.com/{identifier}")
    } else if identifier.starts_with("UC") && identifier.len() == 24 {
        format!("https://www.youtube.com/channel/{identifier}")
    } else if identifier.contains("youtube.com") {
        identifier.to_string()
    } else {
        format!("https://www.youtube.com/@{identifier}")
    }
}

fn url_patterns() -> &'static [(Regex, UrlKind)] {
    static PATTERNS: OnceLock<Vec<(Regex, UrlKind)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            (
                Regex::new(r"(?i)youtube\.com/@([^/\?&]+)").unwrap(),
                UrlKind::Handle,
            ),
            (
                Regex::new(r"(?i)youtube\.com/channel/([^/\?&]+)").unwrap(),
                UrlKind::ChannelId,
            ),
            (
                Regex::new(r"(?i)youtube\.com/c/([^/\?&]+)").unwrap(),
                UrlKind::CustomUrl,
            ),
            (
                Regex::new(r"(?i)youtube\.com/user/([^/\?&]+)").unwrap(),
                UrlKind::LegacyUser,
            ),
        ]
    })
}

/// Extract a channel identifier from any of the supported URL forms.
/// Unwraps Google redirect URLs (`google.com/...?url=<target>`) first.
pub fn parse_channel_url(url: &str) -> Option<(String, UrlKind)> {
    let mut target = url.to_string();
    if target.contains("google.com") && target.contains("url=") {
        if let Ok(parsed) = url::Url::parse(&target) {
            if let Some((_, value)) = parsed.query_pairs().find(|(key, _)| key == "url") {
                target = value.into_owned();
            }
        }
    }

    for (pattern, kind) in url_patterns() {
        if let Some(captures) = pattern.captures(&target) {
            let identifier = captures.get(1)?.as_str().to_string();
            return Some((identifier, *kind));
        }
    }
    None
}

/// Collapse whitespace and strip the duplicated display names YouTube
/// renders in some result layouts ("Tech Channel Tech Channel").
pub fn clean_channel_name(name: &str) -> String {
    let collapsed = name.split_whitespace().collect::<Vec<_>>().join(" ");
    let words: Vec<&str> = collapsed.split(' ').collect();
    if words.len() >= 2 && words.len() % 2 == 0 {
        let half = words.len() / 2;
        if words[..half] == words[half..] {
            return words[..half].join(" ");
        }
    }
    collapsed
}

/// Parse counts rendered as "1.5M subscribers", "500K views", "1,234".
pub fn parse_count(text: &str) -> u64 {
    let mut cleaned = text.to_lowercase().replace([',', ' '], "");
    for suffix in ["subscribers", "subscriber", "videos", "video", "views", "view"] {
        cleaned = cleaned.replace(suffix, "");
    }

    let (digits, scale) = if let Some(stripped) = cleaned.strip_suffix('k') {
        (stripped, 1_000.0)
    } else if let Some(stripped) = cleaned.strip_suffix('m') {
        (stripped, 1_000_000.0)
    } else if let Some(stripped) = cleaned.strip_suffix('b') {
        (stripped, 1_000_000_000.0)
    } else {
        (cleaned.as_str(), 1.0)
    };

    match digits.parse::<f64>() {
        Ok(value) if value >= 0.0 => (value * scale) as u64,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_url_forms() {
        let cases = [
            ("https://www.youtube.com/@mkbhd", "mkbhd", UrlKind::Handle),
            (
                "https://youtube.com/channel/UCBJycsmduvYEL83R_U4JriQ",
                "UCBJycsmduvYEL83R_U4JriQ",
                UrlKind::ChannelId,
            ),
            (
                "https://www.youtube.com/c/TechChannel?view=0",
                "TechChannel",
                UrlKind::CustomUrl,
            ),
            (
                "https://www.youtube.com/user/oldtimer",
                "oldtimer",
                UrlKind::LegacyUser,
            ),
        ];
        for (url, id, kind) in cases {
            let (parsed_id, parsed_kind) = parse_channel_url(url).unwrap();
            assert_eq!(parsed_id, id);
            assert_eq!(parsed_kind, kind);
        }
    }

    #[test]
    fn unwraps_google_redirects() {
        let url = "https://www.google.com/url?sa=t&url=https%3A%2F%2Fwww.youtube.com%2F%40mkbhd";
        let (id, kind) = parse_channel_url(url).unwrap();
        assert_eq!(id, "mkbhd");
        assert_eq!(kind, UrlKind::Handle);
    }

    #[test]
    fn rejects_non_channel_urls() {
        assert!(parse_channel_url("https://www.youtube.com/watch?v=abc123").is_none());
        assert!(parse_channel_url("https://example.com/@notyoutube").is_none());
    }

    #[test]
    fn count_parsing_handles_suffixes() {
        assert_eq!(parse_count("1.5M subscribers"), 1_500_000);
        assert_eq!(parse_count("500K subscribers"), 500_000);
        assert_eq!(parse_count("1.2B views"), 1_200_000_000);
        assert_eq!(parse_count("1,234"), 1_234);
        assert_eq!(parse_count("450 videos"), 450);
        assert_eq!(parse_count("garbage"), 0);
    }

    #[test]
    fn cleans_duplicated_display_names() {
        assert_eq!(clean_channel_name("Tech Channel  Tech Channel"), "Tech Channel");
        assert_eq!(clean_channel_name("  Solo Name "), "Solo Name");
        assert_eq!(clean_channel_name("One Two Three"), "One Two Three");
    }

    #[test]
    fn tier_thresholds() {
        assert_eq!(InfluencerTier::from_subscribers(999), InfluencerTier::Nano);
        assert_eq!(InfluencerTier::from_subscribers(1_000), InfluencerTier::Micro);
        assert_eq!(InfluencerTier::from_subscribers(10_000), InfluencerTier::Mid);
        assert_eq!(InfluencerTier::from_subscribers(100_000), InfluencerTier::Macro);
        assert_eq!(InfluencerTier::from_subscribers(5_000_000), InfluencerTier::Mega);
    }

    #[test]
    fn channel_url_normalization() {
        assert_eq!(
            channel_page_url("@mkbhd"),
            "https://www.youtube.com/@mkbhd"
        );
        assert_eq!(
            channel_page_url("UCBJycsmduvYEL83R_U4JriQ"),
            "https://www.youtube.com/channel/UCBJycsmduvYEL83R_U4JriQ"
        );
        assert_eq!(
            channel_page_url("plainname"),
            "https://www.youtube.com/@plainname"
        );
    }
}
