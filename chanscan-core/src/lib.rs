pub mod artifact;
pub mod backoff;
pub mod browser;
pub mod channel;
pub mod config;
pub mod discovery;
pub mod error;
pub mod pipeline;
pub mod scrape;
pub mod shutdown;
pub mod store;

pub use artifact::{safe_id, ArtifactStore};
pub use backoff::CooldownPolicy;
pub use browser::{
    BrowserError, BrowserLauncher, BrowserResult, BrowserSession, ChannelSession,
    ChromiumSessionProvider, LaunchOverrides, ScrapeError, SessionProvider,
};
pub use channel::{
    channel_page_url, parse_channel_url, parse_count, ChannelRecord, DiscoveredChannel,
    InfluencerTier, UrlKind, VideoRecord,
};
pub use config::{load_scan_config, ScanConfig};
pub use discovery::{build_queries, DiscoveryOutcome, DiscoveryStage};
pub use error::{ConfigError, Result};
pub use pipeline::{Orchestrator, PipelineError, RunReport};
pub use scrape::{ScrapeSummary, ScrapingStage};
pub use shutdown::ShutdownFlag;
pub use store::{
    detect_region, load_json, save_json, ChannelQueue, DataLayout, DiscoveryProgress,
    FailureRecord, Phase, PhaseStatus, PipelineState, ScrapeProgress, SessionStats, StoreError,
    Tunables,
};
