mod error;
mod fingerprint;
mod human;
mod launcher;
mod scraper;
mod searcher;
mod session;

pub use error::{BrowserError, BrowserResult, ScrapeError};
pub use fingerprint::FingerprintMasker;
pub use human::HumanBehavior;
pub use launcher::{BrowserLauncher, BrowserSession, LaunchOverrides, ViewportSpec};
pub use scraper::ChannelScraper;
pub use searcher::ChannelSearcher;
pub use session::{ChannelSession, ChromiumSession, ChromiumSessionProvider, SessionProvider};
