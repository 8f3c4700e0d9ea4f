use thiserror::Error;

pub type BrowserResult<T> = Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("chromium launch failed: {0}")]
    Launch(String),
    #[error("cdp error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("timeout waiting for {0}")]
    Timeout(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl From<tokio::task::JoinError> for BrowserError {
    fn from(err: tokio::task::JoinError) -> Self {
        BrowserError::Unexpected(err.to_string())
    }
}

/// Outcome classification for a single channel attempt. Classified once
/// at the browser boundary; the stages only branch on the variant.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// Permanent: the channel page does not exist. Never retried.
    #[error("channel not found: {0}")]
    NotFound(String),
    /// The target is throttling us. The current browser session is
    /// burned; cool down, restart, and reattempt in a later pass.
    #[error("rate limited by target")]
    RateLimited,
    /// Anything else. Retried within the per-channel budget.
    #[error("transient failure: {0}")]
    Transient(String),
}

impl From<BrowserError> for ScrapeError {
    fn from(err: BrowserError) -> Self {
        ScrapeError::Transient(err.to_string())
    }
}
