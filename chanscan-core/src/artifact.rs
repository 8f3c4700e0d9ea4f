use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::channel::ChannelRecord;
use crate::store::{save_json, StoreResult};

/// Sanitize a channel identifier into a filesystem-safe file stem.
pub fn safe_id(identifier: &str) -> String {
    identifier
        .trim_start_matches('@')
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '?' | '*' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect()
}

/// Writes scraped channel records to the region-scoped output directory
/// and fetches their images. An existing artifact doubles as the
/// completion marker for resume.
pub struct ArtifactStore {
    output_dir: PathBuf,
    thumbnails_dir: PathBuf,
    download_thumbnails: bool,
    http: reqwest::Client,
}

impl ArtifactStore {
    pub fn new(
        output_dir: impl Into<PathBuf>,
        thumbnails_dir: impl Into<PathBuf>,
        download_thumbnails: bool,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap_or_default();
        Self {
            output_dir: output_dir.into(),
            thumbnails_dir: thumbnails_dir.into(),
            download_thumbnails,
            http,
        }
    }

    pub fn artifact_path(&self, identifier: &str) -> PathBuf {
        self.output_dir.join(format!("{}.json", safe_id(identifier)))
    }

    pub fn exists(&self, identifier: &str) -> bool {
        self.artifact_path(identifier).exists()
    }

    /// Persist the record, fetching avatar and video thumbnails first
    /// so their local paths land in the artifact. Image failures are
    /// logged and skipped; the JSON write is the only fatal step.
    pub async fn save(&self, record: &mut ChannelRecord) -> StoreResult<PathBuf> {
        if self.download_thumbnails {
            self.fetch_images(record).await;
        }
        let path = self.artifact_path(&record.channel_id);
        save_json(&path, record)?;
        debug!(channel = %record.channel_id, path = %path.display(), "artifact written");
        Ok(path)
    }

    async fn fetch_images(&self, record: &mut ChannelRecord) {
        let stem = safe_id(&record.channel_id);
        if let Some(url) = record.profile_pic_url.clone() {
            let dest = self.thumbnails_dir.join(format!("{stem}_avatar.jpg"));
            if self.download_image(&url, &dest).await {
                record.profile_pic_local = Some(dest.to_string_lossy().into_owned());
            }
        }
        for (index, video) in record.recent_videos.iter_mut().enumerate() {
            let Some(url) = video.thumbnail_url.clone() else {
                continue;
            };
            let dest = self.thumbnails_dir.join(format!("{stem}_video{index}.jpg"));
            if self.download_image(&url, &dest).await {
                video.thumbnail_local = Some(dest.to_string_lossy().into_owned());
            }
        }
    }

    async fn download_image(&self, url: &str, dest: &Path) -> bool {
        if let Some(parent) = dest.parent() {
            if let Err(err) = tokio::fs::create_dir_all(parent).await {
                warn!(error = %err, "failed to create thumbnails directory");
                return false;
            }
        }
        let response = match self.http.get(url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!(url = %url, status = %response.status(), "image fetch refused");
                return false;
            }
            Err(err) => {
                warn!(url = %url, error = %err, "image fetch failed");
                return false;
            }
        };
        match response.bytes().await {
            Ok(bytes) => match tokio::fs::write(dest, &bytes).await {
                Ok(()) => true,
                Err(err) => {
                    warn!(path = %dest.display(), error = %err, "image write failed");
                    false
                }
            },
            Err(err) => {
                warn!(url = %url, error = %err, "image body read failed");
                false
            }
        }
    }
}
