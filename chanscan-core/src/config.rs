use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};
use crate::store::{detect_region, Tunables};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ScanConfig {
    pub paths: PathsSection,
    pub discovery: DiscoverySection,
    pub scrape: ScrapeSection,
    pub orchestration: OrchestrationSection,
    pub chromium: ChromiumSection,
    pub flags: FlagsSection,
    pub user_agents: UserAgentSection,
    pub viewport: ViewportSection,
    pub fingerprint: FingerprintSection,
    pub proxy: ProxySection,
    pub human: HumanSection,
}

impl ScanConfig {
    /// Region for state and output file naming: explicit `paths.region`
    /// wins, otherwise detected from the config file name suffix.
    pub fn region(&self, config_path: &Path) -> String {
        self.paths
            .region
            .clone()
            .or_else(|| detect_region(&config_path.to_string_lossy()))
            .unwrap_or_else(|| "default".to_string())
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.paths.data_dir)
    }

    pub fn tunables(&self) -> Tunables {
        Tunables {
            max_discovery_retries: self.orchestration.max_discovery_retries,
            max_channel_retries: self.scrape.max_channel_retries,
            browser_restart_interval: self.scrape.browser_restart_interval,
            cooldown_after_failure_secs: self.orchestration.cooldown_after_failure_secs,
            cooldown_multiplier: self.orchestration.cooldown_multiplier,
            max_cooldown_secs: self.orchestration.max_cooldown_secs,
            restart_pause_secs: self.orchestration.restart_pause_secs,
            breaker_pause_secs: self.orchestration.breaker_pause_secs,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub data_dir: String,
    #[serde(default)]
    pub region: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoverySection {
    pub categories: Vec<String>,
    pub locations: Vec<String>,
    #[serde(default)]
    pub search_terms: Vec<String>,
    pub max_channels_per_query: usize,
    pub query_delay_secs: [u64; 2],
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScrapeSection {
    pub max_channel_retries: u32,
    pub browser_restart_interval: u32,
    pub max_videos: usize,
    pub download_thumbnails: bool,
    pub entity_delay_secs: [u64; 2],
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestrationSection {
    pub max_discovery_retries: u32,
    pub cooldown_after_failure_secs: u64,
    pub cooldown_multiplier: u64,
    pub max_cooldown_secs: u64,
    pub restart_pause_secs: u64,
    pub breaker_pause_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChromiumSection {
    #[serde(default)]
    pub executable_path: Option<String>,
    pub headless: bool,
    pub sandbox: bool,
    pub disable_gpu: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlagsSection {
    pub no_first_run: bool,
    pub disable_automation_controlled: bool,
    #[serde(default)]
    pub disable_blink_features: Vec<String>,
    pub mute_audio: bool,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub accept_language: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentSection {
    pub pool: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ViewportSection {
    pub resolutions: Vec<[u32; 2]>,
    pub jitter_pixels: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FingerprintSection {
    pub enable_canvas_noise: bool,
    pub enable_webgl_mask: bool,
    #[serde(default)]
    pub webgl_vendor: Option<String>,
    #[serde(default)]
    pub webgl_renderer: Option<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub hardware_concurrency: Vec<u32>,
    #[serde(default)]
    pub device_memory: Vec<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxySection {
    pub enabled: bool,
    #[serde(default)]
    pub pool: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HumanSection {
    pub mouse_moves: [u32; 2],
    pub scroll_burst_px: [u32; 2],
    pub scroll_pause_ms: [u32; 2],
}

pub fn load_scan_config<P: AsRef<Path>>(path: P) -> Result<ScanConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/chanscan_us.toml");
        let config = load_scan_config(&path).expect("config should parse");
        assert_eq!(config.region(&path), "us");
        assert!(config.user_agents.pool.len() >= 2);
        assert!(!config.discovery.categories.is_empty());
        assert_eq!(config.orchestration.cooldown_after_failure_secs, 60);

        let tunables = config.tunables();
        assert_eq!(tunables.max_discovery_retries, 5);
        assert_eq!(tunables.browser_restart_interval, 50);
    }

    #[test]
    fn explicit_region_overrides_path_detection() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/chanscan_us.toml");
        let mut config = load_scan_config(&path).expect("config should parse");
        config.paths.region = Some("gulf".to_string());
        assert_eq!(config.region(&path), "gulf");
    }
}
