use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use chanscan_core::pipeline::PipelineError;
use chanscan_core::store::{
    load_json, DataLayout, DiscoveryProgress, PipelineState, ScrapeProgress,
};
use chanscan_core::{
    load_scan_config, ArtifactStore, ChromiumSessionProvider, DiscoveryStage, LaunchOverrides,
    Orchestrator, ScanConfig, ScrapingStage, ShutdownFlag,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] chanscan_core::ConfigError),
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("checkpoint error: {0}")]
    Store(#[from] chanscan_core::StoreError),
    #[error("browser error: {0}")]
    Browser(#[from] chanscan_core::BrowserError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("required resource missing: {0}")]
    MissingResource(String),
}

/// Exit code for the process: interrupted runs get the conventional
/// SIGINT code so wrappers can tell them from hard failures.
pub fn exit_code(err: &AppError) -> i32 {
    match err {
        AppError::Pipeline(PipelineError::Shutdown) => 130,
        _ => 1,
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Channel discovery and scraping pipeline", long_about = None)]
pub struct Cli {
    /// Pipeline config file; the region is detected from its name
    #[arg(long, default_value = "configs/chanscan_us.toml")]
    pub config: PathBuf,
    /// Override for paths.data_dir
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Override the detected region tag
    #[arg(long)]
    pub region: Option<String>,
    /// Run Chromium with a visible window
    #[arg(long, default_value_t = false)]
    pub no_headless: bool,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full pipeline: discovery, then scraping
    Run(RunArgs),
    /// Run only the discovery stage
    Discover(RunArgs),
    /// Run only the scraping stage against existing queue files
    Scrape(ScrapeArgs),
    /// Show the persisted pipeline state for the region
    Status,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Resume from the persisted state instead of starting fresh
    #[arg(long, default_value_t = false)]
    pub resume: bool,
}

#[derive(Args, Debug)]
pub struct ScrapeArgs {
    /// Queue file to process; defaults to every queue file in the
    /// region's queue directory
    #[arg(long)]
    pub queue: Option<PathBuf>,
}

struct AppContext {
    config: Arc<ScanConfig>,
    layout: DataLayout,
    shutdown: ShutdownFlag,
    overrides: LaunchOverrides,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let mut config = load_scan_config(&cli.config)?;
        if let Some(data_dir) = &cli.data_dir {
            config.paths.data_dir = data_dir.to_string_lossy().into_owned();
        }
        if let Some(region) = &cli.region {
            config.paths.region = Some(region.clone());
        }
        let region = config.region(&cli.config);
        let layout = DataLayout::new(config.data_dir(), region);
        let overrides = LaunchOverrides {
            headless: cli.no_headless.then_some(false),
        };
        Ok(Self {
            config: Arc::new(config),
            layout,
            shutdown: ShutdownFlag::new(),
            overrides,
        })
    }

    fn provider(&self) -> Arc<ChromiumSessionProvider> {
        Arc::new(ChromiumSessionProvider::new(
            Arc::clone(&self.config),
            self.overrides.clone(),
        ))
    }

    fn wire_ctrl_c(&self) {
        let flag = self.shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, finishing current unit before exit");
                flag.request();
            }
        });
    }

    async fn run_pipeline(&self, resume: bool) -> Result<RunSummary> {
        let orchestrator = Orchestrator::new(
            self.config.discovery.clone(),
            self.config.scrape.clone(),
            self.config.tunables(),
            self.layout.clone(),
            self.provider(),
            self.shutdown.clone(),
            resume,
        );
        let report = orchestrator.run().await?;
        Ok(RunSummary {
            region: self.layout.region().to_string(),
            channels_discovered: report.channels_discovered,
            success: report.stats.success,
            failed: report.stats.failed,
            skipped: report.stats.skipped,
            state_file: report.state_file,
        })
    }

    async fn run_discovery_only(&self, resume: bool) -> Result<DiscoverySummary> {
        let stage = DiscoveryStage::new(
            self.provider(),
            self.config.discovery.clone(),
            self.layout.clone(),
            self.shutdown.clone(),
        );
        let (progress_path, mut progress) = self.resolve_discovery_progress(resume)?;
        let outcome = stage.run(&mut progress, &progress_path).await?;
        Ok(DiscoverySummary {
            region: self.layout.region().to_string(),
            channels_found: outcome.channels_found,
            queue_files: outcome.queue_files,
        })
    }

    /// With `resume`, pick up the region's most recent discovery
    /// progress file; otherwise (or when none exists) mint a fresh
    /// timestamped session.
    fn resolve_discovery_progress(&self, resume: bool) -> Result<(PathBuf, DiscoveryProgress)> {
        if resume {
            if let Some(path) = self.latest_discovery_progress() {
                let progress = load_json::<DiscoveryProgress, _>(&path)?;
                info!(
                    session = %progress.session_id,
                    completed_queries = progress.completed_queries.len(),
                    "resuming discovery session"
                );
                return Ok((path, progress));
            }
        }
        let session_id = chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let path = self.layout.discovery_progress_file(&session_id);
        let progress = DiscoveryProgress::new(
            session_id,
            self.layout.region(),
            0,
            self.config.discovery.categories.clone(),
            self.config.discovery.locations.clone(),
        );
        Ok((path, progress))
    }

    fn latest_discovery_progress(&self) -> Option<PathBuf> {
        let prefix = format!("discovery_progress_{}_", self.layout.region());
        let entries = std::fs::read_dir(self.layout.progress_dir()).ok()?;
        entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(&prefix) && name.ends_with(".json"))
            })
            .max_by_key(|path| {
                let modified = std::fs::metadata(path).and_then(|meta| meta.modified()).ok();
                (modified, path.clone())
            })
    }

    async fn run_scrape_only(&self, args: &ScrapeArgs) -> Result<RunSummary> {
        let queue_files = match &args.queue {
            Some(path) => vec![path.clone()],
            None => self.queue_files_on_disk()?,
        };
        if queue_files.is_empty() {
            return Err(AppError::MissingResource(format!(
                "no queue files under {}",
                self.layout.queue_dir().display()
            )));
        }

        let artifacts = ArtifactStore::new(
            self.layout.output_dir(),
            self.layout.thumbnails_dir(),
            self.config.scrape.download_thumbnails,
        );
        let stage = ScrapingStage::new(
            self.provider(),
            artifacts,
            self.config.tunables(),
            self.config.scrape.entity_delay_secs,
            self.shutdown.clone(),
        );

        let progress_path = self.layout.scrape_progress_file();
        let mut progress: ScrapeProgress = if progress_path.exists() {
            load_json(&progress_path)?
        } else {
            ScrapeProgress::default()
        };
        for queue_path in &queue_files {
            let mut queue = load_json(queue_path)?;
            stage
                .run(&mut queue, queue_path, &mut progress, &progress_path)
                .await?;
        }
        Ok(RunSummary {
            region: self.layout.region().to_string(),
            channels_discovered: 0,
            success: progress.session_stats.success,
            failed: progress.session_stats.failed,
            skipped: progress.session_stats.skipped,
            state_file: progress_path,
        })
    }

    fn queue_files_on_disk(&self) -> Result<Vec<PathBuf>> {
        let dir = self.layout.queue_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();
        Ok(files)
    }

    fn status(&self) -> Result<StatusReport> {
        let path = self.layout.state_file();
        if !path.exists() {
            return Err(AppError::MissingResource(format!(
                "no pipeline state at {}",
                path.display()
            )));
        }
        let state: PipelineState = load_json(&path)?;
        Ok(StatusReport { state })
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    let context = AppContext::new(&cli)?;

    match &cli.command {
        Commands::Run(args) => {
            context.wire_ctrl_c();
            let summary = context.run_pipeline(args.resume).await?;
            render(&summary, cli.format)?;
        }
        Commands::Discover(args) => {
            context.wire_ctrl_c();
            let summary = context.run_discovery_only(args.resume).await?;
            render(&summary, cli.format)?;
        }
        Commands::Scrape(args) => {
            context.wire_ctrl_c();
            let summary = context.run_scrape_only(args).await?;
            render(&summary, cli.format)?;
        }
        Commands::Status => {
            let report = context.status()?;
            render(&report, cli.format)?;
        }
    }
    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub region: String,
    pub channels_discovered: usize,
    pub success: u64,
    pub failed: u64,
    pub skipped: u64,
    pub state_file: PathBuf,
}

impl DisplayFallback for RunSummary {
    fn display(&self) -> String {
        format!(
            "region={} discovered={} success={} failed={} skipped={}\nstate: {}",
            self.region,
            self.channels_discovered,
            self.success,
            self.failed,
            self.skipped,
            self.state_file.display()
        )
    }
}

#[derive(Debug, Serialize)]
pub struct DiscoverySummary {
    pub region: String,
    pub channels_found: usize,
    pub queue_files: Vec<PathBuf>,
}

impl DisplayFallback for DiscoverySummary {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "region={} channels_found={}",
            self.region, self.channels_found
        )];
        for file in &self.queue_files {
            lines.push(format!("queue: {}", file.display()));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub state: PipelineState,
}

impl DisplayFallback for StatusReport {
    fn display(&self) -> String {
        let state = &self.state;
        let mut lines = vec![
            format!("region: {}", state.region),
            format!("phase: {:?}", state.phase),
            format!(
                "discovery: {:?} (attempts: {}, queues: {})",
                state.discovery.status,
                state.discovery.attempts,
                state.discovery.queue_files.len()
            ),
            format!(
                "scraping: {:?} (scraped: {}, failed: {})",
                state.scraping.status, state.scraping.channels_scraped, state.scraping.channels_failed
            ),
            format!(
                "totals: discovered={} scraped={} failed={} restarts={}",
                state.stats.total_channels_discovered,
                state.stats.total_channels_scraped,
                state.stats.total_channels_failed,
                state.stats.browser_restarts
            ),
        ];
        if let Some(err) = &state.discovery.last_error {
            lines.push(format!("discovery error: {err}"));
        }
        if let Some(err) = &state.scraping.last_error {
            lines.push(format!("scraping error: {err}"));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chanscan_core::store::{save_json, Tunables};
    use tempfile::tempdir;

    #[test]
    fn status_reads_persisted_state() {
        let dir = tempdir().unwrap();
        let layout = DataLayout::new(dir.path(), "us");
        let mut state = PipelineState::new("us", Tunables::default());
        state.save(&layout.state_file()).unwrap();

        let cli = Cli {
            config: PathBuf::from(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/../configs/chanscan_us.toml"
            )),
            data_dir: Some(dir.path().to_path_buf()),
            region: None,
            no_headless: false,
            format: OutputFormat::Json,
            command: Commands::Status,
        };
        let context = AppContext::new(&cli).unwrap();
        let report = context.status().unwrap();
        assert_eq!(report.state.region, "us");
        assert!(report.display().contains("region: us"));
    }

    #[test]
    fn missing_state_is_a_missing_resource() {
        let dir = tempdir().unwrap();
        let cli = Cli {
            config: PathBuf::from(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/../configs/chanscan_us.toml"
            )),
            data_dir: Some(dir.path().to_path_buf()),
            region: Some("gulf".to_string()),
            no_headless: false,
            format: OutputFormat::Text,
            command: Commands::Status,
        };
        let context = AppContext::new(&cli).unwrap();
        assert!(matches!(
            context.status(),
            Err(AppError::MissingResource(_))
        ));
    }

    #[test]
    fn discover_resume_reuses_the_latest_session() {
        let dir = tempdir().unwrap();
        let cli = Cli {
            config: PathBuf::from(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/../configs/chanscan_us.toml"
            )),
            data_dir: Some(dir.path().to_path_buf()),
            region: None,
            no_headless: false,
            format: OutputFormat::Text,
            command: Commands::Discover(RunArgs { resume: true }),
        };
        let context = AppContext::new(&cli).unwrap();

        let mut earlier = DiscoveryProgress::new("20240101_000000", "us", 2, vec![], vec![]);
        earlier.mark_query_completed("stale query", 1);
        save_json(
            &context.layout.discovery_progress_file("20240101_000000"),
            &earlier,
        )
        .unwrap();
        let mut later = DiscoveryProgress::new("20240601_120000", "us", 2, vec![], vec![]);
        later.mark_query_completed("q0", 1);
        save_json(
            &context.layout.discovery_progress_file("20240601_120000"),
            &later,
        )
        .unwrap();

        let (path, progress) = context.resolve_discovery_progress(true).unwrap();
        assert_eq!(progress.session_id, "20240601_120000");
        assert!(progress.is_query_completed("q0"));
        assert!(path.ends_with("discovery_progress_us_20240601_120000.json"));

        // Without resume, a fresh session starts with no history.
        let (fresh_path, fresh) = context.resolve_discovery_progress(false).unwrap();
        assert!(fresh.completed_queries.is_empty());
        assert_ne!(fresh_path, path);
    }

    #[test]
    fn scrape_without_queues_reports_missing_resource() {
        let dir = tempdir().unwrap();
        let cli = Cli {
            config: PathBuf::from(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/../configs/chanscan_us.toml"
            )),
            data_dir: Some(dir.path().to_path_buf()),
            region: None,
            no_headless: false,
            format: OutputFormat::Text,
            command: Commands::Status,
        };
        let context = AppContext::new(&cli).unwrap();
        let queues = context.queue_files_on_disk().unwrap();
        assert!(queues.is_empty());

        save_json(
            &context.layout.queue_dir().join("mixed_us_x.json"),
            &serde_json::json!({"placeholder": true}),
        )
        .unwrap();
        let queues = context.queue_files_on_disk().unwrap();
        assert_eq!(queues.len(), 1);
    }
}
