use std::sync::Arc;

use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::handler::viewport::Viewport as ChromiumViewport;
use chromiumoxide::page::Page;
use futures::StreamExt;
use rand::{seq::SliceRandom, Rng};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ScanConfig;

use super::error::{BrowserError, BrowserResult};
use super::fingerprint::FingerprintMasker;

#[derive(Debug, Clone)]
pub struct ViewportSpec {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Default)]
pub struct LaunchOverrides {
    pub headless: Option<bool>,
}

/// Builds Chromium instances from the config's browser sections. Each
/// `launch` picks a fresh user agent, viewport and proxy, so a restart
/// also rotates the observable fingerprint.
#[derive(Debug, Clone)]
pub struct BrowserLauncher {
    config: Arc<ScanConfig>,
    fingerprint: Arc<FingerprintMasker>,
}

impl BrowserLauncher {
    pub fn new(config: Arc<ScanConfig>) -> Self {
        let fingerprint = Arc::new(FingerprintMasker::new(config.fingerprint.clone()));
        Self {
            config,
            fingerprint,
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub async fn launch(&self) -> BrowserResult<BrowserSession> {
        self.launch_with_overrides(LaunchOverrides::default()).await
    }

    pub async fn launch_with_overrides(
        &self,
        overrides: LaunchOverrides,
    ) -> BrowserResult<BrowserSession> {
        let viewport = self.select_viewport();
        let user_agent = self.select_user_agent();
        let proxy = if self.config.proxy.enabled {
            self.select_proxy()
        } else {
            None
        };
        let headless = overrides.headless.unwrap_or(self.config.chromium.headless);
        let chromium_config =
            self.build_chromium_config(&viewport, &user_agent, proxy.as_deref(), headless)?;
        info!(
            ua = %user_agent,
            width = viewport.width,
            height = viewport.height,
            headless,
            "Launching Chromium instance"
        );

        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "Chromium handler reported error");
                }
            }
        });

        Ok(BrowserSession {
            browser,
            handler_task: Some(handler_task),
            config: Arc::clone(&self.config),
            fingerprint: Arc::clone(&self.fingerprint),
            viewport,
            user_agent,
        })
    }

    fn select_viewport(&self) -> ViewportSpec {
        let section = &self.config.viewport;
        let mut rng = rand::thread_rng();
        let base = section
            .resolutions
            .choose(&mut rng)
            .cloned()
            .unwrap_or([1366, 768]);
        let jitter = section.jitter_pixels as i32;
        let width = (base[0] as i32 + rng.gen_range(-jitter..=jitter)).clamp(640, 2560) as u32;
        let height = (base[1] as i32 + rng.gen_range(-jitter..=jitter)).clamp(480, 1600) as u32;
        ViewportSpec { width, height }
    }

    fn select_user_agent(&self) -> String {
        let mut rng = rand::thread_rng();
        self.config
            .user_agents
            .pool
            .choose(&mut rng)
            .cloned()
            .unwrap_or_else(|| {
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko)".to_string()
            })
    }

    fn select_proxy(&self) -> Option<String> {
        let mut rng = rand::thread_rng();
        self.config.proxy.pool.choose(&mut rng).cloned()
    }

    fn build_chromium_config(
        &self,
        viewport: &ViewportSpec,
        user_agent: &str,
        proxy: Option<&str>,
        headless: bool,
    ) -> BrowserResult<ChromiumConfig> {
        let mut builder = ChromiumConfig::builder().viewport(ChromiumViewport {
            width: viewport.width,
            height: viewport.height,
            device_scale_factor: Some(1.0),
            emulating_mobile: false,
            is_landscape: viewport.width >= viewport.height,
            has_touch: false,
        });

        if let Some(executable) = &self.config.chromium.executable_path {
            builder = builder.chrome_executable(executable);
        }
        if !headless {
            builder = builder.with_head();
        }
        if !self.config.chromium.sandbox {
            builder = builder.no_sandbox();
        }

        let mut args = vec![
            format!("--user-agent={user_agent}"),
            format!("--window-size={},{}", viewport.width, viewport.height),
        ];
        if self.config.chromium.disable_gpu {
            args.push("--disable-gpu".into());
        }
        if self.config.flags.mute_audio {
            args.push("--mute-audio".into());
        }
        if let Some(lang) = &self.config.flags.lang {
            args.push(format!("--lang={lang}"));
        }
        if let Some(proxy) = proxy {
            args.push(format!("--proxy-server={proxy}"));
        }
        for feature in &self.config.flags.disable_blink_features {
            args.push(format!("--disable-blink-features={feature}"));
        }
        if self.config.flags.no_first_run {
            args.push("--no-first-run".into());
        }
        if self.config.flags.disable_automation_controlled {
            args.push("--disable-features=AutomationControlled".into());
        }
        if let Some(accept) = &self.config.flags.accept_language {
            args.push(format!("--accept-lang={accept}"));
        }
        args.push("--disable-background-timer-throttling".into());
        args.push("--password-store=basic".into());

        builder = builder.args(args);

        builder.build().map_err(BrowserError::Configuration)
    }
}

/// One live Chromium instance. Restart = `shutdown()` on the old
/// session, then a new `launch` on the launcher; never overlapping.
#[derive(Debug)]
pub struct BrowserSession {
    browser: Browser,
    handler_task: Option<JoinHandle<()>>,
    config: Arc<ScanConfig>,
    fingerprint: Arc<FingerprintMasker>,
    viewport: ViewportSpec,
    user_agent: String,
}

impl BrowserSession {
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn viewport(&self) -> &ViewportSpec {
        &self.viewport
    }

    pub async fn new_page(&self) -> BrowserResult<Page> {
        let params = CreateTargetParams::new("about:blank");
        let page = self.browser.new_page(params).await?;
        self.configure_page(&page).await?;
        Ok(page)
    }

    pub async fn shutdown(mut self) -> BrowserResult<()> {
        info!("Shutting down Chromium instance");
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "Failed to close browser gracefully");
        }
        if let Some(handle) = self.handler_task.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "Browser handler join error");
            }
        }
        Ok(())
    }

    async fn configure_page(&self, page: &Page) -> BrowserResult<()> {
        page.enable_stealth_mode_with_agent(&self.user_agent)
            .await?;

        let mut params_builder =
            SetUserAgentOverrideParams::builder().user_agent(self.user_agent.clone());
        if let Some(accept) = &self.config.flags.accept_language {
            params_builder = params_builder.accept_language(accept.clone());
        }
        let params = params_builder
            .build()
            .map_err(BrowserError::Configuration)?;
        page.set_user_agent(params).await?;

        self.fingerprint.apply(page).await?;
        Ok(())
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if let Some(handle) = &self.handler_task {
            if !handle.is_finished() {
                warn!("BrowserSession dropped without explicit shutdown");
            }
        }
    }
}
