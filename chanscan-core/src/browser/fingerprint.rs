use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::page::Page;
use rand::seq::SliceRandom;

use crate::config::FingerprintSection;

use super::error::{BrowserError, BrowserResult};

#[derive(Debug, Clone)]
pub struct FingerprintMasker {
    config: FingerprintSection,
}

impl FingerprintMasker {
    pub fn new(config: FingerprintSection) -> Self {
        Self { config }
    }

    pub async fn apply(&self, page: &Page) -> BrowserResult<()> {
        self.hide_webdriver(page).await?;
        self.mask_navigator(page).await?;
        if self.config.enable_canvas_noise {
            self.inject_canvas_noise(page).await?;
        }
        if self.config.enable_webgl_mask {
            self.mask_webgl(page).await?;
        }
        Ok(())
    }

    async fn hide_webdriver(&self, page: &Page) -> BrowserResult<()> {
        let script = r#"
            (() => {
                Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
                window.chrome = window.chrome || { runtime: {} };
                const originalQuery = window.navigator.permissions.query;
                window.navigator.permissions.query = (parameters) => (
                    parameters.name === 'notifications'
                        ? Promise.resolve({ state: Notification.permission })
                        : originalQuery(parameters)
                );
            })();
        "#;
        inject(page, script.to_string()).await
    }

    async fn mask_navigator(&self, page: &Page) -> BrowserResult<()> {
        let mut rng = rand::thread_rng();
        let languages = if self.config.languages.is_empty() {
            vec!["en-US".to_string(), "en".to_string()]
        } else {
            self.config.languages.clone()
        };
        let languages_js = languages
            .iter()
            .map(|lang| format!("'{lang}'"))
            .collect::<Vec<_>>()
            .join(", ");
        let cores = self
            .config
            .hardware_concurrency
            .choose(&mut rng)
            .copied()
            .unwrap_or(8);
        let memory = self.config.device_memory.choose(&mut rng).copied().unwrap_or(8);
        let script = format!(
            r#"
            (() => {{
                Object.defineProperty(navigator, 'languages', {{ get: () => [{languages_js}] }});
                Object.defineProperty(navigator, 'hardwareConcurrency', {{ get: () => {cores} }});
                Object.defineProperty(navigator, 'deviceMemory', {{ get: () => {memory} }});
                Object.defineProperty(navigator, 'plugins', {{
                    get: () => [1, 2, 3, 4, 5],
                }});
            }})();
            "#
        );
        inject(page, script).await
    }

    async fn inject_canvas_noise(&self, page: &Page) -> BrowserResult<()> {
        let script = r#"
            (() => {
                const originalToDataURL = HTMLCanvasElement.prototype.toDataURL;
                HTMLCanvasElement.prototype.toDataURL = function() {
                    try {
                        const ctx = this.getContext('2d');
                        if (ctx) {
                            const imageData = ctx.getImageData(0, 0, this.width, this.height);
                            for (let i = 0; i < imageData.data.length; i += 4) {
                                const delta = Math.floor(Math.random() * 3) - 1;
                                imageData.data[i] = Math.min(255, Math.max(0, imageData.data[i] + delta));
                            }
                            ctx.putImageData(imageData, 0, 0);
                        }
                    } catch (_) {}
                    return originalToDataURL.apply(this, arguments);
                };
            })();
        "#;
        inject(page, script.to_string()).await
    }

    async fn mask_webgl(&self, page: &Page) -> BrowserResult<()> {
        let vendor = self
            .config
            .webgl_vendor
            .clone()
            .unwrap_or_else(|| "Intel Inc.".to_string());
        let renderer = self
            .config
            .webgl_renderer
            .clone()
            .unwrap_or_else(|| "Intel Iris OpenGL Engine".to_string());
        let script = format!(
            r#"
            (() => {{
                const spoofParam = (proto) => {{
                    if (!proto || !proto.getParameter) {{
                        return;
                    }}
                    const original = proto.getParameter;
                    proto.getParameter = function(param) {{
                        if (param === 37445) {{
                            return '{vendor}';
                        }}
                        if (param === 37446) {{
                            return '{renderer}';
                        }}
                        return original.apply(this, arguments);
                    }};
                }};
                spoofParam(WebGLRenderingContext?.prototype);
                spoofParam(WebGL2RenderingContext?.prototype);
            }})();
            "#
        );
        inject(page, script).await
    }
}

async fn inject(page: &Page, script: String) -> BrowserResult<()> {
    page.evaluate_on_new_document(
        AddScriptToEvaluateOnNewDocumentParams::builder()
            .source(script)
            .build()
            .map_err(|err| BrowserError::Configuration(err.to_string()))?,
    )
    .await?;
    Ok(())
}
