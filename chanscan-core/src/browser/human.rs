use std::time::Duration;

use rand::{thread_rng, Rng};
use tokio::time::sleep;

use chromiumoxide::layout::Point;
use chromiumoxide::page::Page;

use crate::config::HumanSection;

use super::error::{BrowserError, BrowserResult};

/// Low-effort activity between page actions: a few mouse moves and
/// scroll bursts with pauses, so the session does not look like a
/// sequence of bare navigations.
#[derive(Debug, Clone)]
pub struct HumanBehavior {
    config: HumanSection,
}

impl HumanBehavior {
    pub fn new(config: HumanSection) -> Self {
        Self { config }
    }

    pub async fn wander(&self, page: &Page) -> BrowserResult<()> {
        let moves = {
            let mut rng = thread_rng();
            sample_range(&mut rng, self.config.mouse_moves)
        };
        for _ in 0..moves {
            let (point, pause) = {
                let mut rng = thread_rng();
                let point = Point::new(rng.gen_range(80.0..1200.0), rng.gen_range(80.0..700.0));
                let pause = Duration::from_millis(rng.gen_range(120..450));
                (point, pause)
            };
            page.move_mouse(point)
                .await
                .map_err(|err| BrowserError::Unexpected(format!("failed to move mouse: {err}")))?;
            sleep(pause).await;
        }
        Ok(())
    }

    /// Scroll the page downward in bursts, pausing between each, to
    /// trigger lazy-loaded content.
    pub async fn scroll_page(&self, page: &Page, bursts: u32) -> BrowserResult<()> {
        for _ in 0..bursts {
            let (delta, pause) = {
                let mut rng = thread_rng();
                let delta = sample_range(&mut rng, self.config.scroll_burst_px);
                let pause = Duration::from_millis(
                    sample_range(&mut rng, self.config.scroll_pause_ms) as u64,
                );
                (delta, pause)
            };
            let js = format!("window.scrollBy({{ top: {delta}, behavior: 'smooth' }});");
            page.evaluate(js.as_str()).await.map_err(|err| {
                BrowserError::Unexpected(format!("failed to execute scroll script: {err}"))
            })?;
            sleep(pause).await;
        }
        Ok(())
    }
}

/// Sample from an inclusive `[min, max]` config range, tolerating an
/// inverted pair by clamping the lower bound.
fn sample_range(rng: &mut impl Rng, range: [u32; 2]) -> u32 {
    let [lo, hi] = range;
    rng.gen_range(lo.min(hi)..=hi)
}
