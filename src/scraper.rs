use crate::config::Config;
use crate::data::CoinRecord;
use crate::normalize::{RawCoinRow, normalize};
use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams, EventRequestPaused, FailRequestParams, RequestPattern,
    RequestStage,
};
use chromiumoxide::cdp::browser_protocol::network::{ErrorReason, ResourceType};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use chrono::Utc;
use futures::StreamExt;
use log::{debug, info, warn};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

/// The one selector the whole pipeline hinges on. The target site renders
/// its coin listing as a single data table; when this breaks, the scrape is
/// broken, full stop.
const COIN_TABLE_SELECTOR: &str = r#"table[data-page="coinsIndex"]"#;

const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Runs inside the page and lifts the raw text fragments for every table row
/// in DOM order. Cleanup and parsing happen on our side, in the normalizer.
const EXTRACT_ROWS_JS: &str = r#"
(() => {
    const rows = document.querySelectorAll('table[data-page="coinsIndex"] tbody tr');
    return Array.from(rows).map(row => {
        const nameElement = row.querySelector('td a.tw-flex');
        const priceElement = row.querySelector('td[data-sort] span');
        const changeElement = row.querySelector('td span.gecko-down, td span.gecko-up');
        return {
            name: nameElement?.querySelector('div.tw-flex-col')?.textContent ?? null,
            symbol: nameElement?.querySelector('span.tw-hidden')?.textContent ?? null,
            image: nameElement?.querySelector('img')?.src ?? null,
            price: priceElement?.textContent ?? null,
            change1h: changeElement?.textContent ?? null,
            marketCap: row.querySelector('td span[data-price-previous]')?.textContent ?? null,
            volume24h: row.querySelector('td span[data-target="price.price"]')?.textContent ?? null,
        };
    });
})()
"#;

/// Classified extraction failures. These are the outcomes the retry policy
/// knows how to handle; anything else escaping an attempt is treated as
/// unexpected by the scheduler.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("failed to connect to remote browser: {0}")]
    ConnectFailed(String),
    #[error("navigation to {url} did not settle within {timeout_sec}s")]
    NavigationTimeout { url: String, timeout_sec: u64 },
    #[error("selector {selector:?} did not appear within {timeout_sec}s")]
    SelectorTimeout {
        selector: &'static str,
        timeout_sec: u64,
    },
    #[error("page yielded no coin rows")]
    NoRowsFound,
}

#[async_trait]
pub trait CoinScraper: Send + Sync {
    /// One extraction attempt: connect, navigate, wait for the table, lift
    /// and normalize every row. Never returns an empty list.
    async fn scrape(&self) -> anyhow::Result<Vec<CoinRecord>>;
}

/// Drives a remote Chromium session over its CDP WebSocket endpoint.
pub struct BrowserScraper {
    ws_endpoint: String,
    target_url: String,
    connect_timeout: Duration,
    navigation_timeout: Duration,
    selector_timeout: Duration,
    screenshot_file: Option<PathBuf>,
}

impl BrowserScraper {
    pub fn new(config: &Config) -> Self {
        Self {
            ws_endpoint: config.browser_ws.clone(),
            target_url: config.target_url.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_sec),
            navigation_timeout: Duration::from_secs(config.navigation_timeout_sec),
            selector_timeout: Duration::from_secs(config.selector_timeout_sec),
            screenshot_file: config.screenshot_file.clone().map(PathBuf::from),
        }
    }

    async fn extract(&self, browser: &Browser) -> anyhow::Result<Vec<CoinRecord>> {
        let page = browser.new_page("about:blank").await?;

        let result = self.extract_from_page(&page).await;
        if result.is_err() {
            self.capture_screenshot(&page).await;
        }

        result
    }

    async fn extract_from_page(&self, page: &Page) -> anyhow::Result<Vec<CoinRecord>> {
        self.block_heavy_resources(page).await?;

        debug!("navigating to {}", self.target_url);
        let navigation = async {
            page.goto(self.target_url.as_str()).await?;
            page.wait_for_navigation().await?;
            anyhow::Ok(())
        };
        match timeout(self.navigation_timeout, navigation).await {
            Ok(settled) => settled?,
            Err(_) => {
                return Err(ExtractionError::NavigationTimeout {
                    url: self.target_url.clone(),
                    timeout_sec: self.navigation_timeout.as_secs(),
                }
                .into());
            }
        }

        self.wait_for_selector(page, COIN_TABLE_SELECTOR).await?;

        let fetched_at = Utc::now();
        let raw_rows: Vec<RawCoinRow> = page.evaluate(EXTRACT_ROWS_JS).await?.into_value()?;
        debug!("lifted {} raw rows from the table", raw_rows.len());

        let records: Vec<CoinRecord> = raw_rows
            .iter()
            .filter_map(|raw| normalize(raw, fetched_at))
            .collect();

        // The listing always has rows when the site is healthy; an empty
        // result means the scrape is broken, not that there are no coins.
        if records.is_empty() {
            return Err(ExtractionError::NoRowsFound.into());
        }

        Ok(records)
    }

    /// Blocks image/font/media/stylesheet subresources through the CDP
    /// `Fetch` domain. None of them contribute to the table markup and
    /// skipping them cuts both latency and remote-proxy cost.
    async fn block_heavy_resources(&self, page: &Page) -> anyhow::Result<()> {
        page.execute(
            EnableParams::builder()
                .pattern(
                    RequestPattern::builder()
                        .url_pattern("*")
                        .request_stage(RequestStage::Request)
                        .build(),
                )
                .build(),
        )
        .await?;

        let mut request_paused = page.event_listener::<EventRequestPaused>().await?;
        let intercept_page = page.clone();
        tokio::spawn(async move {
            while let Some(event) = request_paused.next().await {
                let blocked = matches!(
                    &event.resource_type,
                    ResourceType::Image
                        | ResourceType::Font
                        | ResourceType::Media
                        | ResourceType::Stylesheet
                );
                let outcome = if blocked {
                    intercept_page
                        .execute(FailRequestParams::new(
                            event.request_id.clone(),
                            ErrorReason::BlockedByClient,
                        ))
                        .await
                        .map(|_| ())
                } else {
                    intercept_page
                        .execute(ContinueRequestParams::new(event.request_id.clone()))
                        .await
                        .map(|_| ())
                };
                if let Err(e) = outcome {
                    debug!("request interception reply failed: {e}");
                }
            }
        });

        Ok(())
    }

    /// Polls for the data table, with its own (shorter) timeout, distinct
    /// from navigation.
    async fn wait_for_selector(&self, page: &Page, selector: &'static str) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + self.selector_timeout;
        loop {
            if page.find_element(selector).await.is_ok() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ExtractionError::SelectorTimeout {
                    selector,
                    timeout_sec: self.selector_timeout.as_secs(),
                }
                .into());
            }
            tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
        }
    }

    /// Best-effort diagnostic artifact; a capture failure is logged and
    /// never escalated.
    async fn capture_screenshot(&self, page: &Page) {
        let Some(path) = &self.screenshot_file else {
            return;
        };

        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(true)
            .build();
        match page.save_screenshot(params, path).await {
            Ok(_) => info!("diagnostic screenshot saved to {}", path.display()),
            Err(e) => warn!("could not capture diagnostic screenshot: {e}"),
        }
    }
}

#[async_trait]
impl CoinScraper for BrowserScraper {
    async fn scrape(&self) -> anyhow::Result<Vec<CoinRecord>> {
        debug!("connecting to remote browser");
        let (mut browser, mut handler) = timeout(
            self.connect_timeout,
            Browser::connect(self.ws_endpoint.as_str()),
        )
        .await
        .map_err(|_| {
            ExtractionError::ConnectFailed(format!(
                "no connection within {}s",
                self.connect_timeout.as_secs()
            ))
        })?
        .map_err(|e| ExtractionError::ConnectFailed(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("browser handler stopped: {e}");
                    break;
                }
            }
        });

        let result = self.extract(&browser).await;

        // The session must not outlive the attempt, on any exit path.
        if let Err(e) = browser.close().await {
            warn!("error closing browser session: {e}");
        }
        handler_task.abort();

        result
    }
}
