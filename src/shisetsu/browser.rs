//! WebDriver-driven search that clicks through the site like a user.
//!
//! Slower than [`ShisetsuApi`](super::ShisetsuApi) but immune to changes in
//! the site's request encoding. Every element is found through the chains in
//! [`locator::form`](super::locator::form).

use super::locator::{LocatorChain, form};
use super::query::SearchCriteria;
use super::slots::{self, SlotRecord};
use super::SiteConfig;
use crate::config::BrowserConfig;
use std::time::Duration;
use thirtyfour::components::SelectElement;
use thirtyfour::ChromiumLikeCapabilities;
use thirtyfour::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const RESULTS_PATH_MARKER: &str = "VacantFrameFacilityStatus";
const POLL_INTERVAL: Duration = Duration::from_millis(250);
const STEP_PAUSE: Duration = Duration::from_millis(500);
/// Upper bound on "load more" clicks for one search.
const MAX_PAGES: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("webdriver error: {0}")]
    Driver(#[from] WebDriverError),
    #[error("element not found: {0}")]
    ElementNotFound(String),
    #[error("search did not reach the results page (at {0})")]
    UnexpectedPage(String),
    #[error("browser search cancelled")]
    Cancelled,
}

pub struct BrowserClient {
    driver: WebDriver,
    site: SiteConfig,
    config: BrowserConfig,
}

impl BrowserClient {
    pub async fn connect(site: &SiteConfig, config: &BrowserConfig) -> Result<Self, BrowserError> {
        let mut caps = DesiredCapabilities::chrome();
        if config.headless {
            caps.add_arg("--headless=new")?;
        }
        caps.add_arg("--no-sandbox")?;
        caps.add_arg("--disable-dev-shm-usage")?;
        caps.add_arg("--lang=ja-JP")?;
        caps.add_arg(&format!("user-agent={}", super::dispatch::BROWSER_USER_AGENT))?;

        let driver = WebDriver::new(config.webdriver_url.as_str(), caps).await?;
        info!(webdriver = %config.webdriver_url, headless = config.headless, "Browser session started");
        Ok(Self {
            driver,
            site: site.clone(),
            config: config.clone(),
        })
    }

    pub async fn quit(self) {
        if let Err(e) = self.driver.quit().await {
            warn!(error = %e, "Failed to close browser session");
        }
    }

    /// Run one search and collect every result row, following "load more".
    pub async fn search(
        &self,
        criteria: &SearchCriteria,
        cancel: &CancellationToken,
    ) -> Result<Vec<SlotRecord>, BrowserError> {
        let steps = async {
            self.fill_form(criteria).await?;
            self.collect_results().await
        };
        tokio::select! {
            _ = cancel.cancelled() => Err(BrowserError::Cancelled),
            result = steps => result,
        }
    }

    async fn fill_form(&self, criteria: &SearchCriteria) -> Result<(), BrowserError> {
        let home = self.site.endpoint("Home");
        self.driver.goto(home.as_str()).await?;

        self.click(&form::date_time_tab()).await?;
        self.check(&form::purpose_checkbox(&self.config.purpose_label)).await?;

        let date_from = criteria.date_from().format("%Y-%m-%d").to_string();
        let date_to = criteria.date_to().format("%Y-%m-%d").to_string();
        self.type_into(&form::date_from(), &date_from).await?;
        self.type_into(&form::date_to(), &date_to).await?;

        self.click(&form::vacant_frames()).await?;
        self.click(&form::area_filter()).await?;
        for code in criteria.areas() {
            let label = self.config.area_labels.get(&code.to_string());
            self.check(&form::area_checkbox(*code, label.map(String::as_str)))
                .await?;
        }

        let (time_from, time_to) = criteria.time_range();
        self.select_value(&form::time_from(), &time_from.to_string()).await?;
        self.select_value(&form::time_to(), &time_to.to_string()).await?;

        for day in criteria.weekdays() {
            self.check(&form::weekday_checkbox(*day)).await?;
        }

        self.click(&form::search_button()).await?;
        self.wait_for_results().await
    }

    async fn wait_for_results(&self) -> Result<(), BrowserError> {
        let deadline = tokio::time::Instant::now() + self.config.wait_timeout;
        loop {
            let url = self.driver.current_url().await?;
            if url.as_str().contains(RESULTS_PATH_MARKER) {
                debug!(%url, "Reached results page");
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BrowserError::UnexpectedPage(url.to_string()));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn collect_results(&self) -> Result<Vec<SlotRecord>, BrowserError> {
        let mut seen = 0;
        let mut records = Vec::new();
        for page in 1..=MAX_PAGES {
            let html = self.driver.source().await?;
            records = slots::parse_results_table(&html);
            debug!(page, rows = records.len(), "Parsed results page");

            if page > 1 && records.len() <= seen {
                break;
            }
            seen = records.len();

            let Some(button) = self.find_now(&form::load_more()).await else {
                break;
            };
            button.scroll_into_view().await?;
            if button.click().await.is_err() {
                self.js_click(&button).await?;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        info!(slots = records.len(), "Collected browser results");
        Ok(records)
    }

    /// Wait up to the configured timeout for any strategy in `chain` to match.
    async fn find(&self, chain: &LocatorChain) -> Result<WebElement, BrowserError> {
        let mut strategies = chain.strategies.iter().map(|s| s.to_by());
        let Some(first) = strategies.next() else {
            return Err(BrowserError::ElementNotFound(chain.name.clone()));
        };
        let query = strategies.fold(self.driver.query(first), |query, by| query.or(by));
        query
            .wait(self.config.wait_timeout, POLL_INTERVAL)
            .first()
            .await
            .map_err(|_| BrowserError::ElementNotFound(chain.name.clone()))
    }

    async fn find_now(&self, chain: &LocatorChain) -> Option<WebElement> {
        for strategy in &chain.strategies {
            if let Ok(el) = self.driver.find(strategy.to_by()).await {
                return Some(el);
            }
        }
        None
    }

    async fn js_click(&self, element: &WebElement) -> Result<(), BrowserError> {
        self.driver
            .execute("arguments[0].click();", vec![element.to_json()?])
            .await?;
        Ok(())
    }

    async fn click(&self, chain: &LocatorChain) -> Result<(), BrowserError> {
        let element = self.find(chain).await?;
        element.scroll_into_view().await?;
        if let Err(e) = element.click().await {
            debug!(element = %chain.name, error = %e, "Click intercepted, using script");
            self.js_click(&element).await?;
        }
        debug!(element = %chain.name, "Clicked");
        tokio::time::sleep(STEP_PAUSE).await;
        Ok(())
    }

    /// Tick a checkbox unless it is already ticked.
    async fn check(&self, chain: &LocatorChain) -> Result<(), BrowserError> {
        let element = self.find(chain).await?;
        let checkable = element.tag_name().await?.eq_ignore_ascii_case("input");
        if checkable && element.is_selected().await? {
            return Ok(());
        }
        element.scroll_into_view().await?;
        if element.click().await.is_err() {
            self.js_click(&element).await?;
        }
        debug!(element = %chain.name, "Checked");
        Ok(())
    }

    async fn type_into(&self, chain: &LocatorChain, text: &str) -> Result<(), BrowserError> {
        let element = self.find(chain).await?;
        element.scroll_into_view().await?;
        element.clear().await?;
        element.send_keys(text).await?;
        Ok(())
    }

    async fn select_value(&self, chain: &LocatorChain, value: &str) -> Result<(), BrowserError> {
        let element = self.find(chain).await?;
        element.scroll_into_view().await?;
        let select = SelectElement::new(&element).await?;
        if select.select_by_value(value).await.is_err() {
            // Hidden selects reject interaction; set the value and fire `change`.
            self.driver
                .execute(
                    "arguments[0].value = arguments[1]; arguments[0].dispatchEvent(new Event('change'));",
                    vec![element.to_json()?, serde_json::Value::String(value.to_string())],
                )
                .await?;
        }
        Ok(())
    }
}
