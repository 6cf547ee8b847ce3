use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::breaker::CircuitBreaker;
use crate::captcha::CaptchaProtocol;
use crate::config::Config;
use crate::ledger::DedupLedger;
use crate::models::{AbortReason, FilterSpec, RunOutcome, RunState};
use crate::pagination::{DriverSettings, ResultListDriver};
use crate::query::build_search_url;
use crate::run_state::RunStateHandle;
use crate::scraper::AdvertScraper;
use crate::traits::{
    AdvertStore, BrowserPage, BrowserSession, CaptchaSolver, ScraperConfig, StatusSink,
};

const COOKIE_BANNER_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RunError {
    #[error("a scrape run is already in progress")]
    AlreadyRunning,
}

/// Tunables of a scrape run
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_consecutive_failures: u32,
    pub dedup_window_days: u32,
    pub captcha_max_attempts: u32,
    pub captcha_retry_delay: Duration,
    pub driver: DriverSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 10,
            dedup_window_days: 1,
            captcha_max_attempts: 3,
            captcha_retry_delay: Duration::from_secs(3),
            driver: DriverSettings::default(),
        }
    }
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_consecutive_failures: config.max_consecutive_failures,
            dedup_window_days: config.dedup_window_days,
            captcha_max_attempts: config.captcha_max_attempts,
            captcha_retry_delay: config.captcha_retry_delay,
            driver: DriverSettings {
                max_item_attempts: config.max_item_attempts,
                failure_backoff: config.failure_backoff,
                ..DriverSettings::default()
            },
        }
    }
}

/// Owns the run lifecycle and every collaborator a run needs.
///
/// Cheap to clone: clones share the same run state, so a stop requested
/// through one clone is seen by a run started from another.
#[derive(Clone)]
pub struct RunController {
    site: Arc<ScraperConfig>,
    settings: Arc<EngineSettings>,
    browser: Arc<dyn BrowserSession>,
    store: Arc<dyn AdvertStore>,
    solver: Option<Arc<dyn CaptchaSolver>>,
    sink: Option<Arc<dyn StatusSink>>,
    state: RunStateHandle,
}

/// Puts the run state back to STOPPED if a run future is dropped or
/// unwinds before it could finish normally
struct StopGuard<'a> {
    state: &'a RunStateHandle,
    armed: bool,
}

impl StopGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for StopGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!("Scrape run ended unexpectedly, marking it as stopped");
            self.state.finish(RunOutcome::Aborted(AbortReason::Engine(
                "run interrupted".to_string(),
            )));
        }
    }
}

impl RunController {
    pub fn new(
        site: ScraperConfig,
        settings: EngineSettings,
        browser: Arc<dyn BrowserSession>,
        store: Arc<dyn AdvertStore>,
    ) -> Self {
        Self {
            site: Arc::new(site),
            settings: Arc::new(settings),
            browser,
            store,
            solver: None,
            sink: None,
            state: RunStateHandle::default(),
        }
    }

    #[must_use]
    pub fn with_solver(mut self, solver: Arc<dyn CaptchaSolver>) -> Self {
        self.solver = Some(solver);
        self
    }

    #[must_use]
    pub fn with_status_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Run one scrape session to completion.
    ///
    /// Returns [`RunError::AlreadyRunning`] without side effects when a
    /// session is active. Otherwise the state is back to STOPPED when this
    /// returns, whatever the outcome.
    pub async fn start(&self, filters: &FilterSpec) -> Result<RunOutcome, RunError> {
        let session_id = Utc::now();
        let Some(initial) = self.state.try_begin(session_id) else {
            warn!("Scrape run requested while another one is in progress");
            return Err(RunError::AlreadyRunning);
        };
        let guard = StopGuard {
            state: &self.state,
            armed: true,
        };

        info!("Starting scrape session {}", session_id.to_rfc3339());
        self.publish(&initial).await;

        let outcome = match self.run_session(filters, session_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Scrape session could not run: {:#}", e);
                RunOutcome::Aborted(AbortReason::Engine(format!("{e:#}")))
            }
        };

        let state = self.state.finish(outcome.clone());
        guard.disarm();

        if outcome.is_fatal() {
            error!("Scrape session {} {}", session_id.to_rfc3339(), outcome);
        } else {
            info!("Scrape session {} {}", session_id.to_rfc3339(), outcome);
        }
        info!(
            "Processed {} adverts: {} stored, {} failed, {} not applicable, {} duplicates",
            state.processed,
            state.succeeded,
            state.failed,
            state.not_applicable,
            state.duplicate_skipped
        );

        self.publish(&state).await;
        Ok(outcome)
    }

    /// Ask the active run to stop after the advert in flight.
    /// Returns `false` when nothing is running.
    pub fn request_stop(&self) -> bool {
        let requested = self.state.request_stop();
        if requested {
            info!("Stop requested for the running scrape session");
        }
        requested
    }

    pub fn status(&self) -> RunState {
        self.state.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.state.is_working()
    }

    pub fn last_session_id(&self) -> Option<DateTime<Utc>> {
        self.state.session_id()
    }

    /// Remaining solver credit, `None` without a solver
    pub async fn captcha_balance(&self) -> Result<Option<f64>> {
        match &self.solver {
            Some(solver) => Ok(Some(solver.balance().await?)),
            None => Ok(None),
        }
    }

    async fn run_session(&self, filters: &FilterSpec, session_id: DateTime<Utc>) -> Result<RunOutcome> {
        let mut ledger =
            DedupLedger::load(self.store.as_ref(), self.settings.dedup_window_days).await?;

        let url = build_search_url(&self.site.search_base_url, filters);
        info!("Search URL: {}", url);

        let list = self.browser.open_page().await?;
        let advert = self.browser.open_page().await?;

        let outcome = self
            .drive_pages(list.as_ref(), advert.as_ref(), &url, &mut ledger, session_id)
            .await;

        for page in [&list, &advert] {
            if let Err(e) = page.close().await {
                warn!("Could not close page: {:#}", e);
            }
        }

        outcome
    }

    async fn drive_pages(
        &self,
        list: &dyn BrowserPage,
        advert: &dyn BrowserPage,
        url: &str,
        ledger: &mut DedupLedger,
        session_id: DateTime<Utc>,
    ) -> Result<RunOutcome> {
        list.navigate(url).await?;
        self.accept_cookies(list).await;

        let captcha = CaptchaProtocol::new(
            self.solver.clone(),
            self.site.selectors.captcha.clone(),
            self.settings.captcha_max_attempts,
            self.settings.captcha_retry_delay,
        );
        let scraper = AdvertScraper::new(self.site.selectors.clone(), captcha);
        let mut breaker = CircuitBreaker::new(self.settings.max_consecutive_failures);

        let driver = ResultListDriver {
            site: &self.site,
            scraper: &scraper,
            store: self.store.as_ref(),
            state: &self.state,
            settings: &self.settings.driver,
        };

        Ok(driver
            .run(list, advert, ledger, &mut breaker, session_id)
            .await)
    }

    async fn accept_cookies(&self, page: &dyn BrowserPage) {
        let Some(selector) = &self.site.selectors.cookie_accept else {
            return;
        };

        match page.find_visible(selector, COOKIE_BANNER_TIMEOUT).await {
            Ok(Some(button)) => {
                if let Err(e) = page.click(&button).await {
                    warn!("Could not accept cookies: {:#}", e);
                } else {
                    info!("Accepted cookies");
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Could not look for the cookie banner: {:#}", e),
        }
    }

    async fn publish(&self, state: &RunState) {
        if let Some(sink) = &self.sink
            && let Err(e) = sink.publish(state).await
        {
            warn!("Could not publish run status: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_follow_config() {
        let config = Config::from_lookup(|var| match var {
            "MAX_ITEM_ATTEMPTS" => Some("4".to_string()),
            "FAILURE_BACKOFF_SECS" => Some("0".to_string()),
            "DEDUP_WINDOW_DAYS" => Some("0".to_string()),
            _ => None,
        })
        .unwrap();

        let settings = EngineSettings::from(&config);
        assert_eq!(settings.driver.max_item_attempts, 4);
        assert_eq!(settings.driver.failure_backoff, Duration::ZERO);
        assert_eq!(settings.dedup_window_days, 0);
        assert_eq!(settings.max_consecutive_failures, 10);
    }
}
