//! Result-list driver: walks the search results, hands each advert to the
//! scraper and asks the site for more results until none are left.
//!
//! Each outer round takes a fresh snapshot of the result items and turns it
//! into a work queue. Items are keyed by their canonical link, so progress
//! survives the list being re-rendered or extended by "load more":
//!
//! ```text
//! LOADING_LIST -> HAS_ITEMS -> ITEM_PROCESSING* -> LIST_EXHAUSTED
//!     ^                                               |
//!     +------------- load more succeeded -------------+-> TERMINAL
//! ```

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::breaker::{BreakerVerdict, CircuitBreaker};
use crate::extract::{absolutize, canonicalize_link, first_number};
use crate::ledger::DedupLedger;
use crate::models::{AbortReason, RunOutcome};
use crate::run_state::RunStateHandle;
use crate::scraper::{AdvertOutcome, AdvertScraper};
use crate::traits::{AdvertStore, BrowserPage, ElementHandle, ScraperConfig};

const COUNT_TIMEOUT: Duration = Duration::from_secs(2);
const BANNER_TIMEOUT: Duration = Duration::from_millis(500);
const LOAD_MORE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct DriverSettings {
    /// Failures after which an item is abandoned instead of retried
    pub max_item_attempts: u32,
    /// Pause after a failed advert
    pub failure_backoff: Duration,
    /// Pause after clicking "load more"
    pub load_more_settle: Duration,
    /// Successive "load more" rounds without new items before giving up
    pub max_idle_rounds: u32,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            max_item_attempts: 2,
            failure_backoff: Duration::from_secs(5),
            load_more_settle: Duration::from_secs(2),
            max_idle_rounds: 3,
        }
    }
}

/// What happened to one result item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Succeeded,
    Duplicate,
    NotApplicable,
    Failed,
}

struct PendingItem {
    handle: ElementHandle,
    link: String,
}

/// Per-run bookkeeping of finished and failing result items
#[derive(Debug, Default)]
struct WorkQueue {
    done: HashSet<String>,
    attempts: HashMap<String, u32>,
    max_attempts: u32,
}

impl WorkQueue {
    fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    fn is_pending(&self, link: &str) -> bool {
        !self.done.contains(link)
            && self.attempts.get(link).copied().unwrap_or(0) < self.max_attempts
    }

    fn retire(&mut self, link: &str) {
        self.done.insert(link.to_string());
    }

    /// Returns `true` when the item has now used up its attempts
    fn record_failure(&mut self, link: &str) -> bool {
        let attempts = self.attempts.entry(link.to_string()).or_insert(0);
        *attempts += 1;
        *attempts >= self.max_attempts
    }
}

pub struct ResultListDriver<'a> {
    pub site: &'a ScraperConfig,
    pub scraper: &'a AdvertScraper,
    pub store: &'a dyn AdvertStore,
    pub state: &'a RunStateHandle,
    pub settings: &'a DriverSettings,
}

impl ResultListDriver<'_> {
    /// Drive the result list until it is exhausted, a stop is requested or
    /// a systemic failure aborts the run. Per-advert errors never escape.
    pub async fn run(
        &self,
        list: &dyn BrowserPage,
        advert: &dyn BrowserPage,
        ledger: &mut DedupLedger,
        breaker: &mut CircuitBreaker,
        session_id: DateTime<Utc>,
    ) -> RunOutcome {
        match self.drive(list, advert, ledger, breaker, session_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Result list could not be processed: {:#}", e);
                RunOutcome::Aborted(AbortReason::Engine(format!("{e:#}")))
            }
        }
    }

    async fn drive(
        &self,
        list: &dyn BrowserPage,
        advert: &dyn BrowserPage,
        ledger: &mut DedupLedger,
        breaker: &mut CircuitBreaker,
        session_id: DateTime<Utc>,
    ) -> Result<RunOutcome> {
        self.read_total_results(list).await;

        let mut queue = WorkQueue::new(self.settings.max_item_attempts);
        let mut idle_rounds = 0;

        loop {
            if !self.state.should_continue() {
                info!("Stop requested, leaving the result list");
                return Ok(RunOutcome::Stopped);
            }

            list.bring_to_front().await?;

            let banner = &self.site.selectors.warning_banner;
            if list
                .find_visible_with_text(&banner.selector, &banner.text, BANNER_TIMEOUT)
                .await?
                .is_some()
            {
                error!("Site reports it cannot reach its server, stopping the run");
                return Ok(RunOutcome::Aborted(AbortReason::SiteUnavailable));
            }

            let pending = self.snapshot(list, &queue).await?;
            debug!("{} pending adverts in the result list", pending.len());

            if pending.is_empty() {
                if idle_rounds >= self.settings.max_idle_rounds {
                    warn!(
                        "Loading more results produced nothing new {} times, treating the list as exhausted",
                        idle_rounds
                    );
                    return Ok(RunOutcome::Exhausted);
                }
                if !self.load_more(list).await? {
                    info!("No adverts left, finishing the result list");
                    return Ok(RunOutcome::Exhausted);
                }
                idle_rounds += 1;
                continue;
            }
            idle_rounds = 0;

            for item in pending {
                if !self.state.should_continue() {
                    info!("Stop requested, leaving the result list");
                    return Ok(RunOutcome::Stopped);
                }

                let outcome = self
                    .process_item(advert, &item.link, ledger, session_id)
                    .await;
                list.bring_to_front().await?;

                match outcome {
                    ItemOutcome::Succeeded => {
                        breaker.record_success();
                        self.state.update(|s| s.succeeded += 1);
                    }
                    ItemOutcome::NotApplicable => {
                        breaker.record_success();
                        self.state.update(|s| s.not_applicable += 1);
                    }
                    ItemOutcome::Duplicate => {
                        self.state.update(|s| s.duplicate_skipped += 1);
                    }
                    ItemOutcome::Failed => {
                        self.state.update(|s| s.failed += 1);
                        let verdict = breaker.record_failure();
                        self.state.sync_breaker(breaker);

                        if verdict == BreakerVerdict::Tripped {
                            error!(
                                "{} consecutive advert failures, aborting the run",
                                breaker.consecutive_failures()
                            );
                            return Ok(RunOutcome::Aborted(AbortReason::TooManyFailures {
                                consecutive: breaker.consecutive_failures(),
                                threshold: breaker.threshold(),
                            }));
                        }

                        if queue.record_failure(&item.link) {
                            warn!(
                                "Giving up on {} after {} failed attempts",
                                item.link, self.settings.max_item_attempts
                            );
                        }
                        tokio::time::sleep(self.settings.failure_backoff).await;
                        continue;
                    }
                }

                self.state.sync_breaker(breaker);
                queue.retire(&item.link);
                if let Err(e) = list.remove_from_dom(&item.handle).await {
                    warn!("Could not remove {} from the result list: {:#}", item.link, e);
                }
            }
        }
    }

    async fn process_item(
        &self,
        advert: &dyn BrowserPage,
        link: &str,
        ledger: &mut DedupLedger,
        session_id: DateTime<Utc>,
    ) -> ItemOutcome {
        let mut processed = 0;
        self.state.update(|s| {
            s.processed += 1;
            processed = s.processed;
        });

        if ledger.contains(link) {
            info!("Advert #{} {} was collected recently, skipping", processed, link);
            return ItemOutcome::Duplicate;
        }

        info!("Processing advert #{}: {}", processed, link);
        match self.scraper.scrape_advert(advert, link, session_id).await {
            Ok(AdvertOutcome::Extracted(record)) => match self.store.upsert_advert(&record).await {
                Ok(()) => {
                    ledger.insert(&record.link);
                    ItemOutcome::Succeeded
                }
                Err(e) => {
                    error!("Could not store advert {}: {:#}", record.sid, e);
                    ItemOutcome::Failed
                }
            },
            Ok(AdvertOutcome::NotApplicable) => ItemOutcome::NotApplicable,
            Err(e) => {
                error!("Failed to process advert {}: {:#}", link, e);
                ItemOutcome::Failed
            }
        }
    }

    async fn read_total_results(&self, list: &dyn BrowserPage) {
        match self.result_count_text(list).await {
            Ok(Some(text)) => {
                let total = first_number(&text);
                info!("Search reports {} results", total);
                self.state.update(|s| s.total_results = total);
            }
            Ok(None) => error!("Could not find the total number of results"),
            Err(e) => error!("Could not read the total number of results: {:#}", e),
        }
    }

    async fn result_count_text(&self, list: &dyn BrowserPage) -> Result<Option<String>> {
        match list
            .find_visible(&self.site.selectors.result_count, COUNT_TIMEOUT)
            .await?
        {
            Some(header) => list.text(&header).await,
            None => Ok(None),
        }
    }

    /// Visible items of the current list that still need work
    async fn snapshot(&self, list: &dyn BrowserPage, queue: &WorkQueue) -> Result<Vec<PendingItem>> {
        let selectors = &self.site.selectors;
        let base = list
            .current_url()
            .unwrap_or_else(|| self.site.base_url.clone());

        let mut pending = Vec::new();
        for handle in list.query_all(None, &selectors.result_item).await? {
            if !list.is_visible(&handle).await? {
                debug!("Skipping hidden result item {}", handle.index);
                continue;
            }

            let href = match list.attribute(&handle, "href").await? {
                Some(href) => Some(href),
                None => match list
                    .query_all(Some(&handle), &selectors.result_item_link)
                    .await?
                    .first()
                {
                    Some(link) => list.attribute(link, "href").await?,
                    None => None,
                },
            };
            let Some(href) = href else {
                warn!("Result item {} has no link", handle.index);
                continue;
            };

            let link = canonicalize_link(&absolutize(&base, &href));
            if queue.is_pending(&link) {
                pending.push(PendingItem { handle, link });
            }
        }
        Ok(pending)
    }

    /// Click "load more" if the site offers it
    async fn load_more(&self, list: &dyn BrowserPage) -> Result<bool> {
        let Some(button) = list
            .find_visible(&self.site.selectors.load_more, LOAD_MORE_TIMEOUT)
            .await?
        else {
            return Ok(false);
        };

        info!("Loading more results");
        if let Err(e) = list.click(&button).await {
            warn!("Could not load more results, ending the result list: {:#}", e);
            return Ok(false);
        }
        tokio::time::sleep(self.settings.load_more_settle).await;
        Ok(true)
    }
}
