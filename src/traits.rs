//! Traits and interfaces between the scraping engine and its collaborators

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{AdvertRecord, RunState};

/// Configuration for the scraped website
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    /// Display name for the website
    pub name: String,
    /// Base URL for resolving relative links
    pub base_url: String,
    /// Search page prefix; the query builder appends `suche?...`
    pub search_base_url: String,
    /// CSS selectors for extracting data
    pub selectors: SiteSelectors,
}

/// An element that must carry a given text to count as present
#[derive(Debug, Clone)]
pub struct TextMarker {
    pub selector: String,
    pub text: String,
}

impl TextMarker {
    pub fn new(selector: &str, text: &str) -> Self {
        Self {
            selector: selector.to_string(),
            text: text.to_string(),
        }
    }
}

/// CSS selectors for the result list and the advert detail page
#[derive(Debug, Clone)]
pub struct SiteSelectors {
    /// Header holding the total number of results
    pub result_count: String,
    /// One entry of the result list
    pub result_item: String,
    /// Link inside a result entry, used when the entry itself has no href
    pub result_item_link: String,
    /// "Load more results" control
    pub load_more: String,
    /// Consent button of the cookie dialog (optional)
    pub cookie_accept: Option<String>,
    /// Banner shown when the site cannot reach its backend
    pub warning_banner: TextMarker,
    /// Marker for adverts whose full text lives on a partner site
    pub external_posting: TextMarker,
    /// Applicant contact form; hidden while a CAPTCHA gates it
    pub contact_form: String,
    pub captcha: CaptchaSelectors,
    pub title: String,
    pub job_title: String,
    pub location: String,
    pub address: String,
    pub posted_date: String,
    pub employer_company_name: String,
    pub contact_block: String,
    pub contact_email: String,
    pub contact_phones: Vec<String>,
    pub description: String,
    pub type_offer_block: String,
    pub type_offer_tag: String,
}

#[derive(Debug, Clone)]
pub struct CaptchaSelectors {
    pub form: String,
    pub image: String,
    pub input: String,
    pub submit: String,
    pub rejected: TextMarker,
}

/// Reference to an element on a page: the `index`-th match of `selector`,
/// optionally searched inside another element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle {
    pub selector: String,
    pub index: usize,
    pub scope: Option<Box<ElementHandle>>,
}

impl ElementHandle {
    pub fn new(selector: &str, index: usize) -> Self {
        Self {
            selector: selector.to_string(),
            index,
            scope: None,
        }
    }

    pub fn within(parent: &Self, selector: &str, index: usize) -> Self {
        Self {
            selector: selector.to_string(),
            index,
            scope: Some(Box::new(parent.clone())),
        }
    }
}

/// A single browser tab
#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;

    /// URL of the currently loaded document
    fn current_url(&self) -> Option<String>;

    /// First visible match of `selector`, waiting up to `timeout`
    async fn find_visible(&self, selector: &str, timeout: Duration) -> Result<Option<ElementHandle>>;

    /// First visible match of `selector` whose text contains `text`
    async fn find_visible_with_text(
        &self,
        selector: &str,
        text: &str,
        timeout: Duration,
    ) -> Result<Option<ElementHandle>>;

    /// Every match of `selector`, searched inside `scope` when given
    async fn query_all(
        &self,
        scope: Option<&ElementHandle>,
        selector: &str,
    ) -> Result<Vec<ElementHandle>>;

    /// Rendered text of the element, `None` when it is gone or empty
    async fn text(&self, element: &ElementHandle) -> Result<Option<String>>;

    async fn attribute(&self, element: &ElementHandle, name: &str) -> Result<Option<String>>;

    async fn click(&self, element: &ElementHandle) -> Result<()>;

    async fn fill(&self, element: &ElementHandle, value: &str) -> Result<()>;

    async fn is_visible(&self, element: &ElementHandle) -> Result<bool>;

    async fn remove_from_dom(&self, element: &ElementHandle) -> Result<()>;

    async fn bring_to_front(&self) -> Result<()>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Opens pages that share one browsing context (cookies, session)
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn open_page(&self) -> Result<Box<dyn BrowserPage>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptchaSolution {
    pub code: String,
    pub request_id: String,
}

/// External CAPTCHA solving service
#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    /// Solve a text CAPTCHA given its image URL (or `data:` URI)
    async fn solve(&self, image_ref: &str) -> Result<CaptchaSolution>;

    /// Tell the service whether its answer was accepted
    async fn report_outcome(&self, request_id: &str, correct: bool) -> Result<()>;

    /// Remaining account balance
    async fn balance(&self) -> Result<f64>;
}

/// Durable advert storage
#[async_trait]
pub trait AdvertStore: Send + Sync {
    /// Insert or overwrite the advert with the same `sid`
    async fn upsert_advert(&self, advert: &AdvertRecord) -> Result<()>;

    /// Adverts collected in the last `max_age_days` days and/or by one session
    async fn list_adverts(
        &self,
        max_age_days: Option<u32>,
        session_id: Option<DateTime<Utc>>,
    ) -> Result<Vec<AdvertRecord>>;
}

/// Receives run state snapshots for external reporting
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn publish(&self, state: &RunState) -> Result<()>;
}
