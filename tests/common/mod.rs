//! Scriptable in-memory stand-ins for the browser, solver, store and sink.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;

use advert_harvester::extract::{absolutize, canonicalize_link};
use advert_harvester::models::{AdvertRecord, RunState};
use advert_harvester::run_state::RunStateHandle;
use advert_harvester::scrapers::arbeitsagentur;
use advert_harvester::traits::{
    AdvertStore, BrowserPage, BrowserSession, CaptchaSolution, CaptchaSolver, ElementHandle,
    ScraperConfig, SiteSelectors, StatusSink,
};

pub const SEARCH_BASE: &str = "https://jobs.test/jobsuche/";
pub const CAPTCHA_IMAGE: &str = "data:image/png;base64,iVBORw0KGgo=";

pub fn site() -> ScraperConfig {
    arbeitsagentur::config(SEARCH_BASE)
}

/// Absolute canonical link of a detail page, as the engine stores it
pub fn advert_link(sid: &str) -> String {
    format!("https://jobs.test/jobsuche/jobdetail/{sid}")
}

/// Relative href as it appears in the result list
pub fn item_href(sid: &str) -> String {
    format!("/jobsuche/jobdetail/{sid}?pos=1&ref=list")
}

pub fn advert_record(sid: &str, collected_at: DateTime<Utc>) -> AdvertRecord {
    AdvertRecord {
        sid: sid.to_string(),
        title: None,
        job_title: "unknown".to_string(),
        address: None,
        location: None,
        type_offer: None,
        posted_date: None,
        posted_date_text: None,
        employer_company_name: None,
        employer_contact_person: None,
        emails: Vec::new(),
        phones: Vec::new(),
        link: advert_link(sid),
        collected_at,
        session_id: collected_at,
    }
}

#[derive(Debug, Clone)]
pub struct ListItem {
    pub href: String,
    pub removed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FakeAdvert {
    /// Selector -> rendered text
    pub fields: HashMap<String, String>,
    pub type_offer_tags: Vec<String>,
    /// Full text lives on a partner site
    pub external: bool,
    /// Navigation to this advert fails
    pub broken: bool,
    /// Contact form is gated by a CAPTCHA
    pub captcha: bool,
}

impl FakeAdvert {
    pub fn with_field(mut self, selector: &str, text: &str) -> Self {
        self.fields.insert(selector.to_string(), text.to_string());
        self
    }
}

/// The simulated site shared by every page of a [`FakeBrowser`]
#[derive(Default)]
pub struct World {
    pub total_results: Option<u64>,
    pub items: Vec<ListItem>,
    /// Hrefs appended by each "load more" click
    pub more_batches: VecDeque<Vec<String>>,
    /// "Load more" is shown but clicking it fails
    pub load_more_broken: bool,
    pub banner: bool,
    /// Navigation to the result list fails
    pub list_unavailable: bool,
    /// Keyed by canonical advert link
    pub adverts: HashMap<String, FakeAdvert>,
    /// CAPTCHA answers to reject before accepting one
    pub captcha_rejections: u32,
    pub captcha_solved: bool,
    pub captcha_rejected: bool,
    pub captcha_answers: Vec<String>,
    /// Typing into the CAPTCHA input fails this many times
    pub captcha_fill_failures: u32,
    pub navigations: Vec<String>,
    pub removed: Vec<String>,
    pub load_more_clicks: u32,
    /// Request a stop on this handle when the given advert is opened
    pub stop_on_open: Option<(String, RunStateHandle)>,
}

impl World {
    pub fn with_items(sids: &[&str]) -> Self {
        let mut world = Self {
            total_results: Some(sids.len() as u64),
            ..Self::default()
        };
        for sid in sids {
            world.push_item(sid);
        }
        world
    }

    /// Add a list item and a plain detail page for it
    pub fn push_item(&mut self, sid: &str) {
        self.items.push(ListItem {
            href: item_href(sid),
            removed: false,
        });
        self.adverts.entry(advert_link(sid)).or_insert_with(|| {
            FakeAdvert::default()
                .with_field("#detail-kopfbereich-titel", &format!("Advert {sid}"))
                .with_field("#detail-kopfbereich-hauptberuf", "Koch/Köchin")
        });
    }

    pub fn advert_mut(&mut self, sid: &str) -> &mut FakeAdvert {
        self.adverts.entry(advert_link(sid)).or_default()
    }

    pub fn removed_sids(&self) -> Vec<String> {
        self.removed
            .iter()
            .map(|link| link.rsplit('/').next().unwrap_or_default().to_string())
            .collect()
    }
}

pub type SharedWorld = Arc<Mutex<World>>;

pub fn shared(world: World) -> SharedWorld {
    Arc::new(Mutex::new(world))
}

pub fn lock(world: &SharedWorld) -> MutexGuard<'_, World> {
    world.lock().unwrap()
}

pub struct FakePage {
    world: SharedWorld,
    selectors: SiteSelectors,
    url: Mutex<Option<String>>,
}

impl FakePage {
    pub fn new(world: SharedWorld, selectors: SiteSelectors) -> Self {
        Self {
            world,
            selectors,
            url: Mutex::new(None),
        }
    }

    fn current(&self) -> Option<String> {
        self.url.lock().unwrap().clone()
    }

    fn on_list(&self) -> bool {
        self.current()
            .is_some_and(|url| url.starts_with(&format!("{SEARCH_BASE}suche")))
    }

    fn advert(&self) -> Option<FakeAdvert> {
        let url = self.current()?;
        lock(&self.world).adverts.get(&canonicalize_link(&url)).cloned()
    }

    fn list_item_visible(&self, index: usize) -> bool {
        lock(&self.world)
            .items
            .get(index)
            .is_some_and(|item| !item.removed)
    }

    fn visible(&self, selector: &str) -> bool {
        let s = &self.selectors;
        if self.on_list() {
            let world = lock(&self.world);
            return (selector == s.result_count && world.total_results.is_some())
                || (selector == s.load_more && !world.more_batches.is_empty());
        }

        let Some(advert) = self.advert() else {
            return false;
        };
        let world = lock(&self.world);
        let gated = advert.captcha && !world.captcha_solved;

        if selector == s.contact_form {
            !gated
        } else if selector == s.captcha.form
            || selector == s.captcha.image
            || selector == s.captcha.input
            || selector == s.captcha.submit
        {
            gated
        } else if selector == s.type_offer_block {
            !advert.type_offer_tags.is_empty()
        } else {
            advert.fields.contains_key(selector)
        }
    }
}

#[async_trait]
impl BrowserPage for FakePage {
    async fn navigate(&self, url: &str) -> Result<()> {
        let stop = {
            let mut world = lock(&self.world);
            world.navigations.push(url.to_string());
            world.captcha_solved = false;
            world.captcha_rejected = false;

            if url.starts_with(&format!("{SEARCH_BASE}suche")) {
                if world.list_unavailable {
                    bail!("503 for {url}");
                }
            } else {
                match world.adverts.get(&canonicalize_link(url)) {
                    Some(advert) if advert.broken => bail!("navigation to {url} timed out"),
                    Some(_) => {}
                    None => bail!("404 for {url}"),
                }
            }

            world
                .stop_on_open
                .as_ref()
                .filter(|(link, _)| *link == canonicalize_link(url))
                .map(|(_, state)| state.clone())
        };
        if let Some(state) = stop {
            state.request_stop();
        }

        *self.url.lock().unwrap() = Some(url.to_string());
        Ok(())
    }

    fn current_url(&self) -> Option<String> {
        self.current()
    }

    async fn find_visible(&self, selector: &str, _timeout: Duration) -> Result<Option<ElementHandle>> {
        Ok(self
            .visible(selector)
            .then(|| ElementHandle::new(selector, 0)))
    }

    async fn find_visible_with_text(
        &self,
        selector: &str,
        text: &str,
        _timeout: Duration,
    ) -> Result<Option<ElementHandle>> {
        let s = &self.selectors;
        let found = if self.on_list() {
            selector == s.warning_banner.selector
                && text == s.warning_banner.text
                && lock(&self.world).banner
        } else if selector == s.external_posting.selector && text == s.external_posting.text {
            self.advert().is_some_and(|advert| advert.external)
        } else if selector == s.captcha.rejected.selector {
            lock(&self.world).captcha_rejected
        } else {
            false
        };
        Ok(found.then(|| ElementHandle::new(selector, 0)))
    }

    async fn query_all(
        &self,
        scope: Option<&ElementHandle>,
        selector: &str,
    ) -> Result<Vec<ElementHandle>> {
        let s = &self.selectors;
        match scope {
            None if selector == s.result_item && self.on_list() => Ok(lock(&self.world)
                .items
                .iter()
                .enumerate()
                .filter(|(_, item)| !item.removed)
                .map(|(index, _)| ElementHandle::new(selector, index))
                .collect()),
            Some(parent) if parent.selector == s.result_item && selector == s.result_item_link => {
                Ok(if self.list_item_visible(parent.index) {
                    vec![ElementHandle::within(parent, selector, 0)]
                } else {
                    Vec::new()
                })
            }
            Some(parent) if parent.selector == s.type_offer_block && selector == s.type_offer_tag => {
                let tags = self.advert().map(|a| a.type_offer_tags).unwrap_or_default();
                Ok((0..tags.len())
                    .map(|index| ElementHandle::within(parent, selector, index))
                    .collect())
            }
            _ => Ok(Vec::new()),
        }
    }

    async fn text(&self, element: &ElementHandle) -> Result<Option<String>> {
        let s = &self.selectors;
        if element.selector == s.result_count {
            return Ok(lock(&self.world)
                .total_results
                .map(|total| format!("{total} Jobs für Koch")));
        }
        let Some(advert) = self.advert() else {
            return Ok(None);
        };
        if element.selector == s.type_offer_tag {
            return Ok(advert.type_offer_tags.get(element.index).cloned());
        }
        Ok(advert.fields.get(&element.selector).cloned())
    }

    async fn attribute(&self, element: &ElementHandle, name: &str) -> Result<Option<String>> {
        let s = &self.selectors;
        if name != "href" && name != "src" {
            return Ok(None);
        }
        if name == "src" && element.selector == s.captcha.image {
            return Ok(Some(CAPTCHA_IMAGE.to_string()));
        }
        if name == "href" && element.selector == s.result_item_link {
            let index = element
                .scope
                .as_ref()
                .map(|parent| parent.index)
                .ok_or_else(|| anyhow!("link without a result item"))?;
            return Ok(lock(&self.world).items.get(index).map(|item| item.href.clone()));
        }
        Ok(None)
    }

    async fn click(&self, element: &ElementHandle) -> Result<()> {
        let s = &self.selectors;
        let mut world = lock(&self.world);
        if element.selector == s.load_more {
            if world.load_more_broken {
                bail!("element is neither a link nor inside a form");
            }
            let batch = world
                .more_batches
                .pop_front()
                .ok_or_else(|| anyhow!("load more is not shown"))?;
            world.load_more_clicks += 1;
            for href in batch {
                world.items.push(ListItem {
                    href,
                    removed: false,
                });
            }
        } else if element.selector == s.captcha.submit {
            if world.captcha_rejections > 0 {
                world.captcha_rejections -= 1;
                world.captcha_rejected = true;
            } else {
                world.captcha_rejected = false;
                world.captcha_solved = true;
            }
        }
        Ok(())
    }

    async fn fill(&self, element: &ElementHandle, value: &str) -> Result<()> {
        if element.selector == self.selectors.captcha.input {
            let mut world = lock(&self.world);
            if world.captcha_fill_failures > 0 {
                world.captcha_fill_failures -= 1;
                bail!("CAPTCHA input detached");
            }
            world.captcha_answers.push(value.to_string());
        }
        Ok(())
    }

    async fn is_visible(&self, element: &ElementHandle) -> Result<bool> {
        if element.selector == self.selectors.result_item {
            return Ok(self.list_item_visible(element.index));
        }
        Ok(self.visible(&element.selector))
    }

    async fn remove_from_dom(&self, element: &ElementHandle) -> Result<()> {
        let base = self.current().unwrap_or_default();
        let mut world = lock(&self.world);
        if element.selector == self.selectors.result_item
            && let Some(item) = world.items.get_mut(element.index)
        {
            item.removed = true;
            let link = canonicalize_link(&absolutize(&base, &item.href));
            world.removed.push(link);
        }
        Ok(())
    }

    async fn bring_to_front(&self) -> Result<()> {
        Ok(())
    }
}

pub struct FakeBrowser {
    world: SharedWorld,
    selectors: SiteSelectors,
    /// When set, opening a page waits for a permit
    pub gate: Option<Arc<Semaphore>>,
}

impl FakeBrowser {
    pub fn new(world: SharedWorld) -> Self {
        Self {
            world,
            selectors: site().selectors,
            gate: None,
        }
    }
}

#[async_trait]
impl BrowserSession for FakeBrowser {
    async fn open_page(&self) -> Result<Box<dyn BrowserPage>> {
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await?;
        }
        Ok(Box::new(FakePage::new(
            self.world.clone(),
            self.selectors.clone(),
        )))
    }
}

/// Answers every CAPTCHA with `code-N` and records the reports it gets
#[derive(Default)]
pub struct FakeSolver {
    pub images: Mutex<Vec<String>>,
    pub reports: Mutex<Vec<(String, bool)>>,
    /// The first `N` solve calls fail
    pub failing_solves: Mutex<u32>,
}

impl FakeSolver {
    pub fn failing(times: u32) -> Self {
        Self {
            failing_solves: Mutex::new(times),
            ..Self::default()
        }
    }
}

#[async_trait]
impl CaptchaSolver for FakeSolver {
    async fn solve(&self, image_ref: &str) -> Result<CaptchaSolution> {
        let mut images = self.images.lock().unwrap();
        images.push(image_ref.to_string());
        let n = images.len();

        let mut failing = self.failing_solves.lock().unwrap();
        if *failing > 0 {
            *failing -= 1;
            bail!("solver returned ERROR_CAPTCHA_UNSOLVABLE");
        }
        Ok(CaptchaSolution {
            code: format!("code-{n}"),
            request_id: format!("req-{n}"),
        })
    }

    async fn report_outcome(&self, request_id: &str, correct: bool) -> Result<()> {
        self.reports
            .lock()
            .unwrap()
            .push((request_id.to_string(), correct));
        Ok(())
    }

    async fn balance(&self) -> Result<f64> {
        Ok(12.5)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub adverts: Mutex<Vec<AdvertRecord>>,
    /// Upserts of these sids fail
    pub failing_sids: Vec<String>,
}

impl MemoryStore {
    pub fn sids(&self) -> Vec<String> {
        self.adverts
            .lock()
            .unwrap()
            .iter()
            .map(|advert| advert.sid.clone())
            .collect()
    }
}

#[async_trait]
impl AdvertStore for MemoryStore {
    async fn upsert_advert(&self, advert: &AdvertRecord) -> Result<()> {
        if self.failing_sids.contains(&advert.sid) {
            bail!("disk full");
        }
        let mut adverts = self.adverts.lock().unwrap();
        adverts.retain(|stored| stored.sid != advert.sid);
        adverts.push(advert.clone());
        Ok(())
    }

    async fn list_adverts(
        &self,
        max_age_days: Option<u32>,
        session_id: Option<DateTime<Utc>>,
    ) -> Result<Vec<AdvertRecord>> {
        let cutoff = max_age_days
            .map(|days| chrono::Duration::days(days.into()))
            .and_then(|window| Utc::now().checked_sub_signed(window));
        Ok(self
            .adverts
            .lock()
            .unwrap()
            .iter()
            .filter(|advert| cutoff.is_none_or(|cutoff| advert.collected_at > cutoff))
            .filter(|advert| session_id.is_none_or(|id| advert.session_id == id))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub states: Mutex<Vec<RunState>>,
}

#[async_trait]
impl StatusSink for RecordingSink {
    async fn publish(&self, state: &RunState) -> Result<()> {
        self.states.lock().unwrap().push(state.clone());
        Ok(())
    }
}
