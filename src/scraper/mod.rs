use std::time::Duration;

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::captcha::CaptchaProtocol;
use crate::extract::{
    canonicalize_link, extract_emails, extract_phone_numbers, find_contact_person,
    normalize_emails, normalize_phones, normalize_text, parse_posted_date, sid_from_link,
};
use crate::models::AdvertRecord;
use crate::traits::{BrowserPage, SiteSelectors};

const FIELD_TIMEOUT: Duration = Duration::from_millis(100);
const MARKER_TIMEOUT: Duration = Duration::from_secs(1);
const FORM_TIMEOUT: Duration = Duration::from_secs(2);

const UNKNOWN_JOB_TITLE: &str = "unknown";

/// Result of visiting one advert page
#[derive(Debug)]
pub enum AdvertOutcome {
    Extracted(Box<AdvertRecord>),
    /// The advert is only a teaser for a partner site
    NotApplicable,
}

/// Extracts [`AdvertRecord`]s from advert detail pages
#[derive(Clone)]
pub struct AdvertScraper {
    selectors: SiteSelectors,
    captcha: CaptchaProtocol,
}

impl AdvertScraper {
    pub fn new(selectors: SiteSelectors, captcha: CaptchaProtocol) -> Self {
        Self { selectors, captcha }
    }

    /// Open `link` in `page` and read the advert.
    ///
    /// Missing fields become `None`; an error means the advert could not be
    /// processed at all (navigation failed, CAPTCHA not solved).
    pub async fn scrape_advert(
        &self,
        page: &dyn BrowserPage,
        link: &str,
        session_id: DateTime<Utc>,
    ) -> Result<AdvertOutcome> {
        page.bring_to_front().await?;
        page.navigate(link).await?;
        debug!("Opened advert {}", link);

        let external = &self.selectors.external_posting;
        if page
            .find_visible_with_text(&external.selector, &external.text, MARKER_TIMEOUT)
            .await?
            .is_some()
        {
            info!("Advert {} is hosted by a partner site, skipping", link);
            return Ok(AdvertOutcome::NotApplicable);
        }

        // The contact form stays hidden until the CAPTCHA is answered
        if page
            .find_visible(&self.selectors.contact_form, FORM_TIMEOUT)
            .await?
            .is_none()
            && !self.captcha.resolve(page).await?
        {
            bail!("CAPTCHA on {} was not solved", link);
        }

        let record = self.read_fields(page, link, session_id).await?;
        Ok(AdvertOutcome::Extracted(Box::new(record)))
    }

    async fn read_fields(
        &self,
        page: &dyn BrowserPage,
        link: &str,
        session_id: DateTime<Utc>,
    ) -> Result<AdvertRecord> {
        let s = &self.selectors;

        let title = self.field_text(page, &s.title).await?;
        let job_title = self
            .field_text(page, &s.job_title)
            .await?
            .unwrap_or_else(|| UNKNOWN_JOB_TITLE.to_string());
        let location = self.field_text(page, &s.location).await?;
        let address = self.field_text(page, &s.address).await?;
        let employer_company_name = self.field_text(page, &s.employer_company_name).await?;
        let type_offer = self.type_offer(page).await?;

        let posted_date_text = self.field_text(page, &s.posted_date).await?;
        let posted_date = posted_date_text
            .as_deref()
            .and_then(|text| parse_posted_date(text, Utc::now().date_naive()));

        let employer_contact_person = self
            .field_text(page, &s.contact_block)
            .await?
            .as_deref()
            .and_then(find_contact_person);

        let description = self.field_text(page, &s.description).await?;

        let mut phone_candidates = Vec::new();
        for selector in &s.contact_phones {
            if let Some(phone) = self.field_text(page, selector).await? {
                phone_candidates.push(phone);
            }
        }
        if let Some(text) = &description {
            phone_candidates.extend(extract_phone_numbers(text));
        }

        let mut email_candidates = description
            .as_deref()
            .map(extract_emails)
            .unwrap_or_default();
        if let Some(email) = self.field_text(page, &s.contact_email).await? {
            email_candidates.push(email);
        }

        let link = canonicalize_link(link);
        Ok(AdvertRecord {
            sid: sid_from_link(&link),
            title,
            job_title,
            address,
            location,
            type_offer,
            posted_date,
            posted_date_text,
            employer_company_name,
            employer_contact_person,
            emails: normalize_emails(email_candidates),
            phones: normalize_phones(phone_candidates),
            link,
            collected_at: Utc::now(),
            session_id,
        })
    }

    async fn field_text(&self, page: &dyn BrowserPage, selector: &str) -> Result<Option<String>> {
        let Some(element) = page.find_visible(selector, FIELD_TIMEOUT).await? else {
            return Ok(None);
        };
        Ok(page
            .text(&element)
            .await?
            .as_deref()
            .and_then(normalize_text))
    }

    async fn type_offer(&self, page: &dyn BrowserPage) -> Result<Option<String>> {
        let Some(block) = page
            .find_visible(&self.selectors.type_offer_block, FIELD_TIMEOUT)
            .await?
        else {
            return Ok(None);
        };

        let mut tags = Vec::new();
        for tag in page
            .query_all(Some(&block), &self.selectors.type_offer_tag)
            .await?
        {
            if let Some(text) = page.text(&tag).await?.as_deref().and_then(normalize_text) {
                tags.push(text);
            }
        }

        Ok(if tags.is_empty() {
            None
        } else {
            Some(tags.join(","))
        })
    }
}
