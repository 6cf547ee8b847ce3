//! CAPTCHA handling for the contact-details gate on advert pages

pub mod two_captcha;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{error, info, warn};

use crate::extract::absolutize;
use crate::traits::{BrowserPage, CaptchaSelectors, CaptchaSolver};

pub use two_captcha::TwoCaptchaSolver;

const DETECT_TIMEOUT: Duration = Duration::from_secs(2);
const VERDICT_TIMEOUT: Duration = Duration::from_secs(2);

/// Detects a CAPTCHA on a page and answers it through a [`CaptchaSolver`]
#[derive(Clone)]
pub struct CaptchaProtocol {
    solver: Option<Arc<dyn CaptchaSolver>>,
    selectors: CaptchaSelectors,
    max_attempts: u32,
    retry_delay: Duration,
}

impl CaptchaProtocol {
    pub fn new(
        solver: Option<Arc<dyn CaptchaSolver>>,
        selectors: CaptchaSelectors,
        max_attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            solver,
            selectors,
            max_attempts: max_attempts.max(1),
            retry_delay,
        }
    }

    /// Returns `Ok(true)` when no challenge is shown or it was answered
    /// correctly, `Ok(false)` when every attempt was rejected.
    pub async fn resolve(&self, page: &dyn BrowserPage) -> Result<bool> {
        if page
            .find_visible(&self.selectors.form, DETECT_TIMEOUT)
            .await?
            .is_none()
        {
            return Ok(true);
        }

        info!("CAPTCHA detected on {}", page.current_url().unwrap_or_default());

        let Some(solver) = &self.solver else {
            warn!("CAPTCHA shown but no solver is configured");
            return Ok(false);
        };

        for attempt in 1..=self.max_attempts {
            match self.attempt(page, solver.as_ref()).await {
                Ok(true) => {
                    info!("CAPTCHA accepted on attempt {}", attempt);
                    return Ok(true);
                }
                Ok(false) => warn!(
                    "CAPTCHA answer rejected (attempt {}/{})",
                    attempt, self.max_attempts
                ),
                Err(e) => error!(
                    "CAPTCHA attempt {}/{} failed: {:#}",
                    attempt, self.max_attempts, e
                ),
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Ok(false)
    }

    async fn attempt(&self, page: &dyn BrowserPage, solver: &dyn CaptchaSolver) -> Result<bool> {
        let image = page
            .find_visible(&self.selectors.image, DETECT_TIMEOUT)
            .await?
            .ok_or_else(|| anyhow!("CAPTCHA image not found"))?;
        let src = page
            .attribute(&image, "src")
            .await?
            .ok_or_else(|| anyhow!("CAPTCHA image has no src"))?;
        let image_ref = if src.starts_with("data:") {
            src
        } else {
            absolutize(&page.current_url().unwrap_or_default(), &src)
        };

        let solution = solver
            .solve(&image_ref)
            .await
            .context("solver could not answer the CAPTCHA")?;

        // The solver hears about every answer it produced, including ones
        // that never reached the page.
        let verdict = self.submit(page, &solution.code).await;
        let accepted = matches!(verdict, Ok(true));
        if let Err(e) = solver.report_outcome(&solution.request_id, accepted).await {
            warn!(
                "Could not report CAPTCHA {} outcome to the solver: {:#}",
                solution.request_id, e
            );
        }

        verdict
    }

    /// Fill in `code`, submit it and check for the rejection notice
    async fn submit(&self, page: &dyn BrowserPage, code: &str) -> Result<bool> {
        if let Some(input) = page.find_visible(&self.selectors.input, DETECT_TIMEOUT).await? {
            page.fill(&input, code).await?;
        }
        if let Some(submit) = page.find_visible(&self.selectors.submit, DETECT_TIMEOUT).await? {
            page.click(&submit).await?;
        }

        let rejected = page
            .find_visible_with_text(
                &self.selectors.rejected.selector,
                &self.selectors.rejected.text,
                VERDICT_TIMEOUT,
            )
            .await?
            .is_some();

        Ok(!rejected)
    }
}
