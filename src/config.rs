//! Runtime configuration read from environment variables (`.env` supported).

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::models::{FilterError, FilterKind, FilterSpec};
use crate::scrapers::arbeitsagentur::SEARCH_BASE_URL;

pub const DEFAULT_DATABASE_URL: &str = "sqlite:database/adverts.db";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} must be a non-negative integer, got \"{value}\"")]
    InvalidNumber { var: &'static str, value: String },

    #[error("{var} must be at least 1")]
    Zero { var: &'static str },

    #[error("{var} must be true or false, got \"{value}\"")]
    InvalidFlag { var: &'static str, value: String },

    #[error("BROWSER_ENGINE must be \"html\" or \"chrome\", got \"{0}\"")]
    UnknownBrowserEngine(String),

    #[error("invalid filter in environment: {0}")]
    Filter(#[from] FilterError),
}

/// Page driver used to operate the site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserEngine {
    /// Plain HTTP + HTML parsing, for server-rendered pages
    Html,
    /// Chromium over the DevTools protocol (feature `browser`)
    Chrome,
}

impl Default for BrowserEngine {
    fn default() -> Self {
        if cfg!(feature = "browser") {
            Self::Chrome
        } else {
            Self::Html
        }
    }
}

impl FromStr for BrowserEngine {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "html" => Ok(Self::Html),
            "chrome" | "chromium" => Ok(Self::Chrome),
            _ => Err(ConfigError::UnknownBrowserEngine(s.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub search_base_url: String,
    pub twocaptcha_api_key: Option<String>,
    pub discord_webhook_url: Option<String>,
    pub browser_engine: BrowserEngine,
    pub chrome_headless: bool,
    /// DevTools endpoint of a running browser to attach to
    pub chrome_remote_url: Option<String>,
    /// Cron expression for repeated runs; a single run when unset
    pub scrape_schedule: Option<String>,
    pub max_consecutive_failures: u32,
    pub max_item_attempts: u32,
    pub captcha_max_attempts: u32,
    pub captcha_retry_delay: Duration,
    pub failure_backoff: Duration,
    /// 0 disables the cross-run duplicate check
    pub dedup_window_days: u32,
    pub filters: FilterSpec,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build the configuration from any variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Blank values count as unset
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let number = |var: &'static str, default: u32| -> Result<u32, ConfigError> {
            get(var).map_or(Ok(default), |value| {
                value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidNumber { var, value })
            })
        };
        let positive = |var: &'static str, default: u32| -> Result<u32, ConfigError> {
            match number(var, default)? {
                0 => Err(ConfigError::Zero { var }),
                n => Ok(n),
            }
        };

        let flag = |var: &'static str, default: bool| -> Result<bool, ConfigError> {
            get(var).map_or(Ok(default), |value| {
                match value.trim().to_ascii_lowercase().as_str() {
                    "1" | "true" | "yes" => Ok(true),
                    "0" | "false" | "no" => Ok(false),
                    _ => Err(ConfigError::InvalidFlag { var, value }),
                }
            })
        };

        let mut search_base_url = get("SEARCH_BASE_URL").unwrap_or_else(|| SEARCH_BASE_URL.to_string());
        if !search_base_url.ends_with('/') {
            search_base_url.push('/');
        }

        Ok(Self {
            database_url: get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            search_base_url,
            twocaptcha_api_key: get("TWOCAPTCHA_API_KEY"),
            discord_webhook_url: get("DISCORD_WEBHOOK_URL"),
            browser_engine: get("BROWSER_ENGINE")
                .map_or(Ok(BrowserEngine::default()), |value| value.parse())?,
            chrome_headless: flag("CHROME_HEADLESS", true)?,
            chrome_remote_url: get("CHROME_REMOTE_URL"),
            scrape_schedule: get("SCRAPE_SCHEDULE"),
            max_consecutive_failures: positive("MAX_CONSECUTIVE_FAILURES", 10)?,
            max_item_attempts: positive("MAX_ITEM_ATTEMPTS", 2)?,
            captcha_max_attempts: positive("CAPTCHA_MAX_ATTEMPTS", 3)?,
            captcha_retry_delay: Duration::from_secs(number("CAPTCHA_RETRY_DELAY_SECS", 3)?.into()),
            failure_backoff: Duration::from_secs(number("FAILURE_BACKOFF_SECS", 5)?.into()),
            dedup_window_days: number("DEDUP_WINDOW_DAYS", 1)?,
            filters: filters_from(&lookup)?,
        })
    }
}

fn filters_from(lookup: &impl Fn(&str) -> Option<String>) -> Result<FilterSpec, ConfigError> {
    let mut filters = FilterSpec::default();

    // Set but empty clears the default offer type
    if let Some(raw) = lookup("FILTER_ANGEBOTSART") {
        filters.offer_type = parse_optional(&raw)?;
    }
    if let Some(raw) = lookup("FILTER_BRANCH") {
        filters.branches = FilterSpec::parse_codes(FilterKind::Branch, &raw)?;
    }
    if let Some(raw) = lookup("FILTER_BERUF") {
        filters.professions = FilterSpec::parse_codes(FilterKind::Profession, &raw)?;
    }
    if let Some(raw) = lookup("FILTER_ARBEITSZEIT") {
        filters.availability = FilterSpec::parse_availability(&raw)?;
    }
    if let Some(raw) = lookup("FILTER_VEROEFFENTLICHTSEIT") {
        filters.published = parse_optional(&raw)?;
    }

    Ok(filters)
}

fn parse_optional<T>(raw: &str) -> Result<Option<T>, FilterError>
where
    T: FromStr<Err = FilterError>,
{
    let raw = raw.trim();
    if raw.is_empty() {
        Ok(None)
    } else {
        raw.parse().map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Availability, OfferType, TimeSlot};
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = config(&[]).unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.search_base_url, SEARCH_BASE_URL);
        assert_eq!(config.max_consecutive_failures, 10);
        assert_eq!(config.max_item_attempts, 2);
        assert_eq!(config.captcha_max_attempts, 3);
        assert_eq!(config.failure_backoff, Duration::from_secs(5));
        assert_eq!(config.dedup_window_days, 1);
        assert_eq!(config.filters, FilterSpec::default());
        assert!(config.twocaptcha_api_key.is_none());
        assert!(config.scrape_schedule.is_none());
        assert_eq!(config.browser_engine, BrowserEngine::default());
        assert!(config.chrome_headless);
    }

    #[test]
    fn browser_settings_are_parsed() {
        let cfg = config(&[
            ("BROWSER_ENGINE", "Chrome"),
            ("CHROME_HEADLESS", "false"),
            ("CHROME_REMOTE_URL", "ws://localhost:9222"),
        ])
        .unwrap();
        assert_eq!(cfg.browser_engine, BrowserEngine::Chrome);
        assert!(!cfg.chrome_headless);
        assert_eq!(cfg.chrome_remote_url.as_deref(), Some("ws://localhost:9222"));

        assert!(matches!(
            config(&[("BROWSER_ENGINE", "firefox")]),
            Err(ConfigError::UnknownBrowserEngine(_))
        ));
        assert!(matches!(
            config(&[("CHROME_HEADLESS", "maybe")]),
            Err(ConfigError::InvalidFlag { var: "CHROME_HEADLESS", .. })
        ));
    }

    #[test]
    fn filters_are_parsed_into_typed_values() {
        let config = config(&[
            ("FILTER_ANGEBOTSART", "4"),
            ("FILTER_BRANCH", "12;7"),
            ("FILTER_ARBEITSZEIT", "vz,ho"),
            ("FILTER_VEROEFFENTLICHTSEIT", "7"),
        ])
        .unwrap();

        assert_eq!(config.filters.offer_type, Some(OfferType::Apprenticeship));
        assert_eq!(config.filters.branches, vec!["12", "7"]);
        assert_eq!(
            config.filters.availability,
            vec![Availability::FullTime, Availability::HomeOffice]
        );
        assert_eq!(config.filters.published, Some(TimeSlot::OneWeek));
    }

    #[test]
    fn empty_offer_type_clears_default() {
        let config = config(&[("FILTER_ANGEBOTSART", "")]).unwrap();
        assert_eq!(config.filters.offer_type, None);
    }

    #[test]
    fn unknown_availability_is_rejected() {
        let err = config(&[("FILTER_ARBEITSZEIT", "vz;weekend")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Filter(FilterError::UnknownCode { .. })
        ));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        assert!(matches!(
            config(&[("MAX_CONSECUTIVE_FAILURES", "ten")]),
            Err(ConfigError::InvalidNumber { var: "MAX_CONSECUTIVE_FAILURES", .. })
        ));
        assert!(matches!(
            config(&[("MAX_ITEM_ATTEMPTS", "0")]),
            Err(ConfigError::Zero { var: "MAX_ITEM_ATTEMPTS" })
        ));
    }

    #[test]
    fn search_base_url_gets_trailing_slash() {
        let config = config(&[("SEARCH_BASE_URL", "http://localhost:8080/jobsuche")]).unwrap();
        assert_eq!(config.search_base_url, "http://localhost:8080/jobsuche/");
    }
}
