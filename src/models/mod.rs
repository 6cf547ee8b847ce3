//! Data models for scraped adverts, search filters, run state and Discord webhook payloads

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A job advert scraped from the search results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertRecord {
    pub sid: String,
    pub title: Option<String>,
    pub job_title: String,
    pub address: Option<String>,
    pub location: Option<String>,
    pub type_offer: Option<String>,
    pub posted_date: Option<NaiveDate>,
    pub posted_date_text: Option<String>,
    pub employer_company_name: Option<String>,
    pub employer_contact_person: Option<String>,
    pub emails: Vec<String>,
    pub phones: Vec<String>,
    pub link: String,
    pub collected_at: DateTime<Utc>,
    pub session_id: DateTime<Utc>,
}

/// Offer type (`angebotsart`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfferType {
    Work,
    SelfEmployment,
    Apprenticeship,
    Internship,
}

impl OfferType {
    pub const fn code(self) -> &'static str {
        match self {
            Self::Work => "1",
            Self::SelfEmployment => "2",
            Self::Apprenticeship => "4",
            Self::Internship => "34",
        }
    }
}

/// Working-time model (`arbeitszeit`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Availability {
    FullTime,
    PartTime,
    ShiftNightWeekend,
    HomeOffice,
    MiniJob,
}

impl Availability {
    pub const fn code(self) -> &'static str {
        match self {
            Self::FullTime => "vz",
            Self::PartTime => "tz",
            Self::ShiftNightWeekend => "snw",
            Self::HomeOffice => "ho",
            Self::MiniJob => "mj",
        }
    }
}

/// Publication window in days (`veroeffentlichtseit`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeSlot {
    Today,
    Yesterday,
    OneWeek,
    TwoWeeks,
    FourWeeks,
}

impl TimeSlot {
    pub const fn code(self) -> &'static str {
        match self {
            Self::Today => "0",
            Self::Yesterday => "1",
            Self::OneWeek => "7",
            Self::TwoWeeks => "14",
            Self::FourWeeks => "28",
        }
    }
}

/// Query-string keys the search page understands, in serialization order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    OfferType,
    Branch,
    Profession,
    Availability,
    Published,
}

impl FilterKind {
    pub const ALL: [Self; 5] = [
        Self::OfferType,
        Self::Branch,
        Self::Profession,
        Self::Availability,
        Self::Published,
    ];

    pub const fn query_key(self) -> &'static str {
        match self {
            Self::OfferType => "angebotsart",
            Self::Branch => "branch",
            Self::Profession => "beruf",
            Self::Availability => "arbeitszeit",
            Self::Published => "veroeffentlichtseit",
        }
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.query_key())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("unknown {kind} code \"{code}\"")]
    UnknownCode { kind: FilterKind, code: String },

    #[error("invalid {kind} code \"{code}\": codes must not contain '&', '=' or '#'")]
    MalformedCode { kind: FilterKind, code: String },
}

impl FromStr for OfferType {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1" => Ok(Self::Work),
            "2" => Ok(Self::SelfEmployment),
            "4" => Ok(Self::Apprenticeship),
            "34" => Ok(Self::Internship),
            other => Err(FilterError::UnknownCode {
                kind: FilterKind::OfferType,
                code: other.to_string(),
            }),
        }
    }
}

impl FromStr for Availability {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "vz" => Ok(Self::FullTime),
            "tz" => Ok(Self::PartTime),
            "snw" => Ok(Self::ShiftNightWeekend),
            "ho" => Ok(Self::HomeOffice),
            "mj" => Ok(Self::MiniJob),
            other => Err(FilterError::UnknownCode {
                kind: FilterKind::Availability,
                code: other.to_string(),
            }),
        }
    }
}

impl FromStr for TimeSlot {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "0" => Ok(Self::Today),
            "1" => Ok(Self::Yesterday),
            "7" => Ok(Self::OneWeek),
            "14" => Ok(Self::TwoWeeks),
            "28" => Ok(Self::FourWeeks),
            other => Err(FilterError::UnknownCode {
                kind: FilterKind::Published,
                code: other.to_string(),
            }),
        }
    }
}

/// Search filters used to build the result-list URL
///
/// Branch and profession codes come from the site's own catalogues, which
/// are too large to enumerate here. Profession codes are plain names such as
/// "Koch/Köchin"; only characters that would break the query are refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub offer_type: Option<OfferType>,
    pub branches: Vec<String>,
    pub professions: Vec<String>,
    pub availability: Vec<Availability>,
    pub published: Option<TimeSlot>,
}

impl Default for FilterSpec {
    fn default() -> Self {
        Self {
            offer_type: Some(OfferType::Work),
            branches: Vec::new(),
            professions: Vec::new(),
            availability: Vec::new(),
            published: None,
        }
    }
}

impl FilterSpec {
    /// Parse a `;` or `,` separated list of catalogue codes
    pub fn parse_codes(kind: FilterKind, raw: &str) -> Result<Vec<String>, FilterError> {
        raw.split([';', ','])
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .map(|code| {
                if code.contains(['&', '=', '#']) {
                    Err(FilterError::MalformedCode {
                        kind,
                        code: code.to_string(),
                    })
                } else {
                    Ok(code.to_string())
                }
            })
            .collect()
    }

    pub fn parse_availability(raw: &str) -> Result<Vec<Availability>, FilterError> {
        raw.split([';', ','])
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .map(str::parse)
            .collect()
    }

    /// Codes for one filter kind, in the order they will be serialized
    pub fn values(&self, kind: FilterKind) -> Vec<&str> {
        match kind {
            FilterKind::OfferType => self.offer_type.iter().map(|o| o.code()).collect(),
            FilterKind::Branch => self.branches.iter().map(String::as_str).collect(),
            FilterKind::Profession => self.professions.iter().map(String::as_str).collect(),
            FilterKind::Availability => self.availability.iter().map(|a| a.code()).collect(),
            FilterKind::Published => self.published.iter().map(|t| t.code()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RunStatus {
    #[default]
    Stopped,
    Working,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => f.write_str("stopped"),
            Self::Working => f.write_str("working"),
        }
    }
}

/// Why a run was aborted before the result list ran out
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum AbortReason {
    #[error("{consecutive} consecutive advert failures (limit {threshold})")]
    TooManyFailures { consecutive: u32, threshold: u32 },

    #[error("the site reported it cannot reach its backend")]
    SiteUnavailable,

    #[error("engine error: {0}")]
    Engine(String),
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// No more results to load
    Exhausted,
    /// A stop was requested and honored
    Stopped,
    /// A systemic failure ended the run; records stored so far are kept
    Aborted(AbortReason),
}

impl RunOutcome {
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted => f.write_str("result list exhausted"),
            Self::Stopped => f.write_str("stopped on request"),
            Self::Aborted(reason) => write!(f, "aborted: {reason}"),
        }
    }
}

/// Observable state of the current or most recent run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub status: RunStatus,
    pub session_id: Option<DateTime<Utc>>,
    pub total_results: u64,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub not_applicable: u64,
    pub duplicate_skipped: u64,
    pub error_count_total: u64,
    pub error_count_consecutive: u32,
    pub last_outcome: Option<RunOutcome>,
}

/// Discord embed structure for rich notifications
#[derive(Debug, Serialize)]
pub struct DiscordEmbed {
    pub title: String,
    pub description: String,
    pub color: u32,
    pub timestamp: String,
    pub fields: Vec<DiscordField>,
}

/// Key-value field for Discord embeds
#[derive(Debug, Serialize)]
pub struct DiscordField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// Discord webhook message payload
#[derive(Debug, Serialize)]
pub struct DiscordMessage {
    pub embeds: Vec<DiscordEmbed>,
}
