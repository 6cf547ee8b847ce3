//! Text helpers for advert pages: link canonicalization, contact details and dates

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::{Duration, NaiveDate};
use phonenumber::Mode;
use regex::Regex;
use reqwest::Url;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").expect("valid email regex")
});

static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\+?[1-9]\d{0,3}(?:[ \-()]*\d){7,14}").expect("valid phone regex")
});

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("valid number regex"));

static NUMERIC_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2})\.(\d{1,2})\.(\d{4})\b").expect("valid date regex")
});

static ISO_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").expect("valid iso date regex"));

static MONTH_NAME_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2})\.?\s+([a-zäöü]+)\.?\s+(\d{4})\b").expect("valid month date regex")
});

static DAYS_AGO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:vor\s+(\d+)\s+tag(?:en)?|(\d+)\s+days?\s+ago)").expect("valid days-ago regex")
});

const HONORIFICS: [&str; 2] = ["Herr", "Frau"];

/// Strip the query string, so the same advert always maps to one link
pub fn canonicalize_link(url: &str) -> String {
    url.split('?').next().unwrap_or_default().trim().to_string()
}

/// Stable advert id: the last path segment of the canonical link
pub fn sid_from_link(url: &str) -> String {
    canonicalize_link(url)
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// Resolve `href` against `base` when it is relative
pub fn absolutize(base: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }

    Url::parse(base)
        .and_then(|base| base.join(href))
        .map_or_else(|_| href.to_string(), |url| url.to_string())
}

/// Collapse runs of whitespace within each line and drop blank lines.
/// Returns `None` when nothing is left.
pub fn normalize_text(raw: &str) -> Option<String> {
    let lines: Vec<String> = raw
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect();

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

/// First integer in `text`, 0 when there is none
pub fn first_number(text: &str) -> u64 {
    NUMBER_RE
        .find(text)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

pub fn extract_emails(text: &str) -> Vec<String> {
    EMAIL_RE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Phone-number-looking runs in free text, reduced to digits and `+`
pub fn extract_phone_numbers(text: &str) -> Vec<String> {
    PHONE_RE
        .find_iter(text)
        .map(|m| {
            m.as_str()
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '+')
                .collect()
        })
        .collect()
}

/// International format (`+49 30 1234567`) when the number parses
pub fn format_phone_number(raw: &str) -> Option<String> {
    phonenumber::parse(None, raw)
        .ok()
        .map(|number| number.format().mode(Mode::International).to_string())
}

/// Normalize every candidate, keeping the raw text when it does not parse
pub fn normalize_phones<I>(candidates: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    dedup_preserving_order(
        candidates
            .into_iter()
            .map(|raw| format_phone_number(&raw).unwrap_or(raw)),
    )
}

/// Drop repeated emails (case-insensitively), keeping the first spelling
pub fn normalize_emails<I>(candidates: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .map(|email| email.trim().to_string())
        .filter(|email| !email.is_empty() && seen.insert(email.to_lowercase()))
        .collect()
}

fn dedup_preserving_order<I>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| !item.is_empty() && seen.insert(item.clone()))
        .collect()
}

/// First line of a contact block addressing someone as Herr or Frau
pub fn find_contact_person(contact_block: &str) -> Option<String> {
    contact_block
        .lines()
        .find(|line| {
            line.split_whitespace()
                .map(|word| word.trim_matches(|c: char| !c.is_alphabetic()))
                .any(|word| HONORIFICS.contains(&word))
        })
        .map(|line| line.trim().to_string())
}

fn month_number(name: &str) -> Option<u32> {
    let month = match name {
        "januar" | "jänner" | "january" | "jan" => 1,
        "februar" | "february" | "feb" => 2,
        "märz" | "maerz" | "march" | "mär" | "mar" => 3,
        "april" | "apr" => 4,
        "mai" | "may" => 5,
        "juni" | "june" | "jun" => 6,
        "juli" | "july" | "jul" => 7,
        "august" | "aug" => 8,
        "september" | "sep" | "sept" => 9,
        "oktober" | "october" | "okt" | "oct" => 10,
        "november" | "nov" => 11,
        "dezember" | "december" | "dez" | "dec" => 12,
        _ => return None,
    };
    Some(month)
}

/// Parse a posting date such as "Veröffentlicht: 12.03.2024", "3. März 2024",
/// "heute" or "vor 2 Tagen". Relative phrases are resolved against `today`.
pub fn parse_posted_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let lower = text.to_lowercase();

    if let Some(caps) = NUMERIC_DATE_RE.captures(&lower) {
        let day = caps[1].parse().ok()?;
        let month = caps[2].parse().ok()?;
        let year = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    if let Some(caps) = ISO_DATE_RE.captures(&lower) {
        let year = caps[1].parse().ok()?;
        let month = caps[2].parse().ok()?;
        let day = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    if let Some(caps) = MONTH_NAME_DATE_RE.captures(&lower)
        && let Some(month) = month_number(&caps[2])
    {
        let day = caps[1].parse().ok()?;
        let year = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    if lower.contains("vorgestern") {
        return today.checked_sub_signed(Duration::days(2));
    }
    if lower.contains("gestern") || lower.contains("yesterday") {
        return today.checked_sub_signed(Duration::days(1));
    }
    if lower.contains("heute") || lower.contains("today") {
        return Some(today);
    }

    if let Some(caps) = DAYS_AGO_RE.captures(&lower) {
        let days: i64 = caps
            .get(1)
            .or_else(|| caps.get(2))
            .and_then(|m| m.as_str().parse().ok())?;
        return Duration::try_days(days).and_then(|ago| today.checked_sub_signed(ago));
    }

    None
}
