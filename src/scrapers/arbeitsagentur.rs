//! Selectors and URLs for the Federal Employment Agency job search

use crate::traits::{CaptchaSelectors, ScraperConfig, SiteSelectors, TextMarker};

pub const BASE_URL: &str = "https://www.arbeitsagentur.de";
pub const SEARCH_BASE_URL: &str = "https://www.arbeitsagentur.de/jobsuche/";

/// Build the scraper configuration for the job search
///
/// `search_base_url` is the prefix the query builder appends `suche?...` to;
/// it normally is [`SEARCH_BASE_URL`].
pub fn config(search_base_url: &str) -> ScraperConfig {
    ScraperConfig {
        name: "Arbeitsagentur".to_string(),
        base_url: BASE_URL.to_string(),
        search_base_url: search_base_url.to_string(),
        selectors: SiteSelectors {
            result_count: "#suchergebnis-h1-anzeige".to_string(),
            result_item: "#ergebnisliste .ergebnisliste-item".to_string(),
            result_item_link: "a".to_string(),
            load_more: "#ergebnisliste-ladeweitere-button".to_string(),
            cookie_accept: Some(
                "button[data-testid=\"bahf-cookie-disclaimer-btn-alle\"]".to_string(),
            ),
            warning_banner: TextMarker::new(
                "body",
                "Es konnte keine Verbindung zum Server hergestellt werden.",
            ),
            external_posting: TextMarker::new(
                "h4",
                "Vollständige Stellenbeschreibung bei unserem Kooperationspartner einsehen:",
            ),
            contact_form: ".angebotskontakt".to_string(),
            captcha: CaptchaSelectors {
                form: "#captchaForm".to_string(),
                image: "#kontaktdaten-captcha-image".to_string(),
                input: "#kontaktdaten-captcha-input".to_string(),
                submit: "#kontaktdaten-captcha-absenden-button".to_string(),
                rejected: TextMarker::new(
                    "p#kontaktdaten-captcha-input-fehler",
                    "Die von Ihnen eingegebenen Zeichen waren nicht korrekt",
                ),
            },
            title: "#detail-kopfbereich-titel".to_string(),
            job_title: "#detail-kopfbereich-hauptberuf".to_string(),
            location: "#detail-kopfbereich-arbeitsort".to_string(),
            address: "#detail-arbeitsorte-arbeitsort-0".to_string(),
            posted_date: "#detail-kopfbereich-veroeffentlichungsdatum".to_string(),
            employer_company_name: "#detail-kopfbereich-firma".to_string(),
            contact_block: "#detail-bewerbung-adresse".to_string(),
            contact_email: "#detail-bewerbung-mail".to_string(),
            contact_phones: vec![
                "#detail-bewerbung-telefon-Telefon".to_string(),
                "#detail-bewerbung-telefon-Mobil".to_string(),
            ],
            description: "#detail-beschreibung-beschreibung".to_string(),
            type_offer_block: ".arbeitszeiten".to_string(),
            type_offer_tag: "span.tag".to_string(),
        },
    }
}
