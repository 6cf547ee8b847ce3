//! Search URL construction from a [`FilterSpec`]

use crate::models::{FilterKind, FilterSpec};

/// Serialize `filter` into the result-list URL under `search_base_url`.
///
/// Keys are emitted in [`FilterKind::ALL`] order; filters without values are
/// left out entirely. List values are joined with `;`.
pub fn build_search_url(search_base_url: &str, filter: &FilterSpec) -> String {
    let params: Vec<String> = FilterKind::ALL
        .iter()
        .filter_map(|kind| {
            let values = filter.values(*kind);
            if values.is_empty() {
                return None;
            }

            let joined = values
                .iter()
                .map(|code| urlencoding::encode(code))
                .collect::<Vec<_>>()
                .join(";");
            Some(format!("{}={joined}", kind.query_key()))
        })
        .collect();

    format!("{search_base_url}suche?{}", params.join("&"))
}
