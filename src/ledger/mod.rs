//! Links of adverts collected recently, used to skip re-processing

use std::collections::HashSet;

use anyhow::Result;
use tracing::info;

use crate::extract::canonicalize_link;
use crate::traits::AdvertStore;

#[derive(Debug, Clone, Default)]
pub struct DedupLedger {
    links: HashSet<String>,
}

impl DedupLedger {
    /// Load the canonical links stored in the last `window_days` days.
    /// A window of 0 disables deduplication against storage.
    pub async fn load(store: &dyn AdvertStore, window_days: u32) -> Result<Self> {
        if window_days == 0 {
            info!("Deduplication window disabled, starting with an empty ledger");
            return Ok(Self::default());
        }

        let adverts = store.list_adverts(Some(window_days), None).await?;
        let ledger: Self = adverts.iter().map(|advert| advert.link.as_str()).collect();

        info!(
            "Loaded {} advert links seen in the last {} day(s)",
            ledger.len(),
            window_days
        );
        Ok(ledger)
    }

    pub fn contains(&self, link: &str) -> bool {
        self.links.contains(&canonicalize_link(link))
    }

    /// Returns `false` when the link was already known
    pub fn insert(&mut self, link: &str) -> bool {
        self.links.insert(canonicalize_link(link))
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

impl<'a> FromIterator<&'a str> for DedupLedger {
    fn from_iter<T: IntoIterator<Item = &'a str>>(iter: T) -> Self {
        Self {
            links: iter.into_iter().map(canonicalize_link).collect(),
        }
    }
}
