//! Page-number pagination shared by the connectors.
//!
//! Providers disagree on how they announce the end of a listing: Gitea and
//! GitLab send a total-count header, GitHub only stops returning full pages.
//! Both conventions are folded into the helpers here so connectors only
//! describe how to fetch one page.

use std::future::Future;

use reqwest::header::HeaderMap;
use tracing::debug;

use super::error::{ProviderError, Result};

/// One page of a paginated listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    /// Records on this page.
    pub records: Vec<T>,
    /// Total number of records across all pages, when the provider declares it.
    pub total: Option<usize>,
}

impl<T> Page<T> {
    /// A page carrying a declared total.
    pub fn with_total(records: Vec<T>, total: Option<usize>) -> Self {
        Self { records, total }
    }
}

/// Read a numeric total-count header (`x-total-count`, `x-total`).
pub fn total_from_headers(headers: &HeaderMap, name: &str) -> Option<usize> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

/// Fetch pages 1, 2, ... until the total declared by the first page is reached.
///
/// The total is read once from the first response. A first page without a
/// total fails with [`ProviderError::Protocol`] before any further request is
/// made. An empty page before the total is reached is also a protocol error,
/// since continuing would loop forever.
pub async fn paginate<T, F, Fut>(provider: &str, mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let first = fetch(1).await?;
    let total = first.total.ok_or_else(|| {
        ProviderError::protocol(provider, "response did not declare a total count")
    })?;

    let mut records = first.records;
    let mut page = 1u32;

    while records.len() < total {
        page += 1;
        let next = fetch(page).await?;
        if next.records.is_empty() {
            return Err(ProviderError::protocol(
                provider,
                format!(
                    "page {page} was empty after {} of {total} records",
                    records.len()
                ),
            ));
        }
        records.extend(next.records);
    }

    debug!("{}: fetched {} records in {} pages", provider, records.len(), page);
    records.truncate(total);
    Ok(records)
}

/// Fetch pages 1, 2, ... until a page comes back shorter than `per_page`.
pub async fn paginate_until_short<T, F, Fut>(
    provider: &str,
    per_page: usize,
    mut fetch: F,
) -> Result<Vec<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    let mut records = Vec::new();
    let mut page = 1u32;

    loop {
        let batch = fetch(page).await?;
        let is_last = batch.len() < per_page;
        records.extend(batch);
        if is_last {
            break;
        }
        page += 1;
    }

    debug!("{}: fetched {} records in {} pages", provider, records.len(), page);
    Ok(records)
}
