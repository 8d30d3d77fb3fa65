//! Link extraction from chat messages
//!
//! Recognizes share short links, route links and activity links anywhere in
//! the text. Share links are resolved to a route by scanning the page they
//! point to.

use crate::error::ParseError;
use crate::session::GpxSource;
use gpxbot_types::LinkReference;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};
use tracing::debug;

static SHARE_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https://strava\.app\.link/(\w+)").expect("valid share pattern"));

static ROUTE_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https://www\.strava\.com/routes/(\d+)").expect("valid route pattern")
});

static ACTIVITY_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https://www\.strava\.com/activities/(\d+)").expect("valid activity pattern")
});

/// Turns message text into link references
#[derive(Clone)]
pub struct LinkExtractor {
    source: Arc<dyn GpxSource>,
}

impl LinkExtractor {
    pub fn new(source: Arc<dyn GpxSource>) -> Self {
        Self { source }
    }

    /// All link references in `text`, in order of appearance
    ///
    /// Does not touch the network; an empty result means there is nothing to do.
    pub fn extract(&self, text: &str) -> Vec<LinkReference> {
        scan(text)
    }

    /// Resolve a share reference to the route it points to
    ///
    /// Route and activity references are returned unchanged.
    pub async fn resolve(&self, reference: &LinkReference) -> Result<LinkReference, ParseError> {
        match reference {
            LinkReference::Share(token) => {
                let route_id = self.resolve_share(token).await?;
                Ok(LinkReference::Route(route_id))
            }
            other => Ok(other.clone()),
        }
    }

    async fn resolve_share(&self, token: &str) -> Result<u64, ParseError> {
        let page = self.source.fetch_share_page(token).await?;
        let route_ids = route_ids_in(&page);

        if route_ids.len() > 1 {
            debug!(token, count = route_ids.len(), "Share page links several routes, using the lowest id");
        }

        // A share page is expected to link exactly one route
        route_ids
            .into_iter()
            .next()
            .ok_or_else(|| ParseError::NoRoute(token.to_string()))
    }
}

/// Scan text for every non-overlapping link occurrence
pub fn scan(text: &str) -> Vec<LinkReference> {
    let mut found: Vec<(usize, LinkReference)> = Vec::new();

    for captures in SHARE_LINK.captures_iter(text) {
        if let (Some(whole), Some(token)) = (captures.get(0), captures.get(1)) {
            found.push((whole.start(), LinkReference::Share(token.as_str().to_string())));
        }
    }
    for (pattern, make) in [
        (&*ROUTE_LINK, LinkReference::Route as fn(u64) -> LinkReference),
        (&*ACTIVITY_LINK, LinkReference::Activity as fn(u64) -> LinkReference),
    ] {
        for captures in pattern.captures_iter(text) {
            let (Some(whole), Some(id)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            // Ids too large for u64 cannot be real Strava ids
            if let Ok(id) = id.as_str().parse::<u64>() {
                found.push((whole.start(), make(id)));
            }
        }
    }

    found.sort_by_key(|(start, _)| *start);
    found.into_iter().map(|(_, reference)| reference).collect()
}

/// Distinct route ids linked from a page
pub fn route_ids_in(page: &str) -> BTreeSet<u64> {
    ROUTE_LINK
        .captures_iter(page)
        .filter_map(|captures| captures.get(1))
        .filter_map(|id| id.as_str().parse().ok())
        .collect()
}
