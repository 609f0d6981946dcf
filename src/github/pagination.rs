//! `link`-header pagination

use crate::github::client::GitHubClient;
use crate::github::error::GitHubResult;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

lazy_static! {
    static ref LINK_RE: Result<Regex, regex::Error> = Regex::new(r#"<(.*)>;\s*rel="(.*)""#);
}

/// One fetched page, or the concatenation of a whole walk.
#[derive(Debug, Clone, PartialEq)]
pub struct PagedResult<T> {
    pub items: Vec<T>,
    /// Page that would have been fetched next; set when the page budget ran out.
    pub next_url: Option<String>,
    pub last_url: Option<String>,
}

impl<T> Default for PagedResult<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            next_url: None,
            last_url: None,
        }
    }
}

/// Append `per_page=100` unless the URL already sets a page size.
#[must_use]
pub fn ensure_per_page(url: &str) -> String {
    if url.contains("per_page=") {
        return url.to_string();
    }
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{url}{sep}per_page=100")
}

/// Parse an RFC 5988 `link` header into `rel -> url`.
#[must_use]
pub fn parse_links(header: &str) -> HashMap<String, String> {
    let Ok(link_re) = &*LINK_RE else {
        return HashMap::new();
    };
    header
        .split(',')
        .filter_map(|part| {
            let caps = link_re.captures(part.trim())?;
            Some((caps[2].to_string(), caps[1].to_string()))
        })
        .collect()
}

/// Items of a page body: arrays are taken as-is, objects either unwrapped
/// through `items_key` or kept whole.
#[must_use]
pub fn page_items(body: Value, items_key: Option<&str>) -> Vec<Value> {
    match (body, items_key) {
        (Value::Array(items), _) => items,
        (Value::Object(mut map), Some(key)) => match map.remove(key) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        (Value::Object(map), None) if map.is_empty() => Vec::new(),
        (obj @ Value::Object(_), None) => vec![obj],
        _ => Vec::new(),
    }
}

/// Value of the `page` query parameter, if any.
fn page_param(url: &str) -> Option<u32> {
    let parsed = reqwest::Url::parse(url).ok()?;
    parsed
        .query_pairs()
        .find(|(k, _)| k == "page")
        .and_then(|(_, v)| v.parse().ok())
}

/// A pagination request.
#[derive(Debug, Clone)]
pub struct PageWalk<'a> {
    pub url: &'a str,
    /// `<= 0` follows `next` links until they run out.
    pub max_pages_back: i64,
    pub known_last_url: Option<String>,
    pub media_type: Option<&'a str>,
    /// Key holding the item array for wrapped responses (`workflow_runs`).
    pub items_key: Option<&'a str>,
}

impl<'a> PageWalk<'a> {
    pub fn new(url: &'a str, max_pages_back: i64) -> Self {
        Self {
            url,
            max_pages_back,
            known_last_url: None,
            media_type: None,
            items_key: None,
        }
    }

    pub fn items_key(mut self, key: &'a str) -> Self {
        self.items_key = Some(key);
        self
    }

    pub fn media_type(mut self, media_type: &'a str) -> Self {
        self.media_type = Some(media_type);
        self
    }

    pub fn known_last_url(mut self, url: impl Into<String>) -> Self {
        self.known_last_url = Some(url.into());
        self
    }
}

impl GitHubClient {
    /// Fetch one page. `None` when the page is absent or was skipped.
    pub async fn fetch_page(
        &self,
        url: &str,
        media_type: Option<&str>,
        items_key: Option<&str>,
    ) -> GitHubResult<Option<PagedResult<Value>>> {
        let Some(response) = self.request(url, media_type).await?.into_found() else {
            return Ok(None);
        };
        let links = response.link_header().map(parse_links).unwrap_or_default();
        Ok(Some(PagedResult {
            items: page_items(response.json(), items_key),
            next_url: links.get("next").cloned(),
            last_url: links.get("last").cloned(),
        }))
    }

    /// Walk `next` links, concatenating every page in order.
    pub async fn paged_request(&self, url: &str, max_pages_back: i64) -> GitHubResult<Vec<Value>> {
        Ok(self.walk_pages(PageWalk::new(url, max_pages_back)).await?.items)
    }

    /// Full pagination walk.
    ///
    /// Stops when a page has no `next` link or when the page budget is
    /// spent; in the latter case the unvisited `next` URL is returned.
    pub async fn walk_pages(&self, walk: PageWalk<'_>) -> GitHubResult<PagedResult<Value>> {
        let mut result = PagedResult {
            last_url: walk.known_last_url.clone(),
            ..PagedResult::default()
        };
        let mut pages = walk.max_pages_back;
        let mut url = ensure_per_page(walk.url);

        loop {
            let Some(page) = self.fetch_page(&url, walk.media_type, walk.items_key).await? else {
                break;
            };
            debug!("Fetched {} items from {url}", page.items.len());
            result.items.extend(page.items);
            if result.last_url.is_none() {
                result.last_url = page.last_url;
            }

            let Some(next) = page.next_url else {
                break;
            };
            if pages > 0 {
                pages -= 1;
                if pages == 0 {
                    result.next_url = Some(next);
                    break;
                }
            }
            url = ensure_per_page(&next);
        }

        Ok(result)
    }

    /// Number of pages of a paginated resource, read from its `last` link.
    pub async fn num_pages(&self, url: &str) -> GitHubResult<u32> {
        let Some(response) = self.request(&ensure_per_page(url), None).await?.into_found() else {
            return Ok(1);
        };
        Ok(response
            .link_header()
            .map(parse_links)
            .and_then(|links| links.get("last").and_then(|last| page_param(last)))
            .unwrap_or(1))
    }
}
