//! Repository-bound collections
//!
//! Pull requests, issues, labels, watchers and forks are all listed under
//! `repos/{owner}/{repo}/...`, possibly behind more than one URL (open and
//! closed variants). The helpers here scan those listings page by page and
//! store every item that is not yet known.

use log::{debug, info, warn};
use serde_json::Value;

use super::{RepoRetriever, RetrieveResult, non_empty, tag};
use crate::github::pagination::page_items;
use crate::store::Selector;

/// Direction in which listing pages are visited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PageOrder {
    #[default]
    Asc,
    /// Newest page first (stargazers list oldest first)
    Desc,
}

/// One bound collection: where to list it and how its items are keyed.
#[derive(Debug, Clone)]
pub struct BoundQuery<'a> {
    pub collection: &'a str,
    /// API paths relative to the mirror base
    pub paths: Vec<String>,
    /// Context fields every item of this collection carries
    pub selector: Selector,
    pub discriminator: &'a str,
    pub order: PageOrder,
    pub media_type: Option<&'a str>,
    /// Overwrite already stored items with the listing's copy
    pub refresh: bool,
}

impl<'a> BoundQuery<'a> {
    pub fn new(collection: &'a str, paths: Vec<String>, selector: Selector, discriminator: &'a str) -> Self {
        Self {
            collection,
            paths,
            selector,
            discriminator,
            order: PageOrder::Asc,
            media_type: None,
            refresh: false,
        }
    }

    #[must_use]
    pub fn order(mut self, order: PageOrder) -> Self {
        self.order = order;
        self
    }

    #[must_use]
    pub fn refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    #[must_use]
    pub fn media_type(mut self, media_type: &'a str) -> Self {
        self.media_type = Some(media_type);
        self
    }
}

/// Standard `{repo, owner}` context selector.
pub(crate) fn repo_selector(owner: &str, repo: &str) -> Selector {
    Selector::new().eq("repo", repo).eq("owner", owner)
}

fn page_range(total: u32, order: PageOrder) -> Vec<u32> {
    match order {
        PageOrder::Asc => (1..=total).collect(),
        PageOrder::Desc => (1..=total).rev().collect(),
    }
}

impl RepoRetriever {
    /// Scan every page of every listing URL and store unknown items.
    ///
    /// New items are re-fetched through their own `url` to get the full
    /// object. With `item_id` set the scan stops as soon as that item is in
    /// the store and returns it; if the scan ends without it, the result is
    /// empty. Without `item_id` the whole stored collection for the repo is
    /// returned.
    pub async fn repo_bound_items(
        &self,
        owner: &str,
        repo: &str,
        query: &BoundQuery<'_>,
        item_id: Option<&Value>,
    ) -> RetrieveResult<Vec<Value>> {
        let collection = query.collection;
        let discriminator = query.discriminator;

        for path in &query.paths {
            let total = self.client.num_pages(&self.client.ghurl(path)).await?;

            for page in page_range(total, query.order) {
                let url = self.client.ghurl_page(path, page);
                let Some(body) = self.client.api_request(&url, query.media_type).await? else {
                    break;
                };

                for mut item in page_items(body, None) {
                    tag(&mut item, owner, repo);
                    let key = item.get(discriminator).cloned().unwrap_or(Value::Null);
                    let instances = self
                        .docs
                        .bound_instance(collection, &query.selector, discriminator, &key)
                        .await?;

                    if instances.is_empty() {
                        let full = match item.get("url").and_then(Value::as_str) {
                            Some(item_url) => non_empty(self.client.api_request(item_url, query.media_type).await?),
                            None => Some(item),
                        };
                        let Some(mut full) = full else {
                            break;
                        };
                        tag(&mut full, owner, repo);
                        self.docs.store(collection, &full).await?;
                        info!("Added {collection} {owner}/{repo} -> {key}");
                    } else if query.refresh {
                        for instance in &instances {
                            let stored_key = instance.get(discriminator).cloned().unwrap_or(Value::Null);
                            let selector = query.selector.clone().eq(discriminator, stored_key);
                            self.docs.upsert(collection, &selector, &item).await?;
                            debug!("Refreshing {collection} {owner}/{repo} -> {key}");
                        }
                    } else {
                        debug!("{collection} {owner}/{repo} -> {key} exists");
                    }

                    if let Some(wanted) = item_id {
                        let found = self
                            .docs
                            .bound_instance(collection, &query.selector, discriminator, wanted)
                            .await?;
                        if !found.is_empty() {
                            return Ok(found);
                        }
                    }
                }
            }
        }

        if item_id.is_some() {
            return Ok(Vec::new());
        }
        Ok(self.docs.find(collection, &query.selector).await?)
    }

    /// One item of a bound collection, from the store or by scanning the listing.
    pub async fn repo_bound_item(
        &self,
        owner: &str,
        repo: &str,
        item_id: &Value,
        query: &BoundQuery<'_>,
    ) -> RetrieveResult<Option<Value>> {
        let stored = self
            .docs
            .bound_instance(query.collection, &query.selector, query.discriminator, item_id)
            .await?;
        let found = match stored.into_iter().next() {
            Some(item) => Some(item),
            None => self
                .repo_bound_items(owner, repo, query, Some(item_id))
                .await?
                .into_iter()
                .next(),
        };
        if found.is_none() {
            warn!("Could not find {} {owner}/{repo} -> {item_id}. Deleted?", query.collection);
        }
        Ok(found)
    }
}
