//! Paginated STAC item search.
//!
//! Starts with a `POST {base}/search`, then follows `rel="next"` links
//! until the server stops handing them out or enough items were collected.
//! Collection metadata for every distinct collection id among the items is
//! fetched afterwards; failures there are logged and skipped.

use serde_json::{Map, Value};
use std::collections::HashSet;
use url::Url;

use crate::collect::http::{Headers, HttpTransport};
use crate::collect::stac::models::{
    Collection, Item, Method, PageEnd, PageLink, ResultSet, SearchRequest,
};
use crate::error::{ElevError, Result};

/// Outcome of inspecting a page's `links`.
enum NextPage {
    Follow(PageLink),
    Stop(PageEnd),
}

/// Client for one STAC API root.
pub struct StacSearchClient<T: HttpTransport> {
    base_url: Url,
    transport: T,
}

impl<T: HttpTransport> StacSearchClient<T> {
    /// `base_url` is the API root (e.g. `https://data.geo.admin.ch/api/stac/v0.9/`).
    pub fn new(base_url: &str, transport: T) -> Result<Self> {
        let mut base_url = Url::parse(base_url)?;
        // keep the last path segment when joining relative endpoints
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(StacSearchClient {
            base_url,
            transport,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run a search, following pagination, and enrich with collection metadata.
    ///
    /// A failed page aborts the whole search; items from earlier pages are
    /// dropped with it.
    pub fn search(&self, request: &SearchRequest) -> Result<ResultSet> {
        let search_url = self.base_url.join("search")?;
        let mut link = Some(PageLink::initial(search_url.as_str(), request.body()));
        let mut end = PageEnd::Exhausted;
        let mut items: Vec<Item> = Vec::new();
        let mut pages = 0usize;

        while let Some(current) = link.take() {
            if items.len() >= request.get_limit() {
                end = PageEnd::LimitReached;
                break;
            }

            let page = self.fetch_page(&current, request)?;
            pages += 1;

            let page_items = Self::parse_features(&current.href, &page)?;
            tracing::debug!(
                page = pages,
                href = %current.href,
                items = page_items.len(),
                "received search page"
            );
            items.extend(page_items);

            match Self::next_link(&page) {
                NextPage::Follow(next) => link = Some(next),
                NextPage::Stop(reason) => end = reason,
            }
        }

        tracing::debug!(?end, pages, items = items.len(), "pagination finished");

        let collections = self.fetch_collections(&items);
        tracing::info!(
            items = items.len(),
            collections = collections.len(),
            "STAC search complete"
        );

        Ok(ResultSet::new(items, collections, end))
    }

    /// Relative hrefs are resolved against the API root.
    fn fetch_page(&self, link: &PageLink, request: &SearchRequest) -> Result<Value> {
        let url = self.base_url.join(&link.href)?;
        match link.method {
            Method::Get => {
                self.transport
                    .get_json(url.as_str(), &link.headers, &request.query_params())
            }
            Method::Post => {
                let (headers, body) = Self::page_request(link, request);
                self.transport
                    .post_json(url.as_str(), &headers, &Value::Object(body))
            }
        }
    }

    /// Headers and body for a POST page.
    ///
    /// With `merge`, the original request is the base and the link's own
    /// fields are laid over it. `limit` is always the per-page limit.
    fn page_request(link: &PageLink, request: &SearchRequest) -> (Headers, Map<String, Value>) {
        let mut headers = Headers::new();
        let mut body = Map::new();

        if link.merge {
            headers.extend(request.headers().clone());
            body.extend(request.body());
        }

        headers.extend(link.headers.clone());
        if let Some(link_body) = &link.body {
            body.extend(link_body.clone());
        }
        body.insert("limit".to_string(), Value::from(request.get_page_limit()));

        (headers, body)
    }

    fn parse_features(url: &str, page: &Value) -> Result<Vec<Item>> {
        let features = page
            .get("features")
            .and_then(Value::as_array)
            .ok_or_else(|| ElevError::upstream(url, "response has no features array"))?;

        features
            .iter()
            .map(|feature| {
                serde_json::from_value::<Item>(feature.clone())
                    .map_err(|e| ElevError::upstream(url, format!("invalid item: {e}")))
            })
            .collect()
    }

    fn next_link(page: &Value) -> NextPage {
        let Some(links) = page.get("links").and_then(Value::as_array) else {
            return NextPage::Stop(PageEnd::Exhausted);
        };

        let next: Vec<&Value> = links
            .iter()
            .filter(|l| l.get("rel").and_then(Value::as_str) == Some("next"))
            .collect();

        match next.as_slice() {
            [] => NextPage::Stop(PageEnd::Exhausted),
            [only] => match serde_json::from_value::<PageLink>((*only).clone()) {
                Ok(link) => NextPage::Follow(link),
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring malformed next link");
                    NextPage::Stop(PageEnd::MalformedLink)
                }
            },
            many => {
                tracing::warn!(count = many.len(), "ambiguous next links, stopping");
                NextPage::Stop(PageEnd::Ambiguous(many.len()))
            }
        }
    }

    /// Fetch metadata once per distinct collection id, in first-seen order.
    fn fetch_collections(&self, items: &[Item]) -> Vec<Collection> {
        let mut seen = HashSet::new();
        let ids: Vec<&str> = items
            .iter()
            .filter_map(Item::collection)
            .filter(|id| seen.insert(*id))
            .collect();

        let mut collections = Vec::with_capacity(ids.len());
        for id in ids {
            match self.fetch_collection(id) {
                Ok(collection) => collections.push(collection),
                Err(e) => tracing::warn!(error = %e, "skipping collection metadata"),
            }
        }
        collections
    }

    fn fetch_collection(&self, id: &str) -> Result<Collection> {
        let to_collection_error = |reason: String| ElevError::CollectionFetch {
            id: id.to_string(),
            reason,
        };

        let url = self.collection_url(id).map_err(to_collection_error)?;
        let value = self
            .transport
            .get_json(url.as_str(), &Headers::new(), &[])
            .map_err(|e| to_collection_error(e.to_string()))?;
        serde_json::from_value(value).map_err(|e| to_collection_error(e.to_string()))
    }

    /// `{base}/collections/{id}` with `id` percent-encoded as one path segment.
    fn collection_url(&self, id: &str) -> std::result::Result<Url, String> {
        if id.is_empty() || id == "." || id == ".." {
            return Err(format!("{id:?} is not a usable collection id"));
        }
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| format!("{} cannot take a path", self.base_url))?
            .pop_if_empty()
            .push("collections")
            .push(id);
        Ok(url)
    }
}
