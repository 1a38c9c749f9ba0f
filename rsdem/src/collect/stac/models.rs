//! Serde models for STAC item search (`POST /search`) and its results.

use geojson::{Geometry, JsonObject};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::collect::http::Headers;
use crate::geo_core::Region;

// ---------------------------------------------------------------------------
// Search request
// ---------------------------------------------------------------------------

/// Parameters of one item search. Built once, never modified by the search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    geometry: Geometry,
    collections: Vec<String>,
    limit: usize,
    page_limit: usize,
    filters: Map<String, Value>,
    headers: Headers,
}

impl SearchRequest {
    /// Maximum number of items collected across all pages.
    pub const DEFAULT_LIMIT: usize = 10_000;
    /// Items requested per page.
    pub const DEFAULT_PAGE_LIMIT: usize = 100;

    pub fn new(geometry: Geometry) -> Self {
        SearchRequest {
            geometry,
            collections: Vec::new(),
            limit: Self::DEFAULT_LIMIT,
            page_limit: Self::DEFAULT_PAGE_LIMIT,
            filters: Map::new(),
            headers: Headers::new(),
        }
    }

    pub fn for_region(region: &Region) -> Self {
        Self::new(region.geometry().clone())
    }

    pub fn collections<I, S>(mut self, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collections = collections.into_iter().map(Into::into).collect();
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn page_limit(mut self, page_limit: usize) -> Self {
        self.page_limit = page_limit;
        self
    }

    /// Extra search parameter sent with the body (e.g. `datetime`).
    pub fn filter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    /// Set a datetime or datetime range (e.g. `"2019-01-01"`).
    pub fn datetime(self, datetime: &str) -> Self {
        self.filter("datetime", datetime)
    }

    /// Header sent with page requests whose link asks to merge.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn get_collections(&self) -> &[String] {
        &self.collections
    }

    pub fn get_limit(&self) -> usize {
        self.limit
    }

    pub fn get_page_limit(&self) -> usize {
        self.page_limit
    }

    pub fn filters(&self) -> &Map<String, Value> {
        &self.filters
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// JSON search body: `{intersects, collections, limit, ...filters}`.
    ///
    /// Filters are applied last and may override the core keys.
    pub fn body(&self) -> Map<String, Value> {
        let mut body = Map::new();
        body.insert(
            "intersects".to_string(),
            Value::Object(JsonObject::from(&self.geometry)),
        );
        body.insert(
            "collections".to_string(),
            Value::from(self.collections.clone()),
        );
        body.insert("limit".to_string(), Value::from(self.limit));
        for (key, value) in &self.filters {
            body.insert(key.clone(), value.clone());
        }
        body
    }

    /// Search parameters encoded for a GET page request.
    ///
    /// Arrays of strings are comma-joined, other non-string values are sent
    /// as compact JSON. `limit` is the per-page limit.
    pub fn query_params(&self) -> Vec<(String, String)> {
        let mut body = self.body();
        body.insert("limit".to_string(), Value::from(self.page_limit));

        body.into_iter()
            .map(|(key, value)| {
                let text = match value {
                    Value::String(s) => s,
                    Value::Array(ref values) if values.iter().all(Value::is_string) => values
                        .iter()
                        .filter_map(Value::as_str)
                        .collect::<Vec<_>>()
                        .join(","),
                    other => other.to_string(),
                };
                (key, text)
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
}

/// How to fetch the next page, as handed back by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageLink {
    /// Missing method means GET.
    #[serde(default = "default_method", deserialize_with = "deserialize_method")]
    pub method: Method,
    pub href: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub headers: Headers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Map<String, Value>>,
    /// Resubmit the original request's body and headers under the link's own.
    #[serde(default, deserialize_with = "null_as_default")]
    pub merge: bool,
}

fn default_method() -> Method {
    Method::Get
}

fn deserialize_method<'de, D>(deserializer: D) -> Result<Method, D::Error>
where
    D: Deserializer<'de>,
{
    let method = Option::<String>::deserialize(deserializer)?;
    match method.as_deref().map(str::to_ascii_uppercase).as_deref() {
        None | Some("GET") => Ok(Method::Get),
        Some("POST") => Ok(Method::Post),
        Some(other) => Err(serde::de::Error::custom(format!(
            "unsupported link method {other}"
        ))),
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl PageLink {
    /// First request of a search: POST to `href` with `body`.
    pub fn initial(href: impl Into<String>, body: Map<String, Value>) -> Self {
        PageLink {
            method: Method::Post,
            href: href.into(),
            headers: Headers::new(),
            body: Some(body),
            merge: false,
        }
    }
}

/// Why pagination stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageEnd {
    /// The last page had no `next` link, or no usable `links` array.
    Exhausted,
    /// The last page had several `next` links; none was followed.
    Ambiguous(usize),
    /// The last page had one `next` link that could not be parsed.
    MalformedLink,
    /// Enough items were collected; the pending `next` link was not followed.
    LimitReached,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// A single STAC item (GeoJSON feature).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    collection: Option<String>,
    #[serde(default)]
    assets: BTreeMap<String, Asset>,
    #[serde(default, deserialize_with = "null_as_default")]
    properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bbox: Option<Vec<f64>>,
    /// Everything else (type, geometry, links, stac_version, ...).
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Item {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn collection(&self) -> Option<&str> {
        self.collection.as_deref()
    }

    pub fn assets(&self) -> &BTreeMap<String, Asset> {
        &self.assets
    }

    pub fn asset(&self, key: &str) -> Option<&Asset> {
        self.assets.get(key)
    }

    pub fn properties(&self) -> &Map<String, Value> {
        &self.properties
    }

    /// Bounding box `[west, south, east, north]` in WGS84.
    pub fn bbox(&self) -> Option<&[f64]> {
        self.bbox.as_deref()
    }

    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    /// EPSG code from the projection extension (`proj:epsg`), if present.
    pub fn epsg(&self) -> Option<u32> {
        self.properties
            .get("proj:epsg")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
    }

    /// Copy of this item carrying a different asset mapping.
    pub fn with_assets(&self, assets: BTreeMap<String, Asset>) -> Item {
        Item {
            assets,
            ..self.clone()
        }
    }
}

/// Asset descriptor of an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub href: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Asset {
    /// EPSG code published on the asset (`proj:epsg`), if any.
    pub fn epsg(&self) -> Option<u32> {
        self.extra
            .get("proj:epsg")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
    }
}

/// Metadata of a collection referenced by search results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Items of one search in arrival order, plus the collections they reference.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    items: Vec<Item>,
    collections: Vec<Collection>,
    pagination: PageEnd,
}

impl ResultSet {
    pub fn new(items: Vec<Item>, collections: Vec<Collection>, pagination: PageEnd) -> Self {
        ResultSet {
            items,
            collections,
            pagination,
        }
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn collections(&self) -> &[Collection] {
        &self.collections
    }

    pub fn collection(&self, id: &str) -> Option<&Collection> {
        self.collections.iter().find(|c| c.id == id)
    }

    /// How pagination ended.
    pub fn pagination(&self) -> PageEnd {
        self.pagination
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Same collections and pagination state, items replaced.
    pub fn map_items<F>(&self, f: F) -> ResultSet
    where
        F: FnMut(&Item) -> Item,
    {
        ResultSet {
            items: self.items.iter().map(f).collect(),
            collections: self.collections.clone(),
            pagination: self.pagination,
        }
    }

    /// Render as an item collection (GeoJSON FeatureCollection).
    pub fn to_item_collection(&self) -> serde_json::Result<Value> {
        Ok(serde_json::json!({
            "type": "FeatureCollection",
            "features": serde_json::to_value(&self.items)?,
            "collections": serde_json::to_value(&self.collections)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn square() -> Geometry {
        Geometry::new(geojson::Value::Polygon(vec![vec![
            vec![7.0, 46.0],
            vec![7.0, 47.0],
            vec![8.0, 47.0],
            vec![8.0, 46.0],
            vec![7.0, 46.0],
        ]]))
    }

    #[test]
    fn test_search_body_contains_core_keys_and_filters() {
        let request = SearchRequest::new(square())
            .collections(["ch.swisstopo.swissalti3d"])
            .limit(100)
            .datetime("2019-01-01");

        let body = request.body();
        assert_eq!(body["intersects"]["type"], "Polygon");
        assert_eq!(body["collections"], json!(["ch.swisstopo.swissalti3d"]));
        assert_eq!(body["limit"], 100);
        assert_eq!(body["datetime"], "2019-01-01");
    }

    #[test]
    fn test_query_params_use_page_limit() {
        let request = SearchRequest::new(square())
            .collections(["a", "b"])
            .limit(1000)
            .page_limit(10);

        let params: BTreeMap<String, String> = request.query_params().into_iter().collect();
        assert_eq!(params["collections"], "a,b");
        assert_eq!(params["limit"], "10");
        assert!(params["intersects"].starts_with('{'));
    }

    #[test]
    fn test_page_link_defaults_to_get() {
        let link: PageLink =
            serde_json::from_value(json!({"rel": "next", "href": "https://x/search?page=2"}))
                .unwrap();
        assert_eq!(link.method, Method::Get);
        assert!(link.headers.is_empty());
        assert!(!link.merge);
        assert!(link.body.is_none());
    }

    #[test]
    fn test_page_link_accepts_nulls_and_lowercase_method() {
        let link: PageLink = serde_json::from_value(json!({
            "rel": "next",
            "href": "https://x/search",
            "method": "post",
            "headers": null,
            "body": {"token": "abc"},
            "merge": null
        }))
        .unwrap();
        assert_eq!(link.method, Method::Post);
        assert_eq!(link.body.unwrap()["token"], "abc");
    }

    #[test]
    fn test_item_keeps_unknown_fields() {
        let item: Item = serde_json::from_value(json!({
            "type": "Feature",
            "id": "i1",
            "collection": "x",
            "properties": {"proj:epsg": 2056},
            "assets": {"i1_2_foo.tif": {"href": "https://x/i1.tif", "type": "image/tiff"}}
        }))
        .unwrap();
        assert_eq!(item.id(), "i1");
        assert_eq!(item.collection(), Some("x"));
        assert_eq!(item.epsg(), Some(2056));
        assert_eq!(item.extra()["type"], "Feature");
        assert_eq!(
            item.asset("i1_2_foo.tif").unwrap().media_type.as_deref(),
            Some("image/tiff")
        );
    }

    #[test]
    fn test_with_assets_leaves_original_untouched() {
        let item: Item = serde_json::from_value(json!({
            "id": "i1",
            "assets": {"a": {"href": "https://x/a.tif"}}
        }))
        .unwrap();
        let renamed = item.with_assets(BTreeMap::new());
        assert!(renamed.assets().is_empty());
        assert_eq!(item.assets().len(), 1);
    }
}
