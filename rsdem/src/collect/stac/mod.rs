//! STAC item search with pagination and collection enrichment.

pub mod models;
pub mod stac_search;

pub use models::{Asset, Collection, Item, Method, PageEnd, PageLink, ResultSet, SearchRequest};
pub use stac_search::StacSearchClient;
