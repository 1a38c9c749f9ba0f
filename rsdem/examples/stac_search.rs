use anyhow::Result;
use rsdem::collect::global_variables::SWISS_STAC_URL;
use rsdem::collect::http::ReqwestTransport;
use rsdem::collect::stac::{SearchRequest, StacSearchClient};
use rsdem::geo_core::{BoundingBox, Region};
use tracing_subscriber::EnvFilter;

/// Example: raw paginated STAC search against the swisstopo catalog
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .init();

    let region = Region::from_bbox(&BoundingBox::new(7.40, 46.90, 7.50, 47.00))?;
    let client = StacSearchClient::new(SWISS_STAC_URL, ReqwestTransport::new()?)?;

    // small pages to exercise pagination
    let request = SearchRequest::for_region(&region)
        .collections(["ch.swisstopo.swissalti3d"])
        .datetime("2019-01-01")
        .limit(60)
        .page_limit(20);
    let result = client.search(&request)?;

    println!("{} items, pagination ended with {:?}", result.len(), result.pagination());
    for item in result.items().iter().take(5) {
        println!("  - {} ({} assets)", item.id(), item.assets().len());
    }
    println!("{}", serde_json::to_string_pretty(&result.to_item_collection()?)?);

    Ok(())
}
