use anyhow::{Context, Result};
use rsdem::geo_core::{BoundingBox, Region};
use rsdem::geometric::srtm::Srtm;
use tracing_subscriber::EnvFilter;

/// Example: SRTM GL3 around La Rochelle, reprojected to UTM
///
/// OpenTopography requires an API key: export OPENTOPOGRAPHY_API_KEY=...
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== Example: SRTM from OpenTopography ===\n");

    let region = Region::from_bbox(&BoundingBox::new(-1.20, 46.14, -1.10, 46.20))?;

    let srtm = Srtm::new(Some("./output".to_string()))?;
    let result = srtm.fetch(&region).context("fetching SRTM")?;

    let (rows, cols) = result.dem.shape();
    println!("Cached GeoTIFF: {}", result.path.display());
    println!("DEM: {rows} x {cols} pixels, EPSG:{}", result.dem.epsg);
    println!("Map rectangle bounds: {:?}", result.rectangle.bounds());
    println!(
        "Rectangle as GeoJSON: {}",
        serde_json::to_string(&result.rectangle.to_geojson())?
    );

    Ok(())
}
