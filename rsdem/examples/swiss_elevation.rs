use anyhow::{Context, Result};
use rsdem::geo_core::{BoundingBox, Region};
use rsdem::geometric::swiss_elevation::SwissElevation;
use tracing_subscriber::EnvFilter;

/// Example: swissALTI3D elevation for a small area of Bern
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== Example: swissALTI3D from the swisstopo STAC API ===\n");

    // rectangle as drawn on a map, WGS84
    let region = Region::from_bbox(&BoundingBox::new(7.435, 46.945, 7.450, 46.955))?;

    let mut swiss = SwissElevation::new(Some("./output".to_string()))?;
    swiss.set_resolution(2.0);

    let result = swiss.fetch(&region).context("fetching swissALTI3D tiles")?;

    println!("Items found: {}", result.results.len());
    for collection in result.results.collections() {
        println!("  - collection {} ({:?})", collection.id, collection.title);
    }

    let (rows, cols) = result.elevation.shape();
    let bounds = result.elevation.bounds();
    println!("\nElevation raster: {rows} x {cols} pixels, EPSG:{}", result.elevation.epsg);
    println!(
        "  - Extent: {:.0}, {:.0} -> {:.0}, {:.0}",
        bounds.min_x, bounds.min_y, bounds.max_x, bounds.max_y
    );

    let out = std::path::Path::new("./output/swissalti3d_sum.tif");
    result.elevation.write_geotiff(out)?;
    println!("  - Saved to {}", out.display());

    Ok(())
}
