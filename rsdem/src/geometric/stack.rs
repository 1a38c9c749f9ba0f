//! Put item assets on one grid: a layer per item, or a running sum.

use ndarray::{Array2, Array3};
use std::path::{Path, PathBuf};

use crate::collect::http::{download_to_file, HttpTransport};
use crate::collect::stac::Item;
use crate::commons::basic_functions::cache_path_for;
use crate::error::{ElevError, Result};
use crate::geo_core::{BoundingBox, CoordTransformer};
use crate::geometric::raster::{GeoTiffHeader, GeoTransform, Raster, RasterCube};
use crate::geometric::reproject::reproject;

/// Download `href` into `cache_dir` unless it is already there.
pub fn fetch_asset<T: HttpTransport>(transport: &T, href: &str, cache_dir: &Path) -> Result<PathBuf> {
    let path = cache_path_for(cache_dir, href)?;
    if path.exists() {
        tracing::info!(path = %path.display(), "using cached asset");
    } else {
        tracing::info!(href, "downloading asset");
        download_to_file(transport, href, &[], &path)?;
    }
    Ok(path)
}

/// Cached file and CRS of the `asset_key` asset of every item that has one.
fn fetch_item_assets<T: HttpTransport>(
    transport: &T,
    items: &[Item],
    asset_key: &str,
    cache_dir: &Path,
    default_epsg: u32,
) -> Result<Vec<(PathBuf, u32)>> {
    let mut sources = Vec::new();
    for item in items {
        let Some(asset) = item.asset(asset_key) else {
            tracing::debug!(item = item.id(), asset_key, "item has no matching asset");
            continue;
        };
        let epsg = item.epsg().or_else(|| asset.epsg()).unwrap_or(default_epsg);
        sources.push((fetch_asset(transport, &asset.href, cache_dir)?, epsg));
    }
    Ok(sources)
}

fn check_resolution(resolution: f64) -> Result<()> {
    if resolution.is_finite() && resolution > 0.0 {
        Ok(())
    } else {
        Err(ElevError::Raster(format!("invalid resolution {resolution}")))
    }
}

fn into_crs(raster: Raster, epsg: u32) -> Result<Raster> {
    if raster.epsg == epsg {
        Ok(raster)
    } else {
        reproject(&raster, epsg)
    }
}

/// Grid over `bounds` snapped to multiples of `resolution`, as
/// (transform, rows, cols).
fn snapped_grid(bounds: &BoundingBox, resolution: f64) -> (GeoTransform, usize, usize) {
    let grid = BoundingBox::new(
        (bounds.min_x / resolution).floor() * resolution,
        (bounds.min_y / resolution).floor() * resolution,
        (bounds.max_x / resolution).ceil() * resolution,
        (bounds.max_y / resolution).ceil() * resolution,
    );
    let cols = ((grid.width() / resolution).round() as usize).max(1);
    let rows = ((grid.height() / resolution).round() as usize).max(1);
    let transform = GeoTransform::new(grid.min_x, grid.max_y, resolution, -resolution);
    (transform, rows, cols)
}

/// Call `f(row, col, value)` for each grid pixel whose centre falls inside
/// `raster`, sampling nearest. Only the raster's own window of the grid is
/// walked. Returns the number of pixels visited.
fn for_each_covered_pixel(
    transform: &GeoTransform,
    (rows, cols): (usize, usize),
    raster: &Raster,
    mut f: impl FnMut(usize, usize, f32),
) -> usize {
    let bounds = raster.bounds();
    let (x0, y0) = transform.geo_to_pixel(bounds.min_x, bounds.max_y);
    let (x1, y1) = transform.geo_to_pixel(bounds.max_x, bounds.min_y);
    let window = |a: f64, b: f64, len: usize| {
        let start = a.min(b).floor().max(0.0) as usize;
        let end = (a.max(b).ceil().max(0.0) as usize).min(len);
        start..end
    };

    let mut visited = 0;
    for row in window(y0, y1, rows) {
        for col in window(x0, x1, cols) {
            let (x, y) = transform.pixel_to_geo(col, row);
            if let Some(value) = raster.value_at(x, y) {
                f(row, col, value);
                visited += 1;
            }
        }
    }
    visited
}

/// Add the non-NaN values of `raster` into `sum`.
fn add_into(sum: &mut Array2<f32>, transform: &GeoTransform, raster: &Raster) -> usize {
    let dim = sum.dim();
    for_each_covered_pixel(transform, dim, raster, |row, col, value| {
        if !value.is_nan() {
            sum[[row, col]] += value;
        }
    })
}

/// Download and stack the `asset_key` asset of every item.
///
/// Items without that asset are skipped. The raster CRS is the item's
/// `proj:epsg`, or `default_epsg`; the first usable item's CRS is the grid CRS.
pub fn stack_items<T: HttpTransport>(
    transport: &T,
    items: &[Item],
    asset_key: &str,
    resolution: f64,
    cache_dir: &Path,
    default_epsg: u32,
) -> Result<RasterCube> {
    let rasters = fetch_item_assets(transport, items, asset_key, cache_dir, default_epsg)?
        .into_iter()
        .map(|(path, epsg)| Raster::from_geotiff(&path, epsg))
        .collect::<Result<Vec<_>>>()?;

    let epsg = rasters.first().map(|r| r.epsg).unwrap_or(default_epsg);
    stack_rasters(&rasters, resolution, epsg)
}

/// Resample `rasters` (nearest) onto the union of their bounds.
///
/// The grid is snapped to multiples of `resolution` in `epsg`. Rasters in
/// another CRS are reprojected first.
pub fn stack_rasters(rasters: &[Raster], resolution: f64, epsg: u32) -> Result<RasterCube> {
    if rasters.is_empty() {
        return Err(ElevError::Raster("no elevation assets".into()));
    }
    check_resolution(resolution)?;

    let rasters = rasters
        .iter()
        .map(|r| into_crs(r.clone(), epsg))
        .collect::<Result<Vec<_>>>()?;

    let bounds = rasters
        .iter()
        .map(Raster::bounds)
        .reduce(|a, b| a.union(&b))
        .ok_or_else(|| ElevError::Raster("no elevation assets".into()))?;
    let (transform, rows, cols) = snapped_grid(&bounds, resolution);

    let mut data = Array3::from_elem((rasters.len(), rows, cols), f32::NAN);
    for (layer, raster) in rasters.iter().enumerate() {
        for_each_covered_pixel(&transform, (rows, cols), raster, |row, col, value| {
            data[[layer, row, col]] = value;
        });
    }

    tracing::debug!(layers = rasters.len(), rows, cols, epsg, "stacked rasters");
    Ok(RasterCube::new(data, transform, epsg))
}

/// Download the `asset_key` asset of every item and sum them on the union
/// grid, skipping NaN (a pixel no item covers is 0).
///
/// Same grid and CRS rules as [`stack_items`], but only one 2-D grid and one
/// decoded raster are held at a time: the union extent comes from the GeoTIFF
/// headers, then each raster is added over its own window.
pub fn sum_items<T: HttpTransport>(
    transport: &T,
    items: &[Item],
    asset_key: &str,
    resolution: f64,
    cache_dir: &Path,
    default_epsg: u32,
) -> Result<Raster> {
    check_resolution(resolution)?;
    let sources = fetch_item_assets(transport, items, asset_key, cache_dir, default_epsg)?;

    let headers = sources
        .iter()
        .map(|(path, epsg)| GeoTiffHeader::read(path, *epsg))
        .collect::<Result<Vec<_>>>()?;
    let epsg = headers
        .first()
        .map(|h| h.epsg)
        .ok_or_else(|| ElevError::Raster("no elevation assets".into()))?;

    let mut bounds: Option<BoundingBox> = None;
    for header in &headers {
        let b = if header.epsg == epsg {
            header.bounds()
        } else {
            header
                .bounds()
                .transform(&CoordTransformer::new(header.epsg, epsg)?)?
        };
        bounds = Some(bounds.map_or(b, |acc| acc.union(&b)));
    }
    let bounds = bounds.ok_or_else(|| ElevError::Raster("no elevation assets".into()))?;
    let (transform, rows, cols) = snapped_grid(&bounds, resolution);

    let mut sum = Array2::<f32>::zeros((rows, cols));
    for (path, source_epsg) in &sources {
        let raster = into_crs(Raster::from_geotiff(path, *source_epsg)?, epsg)?;
        add_into(&mut sum, &transform, &raster);
    }

    tracing::debug!(items = sources.len(), rows, cols, epsg, "summed rasters");
    Ok(Raster::new(sum, transform, epsg))
}
