use ndarray::Array2;

use crate::error::{ElevError, Result};
use crate::geo_core::CoordTransformer;
use crate::geometric::raster::{GeoTransform, Raster};

/// Reproject `raster` to `dst_epsg` with nearest-neighbour sampling.
///
/// Target bounds come from the densified source envelope. The output pixel
/// size keeps the number of pixels along the diagonal of the source, the
/// way GDAL suggests a warp grid. Pixels that fall outside the source are NaN.
pub fn reproject(raster: &Raster, dst_epsg: u32) -> Result<Raster> {
    if raster.epsg == dst_epsg {
        return Ok(raster.clone());
    }

    let (src_rows, src_cols) = raster.shape();
    if src_rows == 0 || src_cols == 0 {
        return Err(ElevError::Raster("cannot reproject an empty raster".into()));
    }

    let forward = CoordTransformer::new(raster.epsg, dst_epsg)?;
    let inverse = CoordTransformer::new(dst_epsg, raster.epsg)?;

    let bounds = raster.bounds().transform(&forward)?;
    let diagonal_pixels = ((src_rows * src_rows + src_cols * src_cols) as f64).sqrt();
    let resolution = bounds.width().hypot(bounds.height()) / diagonal_pixels;
    if !resolution.is_finite() || resolution <= 0.0 {
        return Err(ElevError::Projection(format!(
            "degenerate target grid for EPSG:{} -> EPSG:{dst_epsg}",
            raster.epsg
        )));
    }

    let cols = ((bounds.width() / resolution).ceil() as usize).max(1);
    let rows = ((bounds.height() / resolution).ceil() as usize).max(1);
    let transform = GeoTransform::new(bounds.min_x, bounds.max_y, resolution, -resolution);

    let mut data = Array2::from_elem((rows, cols), f32::NAN);
    for ((row, col), value) in data.indexed_iter_mut() {
        let (x, y) = transform.pixel_to_geo(col, row);
        // points outside the inverse projection's domain stay empty
        if let Ok((sx, sy)) = inverse.transform(x, y) {
            if let Some(v) = raster.value_at(sx, sy) {
                *value = v;
            }
        }
    }

    tracing::debug!(
        src_epsg = raster.epsg,
        dst_epsg,
        rows,
        cols,
        resolution,
        "reprojected raster"
    );
    Ok(Raster::new(data, transform, dst_epsg))
}
