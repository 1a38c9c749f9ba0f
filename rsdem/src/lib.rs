//! Elevation data for a drawn region: swissALTI3D tiles from the swisstopo
//! STAC catalog, or SRTM from the OpenTopography global DEM API.

pub mod collect;
pub mod commons;
pub mod error;
pub mod geo_core;
pub mod geometric;

pub use collect::stac::{ResultSet, SearchRequest, StacSearchClient};
pub use error::{ElevError, Result};
pub use geo_core::{BoundingBox, MapRectangle, Region};
pub use geometric::raster::{Raster, RasterCube};
pub use geometric::srtm::{Srtm, SrtmResult};
pub use geometric::swiss_elevation::{SwissElevation, SwissElevationResult};
