use std::path::PathBuf;

use crate::collect::global_variables::{
    get_data_path, DEFAULT_DEM_TYPE, OPENTOPOGRAPHY_API_KEY_ENV, OPENTOPOGRAPHY_URL,
};
use crate::collect::http::{download_to_file, HttpTransport, ReqwestTransport};
use crate::commons::basic_functions::{float_repr, srtm_cache_name};
use crate::error::Result;
use crate::geo_core::{
    estimate_utm_epsg, BoundingBox, CoordTransformer, MapRectangle, Region, EPSG_WGS84,
};
use crate::geometric::raster::Raster;
use crate::geometric::reproject::reproject;

/// Global DEM extract from OpenTopography, cached on disk per bounding box.
pub struct Srtm<T: HttpTransport = ReqwestTransport> {
    transport: T,
    output_path: PathBuf,
    url: String,
    dem_type: String,
    api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SrtmResult {
    /// DEM reprojected to its UTM zone
    pub dem: Raster,
    /// Bounds of the downloaded (geographic) DEM, for map overlay
    pub rectangle: MapRectangle,
    /// Cached GeoTIFF
    pub path: PathBuf,
}

impl Srtm<ReqwestTransport> {
    pub fn new(output_path: Option<String>) -> Result<Self> {
        Ok(Self::with_transport(output_path, ReqwestTransport::new()?))
    }
}

impl<T: HttpTransport> Srtm<T> {
    /// The API key is read from `OPENTOPOGRAPHY_API_KEY` when set.
    pub fn with_transport(output_path: Option<String>, transport: T) -> Self {
        Srtm {
            transport,
            output_path: output_path.map(PathBuf::from).unwrap_or_else(get_data_path),
            url: OPENTOPOGRAPHY_URL.to_string(),
            dem_type: DEFAULT_DEM_TYPE.to_string(),
            api_key: std::env::var(OPENTOPOGRAPHY_API_KEY_ENV)
                .ok()
                .filter(|k| !k.is_empty()),
        }
    }

    /// OpenTopography `demtype` (e.g. `SRTMGL1`, `COP30`).
    pub fn set_dem_type(&mut self, dem_type: &str) {
        self.dem_type = dem_type.to_string();
    }

    pub fn set_api_key(&mut self, api_key: Option<String>) {
        self.api_key = api_key;
    }

    pub fn set_url(&mut self, url: &str) {
        self.url = url.to_string();
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn cache_path(&self, bbox: &BoundingBox) -> PathBuf {
        let name = srtm_cache_name(bbox);
        if self.dem_type == DEFAULT_DEM_TYPE {
            self.output_path.join(name)
        } else {
            // other products must not share the SRTM GL3 cache entry
            self.output_path
                .join(format!("{}_{name}", self.dem_type.to_lowercase()))
        }
    }

    pub fn query(&self, bbox: &BoundingBox) -> Vec<(String, String)> {
        let mut query = vec![
            ("demtype".to_string(), self.dem_type.clone()),
            ("south".to_string(), float_repr(bbox.south())),
            ("north".to_string(), float_repr(bbox.north())),
            ("west".to_string(), float_repr(bbox.west())),
            ("east".to_string(), float_repr(bbox.east())),
            ("outputFormat".to_string(), "GTiff".to_string()),
        ];
        if let Some(key) = &self.api_key {
            query.push(("API_Key".to_string(), key.clone()));
        }
        query
    }

    /// Path of the GeoTIFF for `region`, downloading it on a cache miss.
    pub fn download(&self, region: &Region) -> Result<PathBuf> {
        let bbox = region.bbox();
        let path = self.cache_path(&bbox);
        if path.is_file() {
            tracing::info!(path = %path.display(), "using cached DEM");
            return Ok(path);
        }

        tracing::info!(
            dem_type = %self.dem_type,
            south = bbox.south(),
            north = bbox.north(),
            west = bbox.west(),
            east = bbox.east(),
            "downloading DEM from OpenTopography"
        );
        download_to_file(&self.transport, &self.url, &self.query(&bbox), &path)?;
        Ok(path)
    }

    pub fn fetch(&self, region: &Region) -> Result<SrtmResult> {
        let path = self.download(region)?;
        let dem = Raster::from_geotiff(&path, EPSG_WGS84)?;

        let bounds = dem.bounds();
        let rectangle = MapRectangle::from_bbox(&bounds);

        let geographic = if dem.epsg == EPSG_WGS84 {
            bounds
        } else {
            bounds.transform(&CoordTransformer::new(dem.epsg, EPSG_WGS84)?)?
        };
        let (lon, lat) = geographic.center();
        let utm = estimate_utm_epsg(lon, lat);

        let dem = reproject(&dem, utm)?;
        tracing::info!(epsg = utm, path = %path.display(), "DEM reprojected");
        Ok(SrtmResult {
            dem,
            rectangle,
            path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::http::testing::{MockResponse, MockTransport};
    use crate::error::ElevError;
    use crate::geometric::raster::GeoTransform;
    use ndarray::Array2;

    fn region() -> Region {
        Region::from_bbox(&BoundingBox::new(7.4, 46.9, 7.5, 47.0)).unwrap()
    }

    fn dem_bytes() -> Vec<u8> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("srtm.tif");
        let data = Array2::from_shape_fn((12, 12), |(r, c)| 500.0 + (r + c) as f32);
        Raster::new(
            data,
            GeoTransform::new(7.4, 47.0, 0.1 / 12.0, -0.1 / 12.0),
            EPSG_WGS84,
        )
        .write_geotiff(&path)
        .unwrap();
        std::fs::read(path).unwrap()
    }

    fn srtm(dir: &std::path::Path, transport: MockTransport) -> Srtm<MockTransport> {
        let mut srtm = Srtm::with_transport(Some(dir.display().to_string()), transport);
        srtm.set_api_key(None);
        srtm
    }

    #[test]
    fn test_query_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let mut srtm = srtm(dir.path(), MockTransport::new());
        let bbox = region().bbox();

        let query = srtm.query(&bbox);
        assert_eq!(
            query,
            vec![
                ("demtype".to_string(), "SRTMGL3".to_string()),
                ("south".to_string(), "46.9".to_string()),
                ("north".to_string(), "47.0".to_string()),
                ("west".to_string(), "7.4".to_string()),
                ("east".to_string(), "7.5".to_string()),
                ("outputFormat".to_string(), "GTiff".to_string()),
            ]
        );

        srtm.set_api_key(Some("secret".to_string()));
        assert!(srtm
            .query(&bbox)
            .contains(&("API_Key".to_string(), "secret".to_string())));
    }

    #[test]
    fn test_cache_path_per_dem_type() {
        let dir = tempfile::tempdir().unwrap();
        let mut srtm = srtm(dir.path(), MockTransport::new());
        let bbox = region().bbox();

        assert_eq!(
            srtm.cache_path(&bbox),
            dir.path().join("srtm_46.9-47.0-7.4-7.5.tif")
        );
        srtm.set_dem_type("COP30");
        assert_eq!(
            srtm.cache_path(&bbox),
            dir.path().join("cop30_srtm_46.9-47.0-7.4-7.5.tif")
        );
    }

    #[test]
    fn test_fetch_reprojects_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        transport.respond(OPENTOPOGRAPHY_URL, MockResponse::Bytes(dem_bytes()));
        let srtm = srtm(dir.path(), transport);

        let first = srtm.fetch(&region()).unwrap();

        assert_eq!(first.path, dir.path().join("srtm_46.9-47.0-7.4-7.5.tif"));
        assert!(first.path.is_file());
        assert_eq!(first.dem.epsg, 32632);
        let [(south, west), (north, east)] = first.rectangle.bounds();
        assert!((south - 46.9).abs() < 1e-9 && (north - 47.0).abs() < 1e-9);
        assert!((west - 7.4).abs() < 1e-9 && (east - 7.5).abs() < 1e-9);
        assert_eq!(srtm.transport().request_count(), 1);
        assert_eq!(srtm.transport().requests()[0].query[0].1, "SRTMGL3");

        // identical bounding box: served from disk
        let second = srtm.fetch(&region()).unwrap();
        assert_eq!(srtm.transport().request_count(), 1);
        assert_eq!(second.rectangle, first.rectangle);
        assert_eq!(second.dem.shape(), first.dem.shape());
    }

    #[test]
    fn test_failed_download_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        transport
            .respond(OPENTOPOGRAPHY_URL, MockResponse::Status(401))
            .respond(OPENTOPOGRAPHY_URL, MockResponse::Bytes(dem_bytes()));
        let srtm = srtm(dir.path(), transport);

        let err = srtm.fetch(&region()).unwrap_err();
        assert!(matches!(err, ElevError::Upstream { .. }));
        assert!(!srtm.cache_path(&region().bbox()).exists());

        // next call retries the download
        srtm.fetch(&region()).unwrap();
        assert_eq!(srtm.transport().request_count(), 2);
    }
}
