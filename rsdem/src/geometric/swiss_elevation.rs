use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::collect::global_variables::{
    get_data_path, SWISSALTI3D_COLLECTION, SWISSALTI3D_DATETIME, SWISSALTI3D_LIMIT,
    SWISS_STAC_URL,
};
use crate::collect::http::{HttpTransport, ReqwestTransport};
use crate::collect::stac::{Item, ResultSet, SearchRequest, StacSearchClient};
use crate::commons::basic_functions::resolution_label;
use crate::error::{ElevError, Result};
use crate::geo_core::{Region, EPSG_LV95};
use crate::geometric::raster::Raster;
use crate::geometric::stack::sum_items;

/// Asset key that stacking reads.
pub const ELEVATION_ASSET: &str = "elevation";

/// swissALTI3D tiles covering a drawn region, merged into one raster.
pub struct SwissElevation<T: HttpTransport = ReqwestTransport> {
    client: StacSearchClient<T>,
    output_path: PathBuf,
    resolution: f64,
}

/// Search result (with renamed assets) and the summed elevation raster.
#[derive(Debug, Clone)]
pub struct SwissElevationResult {
    pub results: ResultSet,
    pub elevation: Raster,
}

impl SwissElevation<ReqwestTransport> {
    /// Downloads are cached under `{output_path}/swissalti3d`
    /// (default: the data directory).
    pub fn new(output_path: Option<String>) -> Result<Self> {
        Self::with_transport(output_path, ReqwestTransport::new()?)
    }
}

impl<T: HttpTransport> SwissElevation<T> {
    pub fn with_transport(output_path: Option<String>, transport: T) -> Result<Self> {
        let output_path = output_path.map(PathBuf::from).unwrap_or_else(get_data_path);
        Ok(SwissElevation {
            client: StacSearchClient::new(SWISS_STAC_URL, transport)?,
            output_path,
            resolution: 2.0,
        })
    }

    /// Ground resolution in metres (2.0 or 0.5 for swissALTI3D).
    pub fn set_resolution(&mut self, resolution: f64) {
        self.resolution = resolution;
    }

    pub fn get_resolution(&self) -> f64 {
        self.resolution
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.output_path.join("swissalti3d")
    }

    pub fn search_request(&self, region: &Region) -> SearchRequest {
        SearchRequest::for_region(region)
            .collections([SWISSALTI3D_COLLECTION])
            .datetime(SWISSALTI3D_DATETIME)
            .limit(SWISSALTI3D_LIMIT)
    }

    pub fn fetch(&self, region: &Region) -> Result<SwissElevationResult> {
        if !(self.resolution.is_finite() && self.resolution > 0.0) {
            return Err(ElevError::Raster(format!(
                "invalid resolution {}",
                self.resolution
            )));
        }

        let found = self.client.search(&self.search_request(region))?;
        tracing::info!(items = found.len(), resolution = self.resolution, "swissALTI3D tiles found");

        let results = found.map_items(|item| rename_elevation_assets(item, self.resolution));
        let elevation = sum_items(
            self.client.transport(),
            results.items(),
            ELEVATION_ASSET,
            self.resolution,
            &self.cache_dir(),
            EPSG_LV95,
        )?;

        let (rows, cols) = elevation.shape();
        tracing::info!(rows, cols, epsg = elevation.epsg, "swiss elevation ready");
        Ok(SwissElevationResult { results, elevation })
    }
}

/// Keep only the `{id}_{resolution}_*.tif` asset of `item`, under the key
/// `elevation`. Every other asset is dropped. With several matches the last
/// key in order wins.
pub fn rename_elevation_assets(item: &Item, resolution: f64) -> Item {
    let prefix = format!("{}_{}_", item.id(), resolution_label(resolution));
    let assets = item
        .assets()
        .iter()
        .filter(|(key, _)| key.starts_with(&prefix) && key.ends_with(".tif"))
        .last()
        .map(|(_, asset)| (ELEVATION_ASSET.to_string(), asset.clone()))
        .into_iter()
        .collect::<BTreeMap<_, _>>();
    item.with_assets(assets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::http::testing::{MockResponse, MockTransport};
    use crate::geo_core::BoundingBox;
    use crate::geometric::raster::GeoTransform;
    use ndarray::Array2;
    use serde_json::{json, Value};

    const SEARCH: &str = "https://data.geo.admin.ch/api/stac/v0.9/search";
    const COLLECTION: &str =
        "https://data.geo.admin.ch/api/stac/v0.9/collections/ch.swisstopo.swissalti3d";

    fn tile_item(id: &str, x: u32) -> Value {
        json!({
            "type": "Feature",
            "id": id,
            "collection": "ch.swisstopo.swissalti3d",
            "properties": {"datetime": "2019-01-01T00:00:00Z"},
            "assets": {
                format!("{id}_0.5_2056_5728.tif"): {"href": format!("https://data.example/{id}_0.5.tif")},
                format!("{id}_2_2056_5728.tif"): {"href": format!("https://data.example/{id}_2.tif"), "proj:epsg": 2056},
                format!("{id}_2_2056_5728.xyz.zip"): {"href": format!("https://data.example/{id}_2.zip")}
            },
            "bbox": [x, 0, x + 1, 1]
        })
    }

    fn tiff_bytes(origin_x: f64, value: f32) -> Vec<u8> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tile.tif");
        Raster::new(
            Array2::from_elem((2, 2), value),
            GeoTransform::new(origin_x, 1_200_004.0, 2.0, -2.0),
            2056,
        )
        .write_geotiff(&path)
        .unwrap();
        std::fs::read(path).unwrap()
    }

    fn region() -> Region {
        Region::from_bbox(&BoundingBox::new(7.43, 46.94, 7.45, 46.96)).unwrap()
    }

    #[test]
    fn test_rename_keeps_only_matching_tif() {
        let item: Item = serde_json::from_value(json!({
            "id": "i1",
            "assets": {
                "i1_2_foo.tif": {"href": "https://x/X"},
                "i1_10_foo.tif": {"href": "https://x/Y"},
                "meta.json": {"href": "https://x/Z"}
            }
        }))
        .unwrap();

        let renamed = rename_elevation_assets(&item, 2.0);

        assert_eq!(renamed.assets().len(), 1);
        assert_eq!(renamed.asset("elevation").unwrap().href, "https://x/X");
        assert_eq!(item.assets().len(), 3);
    }

    #[test]
    fn test_rename_without_match_leaves_no_assets() {
        let item: Item = serde_json::from_value(json!({
            "id": "i1",
            "assets": {"i1_2_foo.xyz.zip": {"href": "https://x/zip"}}
        }))
        .unwrap();
        assert!(rename_elevation_assets(&item, 2.0).assets().is_empty());
        assert!(rename_elevation_assets(&item, 0.5).assets().is_empty());
    }

    #[test]
    fn test_rename_half_metre_resolution() {
        let item: Item = serde_json::from_value(tile_item("t1", 0)).unwrap();
        let renamed = rename_elevation_assets(&item, 0.5);
        assert_eq!(
            renamed.asset("elevation").unwrap().href,
            "https://data.example/t1_0.5.tif"
        );
    }

    #[test]
    fn test_fetch_searches_renames_and_sums() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        transport
            .respond(
                SEARCH,
                MockResponse::Json(json!({
                    "type": "FeatureCollection",
                    "features": [tile_item("t1", 0), tile_item("t2", 1)],
                    "links": [{"rel": "self", "href": SEARCH}]
                })),
            )
            .respond(
                COLLECTION,
                MockResponse::Json(json!({"id": "ch.swisstopo.swissalti3d", "title": "swissALTI3D"})),
            )
            .respond("https://data.example/t1_2.tif", MockResponse::Bytes(tiff_bytes(2_600_000.0, 500.0)))
            .respond("https://data.example/t2_2.tif", MockResponse::Bytes(tiff_bytes(2_600_004.0, 510.0)));

        let fetcher =
            SwissElevation::with_transport(Some(dir.path().display().to_string()), transport)
                .unwrap();
        let result = fetcher.fetch(&region()).unwrap();

        let requests = fetcher.client.transport().requests();
        let body = requests[0].body.as_ref().unwrap();
        assert_eq!(body["collections"], json!(["ch.swisstopo.swissalti3d"]));
        assert_eq!(body["datetime"], "2019-01-01");
        assert_eq!(body["intersects"]["type"], "Polygon");

        assert_eq!(result.results.len(), 2);
        assert_eq!(result.results.collections().len(), 1);
        for item in result.results.items() {
            assert_eq!(item.assets().keys().collect::<Vec<_>>(), vec!["elevation"]);
        }

        assert_eq!(result.elevation.epsg, 2056);
        assert_eq!(result.elevation.shape(), (2, 4));
        assert_eq!(result.elevation.data[[0, 0]], 500.0);
        assert_eq!(result.elevation.data[[1, 3]], 510.0);
        assert!(dir.path().join("swissalti3d").join("t1_2.tif").exists());
    }

    #[test]
    fn test_fetch_without_elevation_assets_fails() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new();
        transport.respond(
            SEARCH,
            MockResponse::Json(json!({"features": [{"id": "x", "assets": {}}]})),
        );

        let fetcher =
            SwissElevation::with_transport(Some(dir.path().display().to_string()), transport)
                .unwrap();
        assert!(matches!(
            fetcher.fetch(&region()),
            Err(ElevError::Raster(_))
        ));
    }

    #[test]
    fn test_default_resolution_is_two_metres() {
        let fetcher = SwissElevation::with_transport(None, MockTransport::new()).unwrap();
        assert_eq!(fetcher.get_resolution(), 2.0);
    }
}
