//! Tests against the live services. Run with `cargo test -- --ignored`.

use rsdem::collect::global_variables::{SWISSALTI3D_COLLECTION, SWISS_STAC_URL};
use rsdem::collect::http::ReqwestTransport;
use rsdem::collect::stac::{PageEnd, SearchRequest, StacSearchClient};
use rsdem::geo_core::{BoundingBox, Region};
use rsdem::geometric::srtm::Srtm;
use rsdem::geometric::swiss_elevation::SwissElevation;

fn bern() -> Region {
    Region::from_bbox(&BoundingBox::new(7.440, 46.946, 7.446, 46.950)).unwrap()
}

#[test]
#[ignore]
fn swisstopo_search_paginates() {
    let client = StacSearchClient::new(SWISS_STAC_URL, ReqwestTransport::new().unwrap()).unwrap();
    let region = Region::from_bbox(&BoundingBox::new(7.40, 46.90, 7.50, 47.00)).unwrap();
    let request = SearchRequest::for_region(&region)
        .collections([SWISSALTI3D_COLLECTION])
        .limit(30)
        .page_limit(10);

    let result = client.search(&request).unwrap();

    assert!(result.len() >= 30);
    assert_eq!(result.pagination(), PageEnd::LimitReached);
    assert!(result.collection(SWISSALTI3D_COLLECTION).is_some());
}

#[test]
#[ignore]
fn swiss_elevation_for_bern() {
    let dir = tempfile::tempdir().unwrap();
    let swiss = SwissElevation::new(Some(dir.path().display().to_string())).unwrap();

    let result = swiss.fetch(&bern()).unwrap();

    assert!(!result.results.is_empty());
    assert_eq!(result.elevation.epsg, 2056);
    let max = result
        .elevation
        .data
        .iter()
        .copied()
        .fold(f32::MIN, f32::max);
    assert!(max > 500.0 && max < 700.0, "{max}");
}

#[test]
#[ignore]
fn srtm_for_bern() {
    if std::env::var("OPENTOPOGRAPHY_API_KEY").is_err() {
        eprintln!("OPENTOPOGRAPHY_API_KEY not set, skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let srtm = Srtm::new(Some(dir.path().display().to_string())).unwrap();

    let result = srtm.fetch(&bern()).unwrap();

    assert_eq!(result.dem.epsg, 32632);
    assert!(result.path.is_file());
}
