use std::path::PathBuf;

/// Default directory for cached downloads (relative to the working directory)
pub const DATA_PATH: &str = "data";

/// Environment variable overriding [`DATA_PATH`]
pub const DATA_PATH_ENV: &str = "RSDEM_DATA_PATH";

/// swisstopo STAC API root
pub const SWISS_STAC_URL: &str = "https://data.geo.admin.ch/api/stac/v0.9/";

pub const SWISSALTI3D_COLLECTION: &str = "ch.swisstopo.swissalti3d";

/// swissALTI3D is published as a single 2019 release
pub const SWISSALTI3D_DATETIME: &str = "2019-01-01";

pub const SWISSALTI3D_LIMIT: usize = 100;

/// OpenTopography global DEM API
pub const OPENTOPOGRAPHY_URL: &str = "https://portal.opentopography.org/API/globaldem";

/// SRTM GL3 (90 m)
pub const DEFAULT_DEM_TYPE: &str = "SRTMGL3";

/// Environment variable holding the OpenTopography API key
pub const OPENTOPOGRAPHY_API_KEY_ENV: &str = "OPENTOPOGRAPHY_API_KEY";

pub fn get_data_path() -> PathBuf {
    std::env::var_os(DATA_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DATA_PATH))
}
