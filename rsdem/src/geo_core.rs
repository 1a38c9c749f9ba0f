use geo::{BoundingRect, Polygon, Rect};
use geojson::{Feature, GeoJson, Geometry, Value};
use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use serde::{Deserialize, Serialize};

use crate::error::{ElevError, Result};

/// WGS84 geographic (longitude/latitude in degrees)
pub const EPSG_WGS84: u32 = 4326;
/// Web Mercator
pub const EPSG_WEB_MERCATOR: u32 = 3857;
/// Swiss CH1903+ / LV95, the native CRS of swissALTI3D
pub const EPSG_LV95: u32 = 2056;
/// Swiss CH1903 / LV03
pub const EPSG_LV03: u32 = 21781;

/// A user-drawn region: a GeoJSON polygon in WGS84.
///
/// Map widgets hand back their drawn features as GeoJSON; the last drawn
/// feature is the one of interest.
#[derive(Debug, Clone)]
pub struct Region {
    geometry: Geometry,
    polygon: Polygon<f64>,
}

impl Region {
    /// Build a region from a GeoJSON geometry. Only polygons are accepted.
    pub fn from_geometry(geometry: Geometry) -> Result<Self> {
        let polygon = match &geometry.value {
            Value::Polygon(rings) => {
                let exterior = rings
                    .first()
                    .ok_or_else(|| ElevError::InvalidRegion("polygon has no rings".into()))?;
                if exterior.is_empty() {
                    return Err(ElevError::InvalidRegion("exterior ring is empty".into()));
                }
                Polygon::<f64>::try_from(geometry.value.clone())
                    .map_err(|e| ElevError::InvalidRegion(e.to_string()))?
            }
            _ => {
                return Err(ElevError::InvalidRegion(
                    "expected a Polygon geometry".into(),
                ))
            }
        };

        Ok(Region { geometry, polygon })
    }

    /// Parse a region from GeoJSON text.
    ///
    /// Accepts a bare geometry, a feature, or a feature collection (the last
    /// feature wins, like a map widget's most recent drawing).
    pub fn from_geojson_str(s: &str) -> Result<Self> {
        let geojson: GeoJson = s
            .parse()
            .map_err(|e: geojson::Error| ElevError::InvalidRegion(e.to_string()))?;

        let geometry = match geojson {
            GeoJson::Geometry(g) => Some(g),
            GeoJson::Feature(f) => f.geometry,
            GeoJson::FeatureCollection(fc) => fc.features.into_iter().last().and_then(|f| f.geometry),
        };

        let geometry =
            geometry.ok_or_else(|| ElevError::InvalidRegion("no geometry found".into()))?;
        Self::from_geometry(geometry)
    }

    /// Axis-aligned rectangle (lon/lat degrees), as a map widget draws it.
    pub fn from_bbox(bbox: &BoundingBox) -> Result<Self> {
        let rect = Rect::new(
            geo::coord! { x: bbox.min_x, y: bbox.min_y },
            geo::coord! { x: bbox.max_x, y: bbox.max_y },
        );
        let polygon: Polygon<f64> = rect.to_polygon();
        Self::from_geometry(Geometry::new(Value::from(&polygon)))
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Bounding box of the polygon (min/max longitude and latitude).
    pub fn bbox(&self) -> BoundingBox {
        // from_geometry guarantees a non-empty exterior ring
        match self.polygon.bounding_rect() {
            Some(rect) => BoundingBox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y),
            None => BoundingBox::new(0.0, 0.0, 0.0, 0.0),
        }
    }
}

/// Bounding box structure
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64, // min longitude / easting
    pub min_y: f64, // min latitude / northing
    pub max_x: f64, // max longitude / easting
    pub max_y: f64, // max latitude / northing
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        BoundingBox {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn south(&self) -> f64 {
        self.min_y
    }

    pub fn north(&self) -> f64 {
        self.max_y
    }

    pub fn west(&self) -> f64 {
        self.min_x
    }

    pub fn east(&self) -> f64 {
        self.max_x
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    /// Smallest box containing both boxes.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox::new(
            self.min_x.min(other.min_x),
            self.min_y.min(other.min_y),
            self.max_x.max(other.max_x),
            self.max_y.max(other.max_y),
        )
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x < other.max_x
            && other.min_x < self.max_x
            && self.min_y < other.max_y
            && other.min_y < self.max_y
    }

    /// Transform bounding box to another CRS.
    ///
    /// Each edge is densified so the curvature of the target projection is
    /// captured in the envelope.
    pub fn transform(&self, transformer: &CoordTransformer) -> Result<Self> {
        const STEPS: usize = 21;

        let mut out = BoundingBox::new(f64::MAX, f64::MAX, f64::MIN, f64::MIN);
        for i in 0..STEPS {
            let t = i as f64 / (STEPS - 1) as f64;
            let x = self.min_x + t * self.width();
            let y = self.min_y + t * self.height();
            for (px, py) in [(x, self.min_y), (x, self.max_y), (self.min_x, y), (self.max_x, y)] {
                let (tx, ty) = transformer.transform(px, py)?;
                out.min_x = out.min_x.min(tx);
                out.min_y = out.min_y.min(ty);
                out.max_x = out.max_x.max(tx);
                out.max_y = out.max_y.max(ty);
            }
        }
        Ok(out)
    }
}

/// Rectangle for overlaying raster bounds on a map widget.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapRectangle {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl MapRectangle {
    pub fn from_bbox(bbox: &BoundingBox) -> Self {
        MapRectangle {
            south: bbox.min_y,
            west: bbox.min_x,
            north: bbox.max_y,
            east: bbox.max_x,
        }
    }

    /// Corner pairs in map-widget order: `[(south, west), (north, east)]`.
    pub fn bounds(&self) -> [(f64, f64); 2] {
        [(self.south, self.west), (self.north, self.east)]
    }

    /// The rectangle as a GeoJSON polygon feature.
    pub fn to_geojson(&self) -> Feature {
        let rect = Rect::new(
            geo::coord! { x: self.west, y: self.south },
            geo::coord! { x: self.east, y: self.north },
        );
        let polygon: Polygon<f64> = rect.to_polygon();
        Feature::from(Geometry::new(Value::from(&polygon)))
    }
}

/// proj4 definition for the EPSG codes this crate works with.
pub fn get_proj_string(epsg: u32) -> Option<String> {
    match epsg {
        EPSG_WGS84 => Some("+proj=longlat +datum=WGS84 +no_defs".to_string()),
        EPSG_WEB_MERCATOR => Some(
            "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +no_defs"
                .to_string(),
        ),
        EPSG_LV95 => Some(
            "+proj=somerc +lat_0=46.9524055555556 +lon_0=7.43958333333333 +k_0=1 \
             +x_0=2600000 +y_0=1200000 +ellps=bessel \
             +towgs84=674.374,15.056,405.346,0,0,0,0 +units=m +no_defs"
                .to_string(),
        ),
        EPSG_LV03 => Some(
            "+proj=somerc +lat_0=46.9524055555556 +lon_0=7.43958333333333 +k_0=1 \
             +x_0=600000 +y_0=200000 +ellps=bessel \
             +towgs84=674.374,15.056,405.346,0,0,0,0 +units=m +no_defs"
                .to_string(),
        ),
        _ => parse_utm_epsg(epsg).map(|(zone, north)| {
            let south = if north { "" } else { " +south" };
            format!("+proj=utm +zone={zone}{south} +datum=WGS84 +units=m +no_defs")
        }),
    }
}

pub fn is_geographic_crs(epsg: u32) -> bool {
    epsg == EPSG_WGS84
}

/// Split a WGS84 / UTM EPSG code into `(zone, is_north)`.
pub fn parse_utm_epsg(epsg: u32) -> Option<(u32, bool)> {
    if (32601..=32660).contains(&epsg) {
        Some((epsg - 32600, true))
    } else if (32701..=32760).contains(&epsg) {
        Some((epsg - 32700, false))
    } else {
        None
    }
}

/// EPSG code of the UTM zone containing a WGS84 coordinate.
pub fn estimate_utm_epsg(lon: f64, lat: f64) -> u32 {
    let zone = (((lon + 180.0) / 6.0).floor() as i64 + 1).clamp(1, 60) as u32;
    if lat >= 0.0 {
        32600 + zone
    } else {
        32700 + zone
    }
}

/// Reusable coordinate transformer between two EPSG codes (pure Rust).
///
/// Geographic coordinates are taken and returned in degrees.
pub struct CoordTransformer {
    source_proj: Proj,
    target_proj: Proj,
    source_epsg: u32,
    target_epsg: u32,
}

impl std::fmt::Debug for CoordTransformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordTransformer")
            .field("source_epsg", &self.source_epsg)
            .field("target_epsg", &self.target_epsg)
            .finish_non_exhaustive()
    }
}

impl CoordTransformer {
    pub fn new(source_epsg: u32, target_epsg: u32) -> Result<Self> {
        let source_proj = Self::build_proj(source_epsg)?;
        let target_proj = Self::build_proj(target_epsg)?;

        Ok(CoordTransformer {
            source_proj,
            target_proj,
            source_epsg,
            target_epsg,
        })
    }

    fn build_proj(epsg: u32) -> Result<Proj> {
        let definition = get_proj_string(epsg)
            .ok_or_else(|| ElevError::Projection(format!("EPSG:{epsg} not supported")))?;
        Proj::from_proj_string(&definition)
            .map_err(|e| ElevError::Projection(format!("invalid projection EPSG:{epsg}: {e:?}")))
    }

    pub fn transform(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        if self.source_epsg == self.target_epsg {
            return Ok((x, y));
        }

        let mut point = if is_geographic_crs(self.source_epsg) {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };

        transform(&self.source_proj, &self.target_proj, &mut point).map_err(|e| {
            ElevError::Projection(format!(
                "EPSG:{} -> EPSG:{} failed for ({x}, {y}): {e:?}",
                self.source_epsg, self.target_epsg
            ))
        })?;

        if is_geographic_crs(self.target_epsg) {
            Ok((point.0.to_degrees(), point.1.to_degrees()))
        } else {
            Ok((point.0, point.1))
        }
    }
}
