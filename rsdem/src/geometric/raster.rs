//! In-memory rasters and minimal GeoTIFF I/O.
//!
//! Only what the elevation fetchers need: north-up grids, one CRS given as
//! an EPSG code, no-data as NaN. GeoTIFF georeferencing is read from
//! ModelPixelScale + ModelTiepoint (or ModelTransformation), the GeoKey
//! directory and the GDAL_NODATA tag.

use ndarray::{Array2, Array3, Axis};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::colortype::Gray32Float;
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;

use crate::error::{ElevError, Result};
use crate::geo_core::{is_geographic_crs, BoundingBox};

const KEY_MODEL_TYPE: u16 = 1024;
const KEY_RASTER_TYPE: u16 = 1025;
const KEY_GEOGRAPHIC_TYPE: u16 = 2048;
const KEY_PROJECTED_CS_TYPE: u16 = 3072;
const USER_DEFINED: u16 = 32767;
const RASTER_PIXEL_IS_POINT: u16 = 2;

/// North-up affine transform. `pixel_height` is negative.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        GeoTransform {
            origin_x,
            origin_y,
            pixel_width,
            pixel_height,
        }
    }

    /// Coordinates of the centre of pixel (`col`, `row`).
    pub fn pixel_to_geo(&self, col: usize, row: usize) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.pixel_width,
            self.origin_y + (row as f64 + 0.5) * self.pixel_height,
        )
    }

    /// Fractional (col, row) of a point. Floor to get the containing pixel.
    pub fn geo_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.origin_x) / self.pixel_width,
            (y - self.origin_y) / self.pixel_height,
        )
    }

    /// Outer bounds of a `cols` x `rows` grid.
    pub fn bounds(&self, cols: usize, rows: usize) -> BoundingBox {
        let x0 = self.origin_x;
        let x1 = self.origin_x + cols as f64 * self.pixel_width;
        let y0 = self.origin_y;
        let y1 = self.origin_y + rows as f64 * self.pixel_height;
        BoundingBox::new(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))
    }
}

/// Single-band raster, NaN = no data.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    pub data: Array2<f32>,
    pub transform: GeoTransform,
    pub epsg: u32,
}

impl Raster {
    pub fn new(data: Array2<f32>, transform: GeoTransform, epsg: u32) -> Self {
        Raster {
            data,
            transform,
            epsg,
        }
    }

    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn bounds(&self) -> BoundingBox {
        let (rows, cols) = self.shape();
        self.transform.bounds(cols, rows)
    }

    /// Value of the pixel containing (`x`, `y`), `None` outside the grid.
    pub fn value_at(&self, x: f64, y: f64) -> Option<f32> {
        let (col, row) = self.transform.geo_to_pixel(x, y);
        if !(col >= 0.0 && row >= 0.0) {
            return None;
        }
        self.data.get((row.floor() as usize, col.floor() as usize)).copied()
    }

    /// Read a single-band GeoTIFF. `default_epsg` is used when the file has
    /// no usable GeoKeys.
    pub fn from_geotiff(path: &Path, default_epsg: u32) -> Result<Raster> {
        RasterCube::from_geotiff(path, default_epsg)?.squeeze()
    }

    /// Write as a Float32 GeoTIFF with NaN as GDAL_NODATA.
    pub fn write_geotiff(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let (rows, cols) = self.shape();
        let width = u32::try_from(cols).map_err(|_| ElevError::Raster("raster too wide".into()))?;
        let height =
            u32::try_from(rows).map_err(|_| ElevError::Raster("raster too tall".into()))?;

        let mut encoder = TiffEncoder::new(File::create(path)?)?;
        let mut image = encoder.new_image::<Gray32Float>(width, height)?;

        let t = &self.transform;
        let scale = [t.pixel_width, -t.pixel_height, 0.0];
        let tiepoint = [0.0, 0.0, 0.0, t.origin_x, t.origin_y, 0.0];
        image
            .encoder()
            .write_tag(Tag::ModelPixelScaleTag, &scale[..])?;
        image
            .encoder()
            .write_tag(Tag::ModelTiepointTag, &tiepoint[..])?;
        let geokeys = geo_key_directory(self.epsg)?;
        image
            .encoder()
            .write_tag(Tag::GeoKeyDirectoryTag, geokeys.as_slice())?;
        image.encoder().write_tag(Tag::GdalNodata, "nan")?;

        let data: Vec<f32> = self.data.iter().copied().collect();
        image.write_data(&data)?;
        tracing::debug!(path = %path.display(), rows, cols, epsg = self.epsg, "wrote GeoTIFF");
        Ok(())
    }
}

/// Grid and CRS of a GeoTIFF, read without decoding its pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTiffHeader {
    pub rows: usize,
    pub cols: usize,
    pub transform: GeoTransform,
    pub epsg: u32,
}

impl GeoTiffHeader {
    pub fn read(path: &Path, default_epsg: u32) -> Result<GeoTiffHeader> {
        let mut decoder = Decoder::new(BufReader::new(File::open(path)?))?;
        read_header(&mut decoder, default_epsg)
    }

    pub fn bounds(&self) -> BoundingBox {
        self.transform.bounds(self.cols, self.rows)
    }
}

/// Stack of rasters on one grid, shaped (layer, row, col).
#[derive(Debug, Clone, PartialEq)]
pub struct RasterCube {
    pub data: Array3<f32>,
    pub transform: GeoTransform,
    pub epsg: u32,
}

impl RasterCube {
    pub fn new(data: Array3<f32>, transform: GeoTransform, epsg: u32) -> Self {
        RasterCube {
            data,
            transform,
            epsg,
        }
    }

    pub fn layers(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn layer(&self, index: usize) -> Option<Raster> {
        (index < self.layers()).then(|| {
            Raster::new(
                self.data.index_axis(Axis(0), index).to_owned(),
                self.transform,
                self.epsg,
            )
        })
    }

    /// Per-pixel sum over layers, ignoring NaN. A pixel with no data in any
    /// layer sums to 0.
    pub fn sum_layers(&self) -> Raster {
        let data = self
            .data
            .map_axis(Axis(0), |lane| lane.iter().filter(|v| !v.is_nan()).sum::<f32>());
        Raster::new(data, self.transform, self.epsg)
    }

    /// Drop the layer axis of a single-layer cube.
    pub fn squeeze(self) -> Result<Raster> {
        match self.layers() {
            1 => Ok(Raster::new(
                self.data.index_axis_move(Axis(0), 0),
                self.transform,
                self.epsg,
            )),
            n => Err(ElevError::Raster(format!(
                "cannot squeeze a cube with {n} layers"
            ))),
        }
    }

    /// Read a GeoTIFF; every sample of a chunky image becomes a layer.
    pub fn from_geotiff(path: &Path, default_epsg: u32) -> Result<RasterCube> {
        let file = File::open(path)?;
        decode_geotiff(BufReader::new(file), default_epsg)
    }
}

fn geo_key_directory(epsg: u32) -> Result<Vec<u16>> {
    let code = u16::try_from(epsg)
        .map_err(|_| ElevError::Projection(format!("EPSG:{epsg} cannot be written as a GeoKey")))?;
    let (model_type, crs_key) = if is_geographic_crs(epsg) {
        (2, KEY_GEOGRAPHIC_TYPE)
    } else {
        (1, KEY_PROJECTED_CS_TYPE)
    };
    Ok(vec![
        1, 1, 0, 3, // version 1.1.0, 3 keys
        KEY_MODEL_TYPE, 0, 1, model_type,
        KEY_RASTER_TYPE, 0, 1, 1, // pixel is area
        crs_key, 0, 1, code,
    ])
}

/// Short GeoKeys stored inline in the directory (location 0).
fn read_geo_keys<R: Read + Seek>(decoder: &mut Decoder<R>) -> BTreeMap<u16, u16> {
    let Ok(directory) = decoder.get_tag_u16_vec(Tag::GeoKeyDirectoryTag) else {
        return BTreeMap::new();
    };
    directory
        .chunks_exact(4)
        .skip(1)
        .filter(|entry| entry[1] == 0)
        .map(|entry| (entry[0], entry[3]))
        .collect()
}

fn read_transform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<GeoTransform> {
    // GeoTIFF tags decode to their named variants, not Tag::Unknown
    let scale = decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag).ok();
    let tiepoint = decoder.get_tag_f64_vec(Tag::ModelTiepointTag).ok();

    if let (Some(scale), Some(tiepoint)) = (scale, tiepoint) {
        if scale.len() >= 2 && tiepoint.len() >= 6 {
            // tiepoint: [I, J, K, X, Y, Z]
            return Ok(GeoTransform::new(
                tiepoint[3] - tiepoint[0] * scale[0],
                tiepoint[4] + tiepoint[1] * scale[1],
                scale[0],
                -scale[1],
            ));
        }
    }

    let matrix = decoder
        .get_tag_f64_vec(Tag::ModelTransformationTag)
        .map_err(|_| ElevError::Raster("GeoTIFF has no georeferencing tags".into()))?;
    if matrix.len() < 16 || matrix[1] != 0.0 || matrix[4] != 0.0 {
        return Err(ElevError::Raster(
            "rotated or malformed ModelTransformation".into(),
        ));
    }
    Ok(GeoTransform::new(matrix[3], matrix[7], matrix[0], matrix[5]))
}

fn read_nodata<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<f64> {
    decoder
        .get_tag_ascii_string(Tag::GdalNodata)
        .ok()
        .and_then(|s| s.trim_matches(|c: char| c == '\0' || c.is_whitespace()).parse().ok())
}

fn read_header<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    default_epsg: u32,
) -> Result<GeoTiffHeader> {
    let (width, height) = decoder.dimensions()?;
    let mut transform = read_transform(decoder)?;
    let keys = read_geo_keys(decoder);
    if keys.get(&KEY_RASTER_TYPE) == Some(&RASTER_PIXEL_IS_POINT) {
        // tiepoint refers to the centre of the first pixel
        transform.origin_x -= transform.pixel_width / 2.0;
        transform.origin_y -= transform.pixel_height / 2.0;
    }
    let epsg = [KEY_PROJECTED_CS_TYPE, KEY_GEOGRAPHIC_TYPE]
        .iter()
        .filter_map(|key| keys.get(key))
        .find(|code| **code != 0 && **code != USER_DEFINED)
        .map(|code| u32::from(*code))
        .unwrap_or(default_epsg);
    Ok(GeoTiffHeader {
        rows: height as usize,
        cols: width as usize,
        transform,
        epsg,
    })
}

fn decode_geotiff<R: Read + Seek>(reader: R, default_epsg: u32) -> Result<RasterCube> {
    let mut decoder = Decoder::new(reader)?;
    let GeoTiffHeader {
        rows,
        cols,
        transform,
        epsg,
    } = read_header(&mut decoder, default_epsg)?;
    let nodata = read_nodata(&mut decoder);

    let samples: Vec<f64> = match decoder.read_image()? {
        DecodingResult::U8(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::U16(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::U32(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::U64(buf) => buf.into_iter().map(|v| v as f64).collect(),
        DecodingResult::I8(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::I16(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::I32(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::I64(buf) => buf.into_iter().map(|v| v as f64).collect(),
        DecodingResult::F32(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::F64(buf) => buf,
        #[allow(unreachable_patterns)]
        _ => return Err(ElevError::Raster("unsupported TIFF sample format".into())),
    };

    let pixels = rows * cols;
    if pixels == 0 || samples.len() % pixels != 0 {
        return Err(ElevError::Raster(format!(
            "{} samples do not fit a {cols}x{rows} image",
            samples.len()
        )));
    }
    let bands = samples.len() / pixels;

    let data = Array3::from_shape_fn((bands, rows, cols), |(band, row, col)| {
        let value = samples[(row * cols + col) * bands + band];
        match nodata {
            Some(nd) if !nd.is_nan() && value == nd => f32::NAN,
            _ => value as f32,
        }
    });

    Ok(RasterCube::new(data, transform, epsg))
}
