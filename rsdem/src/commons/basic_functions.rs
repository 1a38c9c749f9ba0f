use std::path::{Path, PathBuf};
use url::Url;

use crate::error::{ElevError, Result};
use crate::geo_core::BoundingBox;

/// Float text as Python's `str` writes it: integral values keep `.0`, and
/// magnitudes below 1e-4 or from 1e16 up use an exponent (`1e-05`, `1e+16`).
pub fn float_repr(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    let magnitude = value.abs();
    if magnitude != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        let sci = format!("{value:e}");
        return match sci.split_once('e') {
            Some((mantissa, exp)) => {
                let (sign, digits) = match exp.strip_prefix('-') {
                    Some(digits) => ('-', digits),
                    None => ('+', exp),
                };
                format!("{mantissa}e{sign}{digits:0>2}")
            }
            None => sci,
        };
    }

    let text = value.to_string();
    if text.contains('.') {
        text
    } else {
        format!("{text}.0")
    }
}

/// Cache file name of an SRTM extract: `srtm_{south}-{north}-{west}-{east}.tif`,
/// numbers written by [`float_repr`] so existing caches (`srtm_46.5-47.0-...`)
/// are reused.
pub fn srtm_cache_name(bbox: &BoundingBox) -> String {
    format!(
        "srtm_{}-{}-{}-{}.tif",
        float_repr(bbox.south()),
        float_repr(bbox.north()),
        float_repr(bbox.west()),
        float_repr(bbox.east())
    )
}

/// Last path segment of a URL, used as the cache file name of a downloaded asset.
pub fn file_name_from_url(href: &str) -> Result<String> {
    let url = Url::parse(href)?;
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(str::to_string)
        .ok_or_else(|| ElevError::upstream(href, "asset URL has no file name"))
}

/// `{dir}/{file name of href}`
pub fn cache_path_for(dir: &Path, href: &str) -> Result<PathBuf> {
    Ok(dir.join(file_name_from_url(href)?))
}

/// Text of a resolution as it appears in asset keys (`2.0` -> `"2"`, `0.5` -> `"0.5"`).
pub fn resolution_label(resolution: f64) -> String {
    resolution.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_srtm_cache_name() {
        let bbox = BoundingBox::new(7.25, 46.5, 7.75, 47.0);
        assert_eq!(srtm_cache_name(&bbox), "srtm_46.5-47.0-7.25-7.75.tif");

        let bbox = BoundingBox::new(-8.0, -1.0, -7.0, 0.0);
        assert_eq!(srtm_cache_name(&bbox), "srtm_-1.0-0.0--8.0--7.0.tif");
    }

    #[test]
    fn test_float_repr_follows_python_str() {
        assert_eq!(float_repr(47.0), "47.0");
        assert_eq!(float_repr(46.9), "46.9");
        assert_eq!(float_repr(-0.0), "-0.0");
        assert_eq!(float_repr(0.0001), "0.0001");
        assert_eq!(float_repr(0.00001), "1e-05");
        assert_eq!(float_repr(-2.5e-7), "-2.5e-07");
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(123456789.0), "123456789.0");
        assert_eq!(float_repr(f64::NAN), "nan");
    }

    #[test]
    fn test_file_name_from_url() {
        let href = "https://data.geo.admin.ch/ch.swisstopo.swissalti3d/swissalti3d_2019_2600-1199/swissalti3d_2019_2600-1199_2_2056_5728.tif";
        assert_eq!(
            file_name_from_url(href).unwrap(),
            "swissalti3d_2019_2600-1199_2_2056_5728.tif"
        );
        assert!(file_name_from_url("https://example.com/").is_err());
        assert!(file_name_from_url("not a url").is_err());
    }

    #[test]
    fn test_resolution_label() {
        assert_eq!(resolution_label(2.0), "2");
        assert_eq!(resolution_label(0.5), "0.5");
    }
}
