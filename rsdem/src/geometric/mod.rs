pub mod raster;
pub mod reproject;
pub mod srtm;
pub mod stack;
pub mod swiss_elevation;
