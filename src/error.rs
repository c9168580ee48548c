use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("input dataset not found: {0:?}")]
    MissingInput(PathBuf),

    #[error("unsupported dataset format: {0}")]
    UnsupportedFormat(String),

    #[error("unsupported coordinate reference system: {0}")]
    UnsupportedCrs(String),

    #[error("invalid bounding box '{0}': expected west,south,east,north")]
    InvalidBbox(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("buffer distance must be a positive number of meters, got {0}")]
    InvalidDistance(f64),

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("shapefile error: {0}")]
    Shapefile(#[from] shapefile::Error),

    #[error("OSM PBF error: {0}")]
    Osm(#[from] osmpbf::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("GeoTIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("configuration error: {0}")]
    Config(#[from] toml::de::Error),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
