pub mod calibration;
pub mod extraction;
pub mod features;
pub mod fdr;
pub mod library;
pub mod mass;
pub mod ml;
pub mod peak_group;
pub mod pipeline;
pub mod query;
pub mod result;
pub mod scan_index;
pub mod scoring;
pub mod spectrum;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Json(serde_json::Error),
    /// Accelerator backend failure: device missing, allocation or kernel error
    Gpu(String),
    Extraction(String),
    FeatureSchema {
        expected: usize,
        found: usize,
    },
    BufferTooSmall {
        needed: usize,
        found: usize,
    },
    Calibration(String),
    Fdr(String),
    ThreadPool(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => e.fmt(f),
            Self::Json(e) => e.fmt(f),
            Self::Gpu(msg) => write!(f, "accelerator backend error: {}", msg),
            Self::Extraction(msg) => write!(f, "extraction error: {}", msg),
            Self::FeatureSchema { expected, found } => write!(
                f,
                "feature schema mismatch: expected {} features, found {}",
                expected, found
            ),
            Self::BufferTooSmall { needed, found } => write!(
                f,
                "buffer too small: needed {} elements, found {}",
                needed, found
            ),
            Self::Calibration(msg) => write!(f, "calibration error: {}", msg),
            Self::Fdr(msg) => write!(f, "fdr error: {}", msg),
            Self::ThreadPool(msg) => write!(f, "unable to build thread pool: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

pub fn read_json<P, T>(path: P) -> Result<T, Error>
where
    P: AsRef<std::path::Path>,
    T: for<'de> serde::Deserialize<'de>,
{
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}
