use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] ::csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{format} export requires a geometry column")]
    MissingGeometry { format: &'static str },

    #[error("invalid geometry: {0}")]
    Geometry(String),
}

pub type Result<T> = std::result::Result<T, RenderError>;
