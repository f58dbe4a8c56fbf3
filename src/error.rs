use thiserror::Error;

pub type Result<T> = std::result::Result<T, DelwaqError>;

#[derive(Debug, Error)]
pub enum DelwaqError {
    /// Unknown method/unit names, inconsistent options, unknown components.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required map, variable or file is absent from a source.
    #[error("missing input: {0}")]
    MissingInput(String),

    /// Shape or georeference mismatch between a source and the model grid.
    #[error("grid error: {0}")]
    Grid(String),

    #[error("time error: {0}")]
    Time(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("NetCDF error: {0}")]
    NetCdf(#[from] netcdf::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl DelwaqError {
    pub fn config(msg: impl Into<String>) -> Self {
        DelwaqError::Config(msg.into())
    }

    pub fn missing(msg: impl Into<String>) -> Self {
        DelwaqError::MissingInput(msg.into())
    }

    pub fn grid(msg: impl Into<String>) -> Self {
        DelwaqError::Grid(msg.into())
    }

    pub fn is_config(&self) -> bool {
        matches!(self, DelwaqError::Config(_))
    }
}
