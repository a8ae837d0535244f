use camino::Utf8PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CorefitError {
    #[error("Missing input data: {0}")]
    MissingData(String),

    #[error("Unable to parse {path} (line {line}): {reason}")]
    Parse {
        path: Utf8PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Unable to perform file operation: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parquet error: {0}")]
    ParquetError(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    ArrowError(#[from] arrow_schema::ArrowError),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid fit parameter: {0}")]
    InvalidFitParameter(String),

    #[error("Unexpected table schema in {path}: {reason}")]
    InvalidTableSchema { path: Utf8PathBuf, reason: String },
}

impl PartialEq for CorefitError {
    fn eq(&self, other: &Self) -> bool {
        use CorefitError::*;
        match (self, other) {
            (MissingData(a), MissingData(b)) => a == b,
            (
                Parse {
                    path: pa,
                    line: la,
                    reason: ra,
                },
                Parse {
                    path: pb,
                    line: lb,
                    reason: rb,
                },
            ) => pa == pb && la == lb && ra == rb,
            (InvalidConfig(a), InvalidConfig(b)) => a == b,
            (InvalidFitParameter(a), InvalidFitParameter(b)) => a == b,
            (
                InvalidTableSchema {
                    path: pa,
                    reason: ra,
                },
                InvalidTableSchema {
                    path: pb,
                    reason: rb,
                },
            ) => pa == pb && ra == rb,

            // Wrapped third-party errors are not comparable: equal if same variant
            (IoError(_), IoError(_)) => true,
            (ParquetError(_), ParquetError(_)) => true,
            (ArrowError(_), ArrowError(_)) => true,
            (CsvError(_), CsvError(_)) => true,
            (YamlError(_), YamlError(_)) => true,

            _ => false,
        }
    }
}
