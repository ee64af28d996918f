use thiserror::Error;

#[derive(Error, Debug)]
pub enum WranglerError {
    #[error("Torch error: {0}")]
    Torch(#[from] tch::TchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Safetensors error: {0}")]
    Safetensors(#[from] safetensors::SafeTensorError),

    #[error("Text processing error: {0}")]
    Text(#[from] text_tools::TextError),

    #[error("Invalid parameter `{key}`: {reason}")]
    InvalidParam { key: &'static str, reason: String },

    #[error("Unsupported params file extension: {0:?}")]
    UnsupportedFormat(String),

    #[error("Expected {expected} {what}, got {actual}")]
    CountMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{what} {index} has per-sample shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        what: &'static str,
        index: usize,
        expected: Vec<i64>,
        actual: Vec<i64>,
    },

    #[error("Variable not found in model: {0}")]
    VariableNotFound(String),

    #[error("Checkpoint {path:?} is missing variable {name}")]
    MissingVariable { path: String, name: String },

    #[error("Unsupported checkpoint dtype: {0}")]
    UnsupportedDtype(String),

    #[error("No checkpoint found in {0:?}")]
    NoCheckpoint(String),

    #[error("Scalar `{0}` was never registered with the summary writer")]
    UnregisteredScalar(String),
}

pub type Result<T> = std::result::Result<T, WranglerError>;
