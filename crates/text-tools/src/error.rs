use thiserror::Error;

#[derive(Error, Debug)]
pub enum TextError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Character set is empty")]
    EmptyCharset,

    #[error("Character {0:?} appears more than once in the character set")]
    DuplicateChar(char),

    #[error("Padding length must be positive, got {0}")]
    InvalidPadLen(usize),
}

pub type Result<T> = std::result::Result<T, TextError>;
