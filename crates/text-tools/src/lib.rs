pub mod error;
pub mod vocab;
pub mod processor;

pub use error::TextError;
pub use processor::TextProcessor;
pub use vocab::{CharVocab, PAD_CODE, UNK_CODE};
