use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Result, TextError};

/// Code used to pad sequences out to a fixed length.
pub const PAD_CODE: i64 = 0;
/// Code for any character outside the vocabulary.
pub const UNK_CODE: i64 = 1;

const FIRST_CHAR_CODE: i64 = 2;

/// Bijective mapping between an ordered set of characters and the codes
/// `2..2 + len`. Codes 0 and 1 are reserved for padding and unknown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharVocab {
    chars: Vec<char>,
    #[serde(skip)]
    char_to_code: HashMap<char, i64>,
}

impl CharVocab {
    pub fn new<I: IntoIterator<Item = char>>(chars: I) -> Result<Self> {
        let chars: Vec<char> = chars.into_iter().collect();
        if chars.is_empty() {
            return Err(TextError::EmptyCharset);
        }

        let char_to_code = Self::index(&chars)?;
        Ok(Self {
            chars,
            char_to_code,
        })
    }

    /// Printable ASCII plus tab and newline.
    pub fn ascii_printable() -> Self {
        let chars: Vec<char> = ['\t', '\n']
            .into_iter()
            .chain((0x20u8..=0x7e).map(char::from))
            .collect();
        let char_to_code = Self::index(&chars).unwrap_or_default();
        Self {
            chars,
            char_to_code,
        }
    }

    fn index(chars: &[char]) -> Result<HashMap<char, i64>> {
        let mut char_to_code = HashMap::with_capacity(chars.len());
        for (i, &c) in chars.iter().enumerate() {
            if char_to_code.insert(c, FIRST_CHAR_CODE + i as i64).is_some() {
                return Err(TextError::DuplicateChar(c));
            }
        }
        Ok(char_to_code)
    }

    /// Rebuilds the lookup table after deserialization.
    pub(crate) fn reindex(&mut self) -> Result<()> {
        if self.chars.is_empty() {
            return Err(TextError::EmptyCharset);
        }
        self.char_to_code = Self::index(&self.chars)?;
        Ok(())
    }

    pub fn encode_char(&self, c: char) -> i64 {
        self.char_to_code.get(&c).copied().unwrap_or(UNK_CODE)
    }

    /// Returns `None` for the padding code, U+FFFD for unknown or
    /// out-of-range codes.
    pub fn decode_code(&self, code: i64) -> Option<char> {
        if code == PAD_CODE {
            return None;
        }
        let c = code
            .checked_sub(FIRST_CHAR_CODE)
            .and_then(|offset| usize::try_from(offset).ok())
            .and_then(|idx| self.chars.get(idx).copied())
            .unwrap_or(char::REPLACEMENT_CHARACTER);
        Some(c)
    }

    pub fn chars(&self) -> &[char] {
        &self.chars
    }

    /// Number of allowed characters, reserved codes excluded.
    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }
}

impl Default for CharVocab {
    fn default() -> Self {
        Self::ascii_printable()
    }
}
