use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::error::{Result, TextError};
use crate::vocab::{CharVocab, PAD_CODE};

/// Converts strings to fixed-length integer sequences and back.
///
/// Every encoded sequence is clipped to `pad_len` characters. With padding
/// enabled it is also right-padded with [`PAD_CODE`] to exactly `pad_len`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextProcessor {
    pad_len: usize,
    vocab: CharVocab,
}

impl TextProcessor {
    pub fn new(pad_len: usize) -> Result<Self> {
        Self::with_vocab(pad_len, CharVocab::default())
    }

    pub fn with_chars<I: IntoIterator<Item = char>>(pad_len: usize, chars: I) -> Result<Self> {
        Self::with_vocab(pad_len, CharVocab::new(chars)?)
    }

    pub fn with_vocab(pad_len: usize, vocab: CharVocab) -> Result<Self> {
        if pad_len == 0 {
            return Err(TextError::InvalidPadLen(pad_len));
        }
        Ok(Self { pad_len, vocab })
    }

    pub fn string_to_ints(&self, text: &str, use_pad: bool) -> Vec<i64> {
        let mut codes: Vec<i64> = text
            .chars()
            .take(self.pad_len)
            .map(|c| self.vocab.encode_char(c))
            .collect();
        if use_pad {
            codes.resize(self.pad_len, PAD_CODE);
        }
        codes
    }

    pub fn ints_to_string(&self, codes: &[i64]) -> String {
        codes
            .iter()
            .filter_map(|&code| self.vocab.decode_code(code))
            .collect()
    }

    /// Encodes a batch of strings in parallel and returns the codes
    /// row-major. With `use_pad` every row has exactly `pad_len` codes.
    pub fn encode_batch<S: AsRef<str> + Sync>(&self, texts: &[S], use_pad: bool) -> Vec<Vec<i64>> {
        texts
            .par_iter()
            .map(|text| self.string_to_ints(text.as_ref(), use_pad))
            .collect()
    }

    pub fn pad_len(&self) -> usize {
        self.pad_len
    }

    pub fn num_chars(&self) -> usize {
        self.vocab.len()
    }

    /// Number of distinct codes, reserved padding and unknown included.
    pub fn vocab_size(&self) -> usize {
        self.vocab.len() + 2
    }

    pub fn vocab(&self) -> &CharVocab {
        &self.vocab
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut processor: TextProcessor = serde_json::from_reader(reader)?;
        if processor.pad_len == 0 {
            return Err(TextError::InvalidPadLen(0));
        }
        processor.vocab.reindex()?;
        Ok(processor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocab::UNK_CODE;

    #[test]
    fn pads_short_strings() {
        let tp = TextProcessor::with_chars(5, "abc".chars()).unwrap();
        assert_eq!(tp.string_to_ints("ab", true), vec![2, 3, 0, 0, 0]);
        assert_eq!(tp.string_to_ints("ab", false), vec![2, 3]);
    }

    #[test]
    fn clips_long_strings_with_and_without_padding() {
        let tp = TextProcessor::with_chars(3, "abc".chars()).unwrap();
        assert_eq!(tp.string_to_ints("abcabc", true), vec![2, 3, 4]);
        assert_eq!(tp.string_to_ints("abcabc", false).len(), 3);
    }

    #[test]
    fn unknown_chars_get_the_unknown_code() {
        let tp = TextProcessor::with_chars(4, "ab".chars()).unwrap();
        assert_eq!(tp.string_to_ints("axb", false), vec![2, UNK_CODE, 3]);
        assert_eq!(tp.ints_to_string(&[2, UNK_CODE, 3, 0]), "a\u{FFFD}b");
    }

    #[test]
    fn decoding_drops_padding() {
        let tp = TextProcessor::new(16).unwrap();
        let codes = tp.string_to_ints("hello, world", true);
        assert_eq!(codes.len(), 16);
        assert_eq!(tp.ints_to_string(&codes), "hello, world");
    }

    #[test]
    fn batch_encoding_matches_single_encoding() {
        let tp = TextProcessor::new(8).unwrap();
        let texts = vec!["one".to_string(), "two words".to_string(), String::new()];
        let batch = tp.encode_batch(&texts, true);
        assert_eq!(batch.len(), 3);
        for (row, text) in batch.iter().zip(&texts) {
            assert_eq!(row, &tp.string_to_ints(text, true));
        }
    }

    #[test]
    fn vocab_size_counts_reserved_codes() {
        let tp = TextProcessor::with_chars(4, "xyz".chars()).unwrap();
        assert_eq!(tp.num_chars(), 3);
        assert_eq!(tp.vocab_size(), 5);
    }

    #[test]
    fn zero_pad_len_is_rejected() {
        assert!(matches!(TextProcessor::new(0), Err(TextError::InvalidPadLen(0))));
    }

    #[test]
    fn save_and_load_keep_the_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("text_map.json");
        let tp = TextProcessor::with_chars(6, "helo".chars()).unwrap();
        tp.save(&path).unwrap();

        let loaded = TextProcessor::load(&path).unwrap();
        assert_eq!(loaded.pad_len(), 6);
        assert_eq!(loaded.string_to_ints("hole", true), tp.string_to_ints("hole", true));
    }
}
