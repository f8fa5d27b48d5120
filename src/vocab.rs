//! Word <-> index mapping with reserved end-of-sentence and unknown slots.
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::prelude::*;
use std::path::Path;

use crate::binio;
use crate::error::NGramError;

/// Index of a word in the vocabulary.
pub type WordIndex = u32;
/// Returned by lookups that fail when unknown-word handling is disabled.
pub const INVALID_WORD: WordIndex = WordIndex::MAX;
/// End of sentence, which is also the sentence-start context.
pub const END_OF_SENTENCE: WordIndex = 0;
/// Unknown word, only reserved when unknown-word handling is enabled.
pub const UNKNOWN: WordIndex = 1;

pub const EOS_SYMBOL: &str = "</s>";
pub const BOS_SYMBOL: &str = "<s>";
pub const UNK_SYMBOL: &str = "<unk>";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VocabRecord {
    words: Vec<String>,
    use_unknown: bool,
    fixed: bool,
}

#[derive(Debug, Clone)]
pub struct Vocabulary {
    /// Words by index.
    words: Vec<String>,
    /// Index of each word.
    indices: HashMap<String, WordIndex>,
    /// Whether `<unk>` occupies index 1 and absorbs unseen words.
    use_unknown: bool,
    /// Fixed vocabularies never grow.
    fixed: bool,
}

impl Vocabulary {
    pub fn new(use_unknown: bool) -> Self {
        let mut vocab = Self {
            words: Vec::new(),
            indices: HashMap::new(),
            use_unknown,
            fixed: false,
        };
        vocab.push(EOS_SYMBOL);
        if use_unknown {
            vocab.push(UNK_SYMBOL);
        }
        vocab
    }

    fn push(&mut self, word: &str) -> WordIndex {
        let index = self.words.len() as WordIndex;
        self.words.push(word.to_string());
        self.indices.insert(word.to_string(), index);
        index
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn use_unknown(&self) -> bool {
        self.use_unknown
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    pub fn set_fixed(&mut self, fixed: bool) {
        self.fixed = fixed;
    }

    /// Number of indices that `sort` never moves.
    pub fn num_reserved(&self) -> usize {
        if self.use_unknown {
            2
        } else {
            1
        }
    }

    pub fn word(&self, index: WordIndex) -> Option<&str> {
        self.words.get(index as usize).map(|s| s.as_str())
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    /// Look up a word without inserting it. Absent words resolve to
    /// `UNKNOWN`, or `INVALID_WORD` when unknown handling is off.
    pub fn find(&self, word: &str) -> WordIndex {
        match self.indices.get(word) {
            Some(&index) => index,
            None if self.use_unknown => UNKNOWN,
            None => INVALID_WORD,
        }
    }

    /// Insert a word unless present. A fixed vocabulary behaves like `find`.
    pub fn add(&mut self, word: &str) -> WordIndex {
        if let Some(&index) = self.indices.get(word) {
            return index;
        }
        if self.fixed {
            return self.find(word);
        }
        self.push(word)
    }

    /// Sort the non-reserved words alphabetically and return the map from
    /// old to new indices.
    pub fn sort(&mut self) -> Vec<WordIndex> {
        let reserved = self.num_reserved().min(self.words.len());
        let mut order: Vec<usize> = (reserved..self.words.len()).collect();
        order.sort_by(|&a, &b| self.words[a].cmp(&self.words[b]));
        let mut word_map: Vec<WordIndex> = (0..self.words.len() as WordIndex).collect();
        let mut words: Vec<String> = self.words[..reserved].to_vec();
        for old in order {
            word_map[old] = words.len() as WordIndex;
            words.push(std::mem::take(&mut self.words[old]));
        }
        self.words = words;
        self.indices = self
            .words
            .iter()
            .enumerate()
            .map(|(i, w)| (w.clone(), i as WordIndex))
            .collect();
        word_map
    }

    /// Read one word per line, skipping blanks and `#` comments. The
    /// result is fixed.
    pub fn from_text<R: BufRead>(reader: R, use_unknown: bool) -> Result<Self> {
        let mut vocab = Self::new(use_unknown);
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let word = fields.next().unwrap_or_default();
            if fields.next().is_some() {
                return Err(NGramError::parse(lineno + 1, "expected one word per line").into());
            }
            if word != BOS_SYMBOL {
                vocab.add(word);
            }
        }
        vocab.fixed = true;
        Ok(vocab)
    }

    pub fn write_text<W: Write + ?Sized>(&self, w: &mut W) -> Result<()> {
        for word in self.words.iter() {
            writeln!(w, "{}", word)?;
        }
        Ok(())
    }

    pub fn serialize<W: Write + ?Sized>(&self, w: &mut W) -> Result<()> {
        let record = VocabRecord {
            words: self.words.clone(),
            use_unknown: self.use_unknown,
            fixed: self.fixed,
        };
        binio::write_record(w, "vocab", &record)
    }

    pub fn deserialize<R: Read>(r: &mut R) -> Result<Self> {
        let record: VocabRecord = binio::read_record(r, "vocab")?;
        if record.words.first().map(|w| w.as_str()) != Some(EOS_SYMBOL)
            || (record.use_unknown && record.words.get(1).map(|w| w.as_str()) != Some(UNK_SYMBOL))
        {
            anyhow::bail!("vocabulary record lacks its reserved words");
        }
        let indices = record
            .words
            .iter()
            .enumerate()
            .map(|(i, w)| (w.clone(), i as WordIndex))
            .collect();
        Ok(Self {
            words: record.words,
            indices,
            use_unknown: record.use_unknown,
            fixed: record.fixed,
        })
    }

    /// Load a vocabulary file, binary or text.
    pub fn load(path: &Path, use_unknown: bool) -> Result<Self> {
        let mut reader = binio::open_reader(path)?;
        if binio::read_magic(&mut reader)? {
            let mut vocab = Self::deserialize(&mut reader)?;
            vocab.fixed = true;
            Ok(vocab)
        } else {
            Self::from_text(reader, use_unknown)
        }
    }

    pub fn save(&self, path: &Path, binary: bool) -> Result<()> {
        binio::write_atomic(path, |w| {
            if binary {
                binio::write_magic(w)?;
                self.serialize(w)
            } else {
                self.write_text(w)
            }
        })
    }
}
