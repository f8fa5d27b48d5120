//! Open-addressing hash index from (history, word) pairs to dense n-gram
//! indices, one per order.
use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use std::io::prelude::*;

use crate::binio;
use crate::error::NGramError;
use crate::vocab::WordIndex;

/// Dense index of an n-gram within its order.
pub type NGramIdx = u32;
/// There is no n-gram here.
pub const INVALID_NGRAM: NGramIdx = NGramIdx::MAX;
/// Smallest bucket table, must be a power of two.
const MIN_BUCKETS: usize = 16;

#[derive(Debug, Serialize, Deserialize)]
struct IndexRecord {
    order: u32,
    finalized: bool,
    words: Vec<WordIndex>,
    hists: Vec<NGramIdx>,
}

#[inline]
fn hash(hist: NGramIdx, word: WordIndex) -> usize {
    let h = (hist as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (word as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F);
    (h ^ (h >> 31)) as usize
}

/// Buckets needed to hold `len` entries at a load factor of at most 1/2.
fn buckets_for(len: usize) -> usize {
    (len * 2).next_power_of_two().max(MIN_BUCKETS)
}

#[derive(Debug, Clone)]
pub struct NGramIndex {
    /// N-gram order, for diagnostics.
    order: usize,
    /// Last word of each n-gram.
    words: Vec<WordIndex>,
    /// Index of each n-gram's history at the order below.
    hists: Vec<NGramIdx>,
    /// Hash table of n-gram indices, `INVALID_NGRAM` marks an empty slot.
    buckets: Vec<NGramIdx>,
    /// Set once by `sort`, after which the index is read-only.
    finalized: bool,
}

impl NGramIndex {
    pub fn new(order: usize) -> Self {
        Self {
            order,
            words: Vec::new(),
            hists: Vec::new(),
            buckets: vec![INVALID_NGRAM; MIN_BUCKETS],
            finalized: false,
        }
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn words(&self) -> &[WordIndex] {
        &self.words
    }

    pub fn hists(&self) -> &[NGramIdx] {
        &self.hists
    }

    /// Bucket holding (hist, word), or the empty bucket where it would go.
    fn probe(&self, hist: NGramIdx, word: WordIndex) -> usize {
        let mask = self.buckets.len() - 1;
        let mut pos = hash(hist, word) & mask;
        let mut step = 0;
        loop {
            let idx = self.buckets[pos];
            if idx == INVALID_NGRAM
                || (self.hists[idx as usize] == hist && self.words[idx as usize] == word)
            {
                return pos;
            }
            // Triangular steps visit every bucket of a power-of-two table.
            step += 1;
            pos = (pos + step) & mask;
        }
    }

    pub fn find(&self, hist: NGramIdx, word: WordIndex) -> Option<NGramIdx> {
        match self.buckets[self.probe(hist, word)] {
            INVALID_NGRAM => None,
            idx => Some(idx),
        }
    }

    /// Return the index of (hist, word), inserting it if absent.
    pub fn add(&mut self, hist: NGramIdx, word: WordIndex) -> Result<NGramIdx> {
        if self.finalized {
            return Err(NGramError::Finalized { order: self.order }.into());
        }
        let pos = self.probe(hist, word);
        if self.buckets[pos] != INVALID_NGRAM {
            return Ok(self.buckets[pos]);
        }
        ensure!(
            self.words.len() < INVALID_NGRAM as usize,
            "order {} index is full",
            self.order
        );
        let idx = self.words.len() as NGramIdx;
        self.words.push(word);
        self.hists.push(hist);
        if self.words.len() * 2 > self.buckets.len() {
            self.rehash(self.buckets.len() * 2);
        } else {
            self.buckets[pos] = idx;
        }
        Ok(idx)
    }

    fn rehash(&mut self, num_buckets: usize) {
        self.buckets = vec![INVALID_NGRAM; num_buckets];
        for idx in 0..self.words.len() {
            let pos = self.probe(self.hists[idx], self.words[idx]);
            self.buckets[pos] = idx as NGramIdx;
        }
    }

    /// Remap words and histories, reorder entries by (history, word) and
    /// freeze the index. Returns the map from old to new n-gram indices so
    /// the order above can remap its histories.
    pub fn sort(&mut self, word_map: &[WordIndex], hist_map: &[NGramIdx]) -> Result<Vec<NGramIdx>> {
        if self.finalized {
            return Err(NGramError::Finalized { order: self.order }.into());
        }
        let mut entries: Vec<(NGramIdx, WordIndex, usize)> = Vec::with_capacity(self.len());
        for (old, (&hist, &word)) in self.hists.iter().zip(self.words.iter()).enumerate() {
            let new_hist = *hist_map
                .get(hist as usize)
                .ok_or_else(|| anyhow::anyhow!("history {} has no mapping", hist))?;
            let new_word = *word_map
                .get(word as usize)
                .ok_or_else(|| anyhow::anyhow!("word {} has no mapping", word))?;
            entries.push((new_hist, new_word, old));
        }
        entries.sort_unstable();
        let mut ngram_map = vec![INVALID_NGRAM; self.len()];
        for (new, &(hist, word, old)) in entries.iter().enumerate() {
            self.hists[new] = hist;
            self.words[new] = word;
            ngram_map[old] = new as NGramIdx;
        }
        self.rehash(buckets_for(self.len()));
        self.finalized = true;
        Ok(ngram_map)
    }

    pub fn serialize<W: Write + ?Sized>(&self, w: &mut W) -> Result<()> {
        let record = IndexRecord {
            order: self.order as u32,
            finalized: self.finalized,
            words: self.words.clone(),
            hists: self.hists.clone(),
        };
        binio::write_record(w, "index", &record)
    }

    pub fn deserialize<R: Read>(r: &mut R) -> Result<Self> {
        let record: IndexRecord = binio::read_record(r, "index")?;
        ensure!(
            record.words.len() == record.hists.len(),
            "order {} index has {} words but {} histories",
            record.order,
            record.words.len(),
            record.hists.len()
        );
        let mut index = Self {
            order: record.order as usize,
            words: record.words,
            hists: record.hists,
            buckets: Vec::new(),
            finalized: record.finalized,
        };
        index.rehash(buckets_for(index.len()));
        Ok(index)
    }
}
