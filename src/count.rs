//! N-gram storage and counting: one index per order plus count vectors.
use anyhow::{anyhow, ensure, Result};
use std::io::prelude::*;
use std::path::Path;

use crate::binio;
use crate::error::NGramError;
use crate::index::{NGramIdx, NGramIndex, INVALID_NGRAM};
use crate::vocab::{Vocabulary, WordIndex, BOS_SYMBOL, END_OF_SENTENCE, EOS_SYMBOL, INVALID_WORD};

/// Type for counts
pub type Count = u64;

/// Old-to-new index maps produced by sorting or merging a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NGramMaps {
    /// Word map; `INVALID_WORD` for words with no counterpart.
    pub words: Vec<WordIndex>,
    /// N-gram map for each order 0..=N; `INVALID_NGRAM` for dropped n-grams.
    pub ngrams: Vec<Vec<NGramIdx>>,
}

impl NGramMaps {
    /// Apply `self`, then `next`.
    pub fn compose(&self, next: &NGramMaps) -> NGramMaps {
        fn chain(first: &[u32], second: &[u32], invalid: u32) -> Vec<u32> {
            first
                .iter()
                .map(|&i| second.get(i as usize).copied().unwrap_or(invalid))
                .collect()
        }
        NGramMaps {
            words: chain(&self.words, &next.words, INVALID_WORD),
            ngrams: self
                .ngrams
                .iter()
                .enumerate()
                .map(|(o, map)| match next.ngrams.get(o) {
                    Some(next_map) => chain(map, next_map, INVALID_NGRAM),
                    None => vec![INVALID_NGRAM; map.len()],
                })
                .collect(),
        }
    }
}

/// Split a corpus line into tokens, dropping explicit sentence markers.
pub fn sentence_tokens(line: &str) -> impl Iterator<Item = &str> {
    line.split_whitespace()
        .filter(|&t| t != BOS_SYMBOL && t != EOS_SYMBOL)
}

/// N-grams of orders 0..=N over a shared vocabulary, with their counts.
///
/// Order 0 holds a single root entry, the empty context. Every word has a
/// unigram whose index equals its word index. Every stored n-gram's
/// history and backoff suffix are stored too.
#[derive(Debug, Clone)]
pub struct NGramStore {
    /// Highest order.
    order: usize,
    vocab: Vocabulary,
    /// Whether the vocabulary was fixed before any data was loaded.
    closed: bool,
    /// Index for each order 0..=N.
    indices: Vec<NGramIndex>,
    /// Counts for each order 0..=N.
    counts: Vec<Vec<Count>>,
    /// Backoff (suffix) n-gram at the order below, computed by `finalize`.
    backoffs: Vec<Vec<NGramIdx>>,
}

impl NGramStore {
    pub fn new(order: usize, vocab: Vocabulary) -> Result<Self> {
        ensure!(order >= 1, "N-gram order must be at least 1");
        let mut indices: Vec<NGramIndex> = (0..=order).map(NGramIndex::new).collect();
        indices[0].add(0, 0)?;
        for w in 0..vocab.len() {
            indices[1].add(0, w as WordIndex)?;
        }
        let counts = indices.iter().map(|index| vec![0; index.len()]).collect();
        Ok(Self {
            order,
            closed: vocab.is_fixed(),
            vocab,
            indices,
            counts,
            backoffs: vec![Vec::new(); order + 1],
        })
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    /// True if the vocabulary was given up front rather than grown
    /// from the data.
    pub fn has_closed_vocab(&self) -> bool {
        self.closed
    }

    pub fn is_finalized(&self) -> bool {
        self.indices[1].is_finalized()
    }

    pub fn index(&self, order: usize) -> &NGramIndex {
        &self.indices[order]
    }

    pub fn size(&self, order: usize) -> usize {
        self.indices[order].len()
    }

    pub fn counts(&self, order: usize) -> &[Count] {
        &self.counts[order]
    }

    pub fn hists(&self, order: usize) -> &[NGramIdx] {
        self.indices[order].hists()
    }

    pub fn words(&self, order: usize) -> &[WordIndex] {
        self.indices[order].words()
    }

    /// Backoff n-gram of every n-gram at `order`; empty until `finalize`.
    pub fn backoffs(&self, order: usize) -> &[NGramIdx] {
        &self.backoffs[order]
    }

    /// Fail if the store is frozen; `order` is the highest order the
    /// caller would touch.
    fn check_loading(&self, order: usize) -> Result<()> {
        if self.is_finalized() {
            Err(NGramError::Finalized { order }.into())
        } else {
            Ok(())
        }
    }

    fn sync_counts(&mut self, order: usize) {
        let len = self.indices[order].len();
        self.counts[order].resize(len, 0);
    }

    /// Add a word to the vocabulary and give it a unigram. Returns
    /// `INVALID_WORD` only for a fixed vocabulary without `<unk>`.
    pub fn add_word(&mut self, word: &str) -> Result<WordIndex> {
        self.check_loading(1)?;
        let w = self.vocab.add(word);
        if w != INVALID_WORD && w as usize >= self.indices[1].len() {
            let idx = self.indices[1].add(0, w)?;
            debug_assert_eq!(idx, w);
            self.sync_counts(1);
        }
        Ok(w)
    }

    /// Index of an n-gram, if stored.
    pub fn find_ngram(&self, words: &[WordIndex]) -> Option<NGramIdx> {
        if words.is_empty() || words.len() > self.order {
            return None;
        }
        let mut idx = 0;
        for (k, &w) in words.iter().enumerate() {
            idx = self.indices[k + 1].find(idx, w)?;
        }
        Some(idx)
    }

    /// Insert an n-gram along with any missing history and backoff suffix.
    pub fn add_ngram(&mut self, words: &[WordIndex]) -> Result<NGramIdx> {
        self.check_loading(words.len())?;
        let order = words.len();
        ensure!(
            order >= 1 && order <= self.order,
            "cannot add a {}-gram to an order {} model",
            order,
            self.order
        );
        let word = words[order - 1];
        ensure!((word as usize) < self.vocab.len(), "word {} is not in the vocabulary", word);
        if order == 1 {
            return Ok(word);
        }
        let hist = self.add_ngram(&words[..order - 1])?;
        self.add_ngram(&words[1..])?;
        let idx = self.indices[order].add(hist, word)?;
        self.sync_counts(order);
        Ok(idx)
    }

    /// Count the n-grams of one sentence. The sentence starts in the
    /// `</s>` context and ends with a predicted `</s>`.
    pub fn add_sentence<'a, I>(&mut self, tokens: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.check_loading(self.order)?;
        // N-grams ending at the previous position, indexed by order.
        let mut prev: Vec<NGramIdx> = vec![0, END_OF_SENTENCE];
        let mut num_tokens = 0;
        let words = tokens
            .into_iter()
            .map(Some)
            .chain(std::iter::once(None));
        for token in words {
            let w = match token {
                Some(token) => self.add_word(token)?,
                None => END_OF_SENTENCE,
            };
            num_tokens += 1;
            if w == INVALID_WORD {
                // Out of a fixed vocabulary: n-grams spanning it are dropped.
                prev.truncate(1);
                continue;
            }
            let mut cur = Vec::with_capacity(self.order + 1);
            cur.push(0);
            for o in 1..=self.order.min(prev.len()) {
                let idx = if o == 1 {
                    w
                } else {
                    let idx = self.indices[o].add(prev[o - 1], w)?;
                    self.sync_counts(o);
                    idx
                };
                self.counts[o][idx as usize] += 1;
                cur.push(idx);
            }
            prev = cur;
        }
        Ok(num_tokens)
    }

    /// Count a text corpus with one sentence per line.
    pub fn load_corpus<R: BufRead>(&mut self, reader: R) -> Result<()> {
        let (mut sentences, mut tokens) = (0, 0);
        for line in reader.lines() {
            let line = line?;
            tokens += self.add_sentence(sentence_tokens(&line))?;
            sentences += 1;
        }
        log::info!(
            "counted {} sentences, {} tokens; n-grams per order: {:?}",
            sentences,
            tokens,
            self.sizes()
        );
        Ok(())
    }

    pub fn load_corpus_file(&mut self, path: &Path) -> Result<()> {
        log::info!("loading corpus {}", path.display());
        self.load_corpus(binio::open_reader(path)?)
    }

    /// Add precomputed counts, one `w1 .. wk count` n-gram per line.
    /// N-grams above the model order or with out-of-vocabulary words are
    /// skipped. Counts accumulate.
    pub fn load_counts<R: BufRead>(&mut self, reader: R) -> Result<()> {
        self.check_loading(self.order)?;
        let (mut loaded, mut skipped) = (0usize, 0usize);
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 2 {
                return Err(NGramError::parse(lineno + 1, "expected n-gram words and a count").into());
            }
            let (count, ngram) = fields.split_last().ok_or_else(|| anyhow!("empty line"))?;
            let count: Count = count
                .parse()
                .map_err(|_| NGramError::parse(lineno + 1, format!("bad count {:?}", count)))?;
            if ngram.len() > self.order || ngram.last() == Some(&BOS_SYMBOL) {
                skipped += 1;
                continue;
            }
            let mut words = Vec::with_capacity(ngram.len());
            for (k, &token) in ngram.iter().enumerate() {
                let w = if token == EOS_SYMBOL || (token == BOS_SYMBOL && k + 1 < ngram.len()) {
                    END_OF_SENTENCE
                } else {
                    self.add_word(token)?
                };
                words.push(w);
            }
            if words.contains(&INVALID_WORD) {
                skipped += 1;
                continue;
            }
            let idx = self.add_ngram(&words)?;
            self.counts[words.len()][idx as usize] += count;
            loaded += 1;
        }
        log::info!("loaded {} n-gram counts, skipped {}", loaded, skipped);
        Ok(())
    }

    /// Load a counts file, binary or text.
    pub fn load_counts_file(&mut self, path: &Path) -> Result<()> {
        log::info!("loading counts {}", path.display());
        let mut reader = binio::open_reader(path)?;
        if binio::read_magic(&mut reader)? {
            let other = Self::deserialize(&mut reader)?;
            self.merge(&other)?;
            Ok(())
        } else {
            self.load_counts(reader)
        }
    }

    /// Accumulate another store's n-grams and counts into this one,
    /// matching words by spelling. Returns the map from `other`'s indices
    /// to this store's.
    pub fn merge(&mut self, other: &NGramStore) -> Result<NGramMaps> {
        self.check_loading(self.order)?;
        let mut words = Vec::with_capacity(other.vocab.len());
        for word in other.vocab.words() {
            words.push(self.add_word(word)?);
        }
        let mut ngrams = vec![vec![0]];
        ngrams.push(
            other.words(1)
                .iter()
                .map(|&w| words[w as usize])
                .collect(),
        );
        for o in 2..=self.order.min(other.order) {
            let mut map = Vec::with_capacity(other.size(o));
            for (&hist, &word) in other.hists(o).iter().zip(other.words(o)) {
                let (hist, word) = (ngrams[o - 1][hist as usize], words[word as usize]);
                if hist == INVALID_NGRAM || word == INVALID_WORD {
                    map.push(INVALID_NGRAM);
                } else {
                    map.push(self.indices[o].add(hist, word)?);
                }
            }
            self.sync_counts(o);
            ngrams.push(map);
        }
        for o in 1..ngrams.len() {
            for (i, &idx) in ngrams[o].iter().enumerate() {
                if idx != INVALID_NGRAM {
                    self.counts[o][idx as usize] += other.counts[o][i];
                }
            }
        }
        for o in ngrams.len()..=other.order {
            ngrams.push(vec![INVALID_NGRAM; other.size(o)]);
        }
        Ok(NGramMaps { words, ngrams })
    }

    /// Sort the vocabulary and every order, freeze the store and compute
    /// backoff indices. Allowed once.
    pub fn finalize(&mut self) -> Result<NGramMaps> {
        self.check_loading(self.order)?;
        let words = self.vocab.sort();
        self.vocab.set_fixed(true);
        let mut ngrams = vec![self.indices[0].sort(&words, &[0])?];
        for o in 1..=self.order {
            let map = self.indices[o].sort(&words, &ngrams[o - 1])?;
            let mut counts = vec![0; map.len()];
            for (old, &new) in map.iter().enumerate() {
                counts[new as usize] = self.counts[o][old];
            }
            self.counts[o] = counts;
            ngrams.push(map);
        }
        self.compute_backoffs()?;
        Ok(NGramMaps { words, ngrams })
    }

    fn compute_backoffs(&mut self) -> Result<()> {
        self.backoffs[0] = Vec::new();
        self.backoffs[1] = vec![0; self.size(1)];
        if self.order >= 2 {
            self.backoffs[2] = self.words(2).to_vec();
        }
        for o in 3..=self.order {
            let index = &self.indices[o];
            let mut backoffs = Vec::with_capacity(index.len());
            for (&hist, &word) in index.hists().iter().zip(index.words()) {
                let suffix_hist = self.backoffs[o - 1][hist as usize];
                let backoff = self.indices[o - 1]
                    .find(suffix_hist, word)
                    .ok_or_else(|| anyhow!("order {} n-gram has no backoff n-gram", o))?;
                backoffs.push(backoff);
            }
            self.backoffs[o] = backoffs;
        }
        Ok(())
    }

    /// Number of n-grams at each order 1..=N.
    pub fn sizes(&self) -> Vec<usize> {
        (1..=self.order).map(|o| self.size(o)).collect()
    }

    /// Words of the n-gram `idx` at `order`, oldest first.
    pub fn ngram_words(&self, order: usize, idx: NGramIdx) -> Vec<WordIndex> {
        let mut words = vec![END_OF_SENTENCE; order];
        let mut idx = idx;
        for o in (1..=order).rev() {
            words[o - 1] = self.indices[o].words()[idx as usize];
            idx = self.indices[o].hists()[idx as usize];
        }
        words
    }

    /// Spell an n-gram, writing `<s>` for the sentence-start context.
    pub fn ngram_text(&self, order: usize, idx: NGramIdx) -> String {
        let words = self.ngram_words(order, idx);
        let last = words.len() - 1;
        words
            .iter()
            .enumerate()
            .map(|(k, &w)| {
                if w == END_OF_SENTENCE && k < last {
                    BOS_SYMBOL
                } else {
                    self.vocab.word(w).unwrap_or(EOS_SYMBOL)
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn write_counts<W: Write + ?Sized>(&self, w: &mut W) -> Result<()> {
        for o in 1..=self.order {
            for (i, &count) in self.counts[o].iter().enumerate() {
                if count > 0 {
                    writeln!(w, "{}\t{}", self.ngram_text(o, i as NGramIdx), count)?;
                }
            }
        }
        Ok(())
    }

    pub fn serialize<W: Write + ?Sized>(&self, w: &mut W) -> Result<()> {
        binio::write_record(w, "order", &(self.order as u32, self.closed))?;
        self.vocab.serialize(w)?;
        for index in self.indices.iter() {
            index.serialize(w)?;
        }
        for counts in self.counts.iter() {
            binio::write_record(w, "counts", counts)?;
        }
        Ok(())
    }

    pub fn deserialize<R: Read>(r: &mut R) -> Result<Self> {
        let (order, closed): (u32, bool) = binio::read_record(r, "order")?;
        let order = order as usize;
        ensure!(order >= 1, "N-gram order must be at least 1");
        let vocab = Vocabulary::deserialize(r)?;
        let mut indices = Vec::with_capacity(order + 1);
        for _ in 0..=order {
            indices.push(NGramIndex::deserialize(r)?);
        }
        let mut counts = Vec::with_capacity(order + 1);
        for index in indices.iter() {
            let c: Vec<Count> = binio::read_record(r, "counts")?;
            ensure!(
                c.len() == index.len(),
                "order {} has {} n-grams but {} counts",
                index.order(),
                index.len(),
                c.len()
            );
            counts.push(c);
        }
        ensure!(
            indices[1].len() == vocab.len(),
            "vocabulary and unigrams disagree"
        );
        let mut store = Self {
            order,
            vocab,
            closed,
            indices,
            counts,
            backoffs: vec![Vec::new(); order + 1],
        };
        if store.is_finalized() {
            store.compute_backoffs()?;
        }
        Ok(store)
    }

    pub fn save_counts(&self, path: &Path, binary: bool) -> Result<()> {
        binio::write_atomic(path, |w| {
            if binary {
                binio::write_magic(w)?;
                self.serialize(w)
            } else {
                self.write_counts(w)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocab::UNKNOWN;
    use std::io::Cursor;
    use std::path::PathBuf;

    fn toy_vocab() -> Vocabulary {
        let mut vocab = Vocabulary::new(true);
        vocab.add("a");
        vocab.add("b");
        vocab.set_fixed(true);
        vocab
    }

    fn count_of(store: &NGramStore, words: &[&str]) -> Count {
        let ws: Vec<WordIndex> = words.iter().map(|w| store.vocab().find(w)).collect();
        store
            .find_ngram(&ws)
            .map(|i| store.counts(ws.len())[i as usize])
            .unwrap_or(0)
    }

    #[test]
    fn it_counts_the_toy_corpus() {
        let mut store = NGramStore::new(2, toy_vocab()).unwrap();
        store.load_corpus(Cursor::new("a b\na a b\n")).unwrap();
        assert_eq!(count_of(&store, &["a"]), 3);
        assert_eq!(count_of(&store, &["b"]), 2);
        assert_eq!(count_of(&store, &["</s>"]), 2);
        assert_eq!(count_of(&store, &["a", "b"]), 2);
        assert_eq!(count_of(&store, &["a", "a"]), 1);
        assert_eq!(count_of(&store, &["</s>", "a"]), 2);
        assert_eq!(count_of(&store, &["b", "</s>"]), 2);
        assert_eq!(count_of(&store, &["b", "a"]), 0);
    }

    #[test]
    fn it_keeps_prefixes_and_suffixes() {
        let mut store = NGramStore::new(3, Vocabulary::new(false)).unwrap();
        let ws: Vec<WordIndex> = ["x", "y", "z"]
            .iter()
            .map(|w| store.add_word(w).unwrap())
            .collect();
        let idx = store.add_ngram(&ws).unwrap();
        assert_eq!(store.find_ngram(&ws), Some(idx));
        assert!(store.find_ngram(&ws[..2]).is_some());
        assert!(store.find_ngram(&ws[1..]).is_some());
        assert_eq!(store.add_ngram(&ws).unwrap(), idx);
        assert_eq!(store.size(3), 1);
    }

    #[test]
    fn it_maps_unknown_words_to_unk() {
        let mut store = NGramStore::new(2, toy_vocab()).unwrap();
        store.load_corpus(Cursor::new("a zzz b\n")).unwrap();
        assert_eq!(store.vocab().len(), 4);
        assert_eq!(store.vocab().find("zzz"), UNKNOWN);
        assert_eq!(count_of(&store, &["<unk>"]), 1);
        assert_eq!(count_of(&store, &["a", "<unk>"]), 1);
        assert_eq!(count_of(&store, &["<unk>", "b"]), 1);
        assert_eq!(count_of(&store, &["a", "b"]), 0);
    }

    #[test]
    fn it_breaks_history_at_unknown_words() {
        let mut vocab = Vocabulary::new(false);
        vocab.add("a");
        vocab.set_fixed(true);
        let mut store = NGramStore::new(2, vocab).unwrap();
        store.load_corpus(Cursor::new("a zzz a\n")).unwrap();
        assert_eq!(count_of(&store, &["a"]), 2);
        assert_eq!(count_of(&store, &["</s>", "a"]), 1);
        assert_eq!(count_of(&store, &["a", "</s>"]), 1);
        assert_eq!(store.vocab().len(), 2);
    }

    #[test]
    fn it_preserves_ngrams_under_finalize() {
        let mut store = NGramStore::new(3, Vocabulary::new(false)).unwrap();
        store
            .load_corpus(Cursor::new("the cat sat\nthe dog sat down\n"))
            .unwrap();
        let before: Vec<(String, Count)> = (1..=3)
            .flat_map(|o| (0..store.size(o)).map(move |i| (o, i)))
            .map(|(o, i)| (store.ngram_text(o, i as NGramIdx), store.counts(o)[i]))
            .collect();
        let old = store.clone();
        let maps = store.finalize().unwrap();
        for (o, map) in maps.ngrams.iter().enumerate().skip(1) {
            for (i, &new) in map.iter().enumerate() {
                assert_eq!(
                    old.ngram_text(o, i as NGramIdx),
                    store.ngram_text(o, new)
                );
                assert_eq!(old.counts(o)[i], store.counts(o)[new as usize]);
            }
        }
        assert_eq!(before.len(), store.sizes().iter().sum::<usize>());
        // unigram index is the word index
        for (i, &w) in store.words(1).iter().enumerate() {
            assert_eq!(i as WordIndex, w);
        }
        assert_eq!(store.vocab().words()[1..], ["cat", "dog", "down", "sat", "the"]);
        // backoff of "the cat sat" is "cat sat"
        let ws: Vec<WordIndex> = ["the", "cat", "sat"].iter().map(|w| store.vocab().find(w)).collect();
        let tri = store.find_ngram(&ws).unwrap();
        let bi = store.find_ngram(&ws[1..]).unwrap();
        assert_eq!(store.backoffs(3)[tri as usize], bi);
    }

    #[test]
    fn it_rejects_loading_after_finalize() {
        let mut store = NGramStore::new(2, toy_vocab()).unwrap();
        store.finalize().unwrap();
        let err = store.load_corpus(Cursor::new("a b\n")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<NGramError>(),
            Some(NGramError::Finalized { order: 2 })
        ));
        let a = store.vocab().find("a");
        let err = store.add_ngram(&[a]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<NGramError>(),
            Some(NGramError::Finalized { order: 1 })
        ));
        assert!(store.finalize().is_err());
    }

    #[test]
    fn it_loads_counts_additively() {
        let mut store = NGramStore::new(2, Vocabulary::new(false)).unwrap();
        let text = "# counts\na\t3\n<s> a\t2\na b 2\na b 1\nx y z 4\n";
        store.load_counts(Cursor::new(text)).unwrap();
        assert_eq!(count_of(&store, &["a"]), 3);
        assert_eq!(count_of(&store, &["</s>", "a"]), 2);
        assert_eq!(count_of(&store, &["a", "b"]), 3);
        assert_eq!(count_of(&store, &["b"]), 0);
        assert_eq!(store.vocab().find("x"), INVALID_WORD);
    }

    #[test]
    fn it_reports_malformed_counts() {
        let mut store = NGramStore::new(2, Vocabulary::new(false)).unwrap();
        let err = store.load_counts(Cursor::new("a 1\na b many\n")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<NGramError>(),
            Some(NGramError::Parse { line: 2, .. })
        ));
    }

    #[test]
    fn it_merges_stores() {
        let mut first = NGramStore::new(2, Vocabulary::new(false)).unwrap();
        first.load_corpus(Cursor::new("a b\n")).unwrap();
        let mut second = NGramStore::new(2, Vocabulary::new(false)).unwrap();
        second.load_corpus(Cursor::new("c a b\n")).unwrap();
        let maps = first.merge(&second).unwrap();
        assert_eq!(count_of(&first, &["a", "b"]), 2);
        assert_eq!(count_of(&first, &["c"]), 1);
        assert_eq!(count_of(&first, &["</s>"]), 2);
        let c = second.vocab().find("c");
        assert_eq!(maps.words[c as usize], first.vocab().find("c"));
        let finalized = first.finalize().unwrap();
        let composed = maps.compose(&finalized);
        let ab = second.find_ngram(&[second.vocab().find("a"), second.vocab().find("b")]).unwrap();
        let new = composed.ngrams[2][ab as usize];
        assert_eq!(first.ngram_text(2, new), "a b");
    }

    #[test]
    fn it_round_trips_counts_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = NGramStore::new(3, Vocabulary::new(false)).unwrap();
        store
            .load_corpus_file(&PathBuf::from("testdata/austen.txt"))
            .unwrap();
        store.finalize().unwrap();
        for binary in [false, true] {
            let path = dir.path().join(if binary { "c.bin" } else { "c.txt" });
            store.save_counts(&path, binary).unwrap();
            let mut copy = NGramStore::new(3, Vocabulary::new(false)).unwrap();
            copy.load_counts_file(&path).unwrap();
            copy.finalize().unwrap();
            assert_eq!(copy.vocab().words(), store.vocab().words());
            for o in 1..=3 {
                let total: Count = store.counts(o).iter().sum();
                assert_eq!(copy.counts(o).iter().sum::<Count>(), total);
            }
            let ws: Vec<WordIndex> = ["he", "was", "not"].iter().map(|w| copy.vocab().find(w)).collect();
            let idx = copy.find_ngram(&ws).unwrap();
            assert_eq!(copy.counts(3)[idx as usize], 1);
        }
    }

    #[test]
    fn it_deserializes_what_it_serialized() {
        let mut store = NGramStore::new(2, toy_vocab()).unwrap();
        store.load_corpus(Cursor::new("a b\na a b\n")).unwrap();
        store.finalize().unwrap();
        let mut buf = Vec::new();
        store.serialize(&mut buf).unwrap();
        let copy = NGramStore::deserialize(&mut Cursor::new(buf)).unwrap();
        assert!(copy.is_finalized());
        assert_eq!(copy.backoffs(2), store.backoffs(2));
        assert_eq!(copy.counts(2), store.counts(2));
        assert_eq!(count_of(&copy, &["a", "b"]), 2);
    }
}
