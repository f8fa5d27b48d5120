//! Backoff N-Gram language model built from per-order smoothing.
use anyhow::{bail, ensure, Result};
use std::io::prelude::*;
use std::path::{Path, PathBuf};

use crate::binio;
use crate::count::{NGramMaps, NGramStore};
use crate::error::NGramError;
use crate::index::{NGramIdx, INVALID_NGRAM};
use crate::make::{Smoothing, SmoothingKind};
use crate::vocab::{Vocabulary, WordIndex, INVALID_WORD};

// Default normalization constant (e.g., for checks)
pub const KNORMEPS: f64 = 0.001;
/// log10 written for zero probabilities and weights (negated)
pub const KINFBACKOFF: f64 = 99.00;

/// Inputs for building a model from files.
#[derive(Debug, Clone)]
pub struct LmConfig {
    /// Highest N-Gram order.
    pub order: usize,
    /// Fixed vocabulary file; the vocabulary grows from the data without it.
    pub vocab: Option<PathBuf>,
    /// Reserve `<unk>` for out-of-vocabulary words.
    pub use_unknown: bool,
    /// Text corpora, one sentence per line.
    pub corpora: Vec<PathBuf>,
    /// N-gram counts files, text or binary.
    pub counts: Vec<PathBuf>,
    /// One smoothing selector for all orders, or one per order.
    pub smoothing: Vec<String>,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            order: 3,
            vocab: None,
            use_unknown: false,
            corpora: Vec::new(),
            counts: Vec::new(),
            smoothing: vec!["ModKN".to_string()],
        }
    }
}

/// Output format for `save_lm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LmFormat {
    Arpa,
    Binary,
}

/// Where the probability of one word in one context comes from: a stored
/// n-gram, times the backoff weights of every longer stored context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NGramLookup {
    /// Order of the n-gram supplying the probability.
    pub order: usize,
    /// Its index within that order.
    pub index: NGramIdx,
    /// (order, index) of each context whose backoff weight applies.
    pub bows: Vec<(usize, NGramIdx)>,
}

/// Fill zero probabilities at `order` from the order below. Requires the
/// lower order to be final.
fn backoff_fill(store: &NGramStore, order: usize, lower: &[f64], bows: &[f64], probs: &mut [f64]) {
    let hists = store.hists(order);
    let backoffs = store.backoffs(order);
    for (i, p) in probs.iter_mut().enumerate() {
        if *p == 0.0 {
            *p = bows[hists[i] as usize] * lower[backoffs[i] as usize];
        }
    }
}

/// Probability of the empty context: uniform over every unigram, since
/// each one, counted or not, receives a share of it.
fn uniform_prob(store: &NGramStore) -> f64 {
    1.0 / store.size(1).max(1) as f64
}

#[derive(Debug)]
pub struct NGramLM {
    store: NGramStore,
    /// Smoothing for orders 1..=N at positions 0..N; empty for a model
    /// whose probabilities were loaded rather than estimated.
    smoothings: Vec<Box<dyn Smoothing>>,
    /// Probabilities for orders 0..=N.
    probs: Vec<Vec<f64>>,
    /// Backoff weights of the contexts at orders 0..N.
    bows: Vec<Vec<f64>>,
    /// Offset of each order's parameters; order o owns
    /// `param_starts[o - 1]..param_starts[o]`.
    param_starts: Vec<usize>,
    /// Parameters of the last successful estimate.
    params: Vec<f64>,
    /// Whether `probs` and `bows` reflect `params`.
    estimated: bool,
}

impl NGramLM {
    /// Wrap a store, finalizing it first if needed.
    pub fn new(mut store: NGramStore) -> Result<Self> {
        if !store.is_finalized() {
            store.finalize()?;
        }
        let order = store.order();
        let mut probs: Vec<Vec<f64>> = (0..=order).map(|o| vec![0.0; store.size(o)]).collect();
        probs[0][0] = uniform_prob(&store);
        let bows = (0..order).map(|o| vec![0.0; store.size(o)]).collect();
        Ok(Self {
            store,
            smoothings: Vec::new(),
            probs,
            bows,
            param_starts: vec![0; order + 1],
            params: Vec::new(),
            estimated: false,
        })
    }

    /// Build a model from vocabulary, corpus and counts files.
    pub fn initialize(config: &LmConfig) -> Result<Self> {
        let vocab = match &config.vocab {
            Some(path) => Vocabulary::load(path, config.use_unknown)?,
            None => Vocabulary::new(config.use_unknown),
        };
        let mut store = NGramStore::new(config.order, vocab)?;
        for path in config.corpora.iter() {
            store.load_corpus_file(path)?;
        }
        for path in config.counts.iter() {
            store.load_counts_file(path)?;
        }
        let mut lm = Self::new(store)?;
        lm.set_smoothing(&config.smoothing)?;
        Ok(lm)
    }

    /// Model with fixed probabilities, e.g. read from an ARPA file.
    pub(crate) fn from_probs(store: NGramStore, probs: Vec<Vec<f64>>, bows: Vec<Vec<f64>>) -> Result<Self> {
        let mut lm = Self::new(store)?;
        ensure!(
            probs.len() == lm.probs.len() && bows.len() == lm.bows.len(),
            "probability vectors do not match the model order"
        );
        for (o, p) in probs.iter().enumerate().skip(1) {
            ensure!(p.len() == lm.store.size(o), "order {} has the wrong number of probabilities", o);
        }
        for (o, b) in bows.iter().enumerate() {
            ensure!(b.len() == lm.store.size(o), "order {} has the wrong number of backoff weights", o);
        }
        let uniform = lm.probs[0].clone();
        lm.probs = probs;
        lm.probs[0] = uniform;
        lm.bows = bows;
        lm.fill_all();
        lm.estimated = true;
        Ok(lm)
    }

    fn fill_all(&mut self) {
        for o in 1..=self.order() {
            let (lower, upper) = self.probs.split_at_mut(o);
            backoff_fill(&self.store, o, &lower[o - 1], &self.bows[o - 1], &mut upper[0]);
        }
    }

    pub fn order(&self) -> usize {
        self.store.order()
    }

    pub fn store(&self) -> &NGramStore {
        &self.store
    }

    pub fn vocab(&self) -> &Vocabulary {
        self.store.vocab()
    }

    pub fn probs(&self, order: usize) -> &[f64] {
        &self.probs[order]
    }

    pub fn bows(&self, order: usize) -> &[f64] {
        &self.bows[order]
    }

    /// Parameters of the last successful estimate.
    pub fn params(&self) -> &[f64] {
        &self.params
    }

    pub fn num_params(&self) -> usize {
        self.param_starts[self.order()]
    }

    pub fn smoothing_kinds(&self) -> Vec<SmoothingKind> {
        self.smoothings.iter().map(|s| s.kind()).collect()
    }

    /// Install one smoothing per order (or one for all orders).
    pub fn set_smoothing_algs(&mut self, kinds: &[SmoothingKind]) -> Result<()> {
        let order = self.order();
        let kinds: Vec<SmoothingKind> = match kinds.len() {
            1 => vec![kinds[0]; order],
            n if n == order => kinds.to_vec(),
            n => bail!("{} smoothing algorithms given for an order {} model", n, order),
        };
        let mut smoothings = Vec::with_capacity(order);
        let mut param_starts = vec![0];
        let mut params = Vec::new();
        for (o, kind) in kinds.into_iter().enumerate() {
            let mut smoothing = kind.create();
            smoothing.initialize(&self.store, o + 1)?;
            params.extend(smoothing.default_params());
            param_starts.push(params.len());
            smoothings.push(smoothing);
        }
        self.smoothings = smoothings;
        self.param_starts = param_starts;
        self.params = params;
        self.probs[0][0] = uniform_prob(&self.store);
        self.estimated = false;
        Ok(())
    }

    /// Parse smoothing selectors such as `ModKN` and install them.
    pub fn set_smoothing<S: AsRef<str>>(&mut self, specs: &[S]) -> Result<()> {
        let kinds = specs
            .iter()
            .map(|s| s.as_ref().parse::<SmoothingKind>())
            .collect::<Result<Vec<_>, NGramError>>()?;
        self.set_smoothing_algs(&kinds)
    }

    /// Starting parameters of the installed smoothing algorithms.
    pub fn default_params(&self) -> Vec<f64> {
        self.smoothings
            .iter()
            .flat_map(|s| s.default_params())
            .collect()
    }

    /// Re-estimate every order from `params`, bottom-up, then fill
    /// unestimated probabilities by backoff. Returns false if `params` are
    /// infeasible for any order. Orders whose inputs did not change since
    /// the last successful call are kept as they are.
    pub fn estimate(&mut self, params: &[f64]) -> bool {
        if self.smoothings.is_empty() {
            return true;
        }
        if params.len() != self.num_params() {
            log::warn!(
                "expected {} parameters, got {}",
                self.num_params(),
                params.len()
            );
            return false;
        }
        let mut lower_changed = false;
        for o in 1..=self.order() {
            let range = self.param_starts[o - 1]..self.param_starts[o];
            let own = &params[range.clone()];
            let update = if self.estimated {
                let changed: Vec<bool> = own
                    .iter()
                    .zip(&self.params[range])
                    .map(|(a, b)| a.to_bits() != b.to_bits())
                    .collect();
                self.smoothings[o - 1].update_mask(&changed, lower_changed)
            } else {
                true
            };
            if !update {
                continue;
            }
            let (lower, upper) = self.probs.split_at_mut(o);
            let ok = self.smoothings[o - 1].estimate(
                &self.store,
                own,
                &lower[o - 1],
                &mut upper[0],
                &mut self.bows[o - 1],
            );
            if !ok {
                // Lower orders may already hold the new estimate.
                self.estimated = false;
                return false;
            }
            backoff_fill(&self.store, o, &lower[o - 1], &self.bows[o - 1], &mut upper[0]);
            lower_changed = true;
        }
        self.params = params.to_vec();
        self.estimated = true;
        true
    }

    /// Resolve the backoff chain for `word` after `history` (oldest
    /// first). None for words outside the vocabulary.
    pub fn lookup(&self, history: &[WordIndex], word: WordIndex) -> Option<NGramLookup> {
        if word == INVALID_WORD || word as usize >= self.vocab().len() {
            return None;
        }
        let max_ctx = history.len().min(self.order() - 1);
        let hist = &history[history.len() - max_ctx..];
        // contexts[j] holds the last j history words, while stored
        let mut contexts: Vec<NGramIdx> = vec![0];
        for j in 1..=max_ctx {
            match self.store.find_ngram(&hist[max_ctx - j..]) {
                Some(ctx) => contexts.push(ctx),
                None => break,
            }
        }
        for j in (0..contexts.len()).rev() {
            if let Some(index) = self.store.index(j + 1).find(contexts[j], word) {
                let bows = (j + 1..contexts.len()).map(|k| (k, contexts[k])).collect();
                return Some(NGramLookup {
                    order: j + 1,
                    index,
                    bows,
                });
            }
        }
        None
    }

    pub fn lookup_prob(&self, lookup: &NGramLookup) -> f64 {
        lookup
            .bows
            .iter()
            .fold(self.probs[lookup.order][lookup.index as usize], |p, &(o, c)| {
                p * self.bows[o][c as usize]
            })
    }

    /// P(word | history), zero for unknown words.
    pub fn prob(&self, history: &[WordIndex], word: WordIndex) -> f64 {
        self.lookup(history, word)
            .map(|l| self.lookup_prob(&l))
            .unwrap_or(0.0)
    }

    /// Natural log of `prob`.
    pub fn log_prob(&self, history: &[WordIndex], word: WordIndex) -> f64 {
        self.prob(history, word).ln()
    }

    /// Count contexts whose conditional distribution over the whole
    /// vocabulary does not sum to one within `KNORMEPS`.
    pub fn check_normalization(&self) -> usize {
        let mut bad = 0;
        for o in 0..self.order() {
            for c in 0..self.store.size(o) {
                let history = if o == 0 {
                    Vec::new()
                } else {
                    self.store.ngram_words(o, c as NGramIdx)
                };
                let total: f64 = (0..self.vocab().len() as WordIndex)
                    .map(|w| self.prob(&history, w))
                    .sum();
                if (total - 1.0).abs() > KNORMEPS {
                    log::warn!(
                        "context {:?} sums to {}",
                        if o == 0 { String::new() } else { self.store.ngram_text(o, c as NGramIdx) },
                        total
                    );
                    bad += 1;
                }
            }
        }
        bad
    }

    /// Move this model onto another store, e.g. one merged with more data.
    /// `maps` takes this model's n-gram indices to the new store's.
    /// Smoothing is re-initialized on the new counts; call `estimate` to
    /// refresh probabilities.
    pub fn set_model(&mut self, store: NGramStore, maps: &NGramMaps) -> Result<()> {
        ensure!(store.is_finalized(), "the new store must be finalized");
        ensure!(store.order() == self.order(), "the new store has a different order");
        let order = self.order();
        let remap = |old: &[f64], map: &[NGramIdx], len: usize| {
            let mut new = vec![0.0; len];
            for (&v, &idx) in old.iter().zip(map) {
                if idx != INVALID_NGRAM {
                    new[idx as usize] = v;
                }
            }
            new
        };
        let empty = Vec::new();
        let map_for = |o: usize| maps.ngrams.get(o).unwrap_or(&empty);
        let mut probs: Vec<Vec<f64>> = (0..=order)
            .map(|o| remap(&self.probs[o], map_for(o), store.size(o)))
            .collect();
        probs[0] = vec![uniform_prob(&store)];
        let bows = (0..order)
            .map(|o| remap(&self.bows[o], map_for(o), store.size(o)))
            .collect();
        let kinds = self.smoothing_kinds();
        let params = self.params.clone();
        self.store = store;
        self.probs = probs;
        self.bows = bows;
        if !kinds.is_empty() {
            self.set_smoothing_algs(&kinds)?;
            if params.len() == self.params.len() {
                self.params = params;
            }
        }
        Ok(())
    }

    pub fn serialize<W: Write + ?Sized>(&self, w: &mut W) -> Result<()> {
        self.store.serialize(w)?;
        let kinds: Vec<String> = self.smoothing_kinds().iter().map(|k| k.to_string()).collect();
        binio::write_record(w, "smoothing", &kinds)?;
        binio::write_record(w, "params", &self.params)?;
        binio::write_record(w, "probs", &self.probs)?;
        binio::write_record(w, "bows", &self.bows)?;
        Ok(())
    }

    pub fn deserialize<R: Read>(r: &mut R) -> Result<Self> {
        let store = NGramStore::deserialize(r)?;
        ensure!(store.is_finalized(), "binary model holds an unfinalized store");
        let kinds: Vec<String> = binio::read_record(r, "smoothing")?;
        let params: Vec<f64> = binio::read_record(r, "params")?;
        let probs: Vec<Vec<f64>> = binio::read_record(r, "probs")?;
        let bows: Vec<Vec<f64>> = binio::read_record(r, "bows")?;
        let mut lm = Self::from_probs(store, probs, bows)?;
        if !kinds.is_empty() {
            lm.set_smoothing(&kinds)?;
            ensure!(
                params.len() == lm.num_params(),
                "binary model has {} parameters, its smoothing needs {}",
                params.len(),
                lm.num_params()
            );
            lm.params = params;
            lm.estimated = true;
        }
        Ok(lm)
    }

    pub fn save_lm(&self, path: &Path, format: LmFormat) -> Result<()> {
        log::info!("writing {:?} model to {}", format, path.display());
        binio::write_atomic(path, |w| match format {
            LmFormat::Binary => {
                binio::write_magic(w)?;
                self.serialize(w)
            }
            LmFormat::Arpa => self.write_arpa(w),
        })
    }

    /// Read a binary model, or an ARPA file if the marker does not match.
    pub fn load_lm(path: &Path) -> Result<Self> {
        log::info!("reading model {}", path.display());
        let mut reader = binio::open_reader(path)?;
        if binio::read_magic(&mut reader)? {
            Self::deserialize(&mut reader)
        } else {
            Self::read_arpa(reader)
        }
    }

    /// Read a binary model; anything else is `NGramError::BadMagic`.
    pub fn load_binary(path: &Path) -> Result<Self> {
        let mut reader = binio::open_reader(path)?;
        binio::expect_magic(&mut reader)?;
        Self::deserialize(&mut reader)
    }
}

/// Write hyperparameters as a tagged binary vector or as text.
pub fn write_params(path: &Path, params: &[f64], binary: bool) -> Result<()> {
    binio::write_atomic(path, |w| {
        if binary {
            binio::write_magic(w)?;
            binio::write_record(w, "params", params)
        } else {
            for p in params {
                writeln!(w, "{}", p)?;
            }
            Ok(())
        }
    })
}

/// Read hyperparameters written by `write_params`, or whitespace-separated
/// numbers with `#` comments.
pub fn read_params(path: &Path) -> Result<Vec<f64>> {
    let mut reader = binio::open_reader(path)?;
    if binio::read_magic(&mut reader)? {
        return binio::read_record(&mut reader, "params");
    }
    let mut params = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.split('#').next().unwrap_or_default();
        for field in line.split_whitespace() {
            let p: f64 = field
                .parse()
                .map_err(|_| NGramError::parse(lineno + 1, format!("bad parameter {:?}", field)))?;
            params.push(p);
        }
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const EPS: f64 = 1e-9;

    fn toy_lm(smoothing: &str) -> NGramLM {
        let mut vocab = Vocabulary::new(true);
        vocab.add("a");
        vocab.add("b");
        vocab.set_fixed(true);
        let mut store = NGramStore::new(2, vocab).unwrap();
        store.load_corpus(Cursor::new("a b\na a b\n")).unwrap();
        let mut lm = NGramLM::new(store).unwrap();
        lm.set_smoothing(&[smoothing]).unwrap();
        lm
    }

    fn austen_lm(order: usize, smoothing: &str) -> NGramLM {
        let config = LmConfig {
            order,
            corpora: vec![PathBuf::from("testdata/austen.txt")],
            smoothing: vec![smoothing.to_string()],
            ..Default::default()
        };
        NGramLM::initialize(&config).unwrap()
    }

    fn words(lm: &NGramLM, text: &str) -> Vec<WordIndex> {
        text.split_whitespace().map(|w| lm.vocab().find(w)).collect()
    }

    #[test]
    fn it_estimates_maximum_likelihood() {
        let mut lm = toy_lm("ML");
        let params = lm.default_params();
        assert!(params.is_empty());
        assert!(lm.estimate(&params));
        let a = lm.vocab().find("a");
        let b = lm.vocab().find("b");
        assert!((lm.prob(&[a], b) - 2.0 / 3.0).abs() < EPS);
        assert!((lm.prob(&[a], a) - 1.0 / 3.0).abs() < EPS);
        assert!((lm.prob(&[], a) - 3.0 / 7.0).abs() < EPS);
        // uniform prior over all unigrams
        assert!((lm.probs(0)[0] - 0.25).abs() < EPS);
    }

    #[test]
    fn it_conserves_mass_after_backoff() {
        for smoothing in ["KN", "ModKN", "FixModKN", "KN2"] {
            let mut lm = austen_lm(3, smoothing);
            let params = lm.default_params();
            assert!(lm.estimate(&params), "{} failed", smoothing);
            assert_eq!(lm.check_normalization(), 0, "{} is not normalized", smoothing);
        }
    }

    #[test]
    fn it_reserves_backoff_mass_for_unseen_words() {
        let mut lm = austen_lm(3, "ModKN");
        assert!(lm.estimate(&lm.default_params()));
        let store = lm.store();
        for o in 2..=3 {
            // stored mass, and what the order below gives the same words
            let mut seen = vec![0.0; store.size(o - 1)];
            let mut seen_lower = vec![0.0; store.size(o - 1)];
            for (i, &h) in store.hists(o).iter().enumerate() {
                if store.counts(o)[i] > 0 {
                    seen[h as usize] += lm.probs(o)[i];
                    seen_lower[h as usize] += lm.probs(o - 1)[store.backoffs(o)[i] as usize];
                }
            }
            for (h, &mass) in seen.iter().enumerate() {
                if mass > 0.0 {
                    let total = mass + lm.bows(o - 1)[h] * (1.0 - seen_lower[h]);
                    assert!((total - 1.0).abs() < 1e-6, "order {} history {} sums to {}", o, h, total);
                }
            }
        }
    }

    #[test]
    fn it_normalizes_open_vocabularies() {
        let config = LmConfig {
            order: 2,
            use_unknown: true,
            corpora: vec![PathBuf::from("testdata/austen.txt")],
            smoothing: vec!["KN".to_string()],
            ..Default::default()
        };
        let mut lm = NGramLM::initialize(&config).unwrap();
        assert!(lm.estimate(&lm.default_params()));
        let unigrams: f64 = (0..lm.vocab().len() as WordIndex).map(|w| lm.prob(&[], w)).sum();
        assert!((unigrams - 1.0).abs() < 1e-9, "unigram mass {}", unigrams);
        assert_eq!(lm.check_normalization(), 0);

        // "x" only ever appears as a history
        let mut store = NGramStore::new(2, Vocabulary::new(false)).unwrap();
        store.load_counts(Cursor::new("x y\t2\ny\t2\ny </s>\t2\n")).unwrap();
        let mut lm = NGramLM::new(store).unwrap();
        lm.set_smoothing(&["KN"]).unwrap();
        assert!(lm.estimate(&lm.default_params()));
        assert_eq!(lm.store().counts(1)[lm.vocab().find("x") as usize], 0);
        assert_eq!(lm.check_normalization(), 0);
    }

    #[test]
    fn it_reestimates_deterministically() {
        let mut lm = austen_lm(3, "ModKN");
        let params = lm.default_params();
        assert!(lm.estimate(&params));
        let probs: Vec<Vec<f64>> = (0..=3).map(|o| lm.probs(o).to_vec()).collect();
        let bows: Vec<Vec<f64>> = (0..3).map(|o| lm.bows(o).to_vec()).collect();
        // move away and back again
        let mut other = params.clone();
        other[0] *= 0.5;
        assert!(lm.estimate(&other));
        assert!(lm.estimate(&params));
        for o in 0..=3 {
            assert_eq!(lm.probs(o), &probs[o][..]);
        }
        for o in 0..3 {
            assert_eq!(lm.bows(o), &bows[o][..]);
        }
    }

    #[test]
    fn it_fails_on_negative_discounts() {
        let mut lm = austen_lm(2, "KN");
        let mut params = lm.default_params();
        assert_eq!(params.len(), 2);
        params[1] = -0.5;
        assert!(!lm.estimate(&params));
        assert!(!lm.estimate(&[0.5]));
    }

    #[test]
    fn it_backs_off_to_lower_orders() {
        let mut lm = austen_lm(3, "KN");
        assert!(lm.estimate(&lm.default_params()));
        let hist = words(&lm, "dashwood dashwood");
        let was = lm.vocab().find("was");
        let lookup = lm.lookup(&hist, was).unwrap();
        assert!(lookup.order < 3);
        let p = lm.prob(&hist, was);
        assert!(p > 0.0 && p < 1.0);
        assert!(lm.lookup(&hist, INVALID_WORD).is_none());
    }

    #[test]
    fn it_rejects_unknown_smoothing() {
        let mut lm = toy_lm("ML");
        let err = lm.set_smoothing(&["Witten-Bell"]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<NGramError>(),
            Some(NGramError::UnknownSmoothing(_))
        ));
        assert!(lm.set_smoothing(&["ML", "KN", "KN"]).is_err());
    }

    #[test]
    fn it_round_trips_binary_models() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lm.bin");
        let mut lm = austen_lm(3, "ModKN");
        assert!(lm.estimate(&lm.default_params()));
        lm.save_lm(&path, LmFormat::Binary).unwrap();
        let mut copy = NGramLM::load_lm(&path).unwrap();
        assert_eq!(copy.smoothing_kinds(), lm.smoothing_kinds());
        assert_eq!(copy.params(), lm.params());
        for o in 0..=3 {
            assert_eq!(copy.probs(o), lm.probs(o));
        }
        // still tunable
        let mut params = copy.default_params();
        params[0] *= 0.9;
        assert!(copy.estimate(&params));
    }

    #[test]
    fn it_round_trips_params_files() {
        let dir = tempfile::tempdir().unwrap();
        let params = vec![0.5, 0.75, 1.125];
        for binary in [true, false] {
            let path = dir.path().join(if binary { "p.bin" } else { "p.txt" });
            write_params(&path, &params, binary).unwrap();
            assert_eq!(read_params(&path).unwrap(), params);
        }
        let path = dir.path().join("hand.txt");
        std::fs::write(&path, "# discounts\n0.5 0.75\n1.125 # last\n").unwrap();
        assert_eq!(read_params(&path).unwrap(), params);
    }

    #[test]
    fn it_moves_onto_a_merged_store() {
        let mut lm = austen_lm(2, "KN");
        assert!(lm.estimate(&lm.default_params()));
        let dashwood = lm.vocab().find("dashwood");
        let before = lm.prob(&[], dashwood);

        let mut extra = NGramStore::new(2, Vocabulary::new(false)).unwrap();
        extra.load_corpus(Cursor::new("elinor and marianne\n")).unwrap();
        let mut combined = NGramStore::new(2, Vocabulary::new(false)).unwrap();
        let from_lm = combined.merge(lm.store()).unwrap();
        combined.merge(&extra).unwrap();
        let sorted = combined.finalize().unwrap();
        lm.set_model(combined, &from_lm.compose(&sorted)).unwrap();

        let dashwood = lm.vocab().find("dashwood");
        assert!((lm.probs(1)[dashwood as usize] - before).abs() < EPS);
        assert!(lm.vocab().find("marianne") != INVALID_WORD);
        assert!(lm.estimate(&lm.params().to_vec()));
        assert_eq!(lm.check_normalization(), 0);
    }
}
