//! Held-out perplexity as an objective for tuning smoothing parameters.
use anyhow::{Context, Result};
use std::io::prelude::*;
use std::path::Path;

use crate::binio;
use crate::count::{sentence_tokens, Count};
use crate::model::NGramLM;
use crate::powell::{self, Objective, OptimizeResult, PowellOptions};
use crate::vocab::{WordIndex, END_OF_SENTENCE, INVALID_WORD};

/// Entropy reported for parameters the model cannot be estimated with.
pub const INFEASIBLE_ENTROPY: f64 = 100.0;

/// Scores a fixed held-out corpus against a model as its parameters change.
///
/// The corpus is reduced once to how often each stored probability and
/// backoff weight is used, so each evaluation is a dot product over the
/// model's vectors.
pub struct PerplexityOptimizer<'a> {
    lm: &'a mut NGramLM,
    /// Uses of each probability entry, orders 0..=N
    prob_counts: Vec<Vec<Count>>,
    /// Uses of each backoff weight, orders 0..N
    bow_counts: Vec<Vec<Count>>,
    num_sentences: u64,
    num_words: u64,
    num_oov: u64,
    num_zero_probs: u64,
    options: PowellOptions,
}

impl<'a> PerplexityOptimizer<'a> {
    pub fn new(lm: &'a mut NGramLM) -> Self {
        let order = lm.order();
        let prob_counts = (0..=order).map(|o| vec![0; lm.store().size(o)]).collect();
        let bow_counts = (0..order).map(|o| vec![0; lm.store().size(o)]).collect();
        Self {
            lm,
            prob_counts,
            bow_counts,
            num_sentences: 0,
            num_words: 0,
            num_oov: 0,
            num_zero_probs: 0,
            options: PowellOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PowellOptions) -> Self {
        self.options = options;
        self
    }

    pub fn lm(&self) -> &NGramLM {
        &*self.lm
    }

    /// Words scored so far, including sentence ends.
    pub fn num_words(&self) -> u64 {
        self.num_words
    }

    /// Held-out words outside the vocabulary, which are not scored.
    pub fn num_oov(&self) -> u64 {
        self.num_oov
    }

    /// Scored words given zero probability at the last evaluation.
    pub fn num_zero_probs(&self) -> u64 {
        self.num_zero_probs
    }

    fn add_sentence<'t, I>(&mut self, tokens: I)
    where
        I: IntoIterator<Item = &'t str>,
    {
        let context = self.lm.order() - 1;
        let mut hist: Vec<WordIndex> = vec![END_OF_SENTENCE];
        let words: Vec<WordIndex> = tokens
            .into_iter()
            .map(|t| self.lm.vocab().find(t))
            .chain(std::iter::once(END_OF_SENTENCE))
            .collect();
        for w in words {
            if w == INVALID_WORD {
                self.num_oov += 1;
                hist.clear();
                continue;
            }
            if let Some(lookup) = self.lm.lookup(&hist, w) {
                self.prob_counts[lookup.order][lookup.index as usize] += 1;
                for (o, c) in lookup.bows {
                    self.bow_counts[o][c as usize] += 1;
                }
                self.num_words += 1;
            }
            hist.push(w);
            if hist.len() > context {
                hist.drain(..hist.len() - context);
            }
        }
        self.num_sentences += 1;
    }

    /// Read held-out sentences, one per line.
    pub fn load_corpus<R: BufRead>(&mut self, reader: R) -> Result<()> {
        for line in reader.lines() {
            let line = line?;
            self.add_sentence(sentence_tokens(&line));
        }
        log::info!(
            "held-out corpus: {} sentences, {} words, {} OOVs",
            self.num_sentences,
            self.num_words,
            self.num_oov
        );
        Ok(())
    }

    pub fn load_corpus_file(&mut self, path: &Path) -> Result<()> {
        let reader = binio::open_reader(path)?;
        self.load_corpus(reader)
            .with_context(|| format!("reading held-out text {}", path.display()))
    }

    /// Per-word cross entropy (natural log) of the held-out corpus after
    /// estimating with `params`, or `INFEASIBLE_ENTROPY`.
    pub fn compute_entropy(&mut self, params: &[f64]) -> f64 {
        if !self.lm.estimate(params) {
            log::debug!("infeasible parameters {:?}", params);
            return INFEASIBLE_ENTROPY;
        }
        let mut total = 0.0;
        let mut zeros: u64 = 0;
        for (o, counts) in self.prob_counts.iter().enumerate().skip(1) {
            let probs = self.lm.probs(o);
            for (&c, &p) in counts.iter().zip(probs) {
                if c == 0 {
                    continue;
                }
                if p > 0.0 {
                    total += c as f64 * p.ln();
                } else {
                    zeros += c;
                }
            }
        }
        for (o, counts) in self.bow_counts.iter().enumerate() {
            let bows = self.lm.bows(o);
            for (&c, &b) in counts.iter().zip(bows) {
                if c == 0 {
                    continue;
                }
                if b > 0.0 {
                    total += c as f64 * b.ln();
                } else {
                    zeros += c;
                }
            }
        }
        self.num_zero_probs = zeros;
        let denom = self.num_words as f64 - zeros as f64;
        if denom <= 0.0 {
            return INFEASIBLE_ENTROPY;
        }
        let entropy = -total / denom;
        log::debug!("entropy {:.6} at {:?}", entropy, params);
        if entropy.is_nan() {
            INFEASIBLE_ENTROPY
        } else {
            entropy
        }
    }

    pub fn compute_perplexity(&mut self, params: &[f64]) -> f64 {
        self.compute_entropy(params).exp()
    }

    /// Minimize held-out entropy from `params`, leaving them and the model
    /// at the best point found.
    pub fn optimize(&mut self, params: &mut [f64]) -> OptimizeResult {
        let options = self.options.clone();
        let result = powell::optimize(self, params, &options);
        let entropy = self.compute_entropy(params);
        log::info!(
            "minimum entropy {:.6} (perplexity {:.3}) after {} iterations in {:.2?}, {} zero probabilities",
            entropy,
            entropy.exp(),
            result.iterations,
            result.elapsed,
            self.num_zero_probs
        );
        result
    }
}

impl Objective for PerplexityOptimizer<'_> {
    fn evaluate(&mut self, params: &[f64]) -> f64 {
        self.compute_entropy(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LmConfig;
    use crate::vocab::Vocabulary;
    use crate::count::NGramStore;
    use std::io::Cursor;
    use std::path::PathBuf;

    const HELD_OUT: &str = "\
he was not an unkind young man
the family of dashwood was amiable
mrs dashwood had long been settled at norland
";

    fn austen_lm(smoothing: &str) -> NGramLM {
        let config = LmConfig {
            order: 3,
            corpora: vec![PathBuf::from("testdata/austen.txt")],
            smoothing: vec![smoothing.to_string()],
            ..Default::default()
        };
        NGramLM::initialize(&config).unwrap()
    }

    #[test]
    fn it_matches_direct_scoring() {
        let mut lm = austen_lm("ModKN");
        let params = lm.default_params();
        let mut opt = PerplexityOptimizer::new(&mut lm);
        opt.load_corpus(Cursor::new(HELD_OUT)).unwrap();
        // "unkind" never occurs in training
        assert_eq!(opt.num_oov(), 1);
        let entropy = opt.compute_entropy(&params);
        assert_eq!(opt.num_zero_probs(), 0);

        let lm = opt.lm();
        let mut total = 0.0;
        let mut n = 0;
        for line in HELD_OUT.lines() {
            let mut hist = vec![END_OF_SENTENCE];
            for w in line.split_whitespace().map(|w| lm.vocab().find(w)).chain([END_OF_SENTENCE]) {
                if w == INVALID_WORD {
                    hist.clear();
                    continue;
                }
                total -= lm.log_prob(&hist, w);
                n += 1;
                hist.push(w);
            }
        }
        assert_eq!(n, opt.num_words());
        assert!((entropy - total / n as f64).abs() < 1e-9);
    }

    #[test]
    fn it_penalizes_negative_discounts() {
        let mut lm = austen_lm("KN");
        let mut params = lm.default_params();
        params[0] = -0.25;
        let mut opt = PerplexityOptimizer::new(&mut lm);
        opt.load_corpus(Cursor::new(HELD_OUT)).unwrap();
        assert_eq!(opt.compute_entropy(&params), INFEASIBLE_ENTROPY);
        assert_eq!(opt.evaluate(&params), INFEASIBLE_ENTROPY);
    }

    #[test]
    fn it_excludes_zero_probabilities() {
        // unsmoothed, so held-out bigrams unseen in training get nothing
        let mut vocab = Vocabulary::new(false);
        for w in ["a", "b"] {
            vocab.add(w);
        }
        vocab.set_fixed(true);
        let mut store = NGramStore::new(2, vocab).unwrap();
        store.load_corpus(Cursor::new("a b\n")).unwrap();
        let mut lm = NGramLM::new(store).unwrap();
        lm.set_smoothing(&["ML"]).unwrap();
        let mut opt = PerplexityOptimizer::new(&mut lm);
        opt.load_corpus(Cursor::new("a b\nb a\n")).unwrap();
        let entropy = opt.compute_entropy(&[]);
        assert!(opt.num_zero_probs() > 0);
        assert!(entropy.is_finite());
        assert!(entropy < INFEASIBLE_ENTROPY);
    }

    #[test]
    fn it_lowers_perplexity() {
        let mut lm = austen_lm("KN");
        let mut params = lm.default_params();
        let mut opt = PerplexityOptimizer::new(&mut lm).with_options(PowellOptions {
            max_iterations: 20,
            ..Default::default()
        });
        opt.load_corpus(Cursor::new(HELD_OUT)).unwrap();
        let before = opt.compute_perplexity(&params);
        let result = opt.optimize(&mut params);
        let after = opt.compute_perplexity(&params);
        assert!(after <= before + 1e-9, "{} > {}", after, before);
        assert!((result.value.exp() - after).abs() < 1e-6 * after);
        for (k, d) in params.iter().enumerate() {
            // one bin per order
            assert!(*d > 0.0 && *d < 1.0, "discount {} = {}", k, d);
        }
        assert_eq!(opt.lm().params(), &params[..]);
    }
}
