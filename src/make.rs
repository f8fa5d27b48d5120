//! Smoothing algorithms that turn the counts of one order into
//! probabilities and backoff weights.
use anyhow::{ensure, Result};
use std::fmt;
use std::str::FromStr;

use crate::coc::NGramCountOfCounts;
use crate::count::{Count, NGramStore};
use crate::error::NGramError;
use crate::index::NGramIdx;

/// Which smoothing algorithm to apply to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmoothingKind {
    /// Relative frequencies, no mass reserved for unseen words.
    MaximumLikelihood,
    /// Interpolated Kneser-Ney with this many discount bins, discounts
    /// fixed at their count-of-counts estimate.
    FixedKneserNey(u8),
    /// Interpolated Kneser-Ney with this many tunable discount bins.
    KneserNey(u8),
}

impl SmoothingKind {
    /// Create an uninitialized smoothing of this kind.
    pub fn create(self) -> Box<dyn Smoothing> {
        match self {
            SmoothingKind::MaximumLikelihood => Box::new(MaxLikelihoodSmoothing::default()),
            SmoothingKind::FixedKneserNey(bins) => Box::new(KneserNeySmoothing::new(bins, false)),
            SmoothingKind::KneserNey(bins) => Box::new(KneserNeySmoothing::new(bins, true)),
        }
    }
}

impl FromStr for SmoothingKind {
    type Err = NGramError;

    /// Parse `ML`, `[Fix]KN`, `[Fix]ModKN` or `[Fix]KN<bins>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || NGramError::UnknownSmoothing(s.to_string());
        if s == "ML" {
            return Ok(SmoothingKind::MaximumLikelihood);
        }
        let (fixed, rest) = match s.strip_prefix("Fix") {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let bins = match rest {
            "KN" => 1,
            "ModKN" => 3,
            _ => {
                let bins: u8 = rest
                    .strip_prefix("KN")
                    .and_then(|n| n.parse().ok())
                    .ok_or_else(unknown)?;
                if bins == 0 || bins > NGramCountOfCounts::MAX_BINS {
                    return Err(unknown());
                }
                bins
            }
        };
        Ok(if fixed {
            SmoothingKind::FixedKneserNey(bins)
        } else {
            SmoothingKind::KneserNey(bins)
        })
    }
}

impl fmt::Display for SmoothingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (prefix, bins) = match *self {
            SmoothingKind::MaximumLikelihood => return write!(f, "ML"),
            SmoothingKind::FixedKneserNey(bins) => ("Fix", bins),
            SmoothingKind::KneserNey(bins) => ("", bins),
        };
        match bins {
            1 => write!(f, "{}KN", prefix),
            3 => write!(f, "{}ModKN", prefix),
            _ => write!(f, "{}KN{}", prefix, bins),
        }
    }
}

/// Estimation strategy for a single order.
///
/// `NGramLM` calls `estimate` for orders 1..=N in increasing order, so
/// `lower_probs` always holds final probabilities of the order below.
pub trait Smoothing: fmt::Debug {
    fn kind(&self) -> SmoothingKind;

    /// Bind to the counts of `order` and precompute what `estimate` needs.
    fn initialize(&mut self, store: &NGramStore, order: usize) -> Result<()>;

    /// Starting hyperparameters; empty if nothing is tunable.
    fn default_params(&self) -> Vec<f64>;

    /// Whether this order must be recomputed given which of its own
    /// parameters changed and whether the order below changed.
    fn update_mask(&self, params_changed: &[bool], lower_changed: bool) -> bool {
        lower_changed || params_changed.iter().any(|&c| c)
    }

    /// Fill `probs` (this order) and `bows` (histories at the order below).
    /// Returns false if `params` lie outside the feasible region.
    /// N-grams with unseen histories are left at zero for backoff filling.
    fn estimate(
        &mut self,
        store: &NGramStore,
        params: &[f64],
        lower_probs: &[f64],
        probs: &mut [f64],
        bows: &mut [f64],
    ) -> bool;
}

/// Total count of each history's continuations.
fn history_totals(hists: &[NGramIdx], counts: &[Count], num_hists: usize) -> Vec<f64> {
    let mut totals = vec![0.0; num_hists];
    for (&h, &c) in hists.iter().zip(counts) {
        totals[h as usize] += c as f64;
    }
    totals
}

#[derive(Debug, Default)]
pub struct MaxLikelihoodSmoothing {
    order: usize,
    hist_totals: Vec<f64>,
}

impl Smoothing for MaxLikelihoodSmoothing {
    fn kind(&self) -> SmoothingKind {
        SmoothingKind::MaximumLikelihood
    }

    fn initialize(&mut self, store: &NGramStore, order: usize) -> Result<()> {
        ensure!(order >= 1 && order <= store.order(), "no order {} in the model", order);
        self.order = order;
        self.hist_totals = history_totals(store.hists(order), store.counts(order), store.size(order - 1));
        Ok(())
    }

    fn default_params(&self) -> Vec<f64> {
        Vec::new()
    }

    fn estimate(
        &mut self,
        store: &NGramStore,
        _params: &[f64],
        _lower_probs: &[f64],
        probs: &mut [f64],
        bows: &mut [f64],
    ) -> bool {
        for (bow, &total) in bows.iter_mut().zip(self.hist_totals.iter()) {
            *bow = if total > 0.0 { 0.0 } else { 1.0 };
        }
        let counts = store.counts(self.order);
        for ((p, &h), &c) in probs.iter_mut().zip(store.hists(self.order)).zip(counts) {
            let total = self.hist_totals[h as usize];
            *p = if total > 0.0 { c as f64 / total } else { 0.0 };
        }
        true
    }
}

/// Interpolated Kneser-Ney smoothing with absolute discounts binned by
/// count (one bin is plain KN, three bins is modified KN).
#[derive(Debug)]
pub struct KneserNeySmoothing {
    /// Number of discount bins
    bins: u8,
    /// Whether the discounts are hyperparameters
    tunable: bool,
    order: usize,
    /// Continuation counts below the highest order, raw counts otherwise
    eff_counts: Vec<Count>,
    /// Sum of effective counts per history
    hist_totals: Vec<f64>,
    /// Count-of-counts discount estimates
    discounts: Vec<f64>,
}

impl KneserNeySmoothing {
    pub fn new(bins: u8, tunable: bool) -> Self {
        Self {
            bins,
            tunable,
            order: 0,
            eff_counts: Vec::new(),
            hist_totals: Vec::new(),
            discounts: Vec::new(),
        }
    }

    /// Replace lower-order counts by the number of distinct left
    /// extensions, except for n-grams that start at the sentence-start
    /// context and so cannot be extended.
    fn effective_counts(store: &NGramStore, order: usize) -> Vec<Count> {
        if order == store.order() {
            return store.counts(order).to_vec();
        }
        let mut eff = vec![0; store.size(order)];
        for (&bo, &c) in store.backoffs(order + 1).iter().zip(store.counts(order + 1)) {
            if c > 0 {
                eff[bo as usize] += 1;
            }
        }
        if order >= 2 {
            let mut bos: Vec<bool> = store.hists(2).iter().map(|&h| h == 0).collect();
            for o in 3..=order {
                bos = store.hists(o).iter().map(|&h| bos[h as usize]).collect();
            }
            for (i, &starts) in bos.iter().enumerate() {
                if starts {
                    eff[i] = store.counts(order)[i];
                }
            }
        }
        eff
    }

    #[inline]
    fn discount(discounts: &[f64], count: Count) -> f64 {
        if count == 0 {
            0.0
        } else {
            discounts[(count as usize).min(discounts.len()) - 1]
        }
    }
}

impl Smoothing for KneserNeySmoothing {
    fn kind(&self) -> SmoothingKind {
        if self.tunable {
            SmoothingKind::KneserNey(self.bins)
        } else {
            SmoothingKind::FixedKneserNey(self.bins)
        }
    }

    fn initialize(&mut self, store: &NGramStore, order: usize) -> Result<()> {
        ensure!(order >= 1 && order <= store.order(), "no order {} in the model", order);
        ensure!(store.is_finalized(), "Kneser-Ney needs a finalized store");
        self.order = order;
        self.eff_counts = Self::effective_counts(store, order);
        self.hist_totals = history_totals(store.hists(order), &self.eff_counts, store.size(order - 1));
        let coc = NGramCountOfCounts::from_counts(self.bins, &self.eff_counts)?;
        self.discounts = coc.discounts();
        log::debug!("order {} {} discounts {:?}", order, self.kind(), self.discounts);
        Ok(())
    }

    fn default_params(&self) -> Vec<f64> {
        if self.tunable {
            self.discounts.clone()
        } else {
            Vec::new()
        }
    }

    fn estimate(
        &mut self,
        store: &NGramStore,
        params: &[f64],
        lower_probs: &[f64],
        probs: &mut [f64],
        bows: &mut [f64],
    ) -> bool {
        let discounts = if self.tunable { params } else { &self.discounts[..] };
        if discounts.len() != self.bins as usize {
            return false;
        }
        // 0 < D_k < k; NaN fails both comparisons
        let feasible = discounts
            .iter()
            .enumerate()
            .all(|(k, &d)| d > 0.0 && d < (k + 1) as f64);
        if !feasible {
            return false;
        }

        let hists = store.hists(self.order);
        bows.iter_mut().for_each(|b| *b = 0.0);
        for (&h, &c) in hists.iter().zip(self.eff_counts.iter()) {
            bows[h as usize] += Self::discount(discounts, c);
        }
        for (bow, &total) in bows.iter_mut().zip(self.hist_totals.iter()) {
            *bow = if total > 0.0 { *bow / total } else { 1.0 };
        }

        let backoffs = store.backoffs(self.order);
        for (i, p) in probs.iter_mut().enumerate() {
            let h = hists[i] as usize;
            let total = self.hist_totals[h];
            *p = if total > 0.0 {
                let c = self.eff_counts[i];
                let discounted = (c as f64 - Self::discount(discounts, c)).max(0.0);
                discounted / total + bows[h] * lower_probs[backoffs[i] as usize]
            } else {
                0.0
            };
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocab::Vocabulary;
    use std::io::Cursor;

    fn toy_store(order: usize, text: &str) -> NGramStore {
        let mut store = NGramStore::new(order, Vocabulary::new(false)).unwrap();
        store.load_corpus(Cursor::new(text)).unwrap();
        store.finalize().unwrap();
        store
    }

    #[test]
    fn it_parses_selectors() {
        let cases = [
            ("ML", SmoothingKind::MaximumLikelihood),
            ("KN", SmoothingKind::KneserNey(1)),
            ("ModKN", SmoothingKind::KneserNey(3)),
            ("FixKN", SmoothingKind::FixedKneserNey(1)),
            ("FixModKN", SmoothingKind::FixedKneserNey(3)),
            ("KN2", SmoothingKind::KneserNey(2)),
            ("FixKN4", SmoothingKind::FixedKneserNey(4)),
        ];
        for (text, kind) in cases {
            assert_eq!(text.parse::<SmoothingKind>().unwrap(), kind);
            assert_eq!(kind.to_string(), text);
        }
        for bad in ["", "kn", "KN0", "KN99", "FixML", "WB"] {
            assert!(matches!(
                bad.parse::<SmoothingKind>(),
                Err(NGramError::UnknownSmoothing(_))
            ));
        }
    }

    #[test]
    fn it_estimates_maximum_likelihood() {
        let store = toy_store(2, "a b\na a b\n");
        let mut ml = SmoothingKind::MaximumLikelihood.create();
        ml.initialize(&store, 2).unwrap();
        assert!(ml.default_params().is_empty());
        let lower = vec![0.25; store.size(1)];
        let mut probs = vec![0.0; store.size(2)];
        let mut bows = vec![0.0; store.size(1)];
        assert!(ml.estimate(&store, &[], &lower, &mut probs, &mut bows));
        let a = store.vocab().find("a");
        let b = store.vocab().find("b");
        let ab = store.find_ngram(&[a, b]).unwrap() as usize;
        let aa = store.find_ngram(&[a, a]).unwrap() as usize;
        assert!((probs[ab] - 2.0 / 3.0).abs() < 1e-12);
        assert!((probs[aa] - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(bows[a as usize], 0.0);
    }

    #[test]
    fn it_counts_continuations() {
        let store = toy_store(2, "a b\nc b\nb\n");
        let eff = KneserNeySmoothing::effective_counts(&store, 1);
        let b = store.vocab().find("b") as usize;
        // b follows a, c and <s>
        assert_eq!(eff[b], 3);
        assert_eq!(store.counts(1)[b], 3);
        let eos = eff[0];
        assert_eq!(eos, 1);
    }

    #[test]
    fn it_rejects_infeasible_discounts() {
        let store = toy_store(2, "a b\na a b\nb a\n");
        let mut kn = SmoothingKind::KneserNey(1).create();
        kn.initialize(&store, 2).unwrap();
        let lower = vec![0.2; store.size(1)];
        let mut probs = vec![0.0; store.size(2)];
        let mut bows = vec![0.0; store.size(1)];
        for bad in [vec![-0.1], vec![0.0], vec![1.0], vec![1.5], vec![f64::NAN], vec![0.5, 0.5]] {
            assert!(!kn.estimate(&store, &bad, &lower, &mut probs, &mut bows));
        }
        assert!(kn.estimate(&store, &[0.5], &lower, &mut probs, &mut bows));
    }

    #[test]
    fn it_conserves_mass_per_history() {
        let store = toy_store(2, "a b c\na c\nb c a\nc c b a\n");
        let mut kn = SmoothingKind::KneserNey(3).create();
        kn.initialize(&store, 2).unwrap();
        let params = kn.default_params();
        assert_eq!(params.len(), 3);
        let n = store.size(1);
        let lower = vec![1.0 / n as f64; n];
        let mut probs = vec![0.0; store.size(2)];
        let mut bows = vec![0.0; n];
        assert!(kn.estimate(&store, &params, &lower, &mut probs, &mut bows));
        for h in 0..n {
            let mut seen = 0.0;
            let mut seen_lower = 0.0;
            for (i, &hist) in store.hists(2).iter().enumerate() {
                if hist as usize == h {
                    seen += probs[i];
                    seen_lower += lower[store.backoffs(2)[i] as usize];
                }
            }
            if seen > 0.0 {
                let total = seen + bows[h] * (1.0 - seen_lower);
                assert!((total - 1.0).abs() < 1e-9, "history {} sums to {}", h, total);
            }
        }
    }

    #[test]
    fn it_fixes_discounts() {
        let store = toy_store(2, "a b\na a b\n");
        let mut kn = SmoothingKind::FixedKneserNey(3).create();
        kn.initialize(&store, 2).unwrap();
        assert!(kn.default_params().is_empty());
        assert_eq!(kn.kind().to_string(), "FixModKN");
        let lower = vec![0.25; store.size(1)];
        let mut probs = vec![0.0; store.size(2)];
        let mut bows = vec![0.0; store.size(1)];
        assert!(kn.estimate(&store, &[], &lower, &mut probs, &mut bows));
    }
}
