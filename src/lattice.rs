//! Decoding lattices rescored with the language model, and word error
//! rate or best-path margin as objectives for tuning it.
use anyhow::{anyhow, bail, Context, Result};
use ordered_float::OrderedFloat;
use rustfst::algorithms::shortest_path;
use rustfst::prelude::*;
use rustfst::utils::{acceptor, decode_linear_fst};
use std::collections::VecDeque;
use std::io::prelude::*;
use std::path::Path;

use crate::binio;
use crate::model::{NGramLM, NGramLookup};
use crate::powell::{self, Objective, OptimizeResult, PowellOptions};
use crate::vocab::{WordIndex, END_OF_SENTENCE, INVALID_WORD};
use crate::StdVectorFst;

/// Value reported for parameters the model cannot be estimated with.
pub const INFEASIBLE_WER: f64 = 1e6;

#[derive(Debug, Clone)]
pub struct LatticeOptions {
    /// Weight of the language model cost relative to the acoustic cost.
    pub lm_scale: f64,
}

impl Default for LatticeOptions {
    fn default() -> Self {
        Self { lm_scale: 1.0 }
    }
}

/// What `WerOptimizer` minimizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WerObjective {
    /// Word error rate of the 1-best paths.
    ErrorRate,
    /// Negated mean signed cost gap between the two best paths.
    Margin,
}

/// Backpointer to the previous state, arc and rank along a partial path.
#[derive(Debug, Clone, Copy)]
struct Token {
    cost: f64,
    back: Option<(StateId, usize, usize)>,
}

/// One decoding lattice with the language model lookups for each of its
/// arcs and final states. Words are read from output labels.
#[derive(Debug)]
pub struct Lattice {
    fst: StdVectorFst,
    /// Acoustic cost of each arc, per state
    acoustic: Vec<Vec<f32>>,
    /// Acoustic final cost, per state
    final_acoustic: Vec<Option<f32>>,
    /// Where each word arc's probability comes from; None for epsilon
    /// arcs, Some(None) for words the model does not know.
    arc_lookups: Vec<Vec<Option<Option<NGramLookup>>>>,
    /// Sentence end lookups for final states
    final_lookups: Vec<Option<NGramLookup>>,
    /// States in topological order
    topo: Vec<StateId>,
    reference: Vec<Label>,
}

impl Lattice {
    /// Prepare `fst` for rescoring with `lm`, whose words are resolved
    /// through `symbols`. Every state must be reached with a single
    /// history of the model's context length.
    pub fn new(fst: StdVectorFst, reference: Vec<Label>, lm: &NGramLM, symbols: &SymbolTable) -> Result<Self> {
        let num_states = fst.num_states();
        let start = fst.start().ok_or_else(|| anyhow!("lattice has no start state"))?;
        let context = lm.order() - 1;
        let word_of = |label: Label| -> WordIndex {
            symbols
                .get_symbol(label)
                .map(|w| lm.vocab().find(w))
                .unwrap_or(INVALID_WORD)
        };

        let mut hists: Vec<Option<Vec<WordIndex>>> = vec![None; num_states];
        hists[start as usize] = Some(vec![END_OF_SENTENCE]);
        let mut queue = VecDeque::from([start]);
        while let Some(s) = queue.pop_front() {
            let hist = hists[s as usize].clone().unwrap_or_default();
            for tr in fst.get_trs(s)?.trs() {
                let next = if tr.olabel == EPS_LABEL {
                    hist.clone()
                } else {
                    let w = word_of(tr.olabel);
                    if w == INVALID_WORD {
                        Vec::new()
                    } else {
                        let mut next = hist.clone();
                        next.push(w);
                        if next.len() > context {
                            next.drain(..next.len() - context);
                        }
                        next
                    }
                };
                let i = tr.nextstate as usize;
                if let Some(seen) = &hists[i] {
                    if *seen != next {
                        bail!(
                            "state {} is reached with different {}-word histories",
                            tr.nextstate,
                            context
                        );
                    }
                    continue;
                }
                hists[i] = Some(next);
                queue.push_back(tr.nextstate);
            }
        }

        let mut acoustic = Vec::with_capacity(num_states);
        let mut final_acoustic = Vec::with_capacity(num_states);
        let mut arc_lookups = Vec::with_capacity(num_states);
        let mut final_lookups = Vec::with_capacity(num_states);
        for s in fst.states_iter() {
            let hist = hists[s as usize].as_deref().unwrap_or(&[]);
            let trs = fst.get_trs(s)?;
            acoustic.push(trs.trs().iter().map(|tr| *tr.weight.value()).collect());
            arc_lookups.push(
                trs.trs()
                    .iter()
                    .map(|tr| (tr.olabel != EPS_LABEL).then(|| lm.lookup(hist, word_of(tr.olabel))))
                    .collect(),
            );
            let final_weight = fst.final_weight(s)?;
            final_acoustic.push(final_weight.as_ref().map(|w| *w.value()));
            final_lookups.push(if final_weight.is_some() {
                lm.lookup(hist, END_OF_SENTENCE)
            } else {
                None
            });
        }
        let topo = topological_order(&fst)?;
        Ok(Self {
            fst,
            acoustic,
            final_acoustic,
            arc_lookups,
            final_lookups,
            topo,
            reference,
        })
    }

    pub fn fst(&self) -> &StdVectorFst {
        &self.fst
    }

    pub fn reference(&self) -> &[Label] {
        &self.reference
    }

    /// Set every arc and final weight to its acoustic cost plus the scaled
    /// language model cost under the model's current estimate.
    pub fn rescore(&mut self, lm: &NGramLM, lm_scale: f64) -> Result<()> {
        let lm_cost = |lookup: Option<&NGramLookup>| -> f64 {
            match lookup {
                Some(l) => -lm.lookup_prob(l).ln(),
                None => f64::INFINITY,
            }
        };
        for s in 0..self.acoustic.len() {
            let state = s as StateId;
            {
                let mut trs = self.fst.tr_iter_mut(state)?;
                for idx in 0..trs.len() {
                    let mut cost = self.acoustic[s][idx] as f64;
                    if let Some(lookup) = &self.arc_lookups[s][idx] {
                        cost += lm_scale * lm_cost(lookup.as_ref());
                    }
                    trs.set_weight(idx, TropicalWeight::new(cost as f32))?;
                }
            }
            if let Some(acoustic) = self.final_acoustic[s] {
                let cost = acoustic as f64 + lm_scale * lm_cost(self.final_lookups[s].as_ref());
                self.fst.set_final(state, cost as f32)?;
            }
        }
        Ok(())
    }

    /// Words on the lowest cost path.
    pub fn best_words(&self) -> Result<Vec<Label>> {
        let best: StdVectorFst = shortest_path(&self.fst)?;
        if best.num_states() == 0 {
            return Ok(Vec::new());
        }
        let path = decode_linear_fst(&best)?;
        Ok(path.olabels.into_iter().filter(|&l| l != EPS_LABEL).collect())
    }

    /// Cost and words of the best path and cost of the second best, over
    /// the current weights.
    pub fn two_best(&self) -> Result<Option<(f64, Vec<Label>, Option<f64>)>> {
        let num_states = self.acoustic.len();
        let mut tokens: Vec<Vec<Token>> = vec![Vec::new(); num_states];
        if let Some(start) = self.fst.start() {
            tokens[start as usize].push(Token { cost: 0.0, back: None });
        }
        for &s in self.topo.iter() {
            let here = tokens[s as usize].clone();
            if here.is_empty() {
                continue;
            }
            for (idx, tr) in self.fst.get_trs(s)?.trs().iter().enumerate() {
                let next = &mut tokens[tr.nextstate as usize];
                for (rank, token) in here.iter().enumerate() {
                    next.push(Token {
                        cost: token.cost + *tr.weight.value() as f64,
                        back: Some((s, idx, rank)),
                    });
                }
                next.sort_by_key(|t| OrderedFloat(t.cost));
                next.truncate(2);
            }
        }
        let mut ends: Vec<(f64, StateId, usize)> = Vec::new();
        for s in self.fst.states_iter() {
            if let Some(w) = self.fst.final_weight(s)? {
                for (rank, token) in tokens[s as usize].iter().enumerate() {
                    ends.push((token.cost + *w.value() as f64, s, rank));
                }
            }
        }
        ends.sort_by_key(|e| OrderedFloat(e.0));
        let Some(&(best_cost, mut s, mut rank)) = ends.first() else {
            return Ok(None);
        };
        if !best_cost.is_finite() {
            return Ok(None);
        }
        let mut words = Vec::new();
        while let Some((prev, idx, prev_rank)) = tokens[s as usize][rank].back {
            let label = self.fst.get_trs(prev)?.trs()[idx].olabel;
            if label != EPS_LABEL {
                words.push(label);
            }
            s = prev;
            rank = prev_rank;
        }
        words.reverse();
        let second = ends.get(1).map(|e| e.0).filter(|c| c.is_finite());
        Ok(Some((best_cost, words, second)))
    }
}

/// States of an acyclic `fst` such that every arc goes forward.
fn topological_order(fst: &StdVectorFst) -> Result<Vec<StateId>> {
    let num_states = fst.num_states();
    let mut indegree = vec![0usize; num_states];
    for s in fst.states_iter() {
        for tr in fst.get_trs(s)?.trs() {
            indegree[tr.nextstate as usize] += 1;
        }
    }
    let mut queue: VecDeque<StateId> = fst.states_iter().filter(|&s| indegree[s as usize] == 0).collect();
    let mut order = Vec::with_capacity(num_states);
    while let Some(s) = queue.pop_front() {
        order.push(s);
        for tr in fst.get_trs(s)?.trs() {
            let d = &mut indegree[tr.nextstate as usize];
            *d -= 1;
            if *d == 0 {
                queue.push_back(tr.nextstate);
            }
        }
    }
    if order.len() < num_states {
        bail!("lattice has a cycle");
    }
    Ok(order)
}

/// Levenshtein distance between two label sequences.
pub fn edit_distance(hyp: &[Label], reference: &[Label]) -> usize {
    let mut row: Vec<usize> = (0..=reference.len()).collect();
    for (i, h) in hyp.iter().enumerate() {
        let mut diag = row[0];
        row[0] = i + 1;
        for (j, r) in reference.iter().enumerate() {
            let sub = diag + usize::from(h != r);
            diag = row[j + 1];
            row[j + 1] = sub.min(row[j] + 1).min(diag + 1);
        }
    }
    row[reference.len()]
}

/// Linear acceptor over `words`, adding them to `symbols`.
pub fn linear_lattice(words: &[&str], symbols: &mut SymbolTable, cost: f32) -> StdVectorFst {
    let labels: Vec<Label> = words.iter().map(|w| symbols.add_symbol(*w)).collect();
    acceptor(&labels, TropicalWeight::new(cost))
}

/// Scores lattices against their reference transcripts as the model's
/// parameters change.
pub struct WerOptimizer<'a> {
    lm: &'a mut NGramLM,
    symbols: SymbolTable,
    lattices: Vec<Lattice>,
    num_ref_words: usize,
    objective: WerObjective,
    options: LatticeOptions,
    powell: PowellOptions,
}

impl<'a> WerOptimizer<'a> {
    pub fn new(lm: &'a mut NGramLM, symbols: SymbolTable) -> Self {
        Self {
            lm,
            symbols,
            lattices: Vec::new(),
            num_ref_words: 0,
            objective: WerObjective::ErrorRate,
            options: LatticeOptions::default(),
            powell: PowellOptions::default(),
        }
    }

    pub fn with_options(mut self, options: LatticeOptions, powell: PowellOptions) -> Self {
        self.options = options;
        self.powell = powell;
        self
    }

    pub fn set_objective(&mut self, objective: WerObjective) {
        self.objective = objective;
    }

    pub fn lm(&self) -> &NGramLM {
        &*self.lm
    }

    pub fn lattices(&self) -> &[Lattice] {
        &self.lattices
    }

    pub fn num_ref_words(&self) -> usize {
        self.num_ref_words
    }

    /// Add a lattice with its reference transcript. Reference words
    /// missing from the symbol table can never be matched.
    pub fn add_lattice(&mut self, fst: StdVectorFst, reference: &str) -> Result<()> {
        let reference: Vec<Label> = reference
            .split_whitespace()
            .map(|w| self.symbols.get_label(w).unwrap_or(NO_LABEL))
            .collect();
        let lattice = Lattice::new(fst, reference, &*self.lm, &self.symbols)
            .with_context(|| format!("preparing lattice {}", self.lattices.len()))?;
        self.num_ref_words += lattice.reference.len();
        self.lattices.push(lattice);
        Ok(())
    }

    /// Read lattices in AT&T text form, with reference transcripts one
    /// per line in the same order.
    pub fn load_lattices<P: AsRef<Path>>(&mut self, lattices: &[P], references: &Path) -> Result<()> {
        let reader = binio::open_reader(references)?;
        let refs: Vec<String> = reader.lines().collect::<std::io::Result<_>>()?;
        if refs.len() != lattices.len() {
            bail!(
                "{} reference transcripts for {} lattices",
                refs.len(),
                lattices.len()
            );
        }
        for (path, reference) in lattices.iter().zip(refs.iter()) {
            let path = path.as_ref();
            let fst = StdVectorFst::read_text(path)
                .with_context(|| format!("reading lattice {}", path.display()))?;
            self.add_lattice(fst, reference)?;
        }
        log::info!(
            "loaded {} lattices with {} reference words",
            self.lattices.len(),
            self.num_ref_words
        );
        Ok(())
    }

    fn rescore_all(&mut self, params: &[f64]) -> bool {
        if !self.lm.estimate(params) {
            log::debug!("infeasible parameters {:?}", params);
            return false;
        }
        for (i, lattice) in self.lattices.iter_mut().enumerate() {
            if let Err(e) = lattice.rescore(&*self.lm, self.options.lm_scale) {
                log::warn!("failed to rescore lattice {}: {:#}", i, e);
                return false;
            }
        }
        true
    }

    /// Word error rate, as a percentage of reference words, of the 1-best
    /// paths after estimating with `params`.
    pub fn compute_wer(&mut self, params: &[f64]) -> f64 {
        if !self.rescore_all(params) {
            return INFEASIBLE_WER;
        }
        let mut errors = 0;
        for (i, lattice) in self.lattices.iter().enumerate() {
            match lattice.best_words() {
                Ok(words) => errors += edit_distance(&words, &lattice.reference),
                Err(e) => {
                    log::warn!("no best path in lattice {}: {:#}", i, e);
                    return INFEASIBLE_WER;
                }
            }
        }
        let wer = if self.num_ref_words == 0 {
            0.0
        } else {
            100.0 * errors as f64 / self.num_ref_words as f64
        };
        log::debug!("WER {:.2}% ({} errors) at {:?}", wer, errors, params);
        wer
    }

    /// Negated mean gap between the two best paths, counted positive when
    /// the best path matches the reference and negative otherwise.
    pub fn compute_margin(&mut self, params: &[f64]) -> f64 {
        if !self.rescore_all(params) {
            return INFEASIBLE_WER;
        }
        let mut total = 0.0;
        let mut n = 0;
        for (i, lattice) in self.lattices.iter().enumerate() {
            let (best, words, second) = match lattice.two_best() {
                Ok(Some(found)) => found,
                Ok(None) => continue,
                Err(e) => {
                    log::warn!("no best paths in lattice {}: {:#}", i, e);
                    return INFEASIBLE_WER;
                }
            };
            // A single path has nothing to separate.
            let Some(second) = second else { continue };
            let gap = second - best;
            total += if words == lattice.reference { gap } else { -gap };
            n += 1;
        }
        let margin = if n == 0 { 0.0 } else { -total / n as f64 };
        log::debug!("margin {:.4} at {:?}", margin, params);
        margin
    }

    /// Minimize the selected objective from `params`, leaving them and the
    /// model at the best point found.
    pub fn optimize(&mut self, params: &mut [f64]) -> OptimizeResult {
        let options = self.powell.clone();
        let result = powell::optimize(self, params, &options);
        let value = self.evaluate(params);
        log::info!(
            "minimum {:?} {:.4} after {} iterations in {:.2?}",
            self.objective,
            value,
            result.iterations,
            result.elapsed
        );
        result
    }
}

impl Objective for WerOptimizer<'_> {
    fn evaluate(&mut self, params: &[f64]) -> f64 {
        match self.objective {
            WerObjective::ErrorRate => self.compute_wer(params),
            WerObjective::Margin => self.compute_margin(params),
        }
    }
}
