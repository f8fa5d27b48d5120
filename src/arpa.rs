//! ARPA text format for backoff N-Gram models.
use anyhow::{bail, ensure, Result};
use std::io::prelude::*;

use crate::count::NGramStore;
use crate::error::NGramError;
use crate::index::NGramIdx;
use crate::model::{NGramLM, KINFBACKOFF};
use crate::vocab::{Vocabulary, WordIndex, BOS_SYMBOL, END_OF_SENTENCE, EOS_SYMBOL, UNK_SYMBOL};

fn to_log10(x: f64) -> f64 {
    if x > 0.0 {
        x.log10()
    } else {
        -KINFBACKOFF
    }
}

fn from_log10(x: f64) -> f64 {
    if x <= -KINFBACKOFF {
        0.0
    } else {
        10f64.powf(x)
    }
}

/// One `logprob words [logbackoff]` line.
#[derive(Debug)]
struct ArpaEntry {
    words: Vec<String>,
    logprob: f64,
    logbow: Option<f64>,
}

#[derive(Debug, PartialEq)]
enum Section {
    Header,
    Data,
    Grams(usize),
}

fn parse_f64(field: &str, lineno: usize) -> Result<f64> {
    field
        .parse()
        .map_err(|_| NGramError::parse(lineno, format!("bad number {:?}", field)).into())
}

/// Word indices of an ARPA n-gram; `<s>` and `</s>` both name the
/// sentence boundary.
fn entry_words(vocab: &Vocabulary, words: &[String]) -> Vec<WordIndex> {
    words
        .iter()
        .map(|w| match w.as_str() {
            BOS_SYMBOL | EOS_SYMBOL => END_OF_SENTENCE,
            w => vocab.find(w),
        })
        .collect()
}

impl NGramLM {
    pub fn write_arpa<W: Write + ?Sized>(&self, w: &mut W) -> Result<()> {
        let store = self.store();
        let order = self.order();
        writeln!(w)?;
        writeln!(w, "\\data\\")?;
        for o in 1..=order {
            // unigrams gain a <s> line
            let n = store.size(o) + usize::from(o == 1);
            writeln!(w, "ngram {}={}", o, n)?;
        }
        for o in 1..=order {
            writeln!(w)?;
            writeln!(w, "\\{}-grams:", o)?;
            if o == 1 {
                if order > 1 {
                    let bow = self.bows(1)[END_OF_SENTENCE as usize];
                    writeln!(w, "{:.6}\t{}\t{:.6}", -KINFBACKOFF, BOS_SYMBOL, to_log10(bow))?;
                } else {
                    writeln!(w, "{:.6}\t{}", -KINFBACKOFF, BOS_SYMBOL)?;
                }
            }
            for i in 0..store.size(o) {
                let text = store.ngram_text(o, i as NGramIdx);
                let logprob = to_log10(self.probs(o)[i]);
                let ends_sentence = store.words(o)[i] == END_OF_SENTENCE;
                if o < order && !ends_sentence {
                    let logbow = to_log10(self.bows(o)[i]);
                    writeln!(w, "{:.6}\t{}\t{:.6}", logprob, text, logbow)?;
                } else {
                    writeln!(w, "{:.6}\t{}", logprob, text)?;
                }
            }
        }
        writeln!(w)?;
        writeln!(w, "\\end\\")?;
        Ok(())
    }

    /// Read an ARPA model. The result has fixed probabilities; zero
    /// probabilities of implied n-grams are filled by backoff.
    pub fn read_arpa<R: BufRead>(reader: R) -> Result<NGramLM> {
        let mut section = Section::Header;
        let mut declared: Vec<usize> = Vec::new();
        let mut entries: Vec<Vec<ArpaEntry>> = Vec::new();
        let mut ended = false;
        for (lineno, line) in reader.lines().enumerate() {
            let lineno = lineno + 1;
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line == "\\data\\" {
                section = Section::Data;
                continue;
            }
            if line == "\\end\\" {
                ended = true;
                break;
            }
            if let Some(k) = line
                .strip_prefix('\\')
                .and_then(|l| l.strip_suffix("-grams:"))
            {
                let k: usize = k
                    .parse()
                    .map_err(|_| NGramError::parse(lineno, format!("bad section {:?}", line)))?;
                if k != entries.len() + 1 || k > declared.len() {
                    return Err(NGramError::parse(lineno, format!("unexpected section {:?}", line)).into());
                }
                entries.push(Vec::new());
                section = Section::Grams(k);
                continue;
            }
            match section {
                Section::Header => {}
                Section::Data => {
                    let (k, n) = line
                        .strip_prefix("ngram ")
                        .and_then(|l| l.split_once('='))
                        .and_then(|(k, n)| Some((k.trim().parse::<usize>().ok()?, n.trim().parse::<usize>().ok()?)))
                        .ok_or_else(|| NGramError::parse(lineno, format!("bad count line {:?}", line)))?;
                    if k != declared.len() + 1 {
                        return Err(NGramError::parse(lineno, "n-gram counts out of order").into());
                    }
                    declared.push(n);
                }
                Section::Grams(k) => {
                    let fields: Vec<&str> = line.split_whitespace().collect();
                    if fields.len() != k + 1 && fields.len() != k + 2 {
                        return Err(NGramError::parse(lineno, format!("expected a {}-gram entry", k)).into());
                    }
                    let logbow = match fields.get(k + 1) {
                        Some(f) => Some(parse_f64(f, lineno)?),
                        None => None,
                    };
                    entries[k - 1].push(ArpaEntry {
                        words: fields[1..=k].iter().map(|s| s.to_string()).collect(),
                        logprob: parse_f64(fields[0], lineno)?,
                        logbow,
                    });
                }
            }
        }
        if !ended {
            bail!("ARPA file has no \\end\\ marker");
        }
        let order = declared.len();
        ensure!(order >= 1, "ARPA file has no \\data\\ section");
        ensure!(entries.len() == order, "ARPA file declares {} orders but has {}", order, entries.len());
        for (o, (es, &n)) in entries.iter().zip(declared.iter()).enumerate() {
            if es.len() != n {
                log::warn!("{}-grams: {} declared, {} found", o + 1, n, es.len());
            }
        }

        let use_unknown = entries[0].iter().any(|e| e.words[0] == UNK_SYMBOL);
        let mut store = NGramStore::new(order, Vocabulary::new(use_unknown))?;
        for e in entries[0].iter() {
            if e.words[0] != BOS_SYMBOL {
                store.add_word(&e.words[0])?;
            }
        }
        for es in entries.iter().skip(1) {
            for e in es {
                let mut words = Vec::with_capacity(e.words.len());
                for w in e.words.iter() {
                    words.push(match w.as_str() {
                        BOS_SYMBOL | EOS_SYMBOL => END_OF_SENTENCE,
                        w => store.add_word(w)?,
                    });
                }
                store.add_ngram(&words)?;
            }
        }
        store.finalize()?;

        let mut probs: Vec<Vec<f64>> = (0..=order).map(|o| vec![0.0; store.size(o)]).collect();
        // A missing backoff weight means log10 = 0. The empty context
        // never backs off to the uniform distribution.
        let mut bows: Vec<Vec<f64>> = (0..order).map(|o| vec![1.0; store.size(o)]).collect();
        bows[0][0] = 0.0;
        for (k, es) in entries.iter().enumerate() {
            let o = k + 1;
            for e in es {
                if o == 1 && e.words[0] == BOS_SYMBOL {
                    if let (Some(logbow), true) = (e.logbow, order > 1) {
                        bows[1][END_OF_SENTENCE as usize] = from_log10(logbow);
                    }
                    continue;
                }
                let words = entry_words(store.vocab(), &e.words);
                let idx = match store.find_ngram(&words) {
                    Some(idx) => idx as usize,
                    None => bail!("n-gram {:?} vanished while loading", e.words),
                };
                probs[o][idx] = from_log10(e.logprob);
                if let (Some(logbow), true) = (e.logbow, o < order) {
                    bows[o][idx] = from_log10(logbow);
                }
            }
        }
        log::info!("read ARPA model, n-grams per order: {:?}", store.sizes());
        NGramLM::from_probs(store, probs, bows)
    }
}
