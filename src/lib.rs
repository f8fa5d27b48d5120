//! Estimation of backoff N-Gram language models from text or counts, and
//! tuning of their smoothing parameters on held-out text or lattices.
use rustfst::fst_impls::VectorFst;
use rustfst::semirings::TropicalWeight;

/// rustfst does not define this but we will
pub type StdVectorFst = VectorFst<TropicalWeight>;

mod binio;

/// Errors callers may want to tell apart
pub mod error;

/// Word lists and their indices
pub mod vocab;

/// Hashed (history, word) index for one N-Gram order
pub mod index;

/// Functions for counting N-Grams from text
pub mod count;

/// Count-of-counts statistics for discounting
pub mod coc;

/// Smoothing algorithms
pub mod make;

/// Backoff N-Gram language model
pub mod model;

/// ARPA text format
pub mod arpa;

/// Derivative-free minimization
pub mod powell;

/// Held-out perplexity objective
pub mod perplexity;

/// Lattice word error rate objective
pub mod lattice;

pub use count::{NGramMaps, NGramStore};
pub use error::NGramError;
pub use index::NGramIndex;
pub use lattice::{Lattice, LatticeOptions, WerObjective, WerOptimizer};
pub use make::{Smoothing, SmoothingKind};
pub use model::{LmConfig, LmFormat, NGramLM};
pub use perplexity::PerplexityOptimizer;
pub use powell::{Objective, OptimizeResult, PowellOptions};
pub use vocab::Vocabulary;
