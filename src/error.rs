/// Errors a caller may want to tell apart from generic I/O failures.
///
/// These travel inside `anyhow::Error`; use `downcast_ref::<NGramError>()`
/// to match on them.
#[derive(Debug, thiserror::Error)]
pub enum NGramError {
    /// Insertion into an index that has already been sorted.
    #[error("order {order} n-grams are finalized and cannot be extended")]
    Finalized {
        /// Highest N-gram order the rejected operation would have touched.
        order: usize,
    },

    /// Binary marker missing or written by a different format version.
    #[error("not a binary model file (bad magic or version)")]
    BadMagic,

    /// Malformed line in a vocabulary, corpus, counts, ARPA or params file.
    #[error("line {line}: {message}")]
    Parse {
        /// 1-based line number.
        line: usize,
        /// What was wrong with it.
        message: String,
    },

    /// Smoothing selector that names no known algorithm.
    #[error("unknown smoothing algorithm: {0}")]
    UnknownSmoothing(String),
}

impl NGramError {
    pub(crate) fn parse(line: usize, message: impl Into<String>) -> Self {
        NGramError::Parse {
            line,
            message: message.into(),
        }
    }
}
