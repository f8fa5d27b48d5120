use anyhow::{anyhow, Result};

/// Compute count-of-count bins for e.g. absolute discounting (used
/// by Kneser-Ney smoothing)
#[derive(Debug, Clone)]
pub struct NGramCountOfCounts {
    /// `bins[k]` is the number of n-grams seen exactly k+1 times, for one
    /// more bin than requested so that the last discount has a successor.
    bins: Vec<u64>,
}

impl NGramCountOfCounts {
    pub const MAX_BINS: u8 = 32;

    pub fn new(bins: u8) -> Result<Self> {
        if bins == 0 || bins > Self::MAX_BINS {
            Err(anyhow!("NGramCountOfCounts: Number of bins out of range: {}", bins))
        } else {
            Ok(NGramCountOfCounts {
                bins: vec![0; bins as usize + 1],
            })
        }
    }

    /// Tally a slice of counts.
    pub fn from_counts(bins: u8, counts: &[u64]) -> Result<Self> {
        let mut coc = Self::new(bins)?;
        for &count in counts {
            coc.add(count);
        }
        Ok(coc)
    }

    pub fn add(&mut self, count: u64) {
        if count > 0 && count as usize <= self.bins.len() {
            self.bins[count as usize - 1] += 1;
        }
    }

    /// Number of discount bins (not counting the extra successor bin).
    pub fn num_bins(&self) -> usize {
        self.bins.len() - 1
    }

    /// Number of n-grams seen exactly `count` times.
    pub fn get(&self, count: usize) -> u64 {
        if count == 0 {
            0
        } else {
            self.bins.get(count - 1).copied().unwrap_or(0)
        }
    }

    /// Generalized rule of thumb: Y = k n_k / ( k n_k + (k+1) * n_{k+1} )
    /// where n_k is the total count mass for items that occurred k times
    /// Note: method generalized to allow for zeros in low count bins:
    ///       find lowest non-empty count bins, then use rule of thumb
    pub fn rule_of_thumb(&self) -> f64 {
        for k in 1..self.bins.len() {
            let (nk, nk1) = (self.get(k) as f64, self.get(k + 1) as f64);
            if nk > 0.0 && nk1 > 0.0 {
                let k = k as f64;
                return k * nk / (k * nk + (k + 1.0) * nk1);
            }
        }
        // Too little data for any estimate.
        0.5
    }

    /// Calculate absolute discounting parameter according to histogram formula.
    /// Using Chen and Goodman version from equation (26) of paper
    /// For count i, discount: i - ( (i+1) Y n_{i+1} / n_{i} ) for a given Y
    pub fn discount(&self, count: usize, y: f64) -> f64 {
        let (ni, ni1) = (self.get(count) as f64, self.get(count + 1) as f64);
        let i = count as f64;
        let discount = if ni > 0.0 {
            i - (i + 1.0) * y * ni1 / ni
        } else {
            f64::NAN
        };
        if discount.is_finite() && discount > 0.0 && discount < i {
            discount
        } else {
            y.min(i)
        }
    }

    /// Default discounts D_1 .. D_bins.
    pub fn discounts(&self) -> Vec<f64> {
        let y = self.rule_of_thumb();
        (1..=self.num_bins()).map(|k| self.discount(k, y)).collect()
    }
}
