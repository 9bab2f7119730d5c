//! Smooth weighted round-robin.
//!
//! Each pick adds every eligible candidate's weight to its running score,
//! takes the highest score, and subtracts the eligible total from the
//! winner. Over any run of picks with a stable eligible set, each candidate
//! is chosen in proportion to its weight, and picks are interleaved rather
//! than bunched.

#[derive(Debug, Clone)]
pub struct WeightedRoundRobin {
    scores: Vec<i64>,
}

impl WeightedRoundRobin {
    pub fn new(candidates: usize) -> Self {
        Self {
            scores: vec![0; candidates],
        }
    }

    /// Pick among `eligible` indices. Ties go to the lower index.
    pub fn pick(&mut self, weights: &[u32], eligible: impl Fn(usize) -> bool) -> Option<usize> {
        let mut total: i64 = 0;
        let mut best: Option<usize> = None;

        for (i, weight) in weights.iter().enumerate().take(self.scores.len()) {
            if !eligible(i) || *weight == 0 {
                continue;
            }
            let weight = i64::from(*weight);
            total += weight;
            self.scores[i] += weight;
            if best.map_or(true, |b| self.scores[i] > self.scores[b]) {
                best = Some(i);
            }
        }

        let best = best?;
        self.scores[best] -= total;
        Some(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_in_proportion_to_weight() {
        let weights = [60, 30, 10];
        let mut rr = WeightedRoundRobin::new(3);
        let mut counts = [0usize; 3];
        for _ in 0..100 {
            counts[rr.pick(&weights, |_| true).unwrap()] += 1;
        }
        assert_eq!(counts, [60, 30, 10]);
    }

    #[test]
    fn interleaves_equal_weights() {
        let weights = [5, 5];
        let mut rr = WeightedRoundRobin::new(2);
        let picks: Vec<usize> = (0..4).map(|_| rr.pick(&weights, |_| true).unwrap()).collect();
        assert_eq!(picks, vec![0, 1, 0, 1]);
    }

    #[test]
    fn skips_ineligible_and_returns_none_when_empty() {
        let weights = [10, 10, 10];
        let mut rr = WeightedRoundRobin::new(3);
        for _ in 0..5 {
            assert_eq!(rr.pick(&weights, |i| i == 2), Some(2));
        }
        assert_eq!(rr.pick(&weights, |_| false), None);
    }
}
