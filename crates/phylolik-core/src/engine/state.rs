use std::cmp::Ordering;
use std::ops::AddAssign;

/// Outcome of an optimization run.
///
/// Running out of evaluations is not an error: `converged` is then false and
/// `evaluations` reports how many were spent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizationSummary {
    pub evaluations: usize,
    pub iterations: usize,
    /// Objective at the returned point.
    pub value: f64,
    pub converged: bool,
}

impl OptimizationSummary {
    pub fn new(value: f64) -> Self {
        Self {
            evaluations: 0,
            iterations: 0,
            value,
            converged: false,
        }
    }
}

impl AddAssign for OptimizationSummary {
    /// Chains a later run: counts add up, the later value and status win.
    fn add_assign(&mut self, later: Self) {
        self.evaluations += later.evaluations;
        self.iterations += later.iterations;
        self.value = later.value;
        self.converged = later.converged;
    }
}

/// A candidate move with the improvement of the objective it brings.
///
/// Ordered by gain, so that a max-heap yields the best move first.
#[derive(Debug, Clone)]
pub struct Scored<T> {
    pub gain: f64,
    pub item: T,
}

impl<T> PartialEq for Scored<T> {
    fn eq(&self, other: &Self) -> bool {
        self.gain == other.gain
    }
}
impl<T> Eq for Scored<T> {}

impl<T> PartialOrd for Scored<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Scored<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.gain.partial_cmp(&other.gain).unwrap_or(Ordering::Equal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;

    #[test]
    fn summaries_accumulate_counts() {
        let mut total = OptimizationSummary::new(10.0);
        total += OptimizationSummary {
            evaluations: 5,
            iterations: 2,
            value: 8.0,
            converged: true,
        };
        total += OptimizationSummary {
            evaluations: 3,
            iterations: 1,
            value: 7.5,
            converged: false,
        };
        assert_eq!(total.evaluations, 8);
        assert_eq!(total.iterations, 3);
        assert_eq!(total.value, 7.5);
        assert!(!total.converged);
    }

    #[test]
    fn heap_of_scored_items_pops_the_best_gain() {
        let mut heap = BinaryHeap::new();
        heap.push(Scored { gain: 0.5, item: "a" });
        heap.push(Scored { gain: 2.0, item: "b" });
        heap.push(Scored { gain: -1.0, item: "c" });
        assert_eq!(heap.pop().map(|s| s.item), Some("b"));
    }
}
