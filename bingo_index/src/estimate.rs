//! Running mean/variance estimator behind the remaining-results and remaining-time estimates

#[derive(Debug, Clone, Default)]
pub struct MeanEstimator {
    count: usize,
    sum: f64,
    sum_sq: f64,
}

/// A point estimate with its error bound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub value: f64,
    pub error: f64,
}

impl MeanEstimator {

    pub fn new() -> Self {
        return Self::default();
    }

    pub fn add_value(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.sum_sq += value * value;
    }

    /// Raises the sample count; the extra samples count as zeros.
    pub fn set_count(&mut self, count: usize) {
        if count > self.count {
            self.count = count;
        }
    }

    pub fn count(&self) -> usize {
        return self.count;
    }

    pub fn mean(&self) -> f64 {
        match self.count {
            0 => 0.0,
            n => self.sum / n as f64,
        }
    }

    /// Standard error of the mean.
    pub fn mean_error(&self) -> f64 {

        if self.count == 0 {
            return 0.0;
        }

        let n = self.count as f64;
        let mean = self.mean();
        let variance = (self.sum_sq / n - mean * mean).max(0.0);

        return (variance / n).sqrt();
    }

    /// Scales the mean and its error by `left` unprocessed samples.
    pub fn estimate_remaining(&self, left: usize) -> Estimate {
        let left = left as f64;
        return Estimate { value: left * self.mean(), error: left * self.mean_error() };
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn quick_mean_and_error() {

        let mut est = MeanEstimator::new();
        assert_eq!(est.mean(), 0.0);
        assert_eq!(est.estimate_remaining(10), Estimate { value: 0.0, error: 0.0 });

        for v in [1.0, 0.0, 1.0, 0.0] {
            est.add_value(v);
        }

        assert_approx_eq!(est.mean(), 0.5);
        assert_approx_eq!(est.mean_error(), 0.25);

        let remaining = est.estimate_remaining(100);
        assert_approx_eq!(remaining.value, 50.0);
        assert_approx_eq!(remaining.error, 25.0);
    }

    #[test]
    fn quick_set_count_adds_zeros() {

        let mut est = MeanEstimator::new();
        est.add_value(4.0);
        est.set_count(4);
        assert_approx_eq!(est.mean(), 1.0);

        est.set_count(2);
        assert_eq!(est.count(), 4);

        est.reset();
        assert_eq!(est.count(), 0);
    }
}
