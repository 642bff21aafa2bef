//! Similarity coefficients and their analytic upper bounds
//!
//! Every coefficient is computed from three counts: `a` set bits in the query, `b` in the target
//! and `c` in common. A zero count of common bits always yields 0.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

const EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SimCoef {
    Tanimoto,
    Tversky { alpha: f64, beta: f64 },
    /// Fraction of the query bits present in the target.
    EuclidSub,
}

impl Default for SimCoef {
    fn default() -> Self {
        SimCoef::Tanimoto
    }
}

impl SimCoef {

    pub fn tversky(alpha: f64, beta: f64) -> Result<Self> {

        if alpha < 0.0 || beta < 0.0 || (alpha + beta - 1.0).abs() > EPSILON {
            return Err(Error::InvalidParameter(format!(
                "tversky parameters must be non-negative with alpha + beta = 1, got {} {}", alpha, beta)));
        }

        return Ok(SimCoef::Tversky { alpha, beta });
    }

    /// Parses `tanimoto`, `euclid-sub`, `tversky` or `tversky <alpha> <beta>`. An empty string
    /// selects Tanimoto.
    pub fn parse(metric: &str) -> Result<Self> {

        let tokens: Vec<&str> = metric.split_whitespace().collect();
        let bad = |reason: &str| Error::InvalidParameter(format!("metric '{}': {}", metric, reason));

        match tokens.as_slice() {
            [] | ["tanimoto"] => Ok(SimCoef::Tanimoto),
            ["euclid-sub"] => Ok(SimCoef::EuclidSub),
            ["tversky"] => SimCoef::tversky(0.5, 0.5),
            ["tversky", alpha, beta] => {
                let alpha: f64 = alpha.parse().map_err(|_| bad("alpha is not a number"))?;
                let beta: f64 = beta.parse().map_err(|_| bad("beta is not a number"))?;
                SimCoef::tversky(alpha, beta)
            },
            ["tanimoto", ..] | ["euclid-sub", ..] => Err(bad("metric takes no parameters")),
            ["tversky", ..] => Err(bad("expected 'tversky <alpha> <beta>'")),
            _ => Err(bad("allowed metrics are tanimoto, euclid-sub, tversky [<alpha> <beta>]")),
        }
    }

    pub fn name(&self) -> String {
        match self {
            SimCoef::Tanimoto => "tanimoto".to_string(),
            SimCoef::Tversky { alpha, beta } => format!("tversky {} {}", alpha, beta),
            SimCoef::EuclidSub => "euclid-sub".to_string(),
        }
    }

    /// Coefficient for query popcount `a`, target popcount `b` and `c` common bits.
    pub fn coef(&self, a: u32, b: u32, c: u32) -> f64 {

        if c == 0 {
            return 0.0;
        }

        let (a, b, c) = (a as f64, b as f64, c as f64);

        let denom = match self {
            SimCoef::Tanimoto => a + b - c,
            SimCoef::Tversky { alpha, beta } => alpha * (a - c) + beta * (b - c) + c,
            SimCoef::EuclidSub => a,
        };

        match denom > 0.0 {
            true => c / denom,
            false => 0.0,
        }
    }

    /// Best coefficient any target can reach given its popcount lies in `[b_min, b_max]`, at most
    /// `a - under` of the query bits can be common, and at least `over` of its bits are missing
    /// from the query.
    ///
    /// For a fixed `b` every coefficient grows with `c`, so `c = min(a - under, b - over)`. Along
    /// `b` the result rises until `b = a - under + over` and falls after it, so the maximum is at
    /// that point clamped to the range or at one of the range ends.
    pub fn upper_bound(&self, a: u32, b_min: u32, b_max: u32, under: u32, over: u32) -> f64 {

        if b_min > b_max {
            return 0.0;
        }

        let k = a.saturating_sub(under);
        let peak = (k + over).clamp(b_min, b_max);

        return [b_min, b_max, peak].iter()
            .map(|b| self.coef(a, *b, std::cmp::min(k, b.saturating_sub(over))))
            .fold(0.0, f64::max);
    }

    /// Cell-level bound: only the popcount range of the cell is known.
    pub fn range_bound(&self, a: u32, b_min: u32, b_max: u32) -> f64 {
        return self.upper_bound(a, b_min, b_max, 0, 0);
    }
}
