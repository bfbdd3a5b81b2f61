//! Chi-square goodness of fit for submission counts.

use statrs::function::gamma;

use chainquery_core::QueryError;

/// Numeric special functions the fit test depends on.
pub trait SpecialFunctions: Send + Sync {
    /// Regularized upper incomplete gamma function `Q(a, x)`.
    fn gamma_ur(&self, a: f64, x: f64) -> Result<f64, QueryError>;
}

/// [`SpecialFunctions`] backed by `statrs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Statrs;

impl SpecialFunctions for Statrs {
    fn gamma_ur(&self, a: f64, x: f64) -> Result<f64, QueryError> {
        gamma::checked_gamma_ur(a, x)
            .map_err(|e| QueryError::InvalidConfig(format!("Q({a}, {x}) is undefined: {e}")))
    }
}

/// `Σ (actual − expected)² / expected`. Zero when nothing was expected.
pub fn chi_square<I>(actuals: I, expected: f64) -> f64
where
    I: IntoIterator<Item = u64>,
{
    if expected <= 0.0 {
        return 0.0;
    }
    actuals
        .into_iter()
        .map(|actual| {
            let delta = actual as f64 - expected;
            delta * delta / expected
        })
        .sum()
}

/// Probability of a chi-square statistic at least `chi` with `members − 1`
/// degrees of freedom.
///
/// A perfect fit, or a single member, is certain.
pub fn fit_probability(
    functions: &dyn SpecialFunctions,
    members: usize,
    chi: f64,
) -> Result<f64, QueryError> {
    if members <= 1 || chi <= 0.0 {
        return Ok(1.0);
    }
    functions.gamma_ur((members - 1) as f64 / 2.0, chi / 2.0)
}
