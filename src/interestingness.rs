//! The interestingness metric: scores a batch of predictor results and
//! decides acceptance thresholds (§4.5).

use crate::errors::PredictorError;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One predictor's outcome for a single block: a positive TP or a failure.
pub type PredictorResult = Result<f64, PredictorError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterestingnessConfig {
    pub min_interestingness: f64,
    pub mostly_interesting_ratio: f64,
    pub invert_interestingness: bool,
}

impl Default for InterestingnessConfig {
    fn default() -> Self {
        InterestingnessConfig {
            min_interestingness: 0.5,
            mostly_interesting_ratio: 1.0,
            invert_interestingness: false,
        }
    }
}

/// `score(bb)` and whether it clears the threshold (§4.5).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterestingnessResult {
    pub score: f64,
    pub interesting: bool,
}

/// Score one block's per-predictor results (§4.5, §9 "all predictors
/// failed" standardization: not interesting, score 0, unless inverted).
pub fn score(results: &BTreeMap<String, PredictorResult>, cfg: &InterestingnessConfig) -> InterestingnessResult {
    let values: Vec<OrderedFloat<f64>> = results
        .values()
        .filter_map(|r| r.as_ref().ok())
        .filter(|v| v.is_finite() && *v > 0.0)
        .map(|v| OrderedFloat(*v))
        .collect();

    let any_failed = results.values().any(|r| r.is_err());
    let any_succeeded = !values.is_empty();

    let raw_score = if any_failed && any_succeeded {
        f64::INFINITY
    } else if values.len() < 2 {
        0.0
    } else {
        let max = values.iter().max().unwrap().0;
        let min = values.iter().min().unwrap().0;
        max / min - 1.0
    };

    let score = if values.is_empty() && !any_failed {
        // No predictors ran at all; nothing to compare.
        0.0
    } else {
        raw_score
    };

    let clears = score >= cfg.min_interestingness;
    let interesting = if cfg.invert_interestingness { !clears } else { clears };
    InterestingnessResult { score, interesting }
}

/// A batch is *mostly interesting* once at least `mostly_interesting_ratio`
/// of its (non-error) members are interesting (§4.5).
pub fn batch_mostly_interesting(results: &[InterestingnessResult], cfg: &InterestingnessConfig) -> bool {
    if results.is_empty() {
        return false;
    }
    let interesting_count = results.iter().filter(|r| r.interesting).count();
    (interesting_count as f64) / (results.len() as f64) >= cfg.mostly_interesting_ratio
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results(pairs: &[(&str, PredictorResult)]) -> BTreeMap<String, PredictorResult> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn disagreement_scores_the_max_min_ratio() {
        let cfg = InterestingnessConfig::default();
        let r = results(&[("a", Ok(2.0)), ("b", Ok(1.0))]);
        let res = score(&r, &cfg);
        assert!((res.score - 1.0).abs() < 1e-9);
        assert!(res.interesting);
    }

    #[test]
    fn boundary_at_exactly_min_interestingness_is_interesting() {
        let cfg = InterestingnessConfig { min_interestingness: 1.0, ..Default::default() };
        let r = results(&[("a", Ok(2.0)), ("b", Ok(1.0))]);
        assert!(score(&r, &cfg).interesting);
    }

    #[test]
    fn one_failure_one_success_is_infinitely_interesting() {
        let cfg = InterestingnessConfig::default();
        let r = results(&[("a", Ok(2.0)), ("b", Err(PredictorError::Timeout))]);
        let res = score(&r, &cfg);
        assert_eq!(res.score, f64::INFINITY);
        assert!(res.interesting);
    }

    #[test]
    fn all_predictors_failing_is_not_interesting() {
        let cfg = InterestingnessConfig::default();
        let r = results(&[("a", Err(PredictorError::Timeout)), ("b", Err(PredictorError::Crashed("x".into())))]);
        let res = score(&r, &cfg);
        assert_eq!(res.score, 0.0);
        assert!(!res.interesting);
    }

    #[test]
    fn invert_interestingness_flips_the_predicate() {
        let cfg = InterestingnessConfig { invert_interestingness: true, ..Default::default() };
        let agree = results(&[("a", Ok(1.0)), ("b", Ok(1.0))]);
        assert!(score(&agree, &cfg).interesting);
        let disagree = results(&[("a", Ok(2.0)), ("b", Ok(1.0))]);
        assert!(!score(&disagree, &cfg).interesting);
    }

    #[test]
    fn batch_ratio_threshold() {
        let cfg = InterestingnessConfig { mostly_interesting_ratio: 0.5, ..Default::default() };
        let rs = vec![
            InterestingnessResult { score: 2.0, interesting: true },
            InterestingnessResult { score: 0.0, interesting: false },
        ];
        assert!(batch_mostly_interesting(&rs, &cfg));
    }
}
