//! The predictor-manager contract (§4.4) plus an in-process reference
//! implementation used by tests and by `check-predictors`.

use crate::concrete::ConcreteBasicBlock;
use crate::errors::PredictorError;
use crate::interestingness::PredictorResult;
use indicatif::ParallelProgressIterator;
use rayon::prelude::*;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Everything the core assumes about the external predictor supervisor
/// (§4.4): parallel batch evaluation, key-pattern expansion, and an
/// optional per-predictor unsupported-instruction filter list.
pub trait PredictorManager: Send + Sync {
    fn evaluate(&self, predictor_key: &str, blocks: &[ConcreteBasicBlock]) -> Vec<PredictorResult>;

    fn resolve_key_patterns(&self, patterns: &[String]) -> Vec<String>;

    fn get_insn_filter_files(&self, key: &str) -> Option<Vec<String>>;

    /// Evaluate one batch under several predictors, keyed by predictor.
    /// Fan-out is across predictors (§5: the only sanctioned concurrency).
    fn evaluate_all(&self, keys: &[String], blocks: &[ConcreteBasicBlock]) -> Vec<BTreeMap<String, PredictorResult>> {
        let per_predictor: Vec<Vec<PredictorResult>> = keys
            .par_iter()
            .progress_count(keys.len() as u64)
            .map(|key| self.evaluate(key, blocks))
            .collect();
        (0..blocks.len())
            .map(|i| {
                keys.iter()
                    .zip(per_predictor.iter())
                    .map(|(key, results)| (key.clone(), results[i].clone()))
                    .collect()
            })
            .collect()
    }
}

type PredictorFn = dyn Fn(&ConcreteBasicBlock) -> PredictorResult + Send + Sync;

/// A predictor registered by key: a closure over its TP function plus an
/// optional filter-file list (§6.2 `predmanager`, §4.4
/// `get_insn_filter_files`).
struct RegisteredPredictor {
    eval: Arc<PredictorFn>,
    filter_files: Option<Vec<String>>,
}

/// In-process reference manager: no subprocess supervision, no timeouts —
/// every predictor is a plain closure run under `rayon` (§9 supplemented
/// module; modeled on `main.rs`'s `rayon::ThreadPoolBuilder` fan-out).
#[derive(Default)]
pub struct MockPredictorManager {
    predictors: BTreeMap<String, RegisteredPredictor>,
}

impl MockPredictorManager {
    pub fn new() -> Self {
        MockPredictorManager::default()
    }

    pub fn register(
        &mut self,
        key: impl Into<String>,
        eval: impl Fn(&ConcreteBasicBlock) -> PredictorResult + Send + Sync + 'static,
        filter_files: Option<Vec<String>>,
    ) {
        self.predictors.insert(key.into(), RegisteredPredictor { eval: Arc::new(eval), filter_files });
    }

    pub fn keys(&self) -> Vec<String> {
        self.predictors.keys().cloned().collect()
    }
}

impl PredictorManager for MockPredictorManager {
    fn evaluate(&self, predictor_key: &str, blocks: &[ConcreteBasicBlock]) -> Vec<PredictorResult> {
        let Some(predictor) = self.predictors.get(predictor_key) else {
            return blocks.iter().map(|_| Err(PredictorError::Unsupported)).collect();
        };
        blocks
            .par_iter()
            .progress_count(blocks.len() as u64)
            .map(|bb| (predictor.eval)(bb))
            .collect()
    }

    fn resolve_key_patterns(&self, patterns: &[String]) -> Vec<String> {
        let mut out = Vec::new();
        for pattern in patterns {
            match Regex::new(&format!("^{}$", pattern)) {
                Ok(re) => {
                    for key in self.predictors.keys() {
                        if re.is_match(key) && !out.contains(key) {
                            out.push(key.clone());
                        }
                    }
                }
                Err(_) => {
                    if self.predictors.contains_key(pattern) && !out.contains(pattern) {
                        out.push(pattern.clone());
                    }
                }
            }
        }
        out
    }

    fn get_insn_filter_files(&self, key: &str) -> Option<Vec<String>> {
        self.predictors.get(key)?.filter_files.clone()
    }
}

/// Load a toy additive-cost registry: `{ predictor_key: { scheme_id: tp } }`
/// (§6.2 `predmanager.registry_path`). Each predictor's TP for a block is
/// the sum of its registered per-scheme costs; a block referencing a scheme
/// absent from the table fails with `PredictorError::Unsupported`. This
/// stands in for the real predictor supervisor the spec keeps external.
pub fn load_registry_from_file(path: &std::path::Path) -> Result<MockPredictorManager, crate::errors::ConfigError> {
    let text = std::fs::read_to_string(path)?;
    let table: BTreeMap<String, BTreeMap<String, f64>> = serde_json::from_str(&text)?;
    let mut mgr = MockPredictorManager::new();
    for (key, costs) in table {
        mgr.register(
            key,
            move |bb: &ConcreteBasicBlock| -> PredictorResult {
                let mut total = 0.0;
                for insn in &bb.instructions {
                    match costs.get(&insn.scheme_id) {
                        Some(cost) => total += cost,
                        None => return Err(PredictorError::Unsupported),
                    }
                }
                if total > 0.0 {
                    Ok(total)
                } else {
                    Err(PredictorError::NonPositiveResult(total))
                }
            },
            None,
        );
    }
    Ok(mgr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concrete::ConcreteInstruction;
    use std::collections::BTreeMap as Map;

    fn bb() -> ConcreteBasicBlock {
        ConcreteBasicBlock {
            instructions: vec![ConcreteInstruction {
                scheme_id: "add_r_r".into(),
                operand_assignment: Map::new(),
                text: "add eax, ebx".into(),
            }],
        }
    }

    #[test]
    fn evaluate_all_is_positionally_aligned() {
        let mut mgr = MockPredictorManager::new();
        mgr.register("ithemal.0", |_| Ok(2.0), None);
        mgr.register("uica.0", |_| Ok(3.0), None);
        let blocks = vec![bb(), bb()];
        let keys = mgr.keys();
        let results = mgr.evaluate_all(&keys, &blocks);
        assert_eq!(results.len(), 2);
        for r in &results {
            assert_eq!(r.len(), 2);
            assert_eq!(r["ithemal.0"], Ok(2.0));
            assert_eq!(r["uica.0"], Ok(3.0));
        }
    }

    #[test]
    fn unregistered_key_reports_unsupported() {
        let mgr = MockPredictorManager::new();
        let results = mgr.evaluate("nope.0", &[bb()]);
        assert_eq!(results, vec![Err(PredictorError::Unsupported)]);
    }

    #[test]
    fn resolve_key_patterns_expands_regex() {
        let mut mgr = MockPredictorManager::new();
        mgr.register("ithemal.0", |_| Ok(1.0), None);
        mgr.register("ithemal.1", |_| Ok(1.0), None);
        mgr.register("uica.0", |_| Ok(1.0), None);
        let mut resolved = mgr.resolve_key_patterns(&["ithemal\\..*".to_string()]);
        resolved.sort();
        assert_eq!(resolved, vec!["ithemal.0".to_string(), "ithemal.1".to_string()]);
    }
}
